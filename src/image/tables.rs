//! Byte-level encoders for the dynamic tables of a synthetic image.
//!
//! Each function appends one table in the exact on-disk format the loader
//! parses back: `Elf64_Sym`, `Elf64_Rela`, `Elf64_Dyn`, the SysV hash table,
//! RELR bitmaps and Android's APS2 stream.

use crate::Result;

/// Size of an `Elf64_Sym`.
pub(crate) const SYM_SIZE: usize = 24;
/// Size of an `Elf64_Rela`.
pub(crate) const RELA_SIZE: usize = 24;
/// Size of an `Elf64_Dyn`.
pub(crate) const DYN_SIZE: usize = 16;

const GROUPED_BY_INFO: u64 = 1;
const GROUP_HAS_ADDEND: u64 = 8;

/// One relocation before it is written to a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RelaEntry {
    pub offset: u64,
    pub kind: u32,
    pub symbol: u32,
    pub addend: i64,
}

impl RelaEntry {
    pub fn info(&self) -> u64 {
        (u64::from(self.symbol) << 32) | u64::from(self.kind)
    }
}

/// A dynamic symbol before it is written to `.dynsym`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SymEntry {
    pub name: u32,
    pub info: u8,
    pub section: u16,
    pub value: u64,
    pub size: u64,
}

/// String table with offset lookup; offset 0 is the empty string.
#[derive(Debug, Default)]
pub(crate) struct StringTable {
    bytes: Vec<u8>,
}

impl StringTable {
    pub fn new() -> Self {
        Self { bytes: vec![0] }
    }

    /// Appends `text` unless it is already present and returns its offset.
    pub fn add(&mut self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        let needle: Vec<u8> = text.bytes().chain(std::iter::once(0)).collect();
        if let Some(position) = self
            .bytes
            .windows(needle.len())
            .position(|window| window == needle.as_slice())
            .filter(|&position| position == 0 || self.bytes[position - 1] == 0)
        {
            return position as u32;
        }
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(&needle);
        offset
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// The classic SysV ELF hash.
pub(crate) fn elf_hash(name: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &byte in name {
        hash = (hash << 4).wrapping_add(u32::from(byte));
        let high = hash & 0xF000_0000;
        if high != 0 {
            hash ^= high >> 24;
        }
        hash &= !high;
    }
    hash
}

/// Builds a `DT_HASH` table for `names` (index 0 is the null symbol).
pub(crate) fn hash_table(names: &[&str]) -> Vec<u8> {
    let count = names.len().max(1);
    let buckets_len = count;
    let mut buckets = vec![0u32; buckets_len];
    let mut chains = vec![0u32; count];
    for (index, name) in names.iter().enumerate().skip(1) {
        let bucket = elf_hash(name.as_bytes()) as usize % buckets_len;
        chains[index] = buckets[bucket];
        buckets[bucket] = index as u32;
    }

    let mut out = Vec::with_capacity((2 + buckets_len + count) * 4);
    out.extend_from_slice(&(buckets_len as u32).to_le_bytes());
    out.extend_from_slice(&(count as u32).to_le_bytes());
    for word in buckets.iter().chain(chains.iter()) {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out
}

/// Size in bytes of the hash table [`hash_table`] produces for `count` symbols.
pub(crate) fn hash_table_size(count: usize) -> usize {
    let count = count.max(1);
    (2 + 2 * count) * 4
}

pub(crate) fn write_symbols(out: &mut Vec<u8>, symbols: &[SymEntry]) {
    for symbol in symbols {
        out.extend_from_slice(&symbol.name.to_le_bytes());
        out.push(symbol.info);
        out.push(0);
        out.extend_from_slice(&symbol.section.to_le_bytes());
        out.extend_from_slice(&symbol.value.to_le_bytes());
        out.extend_from_slice(&symbol.size.to_le_bytes());
    }
}

pub(crate) fn write_rela(out: &mut Vec<u8>, entries: &[RelaEntry]) {
    for entry in entries {
        out.extend_from_slice(&entry.offset.to_le_bytes());
        out.extend_from_slice(&entry.info().to_le_bytes());
        out.extend_from_slice(&entry.addend.to_le_bytes());
    }
}

pub(crate) fn write_dynamic(out: &mut Vec<u8>, entries: &[(u64, u64)]) {
    for (tag, value) in entries {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
    }
}

pub(crate) fn sleb128(mut value: i64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Encodes `offsets` (8-byte aligned) as a RELR table.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for an unaligned offset.
pub(crate) fn encode_relr(offsets: &[u64]) -> Result<Vec<u64>> {
    let mut sorted = offsets.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    if let Some(offset) = sorted.iter().find(|offset| *offset % 8 != 0) {
        return Err(malformed_error!("RELR target {:#x} is not word aligned", offset));
    }

    let mut table = Vec::new();
    let mut index = 0;
    while index < sorted.len() {
        table.push(sorted[index]);
        let mut next = sorted[index] + 8;
        index += 1;
        loop {
            let mut bitmap = 0u64;
            while let Some(&offset) = sorted.get(index) {
                let slot = (offset - next) / 8;
                if slot >= 63 {
                    break;
                }
                bitmap |= 1 << slot;
                index += 1;
            }
            if bitmap == 0 {
                break;
            }
            table.push((bitmap << 1) | 1);
            next += 63 * 8;
        }
    }
    Ok(table)
}

/// Encodes `entries` as an APS2 stream, magic included.
///
/// `R_AARCH64_RELATIVE` entries share one group keyed by info; everything else
/// follows in an ungrouped run.
pub(crate) fn encode_android_rela(entries: &[RelaEntry], relative_kind: u32) -> Vec<u8> {
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|entry| (entry.kind != relative_kind, entry.offset));
    let split = sorted
        .iter()
        .position(|entry| entry.kind != relative_kind)
        .unwrap_or(sorted.len());
    let (relative, other) = sorted.split_at(split);

    let mut out = b"APS2".to_vec();
    sleb128(sorted.len() as i64, &mut out);
    sleb128(0, &mut out);

    let mut offset = 0u64;
    let mut addend = 0i64;
    if !relative.is_empty() {
        sleb128(relative.len() as i64, &mut out);
        sleb128((GROUPED_BY_INFO | GROUP_HAS_ADDEND) as i64, &mut out);
        sleb128(u64::from(relative_kind) as i64, &mut out);
        for entry in relative {
            sleb128(entry.offset.wrapping_sub(offset) as i64, &mut out);
            sleb128(entry.addend.wrapping_sub(addend), &mut out);
            offset = entry.offset;
            addend = entry.addend;
        }
    }
    if !other.is_empty() {
        sleb128(other.len() as i64, &mut out);
        sleb128(GROUP_HAS_ADDEND as i64, &mut out);
        for entry in other {
            sleb128(entry.offset.wrapping_sub(offset) as i64, &mut out);
            sleb128(entry.info() as i64, &mut out);
            sleb128(entry.addend.wrapping_sub(addend), &mut out);
            offset = entry.offset;
            addend = entry.addend;
        }
    }
    out
}
