//! Dynamic relocation records and the compressed encodings Android uses.
//!
//! Besides plain `Elf64_Rela` tables (`DT_RELA`, `DT_JMPREL`), the loader decodes
//! two compact formats found in modern Android libraries:
//!
//! - **RELR** (`DT_RELR`, or `DT_ANDROID_RELR` on older toolchains): a bitmap
//!   encoding of relative relocations whose addend is the word already stored
//!   at the target.
//! - **APS2** (`DT_ANDROID_RELA`): SLEB128-encoded groups of RELA entries with
//!   shared offset deltas, info words and addends.

use crate::Result;

/// `R_AARCH64_NONE`
pub const R_AARCH64_NONE: u32 = 0;
/// `R_AARCH64_ABS64`: `S + A`
pub const R_AARCH64_ABS64: u32 = 257;
/// `R_AARCH64_GLOB_DAT`: `S + A`
pub const R_AARCH64_GLOB_DAT: u32 = 1025;
/// `R_AARCH64_JUMP_SLOT`: `S + A`
pub const R_AARCH64_JUMP_SLOT: u32 = 1026;
/// `R_AARCH64_RELATIVE`: `B + A`
pub const R_AARCH64_RELATIVE: u32 = 1027;

const RELOCATION_GROUPED_BY_INFO_FLAG: u64 = 1;
const RELOCATION_GROUPED_BY_OFFSET_DELTA_FLAG: u64 = 2;
const RELOCATION_GROUPED_BY_ADDEND_FLAG: u64 = 4;
const RELOCATION_GROUP_HAS_ADDEND_FLAG: u64 = 8;

/// The table a relocation was read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RelocationSource {
    /// `DT_RELA`
    Rela,
    /// `DT_JMPREL`
    Plt,
    /// `DT_RELR` or `DT_ANDROID_RELR`
    Relr,
    /// `DT_ANDROID_RELA` (APS2)
    Android,
}

/// One dynamic relocation of a loaded image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relocation {
    /// Target offset relative to the image base (an ELF virtual address).
    pub offset: u64,
    /// `R_AARCH64_*` type.
    pub kind: u32,
    /// Referenced symbol, `None` for symbol index 0.
    pub symbol: Option<String>,
    /// Explicit addend. RELR entries carry the word stored at the target.
    pub addend: i64,
    /// Table the entry came from.
    pub source: RelocationSource,
}

impl Relocation {
    /// Human-readable name of the relocation type.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            R_AARCH64_NONE => "R_AARCH64_NONE",
            R_AARCH64_ABS64 => "R_AARCH64_ABS64",
            R_AARCH64_GLOB_DAT => "R_AARCH64_GLOB_DAT",
            R_AARCH64_JUMP_SLOT => "R_AARCH64_JUMP_SLOT",
            R_AARCH64_RELATIVE => "R_AARCH64_RELATIVE",
            _ => "unknown",
        }
    }
}

/// A decoded `Elf64_Rela` before symbol names are attached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawRela {
    /// `r_offset`
    pub offset: u64,
    /// `r_info`: symbol index in the high word, type in the low word.
    pub info: u64,
    /// `r_addend`
    pub addend: i64,
}

impl RawRela {
    /// The relocation type from `r_info`.
    #[must_use]
    pub fn kind(&self) -> u32 {
        (self.info & 0xFFFF_FFFF) as u32
    }

    /// The symbol index from `r_info`.
    #[must_use]
    pub fn symbol_index(&self) -> usize {
        (self.info >> 32) as usize
    }
}

/// Expands a RELR table into the offsets it relocates.
///
/// Even entries are addresses; odd entries are bitmaps covering the 63 words
/// that follow the last address.
#[must_use]
pub fn decode_relr(entries: &[u64]) -> Vec<u64> {
    let mut offsets = Vec::new();
    let mut next = 0u64;
    for &entry in entries {
        if entry & 1 == 0 {
            offsets.push(entry);
            next = entry.wrapping_add(8);
            continue;
        }
        let mut bits = entry >> 1;
        let mut offset = next;
        while bits != 0 {
            if bits & 1 != 0 {
                offsets.push(offset);
            }
            bits >>= 1;
            offset = offset.wrapping_add(8);
        }
        next = next.wrapping_add(63 * 8);
    }
    offsets
}

/// Decodes an APS2 packed relocation table, including the `APS2` magic.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if the magic is missing, the stream ends
/// early, or a group is empty.
pub fn decode_android_rela(data: &[u8]) -> Result<Vec<RawRela>> {
    let Some(stream) = data.strip_prefix(b"APS2") else {
        return Err(malformed_error!("DT_ANDROID_RELA table lacks the APS2 magic"));
    };
    let mut reader = Sleb128Reader::new(stream);

    let count = reader.next_u64()?;
    if count > stream.len() as u64 * 8 {
        return Err(malformed_error!(
            "APS2 table claims {} relocations in {} bytes",
            count,
            stream.len()
        ));
    }
    let mut relocations = Vec::with_capacity(count as usize);
    let mut current = RawRela {
        offset: reader.next_u64()?,
        info: 0,
        addend: 0,
    };

    while (relocations.len() as u64) < count {
        let group_size = reader.next_u64()?;
        if group_size == 0 {
            return Err(malformed_error!("APS2 group of size zero"));
        }
        let flags = reader.next_u64()?;
        let by_info = flags & RELOCATION_GROUPED_BY_INFO_FLAG != 0;
        let by_offset_delta = flags & RELOCATION_GROUPED_BY_OFFSET_DELTA_FLAG != 0;
        let by_addend = flags & RELOCATION_GROUPED_BY_ADDEND_FLAG != 0;
        let has_addend = flags & RELOCATION_GROUP_HAS_ADDEND_FLAG != 0;

        let offset_delta = if by_offset_delta { reader.next_u64()? } else { 0 };
        if by_info {
            current.info = reader.next_u64()?;
        }
        if has_addend && by_addend {
            current.addend = current.addend.wrapping_add(reader.next_i64()?);
        } else if !has_addend {
            current.addend = 0;
        }

        for _ in 0..group_size {
            if (relocations.len() as u64) == count {
                break;
            }
            let delta = if by_offset_delta {
                offset_delta
            } else {
                reader.next_u64()?
            };
            current.offset = current.offset.wrapping_add(delta);
            if !by_info {
                current.info = reader.next_u64()?;
            }
            if has_addend && !by_addend {
                current.addend = current.addend.wrapping_add(reader.next_i64()?);
            }
            relocations.push(current);
        }
    }
    Ok(relocations)
}

/// Signed LEB128 decoder over a byte slice.
struct Sleb128Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Sleb128Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn next_i64(&mut self) -> Result<i64> {
        let mut value: i64 = 0;
        let mut shift = 0u32;
        loop {
            let Some(&byte) = self.data.get(self.position) else {
                return Err(malformed_error!("truncated SLEB128 value in APS2 table"));
            };
            self.position += 1;
            if shift < 64 {
                value |= i64::from(byte & 0x7F) << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    value |= -1i64 << shift;
                }
                return Ok(value);
            }
        }
    }

    fn next_u64(&mut self) -> Result<u64> {
        Ok(self.next_i64()? as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleb(mut value: i64, out: &mut Vec<u8>) {
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

    #[test]
    fn test_relr_addresses_and_bitmaps() {
        // One address, then a bitmap marking words 1 and 3 after it
        let entries = [0x1000, (0b101 << 1) | 1];
        assert_eq!(decode_relr(&entries), vec![0x1000, 0x1008, 0x1018]);
    }

    #[test]
    fn test_relr_consecutive_bitmaps() {
        let entries = [0x2000, 1 | (1 << 63), 1 | 2];
        let offsets = decode_relr(&entries);
        assert_eq!(offsets, vec![0x2000, 0x2008 + 62 * 8, 0x2008 + 63 * 8]);
    }

    #[test]
    fn test_android_rela_grouped() {
        let mut data = b"APS2".to_vec();
        sleb(3, &mut data); // count
        sleb(0x4000, &mut data); // initial offset
        // One group of three RELATIVE entries, 8 bytes apart, addend deltas inline
        sleb(3, &mut data);
        sleb(
            (RELOCATION_GROUPED_BY_INFO_FLAG
                | RELOCATION_GROUPED_BY_OFFSET_DELTA_FLAG
                | RELOCATION_GROUP_HAS_ADDEND_FLAG) as i64,
            &mut data,
        );
        sleb(8, &mut data);
        sleb(i64::from(R_AARCH64_RELATIVE), &mut data);
        sleb(0x100, &mut data);
        sleb(0x10, &mut data);
        sleb(-0x20, &mut data);

        let relocations = decode_android_rela(&data).unwrap();
        let offsets: Vec<u64> = relocations.iter().map(|r| r.offset).collect();
        let addends: Vec<i64> = relocations.iter().map(|r| r.addend).collect();
        assert_eq!(offsets, vec![0x4008, 0x4010, 0x4018]);
        assert_eq!(addends, vec![0x100, 0x110, 0xF0]);
        assert!(relocations.iter().all(|r| r.kind() == R_AARCH64_RELATIVE));
        assert!(relocations.iter().all(|r| r.symbol_index() == 0));
    }

    #[test]
    fn test_android_rela_ungrouped_without_addend() {
        let mut data = b"APS2".to_vec();
        sleb(2, &mut data);
        sleb(0, &mut data);
        sleb(2, &mut data);
        sleb(0, &mut data);
        sleb(0x30, &mut data);
        sleb(((5u64 << 32) | u64::from(R_AARCH64_GLOB_DAT)) as i64, &mut data);
        sleb(0x8, &mut data);
        sleb(((6u64 << 32) | u64::from(R_AARCH64_JUMP_SLOT)) as i64, &mut data);

        let relocations = decode_android_rela(&data).unwrap();
        assert_eq!(relocations.len(), 2);
        assert_eq!(relocations[0].offset, 0x30);
        assert_eq!(relocations[0].symbol_index(), 5);
        assert_eq!(relocations[1].offset, 0x38);
        assert_eq!(relocations[1].kind(), R_AARCH64_JUMP_SLOT);
        assert_eq!(relocations[1].addend, 0);
    }

    #[test]
    fn test_android_rela_rejects_bad_input() {
        assert!(decode_android_rela(b"APS1\x01").is_err());
        assert!(decode_android_rela(b"APS2\x02\x00\x01").is_err());
        assert!(decode_android_rela(b"APS2\x01\x00\x00\x00").is_err());
    }

    #[test]
    fn test_kind_names() {
        let relocation = Relocation {
            offset: 0,
            kind: R_AARCH64_RELATIVE,
            symbol: None,
            addend: 0,
            source: RelocationSource::Rela,
        };
        assert_eq!(relocation.kind_name(), "R_AARCH64_RELATIVE");
    }
}
