//! ELF64 shared-object loader for emulation.
//!
//! This module provides [`ElfLoader`] which maps AArch64 shared objects into the
//! emulation address space with per-page protection and records everything the
//! linker and the session need afterwards.
//!
//! # Overview
//!
//! Loading a library is a single pass over its program headers and dynamic
//! section:
//!
//! 1. Validate the header: ELF64, little-endian, `EM_AARCH64`, `ET_DYN`
//! 2. Reserve one image region covering every `PT_LOAD` segment
//! 3. Copy each segment's file bytes; the remainder and the gaps stay zero
//! 4. Apply each segment's `R/W/X` flags to the pages it covers
//! 5. Record exports, imports, relocations, initializers, `DT_NEEDED` and `DT_SONAME`
//!
//! Nothing is resolved or relocated here; that is the linker's job.
//!
//! # Usage
//!
//! ```rust,no_run
//! use droidemu::emulation::{AddressSpace, ElfLoader};
//! use std::path::Path;
//!
//! # fn main() -> droidemu::Result<()> {
//! let mut memory = AddressSpace::new();
//! let image = ElfLoader::new().load_file(Path::new("libauth.so"), &mut memory)?;
//! println!("{} at {:#x}, {} imports", image.name, image.base, image.imports.len());
//! # Ok(())
//! # }
//! ```

use std::{collections::BTreeMap, fs, path::Path};

use goblin::elf::{
    dynamic::{DT_INIT, DT_INIT_ARRAY, DT_INIT_ARRAYSZ},
    header::{EM_AARCH64, ET_DYN},
    program_header::PT_LOAD,
    sym::{STB_GLOBAL, STB_WEAK},
    Elf, ProgramHeader,
};
use memmap2::Mmap;

use crate::{
    emulation::{
        loader::relocation::{
            decode_android_rela, decode_relr, Relocation, RelocationSource, R_AARCH64_RELATIVE,
        },
        memory::{align_up, AddressSpace, MemoryProtection, RegionKind, PAGE_SIZE},
    },
    Error, Result,
};

/// `SHN_UNDEF`
const SHN_UNDEF: usize = 0;
/// `DT_RELRSZ`
const DT_RELRSZ: u64 = 35;
/// `DT_RELR`
const DT_RELR: u64 = 36;
/// `DT_ANDROID_RELA`
const DT_ANDROID_RELA: u64 = 0x6000_0011;
/// `DT_ANDROID_RELASZ`
const DT_ANDROID_RELASZ: u64 = 0x6000_0012;
/// `DT_ANDROID_RELR`, emitted by toolchains predating `DT_RELR`.
const DT_ANDROID_RELR: u64 = 0x6FFF_E000;
/// `DT_ANDROID_RELRSZ`
const DT_ANDROID_RELRSZ: u64 = 0x6FFF_E001;

/// Lowest address tried when an image is placed automatically.
const AUTO_BASE_HINT: u64 = 0x4000_0000;

/// Default cap on the address span one image may reserve.
pub const DEFAULT_MAX_IMAGE_SIZE: usize = 256 * 1024 * 1024;

/// Configuration options for ELF image loading.
///
/// # Default Configuration
///
/// - The image is placed at the lowest free address at or above `0x4000_0000`
/// - Segment permissions are applied page by page
/// - Images spanning more than [`DEFAULT_MAX_IMAGE_SIZE`] are rejected
#[derive(Clone, Debug)]
pub struct ElfLoaderConfig {
    /// Base address for the image, or `None` for automatic placement.
    pub base_address: Option<u64>,

    /// Whether to apply segment memory protection flags.
    ///
    /// When `false` every page is mapped read/write/execute, which helps when
    /// tracing self-modifying code.
    pub apply_permissions: bool,

    /// Largest page-aligned span of `PT_LOAD` segments accepted.
    pub max_image_size: usize,
}

impl Default for ElfLoaderConfig {
    fn default() -> Self {
        Self {
            base_address: None,
            apply_permissions: true,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
        }
    }
}

impl ElfLoaderConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the image at a fixed, page-aligned base address.
    #[must_use]
    pub fn with_base_address(mut self, base: u64) -> Self {
        self.base_address = Some(base);
        self
    }

    /// Maps every page read/write/execute.
    #[must_use]
    pub fn without_permissions(mut self) -> Self {
        self.apply_permissions = false;
        self
    }

    /// Caps the address span an image may reserve.
    #[must_use]
    pub fn with_max_image_size(mut self, size: usize) -> Self {
        self.max_image_size = size;
        self
    }
}

/// Binding of a dynamic symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SymbolBinding {
    /// `STB_GLOBAL`
    Global,
    /// `STB_WEAK`
    Weak,
}

/// An undefined dynamic symbol the image expects someone else to provide.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Import {
    /// Symbol name.
    pub name: String,
    /// Global imports must resolve; weak ones may resolve to zero.
    pub binding: SymbolBinding,
}

/// A mapped `PT_LOAD` segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    /// Absolute start address.
    pub address: u64,
    /// `p_memsz`
    pub mem_size: u64,
    /// `p_filesz`
    pub file_size: u64,
    /// Protection from `p_flags`.
    pub protection: MemoryProtection,
}

impl Segment {
    /// First address past the segment.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.address + self.mem_size
    }
}

/// Metadata about a shared object mapped into an address space.
#[derive(Clone, Debug)]
pub struct LoadedImage {
    /// Name used in logs and errors, normally the file name.
    pub name: String,
    /// Address of ELF virtual address zero.
    pub base: u64,
    /// Size of the image region in bytes.
    pub size: u64,
    /// Absolute entry point, zero when the image has none.
    pub entry: u64,
    /// Mapped segments in program header order.
    pub segments: Vec<Segment>,
    /// Exported symbols with absolute addresses.
    pub exports: BTreeMap<String, u64>,
    /// Undefined symbols in dynamic symbol table order.
    pub imports: Vec<Import>,
    /// Dynamic relocations, not yet applied.
    pub relocations: Vec<Relocation>,
    /// Absolute `DT_INIT` address.
    pub init: Option<u64>,
    /// Absolute `DT_INIT_ARRAY` address and entry count.
    pub init_array: Option<(u64, usize)>,
    /// `DT_NEEDED` entries.
    pub needed: Vec<String>,
    /// `DT_SONAME`
    pub soname: Option<String>,
}

impl LoadedImage {
    /// Returns the absolute address of an exported symbol.
    #[must_use]
    pub fn symbol_address(&self, name: &str) -> Option<u64> {
        self.exports.get(name).copied()
    }

    /// Returns `true` if `address` lies inside the image region.
    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.base + self.size
    }

    /// Address of the 8-byte word at `offset`, if the whole word lies inside
    /// the image.
    #[must_use]
    pub fn word_at(&self, offset: u64) -> Option<u64> {
        word_in_span(self.base, self.size, offset)
    }

    /// Returns the import named `name`.
    #[must_use]
    pub fn import(&self, name: &str) -> Option<&Import> {
        self.imports.iter().find(|import| import.name == name)
    }

    /// Initializers in the order they must run: `DT_INIT`, then each non-empty
    /// `DT_INIT_ARRAY` entry.
    ///
    /// The array is read from memory, so call this after relocation.
    ///
    /// # Errors
    ///
    /// Fails if the array lies outside mapped memory.
    pub fn init_functions(&self, memory: &AddressSpace) -> Result<Vec<u64>> {
        let mut functions: Vec<u64> = self.init.into_iter().collect();
        if let Some((address, count)) = self.init_array {
            for index in 0..count as u64 {
                let mut word = [0u8; 8];
                memory.read_privileged(address + index * 8, &mut word)?;
                let function = u64::from_le_bytes(word);
                if function != 0 && function != u64::MAX {
                    functions.push(function);
                }
            }
        }
        Ok(functions)
    }
}

/// Loads AArch64 ELF shared objects into an [`AddressSpace`].
#[derive(Clone, Debug, Default)]
pub struct ElfLoader {
    config: ElfLoaderConfig,
}

impl ElfLoader {
    /// Creates a loader with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a loader with custom settings.
    #[must_use]
    pub fn with_config(config: ElfLoaderConfig) -> Self {
        Self { config }
    }

    /// Parses `bytes`, maps the image and records its dynamic metadata.
    ///
    /// # Errors
    ///
    /// - [`Error::Malformed`] for truncated or inconsistent headers, a wrong bit
    ///   width or byte order, a non-`ET_DYN` type or undecodable relocation tables
    /// - [`Error::UnsupportedArchitecture`] if `e_machine` is not AArch64
    /// - [`Error::GoblinErr`] if goblin rejects the structure
    /// - [`Error::Emulation`] if the image region overlaps an existing mapping
    pub fn load(
        &self,
        bytes: &[u8],
        memory: &mut AddressSpace,
        name: impl Into<String>,
    ) -> Result<LoadedImage> {
        let name = name.into();
        if bytes.len() < 64 || !bytes.starts_with(b"\x7FELF") {
            return Err(malformed_error!("{} is not an ELF image", name));
        }

        let elf = Elf::parse(bytes)?;
        if !elf.is_64 {
            return Err(malformed_error!("{} is not an ELF64 image", name));
        }
        if !elf.little_endian {
            return Err(malformed_error!("{} is not little-endian", name));
        }
        if elf.header.e_machine != EM_AARCH64 {
            return Err(Error::UnsupportedArchitecture {
                machine: elf.header.e_machine,
            });
        }
        if elf.header.e_type != ET_DYN {
            return Err(malformed_error!(
                "{} has e_type {}, expected ET_DYN",
                name,
                elf.header.e_type
            ));
        }

        let loads: Vec<&ProgramHeader> = elf
            .program_headers
            .iter()
            .filter(|header| header.p_type == PT_LOAD)
            .collect();
        if loads.is_empty() {
            return Err(malformed_error!("{} has no PT_LOAD segments", name));
        }

        let mut span = 0u64;
        for header in &loads {
            if header.p_filesz > header.p_memsz {
                return Err(malformed_error!("{} has a segment with p_filesz > p_memsz", name));
            }
            let file_end = header.p_offset.checked_add(header.p_filesz);
            if file_end.map_or(true, |end| end > bytes.len() as u64) {
                return Err(malformed_error!("{} has a segment past the end of the file", name));
            }
            let end = header
                .p_vaddr
                .checked_add(header.p_memsz)
                .ok_or_else(|| malformed_error!("{} has a segment that wraps", name))?;
            span = span.max(end);
        }
        let size = align_up(span, PAGE_SIZE as u64)
            .filter(|&size| size <= self.config.max_image_size as u64)
            .ok_or_else(|| {
                malformed_error!(
                    "{} spans {:#x} bytes, above the {:#x} byte limit",
                    name,
                    span,
                    self.config.max_image_size
                )
            })?;

        let base = match self.config.base_address {
            Some(base) => base,
            None => memory
                .find_free(size as usize, AUTO_BASE_HINT)
                .ok_or_else(|| malformed_error!("no room for {} ({:#x} bytes)", name, size))?,
        };
        memory.map_at(
            base,
            size as usize,
            MemoryProtection::empty(),
            RegionKind::Image,
            name.clone(),
        )?;

        let mapped = self
            .map_segments(bytes, &loads, base, size, memory)
            .and_then(|segments| {
                collect_relocations(&elf, bytes, base, size, memory)
                    .map(|relocations| (segments, relocations))
            });
        let (segments, relocations) = match mapped {
            Ok(mapped) => mapped,
            Err(error) => {
                if let Err(cleanup) = memory.unmap(base) {
                    log::debug!("could not unmap {name} after a failed load: {cleanup}");
                }
                return Err(error);
            }
        };
        let (exports, imports) = collect_symbols(&elf, base);

        let mut init = None;
        let mut init_array_address = None;
        let mut init_array_size = 0u64;
        if let Some(dynamic) = &elf.dynamic {
            for entry in &dynamic.dyns {
                match entry.d_tag {
                    DT_INIT if entry.d_val != 0 => init = Some(base + entry.d_val),
                    DT_INIT_ARRAY => init_array_address = Some(base + entry.d_val),
                    DT_INIT_ARRAYSZ => init_array_size = entry.d_val,
                    _ => {}
                }
            }
        }
        let init_array = init_array_address
            .map(|address| (address, (init_array_size / 8) as usize))
            .filter(|(_, count)| *count > 0);

        let entry = if elf.entry == 0 { 0 } else { base + elf.entry };
        let image = LoadedImage {
            name,
            base,
            size,
            entry,
            segments,
            exports,
            imports,
            relocations,
            init,
            init_array,
            needed: elf.libraries.iter().map(ToString::to_string).collect(),
            soname: elf.soname.map(ToString::to_string),
        };
        log::debug!(
            "loaded {} at {:#x}..{:#x}: {} segments, {} exports, {} imports, {} relocations",
            image.name,
            image.base,
            image.base + image.size,
            image.segments.len(),
            image.exports.len(),
            image.imports.len(),
            image.relocations.len()
        );
        Ok(image)
    }

    /// Memory-maps the file at `path` and loads it, naming the image after the
    /// file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] if the file cannot be opened, plus every
    /// error of [`load`](Self::load).
    pub fn load_file(&self, path: &Path, memory: &mut AddressSpace) -> Result<LoadedImage> {
        let file = fs::File::open(path)?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|error| Error::Error(error.to_string()))?;

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("unknown")
            .to_string();
        self.load(&mmap, memory, name)
    }

    fn map_segments(
        &self,
        bytes: &[u8],
        loads: &[&ProgramHeader],
        base: u64,
        size: u64,
        memory: &mut AddressSpace,
    ) -> Result<Vec<Segment>> {
        let page = PAGE_SIZE as u64;
        let mut pages = vec![MemoryProtection::empty(); (size / page) as usize];
        let mut segments = Vec::with_capacity(loads.len());

        for header in loads {
            let start = header.p_offset as usize;
            let data = &bytes[start..start + header.p_filesz as usize];
            memory.write_privileged(base + header.p_vaddr, data)?;

            let protection = MemoryProtection::from_elf(header.p_flags);
            if header.p_memsz > 0 {
                let first = header.p_vaddr / page;
                let last = (header.p_vaddr + header.p_memsz).div_ceil(page);
                for slot in &mut pages[first as usize..last as usize] {
                    *slot |= protection;
                }
            }
            segments.push(Segment {
                address: base + header.p_vaddr,
                mem_size: header.p_memsz,
                file_size: header.p_filesz,
                protection,
            });
        }

        for (index, protection) in pages.into_iter().enumerate() {
            let protection = if self.config.apply_permissions {
                protection
            } else {
                MemoryProtection::READ_WRITE_EXECUTE
            };
            memory.protect(base + index as u64 * page, PAGE_SIZE, protection)?;
        }
        Ok(segments)
    }
}

fn symbol_name<'a>(elf: &Elf<'a>, index: usize) -> Option<&'a str> {
    let symbol = elf.dynsyms.get(index)?;
    elf.dynstrtab
        .get_at(symbol.st_name)
        .filter(|name| !name.is_empty())
}

fn collect_symbols(elf: &Elf<'_>, base: u64) -> (BTreeMap<String, u64>, Vec<Import>) {
    let mut exports = BTreeMap::new();
    let mut imports = Vec::new();

    for symbol in elf.dynsyms.iter() {
        let binding = match symbol.st_bind() {
            STB_GLOBAL => SymbolBinding::Global,
            STB_WEAK => SymbolBinding::Weak,
            _ => continue,
        };
        let Some(name) = elf.dynstrtab.get_at(symbol.st_name).filter(|n| !n.is_empty()) else {
            continue;
        };

        if symbol.st_shndx == SHN_UNDEF {
            if !imports.iter().any(|import: &Import| import.name == name) {
                imports.push(Import {
                    name: name.to_string(),
                    binding,
                });
            }
        } else if symbol.st_value != 0 {
            exports.insert(name.to_string(), base + symbol.st_value);
        }
    }
    (exports, imports)
}

fn word_in_span(base: u64, size: u64, offset: u64) -> Option<u64> {
    let end = offset.checked_add(8)?;
    (end <= size).then(|| base + offset)
}

fn collect_relocations(
    elf: &Elf<'_>,
    bytes: &[u8],
    base: u64,
    size: u64,
    memory: &AddressSpace,
) -> Result<Vec<Relocation>> {
    if !elf.dynrels.is_empty() {
        return Err(malformed_error!("DT_REL relocations are not used on AArch64"));
    }

    let mut relocations = Vec::new();
    let tables = [
        (RelocationSource::Rela, &elf.dynrelas),
        (RelocationSource::Plt, &elf.pltrelocs),
    ];
    for (source, table) in tables {
        for reloc in table.iter() {
            relocations.push(Relocation {
                offset: reloc.r_offset,
                kind: reloc.r_type,
                symbol: symbol_name(elf, reloc.r_sym).map(ToString::to_string),
                addend: reloc.r_addend.unwrap_or(0),
                source,
            });
        }
    }

    let Some(dynamic) = &elf.dynamic else {
        return Ok(relocations);
    };
    let tag = |wanted: u64| {
        dynamic
            .dyns
            .iter()
            .find(|entry| entry.d_tag == wanted)
            .map(|entry| entry.d_val)
    };

    let relr = tag(DT_RELR)
        .zip(tag(DT_RELRSZ))
        .or_else(|| tag(DT_ANDROID_RELR).zip(tag(DT_ANDROID_RELRSZ)));
    if let Some((address, size)) = relr {
        let table = file_bytes(elf, bytes, address, size)?;
        let entries: Vec<u64> = table
            .chunks_exact(8)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                u64::from_le_bytes(word)
            })
            .collect();
        for offset in decode_relr(&entries) {
            let target = word_in_span(base, size, offset)
                .ok_or_else(|| malformed_error!("RELR target {:#x} lies outside the image", offset))?;
            let mut word = [0u8; 8];
            memory.read_privileged(target, &mut word)?;
            relocations.push(Relocation {
                offset,
                kind: R_AARCH64_RELATIVE,
                symbol: None,
                addend: i64::from_le_bytes(word),
                source: RelocationSource::Relr,
            });
        }
    }

    if let Some((address, size)) = tag(DT_ANDROID_RELA).zip(tag(DT_ANDROID_RELASZ)) {
        let table = file_bytes(elf, bytes, address, size)?;
        for raw in decode_android_rela(table)? {
            relocations.push(Relocation {
                offset: raw.offset,
                kind: raw.kind(),
                symbol: symbol_name(elf, raw.symbol_index()).map(ToString::to_string),
                addend: raw.addend,
                source: RelocationSource::Android,
            });
        }
    }

    Ok(relocations)
}

/// Returns the file bytes backing `[vaddr, vaddr + size)`.
fn file_bytes<'a>(elf: &Elf<'_>, bytes: &'a [u8], vaddr: u64, size: u64) -> Result<&'a [u8]> {
    let header = elf
        .program_headers
        .iter()
        .filter(|header| header.p_type == PT_LOAD)
        .find(|header| vaddr >= header.p_vaddr && vaddr + size <= header.p_vaddr + header.p_filesz)
        .ok_or_else(|| malformed_error!("table at {:#x} is not backed by the file", vaddr))?;
    let start = (header.p_offset + (vaddr - header.p_vaddr)) as usize;
    Ok(&bytes[start..start + size as usize])
}
