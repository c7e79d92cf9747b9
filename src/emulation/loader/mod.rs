//! Image loading for emulation.
//!
//! This module maps AArch64 ELF shared objects into the emulation address space.
//! It is the bridge between the on-disk file format and the in-memory
//! representation the linker and the interpreter work on.
//!
//! # Overview
//!
//! - **[`ElfLoader`]** - Parses an ELF64 `ET_DYN` image with `goblin`, maps its
//!   `PT_LOAD` segments with per-page protection and records its dynamic metadata
//! - **[`LoadedImage`]** - What the loader learned: base, segments, exports,
//!   imports, relocations, initializers, `DT_NEEDED` and `DT_SONAME`
//! - **[`Relocation`]** - One dynamic relocation, decoded from RELA, RELR or
//!   Android's packed APS2 format
//!
//! # Architecture
//!
//! ```text
//! +---------------+     +----------------+     +------------------+
//! | .so bytes     | --> | ElfLoader      | --> | AddressSpace     |
//! +---------------+     +-------+--------+     +------------------+
//!                               |
//!                               v
//!                       +----------------+     +------------------+
//!                       | LoadedImage    | --> | Linker           |
//!                       +----------------+     +------------------+
//! ```
//!
//! The loader never resolves symbols or writes relocated values; after
//! [`ElfLoader::load`] the image's data still holds link-time contents.
//!
//! # Example
//!
//! ```rust,no_run
//! use droidemu::emulation::{AddressSpace, ElfLoader, ElfLoaderConfig};
//!
//! # fn main() -> droidemu::Result<()> {
//! let bytes = std::fs::read("libauth.so")?;
//! let mut memory = AddressSpace::new();
//! let loader = ElfLoader::with_config(ElfLoaderConfig::new().with_base_address(0x4000_0000));
//! let image = loader.load(&bytes, &mut memory, "libauth.so")?;
//! for segment in &image.segments {
//!     println!("{:#x}..{:#x} {}", segment.address, segment.end(), segment.protection);
//! }
//! # Ok(())
//! # }
//! ```

mod elf;
mod relocation;

pub use elf::{
    ElfLoader, ElfLoaderConfig, Import, LoadedImage, Segment, SymbolBinding, DEFAULT_MAX_IMAGE_SIZE,
};
pub use relocation::{
    decode_android_rela, decode_relr, RawRela, Relocation, RelocationSource, R_AARCH64_ABS64,
    R_AARCH64_GLOB_DAT, R_AARCH64_JUMP_SLOT, R_AARCH64_NONE, R_AARCH64_RELATIVE,
};
