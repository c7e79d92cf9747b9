//! Dynamic linking of loaded images.
//!
//! The [`Linker`] binds every import of every [`LoadedImage`] and then applies
//! the images' dynamic relocations. It runs once per session, before any guest
//! code executes; the resulting [`ResolutionTable`] is immutable afterwards and
//! also answers `dlsym` at run time.
//!
//! # Resolution Order
//!
//! 1. Exports of the other loaded images, in load order
//! 2. The importing image's own exports
//! 3. Host functions (libc, libdl, liblog, pthreads, the C++ ABI)
//! 4. Host data stubs (`__stack_chk_guard`, `__sF`, `environ`, ...)
//! 5. Weak imports bind to zero
//!
//! Anything else is [`Error::UnresolvedSymbol`], which aborts session creation.
//!
//! # Relocations
//!
//! | Type | Value written |
//! |------|---------------|
//! | `R_AARCH64_RELATIVE` | `B + A` |
//! | `R_AARCH64_ABS64`, `GLOB_DAT`, `JUMP_SLOT` | `S + A` |
//! | `R_AARCH64_NONE` | nothing |
//!
//! Relocations are written with privileged stores, so read-only and execute-only
//! pages are patched as well. Any other type is [`Error::Malformed`].

mod resolution;

pub use resolution::{HostSymbols, Resolution, ResolutionTable};

use crate::{
    emulation::{
        loader::{
            LoadedImage, SymbolBinding, R_AARCH64_ABS64, R_AARCH64_GLOB_DAT, R_AARCH64_JUMP_SLOT,
            R_AARCH64_NONE, R_AARCH64_RELATIVE,
        },
        memory::AddressSpace,
    },
    Error, Result,
};

/// Resolves imports and applies relocations.
#[derive(Clone, Copy, Debug)]
pub struct Linker {
    weak_to_zero: bool,
}

impl Default for Linker {
    fn default() -> Self {
        Self { weak_to_zero: true }
    }
}

impl Linker {
    /// Creates a linker that binds unresolved weak imports to zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a linker that rejects unresolved weak imports like global ones.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            weak_to_zero: false,
        }
    }

    /// Links `images` (in load order) against each other and `host`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnresolvedSymbol`] if an import has no provider
    /// - [`Error::Malformed`] for an unsupported relocation type
    /// - A memory fault if a relocation targets unmapped memory
    pub fn link(
        &self,
        images: &[&LoadedImage],
        host: &HostSymbols<'_>,
        memory: &mut AddressSpace,
    ) -> Result<ResolutionTable> {
        let mut table = ResolutionTable::new();
        for (index, image) in images.iter().enumerate() {
            for (name, &address) in &image.exports {
                table.insert(name, Resolution::Image { image: index, address });
            }
        }

        for (index, image) in images.iter().enumerate() {
            let mut from_host = 0usize;
            let mut weak = 0usize;
            for import in &image.imports {
                let resolution = self.resolve(images, index, &import.name, host);
                let resolution = match resolution {
                    Some(resolution) => resolution,
                    None if self.weak_to_zero && import.binding == SymbolBinding::Weak => {
                        weak += 1;
                        Resolution::Weak
                    }
                    None => {
                        return Err(Error::UnresolvedSymbol {
                            symbol: import.name.clone(),
                            image: image.name.clone(),
                        })
                    }
                };
                if matches!(resolution, Resolution::Stub { .. } | Resolution::Data { .. }) {
                    from_host += 1;
                }
                table.insert(&import.name, resolution);
            }

            let applied = apply_relocations(image, &table, memory)?;
            log::debug!(
                "linked {}: {} imports ({} host, {} weak), {} relocations applied",
                image.name,
                image.imports.len(),
                from_host,
                weak,
                applied
            );
        }
        Ok(table)
    }

    fn resolve(
        &self,
        images: &[&LoadedImage],
        importer: usize,
        name: &str,
        host: &HostSymbols<'_>,
    ) -> Option<Resolution> {
        let others = images
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != importer);
        let own = images.iter().enumerate().filter(|(index, _)| *index == importer);
        others
            .chain(own)
            .find_map(|(index, image)| {
                image
                    .symbol_address(name)
                    .map(|address| Resolution::Image { image: index, address })
            })
            .or_else(|| host.resolve(name))
    }
}

fn apply_relocations(
    image: &LoadedImage,
    table: &ResolutionTable,
    memory: &mut AddressSpace,
) -> Result<usize> {
    let mut applied = 0;
    for relocation in &image.relocations {
        if relocation.kind == R_AARCH64_NONE {
            continue;
        }
        let target = image.word_at(relocation.offset).ok_or_else(|| {
            malformed_error!(
                "relocation at {:#x} lies outside {} ({:#x} bytes)",
                relocation.offset,
                image.name,
                image.size
            )
        })?;
        let value = match relocation.kind {
            R_AARCH64_RELATIVE => image.base.wrapping_add_signed(relocation.addend),
            R_AARCH64_ABS64 | R_AARCH64_GLOB_DAT | R_AARCH64_JUMP_SLOT => {
                let symbol = match &relocation.symbol {
                    Some(name) => table
                        .get(name)
                        .ok_or_else(|| Error::UnresolvedSymbol {
                            symbol: name.clone(),
                            image: image.name.clone(),
                        })?
                        .address(),
                    None => 0,
                };
                symbol.wrapping_add_signed(relocation.addend)
            }
            other => {
                return Err(malformed_error!(
                    "unsupported relocation type {} at {:#x} in {}",
                    other,
                    relocation.offset,
                    image.name
                ))
            }
        };
        memory.write_privileged(target, &value.to_le_bytes())?;
        applied += 1;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        emulation::{
            loader::ElfLoader,
            runtime::{DispatchTable, RuntimeState, StubTable},
            EmulationConfig,
        },
        image::{ElfBuilder, RelativeEncoding},
        test::IMAGE_BASE,
    };

    fn runtime(memory: &mut AddressSpace) -> RuntimeState {
        RuntimeState::new(
            &EmulationConfig::testing(),
            Arc::new(StubTable::standard()),
            Arc::new(DispatchTable::empty()),
            memory,
        )
        .unwrap()
    }

    #[test]
    fn test_binds_host_functions_and_data() {
        let bytes = ElfBuilder::new()
            .import("malloc")
            .import("__stack_chk_guard")
            .data(&[0u8; 16])
            .got_entry("malloc")
            .got_entry("__stack_chk_guard")
            .build()
            .unwrap();
        let mut memory = AddressSpace::new();
        let state = runtime(&mut memory);
        let image = ElfLoader::new().load(&bytes, &mut memory, "libhost.so").unwrap();
        let table = Linker::new()
            .link(&[&image], &HostSymbols::from_runtime(&state), &mut memory)
            .unwrap();

        let index = state.stubs().index_of("malloc").unwrap();
        let malloc = StubTable::trampoline(state.layout().stub_base, index);
        assert_eq!(
            table.get("malloc"),
            Some(&Resolution::Stub { index, address: malloc })
        );
        let guard = state.layout().data["__stack_chk_guard"];
        assert_eq!(table.get("__stack_chk_guard"), Some(&Resolution::Data { address: guard }));

        let slots: Vec<u64> = image
            .relocations
            .iter()
            .map(|r| memory.read_u64(image.base + r.offset).unwrap())
            .collect();
        assert!(slots.contains(&malloc));
        assert!(slots.contains(&guard));
    }

    #[test]
    fn test_unresolved_symbol_fails() {
        let bytes = ElfBuilder::new()
            .import("definitely_not_a_host_function")
            .build()
            .unwrap();
        let mut memory = AddressSpace::new();
        let state = runtime(&mut memory);
        let image = ElfLoader::new().load(&bytes, &mut memory, "libmissing.so").unwrap();
        let error = Linker::new()
            .link(&[&image], &HostSymbols::from_runtime(&state), &mut memory)
            .unwrap_err();
        match error {
            Error::UnresolvedSymbol { symbol, image } => {
                assert_eq!(symbol, "definitely_not_a_host_function");
                assert_eq!(image, "libmissing.so");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_weak_imports() {
        let bytes = ElfBuilder::new()
            .weak_import("__register_frame_info")
            .data(&[0xFFu8; 8])
            .got_entry("__register_frame_info")
            .build()
            .unwrap();
        let mut memory = AddressSpace::new();
        let image = ElfLoader::new().load(&bytes, &mut memory, "libweak.so").unwrap();
        let table = Linker::new()
            .link(&[&image], &HostSymbols::none(), &mut memory)
            .unwrap();
        assert_eq!(table.get("__register_frame_info"), Some(&Resolution::Weak));
        let slot = image.relocations[0].offset;
        assert_eq!(memory.read_u64(image.base + slot).unwrap(), 0);

        let error = Linker::strict()
            .link(&[&image], &HostSymbols::none(), &mut memory)
            .unwrap_err();
        assert!(matches!(error, Error::UnresolvedSymbol { .. }));
    }

    #[test]
    fn test_images_take_precedence_over_host() {
        let provider = ElfBuilder::new()
            .soname("libprovider.so")
            .code("strlen", &[0xD65F_03C0])
            .build()
            .unwrap();
        let consumer = ElfBuilder::new()
            .import("strlen")
            .data(&[0u8; 8])
            .got_entry("strlen")
            .build()
            .unwrap();
        let mut memory = AddressSpace::new();
        let state = runtime(&mut memory);
        let first = ElfLoader::new().load(&provider, &mut memory, "libprovider.so").unwrap();
        let second = ElfLoader::new().load(&consumer, &mut memory, "libconsumer.so").unwrap();
        let table = Linker::new()
            .link(&[&first, &second], &HostSymbols::from_runtime(&state), &mut memory)
            .unwrap();

        let address = first.symbol_address("strlen").unwrap();
        assert_eq!(table.get("strlen"), Some(&Resolution::Image { image: 0, address }));
        let slot = second.relocations[0].offset;
        assert_eq!(memory.read_u64(second.base + slot).unwrap(), address);
    }

    fn relative_targets(encoding: RelativeEncoding) {
        let bytes = ElfBuilder::new()
            .data(&[0u8; 64])
            .relative(0, 0x40)
            .relative(8, 0x88)
            .relative(24, 0x1000)
            .relative_encoding(encoding)
            .build()
            .unwrap();
        let mut memory = AddressSpace::new();
        let image = ElfLoader::new().load(&bytes, &mut memory, "librel.so").unwrap();
        assert_eq!(image.base, IMAGE_BASE);
        Linker::new()
            .link(&[&image], &HostSymbols::none(), &mut memory)
            .unwrap();

        let data = image.segments[2].address;
        assert_eq!(memory.read_u64(data).unwrap(), IMAGE_BASE + 0x40);
        assert_eq!(memory.read_u64(data + 8).unwrap(), IMAGE_BASE + 0x88);
        assert_eq!(memory.read_u64(data + 16).unwrap(), 0);
        assert_eq!(memory.read_u64(data + 24).unwrap(), IMAGE_BASE + 0x1000);
    }

    #[test]
    fn test_relative_rela() {
        relative_targets(RelativeEncoding::Rela);
    }

    #[test]
    fn test_relative_relr() {
        relative_targets(RelativeEncoding::Relr);
    }

    #[test]
    fn test_relative_android_packed() {
        relative_targets(RelativeEncoding::Android);
    }

    #[test]
    fn test_unsupported_relocation_type() {
        let bytes = ElfBuilder::new()
            .data(&[0u8; 8])
            .raw_relocation(0, 1031, 0)
            .build()
            .unwrap();
        let mut memory = AddressSpace::new();
        let image = ElfLoader::new().load(&bytes, &mut memory, "libbad.so").unwrap();
        let error = Linker::new()
            .link(&[&image], &HostSymbols::none(), &mut memory)
            .unwrap_err();
        assert!(matches!(error, Error::Malformed { .. }));
    }

    #[test]
    fn test_rejects_targets_outside_the_image() {
        let bytes = ElfBuilder::new()
            .data(&[0u8; 8])
            .raw_relocation(0, R_AARCH64_RELATIVE, 0x10)
            .build()
            .unwrap();
        let mut memory = AddressSpace::new();
        let state = runtime(&mut memory);
        let mut image = ElfLoader::new().load(&bytes, &mut memory, "libstray.so").unwrap();
        let stub_base = state.layout().stub_base;
        let before = memory.read_u64(stub_base).unwrap();

        for offset in [stub_base.wrapping_sub(image.base), image.size - 4, u64::MAX - 3] {
            image.relocations[0].offset = offset;
            let error = Linker::new()
                .link(&[&image], &HostSymbols::from_runtime(&state), &mut memory)
                .unwrap_err();
            assert!(matches!(error, Error::Malformed { .. }), "offset {offset:#x}");
        }
        assert_eq!(memory.read_u64(stub_base).unwrap(), before);

        image.relocations[0].offset = image.size - 8;
        assert!(Linker::new()
            .link(&[&image], &HostSymbols::from_runtime(&state), &mut memory)
            .is_ok());
    }
}
