//! Synthetic AArch64 shared objects.
//!
//! This module writes small but well-formed ELF64 `ET_DYN` images without an
//! external toolchain. The loader, the linker and the JNI bridge are exercised
//! against these images in tests and benchmarks, and they are handy for
//! experimenting with guest code that calls into the emulated runtime.
//!
//! # Key Components
//!
//! - [`ElfBuilder`] - Collects functions, data, imports and relocations and
//!   serializes them
//! - [`ImageLayout`] - The addresses guest code may reference while it is
//!   generated (data, GOT and PLT slots)
//! - [`RelativeEncoding`] - Selects plain RELA, RELR or Android APS2 for
//!   relative relocations
//!
//! # Examples
//!
//! ```rust,no_run
//! use droidemu::assembly::x;
//! use droidemu::image::{ElfBuilder, RelativeEncoding};
//!
//! let bytes = ElfBuilder::new()
//!     .soname("libanswer.so")
//!     .function("answer", |asm, _| {
//!         asm.mov_imm(x(0), 42)?.ret()?;
//!         Ok(())
//!     })
//!     .data(&[0u8; 16])
//!     .relative(0, 0x1000)
//!     .relative_encoding(RelativeEncoding::Relr)
//!     .build()?;
//! # Ok::<(), droidemu::Error>(())
//! ```

mod builder;
mod tables;

pub use builder::{ElfBuilder, ImageLayout, RelativeEncoding};
