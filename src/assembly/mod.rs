//! AArch64 assembly support.
//!
//! This module provides a small A64 assembler used to produce guest code without an
//! external toolchain. Together with [`crate::image`] it builds complete synthetic
//! shared objects for tests, benchmarks and experiments.
//!
//! # Key Components
//!
//! - [`Assembler`] - Fluent instruction emission with named labels
//! - [`x`], [`w`], [`s`], [`d`], [`q`] - Register operand constructors
//! - [`Cond`] - Condition codes
//!
//! # Examples
//!
//! ```rust,no_run
//! use droidemu::assembly::{x, Assembler};
//!
//! // Return the sum of the first two arguments
//! let mut asm = Assembler::new(0);
//! asm.add(x(0), x(0), x(1))?.ret()?;
//! let code = asm.assemble()?;
//! # Ok::<(), droidemu::Error>(())
//! ```

mod encoder;

pub use encoder::{
    b, d, h, q, s, w, x, Assembler, Cond, FixupKind, LabelFixup, Reg, VReg, FP, LR, SP, WZR, XZR,
};
