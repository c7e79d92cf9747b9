//! Crate-private test support: a bare machine for running hand-assembled code
//! and factories for synthetic shared objects.

mod images;
mod runtime;

pub use images::*;
pub use machine::*;
pub use runtime::*;
