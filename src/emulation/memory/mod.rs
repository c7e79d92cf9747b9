//! Memory model for AArch64 emulation.
//!
//! This module provides the guest-visible memory of a session: a sparse 64-bit
//! address space made of page-granular regions, plus the heap allocator that hands
//! out guest buffers.
//!
//! # Core Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`AddressSpace`] | Ordered, non-overlapping regions with checked and privileged access |
//! | [`MemoryRegion`] | A contiguous run of pages with per-page protection |
//! | [`MemoryProtection`] | Read/write/execute permission bits |
//! | [`Page`] | 4 KiB copy-on-write page |
//! | [`GuestHeap`] | 16-byte aligned allocator for the `malloc` family and JNI buffers |
//!
//! # Session Layout
//!
//! A freshly opened session maps the following regions (default addresses, see
//! [`MemoryConfig`](crate::emulation::MemoryConfig)):
//!
//! | Region | Kind | Protection |
//! |--------|------|------------|
//! | Loaded images | [`RegionKind::Image`] | per `PT_LOAD` segment |
//! | Host stub trampolines | [`RegionKind::Stubs`] | `r-x` |
//! | JNI tables, TLS, data stubs | [`RegionKind::HostData`] | `rw-` |
//! | Guest heap | [`RegionKind::Heap`] | `rw-` |
//! | Stack | [`RegionKind::Stack`] | `rw-` |
//!
//! # Forking
//!
//! Every layer supports `fork(&mut self)`. Forking folds local modifications into a new
//! shared backing so that both sides diverge copy-on-write, which is what lets a
//! [`SessionPool`](crate::emulation::SessionPool) replenish itself without re-running
//! library initialization.

mod addressspace;
mod heap;
mod page;
mod region;

pub use addressspace::{
    align_down, align_up, AddressSpace, DEFAULT_ADDRESS_LIMIT, DEFAULT_MMAP_BASE,
};
pub use heap::{GuestHeap, HEAP_ALIGNMENT};
pub use page::{Page, PAGE_SIZE};
pub use region::{MemoryProtection, MemoryRegion, RegionKind};
