//! The bionic libc subset exposed to guest code.
//!
//! Each submodule registers its host functions on a [`StubTableBuilder`]; the
//! linker binds imports of the same name to the resulting trampolines. The set
//! is the one Android app libraries actually import from `libc.so`, `libdl.so`,
//! `liblog.so` and `libc++`:
//!
//! | Module | Functions |
//! |--------|-----------|
//! | `memory` | `malloc` family, `operator new`/`delete`, `mem*`, `mmap` |
//! | `string` | `str*`, `strto*`, `ctype` |
//! | `format` | `sprintf` family |
//! | `liblog` | `__android_log_*`, stdio writes |
//! | `thread` | `pthread_*`, `__cxa_*`, `abort`, `exit`, `errno` |
//! | `sys` | time, identity, `sysconf`, random numbers, properties |
//! | `dl` | `dlopen`, `dlsym` and friends |
//!
//! Functions that abort the process (`abort`, `__stack_chk_fail`, the fortify
//! checks) end the run with [`Fault::Exit`](crate::emulation::Fault::Exit) and
//! status [`ABORT_STATUS`].

mod dl;
mod format;
pub(crate) mod liblog;
pub(crate) mod memory;
mod string;
pub(crate) mod sys;
mod thread;

use crate::emulation::runtime::stubs::{DataContents, StubTableBuilder};

pub(crate) const EAGAIN: i32 = 11;
pub(crate) const ENOMEM: i32 = 12;
pub(crate) const EINVAL: i32 = 22;
pub(crate) const ENOSYS: i32 = 38;

/// Exit status of an aborted process (`128 + SIGABRT`).
pub const ABORT_STATUS: i64 = 134;

/// The constant pid and tid of the emulated process.
pub(crate) const PROCESS_ID: u64 = 10_086;

/// The uid of an installed app.
pub(crate) const APP_UID: u64 = 10_234;

/// Size of one bionic `FILE`.
const FILE_SIZE: usize = 0x98;

/// Registers every libc host function and data symbol on `builder`.
pub(crate) fn register(builder: StubTableBuilder) -> StubTableBuilder {
    let builder = memory::register(builder);
    let builder = string::register(builder);
    let builder = format::register(builder);
    let builder = liblog::register(builder);
    let builder = thread::register(builder);
    let builder = sys::register(builder);
    let builder = dl::register(builder);
    builder
        .data("__stack_chk_guard", DataContents::StackGuard)
        .data("__sF", DataContents::Zeroed(FILE_SIZE * 3))
        .data("environ", DataContents::EmptyList)
        .data("__progname", DataContents::String("app_process64"))
}
