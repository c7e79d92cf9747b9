//! Android runtime simulation for emulation.
//!
//! This module provides the host side of an emulated Android process: the bionic
//! libc subset, raw system calls, and a synthetic Java world reachable through
//! the JNI function tables. Native code never sees a real JVM; every Java object
//! is a handle into an [`ObjectTable`] and every call back into Java is answered
//! by a handler registered in a [`DispatchTable`].
//!
//! # Key Components
//!
//! - [`RuntimeState`] - Per-session state; the [`TrapHandler`](crate::emulation::TrapHandler)
//!   every `SVC` lands in
//! - [`StubTable`] - Host functions, data symbols and the JNI/JavaVM trampolines
//! - [`DispatchTable`] - Signature-keyed Java callback handlers
//! - [`ObjectTable`] - Handle-indexed synthetic Java objects
//! - [`ClassRegistry`] - Class references and stable `jmethodID`/`jfieldID` values
//!
//! # Architecture
//!
//! ```text
//! +---------------------+
//! | EmulationController |
//! +----------+----------+
//!            | SVC #n
//!            v
//! +----------+----------+     +-------------------+
//! |    RuntimeState     +---->|    StubTable      |
//! +----------+----------+     | (libc, JNI, VM)   |
//!            |                +-------------------+
//!            |
//!            +--------------->+-------------------+
//!            |                |  DispatchTable    |
//!            |                +-------------------+
//!            +--------------->+-------------------+
//!                             | ObjectTable +     |
//!                             | ClassRegistry     |
//!                             +-------------------+
//! ```
//!
//! ## Callback Resolution Order
//!
//! When native code calls a Java method or touches a field through JNI:
//!
//! 1. The member ID is mapped back to `(class, name, descriptor)`
//! 2. Trailing arguments are decoded per the descriptor (variadic, `va_list` or `jvalue[]`)
//! 3. The handler registered for `class->name descriptor` runs
//! 4. Without a handler, fields fall back to per-instance storage and calls follow
//!    the configured [`MissPolicy`]; each miss is recorded
//!
//! # Examples
//!
//! ```rust,no_run
//! use droidemu::emulation::runtime::DispatchTable;
//!
//! let dispatch = DispatchTable::builder()
//!     .method(
//!         "android/content/Context->getPackageName()Ljava/lang/String;",
//!         |ctx| Ok(ctx.new_string("com.example.app")),
//!     )
//!     .build();
//! assert_eq!(dispatch.len(), 1);
//! ```
//!
//! # Thread Safety
//!
//! [`StubTable`] and [`DispatchTable`] are immutable and shared through `Arc`
//! across every session of a pool. [`RuntimeState`] belongs to exactly one
//! session and is never shared.

mod args;
mod classes;
mod clock;
mod descriptor;
mod dispatch;
mod jni;
pub(crate) mod libc;
pub mod mutf8;
mod objects;
mod state;
mod stubs;
mod syscall;

pub use args::ArgReader;
pub use classes::{ClassDescriptor, ClassRegistry, Member, MemberKind};
pub use clock::ClockSource;
pub use descriptor::{MethodDescriptor, PrimitiveKind, TypeDescriptor};
pub use dispatch::{
    field_signature, method_signature, CallContext, CallKind, DispatchMiss, DispatchTable,
    DispatchTableBuilder, Handler, MissPolicy,
};
pub use jni::{InvokeFunction, JniFunction, JNI_VERSION_1_6};
pub use libc::ABORT_STATUS;
pub use objects::{
    Handle, Instance, JavaValue, ObjectTable, ObjectValue, CLASS_CLASS, OBJECT_CLASS,
    STRING_CLASS,
};
pub use state::{ExitHandler, HostContext, HostLayout, RuntimeState, TLS_STACK_GUARD_OFFSET};
pub use stubs::{
    trampoline_code, DataContents, DataStub, HostFn, Stub, StubKind, StubTable,
    StubTableBuilder, TRAMPOLINE_SIZE,
};
