//! The JNI bridge: `JNIEnv` and `JavaVM` function tables backed by host code.
//!
//! Native code sees the usual double indirection: `JNIEnv*` points at a word
//! holding the address of a 234-slot function table, `JavaVM*` at a word holding
//! the 8-slot invoke table. Every non-reserved slot points at a trampoline, so a
//! call like `(*env)->FindClass(env, name)` traps into [`env`] with the guest's
//! registers intact.
//!
//! Java semantics come from the session's
//! [`DispatchTable`](crate::emulation::runtime::DispatchTable): field reads,
//! method calls and constructors are keyed by their exact JNI signature and
//! answered by host closures operating on synthetic objects.

pub(crate) mod env;
mod functions;
pub(crate) mod vm;

pub use functions::{
    ArgStyle, Family, InvokeFunction, JniFunction, ValueType, JNI_ABORT, JNI_COMMIT, JNI_ERR,
    JNI_EVERSION, JNI_LOCAL_REF_TYPE, JNI_OK, JNI_VERSION_1_6,
};
