//! Session model for native library emulation.
//!
//! This module provides the high-level interface for running a library: the
//! configuration, a builder, the [`Session`] that owns every emulation component
//! and a [`SessionPool`] for concurrent callers.
//!
//! # Overview
//!
//! A [`Session`] represents one emulated process hosting one library, with its
//! own:
//!
//! - Address space (stack, heap, trampolines, host data, image segments)
//! - Runtime state (JNI tables and objects, libc state, registered natives)
//! - Register file and execution controller
//! - Lifecycle state (`Created`, `Initialized`, `Poisoned`, `Closed`)
//!
//! # Key Components
//!
//! - [`SessionBuilder`] - Fluent API for configuring and creating sessions
//! - [`Session`] - Loads, links, initializes and calls into a library
//! - [`SessionPool`] / [`PooledSession`] - Bounded pool of forked sessions
//! - [`Argument`] - Host values marshalled into guest registers and stack
//! - [`EmulationConfig`] - Configuration with presets
//! - [`EmulationLimits`] - Execution limits
//!
//! # Workflow
//!
//! 1. Create a [`SessionBuilder`]
//! 2. Give it the library and, for JNI libraries, a dispatch table
//! 3. Call [`build()`](SessionBuilder::build); initializers and `JNI_OnLoad` run
//! 4. Call exports with [`invoke()`](Session::invoke) or
//!    [`call_static_native()`](Session::call_static_native)
//! 5. Fork the session or wrap it in a [`SessionPool`] to serve more callers
//!
//! # Example
//!
//! ```rust,no_run
//! use droidemu::emulation::{runtime::JavaValue, EmulationConfig, SessionBuilder};
//!
//! # fn main() -> droidemu::Result<()> {
//! let mut session = SessionBuilder::new()
//!     .library_file("libnative.so")
//!     .config(EmulationConfig::token())
//!     .build()?;
//!
//! let result = session.call_static_native(
//!     "com/example/Native",
//!     "add",
//!     "(II)I",
//!     &[JavaValue::Int(2), JavaValue::Int(40)],
//! )?;
//! println!("{result:?}, misses: {:?}", session.dispatch_misses());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Presets
//!
//! - [`EmulationConfig::token()`] - Production settings for request signing
//! - [`EmulationConfig::testing()`] - Deterministic, tightly bounded settings
//!
//! # See Also
//!
//! - [`crate::emulation::engine`] - Low-level execution engine
//! - [`crate::emulation::runtime`] - JNI bridge and host functions

mod argument;
mod builder;
mod config;
mod pool;
mod session;

pub use argument::Argument;
pub use builder::SessionBuilder;
pub use config::{EmulationConfig, EmulationLimits, MemoryConfig, TracingConfig};
pub use pool::{PooledSession, SessionPool};
pub use session::{Session, SessionState, SessionSummary};
