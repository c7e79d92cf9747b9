//! # droidemu Prelude
//!
//! This module provides a convenient prelude for the most commonly used types
//! from the droidemu library. Import this module to get quick access to the
//! essential types for loading a library and calling into it.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all droidemu operations
pub use crate::Error;

/// The result type used throughout droidemu
pub use crate::Result;

// ================================================================================================
// Sessions
// ================================================================================================

/// Session lifecycle, construction and pooling
pub use crate::emulation::{
    Argument, EmulationConfig, EmulationLimits, MemoryConfig, PooledSession, Session,
    SessionBuilder, SessionPool, SessionState, SessionSummary, TracingConfig,
};

/// Faults and limits reported by failed invocations
pub use crate::emulation::{Fault, FaultKind, LimitExceeded, MemoryFault};

// ================================================================================================
// JNI Bridge
// ================================================================================================

/// Dispatch of Java callbacks and the values they exchange
pub use crate::emulation::runtime::{
    CallContext, CallKind, ClockSource, DispatchMiss, DispatchTable, DispatchTableBuilder,
    Handle, JavaValue, MissPolicy, ObjectTable,
};

// ================================================================================================
// Android
// ================================================================================================

/// Application identity and request signing
pub use crate::android::{dispatch_table, AppProfile, TokenGenerator};

// ================================================================================================
// Synthetic Images
// ================================================================================================

/// A64 assembler and ELF writer
pub use crate::assembly::Assembler;
pub use crate::image::{ElfBuilder, ImageLayout};
