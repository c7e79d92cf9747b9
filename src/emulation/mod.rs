//! AArch64 emulation of Android native libraries.
//!
//! This module provides a controlled execution environment for AArch64 ELF shared
//! objects built for Android. Libraries are loaded into a sparse guest address
//! space, linked against host-implemented libc and JNI functions, and executed
//! by a software CPU. Native code never runs on the host and never reaches a real
//! JVM; every call out of the guest lands in a host function.
//!
//! # Architecture
//!
//! The emulation layer is organized into several sub-modules:
//!
//! - `memory` - Page-granular address space, protection and the guest heap
//! - `loader` - ELF parsing, segment mapping and relocation decoding
//! - `linker` - Symbol resolution and relocation application
//! - `engine` - Instruction decoder, interpreter and execution controller
//! - `runtime` - bionic libc subset, system calls and the JNI bridge
//! - `process` - Sessions, the session builder and the session pool
//!
//! # Key Components
//!
//! ## Process Model
//! - [`crate::emulation::Session`] - One emulated process hosting one library
//! - [`crate::emulation::SessionBuilder`] - Fluent API for configuring sessions
//! - [`crate::emulation::SessionPool`] - Bounded pool of copy-on-write forks
//! - [`crate::emulation::EmulationConfig`] - Configuration with presets
//!
//! ## Memory Model
//! - [`crate::emulation::AddressSpace`] - Regions with per-page protection
//! - [`crate::emulation::MemoryProtection`] - Read/write/execute bits
//!
//! ## Loading and Linking
//! - [`crate::emulation::ElfLoader`] - Maps `PT_LOAD` segments and parses dynamic tables
//! - [`crate::emulation::LoadedImage`] - Exports, imports and relocations of a mapped image
//! - [`crate::emulation::Linker`] - Resolves imports and applies relocations
//!
//! ## Execution Engine
//! - [`crate::emulation::Cpu`] - Register file and flags
//! - [`crate::emulation::EmulationController`] - Fetch/decode/execute loop with limits
//! - [`crate::emulation::TrapHandler`] - Host side of `SVC` traps
//!
//! ## Runtime
//! - [`crate::emulation::runtime::RuntimeState`] - Host functions and JNI state
//! - [`crate::emulation::runtime::DispatchTable`] - Java callback handlers
//!
//! # Usage Examples
//!
//! ## Calling an Export
//!
//! ```rust,no_run
//! use droidemu::emulation::{Argument, EmulationConfig, SessionBuilder};
//!
//! # fn main() -> droidemu::Result<()> {
//! let mut session = SessionBuilder::new()
//!     .library_file("libnative.so")
//!     .config(EmulationConfig::testing())
//!     .build()?;
//!
//! let value = session.invoke("checksum", &[Argument::from("payload"), Argument::Int(7)])?;
//! println!("checksum = {value:#x}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Calling a JNI Native
//!
//! ```rust,no_run
//! use droidemu::emulation::{runtime::DispatchTable, SessionBuilder};
//!
//! # fn main() -> droidemu::Result<()> {
//! let dispatch = DispatchTable::builder()
//!     .method(
//!         "android/content/Context->getPackageName()Ljava/lang/String;",
//!         |ctx| Ok(ctx.new_string("com.example.app")),
//!     )
//!     .build();
//!
//! let mut session = SessionBuilder::new()
//!     .library_file("libnative.so")
//!     .dispatch(dispatch)
//!     .build()?;
//!
//! let result = session.call_static_native("com/example/Native", "hello", "()Ljava/lang/String;", &[])?;
//! println!("{result:?}");
//! # Ok(())
//! # }
//! ```
//!
//! # Execution Limits
//!
//! The controller enforces several limits to stop runaway guest code:
//!
//! - **Instruction limit**: Maximum instructions per call
//! - **Call depth limit**: Maximum nesting of `BL`/`BLR`
//! - **Timeout**: Wall-clock time per call
//! - **Cancellation**: An external flag checked before every instruction
//!
//! A call that faults or hits a limit poisons its session.
//!
//! # Thread Safety
//!
//! A [`Session`] is `Send` but not `Sync`: it is driven by one caller at a time.
//! Concurrency comes from [`SessionPool`], which hands out independent forks.

pub mod engine;
pub mod linker;
pub mod loader;
pub mod memory;
pub mod process;
pub mod runtime;

// Re-export primary types from memory module
pub use memory::{AddressSpace, GuestHeap, MemoryProtection, MemoryRegion, RegionKind, PAGE_SIZE};

// Re-export primary types from loader module
pub use loader::{
    ElfLoader, ElfLoaderConfig, Import, LoadedImage, Segment, SymbolBinding, DEFAULT_MAX_IMAGE_SIZE,
};

// Re-export primary types from linker module
pub use linker::{HostSymbols, Linker, Resolution, ResolutionTable};

// Re-export primary types from engine module
pub use engine::{
    Cpu, EmulationController, EmulationError, ExecutionStats, Fault, FaultKind, Instruction,
    Interpreter, LimitExceeded, MemoryFault, NoTraps, Nzcv, ReturnValue, RunOutcome, StepResult,
    TrapAction, TrapHandler,
};

// Re-export primary types from process module
pub use process::{
    Argument, EmulationConfig, EmulationLimits, MemoryConfig, PooledSession, Session,
    SessionBuilder, SessionPool, SessionState, SessionSummary, TracingConfig,
};

// Re-export primary types from runtime module
pub use runtime::{ClockSource, DispatchTable, JavaValue, MissPolicy, RuntimeState, StubTable};
