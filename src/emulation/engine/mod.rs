//! A64 instruction emulator.
//!
//! This module provides the software CPU that executes foreign AArch64 code. It
//! implements instruction decoding, execution, call/return bookkeeping and trap
//! dispatch for controlled execution of guest code.
//!
//! # Architecture
//!
//! The engine module is organized into several sub-modules:
//!
//! - `cpu` - Register file and condition flags
//! - `instruction` - Decoded instruction representation
//! - `decoder` - Instruction word to [`Instruction`] decoding
//! - `interpreter` - Executes one instruction, grouped by instruction class
//! - `controller` - Fetch/decode/execute loop with call stack and limits
//! - `trap` - Host trap interface (`SVC`)
//! - `error` - Faults raised by guest code and emulator errors
//! - `stats` - Execution statistics and limit tracking
//! - `result` - Step and run result types
//!
//! # Key Components
//!
//! ## Execution Control
//!
//! - [`EmulationController`] - Runs guest code until it returns
//! - [`crate::emulation::process::EmulationLimits`] - Configurable limits for safe execution
//! - [`StepResult`] / [`RunOutcome`] - Results of a step and of a run
//!
//! ## Interpreter
//!
//! - [`Interpreter`] - Core instruction execution
//! - [`Cpu`] - Register file
//!
//! ## Error Handling
//!
//! - [`Fault`] - Guest faults that terminate a run
//! - [`EmulationError`] - Emulator bookkeeping errors
//!
//! # Usage Example
//!
//! ```rust,ignore
//! use droidemu::emulation::{Cpu, EmulationController, EmulationLimits, NoTraps, RunOutcome};
//!
//! let mut controller = EmulationController::new(EmulationLimits::default(), Default::default());
//! let mut cpu = Cpu::new();
//! cpu.sp = stack_top;
//! match controller.run(&mut cpu, &mut memory, &mut NoTraps, entry) {
//!     RunOutcome::Returned(value) => println!("x0 = {value:#x}"),
//!     RunOutcome::Faulted(fault) => println!("fault: {fault}"),
//!     RunOutcome::LimitReached(limit) => println!("{limit}"),
//! }
//! ```

mod controller;
mod cpu;
mod decoder;
mod error;
mod instruction;
mod interpreter;
mod result;
mod stats;
mod trap;

pub use controller::EmulationController;
pub use cpu::{sysreg, Cpu, Nzcv};
pub use decoder::{decode, decode_bit_masks, expand_fp_imm};
pub use error::{AccessKind, EmulationError, Fault, FaultKind, MemoryFault};
pub use instruction::{
    AddrMode, AtomicOp, Binary, BitfieldOp, BranchRegKind, CompareOperand, CondSelectOp,
    ExtendType, FpBinaryOp, FpFusedOp, FpRounding, FpSize, FpUnaryOp, Instruction, LogicalOp,
    MoveWideOp, MulOp, RegBank, ShiftType, SimdPostIndex, Unary, VectorArithOp, VectorImmOp,
    VectorLogicOp, VectorShiftOp, VectorUnaryOp,
};
pub use interpreter::Interpreter;
pub use result::{RunOutcome, StepResult};
pub use stats::{ExecutionStats, LimitExceeded};
pub use trap::{NoTraps, ReturnValue, TrapAction, TrapHandler};
