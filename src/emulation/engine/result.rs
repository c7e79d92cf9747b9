//! Step and emulation result types.
//!
//! This module defines the result types returned by the interpreter
//! after executing instructions and by the controller after a full run.

use std::fmt;

use crate::emulation::engine::{error::Fault, stats::LimitExceeded};

/// Result of executing a single instruction.
///
/// The interpreter never moves the program counter itself; it reports what the
/// instruction asked for and the [`EmulationController`](super::EmulationController)
/// applies it, maintaining the call stack on the way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepResult {
    /// Continue execution at the next sequential instruction (`pc + 4`).
    Continue,

    /// Branch to an absolute address without linking.
    Branch {
        /// Target address.
        target: u64,
    },

    /// Branch with link (`BL`, `BLR`). The interpreter has already written `x30`.
    Call {
        /// Target address.
        target: u64,
        /// Address the callee returns to.
        return_address: u64,
    },

    /// Return (`RET`).
    Return {
        /// Address being returned to.
        target: u64,
    },

    /// `SVC #imm`: a host trap.
    ///
    /// Number 0 is a Linux system call (number in `x8`); any other number selects a
    /// host stub.
    Trap {
        /// The `SVC` immediate.
        number: u16,
    },
}

/// Final outcome of running guest code until it returns.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    /// The entry function returned; carries `x0`.
    Returned(u64),

    /// Execution stopped on a fault.
    Faulted(Fault),

    /// An execution budget ran out or the run was cancelled.
    LimitReached(LimitExceeded),
}

impl RunOutcome {
    /// Returns `true` if the entry function returned normally.
    #[must_use]
    pub fn is_returned(&self) -> bool {
        matches!(self, RunOutcome::Returned(_))
    }

    /// Returns the value of `x0` at return, if the run completed.
    #[must_use]
    pub fn return_value(&self) -> Option<u64> {
        match self {
            RunOutcome::Returned(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Returned(value) => write!(f, "returned {value:#x}"),
            RunOutcome::Faulted(fault) => write!(f, "faulted: {fault}"),
            RunOutcome::LimitReached(limit) => write!(f, "stopped: {limit}"),
        }
    }
}
