//! Host trap interface.
//!
//! Guest code reaches host functionality through `SVC` instructions: host stubs are
//! `SVC #(n+1); RET` trampolines and Linux system calls are `SVC #0`. The controller
//! hands every trap to a [`TrapHandler`], which inspects and mutates the register
//! file and memory and answers with a [`TrapAction`].

use crate::emulation::{
    engine::{cpu::Cpu, error::Fault},
    memory::AddressSpace,
};

/// Value a host function hands back to the guest.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReturnValue {
    /// No return value; registers are left as the handler wrote them.
    Void,
    /// Integer or pointer result, written to `x0`.
    Int(u64),
    /// Single-precision result, written to `s0`.
    Float(f32),
    /// Double-precision result, written to `d0`.
    Double(f64),
}

impl ReturnValue {
    /// Writes the value into the AAPCS64 return register.
    pub fn apply(self, cpu: &mut Cpu) {
        match self {
            ReturnValue::Void => {}
            ReturnValue::Int(value) => cpu.set_x(0, value),
            ReturnValue::Float(value) => cpu.set_s(0, value),
            ReturnValue::Double(value) => cpu.set_d(0, value),
        }
    }
}

impl From<u64> for ReturnValue {
    fn from(value: u64) -> Self {
        ReturnValue::Int(value)
    }
}

/// What the controller does after a trap has been serviced.
#[derive(Clone, Debug, PartialEq)]
pub enum TrapAction {
    /// Write the return value and continue after the `SVC`.
    Return(ReturnValue),
    /// Continue at `target` without touching the call stack (a tail call).
    Jump(u64),
    /// Stop the run with the given fault.
    Exit(Fault),
}

impl From<ReturnValue> for TrapAction {
    fn from(value: ReturnValue) -> Self {
        TrapAction::Return(value)
    }
}

impl From<u64> for TrapAction {
    fn from(value: u64) -> Self {
        TrapAction::Return(ReturnValue::Int(value))
    }
}

/// Services `SVC` traps raised by guest code.
pub trait TrapHandler {
    /// Handles `SVC #number`.
    ///
    /// # Arguments
    ///
    /// * `number` - The `SVC` immediate; 0 is a system call, `n > 0` is host stub `n - 1`
    /// * `cpu` - The live register file, with `pc` at the `SVC`
    /// * `memory` - The guest address space
    fn handle_trap(&mut self, number: u16, cpu: &mut Cpu, memory: &mut AddressSpace)
        -> TrapAction;
}

/// A trap handler that rejects every trap.
///
/// Useful for running self-contained code such as benchmarks.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTraps;

impl TrapHandler for NoTraps {
    fn handle_trap(&mut self, number: u16, cpu: &mut Cpu, _memory: &mut AddressSpace) -> TrapAction {
        TrapAction::Exit(Fault::UnknownTrap {
            address: cpu.pc,
            number,
        })
    }
}
