//! High-level emulation controller.
//!
//! The [`EmulationController`] drives guest execution: the fetch, decode and
//! execute loop, the call stack, host traps and execution limits.
//!
//! # Architecture
//!
//! The controller sits between the low-level [`Interpreter`] and the
//! [`Session`](crate::emulation::Session). It handles:
//!
//! - **Control flow**: applies each [`StepResult`] to the program counter
//! - **Call stack**: `BL`/`BLR` push a return address, `RET` pops it
//! - **Traps**: forwards `SVC` to a [`TrapHandler`] and applies the [`TrapAction`]
//! - **Limits**: instruction budget, wall-clock timeout, call depth and cancellation
//!
//! # Execution Model
//!
//! 1. Check the cancellation flag and limits
//! 2. Fetch the word at `pc` (requires execute permission)
//! 3. Decode it and execute via the interpreter, producing a [`StepResult`]
//! 4. Handle the result (branch, call, return, trap)
//! 5. Repeat until the entry function returns, faults or a limit is reached
//!
//! A `RET` with an empty call stack ends the run with [`RunOutcome::Returned`].
//! A nested `RET` is followed like any branch, so returning to the initial link
//! register (usually null) from inside a call faults on the next fetch.
//!
//! [`Interpreter`]: crate::emulation::engine::Interpreter

use std::sync::{atomic::AtomicBool, Arc};

use crate::emulation::{
    engine::{
        cpu::Cpu,
        decoder::decode,
        error::Fault,
        interpreter::Interpreter,
        result::{RunOutcome, StepResult},
        stats::ExecutionStats,
        trap::{TrapAction, TrapHandler},
    },
    memory::AddressSpace,
    process::{EmulationLimits, TracingConfig},
};

/// Drives guest execution for one session.
///
/// # Example
///
/// ```rust,ignore
/// use droidemu::emulation::{EmulationController, EmulationLimits, NoTraps, TracingConfig};
///
/// let mut controller = EmulationController::new(EmulationLimits::default(), TracingConfig::default());
/// cpu.set_lr(0);
/// match controller.run(&mut cpu, &mut memory, &mut NoTraps, entry) {
///     RunOutcome::Returned(x0) => println!("returned {x0:#x}"),
///     other => println!("{other}"),
/// }
/// ```
#[derive(Debug)]
pub struct EmulationController {
    /// Instruction executor and statistics.
    interpreter: Interpreter,

    /// Execution limits.
    limits: EmulationLimits,

    /// Logging switches.
    tracing: TracingConfig,

    /// Cooperative cancellation flag.
    cancel: Option<Arc<AtomicBool>>,

    /// Return addresses of active guest calls.
    call_stack: Vec<u64>,
}

impl EmulationController {
    /// Creates a controller with the given limits and tracing options.
    #[must_use]
    pub fn new(limits: EmulationLimits, tracing: TracingConfig) -> Self {
        EmulationController {
            interpreter: Interpreter::new(),
            limits,
            tracing,
            cancel: None,
            call_stack: Vec::new(),
        }
    }

    /// Installs a cancellation flag checked before every instruction.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Replaces the cancellation flag.
    pub fn set_cancel_flag(&mut self, flag: Option<Arc<AtomicBool>>) {
        self.cancel = flag;
    }

    /// Returns the cancellation flag, if any.
    #[must_use]
    pub fn cancel_flag(&self) -> Option<&Arc<AtomicBool>> {
        self.cancel.as_ref()
    }

    /// Returns the configured limits.
    #[must_use]
    pub fn limits(&self) -> &EmulationLimits {
        &self.limits
    }

    /// Returns the statistics of the most recent run.
    #[must_use]
    pub fn stats(&self) -> &ExecutionStats {
        self.interpreter.stats()
    }

    /// Returns the current call depth.
    #[must_use]
    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    /// Runs guest code from `entry` until the entry function returns.
    ///
    /// The caller prepares arguments, `sp` and the link register. Statistics are
    /// reset at the start of every run.
    ///
    /// # Arguments
    ///
    /// * `cpu` - The register file
    /// * `memory` - The guest address space
    /// * `traps` - Services `SVC` instructions
    /// * `entry` - Address of the first instruction
    pub fn run(
        &mut self,
        cpu: &mut Cpu,
        memory: &mut AddressSpace,
        traps: &mut dyn TrapHandler,
        entry: u64,
    ) -> RunOutcome {
        self.call_stack.clear();
        self.interpreter.stats_mut().reset();
        self.interpreter.stats_mut().start();

        cpu.pc = entry;

        if self.tracing.trace_calls {
            log::trace!("run start at {entry:#x} (sp {:#x})", cpu.sp);
        }

        let outcome = loop {
            if let Some(limit) = self
                .interpreter
                .stats()
                .check_limits(&self.limits, self.cancel.as_deref())
            {
                break RunOutcome::LimitReached(limit);
            }

            let address = cpu.pc;
            let word = match memory.fetch(address) {
                Ok(word) => word,
                Err(fault) => break RunOutcome::Faulted(fault.into()),
            };
            let Some(instruction) = decode(word) else {
                break RunOutcome::Faulted(Fault::UndefinedInstruction { address, word });
            };

            if self.tracing.trace_instructions {
                log::trace!("{address:#012x}: {word:08x}  {instruction}");
            }

            let step = match self.interpreter.step(cpu, memory, &instruction) {
                Ok(step) => step,
                Err(fault) => break RunOutcome::Faulted(fault),
            };

            match step {
                StepResult::Continue => cpu.pc = address.wrapping_add(4),
                StepResult::Branch { target } => cpu.pc = target,
                StepResult::Call {
                    target,
                    return_address,
                } => {
                    let limit = self.limits.max_call_depth;
                    if limit != 0 && self.call_stack.len() >= limit {
                        break RunOutcome::Faulted(Fault::StackOverflow {
                            depth: self.call_stack.len() + 1,
                            limit,
                        });
                    }
                    self.call_stack.push(return_address);
                    self.interpreter
                        .stats_mut()
                        .observe_call_depth(self.call_stack.len());
                    if self.tracing.trace_calls {
                        log::trace!(
                            "call {target:#x} from {address:#x} (depth {})",
                            self.call_stack.len()
                        );
                    }
                    cpu.pc = target;
                }
                StepResult::Return { target } => {
                    if self.call_stack.is_empty() {
                        break RunOutcome::Returned(cpu.x(0));
                    }
                    // Unwind past frames skipped by longjmp-style returns
                    if let Some(position) = self.call_stack.iter().rposition(|&r| r == target) {
                        self.call_stack.truncate(position);
                    }
                    cpu.pc = target;
                }
                StepResult::Trap { number } => {
                    self.interpreter.stats_mut().record_trap();
                    match traps.handle_trap(number, cpu, memory) {
                        TrapAction::Return(value) => {
                            value.apply(cpu);
                            cpu.pc = address.wrapping_add(4);
                        }
                        TrapAction::Jump(target) => cpu.pc = target,
                        TrapAction::Exit(fault) => break RunOutcome::Faulted(fault),
                    }
                }
            }
        };

        if self.tracing.trace_calls {
            log::trace!(
                "run finished after {} instructions: {outcome}",
                self.interpreter.stats().instructions_executed
            );
        }
        outcome
    }
}
