//! Core A64 instruction interpreter.
//!
//! The [`Interpreter`] executes one decoded [`Instruction`] at a time against a
//! [`Cpu`] and an [`AddressSpace`]. It reports control flow as a [`StepResult`]
//! and leaves the program counter to the controller.
//!
//! Handlers are split by instruction group:
//!
//! - `integer`: data processing (immediate and register forms)
//! - `memory`: loads, stores, exclusives and atomics
//! - `simd`: scalar floating point and Advanced SIMD

mod integer;
mod memory;
mod simd;

#[cfg(test)]
mod tests;

use crate::emulation::{
    engine::{
        cpu::{sysreg, Cpu, Nzcv},
        error::Fault,
        instruction::{BranchRegKind, Instruction},
        result::StepResult,
        stats::ExecutionStats,
    },
    memory::AddressSpace,
};

/// Value reported by `MIDR_EL1` (Cortex-A53 r0p4).
const MIDR_VALUE: u64 = 0x410F_D034;

/// Value reported by `CTR_EL0` (64-byte lines, VIPT instruction cache).
const CTR_VALUE: u64 = 0x8444_C004;

/// `DCZID_EL0.DZP`: `DC ZVA` is prohibited.
const DCZID_VALUE: u64 = 0x10;

/// Frequency reported by `CNTFRQ_EL0`.
const COUNTER_FREQUENCY: u64 = 19_200_000;

/// Core A64 instruction interpreter.
///
/// The interpreter is stateless apart from its statistics. The virtual counter
/// (`CNTVCT_EL0`) reads the number of retired instructions, which keeps runs
/// reproducible.
///
/// # Example
///
/// ```rust,ignore
/// use droidemu::emulation::{engine::decode, AddressSpace, Cpu, Interpreter, StepResult};
///
/// let mut interpreter = Interpreter::new();
/// let word = memory.fetch(cpu.pc)?;
/// let instruction = decode(word).unwrap();
/// match interpreter.step(&mut cpu, &mut memory, &instruction)? {
///     StepResult::Continue => cpu.pc += 4,
///     StepResult::Branch { target } => cpu.pc = target,
///     _ => {}
/// }
/// ```
#[derive(Debug, Default)]
pub struct Interpreter {
    /// Execution statistics.
    stats: ExecutionStats,
}

impl Interpreter {
    /// Creates a new interpreter.
    #[must_use]
    pub fn new() -> Self {
        Interpreter {
            stats: ExecutionStats::new(),
        }
    }

    /// Returns a reference to the execution statistics.
    #[must_use]
    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    /// Returns a mutable reference to the execution statistics.
    #[must_use]
    pub fn stats_mut(&mut self) -> &mut ExecutionStats {
        &mut self.stats
    }

    /// Executes a single instruction.
    ///
    /// # Arguments
    ///
    /// * `cpu` - Register file; `cpu.pc` must be the address of `instruction`
    /// * `memory` - The guest address space
    /// * `instruction` - The decoded instruction
    ///
    /// # Errors
    ///
    /// Returns a [`Fault`] for memory faults and `BRK`.
    pub fn step(
        &mut self,
        cpu: &mut Cpu,
        memory: &mut AddressSpace,
        instruction: &Instruction,
    ) -> Result<StepResult, Fault> {
        self.stats.record_instruction();

        match *instruction {
            // ================================================================
            // Branches, exception generation and system
            // ================================================================
            Instruction::Branch { offset, link } => {
                let target = cpu.pc.wrapping_add_signed(offset);
                if link {
                    let return_address = cpu.pc.wrapping_add(4);
                    cpu.set_lr(return_address);
                    Ok(StepResult::Call {
                        target,
                        return_address,
                    })
                } else {
                    Ok(StepResult::Branch { target })
                }
            }
            Instruction::BranchCond { cond, offset } => {
                Ok(Self::branch_if(cpu, cpu.nzcv.holds(cond), offset))
            }
            Instruction::CompareBranch {
                sf,
                nonzero,
                rt,
                offset,
            } => {
                let taken = (cpu.reg(rt, sf) != 0) == nonzero;
                Ok(Self::branch_if(cpu, taken, offset))
            }
            Instruction::TestBranch {
                nonzero,
                rt,
                bit,
                offset,
            } => {
                let taken = ((cpu.x(rt) >> bit) & 1 == 1) == nonzero;
                Ok(Self::branch_if(cpu, taken, offset))
            }
            Instruction::BranchReg { kind, rn } => {
                let target = cpu.x(rn);
                match kind {
                    BranchRegKind::Br => Ok(StepResult::Branch { target }),
                    BranchRegKind::Blr => {
                        let return_address = cpu.pc.wrapping_add(4);
                        cpu.set_lr(return_address);
                        Ok(StepResult::Call {
                            target,
                            return_address,
                        })
                    }
                    BranchRegKind::Ret => Ok(StepResult::Return { target }),
                }
            }
            Instruction::Svc { imm } => Ok(StepResult::Trap { number: imm }),
            Instruction::Brk { imm } => Err(Fault::Breakpoint {
                address: cpu.pc,
                imm,
            }),
            Instruction::Nop => Ok(StepResult::Continue),
            Instruction::Mrs { rt, sysreg } => {
                let value = self.read_sysreg(cpu, sysreg);
                cpu.set_x(rt, value);
                Ok(StepResult::Continue)
            }
            Instruction::Msr { rt, sysreg } => {
                Self::write_sysreg(cpu, sysreg, cpu.x(rt));
                Ok(StepResult::Continue)
            }

            // ================================================================
            // Loads and stores
            // ================================================================
            Instruction::LoadStore { .. }
            | Instruction::LoadStorePair { .. }
            | Instruction::LoadExclusive { .. }
            | Instruction::StoreExclusive { .. }
            | Instruction::CompareSwap { .. }
            | Instruction::Atomic { .. }
            | Instruction::SimdLoadStoreMultiple { .. } => {
                Self::execute_memory(cpu, memory, instruction)?;
                Ok(StepResult::Continue)
            }

            // ================================================================
            // Scalar floating point and Advanced SIMD
            // ================================================================
            Instruction::FpUnary { .. }
            | Instruction::FpBinary { .. }
            | Instruction::FpFused { .. }
            | Instruction::FpCompare { .. }
            | Instruction::FpCondCompare { .. }
            | Instruction::FpCondSelect { .. }
            | Instruction::FpConvert { .. }
            | Instruction::FpImm { .. }
            | Instruction::FpMoveGeneral { .. }
            | Instruction::IntToFp { .. }
            | Instruction::FpToInt { .. }
            | Instruction::VectorImm { .. }
            | Instruction::DupGeneral { .. }
            | Instruction::DupElement { .. }
            | Instruction::InsGeneral { .. }
            | Instruction::InsElement { .. }
            | Instruction::MoveElement { .. }
            | Instruction::VectorLogic { .. }
            | Instruction::VectorArith { .. }
            | Instruction::VectorShift { .. }
            | Instruction::VectorUnary { .. }
            | Instruction::VectorExtract { .. } => {
                Self::execute_simd(cpu, instruction);
                Ok(StepResult::Continue)
            }

            // ================================================================
            // Integer data processing
            // ================================================================
            _ => {
                Self::execute_integer(cpu, instruction);
                Ok(StepResult::Continue)
            }
        }
    }

    fn branch_if(cpu: &Cpu, taken: bool, offset: i64) -> StepResult {
        if taken {
            StepResult::Branch {
                target: cpu.pc.wrapping_add_signed(offset),
            }
        } else {
            StepResult::Continue
        }
    }

    fn read_sysreg(&self, cpu: &Cpu, register: u16) -> u64 {
        match register {
            sysreg::TPIDR_EL0 => cpu.tpidr_el0,
            sysreg::NZCV => u64::from(cpu.nzcv.bits()) << 28,
            sysreg::FPCR => cpu.fpcr,
            sysreg::FPSR => cpu.fpsr,
            sysreg::CNTVCT_EL0 | sysreg::CNTPCT_EL0 => self.stats.instructions_executed,
            sysreg::CNTFRQ_EL0 => COUNTER_FREQUENCY,
            sysreg::MIDR_EL1 => MIDR_VALUE,
            sysreg::DCZID_EL0 => DCZID_VALUE,
            sysreg::CTR_EL0 => CTR_VALUE,
            other => {
                log::debug!("mrs of unmodelled system register {other:#06x} reads as zero");
                0
            }
        }
    }

    fn write_sysreg(cpu: &mut Cpu, register: u16, value: u64) {
        match register {
            sysreg::TPIDR_EL0 => cpu.tpidr_el0 = value,
            sysreg::NZCV => cpu.nzcv = Nzcv::from_bits(((value >> 28) & 0xF) as u8),
            sysreg::FPCR => cpu.fpcr = value,
            sysreg::FPSR => cpu.fpsr = value,
            other => log::debug!("msr to unmodelled system register {other:#06x} ignored"),
        }
    }
}
