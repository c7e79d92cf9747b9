//! Integer data-processing handlers.
//!
//! Covers the immediate and register data-processing groups: arithmetic with and
//! without flags, logical operations, moves, bitfield manipulation, conditional
//! select/compare, division, shifts and multiplies.

use crate::emulation::engine::{
    cpu::{Cpu, Nzcv},
    instruction::{
        Binary, BitfieldOp, CompareOperand, CondSelectOp, Instruction, LogicalOp, MoveWideOp,
        MulOp, ShiftType, Unary,
    },
    interpreter::Interpreter,
};

#[inline]
fn width_mask(sf: bool) -> u64 {
    if sf {
        u64::MAX
    } else {
        0xFFFF_FFFF
    }
}

/// `AddWithCarry` at 32 or 64 bits, returning the result and the new flags.
pub(super) fn add_with_carry(x: u64, y: u64, carry: bool, sf: bool) -> (u64, Nzcv) {
    if sf {
        let (partial, c1) = x.overflowing_add(y);
        let (result, c2) = partial.overflowing_add(u64::from(carry));
        let overflow = ((x ^ result) & (y ^ result)) >> 63 == 1;
        (
            result,
            Nzcv {
                n: result >> 63 == 1,
                z: result == 0,
                c: c1 || c2,
                v: overflow,
            },
        )
    } else {
        let (x, y) = (x as u32, y as u32);
        let (partial, c1) = x.overflowing_add(y);
        let (result, c2) = partial.overflowing_add(u32::from(carry));
        let overflow = ((x ^ result) & (y ^ result)) >> 31 == 1;
        (
            u64::from(result),
            Nzcv {
                n: result >> 31 == 1,
                z: result == 0,
                c: c1 || c2,
                v: overflow,
            },
        )
    }
}

/// Adds or subtracts, returning the masked result and flags.
fn add_sub(x: u64, y: u64, sub: bool, sf: bool) -> (u64, Nzcv) {
    if sub {
        add_with_carry(x, !y & width_mask(sf), true, sf)
    } else {
        add_with_carry(x, y, false, sf)
    }
}

pub(super) fn shift_value(value: u64, shift: ShiftType, amount: u32, sf: bool) -> u64 {
    let width = if sf { 64 } else { 32 };
    let amount = amount % width;
    let value = value & width_mask(sf);
    let result = match shift {
        ShiftType::Lsl => value << amount,
        ShiftType::Lsr => value >> amount,
        ShiftType::Asr => {
            if sf {
                ((value as i64) >> amount) as u64
            } else {
                u64::from(((value as u32 as i32) >> amount) as u32)
            }
        }
        ShiftType::Ror => {
            if sf {
                value.rotate_right(amount)
            } else {
                u64::from((value as u32).rotate_right(amount))
            }
        }
    };
    result & width_mask(sf)
}

fn logical(op: LogicalOp, x: u64, y: u64) -> u64 {
    match op {
        LogicalOp::And | LogicalOp::Ands => x & y,
        LogicalOp::Orr => x | y,
        LogicalOp::Eor => x ^ y,
    }
}

fn logical_flags(result: u64, sf: bool) -> Nzcv {
    let sign = if sf { 63 } else { 31 };
    Nzcv {
        n: (result >> sign) & 1 == 1,
        z: result == 0,
        c: false,
        v: false,
    }
}

fn rotate_right(value: u64, amount: u32, sf: bool) -> u64 {
    if sf {
        value.rotate_right(amount)
    } else {
        u64::from((value as u32).rotate_right(amount))
    }
}

/// Counts leading sign bits, excluding the sign bit itself.
fn count_leading_sign(value: u64, sf: bool) -> u64 {
    if sf {
        let v = if (value as i64) < 0 { !value } else { value };
        u64::from(v.leading_zeros()) - 1
    } else {
        let w = value as u32;
        let v = if (w as i32) < 0 { !w } else { w };
        u64::from(v.leading_zeros()) - 1
    }
}

fn unary(op: Unary, value: u64, sf: bool) -> u64 {
    match op {
        Unary::Rbit => {
            if sf {
                value.reverse_bits()
            } else {
                u64::from((value as u32).reverse_bits())
            }
        }
        Unary::Rev16 => {
            let swapped =
                ((value & 0x00FF_00FF_00FF_00FF) << 8) | ((value >> 8) & 0x00FF_00FF_00FF_00FF);
            swapped & width_mask(sf)
        }
        Unary::Rev32 => {
            let low = u64::from((value as u32).swap_bytes());
            let high = u64::from(((value >> 32) as u32).swap_bytes());
            low | (high << 32)
        }
        Unary::Rev => {
            if sf {
                value.swap_bytes()
            } else {
                u64::from((value as u32).swap_bytes())
            }
        }
        Unary::Clz => {
            if sf {
                u64::from(value.leading_zeros())
            } else {
                u64::from((value as u32).leading_zeros())
            }
        }
        Unary::Cls => count_leading_sign(value, sf),
    }
}

fn binary(op: Binary, n: u64, m: u64, sf: bool) -> u64 {
    let width = if sf { 64 } else { 32 };
    match op {
        Binary::Udiv => {
            let (n, m) = (n & width_mask(sf), m & width_mask(sf));
            if m == 0 {
                0
            } else {
                n / m
            }
        }
        Binary::Sdiv => {
            if sf {
                if m == 0 {
                    0
                } else {
                    (n as i64).wrapping_div(m as i64) as u64
                }
            } else if m as u32 == 0 {
                0
            } else {
                u64::from((n as u32 as i32).wrapping_div(m as u32 as i32) as u32)
            }
        }
        Binary::Lslv => shift_value(n, ShiftType::Lsl, (m % width) as u32, sf),
        Binary::Lsrv => shift_value(n, ShiftType::Lsr, (m % width) as u32, sf),
        Binary::Asrv => shift_value(n, ShiftType::Asr, (m % width) as u32, sf),
        Binary::Rorv => shift_value(n, ShiftType::Ror, (m % width) as u32, sf),
    }
}

fn multiply(op: MulOp, n: u64, m: u64, a: u64) -> u64 {
    match op {
        MulOp::Madd => a.wrapping_add(n.wrapping_mul(m)),
        MulOp::Msub => a.wrapping_sub(n.wrapping_mul(m)),
        MulOp::Smaddl => {
            let product = i64::from(n as u32 as i32).wrapping_mul(i64::from(m as u32 as i32));
            a.wrapping_add(product as u64)
        }
        MulOp::Smsubl => {
            let product = i64::from(n as u32 as i32).wrapping_mul(i64::from(m as u32 as i32));
            a.wrapping_sub(product as u64)
        }
        MulOp::Umaddl => a.wrapping_add(u64::from(n as u32) * u64::from(m as u32)),
        MulOp::Umsubl => a.wrapping_sub(u64::from(n as u32) * u64::from(m as u32)),
        MulOp::Smulh => ((i128::from(n as i64) * i128::from(m as i64)) >> 64) as u64,
        MulOp::Umulh => ((u128::from(n) * u128::from(m)) >> 64) as u64,
    }
}

impl Interpreter {
    /// Executes an integer data-processing instruction.
    ///
    /// Instructions from other groups are ignored.
    pub(super) fn execute_integer(cpu: &mut Cpu, instruction: &Instruction) {
        match *instruction {
            Instruction::Adr { rd, offset, page } => {
                let base = if page { cpu.pc & !0xFFF } else { cpu.pc };
                cpu.set_x(rd, base.wrapping_add_signed(offset));
            }
            Instruction::AddSubImm {
                sf,
                sub,
                set_flags,
                rd,
                rn,
                imm,
            } => {
                let (result, flags) = add_sub(cpu.reg_or_sp(rn, sf), imm, sub, sf);
                if set_flags {
                    cpu.nzcv = flags;
                    cpu.set_reg(rd, sf, result);
                } else {
                    cpu.set_reg_or_sp(rd, sf, result);
                }
            }
            Instruction::LogicalImm {
                sf,
                op,
                rd,
                rn,
                imm,
            } => {
                let result = logical(op, cpu.reg(rn, sf), imm) & width_mask(sf);
                if op == LogicalOp::Ands {
                    cpu.nzcv = logical_flags(result, sf);
                    cpu.set_reg(rd, sf, result);
                } else {
                    cpu.set_reg_or_sp(rd, sf, result);
                }
            }
            Instruction::MoveWide {
                sf,
                op,
                rd,
                imm16,
                shift,
            } => {
                let imm = u64::from(imm16) << shift;
                let result = match op {
                    MoveWideOp::Movz => imm,
                    MoveWideOp::Movn => !imm,
                    MoveWideOp::Movk => (cpu.x(rd) & !(0xFFFFu64 << shift)) | imm,
                };
                cpu.set_reg(rd, sf, result);
            }
            Instruction::Bitfield {
                sf,
                op,
                rd,
                rn,
                immr,
                imms,
                wmask,
                tmask,
            } => {
                let src = cpu.reg(rn, sf);
                let dst = if op == BitfieldOp::Insert {
                    cpu.reg(rd, sf)
                } else {
                    0
                };
                let bot = (dst & !wmask) | (rotate_right(src, u32::from(immr), sf) & wmask);
                let top = if op == BitfieldOp::Signed {
                    if (src >> imms) & 1 == 1 {
                        width_mask(sf)
                    } else {
                        0
                    }
                } else {
                    dst
                };
                cpu.set_reg(rd, sf, (top & !tmask) | (bot & tmask));
            }
            Instruction::Extract {
                sf,
                rd,
                rn,
                rm,
                lsb,
            } => {
                let (n, m) = (cpu.reg(rn, sf), cpu.reg(rm, sf));
                let lsb = u32::from(lsb);
                let result = if lsb == 0 {
                    m
                } else if sf {
                    (m >> lsb) | (n << (64 - lsb))
                } else {
                    ((m >> lsb) | (n << (32 - lsb))) & 0xFFFF_FFFF
                };
                cpu.set_reg(rd, sf, result);
            }
            Instruction::AddSubShifted {
                sf,
                sub,
                set_flags,
                rd,
                rn,
                rm,
                shift,
                amount,
            } => {
                let operand = shift_value(cpu.reg(rm, sf), shift, u32::from(amount), sf);
                let (result, flags) = add_sub(cpu.reg(rn, sf), operand, sub, sf);
                if set_flags {
                    cpu.nzcv = flags;
                }
                cpu.set_reg(rd, sf, result);
            }
            Instruction::AddSubExtended {
                sf,
                sub,
                set_flags,
                rd,
                rn,
                rm,
                extend,
                amount,
            } => {
                let operand = extend.apply(cpu.x(rm), amount) & width_mask(sf);
                let (result, flags) = add_sub(cpu.reg_or_sp(rn, sf), operand, sub, sf);
                if set_flags {
                    cpu.nzcv = flags;
                    cpu.set_reg(rd, sf, result);
                } else {
                    cpu.set_reg_or_sp(rd, sf, result);
                }
            }
            Instruction::AddSubCarry {
                sf,
                sub,
                set_flags,
                rd,
                rn,
                rm,
            } => {
                let m = cpu.reg(rm, sf);
                let operand = if sub { !m & width_mask(sf) } else { m };
                let (result, flags) = add_with_carry(cpu.reg(rn, sf), operand, cpu.nzcv.c, sf);
                if set_flags {
                    cpu.nzcv = flags;
                }
                cpu.set_reg(rd, sf, result);
            }
            Instruction::LogicalShifted {
                sf,
                op,
                invert,
                rd,
                rn,
                rm,
                shift,
                amount,
            } => {
                let mut operand = shift_value(cpu.reg(rm, sf), shift, u32::from(amount), sf);
                if invert {
                    operand = !operand & width_mask(sf);
                }
                let result = logical(op, cpu.reg(rn, sf), operand);
                if op == LogicalOp::Ands {
                    cpu.nzcv = logical_flags(result, sf);
                }
                cpu.set_reg(rd, sf, result);
            }
            Instruction::CondSelect {
                sf,
                op,
                rd,
                rn,
                rm,
                cond,
            } => {
                let result = if cpu.nzcv.holds(cond) {
                    cpu.reg(rn, sf)
                } else {
                    let m = cpu.reg(rm, sf);
                    match op {
                        CondSelectOp::Csel => m,
                        CondSelectOp::Csinc => m.wrapping_add(1),
                        CondSelectOp::Csinv => !m,
                        CondSelectOp::Csneg => m.wrapping_neg(),
                    }
                };
                cpu.set_reg(rd, sf, result);
            }
            Instruction::CondCompare {
                sf,
                negate,
                rn,
                operand,
                nzcv,
                cond,
            } => {
                cpu.nzcv = if cpu.nzcv.holds(cond) {
                    let y = match operand {
                        CompareOperand::Register(rm) => cpu.reg(rm, sf),
                        CompareOperand::Immediate(imm) => u64::from(imm),
                    };
                    add_sub(cpu.reg(rn, sf), y, !negate, sf).1
                } else {
                    Nzcv::from_bits(nzcv)
                };
            }
            Instruction::Unary { sf, op, rd, rn } => {
                let result = unary(op, cpu.reg(rn, sf), sf);
                cpu.set_reg(rd, sf, result);
            }
            Instruction::Binary { sf, op, rd, rn, rm } => {
                let result = binary(op, cpu.reg(rn, sf), cpu.reg(rm, sf), sf);
                cpu.set_reg(rd, sf, result);
            }
            Instruction::Multiply {
                sf,
                op,
                rd,
                rn,
                rm,
                ra,
            } => {
                let result = multiply(op, cpu.x(rn), cpu.x(rm), cpu.x(ra));
                cpu.set_reg(rd, sf, result);
            }
            _ => {}
        }
    }
}
