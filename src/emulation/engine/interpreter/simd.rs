//! Scalar floating-point and Advanced SIMD handlers.
//!
//! Floating-point arithmetic uses the host's IEEE 754 operations with
//! round-to-nearest-even, which matches the `FPCR` state Android processes run with.
//! Exception flags in `FPSR` are not accumulated.

use crate::emulation::engine::{
    cpu::{Cpu, Nzcv},
    instruction::{
        FpBinaryOp, FpFusedOp, FpRounding, FpSize, FpUnaryOp, Instruction, VectorArithOp,
        VectorImmOp, VectorLogicOp, VectorShiftOp, VectorUnaryOp,
    },
    interpreter::Interpreter,
};

macro_rules! float_ops {
    ($binary:ident, $fused:ident, $unary:ident, $round:ident, $t:ty) => {
        fn $round(value: $t, mode: FpRounding) -> $t {
            match mode {
                FpRounding::TiesEven => value.round_ties_even(),
                FpRounding::PlusInfinity => value.ceil(),
                FpRounding::MinusInfinity => value.floor(),
                FpRounding::Zero => value.trunc(),
                FpRounding::TiesAway => value.round(),
            }
        }

        fn $binary(op: FpBinaryOp, a: $t, b: $t) -> $t {
            match op {
                FpBinaryOp::Add => a + b,
                FpBinaryOp::Sub => a - b,
                FpBinaryOp::Mul => a * b,
                FpBinaryOp::Div => a / b,
                FpBinaryOp::Nmul => -(a * b),
                FpBinaryOp::Max => {
                    if a.is_nan() || b.is_nan() {
                        <$t>::NAN
                    } else {
                        a.max(b)
                    }
                }
                FpBinaryOp::Min => {
                    if a.is_nan() || b.is_nan() {
                        <$t>::NAN
                    } else {
                        a.min(b)
                    }
                }
                FpBinaryOp::MaxNm => a.max(b),
                FpBinaryOp::MinNm => a.min(b),
            }
        }

        fn $fused(op: FpFusedOp, n: $t, m: $t, a: $t) -> $t {
            match op {
                FpFusedOp::Madd => n.mul_add(m, a),
                FpFusedOp::Msub => (-n).mul_add(m, a),
                FpFusedOp::Nmadd => (-n).mul_add(m, -a),
                FpFusedOp::Nmsub => n.mul_add(m, -a),
            }
        }

        fn $unary(op: FpUnaryOp, value: $t) -> $t {
            match op {
                FpUnaryOp::Mov => value,
                FpUnaryOp::Abs => value.abs(),
                FpUnaryOp::Neg => -value,
                FpUnaryOp::Sqrt => value.sqrt(),
                FpUnaryOp::Round(mode) => $round(value, mode),
            }
        }
    };
}

float_ops!(binary_f32, fused_f32, unary_f32, round_f32, f32);
float_ops!(binary_f64, fused_f64, unary_f64, round_f64, f64);

fn compare_flags(a: f64, b: f64) -> Nzcv {
    if a.is_nan() || b.is_nan() {
        Nzcv::from_bits(0b0011)
    } else if a == b {
        Nzcv::from_bits(0b0110)
    } else if a < b {
        Nzcv::from_bits(0b1000)
    } else {
        Nzcv::from_bits(0b0010)
    }
}

/// Reads a scalar as `f64`; single precision widens exactly.
fn read_fp(cpu: &Cpu, size: FpSize, n: u8) -> f64 {
    match size {
        FpSize::Single => f64::from(cpu.s(n)),
        FpSize::Double => cpu.d(n),
    }
}

fn lane_mask(esize: u8) -> u128 {
    if esize >= 16 {
        u128::MAX
    } else {
        (1u128 << (u32::from(esize) * 8)) - 1
    }
}

fn vector_mask(q: bool) -> u128 {
    if q {
        u128::MAX
    } else {
        u128::from(u64::MAX)
    }
}

fn lane_count(q: bool, esize: u8) -> u8 {
    (if q { 16 } else { 8 }) / esize
}

fn get_lane(value: u128, esize: u8, index: u8) -> u64 {
    ((value >> (u32::from(index) * u32::from(esize) * 8)) & lane_mask(esize)) as u64
}

fn set_lane(value: &mut u128, esize: u8, index: u8, lane: u64) {
    let shift = u32::from(index) * u32::from(esize) * 8;
    let mask = lane_mask(esize) << shift;
    *value = (*value & !mask) | ((u128::from(lane) << shift) & mask);
}

fn replicate_lane(lane: u64, esize: u8, q: bool) -> u128 {
    let mut result = 0u128;
    for i in 0..lane_count(q, esize) {
        set_lane(&mut result, esize, i, lane);
    }
    result
}

fn sign_extend_lane(lane: u64, esize: u8) -> i64 {
    let shift = 64 - u32::from(esize) * 8;
    ((lane << shift) as i64) >> shift
}

fn map_lanes(q: bool, esize: u8, mut f: impl FnMut(u8) -> u64) -> u128 {
    let mut result = 0u128;
    for i in 0..lane_count(q, esize) {
        set_lane(&mut result, esize, i, f(i));
    }
    result
}

fn arith_lane(op: VectorArithOp, n: u64, m: u64, esize: u8) -> u64 {
    let ones = lane_mask(esize) as u64;
    let truth = |c: bool| if c { ones } else { 0 };
    let (sn, sm) = (sign_extend_lane(n, esize), sign_extend_lane(m, esize));
    match op {
        VectorArithOp::Add => n.wrapping_add(m) & ones,
        VectorArithOp::Sub => n.wrapping_sub(m) & ones,
        VectorArithOp::Mul => n.wrapping_mul(m) & ones,
        VectorArithOp::Cmeq => truth(n == m),
        VectorArithOp::Cmtst => truth(n & m != 0),
        VectorArithOp::Cmgt => truth(sn > sm),
        VectorArithOp::Cmge => truth(sn >= sm),
        VectorArithOp::Cmhi => truth(n > m),
        VectorArithOp::Cmhs => truth(n >= m),
    }
}

fn shift_lane(op: VectorShiftOp, lane: u64, esize: u8, shift: u8) -> u64 {
    let bits = u32::from(esize) * 8;
    let shift = u32::from(shift);
    let ones = lane_mask(esize) as u64;
    match op {
        VectorShiftOp::Shl => {
            if shift >= bits {
                0
            } else {
                (lane << shift) & ones
            }
        }
        VectorShiftOp::Ushr => {
            if shift >= bits {
                0
            } else {
                lane >> shift
            }
        }
        VectorShiftOp::Sshr => {
            let value = sign_extend_lane(lane, esize) >> shift.min(bits - 1);
            (value as u64) & ones
        }
    }
}

impl Interpreter {
    /// Executes a floating-point or Advanced SIMD instruction.
    pub(super) fn execute_simd(cpu: &mut Cpu, instruction: &Instruction) {
        match *instruction {
            Instruction::FpUnary { size, op, rd, rn } => match (size, op) {
                (FpSize::Single, FpUnaryOp::Mov) => {
                    cpu.set_v_scalar(rd, 4, cpu.v(rn));
                }
                (FpSize::Double, FpUnaryOp::Mov) => {
                    cpu.set_v_scalar(rd, 8, cpu.v(rn));
                }
                (FpSize::Single, _) => cpu.set_s(rd, unary_f32(op, cpu.s(rn))),
                (FpSize::Double, _) => cpu.set_d(rd, unary_f64(op, cpu.d(rn))),
            },
            Instruction::FpBinary {
                size,
                op,
                rd,
                rn,
                rm,
            } => match size {
                FpSize::Single => cpu.set_s(rd, binary_f32(op, cpu.s(rn), cpu.s(rm))),
                FpSize::Double => cpu.set_d(rd, binary_f64(op, cpu.d(rn), cpu.d(rm))),
            },
            Instruction::FpFused {
                size,
                op,
                rd,
                rn,
                rm,
                ra,
            } => match size {
                FpSize::Single => cpu.set_s(rd, fused_f32(op, cpu.s(rn), cpu.s(rm), cpu.s(ra))),
                FpSize::Double => cpu.set_d(rd, fused_f64(op, cpu.d(rn), cpu.d(rm), cpu.d(ra))),
            },
            Instruction::FpCompare { size, rn, rm } => {
                let a = read_fp(cpu, size, rn);
                let b = rm.map_or(0.0, |rm| read_fp(cpu, size, rm));
                cpu.nzcv = compare_flags(a, b);
            }
            Instruction::FpCondCompare {
                size,
                rn,
                rm,
                nzcv,
                cond,
            } => {
                cpu.nzcv = if cpu.nzcv.holds(cond) {
                    compare_flags(read_fp(cpu, size, rn), read_fp(cpu, size, rm))
                } else {
                    Nzcv::from_bits(nzcv)
                };
            }
            Instruction::FpCondSelect {
                size,
                rd,
                rn,
                rm,
                cond,
            } => {
                let source = if cpu.nzcv.holds(cond) { rn } else { rm };
                cpu.set_v_scalar(rd, size.bytes(), cpu.v(source));
            }
            Instruction::FpConvert { from, to, rd, rn } => match (from, to) {
                (FpSize::Single, FpSize::Double) => cpu.set_d(rd, f64::from(cpu.s(rn))),
                (FpSize::Double, FpSize::Single) => cpu.set_s(rd, cpu.d(rn) as f32),
                _ => cpu.set_v_scalar(rd, to.bytes(), cpu.v(rn)),
            },
            Instruction::FpImm { size, rd, value } => match size {
                FpSize::Single => cpu.set_s(rd, value as f32),
                FpSize::Double => cpu.set_d(rd, value),
            },
            Instruction::FpMoveGeneral {
                to_vector,
                sf,
                top,
                rd,
                rn,
            } => {
                if to_vector {
                    if top {
                        let low = cpu.v(rd) & u128::from(u64::MAX);
                        cpu.set_v(rd, low | (u128::from(cpu.x(rn)) << 64));
                    } else {
                        let bytes = if sf { 8 } else { 4 };
                        cpu.set_v_scalar(rd, bytes, u128::from(cpu.x(rn)));
                    }
                } else {
                    let value = cpu.v(rn);
                    let result = if top {
                        (value >> 64) as u64
                    } else if sf {
                        value as u64
                    } else {
                        u64::from(value as u32)
                    };
                    cpu.set_x(rd, result);
                }
            }
            Instruction::IntToFp {
                sf,
                size,
                signed,
                rd,
                rn,
            } => {
                let raw = cpu.reg(rn, sf);
                match (signed, sf, size) {
                    (true, true, FpSize::Single) => cpu.set_s(rd, raw as i64 as f32),
                    (true, true, FpSize::Double) => cpu.set_d(rd, raw as i64 as f64),
                    (true, false, FpSize::Single) => cpu.set_s(rd, raw as u32 as i32 as f32),
                    (true, false, FpSize::Double) => cpu.set_d(rd, f64::from(raw as u32 as i32)),
                    (false, _, FpSize::Single) => cpu.set_s(rd, raw as f32),
                    (false, _, FpSize::Double) => cpu.set_d(rd, raw as f64),
                }
            }
            Instruction::FpToInt {
                sf,
                size,
                signed,
                rounding,
                rd,
                rn,
            } => {
                let rounded = round_f64(read_fp(cpu, size, rn), rounding);
                let result = match (signed, sf) {
                    (true, true) => rounded as i64 as u64,
                    (true, false) => u64::from(rounded as i32 as u32),
                    (false, true) => rounded as u64,
                    (false, false) => u64::from(rounded as u32),
                };
                cpu.set_reg(rd, sf, result);
            }
            Instruction::VectorImm { q, op, rd, imm } => {
                let imm = u128::from(imm) | (u128::from(imm) << 64);
                let result = match op {
                    VectorImmOp::Movi => imm,
                    VectorImmOp::Mvni => !imm,
                    VectorImmOp::Orr => cpu.v(rd) | imm,
                    VectorImmOp::Bic => cpu.v(rd) & !imm,
                };
                cpu.set_v(rd, result & vector_mask(q));
            }
            Instruction::DupGeneral { q, esize, rd, rn } => {
                cpu.set_v(rd, replicate_lane(cpu.x(rn), esize, q));
            }
            Instruction::DupElement {
                q,
                scalar,
                esize,
                rd,
                rn,
                index,
            } => {
                let lane = get_lane(cpu.v(rn), esize, index);
                if scalar {
                    cpu.set_v(rd, u128::from(lane));
                } else {
                    cpu.set_v(rd, replicate_lane(lane, esize, q));
                }
            }
            Instruction::InsGeneral {
                esize,
                rd,
                index,
                rn,
            } => {
                let mut value = cpu.v(rd);
                set_lane(&mut value, esize, index, cpu.x(rn));
                cpu.set_v(rd, value);
            }
            Instruction::InsElement {
                esize,
                rd,
                dst_index,
                rn,
                src_index,
            } => {
                let lane = get_lane(cpu.v(rn), esize, src_index);
                let mut value = cpu.v(rd);
                set_lane(&mut value, esize, dst_index, lane);
                cpu.set_v(rd, value);
            }
            Instruction::MoveElement {
                signed,
                sf,
                esize,
                rd,
                rn,
                index,
            } => {
                let lane = get_lane(cpu.v(rn), esize, index);
                if signed {
                    cpu.set_reg(rd, sf, sign_extend_lane(lane, esize) as u64);
                } else {
                    cpu.set_x(rd, lane);
                }
            }
            Instruction::VectorLogic { q, op, rd, rn, rm } => {
                let (d, n, m) = (cpu.v(rd), cpu.v(rn), cpu.v(rm));
                let result = match op {
                    VectorLogicOp::And => n & m,
                    VectorLogicOp::Bic => n & !m,
                    VectorLogicOp::Orr => n | m,
                    VectorLogicOp::Orn => n | !m,
                    VectorLogicOp::Eor => n ^ m,
                    VectorLogicOp::Bsl => (d & n) | (!d & m),
                    VectorLogicOp::Bit => (d & !m) | (n & m),
                    VectorLogicOp::Bif => (d & m) | (n & !m),
                };
                cpu.set_v(rd, result & vector_mask(q));
            }
            Instruction::VectorArith {
                q,
                op,
                esize,
                rd,
                rn,
                rm,
            } => {
                let (n, m) = (cpu.v(rn), cpu.v(rm));
                let result = map_lanes(q, esize, |i| {
                    arith_lane(op, get_lane(n, esize, i), get_lane(m, esize, i), esize)
                });
                cpu.set_v(rd, result);
            }
            Instruction::VectorShift {
                q,
                op,
                esize,
                shift,
                rd,
                rn,
            } => {
                let n = cpu.v(rn);
                let result = map_lanes(q, esize, |i| {
                    shift_lane(op, get_lane(n, esize, i), esize, shift)
                });
                cpu.set_v(rd, result);
            }
            Instruction::VectorUnary {
                q,
                op,
                esize,
                rd,
                rn,
            } => {
                let n = cpu.v(rn);
                let result = match op {
                    VectorUnaryOp::Not => !n & vector_mask(q),
                    VectorUnaryOp::Cnt => {
                        map_lanes(q, 1, |i| u64::from(get_lane(n, 1, i).count_ones()))
                    }
                    VectorUnaryOp::Rev64 => {
                        let per_dword = 8 / esize;
                        map_lanes(q, esize, |i| {
                            let group = i / per_dword;
                            let within = i % per_dword;
                            get_lane(n, esize, group * per_dword + (per_dword - 1 - within))
                        })
                    }
                    VectorUnaryOp::Cmeq0 => map_lanes(q, esize, |i| {
                        if get_lane(n, esize, i) == 0 {
                            lane_mask(esize) as u64
                        } else {
                            0
                        }
                    }),
                    VectorUnaryOp::Addv => {
                        let sum = (0..lane_count(q, esize))
                            .fold(0u64, |acc, i| acc.wrapping_add(get_lane(n, esize, i)));
                        u128::from(sum) & lane_mask(esize)
                    }
                    VectorUnaryOp::Uaddlv => {
                        let sum = (0..lane_count(q, esize))
                            .fold(0u64, |acc, i| acc.wrapping_add(get_lane(n, esize, i)));
                        u128::from(sum) & lane_mask(esize * 2)
                    }
                };
                cpu.set_v(rd, result);
            }
            Instruction::VectorExtract {
                q,
                rd,
                rn,
                rm,
                index,
            } => {
                let shift = u32::from(index) * 8;
                let result = if q {
                    let (n, m) = (cpu.v(rn), cpu.v(rm));
                    if shift == 0 {
                        n
                    } else {
                        (n >> shift) | (m << (128 - shift))
                    }
                } else {
                    let n = cpu.v(rn) & u128::from(u64::MAX);
                    let m = cpu.v(rm) & u128::from(u64::MAX);
                    ((n | (m << 64)) >> shift) & u128::from(u64::MAX)
                };
                cpu.set_v(rd, result);
            }
            _ => {}
        }
    }
}
