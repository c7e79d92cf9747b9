//! A64 instruction decoder.
//!
//! [`decode`] maps a 32-bit instruction word to an [`Instruction`]. The decoder follows
//! the top-level encoding table of the Arm architecture (`op0` = bits 28:25) and then
//! each group's own sub-tables. Words outside the supported subset decode to `None`,
//! which the controller reports as [`Fault::UndefinedInstruction`](super::Fault::UndefinedInstruction).
//!
//! # Supported Groups
//!
//! | `op0` | Group |
//! |-------|-------|
//! | `100x` | Data processing, immediate |
//! | `101x` | Branches, exception generation, system |
//! | `x1x0` | Loads and stores |
//! | `x101` | Data processing, register |
//! | `x111` | Scalar floating point and Advanced SIMD |

use crate::emulation::engine::instruction::{
    AddrMode, AtomicOp, Binary, BitfieldOp, BranchRegKind, CompareOperand, CondSelectOp,
    ExtendType, FpBinaryOp, FpFusedOp, FpRounding, FpSize, FpUnaryOp, Instruction, LogicalOp,
    MoveWideOp, MulOp, RegBank, ShiftType, SimdPostIndex, Unary, VectorArithOp, VectorImmOp,
    VectorLogicOp, VectorShiftOp, VectorUnaryOp,
};

/// Extracts bits `hi..=lo` of `word`.
#[inline]
fn bits(word: u32, hi: u32, lo: u32) -> u32 {
    (word >> lo) & ((1u32 << (hi - lo + 1)) - 1)
}

#[inline]
fn bit(word: u32, n: u32) -> bool {
    (word >> n) & 1 == 1
}

/// Extracts the 5-bit register field starting at bit `lo`.
#[inline]
fn reg(word: u32, lo: u32) -> u8 {
    ((word >> lo) & 0x1F) as u8
}

/// Sign-extends the low `width` bits of `value`.
#[inline]
fn sign_extend(value: u64, width: u32) -> i64 {
    let shift = 64 - width;
    ((value << shift) as i64) >> shift
}

fn ones(n: u32) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

fn rotate_right(value: u64, amount: u32, width: u32) -> u64 {
    let amount = amount % width;
    if amount == 0 {
        value & ones(width)
    } else {
        ((value >> amount) | (value << (width - amount))) & ones(width)
    }
}

fn replicate(value: u64, esize: u32, datasize: u32) -> u64 {
    let mut result = 0u64;
    let mut position = 0;
    while position < datasize {
        result |= value << position;
        position += esize;
    }
    result & ones(datasize)
}

/// Decodes the `N:immr:imms` bitmask fields into `(wmask, tmask)`.
///
/// Returns `None` for reserved encodings.
#[must_use]
pub fn decode_bit_masks(
    n: u32,
    imms: u32,
    immr: u32,
    immediate: bool,
    datasize: u32,
) -> Option<(u64, u64)> {
    let combined = (n << 6) | (!imms & 0x3F);
    if combined == 0 {
        return None;
    }
    let len = 31 - combined.leading_zeros();
    if len < 1 {
        return None;
    }
    let levels = (1u32 << len) - 1;
    if immediate && (imms & levels) == levels {
        return None;
    }
    let esize = 1u32 << len;
    if esize > datasize {
        return None;
    }
    let s = imms & levels;
    let r = immr & levels;
    let d = s.wrapping_sub(r) & levels;

    let welem = ones(s + 1);
    let telem = ones(d + 1);
    let wmask = replicate(rotate_right(welem, r, esize), esize, datasize);
    let tmask = replicate(telem, esize, datasize);
    Some((wmask, tmask))
}

/// Expands an 8-bit floating-point immediate (`FMOV #imm`).
#[must_use]
pub fn expand_fp_imm(imm8: u32) -> f64 {
    let negative = imm8 & 0x80 != 0;
    let b = imm8 & 0x40 != 0;
    let cd = ((imm8 >> 4) & 3) as i32;
    let fraction = f64::from(imm8 & 0xF);
    let exponent = if b { cd - 3 } else { cd + 1 };
    let magnitude = (1.0 + fraction / 16.0) * 2f64.powi(exponent);
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

/// Expands an Advanced SIMD modified immediate to 64 bits.
fn expand_simd_imm(op: bool, cmode: u32, imm8: u32) -> u64 {
    let imm8 = u64::from(imm8);
    match cmode >> 1 {
        0b000 => replicate(imm8, 32, 64),
        0b001 => replicate(imm8 << 8, 32, 64),
        0b010 => replicate(imm8 << 16, 32, 64),
        0b011 => replicate(imm8 << 24, 32, 64),
        0b100 => replicate(imm8, 16, 64),
        0b101 => replicate(imm8 << 8, 16, 64),
        0b110 => {
            if cmode & 1 == 0 {
                replicate((imm8 << 8) | 0xFF, 32, 64)
            } else {
                replicate((imm8 << 16) | 0xFFFF, 32, 64)
            }
        }
        _ => match (cmode & 1, op) {
            (0, false) => replicate(imm8, 8, 64),
            (0, true) => (0..8).fold(0u64, |acc, i| {
                if imm8 & (1 << i) != 0 {
                    acc | (0xFF << (i * 8))
                } else {
                    acc
                }
            }),
            (_, false) => replicate(u64::from((expand_fp_imm(imm8 as u32) as f32).to_bits()), 32, 64),
            (_, true) => expand_fp_imm(imm8 as u32).to_bits(),
        },
    }
}

/// Decodes one A64 instruction word.
///
/// # Arguments
///
/// * `word` - The little-endian instruction word as read from memory
///
/// # Returns
///
/// The decoded instruction, or `None` if the encoding is unallocated or outside the
/// supported subset.
#[must_use]
pub fn decode(word: u32) -> Option<Instruction> {
    match bits(word, 28, 25) {
        0b1000 | 0b1001 => decode_dp_immediate(word),
        0b1010 | 0b1011 => decode_branch_system(word),
        0b0100 | 0b0110 | 0b1100 | 0b1110 => decode_load_store(word),
        0b0101 | 0b1101 => decode_dp_register(word),
        0b0111 | 0b1111 => decode_simd_fp(word),
        _ => None,
    }
}

fn decode_dp_immediate(word: u32) -> Option<Instruction> {
    let sf = bit(word, 31);
    let rd = reg(word, 0);
    let rn = reg(word, 5);
    let datasize = if sf { 64 } else { 32 };

    match bits(word, 25, 23) {
        0b000 | 0b001 => {
            let immlo = u64::from(bits(word, 30, 29));
            let immhi = u64::from(bits(word, 23, 5));
            let imm = sign_extend((immhi << 2) | immlo, 21);
            Some(Instruction::Adr {
                rd,
                offset: if sf { imm << 12 } else { imm },
                page: sf,
            })
        }
        0b010 => {
            let imm12 = u64::from(bits(word, 21, 10));
            Some(Instruction::AddSubImm {
                sf,
                sub: bit(word, 30),
                set_flags: bit(word, 29),
                rd,
                rn,
                imm: if bit(word, 22) { imm12 << 12 } else { imm12 },
            })
        }
        0b100 => {
            let n = bits(word, 22, 22);
            if !sf && n == 1 {
                return None;
            }
            let (imm, _) =
                decode_bit_masks(n, bits(word, 15, 10), bits(word, 21, 16), true, datasize)?;
            let op = match bits(word, 30, 29) {
                0 => LogicalOp::And,
                1 => LogicalOp::Orr,
                2 => LogicalOp::Eor,
                _ => LogicalOp::Ands,
            };
            Some(Instruction::LogicalImm {
                sf,
                op,
                rd,
                rn,
                imm,
            })
        }
        0b101 => {
            let hw = bits(word, 22, 21);
            if !sf && hw >= 2 {
                return None;
            }
            let op = match bits(word, 30, 29) {
                0 => MoveWideOp::Movn,
                2 => MoveWideOp::Movz,
                3 => MoveWideOp::Movk,
                _ => return None,
            };
            Some(Instruction::MoveWide {
                sf,
                op,
                rd,
                imm16: bits(word, 20, 5) as u16,
                shift: (hw * 16) as u8,
            })
        }
        0b110 => {
            let n = bits(word, 22, 22);
            if n != u32::from(sf) {
                return None;
            }
            let immr = bits(word, 21, 16);
            let imms = bits(word, 15, 10);
            if !sf && (immr >= 32 || imms >= 32) {
                return None;
            }
            let op = match bits(word, 30, 29) {
                0 => BitfieldOp::Signed,
                1 => BitfieldOp::Insert,
                2 => BitfieldOp::Unsigned,
                _ => return None,
            };
            let (wmask, tmask) = decode_bit_masks(n, imms, immr, false, datasize)?;
            Some(Instruction::Bitfield {
                sf,
                op,
                rd,
                rn,
                immr: immr as u8,
                imms: imms as u8,
                wmask,
                tmask,
            })
        }
        _ => {
            if bits(word, 30, 29) != 0 || bit(word, 21) || bits(word, 22, 22) != u32::from(sf) {
                return None;
            }
            let lsb = bits(word, 15, 10);
            if !sf && lsb >= 32 {
                return None;
            }
            Some(Instruction::Extract {
                sf,
                rd,
                rn,
                rm: reg(word, 16),
                lsb: lsb as u8,
            })
        }
    }
}

fn decode_branch_system(word: u32) -> Option<Instruction> {
    if word & 0x7C00_0000 == 0x1400_0000 {
        return Some(Instruction::Branch {
            offset: sign_extend(u64::from(bits(word, 25, 0)), 26) << 2,
            link: bit(word, 31),
        });
    }
    if word & 0x7E00_0000 == 0x3400_0000 {
        return Some(Instruction::CompareBranch {
            sf: bit(word, 31),
            nonzero: bit(word, 24),
            rt: reg(word, 0),
            offset: sign_extend(u64::from(bits(word, 23, 5)), 19) << 2,
        });
    }
    if word & 0x7E00_0000 == 0x3600_0000 {
        let bit_number = (bits(word, 31, 31) << 5) | bits(word, 23, 19);
        return Some(Instruction::TestBranch {
            nonzero: bit(word, 24),
            rt: reg(word, 0),
            bit: bit_number as u8,
            offset: sign_extend(u64::from(bits(word, 18, 5)), 14) << 2,
        });
    }
    if word & 0xFF00_0010 == 0x5400_0000 {
        return Some(Instruction::BranchCond {
            cond: bits(word, 3, 0) as u8,
            offset: sign_extend(u64::from(bits(word, 23, 5)), 19) << 2,
        });
    }
    if word & 0xFF00_0000 == 0xD400_0000 {
        if bits(word, 4, 2) != 0 {
            return None;
        }
        let imm = bits(word, 20, 5) as u16;
        return match (bits(word, 23, 21), bits(word, 1, 0)) {
            (0b000, 0b01) => Some(Instruction::Svc { imm }),
            (0b001, 0b00) => Some(Instruction::Brk { imm }),
            _ => None,
        };
    }
    if word & 0xFFC0_0000 == 0xD500_0000 {
        return decode_system(word);
    }
    if word & 0xFE00_0000 == 0xD600_0000 {
        return decode_branch_register(word);
    }
    None
}

fn decode_system(word: u32) -> Option<Instruction> {
    let load = bit(word, 21);
    let op0 = bits(word, 20, 19);
    let rt = reg(word, 0);

    match op0 {
        0 if !load => match bits(word, 15, 12) {
            // Hints (NOP, YIELD, BTI, PACIASP, ...), barriers and CLREX, PSTATE writes
            0b0010 if rt == 31 => Some(Instruction::Nop),
            0b0011 | 0b0100 => Some(Instruction::Nop),
            _ => None,
        },
        // Cache and TLB maintenance
        1 if !load => Some(Instruction::Nop),
        2 | 3 => {
            let sysreg = bits(word, 20, 5) as u16;
            if load {
                Some(Instruction::Mrs { rt, sysreg })
            } else {
                Some(Instruction::Msr { rt, sysreg })
            }
        }
        _ => None,
    }
}

fn decode_branch_register(word: u32) -> Option<Instruction> {
    let opc = bits(word, 24, 21);
    let op3 = bits(word, 15, 10);
    let op4 = bits(word, 4, 0);
    if bits(word, 20, 16) != 0x1F {
        return None;
    }

    let kind = match opc {
        0b0000 | 0b1000 => BranchRegKind::Br,
        0b0001 | 0b1001 => BranchRegKind::Blr,
        0b0010 => BranchRegKind::Ret,
        _ => return None,
    };
    // Pointer-authenticated forms (op3 = 00001x) execute as their plain counterparts
    let authenticated = match op3 {
        0 => false,
        2 | 3 => true,
        _ => return None,
    };
    if !authenticated && op4 != 0 {
        return None;
    }

    let rn = if kind == BranchRegKind::Ret && authenticated {
        30
    } else {
        reg(word, 5)
    };
    Some(Instruction::BranchReg { kind, rn })
}

/// How a single-register load/store moves data.
enum Transfer {
    Access {
        size: u8,
        load: bool,
        signed: bool,
        wide: bool,
        bank: RegBank,
    },
    Prefetch,
}

fn classify_transfer(size: u32, vector: bool, opc: u32) -> Option<Transfer> {
    if vector {
        let bytes = match (size, opc >> 1) {
            (0, 1) => 16,
            (s, 0) => 1u8 << s,
            _ => return None,
        };
        return Some(Transfer::Access {
            size: bytes,
            load: opc & 1 == 1,
            signed: false,
            wide: false,
            bank: RegBank::Vector,
        });
    }

    let bytes = 1u8 << size;
    match opc {
        0 | 1 => Some(Transfer::Access {
            size: bytes,
            load: opc == 1,
            signed: false,
            wide: false,
            bank: RegBank::General,
        }),
        2 if size == 3 => Some(Transfer::Prefetch),
        2 => Some(Transfer::Access {
            size: bytes,
            load: true,
            signed: true,
            wide: true,
            bank: RegBank::General,
        }),
        _ if size >= 2 => None,
        _ => Some(Transfer::Access {
            size: bytes,
            load: true,
            signed: true,
            wide: false,
            bank: RegBank::General,
        }),
    }
}

fn single_transfer(transfer: Transfer, rt: u8, mode: AddrMode) -> Instruction {
    match transfer {
        Transfer::Access {
            size,
            load,
            signed,
            wide,
            bank,
        } => Instruction::LoadStore {
            load,
            size,
            signed,
            wide,
            bank,
            rt,
            mode,
        },
        Transfer::Prefetch => Instruction::Nop,
    }
}

fn decode_load_store(word: u32) -> Option<Instruction> {
    if word & 0xBFBF_0000 == 0x0C00_0000 || word & 0xBFA0_0000 == 0x0C80_0000 {
        return decode_simd_multiple(word);
    }
    if word & 0x3F00_0000 == 0x0800_0000 {
        return decode_exclusive(word);
    }
    if word & 0x3B00_0000 == 0x1800_0000 {
        return decode_literal(word);
    }
    if word & 0x3A00_0000 == 0x2800_0000 {
        return decode_pair(word);
    }

    let size = bits(word, 31, 30);
    let vector = bit(word, 26);
    let opc = bits(word, 23, 22);
    let rt = reg(word, 0);
    let rn = reg(word, 5);

    if word & 0x3B00_0000 == 0x3900_0000 {
        let transfer = classify_transfer(size, vector, opc)?;
        let scale = match &transfer {
            Transfer::Access { size, .. } => i64::from(*size),
            Transfer::Prefetch => 8,
        };
        let offset = i64::from(bits(word, 21, 10)) * scale;
        return Some(single_transfer(transfer, rt, AddrMode::Offset { rn, offset }));
    }

    if word & 0x3B20_0000 == 0x3800_0000 {
        let transfer = classify_transfer(size, vector, opc)?;
        let offset = sign_extend(u64::from(bits(word, 20, 12)), 9);
        let mode = match bits(word, 11, 10) {
            0b01 => AddrMode::PostIndex { rn, offset },
            0b11 => AddrMode::PreIndex { rn, offset },
            _ => AddrMode::Offset { rn, offset },
        };
        return Some(single_transfer(transfer, rt, mode));
    }

    if word & 0x3B20_0000 == 0x3820_0000 {
        return match bits(word, 11, 10) {
            0b10 => {
                let option = bits(word, 15, 13);
                if option & 0b010 == 0 {
                    return None;
                }
                let transfer = classify_transfer(size, vector, opc)?;
                let shift = match &transfer {
                    Transfer::Access { size, .. } if bit(word, 12) => size.trailing_zeros() as u8,
                    Transfer::Prefetch if bit(word, 12) => 3,
                    _ => 0,
                };
                Some(single_transfer(
                    transfer,
                    rt,
                    AddrMode::Register {
                        rn,
                        rm: reg(word, 16),
                        extend: ExtendType::from_bits(option),
                        shift,
                    },
                ))
            }
            0b00 if !vector => decode_atomic(word),
            _ => None,
        };
    }

    None
}

fn decode_simd_multiple(word: u32) -> Option<Instruction> {
    let count = match bits(word, 15, 12) {
        0b0111 => 1,
        0b1010 => 2,
        0b0110 => 3,
        0b0010 => 4,
        _ => return None,
    };
    let post = if bit(word, 23) {
        match reg(word, 16) {
            31 => SimdPostIndex::Immediate,
            rm => SimdPostIndex::Register(rm),
        }
    } else {
        SimdPostIndex::None
    };
    Some(Instruction::SimdLoadStoreMultiple {
        load: bit(word, 22),
        q: bit(word, 30),
        count,
        rt: reg(word, 0),
        rn: reg(word, 5),
        post,
    })
}

fn decode_exclusive(word: u32) -> Option<Instruction> {
    let size = bits(word, 31, 30);
    let o2 = bit(word, 23);
    let load = bit(word, 22);
    let o1 = bit(word, 21);
    let rs = reg(word, 16);
    let rt2 = reg(word, 10);
    let rn = reg(word, 5);
    let rt = reg(word, 0);

    match (o2, o1) {
        (false, false) | (false, true) => {
            let pair = o1;
            if pair && size < 2 {
                // CASP
                return None;
            }
            let element = if pair {
                if size == 3 {
                    8
                } else {
                    4
                }
            } else {
                1u8 << size
            };
            if load {
                Some(Instruction::LoadExclusive {
                    size: element,
                    pair,
                    rt,
                    rt2,
                    rn,
                })
            } else {
                Some(Instruction::StoreExclusive {
                    size: element,
                    pair,
                    rs,
                    rt,
                    rt2,
                    rn,
                })
            }
        }
        // LDAR / STLR / LDLAR / STLLR
        (true, false) => Some(Instruction::LoadStore {
            load,
            size: 1u8 << size,
            signed: false,
            wide: false,
            bank: RegBank::General,
            rt,
            mode: AddrMode::Offset { rn, offset: 0 },
        }),
        (true, true) if rt2 == 31 => Some(Instruction::CompareSwap {
            size: 1u8 << size,
            rs,
            rt,
            rn,
        }),
        _ => None,
    }
}

fn decode_literal(word: u32) -> Option<Instruction> {
    let opc = bits(word, 31, 30);
    let rt = reg(word, 0);
    let offset = sign_extend(u64::from(bits(word, 23, 5)), 19) << 2;
    let mode = AddrMode::Literal { offset };

    if bit(word, 26) {
        let size = match opc {
            0 => 4,
            1 => 8,
            2 => 16,
            _ => return None,
        };
        return Some(Instruction::LoadStore {
            load: true,
            size,
            signed: false,
            wide: false,
            bank: RegBank::Vector,
            rt,
            mode,
        });
    }

    let (size, signed) = match opc {
        0 => (4, false),
        1 => (8, false),
        2 => (4, true),
        _ => return Some(Instruction::Nop),
    };
    Some(Instruction::LoadStore {
        load: true,
        size,
        signed,
        wide: signed,
        bank: RegBank::General,
        rt,
        mode,
    })
}

fn decode_pair(word: u32) -> Option<Instruction> {
    let opc = bits(word, 31, 30);
    let vector = bit(word, 26);
    let load = bit(word, 22);

    let (size, signed) = if vector {
        match opc {
            0 => (4u8, false),
            1 => (8, false),
            2 => (16, false),
            _ => return None,
        }
    } else {
        match opc {
            0 => (4, false),
            1 if load => (4, true),
            2 => (8, false),
            _ => return None,
        }
    };

    let rn = reg(word, 5);
    let offset = sign_extend(u64::from(bits(word, 21, 15)), 7) * i64::from(size);
    let mode = match bits(word, 24, 23) {
        0b01 => AddrMode::PostIndex { rn, offset },
        0b11 => AddrMode::PreIndex { rn, offset },
        _ => AddrMode::Offset { rn, offset },
    };

    Some(Instruction::LoadStorePair {
        load,
        size,
        signed,
        bank: if vector {
            RegBank::Vector
        } else {
            RegBank::General
        },
        rt: reg(word, 0),
        rt2: reg(word, 10),
        mode,
    })
}

fn decode_atomic(word: u32) -> Option<Instruction> {
    let size = 1u8 << bits(word, 31, 30);
    let rs = reg(word, 16);
    let rn = reg(word, 5);
    let rt = reg(word, 0);

    let op = match (bit(word, 15), bits(word, 14, 12)) {
        (false, 0) => AtomicOp::Add,
        (false, 1) => AtomicOp::Clr,
        (false, 2) => AtomicOp::Eor,
        (false, 3) => AtomicOp::Set,
        (false, 4) => AtomicOp::Smax,
        (false, 5) => AtomicOp::Smin,
        (false, 6) => AtomicOp::Umax,
        (false, 7) => AtomicOp::Umin,
        (true, 0) => AtomicOp::Swp,
        (true, 4) if rs == 31 && bit(word, 23) && !bit(word, 22) => {
            // LDAPR
            return Some(Instruction::LoadStore {
                load: true,
                size,
                signed: false,
                wide: false,
                bank: RegBank::General,
                rt,
                mode: AddrMode::Offset { rn, offset: 0 },
            });
        }
        _ => return None,
    };
    Some(Instruction::Atomic {
        op,
        size,
        rs,
        rt,
        rn,
    })
}

fn decode_dp_register(word: u32) -> Option<Instruction> {
    let sf = bit(word, 31);
    let rd = reg(word, 0);
    let rn = reg(word, 5);
    let rm = reg(word, 16);

    if !bit(word, 28) {
        if !bit(word, 24) {
            let amount = bits(word, 15, 10);
            if !sf && amount >= 32 {
                return None;
            }
            let op = match bits(word, 30, 29) {
                0 => LogicalOp::And,
                1 => LogicalOp::Orr,
                2 => LogicalOp::Eor,
                _ => LogicalOp::Ands,
            };
            return Some(Instruction::LogicalShifted {
                sf,
                op,
                invert: bit(word, 21),
                rd,
                rn,
                rm,
                shift: ShiftType::from_bits(bits(word, 23, 22)),
                amount: amount as u8,
            });
        }
        if !bit(word, 21) {
            let shift = bits(word, 23, 22);
            let amount = bits(word, 15, 10);
            if shift == 3 || (!sf && amount >= 32) {
                return None;
            }
            return Some(Instruction::AddSubShifted {
                sf,
                sub: bit(word, 30),
                set_flags: bit(word, 29),
                rd,
                rn,
                rm,
                shift: ShiftType::from_bits(shift),
                amount: amount as u8,
            });
        }
        let amount = bits(word, 12, 10);
        if bits(word, 23, 22) != 0 || amount > 4 {
            return None;
        }
        return Some(Instruction::AddSubExtended {
            sf,
            sub: bit(word, 30),
            set_flags: bit(word, 29),
            rd,
            rn,
            rm,
            extend: ExtendType::from_bits(bits(word, 15, 13)),
            amount: amount as u8,
        });
    }

    match bits(word, 24, 21) {
        0b0000 => {
            if bits(word, 15, 10) != 0 {
                return None;
            }
            Some(Instruction::AddSubCarry {
                sf,
                sub: bit(word, 30),
                set_flags: bit(word, 29),
                rd,
                rn,
                rm,
            })
        }
        0b0010 => {
            if !bit(word, 29) || bit(word, 10) || bit(word, 4) {
                return None;
            }
            let operand = if bit(word, 11) {
                CompareOperand::Immediate(rm)
            } else {
                CompareOperand::Register(rm)
            };
            Some(Instruction::CondCompare {
                sf,
                negate: !bit(word, 30),
                rn,
                operand,
                nzcv: bits(word, 3, 0) as u8,
                cond: bits(word, 15, 12) as u8,
            })
        }
        0b0100 => {
            if bit(word, 29) {
                return None;
            }
            let op = match (bit(word, 30), bits(word, 11, 10)) {
                (false, 0) => CondSelectOp::Csel,
                (false, 1) => CondSelectOp::Csinc,
                (true, 0) => CondSelectOp::Csinv,
                (true, 1) => CondSelectOp::Csneg,
                _ => return None,
            };
            Some(Instruction::CondSelect {
                sf,
                op,
                rd,
                rn,
                rm,
                cond: bits(word, 15, 12) as u8,
            })
        }
        0b0110 => {
            if bit(word, 29) {
                return None;
            }
            if bit(word, 30) {
                decode_dp_one_source(word, sf, rd, rn)
            } else {
                let op = match bits(word, 15, 10) {
                    0b000010 => Binary::Udiv,
                    0b000011 => Binary::Sdiv,
                    0b001000 => Binary::Lslv,
                    0b001001 => Binary::Lsrv,
                    0b001010 => Binary::Asrv,
                    0b001011 => Binary::Rorv,
                    _ => return None,
                };
                Some(Instruction::Binary { sf, op, rd, rn, rm })
            }
        }
        0b1000..=0b1111 => {
            if bits(word, 30, 29) != 0 {
                return None;
            }
            let op = match (bits(word, 23, 21), bit(word, 15)) {
                (0b000, false) => MulOp::Madd,
                (0b000, true) => MulOp::Msub,
                (0b001, false) if sf => MulOp::Smaddl,
                (0b001, true) if sf => MulOp::Smsubl,
                (0b010, false) if sf => MulOp::Smulh,
                (0b101, false) if sf => MulOp::Umaddl,
                (0b101, true) if sf => MulOp::Umsubl,
                (0b110, false) if sf => MulOp::Umulh,
                _ => return None,
            };
            Some(Instruction::Multiply {
                sf,
                op,
                rd,
                rn,
                rm,
                ra: reg(word, 10),
            })
        }
        _ => None,
    }
}

fn decode_dp_one_source(word: u32, sf: bool, rd: u8, rn: u8) -> Option<Instruction> {
    match bits(word, 20, 16) {
        0 => {
            let op = match bits(word, 15, 10) {
                0 => Unary::Rbit,
                1 => Unary::Rev16,
                2 if sf => Unary::Rev32,
                2 => Unary::Rev,
                3 if sf => Unary::Rev,
                4 => Unary::Clz,
                5 => Unary::Cls,
                _ => return None,
            };
            Some(Instruction::Unary { sf, op, rd, rn })
        }
        // PACIA, AUTIA, XPACI and friends
        1 if sf => Some(Instruction::Nop),
        _ => None,
    }
}

fn fp_size(ftype: u32) -> Option<FpSize> {
    match ftype {
        0 => Some(FpSize::Single),
        1 => Some(FpSize::Double),
        _ => None,
    }
}

fn decode_simd_fp(word: u32) -> Option<Instruction> {
    if word & 0x7F20_0000 == 0x1E20_0000 {
        return decode_fp_scalar(word);
    }
    if word & 0xFF00_0000 == 0x1F00_0000 {
        let op = match (bit(word, 21), bit(word, 15)) {
            (false, false) => FpFusedOp::Madd,
            (false, true) => FpFusedOp::Msub,
            (true, false) => FpFusedOp::Nmadd,
            (true, true) => FpFusedOp::Nmsub,
        };
        return Some(Instruction::FpFused {
            size: fp_size(bits(word, 23, 22))?,
            op,
            rd: reg(word, 0),
            rn: reg(word, 5),
            rm: reg(word, 16),
            ra: reg(word, 10),
        });
    }
    decode_advanced_simd(word)
}

fn decode_fp_scalar(word: u32) -> Option<Instruction> {
    let ftype = bits(word, 23, 22);
    let rd = reg(word, 0);
    let rn = reg(word, 5);
    let rm = reg(word, 16);

    if bits(word, 15, 10) == 0 {
        return decode_fp_integer(word, ftype, rd, rn);
    }
    if bit(word, 31) {
        return None;
    }
    let size = fp_size(ftype)?;

    if bits(word, 14, 10) == 0b10000 {
        let op = match bits(word, 20, 15) {
            0b000000 => FpUnaryOp::Mov,
            0b000001 => FpUnaryOp::Abs,
            0b000010 => FpUnaryOp::Neg,
            0b000011 => FpUnaryOp::Sqrt,
            0b000100 if size == FpSize::Double => {
                return Some(Instruction::FpConvert {
                    from: size,
                    to: FpSize::Single,
                    rd,
                    rn,
                })
            }
            0b000101 if size == FpSize::Single => {
                return Some(Instruction::FpConvert {
                    from: size,
                    to: FpSize::Double,
                    rd,
                    rn,
                })
            }
            0b001000 | 0b001110 | 0b001111 => FpUnaryOp::Round(FpRounding::TiesEven),
            0b001001 => FpUnaryOp::Round(FpRounding::PlusInfinity),
            0b001010 => FpUnaryOp::Round(FpRounding::MinusInfinity),
            0b001011 => FpUnaryOp::Round(FpRounding::Zero),
            0b001100 => FpUnaryOp::Round(FpRounding::TiesAway),
            _ => return None,
        };
        return Some(Instruction::FpUnary { size, op, rd, rn });
    }

    if bits(word, 13, 10) == 0b1000 && bits(word, 15, 14) == 0 {
        if bits(word, 2, 0) != 0 {
            return None;
        }
        let rm = if bit(word, 3) { None } else { Some(rm) };
        return Some(Instruction::FpCompare { size, rn, rm });
    }

    if bits(word, 12, 10) == 0b100 {
        if bits(word, 9, 5) != 0 {
            return None;
        }
        return Some(Instruction::FpImm {
            size,
            rd,
            value: expand_fp_imm(bits(word, 20, 13)),
        });
    }

    match bits(word, 11, 10) {
        0b01 => Some(Instruction::FpCondCompare {
            size,
            rn,
            rm,
            nzcv: bits(word, 3, 0) as u8,
            cond: bits(word, 15, 12) as u8,
        }),
        0b10 => {
            let op = match bits(word, 15, 12) {
                0 => FpBinaryOp::Mul,
                1 => FpBinaryOp::Div,
                2 => FpBinaryOp::Add,
                3 => FpBinaryOp::Sub,
                4 => FpBinaryOp::Max,
                5 => FpBinaryOp::Min,
                6 => FpBinaryOp::MaxNm,
                7 => FpBinaryOp::MinNm,
                8 => FpBinaryOp::Nmul,
                _ => return None,
            };
            Some(Instruction::FpBinary {
                size,
                op,
                rd,
                rn,
                rm,
            })
        }
        0b11 => Some(Instruction::FpCondSelect {
            size,
            rd,
            rn,
            rm,
            cond: bits(word, 15, 12) as u8,
        }),
        _ => None,
    }
}

fn decode_fp_integer(word: u32, ftype: u32, rd: u8, rn: u8) -> Option<Instruction> {
    let sf = bit(word, 31);
    let rmode = bits(word, 20, 19);
    let opcode = bits(word, 18, 16);

    match (rmode, opcode) {
        (0, 2) | (0, 3) => Some(Instruction::IntToFp {
            sf,
            size: fp_size(ftype)?,
            signed: opcode == 2,
            rd,
            rn,
        }),
        (_, 0) | (_, 1) => Some(Instruction::FpToInt {
            sf,
            size: fp_size(ftype)?,
            signed: opcode == 0,
            rounding: match rmode {
                0 => FpRounding::TiesEven,
                1 => FpRounding::PlusInfinity,
                2 => FpRounding::MinusInfinity,
                _ => FpRounding::Zero,
            },
            rd,
            rn,
        }),
        (0, 4) | (0, 5) => Some(Instruction::FpToInt {
            sf,
            size: fp_size(ftype)?,
            signed: opcode == 4,
            rounding: FpRounding::TiesAway,
            rd,
            rn,
        }),
        (0, 6) | (0, 7) => {
            if (sf && ftype != 1) || (!sf && ftype != 0) {
                return None;
            }
            Some(Instruction::FpMoveGeneral {
                to_vector: opcode == 7,
                sf,
                top: false,
                rd,
                rn,
            })
        }
        (1, 6) | (1, 7) if sf && ftype == 2 => Some(Instruction::FpMoveGeneral {
            to_vector: opcode == 7,
            sf,
            top: true,
            rd,
            rn,
        }),
        _ => None,
    }
}

fn decode_advanced_simd(word: u32) -> Option<Instruction> {
    let q = bit(word, 30);
    let u = bit(word, 29);
    let rd = reg(word, 0);
    let rn = reg(word, 5);
    let rm = reg(word, 16);

    // Shift by immediate and modified immediate
    if word & 0x9F80_0400 == 0x0F00_0400 {
        let immh = bits(word, 22, 19);
        if immh == 0 {
            if bit(word, 11) {
                return None;
            }
            let cmode = bits(word, 15, 12);
            let imm8 = (bits(word, 18, 16) << 5) | bits(word, 9, 5);
            if cmode == 0b1111 && u && !q {
                return None;
            }
            let op = if cmode >= 0b1110 {
                VectorImmOp::Movi
            } else if cmode & 1 == 0 || cmode >> 2 == 0b11 {
                if u {
                    VectorImmOp::Mvni
                } else {
                    VectorImmOp::Movi
                }
            } else if u {
                VectorImmOp::Bic
            } else {
                VectorImmOp::Orr
            };
            return Some(Instruction::VectorImm {
                q,
                op,
                rd,
                imm: expand_simd_imm(u, cmode, imm8),
            });
        }

        let highest = 31 - immh.leading_zeros();
        let esize_bits = 8u32 << highest;
        if highest == 3 && !q {
            return None;
        }
        let immhb = (immh << 3) | bits(word, 18, 16);
        let (op, shift) = match (bits(word, 15, 11), u) {
            (0b00000, false) => (VectorShiftOp::Sshr, 2 * esize_bits - immhb),
            (0b00000, true) => (VectorShiftOp::Ushr, 2 * esize_bits - immhb),
            (0b01010, false) => (VectorShiftOp::Shl, immhb - esize_bits),
            _ => return None,
        };
        return Some(Instruction::VectorShift {
            q,
            op,
            esize: (esize_bits / 8) as u8,
            shift: shift as u8,
            rd,
            rn,
        });
    }

    // Copy: DUP, INS, UMOV, SMOV
    if word & 0x9FE0_8400 == 0x0E00_0400 {
        let imm5 = bits(word, 20, 16);
        let imm4 = bits(word, 14, 11);
        let size = imm5.trailing_zeros();
        if size > 3 {
            return None;
        }
        let esize = 1u8 << size;
        let index = (imm5 >> (size + 1)) as u8;
        return match (u, imm4) {
            (false, 0b0000) if size < 3 || q => Some(Instruction::DupElement {
                q,
                scalar: false,
                esize,
                rd,
                rn,
                index,
            }),
            (false, 0b0001) if size < 3 || q => Some(Instruction::DupGeneral { q, esize, rd, rn }),
            (false, 0b0011) if q => Some(Instruction::InsGeneral {
                esize,
                rd,
                index,
                rn,
            }),
            (false, 0b0101) if size < 2 || (q && size == 2) => Some(Instruction::MoveElement {
                signed: true,
                sf: q,
                esize,
                rd,
                rn,
                index,
            }),
            (false, 0b0111) if (q && size == 3) || (!q && size < 3) => {
                Some(Instruction::MoveElement {
                    signed: false,
                    sf: q,
                    esize,
                    rd,
                    rn,
                    index,
                })
            }
            (true, _) if q => Some(Instruction::InsElement {
                esize,
                rd,
                dst_index: index,
                rn,
                src_index: (imm4 >> size) as u8,
            }),
            _ => None,
        };
    }

    // Scalar DUP (element), also written MOV Sd, Vn.S[i]
    if word & 0xFFE0_FC00 == 0x5E00_0400 {
        let imm5 = bits(word, 20, 16);
        let size = imm5.trailing_zeros();
        if size > 3 {
            return None;
        }
        return Some(Instruction::DupElement {
            q: false,
            scalar: true,
            esize: 1u8 << size,
            rd,
            rn,
            index: (imm5 >> (size + 1)) as u8,
        });
    }

    // Three same
    if word & 0x9F20_0400 == 0x0E20_0400 {
        let size = bits(word, 23, 22);
        let opcode = bits(word, 15, 11);
        if opcode == 0b00011 {
            let op = match (u, size) {
                (false, 0) => VectorLogicOp::And,
                (false, 1) => VectorLogicOp::Bic,
                (false, 2) => VectorLogicOp::Orr,
                (false, _) => VectorLogicOp::Orn,
                (true, 0) => VectorLogicOp::Eor,
                (true, 1) => VectorLogicOp::Bsl,
                (true, 2) => VectorLogicOp::Bit,
                (true, _) => VectorLogicOp::Bif,
            };
            return Some(Instruction::VectorLogic { q, op, rd, rn, rm });
        }
        if size == 3 && !q {
            return None;
        }
        let op = match (opcode, u) {
            (0b10000, false) => VectorArithOp::Add,
            (0b10000, true) => VectorArithOp::Sub,
            (0b10001, false) => VectorArithOp::Cmtst,
            (0b10001, true) => VectorArithOp::Cmeq,
            (0b00110, false) => VectorArithOp::Cmgt,
            (0b00110, true) => VectorArithOp::Cmhi,
            (0b00111, false) => VectorArithOp::Cmge,
            (0b00111, true) => VectorArithOp::Cmhs,
            (0b10011, false) if size != 3 => VectorArithOp::Mul,
            _ => return None,
        };
        return Some(Instruction::VectorArith {
            q,
            op,
            esize: 1u8 << size,
            rd,
            rn,
            rm,
        });
    }

    // Two-register miscellaneous and across lanes
    if word & 0x9F3E_0C00 == 0x0E20_0800 || word & 0x9F3E_0C00 == 0x0E30_0800 {
        let across = bit(word, 20);
        let size = bits(word, 23, 22);
        let opcode = bits(word, 16, 12);
        let op = match (across, u, opcode, size) {
            (false, true, 0b00101, 0) => VectorUnaryOp::Not,
            (false, false, 0b00101, 0) => VectorUnaryOp::Cnt,
            (false, false, 0b00000, s) if s < 3 => VectorUnaryOp::Rev64,
            (false, false, 0b01001, s) if s < 3 || q => VectorUnaryOp::Cmeq0,
            (true, false, 0b11011, s) if s < 2 || (s == 2 && q) => VectorUnaryOp::Addv,
            (true, true, 0b00011, s) if s < 2 || (s == 2 && q) => VectorUnaryOp::Uaddlv,
            _ => return None,
        };
        return Some(Instruction::VectorUnary {
            q,
            op,
            esize: 1u8 << size,
            rd,
            rn,
        });
    }

    // EXT
    if word & 0xBFE0_8400 == 0x2E00_0000 {
        let index = bits(word, 14, 11);
        if !q && index >= 8 {
            return None;
        }
        return Some(Instruction::VectorExtract {
            q,
            rd,
            rn,
            rm,
            index: index as u8,
        });
    }

    None
}
