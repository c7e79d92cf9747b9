//! Load/store handlers.
//!
//! All guest accesses go through the checked [`AddressSpace`] accessors, so a
//! missing mapping or a permission violation surfaces as a memory fault with the
//! faulting address. Stores validate the whole range before writing anything.
//!
//! Exclusive monitors are not modelled: the guest runs single-threaded, so every
//! store-exclusive succeeds.

use crate::emulation::{
    engine::{
        cpu::Cpu,
        error::MemoryFault,
        instruction::{AddrMode, AtomicOp, Instruction, RegBank, SimdPostIndex},
        interpreter::Interpreter,
    },
    memory::AddressSpace,
};

/// Sign-extends the low `bytes` bytes of `value`.
fn sign_extend_bytes(value: u64, bytes: u8) -> u64 {
    let shift = 64 - u32::from(bytes) * 8;
    (((value << shift) as i64) >> shift) as u64
}

fn size_mask(bytes: u8) -> u64 {
    if bytes >= 8 {
        u64::MAX
    } else {
        (1u64 << (u32::from(bytes) * 8)) - 1
    }
}

/// Resolved effective address plus the base register update, if any.
struct Access {
    address: u64,
    writeback: Option<(u8, u64)>,
}

fn resolve(cpu: &Cpu, mode: AddrMode) -> Access {
    match mode {
        AddrMode::Offset { rn, offset } => Access {
            address: cpu.x_or_sp(rn).wrapping_add_signed(offset),
            writeback: None,
        },
        AddrMode::PreIndex { rn, offset } => {
            let address = cpu.x_or_sp(rn).wrapping_add_signed(offset);
            Access {
                address,
                writeback: Some((rn, address)),
            }
        }
        AddrMode::PostIndex { rn, offset } => {
            let base = cpu.x_or_sp(rn);
            Access {
                address: base,
                writeback: Some((rn, base.wrapping_add_signed(offset))),
            }
        }
        AddrMode::Register {
            rn,
            rm,
            extend,
            shift,
        } => Access {
            address: cpu.x_or_sp(rn).wrapping_add(extend.apply(cpu.x(rm), shift)),
            writeback: None,
        },
        AddrMode::Literal { offset } => Access {
            address: cpu.pc.wrapping_add_signed(offset),
            writeback: None,
        },
    }
}

fn load_vector(memory: &AddressSpace, address: u64, size: u8) -> Result<u128, MemoryFault> {
    if size == 16 {
        memory.read_u128(address)
    } else {
        memory
            .read_sized(address, usize::from(size))
            .map(u128::from)
    }
}

fn store_vector(
    memory: &mut AddressSpace,
    address: u64,
    size: u8,
    value: u128,
) -> Result<(), MemoryFault> {
    if size == 16 {
        memory.write_u128(address, value)
    } else {
        memory.write_sized(address, usize::from(size), value as u64)
    }
}

fn load_general(
    memory: &AddressSpace,
    address: u64,
    size: u8,
    signed: bool,
    wide: bool,
) -> Result<u64, MemoryFault> {
    let raw = memory.read_sized(address, usize::from(size))?;
    Ok(if signed {
        let extended = sign_extend_bytes(raw, size);
        if wide {
            extended
        } else {
            extended & 0xFFFF_FFFF
        }
    } else {
        raw
    })
}

fn atomic_result(op: AtomicOp, old: u64, operand: u64, size: u8) -> u64 {
    let signed_old = sign_extend_bytes(old, size) as i64;
    let signed_operand = sign_extend_bytes(operand, size) as i64;
    let result = match op {
        AtomicOp::Add => old.wrapping_add(operand),
        AtomicOp::Clr => old & !operand,
        AtomicOp::Eor => old ^ operand,
        AtomicOp::Set => old | operand,
        AtomicOp::Smax => {
            if signed_old >= signed_operand {
                old
            } else {
                operand
            }
        }
        AtomicOp::Smin => {
            if signed_old <= signed_operand {
                old
            } else {
                operand
            }
        }
        AtomicOp::Umax => old.max(operand),
        AtomicOp::Umin => old.min(operand),
        AtomicOp::Swp => operand,
    };
    result & size_mask(size)
}

impl Interpreter {
    /// Executes a load/store instruction.
    ///
    /// # Errors
    ///
    /// Returns the first [`MemoryFault`] hit; registers are left untouched in that case.
    pub(super) fn execute_memory(
        cpu: &mut Cpu,
        memory: &mut AddressSpace,
        instruction: &Instruction,
    ) -> Result<(), MemoryFault> {
        match *instruction {
            Instruction::LoadStore {
                load,
                size,
                signed,
                wide,
                bank,
                rt,
                mode,
            } => {
                let access = resolve(cpu, mode);
                match (bank, load) {
                    (RegBank::General, true) => {
                        let value = load_general(memory, access.address, size, signed, wide)?;
                        cpu.set_x(rt, value);
                    }
                    (RegBank::General, false) => {
                        memory.write_sized(access.address, usize::from(size), cpu.x(rt))?;
                    }
                    (RegBank::Vector, true) => {
                        let value = load_vector(memory, access.address, size)?;
                        cpu.set_v_scalar(rt, usize::from(size), value);
                    }
                    (RegBank::Vector, false) => {
                        store_vector(memory, access.address, size, cpu.v(rt))?;
                    }
                }
                if let Some((rn, value)) = access.writeback {
                    cpu.set_x_or_sp(rn, value);
                }
            }
            Instruction::LoadStorePair {
                load,
                size,
                signed,
                bank,
                rt,
                rt2,
                mode,
            } => {
                let access = resolve(cpu, mode);
                let second = access.address.wrapping_add(u64::from(size));
                match (bank, load) {
                    (RegBank::General, true) => {
                        let first = load_general(memory, access.address, size, signed, true)?;
                        let other = load_general(memory, second, size, signed, true)?;
                        cpu.set_x(rt, first);
                        cpu.set_x(rt2, other);
                    }
                    (RegBank::General, false) => {
                        let mut bytes = Vec::with_capacity(usize::from(size) * 2);
                        bytes.extend_from_slice(&cpu.x(rt).to_le_bytes()[..usize::from(size)]);
                        bytes.extend_from_slice(&cpu.x(rt2).to_le_bytes()[..usize::from(size)]);
                        memory.write(access.address, &bytes)?;
                    }
                    (RegBank::Vector, true) => {
                        let first = load_vector(memory, access.address, size)?;
                        let other = load_vector(memory, second, size)?;
                        cpu.set_v_scalar(rt, usize::from(size), first);
                        cpu.set_v_scalar(rt2, usize::from(size), other);
                    }
                    (RegBank::Vector, false) => {
                        let mut bytes = Vec::with_capacity(usize::from(size) * 2);
                        bytes.extend_from_slice(&cpu.v(rt).to_le_bytes()[..usize::from(size)]);
                        bytes.extend_from_slice(&cpu.v(rt2).to_le_bytes()[..usize::from(size)]);
                        memory.write(access.address, &bytes)?;
                    }
                }
                if let Some((rn, value)) = access.writeback {
                    cpu.set_x_or_sp(rn, value);
                }
            }
            Instruction::LoadExclusive {
                size,
                pair,
                rt,
                rt2,
                rn,
            } => {
                let address = cpu.x_or_sp(rn);
                let first = memory.read_sized(address, usize::from(size))?;
                if pair {
                    let other =
                        memory.read_sized(address.wrapping_add(u64::from(size)), usize::from(size))?;
                    cpu.set_x(rt2, other);
                }
                cpu.set_x(rt, first);
            }
            Instruction::StoreExclusive {
                size,
                pair,
                rs,
                rt,
                rt2,
                rn,
            } => {
                let address = cpu.x_or_sp(rn);
                if pair {
                    let mut bytes = Vec::with_capacity(usize::from(size) * 2);
                    bytes.extend_from_slice(&cpu.x(rt).to_le_bytes()[..usize::from(size)]);
                    bytes.extend_from_slice(&cpu.x(rt2).to_le_bytes()[..usize::from(size)]);
                    memory.write(address, &bytes)?;
                } else {
                    memory.write_sized(address, usize::from(size), cpu.x(rt))?;
                }
                cpu.set_reg(rs, false, 0);
            }
            Instruction::CompareSwap { size, rs, rt, rn } => {
                let address = cpu.x_or_sp(rn);
                let old = memory.read_sized(address, usize::from(size))?;
                if old == cpu.x(rs) & size_mask(size) {
                    memory.write_sized(address, usize::from(size), cpu.x(rt))?;
                }
                cpu.set_x(rs, old);
            }
            Instruction::Atomic {
                op,
                size,
                rs,
                rt,
                rn,
            } => {
                let address = cpu.x_or_sp(rn);
                let old = memory.read_sized(address, usize::from(size))?;
                let new = atomic_result(op, old, cpu.x(rs) & size_mask(size), size);
                memory.write_sized(address, usize::from(size), new)?;
                cpu.set_x(rt, old);
            }
            Instruction::SimdLoadStoreMultiple {
                load,
                q,
                count,
                rt,
                rn,
                post,
            } => {
                let base = cpu.x_or_sp(rn);
                let bytes: u8 = if q { 16 } else { 8 };
                for i in 0..count {
                    let register = (rt + i) % 32;
                    let address = base.wrapping_add(u64::from(i) * u64::from(bytes));
                    if load {
                        let value = load_vector(memory, address, bytes)?;
                        cpu.set_v_scalar(register, usize::from(bytes), value);
                    } else {
                        store_vector(memory, address, bytes, cpu.v(register))?;
                    }
                }
                match post {
                    SimdPostIndex::None => {}
                    SimdPostIndex::Immediate => {
                        let total = u64::from(count) * u64::from(bytes);
                        cpu.set_x_or_sp(rn, base.wrapping_add(total));
                    }
                    SimdPostIndex::Register(rm) => {
                        cpu.set_x_or_sp(rn, base.wrapping_add(cpu.x(rm)));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}
