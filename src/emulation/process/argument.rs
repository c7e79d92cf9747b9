//! Host-side arguments for guest calls.
//!
//! [`Argument`] values are marshalled following AAPCS64: integers and pointers
//! fill `x0`-`x7`, floating-point values fill `v0`-`v7`, and whatever does not
//! fit is spilled to 8-byte stack slots in declaration order. Strings and byte
//! buffers are copied into the guest heap first and passed by address.

use crate::{
    emulation::{
        memory::AddressSpace,
        runtime::{JavaValue, RuntimeState},
        Cpu,
    },
    Result,
};

/// Number of argument registers of each class.
const ARGUMENT_REGISTERS: usize = 8;

/// One argument of [`Session::invoke`](super::Session::invoke).
#[derive(Clone, Debug, PartialEq)]
pub enum Argument {
    /// An integer, passed in a general-purpose register.
    Int(u64),
    /// A guest address.
    Pointer(u64),
    /// A single-precision value in `s<n>`.
    Float(f32),
    /// A double-precision value in `d<n>`.
    Double(f64),
    /// A string copied to the guest heap with a NUL terminator.
    Str(String),
    /// Bytes copied to the guest heap.
    Bytes(Vec<u8>),
}

impl From<u64> for Argument {
    fn from(value: u64) -> Self {
        Argument::Int(value)
    }
}

impl From<i32> for Argument {
    fn from(value: i32) -> Self {
        Argument::Int(value as i64 as u64)
    }
}

impl From<f64> for Argument {
    fn from(value: f64) -> Self {
        Argument::Double(value)
    }
}

impl From<&str> for Argument {
    fn from(value: &str) -> Self {
        Argument::Str(value.to_string())
    }
}

impl From<JavaValue> for Argument {
    /// References become pointers; `float` and `double` go to vector registers.
    fn from(value: JavaValue) -> Self {
        match value {
            JavaValue::Float(v) => Argument::Float(v),
            JavaValue::Double(v) => Argument::Double(v),
            other => Argument::Int(other.to_bits()),
        }
    }
}

/// Guest buffers allocated while marshalling, released after the call.
#[derive(Debug, Default)]
pub(crate) struct Marshalled {
    pub buffers: Vec<u64>,
}

/// Writes `args` into `cpu` and the stack below `cpu.sp`, adjusting `sp` for
/// spilled values.
pub(crate) fn marshal(
    args: &[Argument],
    cpu: &mut Cpu,
    memory: &mut AddressSpace,
    runtime: &mut RuntimeState,
) -> Result<Marshalled> {
    let mut marshalled = Marshalled::default();
    let mut next_x = 0usize;
    let mut next_v = 0usize;
    let mut spilled: Vec<u64> = Vec::new();

    for argument in args {
        let (bits, vector) = match argument {
            Argument::Int(value) | Argument::Pointer(value) => (*value, false),
            Argument::Float(value) => (u64::from(value.to_bits()), true),
            Argument::Double(value) => (value.to_bits(), true),
            Argument::Str(text) => {
                let address = runtime.heap_mut().alloc(text.len() + 1)?;
                memory.write_cstring(address, text.as_bytes())?;
                marshalled.buffers.push(address);
                (address, false)
            }
            Argument::Bytes(bytes) => {
                let address = runtime.heap_mut().alloc(bytes.len().max(1))?;
                memory.write(address, bytes)?;
                marshalled.buffers.push(address);
                (address, false)
            }
        };

        if vector && next_v < ARGUMENT_REGISTERS {
            match argument {
                Argument::Float(value) => cpu.set_s(next_v as u8, *value),
                _ => cpu.set_d(next_v as u8, f64::from_bits(bits)),
            }
            next_v += 1;
        } else if !vector && next_x < ARGUMENT_REGISTERS {
            cpu.set_x(next_x as u8, bits);
            next_x += 1;
        } else {
            spilled.push(bits);
        }
    }

    if !spilled.is_empty() {
        let size = (spilled.len() as u64 * 8 + 15) & !15;
        cpu.sp -= size;
        for (index, bits) in spilled.iter().enumerate() {
            memory.write(cpu.sp + index as u64 * 8, &bits.to_le_bytes())?;
        }
    }
    Ok(marshalled)
}

/// Frees the heap copies made by [`marshal`].
pub(crate) fn release(marshalled: Marshalled, runtime: &mut RuntimeState) {
    for address in marshalled.buffers {
        if let Err(error) = runtime.heap_mut().free(address) {
            log::debug!("argument buffer {address:#x} not released: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::emulation::{
        runtime::{DispatchTable, StubTable},
        EmulationConfig, MemoryProtection, RegionKind,
    };

    fn setup() -> (Cpu, AddressSpace, RuntimeState) {
        let config = EmulationConfig::testing();
        let mut memory = AddressSpace::new();
        let runtime = RuntimeState::new(
            &config,
            Arc::new(StubTable::standard()),
            Arc::new(DispatchTable::empty()),
            &mut memory,
        )
        .unwrap();
        memory
            .map_at(
                config.memory.stack_base,
                config.memory.stack_size,
                MemoryProtection::READ_WRITE,
                RegionKind::Stack,
                "stack",
            )
            .unwrap();
        let mut cpu = Cpu::new();
        cpu.sp = config.memory.stack_top();
        (cpu, memory, runtime)
    }

    #[test]
    fn test_registers_by_class() {
        let (mut cpu, mut memory, mut runtime) = setup();
        let args = [
            Argument::Int(1),
            Argument::Double(2.5),
            Argument::Pointer(0x1000),
            Argument::Float(1.5),
        ];
        marshal(&args, &mut cpu, &mut memory, &mut runtime).unwrap();
        assert_eq!(cpu.x(0), 1);
        assert_eq!(cpu.x(1), 0x1000);
        assert_eq!(cpu.d(0), 2.5);
        assert_eq!(cpu.s(1), 1.5);
    }

    #[test]
    fn test_spills_to_stack() {
        let (mut cpu, mut memory, mut runtime) = setup();
        let top = cpu.sp;
        let args: Vec<Argument> = (0..11).map(Argument::Int).collect();
        marshal(&args, &mut cpu, &mut memory, &mut runtime).unwrap();
        assert_eq!(cpu.x(7), 7);
        assert_eq!(cpu.sp, top - 32);
        assert_eq!(memory.read_u64(cpu.sp).unwrap(), 8);
        assert_eq!(memory.read_u64(cpu.sp + 8).unwrap(), 9);
        assert_eq!(memory.read_u64(cpu.sp + 16).unwrap(), 10);
    }

    #[test]
    fn test_strings_are_copied_and_released() {
        let (mut cpu, mut memory, mut runtime) = setup();
        let marshalled = marshal(
            &[Argument::from("device"), Argument::Bytes(vec![1, 2, 3])],
            &mut cpu,
            &mut memory,
            &mut runtime,
        )
        .unwrap();
        assert_eq!(memory.read_cstring(cpu.x(0), 64).unwrap(), b"device");
        assert_eq!(memory.read_bytes(cpu.x(1), 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(runtime.heap().allocation_count(), 2);
        release(marshalled, &mut runtime);
        assert_eq!(runtime.heap().allocation_count(), 0);
    }

    #[test]
    fn test_java_values_convert() {
        assert_eq!(Argument::from(JavaValue::Int(-1)), Argument::Int(u64::MAX));
        assert_eq!(Argument::from(JavaValue::Double(1.0)), Argument::Double(1.0));
    }
}
