//! Decoding of trailing call arguments.
//!
//! JNI's `Call*Method` families and the printf family receive a variable
//! number of arguments in one of three AAPCS64 forms:
//!
//! - **variadic**: the remaining `x` registers for integers and pointers, the
//!   `v` registers for floating point, then 8-byte stack slots;
//! - **`va_list`**: a pointer to `{ __stack, __gr_top, __vr_top, __gr_offs, __vr_offs }`;
//! - **`jvalue[]`**: a pointer to an array of 8-byte unions.
//!
//! Variadic and `va_list` arguments follow C promotion rules: `float` arrives as
//! `double` and the small integer types as `int`.

use crate::emulation::{
    runtime::{
        descriptor::{PrimitiveKind, TypeDescriptor},
        objects::JavaValue,
    },
    AddressSpace, Cpu, MemoryFault,
};

/// Number of argument registers per bank.
const ARG_REGISTERS: u8 = 8;

/// Size of one saved `v` register in the `va_list` register save area.
const VR_SLOT: i32 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Source {
    Registers {
        next_gpr: u8,
        next_fpr: u8,
        stack: u64,
    },
    VaList {
        stack: u64,
        gr_top: u64,
        vr_top: u64,
        gr_offs: i32,
        vr_offs: i32,
    },
    Values {
        next: u64,
    },
}

/// Sequential reader over one of the three argument forms.
pub struct ArgReader<'a> {
    cpu: &'a Cpu,
    memory: &'a AddressSpace,
    source: Source,
}

impl<'a> ArgReader<'a> {
    /// Reads variadic arguments, starting at general register `first_gpr` and
    /// floating-point register 0.
    #[must_use]
    pub fn variadic(cpu: &'a Cpu, memory: &'a AddressSpace, first_gpr: u8) -> Self {
        ArgReader {
            cpu,
            memory,
            source: Source::Registers {
                next_gpr: first_gpr,
                next_fpr: 0,
                stack: cpu.sp,
            },
        }
    }

    /// Reads arguments through the `va_list` at `address`.
    ///
    /// # Errors
    ///
    /// Fails if the `va_list` structure is not readable.
    pub fn va_list(cpu: &'a Cpu, memory: &'a AddressSpace, address: u64) -> Result<Self, MemoryFault> {
        let source = Source::VaList {
            stack: memory.read_u64(address)?,
            gr_top: memory.read_u64(address + 8)?,
            vr_top: memory.read_u64(address + 16)?,
            gr_offs: memory.read_u32(address + 24)? as i32,
            vr_offs: memory.read_u32(address + 28)? as i32,
        };
        Ok(ArgReader { cpu, memory, source })
    }

    /// Reads a `jvalue[]` starting at `address`.
    #[must_use]
    pub fn values(cpu: &'a Cpu, memory: &'a AddressSpace, address: u64) -> Self {
        ArgReader {
            cpu,
            memory,
            source: Source::Values { next: address },
        }
    }

    /// Reads the next integer or pointer argument.
    ///
    /// # Errors
    ///
    /// Fails if a stack slot or array element is not readable.
    pub fn next_int(&mut self) -> Result<u64, MemoryFault> {
        match &mut self.source {
            Source::Registers {
                next_gpr, stack, ..
            } => {
                if *next_gpr < ARG_REGISTERS {
                    let value = self.cpu.x(*next_gpr);
                    *next_gpr += 1;
                    Ok(value)
                } else {
                    let value = self.memory.read_u64(*stack)?;
                    *stack += 8;
                    Ok(value)
                }
            }
            Source::VaList {
                stack,
                gr_top,
                gr_offs,
                ..
            } => {
                if *gr_offs < 0 {
                    let address = gr_top.wrapping_add(*gr_offs as i64 as u64);
                    *gr_offs += 8;
                    self.memory.read_u64(address)
                } else {
                    let value = self.memory.read_u64(*stack)?;
                    *stack += 8;
                    Ok(value)
                }
            }
            Source::Values { next } => {
                let value = self.memory.read_u64(*next)?;
                *next += 8;
                Ok(value)
            }
        }
    }

    /// Reads the next floating-point argument as raw bits.
    ///
    /// For variadic and `va_list` sources the bits are those of a `double`; for
    /// `jvalue[]` they are the whole 8-byte slot.
    fn next_fp_bits(&mut self) -> Result<u64, MemoryFault> {
        match &mut self.source {
            Source::Registers {
                next_fpr, stack, ..
            } => {
                if *next_fpr < ARG_REGISTERS {
                    let value = self.cpu.v(*next_fpr) as u64;
                    *next_fpr += 1;
                    Ok(value)
                } else {
                    let value = self.memory.read_u64(*stack)?;
                    *stack += 8;
                    Ok(value)
                }
            }
            Source::VaList {
                stack,
                vr_top,
                vr_offs,
                ..
            } => {
                if *vr_offs < 0 {
                    let address = vr_top.wrapping_add(*vr_offs as i64 as u64);
                    *vr_offs += VR_SLOT;
                    self.memory.read_u64(address)
                } else {
                    let value = self.memory.read_u64(*stack)?;
                    *stack += 8;
                    Ok(value)
                }
            }
            Source::Values { next } => {
                let value = self.memory.read_u64(*next)?;
                *next += 8;
                Ok(value)
            }
        }
    }

    /// Reads the next `double` argument.
    ///
    /// # Errors
    ///
    /// Fails if a stack slot or array element is not readable.
    pub fn next_double(&mut self) -> Result<f64, MemoryFault> {
        Ok(f64::from_bits(self.next_fp_bits()?))
    }

    /// Reads the next argument of Java type `ty`.
    ///
    /// # Errors
    ///
    /// Fails if a stack slot or array element is not readable.
    pub fn next_value(&mut self, ty: &TypeDescriptor) -> Result<JavaValue, MemoryFault> {
        let is_array = matches!(self.source, Source::Values { .. });
        match ty {
            TypeDescriptor::Void => Ok(JavaValue::Void),
            TypeDescriptor::Primitive(kind) if kind.is_floating() => {
                let bits = self.next_fp_bits()?;
                Ok(match kind {
                    PrimitiveKind::Float if !is_array => {
                        JavaValue::Float(f64::from_bits(bits) as f32)
                    }
                    _ => JavaValue::from_bits(*kind, bits),
                })
            }
            other => Ok(JavaValue::from_raw(other, self.next_int()?)),
        }
    }

    /// Reads one argument per type in `params`.
    ///
    /// # Errors
    ///
    /// Fails if a stack slot or array element is not readable.
    pub fn read_all(&mut self, params: &[TypeDescriptor]) -> Result<Vec<JavaValue>, MemoryFault> {
        params.iter().map(|ty| self.next_value(ty)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation::{
        runtime::descriptor::MethodDescriptor, runtime::objects::Handle, MemoryProtection,
        RegionKind,
    };

    const DATA: u64 = 0x10_0000;

    fn memory() -> AddressSpace {
        let mut memory = AddressSpace::new();
        memory
            .map_at(DATA, 0x1000, MemoryProtection::READ_WRITE, RegionKind::Mapped, "args")
            .unwrap();
        memory
    }

    #[test]
    fn test_variadic_registers_then_stack() {
        let mut memory = memory();
        let mut cpu = Cpu::new();
        for n in 3..8 {
            cpu.set_x(n, u64::from(n) * 10);
        }
        cpu.set_d(0, 2.5);
        cpu.sp = DATA;
        memory.write_u64(DATA, 99).unwrap();

        let descriptor = MethodDescriptor::parse("(IIDIIIJ)V").unwrap();
        let mut reader = ArgReader::variadic(&cpu, &memory, 3);
        let values = reader.read_all(&descriptor.params).unwrap();
        assert_eq!(
            values,
            vec![
                JavaValue::Int(30),
                JavaValue::Int(40),
                JavaValue::Double(2.5),
                JavaValue::Int(50),
                JavaValue::Int(60),
                JavaValue::Int(70),
                JavaValue::Long(99),
            ]
        );
    }

    #[test]
    fn test_variadic_float_is_promoted() {
        let memory = memory();
        let mut cpu = Cpu::new();
        cpu.set_d(0, 1.25);
        let mut reader = ArgReader::variadic(&cpu, &memory, 3);
        assert_eq!(
            reader.next_value(&TypeDescriptor::parse("F").unwrap()).unwrap(),
            JavaValue::Float(1.25)
        );
    }

    #[test]
    fn test_jvalue_array() {
        let mut memory = memory();
        let cpu = Cpu::new();
        memory.write_u64(DATA, 7).unwrap();
        memory.write_u32(DATA + 8, 0.5f32.to_bits()).unwrap();
        memory.write_u64(DATA + 16, u64::MAX).unwrap();

        let descriptor = MethodDescriptor::parse("(Ljava/lang/String;FB)V").unwrap();
        let values = ArgReader::values(&cpu, &memory, DATA)
            .read_all(&descriptor.params)
            .unwrap();
        assert_eq!(
            values,
            vec![
                JavaValue::Object(Handle::new(7)),
                JavaValue::Float(0.5),
                JavaValue::Byte(-1),
            ]
        );
    }

    #[test]
    fn test_va_list_register_save_areas() {
        let mut memory = memory();
        let cpu = Cpu::new();
        // Save areas: one general register left, one vector register left
        let gr_top = DATA + 0x100;
        let vr_top = DATA + 0x200;
        let stack = DATA + 0x300;
        memory.write_u64(gr_top - 8, 11).unwrap();
        memory.write_u64(vr_top - 16, 3.5f64.to_bits()).unwrap();
        memory.write_u64(stack, 22).unwrap();
        memory.write_u64(stack + 8, 33).unwrap();

        let list = DATA + 0x400;
        memory.write_u64(list, stack).unwrap();
        memory.write_u64(list + 8, gr_top).unwrap();
        memory.write_u64(list + 16, vr_top).unwrap();
        memory.write_u32(list + 24, (-8i32) as u32).unwrap();
        memory.write_u32(list + 28, (-16i32) as u32).unwrap();

        let mut reader = ArgReader::va_list(&cpu, &memory, list).unwrap();
        assert_eq!(reader.next_int().unwrap(), 11);
        assert_eq!(reader.next_double().unwrap(), 3.5);
        assert_eq!(reader.next_int().unwrap(), 22);
        assert_eq!(reader.next_int().unwrap(), 33);
    }
}
