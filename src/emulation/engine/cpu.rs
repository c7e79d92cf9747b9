//! AArch64 register file.
//!
//! [`Cpu`] holds the architectural state the interpreter mutates: 31 general
//! purpose registers, the stack pointer, the program counter, the `NZCV` flags,
//! 32 128-bit SIMD&FP registers, `FPCR`/`FPSR` and the thread pointer.
//!
//! Register number 31 names either `SP` or the zero register depending on the
//! instruction; the accessors make that choice explicit (`x` vs `x_or_sp`).

use std::fmt;

/// Condition flags (`PSTATE.NZCV`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Nzcv {
    /// Negative.
    pub n: bool,
    /// Zero.
    pub z: bool,
    /// Carry.
    pub c: bool,
    /// Overflow.
    pub v: bool,
}

impl Nzcv {
    /// Builds flags from a 4-bit `NZCV` nibble (bit 3 = N).
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        Nzcv {
            n: bits & 0b1000 != 0,
            z: bits & 0b0100 != 0,
            c: bits & 0b0010 != 0,
            v: bits & 0b0001 != 0,
        }
    }

    /// Returns the flags as a 4-bit nibble (bit 3 = N).
    #[must_use]
    pub fn bits(self) -> u8 {
        (u8::from(self.n) << 3) | (u8::from(self.z) << 2) | (u8::from(self.c) << 1) | u8::from(self.v)
    }

    /// Evaluates an A64 condition code against these flags.
    #[must_use]
    pub fn holds(self, cond: u8) -> bool {
        let result = match (cond >> 1) & 0b111 {
            0b000 => self.z,
            0b001 => self.c,
            0b010 => self.n,
            0b011 => self.v,
            0b100 => self.c && !self.z,
            0b101 => self.n == self.v,
            0b110 => self.n == self.v && !self.z,
            _ => true,
        };
        if cond & 1 == 1 && cond != 0b1111 {
            !result
        } else {
            result
        }
    }
}

/// The emulated AArch64 register file.
#[derive(Clone)]
pub struct Cpu {
    /// General purpose registers `x0`-`x30`.
    x: [u64; 31],
    /// Stack pointer.
    pub sp: u64,
    /// Program counter.
    pub pc: u64,
    /// Condition flags.
    pub nzcv: Nzcv,
    /// SIMD&FP registers `v0`-`v31`.
    v: [u128; 32],
    /// Floating-point control register.
    pub fpcr: u64,
    /// Floating-point status register.
    pub fpsr: u64,
    /// Thread pointer (`TPIDR_EL0`).
    pub tpidr_el0: u64,
}

impl Cpu {
    /// Creates a register file with every register zeroed.
    #[must_use]
    pub fn new() -> Self {
        Cpu {
            x: [0; 31],
            sp: 0,
            pc: 0,
            nzcv: Nzcv::default(),
            v: [0; 32],
            fpcr: 0,
            fpsr: 0,
            tpidr_el0: 0,
        }
    }

    /// Clears every register except the thread pointer.
    pub fn reset(&mut self) {
        let tpidr = self.tpidr_el0;
        *self = Cpu::new();
        self.tpidr_el0 = tpidr;
    }

    /// Reads `Xn`, where 31 is the zero register.
    #[must_use]
    #[inline]
    pub fn x(&self, n: u8) -> u64 {
        if n >= 31 {
            0
        } else {
            self.x[n as usize]
        }
    }

    /// Writes `Xn`, where writes to 31 are discarded.
    #[inline]
    pub fn set_x(&mut self, n: u8, value: u64) {
        if n < 31 {
            self.x[n as usize] = value;
        }
    }

    /// Reads `Xn`, where 31 is `SP`.
    #[must_use]
    #[inline]
    pub fn x_or_sp(&self, n: u8) -> u64 {
        if n >= 31 {
            self.sp
        } else {
            self.x[n as usize]
        }
    }

    /// Writes `Xn`, where 31 is `SP`.
    #[inline]
    pub fn set_x_or_sp(&mut self, n: u8, value: u64) {
        if n >= 31 {
            self.sp = value;
        } else {
            self.x[n as usize] = value;
        }
    }

    /// Reads a register at the given width (`sf` = 64-bit), zero register for 31.
    #[must_use]
    #[inline]
    pub fn reg(&self, n: u8, sf: bool) -> u64 {
        let value = self.x(n);
        if sf {
            value
        } else {
            value & 0xFFFF_FFFF
        }
    }

    /// Writes a register at the given width; 32-bit writes zero the upper half.
    #[inline]
    pub fn set_reg(&mut self, n: u8, sf: bool, value: u64) {
        self.set_x(n, if sf { value } else { value & 0xFFFF_FFFF });
    }

    /// Like [`Cpu::reg`] but 31 is `SP`.
    #[must_use]
    #[inline]
    pub fn reg_or_sp(&self, n: u8, sf: bool) -> u64 {
        let value = self.x_or_sp(n);
        if sf {
            value
        } else {
            value & 0xFFFF_FFFF
        }
    }

    /// Like [`Cpu::set_reg`] but 31 is `SP`.
    #[inline]
    pub fn set_reg_or_sp(&mut self, n: u8, sf: bool, value: u64) {
        self.set_x_or_sp(n, if sf { value } else { value & 0xFFFF_FFFF });
    }

    /// Returns the link register (`x30`).
    #[must_use]
    pub fn lr(&self) -> u64 {
        self.x[30]
    }

    /// Sets the link register (`x30`).
    pub fn set_lr(&mut self, value: u64) {
        self.x[30] = value;
    }

    /// Reads the full 128 bits of `Vn`.
    #[must_use]
    #[inline]
    pub fn v(&self, n: u8) -> u128 {
        self.v[(n & 31) as usize]
    }

    /// Writes the full 128 bits of `Vn`.
    #[inline]
    pub fn set_v(&mut self, n: u8, value: u128) {
        self.v[(n & 31) as usize] = value;
    }

    /// Writes the low `bytes` of `Vn` and clears the rest, as scalar writes do.
    #[inline]
    pub fn set_v_scalar(&mut self, n: u8, bytes: usize, value: u128) {
        let mask = if bytes >= 16 {
            u128::MAX
        } else {
            (1u128 << (bytes * 8)) - 1
        };
        self.set_v(n, value & mask);
    }

    /// Reads `Sn` as a single-precision float.
    #[must_use]
    pub fn s(&self, n: u8) -> f32 {
        f32::from_bits(self.v(n) as u32)
    }

    /// Writes `Sn`, clearing the upper bits of `Vn`.
    pub fn set_s(&mut self, n: u8, value: f32) {
        self.set_v(n, u128::from(value.to_bits()));
    }

    /// Reads `Dn` as a double-precision float.
    #[must_use]
    pub fn d(&self, n: u8) -> f64 {
        f64::from_bits(self.v(n) as u64)
    }

    /// Writes `Dn`, clearing the upper bits of `Vn`.
    pub fn set_d(&mut self, n: u8, value: f64) {
        self.set_v(n, u128::from(value.to_bits()));
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pc  {:#018x}  sp  {:#018x}  nzcv {:04b}", self.pc, self.sp, self.nzcv.bits())?;
        for row in 0..8 {
            for col in 0..4 {
                let n = row * 4 + col;
                if n < 31 {
                    write!(f, "x{n:<2} {:#018x}  ", self.x[n])?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// System register encodings (`op0:op1:CRn:CRm:op2`) understood by `MRS`/`MSR`.
pub mod sysreg {
    /// `MIDR_EL1`
    pub const MIDR_EL1: u16 = 0xC000;
    /// `CTR_EL0`
    pub const CTR_EL0: u16 = 0xD801;
    /// `DCZID_EL0`
    pub const DCZID_EL0: u16 = 0xD807;
    /// `NZCV`
    pub const NZCV: u16 = 0xDA10;
    /// `FPCR`
    pub const FPCR: u16 = 0xDA20;
    /// `FPSR`
    pub const FPSR: u16 = 0xDA21;
    /// `TPIDR_EL0`
    pub const TPIDR_EL0: u16 = 0xDE82;
    /// `TPIDRRO_EL0`
    pub const TPIDRRO_EL0: u16 = 0xDE83;
    /// `CNTFRQ_EL0`
    pub const CNTFRQ_EL0: u16 = 0xDF00;
    /// `CNTPCT_EL0`
    pub const CNTPCT_EL0: u16 = 0xDF01;
    /// `CNTVCT_EL0`
    pub const CNTVCT_EL0: u16 = 0xDF02;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_register() {
        let mut cpu = Cpu::new();
        cpu.set_x(31, 42);
        assert_eq!(cpu.x(31), 0);

        cpu.set_x_or_sp(31, 0x1000);
        assert_eq!(cpu.sp, 0x1000);
        assert_eq!(cpu.x_or_sp(31), 0x1000);
        assert_eq!(cpu.x(31), 0);
    }

    #[test]
    fn test_w_writes_zero_extend() {
        let mut cpu = Cpu::new();
        cpu.set_x(0, u64::MAX);
        cpu.set_reg(0, false, 0x1_2345_6789);
        assert_eq!(cpu.x(0), 0x2345_6789);
        assert_eq!(cpu.reg(0, false), 0x2345_6789);
    }

    #[test]
    fn test_scalar_fp_clears_upper_bits() {
        let mut cpu = Cpu::new();
        cpu.set_v(1, u128::MAX);
        cpu.set_s(1, 1.5);
        assert_eq!(cpu.v(1), u128::from(1.5f32.to_bits()));
        cpu.set_d(2, -2.0);
        assert_eq!(cpu.d(2), -2.0);
    }

    #[test]
    fn test_conditions() {
        let eq = Nzcv::from_bits(0b0100);
        assert!(eq.holds(0b0000)); // EQ
        assert!(!eq.holds(0b0001)); // NE
        assert!(eq.holds(0b1101)); // LE
        assert!(!eq.holds(0b1100)); // GT
        assert!(eq.holds(0b1110)); // AL
        assert!(eq.holds(0b1111)); // NV behaves as AL

        let lt = Nzcv::from_bits(0b1000);
        assert!(lt.holds(0b1011)); // LT
        assert!(!lt.holds(0b1010)); // GE

        let hi = Nzcv::from_bits(0b0010);
        assert!(hi.holds(0b1000)); // HI
        assert!(hi.holds(0b0010)); // CS
    }

    #[test]
    fn test_nzcv_bits_roundtrip() {
        for bits in 0..16u8 {
            assert_eq!(Nzcv::from_bits(bits).bits(), bits);
        }
    }

    #[test]
    fn test_reset_keeps_thread_pointer() {
        let mut cpu = Cpu::new();
        cpu.tpidr_el0 = 0x1234;
        cpu.set_x(3, 9);
        cpu.reset();
        assert_eq!(cpu.x(3), 0);
        assert_eq!(cpu.tpidr_el0, 0x1234);
    }
}
