//! A64 instruction encoding and assembly functionality.
//!
//! This module provides [`Assembler`], a small fluent assembler that turns AArch64
//! mnemonics into instruction words. It is the reverse counterpart of the emulator's
//! decoder and is used to produce guest code for synthetic images, tests and
//! benchmarks.
//!
//! # Architecture
//!
//! Every emitter validates its operands and appends exactly one 32-bit word (or a
//! short fixed sequence for pseudo-instructions such as [`Assembler::mov_imm`]).
//! Branches to named labels record a [`LabelFixup`]; labels may be defined before or
//! after they are used, and all fixups are resolved in [`Assembler::finalize`].
//!
//! # Key Components
//!
//! - [`Assembler`] - Instruction emission and label resolution
//! - [`Reg`] / [`VReg`] - General-purpose and SIMD&FP register operands
//! - [`Cond`] - Condition codes for `B.cond`, `CSEL` and friends
//! - [`LabelFixup`] - Pending label reference
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use droidemu::assembly::{x, Assembler, Cond};
//!
//! let mut asm = Assembler::new(0x1000);
//! asm.cmp_imm(x(0), 0)?
//!     .b_cond(Cond::Eq, "zero")?
//!     .mov_imm(x(0), 1)?
//!     .ret()?
//!     .label("zero")?
//!     .mov_imm(x(0), 2)?
//!     .ret()?;
//!
//! let (code, labels) = asm.finalize()?;
//! assert_eq!(code.len(), 24);
//! assert_eq!(labels["zero"], 0x1010);
//! # Ok::<(), droidemu::Error>(())
//! ```

use std::collections::HashMap;

use crate::{Error, Result};

/// A general-purpose register operand.
///
/// Register 31 is `SP` or `XZR`/`WZR` depending on the instruction, exactly as in
/// the architecture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reg {
    index: u8,
    wide: bool,
}

impl Reg {
    /// Register number (0-31).
    #[must_use]
    pub const fn index(self) -> u8 {
        self.index
    }

    /// Returns true for `X` registers.
    #[must_use]
    pub const fn is_wide(self) -> bool {
        self.wide
    }

    fn sf(self) -> u32 {
        u32::from(self.wide)
    }

    fn n(self) -> u32 {
        u32::from(self.index)
    }
}

/// Returns the 64-bit register `Xn`.
#[must_use]
pub const fn x(index: u8) -> Reg {
    Reg {
        index: index & 31,
        wide: true,
    }
}

/// Returns the 32-bit register `Wn`.
#[must_use]
pub const fn w(index: u8) -> Reg {
    Reg {
        index: index & 31,
        wide: false,
    }
}

/// The stack pointer.
pub const SP: Reg = x(31);
/// The 64-bit zero register.
pub const XZR: Reg = x(31);
/// The 32-bit zero register.
pub const WZR: Reg = w(31);
/// The link register.
pub const LR: Reg = x(30);
/// The frame pointer.
pub const FP: Reg = x(29);

/// A SIMD&FP register operand with its access size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VReg {
    index: u8,
    bytes: u8,
}

impl VReg {
    /// Register number (0-31).
    #[must_use]
    pub const fn index(self) -> u8 {
        self.index
    }

    /// Access size in bytes (1, 2, 4, 8 or 16).
    #[must_use]
    pub const fn bytes(self) -> u8 {
        self.bytes
    }

    fn n(self) -> u32 {
        u32::from(self.index)
    }
}

/// Returns the byte register `Bn`.
#[must_use]
pub const fn b(index: u8) -> VReg {
    VReg {
        index: index & 31,
        bytes: 1,
    }
}

/// Returns the half register `Hn`.
#[must_use]
pub const fn h(index: u8) -> VReg {
    VReg {
        index: index & 31,
        bytes: 2,
    }
}

/// Returns the single-precision register `Sn`.
#[must_use]
pub const fn s(index: u8) -> VReg {
    VReg {
        index: index & 31,
        bytes: 4,
    }
}

/// Returns the double-precision register `Dn`.
#[must_use]
pub const fn d(index: u8) -> VReg {
    VReg {
        index: index & 31,
        bytes: 8,
    }
}

/// Returns the 128-bit register `Qn`.
#[must_use]
pub const fn q(index: u8) -> VReg {
    VReg {
        index: index & 31,
        bytes: 16,
    }
}

/// A64 condition codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Cond {
    Eq = 0,
    Ne = 1,
    Hs = 2,
    Lo = 3,
    Mi = 4,
    Pl = 5,
    Vs = 6,
    Vc = 7,
    Hi = 8,
    Ls = 9,
    Ge = 10,
    Lt = 11,
    Gt = 12,
    Le = 13,
    Al = 14,
}

impl Cond {
    /// Returns the opposite condition.
    #[must_use]
    pub fn invert(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Hs => Cond::Lo,
            Cond::Lo => Cond::Hs,
            Cond::Mi => Cond::Pl,
            Cond::Pl => Cond::Mi,
            Cond::Vs => Cond::Vc,
            Cond::Vc => Cond::Vs,
            Cond::Hi => Cond::Ls,
            Cond::Ls => Cond::Hi,
            Cond::Ge => Cond::Lt,
            Cond::Lt => Cond::Ge,
            Cond::Gt => Cond::Le,
            Cond::Le => Cond::Gt,
            Cond::Al => Cond::Al,
        }
    }

    fn bits(self) -> u32 {
        self as u32
    }
}

/// Kind of PC-relative field a fixup patches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixupKind {
    /// `B`/`BL` 26-bit word offset at bits 0..26.
    Branch26,
    /// `B.cond`/`CBZ`/`LDR literal` 19-bit word offset at bits 5..24.
    Branch19,
    /// `TBZ`/`TBNZ` 14-bit word offset at bits 5..19.
    Branch14,
    /// `ADR` 21-bit byte offset split into immlo/immhi.
    Adr21,
}

/// Label fixup information for branch instruction resolution.
///
/// Tracks an unresolved label reference so forward and backward branches can be
/// patched once every label position is known.
#[derive(Debug, Clone)]
pub struct LabelFixup {
    /// The target label name to resolve
    pub label: String,
    /// Index of the instruction word to patch
    pub index: usize,
    /// Which field of the word receives the offset
    pub kind: FixupKind,
}

/// Fluent A64 assembler.
///
/// Instructions are appended in order starting at the base address passed to
/// [`Assembler::new`]. The base only matters for absolute targets
/// ([`Assembler::bl_to`], [`Assembler::b_to`]) and for the label addresses
/// reported by [`Assembler::finalize`].
///
/// # Examples
///
/// ```rust,no_run
/// use droidemu::assembly::{x, Assembler};
///
/// let mut asm = Assembler::new(0);
/// asm.add(x(0), x(0), x(1))?.ret()?;
/// let (code, _) = asm.finalize()?;
/// assert_eq!(code.len(), 8);
/// # Ok::<(), droidemu::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Assembler {
    /// Address of the first instruction
    base: u64,
    /// Emitted instruction words
    words: Vec<u32>,
    /// Defined label positions (label_name -> word index)
    labels: HashMap<String, usize>,
    /// Pending branch fixups awaiting label resolution
    fixups: Vec<LabelFixup>,
}

impl Assembler {
    /// Creates an empty assembler whose first instruction sits at `base`.
    #[must_use]
    pub fn new(base: u64) -> Self {
        Assembler {
            base,
            words: Vec::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
        }
    }

    /// Address of the next instruction to be emitted.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.base + self.words.len() as u64 * 4
    }

    /// Number of emitted instruction words.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Returns true if nothing was emitted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Returns the address of a label defined so far.
    #[must_use]
    pub fn label_address(&self, name: &str) -> Option<u64> {
        self.labels
            .get(name)
            .map(|&index| self.base + index as u64 * 4)
    }

    /// Appends a raw instruction word.
    pub fn emit(&mut self, word: u32) -> &mut Self {
        self.words.push(word);
        self
    }

    /// Defines `name` at the current position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateLabel`] if the label already exists.
    pub fn label(&mut self, name: &str) -> Result<&mut Self> {
        if self.labels.contains_key(name) {
            return Err(Error::DuplicateLabel(name.to_string()));
        }
        self.labels.insert(name.to_string(), self.words.len());
        Ok(self)
    }

    /// Resolves every label reference and returns the machine code together with
    /// the absolute address of every label.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UndefinedLabel`] for references to unknown labels and
    /// [`Error::Malformed`] when a target is out of range for its instruction.
    pub fn finalize(mut self) -> Result<(Vec<u8>, HashMap<String, u64>)> {
        let fixups = std::mem::take(&mut self.fixups);
        for fixup in &fixups {
            let target = *self
                .labels
                .get(&fixup.label)
                .ok_or_else(|| Error::UndefinedLabel(fixup.label.clone()))?;
            let delta = (target as i64 - fixup.index as i64) * 4;
            let patch = encode_offset(fixup.kind, delta)?;
            self.words[fixup.index] |= patch;
        }

        let mut code = Vec::with_capacity(self.words.len() * 4);
        for word in &self.words {
            code.extend_from_slice(&word.to_le_bytes());
        }
        let labels = self
            .labels
            .iter()
            .map(|(name, &index)| (name.clone(), self.base + index as u64 * 4))
            .collect();
        Ok((code, labels))
    }

    /// Resolves labels and returns only the machine code.
    ///
    /// # Errors
    ///
    /// See [`Assembler::finalize`].
    pub fn assemble(self) -> Result<Vec<u8>> {
        self.finalize().map(|(code, _)| code)
    }

    fn fixup(&mut self, word: u32, label: &str, kind: FixupKind) -> Result<&mut Self> {
        self.fixups.push(LabelFixup {
            label: label.to_string(),
            index: self.words.len(),
            kind,
        });
        Ok(self.emit(word))
    }

    fn absolute(&mut self, word: u32, target: u64, kind: FixupKind) -> Result<&mut Self> {
        let delta = target.wrapping_sub(self.position()) as i64;
        let patch = encode_offset(kind, delta)?;
        Ok(self.emit(word | patch))
    }

    // ------------------------------------------------------------------------------------------
    // Branches and system
    // ------------------------------------------------------------------------------------------

    /// `NOP`
    pub fn nop(&mut self) -> Result<&mut Self> {
        Ok(self.emit(0xD503_201F))
    }

    /// `RET` (to `x30`)
    pub fn ret(&mut self) -> Result<&mut Self> {
        self.ret_reg(LR)
    }

    /// `RET Xn`
    pub fn ret_reg(&mut self, rn: Reg) -> Result<&mut Self> {
        Ok(self.emit(0xD65F_0000 | rn.n() << 5))
    }

    /// `BR Xn`
    pub fn br(&mut self, rn: Reg) -> Result<&mut Self> {
        Ok(self.emit(0xD61F_0000 | rn.n() << 5))
    }

    /// `BLR Xn`
    pub fn blr(&mut self, rn: Reg) -> Result<&mut Self> {
        Ok(self.emit(0xD63F_0000 | rn.n() << 5))
    }

    /// `B label`
    pub fn b(&mut self, label: &str) -> Result<&mut Self> {
        self.fixup(0x1400_0000, label, FixupKind::Branch26)
    }

    /// `BL label`
    pub fn bl(&mut self, label: &str) -> Result<&mut Self> {
        self.fixup(0x9400_0000, label, FixupKind::Branch26)
    }

    /// `B address`
    ///
    /// # Errors
    ///
    /// Fails if `target` is more than 128 MiB away.
    pub fn b_to(&mut self, target: u64) -> Result<&mut Self> {
        self.absolute(0x1400_0000, target, FixupKind::Branch26)
    }

    /// `BL address`
    ///
    /// # Errors
    ///
    /// Fails if `target` is more than 128 MiB away.
    pub fn bl_to(&mut self, target: u64) -> Result<&mut Self> {
        self.absolute(0x9400_0000, target, FixupKind::Branch26)
    }

    /// `B.cond label`
    pub fn b_cond(&mut self, cond: Cond, label: &str) -> Result<&mut Self> {
        self.fixup(0x5400_0000 | cond.bits(), label, FixupKind::Branch19)
    }

    /// `CBZ Rt, label`
    pub fn cbz(&mut self, rt: Reg, label: &str) -> Result<&mut Self> {
        self.fixup(
            rt.sf() << 31 | 0x3400_0000 | rt.n(),
            label,
            FixupKind::Branch19,
        )
    }

    /// `CBNZ Rt, label`
    pub fn cbnz(&mut self, rt: Reg, label: &str) -> Result<&mut Self> {
        self.fixup(
            rt.sf() << 31 | 0x3500_0000 | rt.n(),
            label,
            FixupKind::Branch19,
        )
    }

    /// `TBZ Rt, #bit, label`
    pub fn tbz(&mut self, rt: Reg, bit: u8, label: &str) -> Result<&mut Self> {
        let word = test_branch(0x3600_0000, rt, bit)?;
        self.fixup(word, label, FixupKind::Branch14)
    }

    /// `TBNZ Rt, #bit, label`
    pub fn tbnz(&mut self, rt: Reg, bit: u8, label: &str) -> Result<&mut Self> {
        let word = test_branch(0x3700_0000, rt, bit)?;
        self.fixup(word, label, FixupKind::Branch14)
    }

    /// `ADR Xd, label`
    pub fn adr(&mut self, rd: Reg, label: &str) -> Result<&mut Self> {
        self.fixup(0x1000_0000 | rd.n(), label, FixupKind::Adr21)
    }

    /// `ADR Xd, address`
    ///
    /// # Errors
    ///
    /// Fails if `target` is more than 1 MiB away.
    pub fn adr_to(&mut self, rd: Reg, target: u64) -> Result<&mut Self> {
        self.absolute(0x1000_0000 | rd.n(), target, FixupKind::Adr21)
    }

    /// `LDR Rt, label` (PC-relative literal load).
    pub fn ldr_literal(&mut self, rt: Reg, label: &str) -> Result<&mut Self> {
        let opc = if rt.wide { 0x5800_0000 } else { 0x1800_0000 };
        self.fixup(opc | rt.n(), label, FixupKind::Branch19)
    }

    /// `SVC #imm`
    pub fn svc(&mut self, imm: u16) -> Result<&mut Self> {
        Ok(self.emit(0xD400_0001 | u32::from(imm) << 5))
    }

    /// `BRK #imm`
    pub fn brk(&mut self, imm: u16) -> Result<&mut Self> {
        Ok(self.emit(0xD420_0000 | u32::from(imm) << 5))
    }

    /// `MRS Xt, <sysreg>` with the 16-bit `op0:op1:CRn:CRm:op2` encoding.
    pub fn mrs(&mut self, rt: Reg, sysreg: u16) -> Result<&mut Self> {
        Ok(self.emit(0xD530_0000 | u32::from(sysreg & 0x7FFF) << 5 | rt.n()))
    }

    /// `MSR <sysreg>, Xt`
    pub fn msr(&mut self, sysreg: u16, rt: Reg) -> Result<&mut Self> {
        Ok(self.emit(0xD510_0000 | u32::from(sysreg & 0x7FFF) << 5 | rt.n()))
    }

    /// `DMB ISH`
    pub fn dmb(&mut self) -> Result<&mut Self> {
        Ok(self.emit(0xD503_3BBF))
    }

    // ------------------------------------------------------------------------------------------
    // Data processing
    // ------------------------------------------------------------------------------------------

    /// `MOVZ Rd, #imm16, LSL #shift`
    ///
    /// # Errors
    ///
    /// Fails if `shift` is not a multiple of 16 valid for the register width.
    pub fn movz(&mut self, rd: Reg, imm16: u16, shift: u8) -> Result<&mut Self> {
        let hw = move_shift(rd, shift)?;
        Ok(self.emit(rd.sf() << 31 | 0x5280_0000 | hw << 21 | u32::from(imm16) << 5 | rd.n()))
    }

    /// `MOVN Rd, #imm16, LSL #shift`
    ///
    /// # Errors
    ///
    /// Fails if `shift` is not a multiple of 16 valid for the register width.
    pub fn movn(&mut self, rd: Reg, imm16: u16, shift: u8) -> Result<&mut Self> {
        let hw = move_shift(rd, shift)?;
        Ok(self.emit(rd.sf() << 31 | 0x1280_0000 | hw << 21 | u32::from(imm16) << 5 | rd.n()))
    }

    /// `MOVK Rd, #imm16, LSL #shift`
    ///
    /// # Errors
    ///
    /// Fails if `shift` is not a multiple of 16 valid for the register width.
    pub fn movk(&mut self, rd: Reg, imm16: u16, shift: u8) -> Result<&mut Self> {
        let hw = move_shift(rd, shift)?;
        Ok(self.emit(rd.sf() << 31 | 0x7280_0000 | hw << 21 | u32::from(imm16) << 5 | rd.n()))
    }

    /// Loads an arbitrary constant with a `MOVZ` followed by `MOVK`s for every
    /// other non-zero halfword.
    pub fn mov_imm(&mut self, rd: Reg, value: u64) -> Result<&mut Self> {
        let halves = if rd.wide { 4 } else { 2 };
        let mut first = true;
        for i in 0..halves {
            let chunk = (value >> (i * 16)) as u16;
            if chunk == 0 && !(first && i == halves - 1) {
                continue;
            }
            if first {
                self.movz(rd, chunk, (i * 16) as u8)?;
                first = false;
            } else {
                self.movk(rd, chunk, (i * 16) as u8)?;
            }
        }
        if first {
            self.movz(rd, 0, 0)?;
        }
        Ok(self)
    }

    /// `MOV Rd, Rm`, using `ADD #0` when either side is `SP`.
    pub fn mov(&mut self, rd: Reg, rm: Reg) -> Result<&mut Self> {
        if rd.index == 31 || rm.index == 31 {
            self.add_imm(rd, rm, 0)
        } else {
            self.orr(rd, if rd.wide { XZR } else { WZR }, rm)
        }
    }

    /// `ADD Rd, Rn, #imm` (`Rd`/`Rn` 31 is `SP`).
    ///
    /// # Errors
    ///
    /// Fails unless `imm` fits 12 bits, optionally shifted left by 12.
    pub fn add_imm(&mut self, rd: Reg, rn: Reg, imm: u32) -> Result<&mut Self> {
        let word = add_sub_imm(0x1100_0000, rd, rn, imm)?;
        Ok(self.emit(word))
    }

    /// `ADDS Rd, Rn, #imm`
    ///
    /// # Errors
    ///
    /// Fails unless `imm` fits 12 bits, optionally shifted left by 12.
    pub fn adds_imm(&mut self, rd: Reg, rn: Reg, imm: u32) -> Result<&mut Self> {
        let word = add_sub_imm(0x3100_0000, rd, rn, imm)?;
        Ok(self.emit(word))
    }

    /// `SUB Rd, Rn, #imm`
    ///
    /// # Errors
    ///
    /// Fails unless `imm` fits 12 bits, optionally shifted left by 12.
    pub fn sub_imm(&mut self, rd: Reg, rn: Reg, imm: u32) -> Result<&mut Self> {
        let word = add_sub_imm(0x5100_0000, rd, rn, imm)?;
        Ok(self.emit(word))
    }

    /// `SUBS Rd, Rn, #imm`
    ///
    /// # Errors
    ///
    /// Fails unless `imm` fits 12 bits, optionally shifted left by 12.
    pub fn subs_imm(&mut self, rd: Reg, rn: Reg, imm: u32) -> Result<&mut Self> {
        let word = add_sub_imm(0x7100_0000, rd, rn, imm)?;
        Ok(self.emit(word))
    }

    /// `CMP Rn, #imm`
    ///
    /// # Errors
    ///
    /// Fails unless `imm` fits 12 bits, optionally shifted left by 12.
    pub fn cmp_imm(&mut self, rn: Reg, imm: u32) -> Result<&mut Self> {
        let zr = if rn.wide { XZR } else { WZR };
        self.subs_imm(zr, rn, imm)
    }

    /// `ADD Rd, Rn, Rm`
    pub fn add(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<&mut Self> {
        Ok(self.emit(three_reg(0x0B00_0000, rd, rn, rm)))
    }

    /// `ADDS Rd, Rn, Rm`
    pub fn adds(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<&mut Self> {
        Ok(self.emit(three_reg(0x2B00_0000, rd, rn, rm)))
    }

    /// `SUB Rd, Rn, Rm`
    pub fn sub(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<&mut Self> {
        Ok(self.emit(three_reg(0x4B00_0000, rd, rn, rm)))
    }

    /// `SUBS Rd, Rn, Rm`
    pub fn subs(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<&mut Self> {
        Ok(self.emit(three_reg(0x6B00_0000, rd, rn, rm)))
    }

    /// `CMP Rn, Rm`
    pub fn cmp(&mut self, rn: Reg, rm: Reg) -> Result<&mut Self> {
        let zr = if rn.wide { XZR } else { WZR };
        self.subs(zr, rn, rm)
    }

    /// `ADC Rd, Rn, Rm`
    pub fn adc(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<&mut Self> {
        Ok(self.emit(three_reg(0x1A00_0000, rd, rn, rm)))
    }

    /// `AND Rd, Rn, Rm`
    pub fn and(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<&mut Self> {
        Ok(self.emit(three_reg(0x0A00_0000, rd, rn, rm)))
    }

    /// `ORR Rd, Rn, Rm`
    pub fn orr(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<&mut Self> {
        Ok(self.emit(three_reg(0x2A00_0000, rd, rn, rm)))
    }

    /// `EOR Rd, Rn, Rm`
    pub fn eor(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<&mut Self> {
        Ok(self.emit(three_reg(0x4A00_0000, rd, rn, rm)))
    }

    /// `BIC Rd, Rn, Rm`
    pub fn bic(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<&mut Self> {
        Ok(self.emit(three_reg(0x0A20_0000, rd, rn, rm)))
    }

    /// `LSL Rd, Rn, #shift` (alias of `UBFM`).
    ///
    /// # Errors
    ///
    /// Fails if `shift` is not below the register width.
    pub fn lsl(&mut self, rd: Reg, rn: Reg, shift: u8) -> Result<&mut Self> {
        let width = register_width(rd);
        check_shift(shift, width)?;
        let immr = (width - u32::from(shift)) % width;
        let imms = width - 1 - u32::from(shift);
        Ok(self.emit(bitfield(0x5300_0000, rd, rn, immr, imms)))
    }

    /// `LSR Rd, Rn, #shift` (alias of `UBFM`).
    ///
    /// # Errors
    ///
    /// Fails if `shift` is not below the register width.
    pub fn lsr(&mut self, rd: Reg, rn: Reg, shift: u8) -> Result<&mut Self> {
        let width = register_width(rd);
        check_shift(shift, width)?;
        Ok(self.emit(bitfield(0x5300_0000, rd, rn, u32::from(shift), width - 1)))
    }

    /// `ASR Rd, Rn, #shift` (alias of `SBFM`).
    ///
    /// # Errors
    ///
    /// Fails if `shift` is not below the register width.
    pub fn asr(&mut self, rd: Reg, rn: Reg, shift: u8) -> Result<&mut Self> {
        let width = register_width(rd);
        check_shift(shift, width)?;
        Ok(self.emit(bitfield(0x1300_0000, rd, rn, u32::from(shift), width - 1)))
    }

    /// `UBFX Rd, Rn, #lsb, #width`
    ///
    /// # Errors
    ///
    /// Fails if the field does not fit the register.
    pub fn ubfx(&mut self, rd: Reg, rn: Reg, lsb: u8, width: u8) -> Result<&mut Self> {
        let size = register_width(rd);
        if width == 0 || u32::from(lsb) + u32::from(width) > size {
            return Err(malformed_error!("ubfx field {}+{} out of range", lsb, width));
        }
        Ok(self.emit(bitfield(
            0x5300_0000,
            rd,
            rn,
            u32::from(lsb),
            u32::from(lsb) + u32::from(width) - 1,
        )))
    }

    /// `SXTW Xd, Wn`
    pub fn sxtw(&mut self, rd: Reg, rn: Reg) -> Result<&mut Self> {
        Ok(self.emit(bitfield(0x1300_0000, x(rd.index), rn, 0, 31)))
    }

    /// `LSLV Rd, Rn, Rm`
    pub fn lslv(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<&mut Self> {
        Ok(self.emit(three_reg(0x1AC0_2000, rd, rn, rm)))
    }

    /// `LSRV Rd, Rn, Rm`
    pub fn lsrv(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<&mut Self> {
        Ok(self.emit(three_reg(0x1AC0_2400, rd, rn, rm)))
    }

    /// `RORV Rd, Rn, Rm`
    pub fn rorv(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<&mut Self> {
        Ok(self.emit(three_reg(0x1AC0_2C00, rd, rn, rm)))
    }

    /// `UDIV Rd, Rn, Rm`
    pub fn udiv(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<&mut Self> {
        Ok(self.emit(three_reg(0x1AC0_0800, rd, rn, rm)))
    }

    /// `SDIV Rd, Rn, Rm`
    pub fn sdiv(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<&mut Self> {
        Ok(self.emit(three_reg(0x1AC0_0C00, rd, rn, rm)))
    }

    /// `MADD Rd, Rn, Rm, Ra`
    pub fn madd(&mut self, rd: Reg, rn: Reg, rm: Reg, ra: Reg) -> Result<&mut Self> {
        Ok(self.emit(three_reg(0x1B00_0000, rd, rn, rm) | ra.n() << 10))
    }

    /// `MSUB Rd, Rn, Rm, Ra`
    pub fn msub(&mut self, rd: Reg, rn: Reg, rm: Reg, ra: Reg) -> Result<&mut Self> {
        Ok(self.emit(three_reg(0x1B00_8000, rd, rn, rm) | ra.n() << 10))
    }

    /// `MUL Rd, Rn, Rm`
    pub fn mul(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<&mut Self> {
        self.madd(rd, rn, rm, if rd.wide { XZR } else { WZR })
    }

    /// `UMULH Xd, Xn, Xm`
    pub fn umulh(&mut self, rd: Reg, rn: Reg, rm: Reg) -> Result<&mut Self> {
        Ok(self.emit(0x9BC0_7C00 | rm.n() << 16 | rn.n() << 5 | rd.n()))
    }

    /// `CSEL Rd, Rn, Rm, cond`
    pub fn csel(&mut self, rd: Reg, rn: Reg, rm: Reg, cond: Cond) -> Result<&mut Self> {
        Ok(self.emit(three_reg(0x1A80_0000, rd, rn, rm) | cond.bits() << 12))
    }

    /// `CSET Rd, cond` (alias of `CSINC Rd, ZR, ZR, !cond`).
    pub fn cset(&mut self, rd: Reg, cond: Cond) -> Result<&mut Self> {
        Ok(self.emit(rd.sf() << 31 | 0x1A9F_07E0 | cond.invert().bits() << 12 | rd.n()))
    }

    /// `CLZ Rd, Rn`
    pub fn clz(&mut self, rd: Reg, rn: Reg) -> Result<&mut Self> {
        Ok(self.emit(rd.sf() << 31 | 0x5AC0_1000 | rn.n() << 5 | rd.n()))
    }

    /// `REV Rd, Rn`
    pub fn rev(&mut self, rd: Reg, rn: Reg) -> Result<&mut Self> {
        let opc = if rd.wide { 0xDAC0_0C00 } else { 0x5AC0_0800 };
        Ok(self.emit(opc | rn.n() << 5 | rd.n()))
    }

    // ------------------------------------------------------------------------------------------
    // Loads and stores
    // ------------------------------------------------------------------------------------------

    /// `LDR Rt, [Xn, #offset]` (unsigned scaled offset).
    ///
    /// # Errors
    ///
    /// Fails if `offset` is not a multiple of the access size or too large.
    pub fn ldr(&mut self, rt: Reg, rn: Reg, offset: u32) -> Result<&mut Self> {
        let size = if rt.wide { 8 } else { 4 };
        self.load_store_unsigned(0x0040_0000, size, rt.n(), rn, offset)
    }

    /// `STR Rt, [Xn, #offset]`
    ///
    /// # Errors
    ///
    /// Fails if `offset` is not a multiple of the access size or too large.
    pub fn str(&mut self, rt: Reg, rn: Reg, offset: u32) -> Result<&mut Self> {
        let size = if rt.wide { 8 } else { 4 };
        self.load_store_unsigned(0, size, rt.n(), rn, offset)
    }

    /// `LDRB Wt, [Xn, #offset]`
    ///
    /// # Errors
    ///
    /// Fails if `offset` is out of range.
    pub fn ldrb(&mut self, rt: Reg, rn: Reg, offset: u32) -> Result<&mut Self> {
        self.load_store_unsigned(0x0040_0000, 1, rt.n(), rn, offset)
    }

    /// `STRB Wt, [Xn, #offset]`
    ///
    /// # Errors
    ///
    /// Fails if `offset` is out of range.
    pub fn strb(&mut self, rt: Reg, rn: Reg, offset: u32) -> Result<&mut Self> {
        self.load_store_unsigned(0, 1, rt.n(), rn, offset)
    }

    /// `LDRH Wt, [Xn, #offset]`
    ///
    /// # Errors
    ///
    /// Fails if `offset` is misaligned or out of range.
    pub fn ldrh(&mut self, rt: Reg, rn: Reg, offset: u32) -> Result<&mut Self> {
        self.load_store_unsigned(0x0040_0000, 2, rt.n(), rn, offset)
    }

    /// `STRH Wt, [Xn, #offset]`
    ///
    /// # Errors
    ///
    /// Fails if `offset` is misaligned or out of range.
    pub fn strh(&mut self, rt: Reg, rn: Reg, offset: u32) -> Result<&mut Self> {
        self.load_store_unsigned(0, 2, rt.n(), rn, offset)
    }

    /// `LDRSB Rt, [Xn, #offset]`
    ///
    /// # Errors
    ///
    /// Fails if `offset` is out of range.
    pub fn ldrsb(&mut self, rt: Reg, rn: Reg, offset: u32) -> Result<&mut Self> {
        let opc = if rt.wide { 0x0080_0000 } else { 0x00C0_0000 };
        self.load_store_unsigned(opc, 1, rt.n(), rn, offset)
    }

    /// `LDRSW Xt, [Xn, #offset]`
    ///
    /// # Errors
    ///
    /// Fails if `offset` is misaligned or out of range.
    pub fn ldrsw(&mut self, rt: Reg, rn: Reg, offset: u32) -> Result<&mut Self> {
        self.load_store_unsigned(0x0080_0000, 4, rt.n(), rn, offset)
    }

    /// `LDR Rt, [Xn], #offset` (post-index).
    ///
    /// # Errors
    ///
    /// Fails if `offset` does not fit 9 signed bits.
    pub fn ldr_post(&mut self, rt: Reg, rn: Reg, offset: i32) -> Result<&mut Self> {
        let size = if rt.wide { 3 } else { 2 };
        let imm9 = signed_field(offset, 9)?;
        Ok(self.emit(size << 30 | 0x3840_0400 | imm9 << 12 | rn.n() << 5 | rt.n()))
    }

    /// `STR Rt, [Xn, #offset]!` (pre-index).
    ///
    /// # Errors
    ///
    /// Fails if `offset` does not fit 9 signed bits.
    pub fn str_pre(&mut self, rt: Reg, rn: Reg, offset: i32) -> Result<&mut Self> {
        let size = if rt.wide { 3 } else { 2 };
        let imm9 = signed_field(offset, 9)?;
        Ok(self.emit(size << 30 | 0x3800_0C00 | imm9 << 12 | rn.n() << 5 | rt.n()))
    }

    /// `LDR Rt, [Xn, Xm{, LSL #size}]`
    pub fn ldr_reg(&mut self, rt: Reg, rn: Reg, rm: Reg, scaled: bool) -> Result<&mut Self> {
        let size = if rt.wide { 3 } else { 2 };
        Ok(self.emit(
            size << 30
                | 0x3860_6800
                | rm.n() << 16
                | u32::from(scaled) << 12
                | rn.n() << 5
                | rt.n(),
        ))
    }

    /// `LDP Rt, Rt2, [Xn, #offset]`
    ///
    /// # Errors
    ///
    /// Fails if `offset` is misaligned or out of range.
    pub fn ldp(&mut self, rt: Reg, rt2: Reg, rn: Reg, offset: i32) -> Result<&mut Self> {
        self.pair(0x2940_0000, rt, rt2, rn, offset)
    }

    /// `STP Rt, Rt2, [Xn, #offset]`
    ///
    /// # Errors
    ///
    /// Fails if `offset` is misaligned or out of range.
    pub fn stp(&mut self, rt: Reg, rt2: Reg, rn: Reg, offset: i32) -> Result<&mut Self> {
        self.pair(0x2900_0000, rt, rt2, rn, offset)
    }

    /// `STP Rt, Rt2, [Xn, #offset]!`
    ///
    /// # Errors
    ///
    /// Fails if `offset` is misaligned or out of range.
    pub fn stp_pre(&mut self, rt: Reg, rt2: Reg, rn: Reg, offset: i32) -> Result<&mut Self> {
        self.pair(0x2980_0000, rt, rt2, rn, offset)
    }

    /// `LDP Rt, Rt2, [Xn], #offset`
    ///
    /// # Errors
    ///
    /// Fails if `offset` is misaligned or out of range.
    pub fn ldp_post(&mut self, rt: Reg, rt2: Reg, rn: Reg, offset: i32) -> Result<&mut Self> {
        self.pair(0x28C0_0000, rt, rt2, rn, offset)
    }

    /// `LDXR Rt, [Xn]`
    pub fn ldxr(&mut self, rt: Reg, rn: Reg) -> Result<&mut Self> {
        let opc = if rt.wide { 0xC85F_7C00 } else { 0x885F_7C00 };
        Ok(self.emit(opc | rn.n() << 5 | rt.n()))
    }

    /// `STXR Ws, Rt, [Xn]`
    pub fn stxr(&mut self, rs: Reg, rt: Reg, rn: Reg) -> Result<&mut Self> {
        let opc = if rt.wide { 0xC800_7C00 } else { 0x8800_7C00 };
        Ok(self.emit(opc | rs.n() << 16 | rn.n() << 5 | rt.n()))
    }

    /// `LDADD Rs, Rt, [Xn]`
    pub fn ldadd(&mut self, rs: Reg, rt: Reg, rn: Reg) -> Result<&mut Self> {
        Ok(self.emit(atomic(0x0000, rs, rt, rn)))
    }

    /// `LDSET Rs, Rt, [Xn]`
    pub fn ldset(&mut self, rs: Reg, rt: Reg, rn: Reg) -> Result<&mut Self> {
        Ok(self.emit(atomic(0x3000, rs, rt, rn)))
    }

    /// `SWP Rs, Rt, [Xn]`
    pub fn swp(&mut self, rs: Reg, rt: Reg, rn: Reg) -> Result<&mut Self> {
        Ok(self.emit(atomic(0x8000, rs, rt, rn)))
    }

    /// `CAS Rs, Rt, [Xn]`
    pub fn cas(&mut self, rs: Reg, rt: Reg, rn: Reg) -> Result<&mut Self> {
        let opc = if rt.wide { 0xC8A0_7C00 } else { 0x88A0_7C00 };
        Ok(self.emit(opc | rs.n() << 16 | rn.n() << 5 | rt.n()))
    }

    // ------------------------------------------------------------------------------------------
    // SIMD and floating point
    // ------------------------------------------------------------------------------------------

    /// `LDR Vt, [Xn, #offset]` for `B`/`H`/`S`/`D`/`Q` registers.
    ///
    /// # Errors
    ///
    /// Fails if `offset` is misaligned or out of range.
    pub fn ldr_v(&mut self, vt: VReg, rn: Reg, offset: u32) -> Result<&mut Self> {
        self.load_store_vector(true, vt, rn, offset)
    }

    /// `STR Vt, [Xn, #offset]`
    ///
    /// # Errors
    ///
    /// Fails if `offset` is misaligned or out of range.
    pub fn str_v(&mut self, vt: VReg, rn: Reg, offset: u32) -> Result<&mut Self> {
        self.load_store_vector(false, vt, rn, offset)
    }

    /// `FMOV Vd, Rn` (general to FP).
    pub fn fmov_from_gpr(&mut self, vd: VReg, rn: Reg) -> Result<&mut Self> {
        let opc = if rn.wide { 0x9E67_0000 } else { 0x1E27_0000 };
        Ok(self.emit(opc | rn.n() << 5 | vd.n()))
    }

    /// `FMOV Rd, Vn` (FP to general).
    pub fn fmov_to_gpr(&mut self, rd: Reg, vn: VReg) -> Result<&mut Self> {
        let opc = if rd.wide { 0x9E66_0000 } else { 0x1E26_0000 };
        Ok(self.emit(opc | vn.n() << 5 | rd.n()))
    }

    /// `FADD Vd, Vn, Vm`
    ///
    /// # Errors
    ///
    /// Fails unless all operands are `S` or `D` registers.
    pub fn fadd(&mut self, vd: VReg, vn: VReg, vm: VReg) -> Result<&mut Self> {
        let word = fp_binary(0x1E20_2800, vd, vn, vm)?;
        Ok(self.emit(word))
    }

    /// `FSUB Vd, Vn, Vm`
    ///
    /// # Errors
    ///
    /// Fails unless all operands are `S` or `D` registers.
    pub fn fsub(&mut self, vd: VReg, vn: VReg, vm: VReg) -> Result<&mut Self> {
        let word = fp_binary(0x1E20_3800, vd, vn, vm)?;
        Ok(self.emit(word))
    }

    /// `FMUL Vd, Vn, Vm`
    ///
    /// # Errors
    ///
    /// Fails unless all operands are `S` or `D` registers.
    pub fn fmul(&mut self, vd: VReg, vn: VReg, vm: VReg) -> Result<&mut Self> {
        let word = fp_binary(0x1E20_0800, vd, vn, vm)?;
        Ok(self.emit(word))
    }

    /// `FDIV Vd, Vn, Vm`
    ///
    /// # Errors
    ///
    /// Fails unless all operands are `S` or `D` registers.
    pub fn fdiv(&mut self, vd: VReg, vn: VReg, vm: VReg) -> Result<&mut Self> {
        let word = fp_binary(0x1E20_1800, vd, vn, vm)?;
        Ok(self.emit(word))
    }

    /// `FCMP Vn, Vm`
    ///
    /// # Errors
    ///
    /// Fails unless both operands are `S` or `D` registers.
    pub fn fcmp(&mut self, vn: VReg, vm: VReg) -> Result<&mut Self> {
        let ftype = fp_type(vn)?;
        Ok(self.emit(0x1E20_2000 | ftype << 22 | vm.n() << 16 | vn.n() << 5))
    }

    /// `FCVT Vd, Vn` between single and double precision.
    ///
    /// # Errors
    ///
    /// Fails unless both operands are `S` or `D` registers.
    pub fn fcvt(&mut self, vd: VReg, vn: VReg) -> Result<&mut Self> {
        let ftype = fp_type(vn)?;
        let opc = fp_type(vd)?;
        Ok(self.emit(0x1E22_4000 | ftype << 22 | opc << 15 | vn.n() << 5 | vd.n()))
    }

    /// `SCVTF Vd, Rn`
    ///
    /// # Errors
    ///
    /// Fails unless `vd` is an `S` or `D` register.
    pub fn scvtf(&mut self, vd: VReg, rn: Reg) -> Result<&mut Self> {
        let ftype = fp_type(vd)?;
        Ok(self.emit(rn.sf() << 31 | 0x1E22_0000 | ftype << 22 | rn.n() << 5 | vd.n()))
    }

    /// `FCVTZS Rd, Vn`
    ///
    /// # Errors
    ///
    /// Fails unless `vn` is an `S` or `D` register.
    pub fn fcvtzs(&mut self, rd: Reg, vn: VReg) -> Result<&mut Self> {
        let ftype = fp_type(vn)?;
        Ok(self.emit(rd.sf() << 31 | 0x1E38_0000 | ftype << 22 | vn.n() << 5 | rd.n()))
    }

    /// `MOVI Vd.2D, #0`
    pub fn movi_zero(&mut self, vd: VReg) -> Result<&mut Self> {
        Ok(self.emit(0x6F00_E400 | vd.n()))
    }

    /// `DUP Vd.16B, Wn`
    pub fn dup_16b(&mut self, vd: VReg, rn: Reg) -> Result<&mut Self> {
        Ok(self.emit(0x4E01_0C00 | rn.n() << 5 | vd.n()))
    }

    /// `ADD Vd.4S, Vn.4S, Vm.4S`
    pub fn add_4s(&mut self, vd: VReg, vn: VReg, vm: VReg) -> Result<&mut Self> {
        Ok(self.emit(0x4EA0_8400 | vm.n() << 16 | vn.n() << 5 | vd.n()))
    }

    /// `EOR Vd.16B, Vn.16B, Vm.16B`
    pub fn eor_16b(&mut self, vd: VReg, vn: VReg, vm: VReg) -> Result<&mut Self> {
        Ok(self.emit(0x6E20_1C00 | vm.n() << 16 | vn.n() << 5 | vd.n()))
    }

    /// `UMOV Xd, Vn.D[index]`
    ///
    /// # Errors
    ///
    /// Fails if `index` is not 0 or 1.
    pub fn umov_d(&mut self, rd: Reg, vn: VReg, index: u8) -> Result<&mut Self> {
        if index > 1 {
            return Err(malformed_error!("umov lane {} out of range", index));
        }
        let imm5 = 0b01000 | u32::from(index) << 4;
        Ok(self.emit(0x4E00_3C00 | imm5 << 16 | vn.n() << 5 | rd.n()))
    }

    /// `LD1 {Vt.16B - Vt+n.16B}, [Xn]`, optionally post-incremented.
    ///
    /// # Errors
    ///
    /// Fails unless `count` is between 1 and 4.
    pub fn ld1(&mut self, vt: VReg, count: u8, rn: Reg, post: bool) -> Result<&mut Self> {
        let word = simd_multiple(true, vt, count, rn, post)?;
        Ok(self.emit(word))
    }

    /// `ST1 {Vt.16B - Vt+n.16B}, [Xn]`, optionally post-incremented.
    ///
    /// # Errors
    ///
    /// Fails unless `count` is between 1 and 4.
    pub fn st1(&mut self, vt: VReg, count: u8, rn: Reg, post: bool) -> Result<&mut Self> {
        let word = simd_multiple(false, vt, count, rn, post)?;
        Ok(self.emit(word))
    }

    // ------------------------------------------------------------------------------------------
    // Sequences
    // ------------------------------------------------------------------------------------------

    /// Standard frame setup: `STP X29, X30, [SP, #-16]!; MOV X29, SP`.
    pub fn prologue(&mut self) -> Result<&mut Self> {
        self.stp_pre(FP, LR, SP, -16)?.mov(FP, SP)
    }

    /// Standard frame teardown: `LDP X29, X30, [SP], #16; RET`.
    pub fn epilogue(&mut self) -> Result<&mut Self> {
        self.ldp_post(FP, LR, SP, 16)?.ret()
    }

    /// Calls an absolute address through `X16`.
    pub fn call_abs(&mut self, target: u64) -> Result<&mut Self> {
        self.mov_imm(x(16), target)?.blr(x(16))
    }

    fn load_store_unsigned(
        &mut self,
        opc: u32,
        size: u32,
        rt: u32,
        rn: Reg,
        offset: u32,
    ) -> Result<&mut Self> {
        let imm12 = scaled_offset(offset, size)?;
        let size_bits = size.trailing_zeros();
        Ok(self.emit(size_bits << 30 | 0x3900_0000 | opc | imm12 << 10 | rn.n() << 5 | rt))
    }

    fn load_store_vector(&mut self, load: bool, vt: VReg, rn: Reg, offset: u32) -> Result<&mut Self> {
        let size = u32::from(vt.bytes);
        let imm12 = scaled_offset(offset, size)?;
        let (size_bits, opc) = if size == 16 {
            (0, if load { 0x00C0_0000 } else { 0x0080_0000 })
        } else {
            (size.trailing_zeros(), if load { 0x0040_0000 } else { 0 })
        };
        Ok(self.emit(size_bits << 30 | 0x3D00_0000 | opc | imm12 << 10 | rn.n() << 5 | vt.n()))
    }

    fn pair(&mut self, opc: u32, rt: Reg, rt2: Reg, rn: Reg, offset: i32) -> Result<&mut Self> {
        let scale = if rt.wide { 8 } else { 4 };
        if offset % scale != 0 {
            return Err(malformed_error!("pair offset {} not a multiple of {}", offset, scale));
        }
        let imm7 = signed_field(offset / scale, 7)?;
        Ok(self.emit(
            rt.sf() << 31 | opc | imm7 << 15 | rt2.n() << 10 | rn.n() << 5 | rt.n(),
        ))
    }
}

fn encode_offset(kind: FixupKind, delta: i64) -> Result<u32> {
    match kind {
        FixupKind::Branch26 | FixupKind::Branch19 | FixupKind::Branch14 => {
            if delta % 4 != 0 {
                return Err(malformed_error!("branch offset {} is not word aligned", delta));
            }
            let words = delta / 4;
            let (bits, shift) = match kind {
                FixupKind::Branch26 => (26, 0),
                FixupKind::Branch19 => (19, 5),
                _ => (14, 5),
            };
            let limit = 1i64 << (bits - 1);
            if words < -limit || words >= limit {
                return Err(malformed_error!("branch offset {} out of range", delta));
            }
            Ok(((words as u32) & ((1u32 << bits) - 1)) << shift)
        }
        FixupKind::Adr21 => {
            if !(-(1i64 << 20)..(1i64 << 20)).contains(&delta) {
                return Err(malformed_error!("adr offset {} out of range", delta));
            }
            let imm = delta as u32;
            Ok((imm & 3) << 29 | ((imm >> 2) & 0x7_FFFF) << 5)
        }
    }
}

fn signed_field(value: i32, bits: u32) -> Result<u32> {
    let limit = 1i32 << (bits - 1);
    if value < -limit || value >= limit {
        return Err(malformed_error!("immediate {} does not fit {} bits", value, bits));
    }
    Ok((value as u32) & ((1u32 << bits) - 1))
}

fn scaled_offset(offset: u32, size: u32) -> Result<u32> {
    if offset % size != 0 || offset / size > 0xFFF {
        return Err(malformed_error!("offset {} invalid for {}-byte access", offset, size));
    }
    Ok(offset / size)
}

fn move_shift(rd: Reg, shift: u8) -> Result<u32> {
    let max = if rd.wide { 48 } else { 16 };
    if shift % 16 != 0 || shift > max {
        return Err(malformed_error!("invalid move-wide shift {}", shift));
    }
    Ok(u32::from(shift / 16))
}

fn add_sub_imm(opc: u32, rd: Reg, rn: Reg, imm: u32) -> Result<u32> {
    let (imm12, sh) = if imm <= 0xFFF {
        (imm, 0)
    } else if imm & 0xFFF == 0 && imm >> 12 <= 0xFFF {
        (imm >> 12, 1)
    } else {
        return Err(malformed_error!("immediate {:#x} not encodable", imm));
    };
    Ok(rd.sf() << 31 | opc | sh << 22 | imm12 << 10 | rn.n() << 5 | rd.n())
}

fn three_reg(opc: u32, rd: Reg, rn: Reg, rm: Reg) -> u32 {
    rd.sf() << 31 | opc | rm.n() << 16 | rn.n() << 5 | rd.n()
}

fn register_width(rd: Reg) -> u32 {
    if rd.wide {
        64
    } else {
        32
    }
}

fn check_shift(shift: u8, width: u32) -> Result<()> {
    if u32::from(shift) >= width {
        return Err(malformed_error!("shift {} out of range", shift));
    }
    Ok(())
}

fn bitfield(opc: u32, rd: Reg, rn: Reg, immr: u32, imms: u32) -> u32 {
    rd.sf() << 31 | opc | rd.sf() << 22 | immr << 16 | imms << 10 | rn.n() << 5 | rd.n()
}

fn test_branch(opc: u32, rt: Reg, bit: u8) -> Result<u32> {
    if u32::from(bit) >= register_width(rt) {
        return Err(malformed_error!("test bit {} out of range", bit));
    }
    let bit = u32::from(bit);
    Ok((bit >> 5) << 31 | opc | (bit & 0x1F) << 19 | rt.n())
}

fn atomic(opc: u32, rs: Reg, rt: Reg, rn: Reg) -> u32 {
    let size = if rt.wide { 0xF820_0000 } else { 0xB820_0000 };
    size | opc | rs.n() << 16 | rn.n() << 5 | rt.n()
}

fn fp_type(v: VReg) -> Result<u32> {
    match v.bytes {
        4 => Ok(0),
        8 => Ok(1),
        other => Err(malformed_error!("{}-byte register is not a scalar FP register", other)),
    }
}

fn fp_binary(opc: u32, vd: VReg, vn: VReg, vm: VReg) -> Result<u32> {
    let ftype = fp_type(vd)?;
    if fp_type(vn)? != ftype || fp_type(vm)? != ftype {
        return Err(malformed_error!("mixed precision FP operands"));
    }
    Ok(opc | ftype << 22 | vm.n() << 16 | vn.n() << 5 | vd.n())
}

fn simd_multiple(load: bool, vt: VReg, count: u8, rn: Reg, post: bool) -> Result<u32> {
    let opcode = match count {
        1 => 0b0111,
        2 => 0b1010,
        3 => 0b0110,
        4 => 0b0010,
        _ => return Err(malformed_error!("invalid register count {}", count)),
    };
    let mut word = 0x4C00_0000 | opcode << 12 | rn.n() << 5 | vt.n();
    if load {
        word |= 1 << 22;
    }
    if post {
        word |= 1 << 23 | 0x1F << 16;
    }
    Ok(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(code: &[u8]) -> Vec<u32> {
        code.chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    #[test]
    fn test_simple_encodings() {
        let mut asm = Assembler::new(0);
        asm.nop()
            .unwrap()
            .ret()
            .unwrap()
            .movz(x(0), 0x1234, 0)
            .unwrap()
            .movk(w(1), 0xBEEF, 16)
            .unwrap()
            .sub_imm(SP, SP, 0x20)
            .unwrap()
            .cmp_imm(w(0), 1)
            .unwrap()
            .mov(x(0), x(1))
            .unwrap()
            .stp_pre(FP, LR, SP, -16)
            .unwrap()
            .ldr(x(0), x(1), 8)
            .unwrap()
            .svc(1)
            .unwrap()
            .mrs(x(0), 0xDE82)
            .unwrap();
        let code = asm.assemble().unwrap();
        assert_eq!(
            words(&code),
            vec![
                0xD503_201F,
                0xD65F_03C0,
                0xD282_4680,
                0x72B7_DDE1,
                0xD100_83FF,
                0x7100_041F,
                0xAA01_03E0,
                0xA9BF_7BFD,
                0xF940_0420,
                0xD400_0021,
                0xD53B_D040,
            ]
        );
    }

    #[test]
    fn test_fp_encodings() {
        let mut asm = Assembler::new(0);
        asm.fadd(s(0), s(1), s(2))
            .unwrap()
            .fmov_to_gpr(x(0), d(1))
            .unwrap()
            .scvtf(d(0), w(1))
            .unwrap()
            .ldr_v(q(0), x(0), 0)
            .unwrap()
            .movi_zero(q(0))
            .unwrap();
        let code = asm.assemble().unwrap();
        assert_eq!(
            words(&code),
            vec![0x1E22_2820, 0x9E66_0020, 0x1E62_0020, 0x3DC0_0000, 0x6F00_E400]
        );
    }

    #[test]
    fn test_labels_forward_and_backward() {
        let mut asm = Assembler::new(0x1000);
        asm.label("top")
            .unwrap()
            .cbz(x(2), "end")
            .unwrap()
            .b_cond(Cond::Ne, "top")
            .unwrap()
            .bl("top")
            .unwrap()
            .label("end")
            .unwrap()
            .ret()
            .unwrap();
        let (code, labels) = asm.finalize().unwrap();
        let words = words(&code);
        // cbz x2, +12
        assert_eq!(words[0], 0xB400_0062);
        // b.ne -4
        assert_eq!(words[1], 0x54FF_FFE1);
        // bl -8
        assert_eq!(words[2], 0x97FF_FFFE);
        assert_eq!(labels["end"], 0x100C);
    }

    #[test]
    fn test_mov_imm_sequences() {
        let mut asm = Assembler::new(0);
        asm.mov_imm(x(0), 0).unwrap();
        assert_eq!(asm.len(), 1);

        let mut asm = Assembler::new(0);
        asm.mov_imm(x(0), 0x1234_0000_5678).unwrap();
        let code = asm.assemble().unwrap();
        // movz x0, #0x5678; movk x0, #0x1234, lsl #32
        assert_eq!(words(&code), vec![0xD28A_CF00, 0xF2C2_4680]);
    }

    #[test]
    fn test_absolute_branch() {
        let mut asm = Assembler::new(0x4000_0000);
        asm.nop().unwrap().bl_to(0x4000_0000).unwrap();
        let code = asm.assemble().unwrap();
        assert_eq!(words(&code)[1], 0x97FF_FFFF);
    }

    #[test]
    fn test_errors() {
        let mut asm = Assembler::new(0);
        asm.b("missing").unwrap();
        assert!(matches!(asm.finalize(), Err(Error::UndefinedLabel(_))));

        let mut asm = Assembler::new(0);
        asm.label("a").unwrap();
        assert!(matches!(asm.label("a"), Err(Error::DuplicateLabel(_))));

        let mut asm = Assembler::new(0);
        assert!(asm.ldr(x(0), x(1), 3).is_err());
        assert!(asm.add_imm(x(0), x(1), 0x1001).is_err());
        assert!(asm.fadd(q(0), q(1), q(2)).is_err());
    }
}
