//! Decoded A64 instruction representation.
//!
//! The decoder turns a 32-bit instruction word into an [`Instruction`]; the
//! interpreter executes that value. Register operands are plain register numbers
//! (`0..=31`); whether 31 means `SP` or the zero register is fixed by the variant.
//!
//! Immediates are stored fully expanded (shifted, sign-extended, bitmask-decoded)
//! so execution never has to look at encoding details again.

use std::fmt;

/// Shift applied to the second register operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShiftType {
    /// Logical shift left.
    Lsl,
    /// Logical shift right.
    Lsr,
    /// Arithmetic shift right.
    Asr,
    /// Rotate right.
    Ror,
}

impl ShiftType {
    /// Decodes the two-bit `shift` field.
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => ShiftType::Lsl,
            1 => ShiftType::Lsr,
            2 => ShiftType::Asr,
            _ => ShiftType::Ror,
        }
    }
}

/// Extension applied to a register operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtendType {
    /// Zero-extend byte.
    Uxtb,
    /// Zero-extend halfword.
    Uxth,
    /// Zero-extend word.
    Uxtw,
    /// No extension (also `LSL`).
    Uxtx,
    /// Sign-extend byte.
    Sxtb,
    /// Sign-extend halfword.
    Sxth,
    /// Sign-extend word.
    Sxtw,
    /// No extension, signed form.
    Sxtx,
}

impl ExtendType {
    /// Decodes the three-bit `option` field.
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        match bits & 7 {
            0 => ExtendType::Uxtb,
            1 => ExtendType::Uxth,
            2 => ExtendType::Uxtw,
            3 => ExtendType::Uxtx,
            4 => ExtendType::Sxtb,
            5 => ExtendType::Sxth,
            6 => ExtendType::Sxtw,
            _ => ExtendType::Sxtx,
        }
    }

    /// Applies the extension and a left shift to `value`.
    #[must_use]
    pub fn apply(self, value: u64, shift: u8) -> u64 {
        let extended = match self {
            ExtendType::Uxtb => value & 0xFF,
            ExtendType::Uxth => value & 0xFFFF,
            ExtendType::Uxtw => value & 0xFFFF_FFFF,
            ExtendType::Uxtx | ExtendType::Sxtx => value,
            ExtendType::Sxtb => value as u8 as i8 as i64 as u64,
            ExtendType::Sxth => value as u16 as i16 as i64 as u64,
            ExtendType::Sxtw => value as u32 as i32 as i64 as u64,
        };
        extended << shift
    }
}

/// Bitwise operation of the logical instruction class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    /// `AND` / `BIC`.
    And,
    /// `ORR` / `ORN`.
    Orr,
    /// `EOR` / `EON`.
    Eor,
    /// `ANDS` / `BICS` (sets flags).
    Ands,
}

/// Operation of the move-wide class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveWideOp {
    /// `MOVN`: inverted.
    Movn,
    /// `MOVZ`: zeroed.
    Movz,
    /// `MOVK`: keep other bits.
    Movk,
}

/// Operation of the bitfield class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitfieldOp {
    /// `SBFM` (`ASR`, `SXTB`, `SBFX`, ...).
    Signed,
    /// `BFM` (`BFI`, `BFXIL`).
    Insert,
    /// `UBFM` (`LSL`, `LSR`, `UXTB`, `UBFX`, ...).
    Unsigned,
}

/// Conditional select variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CondSelectOp {
    /// `Rn` or `Rm`.
    Csel,
    /// `Rn` or `Rm + 1`.
    Csinc,
    /// `Rn` or `!Rm`.
    Csinv,
    /// `Rn` or `-Rm`.
    Csneg,
}

/// One-source data-processing operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unary {
    /// Reverse bits.
    Rbit,
    /// Reverse bytes in each halfword.
    Rev16,
    /// Reverse bytes in each word.
    Rev32,
    /// Reverse all bytes.
    Rev,
    /// Count leading zeros.
    Clz,
    /// Count leading sign bits.
    Cls,
}

/// Two-source data-processing operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binary {
    /// Unsigned divide.
    Udiv,
    /// Signed divide.
    Sdiv,
    /// Variable shift left.
    Lslv,
    /// Variable logical shift right.
    Lsrv,
    /// Variable arithmetic shift right.
    Asrv,
    /// Variable rotate right.
    Rorv,
}

/// Three-source (multiply) operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MulOp {
    /// `Ra + Rn * Rm`.
    Madd,
    /// `Ra - Rn * Rm`.
    Msub,
    /// Signed 32x32 + 64.
    Smaddl,
    /// Signed 64 - 32x32.
    Smsubl,
    /// Unsigned 32x32 + 64.
    Umaddl,
    /// Unsigned 64 - 32x32.
    Umsubl,
    /// High half of the signed 128-bit product.
    Smulh,
    /// High half of the unsigned 128-bit product.
    Umulh,
}

/// Branch-to-register variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchRegKind {
    /// `BR` (and authenticated forms).
    Br,
    /// `BLR` (and authenticated forms).
    Blr,
    /// `RET` (and authenticated forms).
    Ret,
}

/// Addressing mode of a single or pair load/store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddrMode {
    /// `[Xn|SP, #offset]`.
    Offset {
        /// Base register (31 = SP).
        rn: u8,
        /// Byte offset.
        offset: i64,
    },
    /// `[Xn|SP, #offset]!`.
    PreIndex {
        /// Base register (31 = SP).
        rn: u8,
        /// Byte offset.
        offset: i64,
    },
    /// `[Xn|SP], #offset`.
    PostIndex {
        /// Base register (31 = SP).
        rn: u8,
        /// Byte offset.
        offset: i64,
    },
    /// `[Xn|SP, Rm{, extend #shift}]`.
    Register {
        /// Base register (31 = SP).
        rn: u8,
        /// Index register (31 = ZR).
        rm: u8,
        /// Extension of the index.
        extend: ExtendType,
        /// Left shift of the index.
        shift: u8,
    },
    /// PC-relative literal.
    Literal {
        /// Byte offset from the instruction address.
        offset: i64,
    },
}

/// Register bank of a load/store transfer register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegBank {
    /// General purpose register.
    General,
    /// SIMD&FP register.
    Vector,
}

/// Read-modify-write operation of an LSE atomic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtomicOp {
    /// `LDADD`.
    Add,
    /// `LDCLR` (AND NOT).
    Clr,
    /// `LDEOR`.
    Eor,
    /// `LDSET` (OR).
    Set,
    /// `LDSMAX`.
    Smax,
    /// `LDSMIN`.
    Smin,
    /// `LDUMAX`.
    Umax,
    /// `LDUMIN`.
    Umin,
    /// `SWP`.
    Swp,
}

/// Post-index update of an Advanced SIMD structure load/store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimdPostIndex {
    /// No write-back.
    None,
    /// Add the transfer size.
    Immediate,
    /// Add a register.
    Register(u8),
}

/// Scalar floating-point precision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FpSize {
    /// Single precision (`S` registers).
    Single,
    /// Double precision (`D` registers).
    Double,
}

impl FpSize {
    /// Size in bytes.
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            FpSize::Single => 4,
            FpSize::Double => 8,
        }
    }
}

/// One-source floating-point operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FpUnaryOp {
    /// Register move.
    Mov,
    /// Absolute value.
    Abs,
    /// Negate.
    Neg,
    /// Square root.
    Sqrt,
    /// Round to integral in the given mode.
    Round(FpRounding),
}

/// Two-source floating-point operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FpBinaryOp {
    /// Add.
    Add,
    /// Subtract.
    Sub,
    /// Multiply.
    Mul,
    /// Divide.
    Div,
    /// Maximum.
    Max,
    /// Minimum.
    Min,
    /// Maximum number (NaN ignored).
    MaxNm,
    /// Minimum number (NaN ignored).
    MinNm,
    /// Negated multiply.
    Nmul,
}

/// Fused multiply-add variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FpFusedOp {
    /// `Ra + Rn * Rm`.
    Madd,
    /// `Ra - Rn * Rm`.
    Msub,
    /// `-Ra - Rn * Rm`.
    Nmadd,
    /// `-Ra + Rn * Rm`.
    Nmsub,
}

/// Rounding mode of a floating-point conversion or `FRINT`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FpRounding {
    /// Nearest, ties to even.
    TiesEven,
    /// Toward plus infinity.
    PlusInfinity,
    /// Toward minus infinity.
    MinusInfinity,
    /// Toward zero.
    Zero,
    /// Nearest, ties away from zero.
    TiesAway,
}

/// Advanced SIMD modified-immediate operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorImmOp {
    /// Replace with the immediate.
    Movi,
    /// Replace with the inverted immediate.
    Mvni,
    /// OR the immediate in.
    Orr,
    /// Clear the immediate's bits.
    Bic,
}

/// Advanced SIMD bitwise three-register operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorLogicOp {
    /// `AND`.
    And,
    /// `BIC`.
    Bic,
    /// `ORR`.
    Orr,
    /// `ORN`.
    Orn,
    /// `EOR`.
    Eor,
    /// Bitwise select.
    Bsl,
    /// Insert if true.
    Bit,
    /// Insert if false.
    Bif,
}

/// Advanced SIMD element-wise three-register operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorArithOp {
    /// Add.
    Add,
    /// Subtract.
    Sub,
    /// Multiply.
    Mul,
    /// Compare equal.
    Cmeq,
    /// Test bits nonzero.
    Cmtst,
    /// Signed greater than.
    Cmgt,
    /// Signed greater or equal.
    Cmge,
    /// Unsigned higher.
    Cmhi,
    /// Unsigned higher or same.
    Cmhs,
}

/// Advanced SIMD shift-by-immediate operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorShiftOp {
    /// Shift left.
    Shl,
    /// Unsigned shift right.
    Ushr,
    /// Signed shift right.
    Sshr,
}

/// Advanced SIMD two-register miscellaneous operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorUnaryOp {
    /// Bitwise NOT.
    Not,
    /// Population count per byte.
    Cnt,
    /// Reverse elements within doublewords.
    Rev64,
    /// Compare equal to zero.
    Cmeq0,
    /// Sum across lanes.
    Addv,
    /// Unsigned widening sum across lanes.
    Uaddlv,
}

/// A decoded A64 instruction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Instruction {
    /// `ADR` / `ADRP`.
    Adr {
        /// Destination.
        rd: u8,
        /// Byte offset (already scaled for `ADRP`).
        offset: i64,
        /// `ADRP`: base is the 4 KiB page of the PC.
        page: bool,
    },
    /// `ADD`/`SUB`(`S`) with immediate.
    AddSubImm {
        /// 64-bit operation.
        sf: bool,
        /// Subtract.
        sub: bool,
        /// Set flags (`rd` 31 is then ZR).
        set_flags: bool,
        /// Destination.
        rd: u8,
        /// First operand (31 = SP).
        rn: u8,
        /// Shifted immediate.
        imm: u64,
    },
    /// Logical with bitmask immediate.
    LogicalImm {
        /// 64-bit operation.
        sf: bool,
        /// Operation.
        op: LogicalOp,
        /// Destination (31 = SP unless flags are set).
        rd: u8,
        /// Source.
        rn: u8,
        /// Decoded bitmask.
        imm: u64,
    },
    /// `MOVN` / `MOVZ` / `MOVK`.
    MoveWide {
        /// 64-bit operation.
        sf: bool,
        /// Operation.
        op: MoveWideOp,
        /// Destination.
        rd: u8,
        /// 16-bit immediate.
        imm16: u16,
        /// Left shift (0, 16, 32, 48).
        shift: u8,
    },
    /// `SBFM` / `BFM` / `UBFM`.
    Bitfield {
        /// 64-bit operation.
        sf: bool,
        /// Operation.
        op: BitfieldOp,
        /// Destination.
        rd: u8,
        /// Source.
        rn: u8,
        /// Rotate amount.
        immr: u8,
        /// Top source bit.
        imms: u8,
        /// Decoded write mask.
        wmask: u64,
        /// Decoded top mask.
        tmask: u64,
    },
    /// `EXTR`.
    Extract {
        /// 64-bit operation.
        sf: bool,
        /// Destination.
        rd: u8,
        /// High source.
        rn: u8,
        /// Low source.
        rm: u8,
        /// Bit position.
        lsb: u8,
    },
    /// `B` / `BL`.
    Branch {
        /// Byte offset from the instruction.
        offset: i64,
        /// `BL`.
        link: bool,
    },
    /// `B.cond`.
    BranchCond {
        /// Condition code.
        cond: u8,
        /// Byte offset from the instruction.
        offset: i64,
    },
    /// `CBZ` / `CBNZ`.
    CompareBranch {
        /// 64-bit comparison.
        sf: bool,
        /// Branch if nonzero.
        nonzero: bool,
        /// Tested register.
        rt: u8,
        /// Byte offset from the instruction.
        offset: i64,
    },
    /// `TBZ` / `TBNZ`.
    TestBranch {
        /// Branch if the bit is set.
        nonzero: bool,
        /// Tested register.
        rt: u8,
        /// Bit number.
        bit: u8,
        /// Byte offset from the instruction.
        offset: i64,
    },
    /// `BR` / `BLR` / `RET`.
    BranchReg {
        /// Variant.
        kind: BranchRegKind,
        /// Target register.
        rn: u8,
    },
    /// `SVC #imm`.
    Svc {
        /// Immediate.
        imm: u16,
    },
    /// `BRK #imm`.
    Brk {
        /// Immediate.
        imm: u16,
    },
    /// Hints, barriers, cache maintenance and PAC instructions without effect.
    Nop,
    /// `MRS Xt, sysreg`.
    Mrs {
        /// Destination.
        rt: u8,
        /// `op0:op1:CRn:CRm:op2`.
        sysreg: u16,
    },
    /// `MSR sysreg, Xt`.
    Msr {
        /// Source.
        rt: u8,
        /// `op0:op1:CRn:CRm:op2`.
        sysreg: u16,
    },
    /// `ADD`/`SUB`(`S`) with shifted register.
    AddSubShifted {
        /// 64-bit operation.
        sf: bool,
        /// Subtract.
        sub: bool,
        /// Set flags.
        set_flags: bool,
        /// Destination.
        rd: u8,
        /// First operand.
        rn: u8,
        /// Second operand.
        rm: u8,
        /// Shift type.
        shift: ShiftType,
        /// Shift amount.
        amount: u8,
    },
    /// `ADD`/`SUB`(`S`) with extended register.
    AddSubExtended {
        /// 64-bit operation.
        sf: bool,
        /// Subtract.
        sub: bool,
        /// Set flags.
        set_flags: bool,
        /// Destination (31 = SP unless flags are set).
        rd: u8,
        /// First operand (31 = SP).
        rn: u8,
        /// Second operand.
        rm: u8,
        /// Extension.
        extend: ExtendType,
        /// Left shift (0-4).
        amount: u8,
    },
    /// `ADC`/`SBC`(`S`).
    AddSubCarry {
        /// 64-bit operation.
        sf: bool,
        /// Subtract.
        sub: bool,
        /// Set flags.
        set_flags: bool,
        /// Destination.
        rd: u8,
        /// First operand.
        rn: u8,
        /// Second operand.
        rm: u8,
    },
    /// Logical with shifted register.
    LogicalShifted {
        /// 64-bit operation.
        sf: bool,
        /// Operation.
        op: LogicalOp,
        /// Invert the second operand (`BIC`, `ORN`, `EON`, `BICS`).
        invert: bool,
        /// Destination.
        rd: u8,
        /// First operand.
        rn: u8,
        /// Second operand.
        rm: u8,
        /// Shift type.
        shift: ShiftType,
        /// Shift amount.
        amount: u8,
    },
    /// Conditional select.
    CondSelect {
        /// 64-bit operation.
        sf: bool,
        /// Variant.
        op: CondSelectOp,
        /// Destination.
        rd: u8,
        /// Selected when the condition holds.
        rn: u8,
        /// Transformed and selected otherwise.
        rm: u8,
        /// Condition code.
        cond: u8,
    },
    /// `CCMP` / `CCMN`.
    CondCompare {
        /// 64-bit operation.
        sf: bool,
        /// `CCMN` (add instead of subtract).
        negate: bool,
        /// First operand.
        rn: u8,
        /// Second operand: register number or immediate.
        operand: CompareOperand,
        /// Flags when the condition fails.
        nzcv: u8,
        /// Condition code.
        cond: u8,
    },
    /// One-source data processing.
    Unary {
        /// 64-bit operation.
        sf: bool,
        /// Operation.
        op: Unary,
        /// Destination.
        rd: u8,
        /// Source.
        rn: u8,
    },
    /// Two-source data processing.
    Binary {
        /// 64-bit operation.
        sf: bool,
        /// Operation.
        op: Binary,
        /// Destination.
        rd: u8,
        /// First operand.
        rn: u8,
        /// Second operand.
        rm: u8,
    },
    /// Three-source data processing.
    Multiply {
        /// 64-bit operation.
        sf: bool,
        /// Operation.
        op: MulOp,
        /// Destination.
        rd: u8,
        /// First factor.
        rn: u8,
        /// Second factor.
        rm: u8,
        /// Addend.
        ra: u8,
    },
    /// Single-register load or store.
    LoadStore {
        /// Load (otherwise store).
        load: bool,
        /// Transfer size in bytes (1, 2, 4, 8 or 16).
        size: u8,
        /// Sign-extend the loaded value.
        signed: bool,
        /// Destination width of a sign-extending load is 64 bits.
        wide: bool,
        /// Register bank of `rt`.
        bank: RegBank,
        /// Transfer register.
        rt: u8,
        /// Address computation.
        mode: AddrMode,
    },
    /// `LDP` / `STP` / `LDPSW` / `LDNP` / `STNP`.
    LoadStorePair {
        /// Load (otherwise store).
        load: bool,
        /// Size of each element in bytes.
        size: u8,
        /// Sign-extend words (`LDPSW`).
        signed: bool,
        /// Register bank of `rt` and `rt2`.
        bank: RegBank,
        /// First register.
        rt: u8,
        /// Second register.
        rt2: u8,
        /// Address computation.
        mode: AddrMode,
    },
    /// `LDXR` / `LDAXR` / `LDXP` / `LDAXP`.
    LoadExclusive {
        /// Size of each element in bytes.
        size: u8,
        /// Pair form.
        pair: bool,
        /// First register.
        rt: u8,
        /// Second register (pair only).
        rt2: u8,
        /// Base register (31 = SP).
        rn: u8,
    },
    /// `STXR` / `STLXR` / `STXP` / `STLXP`.
    StoreExclusive {
        /// Size of each element in bytes.
        size: u8,
        /// Pair form.
        pair: bool,
        /// Status register (written with 0).
        rs: u8,
        /// First register.
        rt: u8,
        /// Second register (pair only).
        rt2: u8,
        /// Base register (31 = SP).
        rn: u8,
    },
    /// `CAS` family.
    CompareSwap {
        /// Size in bytes.
        size: u8,
        /// Compare value in, old value out.
        rs: u8,
        /// New value.
        rt: u8,
        /// Base register (31 = SP).
        rn: u8,
    },
    /// LSE atomic read-modify-write.
    Atomic {
        /// Operation.
        op: AtomicOp,
        /// Size in bytes.
        size: u8,
        /// Operand register.
        rs: u8,
        /// Receives the old value.
        rt: u8,
        /// Base register (31 = SP).
        rn: u8,
    },
    /// `LD1` / `ST1` (multiple structures).
    SimdLoadStoreMultiple {
        /// Load (otherwise store).
        load: bool,
        /// 128-bit registers.
        q: bool,
        /// Number of consecutive registers (1-4).
        count: u8,
        /// First register.
        rt: u8,
        /// Base register (31 = SP).
        rn: u8,
        /// Write-back.
        post: SimdPostIndex,
    },
    /// Scalar floating-point one-source operation.
    FpUnary {
        /// Precision.
        size: FpSize,
        /// Operation.
        op: FpUnaryOp,
        /// Destination.
        rd: u8,
        /// Source.
        rn: u8,
    },
    /// Scalar floating-point two-source operation.
    FpBinary {
        /// Precision.
        size: FpSize,
        /// Operation.
        op: FpBinaryOp,
        /// Destination.
        rd: u8,
        /// First operand.
        rn: u8,
        /// Second operand.
        rm: u8,
    },
    /// Scalar fused multiply-add.
    FpFused {
        /// Precision.
        size: FpSize,
        /// Operation.
        op: FpFusedOp,
        /// Destination.
        rd: u8,
        /// First factor.
        rn: u8,
        /// Second factor.
        rm: u8,
        /// Addend.
        ra: u8,
    },
    /// `FCMP` / `FCMPE`.
    FpCompare {
        /// Precision.
        size: FpSize,
        /// First operand.
        rn: u8,
        /// Second operand; `None` compares with `+0.0`.
        rm: Option<u8>,
    },
    /// `FCCMP` / `FCCMPE`.
    FpCondCompare {
        /// Precision.
        size: FpSize,
        /// First operand.
        rn: u8,
        /// Second operand.
        rm: u8,
        /// Flags when the condition fails.
        nzcv: u8,
        /// Condition code.
        cond: u8,
    },
    /// `FCSEL`.
    FpCondSelect {
        /// Precision.
        size: FpSize,
        /// Destination.
        rd: u8,
        /// Selected when the condition holds.
        rn: u8,
        /// Selected otherwise.
        rm: u8,
        /// Condition code.
        cond: u8,
    },
    /// `FCVT` between single and double.
    FpConvert {
        /// Source precision.
        from: FpSize,
        /// Destination precision.
        to: FpSize,
        /// Destination.
        rd: u8,
        /// Source.
        rn: u8,
    },
    /// `FMOV` (scalar, immediate).
    FpImm {
        /// Precision.
        size: FpSize,
        /// Destination.
        rd: u8,
        /// Expanded value.
        value: f64,
    },
    /// `FMOV` between a general and a SIMD&FP register.
    FpMoveGeneral {
        /// General to vector (otherwise vector to general).
        to_vector: bool,
        /// 64-bit transfer.
        sf: bool,
        /// Upper doubleword of the vector (`Vd.D[1]`).
        top: bool,
        /// Destination.
        rd: u8,
        /// Source.
        rn: u8,
    },
    /// `SCVTF` / `UCVTF` (scalar, integer).
    IntToFp {
        /// 64-bit integer source.
        sf: bool,
        /// Precision of the result.
        size: FpSize,
        /// Signed source.
        signed: bool,
        /// Destination.
        rd: u8,
        /// Source.
        rn: u8,
    },
    /// `FCVT{N,P,M,Z,A}{S,U}` (scalar, integer).
    FpToInt {
        /// 64-bit integer result.
        sf: bool,
        /// Precision of the source.
        size: FpSize,
        /// Signed result.
        signed: bool,
        /// Rounding mode.
        rounding: FpRounding,
        /// Destination.
        rd: u8,
        /// Source.
        rn: u8,
    },
    /// `MOVI` / `MVNI` / `ORR` / `BIC` (vector, immediate).
    VectorImm {
        /// 128-bit operation.
        q: bool,
        /// Operation.
        op: VectorImmOp,
        /// Destination.
        rd: u8,
        /// Expanded 64-bit immediate, replicated to both halves.
        imm: u64,
    },
    /// `DUP Vd.T, Rn`.
    DupGeneral {
        /// 128-bit operation.
        q: bool,
        /// Element size in bytes.
        esize: u8,
        /// Destination.
        rd: u8,
        /// Source.
        rn: u8,
    },
    /// `DUP Vd.T, Vn.Ts[i]` and the scalar `DUP`/`MOV` form.
    DupElement {
        /// 128-bit operation.
        q: bool,
        /// Scalar destination.
        scalar: bool,
        /// Element size in bytes.
        esize: u8,
        /// Destination.
        rd: u8,
        /// Source.
        rn: u8,
        /// Element index.
        index: u8,
    },
    /// `INS Vd.Ts[i], Rn`.
    InsGeneral {
        /// Element size in bytes.
        esize: u8,
        /// Destination.
        rd: u8,
        /// Element index.
        index: u8,
        /// Source.
        rn: u8,
    },
    /// `INS Vd.Ts[i], Vn.Ts[j]`.
    InsElement {
        /// Element size in bytes.
        esize: u8,
        /// Destination.
        rd: u8,
        /// Destination index.
        dst_index: u8,
        /// Source.
        rn: u8,
        /// Source index.
        src_index: u8,
    },
    /// `UMOV` / `SMOV`.
    MoveElement {
        /// Sign-extend.
        signed: bool,
        /// 64-bit destination.
        sf: bool,
        /// Element size in bytes.
        esize: u8,
        /// Destination.
        rd: u8,
        /// Source.
        rn: u8,
        /// Element index.
        index: u8,
    },
    /// Vector bitwise operation.
    VectorLogic {
        /// 128-bit operation.
        q: bool,
        /// Operation.
        op: VectorLogicOp,
        /// Destination.
        rd: u8,
        /// First operand.
        rn: u8,
        /// Second operand.
        rm: u8,
    },
    /// Vector element-wise arithmetic or compare.
    VectorArith {
        /// 128-bit operation.
        q: bool,
        /// Operation.
        op: VectorArithOp,
        /// Element size in bytes.
        esize: u8,
        /// Destination.
        rd: u8,
        /// First operand.
        rn: u8,
        /// Second operand.
        rm: u8,
    },
    /// Vector shift by immediate.
    VectorShift {
        /// 128-bit operation.
        q: bool,
        /// Operation.
        op: VectorShiftOp,
        /// Element size in bytes.
        esize: u8,
        /// Shift amount.
        shift: u8,
        /// Destination.
        rd: u8,
        /// Source.
        rn: u8,
    },
    /// Vector two-register miscellaneous or across-lanes operation.
    VectorUnary {
        /// 128-bit operation.
        q: bool,
        /// Operation.
        op: VectorUnaryOp,
        /// Element size in bytes.
        esize: u8,
        /// Destination.
        rd: u8,
        /// Source.
        rn: u8,
    },
    /// `EXT`.
    VectorExtract {
        /// 128-bit operation.
        q: bool,
        /// Destination.
        rd: u8,
        /// Low source.
        rn: u8,
        /// High source.
        rm: u8,
        /// Starting byte.
        index: u8,
    },
}

/// Second operand of a conditional compare.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOperand {
    /// Register.
    Register(u8),
    /// Five-bit unsigned immediate.
    Immediate(u8),
}

impl Instruction {
    /// Returns `true` for instructions that may leave the current basic block.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            Instruction::Branch { .. }
                | Instruction::BranchCond { .. }
                | Instruction::CompareBranch { .. }
                | Instruction::TestBranch { .. }
                | Instruction::BranchReg { .. }
                | Instruction::Svc { .. }
                | Instruction::Brk { .. }
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Branch { offset, link } => {
                write!(f, "{} {offset:+#x}", if *link { "bl" } else { "b" })
            }
            Instruction::BranchReg { kind, rn } => match kind {
                BranchRegKind::Br => write!(f, "br x{rn}"),
                BranchRegKind::Blr => write!(f, "blr x{rn}"),
                BranchRegKind::Ret => write!(f, "ret x{rn}"),
            },
            Instruction::Svc { imm } => write!(f, "svc #{imm:#x}"),
            Instruction::Brk { imm } => write!(f, "brk #{imm:#x}"),
            Instruction::Nop => write!(f, "nop"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_apply() {
        assert_eq!(ExtendType::Uxtb.apply(0x1FF, 0), 0xFF);
        assert_eq!(ExtendType::Sxtb.apply(0x80, 0), 0xFFFF_FFFF_FFFF_FF80);
        assert_eq!(ExtendType::Sxtw.apply(0xFFFF_FFFF, 2), 0xFFFF_FFFF_FFFF_FFFC);
        assert_eq!(ExtendType::Uxtw.apply(0x1_0000_0001, 3), 8);
    }

    #[test]
    fn test_display() {
        assert_eq!(Instruction::Nop.to_string(), "nop");
        assert_eq!(Instruction::Svc { imm: 3 }.to_string(), "svc #0x3");
        assert_eq!(
            Instruction::BranchReg {
                kind: BranchRegKind::Ret,
                rn: 30
            }
            .to_string(),
            "ret x30"
        );
    }
}
