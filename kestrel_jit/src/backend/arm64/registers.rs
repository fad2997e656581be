//! AArch64 register model and the register roles Kestrel code relies on.
//!
//! Register roles in generated code:
//! - X0-X15, X19-X25: allocatable
//! - X16, X17 (IP0/IP1): macro-assembler scratch, never allocated
//! - X18: platform reserved
//! - X26: root register (isolate roots table)
//! - X27: context register
//! - X28: pointer compression cage base
//! - X29 / X30: frame pointer / link register

use std::fmt;

// =============================================================================
// General-Purpose Registers
// =============================================================================

/// AArch64 general-purpose register.
///
/// The discriminant is the hardware encoding. Encoding 31 (SP / XZR) is
/// context dependent and is modelled by dedicated instructions instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Gpr {
    X0 = 0,
    X1 = 1,
    X2 = 2,
    X3 = 3,
    X4 = 4,
    X5 = 5,
    X6 = 6,
    X7 = 7,
    X8 = 8,
    X9 = 9,
    X10 = 10,
    X11 = 11,
    X12 = 12,
    X13 = 13,
    X14 = 14,
    X15 = 15,
    X16 = 16,
    X17 = 17,
    X18 = 18,
    X19 = 19,
    X20 = 20,
    X21 = 21,
    X22 = 22,
    X23 = 23,
    X24 = 24,
    X25 = 25,
    X26 = 26,
    X27 = 27,
    X28 = 28,
    X29 = 29,
    X30 = 30,
}

const NAMES_64: [&str; 31] = [
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14",
    "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27",
    "x28", "fp", "lr",
];

const NAMES_32: [&str; 31] = [
    "w0", "w1", "w2", "w3", "w4", "w5", "w6", "w7", "w8", "w9", "w10", "w11", "w12", "w13", "w14",
    "w15", "w16", "w17", "w18", "w19", "w20", "w21", "w22", "w23", "w24", "w25", "w26", "w27",
    "w28", "w29", "w30",
];

impl Gpr {
    /// All 31 general-purpose registers in encoding order.
    pub const ALL: [Gpr; 31] = [
        Gpr::X0,
        Gpr::X1,
        Gpr::X2,
        Gpr::X3,
        Gpr::X4,
        Gpr::X5,
        Gpr::X6,
        Gpr::X7,
        Gpr::X8,
        Gpr::X9,
        Gpr::X10,
        Gpr::X11,
        Gpr::X12,
        Gpr::X13,
        Gpr::X14,
        Gpr::X15,
        Gpr::X16,
        Gpr::X17,
        Gpr::X18,
        Gpr::X19,
        Gpr::X20,
        Gpr::X21,
        Gpr::X22,
        Gpr::X23,
        Gpr::X24,
        Gpr::X25,
        Gpr::X26,
        Gpr::X27,
        Gpr::X28,
        Gpr::X29,
        Gpr::X30,
    ];

    /// Frame pointer.
    pub const FP: Gpr = Gpr::X29;
    /// Link register.
    pub const LR: Gpr = Gpr::X30;
    /// Base of the isolate roots table.
    pub const ROOT: Gpr = Gpr::X26;
    /// Current context.
    pub const CONTEXT: Gpr = Gpr::X27;
    /// First macro-assembler scratch register.
    pub const IP0: Gpr = Gpr::X16;
    /// Second macro-assembler scratch register.
    pub const IP1: Gpr = Gpr::X17;

    /// Hardware encoding (0-30).
    #[inline(always)]
    pub const fn encoding(self) -> u8 {
        self as u8
    }

    /// Look up a register by encoding.
    #[inline]
    pub const fn from_encoding(enc: u8) -> Option<Gpr> {
        if enc < 31 {
            Some(Self::ALL[enc as usize])
        } else {
            None
        }
    }

    /// 64-bit view name (`x0`, `fp`, `lr`).
    #[inline]
    pub const fn name_64(self) -> &'static str {
        NAMES_64[self as usize]
    }

    /// 32-bit view name (`w0`).
    #[inline]
    pub const fn name_32(self) -> &'static str {
        NAMES_32[self as usize]
    }

    /// Name of the view selected by `size`.
    #[inline]
    pub const fn name(self, size: OperandSize) -> &'static str {
        match size {
            OperandSize::W => self.name_32(),
            OperandSize::X => self.name_64(),
        }
    }

    /// Whether the register allocator may hand this register out.
    #[inline]
    pub const fn is_allocatable(self) -> bool {
        GprSet::ALLOCATABLE.contains(self)
    }
}

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name_64())
    }
}

/// Width of a data-processing or memory operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandSize {
    /// 32-bit (`Wn`). Writes zero the upper half.
    W,
    /// 64-bit (`Xn`).
    X,
}

impl OperandSize {
    /// Width in bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        match self {
            OperandSize::W => 32,
            OperandSize::X => 64,
        }
    }

    /// Width in bytes.
    #[inline]
    pub const fn bytes(self) -> u32 {
        self.bits() / 8
    }
}

// =============================================================================
// Register Sets
// =============================================================================

/// A set of general-purpose registers backed by a 31-bit mask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GprSet(u32);

impl GprSet {
    /// Empty set.
    pub const EMPTY: GprSet = GprSet(0);

    /// Argument registers (X0-X7).
    pub const ARGS: GprSet = GprSet(0x0000_00FF);

    /// Registers the allocator may use: X0-X15 and X19-X25.
    pub const ALLOCATABLE: GprSet = GprSet(0x03F8_FFFF);

    /// Macro-assembler scratch registers (X16, X17).
    pub const SCRATCH: GprSet = GprSet(0x0003_0000);

    /// Registers clobbered by a call (X0-X18, X30).
    pub const CALLER_SAVED: GprSet = GprSet(0x4007_FFFF);

    /// Create a set containing a single register.
    #[inline(always)]
    pub const fn singleton(reg: Gpr) -> Self {
        GprSet(1 << reg.encoding())
    }

    /// Create from a raw mask. Bit 31 is dropped.
    #[inline(always)]
    pub const fn from_bits(bits: u32) -> Self {
        GprSet(bits & 0x7FFF_FFFF)
    }

    /// Raw mask.
    #[inline(always)]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Membership test.
    #[inline(always)]
    pub const fn contains(self, reg: Gpr) -> bool {
        (self.0 & (1 << reg.encoding())) != 0
    }

    /// Set with `reg` added.
    #[inline(always)]
    #[must_use]
    pub const fn with(self, reg: Gpr) -> Self {
        GprSet(self.0 | (1 << reg.encoding()))
    }

    /// Set with `reg` removed.
    #[inline(always)]
    #[must_use]
    pub const fn without(self, reg: Gpr) -> Self {
        GprSet(self.0 & !(1 << reg.encoding()))
    }

    /// Add `reg` in place.
    #[inline]
    pub fn insert(&mut self, reg: Gpr) {
        *self = self.with(reg);
    }

    /// Remove `reg` in place.
    #[inline]
    pub fn remove(&mut self, reg: Gpr) {
        *self = self.without(reg);
    }

    /// Union.
    #[inline(always)]
    #[must_use]
    pub const fn union(self, other: GprSet) -> Self {
        GprSet(self.0 | other.0)
    }

    /// Intersection.
    #[inline(always)]
    #[must_use]
    pub const fn intersection(self, other: GprSet) -> Self {
        GprSet(self.0 & other.0)
    }

    /// Difference (`self - other`).
    #[inline(always)]
    #[must_use]
    pub const fn difference(self, other: GprSet) -> Self {
        GprSet(self.0 & !other.0)
    }

    /// Whether the set is empty.
    #[inline(always)]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of registers in the set.
    #[inline(always)]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Lowest-numbered register, if any.
    #[inline]
    pub const fn first(self) -> Option<Gpr> {
        if self.0 == 0 {
            None
        } else {
            Gpr::from_encoding(self.0.trailing_zeros() as u8)
        }
    }

    /// Iterate in ascending encoding order.
    pub fn iter(self) -> impl Iterator<Item = Gpr> {
        Gpr::ALL.into_iter().filter(move |reg| self.contains(*reg))
    }
}

impl FromIterator<Gpr> for GprSet {
    fn from_iter<I: IntoIterator<Item = Gpr>>(iter: I) -> Self {
        iter.into_iter().fold(GprSet::EMPTY, GprSet::with)
    }
}

impl fmt::Debug for GprSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for GprSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, reg) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(reg.name_64())?;
        }
        f.write_str("}")
    }
}

// =============================================================================
// Calling Convention
// =============================================================================

/// Register conventions for calls out of generated code.
pub struct CallingConvention;

impl CallingConvention {
    /// Integer argument registers.
    pub const ARG_REGS: [Gpr; 8] = [
        Gpr::X0,
        Gpr::X1,
        Gpr::X2,
        Gpr::X3,
        Gpr::X4,
        Gpr::X5,
        Gpr::X6,
        Gpr::X7,
    ];

    /// Return value register.
    pub const RETURN_REG: Gpr = Gpr::X0;

    /// Object register for the record-write stub.
    pub const WRITE_BARRIER_OBJECT: Gpr = Gpr::X0;

    /// Slot address register for the record-write stub.
    pub const WRITE_BARRIER_SLOT: Gpr = Gpr::X1;

    /// Required stack alignment in bytes.
    pub const STACK_ALIGNMENT: u32 = 16;

    /// The `n`th argument register.
    #[inline]
    pub const fn arg_reg(n: usize) -> Option<Gpr> {
        if n < Self::ARG_REGS.len() {
            Some(Self::ARG_REGS[n])
        } else {
            None
        }
    }
}

// =============================================================================
// Memory Operands
// =============================================================================

/// Base plus signed immediate offset addressing (`[xn, #imm]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemOperand {
    /// Base register.
    pub base: Gpr,
    /// Byte offset.
    pub offset: i32,
}

impl MemOperand {
    /// `[base, #offset]`.
    #[inline]
    pub const fn new(base: Gpr, offset: i32) -> Self {
        Self { base, offset }
    }

    /// Address of a field of a tagged heap object (tag is subtracted).
    #[inline]
    pub const fn field(object: Gpr, offset: i32) -> Self {
        Self::new(object, offset - crate::runtime::layout::HEAP_OBJECT_TAG)
    }

    /// Frame slot relative to the frame pointer.
    #[inline]
    pub const fn frame(offset: i32) -> Self {
        Self::new(Gpr::FP, offset)
    }
}

impl fmt::Display for MemOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.offset == 0 {
            write!(f, "[{}]", self.base)
        } else {
            write!(f, "[{}, #{}]", self.base, self.offset)
        }
    }
}
