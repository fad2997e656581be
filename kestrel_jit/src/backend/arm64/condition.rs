//! AArch64 condition codes.

use std::fmt;

/// Condition code evaluated against NZCV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Condition {
    /// Equal (Z == 1)
    Eq = 0b0000,
    /// Not equal (Z == 0)
    Ne = 0b0001,
    /// Unsigned higher or same, carry set (C == 1)
    Hs = 0b0010,
    /// Unsigned lower, carry clear (C == 0)
    Lo = 0b0011,
    /// Negative (N == 1)
    Mi = 0b0100,
    /// Positive or zero (N == 0)
    Pl = 0b0101,
    /// Overflow (V == 1)
    Vs = 0b0110,
    /// No overflow (V == 0)
    Vc = 0b0111,
    /// Unsigned higher (C == 1 && Z == 0)
    Hi = 0b1000,
    /// Unsigned lower or same (C == 0 || Z == 1)
    Ls = 0b1001,
    /// Signed greater or equal (N == V)
    Ge = 0b1010,
    /// Signed less than (N != V)
    Lt = 0b1011,
    /// Signed greater than (Z == 0 && N == V)
    Gt = 0b1100,
    /// Signed less or equal (Z == 1 || N != V)
    Le = 0b1101,
    /// Always
    Al = 0b1110,
}

impl Condition {
    /// 4-bit encoding.
    #[inline(always)]
    pub const fn encoding(self) -> u8 {
        self as u8
    }

    /// Logical negation: the condition that holds exactly when `self` does not.
    ///
    /// `Al` has no negation in the instruction set and is returned unchanged.
    #[inline]
    pub const fn invert(self) -> Self {
        match self {
            Condition::Eq => Condition::Ne,
            Condition::Ne => Condition::Eq,
            Condition::Hs => Condition::Lo,
            Condition::Lo => Condition::Hs,
            Condition::Mi => Condition::Pl,
            Condition::Pl => Condition::Mi,
            Condition::Vs => Condition::Vc,
            Condition::Vc => Condition::Vs,
            Condition::Hi => Condition::Ls,
            Condition::Ls => Condition::Hi,
            Condition::Ge => Condition::Lt,
            Condition::Lt => Condition::Ge,
            Condition::Gt => Condition::Le,
            Condition::Le => Condition::Gt,
            Condition::Al => Condition::Al,
        }
    }

    /// Condition to use after swapping the operands of the compare.
    ///
    /// `cmp a, b; b.lt` and `cmp b, a; b.gt` branch on the same values. Only
    /// meaningful for comparison conditions; flag-test conditions (`mi`, `vs`, ...)
    /// are returned unchanged.
    #[inline]
    pub const fn commute(self) -> Self {
        match self {
            Condition::Lt => Condition::Gt,
            Condition::Gt => Condition::Lt,
            Condition::Le => Condition::Ge,
            Condition::Ge => Condition::Le,
            Condition::Lo => Condition::Hi,
            Condition::Hi => Condition::Lo,
            Condition::Ls => Condition::Hs,
            Condition::Hs => Condition::Ls,
            other => other,
        }
    }

    /// Assembly suffix (`eq`, `hs`, ...).
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Condition::Eq => "eq",
            Condition::Ne => "ne",
            Condition::Hs => "hs",
            Condition::Lo => "lo",
            Condition::Mi => "mi",
            Condition::Pl => "pl",
            Condition::Vs => "vs",
            Condition::Vc => "vc",
            Condition::Hi => "hi",
            Condition::Ls => "ls",
            Condition::Ge => "ge",
            Condition::Lt => "lt",
            Condition::Gt => "gt",
            Condition::Le => "le",
            Condition::Al => "al",
        }
    }

    /// Evaluate against NZCV flags.
    pub const fn holds(self, n: bool, z: bool, c: bool, v: bool) -> bool {
        match self {
            Condition::Eq => z,
            Condition::Ne => !z,
            Condition::Hs => c,
            Condition::Lo => !c,
            Condition::Mi => n,
            Condition::Pl => !n,
            Condition::Vs => v,
            Condition::Vc => !v,
            Condition::Hi => c && !z,
            Condition::Ls => !c || z,
            Condition::Ge => n == v,
            Condition::Lt => n != v,
            Condition::Gt => !z && n == v,
            Condition::Le => z || n != v,
            Condition::Al => true,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
