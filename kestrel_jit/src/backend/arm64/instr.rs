//! Symbolic A64 instructions.
//!
//! Generated code is kept as a list of `Instr` values rather than raw words so
//! that the selector's output can be inspected and disassembled directly. Each
//! instruction knows its encoded size, which is all the assembler needs to lay
//! out labels.

use std::fmt;

use super::assembler::Label;
use super::condition::Condition;
use super::registers::{Gpr, GprSet, MemOperand, OperandSize};
use crate::runtime::entries::CallTarget;

// =============================================================================
// Operands
// =============================================================================

/// Shift applied to a register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftType {
    /// Logical shift left
    Lsl,
    /// Logical shift right
    Lsr,
    /// Arithmetic shift right
    Asr,
}

impl ShiftType {
    /// Mnemonic.
    pub const fn name(self) -> &'static str {
        match self {
            ShiftType::Lsl => "lsl",
            ShiftType::Lsr => "lsr",
            ShiftType::Asr => "asr",
        }
    }
}

/// Extension applied to a 32-bit register operand of a 64-bit operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extend {
    /// Zero-extend word
    Uxtw,
    /// Sign-extend word
    Sxtw,
}

impl Extend {
    /// Mnemonic.
    pub const fn name(self) -> &'static str {
        match self {
            Extend::Uxtw => "uxtw",
            Extend::Sxtw => "sxtw",
        }
    }
}

/// Flexible second operand of data-processing instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Plain register (same width as the instruction).
    Reg(Gpr),
    /// Encoded immediate. Validity is checked when the instruction is selected.
    Imm(i64),
    /// Register shifted by a constant.
    Shifted {
        /// Source register.
        reg: Gpr,
        /// Shift kind.
        shift: ShiftType,
        /// Shift amount.
        amount: u8,
    },
    /// 32-bit register extended to 64 bits, then shifted left.
    Extended {
        /// Source register (read as `Wn`).
        reg: Gpr,
        /// Extension kind.
        extend: Extend,
        /// Left shift after extension (0-4).
        amount: u8,
    },
}

impl Operand {
    fn fmt_sized(&self, f: &mut fmt::Formatter<'_>, size: OperandSize) -> fmt::Result {
        match *self {
            Operand::Reg(reg) => f.write_str(reg.name(size)),
            Operand::Imm(imm) => write!(f, "#{imm}"),
            Operand::Shifted { reg, shift, amount } => {
                write!(f, "{}, {} #{amount}", reg.name(size), shift.name())
            }
            Operand::Extended {
                reg,
                extend,
                amount,
            } => {
                if amount == 0 {
                    write!(f, "{}, {}", reg.name_32(), extend.name())
                } else {
                    write!(f, "{}, {} #{amount}", reg.name_32(), extend.name())
                }
            }
        }
    }
}

impl From<Gpr> for Operand {
    fn from(reg: Gpr) -> Self {
        Operand::Reg(reg)
    }
}

// =============================================================================
// Instructions
// =============================================================================

/// A single A64 instruction or a short fixed expansion (frame setup, register
/// pushes) treated as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    /// `add` / `adds`
    Add {
        size: OperandSize,
        rd: Gpr,
        rn: Gpr,
        op: Operand,
        set_flags: bool,
    },
    /// `sub` / `subs`
    Sub {
        size: OperandSize,
        rd: Gpr,
        rn: Gpr,
        op: Operand,
        set_flags: bool,
    },
    /// `cmp rn, op`
    Cmp { size: OperandSize, rn: Gpr, op: Operand },
    /// `cmn rn, op`
    Cmn { size: OperandSize, rn: Gpr, op: Operand },
    /// `tst rn, op`
    Tst { size: OperandSize, rn: Gpr, op: Operand },
    /// `and`
    And {
        size: OperandSize,
        rd: Gpr,
        rn: Gpr,
        op: Operand,
    },
    /// `orr`
    Orr {
        size: OperandSize,
        rd: Gpr,
        rn: Gpr,
        op: Operand,
    },
    /// `eor`
    Eor {
        size: OperandSize,
        rd: Gpr,
        rn: Gpr,
        op: Operand,
    },
    /// `mvn`
    Mvn { size: OperandSize, rd: Gpr, rm: Gpr },
    /// `neg` / `negs`
    Neg {
        size: OperandSize,
        rd: Gpr,
        rm: Gpr,
        set_flags: bool,
    },
    /// `lsl` by register or immediate
    Lsl {
        size: OperandSize,
        rd: Gpr,
        rn: Gpr,
        op: Operand,
    },
    /// `lsr` by register or immediate
    Lsr {
        size: OperandSize,
        rd: Gpr,
        rn: Gpr,
        op: Operand,
    },
    /// `asr` by register or immediate
    Asr {
        size: OperandSize,
        rd: Gpr,
        rn: Gpr,
        op: Operand,
    },
    /// `smull xd, wn, wm`
    Smull { rd: Gpr, rn: Gpr, rm: Gpr },
    /// `sdiv`
    Sdiv {
        size: OperandSize,
        rd: Gpr,
        rn: Gpr,
        rm: Gpr,
    },
    /// `msub rd, rn, rm, ra` (`ra - rn * rm`)
    Msub {
        size: OperandSize,
        rd: Gpr,
        rn: Gpr,
        rm: Gpr,
        ra: Gpr,
    },
    /// `sxtb`
    Sxtb { size: OperandSize, rd: Gpr, rn: Gpr },
    /// `sxth`
    Sxth { size: OperandSize, rd: Gpr, rn: Gpr },
    /// `sxtw xd, wn`
    Sxtw { rd: Gpr, rn: Gpr },
    /// `csel rd, rn, rm, cond`
    Csel {
        size: OperandSize,
        rd: Gpr,
        rn: Gpr,
        rm: Gpr,
        cond: Condition,
    },
    /// Register move.
    Mov { size: OperandSize, rd: Gpr, rm: Gpr },
    /// Immediate move (`movz`/`movn`/`movk` sequence).
    MovImm { size: OperandSize, rd: Gpr, imm: i64 },
    /// Load.
    Ldr {
        size: OperandSize,
        rt: Gpr,
        mem: MemOperand,
    },
    /// Store.
    Str {
        size: OperandSize,
        rt: Gpr,
        mem: MemOperand,
    },
    /// PC-relative address of a label.
    Adr { rd: Gpr, label: Label },
    /// Unconditional branch.
    B { label: Label },
    /// Conditional branch.
    BCond { cond: Condition, label: Label },
    /// Compare and branch if zero.
    Cbz { size: OperandSize, rt: Gpr, label: Label },
    /// Compare and branch if not zero.
    Cbnz { size: OperandSize, rt: Gpr, label: Label },
    /// Test bit and branch if zero.
    Tbz { rt: Gpr, bit: u8, label: Label },
    /// Test bit and branch if not zero.
    Tbnz { rt: Gpr, bit: u8, label: Label },
    /// Indirect branch.
    Br { rn: Gpr },
    /// Call to a runtime function or builtin.
    Bl { target: CallTarget },
    /// Return.
    Ret,
    /// Breakpoint trap.
    Brk { imm: u16 },
    /// `stp fp, lr, [sp, #-16]!; mov fp, sp; sub sp, sp, #frame_size`
    EnterFrame { frame_size: u32 },
    /// `mov sp, fp; ldp fp, lr, [sp], #16`
    LeaveFrame,
    /// Push registers in pairs (`stp`), ascending order.
    Push { regs: GprSet },
    /// Pop registers pushed by a matching `Push`.
    Pop { regs: GprSet },
    /// `cmp sp, xm`
    CmpSp { rm: Gpr },
}

impl Instr {
    /// Encoded size in bytes.
    pub fn size_in_bytes(&self) -> u32 {
        match self {
            Instr::MovImm { size, imm, .. } => 4 * mov_imm_instruction_count(*size, *imm),
            Instr::EnterFrame { frame_size } => {
                if *frame_size == 0 {
                    8
                } else {
                    12
                }
            }
            Instr::LeaveFrame => 8,
            Instr::Push { regs } | Instr::Pop { regs } => 4 * regs.count().div_ceil(2),
            _ => 4,
        }
    }

    /// Label referenced by this instruction, if any.
    pub fn label(&self) -> Option<Label> {
        match *self {
            Instr::Adr { label, .. }
            | Instr::B { label }
            | Instr::BCond { label, .. }
            | Instr::Cbz { label, .. }
            | Instr::Cbnz { label, .. }
            | Instr::Tbz { label, .. }
            | Instr::Tbnz { label, .. } => Some(label),
            _ => None,
        }
    }

    /// Whether this is a call that returns to the next instruction.
    pub fn is_call(&self) -> bool {
        matches!(self, Instr::Bl { .. })
    }

    /// Whether control never falls through to the next instruction.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instr::B { .. } | Instr::Br { .. } | Instr::Ret | Instr::Brk { .. }
        )
    }
}

/// Number of `movz`/`movn`/`movk` instructions needed to materialize `imm`.
pub fn mov_imm_instruction_count(size: OperandSize, imm: i64) -> u32 {
    let halves = size.bits() / 16;
    let value = match size {
        OperandSize::W => u64::from(imm as u32),
        OperandSize::X => imm as u64,
    };
    let chunks = (0..halves).map(|i| (value >> (16 * i)) & 0xFFFF);
    let non_zero = chunks.clone().filter(|c| *c != 0).count() as u32;
    let non_ones = chunks.filter(|c| *c != 0xFFFF).count() as u32;
    non_zero.min(non_ones).max(1)
}

fn write_rrr(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    size: OperandSize,
    rd: Gpr,
    rn: Gpr,
    op: &Operand,
) -> fmt::Result {
    write!(f, "{name} {}, {}, ", rd.name(size), rn.name(size))?;
    op.fmt_sized(f, size)
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Add {
                size,
                rd,
                rn,
                op,
                set_flags,
            } => write_rrr(f, if *set_flags { "adds" } else { "add" }, *size, *rd, *rn, op),
            Instr::Sub {
                size,
                rd,
                rn,
                op,
                set_flags,
            } => write_rrr(f, if *set_flags { "subs" } else { "sub" }, *size, *rd, *rn, op),
            Instr::Cmp { size, rn, op } => {
                write!(f, "cmp {}, ", rn.name(*size))?;
                op.fmt_sized(f, *size)
            }
            Instr::Cmn { size, rn, op } => {
                write!(f, "cmn {}, ", rn.name(*size))?;
                op.fmt_sized(f, *size)
            }
            Instr::Tst { size, rn, op } => {
                write!(f, "tst {}, ", rn.name(*size))?;
                op.fmt_sized(f, *size)
            }
            Instr::And { size, rd, rn, op } => write_rrr(f, "and", *size, *rd, *rn, op),
            Instr::Orr { size, rd, rn, op } => write_rrr(f, "orr", *size, *rd, *rn, op),
            Instr::Eor { size, rd, rn, op } => write_rrr(f, "eor", *size, *rd, *rn, op),
            Instr::Lsl { size, rd, rn, op } => write_rrr(f, "lsl", *size, *rd, *rn, op),
            Instr::Lsr { size, rd, rn, op } => write_rrr(f, "lsr", *size, *rd, *rn, op),
            Instr::Asr { size, rd, rn, op } => write_rrr(f, "asr", *size, *rd, *rn, op),
            Instr::Mvn { size, rd, rm } => {
                write!(f, "mvn {}, {}", rd.name(*size), rm.name(*size))
            }
            Instr::Neg {
                size,
                rd,
                rm,
                set_flags,
            } => write!(
                f,
                "{} {}, {}",
                if *set_flags { "negs" } else { "neg" },
                rd.name(*size),
                rm.name(*size)
            ),
            Instr::Smull { rd, rn, rm } => {
                write!(f, "smull {}, {}, {}", rd.name_64(), rn.name_32(), rm.name_32())
            }
            Instr::Sdiv { size, rd, rn, rm } => write!(
                f,
                "sdiv {}, {}, {}",
                rd.name(*size),
                rn.name(*size),
                rm.name(*size)
            ),
            Instr::Msub {
                size,
                rd,
                rn,
                rm,
                ra,
            } => write!(
                f,
                "msub {}, {}, {}, {}",
                rd.name(*size),
                rn.name(*size),
                rm.name(*size),
                ra.name(*size)
            ),
            Instr::Sxtb { size, rd, rn } => {
                write!(f, "sxtb {}, {}", rd.name(*size), rn.name_32())
            }
            Instr::Sxth { size, rd, rn } => {
                write!(f, "sxth {}, {}", rd.name(*size), rn.name_32())
            }
            Instr::Sxtw { rd, rn } => write!(f, "sxtw {}, {}", rd.name_64(), rn.name_32()),
            Instr::Csel {
                size,
                rd,
                rn,
                rm,
                cond,
            } => write!(
                f,
                "csel {}, {}, {}, {cond}",
                rd.name(*size),
                rn.name(*size),
                rm.name(*size)
            ),
            Instr::Mov { size, rd, rm } => {
                write!(f, "mov {}, {}", rd.name(*size), rm.name(*size))
            }
            Instr::MovImm { size, rd, imm } => write!(f, "mov {}, #{imm}", rd.name(*size)),
            Instr::Ldr { size, rt, mem } => write!(f, "ldr {}, {mem}", rt.name(*size)),
            Instr::Str { size, rt, mem } => write!(f, "str {}, {mem}", rt.name(*size)),
            Instr::Adr { rd, label } => write!(f, "adr {}, {label}", rd.name_64()),
            Instr::B { label } => write!(f, "b {label}"),
            Instr::BCond { cond, label } => write!(f, "b.{cond} {label}"),
            Instr::Cbz { size, rt, label } => write!(f, "cbz {}, {label}", rt.name(*size)),
            Instr::Cbnz { size, rt, label } => write!(f, "cbnz {}, {label}", rt.name(*size)),
            Instr::Tbz { rt, bit, label } => write!(f, "tbz {}, #{bit}, {label}", rt.name_64()),
            Instr::Tbnz { rt, bit, label } => {
                write!(f, "tbnz {}, #{bit}, {label}", rt.name_64())
            }
            Instr::Br { rn } => write!(f, "br {}", rn.name_64()),
            Instr::Bl { target } => write!(f, "bl {target}"),
            Instr::Ret => f.write_str("ret"),
            Instr::Brk { imm } => write!(f, "brk #{imm}"),
            Instr::EnterFrame { frame_size } => write!(f, "enter_frame #{frame_size}"),
            Instr::LeaveFrame => f.write_str("leave_frame"),
            Instr::Push { regs } => write!(f, "push {regs}"),
            Instr::Pop { regs } => write!(f, "pop {regs}"),
            Instr::CmpSp { rm } => write!(f, "cmp sp, {}", rm.name_64()),
        }
    }
}
