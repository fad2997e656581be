//! AArch64 backend.
//!
//! Instructions are kept in symbolic form ([`Instr`]) with exact byte sizes,
//! so code layout, label resolution and disassembly never need the binary
//! encoding.

pub mod assembler;
pub mod condition;
pub mod immediates;
pub mod instr;
pub mod macro_assembler;
pub mod registers;

pub use assembler::{AssembledCode, Assembler, Label, Relocation, RelocationType};
pub use condition::Condition;
pub use instr::{Extend, Instr, Operand, ShiftType};
pub use macro_assembler::{DeoptExit, DeoptKind, MacroAssembler, MacroOutput, Safepoint};
pub use registers::{CallingConvention, Gpr, GprSet, MemOperand, OperandSize};
