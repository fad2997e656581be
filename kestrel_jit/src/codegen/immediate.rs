//! Immediate operand folding.

use crate::backend::arm64::immediates::{
    is_arithmetic_immediate, is_load_store_offset, is_logical_immediate,
};

/// Instruction family an immediate would be encoded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImmediateMode {
    /// `add`/`sub`/`cmp`/`cmn`; negative values flip the operation.
    ArithmeticImm,
    /// 32-bit `and`/`orr`/`eor`/`tst`.
    LogicalImm32,
    /// 64-bit `and`/`orr`/`eor`/`tst`.
    LogicalImm64,
    /// 32-bit shift amount.
    Shift32,
    /// 64-bit shift amount.
    Shift64,
    /// Load/store offset for an access of the given byte size.
    LoadStoreImm(u32),
    /// The instruction has no immediate form.
    NoImmediate,
}

/// Whether `value` can be encoded directly by an instruction of `mode`.
pub fn can_be_immediate(value: i64, mode: ImmediateMode) -> bool {
    match mode {
        ImmediateMode::ArithmeticImm => {
            is_arithmetic_immediate(value)
                || value.checked_neg().is_some_and(is_arithmetic_immediate)
        }
        ImmediateMode::LogicalImm32 => is_logical_immediate(value as u32 as u64, 32),
        ImmediateMode::LogicalImm64 => is_logical_immediate(value as u64, 64),
        ImmediateMode::Shift32 => (0..32).contains(&value),
        ImmediateMode::Shift64 => (0..64).contains(&value),
        ImmediateMode::LoadStoreImm(size) => is_load_store_offset(value, size),
        ImmediateMode::NoImmediate => false,
    }
}
