//! Call targets reachable from generated code.
//!
//! Targets are opaque ids. The code installer resolves them to addresses.

use std::fmt;

/// Runtime functions callable through `CallRuntime` or deferred slow paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeFunction {
    /// Handle a stack limit hit at function entry.
    StackGuard,
    /// Interrupt budget exhausted: tier-up check plus stack check.
    BytecodeBudgetInterrupt,
    /// Box an int32 that does not fit in a Smi.
    NumberFromInt32,
    /// Box a uint32 that does not fit in a Smi.
    NumberFromUint32,
    /// Generic property load.
    GetProperty,
    /// Generic property store.
    SetProperty,
    /// Throw a TypeError with a message id.
    ThrowTypeError,
    /// Abort with a message id (debug code only).
    Abort,
}

impl RuntimeFunction {
    /// Number of arguments the function expects.
    pub const fn arity(self) -> usize {
        match self {
            RuntimeFunction::StackGuard
            | RuntimeFunction::BytecodeBudgetInterrupt
            | RuntimeFunction::NumberFromInt32
            | RuntimeFunction::NumberFromUint32
            | RuntimeFunction::ThrowTypeError
            | RuntimeFunction::Abort => 1,
            RuntimeFunction::GetProperty => 2,
            RuntimeFunction::SetProperty => 3,
        }
    }

    /// Name as printed in disassembly.
    pub const fn name(self) -> &'static str {
        match self {
            RuntimeFunction::StackGuard => "StackGuard",
            RuntimeFunction::BytecodeBudgetInterrupt => "BytecodeBudgetInterrupt",
            RuntimeFunction::NumberFromInt32 => "NumberFromInt32",
            RuntimeFunction::NumberFromUint32 => "NumberFromUint32",
            RuntimeFunction::GetProperty => "GetProperty",
            RuntimeFunction::SetProperty => "SetProperty",
            RuntimeFunction::ThrowTypeError => "ThrowTypeError",
            RuntimeFunction::Abort => "Abort",
        }
    }
}

/// Code stubs with custom calling conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// Write barrier slow path: object in `x0`, slot address in `x1`.
    RecordWrite,
    /// Eager deoptimization entry.
    DeoptimizationEntryEager,
    /// Lazy deoptimization entry.
    DeoptimizationEntryLazy,
    /// Resumes an `Array.prototype.forEach` loop after a lazy deopt.
    ArrayForEachLoopContinuation,
}

impl Builtin {
    /// Name as printed in disassembly.
    pub const fn name(self) -> &'static str {
        match self {
            Builtin::RecordWrite => "RecordWrite",
            Builtin::DeoptimizationEntryEager => "DeoptimizationEntry_Eager",
            Builtin::DeoptimizationEntryLazy => "DeoptimizationEntry_Lazy",
            Builtin::ArrayForEachLoopContinuation => "ArrayForEachLoopContinuation",
        }
    }
}

/// Target of a direct call instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallTarget {
    /// Runtime function.
    Runtime(RuntimeFunction),
    /// Builtin stub.
    Builtin(Builtin),
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallTarget::Runtime(function) => write!(f, "Runtime::{}", function.name()),
            CallTarget::Builtin(builtin) => write!(f, "Builtin::{}", builtin.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_target_display() {
        assert_eq!(
            CallTarget::Builtin(Builtin::RecordWrite).to_string(),
            "Builtin::RecordWrite"
        );
        assert_eq!(
            CallTarget::Runtime(RuntimeFunction::GetProperty).to_string(),
            "Runtime::GetProperty"
        );
    }

    #[test]
    fn test_arity() {
        assert_eq!(RuntimeFunction::StackGuard.arity(), 1);
        assert_eq!(RuntimeFunction::SetProperty.arity(), 3);
    }
}
