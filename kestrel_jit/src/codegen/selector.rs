//! Opcode to lowering dispatch.

use std::sync::LazyLock;

use crate::backend::arm64::MacroAssembler;
use crate::ir::{OPCODE_COUNT, Opcode};

use super::constraints::ConstraintBuilder;
use super::nodes::{arith, calls, control, conversions, memory, values};
use super::state::ProcessingState;

/// Two-phase lowering contract of one opcode.
///
/// Phase one declares operand and result policies; phase two emits code once
/// the allocator has placed every operand.
pub trait NodeLowering: Sync {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>);

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>);
}

static LOWERINGS: LazyLock<[&'static dyn NodeLowering; OPCODE_COUNT]> =
    LazyLock::new(|| Opcode::ALL.map(lowering_for));

/// Lowering for `opcode`.
#[inline]
pub fn lowering(opcode: Opcode) -> &'static dyn NodeLowering {
    LOWERINGS[opcode as usize]
}

fn lowering_for(opcode: Opcode) -> &'static dyn NodeLowering {
    match opcode {
        Opcode::Int32Constant | Opcode::SmiConstant => &values::Constant,
        Opcode::Parameter => &values::Parameter,
        Opcode::LoadClosure => &values::LoadClosure,
        Opcode::LoadContext => &values::LoadContext,

        Opcode::CheckedSmiUntag => &conversions::CheckedSmiUntag,
        Opcode::CheckedSmiTagInt32 => &conversions::CheckedSmiTagInt32,
        Opcode::Int32ToNumber => &conversions::Int32ToNumber,
        Opcode::Uint32ToNumber => &conversions::Uint32ToNumber,

        Opcode::Int32AddWithOverflow => &arith::Int32AddWithOverflow,
        Opcode::Int32SubtractWithOverflow => &arith::Int32SubtractWithOverflow,
        Opcode::Int32MultiplyWithOverflow => &arith::Int32MultiplyWithOverflow,
        Opcode::Int32DivideWithOverflow => &arith::Int32DivideWithOverflow,
        Opcode::Int32ModulusWithOverflow => &arith::Int32ModulusWithOverflow,
        Opcode::Int32NegateWithOverflow => &arith::Int32NegateWithOverflow,
        Opcode::Int32IncrementWithOverflow => &arith::Int32IncrementWithOverflow,
        Opcode::Int32DecrementWithOverflow => &arith::Int32DecrementWithOverflow,

        Opcode::Int32BitwiseAnd | Opcode::Int32BitwiseOr | Opcode::Int32BitwiseXor => {
            &arith::Int32Bitwise
        }
        Opcode::Int32BitwiseNot => &arith::Int32BitwiseNot,
        Opcode::Int32ShiftLeft => &arith::Int32ShiftLeft,
        Opcode::Int32ShiftRight => &arith::Int32ShiftRight,
        Opcode::Int32ShiftRightLogical => &arith::Int32ShiftRightLogical,
        Opcode::Int32Compare => &arith::Int32Compare,

        Opcode::LoadTaggedField => &memory::LoadTaggedField,
        Opcode::StoreTaggedFieldWithWriteBarrier => &memory::StoreTaggedField {
            write_barrier: true,
        },
        Opcode::StoreTaggedFieldNoWriteBarrier => &memory::StoreTaggedField {
            write_barrier: false,
        },
        Opcode::CheckTypedArrayBounds => &memory::CheckTypedArrayBounds,
        Opcode::CheckDataViewBounds => &memory::CheckDataViewBounds,

        Opcode::CallRuntime => &calls::CallRuntime,
        Opcode::FunctionEntryStackCheck => &calls::FunctionEntryStackCheck,
        Opcode::ReduceInterruptBudget => &calls::ReduceInterruptBudget,

        Opcode::Jump => &control::Jump,
        Opcode::BranchIfInt32Compare => &control::BranchIfInt32Compare,
        Opcode::Switch => &control::Switch,
        Opcode::Return => &control::Return,
        Opcode::Deopt => &control::Deopt,
    }
}
