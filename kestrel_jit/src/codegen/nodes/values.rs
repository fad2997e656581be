//! Constants and frame values.

use crate::backend::arm64::{Gpr, MacroAssembler, MemOperand, OperandSize};
use crate::codegen::constraints::ConstraintBuilder;
use crate::codegen::selector::NodeLowering;
use crate::codegen::state::ProcessingState;
use crate::ir::Payload;
use crate::runtime::layout::{FRAME_CLOSURE_OFFSET, FRAME_FIRST_PARAMETER_OFFSET, TAGGED_SIZE};

/// `Int32Constant` and `SmiConstant`: folded or materialized at each use.
pub struct Constant;

impl NodeLowering for Constant {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        builder.define_as_constant();
    }

    fn generate_code(&self, _masm: &mut MacroAssembler, _state: &ProcessingState<'_>) {}
}

pub struct Parameter;

impl NodeLowering for Parameter {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        builder.define_as_register();
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let Payload::Parameter(index) = state.node().payload() else {
            unreachable!("Parameter without index");
        };
        let offset = FRAME_FIRST_PARAMETER_OFFSET + TAGGED_SIZE * i32::from(index);
        masm.ldr(OperandSize::X, state.result(), MemOperand::frame(offset));
    }
}

pub struct LoadClosure;

impl NodeLowering for LoadClosure {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        builder.define_as_register();
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        masm.ldr(
            OperandSize::X,
            state.result(),
            MemOperand::frame(FRAME_CLOSURE_OFFSET),
        );
    }
}

pub struct LoadContext;

impl NodeLowering for LoadContext {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        builder.define_as_register();
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        masm.mov(OperandSize::X, state.result(), Gpr::CONTEXT);
    }
}
