//! Block terminators.

use crate::backend::arm64::{CallingConvention, MacroAssembler};
use crate::codegen::constraints::ConstraintBuilder;
use crate::codegen::selector::NodeLowering;
use crate::codegen::state::ProcessingState;
use crate::codegen::switch::emit_switch;
use crate::ir::Payload;

use super::arith::{compare_constraints, emit_int32_compare};

pub struct Jump;

impl NodeLowering for Jump {
    fn set_value_location_constraints(&self, _builder: &mut ConstraintBuilder<'_>) {}

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let Payload::Jump(target) = state.node().payload() else {
            unreachable!("Jump without target");
        };
        if !state.is_next_block(target) {
            masm.b(state.block_label(target));
        }
    }
}

/// Falls through to whichever target is laid out next.
pub struct BranchIfInt32Compare;

impl NodeLowering for BranchIfInt32Compare {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        compare_constraints(builder);
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let Payload::Branch {
            op,
            if_true,
            if_false,
        } = state.node().payload()
        else {
            unreachable!("BranchIfInt32Compare without targets");
        };
        let cond = emit_int32_compare(masm, state, op);
        if state.is_next_block(if_true) {
            masm.b_cond(cond.invert(), state.block_label(if_false));
            return;
        }
        masm.b_cond(cond, state.block_label(if_true));
        if !state.is_next_block(if_false) {
            masm.b(state.block_label(if_false));
        }
    }
}

pub struct Switch;

impl NodeLowering for Switch {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        let value = builder.input(0);
        builder.use_register(value);
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let Payload::Switch(id) = state.node().payload() else {
            unreachable!("Switch without table");
        };
        emit_switch(masm, state, state.reg(0), state.graph().switch(id));
    }
}

pub struct Return;

impl NodeLowering for Return {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        let value = builder.input(0);
        builder.use_fixed(value, CallingConvention::RETURN_REG);
    }

    fn generate_code(&self, masm: &mut MacroAssembler, _state: &ProcessingState<'_>) {
        masm.leave_frame();
        masm.ret();
    }
}

pub struct Deopt;

impl NodeLowering for Deopt {
    fn set_value_location_constraints(&self, _builder: &mut ConstraintBuilder<'_>) {}

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let Payload::Deopt(reason) = state.node().payload() else {
            unreachable!("Deopt without reason");
        };
        masm.emit_eager_deopt(reason);
    }
}
