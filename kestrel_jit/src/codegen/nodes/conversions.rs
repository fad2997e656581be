//! Smi tagging and number boxing.

use crate::backend::arm64::{
    CallingConvention, Condition, Label, MacroAssembler, Operand, OperandSize,
};
use crate::codegen::constraints::ConstraintBuilder;
use crate::codegen::selector::NodeLowering;
use crate::codegen::state::ProcessingState;
use crate::ir::DeoptReason;
use crate::runtime::entries::{CallTarget, RuntimeFunction};
use crate::runtime::layout::SMI_SHIFT;

const W: OperandSize = OperandSize::W;

/// Untags in place: the input register is consumed.
pub struct CheckedSmiUntag;

impl NodeLowering for CheckedSmiUntag {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        let input = builder.input(0);
        builder.use_and_clobber_register(input);
        builder.define_same_as_first();
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let value = state.reg(0);
        masm.emit_eager_deopt_if_not_smi(value, DeoptReason::NotASmi);
        masm.asr(W, value, value, Operand::Imm(i64::from(SMI_SHIFT)));
    }
}

pub struct CheckedSmiTagInt32;

impl NodeLowering for CheckedSmiTagInt32 {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        let input = builder.input(0);
        builder.use_register(input);
        builder.define_as_register();
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let input = state.reg(0);
        masm.adds(W, state.result(), input, input);
        masm.emit_eager_deopt_if(Condition::Vs, DeoptReason::Overflow);
    }
}

/// Branch to a deferred call boxing the input through `function` when `cond`
/// holds. Returns the label the slow path rejoins at.
fn emit_box_slow_path(
    masm: &mut MacroAssembler,
    state: &ProcessingState<'_>,
    cond: Condition,
    function: RuntimeFunction,
) -> Label {
    let (input, result, snapshot) = (state.reg(0), state.result(), state.snapshot());
    let done = masm.create_label();
    masm.jump_to_deferred_if(cond, move |masm| {
        masm.push(snapshot);
        masm.mov(OperandSize::X, CallingConvention::ARG_REGS[0], input);
        masm.call(CallTarget::Runtime(function), false);
        masm.mov(OperandSize::X, result, CallingConvention::RETURN_REG);
        masm.pop(snapshot);
        masm.b(done);
    });
    done
}

pub struct Int32ToNumber;

impl NodeLowering for Int32ToNumber {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        let input = builder.input(0);
        builder.use_register(input);
        builder.define_as_register();
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let input = state.reg(0);
        masm.adds(W, state.result(), input, input);
        let done = emit_box_slow_path(masm, state, Condition::Vs, RuntimeFunction::NumberFromInt32);
        masm.bind(done);
    }
}

pub struct Uint32ToNumber;

impl NodeLowering for Uint32ToNumber {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        let input = builder.input(0);
        builder.use_register(input);
        builder.define_as_register();
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let input = state.reg(0);
        // Either of the top two bits set means the value exceeds the Smi range.
        masm.tst(W, input, Operand::Imm(0xC000_0000));
        let done = emit_box_slow_path(masm, state, Condition::Ne, RuntimeFunction::NumberFromUint32);
        masm.lsl(W, state.result(), input, Operand::Imm(i64::from(SMI_SHIFT)));
        masm.bind(done);
    }
}
