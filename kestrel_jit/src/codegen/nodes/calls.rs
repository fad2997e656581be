//! Runtime calls and the checks that call out on their slow path.

use crate::backend::arm64::{CallingConvention, Condition, MacroAssembler, OperandSize};
use crate::codegen::constraints::ConstraintBuilder;
use crate::codegen::selector::NodeLowering;
use crate::codegen::state::ProcessingState;
use crate::ir::Payload;
use crate::runtime::entries::{CallTarget, RuntimeFunction};
use crate::runtime::layout::{
    FEEDBACK_CELL_INTERRUPT_BUDGET_OFFSET, JS_FUNCTION_FEEDBACK_CELL_OFFSET, RootIndex,
};

/// Arguments in the argument registers, result in the return register.
pub struct CallRuntime;

impl NodeLowering for CallRuntime {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        let inputs = builder.node().inputs();
        for (arg, reg) in inputs.iter().zip(CallingConvention::ARG_REGS) {
            builder.use_fixed(*arg, reg);
        }
        builder.define_as_fixed(CallingConvention::RETURN_REG);
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let node = state.node();
        let Payload::Runtime { function, .. } = node.payload() else {
            unreachable!("CallRuntime without target");
        };
        masm.call(CallTarget::Runtime(function), node.lazy_deopt().is_some());
    }
}

/// `cmp sp, limit` with a deferred `StackGuard` call when below the limit.
pub struct FunctionEntryStackCheck;

impl NodeLowering for FunctionEntryStackCheck {
    fn set_value_location_constraints(&self, _builder: &mut ConstraintBuilder<'_>) {}

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let snapshot = state.snapshot();
        let done = masm.create_label();
        masm.with_scratch(|masm, limit| {
            masm.load_root(limit, RootIndex::StackLimit);
            masm.cmp_sp(limit);
        });
        masm.jump_to_deferred_if(Condition::Lo, move |masm| {
            masm.push(snapshot);
            masm.call(CallTarget::Runtime(RuntimeFunction::StackGuard), true);
            masm.pop(snapshot);
            masm.b(done);
        });
        masm.bind(done);
    }
}

/// Decrement the closure's interrupt budget; call out once it goes negative.
pub struct ReduceInterruptBudget;

impl NodeLowering for ReduceInterruptBudget {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        let closure = builder.input(0);
        builder.use_register(closure);
        builder.temporaries_needed(2);
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let Payload::Budget(amount) = state.node().payload() else {
            unreachable!("ReduceInterruptBudget without amount");
        };
        let (closure, cell, budget) = (state.reg(0), state.temp(0), state.temp(1));
        let snapshot = state.snapshot();

        masm.load_tagged_field(cell, closure, JS_FUNCTION_FEEDBACK_CELL_OFFSET);
        masm.load_field(
            OperandSize::W,
            budget,
            cell,
            FEEDBACK_CELL_INTERRUPT_BUDGET_OFFSET,
        );
        masm.sub_imm(OperandSize::W, budget, budget, i64::from(amount), true);
        // str leaves the flags alone.
        masm.store_field(
            OperandSize::W,
            budget,
            cell,
            FEEDBACK_CELL_INTERRUPT_BUDGET_OFFSET,
        );

        let done = masm.create_label();
        masm.jump_to_deferred_if(Condition::Lt, move |masm| {
            masm.push(snapshot);
            masm.mov(OperandSize::X, CallingConvention::ARG_REGS[0], closure);
            masm.call(
                CallTarget::Runtime(RuntimeFunction::BytecodeBudgetInterrupt),
                true,
            );
            masm.pop(snapshot);
            masm.b(done);
        });
        masm.bind(done);
    }
}
