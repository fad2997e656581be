//! Checked int32 arithmetic, bitwise operations and comparisons.
//!
//! Every checked operation computes into a result register distinct from its
//! inputs, so an eager deopt after the operation still sees the inputs.

use crate::backend::arm64::{Condition, Extend, MacroAssembler, Operand, OperandSize};
use crate::codegen::constraints::ConstraintBuilder;
use crate::codegen::immediate::ImmediateMode;
use crate::codegen::matcher::{
    SignExtend, binop_shape, condition_for, match_shl_of_low_mask, match_sign_extend,
};
use crate::codegen::selector::NodeLowering;
use crate::codegen::state::ProcessingState;
use crate::ir::{CompareOp, DeoptReason, Opcode, Payload};
use crate::runtime::layout::RootIndex;

const W: OperandSize = OperandSize::W;

/// Register lhs, register-or-immediate rhs, register result.
fn binop_constraints(builder: &mut ConstraintBuilder<'_>, mode: ImmediateMode, swappable: bool) {
    let shape = binop_shape(builder.graph(), builder.node_id(), mode, swappable);
    builder.use_register(shape.lhs);
    builder.use_register_or_immediate(shape.rhs, mode);
    builder.define_as_register();
}

fn two_registers(builder: &mut ConstraintBuilder<'_>) {
    let (lhs, rhs) = (builder.input(0), builder.input(1));
    builder.use_register(lhs);
    builder.use_register(rhs);
    builder.define_as_register();
}

fn one_register(builder: &mut ConstraintBuilder<'_>) {
    let input = builder.input(0);
    builder.use_register(input);
    builder.define_as_register();
}

// =============================================================================
// Add / Subtract
// =============================================================================

pub struct Int32AddWithOverflow;

impl NodeLowering for Int32AddWithOverflow {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        binop_constraints(builder, ImmediateMode::ArithmeticImm, true);
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let (lhs, result) = (state.reg(0), state.result());
        match state.immediate(1) {
            Some(imm) => masm.add_imm(W, result, lhs, imm, true),
            None => masm.adds(W, result, lhs, state.reg(1)),
        }
        masm.emit_eager_deopt_if(Condition::Vs, DeoptReason::Overflow);
    }
}

pub struct Int32SubtractWithOverflow;

impl NodeLowering for Int32SubtractWithOverflow {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        binop_constraints(builder, ImmediateMode::ArithmeticImm, false);
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let (lhs, result) = (state.reg(0), state.result());
        match state.immediate(1) {
            Some(imm) => masm.sub_imm(W, result, lhs, imm, true),
            None => masm.subs(W, result, lhs, state.reg(1)),
        }
        masm.emit_eager_deopt_if(Condition::Vs, DeoptReason::Overflow);
    }
}

// =============================================================================
// Multiply / Divide / Modulus
// =============================================================================

pub struct Int32MultiplyWithOverflow;

impl NodeLowering for Int32MultiplyWithOverflow {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        two_registers(builder);
        builder.temporaries_needed(1);
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let (lhs, rhs, result, temp) = (state.reg(0), state.reg(1), state.result(), state.temp(0));

        // The 64-bit product fits in int32 iff it equals its own low word sign-extended.
        masm.smull(result, lhs, rhs);
        masm.cmp(
            OperandSize::X,
            result,
            Operand::Extended {
                reg: result,
                extend: Extend::Sxtw,
                amount: 0,
            },
        );
        masm.emit_eager_deopt_if(Condition::Ne, DeoptReason::Overflow);

        // A zero product with a negative factor is -0.
        let done = masm.create_label();
        masm.cbnz(W, result, done);
        masm.orr(W, temp, lhs, rhs);
        masm.cmp_imm(W, temp, 0);
        masm.emit_eager_deopt_if(Condition::Lt, DeoptReason::MinusZero);
        masm.bind(done);
    }
}

pub struct Int32DivideWithOverflow;

impl NodeLowering for Int32DivideWithOverflow {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        two_registers(builder);
        builder.temporaries_needed(1);
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let (lhs, rhs, result, temp) = (state.reg(0), state.reg(1), state.result(), state.temp(0));

        masm.cmp_imm(W, rhs, 0);
        masm.emit_eager_deopt_if(Condition::Eq, DeoptReason::DivisionByZero);

        // 0 / negative is -0.
        let lhs_nonzero = masm.create_label();
        masm.cbnz(W, lhs, lhs_nonzero);
        masm.cmp_imm(W, rhs, 0);
        masm.emit_eager_deopt_if(Condition::Lt, DeoptReason::MinusZero);
        masm.bind(lhs_nonzero);

        // kMinInt / -1 does not fit.
        let no_overflow = masm.create_label();
        masm.cmp_imm(W, rhs, -1);
        masm.b_cond(Condition::Ne, no_overflow);
        masm.cmp_imm(W, lhs, i64::from(i32::MIN));
        masm.emit_eager_deopt_if(Condition::Eq, DeoptReason::Overflow);
        masm.bind(no_overflow);

        masm.sdiv(W, result, lhs, rhs);
        masm.msub(W, temp, result, rhs, lhs);
        masm.cmp_imm(W, temp, 0);
        masm.emit_eager_deopt_if(Condition::Ne, DeoptReason::LostPrecision);
    }
}

pub struct Int32ModulusWithOverflow;

impl NodeLowering for Int32ModulusWithOverflow {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        two_registers(builder);
        builder.temporaries_needed(1);
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let (lhs, rhs, result, temp) = (state.reg(0), state.reg(1), state.result(), state.temp(0));

        masm.cmp_imm(W, rhs, 0);
        masm.emit_eager_deopt_if(Condition::Eq, DeoptReason::DivisionByZero);

        masm.sdiv(W, temp, lhs, rhs);
        masm.msub(W, result, temp, rhs, lhs);

        // The remainder takes the sign of the dividend: zero from a negative
        // dividend is -0.
        let done = masm.create_label();
        masm.tbz(lhs, 31, done);
        masm.cmp_imm(W, result, 0);
        masm.emit_eager_deopt_if(Condition::Eq, DeoptReason::MinusZero);
        masm.bind(done);
    }
}

// =============================================================================
// Unary
// =============================================================================

pub struct Int32NegateWithOverflow;

impl NodeLowering for Int32NegateWithOverflow {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        one_register(builder);
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let (input, result) = (state.reg(0), state.result());
        masm.cmp_imm(W, input, 0);
        masm.emit_eager_deopt_if(Condition::Eq, DeoptReason::MinusZero);
        masm.negs(W, result, input);
        masm.emit_eager_deopt_if(Condition::Vs, DeoptReason::Overflow);
    }
}

pub struct Int32IncrementWithOverflow;

impl NodeLowering for Int32IncrementWithOverflow {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        one_register(builder);
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        masm.add_imm(W, state.result(), state.reg(0), 1, true);
        masm.emit_eager_deopt_if(Condition::Vs, DeoptReason::Overflow);
    }
}

pub struct Int32DecrementWithOverflow;

impl NodeLowering for Int32DecrementWithOverflow {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        one_register(builder);
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        masm.sub_imm(W, state.result(), state.reg(0), 1, true);
        masm.emit_eager_deopt_if(Condition::Vs, DeoptReason::Overflow);
    }
}

// =============================================================================
// Bitwise
// =============================================================================

/// `Int32BitwiseAnd`, `Int32BitwiseOr` and `Int32BitwiseXor`.
pub struct Int32Bitwise;

impl NodeLowering for Int32Bitwise {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        binop_constraints(builder, ImmediateMode::LogicalImm32, true);
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let (lhs, rhs, result) = (state.reg(0), state.reg_or_imm(1), state.result());
        match state.node().opcode() {
            Opcode::Int32BitwiseAnd => masm.and(W, result, lhs, rhs),
            Opcode::Int32BitwiseOr => masm.orr(W, result, lhs, rhs),
            Opcode::Int32BitwiseXor => masm.eor(W, result, lhs, rhs),
            other => unreachable!("{} is not a bitwise binop", other.name()),
        }
    }
}

pub struct Int32BitwiseNot;

impl NodeLowering for Int32BitwiseNot {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        one_register(builder);
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        masm.mvn(W, state.result(), state.reg(0));
    }
}

// =============================================================================
// Shifts
// =============================================================================

/// Shift amounts are taken modulo 32, which both the register form and the
/// immediate range of the W-sized instructions give for free.
fn shift_constraints(builder: &mut ConstraintBuilder<'_>) {
    let (lhs, rhs) = (builder.input(0), builder.input(1));
    builder.use_register(lhs);
    builder.use_register_or_immediate(rhs, ImmediateMode::Shift32);
    builder.define_as_register();
}

pub struct Int32ShiftLeft;

impl NodeLowering for Int32ShiftLeft {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        let fused = builder
            .is_covered(builder.input(0))
            .then(|| match_shl_of_low_mask(builder.graph(), builder.node_id()))
            .flatten();
        match fused {
            Some((x, _)) => {
                builder.use_register(x);
                builder.define_as_register();
            }
            None => shift_constraints(builder),
        }
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let node = state.node();
        if state.is_covered(node.input(0)) {
            // The mask only clears bits the shift discards.
            let Some((_, k)) = match_shl_of_low_mask(state.graph(), state.node_id()) else {
                unreachable!("covered input without a fused pattern");
            };
            masm.lsl(W, state.result(), state.reg(0), Operand::Imm(i64::from(k)));
            return;
        }
        masm.lsl(W, state.result(), state.reg(0), state.reg_or_imm(1));
    }
}

pub struct Int32ShiftRight;

impl NodeLowering for Int32ShiftRight {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        let fused = builder
            .is_covered(builder.input(0))
            .then(|| match_sign_extend(builder.graph(), builder.node_id()))
            .flatten();
        match fused {
            Some((x, _)) => {
                builder.use_register(x);
                builder.define_as_register();
            }
            None => shift_constraints(builder),
        }
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let node = state.node();
        if state.is_covered(node.input(0)) {
            let Some((_, extend)) = match_sign_extend(state.graph(), state.node_id()) else {
                unreachable!("covered input without a fused pattern");
            };
            let (result, input) = (state.result(), state.reg(0));
            match extend {
                SignExtend::Byte => masm.sxtb(W, result, input),
                SignExtend::HalfWord => masm.sxth(W, result, input),
                SignExtend::Word => masm.sxtw(result, input),
            }
            return;
        }
        masm.asr(W, state.result(), state.reg(0), state.reg_or_imm(1));
    }
}

pub struct Int32ShiftRightLogical;

impl NodeLowering for Int32ShiftRightLogical {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        shift_constraints(builder);
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        masm.lsr(W, state.result(), state.reg(0), state.reg_or_imm(1));
    }
}

// =============================================================================
// Comparison
// =============================================================================

/// Operands of a comparison, with a constant left side moved to the right.
pub(crate) fn compare_constraints(builder: &mut ConstraintBuilder<'_>) {
    let shape = binop_shape(
        builder.graph(),
        builder.node_id(),
        ImmediateMode::ArithmeticImm,
        true,
    );
    builder.use_register(shape.lhs);
    builder.use_register_or_immediate(shape.rhs, ImmediateMode::ArithmeticImm);
}

/// Emit `cmp` for a comparison node and return the condition that holds when
/// `op` is true.
pub(crate) fn emit_int32_compare(
    masm: &mut MacroAssembler,
    state: &ProcessingState<'_>,
    op: CompareOp,
) -> Condition {
    let lhs = state.reg(0);
    match state.immediate(1) {
        Some(imm) => masm.cmp_imm(W, lhs, imm),
        None => masm.cmp(W, lhs, state.reg(1)),
    }
    let shape = binop_shape(
        state.graph(),
        state.node_id(),
        ImmediateMode::ArithmeticImm,
        true,
    );
    let cond = condition_for(op);
    if shape.swapped { cond.commute() } else { cond }
}

pub struct Int32Compare;

impl NodeLowering for Int32Compare {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        compare_constraints(builder);
        builder.define_as_register();
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let Payload::Compare(op) = state.node().payload() else {
            unreachable!("Int32Compare without comparison");
        };
        let cond = emit_int32_compare(masm, state, op);
        let result = state.result();
        masm.load_root(result, RootIndex::TrueValue);
        masm.with_scratch(|masm, false_value| {
            masm.load_root(false_value, RootIndex::FalseValue);
            masm.csel(OperandSize::X, result, result, false_value, cond);
        });
    }
}
