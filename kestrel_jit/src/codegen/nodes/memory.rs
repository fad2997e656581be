//! Field access, the write barrier and bounds checks.

use crate::backend::arm64::{
    CallingConvention, Condition, Extend, Gpr, MacroAssembler, MemOperand, Operand, OperandSize,
};
use crate::codegen::constraints::ConstraintBuilder;
use crate::codegen::selector::NodeLowering;
use crate::codegen::state::ProcessingState;
use crate::ir::{DeoptReason, Payload};
use crate::runtime::entries::{Builtin, CallTarget};
use crate::runtime::layout::{
    JS_DATA_VIEW_BYTE_LENGTH_OFFSET, JS_TYPED_ARRAY_BYTE_LENGTH_OFFSET, PAGE_ALIGNMENT_MASK,
    PAGE_FLAGS_OFFSET, POINTERS_FROM_HERE_ARE_INTERESTING,
};

fn field_offset(state: &ProcessingState<'_>) -> i32 {
    match state.node().payload() {
        Payload::Field(offset) => offset,
        other => unreachable!("field access with payload {other:?}"),
    }
}

fn element_log2_size(state: &ProcessingState<'_>) -> u8 {
    match state.node().payload() {
        Payload::Element { log2_size } => log2_size,
        other => unreachable!("bounds check with payload {other:?}"),
    }
}

pub struct LoadTaggedField;

impl NodeLowering for LoadTaggedField {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        let object = builder.input(0);
        builder.use_register(object);
        builder.define_as_register();
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        masm.load_tagged_field(state.result(), state.reg(0), field_offset(state));
    }
}

// =============================================================================
// Stores
// =============================================================================

/// Tagged store, with or without a generational write barrier.
///
/// The barrier is skipped entirely when the stored value is statically a Smi.
/// Otherwise the object is pinned to the barrier stub's object register and
/// the fast path only tests the page flag of the host object:
///
/// ```text
///   str   xv, [xo, #off-1]
///   tbz   xv, #0, done            ; Smi
///   and   xt, xo, #page_mask
///   ldr   xt, [xt, #flags]
///   tst   xt, #interesting
///   b.ne  slow                    ; deferred: RecordWrite(xo, xo+off-1)
/// done:
/// ```
pub struct StoreTaggedField {
    pub write_barrier: bool,
}

impl StoreTaggedField {
    fn needs_barrier(&self, builder: &ConstraintBuilder<'_>) -> bool {
        self.write_barrier && !builder.graph().value_is_smi(builder.input(1))
    }
}

impl NodeLowering for StoreTaggedField {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        let (object, value) = (builder.input(0), builder.input(1));
        if self.needs_barrier(builder) {
            builder.use_fixed(object, CallingConvention::WRITE_BARRIER_OBJECT);
            builder.use_register(value);
            builder.temporaries_needed(1);
        } else {
            builder.use_register(object);
            builder.use_register(value);
        }
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let (object, value, offset) = (state.reg(0), state.reg(1), field_offset(state));
        masm.store_tagged_field(value, object, offset);
        if !self.write_barrier || state.graph().value_is_smi(state.node().input(1)) {
            return;
        }
        emit_write_barrier(masm, state, object, value, offset);
    }
}

fn emit_write_barrier(
    masm: &mut MacroAssembler,
    state: &ProcessingState<'_>,
    object: Gpr,
    value: Gpr,
    offset: i32,
) {
    debug_assert_eq!(object, CallingConvention::WRITE_BARRIER_OBJECT);
    let (flags, snapshot) = (state.temp(0), state.snapshot());
    let done = masm.create_label();

    masm.tbz(value, 0, done);
    masm.and(OperandSize::X, flags, object, Operand::Imm(PAGE_ALIGNMENT_MASK));
    masm.ldr(OperandSize::X, flags, MemOperand::new(flags, PAGE_FLAGS_OFFSET));
    masm.tst(
        OperandSize::X,
        flags,
        Operand::Imm(POINTERS_FROM_HERE_ARE_INTERESTING),
    );

    let slot_offset = MemOperand::field(object, offset).offset;
    masm.jump_to_deferred_if(Condition::Ne, move |masm| {
        masm.push(snapshot);
        masm.add_imm(
            OperandSize::X,
            CallingConvention::WRITE_BARRIER_SLOT,
            object,
            i64::from(slot_offset),
            false,
        );
        masm.call(CallTarget::Builtin(Builtin::RecordWrite), false);
        masm.pop(snapshot);
        masm.b(done);
    });
    masm.bind(done);
}

// =============================================================================
// Bounds Checks
// =============================================================================

fn bounds_check_constraints(builder: &mut ConstraintBuilder<'_>) {
    let (object, index) = (builder.input(0), builder.input(1));
    builder.use_register(object);
    builder.use_register(index);
    builder.temporaries_needed(1);
}

/// Deopts unless `index << log2_size` is below the array's byte length.
/// A negative index zero-extends to a huge offset and fails the same check.
pub struct CheckTypedArrayBounds;

impl NodeLowering for CheckTypedArrayBounds {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        bounds_check_constraints(builder);
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let (object, index, byte_length) = (state.reg(0), state.reg(1), state.temp(0));
        masm.load_field(
            OperandSize::X,
            byte_length,
            object,
            JS_TYPED_ARRAY_BYTE_LENGTH_OFFSET,
        );
        masm.cmp(
            OperandSize::X,
            byte_length,
            Operand::Extended {
                reg: index,
                extend: Extend::Uxtw,
                amount: element_log2_size(state),
            },
        );
        masm.emit_eager_deopt_if(Condition::Ls, DeoptReason::OutOfBounds);
    }
}

/// Deopts unless an access of `1 << log2_size` bytes at `index` fits in the
/// view.
pub struct CheckDataViewBounds;

impl NodeLowering for CheckDataViewBounds {
    fn set_value_location_constraints(&self, builder: &mut ConstraintBuilder<'_>) {
        bounds_check_constraints(builder);
    }

    fn generate_code(&self, masm: &mut MacroAssembler, state: &ProcessingState<'_>) {
        let (object, index, limit) = (state.reg(0), state.reg(1), state.temp(0));
        let access_size = 1i64 << element_log2_size(state);
        masm.load_field(OperandSize::W, limit, object, JS_DATA_VIEW_BYTE_LENGTH_OFFSET);
        if access_size > 1 {
            masm.sub_imm(OperandSize::W, limit, limit, access_size - 1, true);
            masm.emit_eager_deopt_if(Condition::Mi, DeoptReason::OutOfBounds);
        }
        masm.cmp(OperandSize::W, index, limit);
        masm.emit_eager_deopt_if(Condition::Hs, DeoptReason::OutOfBounds);
    }
}
