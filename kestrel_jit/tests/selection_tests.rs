//! Integration tests for AArch64 instruction selection.
//!
//! Each test builds a small graph, runs the whole code generator and checks
//! the emitted listing or the deopt metadata.

use kestrel_core::{CodegenConfig, SwitchCostModel};
use kestrel_jit::codegen::CompiledCode;
use kestrel_jit::ir::{
    CompareOp, DeoptFrame, DeoptFrameKind, DeoptReason, FrameState, Graph, GraphBuilder, NodeId,
    Opcode,
};
use kestrel_jit::runtime::entries::{Builtin, RuntimeFunction};
use kestrel_jit::CodeGenerator;

// =============================================================================
// Test Helpers
// =============================================================================

fn compile(graph: &Graph) -> CompiledCode {
    let config = CodegenConfig::default();
    CodeGenerator::new(graph, &config)
        .generate()
        .expect("code generation failed")
}

fn has_line(code: &CompiledCode, pred: impl Fn(&str) -> bool) -> bool {
    code.listing().iter().any(|line| pred(line))
}

fn has_prefix(code: &CompiledCode, prefix: &str) -> bool {
    has_line(code, |line| line.starts_with(prefix))
}

/// `f(p0)`: untag, apply `body` to the int32, tag and return.
fn int32_function(name: &str, body: impl FnOnce(&mut GraphBuilder, NodeId) -> NodeId) -> Graph {
    let mut b = GraphBuilder::new(name, 1);
    let p = b.parameter(0);
    let x = b.checked_smi_untag(p);
    let y = body(&mut b, x);
    let tagged = b.checked_smi_tag(y);
    b.ret(tagged);
    b.build().expect("graph should verify")
}

// =============================================================================
// Immediate Folding
// =============================================================================

#[test]
fn test_add_folds_small_constant() {
    let graph = int32_function("add7", |b, x| {
        let c = b.int32_constant(7);
        b.int32_add(x, c)
    });
    let code = compile(&graph);
    assert!(has_line(&code, |l| l.starts_with("adds w") && l.ends_with(", #7")));
    assert!(!has_line(&code, |l| l.starts_with("mov") && l.ends_with("#7")));
}

#[test]
fn test_add_of_negative_constant_becomes_subs() {
    let graph = int32_function("sub5", |b, x| {
        let c = b.int32_constant(-5);
        b.int32_add(x, c)
    });
    let code = compile(&graph);
    assert!(has_line(&code, |l| l.starts_with("subs w") && l.ends_with(", #5")));
}

#[test]
fn test_unencodable_constant_is_materialized() {
    let graph = int32_function("add_big", |b, x| {
        let c = b.int32_constant(0x12345);
        b.int32_add(x, c)
    });
    let code = compile(&graph);
    assert!(has_line(&code, |l| l.starts_with("mov ") && l.ends_with("#74565")));
    assert!(!has_line(&code, |l| l.starts_with("adds") && l.ends_with("#74565")));
}

#[test]
fn test_constant_left_operand_is_swapped_into_immediate() {
    let graph = int32_function("add_swapped", |b, x| {
        let c = b.int32_constant(9);
        b.int32_add(c, x)
    });
    let code = compile(&graph);
    assert!(has_line(&code, |l| l.starts_with("adds w") && l.ends_with(", #9")));
}

// =============================================================================
// Comparisons
// =============================================================================

#[test]
fn test_compare_with_constant_left_commutes_condition() {
    let mut b = GraphBuilder::new("lt", 1);
    let p = b.parameter(0);
    let x = b.checked_smi_untag(p);
    let five = b.int32_constant(5);
    let less = b.compare(CompareOp::LessThan, five, x);
    b.ret(less);
    let code = compile(&b.build().unwrap());

    // 5 < x  ==>  cmp x, #5 ; gt
    assert!(has_line(&code, |l| l.starts_with("cmp w") && l.ends_with(", #5")));
    assert!(has_line(&code, |l| l.starts_with("csel x") && l.ends_with(", gt")));
    assert!(!has_line(&code, |l| l.ends_with(", lt")));
}

#[test]
fn test_compare_with_constant_right_keeps_condition() {
    let mut b = GraphBuilder::new("lt", 1);
    let p = b.parameter(0);
    let x = b.checked_smi_untag(p);
    let five = b.int32_constant(5);
    let less = b.compare(CompareOp::LessThan, x, five);
    b.ret(less);
    let code = compile(&b.build().unwrap());
    assert!(has_line(&code, |l| l.starts_with("csel x") && l.ends_with(", lt")));
}

// =============================================================================
// Pattern Fusion
// =============================================================================

#[test]
fn test_shift_of_low_mask_fuses_to_lsl() {
    let graph = int32_function("shl_mask", |b, x| {
        let mask = b.int32_constant(0xFF);
        let masked = b.bitwise_and(x, mask);
        let k = b.int32_constant(24);
        b.shift_left(masked, k)
    });
    let code = compile(&graph);
    assert!(has_line(&code, |l| l.starts_with("lsl w") && l.ends_with(", #24")));
    assert!(!has_prefix(&code, "and "));
}

#[test]
fn test_shift_keeping_masked_bits_does_not_fuse() {
    let graph = int32_function("shl_mask_short", |b, x| {
        let mask = b.int32_constant(0xFF);
        let masked = b.bitwise_and(x, mask);
        let k = b.int32_constant(4);
        b.shift_left(masked, k)
    });
    let code = compile(&graph);
    assert!(has_prefix(&code, "and w"));
    assert!(has_line(&code, |l| l.starts_with("lsl w") && l.ends_with(", #4")));
}

#[test]
fn test_shift_pair_fuses_to_sign_extend() {
    for (k, mnemonic) in [(24, "sxtb w"), (16, "sxth w")] {
        let graph = int32_function("sext", |b, x| {
            let amount = b.int32_constant(k);
            let up = b.shift_left(x, amount);
            let amount = b.int32_constant(k);
            b.shift_right(up, amount)
        });
        let code = compile(&graph);
        assert!(has_prefix(&code, mnemonic), "k = {k}: {:#?}", code.listing());
        assert!(!has_prefix(&code, "lsl "), "k = {k}");
        // Only the Smi untag shifts right.
        let shifts = code.listing().iter().filter(|l| l.starts_with("asr ")).count();
        assert_eq!(shifts, 1, "k = {k}");
    }
}

// =============================================================================
// Switch Lowering
// =============================================================================

#[test]
fn test_switch_cost_thresholds() {
    let model = SwitchCostModel::aarch64();
    assert!(model.prefers_table(5, 6, 0));
    assert!(!model.prefers_table(3, 1_000_000, 0));
    assert!(!model.prefers_table(0, 1, 0));
    assert!(!model.prefers_table(5, 6, i32::MIN));
}

fn switch_graph(values: &[i32]) -> Graph {
    let mut b = GraphBuilder::new("switch", 1);
    let p = b.parameter(0);
    let x = b.checked_smi_untag(p);
    let default = b.new_block();
    let cases: Vec<_> = values.iter().map(|&v| (v, b.new_block())).collect();
    b.switch(x, cases.clone(), default);
    for (value, block) in cases {
        b.switch_to(block);
        let c = b.smi_constant(value);
        b.ret(c);
    }
    b.switch_to(default);
    b.ret(p);
    b.build().unwrap()
}

#[test]
fn test_dense_switch_uses_jump_table() {
    let code = compile(&switch_graph(&[0, 1, 2, 3, 5]));
    assert!(has_prefix(&code, "adr x"));
    assert!(has_prefix(&code, "br x"));
    assert!(has_prefix(&code, "b.hi"));
}

#[test]
fn test_sparse_switch_uses_binary_search() {
    let code = compile(&switch_graph(&[0, 500_000, 999_999]));
    assert!(!has_prefix(&code, "br "));
    assert!(!has_prefix(&code, "adr "));
    let equality_branches = code
        .listing()
        .iter()
        .filter(|l| l.starts_with("b.eq"))
        .count();
    assert!(equality_branches >= 3);
}

#[test]
fn test_jump_table_disabled_by_config() {
    let graph = switch_graph(&[0, 1, 2, 3, 5]);
    let config = CodegenConfig {
        enable_jump_tables: false,
        ..CodegenConfig::default()
    };
    let code = CodeGenerator::new(&graph, &config).generate().unwrap();
    assert!(!has_prefix(&code, "br "));
}

// =============================================================================
// Stores and Write Barriers
// =============================================================================

fn store_graph(value_is_smi: bool, barrier: bool) -> Graph {
    let mut b = GraphBuilder::new("store", 2);
    let object = b.parameter(0);
    let value = if value_is_smi {
        b.smi_constant(3)
    } else {
        b.parameter(1)
    };
    if barrier {
        b.store_field(object, 16, value);
    } else {
        b.store_field_no_barrier(object, 16, value);
    }
    b.ret(object);
    b.build().unwrap()
}

#[test]
fn test_store_of_heap_value_emits_barrier() {
    let code = compile(&store_graph(false, true));
    assert!(has_line(&code, |l| l.starts_with("str x") && l.contains("#15]")));
    assert!(has_prefix(&code, "tbz x"));
    assert!(has_line(&code, |l| l == "bl Builtin::RecordWrite"));
}

#[test]
fn test_store_of_smi_skips_barrier() {
    let code = compile(&store_graph(true, true));
    assert!(has_prefix(&code, "str x"));
    assert!(!has_line(&code, |l| l.contains("RecordWrite")));
    assert!(!has_prefix(&code, "tbz"));
}

#[test]
fn test_store_without_barrier_kind() {
    let code = compile(&store_graph(false, false));
    assert!(!has_line(&code, |l| l.contains("RecordWrite")));
}

// =============================================================================
// Bounds Checks
// =============================================================================

fn bounds_graph(data_view: bool, log2_size: u8) -> Graph {
    let mut b = GraphBuilder::new("bounds", 2);
    let object = b.parameter(0);
    let p1 = b.parameter(1);
    let index = b.checked_smi_untag(p1);
    if data_view {
        b.check_data_view_bounds(object, index, log2_size);
    } else {
        b.check_typed_array_bounds(object, index, log2_size);
    }
    b.ret(object);
    b.build().unwrap()
}

#[test]
fn test_typed_array_bounds_check() {
    let code = compile(&bounds_graph(false, 2));
    assert!(has_line(&code, |l| l.starts_with("cmp x") && l.ends_with("uxtw #2")));
    assert!(has_prefix(&code, "b.ls"));
    // NotASmi from the untag plus OutOfBounds.
    assert_eq!(code.eager_deopt_count(), 2);
}

#[test]
fn test_data_view_bounds_check() {
    let code = compile(&bounds_graph(true, 2));
    assert!(has_line(&code, |l| l.starts_with("subs w") && l.ends_with(", #3")));
    assert!(has_prefix(&code, "b.mi"));
    assert!(has_prefix(&code, "b.hs"));
    assert_eq!(code.eager_deopt_count(), 3);
}

#[test]
fn test_byte_data_view_skips_size_adjustment() {
    let code = compile(&bounds_graph(true, 0));
    assert!(!has_prefix(&code, "b.mi"));
    assert!(has_prefix(&code, "b.hs"));
}

// =============================================================================
// Unary and Bitwise
// =============================================================================

#[test]
fn test_unary_operations() {
    let cases = [
        (Opcode::Int32NegateWithOverflow, "negs w"),
        (Opcode::Int32IncrementWithOverflow, "adds w"),
        (Opcode::Int32DecrementWithOverflow, "subs w"),
        (Opcode::Int32BitwiseNot, "mvn w"),
    ];
    for (op, prefix) in cases {
        let graph = int32_function("unary", |b, x| b.unop(op, x));
        let code = compile(&graph);
        assert!(has_prefix(&code, prefix), "{op}: no `{prefix}`");
    }

    let graph = int32_function("inc", |b, x| b.unop(Opcode::Int32IncrementWithOverflow, x));
    assert!(has_line(&compile(&graph), |l| l.starts_with("adds w") && l.ends_with(", #1")));
}

#[test]
fn test_logical_immediates_fold() {
    let graph = int32_function("xor", |b, x| {
        let mask = b.int32_constant(0xff);
        b.binop(Opcode::Int32BitwiseXor, x, mask)
    });
    let code = compile(&graph);
    assert!(has_line(&code, |l| l.starts_with("eor w") && l.ends_with(", #255")));

    // 0x1234 is not a bitmask immediate.
    let graph = int32_function("or", |b, x| {
        let c = b.int32_constant(0x1234);
        b.binop(Opcode::Int32BitwiseOr, x, c)
    });
    let code = compile(&graph);
    assert!(has_line(&code, |l| l.starts_with("orr w") && !l.contains('#')));
}

// =============================================================================
// Division and Boxing
// =============================================================================

fn deopt_reasons(code: &CompiledCode) -> Vec<DeoptReason> {
    code.deopt_table.iter().filter_map(|e| e.reason).collect()
}

fn two_int32_function(name: &str, op: Opcode) -> Graph {
    let mut b = GraphBuilder::new(name, 2);
    let (p0, p1) = (b.parameter(0), b.parameter(1));
    let x = b.checked_smi_untag(p0);
    let y = b.checked_smi_untag(p1);
    let r = b.binop(op, x, y);
    let tagged = b.checked_smi_tag(r);
    b.ret(tagged);
    b.build().unwrap()
}

#[test]
fn test_divide_checks_every_lossy_case() {
    let code = compile(&two_int32_function("div", Opcode::Int32DivideWithOverflow));
    assert!(has_prefix(&code, "sdiv w"));
    assert!(has_prefix(&code, "msub w"));
    let reasons = deopt_reasons(&code);
    for reason in [
        DeoptReason::DivisionByZero,
        DeoptReason::MinusZero,
        DeoptReason::Overflow,
        DeoptReason::LostPrecision,
    ] {
        assert!(reasons.contains(&reason), "missing {reason}");
    }
}

#[test]
fn test_modulus_checks_sign_of_dividend() {
    let code = compile(&two_int32_function("mod", Opcode::Int32ModulusWithOverflow));
    assert!(has_line(&code, |l| l.starts_with("tbz x") && l.contains(", #31, ")));
    let reasons = deopt_reasons(&code);
    assert!(reasons.contains(&DeoptReason::DivisionByZero));
    assert!(reasons.contains(&DeoptReason::MinusZero));
    assert!(!reasons.contains(&DeoptReason::LostPrecision));
}

#[test]
fn test_int32_to_number_boxes_on_overflow() {
    let mut b = GraphBuilder::new("box", 1);
    let p = b.parameter(0);
    let x = b.checked_smi_untag(p);
    let number = b.int32_to_number(x);
    b.ret(number);
    let code = compile(&b.build().unwrap());

    assert!(has_prefix(&code, "b.vs"));
    assert!(has_line(&code, |l| l == "bl Runtime::NumberFromInt32"));
    // The allocation call cannot deopt.
    assert_eq!(code.lazy_deopt_count(), 0);
    assert_eq!(code.safepoints.len(), 1);
}

#[test]
fn test_uint32_to_number_checks_top_bits() {
    let mut b = GraphBuilder::new("box_u32", 1);
    let p = b.parameter(0);
    let x = b.checked_smi_untag(p);
    let one = b.int32_constant(1);
    let shifted = b.binop(Opcode::Int32ShiftRightLogical, x, one);
    let number = b.uint32_to_number(shifted);
    b.ret(number);
    let code = compile(&b.build().unwrap());

    assert!(has_prefix(&code, "tst w"));
    assert!(has_prefix(&code, "b.ne"));
    assert!(has_line(&code, |l| l == "bl Runtime::NumberFromUint32"));
}

// =============================================================================
// Stack and Interrupt Checks
// =============================================================================

#[test]
fn test_function_entry_stack_check() {
    let mut b = GraphBuilder::new("entry", 1);
    let p = b.parameter(0);
    b.function_entry_stack_check();
    b.ret(p);
    let code = compile(&b.build().unwrap());

    assert!(has_prefix(&code, "cmp sp, x"));
    assert!(has_prefix(&code, "b.lo"));
    assert!(has_line(&code, |l| l == "bl Runtime::StackGuard"));
    assert_eq!(code.lazy_deopt_count(), 1);
}

#[test]
fn test_reduce_interrupt_budget() {
    let mut b = GraphBuilder::new("loop", 1);
    let p = b.parameter(0);
    b.reduce_interrupt_budget(100);
    b.ret(p);
    let code = compile(&b.build().unwrap());

    assert!(has_line(&code, |l| l.starts_with("subs w") && l.ends_with(", #100")));
    assert!(has_prefix(&code, "b.lt"));
    assert!(has_line(&code, |l| l == "bl Runtime::BytecodeBudgetInterrupt"));
    assert_eq!(code.lazy_deopt_count(), 1);
}

// =============================================================================
// Deopt Frames
// =============================================================================

/// Compile `f(p0, p1) = tag(untag(p0))` with `frame(closure, context, p0, p1)`
/// attached to both checks, and return every eager deopt entry.
fn eager_entries(
    frame: impl FnOnce(NodeId, NodeId, NodeId, NodeId) -> DeoptFrame,
) -> Vec<kestrel_jit::codegen::DeoptTableEntry> {
    let mut b = GraphBuilder::new("frames", 2);
    let (closure, context) = (b.closure(), b.context());
    let (p0, p1) = (b.parameter(0), b.parameter(1));
    b.set_deopt_frame(frame(closure, context, p0, p1));
    let x = b.checked_smi_untag(p0);
    let tagged = b.checked_smi_tag(x);
    b.ret(tagged);
    let code = compile(&b.build().unwrap());
    assert_eq!(code.eager_deopt_count(), 2);
    code.deopt_table
}

fn assert_entry_sizes(entries: &[kestrel_jit::codegen::DeoptTableEntry], expected: usize) {
    for entry in entries {
        assert_eq!(entry.frame.input_locations_size(), expected);
        assert_eq!(entry.input_locations.len(), expected);
    }
}

#[test]
fn test_interpreted_frame_size() {
    let entries = eager_entries(|closure, context, p0, p1| {
        DeoptFrame::interpreted(
            closure,
            8,
            FrameState {
                parameters: vec![p0, p1],
                locals: vec![context],
                accumulator: Some(p1),
            },
        )
    });
    // closure + 2 parameters + 1 local + accumulator
    assert_entry_sizes(&entries, 5);
}

#[test]
fn test_inlined_arguments_frame_size() {
    let entries = eager_entries(|closure, _, p0, p1| {
        let outer = DeoptFrame::interpreted(
            closure,
            0,
            FrameState {
                parameters: vec![p0],
                ..FrameState::default()
            },
        );
        DeoptFrame {
            kind: DeoptFrameKind::InlinedArguments {
                closure,
                arguments: vec![p0, p1],
            },
            parent: None,
        }
        .with_parent(outer)
    });
    // (1 + 2 arguments) + (1 + 1 parameter)
    assert_entry_sizes(&entries, 5);
    assert_eq!(entries[0].frame.depth(), 2);
}

#[test]
fn test_construct_stub_frame_size() {
    let entries = eager_entries(|closure, context, p0, p1| DeoptFrame {
        kind: DeoptFrameKind::ConstructStub {
            closure,
            receiver: p0,
            arguments_without_receiver: vec![p1, p1],
            context,
        },
        parent: None,
    });
    // closure + receiver + 2 arguments + context
    assert_entry_sizes(&entries, 5);
}

#[test]
fn test_builtin_continuation_frame_size() {
    let entries = eager_entries(|_, context, p0, p1| DeoptFrame {
        kind: DeoptFrameKind::BuiltinContinuation {
            builtin: Builtin::ArrayForEachLoopContinuation,
            parameters: vec![p0, p1],
            context,
        },
        parent: None,
    });
    // 2 parameters + context
    assert_entry_sizes(&entries, 3);
}

#[test]
fn test_lazy_deopt_after_runtime_call() {
    let mut b = GraphBuilder::new("call", 2);
    let (p0, p1) = (b.parameter(0), b.parameter(1));
    let result = b.call_runtime(RuntimeFunction::GetProperty, &[p0, p1]);
    b.ret(result);
    let code = compile(&b.build().unwrap());

    assert_eq!(code.lazy_deopt_count(), 1);
    let entry = code
        .deopt_table
        .iter()
        .find(|e| e.call_return_offset.is_some())
        .expect("lazy entry");
    assert_eq!(entry.input_locations.len(), entry.frame.input_locations_size());
    assert!(has_line(&code, |l| l == "bl Runtime::GetProperty"));
    assert_eq!(code.safepoints.len(), 1);
}
