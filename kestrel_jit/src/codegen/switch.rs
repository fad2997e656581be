//! Switch lowering: jump table or binary search.
//!
//! ```text
//! jump table                         binary search
//!   sub  w16, wv, #min                 cmp  wv, #pivot
//!   cmp  w16, #range-1                 b.ge L_right
//!   b.hi default                       ...left half...
//!   adr  x17, L_table                L_right:
//!   add  x17, x17, w16, uxtw #2        ...right half...
//!   br   x17
//! L_table:
//!   b    case_min ... b case_max
//! ```

use tracing::trace;

use crate::backend::arm64::{Condition, Extend, Gpr, Label, MacroAssembler, Operand, OperandSize};
use crate::ir::{BlockId, SwitchTable};

use super::state::ProcessingState;

/// Below this many cases a search range is tested linearly.
const LINEAR_SEARCH_CASES: usize = 4;

/// How a switch is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchStrategy {
    JumpTable,
    BinarySearch,
}

/// Pick the dispatch strategy for `table` under the configured cost model.
pub fn choose_strategy(table: &SwitchTable, state: &ProcessingState<'_>) -> SwitchStrategy {
    let config = state.config();
    let Some((min, _)) = table.bounds() else {
        return SwitchStrategy::BinarySearch;
    };
    let prefers_table = config.switch_cost_model.prefers_table(
        table.cases.len() as u64,
        table.value_range(),
        min,
    );
    if config.enable_jump_tables && prefers_table {
        SwitchStrategy::JumpTable
    } else {
        SwitchStrategy::BinarySearch
    }
}

/// Emit dispatch on `value` (an int32 in a W register).
pub fn emit_switch(masm: &mut MacroAssembler, state: &ProcessingState<'_>, value: Gpr, table: &SwitchTable) {
    let default = state.block_label(table.default);
    let Some((min, max)) = table.bounds() else {
        masm.b(default);
        return;
    };

    let strategy = choose_strategy(table, state);
    trace!(
        node = %state.node_id(),
        cases = table.cases.len(),
        range = table.value_range(),
        ?strategy,
        "lowering switch"
    );

    match strategy {
        SwitchStrategy::JumpTable => emit_jump_table(masm, state, value, table, min, max),
        SwitchStrategy::BinarySearch => {
            let mut cases: Vec<(i32, BlockId)> = table.cases.clone();
            cases.sort_unstable_by_key(|(v, _)| *v);
            emit_binary_search(masm, state, value, &cases, default);
        }
    }
}

fn emit_jump_table(
    masm: &mut MacroAssembler,
    state: &ProcessingState<'_>,
    value: Gpr,
    table: &SwitchTable,
    min: i32,
    max: i32,
) {
    let default = state.block_label(table.default);
    let table_label = masm.create_label();
    let range = table.value_range() as i64;

    masm.with_scratch(|masm, index| {
        if min == 0 {
            masm.mov(OperandSize::W, index, value);
        } else {
            masm.sub_imm(OperandSize::W, index, value, i64::from(min), false);
        }
        masm.cmp_imm(OperandSize::W, index, range - 1);
        masm.b_cond(Condition::Hi, default);
        masm.with_scratch(|masm, base| {
            masm.adr(base, table_label);
            masm.add(
                OperandSize::X,
                base,
                base,
                Operand::Extended {
                    reg: index,
                    extend: Extend::Uxtw,
                    amount: 2,
                },
            );
            masm.br(base);
        });
    });

    masm.bind(table_label);
    for v in min..=max {
        let target = table
            .cases
            .iter()
            .find(|(case, _)| *case == v)
            .map_or(table.default, |(_, block)| *block);
        masm.b(state.block_label(target));
    }
}

fn emit_binary_search(
    masm: &mut MacroAssembler,
    state: &ProcessingState<'_>,
    value: Gpr,
    cases: &[(i32, BlockId)],
    default: Label,
) {
    if cases.len() < LINEAR_SEARCH_CASES {
        for &(case, block) in cases {
            masm.cmp_imm(OperandSize::W, value, i64::from(case));
            masm.b_cond(Condition::Eq, state.block_label(block));
        }
        masm.b(default);
        return;
    }

    let mid = cases.len() / 2;
    let right = masm.create_label();
    masm.cmp_imm(OperandSize::W, value, i64::from(cases[mid].0));
    masm.b_cond(Condition::Ge, right);
    emit_binary_search(masm, state, value, &cases[..mid], default);
    masm.bind(right);
    emit_binary_search(masm, state, value, &cases[mid..], default);
}
