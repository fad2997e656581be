//! Operand shapes and multi-node patterns.
//!
//! A node is *covered* when a user folds it into its own instruction. Covered
//! nodes emit no code and get no registers, so a node may only be covered when
//! that user is its single use and sits in the same block.

use crate::backend::arm64::Condition;
use crate::ir::{CompareOp, Graph, NodeId, Opcode};

use super::immediate::{ImmediateMode, can_be_immediate};

// =============================================================================
// Conditions
// =============================================================================

/// Signed condition for a comparison.
pub const fn condition_for(op: CompareOp) -> Condition {
    match op {
        CompareOp::Equal => Condition::Eq,
        CompareOp::NotEqual => Condition::Ne,
        CompareOp::LessThan => Condition::Lt,
        CompareOp::LessThanOrEqual => Condition::Le,
        CompareOp::GreaterThan => Condition::Gt,
        CompareOp::GreaterThanOrEqual => Condition::Ge,
    }
}

// =============================================================================
// Binary Operand Shape
// =============================================================================

/// Operand order chosen for a two-input node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinopShape {
    /// Operand that always goes in a register.
    pub lhs: NodeId,
    /// Operand that may be folded into the instruction.
    pub rhs: NodeId,
    /// Whether the node's inputs were swapped.
    pub swapped: bool,
}

/// Pick the operand order for `node`.
///
/// When `swappable` and only the left input folds as an immediate of `mode`,
/// the inputs are swapped so it lands on the right.
pub fn binop_shape(graph: &Graph, node: NodeId, mode: ImmediateMode, swappable: bool) -> BinopShape {
    let n = graph.node(node);
    let (lhs, rhs) = (n.input(0), n.input(1));
    let folds = |id: NodeId| {
        graph
            .int32_constant(id)
            .is_some_and(|value| can_be_immediate(i64::from(value), mode))
    };
    if swappable && !folds(rhs) && folds(lhs) {
        BinopShape {
            lhs: rhs,
            rhs: lhs,
            swapped: true,
        }
    } else {
        BinopShape {
            lhs,
            rhs,
            swapped: false,
        }
    }
}

// =============================================================================
// Fusions
// =============================================================================

/// Sign extension recognised from a shift pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignExtend {
    Byte,
    HalfWord,
    Word,
}

/// `Shl(And(x, mask), k)` where the mask only clears bits the shift drops.
///
/// Returns `x` and `k`.
pub fn match_shl_of_low_mask(graph: &Graph, shl: NodeId) -> Option<(NodeId, u8)> {
    let node = graph.node(shl);
    if node.opcode() != Opcode::Int32ShiftLeft {
        return None;
    }
    let k = graph.int32_constant(node.input(1))?;
    if !(1..=31).contains(&k) {
        return None;
    }
    let and = graph.node(node.input(0));
    if and.opcode() != Opcode::Int32BitwiseAnd {
        return None;
    }
    let (x, mask) = match (
        graph.int32_constant(and.input(0)),
        graph.int32_constant(and.input(1)),
    ) {
        (_, Some(mask)) => (and.input(0), mask as u32),
        (Some(mask), None) => (and.input(1), mask as u32),
        (None, None) => return None,
    };
    let width = mask.count_ones();
    let contiguous_from_zero = mask != 0 && width + mask.leading_zeros() == 32;
    (contiguous_from_zero && k as u32 + width >= 32).then_some((x, k as u8))
}

/// `Sar(Shl(x, k), k)` with `k` of 24, 16 or 32.
pub fn match_sign_extend(graph: &Graph, sar: NodeId) -> Option<(NodeId, SignExtend)> {
    let node = graph.node(sar);
    if node.opcode() != Opcode::Int32ShiftRight {
        return None;
    }
    let k = graph.int32_constant(node.input(1))?;
    let shl = graph.node(node.input(0));
    if shl.opcode() != Opcode::Int32ShiftLeft || graph.int32_constant(shl.input(1)) != Some(k) {
        return None;
    }
    let extend = match k {
        24 => SignExtend::Byte,
        16 => SignExtend::HalfWord,
        32 => SignExtend::Word,
        _ => return None,
    };
    Some((shl.input(0), extend))
}

// =============================================================================
// Covering
// =============================================================================

/// Nodes folded into a user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoveredNodes {
    covered: Vec<bool>,
}

impl CoveredNodes {
    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        self.covered.get(id.index()).copied().unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.covered.iter().filter(|c| **c).count()
    }
}

/// Decide which nodes are covered.
///
/// Blocks and nodes are walked backwards so the outermost pattern claims its
/// inputs first; a covered node never covers anything itself.
pub fn find_covered_nodes(graph: &Graph) -> CoveredNodes {
    let uses = graph.use_counts();
    let mut covered = vec![false; graph.node_count()];
    let can_cover = |user: NodeId, input: NodeId| {
        uses[input.index()] == 1 && graph.block_of(input) == graph.block_of(user)
    };

    let blocks: Vec<_> = graph.block_ids().collect();
    for &block in blocks.iter().rev() {
        for &id in graph.block(block).nodes().iter().rev() {
            if covered[id.index()] {
                continue;
            }
            let inner = if match_sign_extend(graph, id).is_some()
                || match_shl_of_low_mask(graph, id).is_some()
            {
                graph.node(id).input(0)
            } else {
                continue;
            };
            if can_cover(id, inner) {
                covered[inner.index()] = true;
            }
        }
    }
    CoveredNodes { covered }
}
