//! Constraint collection for one node.

use crate::backend::arm64::Gpr;
use crate::ir::{Graph, Node, NodeId};
use crate::regalloc::{InputPolicy, NodeConstraints, Operand, ResultPolicy};

use super::immediate::{ImmediateMode, can_be_immediate};
use super::matcher::CoveredNodes;

/// Builder passed to `NodeLowering::set_value_location_constraints`.
///
/// Operands are recorded in call order; the code generator reads their
/// locations back by the same index.
pub struct ConstraintBuilder<'a> {
    graph: &'a Graph,
    node: NodeId,
    covered: &'a CoveredNodes,
    constraints: NodeConstraints,
}

impl<'a> ConstraintBuilder<'a> {
    pub fn new(graph: &'a Graph, node: NodeId, covered: &'a CoveredNodes) -> Self {
        Self {
            graph,
            node,
            covered,
            constraints: NodeConstraints::default(),
        }
    }

    pub fn graph(&self) -> &'a Graph {
        self.graph
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn node(&self) -> &'a Node {
        self.graph.node(self.node)
    }

    /// Input `index` of the node.
    pub fn input(&self, index: usize) -> NodeId {
        self.node().input(index)
    }

    /// Whether `id` was folded into a user.
    pub fn is_covered(&self, id: NodeId) -> bool {
        self.covered.contains(id)
    }

    fn push(&mut self, value: NodeId, policy: InputPolicy) {
        debug_assert!(!self.covered.contains(value), "{value} is covered");
        self.constraints.operands.push(Operand { value, policy });
    }

    // =========================================================================
    // Operands
    // =========================================================================

    pub fn use_register(&mut self, value: NodeId) {
        self.push(value, InputPolicy::Register);
    }

    pub fn use_fixed(&mut self, value: NodeId, reg: Gpr) {
        self.push(value, InputPolicy::Fixed(reg));
    }

    pub fn use_any(&mut self, value: NodeId) {
        self.push(value, InputPolicy::Any);
    }

    pub fn use_and_clobber_register(&mut self, value: NodeId) {
        self.push(value, InputPolicy::ClobberRegister);
    }

    pub fn use_immediate(&mut self, value: NodeId) {
        debug_assert!(
            self.graph.int32_constant(value).is_some(),
            "{value} is not a constant"
        );
        self.push(value, InputPolicy::Immediate);
    }

    /// Immediate when `value` is a constant encodable in `mode`, register otherwise.
    ///
    /// Returns whether the immediate form was chosen.
    pub fn use_register_or_immediate(&mut self, value: NodeId, mode: ImmediateMode) -> bool {
        let fits = self
            .graph
            .int32_constant(value)
            .is_some_and(|v| can_be_immediate(i64::from(v), mode));
        if fits {
            self.use_immediate(value);
        } else {
            self.use_register(value);
        }
        fits
    }

    // =========================================================================
    // Result
    // =========================================================================

    pub fn define_as_register(&mut self) {
        self.constraints.result = ResultPolicy::Register;
    }

    pub fn define_as_fixed(&mut self, reg: Gpr) {
        self.constraints.result = ResultPolicy::Fixed(reg);
    }

    pub fn define_same_as_first(&mut self) {
        self.constraints.result = ResultPolicy::SameAsFirst;
    }

    pub fn define_as_constant(&mut self) {
        self.constraints.result = ResultPolicy::Constant;
    }

    pub fn temporaries_needed(&mut self, count: u8) {
        self.constraints.temporaries = count;
    }

    pub fn finish(self) -> NodeConstraints {
        self.constraints
    }
}
