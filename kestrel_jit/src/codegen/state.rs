//! Per-node view handed to `NodeLowering::generate_code`.

use kestrel_core::CodegenConfig;

use crate::backend::arm64::{Gpr, GprSet, Label, Operand};
use crate::ir::{BlockId, Graph, Node, NodeId, ValueLocation};
use crate::regalloc::NodeAllocation;

use super::matcher::CoveredNodes;

/// Everything a lowering may read while emitting one node.
pub struct ProcessingState<'a> {
    pub(crate) graph: &'a Graph,
    pub(crate) node: NodeId,
    pub(crate) allocation: &'a NodeAllocation,
    pub(crate) covered: &'a CoveredNodes,
    pub(crate) config: &'a CodegenConfig,
    pub(crate) block_labels: &'a [Label],
    pub(crate) next_block: Option<BlockId>,
}

impl<'a> ProcessingState<'a> {
    pub fn graph(&self) -> &'a Graph {
        self.graph
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn node(&self) -> &'a Node {
        self.graph.node(self.node)
    }

    pub fn config(&self) -> &'a CodegenConfig {
        self.config
    }

    pub fn is_covered(&self, id: NodeId) -> bool {
        self.covered.contains(id)
    }

    // =========================================================================
    // Locations
    // =========================================================================

    /// Location of operand `index`, in constraint order.
    pub fn operand(&self, index: usize) -> ValueLocation {
        self.allocation.operands[index]
    }

    /// Register of operand `index`.
    ///
    /// # Panics
    ///
    /// If the operand was not constrained to a register.
    pub fn reg(&self, index: usize) -> Gpr {
        match self.operand(index) {
            ValueLocation::Register(reg) => reg,
            other => panic!("operand {index} of {} is in {other}, not a register", self.node),
        }
    }

    /// Constant value of an immediate operand.
    pub fn immediate(&self, index: usize) -> Option<i64> {
        match self.operand(index) {
            ValueLocation::Constant(value) => Some(value),
            _ => None,
        }
    }

    /// Operand `index` as an instruction operand (register or immediate).
    pub fn reg_or_imm(&self, index: usize) -> Operand {
        match self.operand(index) {
            ValueLocation::Constant(value) => Operand::Imm(value),
            _ => Operand::Reg(self.reg(index)),
        }
    }

    /// Result register.
    pub fn result(&self) -> Gpr {
        match self.allocation.result {
            ValueLocation::Register(reg) => reg,
            other => panic!("result of {} is in {other}, not a register", self.node),
        }
    }

    pub fn temp(&self, index: usize) -> Gpr {
        self.allocation.temporaries[index]
    }

    /// Live registers a deferred call must preserve.
    pub fn snapshot(&self) -> GprSet {
        self.allocation.snapshot
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    pub fn block_label(&self, block: BlockId) -> Label {
        self.block_labels[block.index()]
    }

    /// Whether `block` is laid out right after the current one.
    pub fn is_next_block(&self, block: BlockId) -> bool {
        self.next_block == Some(block)
    }
}
