//! Block-structured IR graph.
//!
//! Nodes live in a single arena owned by the graph and are never freed
//! individually. Blocks list their nodes in execution order and end with
//! exactly one control node.

use kestrel_core::{KestrelError, KestrelResult};
use smallvec::{SmallVec, smallvec};
use thiserror::Error;

use super::node::{BlockId, Node, NodeId, SwitchId};
use super::opcode::{InputCount, Opcode, Payload, PayloadKind};
use super::properties::ValueRepresentation;
use crate::runtime::layout;

/// Maximum number of arguments a runtime call passes in registers.
pub const MAX_RUNTIME_CALL_ARGS: usize = 8;

// =============================================================================
// Blocks and Switch Tables
// =============================================================================

/// A basic block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    nodes: Vec<NodeId>,
    control: Option<NodeId>,
}

impl Block {
    /// Non-control nodes in order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Terminating control node.
    pub fn control(&self) -> Option<NodeId> {
        self.control
    }

    /// All nodes including the control node.
    pub fn all_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied().chain(self.control)
    }
}

/// Targets of a `Switch` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchTable {
    /// Case values and their targets.
    pub cases: Vec<(i32, BlockId)>,
    /// Target when no case matches.
    pub default: BlockId,
}

impl SwitchTable {
    /// Smallest and largest case value.
    pub fn bounds(&self) -> Option<(i32, i32)> {
        let min = self.cases.iter().map(|(v, _)| *v).min()?;
        let max = self.cases.iter().map(|(v, _)| *v).max()?;
        Some((min, max))
    }

    /// Number of values between the smallest and largest case, inclusive.
    pub fn value_range(&self) -> u64 {
        self.bounds()
            .map_or(0, |(min, max)| (i64::from(max) - i64::from(min)) as u64 + 1)
    }
}

// =============================================================================
// Rewrite Errors
// =============================================================================

/// Why a node cannot be overwritten in place with another opcode.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RewriteError {
    /// The new opcode takes a different number of inputs.
    #[error("cannot rewrite {from} into {to}: {actual} inputs, {expected} expected")]
    InputCount {
        from: Opcode,
        to: Opcode,
        expected: usize,
        actual: usize,
    },

    /// The payload is not the kind the new opcode carries.
    #[error("cannot rewrite {from} into {to}: payload kind {actual:?}, {expected:?} expected")]
    PayloadKind {
        from: Opcode,
        to: Opcode,
        expected: PayloadKind,
        actual: PayloadKind,
    },

    /// The new payload is larger than the storage of the old node.
    #[error("cannot rewrite {from} into {to}: payload needs {new} bytes, node has {old}")]
    PayloadSize {
        from: Opcode,
        to: Opcode,
        old: usize,
        new: usize,
    },

    /// The new opcode needs deopt info or a register snapshot the old one lacked.
    #[error("cannot rewrite {from} into {to}: deopt or snapshot requirements differ")]
    Properties { from: Opcode, to: Opcode },
}

// =============================================================================
// Graph
// =============================================================================

/// IR of one function.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    name: String,
    parameter_count: u16,
    nodes: Vec<Node>,
    block_of: Vec<BlockId>,
    blocks: Vec<Block>,
    switches: Vec<SwitchTable>,
}

impl Graph {
    /// Create an empty graph.
    pub fn new(name: impl Into<String>, parameter_count: u16) -> Self {
        Self {
            name: name.into(),
            parameter_count,
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_count(&self) -> u16 {
        self.parameter_count
    }

    /// Append an empty block.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        id
    }

    /// Append `node` to `block`. A control node closes the block.
    pub fn push(&mut self, block: BlockId, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let is_control = node.opcode().is_control();
        self.nodes.push(node);
        self.block_of.push(block);
        let block = &mut self.blocks[block.index()];
        debug_assert!(block.control.is_none(), "block already terminated");
        if is_control {
            block.control = Some(id);
        } else {
            block.nodes.push(id);
        }
        id
    }

    /// Register a switch table.
    pub fn add_switch(&mut self, table: SwitchTable) -> SwitchId {
        let id = SwitchId(self.switches.len() as u32);
        self.switches.push(table);
        id
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Iterate all nodes with their ids.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId(i as u32), node))
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Block ids in layout order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    /// Block containing `id`.
    #[inline]
    pub fn block_of(&self, id: NodeId) -> BlockId {
        self.block_of[id.index()]
    }

    pub fn switch(&self, id: SwitchId) -> &SwitchTable {
        &self.switches[id.0 as usize]
    }

    /// Constant value of `id`, if it is an int32 or Smi constant.
    pub fn int32_constant(&self, id: NodeId) -> Option<i32> {
        self.node(id).int32_value()
    }

    /// Whether the value of `id` is statically known to be a Smi.
    pub fn value_is_smi(&self, id: NodeId) -> bool {
        matches!(
            self.node(id).opcode(),
            Opcode::SmiConstant | Opcode::CheckedSmiTagInt32
        )
    }

    /// Number of uses of each node, counting references from deopt frames.
    pub fn use_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.nodes.len()];
        for node in &self.nodes {
            for input in node.inputs() {
                counts[input.index()] += 1;
            }
            node.for_each_deopt_value(&mut |id| counts[id.index()] += 1);
        }
        counts
    }

    /// Number of inputs `opcode` takes with `payload`.
    fn expected_input_count(opcode: Opcode, payload: Payload) -> usize {
        match (opcode.info().inputs, payload) {
            (InputCount::Fixed(n), _) => n as usize,
            (InputCount::Variadic, Payload::Runtime { argc, .. }) => argc as usize,
            (InputCount::Variadic, _) => 0,
        }
    }

    // =========================================================================
    // In-place Rewriting
    // =========================================================================

    /// Replace the opcode of `id` in place, keeping its inputs and deopt info.
    ///
    /// The rewrite is rejected unless the node's storage can hold the new
    /// opcode: same input count, a payload of the right kind that is no larger
    /// than the old one, and no deopt or snapshot requirement the old node
    /// was not built with.
    pub fn overwrite_with(
        &mut self,
        id: NodeId,
        opcode: Opcode,
        payload: Payload,
    ) -> Result<(), RewriteError> {
        let node = self.node(id);
        let from = node.opcode();

        let expected = Self::expected_input_count(opcode, payload);
        if node.input_count() != expected {
            return Err(RewriteError::InputCount {
                from,
                to: opcode,
                expected,
                actual: node.input_count(),
            });
        }
        if opcode.info().payload != payload.kind() {
            return Err(RewriteError::PayloadKind {
                from,
                to: opcode,
                expected: opcode.info().payload,
                actual: payload.kind(),
            });
        }
        if payload.size() > node.payload().size() {
            return Err(RewriteError::PayloadSize {
                from,
                to: opcode,
                old: node.payload().size(),
                new: payload.size(),
            });
        }
        if !from.properties().implies_deopt_shape_of(opcode.properties()) {
            return Err(RewriteError::Properties { from, to: opcode });
        }

        self.node_mut(id).set_opcode(opcode, payload);
        Ok(())
    }

    /// Drop write barriers on stores whose value is statically a Smi.
    ///
    /// Returns the number of stores rewritten.
    pub fn eliminate_redundant_write_barriers(&mut self) -> Result<usize, RewriteError> {
        let candidates: Vec<NodeId> = self
            .nodes()
            .filter(|(_, node)| node.opcode() == Opcode::StoreTaggedFieldWithWriteBarrier)
            .filter(|(_, node)| self.value_is_smi(node.input(1)))
            .map(|(id, _)| id)
            .collect();
        for &id in &candidates {
            let payload = self.node(id).payload();
            self.overwrite_with(id, Opcode::StoreTaggedFieldNoWriteBarrier, payload)?;
        }
        Ok(candidates.len())
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Check structural and representation invariants.
    pub fn verify(&self) -> KestrelResult<()> {
        let fail = |id: NodeId, message: String| Err(KestrelError::compile(message, Some(id.0)));

        if self.blocks.is_empty() {
            return Err(KestrelError::compile("graph has no blocks", None));
        }

        // Position of each node in layout order, for definition-before-use.
        let mut order = vec![usize::MAX; self.nodes.len()];
        let mut position = 0;
        for block in &self.blocks {
            for id in block.all_nodes() {
                order[id.index()] = position;
                position += 1;
            }
        }

        for (index, block) in self.blocks.iter().enumerate() {
            if block.control.is_none() {
                return Err(KestrelError::compile(
                    format!("block b{index} has no control node"),
                    None,
                ));
            }
        }

        for (id, node) in self.nodes() {
            let opcode = node.opcode();
            if order[id.index()] == usize::MAX {
                return fail(id, format!("{opcode} {id} is not placed in a block"));
            }

            let expected = Self::expected_input_count(opcode, node.payload());
            if node.input_count() != expected {
                return fail(
                    id,
                    format!("{opcode} has {} inputs, expected {expected}", node.input_count()),
                );
            }

            for (i, &input) in node.inputs().iter().enumerate() {
                if input.index() >= self.nodes.len() || order[input.index()] >= order[id.index()]
                {
                    return fail(id, format!("{opcode} input {i} ({input}) used before definition"));
                }
                let actual = self.node(input).representation();
                let wanted = opcode.input_representation(i);
                if !actual.satisfies(wanted) {
                    return fail(
                        id,
                        format!("{opcode} input {i} is {actual}, expected {wanted}"),
                    );
                }
            }

            let props = opcode.properties();
            if props.can_eager_deopt() != node.eager_deopt().is_some() {
                return fail(id, format!("{opcode} eager deopt info mismatch"));
            }
            if props.can_lazy_deopt() != node.lazy_deopt().is_some() {
                return fail(id, format!("{opcode} lazy deopt info mismatch"));
            }
            let mut bad_deopt_value = None;
            node.for_each_deopt_value(&mut |value| {
                let defined = value.index() < self.nodes.len()
                    && order[value.index()] < order[id.index()]
                    && self.node(value).representation() != ValueRepresentation::None;
                if !defined && bad_deopt_value.is_none() {
                    bad_deopt_value = Some(value);
                }
            });
            if let Some(value) = bad_deopt_value {
                return fail(id, format!("{opcode} deopt frame captures invalid value {value}"));
            }

            self.verify_payload(id, node)?;
        }

        // Uses in another block must be dominated by the definition.
        let idom = self.immediate_dominators();
        for (id, node) in self.nodes() {
            let user = self.block_of(id);
            if idom[user.index()].is_none() {
                continue;
            }
            let reaches = |value: NodeId| {
                let def = self.block_of(value);
                def == user || Self::dominates(&idom, def, user)
            };
            let mut bad = node.inputs().iter().copied().find(|&input| !reaches(input));
            if bad.is_none() {
                node.for_each_deopt_value(&mut |value| {
                    if bad.is_none() && !reaches(value) {
                        bad = Some(value);
                    }
                });
            }
            if let Some(value) = bad {
                return fail(
                    id,
                    format!("{} uses {value}, whose block does not dominate {user}", node.opcode()),
                );
            }
        }
        Ok(())
    }

    /// Blocks the control node of `block` can transfer to.
    pub fn successors(&self, block: BlockId) -> SmallVec<[BlockId; 2]> {
        let Some(control) = self.blocks[block.index()].control else {
            return SmallVec::new();
        };
        match self.node(control).payload() {
            Payload::Jump(target) => smallvec![target],
            Payload::Branch {
                if_true, if_false, ..
            } => smallvec![if_true, if_false],
            Payload::Switch(switch) => {
                let table = self.switch(switch);
                table
                    .cases
                    .iter()
                    .map(|&(_, target)| target)
                    .chain(std::iter::once(table.default))
                    .collect()
            }
            _ => SmallVec::new(),
        }
    }

    /// Immediate dominator of each block, indexed by block. The entry block
    /// is its own dominator and unreachable blocks have none.
    pub fn immediate_dominators(&self) -> Vec<Option<BlockId>> {
        let count = self.blocks.len();
        let mut idom = vec![None; count];
        if count == 0 {
            return idom;
        }
        let entry = BlockId(0);

        let mut postorder = Vec::with_capacity(count);
        let mut visited = vec![false; count];
        let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
        visited[0] = true;
        while let Some(top) = stack.last_mut() {
            let (block, next) = *top;
            if let Some(&succ) = self.successors(block).get(next) {
                top.1 += 1;
                if !visited[succ.index()] {
                    visited[succ.index()] = true;
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(block);
                stack.pop();
            }
        }

        let mut rpo_number = vec![usize::MAX; count];
        for (number, block) in postorder.iter().rev().enumerate() {
            rpo_number[block.index()] = number;
        }
        let mut predecessors: Vec<SmallVec<[BlockId; 2]>> = vec![SmallVec::new(); count];
        for &block in &postorder {
            for succ in self.successors(block) {
                predecessors[succ.index()].push(block);
            }
        }

        // Iterate to a fixed point in reverse postorder, walking the two
        // fingers up the current tree until they meet.
        idom[0] = Some(entry);
        let mut changed = true;
        while changed {
            changed = false;
            for &block in postorder.iter().rev().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &pred in &predecessors[block.index()] {
                    if idom[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => {
                            let (mut a, mut b) = (pred, current);
                            while a != b {
                                while rpo_number[a.index()] > rpo_number[b.index()] {
                                    a = idom[a.index()].unwrap_or(entry);
                                }
                                while rpo_number[b.index()] > rpo_number[a.index()] {
                                    b = idom[b.index()].unwrap_or(entry);
                                }
                            }
                            a
                        }
                    });
                }
                if new_idom.is_some() && idom[block.index()] != new_idom {
                    idom[block.index()] = new_idom;
                    changed = true;
                }
            }
        }
        idom
    }

    fn dominates(idom: &[Option<BlockId>], dominator: BlockId, mut block: BlockId) -> bool {
        loop {
            if block == dominator {
                return true;
            }
            match idom[block.index()] {
                Some(parent) if parent != block => block = parent,
                _ => return false,
            }
        }
    }

    fn verify_payload(&self, id: NodeId, node: &Node) -> KestrelResult<()> {
        let block_ok = |b: BlockId| b.index() < self.blocks.len();
        let err = |message: String| Err(KestrelError::compile(message, Some(id.0)));
        match node.payload() {
            Payload::Int32(value)
                if node.opcode() == Opcode::SmiConstant && !layout::is_smi(i64::from(value)) =>
            {
                err(format!("SmiConstant {value} out of Smi range"))
            }
            Payload::Parameter(index) if index >= self.parameter_count => {
                err(format!("parameter {index} out of range"))
            }
            Payload::Runtime { function, argc } => {
                if argc as usize > MAX_RUNTIME_CALL_ARGS {
                    err(format!("runtime call with {argc} arguments"))
                } else if argc as usize != function.arity() {
                    err(format!(
                        "Runtime::{} takes {} arguments, got {argc}",
                        function.name(),
                        function.arity()
                    ))
                } else {
                    Ok(())
                }
            }
            Payload::Element { log2_size } if log2_size > 3 => {
                err(format!("element size 1 << {log2_size} too large"))
            }
            Payload::Jump(target) if !block_ok(target) => err(format!("jump to missing {target}")),
            Payload::Branch {
                if_true, if_false, ..
            } if !block_ok(if_true) || !block_ok(if_false) => {
                err("branch to missing block".to_string())
            }
            Payload::Switch(switch) => {
                let Some(table) = self.switches.get(switch.0 as usize) else {
                    return err("missing switch table".to_string());
                };
                if !block_ok(table.default) || table.cases.iter().any(|(_, b)| !block_ok(*b)) {
                    return err("switch to missing block".to_string());
                }
                let mut values: Vec<i32> = table.cases.iter().map(|(v, _)| *v).collect();
                values.sort_unstable();
                if values.windows(2).any(|w| w[0] == w[1]) {
                    return err("duplicate switch case".to_string());
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::deopt::{DeoptFrame, EagerDeoptInfo, FrameState};
    use crate::ir::opcode::CompareOp;

    fn eager(closure: NodeId) -> Option<Box<EagerDeoptInfo>> {
        Some(Box::new(EagerDeoptInfo {
            frame: DeoptFrame::interpreted(closure, 0, FrameState::default()),
        }))
    }

    fn simple_graph() -> (Graph, NodeId, NodeId) {
        let mut graph = Graph::new("f", 1);
        let b0 = graph.add_block();
        let closure = graph.push(b0, Node::new(Opcode::LoadClosure, [], Payload::None));
        let a = graph.push(b0, Node::new(Opcode::Int32Constant, [], Payload::Int32(1)));
        let b = graph.push(b0, Node::new(Opcode::Int32Constant, [], Payload::Int32(2)));
        let mut add = Node::new(Opcode::Int32AddWithOverflow, [a, b], Payload::None);
        add.eager_deopt = eager(closure);
        let sum = graph.push(b0, add);
        let tagged = {
            let mut node = Node::new(Opcode::CheckedSmiTagInt32, [sum], Payload::None);
            node.eager_deopt = eager(closure);
            graph.push(b0, node)
        };
        graph.push(b0, Node::new(Opcode::Return, [tagged], Payload::None));
        (graph, sum, tagged)
    }

    #[test]
    fn test_verify_accepts_well_formed_graph() {
        let (graph, _, _) = simple_graph();
        graph.verify().unwrap();
    }

    #[test]
    fn test_verify_rejects_representation_mismatch() {
        let mut graph = Graph::new("f", 1);
        let b0 = graph.add_block();
        let p = graph.push(b0, Node::new(Opcode::Parameter, [], Payload::Parameter(0)));
        graph.push(b0, Node::new(Opcode::Int32BitwiseNot, [p], Payload::None));
        graph.push(b0, Node::new(Opcode::Return, [p], Payload::None));
        let err = graph.verify().unwrap_err();
        assert!(err.to_string().contains("expected Int32"), "{err}");
    }

    #[test]
    fn test_verify_rejects_missing_deopt_info() {
        let mut graph = Graph::new("f", 0);
        let b0 = graph.add_block();
        let c = graph.push(b0, Node::new(Opcode::Int32Constant, [], Payload::Int32(1)));
        graph.push(b0, Node::new(Opcode::Int32NegateWithOverflow, [c], Payload::None));
        graph.push(b0, Node::new(Opcode::Jump, [], Payload::Jump(BlockId(0))));
        assert!(graph.verify().is_err());
    }

    #[test]
    fn test_verify_rejects_unterminated_block() {
        let mut graph = Graph::new("f", 0);
        let b0 = graph.add_block();
        graph.push(b0, Node::new(Opcode::Int32Constant, [], Payload::Int32(1)));
        assert!(graph.verify().is_err());
    }

    #[test]
    fn test_use_counts_include_deopt_frames() {
        let (graph, sum, tagged) = simple_graph();
        let counts = graph.use_counts();
        assert_eq!(counts[sum.index()], 1);
        assert_eq!(counts[tagged.index()], 1);
        // closure: two eager deopt frames
        assert_eq!(counts[0], 2);
    }

    #[test]
    fn test_overwrite_checks_shape() {
        let (mut graph, sum, tagged) = simple_graph();

        // Same shape: subtract instead of add.
        graph
            .overwrite_with(sum, Opcode::Int32SubtractWithOverflow, Payload::None)
            .unwrap();
        assert_eq!(graph.node(sum).opcode(), Opcode::Int32SubtractWithOverflow);

        assert!(matches!(
            graph.overwrite_with(sum, Opcode::Int32NegateWithOverflow, Payload::None),
            Err(RewriteError::InputCount { .. })
        ));
        assert!(matches!(
            graph.overwrite_with(
                tagged,
                Opcode::Int32Compare,
                Payload::Compare(CompareOp::Equal)
            ),
            Err(RewriteError::InputCount { .. })
        ));
        assert!(matches!(
            graph.overwrite_with(sum, Opcode::Int32BitwiseAnd, Payload::Int32(0)),
            Err(RewriteError::PayloadKind { .. })
        ));
    }

    #[test]
    fn test_overwrite_rejects_new_requirements() {
        let mut graph = Graph::new("f", 0);
        let b0 = graph.add_block();
        let a = graph.push(b0, Node::new(Opcode::Int32Constant, [], Payload::Int32(1)));
        let b = graph.push(b0, Node::new(Opcode::Int32Constant, [], Payload::Int32(2)));
        let and = graph.push(b0, Node::new(Opcode::Int32BitwiseAnd, [a, b], Payload::None));
        assert_eq!(
            graph.overwrite_with(and, Opcode::Int32AddWithOverflow, Payload::None),
            Err(RewriteError::Properties {
                from: Opcode::Int32BitwiseAnd,
                to: Opcode::Int32AddWithOverflow
            })
        );
    }

    #[test]
    fn test_overwrite_rejects_larger_payload() {
        let mut graph = Graph::new("f", 0);
        let b0 = graph.add_block();
        let a = graph.push(b0, Node::new(Opcode::Int32Constant, [], Payload::Int32(1)));
        let b = graph.push(b0, Node::new(Opcode::Int32Constant, [], Payload::Int32(2)));
        let and = graph.push(b0, Node::new(Opcode::Int32BitwiseAnd, [a, b], Payload::None));
        assert!(matches!(
            graph.overwrite_with(and, Opcode::Int32Compare, Payload::Compare(CompareOp::Equal)),
            Err(RewriteError::PayloadSize { old: 0, new: 1, .. })
        ));
    }

    #[test]
    fn test_switch_value_range() {
        let table = SwitchTable {
            cases: vec![(3, BlockId(1)), (-2, BlockId(2)), (0, BlockId(1))],
            default: BlockId(3),
        };
        assert_eq!(table.bounds(), Some((-2, 3)));
        assert_eq!(table.value_range(), 6);
        let empty = SwitchTable {
            cases: vec![],
            default: BlockId(0),
        };
        assert_eq!(empty.value_range(), 0);
    }

    /// `entry -> (then | else) -> join`, where `join` returns `pick(then_value, p0)`.
    fn diamond(pick: impl FnOnce(NodeId, NodeId) -> NodeId) -> Graph {
        let mut b = crate::ir::GraphBuilder::new("diamond", 1);
        let p = b.parameter(0);
        let x = b.checked_smi_untag(p);
        let zero = b.int32_constant(0);
        let then_block = b.new_block();
        let else_block = b.new_block();
        let join = b.new_block();
        b.branch(CompareOp::LessThan, x, zero, then_block, else_block);
        b.switch_to(then_block);
        let only_in_then = b.smi_constant(7);
        b.jump(join);
        b.switch_to(else_block);
        b.jump(join);
        b.switch_to(join);
        b.ret(pick(only_in_then, p));
        b.finish()
    }

    #[test]
    fn test_immediate_dominators_of_diamond() {
        let graph = diamond(|_, p| p);
        graph.verify().unwrap();
        assert_eq!(
            graph.immediate_dominators(),
            vec![
                Some(BlockId(0)),
                Some(BlockId(0)),
                Some(BlockId(0)),
                Some(BlockId(0))
            ]
        );
        assert_eq!(graph.successors(BlockId(0)).as_slice(), &[BlockId(1), BlockId(2)]);
        assert!(graph.successors(BlockId(3)).is_empty());
    }

    #[test]
    fn test_verify_rejects_use_from_sibling_branch() {
        // Defined before the join in layout order, but `else` bypasses it.
        let graph = diamond(|then_value, _| then_value);
        let err = graph.verify().unwrap_err();
        assert!(err.to_string().contains("does not dominate b3"), "{err}");
    }

    #[test]
    fn test_unreachable_block_has_no_dominator() {
        let mut b = crate::ir::GraphBuilder::new("f", 1);
        let p = b.parameter(0);
        b.ret(p);
        let dead = b.new_block();
        b.switch_to(dead);
        b.ret(p);
        let graph = b.finish();
        assert_eq!(graph.immediate_dominators(), vec![Some(BlockId(0)), None]);
        graph.verify().unwrap();
    }

    #[test]
    fn test_eliminate_redundant_write_barriers() {
        let mut b = crate::ir::GraphBuilder::new("stores", 2);
        let object = b.parameter(0);
        let value = b.parameter(1);
        let smi = b.smi_constant(4);
        let smi_store = b.store_field(object, 16, smi);
        let tagged_store = b.store_field(object, 24, value);
        b.ret(value);
        let mut graph = b.finish();

        assert_eq!(graph.eliminate_redundant_write_barriers(), Ok(1));
        assert_eq!(
            graph.node(smi_store).opcode(),
            Opcode::StoreTaggedFieldNoWriteBarrier
        );
        assert_eq!(graph.node(smi_store).payload(), Payload::Field(16));
        assert_eq!(
            graph.node(tagged_store).opcode(),
            Opcode::StoreTaggedFieldWithWriteBarrier
        );
        assert_eq!(graph.eliminate_redundant_write_barriers(), Ok(0));
        assert!(graph.verify().is_ok());
    }
}
