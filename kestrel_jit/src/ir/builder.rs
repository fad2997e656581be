//! Programmatic graph construction.
//!
//! Stands in for the bytecode graph builder: it creates the entry block with
//! the closure, context and parameters, and attaches deopt info to every node
//! whose opcode can deoptimize. Unless a frame is set explicitly, deopting
//! nodes capture an interpreter frame holding the closure and parameters.

use kestrel_core::KestrelResult;

use super::deopt::{DeoptFrame, DeoptReason, EagerDeoptInfo, FrameState, LazyDeoptInfo};
use super::graph::{Graph, SwitchTable};
use super::node::{BlockId, Node, NodeId};
use super::opcode::{CompareOp, Opcode, Payload};
use crate::runtime::entries::RuntimeFunction;

/// Builds a [`Graph`] one node at a time.
#[derive(Debug)]
pub struct GraphBuilder {
    graph: Graph,
    current: BlockId,
    closure: NodeId,
    context: NodeId,
    parameters: Vec<NodeId>,
    bytecode_offset: u32,
    frame: Option<DeoptFrame>,
}

impl GraphBuilder {
    /// Start a graph with `parameter_count` tagged parameters.
    pub fn new(name: impl Into<String>, parameter_count: u16) -> Self {
        let mut graph = Graph::new(name, parameter_count);
        let entry = graph.add_block();
        let closure = graph.push(entry, Node::new(Opcode::LoadClosure, [], Payload::None));
        let context = graph.push(entry, Node::new(Opcode::LoadContext, [], Payload::None));
        let parameters = (0..parameter_count)
            .map(|i| graph.push(entry, Node::new(Opcode::Parameter, [], Payload::Parameter(i))))
            .collect();
        Self {
            graph,
            current: entry,
            closure,
            context,
            parameters,
            bytecode_offset: 0,
            frame: None,
        }
    }

    pub fn closure(&self) -> NodeId {
        self.closure
    }

    pub fn context(&self) -> NodeId {
        self.context
    }

    /// The `index`th parameter.
    pub fn parameter(&self, index: usize) -> NodeId {
        self.parameters[index]
    }

    /// Graph under construction.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    /// Create a block without switching to it.
    pub fn new_block(&mut self) -> BlockId {
        self.graph.add_block()
    }

    /// Continue emitting into `block`.
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    // =========================================================================
    // Deopt State
    // =========================================================================

    /// Bytecode offset recorded in the default frame.
    pub fn set_bytecode_offset(&mut self, offset: u32) {
        self.bytecode_offset = offset;
    }

    /// Use an interpreter frame with `state` for subsequent deopting nodes.
    pub fn set_frame_state(&mut self, state: FrameState) {
        self.frame = Some(DeoptFrame::interpreted(
            self.closure,
            self.bytecode_offset,
            state,
        ));
    }

    /// Use `frame` (possibly nested) for subsequent deopting nodes.
    pub fn set_deopt_frame(&mut self, frame: DeoptFrame) {
        self.frame = Some(frame);
    }

    /// Go back to the default frame.
    pub fn reset_deopt_frame(&mut self) {
        self.frame = None;
    }

    fn current_frame(&self) -> DeoptFrame {
        self.frame.clone().unwrap_or_else(|| {
            DeoptFrame::interpreted(
                self.closure,
                self.bytecode_offset,
                FrameState {
                    parameters: self.parameters.clone(),
                    ..FrameState::default()
                },
            )
        })
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Append a node to the current block.
    pub fn add(
        &mut self,
        opcode: Opcode,
        inputs: impl IntoIterator<Item = NodeId>,
        payload: Payload,
    ) -> NodeId {
        let mut node = Node::new(opcode, inputs, payload);
        let props = opcode.properties();
        if props.can_eager_deopt() {
            node.eager_deopt = Some(Box::new(EagerDeoptInfo {
                frame: self.current_frame(),
            }));
        }
        if props.can_lazy_deopt() {
            node.lazy_deopt = Some(Box::new(LazyDeoptInfo {
                frame: self.current_frame(),
            }));
        }
        self.graph.push(self.current, node)
    }

    pub fn int32_constant(&mut self, value: i32) -> NodeId {
        self.add(Opcode::Int32Constant, [], Payload::Int32(value))
    }

    pub fn smi_constant(&mut self, value: i32) -> NodeId {
        self.add(Opcode::SmiConstant, [], Payload::Int32(value))
    }

    /// Binary operation without payload.
    pub fn binop(&mut self, opcode: Opcode, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add(opcode, [lhs, rhs], Payload::None)
    }

    /// Unary operation without payload.
    pub fn unop(&mut self, opcode: Opcode, input: NodeId) -> NodeId {
        self.add(opcode, [input], Payload::None)
    }

    pub fn int32_add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binop(Opcode::Int32AddWithOverflow, lhs, rhs)
    }

    pub fn int32_subtract(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binop(Opcode::Int32SubtractWithOverflow, lhs, rhs)
    }

    pub fn int32_multiply(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binop(Opcode::Int32MultiplyWithOverflow, lhs, rhs)
    }

    pub fn int32_divide(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binop(Opcode::Int32DivideWithOverflow, lhs, rhs)
    }

    pub fn int32_modulus(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binop(Opcode::Int32ModulusWithOverflow, lhs, rhs)
    }

    pub fn bitwise_and(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binop(Opcode::Int32BitwiseAnd, lhs, rhs)
    }

    pub fn shift_left(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binop(Opcode::Int32ShiftLeft, lhs, rhs)
    }

    pub fn shift_right(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binop(Opcode::Int32ShiftRight, lhs, rhs)
    }

    pub fn compare(&mut self, op: CompareOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add(Opcode::Int32Compare, [lhs, rhs], Payload::Compare(op))
    }

    pub fn checked_smi_untag(&mut self, input: NodeId) -> NodeId {
        self.unop(Opcode::CheckedSmiUntag, input)
    }

    pub fn checked_smi_tag(&mut self, input: NodeId) -> NodeId {
        self.unop(Opcode::CheckedSmiTagInt32, input)
    }

    pub fn int32_to_number(&mut self, input: NodeId) -> NodeId {
        self.unop(Opcode::Int32ToNumber, input)
    }

    pub fn uint32_to_number(&mut self, input: NodeId) -> NodeId {
        self.unop(Opcode::Uint32ToNumber, input)
    }

    pub fn load_field(&mut self, object: NodeId, offset: i32) -> NodeId {
        self.add(Opcode::LoadTaggedField, [object], Payload::Field(offset))
    }

    /// Tagged field store with a write barrier.
    pub fn store_field(&mut self, object: NodeId, offset: i32, value: NodeId) -> NodeId {
        self.add(
            Opcode::StoreTaggedFieldWithWriteBarrier,
            [object, value],
            Payload::Field(offset),
        )
    }

    /// Tagged field store into an object that needs no barrier.
    pub fn store_field_no_barrier(&mut self, object: NodeId, offset: i32, value: NodeId) -> NodeId {
        self.add(
            Opcode::StoreTaggedFieldNoWriteBarrier,
            [object, value],
            Payload::Field(offset),
        )
    }

    pub fn check_typed_array_bounds(&mut self, object: NodeId, index: NodeId, log2_size: u8) -> NodeId {
        self.add(
            Opcode::CheckTypedArrayBounds,
            [object, index],
            Payload::Element { log2_size },
        )
    }

    pub fn check_data_view_bounds(&mut self, object: NodeId, index: NodeId, log2_size: u8) -> NodeId {
        self.add(
            Opcode::CheckDataViewBounds,
            [object, index],
            Payload::Element { log2_size },
        )
    }

    pub fn call_runtime(&mut self, function: RuntimeFunction, args: &[NodeId]) -> NodeId {
        self.add(
            Opcode::CallRuntime,
            args.iter().copied(),
            Payload::Runtime {
                function,
                argc: args.len() as u8,
            },
        )
    }

    pub fn function_entry_stack_check(&mut self) -> NodeId {
        self.add(Opcode::FunctionEntryStackCheck, [], Payload::None)
    }

    pub fn reduce_interrupt_budget(&mut self, amount: i32) -> NodeId {
        let closure = self.closure;
        self.add(
            Opcode::ReduceInterruptBudget,
            [closure],
            Payload::Budget(amount),
        )
    }

    // =========================================================================
    // Control
    // =========================================================================

    pub fn jump(&mut self, target: BlockId) -> NodeId {
        self.add(Opcode::Jump, [], Payload::Jump(target))
    }

    pub fn branch(
        &mut self,
        op: CompareOp,
        lhs: NodeId,
        rhs: NodeId,
        if_true: BlockId,
        if_false: BlockId,
    ) -> NodeId {
        self.add(
            Opcode::BranchIfInt32Compare,
            [lhs, rhs],
            Payload::Branch {
                op,
                if_true,
                if_false,
            },
        )
    }

    pub fn switch(&mut self, value: NodeId, cases: Vec<(i32, BlockId)>, default: BlockId) -> NodeId {
        let table = self.graph.add_switch(SwitchTable { cases, default });
        self.add(Opcode::Switch, [value], Payload::Switch(table))
    }

    pub fn ret(&mut self, value: NodeId) -> NodeId {
        self.add(Opcode::Return, [value], Payload::None)
    }

    pub fn deopt(&mut self, reason: DeoptReason) -> NodeId {
        self.add(Opcode::Deopt, [], Payload::Deopt(reason))
    }

    /// Hand out the graph without checking it.
    pub fn finish(self) -> Graph {
        self.graph
    }

    /// Verify and hand out the graph.
    pub fn build(self) -> KestrelResult<Graph> {
        self.graph.verify()?;
        Ok(self.graph)
    }
}
