//! Code generation driver.
//!
//! # Pipeline
//!
//! 1. Decide which nodes are covered by a fused user
//! 2. Collect per-node constraints from the lowering table
//! 3. Allocate registers
//! 4. Emit every block in layout order, with gap moves around each node
//! 5. Append deferred code and deopt exits, lay out the code
//! 6. Resolve deopt input locations into the deopt table

use std::fmt::Write as _;

use kestrel_core::{CodegenConfig, KestrelError, KestrelResult};
use tracing::{debug, info, trace};

use crate::backend::arm64::macro_assembler::spill_slot_operand;
use crate::backend::arm64::{
    DeoptExit, DeoptKind, Instr, Label, MacroAssembler, OperandSize, Safepoint,
};
use crate::ir::{BlockId, DeoptFrame, DeoptReason, Graph, InputLocation, NodeId};
use crate::regalloc::{Allocation, GapMove, NodeConstraints, RegisterAllocator};

use super::constraints::ConstraintBuilder;
use super::matcher::{CoveredNodes, find_covered_nodes};
use super::selector::lowering;
use super::state::ProcessingState;

// =============================================================================
// Output
// =============================================================================

/// A deopt exit with the frames it rebuilds and where each captured value lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeoptTableEntry {
    pub kind: DeoptKind,
    pub node: NodeId,
    pub reason: Option<DeoptReason>,
    /// Offset of the exit stub.
    pub exit_offset: u32,
    /// Return address of the call, for lazy exits.
    pub call_return_offset: Option<u32>,
    pub frame: DeoptFrame,
    /// One location per captured value, in [`DeoptFrame::for_each_value`] order.
    pub input_locations: Vec<InputLocation>,
}

/// Machine code for one function, with the metadata the runtime needs.
#[derive(Debug, Clone)]
pub struct CompiledCode {
    pub name: String,
    pub instructions: Vec<Instr>,
    /// Byte offset of each instruction.
    pub offsets: Vec<u32>,
    pub label_offsets: Vec<u32>,
    pub code_size: u32,
    /// Spill area below the frame pointer.
    pub frame_size: u32,
    pub safepoints: Vec<Safepoint>,
    pub deopt_table: Vec<DeoptTableEntry>,
    /// `(offset, node)` at the start of each node's code.
    pub source_positions: Vec<(u32, NodeId)>,
}

impl CompiledCode {
    /// Instructions as text, one per entry.
    pub fn listing(&self) -> Vec<String> {
        self.instructions.iter().map(ToString::to_string).collect()
    }

    /// Instructions with their offsets.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (instr, offset) in self.instructions.iter().zip(&self.offsets) {
            let _ = writeln!(out, "{offset:#06x}  {instr}");
        }
        out
    }

    pub fn eager_deopt_count(&self) -> usize {
        self.deopt_table
            .iter()
            .filter(|entry| entry.kind == DeoptKind::Eager)
            .count()
    }

    pub fn lazy_deopt_count(&self) -> usize {
        self.deopt_table
            .iter()
            .filter(|entry| entry.kind == DeoptKind::Lazy)
            .count()
    }
}

// =============================================================================
// Code Generator
// =============================================================================

/// Lowers a verified graph to AArch64 code.
pub struct CodeGenerator<'a> {
    graph: &'a Graph,
    config: &'a CodegenConfig,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(graph: &'a Graph, config: &'a CodegenConfig) -> Self {
        Self { graph, config }
    }

    /// Run the whole pipeline.
    pub fn generate(&self) -> KestrelResult<CompiledCode> {
        let graph = self.graph;
        let covered = find_covered_nodes(graph);
        let constraints = self.collect_constraints(&covered);

        let allocation =
            RegisterAllocator::new(graph, &constraints, self.config.max_spill_slots).allocate()?;
        if self.config.trace_regalloc {
            self.trace_allocation(&constraints, &allocation);
        }

        let mut masm = MacroAssembler::new();
        masm.enter_frame(allocation.frame_size());
        self.emit_blocks(&mut masm, &covered, &allocation);
        if self.config.debug_code {
            // Falling off the end of the body is a bug.
            masm.brk(0);
        }

        let output = masm.finish()?;
        let deopt_table = self.build_deopt_table(&output.deopt_exits, &allocation)?;

        let code = CompiledCode {
            name: graph.name().to_string(),
            instructions: output.code.instructions,
            offsets: output.code.offsets,
            label_offsets: output.code.label_offsets,
            code_size: output.code.code_size,
            frame_size: allocation.frame_size(),
            safepoints: output.safepoints,
            deopt_table,
            source_positions: output.source_positions,
        };

        debug!(
            function = %code.name,
            code_size = code.code_size,
            covered = covered.count(),
            spill_slots = allocation.spill_slots(),
            deopts = code.deopt_table.len(),
            "generated code"
        );
        if self.config.print_code {
            info!(function = %code.name, "\n{}", code.disassemble());
        }
        Ok(code)
    }

    fn collect_constraints(&self, covered: &CoveredNodes) -> Vec<Option<NodeConstraints>> {
        let graph = self.graph;
        graph
            .nodes()
            .map(|(id, node)| {
                if covered.contains(id) {
                    return None;
                }
                let mut builder = ConstraintBuilder::new(graph, id, covered);
                lowering(node.opcode()).set_value_location_constraints(&mut builder);
                Some(builder.finish())
            })
            .collect()
    }

    fn trace_allocation(&self, constraints: &[Option<NodeConstraints>], allocation: &Allocation) {
        for (id, node) in self.graph.nodes() {
            let Some(c) = &constraints[id.index()] else {
                continue;
            };
            let a = allocation.node(id);
            debug!(
                node = %id,
                opcode = %node.opcode(),
                constraints = %c,
                result = %a.result,
                before = ?a.before,
                after = ?a.after,
                "regalloc"
            );
        }
    }

    fn emit_blocks(&self, masm: &mut MacroAssembler, covered: &CoveredNodes, allocation: &Allocation) {
        let graph = self.graph;
        let order: Vec<BlockId> = graph.block_ids().collect();
        let block_labels: Vec<Label> = order.iter().map(|_| masm.create_label()).collect();

        for (position, &block) in order.iter().enumerate() {
            masm.bind(block_labels[block.index()]);
            let next_block = order.get(position + 1).copied();
            for id in graph.block(block).all_nodes() {
                if covered.contains(id) {
                    continue;
                }
                let node_allocation = allocation.node(id);
                masm.set_current_node(id, node_allocation.snapshot);
                for mv in &node_allocation.before {
                    emit_gap_move(masm, *mv);
                }
                self.check_input_representations(id);

                let opcode = graph.node(id).opcode();
                trace!(node = %id, %opcode, "emitting");
                let state = ProcessingState {
                    graph,
                    node: id,
                    allocation: node_allocation,
                    covered,
                    config: self.config,
                    block_labels: &block_labels,
                    next_block,
                };
                lowering(opcode).generate_code(masm, &state);

                for mv in &node_allocation.after {
                    emit_gap_move(masm, *mv);
                }
            }
        }
    }

    fn check_input_representations(&self, id: NodeId) {
        if cfg!(debug_assertions) {
            let node = self.graph.node(id);
            for (i, input) in node.inputs().iter().enumerate() {
                let actual = self.graph.node(*input).representation();
                let expected = node.opcode().input_representation(i);
                debug_assert!(
                    actual.satisfies(expected),
                    "{id} ({}) input {i}: expected {expected}, got {actual}",
                    node.opcode()
                );
            }
        }
    }

    fn build_deopt_table(
        &self,
        exits: &[DeoptExit],
        allocation: &Allocation,
    ) -> KestrelResult<Vec<DeoptTableEntry>> {
        exits
            .iter()
            .map(|exit| {
                let node = self.graph.node(exit.node);
                let node_allocation = allocation.node(exit.node);
                let (frame, locations) = match exit.kind {
                    DeoptKind::Eager => (
                        node.eager_deopt().map(|info| &info.frame),
                        &node_allocation.eager_deopt_locations,
                    ),
                    DeoptKind::Lazy => (
                        node.lazy_deopt().map(|info| &info.frame),
                        &node_allocation.lazy_deopt_locations,
                    ),
                };
                let frame = frame.ok_or_else(|| {
                    KestrelError::compile(
                        format!("{} has a deopt exit but no deopt info", node.opcode()),
                        Some(exit.node.0),
                    )
                })?;
                debug_assert_eq!(
                    locations.len(),
                    frame.input_locations_size(),
                    "deopt locations of {} do not match its frames",
                    exit.node
                );
                Ok(DeoptTableEntry {
                    kind: exit.kind,
                    node: exit.node,
                    reason: exit.reason,
                    exit_offset: exit.exit_offset,
                    call_return_offset: exit.call_return_offset,
                    frame: frame.clone(),
                    input_locations: locations.clone(),
                })
            })
            .collect()
    }
}

fn emit_gap_move(masm: &mut MacroAssembler, mv: GapMove) {
    const X: OperandSize = OperandSize::X;
    match mv {
        GapMove::Load { slot, to } => masm.ldr(X, to, spill_slot_operand(slot)),
        GapMove::Store { from, slot } => masm.str(X, from, spill_slot_operand(slot)),
        GapMove::Move { from, to } => masm.mov(X, to, from),
        GapMove::Materialize { value, to } => masm.mov_imm(X, to, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::arm64::Gpr;
    use crate::ir::{CompareOp, DeoptReason, FrameState, GraphBuilder, ValueLocation};
    use pretty_assertions::assert_eq;

    fn config() -> CodegenConfig {
        CodegenConfig {
            debug_code: false,
            ..CodegenConfig::default()
        }
    }

    fn compile(graph: &Graph) -> CompiledCode {
        CodeGenerator::new(graph, &config()).generate().unwrap()
    }

    fn contains(code: &CompiledCode, needle: &str) -> bool {
        code.listing().iter().any(|line| line == needle)
    }

    // =========================================================================
    // Straight-line code
    // =========================================================================

    #[test]
    fn test_return_parameter() {
        let mut b = GraphBuilder::new("identity", 1);
        let p = b.parameter(0);
        b.ret(p);
        let graph = b.build().unwrap();
        let code = compile(&graph);

        assert!(contains(&code, "ldr x0, [fp, #24]"));
        assert_eq!(code.listing().last().map(String::as_str), Some("ret"));
        assert!(code.deopt_table.is_empty());
        assert_eq!(code.frame_size, 0);
    }

    #[test]
    fn test_add_with_immediate_and_deopt() {
        let mut b = GraphBuilder::new("inc", 1);
        let p = b.parameter(0);
        let x = b.checked_smi_untag(p);
        let one = b.int32_constant(7);
        let sum = b.int32_add(x, one);
        let tagged = b.checked_smi_tag(sum);
        b.ret(tagged);
        let graph = b.build().unwrap();
        let code = compile(&graph);

        assert!(code.listing().iter().any(|l| l.starts_with("adds w") && l.ends_with("#7")));
        assert!(!code.listing().iter().any(|l| l.starts_with("mov") && l.ends_with("#7")));
        // NotASmi, Overflow on add, Overflow on tag.
        assert_eq!(code.eager_deopt_count(), 3);
        for entry in &code.deopt_table {
            assert_eq!(entry.input_locations.len(), entry.frame.input_locations_size());
        }
    }

    #[test]
    fn test_source_positions_follow_emission() {
        let mut b = GraphBuilder::new("f", 1);
        let p = b.parameter(0);
        b.ret(p);
        let graph = b.build().unwrap();
        let code = compile(&graph);
        let offsets: Vec<u32> = code.source_positions.iter().map(|(o, _)| *o).collect();
        assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    #[test]
    fn test_branch_falls_through_to_next_block() {
        let mut b = GraphBuilder::new("max", 2);
        let p0 = b.parameter(0);
        let p1 = b.parameter(1);
        let x = b.checked_smi_untag(p0);
        let y = b.checked_smi_untag(p1);
        let then_block = b.new_block();
        let else_block = b.new_block();
        b.branch(CompareOp::LessThan, x, y, then_block, else_block);
        b.switch_to(then_block);
        b.ret(p1);
        b.switch_to(else_block);
        b.ret(p0);
        let graph = b.build().unwrap();
        let code = compile(&graph);

        // `then` is next: branch to `else` on the inverted condition.
        assert!(code.listing().iter().any(|l| l.starts_with("b.ge")));
        assert!(!code.listing().iter().any(|l| l.starts_with("b.lt")));
    }

    #[test]
    fn test_unconditional_deopt_records_frame() {
        let mut b = GraphBuilder::new("f", 1);
        let p = b.parameter(0);
        let closure = b.closure();
        b.set_deopt_frame(DeoptFrame::interpreted(
            closure,
            3,
            FrameState {
                parameters: vec![p],
                ..FrameState::default()
            },
        ));
        b.deopt(DeoptReason::InsufficientTypeFeedback);
        let graph = b.build().unwrap();
        let code = compile(&graph);

        assert_eq!(code.deopt_table.len(), 1);
        let entry = &code.deopt_table[0];
        assert_eq!(entry.reason, Some(DeoptReason::InsufficientTypeFeedback));
        assert_eq!(entry.input_locations.len(), 2);
        assert!(
            entry
                .input_locations
                .iter()
                .all(|loc| !matches!(loc, ValueLocation::Unallocated))
        );
    }

    #[test]
    fn test_debug_code_traps_after_body() {
        let mut b = GraphBuilder::new("f", 1);
        let p = b.parameter(0);
        b.ret(p);
        let graph = b.build().unwrap();
        let config = CodegenConfig {
            debug_code: true,
            ..CodegenConfig::default()
        };
        let code = CodeGenerator::new(&graph, &config).generate().unwrap();
        assert!(contains(&code, "brk #0"));
    }

    #[test]
    fn test_gap_moves_use_spill_slots() {
        let mut masm = MacroAssembler::new();
        emit_gap_move(&mut masm, GapMove::Store { from: Gpr::X3, slot: 1 });
        emit_gap_move(&mut masm, GapMove::Load { slot: 1, to: Gpr::X4 });
        let text: Vec<String> = masm.instructions().iter().map(ToString::to_string).collect();
        assert_eq!(text, vec!["str x3, [fp, #-16]", "ldr x4, [fp, #-16]"]);
    }
}
