//! Forward-pass register allocator.

use kestrel_core::error::BailoutReason;
use kestrel_core::{KestrelError, KestrelResult};
use rustc_hash::FxHashMap;
use smallvec::{SmallVec, smallvec};
use tracing::trace;

use super::constraint::{InputPolicy, NodeConstraints, Operand, ResultPolicy};
use super::{Allocation, GapMove, NodeAllocation};
use crate::backend::arm64::{Gpr, GprSet};
use crate::ir::{Graph, Node, NodeId, Opcode, ValueLocation};
use crate::runtime::layout::SMI_SHIFT;

type Moves = SmallVec<[GapMove; 2]>;

/// Bits of a constant node as they appear in a register: raw for int32,
/// tagged for Smis.
pub fn constant_bits(node: &Node) -> Option<i64> {
    match node.opcode() {
        Opcode::Int32Constant => node.int32_value().map(i64::from),
        Opcode::SmiConstant => node.int32_value().map(|v| i64::from(v) << SMI_SHIFT),
        _ => None,
    }
}

/// Allocates registers for a graph whose node constraints are known.
///
/// `constraints[n]` is `None` for nodes that emit no code (covered by a
/// fused user).
pub struct RegisterAllocator<'a> {
    graph: &'a Graph,
    constraints: &'a [Option<NodeConstraints>],
    max_spill_slots: u32,

    // Liveness
    position: Vec<u32>,
    last_local_use: Vec<u32>,
    used_across_blocks: Vec<bool>,

    // Register file
    holder: [Option<NodeId>; 32],
    register_of: FxHashMap<NodeId, Gpr>,
    slot_of: FxHashMap<NodeId, u32>,
    next_slot: u32,
}

impl<'a> RegisterAllocator<'a> {
    pub fn new(
        graph: &'a Graph,
        constraints: &'a [Option<NodeConstraints>],
        max_spill_slots: u32,
    ) -> Self {
        debug_assert_eq!(constraints.len(), graph.node_count());
        let count = graph.node_count();

        let mut position = vec![u32::MAX; count];
        let mut next = 0;
        for block in graph.block_ids() {
            for id in graph.block(block).all_nodes() {
                position[id.index()] = next;
                next += 1;
            }
        }

        // A value dies at its definition unless a later use in its block says otherwise.
        let mut last_local_use = position.clone();
        let mut used_across_blocks = vec![false; count];
        for block in graph.block_ids() {
            for user in graph.block(block).all_nodes() {
                let Some(c) = &constraints[user.index()] else {
                    continue;
                };
                let at = position[user.index()];
                let mut note = |value: NodeId| {
                    if graph.block_of(value) == block {
                        let last = &mut last_local_use[value.index()];
                        *last = (*last).max(at);
                    } else {
                        used_across_blocks[value.index()] = true;
                    }
                };
                for op in &c.operands {
                    note(op.value);
                }
                graph.node(user).for_each_deopt_value(&mut note);
            }
        }

        Self {
            graph,
            constraints,
            max_spill_slots,
            position,
            last_local_use,
            used_across_blocks,
            holder: [None; 32],
            register_of: FxHashMap::default(),
            slot_of: FxHashMap::default(),
            next_slot: 0,
        }
    }

    /// Run the allocator.
    pub fn allocate(mut self) -> KestrelResult<Allocation> {
        let graph = self.graph;
        let constraints = self.constraints;
        let mut nodes = vec![NodeAllocation::default(); graph.node_count()];
        for block in graph.block_ids() {
            self.clear_registers();
            for id in graph.block(block).all_nodes() {
                if let Some(c) = &constraints[id.index()] {
                    nodes[id.index()] = self.allocate_node(id, c)?;
                }
            }
        }
        Ok(Allocation::new(nodes, self.next_slot))
    }

    fn allocate_node(&mut self, id: NodeId, c: &NodeConstraints) -> KestrelResult<NodeAllocation> {
        let graph = self.graph;
        let node = graph.node(id);
        let at = self.position[id.index()];
        let props = node.properties();
        let spills_all = props.can_call() || props.can_lazy_deopt();
        let eager_values = node
            .eager_deopt()
            .map(|info| info.frame.values())
            .unwrap_or_default();

        let mut out = NodeAllocation {
            operands: smallvec![ValueLocation::Unallocated; c.operands.len()],
            ..NodeAllocation::default()
        };
        let mut pinned = GprSet::EMPTY;

        // Fixed operands claim their registers before anything else moves.
        let order = c
            .operands
            .iter()
            .enumerate()
            .filter(|(_, op)| matches!(op.policy, InputPolicy::Fixed(_)))
            .chain(
                c.operands
                    .iter()
                    .enumerate()
                    .filter(|(_, op)| !matches!(op.policy, InputPolicy::Fixed(_))),
            )
            .map(|(i, op)| (i, *op))
            .collect::<SmallVec<[(usize, Operand); 4]>>();

        for (i, Operand { value, policy }) in order {
            out.operands[i] = match policy {
                InputPolicy::Immediate => match self.constant(value) {
                    Some(bits) => ValueLocation::Constant(bits),
                    None => {
                        return Err(KestrelError::regalloc(format!(
                            "{value} is an immediate operand of {id} but not a constant"
                        )));
                    }
                },
                InputPolicy::Any => self.location_of(value)?,
                InputPolicy::Fixed(reg) => {
                    self.place_fixed(value, reg, at, &mut pinned, &mut out.before)?;
                    ValueLocation::Register(reg)
                }
                InputPolicy::Register => ValueLocation::Register(self.place_in_register(
                    value,
                    false,
                    at,
                    &mut pinned,
                    &mut out.before,
                )?),
                InputPolicy::ClobberRegister => {
                    let shared = c.operands.iter().filter(|op| op.value == value).count() > 1;
                    let keep = shared
                        || self.last_local_use[value.index()] > at
                        || eager_values.contains(&value);
                    ValueLocation::Register(self.place_in_register(
                        value,
                        keep,
                        at,
                        &mut pinned,
                        &mut out.before,
                    )?)
                }
            };
        }

        for _ in 0..c.temporaries {
            let reg = self.take_free(at, pinned, &mut out.before)?;
            pinned.insert(reg);
            out.temporaries.push(reg);
        }

        // Calls and lazy deopts see every live value in its slot.
        if spills_all {
            for reg in GprSet::ALLOCATABLE.iter() {
                if let Some(value) = self.holder[reg.encoding() as usize] {
                    if self.last_local_use[value.index()] > at {
                        self.spill(value, &mut out.before)?;
                    }
                }
            }
            if let Some(info) = node.lazy_deopt() {
                let values = info.frame.values();
                for value in &values {
                    if self.constant(*value).is_none() && !self.slot_of.contains_key(value) {
                        self.spill(*value, &mut out.before)?;
                    }
                }
                out.lazy_deopt_locations = values
                    .iter()
                    .map(|value| self.stack_location_of(*value))
                    .collect::<KestrelResult<_>>()?;
            }
        }

        let result_reg = match c.result {
            ResultPolicy::None => None,
            ResultPolicy::Constant => {
                let bits = self.constant(id).ok_or_else(|| {
                    KestrelError::regalloc(format!("{id} defines a constant but is not one"))
                })?;
                out.result = ValueLocation::Constant(bits);
                None
            }
            ResultPolicy::Register => {
                let reg = self.take_free(at, pinned, &mut out.before)?;
                pinned.insert(reg);
                Some(reg)
            }
            ResultPolicy::Fixed(reg) => {
                if let Some(other) = self.holder[reg.encoding() as usize] {
                    if pinned.contains(reg) {
                        // The node overwrites its own operand.
                        if self.last_local_use[other.index()] > at || eager_values.contains(&other) {
                            self.spill(other, &mut out.before)?;
                        }
                        self.release(reg);
                    } else {
                        self.evict(other, at, &mut out.before)?;
                    }
                }
                Some(reg)
            }
            ResultPolicy::SameAsFirst => {
                debug_assert!(
                    c.operands
                        .first()
                        .is_some_and(|op| op.policy == InputPolicy::ClobberRegister),
                    "{id}: same-as-first result needs a clobbered first operand"
                );
                let reg = out.operands.first().and_then(|loc| loc.register()).ok_or_else(|| {
                    KestrelError::regalloc(format!("{id}: same-as-first without register operand"))
                })?;
                Some(reg)
            }
        };
        if let Some(reg) = result_reg {
            out.result = ValueLocation::Register(reg);
        }

        if !spills_all {
            let mut snapshot = GprSet::EMPTY;
            for reg in GprSet::ALLOCATABLE.iter() {
                if let Some(value) = self.holder[reg.encoding() as usize] {
                    if self.last_local_use[value.index()] > at {
                        snapshot.insert(reg);
                    }
                }
            }
            for reg in out.temporaries.iter().copied().chain(result_reg) {
                snapshot.remove(reg);
            }
            out.snapshot = snapshot;
        }

        out.eager_deopt_locations = eager_values
            .iter()
            .map(|value| self.location_of(*value))
            .collect::<KestrelResult<_>>()?;

        // Release values whose last use was this node.
        for reg in GprSet::ALLOCATABLE.iter() {
            if let Some(value) = self.holder[reg.encoding() as usize] {
                if self.last_local_use[value.index()] <= at {
                    self.release(reg);
                }
            }
        }
        if spills_all {
            self.clear_registers();
        }

        if let Some(reg) = result_reg {
            debug_assert!(
                self.holder[reg.encoding() as usize].is_none(),
                "{id}: result register {reg} still holds a live value"
            );
            self.release(reg);
            if self.last_local_use[id.index()] > at {
                self.assign(id, reg);
            }
            if self.used_across_blocks[id.index()] {
                let slot = self.new_slot()?;
                out.after.push(GapMove::Store { from: reg, slot });
                self.slot_of.insert(id, slot);
            }
        }

        trace!(node = %id, constraints = %c, result = %out.result, moves = out.before.len(), "allocated");
        Ok(out)
    }

    // =========================================================================
    // Operand Placement
    // =========================================================================

    fn place_in_register(
        &mut self,
        value: NodeId,
        copy: bool,
        at: u32,
        pinned: &mut GprSet,
        moves: &mut Moves,
    ) -> KestrelResult<Gpr> {
        if let Some(bits) = self.constant(value) {
            let reg = self.take_free(at, *pinned, moves)?;
            moves.push(GapMove::Materialize { value: bits, to: reg });
            pinned.insert(reg);
            return Ok(reg);
        }

        if let Some(&current) = self.register_of.get(&value) {
            pinned.insert(current);
            if !copy {
                return Ok(current);
            }
            let reg = self.take_free(at, *pinned, moves)?;
            moves.push(GapMove::Move {
                from: current,
                to: reg,
            });
            pinned.insert(reg);
            return Ok(reg);
        }

        let slot = self.slot(value)?;
        let reg = self.take_free(at, *pinned, moves)?;
        moves.push(GapMove::Load { slot, to: reg });
        // A reload that will be overwritten is not tracked; the slot stays valid.
        if !copy {
            self.assign(value, reg);
        }
        pinned.insert(reg);
        Ok(reg)
    }

    fn place_fixed(
        &mut self,
        value: NodeId,
        reg: Gpr,
        at: u32,
        pinned: &mut GprSet,
        moves: &mut Moves,
    ) -> KestrelResult<()> {
        if self.register_of.get(&value) == Some(&reg) {
            pinned.insert(reg);
            return Ok(());
        }
        if pinned.contains(reg) {
            return Err(KestrelError::regalloc(format!(
                "{reg} requested for {value} but already taken by another operand"
            )));
        }
        if let Some(other) = self.holder[reg.encoding() as usize] {
            self.evict(other, at, moves)?;
        }

        if let Some(bits) = self.constant(value) {
            moves.push(GapMove::Materialize { value: bits, to: reg });
        } else if let Some(&current) = self.register_of.get(&value) {
            moves.push(GapMove::Move { from: current, to: reg });
            // A register already read by another operand keeps the value.
            if !pinned.contains(current) {
                self.release(current);
                self.assign(value, reg);
            }
        } else {
            let slot = self.slot(value)?;
            moves.push(GapMove::Load { slot, to: reg });
            self.assign(value, reg);
        }
        pinned.insert(reg);
        Ok(())
    }

    /// A free allocatable register outside `pinned`, evicting the value with
    /// the furthest last use if none is free.
    fn take_free(&mut self, at: u32, pinned: GprSet, moves: &mut Moves) -> KestrelResult<Gpr> {
        let candidates = GprSet::ALLOCATABLE.difference(pinned);
        if let Some(reg) = candidates
            .iter()
            .find(|reg| self.holder[reg.encoding() as usize].is_none())
        {
            return Ok(reg);
        }
        let victim = candidates
            .iter()
            .filter_map(|reg| self.holder[reg.encoding() as usize].map(|value| (reg, value)))
            .max_by_key(|(_, value)| self.last_local_use[value.index()]);
        let Some((reg, value)) = victim else {
            return Err(KestrelError::regalloc("no allocatable register left"));
        };
        self.evict(value, at, moves)?;
        Ok(reg)
    }

    // =========================================================================
    // Register File
    // =========================================================================

    fn assign(&mut self, value: NodeId, reg: Gpr) {
        self.holder[reg.encoding() as usize] = Some(value);
        self.register_of.insert(value, reg);
    }

    fn release(&mut self, reg: Gpr) {
        if let Some(value) = self.holder[reg.encoding() as usize].take() {
            self.register_of.remove(&value);
        }
    }

    fn clear_registers(&mut self) {
        self.holder = [None; 32];
        self.register_of.clear();
    }

    /// Remove `value` from its register, saving it first if still needed.
    fn evict(&mut self, value: NodeId, at: u32, moves: &mut Moves) -> KestrelResult<()> {
        if self.last_local_use[value.index()] >= at {
            self.spill(value, moves)?;
        }
        if let Some(&reg) = self.register_of.get(&value) {
            self.release(reg);
        }
        Ok(())
    }

    /// Store `value` to a slot unless it already has one.
    fn spill(&mut self, value: NodeId, moves: &mut Moves) -> KestrelResult<()> {
        if self.slot_of.contains_key(&value) {
            return Ok(());
        }
        let Some(&reg) = self.register_of.get(&value) else {
            return Err(KestrelError::regalloc(format!(
                "{value} must be spilled but is not in a register"
            )));
        };
        let slot = self.new_slot()?;
        moves.push(GapMove::Store { from: reg, slot });
        self.slot_of.insert(value, slot);
        Ok(())
    }

    fn new_slot(&mut self) -> KestrelResult<u32> {
        if self.next_slot >= self.max_spill_slots {
            return Err(KestrelError::bailout(BailoutReason::TooManySpillSlots));
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        Ok(slot)
    }

    // =========================================================================
    // Locations
    // =========================================================================

    fn constant(&self, value: NodeId) -> Option<i64> {
        constant_bits(self.graph.node(value))
    }

    fn slot(&self, value: NodeId) -> KestrelResult<u32> {
        self.slot_of
            .get(&value)
            .copied()
            .ok_or_else(|| KestrelError::regalloc(format!("{value} has no location")))
    }

    fn location_of(&self, value: NodeId) -> KestrelResult<ValueLocation> {
        if let Some(bits) = self.constant(value) {
            return Ok(ValueLocation::Constant(bits));
        }
        if let Some(&reg) = self.register_of.get(&value) {
            return Ok(ValueLocation::Register(reg));
        }
        self.slot(value).map(ValueLocation::StackSlot)
    }

    fn stack_location_of(&self, value: NodeId) -> KestrelResult<ValueLocation> {
        match self.constant(value) {
            Some(bits) => Ok(ValueLocation::Constant(bits)),
            None => self.slot(value).map(ValueLocation::StackSlot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{GraphBuilder, Opcode, ValueRepresentation};
    use crate::runtime::entries::RuntimeFunction;
    use smallvec::smallvec;

    fn reg(value: NodeId) -> Operand {
        Operand {
            value,
            policy: InputPolicy::Register,
        }
    }

    /// Minimal per-opcode constraints for allocator tests.
    fn constraints_for(graph: &Graph) -> Vec<Option<NodeConstraints>> {
        graph
            .nodes()
            .map(|(_, node)| {
                let inputs = node.inputs();
                let c = match node.opcode() {
                    Opcode::Int32Constant | Opcode::SmiConstant => NodeConstraints {
                        result: ResultPolicy::Constant,
                        ..Default::default()
                    },
                    Opcode::Int32AddWithOverflow => {
                        let rhs = if graph.int32_constant(inputs[1]).is_some() {
                            Operand {
                                value: inputs[1],
                                policy: InputPolicy::Immediate,
                            }
                        } else {
                            reg(inputs[1])
                        };
                        NodeConstraints {
                            operands: smallvec![reg(inputs[0]), rhs],
                            result: ResultPolicy::Register,
                            temporaries: 0,
                        }
                    }
                    Opcode::CheckedSmiUntag => NodeConstraints {
                        operands: smallvec![Operand {
                            value: inputs[0],
                            policy: InputPolicy::ClobberRegister,
                        }],
                        result: ResultPolicy::SameAsFirst,
                        temporaries: 0,
                    },
                    Opcode::CallRuntime => NodeConstraints {
                        operands: inputs
                            .iter()
                            .enumerate()
                            .map(|(i, &value)| Operand {
                                value,
                                policy: InputPolicy::Fixed(Gpr::ALL[i]),
                            })
                            .collect(),
                        result: ResultPolicy::Fixed(Gpr::X0),
                        temporaries: 0,
                    },
                    Opcode::Return => NodeConstraints {
                        operands: smallvec![Operand {
                            value: inputs[0],
                            policy: InputPolicy::Fixed(Gpr::X0),
                        }],
                        ..Default::default()
                    },
                    Opcode::Jump => NodeConstraints::default(),
                    _ => NodeConstraints {
                        operands: inputs.iter().map(|&v| reg(v)).collect(),
                        result: if node.representation() != ValueRepresentation::None {
                            ResultPolicy::Register
                        } else {
                            ResultPolicy::None
                        },
                        temporaries: 0,
                    },
                };
                Some(c)
            })
            .collect()
    }

    fn allocate(graph: &Graph, max_spill_slots: u32) -> KestrelResult<Allocation> {
        let constraints = constraints_for(graph);
        RegisterAllocator::new(graph, &constraints, max_spill_slots).allocate()
    }

    // =========================================================================
    // Straight-line Code
    // =========================================================================

    #[test]
    fn test_immediate_operand_takes_no_register() {
        let mut b = GraphBuilder::new("f", 1);
        let p = b.parameter(0);
        let five = b.int32_constant(5);
        let sum = b.int32_add(p, five);
        b.ret(sum);
        let graph = b.finish();
        let alloc = allocate(&graph, 16).unwrap();

        let add = alloc.node(sum);
        assert_eq!(add.operands[1], ValueLocation::Constant(5));
        assert!(add.operands[0].register().is_some());
        assert_ne!(add.result, add.operands[0]);
        assert_eq!(alloc.node(five).result, ValueLocation::Constant(5));
        assert_eq!(alloc.spill_slots(), 0);
    }

    #[test]
    fn test_result_avoids_eager_deopt_registers() {
        let mut b = GraphBuilder::new("f", 1);
        let p = b.parameter(0);
        let one = b.int32_constant(1);
        let sum = b.int32_add(p, one);
        b.ret(sum);
        let graph = b.finish();
        let alloc = allocate(&graph, 16).unwrap();

        let add = alloc.node(sum);
        let values = graph.node(sum).eager_deopt().unwrap().frame.values();
        assert_eq!(add.eager_deopt_locations.len(), values.len());
        for loc in &add.eager_deopt_locations {
            assert_ne!(*loc, add.result);
            assert_ne!(*loc, ValueLocation::Unallocated);
        }
    }

    #[test]
    fn test_return_moves_into_x0() {
        let mut b = GraphBuilder::new("f", 1);
        let p = b.parameter(0);
        let one = b.int32_constant(1);
        let sum = b.int32_add(p, one);
        let ret = b.ret(sum);
        let graph = b.finish();
        let alloc = allocate(&graph, 16).unwrap();

        let from = alloc.node(sum).result.register().unwrap();
        let r = alloc.node(ret);
        assert_eq!(r.operands[0], ValueLocation::Register(Gpr::X0));
        if from != Gpr::X0 {
            assert_eq!(r.before.as_slice(), &[GapMove::Move { from, to: Gpr::X0 }]);
        }
    }

    #[test]
    fn test_same_as_first_copies_live_value() {
        let mut b = GraphBuilder::new("f", 1);
        let p = b.parameter(0);
        let untagged = b.checked_smi_untag(p);
        b.ret(untagged);
        let graph = b.finish();
        let alloc = allocate(&graph, 16).unwrap();

        // The parameter is captured by the node's eager deopt frame, so it is copied.
        let untag = alloc.node(untagged);
        let original = alloc.node(p).result;
        assert_ne!(untag.result, original);
        assert_eq!(untag.result, untag.operands[0]);
        assert!(matches!(untag.before.as_slice(), [GapMove::Move { .. }]));
        assert!(untag.eager_deopt_locations.contains(&original));
    }

    // =========================================================================
    // Calls and Blocks
    // =========================================================================

    #[test]
    fn test_call_spills_live_values() {
        let mut b = GraphBuilder::new("f", 1);
        let p = b.parameter(0);
        let closure = b.closure();
        let call = b.call_runtime(RuntimeFunction::GetProperty, &[closure, p]);
        let _ = call;
        b.ret(p);
        let graph = b.finish();
        let alloc = allocate(&graph, 16).unwrap();

        let c = alloc.node(call);
        assert_eq!(c.result, ValueLocation::Register(Gpr::X0));
        assert!(c.before.iter().any(|m| matches!(m, GapMove::Store { .. })));
        assert!(
            c.lazy_deopt_locations
                .iter()
                .all(|loc| matches!(loc, ValueLocation::StackSlot(_)))
        );
        assert_eq!(
            c.lazy_deopt_locations.len(),
            graph.node(call).lazy_deopt().unwrap().frame.input_locations_size()
        );

        // The parameter comes back from its slot after the call.
        let r = alloc.node(graph.block(graph.block_of(call)).control().unwrap());
        assert!(matches!(
            r.before.as_slice(),
            [GapMove::Load { to: Gpr::X0, .. }]
        ));
    }

    #[test]
    fn test_cross_block_value_goes_through_slot() {
        let mut b = GraphBuilder::new("f", 1);
        let p = b.parameter(0);
        let next = b.new_block();
        b.jump(next);
        b.switch_to(next);
        b.ret(p);
        let graph = b.finish();
        let alloc = allocate(&graph, 16).unwrap();

        assert!(matches!(
            alloc.node(p).after.as_slice(),
            [GapMove::Store { slot: 0, .. }]
        ));
        let ret = graph.block(next).control().unwrap();
        assert_eq!(
            alloc.node(ret).before.as_slice(),
            &[GapMove::Load {
                slot: 0,
                to: Gpr::X0
            }]
        );
    }

    #[test]
    fn test_spill_slot_limit_bails_out() {
        let mut b = GraphBuilder::new("f", 1);
        let p = b.parameter(0);
        let next = b.new_block();
        b.jump(next);
        b.switch_to(next);
        b.ret(p);
        let graph = b.finish();

        let err = allocate(&graph, 0).unwrap_err();
        assert!(matches!(
            err,
            KestrelError::Bailout {
                reason: BailoutReason::TooManySpillSlots
            }
        ));
    }

    #[test]
    fn test_constant_bits() {
        let mut b = GraphBuilder::new("f", 0);
        let i = b.int32_constant(-3);
        let s = b.smi_constant(5);
        let graph = b.finish();
        assert_eq!(constant_bits(graph.node(i)), Some(-3));
        assert_eq!(constant_bits(graph.node(s)), Some(10));
        let entry = graph.block_ids().next().unwrap();
        let closure = graph.block(entry).nodes()[0];
        assert_eq!(constant_bits(graph.node(closure)), None);
    }
}
