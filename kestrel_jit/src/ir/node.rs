//! IR nodes and identifiers.

use std::fmt;

use smallvec::SmallVec;

use super::deopt::{EagerDeoptInfo, LazyDeoptInfo};
use super::opcode::{Opcode, Payload};
use super::properties::{OpProperties, ValueRepresentation};
use crate::backend::arm64::Gpr;

// =============================================================================
// Identifiers
// =============================================================================

/// Index of a node in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Index of a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Index of a switch table in the graph's side table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwitchId(pub u32);

// =============================================================================
// Locations
// =============================================================================

/// Where a value lives at a given point of the generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValueLocation {
    /// Not assigned yet.
    #[default]
    Unallocated,
    /// In a general-purpose register.
    Register(Gpr),
    /// In a frame spill slot.
    StackSlot(u32),
    /// Never materialized: a compile-time constant (tagged for Smi constants).
    Constant(i64),
}

impl ValueLocation {
    pub fn register(self) -> Option<Gpr> {
        match self {
            ValueLocation::Register(reg) => Some(reg),
            _ => None,
        }
    }
}

impl fmt::Display for ValueLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueLocation::Unallocated => f.write_str("-"),
            ValueLocation::Register(reg) => write!(f, "{reg}"),
            ValueLocation::StackSlot(slot) => write!(f, "[stack:{slot}]"),
            ValueLocation::Constant(value) => write!(f, "#{value}"),
        }
    }
}

// =============================================================================
// Nodes
// =============================================================================

/// Node inputs; most nodes have at most two.
pub type Inputs = SmallVec<[NodeId; 4]>;

/// An IR node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    opcode: Opcode,
    pub(crate) inputs: Inputs,
    payload: Payload,
    pub(crate) eager_deopt: Option<Box<EagerDeoptInfo>>,
    pub(crate) lazy_deopt: Option<Box<LazyDeoptInfo>>,
}

impl Node {
    /// Create a node. Deopt info is attached by the graph builder.
    pub fn new(opcode: Opcode, inputs: impl IntoIterator<Item = NodeId>, payload: Payload) -> Self {
        debug_assert_eq!(opcode.info().payload, payload.kind(), "{opcode} payload");
        Self {
            opcode,
            inputs: inputs.into_iter().collect(),
            payload,
            eager_deopt: None,
            lazy_deopt: None,
        }
    }

    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    #[inline]
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    #[inline]
    pub fn input(&self, index: usize) -> NodeId {
        self.inputs[index]
    }

    #[inline]
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    #[inline]
    pub fn payload(&self) -> Payload {
        self.payload
    }

    #[inline]
    pub fn properties(&self) -> OpProperties {
        self.opcode.properties()
    }

    #[inline]
    pub fn representation(&self) -> ValueRepresentation {
        self.opcode.result_representation()
    }

    pub fn eager_deopt(&self) -> Option<&EagerDeoptInfo> {
        self.eager_deopt.as_deref()
    }

    pub fn lazy_deopt(&self) -> Option<&LazyDeoptInfo> {
        self.lazy_deopt.as_deref()
    }

    /// Constant value of `Int32Constant` / `SmiConstant` nodes.
    pub fn int32_value(&self) -> Option<i32> {
        match (self.opcode, self.payload) {
            (Opcode::Int32Constant | Opcode::SmiConstant, Payload::Int32(value)) => Some(value),
            _ => None,
        }
    }

    /// Visit every node referenced by deopt info.
    pub fn for_each_deopt_value(&self, f: &mut impl FnMut(NodeId)) {
        if let Some(info) = &self.eager_deopt {
            info.frame.for_each_value(f);
        }
        if let Some(info) = &self.lazy_deopt {
            info.frame.for_each_value(f);
        }
    }

    pub(crate) fn set_opcode(&mut self, opcode: Opcode, payload: Payload) {
        self.opcode = opcode;
        self.payload = payload;
    }
}
