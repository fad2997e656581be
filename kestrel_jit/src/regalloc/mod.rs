//! Register allocation for the mid-tier code generator.
//!
//! A single forward pass over the blocks in layout order. Registers start
//! empty at every block boundary; values used outside their defining block
//! are written to a spill slot right after they are defined. Calls and
//! lazy-deopting nodes spill every live value and clear the register file.
//!
//! # Outputs
//!
//! For every allocated node:
//! - operand locations, in the order its lowering declared them
//! - result location and temporaries
//! - gap moves to run before and after its code
//! - the register snapshot deferred calls must preserve
//! - resolved eager/lazy deopt input locations

pub mod allocator;
pub mod constraint;

use std::fmt;

use smallvec::SmallVec;

use crate::backend::arm64::{Gpr, GprSet};
use crate::ir::{InputLocation, NodeId, ValueLocation};
use crate::runtime::layout::TAGGED_SIZE;

pub use allocator::RegisterAllocator;
pub use constraint::{InputPolicy, NodeConstraints, Operand, ResultPolicy};

// =============================================================================
// Gap Moves
// =============================================================================

/// A move inserted between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapMove {
    /// Reload a spilled value.
    Load { slot: u32, to: Gpr },
    /// Spill a register.
    Store { from: Gpr, slot: u32 },
    /// Register to register copy.
    Move { from: Gpr, to: Gpr },
    /// Put a constant's bits in a register.
    Materialize { value: i64, to: Gpr },
}

impl fmt::Display for GapMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GapMove::Load { slot, to } => write!(f, "{to} <- [stack:{slot}]"),
            GapMove::Store { from, slot } => write!(f, "[stack:{slot}] <- {from}"),
            GapMove::Move { from, to } => write!(f, "{to} <- {from}"),
            GapMove::Materialize { value, to } => write!(f, "{to} <- #{value}"),
        }
    }
}

// =============================================================================
// Allocation Results
// =============================================================================

/// Allocation decisions for one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeAllocation {
    pub operands: SmallVec<[ValueLocation; 4]>,
    pub result: ValueLocation,
    pub temporaries: SmallVec<[Gpr; 2]>,
    /// Registers live across the node, excluding its result and temporaries.
    pub snapshot: GprSet,
    pub before: SmallVec<[GapMove; 2]>,
    pub after: SmallVec<[GapMove; 1]>,
    pub eager_deopt_locations: Vec<InputLocation>,
    pub lazy_deopt_locations: Vec<InputLocation>,
}

/// Allocation of a whole graph.
#[derive(Debug, Clone, Default)]
pub struct Allocation {
    nodes: Vec<NodeAllocation>,
    spill_slots: u32,
}

impl Allocation {
    pub(crate) fn new(nodes: Vec<NodeAllocation>, spill_slots: u32) -> Self {
        Self { nodes, spill_slots }
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &NodeAllocation {
        &self.nodes[id.index()]
    }

    /// Number of spill slots used.
    pub fn spill_slots(&self) -> u32 {
        self.spill_slots
    }

    /// Bytes reserved below the frame pointer, 16-byte aligned.
    pub fn frame_size(&self) -> u32 {
        (self.spill_slots * TAGGED_SIZE as u32).next_multiple_of(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_alignment() {
        assert_eq!(Allocation::new(Vec::new(), 0).frame_size(), 0);
        assert_eq!(Allocation::new(Vec::new(), 1).frame_size(), 16);
        assert_eq!(Allocation::new(Vec::new(), 2).frame_size(), 16);
        assert_eq!(Allocation::new(Vec::new(), 3).frame_size(), 32);
    }

    #[test]
    fn test_gap_move_display() {
        let mv = GapMove::Load {
            slot: 2,
            to: Gpr::X3,
        };
        assert_eq!(mv.to_string(), "x3 <- [stack:2]");
        let mat = GapMove::Materialize {
            value: 10,
            to: Gpr::X0,
        };
        assert_eq!(mat.to_string(), "x0 <- #10");
    }
}
