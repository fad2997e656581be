//! Operand and result policies declared by node lowerings.
//!
//! Lowerings describe what each operand needs ("some register", "exactly
//! `x0`", "a constant") and the allocator decides how to satisfy it.

use std::fmt;

use smallvec::SmallVec;

use crate::backend::arm64::Gpr;
use crate::ir::NodeId;

// =============================================================================
// Policies
// =============================================================================

/// Requirement on one operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputPolicy {
    /// Any allocatable register; the value survives the node.
    Register,
    /// Exactly this register.
    Fixed(Gpr),
    /// Register, stack slot or constant.
    Any,
    /// A register the node may overwrite.
    ClobberRegister,
    /// Encoded in the instruction; the value must be a constant.
    Immediate,
}

/// Requirement on the node's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResultPolicy {
    /// No value.
    #[default]
    None,
    /// Any allocatable register distinct from the operand registers.
    Register,
    /// Exactly this register.
    Fixed(Gpr),
    /// The register of operand 0, which is copied first when still needed.
    SameAsFirst,
    /// Never materialized.
    Constant,
}

impl fmt::Display for InputPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputPolicy::Register => f.write_str("R"),
            InputPolicy::Fixed(reg) => write!(f, "{reg}"),
            InputPolicy::Any => f.write_str("*"),
            InputPolicy::ClobberRegister => f.write_str("R!"),
            InputPolicy::Immediate => f.write_str("#"),
        }
    }
}

// =============================================================================
// Node Constraints
// =============================================================================

/// One constrained operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub value: NodeId,
    pub policy: InputPolicy,
}

/// Everything the allocator needs to know about a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeConstraints {
    /// Operands in the order the code generator reads them back.
    pub operands: SmallVec<[Operand; 4]>,
    pub result: ResultPolicy,
    /// Scratch registers needed for the node's whole sequence.
    pub temporaries: u8,
}

impl NodeConstraints {
    /// Whether any operand or the result is pinned to `reg`.
    pub fn uses_fixed(&self, reg: Gpr) -> bool {
        self.result == ResultPolicy::Fixed(reg)
            || self
                .operands
                .iter()
                .any(|op| op.policy == InputPolicy::Fixed(reg))
    }
}

impl fmt::Display for NodeConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, op) in self.operands.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}:{}", op.value, op.policy)?;
        }
        write!(f, ") -> {:?}", self.result)?;
        if self.temporaries > 0 {
            write!(f, " +{} temps", self.temporaries)?;
        }
        Ok(())
    }
}
