//! Static per-opcode properties.

use std::fmt;

// =============================================================================
// Value Representation
// =============================================================================

/// Machine representation of a node's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueRepresentation {
    /// The node produces no value.
    None = 0,
    /// Tagged pointer or Smi.
    Tagged = 1,
    /// Untagged signed 32-bit integer.
    Int32 = 2,
    /// Untagged unsigned 32-bit integer.
    Uint32 = 3,
    /// Untagged double.
    Float64 = 4,
}

impl ValueRepresentation {
    const fn from_bits(bits: u32) -> Self {
        match bits {
            1 => ValueRepresentation::Tagged,
            2 => ValueRepresentation::Int32,
            3 => ValueRepresentation::Uint32,
            4 => ValueRepresentation::Float64,
            _ => ValueRepresentation::None,
        }
    }

    /// Whether a consumer expecting `expected` may read a value of this
    /// representation directly. Uint32 values are accepted as Int32 bit patterns.
    pub const fn satisfies(self, expected: ValueRepresentation) -> bool {
        matches!(
            (self, expected),
            (ValueRepresentation::Tagged, ValueRepresentation::Tagged)
                | (ValueRepresentation::Int32, ValueRepresentation::Int32)
                | (ValueRepresentation::Uint32, ValueRepresentation::Uint32)
                | (ValueRepresentation::Uint32, ValueRepresentation::Int32)
                | (ValueRepresentation::Float64, ValueRepresentation::Float64)
        )
    }
}

impl fmt::Display for ValueRepresentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueRepresentation::None => "None",
            ValueRepresentation::Tagged => "Tagged",
            ValueRepresentation::Int32 => "Int32",
            ValueRepresentation::Uint32 => "Uint32",
            ValueRepresentation::Float64 => "Float64",
        })
    }
}

// =============================================================================
// Operation Properties
// =============================================================================

const REPRESENTATION_SHIFT: u32 = 8;

bitflags::bitflags! {
    /// What an operation may do at runtime, plus its result representation in
    /// bits 8-10.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpProperties: u32 {
        /// May deoptimize before completing, using a pre-built frame.
        const CAN_EAGER_DEOPT = 1 << 0;
        /// May deoptimize after a call returns.
        const CAN_LAZY_DEOPT = 1 << 1;
        /// Performs a call: every register is clobbered.
        const CAN_CALL = 1 << 2;
        /// Has a deferred call that must save live registers itself.
        const NEEDS_REGISTER_SNAPSHOT = 1 << 3;
        /// Reads the heap.
        const CAN_READ = 1 << 4;
        /// Writes the heap.
        const CAN_WRITE = 1 << 5;
        /// May allocate.
        const CAN_ALLOCATE = 1 << 6;
        /// Result representation field.
        const REPRESENTATION = 0b111 << REPRESENTATION_SHIFT;
    }
}

impl Default for OpProperties {
    fn default() -> Self {
        Self::empty()
    }
}

impl OpProperties {
    /// No effects, no value.
    pub const PURE: Self = Self::empty();

    /// An eagerly deoptimizing check.
    pub const EAGER_DEOPT: Self = Self::CAN_EAGER_DEOPT;

    /// A call that may lazily deoptimize.
    pub const JS_CALL: Self = Self::CAN_CALL
        .union(Self::CAN_LAZY_DEOPT)
        .union(Self::CAN_READ)
        .union(Self::CAN_WRITE)
        .union(Self::CAN_ALLOCATE);

    /// A rarely taken out-of-line call.
    pub const DEFERRED_CALL: Self = Self::NEEDS_REGISTER_SNAPSHOT;

    /// Attach a result representation.
    #[must_use]
    pub const fn with_representation(self, repr: ValueRepresentation) -> Self {
        let cleared = self.bits() & !Self::REPRESENTATION.bits();
        Self::from_bits_retain(cleared | ((repr as u32) << REPRESENTATION_SHIFT))
    }

    /// Result representation.
    pub const fn value_representation(self) -> ValueRepresentation {
        ValueRepresentation::from_bits(
            (self.bits() & Self::REPRESENTATION.bits()) >> REPRESENTATION_SHIFT,
        )
    }

    /// Whether the operation produces a value.
    pub const fn is_value(self) -> bool {
        !matches!(self.value_representation(), ValueRepresentation::None)
    }

    pub const fn can_eager_deopt(self) -> bool {
        self.contains(Self::CAN_EAGER_DEOPT)
    }

    pub const fn can_lazy_deopt(self) -> bool {
        self.contains(Self::CAN_LAZY_DEOPT)
    }

    pub const fn can_call(self) -> bool {
        self.contains(Self::CAN_CALL)
    }

    pub const fn needs_register_snapshot(self) -> bool {
        self.contains(Self::NEEDS_REGISTER_SNAPSHOT)
    }

    /// Whether every deopt and snapshot requirement of `other` is also one of `self`.
    ///
    /// A node may be rewritten in place only into an operation it implies: its
    /// deopt info and snapshot were sized for the original.
    pub const fn implies_deopt_shape_of(self, other: OpProperties) -> bool {
        let shape = Self::CAN_EAGER_DEOPT
            .union(Self::CAN_LAZY_DEOPT)
            .union(Self::NEEDS_REGISTER_SNAPSHOT);
        other.intersection(shape).difference(self).is_empty()
    }
}
