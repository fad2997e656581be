//! Deoptimization frame descriptions.
//!
//! A node that can deoptimize carries the chain of frames the deoptimizer must
//! rebuild. Each frame captures IR values; once registers are allocated every
//! captured value gets an input location, visited in the same order as
//! [`DeoptFrame::for_each_value`]. The number of locations is fixed by the
//! frame shapes alone:
//!
//! ```text
//!   Interpreted          1 (closure) + parameters + locals + accumulator
//!   InlinedArguments     1 (closure) + arguments
//!   ConstructStub        1 (closure) + 1 (receiver) + arguments + 1 (context)
//!   BuiltinContinuation  parameters + 1 (context)
//! ```
//!
//! summed over the parent chain.

use std::fmt;

use super::node::{NodeId, ValueLocation};
use crate::runtime::entries::Builtin;

/// Why optimized code gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeoptReason {
    Overflow,
    NotASmi,
    DivisionByZero,
    MinusZero,
    LostPrecision,
    OutOfBounds,
    InsufficientTypeFeedback,
}

impl DeoptReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            DeoptReason::Overflow => "overflow",
            DeoptReason::NotASmi => "not a Smi",
            DeoptReason::DivisionByZero => "division by zero",
            DeoptReason::MinusZero => "minus zero",
            DeoptReason::LostPrecision => "lost precision",
            DeoptReason::OutOfBounds => "out of bounds",
            DeoptReason::InsufficientTypeFeedback => "insufficient type feedback",
        }
    }
}

impl fmt::Display for DeoptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interpreter register file at a bytecode offset. Only live values are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameState {
    /// Parameter registers, receiver first.
    pub parameters: Vec<NodeId>,
    /// Live local registers.
    pub locals: Vec<NodeId>,
    /// Accumulator, when live.
    pub accumulator: Option<NodeId>,
}

impl FrameState {
    /// Number of captured values.
    pub fn size(&self) -> usize {
        self.parameters.len() + self.locals.len() + usize::from(self.accumulator.is_some())
    }

    fn for_each_value(&self, f: &mut impl FnMut(NodeId)) {
        self.parameters.iter().copied().for_each(&mut *f);
        self.locals.iter().copied().for_each(&mut *f);
        if let Some(acc) = self.accumulator {
            f(acc);
        }
    }
}

/// One frame to rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeoptFrameKind {
    /// An interpreter frame.
    Interpreted {
        closure: NodeId,
        bytecode_offset: u32,
        frame_state: FrameState,
    },
    /// Arguments adaptor for an inlined call with mismatched arity.
    InlinedArguments {
        closure: NodeId,
        arguments: Vec<NodeId>,
    },
    /// Construct stub frame of an inlined `new`.
    ConstructStub {
        closure: NodeId,
        receiver: NodeId,
        arguments_without_receiver: Vec<NodeId>,
        context: NodeId,
    },
    /// Continuation into the middle of a builtin.
    BuiltinContinuation {
        builtin: Builtin,
        parameters: Vec<NodeId>,
        context: NodeId,
    },
}

/// A frame plus the frames it was inlined into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeoptFrame {
    pub kind: DeoptFrameKind,
    pub parent: Option<Box<DeoptFrame>>,
}

impl DeoptFrame {
    /// Outermost interpreter frame.
    pub fn interpreted(closure: NodeId, bytecode_offset: u32, frame_state: FrameState) -> Self {
        Self {
            kind: DeoptFrameKind::Interpreted {
                closure,
                bytecode_offset,
                frame_state,
            },
            parent: None,
        }
    }

    /// Nest `self` inside `parent`.
    #[must_use]
    pub fn with_parent(mut self, parent: DeoptFrame) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    /// Values captured by this frame alone.
    pub fn own_size(&self) -> usize {
        match &self.kind {
            DeoptFrameKind::Interpreted { frame_state, .. } => 1 + frame_state.size(),
            DeoptFrameKind::InlinedArguments { arguments, .. } => 1 + arguments.len(),
            DeoptFrameKind::ConstructStub {
                arguments_without_receiver,
                ..
            } => 1 + 1 + arguments_without_receiver.len() + 1,
            DeoptFrameKind::BuiltinContinuation { parameters, .. } => parameters.len() + 1,
        }
    }

    /// Size of the input-location array for this frame and all parents.
    pub fn input_locations_size(&self) -> usize {
        self.own_size() + self.parent.as_ref().map_or(0, |p| p.input_locations_size())
    }

    /// Number of frames in the chain.
    pub fn depth(&self) -> usize {
        1 + self.parent.as_ref().map_or(0, |p| p.depth())
    }

    /// Visit every captured value, outermost frame first.
    pub fn for_each_value(&self, f: &mut impl FnMut(NodeId)) {
        if let Some(parent) = &self.parent {
            parent.for_each_value(f);
        }
        match &self.kind {
            DeoptFrameKind::Interpreted {
                closure,
                frame_state,
                ..
            } => {
                f(*closure);
                frame_state.for_each_value(f);
            }
            DeoptFrameKind::InlinedArguments { closure, arguments } => {
                f(*closure);
                arguments.iter().copied().for_each(&mut *f);
            }
            DeoptFrameKind::ConstructStub {
                closure,
                receiver,
                arguments_without_receiver,
                context,
            } => {
                f(*closure);
                f(*receiver);
                arguments_without_receiver.iter().copied().for_each(&mut *f);
                f(*context);
            }
            DeoptFrameKind::BuiltinContinuation {
                parameters,
                context,
                ..
            } => {
                parameters.iter().copied().for_each(&mut *f);
                f(*context);
            }
        }
    }

    /// Captured values in visiting order.
    pub fn values(&self) -> Vec<NodeId> {
        let mut values = Vec::with_capacity(self.input_locations_size());
        self.for_each_value(&mut |id| values.push(id));
        values
    }
}

/// Deopt info for a check inside the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EagerDeoptInfo {
    pub frame: DeoptFrame,
}

/// Deopt info for the return point of a call made by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LazyDeoptInfo {
    pub frame: DeoptFrame,
}

/// Where a captured value lives when the deopt happens.
pub type InputLocation = ValueLocation;
