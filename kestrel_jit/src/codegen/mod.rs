//! AArch64 instruction selection and code generation.
//!
//! Every opcode has a [`selector::NodeLowering`] with two phases: declare
//! operand and result constraints, then emit code once the allocator has
//! placed the operands. Lowerings live in [`nodes`], grouped by kind.

pub mod code;
pub mod constraints;
pub mod immediate;
pub mod matcher;
pub mod nodes;
pub mod selector;
pub mod state;
pub mod switch;

pub use code::{CodeGenerator, CompiledCode, DeoptTableEntry};
pub use constraints::ConstraintBuilder;
pub use immediate::{ImmediateMode, can_be_immediate};
pub use selector::{NodeLowering, lowering};
pub use state::ProcessingState;
pub use switch::SwitchStrategy;
