//! Intermediate representation consumed by the code generator.
//!
//! - `properties`: per-opcode effect flags and value representations
//! - `opcode`: the opcode table and node payloads
//! - `node`: nodes, ids and value locations
//! - `deopt`: deoptimization frames
//! - `graph`: the block-structured node arena, verification, in-place rewriting
//! - `builder`: programmatic graph construction

pub mod builder;
pub mod deopt;
pub mod graph;
pub mod node;
pub mod opcode;
pub mod properties;

pub use builder::GraphBuilder;
pub use deopt::{
    DeoptFrame, DeoptFrameKind, DeoptReason, EagerDeoptInfo, FrameState, InputLocation,
    LazyDeoptInfo,
};
pub use graph::{Block, Graph, RewriteError, SwitchTable};
pub use node::{BlockId, Node, NodeId, SwitchId, ValueLocation};
pub use opcode::{CompareOp, InputCount, OPCODE_COUNT, Opcode, OpcodeInfo, Payload, PayloadKind};
pub use properties::{OpProperties, ValueRepresentation};
