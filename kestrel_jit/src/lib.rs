//! Concurrent optimizing compiler for Kestrel.
//!
//! Lowers a block-structured IR into AArch64 machine code off the main thread:
//! - Typed IR nodes with deopt frame descriptors and checked in-place rewriting
//! - Table-driven two-phase instruction selection (constraints, then code)
//! - Symbolic AArch64 macro-assembler with deferred code and deopt exits
//! - Forward register allocation honoring per-node constraints
//! - Background dispatcher over an injectable thread-pool platform
#![deny(unsafe_op_in_unsafe_fn)]
pub mod backend;
pub mod codegen;
pub mod ir;
pub mod regalloc;
pub mod runtime;

pub use codegen::{CodeGenerator, CompiledCode};
pub use ir::{Graph, GraphBuilder, NodeId, Opcode};
pub use runtime::{
    BlockingBehavior, CompilationJob, EnqueueError, Heap, JsFunction,
    OptimizingCompileDispatcher,
};
