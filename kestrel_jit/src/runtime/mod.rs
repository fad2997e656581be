//! Runtime side of the compiler.
//!
//! This module provides:
//! - Call targets and object layout constants referenced by generated code
//! - The heap access capability handed to compile threads
//! - Compilation jobs and the functions they install code into
//! - The background dispatcher and the platform it schedules workers on

pub mod dispatcher;
pub mod entries;
pub mod function;
pub mod heap;
pub mod job;
pub mod layout;
pub mod platform;
pub mod queue;
pub mod stats;
mod worker;

pub use dispatcher::{BlockingBehavior, EnqueueError, OptimizingCompileDispatcher};
pub use function::{CodeTier, JsFunction, TieringState};
pub use heap::{Heap, LocalHeap, LocalHeapScope, ParkedScope, PersistentHandles};
pub use job::{CompilationInfo, CompilationJob, JobState, PhaseTimings};
pub use platform::{
    JobDelegate, JobHandle, JobTask, ManualPlatform, Platform, TaskPriority, ThreadPoolPlatform,
};
pub use queue::RingQueue;
pub use stats::CompilationStatistics;
