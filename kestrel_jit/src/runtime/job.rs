//! Compilation jobs.
//!
//! A job moves through three phases, strictly in order:
//!
//! ```text
//!   ReadyToPrepare --prepare--> Prepared --execute--> Executing --> Succeeded
//!         |                                               |             |
//!         +--------------------> Failed <-----------------+--finalize---+
//! ```
//!
//! `prepare` and `finalize` run on the main thread. `execute` may run on any
//! thread and only reads the graph. A phase called in the wrong state returns
//! [`KestrelError::InvalidJobState`] and leaves the job untouched.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kestrel_core::error::BailoutReason;
use kestrel_core::{CodegenConfig, KestrelError, KestrelResult};
use tracing::debug;

use crate::codegen::{CodeGenerator, CompiledCode};
use crate::ir::Graph;

use super::function::{CodeTier, JsFunction, TieringState};
use super::heap::{Heap, LocalHeap, LocalHeapScope, PersistentHandles};

// =============================================================================
// State and Timings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    ReadyToPrepare,
    Prepared,
    Executing,
    Succeeded,
    Failed,
}

impl JobState {
    pub const fn name(self) -> &'static str {
        match self {
            JobState::ReadyToPrepare => "ReadyToPrepare",
            JobState::Prepared => "Prepared",
            JobState::Executing => "Executing",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Wall time spent in each phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTimings {
    pub prepare: Duration,
    pub execute: Duration,
    pub finalize: Duration,
}

// =============================================================================
// Compilation Info
// =============================================================================

/// What to compile and where the result goes.
#[derive(Debug)]
pub struct CompilationInfo {
    function: Arc<JsFunction>,
    graph: Graph,
    tier: CodeTier,
    osr_offset: Option<u32>,
    persistent_handles: Option<PersistentHandles>,
}

impl CompilationInfo {
    /// A top-tier compile of `function` from `graph`.
    pub fn new(function: Arc<JsFunction>, graph: Graph) -> Self {
        Self {
            function,
            graph,
            tier: CodeTier::TopTier,
            osr_offset: None,
            persistent_handles: None,
        }
    }

    #[must_use]
    pub fn with_tier(mut self, tier: CodeTier) -> Self {
        self.tier = tier;
        self
    }

    /// Compile an on-stack-replacement entry at the loop header `offset`.
    #[must_use]
    pub fn with_osr_offset(mut self, offset: u32) -> Self {
        self.osr_offset = Some(offset);
        self
    }

    #[must_use]
    pub fn with_persistent_handles(mut self, handles: PersistentHandles) -> Self {
        self.persistent_handles = Some(handles);
        self
    }

    pub fn function(&self) -> &Arc<JsFunction> {
        &self.function
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn tier(&self) -> CodeTier {
        self.tier
    }

    pub fn osr_offset(&self) -> Option<u32> {
        self.osr_offset
    }

    pub fn is_osr(&self) -> bool {
        self.osr_offset.is_some()
    }

    pub fn persistent_handles(&self) -> Option<&PersistentHandles> {
        self.persistent_handles.as_ref()
    }
}

// =============================================================================
// Compilation Job
// =============================================================================

/// One function compile, owned by whichever queue currently holds it.
pub struct CompilationJob {
    info: CompilationInfo,
    config: Arc<CodegenConfig>,
    state: JobState,
    timings: PhaseTimings,
    code: Option<Arc<CompiledCode>>,
    error: Option<KestrelError>,
    /// Function code version observed by `prepare`.
    code_version: u64,
    finalized: bool,
}

impl CompilationJob {
    pub fn new(info: CompilationInfo, config: Arc<CodegenConfig>) -> Self {
        Self {
            info,
            config,
            state: JobState::ReadyToPrepare,
            timings: PhaseTimings::default(),
            code: None,
            error: None,
            code_version: 0,
            finalized: false,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn info(&self) -> &CompilationInfo {
        &self.info
    }

    pub fn function(&self) -> &Arc<JsFunction> {
        &self.info.function
    }

    pub fn timings(&self) -> &PhaseTimings {
        &self.timings
    }

    /// The error that failed the job.
    pub fn error(&self) -> Option<&KestrelError> {
        self.error.as_ref()
    }

    /// Generated code, once `execute` has succeeded.
    pub fn code(&self) -> Option<&Arc<CompiledCode>> {
        self.code.as_ref()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn expect_state(&self, expected: JobState) -> KestrelResult<()> {
        if self.finalized {
            return Err(KestrelError::invalid_state(expected.name(), "Finalized"));
        }
        if self.state != expected {
            return Err(KestrelError::invalid_state(
                expected.name(),
                self.state.name(),
            ));
        }
        Ok(())
    }

    fn fail(&mut self, error: KestrelError) -> KestrelResult<()> {
        self.state = JobState::Failed;
        self.error = Some(error.clone());
        Err(error)
    }

    /// Verify the graph and mark the function as having a compile underway.
    ///
    /// # Errors
    ///
    /// [`BailoutReason::GraphVerificationFailed`] if the graph is malformed.
    pub fn prepare(&mut self) -> KestrelResult<()> {
        self.expect_state(JobState::ReadyToPrepare)?;
        let start = Instant::now();
        let verified = self.info.graph.verify();
        self.timings.prepare += start.elapsed();

        if let Err(error) = verified {
            debug!(function = self.info.function.name(), %error, "graph verification failed");
            return self.fail(KestrelError::bailout(
                BailoutReason::GraphVerificationFailed,
            ));
        }

        let function = &self.info.function;
        self.code_version = function.code_version();
        function.set_tiering_state(TieringState::InProgress);
        self.state = JobState::Prepared;
        Ok(())
    }

    /// Select instructions, allocate registers and emit code.
    ///
    /// The job's persistent handles are attached to `local_heap` for the
    /// duration of the phase.
    ///
    /// # Errors
    ///
    /// Any code generation failure. The job is left `Failed`.
    pub fn execute(&mut self, local_heap: &LocalHeap) -> KestrelResult<()> {
        self.expect_state(JobState::Prepared)?;
        self.state = JobState::Executing;
        let start = Instant::now();
        let generated = {
            let scope = LocalHeapScope::new(local_heap, &mut self.info.persistent_handles);
            scope.local_heap().assert_unparked();
            CodeGenerator::new(&self.info.graph, &self.config).generate()
        };
        self.timings.execute += start.elapsed();

        match generated {
            Ok(code) => {
                self.code = Some(Arc::new(code));
                self.state = JobState::Succeeded;
                Ok(())
            }
            Err(error) => self.fail(error),
        }
    }

    /// Install the code on the main thread.
    ///
    /// OSR code always goes into the function's OSR cache. Otherwise the
    /// install is abandoned if the function meanwhile got code of this tier or
    /// better, or its code changed since `prepare`.
    ///
    /// # Errors
    ///
    /// A race-loss bailout ([`KestrelError::is_race_loss`]). The job is left
    /// `Failed`.
    pub fn finalize(&mut self, heap: &Heap) -> KestrelResult<()> {
        self.expect_state(JobState::Succeeded)?;
        heap.assert_main_thread_unparked();
        let start = Instant::now();
        let installed = self.install();
        self.timings.finalize += start.elapsed();
        if installed.is_ok() {
            self.finalized = true;
        }
        installed
    }

    fn install(&mut self) -> KestrelResult<()> {
        let Some(code) = self.code.clone() else {
            return self.fail(KestrelError::compile("succeeded job has no code", None));
        };
        let function = Arc::clone(&self.info.function);

        if let Some(offset) = self.info.osr_offset {
            function.install_osr_code(offset, code);
            return Ok(());
        }
        if function.has_code_at_least(self.info.tier) {
            debug!(function = function.name(), tier = %self.info.tier, "already optimized");
            return self.fail(KestrelError::bailout(BailoutReason::AlreadyOptimized));
        }
        if function.code_version() != self.code_version {
            debug!(function = function.name(), "code changed during compilation");
            return self.fail(KestrelError::bailout(BailoutReason::FunctionCodeChanged));
        }
        function.install_code(self.info.tier, code);
        Ok(())
    }
}

impl fmt::Debug for CompilationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationJob")
            .field("function", &self.info.function.name())
            .field("tier", &self.info.tier)
            .field("osr_offset", &self.info.osr_offset)
            .field("state", &self.state)
            .field("finalized", &self.finalized)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
