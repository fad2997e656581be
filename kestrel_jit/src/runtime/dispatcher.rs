//! Concurrent optimizing compile dispatcher.
//!
//! The main thread prepares jobs and queues them here. A [`CompileTask`]
//! posted to the [`Platform`] executes them in the background and moves the
//! ones that succeed to an output queue, which the main thread drains with
//! [`OptimizingCompileDispatcher::install_optimized_functions`].
//!
//! ```text
//!   main thread                    workers                    main thread
//!   prepare ─► input (ring) ─► execute ─► output (deque) ─► finalize/install
//!                   │                 │
//!                   └── flush ──► dispose ◄── failure
//! ```
//!
//! A job lives in at most one queue at a time and moves between them by
//! value. Disposal restores the function's tiering state so it can be queued
//! again later.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use kestrel_core::{CodegenConfig, CompilerConfig, DispatcherConfig, KestrelResult};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use super::heap::{Heap, ParkedScope};
use super::job::{CompilationJob, JobState};
use super::platform::{JobHandle, Platform, TaskPriority};
use super::queue::RingQueue;
use super::stats::CompilationStatistics;
use super::worker::CompileTask;

/// Logs at info level when dispatcher tracing is on, debug level otherwise.
macro_rules! trace_recompile {
    ($shared:expr, $($arg:tt)+) => {
        if $shared.config.trace_concurrent_recompilation {
            tracing::info!(target: "kestrel::recompile", $($arg)+)
        } else {
            tracing::debug!(target: "kestrel::recompile", $($arg)+)
        }
    };
}

// =============================================================================
// Public Types
// =============================================================================

/// Whether a flush waits for running workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingBehavior {
    /// Cancel workers, wait for them, then drop their finished output too.
    Block,
    /// Drop pending input only; running work finishes on its own.
    DontBlock,
}

/// A bounded input queue was full. The job is handed back untouched.
#[derive(Debug, Error)]
#[error("optimization queue is full ({capacity} jobs)")]
pub struct EnqueueError {
    pub job: Box<CompilationJob>,
    pub capacity: usize,
}

// =============================================================================
// Shared State
// =============================================================================

/// State reachable from both the dispatcher and its workers.
pub(crate) struct DispatcherShared {
    pub(crate) config: DispatcherConfig,
    pub(crate) heap: Arc<Heap>,
    pub(crate) input: Mutex<RingQueue<Box<CompilationJob>>>,
    pub(crate) output: Mutex<VecDeque<Box<CompilationJob>>>,
    pub(crate) stats: Mutex<CompilationStatistics>,
    /// Jobs accepted and not yet installed or disposed.
    jobs_in_flight: AtomicUsize,
    pub(crate) install_requested: AtomicBool,
}

impl DispatcherShared {
    pub(crate) fn new(config: DispatcherConfig, heap: Arc<Heap>) -> Self {
        let input = RingQueue::new(config.queue_capacity);
        Self {
            config,
            heap,
            input: Mutex::new(input),
            output: Mutex::new(VecDeque::new()),
            stats: Mutex::new(CompilationStatistics::new()),
            jobs_in_flight: AtomicUsize::new(0),
            install_requested: AtomicBool::new(false),
        }
    }

    pub(crate) fn next_input(&self) -> Option<Box<CompilationJob>> {
        self.input.lock().pop()
    }

    pub(crate) fn max_concurrency(&self, worker_count: usize) -> usize {
        let wanted = self.input.lock().len() + worker_count;
        match self.config.max_threads {
            0 => wanted,
            max_threads => wanted.min(max_threads),
        }
    }

    pub(crate) fn request_install(&self) {
        self.install_requested.store(true, Ordering::Release);
    }

    pub(crate) fn accept(&self) {
        self.jobs_in_flight.fetch_add(1, Ordering::AcqRel);
    }

    fn retire(&self) {
        let previous = self.jobs_in_flight.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "job retired twice");
    }

    /// Throw a job away, optionally resetting its function's tiering state.
    pub(crate) fn dispose(&self, job: Box<CompilationJob>, restore_function_code: bool) {
        if restore_function_code {
            job.function().restore_function_code();
        }
        trace_recompile!(self, function = job.function().name(), "disposed compilation job");
        self.stats.lock().record_disposed();
        self.retire();
    }

    fn flush_input_queue(&self) -> usize {
        let jobs = self.input.lock().drain();
        let count = jobs.len();
        for job in jobs {
            self.dispose(job, true);
        }
        count
    }

    fn flush_output_queue(&self, restore_function_code: bool) -> usize {
        let jobs: Vec<_> = self.output.lock().drain(..).collect();
        let count = jobs.len();
        for job in jobs {
            self.dispose(job, restore_function_code);
        }
        count
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Owns the compile queues and the background worker job.
pub struct OptimizingCompileDispatcher {
    shared: Arc<DispatcherShared>,
    codegen: Arc<CodegenConfig>,
    platform: Arc<dyn Platform>,
    /// `None` when concurrent compilation is disabled.
    job_handle: Mutex<Option<Box<dyn JobHandle>>>,
}

impl OptimizingCompileDispatcher {
    /// Validate `config` and post the worker job.
    ///
    /// # Errors
    ///
    /// Returns [`kestrel_core::KestrelError::Config`] if `config` is invalid.
    pub fn new(
        config: &CompilerConfig,
        heap: Arc<Heap>,
        platform: Arc<dyn Platform>,
    ) -> KestrelResult<Self> {
        config.validate()?;
        let enabled = config.concurrency_allowed();
        let dispatcher = Self {
            shared: Arc::new(DispatcherShared::new(config.dispatcher.clone(), heap)),
            codegen: Arc::new(config.codegen.clone()),
            platform,
            job_handle: Mutex::new(None),
        };
        if enabled {
            *dispatcher.job_handle.lock() = Some(dispatcher.post_compile_task());
        }
        debug!(
            enabled,
            max_threads = config.dispatcher.max_threads,
            queue_capacity = config.dispatcher.queue_capacity,
            platform_threads = dispatcher.platform.worker_thread_count(),
            "optimizing compile dispatcher created"
        );
        Ok(dispatcher)
    }

    fn post_compile_task(&self) -> Box<dyn JobHandle> {
        let task = CompileTask::new(Arc::clone(&self.shared));
        self.platform
            .post_job(TaskPriority::UserVisible, Box::new(task))
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    /// Code generation settings new jobs should be created with.
    pub fn codegen_config(&self) -> Arc<CodegenConfig> {
        Arc::clone(&self.codegen)
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.shared.heap
    }

    /// Whether jobs run in the background. Tracing flags that write from
    /// inside a compile turn this off, and jobs then execute on the calling
    /// thread.
    pub fn is_enabled(&self) -> bool {
        self.job_handle.lock().is_some()
    }

    // =========================================================================
    // Queueing
    // =========================================================================

    /// Append a prepared job to the input queue and wake workers.
    ///
    /// # Errors
    ///
    /// A bounded queue at capacity returns the job inside [`EnqueueError`].
    pub fn queue_for_optimization(
        &self,
        job: Box<CompilationJob>,
    ) -> Result<(), EnqueueError> {
        debug_assert_eq!(job.state(), JobState::Prepared);
        let guard = self.job_handle.lock();
        let Some(handle) = guard.as_ref() else {
            self.shared.accept();
            self.compile_synchronously(job);
            return Ok(());
        };

        let name = job.function().name().to_string();
        {
            // Counted before the push so a worker cannot retire it first.
            let mut input = self.shared.input.lock();
            self.shared.accept();
            if let Err(job) = input.push(job) {
                self.shared.retire();
                let capacity = input.capacity().unwrap_or(0);
                trace_recompile!(self.shared, function = %name, capacity, "optimization queue full");
                return Err(EnqueueError { job, capacity });
            }
        }
        trace_recompile!(self.shared, function = %name, "queued for concurrent optimization");
        handle.notify_concurrency_increase();
        Ok(())
    }

    fn compile_synchronously(&self, mut job: Box<CompilationJob>) {
        match job.execute(self.shared.heap.main_thread_local_heap()) {
            Ok(()) => {
                self.shared.output.lock().push_back(job);
                self.shared.request_install();
            }
            Err(error) => {
                debug!(function = job.function().name(), %error, "synchronous compile failed");
                self.shared.stats.lock().record_failure(job.timings());
                self.shared.dispose(job, true);
            }
        }
    }

    /// Pop the oldest pending job. Never blocks beyond the queue lock.
    pub fn next_input(&self) -> Option<Box<CompilationJob>> {
        self.shared.next_input()
    }

    /// Workers worth running given `worker_count` already running:
    /// `queue length + worker_count`, capped at `max_threads` unless that is 0.
    pub fn max_concurrency(&self, worker_count: usize) -> usize {
        self.shared.max_concurrency(worker_count)
    }

    /// Whether a job can be queued without hitting the capacity bound.
    pub fn is_queue_available(&self) -> bool {
        !self.shared.input.lock().is_full()
    }

    pub fn input_queue_length(&self) -> usize {
        self.shared.input.lock().len()
    }

    pub fn output_queue_length(&self) -> usize {
        self.shared.output.lock().len()
    }

    /// Any job queued, running, or waiting to be installed.
    pub fn has_jobs(&self) -> bool {
        self.shared.jobs_in_flight.load(Ordering::Acquire) > 0
    }

    /// Whether a worker finished a job since the last
    /// [`take_install_request`](Self::take_install_request).
    pub fn install_requested(&self) -> bool {
        self.shared.install_requested.load(Ordering::Acquire)
    }

    pub fn take_install_request(&self) -> bool {
        self.shared.install_requested.swap(false, Ordering::AcqRel)
    }

    pub fn statistics(&self) -> CompilationStatistics {
        self.shared.stats.lock().clone()
    }

    // =========================================================================
    // Flushing and Waiting
    // =========================================================================

    /// Dispose every pending job. With [`BlockingBehavior::Block`] also stop
    /// running workers, post a fresh worker job and dispose finished output.
    pub fn flush(&self, blocking: BlockingBehavior) {
        let flushed_input = self.shared.flush_input_queue();
        let mut flushed_output = 0;
        if blocking == BlockingBehavior::Block {
            self.restart_workers(|handle| handle.cancel());
            flushed_output = self.shared.flush_output_queue(true);
        }
        trace_recompile!(
            self.shared,
            ?blocking,
            flushed_input,
            flushed_output,
            "flushed concurrent recompilation queues"
        );
    }

    /// Shut down: drop pending input, wait for running workers and drop
    /// their output. Functions keep their tiering state since no further
    /// install will happen.
    pub fn stop(&self) {
        let flushed_input = self.shared.flush_input_queue();
        self.await_compile_tasks();
        let flushed_output = self.shared.flush_output_queue(false);
        trace_recompile!(
            self.shared,
            flushed_input,
            flushed_output,
            "stopped concurrent recompilation"
        );
    }

    /// Block the main thread, parked, until the input queue is drained and no
    /// worker is running.
    pub fn await_compile_tasks(&self) {
        {
            let _parked = ParkedScope::new(self.shared.heap.main_thread_local_heap());
            self.restart_workers(|handle| handle.join());
        }
        debug_assert!(
            self.shared.input.lock().is_empty(),
            "input queue not empty after join"
        );
    }

    fn restart_workers(&self, stop: impl FnOnce(&mut Box<dyn JobHandle>)) {
        let mut slot = self.job_handle.lock();
        if let Some(handle) = slot.as_mut() {
            stop(handle);
            *handle = self.post_compile_task();
        }
    }

    // =========================================================================
    // Installation
    // =========================================================================

    /// Finalize every finished job on the main thread. Non-OSR jobs whose
    /// function meanwhile got code of their tier are disposed instead.
    /// Returns the number of functions that received code.
    pub fn install_optimized_functions(&self) -> usize {
        self.drain_output(true)
    }

    /// Finalize every finished job without the already-optimized pre-check,
    /// leaving the race check to [`CompilationJob::finalize`].
    pub fn finalize_finished_jobs(&self) -> usize {
        self.drain_output(false)
    }

    fn drain_output(&self, skip_optimized: bool) -> usize {
        let mut installed = 0;
        loop {
            let Some(job) = self.shared.output.lock().pop_front() else {
                break;
            };
            let info = job.info();
            if skip_optimized
                && !info.is_osr()
                && info.function().has_code_at_least(info.tier())
            {
                trace_recompile!(
                    self.shared,
                    function = info.function().name(),
                    "aborting compilation, function is already optimized"
                );
                self.shared.stats.lock().record_abort(job.timings());
                self.shared.dispose(job, false);
                continue;
            }
            if self.finalize_job(job) {
                installed += 1;
            }
        }
        installed
    }

    fn finalize_job(&self, mut job: Box<CompilationJob>) -> bool {
        match job.finalize(&self.shared.heap) {
            Ok(()) => {
                trace_recompile!(
                    self.shared,
                    function = job.function().name(),
                    tier = %job.info().tier(),
                    "installed optimized code"
                );
                self.shared.stats.lock().record_success(job.timings());
                self.shared.retire();
                true
            }
            Err(error) => {
                if error.is_race_loss() {
                    debug!(function = job.function().name(), %error, "install race lost");
                    self.shared.stats.lock().record_abort(job.timings());
                } else {
                    debug!(function = job.function().name(), %error, "finalize failed");
                    self.shared.stats.lock().record_failure(job.timings());
                }
                self.shared.dispose(job, true);
                false
            }
        }
    }
}

impl Drop for OptimizingCompileDispatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.job_handle.get_mut().as_mut() {
            handle.cancel();
        }
        self.shared.flush_input_queue();
        self.shared.flush_output_queue(true);
        debug_assert!(self.shared.input.lock().is_empty());
        debug_assert!(self.shared.output.lock().is_empty());
    }
}

// =============================================================================
// Tests
// =============================================================================
