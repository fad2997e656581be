//! Background compile task.
//!
//! Each worker invocation drains the dispatcher's input queue until it is
//! empty or the platform asks it to yield. Jobs that compile move to the
//! output queue; jobs that fail are disposed on the spot and never reach the
//! main thread.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use super::dispatcher::DispatcherShared;
use super::heap::LocalHeap;
use super::job::CompilationJob;
use super::platform::{JobDelegate, JobTask};

pub(crate) struct CompileTask {
    shared: Arc<DispatcherShared>,
}

impl CompileTask {
    pub(crate) fn new(shared: Arc<DispatcherShared>) -> Self {
        Self { shared }
    }

    /// Execute one job. Returns whether it reached the output queue.
    fn compile(&self, mut job: Box<CompilationJob>, local_heap: &LocalHeap) -> bool {
        match job.execute(local_heap) {
            Ok(()) => {
                trace!(function = job.function().name(), "compiled, queued for install");
                self.shared.output.lock().push_back(job);
                true
            }
            Err(error) => {
                debug!(function = job.function().name(), %error, "concurrent compile failed");
                self.shared.stats.lock().record_failure(job.timings());
                self.shared.dispose(job, true);
                false
            }
        }
    }
}

impl JobTask for CompileTask {
    fn run(&self, delegate: &dyn JobDelegate) {
        // One local heap per invocation; each job unparks it while executing.
        let local_heap = self.shared.heap.new_background_local_heap();
        let delay = self.shared.config.recompilation_delay_ms;
        let mut succeeded = 0usize;

        while !delegate.should_yield() {
            let Some(job) = self.shared.next_input() else {
                break;
            };
            if delay > 0 {
                thread::sleep(Duration::from_millis(delay));
            }
            if self.compile(job, &local_heap) {
                succeeded += 1;
            }
        }

        if succeeded > 0 {
            self.shared.request_install();
        }
        trace!(task_id = delegate.task_id(), succeeded, "compile task done");
    }

    fn max_concurrency(&self, worker_count: usize) -> usize {
        self.shared.max_concurrency(worker_count)
    }
}

// =============================================================================
// Tests
// =============================================================================
