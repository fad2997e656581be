//! Worker scheduling.
//!
//! The dispatcher never spawns threads. It posts a [`JobTask`] to a
//! [`Platform`], which decides how many workers run it at once by asking
//! [`JobTask::max_concurrency`] whenever concurrency may have changed.
//!
//! Two platforms are provided:
//! - [`ThreadPoolPlatform`]: a fixed pool of named threads pulling worker
//!   slots from crossbeam injectors, one per priority class
//! - [`ManualPlatform`]: runs nothing until asked, on the calling thread

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_deque::{Injector, Steal};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

// =============================================================================
// Traits
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    BestEffort,
    UserVisible,
    UserBlocking,
}

/// What a running worker can ask of the platform.
pub trait JobDelegate {
    /// The worker should return as soon as it reaches a stopping point.
    fn should_yield(&self) -> bool;

    /// Small id, unique among the workers currently running the job.
    fn task_id(&self) -> usize;
}

/// Work that may run on several workers at once.
pub trait JobTask: Send + Sync {
    fn run(&self, delegate: &dyn JobDelegate);

    /// Workers the job could use right now, given `worker_count` already
    /// running it. Zero means the job is out of work.
    fn max_concurrency(&self, worker_count: usize) -> usize;
}

/// Owner's side of a posted job.
pub trait JobHandle: Send {
    /// Re-evaluate `max_concurrency` and start workers as needed.
    fn notify_concurrency_increase(&self);

    /// Contribute the calling thread and return once the job is out of work
    /// and no worker is running it. The handle is inactive afterwards.
    fn join(&mut self);

    /// Ask workers to yield and wait for them to stop. Pending work is left
    /// untouched. The handle is inactive afterwards.
    fn cancel(&mut self);

    fn is_active(&self) -> bool;
}

pub trait Platform: Send + Sync {
    fn post_job(&self, priority: TaskPriority, task: Box<dyn JobTask>) -> Box<dyn JobHandle>;

    /// Threads available to run workers.
    fn worker_thread_count(&self) -> usize;
}

// =============================================================================
// Shared Job State
// =============================================================================

#[derive(Debug, Default)]
struct WorkerCounts {
    /// Workers inside `JobTask::run`.
    active: usize,
    /// Worker slots posted but not yet started.
    queued: usize,
    /// Set by join or cancel; queued slots are skipped from then on.
    finished: bool,
    next_task_id: usize,
}

struct JobShared {
    task: Box<dyn JobTask>,
    priority: TaskPriority,
    cancelled: AtomicBool,
    counts: Mutex<WorkerCounts>,
    idle: Condvar,
}

impl JobShared {
    fn new(priority: TaskPriority, task: Box<dyn JobTask>) -> Self {
        Self {
            task,
            priority,
            cancelled: AtomicBool::new(false),
            counts: Mutex::new(WorkerCounts::default()),
            idle: Condvar::new(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Slots to post so that running plus queued workers meet demand.
    fn missing_workers(&self, counts: &WorkerCounts) -> usize {
        if counts.finished || self.is_cancelled() {
            return 0;
        }
        self.task
            .max_concurrency(counts.active)
            .saturating_sub(counts.active + counts.queued)
    }

    /// Run one worker on the current thread. `counts.active` was already
    /// incremented by the caller and `task_id` handed out.
    fn run_worker(&self, task_id: usize) {
        let delegate = Delegate { job: self, task_id };
        self.task.run(&delegate);
    }

    fn begin_worker(&self) -> usize {
        let mut counts = self.counts.lock();
        counts.active += 1;
        counts.next_task_id += 1;
        counts.next_task_id - 1
    }

    /// Returns the number of slots to post after this worker left.
    fn end_worker(&self) -> usize {
        let mut counts = self.counts.lock();
        counts.active -= 1;
        if counts.active == 0 {
            counts.next_task_id = 0;
        }
        let missing = self.missing_workers(&counts);
        counts.queued += missing;
        self.idle.notify_all();
        missing
    }

    fn wait_for_idle(&self) {
        let mut counts = self.counts.lock();
        while counts.active > 0 {
            self.idle.wait(&mut counts);
        }
    }

    fn is_finished(&self) -> bool {
        self.counts.lock().finished
    }
}

struct Delegate<'a> {
    job: &'a JobShared,
    task_id: usize,
}

impl JobDelegate for Delegate<'_> {
    fn should_yield(&self) -> bool {
        self.job.is_cancelled()
    }

    fn task_id(&self) -> usize {
        self.task_id
    }
}

// =============================================================================
// Thread Pool Platform
// =============================================================================

struct PoolShared {
    high: Injector<Arc<JobShared>>,
    low: Injector<Arc<JobShared>>,
    shutdown: AtomicBool,
    sleep_lock: Mutex<()>,
    wake: Condvar,
}

impl PoolShared {
    fn push(&self, job: &Arc<JobShared>, slots: usize) {
        if slots == 0 {
            return;
        }
        let injector = match job.priority {
            TaskPriority::BestEffort => &self.low,
            TaskPriority::UserVisible | TaskPriority::UserBlocking => &self.high,
        };
        for _ in 0..slots {
            injector.push(Arc::clone(job));
        }
        let _guard = self.sleep_lock.lock();
        if slots == 1 {
            self.wake.notify_one();
        } else {
            self.wake.notify_all();
        }
    }

    fn steal(&self) -> Option<Arc<JobShared>> {
        for injector in [&self.high, &self.low] {
            loop {
                match injector.steal() {
                    Steal::Success(job) => return Some(job),
                    Steal::Empty => break,
                    Steal::Retry => {}
                }
            }
        }
        None
    }

    fn worker_loop(self: &Arc<Self>, index: usize) {
        trace!(index, "compile worker started");
        while !self.shutdown.load(Ordering::Acquire) {
            match self.steal() {
                Some(job) => self.run_slot(&job),
                None => {
                    let mut guard = self.sleep_lock.lock();
                    if self.high.is_empty()
                        && self.low.is_empty()
                        && !self.shutdown.load(Ordering::Acquire)
                    {
                        self.wake.wait_for(&mut guard, Duration::from_millis(50));
                    }
                }
            }
        }
        trace!(index, "compile worker stopped");
    }

    fn run_slot(&self, job: &Arc<JobShared>) {
        let task_id = {
            let mut counts = job.counts.lock();
            counts.queued -= 1;
            if counts.finished || job.is_cancelled() {
                job.idle.notify_all();
                return;
            }
            counts.active += 1;
            counts.next_task_id += 1;
            counts.next_task_id - 1
        };
        job.run_worker(task_id);
        let missing = job.end_worker();
        self.push(job, missing);
    }
}

/// Fixed-size pool of compile threads.
pub struct ThreadPoolPlatform {
    shared: Arc<PoolShared>,
    threads: Vec<JoinHandle<()>>,
}

impl ThreadPoolPlatform {
    /// Spawn `thread_count` workers (at least one).
    ///
    /// # Errors
    ///
    /// Returns the OS error if a thread cannot be spawned.
    pub fn new(thread_count: usize) -> std::io::Result<Self> {
        let shared = Arc::new(PoolShared {
            high: Injector::new(),
            low: Injector::new(),
            shutdown: AtomicBool::new(false),
            sleep_lock: Mutex::new(()),
            wake: Condvar::new(),
        });
        let mut threads = Vec::with_capacity(thread_count.max(1));
        for index in 0..thread_count.max(1) {
            let shared = Arc::clone(&shared);
            let thread = thread::Builder::new()
                .name(format!("kestrel-compile-{index}"))
                .spawn(move || shared.worker_loop(index))?;
            threads.push(thread);
        }
        debug!(threads = threads.len(), "thread pool platform started");
        Ok(Self { shared, threads })
    }
}

impl Platform for ThreadPoolPlatform {
    fn post_job(&self, priority: TaskPriority, task: Box<dyn JobTask>) -> Box<dyn JobHandle> {
        let job = Arc::new(JobShared::new(priority, task));
        let handle = PoolJobHandle {
            pool: Arc::clone(&self.shared),
            job,
        };
        handle.notify_concurrency_increase();
        Box::new(handle)
    }

    fn worker_thread_count(&self) -> usize {
        self.threads.len()
    }
}

impl Drop for ThreadPoolPlatform {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.shared.sleep_lock.lock();
            self.shared.wake.notify_all();
        }
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                debug!("compile worker panicked");
            }
        }
    }
}

struct PoolJobHandle {
    pool: Arc<PoolShared>,
    job: Arc<JobShared>,
}

impl JobHandle for PoolJobHandle {
    fn notify_concurrency_increase(&self) {
        let missing = {
            let mut counts = self.job.counts.lock();
            let missing = self.job.missing_workers(&counts);
            counts.queued += missing;
            missing
        };
        self.pool.push(&self.job, missing);
    }

    fn join(&mut self) {
        loop {
            if self.job.task.max_concurrency(0) > 0 && !self.job.is_cancelled() {
                let task_id = self.job.begin_worker();
                self.job.run_worker(task_id);
                let missing = self.job.end_worker();
                self.pool.push(&self.job, missing);
            }
            let mut counts = self.job.counts.lock();
            while counts.active > 0 {
                self.job.idle.wait(&mut counts);
            }
            if self.job.is_cancelled() || self.job.task.max_concurrency(0) == 0 {
                counts.finished = true;
                return;
            }
        }
    }

    fn cancel(&mut self) {
        self.job.cancelled.store(true, Ordering::Release);
        self.job.wait_for_idle();
        self.job.counts.lock().finished = true;
    }

    fn is_active(&self) -> bool {
        !self.job.is_finished()
    }
}

impl Drop for PoolJobHandle {
    fn drop(&mut self) {
        if self.is_active() {
            self.cancel();
        }
    }
}

// =============================================================================
// Manual Platform
// =============================================================================

#[derive(Default)]
struct ManualState {
    jobs: Mutex<Vec<Arc<JobShared>>>,
    notifications: AtomicUsize,
}

/// Runs posted jobs only on `join` or [`ManualPlatform::run_pending`], on the
/// calling thread.
#[derive(Default, Clone)]
pub struct ManualPlatform {
    state: Arc<ManualState>,
}

impl ManualPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give every live job with work one worker run. Returns the number of
    /// workers run.
    pub fn run_pending(&self) -> usize {
        let jobs: Vec<_> = {
            let mut jobs = self.state.jobs.lock();
            jobs.retain(|job| !job.is_finished());
            jobs.clone()
        };
        let mut runs = 0;
        for job in jobs {
            if job.is_cancelled() || job.task.max_concurrency(0) == 0 {
                continue;
            }
            let task_id = job.begin_worker();
            job.run_worker(task_id);
            job.end_worker();
            runs += 1;
        }
        runs
    }

    /// Jobs posted and not yet joined or cancelled.
    pub fn active_job_count(&self) -> usize {
        self.state
            .jobs
            .lock()
            .iter()
            .filter(|job| !job.is_finished())
            .count()
    }

    /// Calls to `notify_concurrency_increase` across all handles.
    pub fn notification_count(&self) -> usize {
        self.state.notifications.load(Ordering::Acquire)
    }
}

impl Platform for ManualPlatform {
    fn post_job(&self, priority: TaskPriority, task: Box<dyn JobTask>) -> Box<dyn JobHandle> {
        let job = Arc::new(JobShared::new(priority, task));
        self.state.jobs.lock().push(Arc::clone(&job));
        Box::new(ManualJobHandle {
            state: Arc::clone(&self.state),
            job,
        })
    }

    fn worker_thread_count(&self) -> usize {
        0
    }
}

struct ManualJobHandle {
    state: Arc<ManualState>,
    job: Arc<JobShared>,
}

impl JobHandle for ManualJobHandle {
    fn notify_concurrency_increase(&self) {
        self.state.notifications.fetch_add(1, Ordering::AcqRel);
    }

    fn join(&mut self) {
        while !self.job.is_cancelled() && self.job.task.max_concurrency(0) > 0 {
            let task_id = self.job.begin_worker();
            self.job.run_worker(task_id);
            self.job.end_worker();
        }
        self.job.counts.lock().finished = true;
    }

    fn cancel(&mut self) {
        self.job.cancelled.store(true, Ordering::Release);
        self.job.wait_for_idle();
        self.job.counts.lock().finished = true;
    }

    fn is_active(&self) -> bool {
        !self.job.is_finished()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts down a shared budget of work items, one per `run` step.
    struct CountdownTask {
        remaining: Arc<AtomicUsize>,
        done: Arc<AtomicUsize>,
        max_workers: usize,
    }

    impl CountdownTask {
        fn new(items: usize, max_workers: usize) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let remaining = Arc::new(AtomicUsize::new(items));
            let done = Arc::new(AtomicUsize::new(0));
            let task = Self {
                remaining: Arc::clone(&remaining),
                done: Arc::clone(&done),
                max_workers,
            };
            (task, remaining, done)
        }

        fn take_one(&self) -> bool {
            self.remaining
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    impl JobTask for CountdownTask {
        fn run(&self, delegate: &dyn JobDelegate) {
            while !delegate.should_yield() && self.take_one() {
                self.done.fetch_add(1, Ordering::AcqRel);
            }
        }

        fn max_concurrency(&self, worker_count: usize) -> usize {
            (self.remaining.load(Ordering::Acquire) + worker_count).min(self.max_workers)
        }
    }

    #[test]
    fn test_priority_order() {
        assert!(TaskPriority::UserBlocking > TaskPriority::UserVisible);
        assert!(TaskPriority::UserVisible > TaskPriority::BestEffort);
    }

    #[test]
    fn test_manual_platform_runs_nothing_until_asked() {
        let platform = ManualPlatform::new();
        let (task, remaining, done) = CountdownTask::new(3, 2);
        let handle = platform.post_job(TaskPriority::UserVisible, Box::new(task));
        assert!(handle.is_active());
        assert_eq!(done.load(Ordering::Acquire), 0);

        handle.notify_concurrency_increase();
        assert_eq!(platform.notification_count(), 1);
        assert_eq!(platform.run_pending(), 1);
        assert_eq!(done.load(Ordering::Acquire), 3);
        assert_eq!(remaining.load(Ordering::Acquire), 0);
        assert_eq!(platform.run_pending(), 0);
    }

    #[test]
    fn test_manual_join_drains_and_deactivates() {
        let platform = ManualPlatform::new();
        let (task, _, done) = CountdownTask::new(5, 1);
        let mut handle = platform.post_job(TaskPriority::BestEffort, Box::new(task));
        handle.join();
        assert_eq!(done.load(Ordering::Acquire), 5);
        assert!(!handle.is_active());
        assert_eq!(platform.active_job_count(), 0);
    }

    #[test]
    fn test_manual_cancel_leaves_work() {
        let platform = ManualPlatform::new();
        let (task, remaining, _) = CountdownTask::new(2, 1);
        let mut handle = platform.post_job(TaskPriority::BestEffort, Box::new(task));
        handle.cancel();
        assert!(!handle.is_active());
        assert_eq!(platform.run_pending(), 0);
        assert_eq!(remaining.load(Ordering::Acquire), 2);
    }

    #[test]
    fn test_thread_pool_join_completes_all_work() {
        let platform = ThreadPoolPlatform::new(3).unwrap();
        assert_eq!(platform.worker_thread_count(), 3);
        let (task, remaining, done) = CountdownTask::new(1000, 3);
        let mut handle = platform.post_job(TaskPriority::UserVisible, Box::new(task));
        handle.join();
        assert_eq!(done.load(Ordering::Acquire), 1000);
        assert_eq!(remaining.load(Ordering::Acquire), 0);
        assert!(!handle.is_active());
    }

    #[test]
    fn test_thread_pool_cancel_stops_workers() {
        let platform = ThreadPoolPlatform::new(2).unwrap();
        let (task, _, _) = CountdownTask::new(usize::MAX / 2, 2);
        let mut handle = platform.post_job(TaskPriority::UserBlocking, Box::new(task));
        handle.cancel();
        assert!(!handle.is_active());
    }

    #[test]
    fn test_thread_pool_with_zero_threads_spawns_one() {
        let platform = ThreadPoolPlatform::new(0).unwrap();
        assert_eq!(platform.worker_thread_count(), 1);
    }
}
