//! Integration tests for the concurrent compile dispatcher.
//!
//! Most tests run on [`ManualPlatform`] so that worker timing is decided by the
//! test. The thread pool tests only check outcomes, never interleavings.

use std::sync::Arc;

use kestrel_core::{CodegenConfig, CompilerConfig, DispatcherConfig};
use kestrel_jit::ir::GraphBuilder;
use kestrel_jit::runtime::{
    CodeTier, CompilationInfo, ManualPlatform, Platform, ThreadPoolPlatform, TieringState,
};
use kestrel_jit::{BlockingBehavior, CompilationJob, Heap, JsFunction, OptimizingCompileDispatcher};
use tracing_subscriber::EnvFilter;

// =============================================================================
// Test Helpers
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn dispatcher(
    config: DispatcherConfig,
    platform: Arc<dyn Platform>,
) -> OptimizingCompileDispatcher {
    dispatcher_with_codegen(config, CodegenConfig::default(), platform)
}

fn dispatcher_with_codegen(
    config: DispatcherConfig,
    codegen: CodegenConfig,
    platform: Arc<dyn Platform>,
) -> OptimizingCompileDispatcher {
    init_tracing();
    let config = CompilerConfig {
        dispatcher: config,
        codegen,
    };
    OptimizingCompileDispatcher::new(&config, Arc::new(Heap::new()), platform)
        .expect("valid configuration")
}

/// Code generation that bails out on the first spill slot.
fn no_spill_slots() -> CodegenConfig {
    CodegenConfig {
        max_spill_slots: 0,
        ..CodegenConfig::default()
    }
}

fn manual(config: DispatcherConfig) -> (OptimizingCompileDispatcher, ManualPlatform) {
    let platform = ManualPlatform::new();
    (dispatcher(config, Arc::new(platform.clone())), platform)
}

/// A prepared job compiling `f(x) = x + 1` for a fresh function.
fn prepared_job(
    d: &OptimizingCompileDispatcher,
    name: &str,
) -> (Box<CompilationJob>, Arc<JsFunction>) {
    let mut b = GraphBuilder::new(name, 1);
    let p = b.parameter(0);
    let x = b.checked_smi_untag(p);
    let one = b.int32_constant(1);
    let sum = b.int32_add(x, one);
    let tagged = b.checked_smi_tag(sum);
    b.ret(tagged);

    let function = Arc::new(JsFunction::new(name));
    let info = CompilationInfo::new(Arc::clone(&function), b.build().unwrap());
    let mut job = Box::new(CompilationJob::new(info, d.codegen_config()));
    job.prepare().expect("prepare");
    (job, function)
}

/// A prepared job whose parameter lives across a block boundary and so
/// needs a spill slot during code generation.
fn spilling_job(
    d: &OptimizingCompileDispatcher,
    name: &str,
) -> (Box<CompilationJob>, Arc<JsFunction>) {
    let mut b = GraphBuilder::new(name, 1);
    let p = b.parameter(0);
    let next = b.new_block();
    b.jump(next);
    b.switch_to(next);
    b.ret(p);

    let function = Arc::new(JsFunction::new(name));
    let info = CompilationInfo::new(Arc::clone(&function), b.build().unwrap());
    let mut job = Box::new(CompilationJob::new(info, d.codegen_config()));
    job.prepare().expect("prepare");
    (job, function)
}

fn queue_jobs(d: &OptimizingCompileDispatcher, count: usize) -> Vec<Arc<JsFunction>> {
    (0..count)
        .map(|i| {
            let (job, function) = prepared_job(d, &format!("f{i}"));
            d.queue_for_optimization(job).expect("queue has room");
            function
        })
        .collect()
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_await_drains_all_jobs() {
    let (d, _) = manual(DispatcherConfig::default().with_recompilation_delay_ms(0));
    let functions = queue_jobs(&d, 3);
    assert_eq!(d.input_queue_length(), 3);

    d.await_compile_tasks();
    assert_eq!(d.input_queue_length(), 0);
    assert_eq!(d.output_queue_length(), 3);
    assert!(d.is_enabled());

    assert_eq!(d.install_optimized_functions(), 3);
    for function in &functions {
        assert_eq!(function.tier(), CodeTier::TopTier);
        assert_eq!(function.tiering_state(), TieringState::None);
    }
    assert!(!d.has_jobs());
}

#[test]
fn test_flush_before_dequeue_disposes_once() {
    let (d, platform) = manual(DispatcherConfig::default());
    let functions = queue_jobs(&d, 1);

    d.flush(BlockingBehavior::DontBlock);
    assert_eq!(d.input_queue_length(), 0);
    assert_eq!(functions[0].tiering_state(), TieringState::None);

    platform.run_pending();
    assert_eq!(d.output_queue_length(), 0);
    assert_eq!(d.install_optimized_functions(), 0);

    let stats = d.statistics();
    assert_eq!(stats.disposed, 1);
    assert_eq!(stats.succeeded, 0);
    assert!(functions[0].code().is_none());
}

#[test]
fn test_flush_is_idempotent() {
    let (d, _) = manual(DispatcherConfig::default());
    queue_jobs(&d, 2);

    d.flush(BlockingBehavior::Block);
    let after_first = d.statistics();
    d.flush(BlockingBehavior::Block);
    d.flush(BlockingBehavior::DontBlock);

    assert_eq!(d.statistics(), after_first);
    assert_eq!(after_first.disposed, 2);
    assert!(!d.has_jobs());
    assert!(d.is_enabled());
}

#[test]
fn test_block_flush_discards_finished_output() {
    let (d, platform) = manual(DispatcherConfig::default());
    let functions = queue_jobs(&d, 2);
    platform.run_pending();
    assert_eq!(d.output_queue_length(), 2);

    d.flush(BlockingBehavior::Block);
    assert_eq!(d.output_queue_length(), 0);
    assert!(functions.iter().all(|f| f.code().is_none()));

    // Workers are reposted and still accept new work.
    queue_jobs(&d, 1);
    d.await_compile_tasks();
    assert_eq!(d.install_optimized_functions(), 1);
}

#[test]
fn test_output_preserves_queue_order() {
    let (d, _) = manual(DispatcherConfig::default());
    queue_jobs(&d, 4);
    let order: Vec<_> = std::iter::from_fn(|| d.next_input())
        .map(|job| job.function().name().to_string())
        .collect();
    assert_eq!(order, ["f0", "f1", "f2", "f3"]);
}

#[test]
fn test_max_concurrency_bound() {
    let (d, _) = manual(DispatcherConfig::default().with_max_threads(2));
    queue_jobs(&d, 5);
    for workers in 0..4 {
        assert!(d.max_concurrency(workers) <= 2);
    }
    d.flush(BlockingBehavior::DontBlock);
    assert_eq!(d.max_concurrency(0), 0);

    let (d, _) = manual(DispatcherConfig::default().with_max_threads(0));
    queue_jobs(&d, 5);
    assert_eq!(d.max_concurrency(1), 6);
}

// =============================================================================
// Installation
// =============================================================================

#[test]
fn test_already_optimized_function_is_not_reinstalled() {
    let (d, platform) = manual(DispatcherConfig::default());
    let (first, function) = prepared_job(&d, "f");
    let info = CompilationInfo::new(Arc::clone(&function), first.info().graph().clone());
    let mut second = Box::new(CompilationJob::new(info, d.codegen_config()));
    second.prepare().unwrap();

    d.queue_for_optimization(first).unwrap();
    d.queue_for_optimization(second).unwrap();
    platform.run_pending();

    assert_eq!(d.install_optimized_functions(), 1);
    let stats = d.statistics();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.aborted, 1);
    assert_eq!(function.code_version(), 1);
}

#[test]
fn test_finalize_finished_jobs_reports_race_loss() {
    let (d, platform) = manual(DispatcherConfig::default());
    let (job, function) = prepared_job(&d, "f");
    d.queue_for_optimization(job).unwrap();
    platform.run_pending();

    // The function deopts while the job waits for install.
    function.reset_code(CodeTier::Baseline);
    assert_eq!(d.finalize_finished_jobs(), 0);
    assert_eq!(d.statistics().aborted, 1);
    assert_eq!(function.tiering_state(), TieringState::None);
}

#[test]
fn test_install_request_flag() {
    let (d, platform) = manual(DispatcherConfig::default());
    assert!(!d.install_requested());
    queue_jobs(&d, 1);
    platform.run_pending();
    assert!(d.take_install_request());
    assert!(!d.take_install_request());
}

// =============================================================================
// Bounded Queue
// =============================================================================

#[test]
fn test_bounded_queue_rejects_then_recovers() {
    let (d, _) = manual(DispatcherConfig::default().with_queue_capacity(2));
    queue_jobs(&d, 2);
    assert!(!d.is_queue_available());

    let (job, function) = prepared_job(&d, "overflow");
    let rejected = d.queue_for_optimization(job).unwrap_err();
    assert_eq!(rejected.capacity, 2);
    assert_eq!(d.input_queue_length(), 2);

    d.await_compile_tasks();
    assert!(d.is_queue_available());
    d.queue_for_optimization(rejected.job).unwrap();
    d.await_compile_tasks();
    assert_eq!(d.install_optimized_functions(), 3);
    assert!(function.code().is_some());
}

#[test]
fn test_unbounded_queue() {
    let (d, _) = manual(DispatcherConfig::default().with_queue_capacity(0));
    queue_jobs(&d, 40);
    assert!(d.is_queue_available());
    assert_eq!(d.input_queue_length(), 40);
}

// =============================================================================
// Failed Jobs
// =============================================================================

#[test]
fn test_failed_execute_is_disposed_by_worker() {
    let platform = ManualPlatform::new();
    let d = dispatcher_with_codegen(
        DispatcherConfig::default(),
        no_spill_slots(),
        Arc::new(platform.clone()),
    );
    let (job, function) = spilling_job(&d, "f");
    d.queue_for_optimization(job).unwrap();
    assert_eq!(function.tiering_state(), TieringState::InProgress);

    platform.run_pending();
    assert_eq!(d.output_queue_length(), 0);
    assert_eq!(function.tiering_state(), TieringState::None);
    assert!(function.code().is_none());
    assert!(!d.has_jobs());

    let stats = d.statistics();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.disposed, 1);
    assert_eq!(stats.succeeded, 0);
    assert_eq!(d.install_optimized_functions(), 0);
}

// =============================================================================
// Thread Pool
// =============================================================================

#[test]
fn test_thread_pool_end_to_end() {
    let platform = Arc::new(ThreadPoolPlatform::new(4).unwrap());
    let d = dispatcher(
        DispatcherConfig::default()
            .with_max_threads(4)
            .with_queue_capacity(0),
        platform,
    );
    let functions = queue_jobs(&d, 50);

    d.await_compile_tasks();
    assert_eq!(d.input_queue_length(), 0);
    assert_eq!(d.install_optimized_functions(), 50);

    // Each job was compiled and installed exactly once.
    for function in &functions {
        assert_eq!(function.code_version(), 1);
        assert_eq!(function.tier(), CodeTier::TopTier);
    }
    let stats = d.statistics();
    assert_eq!(stats.succeeded, 50);
    assert_eq!(stats.disposed, 0);
    assert!(!d.has_jobs());
}

#[test]
fn test_thread_pool_with_delay_and_stop() {
    let platform = Arc::new(ThreadPoolPlatform::new(2).unwrap());
    let d = dispatcher(
        DispatcherConfig::default()
            .with_max_threads(2)
            .with_recompilation_delay_ms(1),
        platform,
    );
    queue_jobs(&d, 4);
    d.stop();

    assert_eq!(d.input_queue_length(), 0);
    assert_eq!(d.output_queue_length(), 0);
    assert!(!d.has_jobs());
}

#[test]
fn test_thread_pool_failing_jobs_under_concurrent_enqueue() {
    let platform = Arc::new(ThreadPoolPlatform::new(4).unwrap());
    let d = dispatcher_with_codegen(
        DispatcherConfig::default()
            .with_max_threads(4)
            .with_queue_capacity(0),
        no_spill_slots(),
        platform,
    );
    // Workers pick up and retire each job while the next ones are queued.
    let functions: Vec<_> = (0..200)
        .map(|i| {
            let (job, function) = spilling_job(&d, &format!("f{i}"));
            d.queue_for_optimization(job).expect("unbounded queue");
            function
        })
        .collect();

    d.await_compile_tasks();
    assert_eq!(d.output_queue_length(), 0);
    assert_eq!(d.install_optimized_functions(), 0);
    assert!(!d.has_jobs());

    let stats = d.statistics();
    assert_eq!(stats.failed, 200);
    assert_eq!(stats.disposed, 200);
    for function in &functions {
        assert_eq!(function.tiering_state(), TieringState::None);
    }
}

#[test]
fn test_stop_leaves_nothing_behind() {
    let (d, platform) = manual(DispatcherConfig::default());
    let functions = queue_jobs(&d, 3);
    platform.run_pending();
    queue_jobs(&d, 2);

    d.stop();
    assert_eq!(d.input_queue_length(), 0);
    assert_eq!(d.output_queue_length(), 0);
    assert!(!d.has_jobs());
    assert!(functions.iter().all(|f| f.code().is_none()));
    assert_eq!(d.statistics().disposed, 5);
}

#[test]
fn test_drop_disposes_pending_jobs() {
    let (d, _) = manual(DispatcherConfig::default());
    let functions = queue_jobs(&d, 3);
    drop(d);
    for function in &functions {
        assert_eq!(function.tiering_state(), TieringState::None);
        assert!(function.code().is_none());
    }
}
