//! Instruction Selection Benchmarks
//!
//! Measures end-to-end code generation (constraint pass, register
//! allocation, emission) over synthetic graphs.
//!
//! # Key Metrics
//!
//! - Straight-line arithmetic: linear in node count
//! - Switch lowering: jump table vs binary search cost at equal case count
//! - Write barrier stores: deferred slow path overhead

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use kestrel_core::CodegenConfig;
use kestrel_jit::ir::{Graph, GraphBuilder};
use kestrel_jit::CodeGenerator;

// =============================================================================
// Graph Builders
// =============================================================================

/// Cycles add, subtract, and, multiply over `ops` nodes.
fn arithmetic_chain(ops: usize) -> Graph {
    let mut b = GraphBuilder::new("chain", 1);
    let p = b.parameter(0);
    let x = b.checked_smi_untag(p);
    let mut acc = x;
    for i in 0..ops {
        let c = b.int32_constant((i % 50) as i32 + 1);
        acc = match i % 4 {
            0 => b.int32_add(acc, c),
            1 => b.int32_subtract(acc, x),
            2 => b.bitwise_and(acc, c),
            _ => b.int32_multiply(acc, c),
        };
    }
    let tagged = b.checked_smi_tag(acc);
    b.ret(tagged);
    b.finish()
}

fn switch_graph(values: impl IntoIterator<Item = i32>) -> Graph {
    let mut b = GraphBuilder::new("switch", 1);
    let p = b.parameter(0);
    let x = b.checked_smi_untag(p);
    let default = b.new_block();
    let cases: Vec<_> = values.into_iter().map(|v| (v, b.new_block())).collect();
    b.switch(x, cases.clone(), default);
    for (value, block) in cases {
        b.switch_to(block);
        let c = b.smi_constant(value);
        b.ret(c);
    }
    b.switch_to(default);
    b.ret(p);
    b.finish()
}

fn store_graph(stores: usize) -> Graph {
    let mut b = GraphBuilder::new("stores", 2);
    let object = b.parameter(0);
    let value = b.parameter(1);
    for i in 0..stores {
        b.store_field(object, 8 * (i as i32 + 2), value);
    }
    b.ret(value);
    b.finish()
}

fn generate(graph: &Graph, config: &CodegenConfig) -> u32 {
    match CodeGenerator::new(graph, config).generate() {
        Ok(code) => code.code_size,
        Err(_) => 0,
    }
}

// =============================================================================
// Straight-Line Code
// =============================================================================

fn bench_arithmetic(c: &mut Criterion) {
    let mut group = c.benchmark_group("arithmetic_chain");
    let config = CodegenConfig::default();

    for ops in [8, 64, 512] {
        let graph = arithmetic_chain(ops);
        group.bench_with_input(BenchmarkId::from_parameter(ops), &graph, |b, graph| {
            b.iter(|| black_box(generate(graph, &config)))
        });
    }

    group.finish();
}

// =============================================================================
// Switch Lowering
// =============================================================================

fn bench_switch(c: &mut Criterion) {
    let mut group = c.benchmark_group("switch");
    let tables = CodegenConfig::default();
    let no_tables = CodegenConfig {
        enable_jump_tables: false,
        ..CodegenConfig::default()
    };

    for cases in [4, 16, 64] {
        let dense = switch_graph(0..cases);
        let sparse = switch_graph((0..cases).map(|v| v * 1000));

        group.bench_with_input(BenchmarkId::new("dense_table", cases), &dense, |b, g| {
            b.iter(|| black_box(generate(g, &tables)))
        });
        group.bench_with_input(BenchmarkId::new("dense_search", cases), &dense, |b, g| {
            b.iter(|| black_box(generate(g, &no_tables)))
        });
        group.bench_with_input(BenchmarkId::new("sparse", cases), &sparse, |b, g| {
            b.iter(|| black_box(generate(g, &tables)))
        });
    }

    group.finish();
}

// =============================================================================
// Stores
// =============================================================================

fn bench_write_barrier(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_barrier");
    let config = CodegenConfig::default();

    for stores in [1, 16, 128] {
        let graph = store_graph(stores);
        group.bench_with_input(BenchmarkId::from_parameter(stores), &graph, |b, graph| {
            b.iter(|| black_box(generate(graph, &config)))
        });
    }

    group.finish();
}

// =============================================================================
// Criterion Groups
// =============================================================================

criterion_group!(
    selection_benches,
    bench_arithmetic,
    bench_switch,
    bench_write_barrier,
);

criterion_main!(selection_benches);
