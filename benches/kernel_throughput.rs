//! Kernel throughput benchmark.
//!
//! Measures topic bus send/consume and full dispatch passes over process
//! tables of increasing size using Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

use tickos_core::kernel::TickBudget;
use tickos_core::topics::TopicBus;
use tickos_core::tracer::NullTracer;
use tickos_core::types::TopicsConfig;
use tickos_core::{Config, Kernel, Result, Routine, RoutineRegistry, RunContext, RunResult, SpawnRequest};

#[derive(Debug)]
struct Relay;

impl Routine for Relay {
    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<RunResult> {
        let priority = ctx.priority();
        if ctx.topics().get_next_request("relay").is_none() {
            ctx.topics().send_request("relay", priority, json!({ "hop": 1 }), 10)?;
        }
        Ok(RunResult::Running)
    }
}

fn bench_topic_bus(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 256, 4096];

    let mut group = c.benchmark_group("topic_send_drain");
    for &size in sizes {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &n| {
            b.iter(|| {
                let mut bus = TopicBus::new(TopicsConfig::default());
                for i in 0..n {
                    black_box(bus.send_request("orders", (i % 7) as f64, json!(i), 100).ok());
                }
                while let Some(message) = bus.get_next_request("orders") {
                    black_box(message);
                }
            });
        });
    }
    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let sizes: &[usize] = &[10, 100, 1000];

    let mut group = c.benchmark_group("dispatch_pass");
    for &size in sizes {
        let mut registry = RoutineRegistry::new();
        registry.register("relay", || Relay);
        let mut kernel = Kernel::new(Config::default(), registry);
        for i in 0..size {
            let _ = kernel.spawn(SpawnRequest::new("relay", (i % 10) as f64));
        }

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let tick = kernel.next_tick();
                black_box(kernel.tick_with_budget(tick, &TickBudget::unlimited(), &NullTracer))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_topic_bus, bench_dispatch);
criterion_main!(benches);
