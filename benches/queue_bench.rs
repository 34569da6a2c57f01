//! Benchmarks for the process queue.
//!
//! Measures the per-cycle cost of ticking, reaping, and re-sorting at
//! different population sizes.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use cadence::core::{Behavior, Process, ProcessCtl, ProcessQueue};

/// Minimal long-lived process: every cycle pays full tick + sort cost.
struct Spin;

impl Behavior for Spin {
    fn on_update(&mut self, _ctl: &ProcessCtl, _dt: f64) -> anyhow::Result<()> {
        Ok(())
    }
}

fn bench_queue_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_update");
    for &count in &[16_usize, 256, 1024] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let mut queue = ProcessQueue::new(1);
            for i in 0..count {
                let layer = (i % 7) as i32;
                queue.attach(Process::new(Spin, layer), false).unwrap();
            }
            // Promote the staged processes once, outside the measurement.
            queue.update(0.016).unwrap();
            b.iter(|| queue.update(black_box(0.016)).unwrap());
        });
    }
    group.finish();
}

fn bench_attach_and_reap(c: &mut Criterion) {
    /// Dies on its first tick, so each cycle attaches and reaps.
    struct OneTick;
    impl Behavior for OneTick {
        fn on_update(&mut self, ctl: &ProcessCtl, _dt: f64) -> anyhow::Result<()> {
            ctl.succeed();
            Ok(())
        }
    }

    c.bench_function("attach_and_reap_64", |b| {
        let mut queue = ProcessQueue::new(1);
        b.iter(|| {
            for i in 0..64 {
                let layer = (i % 5) as i32;
                queue.attach(Process::new(OneTick, layer), false).unwrap();
            }
            queue.update(black_box(0.016)).unwrap();
        });
    });
}

criterion_group!(benches, bench_queue_update, bench_attach_and_reap);
criterion_main!(benches);
