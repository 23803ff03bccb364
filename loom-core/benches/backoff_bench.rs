//! Benchmark: ExponentialBackoff schedule generation (SPEC_FULL.md §1.1),
//! used by C6 WS reconnect and C7 cancel/retry scheduling. Both run this on
//! every retry decision, so the schedule computation itself must stay cheap
//! relative to the actual network/DB work it gates.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use loom_core::resilience::{BackoffConfig, ExponentialBackoff};

fn bench_next_delay(c: &mut Criterion) {
    c.bench_function("backoff_next_delay_unlimited", |b| {
        b.iter(|| {
            let mut backoff = ExponentialBackoff::with_config(BackoffConfig::unlimited());
            for _ in 0..10 {
                black_box(backoff.next_delay());
            }
        });
    });
}

fn bench_full_schedule_to_exhaustion(c: &mut Criterion) {
    c.bench_function("backoff_schedule_to_exhaustion_conservative", |b| {
        b.iter(|| {
            let mut backoff = ExponentialBackoff::with_config(BackoffConfig::conservative());
            while backoff.can_retry() {
                black_box(backoff.next_delay());
            }
        });
    });
}

criterion_group!(benches, bench_next_delay, bench_full_schedule_to_exhaustion);
criterion_main!(benches);
