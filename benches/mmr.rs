//! Benchmarks for maximal marginal relevance re-ranking.
//!
//! Benchmark targets:
//! - 50 hits, k = 10: <50µs
//! - 500 hits, k = 10: <5ms

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use hyphanet::services::mmr::diversify;
use hyphanet::{AgentId, MemoryHit, MemoryKind, MemoryRecord, TenantId};

const DIMS: usize = 64;

fn hits(count: usize) -> Vec<MemoryHit> {
    (0..count)
        .map(|i| {
            let embedding = (0..DIMS)
                .map(|d| (((i / 4) * 13 + d * 5) % 23) as f32 / 23.0)
                .collect();
            MemoryHit {
                record: MemoryRecord::new(
                    TenantId::new("bench"),
                    AgentId::new("agent"),
                    MemoryKind::Insight,
                    format!("memory {i}"),
                    embedding,
                ),
                relevance: 1.0 - i as f32 / count as f32,
            }
        })
        .collect()
}

fn bench_diversify(c: &mut Criterion) {
    let mut group = c.benchmark_group("mmr_diversify");

    for count in [50, 200, 500] {
        let pool = hits(count);
        for lambda in [0.5_f32, 0.9] {
            let id = BenchmarkId::new(format!("lambda_{lambda}"), count);
            group.bench_with_input(id, &pool, |b, pool| {
                b.iter_batched(
                    || pool.clone(),
                    |input| black_box(diversify(input, 10, 0.95, lambda)),
                    BatchSize::SmallInput,
                );
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_diversify);
criterion_main!(benches);
