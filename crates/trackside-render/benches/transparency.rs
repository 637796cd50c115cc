//! Benchmarks for the transparency depth estimator and command batching

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use trackside_core::gpu::DrawRectInstance;
use trackside_render::command_batch::CommandBatch;
use trackside_render::transparency::max_transparency_depth;

const SCREEN: [i32; 4] = [0, 0, 2048, 2048];

fn random_rects(count: usize, extent: i32, seed: u64) -> Vec<DrawRectInstance> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let left = rng.random_range(0..extent);
            let top = rng.random_range(0..extent);
            let width = rng.random_range(1..64);
            let height = rng.random_range(1..64);
            DrawRectInstance {
                clip: SCREEN,
                bounds: [left, top, left + width, top + height],
                ..Default::default()
            }
        })
        .collect()
}

fn bench_estimator_random(c: &mut Criterion) {
    let mut group = c.benchmark_group("transparency_depth_random");

    for size in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));
        let rects = random_rects(size, 1024, 7);

        group.bench_with_input(BenchmarkId::from_parameter(size), &rects, |b, rects| {
            b.iter(|| max_transparency_depth(black_box(rects)));
        });
    }

    group.finish();
}

fn bench_estimator_stacked(c: &mut Criterion) {
    let mut group = c.benchmark_group("transparency_depth_stacked");

    for size in [100, 1000] {
        group.throughput(Throughput::Elements(size as u64));
        let rects: Vec<DrawRectInstance> = (0..size)
            .map(|i| DrawRectInstance {
                clip: SCREEN,
                bounds: [i % 8, i % 8, 256, 256],
                ..Default::default()
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &rects, |b, rects| {
            b.iter(|| max_transparency_depth(black_box(rects)));
        });
    }

    group.finish();
}

fn bench_batch_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_batch_push");

    for size in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut batch = CommandBatch::<DrawRectInstance>::new();
            b.iter(|| {
                batch.clear();
                for _ in 0..size {
                    batch.push(black_box(DrawRectInstance::default()));
                }
                batch.len()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_estimator_random, bench_estimator_stacked, bench_batch_push);
criterion_main!(benches);
