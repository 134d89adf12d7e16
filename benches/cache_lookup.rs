//! Hot-path lookup benchmarks.
//!
//! Measures serving-session leases from the cache, filename parsing and
//! the stacked dense forward pass that a batch cycle runs.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use mscore::engine::{Activation, BackendSet, DenseModel};
use mscore::memory::{CacheConfig, ModelCache};
use mscore::models::{EventBus, LoaderConfig, ModelIdentity, ModelLoader};
use mscore::scheduler::run_stacked;
use std::sync::Arc;

const FILE: &str = "strategy.ES.momentum.trend.v1.4.2+abcd1234.bin";
const KEY: &str = "strategy.ES.momentum.trend";

fn loaded(inputs: usize) -> (tempfile::TempDir, Arc<ModelLoader>) {
    let dir = tempfile::TempDir::new().unwrap();
    let weights = (0..inputs).map(|i| (i as f32 * 0.01).sin()).collect();
    let model = DenseModel::new(inputs, 1, weights, vec![0.1], Activation::Sigmoid).unwrap();
    let path = dir.path().join(FILE);
    std::fs::write(&path, model.to_bytes()).unwrap();

    let loader = Arc::new(ModelLoader::new(
        LoaderConfig {
            models_dir: dir.path().to_path_buf(),
        },
        Arc::new(ModelCache::new(CacheConfig::default())),
        BackendSet::default(),
        EventBus::new(),
    ));
    let rt = tokio::runtime::Runtime::new().unwrap();
    drop(rt.block_on(loader.load(&path, true)).unwrap());
    (dir, loader)
}

fn bench_serving_lease(c: &mut Criterion) {
    let (_dir, loader) = loaded(16);
    let cache = loader.cache().clone();

    let mut group = c.benchmark_group("cache_lookup");
    group.throughput(Throughput::Elements(1));
    group.bench_function("serving_hit", |b| {
        b.iter(|| black_box(cache.serving(black_box(KEY))))
    });
    group.bench_function("serving_miss", |b| {
        b.iter(|| black_box(cache.serving(black_box("absent.key.x.y"))))
    });
    group.finish();
}

fn bench_identity_parse(c: &mut Criterion) {
    c.bench_function("identity_parse", |b| {
        b.iter(|| black_box(ModelIdentity::parse(black_box(FILE))))
    });
}

fn bench_stacked_forward(c: &mut Criterion) {
    let (_dir, loader) = loaded(64);
    let lease = loader.get_loaded(KEY).unwrap();

    let mut group = c.benchmark_group("stacked_forward");
    for batch in [1usize, 8, 32] {
        let rows: Vec<Vec<f32>> = (0..batch).map(|r| vec![r as f32 * 0.1; 64]).collect();
        let refs: Vec<&[f32]> = rows.iter().map(Vec::as_slice).collect();
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("rows", batch), &refs, |b, refs| {
            b.iter(|| black_box(run_stacked(&lease, black_box(refs)).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_serving_lease, bench_identity_parse, bench_stacked_forward);
criterion_main!(benches);
