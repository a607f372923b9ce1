//! Micro-benchmarks for the descent/split hot paths.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pagetree::{CacheConfig, MemoryCache, Tree, TreeConfig};

fn build_tree(degree: usize, capacity: usize, n: u32) -> (Tree<u32, u32, MemoryCache<u32, u32>>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig {
        capacity,
        backing_path: dir.path().join("bench.db"),
        block_size: 4096,
    };
    let cache = MemoryCache::open(config).unwrap();
    let tree = Tree::from_config(TreeConfig { degree }, cache).unwrap();
    tree.init().unwrap();
    for k in 0..n {
        tree.insert(k, k).unwrap();
    }
    (tree, dir)
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    for degree in [16usize, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(degree), &degree, |b, &degree| {
            let (tree, _dir) = build_tree(degree, 4096, 10_000);
            let mut next = 10_000u32;
            b.iter(|| {
                tree.insert(next, next).unwrap();
                next += 1;
            });
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    for degree in [16usize, 64, 256] {
        let (tree, _dir) = build_tree(degree, 4096, 10_000);
        group.bench_with_input(BenchmarkId::from_parameter(degree), &degree, |b, _| {
            b.iter(|| tree.search(&5_000).unwrap());
        });
    }
    group.finish();
}

fn bench_search_under_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_under_eviction");
    let (tree, _dir) = build_tree(64, 32, 10_000);
    group.bench_function("capacity_32", |b| {
        b.iter(|| tree.search(&5_000).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_insert, bench_search, bench_search_under_eviction);
criterion_main!(benches);
