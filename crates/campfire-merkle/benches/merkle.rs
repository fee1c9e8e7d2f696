//! Merkle tree benchmarks: insert throughput and diff cost vs divergence.

use campfire_core::ItemKey;
use campfire_merkle::MerkleTree;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn key(i: u64) -> ItemKey {
    ItemKey::of(&i.to_le_bytes())
}

fn bench_insert(c: &mut Criterion) {
    for size in [1_000u64, 10_000] {
        c.bench_with_input(BenchmarkId::new("tree_insert", size), &size, |b, &size| {
            b.iter(|| {
                let mut tree = MerkleTree::new();
                for i in 0..size {
                    tree.insert(key(i));
                }
                black_box(tree.root_digest())
            })
        });
    }
}

fn bench_diff(c: &mut Criterion) {
    let base = MerkleTree::from_keys((0..10_000).map(key));
    for divergence in [0u64, 10, 100, 1_000] {
        let mut other = base.snapshot();
        for i in 0..divergence {
            other.insert(key(1_000_000 + i));
        }
        c.bench_with_input(
            BenchmarkId::new("tree_diff", divergence),
            &other,
            |b, other| b.iter(|| black_box(base.diff(other).unwrap())),
        );
    }
}

criterion_group!(benches, bench_insert, bench_diff);
criterion_main!(benches);
