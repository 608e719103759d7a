// Indexer benchmarks.
//
// Covers the bit-plane codec on realistic sparsity and a full CHT section
// (reset, one trie update per header, commit) over an in-memory store.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use num_bigint::BigUint;

use light_index::bitutil::{compress_bytes, decompress_bytes};
use light_index::indexer::{ChtBackend, SectionIndexer};
use light_index::keys::CHT_INDEX_PREFIX;
use light_index::storage::{ChainDb, ChainStore, MemoryStore, SharedStore};
use light_index::{Bloom, Header};

/// A 4096-header bit-plane with roughly one set bit in `one_in` headers.
fn sparse_plane(one_in: usize) -> Vec<u8> {
    let mut plane = vec![0u8; 4096 / 8];
    for i in (0..4096).step_by(one_in) {
        plane[i / 8] |= 1 << (7 - i % 8);
    }
    plane
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitutil");
    for one_in in [7usize, 64, 1024] {
        let plane = sparse_plane(one_in);
        let compressed = compress_bytes(&plane);
        group.throughput(Throughput::Bytes(plane.len() as u64));
        group.bench_with_input(BenchmarkId::new("compress", one_in), &plane, |b, plane| {
            b.iter(|| compress_bytes(plane));
        });
        group.bench_with_input(
            BenchmarkId::new("decompress", one_in),
            &compressed,
            |b, data| {
                b.iter(|| decompress_bytes(data, plane.len()).unwrap());
            },
        );
    }
    group.finish();
}

fn seed_chain(store: SharedStore, len: u64) -> ChainDb {
    let chain = ChainDb::new(store);
    let mut parent = Header {
        parent_hash: [0; 32],
        number: 0,
        difficulty: BigUint::from(1u32),
        timestamp: 0,
        logs_bloom: Bloom::zero(),
        extra: Vec::new(),
    };
    let mut td = parent.difficulty.clone();
    chain.insert_canonical(&parent, Some(&td)).unwrap();
    for _ in 1..len {
        let header = Header::child_of(&parent, BigUint::from(2u32), Bloom::zero());
        td += &header.difficulty;
        chain.insert_canonical(&header, Some(&td)).unwrap();
        parent = header;
    }
    chain
}

fn bench_cht_section(c: &mut Criterion) {
    let mut group = c.benchmark_group("cht");
    group.sample_size(10);
    for size in [256u64, 4096] {
        let store = MemoryStore::shared();
        let chain: Arc<dyn ChainStore> = Arc::new(seed_chain(store.clone(), size));
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::new("section", size), &size, |b, &size| {
            b.iter_batched(
                || {
                    // Fresh index tables over the shared chain each round.
                    let db = MemoryStore::shared();
                    let backend = ChtBackend::new(db.clone(), Arc::clone(&chain), size);
                    SectionIndexer::new(backend, Arc::clone(&chain), db, CHT_INDEX_PREFIX, size, 0)
                        .unwrap()
                },
                |mut indexer| {
                    indexer.update(size - 1, &AtomicBool::new(false)).unwrap();
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_codec, bench_cht_section);
criterion_main!(benches);
