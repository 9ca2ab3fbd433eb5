use aion_buffer::PageCache;
use aion_common::config::CacheConfig;
use aion_common::key::{EntryLayout, EntryMeta, IndexOrder};
use aion_common::CancelToken;
use aion_storage::{BTree, DiskManager, DiskManagerConfig};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;
use tempfile::tempdir;

const N: u32 = 10_000;

fn key12(n: u32) -> [u8; 12] {
    let mut k = [0u8; 12];
    k[4..8].copy_from_slice(&n.to_be_bytes());
    k
}

fn fresh_tree(dir: &std::path::Path) -> BTree {
    let disk = Arc::new(
        DiskManager::new(DiskManagerConfig {
            data_dir: dir.to_path_buf(),
            fsync_enabled: false,
        })
        .unwrap(),
    );
    let cache = Arc::new(PageCache::new(CacheConfig { num_frames: 2_048 }));
    BTree::open(
        disk,
        cache,
        0,
        "spo",
        EntryLayout::for_order(IndexOrder::Spo, false),
    )
    .unwrap()
}

fn btree_insert_10k(c: &mut Criterion) {
    c.bench_function("btree_insert_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let tree = fresh_tree(dir.path());
                (dir, tree)
            },
            |(_dir, tree)| {
                for i in 0..N {
                    tree.insert(&key12(i), i as u64, &EntryMeta::default()).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn btree_point_lookup_10k(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let tree = fresh_tree(dir.path());
    for i in 0..N {
        tree.insert(&key12(i), i as u64, &EntryMeta::default()).unwrap();
    }

    c.bench_function("btree_point_lookup_10k", |b| {
        b.iter(|| {
            for i in 0..N {
                criterion::black_box(tree.lookup(&key12(i)).unwrap());
            }
        });
    });
}

fn btree_range_scan_1k(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let tree = fresh_tree(dir.path());
    for i in 0..N {
        tree.insert(&key12(i), i as u64, &EntryMeta::default()).unwrap();
    }

    c.bench_function("btree_range_scan_1k", |b| {
        b.iter(|| {
            let mut scan = tree.scan(&key12(4_000), &key12(4_999), CancelToken::new());
            let mut total = 0u64;
            while scan.advance().unwrap() {
                total += scan.current().value;
            }
            criterion::black_box(total)
        });
    });
}

criterion_group!(
    benches,
    btree_insert_10k,
    btree_point_lookup_10k,
    btree_range_scan_1k,
);

criterion_main!(benches);
