//! Query-path benchmarks over a generated snapshot.
//!
//! Run with: `cargo bench`
//! Save baseline: `cargo bench -- --save-baseline main`
//! Compare: `cargo bench -- --baseline main`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use findex::index::{write_snapshot, BinaryIndex, Item, SortKey};
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;

const EXTENSIONS: &[&str] = &["txt", "rs", "log", "pdf", "png", "tar.gz"];

fn synthetic_items(count: usize) -> Vec<Item> {
    (0..count)
        .map(|i| {
            let ext = EXTENSIONS[i % EXTENSIONS.len()];
            let name = format!("document-{i:07}.{ext}");
            Item {
                path: format!("/bench/dir-{:03}/{name}", i % 500),
                name,
                is_dir: false,
                size: (i as i64 * 37) % 1_000_000,
                modified: Some(UNIX_EPOCH + Duration::from_secs(1_600_000_000 + i as u64)),
            }
        })
        .collect()
}

fn open_index(count: usize) -> (TempDir, BinaryIndex) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index.bin");
    write_snapshot(synthetic_items(count), &path).unwrap();
    let index = BinaryIndex::open(&path).unwrap();
    (dir, index)
}

fn bench_substring_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");

    for &count in &[10_000usize, 100_000, 500_000] {
        let (_dir, index) = open_index(count);

        group.bench_with_input(BenchmarkId::new("common_token", count), &index, |b, index| {
            b.iter(|| index.search("document"))
        });
        group.bench_with_input(BenchmarkId::new("rare_token", count), &index, |b, index| {
            b.iter(|| index.search("tar.gz"))
        });
        group.bench_with_input(BenchmarkId::new("no_match", count), &index, |b, index| {
            b.iter(|| index.search("zzzzzz"))
        });
    }

    group.finish();
}

fn bench_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("sort");
    let (_dir, index) = open_index(100_000);
    let all = index.search("");

    for (label, key) in [
        ("name", SortKey::Name),
        ("size", SortKey::Size),
        ("date", SortKey::Date),
    ] {
        group.bench_function(label, |b| {
            b.iter_batched(
                || all.clone(),
                |mut indices| index.sort(&mut indices, key, false),
                criterion::BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

fn bench_materialize(c: &mut Criterion) {
    let (_dir, index) = open_index(100_000);
    c.bench_function("materialize_window_100", |b| {
        b.iter(|| {
            (0..100)
                .map(|i| index.materialize(i * 997 % 100_000))
                .collect::<Vec<_>>()
        })
    });
}

criterion_group!(benches, bench_substring_scan, bench_sort, bench_materialize);
criterion_main!(benches);
