//! Benchmark: bitmap scans at group scale.
//!
//! A full group bitmap is 4096 bits (512 bytes). These benches measure
//! the first-fit scan and the free-count walk on a mostly-full bitmap,
//! which is the worst case the allocators hit under churn.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use lfs_alloc::{bitmap_count_free, bitmap_find_free, bitmap_set};

/// Build a group-sized bitmap with ~5% free bits scattered in clusters
/// toward the tail, forcing long scans.
fn make_bitmap() -> Vec<u8> {
    let mut bm = vec![0_u8; 512];
    for idx in 0..4096_u64 {
        bitmap_set(&mut bm, idx);
    }
    let mut pos = 3600_u64;
    while pos + 8 < 4096 {
        for idx in pos..pos + 8 {
            bm[(idx / 8) as usize] &= !(1 << (idx % 8));
        }
        pos += 160;
    }
    bm
}

fn bench_find_free(c: &mut Criterion) {
    let bm = make_bitmap();

    let mut group = c.benchmark_group("find_free");
    group.bench_function("from_reserved", |b| {
        b.iter(|| black_box(bitmap_find_free(black_box(&bm), 4096, black_box(131))));
    });
    group.bench_function("from_zero", |b| {
        b.iter(|| black_box(bitmap_find_free(black_box(&bm), 4096, 0)));
    });
    group.finish();
}

fn bench_count_free(c: &mut Criterion) {
    let bm = make_bitmap();

    c.bench_function("count_free_group", |b| {
        b.iter(|| black_box(bitmap_count_free(black_box(&bm), 4096, black_box(131))));
    });
}

criterion_group!(benches, bench_find_free, bench_count_free);
criterion_main!(benches);
