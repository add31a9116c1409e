//! Streaming Benchmarks
//!
//! Performance benchmarks for the page cache and the indirection table

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tessella_core::indirection::PageIndirectionTable;
use tessella_core::{IndirectionTableFormat, PageCacheMgr, PageId};

const PAGES: [u32; 7] = [64, 32, 16, 8, 4, 2, 1];

fn filled_cache() -> PageCacheMgr {
    let mut cache = PageCacheMgr::new(&PAGES, &PAGES);
    for y in 0..16 {
        for x in 0..16 {
            let id = PageId::new(x, y, 0, 0);
            cache.lookup_page(id);
            cache.accommodate_page(id);
        }
    }
    cache
}

fn bench_lookup_hit(c: &mut Criterion) {
    let mut cache = filled_cache();

    c.bench_function("cache_lookup_hit", |b| {
        b.iter(|| {
            for y in 0..16 {
                for x in 0..16 {
                    black_box(cache.lookup_page(PageId::new(x, y, 0, 0)));
                }
            }
        });
    });
}

fn bench_accommodate_evict(c: &mut Criterion) {
    let mut cache = filled_cache();

    // Steady-state streaming: every accommodation evicts the LRU slot.
    c.bench_function("cache_accommodate_evict", |b| {
        let mut n = 0u32;
        b.iter(|| {
            let id = PageId::new(n % 64, (n / 64) % 64, 0, 0);
            n = n.wrapping_add(1);
            if cache.lookup_page(id) == tessella_core::CachePageStatus::Unavailable {
                black_box(cache.accommodate_page(id));
            }
        });
    });
}

fn bench_indirection_update(c: &mut Criterion) {
    let cache = filled_cache();
    let mut group = c.benchmark_group("indirection_update");

    for format in [IndirectionTableFormat::Rgba8888, IndirectionTableFormat::Rgb565] {
        let mut table = PageIndirectionTable::with_format(format, &PAGES, &PAGES);
        group.bench_with_input(BenchmarkId::from_parameter(format!("{format:?}")), &format, |b, _| {
            b.iter(|| table.update(black_box(cache.entries())));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_lookup_hit, bench_accommodate_evict, bench_indirection_update);
criterion_main!(benches);
