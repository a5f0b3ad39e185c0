//! Performance benchmarks for Folio core operations
//!
//! Run with: `cargo bench -p folio-core`
//!
//! These benchmarks measure critical path performance:
//! - Position allocation over large sibling groups
//! - Query sanitization of typical and hostile input
//! - Page appends through the tree service (store round-trip included)

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use folio_core::db::{FractionalOrderCalculator, InsertAt, LibsqlDocumentStore};
use folio_core::models::NewPage;
use folio_core::search::{highlight_phrase, prepare_query};
use folio_core::services::{PageTreeService, TreeConfig};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;

/// Setup a tree service with a fresh database
async fn setup_tree() -> (PageTreeService, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(
        LibsqlDocumentStore::new(temp_dir.path().join("bench.db"))
            .await
            .unwrap(),
    );
    (PageTreeService::new(store, TreeConfig::default()), temp_dir)
}

/// Benchmark position allocation
///
/// Measures insert-position computation and the closeness check over a
/// 10,000-sibling group.
fn bench_position_allocation(c: &mut Criterion) {
    let siblings: Vec<f64> = FractionalOrderCalculator::rebalance(10_000, 10000.0);

    let mut group = c.benchmark_group("position_allocation");
    group.bench_function("interior_insert", |b| {
        b.iter(|| {
            FractionalOrderCalculator::compute_insert_position(
                black_box(&siblings),
                black_box(InsertAt::Index(5_000)),
                10000.0,
            )
        })
    });
    group.bench_function("needs_rebalancing", |b| {
        b.iter(|| FractionalOrderCalculator::needs_rebalancing(black_box(&siblings), 1e-6))
    });
    group.finish();
}

/// Benchmark query sanitization and title highlighting
fn bench_query_sanitization(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_sanitization");
    group.bench_function("smart_mode", |b| {
        b.iter(|| prepare_query(black_box("the decline and fall of the roman empire or byzantium")))
    });
    group.bench_function("hostile_input", |b| {
        b.iter(|| prepare_query(black_box("AND OR ((empire^senate)) | \"forum [villa] NOT {road} \\ *")))
    });
    group.bench_function("highlight_title", |b| {
        b.iter(|| {
            highlight_phrase(
                black_box("roman empire"),
                black_box("The Rise and Fall of the Roman Empire"),
                "<mark>",
                "</mark>",
            )
        })
    });
    group.finish();
}

/// Benchmark page appends
///
/// Each append reads the sibling group, allocates a position and writes one
/// revision-checked document.
fn bench_tree_append(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("tree_append");
    group.sample_size(10); // Fewer samples for expensive operations

    group.bench_function("append_as_child", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let (tree, _temp) = setup_tree().await;

                let start = std::time::Instant::now();
                for i in 0..iters {
                    tree.append_as_child(None, NewPage::new(format!("Chapter {}", i), ""))
                        .await
                        .unwrap();
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_position_allocation,
    bench_query_sanitization,
    bench_tree_append
);
criterion_main!(benches);
