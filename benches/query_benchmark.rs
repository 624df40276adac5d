use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use rand::Rng;
use serde_json::json;
use taskvault::core::types::Document;
use taskvault::index::builder::IndexBuilder;
use taskvault::query::aliases::AliasMap;
use taskvault::query::engine::QueryEngine;
use taskvault::query::types::SortOrder;
use taskvault::stats::engine::StatsEngine;
use taskvault::storage::memory::MemoryStore;
use taskvault::storage::DocumentStore;

fn seeded_engine(count: u64) -> Arc<QueryEngine> {
    let mut rng = rand::thread_rng();
    let store = Arc::new(MemoryStore::new());
    let elements = ["Li", "O", "Fe", "Mn", "P"];
    for id in 1..=count {
        let nelements = rng.gen_range(1..4);
        let doc = json!({
            "task_id": id,
            "natural_key": format!("bench:/run/{}", id),
            "nelements": nelements,
            "elements": (0..nelements).map(|i| elements[(id as usize + i) % elements.len()]).collect::<Vec<_>>(),
            "output": {"final_energy": rng.gen_range(-50.0..0.0)},
            "last_updated": format!("2024-01-01T00:00:{:02}.000000Z", id % 60),
        });
        store.insert("tasks", Document::from_value(doc).unwrap()).unwrap();
    }
    IndexBuilder::new(store.clone(), "tasks")
        .rebuild(&IndexBuilder::default_specs())
        .unwrap();
    Arc::new(QueryEngine::new(store, "tasks", Arc::new(AliasMap::with_defaults())))
}

/// Benchmark indexed equality lookups versus scans
fn bench_lookup(c: &mut Criterion) {
    let engine = seeded_engine(10_000);
    let mut group = c.benchmark_group("query_lookup");

    group.bench_function("indexed_task_id", |b| {
        let mut rng = rand::thread_rng();
        b.iter(|| {
            let id = rng.gen_range(1..=10_000u64);
            black_box(engine.query_one(&["energy"], Some(&json!({"task_id": id}))).unwrap());
        });
    });

    group.bench_function("scan_energy_range", |b| {
        b.iter(|| {
            let rows = engine
                .query(&["task_id", "energy"], Some(&json!({"energy": {"$lt": -45.0}})))
                .unwrap()
                .count();
            black_box(rows);
        });
    });
    group.finish();
}

/// Benchmark streaming throughput for different projections
fn bench_streaming(c: &mut Criterion) {
    let engine = seeded_engine(10_000);
    let mut group = c.benchmark_group("query_stream");
    group.sample_size(20);

    for properties in [vec!["task_id"], vec!["task_id", "energy", "formula", "elements"]] {
        group.bench_with_input(BenchmarkId::from_parameter(properties.len()), &properties, |b, properties| {
            b.iter(|| black_box(engine.query(properties, None).unwrap().count()));
        });
    }
    group.finish();
}

/// Benchmark the stats handlers
fn bench_stats(c: &mut Criterion) {
    let engine = seeded_engine(10_000);
    let stats = StatsEngine::new(engine.clone());

    c.bench_function("stats_count_latest", |b| {
        b.iter(|| black_box(stats.get_stats(&["count", "latest"], None).unwrap()));
    });

    c.bench_function("sorted_top_10", |b| {
        b.iter(|| {
            let rows = engine
                .query_sorted(&["task_id"], None, "energy", SortOrder::Asc, Some(10))
                .unwrap()
                .count();
            black_box(rows);
        });
    });
}

criterion_group!(benches, bench_lookup, bench_streaming, bench_stats);
criterion_main!(benches);
