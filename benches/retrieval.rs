//! Performance benchmarks for the retrieval path

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use memoria::embedding::TfIdfEmbedder;
use memoria::search::{bm25_search, fuse, rank_candidates, RRF_K};
use memoria::storage::queries::insert_memory;
use memoria::storage::Storage;
use memoria::types::*;
use memoria::{MemoryRetriever, RetrievalConfig, Tokenizer};

const OWNER: &str = "bench-user";

fn setup_storage_with_data(count: usize) -> Storage {
    let storage = Storage::open_in_memory().unwrap();
    let embedder = TfIdfEmbedder::new(384);

    let sample_contents = [
        "prefers dark roast coffee over tea in the morning",
        "project uses PostgreSQL with a read replica",
        "decided to migrate the API to gRPC next quarter",
        "allergic to peanuts and tree nuts",
        "enjoys hiking in the mountains on weekends",
        "works remotely from Lisbon most of the year",
        "uses vim keybindings in every editor",
        "sister's birthday is in early March",
        "team standup happens at 9:30 every weekday",
        "prefers Rust for systems work and Python for scripts",
    ];
    let types = MemoryType::all();

    storage
        .with_transaction(|conn| {
            for i in 0..count {
                let content = format!(
                    "{} (note {})",
                    sample_contents[i % sample_contents.len()],
                    i
                );
                let embedding = embedder.embed_sync(&content);
                insert_memory(
                    conn,
                    &NewMemory::new(OWNER, content, types[i % types.len()])
                        .with_importance((i % 10) as f32 / 10.0)
                        .with_embedding(embedding),
                )?;
            }
            Ok(())
        })
        .unwrap();

    storage
}

fn bench_fusion(c: &mut Criterion) {
    let mut group = c.benchmark_group("rrf_fusion");

    for size in [10usize, 50, 150] {
        let keyword = RankedHit::from_ordered((0..size as i64).map(|i| i * 2));
        let semantic = RankedHit::from_ordered((0..size as i64).rev().map(|i| i * 3));

        group.throughput(Throughput::Elements(size as u64 * 2));
        group.bench_with_input(BenchmarkId::new("fuse", size), &size, |b, _| {
            b.iter(|| {
                let candidates = fuse(black_box(&keyword), black_box(&semantic));
                rank_candidates(&candidates, RRF_K)
            })
        });
    }

    group.finish();
}

fn bench_budget(c: &mut Criterion) {
    let tokenizer = Tokenizer::cl100k().unwrap();
    let items: Vec<String> = (0..50)
        .map(|i| format!("memory item {} about preferences, projects and plans", i))
        .collect();

    c.bench_function("enforce_budget_50_items", |b| {
        b.iter(|| tokenizer.enforce_budget(black_box(items.clone()), 1000))
    });
}

fn bench_bm25(c: &mut Criterion) {
    let storage = setup_storage_with_data(1000);
    let owner = OwnerScope::new(OWNER).unwrap();

    let mut group = c.benchmark_group("bm25_search");
    for query in ["coffee", "which database does the project use", "hiking weekends"] {
        group.bench_with_input(BenchmarkId::new("query", query), &query, |b, query| {
            b.iter(|| {
                storage
                    .with_connection(|conn| {
                        bm25_search(conn, &owner, black_box(query), None, 30, chrono::Utc::now())
                    })
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_retrieve(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let storage = setup_storage_with_data(1000);

    let config = RetrievalConfig {
        rate_limit_per_window: u64::MAX,
        deadline_ms: 5_000,
        embedding_timeout_ms: 5_000,
        ..Default::default()
    };
    let retriever = MemoryRetriever::sqlite(storage, config)
        .embedder(Arc::new(TfIdfEmbedder::new(384)))
        .build()
        .unwrap();

    c.bench_function("retrieve_end_to_end", |b| {
        b.iter(|| {
            runtime
                .block_on(retriever.retrieve(RetrievalRequest::new(
                    OWNER,
                    black_box("what coffee does the user prefer?"),
                )))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_fusion, bench_budget, bench_bm25, bench_retrieve);
criterion_main!(benches);
