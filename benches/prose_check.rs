//! Benchmarks for the prose checks and response screening.
//!
//! Benchmark targets:
//! - Checking a 20-item digest: <1ms
//! - Screening a 4k-char response: <500us

// Criterion macros generate items without docs - this is expected for benchmarks
#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;

use briefcast::llm::{extract_json_from_response, screen_response};
use briefcast::models::{DigestItem, DigestResult};
use briefcast::services::{ProseValidator, local_summary};

// ============================================================================
// Prose Check Benchmarks
// ============================================================================

fn narrative(items: usize) -> String {
    let items: Vec<DigestItem> = (0..items)
        .map(|i| DigestItem {
            title: format!("Story {i}"),
            blurb: "The panel spent a long stretch on how the accelerator launch could shift \
                    cloud pricing for smaller labs over the coming year."
                .to_string(),
            source_chunk_index: i,
        })
        .collect();
    DigestResult::narrative(&items)
}

fn bulleted(lines: usize) -> String {
    (0..lines)
        .map(|i| format!("- Point number {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn bench_prose_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("prose_check");
    group.measurement_time(Duration::from_secs(5));

    for items in [3, 10, 20] {
        let text = narrative(items);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new("narrative", items), &text, |b, text| {
            b.iter(|| ProseValidator::check(black_box(text)));
        });
    }

    let list = bulleted(40);
    group.bench_function("bullet_list", |b| {
        b.iter(|| ProseValidator::check(black_box(&list)));
    });

    group.finish();
}

// ============================================================================
// Screening Benchmarks
// ============================================================================

fn bench_screening(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_screening");

    let clean = format!(
        "{{\"summary\": \"{}\"}}",
        "The guests compared two accelerator launches. ".repeat(90)
    );
    group.throughput(Throughput::Bytes(clean.len() as u64));
    group.bench_function("clean_4k", |b| {
        b.iter(|| screen_response(black_box(&clean)));
    });

    let fenced = format!("Here you go:\n```json\n{clean}\n```\n");
    group.bench_function("extract_fenced_json", |b| {
        b.iter(|| extract_json_from_response(black_box(&fenced)));
    });

    let chunk = "The guests compared two accelerator launches. ".repeat(48);
    group.bench_function("local_summary", |b| {
        b.iter(|| local_summary(black_box(&chunk)));
    });

    group.finish();
}

criterion_group!(benches, bench_prose_check, bench_screening);
criterion_main!(benches);
