//! Benchmarks for stage spec parsing and column suggestion.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dataforge::pipeline::{closest_match, parse_stage_spec, validate_pipeline_columns};

const SPEC: &str = "chunk:summary,summary:analysis,title+summary+analysis:conclusion";

fn columns() -> Vec<String> {
    (0..64)
        .map(|i| format!("column_{i}"))
        .chain(["index", "title", "chunk"].map(String::from))
        .collect()
}

fn parse_benchmark(c: &mut Criterion) {
    c.bench_function("parse_stage_spec", |b| {
        b.iter(|| parse_stage_spec(black_box(SPEC)))
    });

    let stages = parse_stage_spec(SPEC).unwrap_or_default();
    let known = columns();
    c.bench_function("validate_pipeline_columns", |b| {
        b.iter(|| validate_pipeline_columns(black_box(&known), black_box(&stages)))
    });
}

fn suggestion_benchmark(c: &mut Criterion) {
    let known = columns();
    c.bench_function("closest_match", |b| {
        b.iter(|| closest_match(black_box("colum_42"), known.iter().map(String::as_str)))
    });
}

criterion_group!(benches, parse_benchmark, suggestion_benchmark);
criterion_main!(benches);
