//! Benchmarks for the editing core under editor-like load
//!
//! - Edit batching through the pending queue and a single publish
//! - O(log n) line/byte navigation
//! - Viewport reads and styled window queries
//! - Marker queries and marker mapping across edits

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_editor_core::document::{Doc, Edit};
use tiny_editor_core::markers::{EditMap, Marker, MarkerTree};
use tiny_editor_core::query::query_window;
use tiny_editor_core::shred::Pos;
use tiny_editor_core::syntax::{CLike, Tokenizer};
use tiny_editor_core::text_effects::Style;
use tiny_editor_core::tree::Tree;
use tiny_editor_core::worker::LexResponse;

/// Generate a realistic document with mixed content
fn generate_document(lines: usize) -> String {
    let mut doc = String::new();
    for i in 0..lines {
        match i % 5 {
            0 => doc.push_str(&format!("fn function_{}() {{\n", i)),
            1 => doc.push_str(&format!(
                "    let variable_{} = \"string literal with some text\";\n",
                i
            )),
            2 => doc.push_str(&format!("    // Comment explaining line {}\n", i)),
            3 => doc.push_str(&format!("    process_data({}, {}, {});\n", i, i * 2, i * 3)),
            _ => doc.push_str("}\n"),
        }
    }
    doc
}

/// One marker every few lines, like diagnostics scattered across a file
fn marked_document(text: &str) -> Doc {
    let doc = Doc::from_str(text);
    let tree = doc.read().text().clone();
    let style = Style::new().with("underline", "wavy");
    for line in (0..tree.line_count()).step_by(7) {
        let Ok(range) = tree.line_range(line) else { continue };
        let to = if line % 2 == 0 { Pos::Eol } else { Pos::At(range.end) };
        doc.add_marker(Marker::new(range.start, to, style.clone())).unwrap();
    }
    doc.flush().unwrap();
    doc
}

fn bench_single_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_insert");

    for size in [100, 1000, 10000, 100000].iter() {
        let text = generate_document(*size);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let doc = Doc::from_str(&text);
                let mid = text.len() / 2;
                doc.edit(Edit::insert(mid, "x")).unwrap();
                doc.flush().unwrap();
                std::hint::black_box(doc.read());
            });
        });
    }
    group.finish();
}

/// ~10 keystrokes queued and published together
fn bench_batched_edits(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_edits");

    for size in [1000, 10000, 100000].iter() {
        let text = generate_document(*size);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let doc = Doc::from_str(&text);
                let start = text.len() / 2;
                for i in 0..10 {
                    doc.edit(Edit::insert(start + i, "a")).unwrap();
                }
                doc.flush().unwrap();
                std::hint::black_box(doc.read());
            });
        });
    }
    group.finish();
}

fn bench_navigation(c: &mut Criterion) {
    let mut group = c.benchmark_group("navigation");

    for size in [1000, 10000, 100000].iter() {
        let text = generate_document(*size);
        let tree = Tree::from_str(&text);

        group.bench_with_input(BenchmarkId::new("byte_to_line", size), size, |b, _| {
            let positions: Vec<usize> = (0..100).map(|i| (text.len() * i) / 100).collect();
            b.iter(|| {
                for &pos in &positions {
                    std::hint::black_box(tree.byte_to_line(pos).ok());
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("line_to_byte", size), size, |b, _| {
            let line_count = tree.line_count();
            let lines: Vec<usize> = (0..100).map(|i| (line_count * i) / 100).collect();
            b.iter(|| {
                for &line in &lines {
                    std::hint::black_box(tree.line_to_byte(line).ok());
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("find_newlines", size), size, |b, _| {
            let positions: Vec<usize> = (0..100).map(|i| (text.len() * i) / 100).collect();
            b.iter(|| {
                for &pos in &positions {
                    std::hint::black_box(tree.find_next_newline(pos));
                    std::hint::black_box(tree.line_end_at(pos));
                }
            });
        });
    }
    group.finish();
}

fn bench_text_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("text_extraction");

    for size in [1000, 10000, 100000].iter() {
        let text = generate_document(*size);
        let tree = Tree::from_str(&text);

        group.bench_with_input(BenchmarkId::new("viewport_lines", size), size, |b, _| {
            let starts: Vec<usize> = (0..10).map(|i| (tree.line_count() * i) / 10).collect();
            b.iter(|| {
                for &start in &starts {
                    std::hint::black_box(tree.lines(start..start + 50));
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("line_extraction", size), size, |b, _| {
            let lines: Vec<usize> = (0..100).map(|i| (tree.line_count() * i) / 100).collect();
            b.iter(|| {
                for &line in &lines {
                    std::hint::black_box(tree.line_text(line).ok());
                }
            });
        });
    }
    group.finish();
}

fn bench_markers(c: &mut Criterion) {
    let mut group = c.benchmark_group("markers");

    for size in [1000, 10000, 100000].iter() {
        let text = generate_document(*size);
        let doc = marked_document(&text);
        let snapshot = doc.read();
        let markers: &MarkerTree = snapshot.markers();

        group.bench_with_input(BenchmarkId::new("query_viewport", size), size, |b, _| {
            let starts: Vec<usize> = (0..10).map(|i| (text.len() * i) / 10).collect();
            b.iter(|| {
                for &start in &starts {
                    std::hint::black_box(markers.query(start..start + 2000));
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("map_edit", size), size, |b, _| {
            let mid = text.len() / 2;
            let edited = snapshot.text().insert(mid, "x").unwrap();
            let edit = EditMap {
                start: mid,
                removed: 0,
                inserted: 1,
            };
            b.iter(|| std::hint::black_box(markers.map_edit(edit, &edited)));
        });
    }
    group.finish();
}

/// Styled rows for a 50-line viewport, tokens included
fn bench_window_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_query");
    let lexer = CLike::rust();

    for size in [1000, 10000].iter() {
        let text = generate_document(*size);
        let doc = marked_document(&text);
        let mut snapshot = (*doc.read()).clone();
        let initial = lexer.initial_state();
        while let Some(request) = snapshot.lex_request(snapshot.first_invalid(), &initial) {
            let (tokens, state) = lexer.tokenize(&request.text, &request.state);
            let response = LexResponse {
                line: request.line,
                tokens,
                state,
                timestamp: request.timestamp,
            };
            match snapshot.apply_tokens(&response, &initial) {
                Some(next) => snapshot = next,
                None => break,
            }
        }

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            let middle = snapshot.line_count() / 2;
            b.iter(|| std::hint::black_box(query_window(&snapshot, middle, middle + 50).unwrap()));
        });
    }
    group.finish();
}

/// Readers keep loading snapshots while a writer publishes
fn bench_rcu_concurrency(c: &mut Criterion) {
    let mut group = c.benchmark_group("rcu_concurrency");
    let text = generate_document(10000);

    group.bench_function("concurrent_reads_during_writes", |b| {
        b.iter(|| {
            let doc = Arc::new(Doc::from_str(&text));
            let reader_doc = Arc::clone(&doc);

            let reader = thread::spawn(move || {
                let mut sum = 0usize;
                for _ in 0..120 {
                    let snapshot = reader_doc.read();
                    sum += snapshot.text().byte_count();
                    thread::sleep(Duration::from_micros(500));
                }
                sum
            });

            for i in 0..100 {
                doc.edit(Edit::insert(i, "x")).unwrap();
                if i % 10 == 0 {
                    doc.flush().unwrap();
                    thread::sleep(Duration::from_micros(1000));
                }
            }
            doc.flush().unwrap();

            std::hint::black_box(reader.join().unwrap());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_insert,
    bench_batched_edits,
    bench_navigation,
    bench_text_extraction,
    bench_markers,
    bench_window_query,
    bench_rcu_concurrency
);

criterion_main!(benches);
