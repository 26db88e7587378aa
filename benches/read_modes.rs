use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use memlog::core::config::MemlogConfig;
use memlog::core::reader::ReadMode;
use memlog::core::record::Decision;
use memlog::core::schemas::RecordKind;
use memlog::core::store::Store;
use std::ops::ControlFlow;
use std::time::Duration;
use tempfile::TempDir;

fn populated_store(sections: usize) -> (TempDir, Store) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = MemlogConfig::for_root(temp_dir.path());
    config.fsync = false;
    config.redact_pii = false;
    let store = Store::open(config).unwrap();
    for i in 0..sections {
        store
            .append(&Decision::new(
                &format!("d{}", i),
                &format!("decision {}", i),
                "rationale with | pipes and\nnewlines",
            ))
            .unwrap();
    }
    (temp_dir, store)
}

/// Full scans in each mode over the same file.
fn bench_full_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_scan");
    group.measurement_time(Duration::from_secs(10));

    for sections in [1_000usize, 10_000] {
        let (_dir, store) = populated_store(sections);
        let bytes = std::fs::metadata(store.file_path(RecordKind::Decisions))
            .unwrap()
            .len();
        group.throughput(Throughput::Bytes(bytes));

        for mode in [ReadMode::Indexed, ReadMode::Streaming] {
            let reader = store
                .reader(RecordKind::Decisions)
                .unwrap()
                .with_mode(mode);
            group.bench_with_input(
                BenchmarkId::new(mode.to_string(), sections),
                &sections,
                |b, _| {
                    b.iter(|| {
                        let stats = reader
                            .stream_sections(|section| {
                                black_box(section);
                                ControlFlow::Continue(())
                            })
                            .unwrap();
                        black_box(stats.sections)
                    });
                },
            );
        }
    }

    group.finish();
}

/// Tail reads, the common agent query.
fn bench_last_n(c: &mut Criterion) {
    let mut group = c.benchmark_group("last_n");
    let (_dir, store) = populated_store(5_000);

    for mode in [ReadMode::Indexed, ReadMode::Streaming] {
        let reader = store
            .reader(RecordKind::Decisions)
            .unwrap()
            .with_mode(mode);
        group.bench_function(BenchmarkId::new("last_10", mode.to_string()), |b| {
            b.iter(|| black_box(reader.get_last_n(RecordKind::Decisions, 10).unwrap()));
        });
    }

    group.finish();
}

/// Appends under the lock, with and without PII redaction.
fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");

    group.bench_function("decision_plain", |b| {
        let (_dir, store) = populated_store(0);
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            black_box(
                store
                    .append(&Decision::new(&format!("b{}", i), "bench", "plain text"))
                    .unwrap(),
            )
        });
    });

    group.bench_function("decision_redacted", |b| {
        let temp_dir = TempDir::new().unwrap();
        let mut config = MemlogConfig::for_root(temp_dir.path());
        config.fsync = false;
        let store = Store::open(config).unwrap();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            black_box(
                store
                    .append(&Decision::new(
                        &format!("b{}", i),
                        "mail ops@example.com",
                        "call 555-123-4567",
                    ))
                    .unwrap(),
            )
        });
    });

    group.finish();
}

criterion_group!(benches, bench_full_scan, bench_last_n, bench_append);
criterion_main!(benches);
