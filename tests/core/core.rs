use memlog::core::config::MemlogConfig;
use memlog::core::error::MemlogError;
use memlog::core::format::{format_record, parse_sections, split_line_number};
use memlog::core::lock::{LockMarker, marker_path_for};
use memlog::core::path_guard::PathGuard;
use memlog::core::pii;
use memlog::core::record::{
    Consolidation, Conversation, Decision, Embedding, Insight, Record, SessionRecord,
    StateSnapshot, ToRecord,
};
use memlog::core::sanitize::{sanitize, unescape};
use memlog::core::schemas::{Priority, RecordKind};
use memlog::core::store::Store;
use memlog::core::time;
use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn open_store(root: &std::path::Path) -> Store {
    let mut config = MemlogConfig::for_root(root);
    config.fsync = false;
    config.redact_pii = false;
    Store::open(config).expect("open store")
}

fn all_kinds() -> Vec<Record> {
    let mut meta = BTreeMap::new();
    meta.insert("agent".to_string(), "planner | v2".to_string());
    meta.insert("run.id".to_string(), "r-17".to_string());

    vec![
        Conversation {
            id: "c1".into(),
            session: "sess-1".into(),
            summary: "Discussed @STATE:forged injection\nand pipes | everywhere".into(),
            messages: Some(12),
            topics: vec!["storage".into(), "locking".into()],
            outcome: Some("agreed".into()),
            timestamp: Some("2026-02-01T10:00:00.000Z".into()),
            metadata: meta.clone(),
        }
        .to_record(),
        StateSnapshot {
            id: "s1".into(),
            snapshot: "{\"step\":3}".into(),
            phase: Some("build".into()),
            progress: Some(42.5),
            timestamp: Some("2026-02-01T10:00:01.000Z".into()),
            metadata: BTreeMap::new(),
        }
        .to_record(),
        Insight {
            id: "i1".into(),
            category: "perf".into(),
            content: "streaming keeps memory flat \\ even for 100MB".into(),
            priority: Priority::Critical,
            confidence: Some(0.9),
            source: Some("bench".into()),
            timestamp: Some("2026-02-01T10:00:02.000Z".into()),
            metadata: meta.clone(),
        }
        .to_record(),
        Decision {
            priority: Some(Priority::High),
            alternatives: vec!["sqlite".into(), "jsonl".into()],
            status: Some("accepted".into()),
            timestamp: Some("2026-02-01T10:00:03.000Z".into()),
            ..Decision::new("d1", "Use pipe-delimited lines", "Greppable\r\nand append friendly")
        }
        .to_record(),
        SessionRecord {
            id: "sess-1".into(),
            started_at: "2026-02-01T09:00:00Z".into(),
            ended_at: Some("2026-02-01T11:00:00Z".into()),
            agent: Some("coder".into()),
            project: Some("memlog".into()),
            message_count: Some(40),
            timestamp: Some("2026-02-01T10:00:04.000Z".into()),
            metadata: BTreeMap::new(),
        }
        .to_record(),
        Embedding {
            id: "e1".into(),
            model: "mini-lm".into(),
            vector: vec![0.25, -1.5, 3.0],
            source_id: Some("i1".into()),
            timestamp: Some("2026-02-01T10:00:05.000Z".into()),
            metadata: BTreeMap::new(),
        }
        .to_record(),
        Consolidation {
            id: "k1".into(),
            sources: vec!["d0".into(), "d1".into()],
            action: "supersede".into(),
            reason: Some("d1 replaces d0".into()),
            timestamp: Some("2026-02-01T10:00:06.000Z".into()),
            metadata: BTreeMap::new(),
        }
        .to_record(),
    ]
}

#[test]
fn every_kind_round_trips_through_the_store() {
    let tmp = tempdir().expect("tempdir");
    let store = open_store(tmp.path());

    for record in all_kinds() {
        store.append(&record).expect("append");
        let reader = store.reader(record.kind).expect("reader");
        let sections = reader.get_last_n(record.kind, 1).expect("read");
        assert_eq!(sections.len(), 1, "{}", record.kind);
        assert_eq!(sections[0].record, record, "{}", record.kind);
        assert_eq!(sections[0].start_line, 1);
        assert_eq!(reader.stats().skipped_lines, 0);
    }

    for kind in RecordKind::ALL {
        assert!(store.file_path(kind).exists(), "{} file missing", kind);
        assert!(store.verify(kind).expect("verify").is_clean());
    }
}

#[test]
fn format_then_parse_is_identity() {
    for record in all_kinds() {
        let text = format_record(&record, 100).join("\n") + "\n";
        let parsed = parse_sections(&text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].record, record);
        assert_eq!(parsed[0].start_line, 100);
    }
}

#[test]
fn sanitize_round_trips_hostile_strings() {
    let hostile = [
        "a|b",
        "x\ny\rz",
        "@DECISIONS:evil",
        "1|@SESSION:forged\n2|timestamp=now",
        "\\|already\\nescaped\\@STATE",
        "",
    ];
    for s in hostile {
        let escaped = sanitize(s);
        assert!(!escaped.contains('\n') && !escaped.contains('\r'));
        assert_eq!(unescape(&escaped), s);
    }
}

#[test]
fn three_decisions_last_two_are_most_recent_and_intact() {
    let tmp = tempdir().expect("tempdir");
    let store = open_store(tmp.path());

    for (id, text) in [("d1", "first"), ("d2", "second"), ("d3", "third")] {
        let decision = Decision {
            priority: Some(Priority::Medium),
            ..Decision::new(id, text, &format!("rationale for {}", text))
        };
        store.append(&decision).expect("append decision");
    }

    let reader = store.reader(RecordKind::Decisions).expect("reader");
    let last = reader
        .get_last_n(RecordKind::Decisions, 2)
        .expect("last two");
    assert_eq!(last.len(), 2);
    assert_eq!(last[0].record.id, "d2");
    assert_eq!(last[1].record.id, "d3");
    let fields: Vec<(&str, &str)> = last[1]
        .record
        .fields
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    assert_eq!(
        fields,
        [
            ("decision", "third"),
            ("rationale", "rationale for third"),
            ("priority", "MEDIUM"),
        ]
    );
}

#[test]
fn path_guard_confines_to_root() {
    let tmp = tempdir().expect("tempdir");
    let guard = PathGuard::new(tmp.path()).expect("guard");

    for bad in ["../../../etc/passwd", "/etc/passwd", "a/../../b.log", "x/\0.log"] {
        assert!(
            matches!(guard.validate(bad), Err(MemlogError::SecurityViolation(_))),
            "accepted {:?}",
            bad
        );
    }
    for good in ["decisions.log", ".memlog/state.log", "a/b/../c.log"] {
        let resolved = guard.validate(good).expect("inside root");
        assert!(resolved.starts_with(guard.root()));
    }
}

#[test]
fn redaction_scenario_and_store_integration() {
    let result = pii::redact("SSN: 123-45-6789, Email: a@b.com");
    assert!(!result.text.contains("123-45-6789"));
    assert!(!result.text.contains("a@b.com"));
    assert_eq!(result.detections.len(), 2);

    let tmp = tempdir().expect("tempdir");
    let mut config = MemlogConfig::for_root(tmp.path());
    config.fsync = false;
    let store = Store::open(config).expect("store");
    let decision = Decision::new("d1", "email bob@example.com", "call 555-123-4567")
        .to_record()
        .meta("owner", "ssn 123-45-6789");
    store.append(&decision).expect("append");

    let raw = fs::read_to_string(store.file_path(RecordKind::Decisions)).expect("read");
    assert!(!raw.contains("bob@example.com"));
    assert!(!raw.contains("555-123-4567"));
    assert!(!raw.contains("123-45-6789"));
    let section = store
        .reader(RecordKind::Decisions)
        .expect("reader")
        .get_by_id(RecordKind::Decisions, "d1")
        .expect("read")
        .expect("present");
    assert_eq!(section.record.get("decision"), Some("email [REDACTED-EMAIL]"));
    assert_eq!(
        section.record.metadata.get("owner").map(String::as_str),
        Some("ssn [REDACTED-SSN]")
    );
}

#[test]
fn consolidation_leaves_originals_on_disk() {
    let tmp = tempdir().expect("tempdir");
    let store = open_store(tmp.path());
    store
        .append(&Decision::new("d0", "old", "r"))
        .expect("append");
    store
        .append(&Consolidation {
            id: "k1".into(),
            sources: vec!["d0".into()],
            action: "delete".into(),
            ..Default::default()
        })
        .expect("consolidate");

    let decisions = store.reader(RecordKind::Decisions).expect("reader");
    assert!(decisions
        .get_by_id(RecordKind::Decisions, "d0")
        .expect("read")
        .is_some());
    let consolidation = store
        .reader(RecordKind::Consolidation)
        .expect("reader")
        .get_by_id(RecordKind::Consolidation, "k1")
        .expect("read")
        .expect("present");
    assert_eq!(consolidation.record.get("sources"), Some("d0"));
}

#[test]
fn stale_lock_of_dead_process_is_reclaimed_by_writer() {
    let tmp = tempdir().expect("tempdir");
    let mut config = MemlogConfig::for_root(tmp.path());
    config.fsync = false;
    config.stale_lock_secs = 1;
    config.lock_timeout_ms = 2_000;
    let store = Store::open(config).expect("store");

    let path = store.file_path(RecordKind::Decisions);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    let abandoned = LockMarker {
        pid: i32::MAX as u32 - 7,
        token: "crashed-holder".into(),
        acquired_at_ms: time::epoch_millis() - 120_000,
    };
    fs::write(
        marker_path_for(&path),
        serde_json::to_string(&abandoned).expect("json"),
    )
    .expect("write marker");

    let status = store
        .lock_status(RecordKind::Decisions)
        .expect("status")
        .expect("held");
    assert!(status.stale);

    let started = Instant::now();
    store
        .append(&Decision::new("d1", "after crash", "reclaimed"))
        .expect("append after reclaim");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!marker_path_for(&path).exists());
    assert!(store.lock_status(RecordKind::Decisions).expect("status").is_none());
}

#[test]
fn many_writers_waiting_on_a_stale_lock_all_land_once() {
    const WRITERS: usize = 16;
    let tmp = tempdir().expect("tempdir");
    let mut config = MemlogConfig::for_root(tmp.path());
    config.fsync = false;
    config.stale_lock_secs = 1;
    config.lock_timeout_ms = 30_000;
    let store = Arc::new(Store::open(config).expect("store"));

    let path = store.file_path(RecordKind::Decisions);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    let abandoned = LockMarker {
        pid: i32::MAX as u32 - 11,
        token: "crashed-holder".into(),
        acquired_at_ms: time::epoch_millis() - 120_000,
    };
    fs::write(
        marker_path_for(&path),
        serde_json::to_string(&abandoned).expect("json"),
    )
    .expect("write marker");

    let barrier = Arc::new(Barrier::new(WRITERS));
    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store
                    .append(&Decision::new(&format!("w{}", i), "after crash", "r"))
                    .expect("append")
            })
        })
        .collect();
    let mut counts: Vec<u64> = handles
        .into_iter()
        .map(|h| h.join().expect("join"))
        .collect();
    counts.sort();
    let expected: Vec<u64> = (1..=WRITERS as u64).map(|i| i * 4).collect();
    assert_eq!(counts, expected);

    let text = fs::read_to_string(&path).expect("read");
    let numbers: Vec<u64> = text
        .lines()
        .map(|line| split_line_number(line).expect("numbered").0)
        .collect();
    assert_eq!(numbers, (1..=4 * WRITERS as u64).collect::<Vec<_>>());
    assert!(store.verify(RecordKind::Decisions).expect("verify").is_clean());
    assert!(!marker_path_for(&path).exists());
}

#[test]
fn invalid_records_are_rejected_before_any_io() {
    let tmp = tempdir().expect("tempdir");
    let store = open_store(tmp.path());

    let missing = Record::new(RecordKind::Insights, "i1").field("category", "x");
    assert!(matches!(
        store.append(&missing),
        Err(MemlogError::ValidationError(_))
    ));
    let bad_ts = Decision::new("d1", "a", "b")
        .to_record()
        .with_timestamp("yesterday");
    assert!(matches!(
        store.append(&bad_ts),
        Err(MemlogError::ValidationError(_))
    ));
    assert!(!store.file_path(RecordKind::Insights).exists());
    assert!(!store.file_path(RecordKind::Decisions).exists());
}
