//! memlog: append-only history storage for long-running agents.
//!
//! Records (conversations, decisions, insights, state snapshots, sessions,
//! embeddings, consolidations) are persisted as line-numbered, pipe-delimited
//! text, one file per kind:
//!
//! ```text
//! 1|@DECISIONS:d1
//! 2|timestamp=2026-01-01T00:00:00.000Z
//! 3|decision=Use append-only files
//! 4|rationale=No in-place mutation \| simple recovery
//! ```
//!
//! # Guarantees
//!
//! - Writes to one file are serialized across processes by a lock marker
//!   file; a marker abandoned by a dead process is reclaimed after
//!   `stale_lock_secs`.
//! - Line numbers strictly increase and always continue from what is on disk.
//! - Values are escaped so they cannot break a line or forge a header.
//! - Reads skip malformed lines instead of failing, and large files are
//!   streamed in fixed-size chunks.
//! - Paths are confined to the configured root.
//!
//! PII redaction and the line encoder are best-effort guard rails. Neither is
//! a compliance control or encryption at rest.
//!
//! # Example
//!
//! ```no_run
//! use memlog::core::config::MemlogConfig;
//! use memlog::core::record::Decision;
//! use memlog::core::schemas::RecordKind;
//! use memlog::core::store::Store;
//!
//! let store = Store::open(MemlogConfig::load(std::path::Path::new("."))?)?;
//! store.append(&Decision::new("d1", "Use append-only files", "Simple recovery"))?;
//! let recent = store.reader(RecordKind::Decisions)?.get_last_n(RecordKind::Decisions, 5)?;
//! # Ok::<(), memlog::core::error::MemlogError>(())
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: the storage engine (config, guard, sanitizer, PII, lock, writer, reader, encoder)
//! - `cli`: clap definitions for the `memlog` binary

mod cli;
pub mod core;

use crate::cli::{Cli, Command, LockCommand};
use crate::core::config::{self, MemlogConfig};
use crate::core::error::MemlogError;
use crate::core::format::Section;
use crate::core::output;
use crate::core::record::Record;
use crate::core::schemas::RecordKind;
use crate::core::store::Store;
use crate::core::writer::WriteOptions;
use clap::Parser;
use serde::Serialize;
use std::time::Duration;

/// Parse arguments and dispatch. Returns the process exit status.
pub fn run() -> Result<u8, MemlogError> {
    let cli = Cli::parse();
    let root = config::resolve_root(cli.root)?;
    let config = MemlogConfig::load(&root)?;

    match cli.command {
        Command::Redact { text } => {
            println!("{}", to_json(&config.pii_detector()?.redact(&text))?);
            Ok(0)
        }
        Command::Append(args) => {
            let store = Store::open(config)?;
            let mut record = Record::new(args.kind, args.id);
            if let Some(ts) = args.timestamp {
                record = record.with_timestamp(ts);
            }
            for (key, value) in args.fields {
                record.set(key, value);
            }
            for (key, value) in args.metadata {
                record.metadata.insert(key, value);
            }
            let options = WriteOptions {
                redact_pii: store.config().redact_pii && !args.no_redact,
                lock_timeout: args
                    .lock_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| store.config().lock_timeout()),
            };
            let count = store.append_with(&record, &options)?;
            println!("{}", count);
            Ok(0)
        }
        Command::Last(args) => {
            let store = Store::open(config)?;
            let sections = store
                .reader(args.kind)?
                .get_last_n(args.kind, args.count)?;
            print_sections(&sections, &args.format)?;
            Ok(0)
        }
        Command::Filter(args) => {
            let store = Store::open(config)?;
            let kind = args.kind;
            let sections = store.reader(kind)?.get_by_filter(|section| {
                let record = &section.record;
                record.kind == kind
                    && args
                        .fields
                        .iter()
                        .all(|(k, v)| record.get(k) == Some(v.as_str()))
                    && args
                        .contains
                        .as_deref()
                        .map(|needle| record.contains_text(needle))
                        .unwrap_or(true)
            })?;
            print_sections(&sections, &args.format)?;
            Ok(0)
        }
        Command::Verify { kind, format } => {
            let store = Store::open(config)?;
            let mut reports = Vec::new();
            for kind in selected_kinds(&store, kind) {
                reports.push(store.verify(kind)?);
            }
            if is_json(&format)? {
                println!("{}", to_json(&reports)?);
            } else if reports.is_empty() {
                println!("no data files under {}", store.data_dir().display());
            } else {
                for report in &reports {
                    print!("{}", output::render_verify(report));
                }
            }
            Ok(if reports.iter().all(|r| r.is_clean()) { 0 } else { 1 })
        }
        Command::Stats { kind, format } => {
            let store = Store::open(config)?;
            let mut rows = Vec::new();
            for kind in selected_kinds(&store, kind) {
                let reader = store.reader(kind)?;
                reader.count_sections()?;
                rows.push(StatsRow {
                    kind,
                    line_count: store.writer(kind)?.line_count(),
                    stats: reader.stats(),
                });
            }
            if is_json(&format)? {
                println!("{}", to_json(&rows)?);
            } else {
                for row in &rows {
                    print!("{}", output::render_stats(row.kind.tag(), &row.stats));
                }
            }
            Ok(0)
        }
        Command::Lock(lock) => match lock.command {
            LockCommand::Status { kind } => {
                let store = Store::open(config)?;
                match store.lock_status(kind)? {
                    Some(status) => println!("{}", to_json(&status)?),
                    None => println!("unlocked"),
                }
                Ok(0)
            }
        },
    }
}

#[derive(Serialize)]
struct StatsRow {
    kind: RecordKind,
    line_count: u64,
    stats: crate::core::reader::ReadStats,
}

/// An explicit kind, or every kind whose data file exists.
fn selected_kinds(store: &Store, kind: Option<RecordKind>) -> Vec<RecordKind> {
    match kind {
        Some(kind) => vec![kind],
        None => RecordKind::ALL
            .into_iter()
            .filter(|k| store.file_path(*k).exists())
            .collect(),
    }
}

fn is_json(format: &str) -> Result<bool, MemlogError> {
    match format {
        "json" => Ok(true),
        "text" => Ok(false),
        other => Err(MemlogError::ValidationError(format!(
            "unknown output format '{}' (expected 'text' or 'json')",
            other
        ))),
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, MemlogError> {
    serde_json::to_string_pretty(value).map_err(|e| MemlogError::ValidationError(e.to_string()))
}

fn print_sections(sections: &[Section], format: &str) -> Result<(), MemlogError> {
    if is_json(format)? {
        println!("{}", to_json(sections)?);
    } else {
        print!("{}", output::render_sections(sections));
    }
    Ok(())
}
