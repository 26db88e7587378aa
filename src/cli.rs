//! CLI struct definitions for the memlog command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use crate::core::schemas::RecordKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "memlog",
    version = env!("CARGO_PKG_VERSION"),
    about = "Append-only, line-numbered history store for agent conversations, decisions and state."
)]
pub(crate) struct Cli {
    /// Project root. Defaults to $MEMLOG_ROOT, then the current directory.
    #[clap(long, global = true)]
    pub root: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Append one record to the file for its kind
    Append(AppendCli),
    /// Show the most recent records of a kind
    Last(LastCli),
    /// Show records matching field and text filters
    Filter(FilterCli),
    /// Check data files for structural and integrity problems
    Verify {
        /// Kind to verify (all existing files when omitted)
        kind: Option<RecordKind>,
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Line, section and byte counts per data file
    Stats {
        kind: Option<RecordKind>,
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Dry-run the PII redactor on a string (JSON output)
    Redact { text: String },
    /// Inspect lock markers
    Lock(LockCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct AppendCli {
    /// Record kind (e.g. decisions, insight, state)
    pub kind: RecordKind,
    #[clap(long)]
    pub id: String,
    /// Field as key=value; repeatable
    #[clap(long = "field", value_parser = parse_key_value)]
    pub fields: Vec<(String, String)>,
    /// Metadata as key=value; repeatable
    #[clap(long = "meta", value_parser = parse_key_value)]
    pub metadata: Vec<(String, String)>,
    /// RFC 3339 timestamp (defaults to now)
    #[clap(long)]
    pub timestamp: Option<String>,
    /// Skip PII redaction for this write
    #[clap(long)]
    pub no_redact: bool,
    /// Lock timeout in milliseconds (defaults to config)
    #[clap(long)]
    pub lock_timeout_ms: Option<u64>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct LastCli {
    pub kind: RecordKind,
    #[clap(short = 'n', long, default_value_t = 10)]
    pub count: usize,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct FilterCli {
    pub kind: RecordKind,
    /// Require field key=value (exact match); repeatable
    #[clap(long = "field", value_parser = parse_key_value)]
    pub fields: Vec<(String, String)>,
    /// Require this text somewhere in the id, fields or metadata
    #[clap(long)]
    pub contains: Option<String>,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct LockCli {
    #[clap(subcommand)]
    pub command: LockCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum LockCommand {
    /// Show the current holder of a data file's lock, if any
    Status { kind: RecordKind },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}
