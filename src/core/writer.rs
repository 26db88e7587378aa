//! Append path for one history file.
//!
//! validate → redact (optional) → lock → read the last line number from disk
//! → format (sanitize happens here) → encode (optional) → one `write_all` →
//! fsync → release. The in-memory line counter is informational; the next
//! number always comes from the file under the lock.

use crate::core::config::MemlogConfig;
use crate::core::encoder::LineEncoder;
use crate::core::error::MemlogError;
use crate::core::format::{format_record, split_line_number};
use crate::core::lock::LockManager;
use crate::core::path_guard::{self, PathGuard};
use crate::core::pii::PiiDetector;
use crate::core::record::{
    Consolidation, Conversation, Decision, Embedding, Insight, Record, SessionRecord,
    StateSnapshot, ToRecord,
};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const TAIL_BLOCK: u64 = 4096;

#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub redact_pii: bool,
    pub lock_timeout: Duration,
}

impl WriteOptions {
    pub fn from_config(config: &MemlogConfig) -> Self {
        Self {
            redact_pii: config.redact_pii,
            lock_timeout: config.lock_timeout(),
        }
    }
}

pub struct HistoryWriter {
    path: PathBuf,
    locks: LockManager,
    encoder: Option<LineEncoder>,
    detector: Arc<PiiDetector>,
    defaults: WriteOptions,
    fsync: bool,
    line_count: AtomicU64,
}

impl std::fmt::Debug for HistoryWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryWriter")
            .field("path", &self.path)
            .field("encoded", &self.encoder.is_some())
            .field("line_count", &self.line_count())
            .finish()
    }
}

impl HistoryWriter {
    /// Validates `path` once; nothing is created until the first append.
    pub fn new(
        guard: &PathGuard,
        path: impl AsRef<Path>,
        config: &MemlogConfig,
    ) -> Result<Self, MemlogError> {
        let path = guard.validate(path)?;
        let encoder = config.encoder_key().map(LineEncoder::new).transpose()?;
        let initial = match path_guard::open_read(&path) {
            Ok(mut file) => last_line_number(&mut file)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(err) => return Err(MemlogError::IoError(err)),
        };
        Ok(Self {
            path,
            locks: LockManager::new(config.stale_after()),
            encoder,
            detector: config.pii_detector()?,
            defaults: WriteOptions::from_config(config),
            fsync: config.fsync,
            line_count: AtomicU64::new(initial),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn defaults(&self) -> &WriteOptions {
        &self.defaults
    }

    /// Last line number this writer knows about. May lag other processes.
    pub fn line_count(&self) -> u64 {
        self.line_count.load(Ordering::Acquire)
    }

    pub fn append_conversation(&self, conversation: &Conversation) -> Result<u64, MemlogError> {
        self.append_record(&conversation.to_record())
    }

    pub fn save_state(&self, state: &StateSnapshot) -> Result<u64, MemlogError> {
        self.append_record(&state.to_record())
    }

    pub fn add_insight(&self, insight: &Insight) -> Result<u64, MemlogError> {
        self.append_record(&insight.to_record())
    }

    pub fn add_decision(&self, decision: &Decision) -> Result<u64, MemlogError> {
        self.append_record(&decision.to_record())
    }

    pub fn record_session(&self, session: &SessionRecord) -> Result<u64, MemlogError> {
        self.append_record(&session.to_record())
    }

    pub fn add_embedding(&self, embedding: &Embedding) -> Result<u64, MemlogError> {
        self.append_record(&embedding.to_record())
    }

    pub fn add_consolidation(&self, consolidation: &Consolidation) -> Result<u64, MemlogError> {
        self.append_record(&consolidation.to_record())
    }

    pub fn append_record(&self, record: &Record) -> Result<u64, MemlogError> {
        self.append_record_with(record, &self.defaults)
    }

    /// Append one record as a single block. Returns the file's line count
    /// after the append.
    pub fn append_record_with(
        &self,
        record: &Record,
        options: &WriteOptions,
    ) -> Result<u64, MemlogError> {
        record.validate()?;

        let record = if options.redact_pii {
            self.redact(record)?
        } else {
            record.clone()
        };

        let guard = self.locks.acquire(&self.path, options.lock_timeout)?;

        let mut file = path_guard::no_follow(OpenOptions::new().read(true).append(true).create(true))
            .open(&self.path)
            .map_err(MemlogError::IoError)?;

        let needs_newline = ends_without_newline(&mut file)?;
        let last = last_line_number(&mut file)?;
        let lines = format_record(&record, last + 1);

        let mut block = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum::<usize>() + 1);
        if needs_newline {
            warn!(path = %self.path.display(), after_line = last, "terminating torn final line");
            block.push('\n');
        }
        for line in &lines {
            match &self.encoder {
                Some(encoder) => block.push_str(&encoder.encode(line)?),
                None => block.push_str(line),
            }
            block.push('\n');
        }

        file.write_all(block.as_bytes())
            .map_err(MemlogError::IoError)?;
        if self.fsync {
            file.sync_data().map_err(MemlogError::IoError)?;
        }
        drop(file);
        self.locks.release(guard);

        let count = last + lines.len() as u64;
        self.line_count.store(count, Ordering::Release);
        debug!(
            path = %self.path.display(),
            kind = %record.kind,
            id = %record.id,
            first_line = last + 1,
            last_line = count,
            "appended record"
        );
        Ok(count)
    }

    /// Redact free-text values, then re-validate so a rewrite can never
    /// put an unparseable value on disk.
    fn redact(&self, record: &Record) -> Result<Record, MemlogError> {
        let mut types = BTreeSet::new();
        let redacted = record.map_text_values(|value| {
            let result = self.detector.redact(value);
            types.extend(result.types);
            result.text
        });
        if !types.is_empty() {
            debug!(kind = %record.kind, id = %record.id, types = ?types, "redacted PII before write");
        }
        redacted.validate()?;
        Ok(redacted)
    }
}

fn ends_without_newline(file: &mut File) -> Result<bool, MemlogError> {
    let len = file.seek(SeekFrom::End(0)).map_err(MemlogError::IoError)?;
    if len == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1)).map_err(MemlogError::IoError)?;
    file.read_exact(&mut last).map_err(MemlogError::IoError)?;
    Ok(last[0] != b'\n')
}

/// Scan backwards for the last line with a numeric prefix. A torn final line
/// still counts when its prefix survived, so numbers are never reused.
pub(crate) fn last_line_number(file: &mut File) -> Result<u64, MemlogError> {
    let mut pos = file.seek(SeekFrom::End(0)).map_err(MemlogError::IoError)?;
    let mut carry: Vec<u8> = Vec::new();

    while pos > 0 {
        let start = pos.saturating_sub(TAIL_BLOCK);
        let mut buf = vec![0u8; (pos - start) as usize];
        file.seek(SeekFrom::Start(start))
            .map_err(MemlogError::IoError)?;
        file.read_exact(&mut buf).map_err(MemlogError::IoError)?;
        buf.extend_from_slice(&carry);

        // Bytes before the first newline may continue into the previous block.
        let cut = if start == 0 {
            0
        } else {
            match buf.iter().position(|b| *b == b'\n') {
                Some(i) => i + 1,
                None => {
                    carry = buf;
                    pos = start;
                    continue;
                }
            }
        };

        for line in buf[cut..].rsplit(|b| *b == b'\n') {
            if let Some(number) = line_number_prefix(line) {
                return Ok(number);
            }
        }

        if start == 0 {
            break;
        }
        buf.truncate(cut - 1);
        carry = buf;
        pos = start;
    }
    Ok(0)
}

fn line_number_prefix(line: &[u8]) -> Option<u64> {
    let pipe = line.iter().position(|b| *b == b'|')?;
    let text = std::str::from_utf8(&line[..=pipe]).ok()?;
    split_line_number(text).map(|(n, _)| n)
}
