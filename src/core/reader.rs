//! Read path: indexed (whole file in memory) or streaming (fixed-size chunks).
//!
//! Both modes feed the same line processor, so they return identical sections
//! for the same bytes. Malformed, orphaned and tampered lines are skipped and
//! logged; they never abort a read. An unterminated final line is treated as
//! an in-flight write and skipped.

use crate::core::config::MemlogConfig;
use crate::core::encoder::{self, LineEncoder};
use crate::core::error::MemlogError;
use crate::core::format::{Section, SectionAssembler, kind_from_tag, parse_line, split_line_number};
use crate::core::path_guard::{self, PathGuard};
use crate::core::schemas::RecordKind;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs;
use std::io::{ErrorKind, Read};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Pick by file size against `index_threshold_bytes`.
    #[default]
    Auto,
    Indexed,
    Streaming,
}

impl std::fmt::Display for ReadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReadMode::Auto => "auto",
            ReadMode::Indexed => "indexed",
            ReadMode::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// Shared flag checked between chunks (streaming) or sections (indexed).
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadStats {
    pub mode: ReadMode,
    pub bytes_read: u64,
    pub lines: u64,
    pub sections: u64,
    pub skipped_lines: u64,
    pub integrity_failures: u64,
    pub out_of_order: u64,
    /// Largest amount of file data held at once, including the open section.
    pub peak_buffer_bytes: u64,
    pub stopped_early: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    LineRegression,
    DuplicateLine,
    OrphanField,
    MalformedLine,
    UnknownType,
    IntegrityFailure,
    InvalidUtf8,
    TornTail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    /// 1-based physical line in the file (not the stored line number).
    pub physical_line: u64,
    pub kind: IssueKind,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub path: PathBuf,
    pub stats: ReadStats,
    pub issues: Vec<Issue>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }
}

pub struct HistoryReader {
    path: PathBuf,
    mode: ReadMode,
    chunk_size: usize,
    index_threshold: u64,
    encoder: Option<LineEncoder>,
    last_stats: Mutex<ReadStats>,
}

impl HistoryReader {
    pub fn open(
        guard: &PathGuard,
        path: impl AsRef<Path>,
        config: &MemlogConfig,
    ) -> Result<Self, MemlogError> {
        let path = guard.validate(path)?;
        let encoder = config.encoder_key().map(LineEncoder::new).transpose()?;
        Ok(Self {
            path,
            mode: ReadMode::Auto,
            chunk_size: config.chunk_size.max(crate::core::config::MIN_CHUNK_SIZE),
            index_threshold: config.index_threshold_bytes,
            encoder,
            last_stats: Mutex::new(ReadStats::default()),
        })
    }

    /// Force a read mode instead of the size check.
    pub fn with_mode(mut self, mode: ReadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stats of the most recent scan.
    pub fn stats(&self) -> ReadStats {
        self.last_stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// The mode the next scan will use. A missing file reads as empty in indexed mode.
    pub fn resolved_mode(&self) -> Result<ReadMode, MemlogError> {
        if self.mode != ReadMode::Auto {
            return Ok(self.mode);
        }
        match fs::metadata(&self.path) {
            Ok(meta) if meta.len() >= self.index_threshold => Ok(ReadMode::Streaming),
            Ok(_) => Ok(ReadMode::Indexed),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(ReadMode::Indexed),
            Err(err) => Err(MemlogError::IoError(err)),
        }
    }

    pub fn stream_sections(
        &self,
        on_section: impl FnMut(Section) -> ControlFlow<()>,
    ) -> Result<ReadStats, MemlogError> {
        self.stream_sections_with(&CancelToken::new(), on_section)
    }

    /// Emit each completed section in file order. Stops when the callback
    /// breaks or `cancel` is set.
    pub fn stream_sections_with(
        &self,
        cancel: &CancelToken,
        mut on_section: impl FnMut(Section) -> ControlFlow<()>,
    ) -> Result<ReadStats, MemlogError> {
        let (stats, _) = self.scan(None, cancel, false, &mut on_section)?;
        Ok(stats)
    }

    /// The last `n` sections of `kind`, oldest first.
    pub fn get_last_n(&self, kind: RecordKind, n: usize) -> Result<Vec<Section>, MemlogError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut window: VecDeque<Section> = VecDeque::with_capacity(n.min(1024));
        self.stream_sections(|section| {
            if section.record.kind == kind {
                if window.len() == n {
                    window.pop_front();
                }
                window.push_back(section);
            }
            ControlFlow::Continue(())
        })?;
        Ok(window.into())
    }

    pub fn get_by_filter(
        &self,
        mut predicate: impl FnMut(&Section) -> bool,
    ) -> Result<Vec<Section>, MemlogError> {
        let mut out = Vec::new();
        self.stream_sections(|section| {
            if predicate(&section) {
                out.push(section);
            }
            ControlFlow::Continue(())
        })?;
        Ok(out)
    }

    /// Latest section with this id. Appends never update in place, so the
    /// newest copy wins.
    pub fn get_by_id(&self, kind: RecordKind, id: &str) -> Result<Option<Section>, MemlogError> {
        let mut found = None;
        self.stream_sections(|section| {
            if section.record.kind == kind && section.record.id == id {
                found = Some(section);
            }
            ControlFlow::Continue(())
        })?;
        Ok(found)
    }

    pub fn count_sections(&self) -> Result<u64, MemlogError> {
        let stats = self.stream_sections(|_| ControlFlow::Continue(()))?;
        Ok(stats.sections)
    }

    /// Full structural check of the file. Always streams; never mutates.
    pub fn verify(&self) -> Result<VerifyReport, MemlogError> {
        let (stats, issues) = self.scan(
            Some(ReadMode::Streaming),
            &CancelToken::new(),
            true,
            &mut |_| ControlFlow::Continue(()),
        )?;
        Ok(VerifyReport {
            path: self.path.clone(),
            stats,
            issues,
        })
    }

    fn scan(
        &self,
        mode: Option<ReadMode>,
        cancel: &CancelToken,
        collect_issues: bool,
        on_section: &mut dyn FnMut(Section) -> ControlFlow<()>,
    ) -> Result<(ReadStats, Vec<Issue>), MemlogError> {
        let mode = match mode {
            Some(mode) => mode,
            None => self.resolved_mode()?,
        };
        let mut processor = LineProcessor::new(self.encoder.as_ref(), collect_issues);
        processor.stats.mode = mode;

        let outcome = match mode {
            ReadMode::Streaming => self.scan_streaming(cancel, &mut processor, on_section),
            _ => self.scan_indexed(cancel, &mut processor, on_section),
        };
        match outcome {
            Ok(()) => {}
            Err(MemlogError::IoError(err)) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }

        if !processor.stats.stopped_early {
            if let Some(section) = processor.finish() {
                let _ = on_section(section);
            }
        }
        let (stats, issues) = processor.into_parts();
        debug!(
            path = %self.path.display(),
            mode = %stats.mode,
            sections = stats.sections,
            skipped = stats.skipped_lines,
            "scan complete"
        );
        if let Ok(mut slot) = self.last_stats.lock() {
            *slot = stats.clone();
        }
        Ok((stats, issues))
    }

    fn scan_indexed(
        &self,
        cancel: &CancelToken,
        processor: &mut LineProcessor<'_>,
        on_section: &mut dyn FnMut(Section) -> ControlFlow<()>,
    ) -> Result<(), MemlogError> {
        let mut bytes = Vec::new();
        path_guard::open_read(&self.path)
            .and_then(|mut file| file.read_to_end(&mut bytes))
            .map_err(MemlogError::IoError)?;
        processor.stats.bytes_read = bytes.len() as u64;
        processor.stats.peak_buffer_bytes = bytes.len() as u64;

        let mut rest: &[u8] = &bytes;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            if cancel.is_cancelled() {
                processor.stats.stopped_early = true;
                return Ok(());
            }
            if let Some(section) = processor.feed(&rest[..pos]) {
                if on_section(section).is_break() {
                    processor.stats.stopped_early = true;
                    return Ok(());
                }
            }
            rest = &rest[pos + 1..];
        }
        if !rest.is_empty() {
            processor.torn_tail(rest.len());
        }
        Ok(())
    }

    fn scan_streaming(
        &self,
        cancel: &CancelToken,
        processor: &mut LineProcessor<'_>,
        on_section: &mut dyn FnMut(Section) -> ControlFlow<()>,
    ) -> Result<(), MemlogError> {
        let mut file = path_guard::open_read(&self.path).map_err(MemlogError::IoError)?;
        let mut chunk = vec![0u8; self.chunk_size];
        let mut partial: Vec<u8> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                processor.stats.stopped_early = true;
                return Ok(());
            }
            let n = match file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(MemlogError::IoError(err)),
            };
            processor.stats.bytes_read += n as u64;

            let mut start = 0usize;
            while let Some(offset) = chunk[start..n].iter().position(|b| *b == b'\n') {
                let end = start + offset;
                let emitted = if partial.is_empty() {
                    processor.feed(&chunk[start..end])
                } else {
                    partial.extend_from_slice(&chunk[start..end]);
                    let line = std::mem::take(&mut partial);
                    let emitted = processor.feed(&line);
                    partial = line;
                    partial.clear();
                    emitted
                };
                start = end + 1;
                if let Some(section) = emitted {
                    if on_section(section).is_break() {
                        processor.stats.stopped_early = true;
                        return Ok(());
                    }
                }
            }
            partial.extend_from_slice(&chunk[start..n]);

            let held = (self.chunk_size + partial.len() + processor.pending_bytes()) as u64;
            processor.stats.peak_buffer_bytes = processor.stats.peak_buffer_bytes.max(held);
        }

        if !partial.is_empty() {
            processor.torn_tail(partial.len());
        }
        Ok(())
    }
}

/// Per-line decoding, parsing and section assembly shared by both modes.
struct LineProcessor<'a> {
    encoder: Option<&'a LineEncoder>,
    assembler: SectionAssembler,
    stats: ReadStats,
    last_number: Option<u64>,
    physical: u64,
    issues: Option<Vec<Issue>>,
}

impl<'a> LineProcessor<'a> {
    fn new(encoder: Option<&'a LineEncoder>, collect_issues: bool) -> Self {
        Self {
            encoder,
            assembler: SectionAssembler::new(),
            stats: ReadStats::default(),
            last_number: None,
            physical: 0,
            issues: collect_issues.then(Vec::new),
        }
    }

    fn pending_bytes(&self) -> usize {
        self.assembler.pending_bytes()
    }

    fn report(&mut self, kind: IssueKind, detail: String) {
        if let Some(issues) = self.issues.as_mut() {
            issues.push(Issue {
                physical_line: self.physical,
                kind,
                detail,
            });
        }
    }

    fn skip(&mut self, kind: IssueKind, detail: String) {
        self.stats.skipped_lines += 1;
        warn!(line = self.physical, issue = ?kind, "{}", detail);
        self.report(kind, detail);
    }

    fn feed(&mut self, raw: &[u8]) -> Option<Section> {
        self.physical += 1;
        self.stats.lines += 1;

        let Ok(text) = std::str::from_utf8(raw) else {
            self.skip(IssueKind::InvalidUtf8, "line is not valid UTF-8".to_string());
            return None;
        };
        let text = text.strip_suffix('\r').unwrap_or(text);
        if text.trim().is_empty() {
            return None;
        }

        let decoded = match self.encoder {
            Some(enc) => match enc.decode_or_plain(text) {
                Ok(line) => line,
                Err(err) => {
                    self.stats.integrity_failures += 1;
                    self.skip(IssueKind::IntegrityFailure, err.to_string());
                    return None;
                }
            },
            None if encoder::is_encoded(text) => {
                self.stats.integrity_failures += 1;
                self.skip(
                    IssueKind::IntegrityFailure,
                    "encoded line but no encoder key configured".to_string(),
                );
                return None;
            }
            None => std::borrow::Cow::Borrowed(text),
        };

        let line = match parse_line(&decoded) {
            Ok(line) => line,
            Err(err) => {
                let kind = if is_unknown_header(&decoded) {
                    IssueKind::UnknownType
                } else {
                    IssueKind::MalformedLine
                };
                self.skip(kind, err.to_string());
                return None;
            }
        };

        if let Some(prev) = self.last_number {
            if line.number <= prev {
                let kind = if line.number == prev {
                    IssueKind::DuplicateLine
                } else {
                    IssueKind::LineRegression
                };
                warn!(line = self.physical, number = line.number, previous = prev, "line number did not increase");
                self.report(kind, format!("line number {} after {}", line.number, prev));
            }
        }
        self.last_number = Some(line.number);

        match self.assembler.push(line) {
            Ok(Some(section)) => {
                self.stats.sections += 1;
                Some(section)
            }
            Ok(None) => None,
            Err(err) => {
                self.skip(IssueKind::OrphanField, err.to_string());
                None
            }
        }
    }

    fn torn_tail(&mut self, len: usize) {
        self.physical += 1;
        self.stats.lines += 1;
        self.stats.skipped_lines += 1;
        debug!(bytes = len, "skipping unterminated final line");
        self.report(
            IssueKind::TornTail,
            format!("final line of {} bytes has no newline", len),
        );
    }

    fn finish(&mut self) -> Option<Section> {
        let section = self.assembler.finish();
        if section.is_some() {
            self.stats.sections += 1;
        }
        section
    }

    fn into_parts(mut self) -> (ReadStats, Vec<Issue>) {
        self.stats.out_of_order = self.assembler.out_of_order();
        (self.stats, self.issues.unwrap_or_default())
    }
}

fn is_unknown_header(line: &str) -> bool {
    split_line_number(line)
        .and_then(|(_, rest)| rest.strip_prefix('@'))
        .and_then(|header| header.split_once(':'))
        .map(|(tag, _)| kind_from_tag(tag).is_none())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::{Decision, ToRecord};
    use crate::core::writer::HistoryWriter;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, PathGuard, MemlogConfig) {
        let tmp = tempdir().unwrap();
        let guard = PathGuard::new(tmp.path()).unwrap();
        let mut config = MemlogConfig::for_root(tmp.path());
        config.fsync = false;
        config.chunk_size = 64;
        (tmp, guard, config)
    }

    fn write_decisions(guard: &PathGuard, config: &MemlogConfig, count: usize) -> PathBuf {
        let writer = HistoryWriter::new(guard, "decisions.log", config).unwrap();
        for i in 1..=count {
            let mut decision = Decision::new(
                &format!("d{}", i),
                &format!("decision {} | with pipe", i),
                "line one\nline two",
            );
            decision.metadata.insert("agent".into(), "planner".into());
            writer.add_decision(&decision).unwrap();
        }
        writer.path().to_path_buf()
    }

    #[test]
    fn test_last_n_returns_most_recent_in_file_order() {
        let (_tmp, guard, config) = setup();
        write_decisions(&guard, &config, 3);
        let reader = HistoryReader::open(&guard, "decisions.log", &config).unwrap();

        let last = reader.get_last_n(RecordKind::Decisions, 2).unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].record.id, "d2");
        assert_eq!(last[1].record.id, "d3");
        let fields: Vec<&str> = last[1].record.fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(fields, ["decision", "rationale"]);
        assert_eq!(last[1].record.get("decision"), Some("decision 3 | with pipe"));
        assert_eq!(last[1].record.get("rationale"), Some("line one\nline two"));
        assert_eq!(last[1].record.metadata.get("agent").map(String::as_str), Some("planner"));

        assert!(reader.get_last_n(RecordKind::State, 2).unwrap().is_empty());
        assert!(reader.get_last_n(RecordKind::Decisions, 0).unwrap().is_empty());
    }

    #[test]
    fn test_modes_return_identical_sections() {
        let (_tmp, guard, config) = setup();
        write_decisions(&guard, &config, 25);

        let indexed = HistoryReader::open(&guard, "decisions.log", &config)
            .unwrap()
            .with_mode(ReadMode::Indexed);
        let streaming = HistoryReader::open(&guard, "decisions.log", &config)
            .unwrap()
            .with_mode(ReadMode::Streaming);

        let a = indexed.get_by_filter(|_| true).unwrap();
        let b = streaming.get_by_filter(|_| true).unwrap();
        assert_eq!(a.len(), 25);
        assert_eq!(a, b);
        assert_eq!(indexed.stats().mode, ReadMode::Indexed);
        assert_eq!(streaming.stats().mode, ReadMode::Streaming);
        assert!(streaming.stats().peak_buffer_bytes < indexed.stats().peak_buffer_bytes);
    }

    #[test]
    fn test_auto_mode_uses_size_threshold() {
        let (_tmp, guard, mut config) = setup();
        write_decisions(&guard, &config, 2);
        config.index_threshold_bytes = 1;
        let reader = HistoryReader::open(&guard, "decisions.log", &config).unwrap();
        assert_eq!(reader.resolved_mode().unwrap(), ReadMode::Streaming);
        config.index_threshold_bytes = 1 << 20;
        let reader = HistoryReader::open(&guard, "decisions.log", &config).unwrap();
        assert_eq!(reader.resolved_mode().unwrap(), ReadMode::Indexed);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let (_tmp, guard, config) = setup();
        let reader = HistoryReader::open(&guard, "nothing.log", &config).unwrap();
        assert_eq!(reader.count_sections().unwrap(), 0);
        assert!(reader.get_by_id(RecordKind::Decisions, "d1").unwrap().is_none());
    }

    #[test]
    fn test_callback_can_stop_early_and_cancel_stops_reading() {
        let (_tmp, guard, config) = setup();
        write_decisions(&guard, &config, 10);
        let reader = HistoryReader::open(&guard, "decisions.log", &config)
            .unwrap()
            .with_mode(ReadMode::Streaming);

        let mut seen = 0;
        let stats = reader
            .stream_sections(|_| {
                seen += 1;
                if seen == 3 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(seen, 3);
        assert!(stats.stopped_early);

        let cancel = CancelToken::new();
        let mut seen = 0;
        let stats = reader
            .stream_sections_with(&cancel, |_| {
                seen += 1;
                cancel.cancel();
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(seen, 1);
        assert!(stats.stopped_early);
        assert!(stats.bytes_read < fs::metadata(reader.path()).unwrap().len());
    }

    #[test]
    fn test_get_by_id_returns_latest_copy() {
        let (_tmp, guard, config) = setup();
        let writer = HistoryWriter::new(&guard, "decisions.log", &config).unwrap();
        writer.add_decision(&Decision::new("d1", "first", "r")).unwrap();
        writer.add_decision(&Decision::new("d2", "other", "r")).unwrap();
        writer.add_decision(&Decision::new("d1", "revised", "r")).unwrap();

        let reader = HistoryReader::open(&guard, "decisions.log", &config).unwrap();
        let latest = reader.get_by_id(RecordKind::Decisions, "d1").unwrap().unwrap();
        assert_eq!(latest.record.get("decision"), Some("revised"));
        assert_eq!(latest.start_line, 9);
        assert_eq!(reader.count_sections().unwrap(), 3);
    }

    #[test]
    fn test_hand_edited_file_is_tolerated_and_verified() {
        let (tmp, guard, config) = setup();
        let path = tmp.path().join("decisions.log");
        let mut file = File::create(&path).unwrap();
        write!(
            file,
            "1|orphan=field\n\
             2|@DECISIONS:d1\n\
             3|decision=a\n\
             3|rationale=dup number\n\
             garbage line\n\
             5|@NOTES:n1\n\
             6|@DECISIONS:d2\n\
             2|decision=regressed\n\
             8|rationale=partial"
        )
        .unwrap();
        drop(file);

        for mode in [ReadMode::Indexed, ReadMode::Streaming] {
            let reader = HistoryReader::open(&guard, &path, &config).unwrap().with_mode(mode);
            let sections = reader.get_by_filter(|_| true).unwrap();
            assert_eq!(sections.len(), 2, "{}", mode);
            assert_eq!(sections[0].record.get("rationale"), Some("dup number"));
            assert_eq!(sections[1].record.get("decision"), Some("regressed"));
            assert_eq!(sections[1].record.get("rationale"), None);
            let stats = reader.stats();
            assert_eq!(stats.skipped_lines, 4);
            assert_eq!(stats.out_of_order, 2);
        }

        let reader = HistoryReader::open(&guard, &path, &config).unwrap();
        let report = reader.verify().unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.count(IssueKind::OrphanField), 1);
        assert_eq!(report.count(IssueKind::DuplicateLine), 1);
        assert_eq!(report.count(IssueKind::LineRegression), 1);
        assert_eq!(report.count(IssueKind::MalformedLine), 1);
        assert_eq!(report.count(IssueKind::UnknownType), 1);
        assert_eq!(report.count(IssueKind::TornTail), 1);
    }

    #[test]
    fn test_clean_file_verifies_clean() {
        let (_tmp, guard, config) = setup();
        write_decisions(&guard, &config, 4);
        let reader = HistoryReader::open(&guard, "decisions.log", &config).unwrap();
        let report = reader.verify().unwrap();
        assert!(report.is_clean(), "{:?}", report.issues);
        assert_eq!(report.stats.sections, 4);
    }

    #[test]
    fn test_hybrid_file_and_tampered_lines() {
        let (tmp, guard, mut config) = setup();
        let path = tmp.path().join("decisions.log");
        fs::write(&path, "1|@DECISIONS:plain\n2|decision=old\n3|rationale=pre-migration\n").unwrap();

        config.encoder.enabled = true;
        config.encoder.key = Some("migration-key".into());
        let writer = HistoryWriter::new(&guard, &path, &config).unwrap();
        writer.append_record(&Decision::new("enc", "new", "post").to_record()).unwrap();

        let reader = HistoryReader::open(&guard, &path, &config).unwrap();
        let sections = reader.get_by_filter(|_| true).unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].record.id, "plain");
        assert_eq!(sections[1].record.id, "enc");
        assert_eq!(sections[1].record.get("decision"), Some("new"));

        // Swap the payload of line 6 (decision) for line 7's: both tags now mismatch.
        let text = fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = text.lines().map(String::from).collect();
        let six = lines[5].split_once('|').unwrap().1.to_string();
        let seven = lines[6].split_once('|').unwrap().1.to_string();
        lines[5] = format!("6|{}", seven);
        lines[6] = format!("7|{}", six);
        fs::write(&path, lines.join("\n") + "\n").unwrap();

        let sections = reader.get_by_filter(|_| true).unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].record.get("decision"), None);
        assert_eq!(reader.stats().integrity_failures, 2);

        let keyless = HistoryReader::open(&guard, &path, &MemlogConfig::for_root(tmp.path())).unwrap();
        assert_eq!(keyless.count_sections().unwrap(), 1);
        assert_eq!(keyless.stats().integrity_failures, 4);
    }
}
