//! Line and section codec for the pipe-delimited history format.
//!
//! ```text
//! 1|@DECISIONS:d1
//! 2|timestamp=2026-01-01T00:00:00.000Z
//! 3|decision=Use append-only files
//! 4|rationale=No in-place mutation \| simple recovery
//! 5|meta.agent=planner
//! ```
//!
//! Values on disk are sanitized; everything produced by this module for
//! callers is unescaped.

use crate::core::error::MemlogError;
use crate::core::record::Record;
use crate::core::sanitize::{sanitize, unescape};
use crate::core::schemas::{self, RecordKind};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineContent {
    Header { kind: RecordKind, id: String },
    Field { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub number: u64,
    pub content: LineContent,
}

/// One record's on-disk span plus its materialized value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub start_line: u64,
    pub end_line: u64,
    pub record: Record,
}

fn malformed(number: u64, reason: impl Into<String>) -> MemlogError {
    MemlogError::MalformedLine {
        line: number,
        reason: reason.into(),
    }
}

/// Header tags are matched exactly; lowercase spellings are a CLI convenience only.
pub fn kind_from_tag(tag: &str) -> Option<RecordKind> {
    RecordKind::ALL.into_iter().find(|k| k.tag() == tag)
}

/// Split `<n>|<rest>` and parse the line number. Returns `None` for anything
/// without a numeric prefix.
pub fn split_line_number(raw: &str) -> Option<(u64, &str)> {
    let (num, rest) = raw.split_once('|')?;
    if num.is_empty() || !num.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((num.parse().ok()?, rest))
}

/// Parse one plain (not encoded) line. `raw` must not contain the trailing newline.
pub fn parse_line(raw: &str) -> Result<ParsedLine, MemlogError> {
    let raw = raw.strip_suffix('\r').unwrap_or(raw);
    let (number, content) =
        split_line_number(raw).ok_or_else(|| malformed(0, "missing numeric line prefix"))?;

    if let Some(header) = content.strip_prefix('@') {
        let (tag, id) = header
            .split_once(':')
            .ok_or_else(|| malformed(number, "section header without ':'"))?;
        let kind =
            kind_from_tag(tag).ok_or_else(|| malformed(number, format!("unknown section type '{}'", tag)))?;
        let id = unescape(id);
        if id.trim().is_empty() {
            return Err(malformed(number, "section header with empty id"));
        }
        return Ok(ParsedLine {
            number,
            content: LineContent::Header {
                kind,
                id: id.into_owned(),
            },
        });
    }

    let (key, value) = content
        .split_once('=')
        .ok_or_else(|| malformed(number, "field line without '='"))?;
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(malformed(number, format!("invalid field key '{}'", key)));
    }
    Ok(ParsedLine {
        number,
        content: LineContent::Field {
            key: key.to_string(),
            value: unescape(value).into_owned(),
        },
    })
}

/// Render a record as numbered lines starting at `first_line`. Each entry is a
/// complete line without the trailing newline.
pub fn format_record(record: &Record, first_line: u64) -> Vec<String> {
    let mut lines = Vec::with_capacity(2 + record.fields.len() + record.metadata.len());
    let mut n = first_line;
    let mut push = |content: String| {
        lines.push(format!("{}|{}", n, content));
        n += 1;
    };

    push(format!("@{}:{}", record.kind.tag(), sanitize(&record.id)));
    push(format!(
        "{}={}",
        schemas::TIMESTAMP_FIELD,
        sanitize(&record.timestamp)
    ));
    for (key, value) in &record.fields {
        push(format!("{}={}", key, sanitize(value)));
    }
    for (key, value) in &record.metadata {
        push(format!("{}{}={}", schemas::META_PREFIX, key, sanitize(value)));
    }
    lines
}

/// Groups parsed lines into sections as their boundaries are seen.
#[derive(Debug, Default)]
pub struct SectionAssembler {
    current: Option<Section>,
    last_number: Option<u64>,
    out_of_order: u64,
}

impl SectionAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines whose number did not strictly increase. They are kept; hand-edited
    /// files are tolerated.
    pub fn out_of_order(&self) -> u64 {
        self.out_of_order
    }

    /// Feed one line. Returns the previous section when a new header closes it.
    /// A field line with no open section is an error the caller should skip.
    pub fn push(&mut self, line: ParsedLine) -> Result<Option<Section>, MemlogError> {
        if let Some(prev) = self.last_number {
            if line.number <= prev {
                self.out_of_order += 1;
            }
        }
        self.last_number = Some(line.number);

        match line.content {
            LineContent::Header { kind, id } => {
                let done = self.current.take();
                self.current = Some(Section {
                    start_line: line.number,
                    end_line: line.number,
                    record: Record {
                        kind,
                        id,
                        timestamp: String::new(),
                        fields: Vec::new(),
                        metadata: BTreeMap::new(),
                    },
                });
                Ok(done)
            }
            LineContent::Field { key, value } => {
                let Some(section) = self.current.as_mut() else {
                    return Err(malformed(line.number, "field line outside any section"));
                };
                section.end_line = line.number;
                let record = &mut section.record;
                if key == schemas::TIMESTAMP_FIELD {
                    record.timestamp = value;
                } else if let Some(meta_key) = key.strip_prefix(schemas::META_PREFIX) {
                    record.metadata.insert(meta_key.to_string(), value);
                } else {
                    record.set(key, value);
                }
                Ok(None)
            }
        }
    }

    /// Close the section still open at end of input.
    pub fn finish(&mut self) -> Option<Section> {
        self.current.take()
    }

    /// Bytes held by the in-progress section, for memory accounting.
    pub fn pending_bytes(&self) -> usize {
        self.current
            .as_ref()
            .map(|s| {
                s.record.id.len()
                    + s.record.timestamp.len()
                    + s.record
                        .fields
                        .iter()
                        .map(|(k, v)| k.len() + v.len())
                        .sum::<usize>()
                    + s.record
                        .metadata
                        .iter()
                        .map(|(k, v)| k.len() + v.len())
                        .sum::<usize>()
            })
            .unwrap_or(0)
    }
}

/// Parse a whole plain-text document, skipping malformed lines.
pub fn parse_sections(text: &str) -> Vec<Section> {
    let mut assembler = SectionAssembler::new();
    let mut out = Vec::new();
    for raw in text.lines() {
        if raw.trim().is_empty() {
            continue;
        }
        if let Ok(line) = parse_line(raw) {
            if let Ok(Some(section)) = assembler.push(line) {
                out.push(section);
            }
        }
    }
    out.extend(assembler.finish());
    out
}
