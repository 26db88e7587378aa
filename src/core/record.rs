//! The logical record model and its write-time validation.
//!
//! A `Record` is what callers hand to the writer and what the reader hands
//! back. Values here are always *unescaped*; escaping only exists on disk.

use crate::core::error::MemlogError;
use crate::core::schemas::{self, FieldType, Priority, RecordKind};
use crate::core::time;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub const MAX_ID_LEN: usize = 256;

static FIELD_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.\-]*$").unwrap());
static META_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub kind: RecordKind,
    pub id: String,
    pub timestamp: String,
    /// Type-specific fields in write order.
    pub fields: Vec<(String, String)>,
    pub metadata: BTreeMap<String, String>,
}

impl Record {
    pub fn new(kind: RecordKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            timestamp: time::now_rfc3339(),
            fields: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set a field, replacing an existing value in place so write order is kept.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Apply `f` to every user-supplied value (fields and metadata, not keys).
    /// Rewrite free-text values: `Text` fields, fields outside the schema,
    /// and metadata. Typed fields keep their value so they stay parseable.
    pub fn map_text_values(&self, mut f: impl FnMut(&str) -> String) -> Record {
        let kind = self.kind;
        Record {
            kind,
            id: self.id.clone(),
            timestamp: self.timestamp.clone(),
            fields: self
                .fields
                .iter()
                .map(|(k, v)| {
                    let free_text = kind
                        .rule(k)
                        .map(|rule| rule.ty == FieldType::Text)
                        .unwrap_or(true);
                    let value = if free_text { f(v) } else { v.clone() };
                    (k.clone(), value)
                })
                .collect(),
            metadata: self
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), f(v)))
                .collect(),
        }
    }

    /// True when any field or metadata value contains `needle`.
    pub fn contains_text(&self, needle: &str) -> bool {
        self.id.contains(needle)
            || self.fields.iter().any(|(_, v)| v.contains(needle))
            || self.metadata.values().any(|v| v.contains(needle))
    }

    /// Check presence and semantic types against the per-kind field table.
    pub fn validate(&self) -> Result<(), MemlogError> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(invalid(self.kind, "id must not be empty"));
        }
        if self.id.len() > MAX_ID_LEN {
            return Err(invalid(
                self.kind,
                &format!("id exceeds {} bytes", MAX_ID_LEN),
            ));
        }
        if !time::is_valid_timestamp(&self.timestamp) {
            return Err(invalid(
                self.kind,
                &format!("timestamp '{}' is not RFC 3339", self.timestamp),
            ));
        }

        let mut seen = Vec::with_capacity(self.fields.len());
        for (name, value) in &self.fields {
            if !FIELD_NAME_RE.is_match(name) {
                return Err(invalid(self.kind, &format!("invalid field name '{}'", name)));
            }
            if name == schemas::TIMESTAMP_FIELD || name.starts_with(schemas::META_PREFIX) {
                return Err(invalid(self.kind, &format!("field name '{}' is reserved", name)));
            }
            if seen.contains(&name.as_str()) {
                return Err(invalid(self.kind, &format!("duplicate field '{}'", name)));
            }
            seen.push(name.as_str());

            if let Some(rule) = self.kind.rule(name) {
                check_type(self.kind, name, value, rule.ty)?;
            }
        }

        for rule in self.kind.rules().iter().filter(|r| r.required) {
            match self.get(rule.name) {
                Some(v) if !v.trim().is_empty() => {}
                _ => {
                    return Err(invalid(
                        self.kind,
                        &format!("missing required field '{}'", rule.name),
                    ));
                }
            }
        }

        for key in self.metadata.keys() {
            if !META_KEY_RE.is_match(key) {
                return Err(invalid(self.kind, &format!("invalid metadata key '{}'", key)));
            }
        }

        if self.kind == RecordKind::Embedding {
            let dims: usize = self
                .get("dimensions")
                .and_then(|d| d.trim().parse().ok())
                .unwrap_or(0);
            let len = self.get("vector").map(split_list).map(|v| v.len()).unwrap_or(0);
            if dims != len {
                return Err(invalid(
                    self.kind,
                    &format!("vector has {} components but dimensions={}", len, dims),
                ));
            }
        }

        Ok(())
    }
}

fn invalid(kind: RecordKind, reason: &str) -> MemlogError {
    MemlogError::ValidationError(format!("{}: {}", kind, reason))
}

fn split_list(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn check_type(kind: RecordKind, name: &str, value: &str, ty: FieldType) -> Result<(), MemlogError> {
    let v = value.trim();
    let ok = match ty {
        FieldType::Text => true,
        FieldType::Integer => v.parse::<i64>().is_ok(),
        FieldType::Number { min, max } => v
            .parse::<f64>()
            .map(|n| n.is_finite() && n >= min && n <= max)
            .unwrap_or(false),
        FieldType::Timestamp => time::is_valid_timestamp(v),
        FieldType::Priority => v.parse::<Priority>().is_ok(),
        FieldType::IdList => !split_list(v).is_empty(),
        FieldType::FloatList => {
            let parts = split_list(v);
            !parts.is_empty()
                && parts
                    .iter()
                    .all(|p| p.parse::<f64>().map(f64::is_finite).unwrap_or(false))
        }
        FieldType::Choice(options) => options.contains(&v),
    };
    if ok {
        Ok(())
    } else {
        Err(invalid(
            kind,
            &format!("field '{}' has invalid value '{}' (expected {:?})", name, value, ty),
        ))
    }
}

/// Conversion from a typed record into the generic on-disk shape.
pub trait ToRecord {
    fn to_record(&self) -> Record;
}

fn base(kind: RecordKind, id: &str, timestamp: &Option<String>, metadata: &BTreeMap<String, String>) -> Record {
    let mut record = Record::new(kind, id);
    if let Some(ts) = timestamp {
        record.timestamp = ts.clone();
    }
    record.metadata = metadata.clone();
    record
}

fn push_opt(record: &mut Record, name: &str, value: Option<String>) {
    if let Some(v) = value {
        record.set(name, v);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub session: String,
    pub summary: String,
    pub messages: Option<u64>,
    pub topics: Vec<String>,
    pub outcome: Option<String>,
    pub timestamp: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl ToRecord for Conversation {
    fn to_record(&self) -> Record {
        let mut r = base(RecordKind::Conversation, &self.id, &self.timestamp, &self.metadata);
        r.set("session", self.session.clone());
        r.set("summary", self.summary.clone());
        push_opt(&mut r, "messages", self.messages.map(|m| m.to_string()));
        if !self.topics.is_empty() {
            r.set("topics", self.topics.join(","));
        }
        push_opt(&mut r, "outcome", self.outcome.clone());
        r
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub id: String,
    pub snapshot: String,
    pub phase: Option<String>,
    pub progress: Option<f64>,
    pub timestamp: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl ToRecord for StateSnapshot {
    fn to_record(&self) -> Record {
        let mut r = base(RecordKind::State, &self.id, &self.timestamp, &self.metadata);
        r.set("snapshot", self.snapshot.clone());
        push_opt(&mut r, "phase", self.phase.clone());
        push_opt(&mut r, "progress", self.progress.map(|p| p.to_string()));
        r
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub category: String,
    pub content: String,
    pub priority: Priority,
    pub confidence: Option<f64>,
    pub source: Option<String>,
    pub timestamp: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl ToRecord for Insight {
    fn to_record(&self) -> Record {
        let mut r = base(RecordKind::Insights, &self.id, &self.timestamp, &self.metadata);
        r.set("category", self.category.clone());
        r.set("content", self.content.clone());
        r.set("priority", self.priority.as_str());
        push_opt(&mut r, "confidence", self.confidence.map(|c| c.to_string()));
        push_opt(&mut r, "source", self.source.clone());
        r
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub decision: String,
    pub rationale: String,
    pub priority: Option<Priority>,
    pub alternatives: Vec<String>,
    pub status: Option<String>,
    pub timestamp: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl Decision {
    pub fn new(id: &str, decision: &str, rationale: &str) -> Self {
        Self {
            id: id.to_string(),
            decision: decision.to_string(),
            rationale: rationale.to_string(),
            priority: None,
            alternatives: Vec::new(),
            status: None,
            timestamp: None,
            metadata: BTreeMap::new(),
        }
    }
}

impl ToRecord for Decision {
    fn to_record(&self) -> Record {
        let mut r = base(RecordKind::Decisions, &self.id, &self.timestamp, &self.metadata);
        r.set("decision", self.decision.clone());
        r.set("rationale", self.rationale.clone());
        push_opt(&mut r, "priority", self.priority.map(|p| p.as_str().to_string()));
        if !self.alternatives.is_empty() {
            r.set("alternatives", self.alternatives.join(","));
        }
        push_opt(&mut r, "status", self.status.clone());
        r
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub agent: Option<String>,
    pub project: Option<String>,
    pub message_count: Option<u64>,
    pub timestamp: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl ToRecord for SessionRecord {
    fn to_record(&self) -> Record {
        let mut r = base(RecordKind::Session, &self.id, &self.timestamp, &self.metadata);
        r.set("started_at", self.started_at.clone());
        push_opt(&mut r, "ended_at", self.ended_at.clone());
        push_opt(&mut r, "agent", self.agent.clone());
        push_opt(&mut r, "project", self.project.clone());
        push_opt(&mut r, "message_count", self.message_count.map(|m| m.to_string()));
        r
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Embedding {
    pub id: String,
    pub model: String,
    pub vector: Vec<f32>,
    pub source_id: Option<String>,
    pub timestamp: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl ToRecord for Embedding {
    fn to_record(&self) -> Record {
        let mut r = base(RecordKind::Embedding, &self.id, &self.timestamp, &self.metadata);
        r.set("model", self.model.clone());
        r.set("dimensions", self.vector.len().to_string());
        r.set(
            "vector",
            self.vector
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(","),
        );
        push_opt(&mut r, "source_id", self.source_id.clone());
        r
    }
}

/// Logical merge/supersede/delete over earlier records. Originals stay on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Consolidation {
    pub id: String,
    pub sources: Vec<String>,
    pub action: String,
    pub reason: Option<String>,
    pub timestamp: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl ToRecord for Consolidation {
    fn to_record(&self) -> Record {
        let mut r = base(RecordKind::Consolidation, &self.id, &self.timestamp, &self.metadata);
        r.set("sources", self.sources.join(","));
        r.set("action", self.action.clone());
        push_opt(&mut r, "reason", self.reason.clone());
        r
    }
}

impl ToRecord for Record {
    fn to_record(&self) -> Record {
        self.clone()
    }
}
