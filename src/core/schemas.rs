//! Centralized record schema definitions.
//!
//! memlog persists seven record kinds, one data file per kind under the data
//! directory. Each kind carries a small field table used for write-time
//! validation; there is no schema versioning beyond these presence and type
//! checks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of section tags that may appear in a `@TYPE:id` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordKind {
    Conversation,
    State,
    Insights,
    Decisions,
    Session,
    Embedding,
    Consolidation,
}

impl RecordKind {
    pub const ALL: [RecordKind; 7] = [
        RecordKind::Conversation,
        RecordKind::State,
        RecordKind::Insights,
        RecordKind::Decisions,
        RecordKind::Session,
        RecordKind::Embedding,
        RecordKind::Consolidation,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            RecordKind::Conversation => "CONVERSATION",
            RecordKind::State => "STATE",
            RecordKind::Insights => "INSIGHTS",
            RecordKind::Decisions => "DECISIONS",
            RecordKind::Session => "SESSION",
            RecordKind::Embedding => "EMBEDDING",
            RecordKind::Consolidation => "CONSOLIDATION",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            RecordKind::Conversation => CONVERSATION_LOG_NAME,
            RecordKind::State => STATE_LOG_NAME,
            RecordKind::Insights => INSIGHTS_LOG_NAME,
            RecordKind::Decisions => DECISIONS_LOG_NAME,
            RecordKind::Session => SESSION_LOG_NAME,
            RecordKind::Embedding => EMBEDDING_LOG_NAME,
            RecordKind::Consolidation => CONSOLIDATION_LOG_NAME,
        }
    }

    pub fn rules(self) -> &'static [FieldRule] {
        match self {
            RecordKind::Conversation => CONVERSATION_FIELDS,
            RecordKind::State => STATE_FIELDS,
            RecordKind::Insights => INSIGHTS_FIELDS,
            RecordKind::Decisions => DECISIONS_FIELDS,
            RecordKind::Session => SESSION_FIELDS,
            RecordKind::Embedding => EMBEDDING_FIELDS,
            RecordKind::Consolidation => CONSOLIDATION_FIELDS,
        }
    }

    pub fn rule(self, field: &str) -> Option<&'static FieldRule> {
        self.rules().iter().find(|r| r.name == field)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    /// Accepts the header tag (`DECISIONS`) as well as the lowercase or
    /// singular CLI spelling (`decisions`, `decision`, `insight`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let kind = match upper.as_str() {
            "CONVERSATION" | "CONVERSATIONS" => RecordKind::Conversation,
            "STATE" | "STATES" => RecordKind::State,
            "INSIGHTS" | "INSIGHT" => RecordKind::Insights,
            "DECISIONS" | "DECISION" => RecordKind::Decisions,
            "SESSION" | "SESSIONS" => RecordKind::Session,
            "EMBEDDING" | "EMBEDDINGS" => RecordKind::Embedding,
            "CONSOLIDATION" | "CONSOLIDATIONS" => RecordKind::Consolidation,
            _ => return Err(format!("unknown record kind '{}'", s)),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CRITICAL" => Ok(Priority::Critical),
            "HIGH" => Ok(Priority::High),
            "MEDIUM" => Ok(Priority::Medium),
            "LOW" => Ok(Priority::Low),
            other => Err(format!(
                "invalid priority '{}'; must be one of CRITICAL, HIGH, MEDIUM, LOW",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldType {
    Text,
    Integer,
    /// Finite float within an inclusive range.
    Number { min: f64, max: f64 },
    Timestamp,
    Priority,
    /// Comma-separated list of record ids; must not be empty.
    IdList,
    /// Comma-separated list of finite floats.
    FloatList,
    Choice(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldRule {
    pub name: &'static str,
    pub required: bool,
    pub ty: FieldType,
}

const fn req(name: &'static str, ty: FieldType) -> FieldRule {
    FieldRule {
        name,
        required: true,
        ty,
    }
}

const fn opt(name: &'static str, ty: FieldType) -> FieldRule {
    FieldRule {
        name,
        required: false,
        ty,
    }
}

// --- Data files (one per kind) ---
pub const CONVERSATION_LOG_NAME: &str = "conversation.log";
pub const STATE_LOG_NAME: &str = "state.log";
pub const INSIGHTS_LOG_NAME: &str = "insights.log";
pub const DECISIONS_LOG_NAME: &str = "decisions.log";
pub const SESSION_LOG_NAME: &str = "session.log";
pub const EMBEDDING_LOG_NAME: &str = "embedding.log";
pub const CONSOLIDATION_LOG_NAME: &str = "consolidation.log";

/// Suffix appended to a data file name to form its lock marker.
pub const LOCK_SUFFIX: &str = "lock";

/// Reserved field written on every section.
pub const TIMESTAMP_FIELD: &str = "timestamp";
/// Prefix of metadata field keys (`meta.<key>=<value>`).
pub const META_PREFIX: &str = "meta.";

pub const DECISION_STATUSES: &[&str] = &["proposed", "accepted", "rejected", "superseded"];
pub const CONSOLIDATION_ACTIONS: &[&str] = &["merge", "supersede", "delete"];

const CONVERSATION_FIELDS: &[FieldRule] = &[
    req("session", FieldType::Text),
    req("summary", FieldType::Text),
    opt("messages", FieldType::Integer),
    opt("topics", FieldType::Text),
    opt("outcome", FieldType::Text),
];

const STATE_FIELDS: &[FieldRule] = &[
    req("snapshot", FieldType::Text),
    opt("phase", FieldType::Text),
    opt(
        "progress",
        FieldType::Number {
            min: 0.0,
            max: 100.0,
        },
    ),
];

const INSIGHTS_FIELDS: &[FieldRule] = &[
    req("category", FieldType::Text),
    req("content", FieldType::Text),
    req("priority", FieldType::Priority),
    opt("confidence", FieldType::Number { min: 0.0, max: 1.0 }),
    opt("source", FieldType::Text),
];

const DECISIONS_FIELDS: &[FieldRule] = &[
    req("decision", FieldType::Text),
    req("rationale", FieldType::Text),
    opt("priority", FieldType::Priority),
    opt("alternatives", FieldType::Text),
    opt("status", FieldType::Choice(DECISION_STATUSES)),
];

const SESSION_FIELDS: &[FieldRule] = &[
    req("started_at", FieldType::Timestamp),
    opt("ended_at", FieldType::Timestamp),
    opt("agent", FieldType::Text),
    opt("project", FieldType::Text),
    opt("message_count", FieldType::Integer),
];

const EMBEDDING_FIELDS: &[FieldRule] = &[
    req("model", FieldType::Text),
    req("dimensions", FieldType::Integer),
    req("vector", FieldType::FloatList),
    opt("source_id", FieldType::Text),
];

const CONSOLIDATION_FIELDS: &[FieldRule] = &[
    req("sources", FieldType::IdList),
    req("action", FieldType::Choice(CONSOLIDATION_ACTIONS)),
    opt("reason", FieldType::Text),
];
