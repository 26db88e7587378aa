//! Best-effort PII and secret detection.
//!
//! Regex based, so false negatives are expected; this is a guard rail for
//! accidental leakage into history files, not a compliance control. Each
//! match is replaced with `[REDACTED-<TYPE>]`.

use crate::core::error::MemlogError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::{Arc, LazyLock};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "type")]
    pub kind: String,
    /// Byte range into the scanned text.
    pub span: Range<usize>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redaction {
    pub text: String,
    pub detections: Vec<Detection>,
    pub types: BTreeSet<String>,
}

impl Redaction {
    pub fn is_clean(&self) -> bool {
        self.detections.is_empty()
    }
}

struct PiiPattern {
    kind: String,
    regex: Regex,
    /// Extra check on the matched text, used to cut false positives.
    validator: Option<fn(&str) -> bool>,
}

pub struct PiiDetector {
    patterns: Vec<PiiPattern>,
}

static DEFAULT_DETECTOR: LazyLock<Arc<PiiDetector>> =
    LazyLock::new(|| Arc::new(PiiDetector::new()));

/// Handle to the built-in detector, compiled once per process.
pub fn shared_detector() -> Arc<PiiDetector> {
    Arc::clone(&DEFAULT_DETECTOR)
}

/// Scan with the built-in pattern set.
pub fn detect(text: &str) -> Vec<Detection> {
    DEFAULT_DETECTOR.detect(text)
}

/// Redact with the built-in pattern set.
pub fn redact(text: &str) -> Redaction {
    DEFAULT_DETECTOR.redact(text)
}

impl Default for PiiDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PiiDetector {
    /// Built-in detectors. When two matches start at the same offset the
    /// longer one wins; on equal length the earlier pattern wins.
    pub fn new() -> Self {
        let builtin: Vec<(&str, &str, Option<fn(&str) -> bool>)> = vec![
            (
                "PRIVATE_KEY",
                r"-----BEGIN (?:RSA |DSA |EC |OPENSSH )?PRIVATE KEY-----(?:[\s\S]*?-----END (?:RSA |DSA |EC |OPENSSH )?PRIVATE KEY-----)?",
                None,
            ),
            (
                "AWS_ACCESS_KEY",
                r"\b(?:A3T[A-Z0-9]|AKIA|AGPA|AIDA|AROA|AIPA|ANPA|ANVA|ASIA)[0-9A-Z]{16}\b",
                None,
            ),
            (
                "AWS_SECRET",
                r#"(?i)aws[_\-\s]?secret[_\-\s]?(?:access[_\-\s]?)?key['"]?\s*[:=]\s*['"]?[0-9A-Za-z/+=]{40}['"]?"#,
                None,
            ),
            (
                "GITHUB_TOKEN",
                r"\b(?:ghp|gho|ghu|ghs|ghr)_[A-Za-z0-9_]{36,255}\b",
                None,
            ),
            ("API_KEY", r"\bsk-[A-Za-z0-9_\-]{20,}", None),
            (
                "API_KEY",
                r#"(?i)\b(?:api[_-]?key|apikey|api_secret|secret[_-]?key|access[_-]?token|auth[_-]?token)['"]?\s*[:=]\s*['"]?[A-Za-z0-9_\-\.]{16,}['"]?"#,
                None,
            ),
            ("BEARER_TOKEN", r"(?i)\bbearer\s+[A-Za-z0-9_\-\.=]{20,}", None),
            (
                "CONNECTION_STRING",
                r#"(?i)\b(?:postgres|postgresql|mysql|mongodb|redis)://[^\s'"]+:[^\s'"]+@[^\s'"]+"#,
                None,
            ),
            (
                "PASSWORD",
                r#"(?i)\b(?:password|passwd|pwd)['"]?\s*[:=]\s*['"]?[^\s'"]{8,}['"]?"#,
                None,
            ),
            (
                "EMAIL",
                r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b",
                None,
            ),
            (
                "CREDIT_CARD",
                r"\b(?:\d[ \-]?){12,18}\d\b",
                Some(luhn_valid),
            ),
            ("SSN", r"\b\d{3}-\d{2}-\d{4}\b", Some(ssn_plausible)),
            (
                "PHONE",
                r"(?:\+\d{1,3}[\-.\s]?)?(?:\(\d{3}\)\s?|\b\d{3}[\-.\s])\d{3}[\-.\s]\d{4}\b",
                None,
            ),
        ];

        let patterns = builtin
            .into_iter()
            .map(|(kind, pattern, validator)| PiiPattern {
                kind: kind.to_string(),
                regex: Regex::new(pattern).unwrap(),
                validator,
            })
            .collect();
        Self { patterns }
    }

    /// Register an additional detector. Custom patterns rank below built-ins.
    pub fn with_pattern(mut self, kind: &str, pattern: &str) -> Result<Self, MemlogError> {
        let kind = kind.trim().to_ascii_uppercase();
        if kind.is_empty() || !kind.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
            return Err(MemlogError::ConfigError(format!(
                "PII type '{}' must be non-empty [A-Z_]",
                kind
            )));
        }
        let regex = Regex::new(pattern).map_err(|e| {
            MemlogError::ConfigError(format!("invalid PII pattern for {}: {}", kind, e))
        })?;
        self.patterns.push(PiiPattern {
            kind,
            regex,
            validator: None,
        });
        Ok(self)
    }

    /// Non-overlapping detections, left to right.
    pub fn detect(&self, text: &str) -> Vec<Detection> {
        let mut candidates: Vec<(usize, usize, usize)> = Vec::new();
        for (rank, pattern) in self.patterns.iter().enumerate() {
            for m in pattern.regex.find_iter(text) {
                if let Some(check) = pattern.validator {
                    if !check(m.as_str()) {
                        continue;
                    }
                }
                candidates.push((m.start(), m.end(), rank));
            }
        }
        candidates.sort_by_key(|&(start, end, rank)| (start, Reverse(end - start), rank));

        let mut out = Vec::new();
        let mut cursor = 0usize;
        for (start, end, rank) in candidates {
            if start < cursor {
                continue;
            }
            out.push(Detection {
                kind: self.patterns[rank].kind.clone(),
                span: start..end,
                value: text[start..end].to_string(),
            });
            cursor = end;
        }
        out
    }

    pub fn redact(&self, text: &str) -> Redaction {
        let detections = self.detect(text);
        if detections.is_empty() {
            return Redaction {
                text: text.to_string(),
                detections,
                types: BTreeSet::new(),
            };
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0usize;
        for d in &detections {
            out.push_str(&text[last..d.span.start]);
            out.push_str("[REDACTED-");
            out.push_str(&d.kind);
            out.push(']');
            last = d.span.end;
        }
        out.push_str(&text[last..]);

        let types = detections.iter().map(|d| d.kind.clone()).collect();
        Redaction {
            text: out,
            detections,
            types,
        }
    }
}

fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

fn ssn_plausible(candidate: &str) -> bool {
    let mut parts = candidate.split('-');
    let (Some(area), Some(group), Some(serial)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    area != "000" && area != "666" && !area.starts_with('9') && group != "00" && serial != "0000"
}
