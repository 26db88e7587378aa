use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemlogError {
    /// Path escapes the configured root or contains a disallowed pattern.
    /// Never retried; the caller has to fix its configuration.
    #[error("Security violation: {0}")]
    SecurityViolation(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Lock timeout on {} after {waited_ms}ms", path.display())]
    LockTimeout { path: PathBuf, waited_ms: u64 },
    #[error("Integrity error: {0}")]
    IntegrityError(String),
    #[error("Malformed line {line}: {reason}")]
    MalformedLine { line: u64, reason: String },
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl MemlogError {
    /// Only lock contention is transient; everything else needs a different input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MemlogError::LockTimeout { .. })
    }
}
