//! Runtime configuration: `memlog.toml` under the root, then `MEMLOG_*`
//! environment overrides, then validation.

use crate::core::error::MemlogError;
use crate::core::pii::{self, PiiDetector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "memlog.toml";
pub const DEFAULT_DATA_DIR: &str = ".memlog";
pub const MIN_CHUNK_SIZE: usize = 64;

pub const ENV_ROOT: &str = "MEMLOG_ROOT";
pub const ENV_DATA_DIR: &str = "MEMLOG_DATA_DIR";
pub const ENV_LOCK_TIMEOUT_MS: &str = "MEMLOG_LOCK_TIMEOUT_MS";
pub const ENV_STALE_LOCK_SECS: &str = "MEMLOG_STALE_LOCK_SECS";
pub const ENV_REDACT_PII: &str = "MEMLOG_REDACT_PII";
pub const ENV_ENCODER_KEY: &str = "MEMLOG_ENCODER_KEY";

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub enabled: bool,
    pub key: Option<String>,
}

impl std::fmt::Debug for EncoderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderConfig")
            .field("enabled", &self.enabled)
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemlogConfig {
    /// Project root. Every data file must resolve under it.
    #[serde(skip)]
    pub root: PathBuf,
    pub data_dir: PathBuf,
    pub lock_timeout_ms: u64,
    pub stale_lock_secs: u64,
    /// Files at or above this size are read in streaming mode.
    pub index_threshold_bytes: u64,
    pub chunk_size: usize,
    pub redact_pii: bool,
    pub fsync: bool,
    pub encoder: EncoderConfig,
    /// Extra PII detectors, type name to regex, ranked after the built-ins.
    pub pii_patterns: BTreeMap<String, String>,
}

impl Default for MemlogConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            lock_timeout_ms: 5_000,
            stale_lock_secs: 30,
            index_threshold_bytes: 10 * 1024 * 1024,
            chunk_size: 64 * 1024,
            redact_pii: true,
            fsync: true,
            encoder: EncoderConfig::default(),
            pii_patterns: BTreeMap::new(),
        }
    }
}

/// Root precedence: explicit flag, then `MEMLOG_ROOT`, then the working directory.
pub fn resolve_root(explicit: Option<PathBuf>) -> Result<PathBuf, MemlogError> {
    if let Some(root) = explicit {
        return Ok(root);
    }
    if let Ok(root) = std::env::var(ENV_ROOT) {
        if !root.trim().is_empty() {
            return Ok(PathBuf::from(root));
        }
    }
    std::env::current_dir().map_err(MemlogError::IoError)
}

impl MemlogConfig {
    /// Defaults anchored at `root`, without reading any file or environment.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load `<root>/memlog.toml` if present, apply environment overrides and validate.
    pub fn load(root: &Path) -> Result<Self, MemlogError> {
        let mut config = Self::from_file_or_default(root)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file_or_default(root: &Path) -> Result<Self, MemlogError> {
        let config_path = root.join(CONFIG_FILE_NAME);
        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).map_err(MemlogError::IoError)?;
            toml::from_str::<MemlogConfig>(&content).map_err(|e| {
                MemlogError::ConfigError(format!("{}: {}", config_path.display(), e))
            })?
        } else {
            Self::default()
        };
        config.root = root.to_path_buf();
        Ok(config)
    }

    /// Apply `MEMLOG_*` overrides through `lookup` so callers (and tests) choose
    /// the source.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), MemlogError> {
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(ms) = lookup(ENV_LOCK_TIMEOUT_MS) {
            self.lock_timeout_ms = parse_env(ENV_LOCK_TIMEOUT_MS, &ms)?;
        }
        if let Some(secs) = lookup(ENV_STALE_LOCK_SECS) {
            self.stale_lock_secs = parse_env(ENV_STALE_LOCK_SECS, &secs)?;
        }
        if let Some(flag) = lookup(ENV_REDACT_PII) {
            self.redact_pii = parse_flag(ENV_REDACT_PII, &flag)?;
        }
        if let Some(key) = lookup(ENV_ENCODER_KEY).filter(|v| !v.is_empty()) {
            self.encoder.enabled = true;
            self.encoder.key = Some(key);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), MemlogError> {
        if self.chunk_size < MIN_CHUNK_SIZE {
            return Err(MemlogError::ConfigError(format!(
                "chunk_size must be at least {} bytes (got {})",
                MIN_CHUNK_SIZE, self.chunk_size
            )));
        }
        if self.stale_lock_secs == 0 {
            return Err(MemlogError::ConfigError(
                "stale_lock_secs must be greater than zero".to_string(),
            ));
        }
        if self.encoder.enabled
            && self
                .encoder
                .key
                .as_deref()
                .map(|k| k.trim().is_empty())
                .unwrap_or(true)
        {
            return Err(MemlogError::ConfigError(
                "encoder is enabled but no key is configured".to_string(),
            ));
        }
        self.pii_detector()?;
        Ok(())
    }

    /// The detector writes redact with: the shared built-in set, or a fresh
    /// one extended with `pii_patterns`.
    pub fn pii_detector(&self) -> Result<Arc<PiiDetector>, MemlogError> {
        if self.pii_patterns.is_empty() {
            return Ok(pii::shared_detector());
        }
        let mut detector = PiiDetector::new();
        for (kind, pattern) in &self.pii_patterns {
            detector = detector.with_pattern(kind, pattern)?;
        }
        Ok(Arc::new(detector))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }

    pub fn encoder_key(&self) -> Option<&str> {
        if self.encoder.enabled {
            self.encoder.key.as_deref()
        } else {
            None
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, MemlogError> {
    raw.trim()
        .parse()
        .map_err(|_| MemlogError::ConfigError(format!("{} has invalid value '{}'", name, raw)))
}

fn parse_flag(name: &str, raw: &str) -> Result<bool, MemlogError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(MemlogError::ConfigError(format!(
            "{} must be 0 or 1 (got '{}')",
            name, raw
        ))),
    }
}
