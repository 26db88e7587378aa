//! Store facade over the per-kind history files.
//!
//! One data file per record kind under `<root>/<data_dir>/`, each with its own
//! `<file>.lock` marker. The data directory is validated through the path
//! guard once, when the store is opened.

use crate::core::config::MemlogConfig;
use crate::core::error::MemlogError;
use crate::core::lock::{LockManager, LockStatus};
use crate::core::path_guard::PathGuard;
use crate::core::reader::{HistoryReader, VerifyReport};
use crate::core::record::ToRecord;
use crate::core::schemas::RecordKind;
use crate::core::writer::{HistoryWriter, WriteOptions};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Store {
    config: MemlogConfig,
    guard: PathGuard,
    data_dir: PathBuf,
    writers: FxHashMap<RecordKind, HistoryWriter>,
}

impl Store {
    pub fn open(config: MemlogConfig) -> Result<Self, MemlogError> {
        config.validate()?;
        let guard = PathGuard::new(&config.root)?;
        let data_dir = guard.validate(&config.data_dir)?;

        let mut writers = FxHashMap::default();
        for kind in RecordKind::ALL {
            let writer = HistoryWriter::new(&guard, data_dir.join(kind.file_name()), &config)?;
            writers.insert(kind, writer);
        }

        Ok(Self {
            config,
            guard,
            data_dir,
            writers,
        })
    }

    pub fn config(&self) -> &MemlogConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        self.guard.root()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn file_path(&self, kind: RecordKind) -> PathBuf {
        self.data_dir.join(kind.file_name())
    }

    pub fn writer(&self, kind: RecordKind) -> Result<&HistoryWriter, MemlogError> {
        self.writers
            .get(&kind)
            .ok_or_else(|| MemlogError::NotFound(format!("no writer for {}", kind)))
    }

    /// Append to the file for the record's kind. Returns that file's line count.
    pub fn append(&self, item: &impl ToRecord) -> Result<u64, MemlogError> {
        let record = item.to_record();
        self.writer(record.kind)?.append_record(&record)
    }

    pub fn append_with(
        &self,
        item: &impl ToRecord,
        options: &WriteOptions,
    ) -> Result<u64, MemlogError> {
        let record = item.to_record();
        self.writer(record.kind)?.append_record_with(&record, options)
    }

    pub fn reader(&self, kind: RecordKind) -> Result<HistoryReader, MemlogError> {
        HistoryReader::open(&self.guard, self.file_path(kind), &self.config)
    }

    pub fn verify(&self, kind: RecordKind) -> Result<VerifyReport, MemlogError> {
        self.reader(kind)?.verify()
    }

    pub fn lock_status(&self, kind: RecordKind) -> Result<Option<LockStatus>, MemlogError> {
        LockManager::new(self.config.stale_after()).inspect(&self.file_path(kind))
    }
}
