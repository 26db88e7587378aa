//! Cross-process mutual exclusion via lock marker files.
//!
//! A marker `<data file>.lock` is created with `create_new`, which gives
//! single-winner semantics across processes. The marker records the holder's
//! pid, a random token and the acquisition time. A marker older than the
//! staleness threshold whose pid is gone can be reclaimed by any waiter.
//!
//! Reclamation is serialized by an OS advisory lock (`flock`) on a sidecar
//! gate file `<data file>.lock.gate`. Under the gate the waiter re-reads the
//! marker and deletes it only if it is still the same stale holder. Other
//! waiters only ever create the marker when it is absent, and a dead holder
//! cannot release, so the marker cannot change between that re-read and the
//! delete. The kernel drops the gate lock when a reclaimer dies, so a crash
//! mid-reclaim never wedges later waiters.

use crate::core::error::MemlogError;
use crate::core::schemas;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};
use ulid::Ulid;

const BASE_BACKOFF_MS: u64 = 2;
const MAX_BACKOFF_MS: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMarker {
    pub pid: u32,
    pub token: String,
    pub acquired_at_ms: u64,
}

impl LockMarker {
    fn fresh() -> Self {
        Self {
            pid: std::process::id(),
            token: Ulid::new().to_string(),
            acquired_at_ms: time::epoch_millis(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockManager {
    stale_after: Duration,
}

/// Held lock. Dropping it releases the marker.
#[derive(Debug)]
pub struct LockGuard {
    marker_path: PathBuf,
    token: String,
    released: bool,
}

impl LockGuard {
    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            release_marker(&self.marker_path, &self.token);
        }
    }
}

/// Marker path for a data file: `decisions.log` → `decisions.log.lock`.
pub fn marker_path_for(resource: &Path) -> PathBuf {
    let mut name = resource
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(schemas::LOCK_SUFFIX);
    resource.with_file_name(name)
}

impl LockManager {
    pub fn new(stale_after: Duration) -> Self {
        Self { stale_after }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Acquire the lock for `resource`, polling with bounded backoff until
    /// `timeout` elapses.
    pub fn acquire(&self, resource: &Path, timeout: Duration) -> Result<LockGuard, MemlogError> {
        let marker_path = marker_path_for(resource);
        if let Some(parent) = marker_path.parent() {
            fs::create_dir_all(parent).map_err(MemlogError::IoError)?;
        }

        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            if let Some(guard) = self.try_acquire(&marker_path)? {
                debug!(marker = %marker_path.display(), attempt, "lock acquired");
                return Ok(guard);
            }

            if self.reclaim_if_stale(&marker_path)? {
                continue;
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(MemlogError::LockTimeout {
                    path: resource.to_path_buf(),
                    waited_ms: waited.as_millis() as u64,
                });
            }

            attempt += 1;
            let backoff = (BASE_BACKOFF_MS << attempt.min(5)).min(MAX_BACKOFF_MS);
            let sleep = Duration::from_millis(backoff + time::jitter_ms(backoff))
                .min(timeout.saturating_sub(waited).max(Duration::from_millis(1)));
            thread::sleep(sleep);
        }
    }

    /// Single non-blocking attempt.
    pub fn try_acquire(&self, marker_path: &Path) -> Result<Option<LockGuard>, MemlogError> {
        let mut file = match OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(marker_path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(err) => return Err(MemlogError::IoError(err)),
        };

        let marker = LockMarker::fresh();
        let body = serde_json::to_string(&marker)
            .map_err(|e| MemlogError::ValidationError(e.to_string()))?;
        let guard = LockGuard {
            marker_path: marker_path.to_path_buf(),
            token: marker.token,
            released: false,
        };
        // An empty or torn marker is still a valid lock; staleness then falls
        // back to the file's mtime.
        file.write_all(body.as_bytes()).map_err(MemlogError::IoError)?;
        Ok(Some(guard))
    }

    pub fn release(&self, mut guard: LockGuard) {
        release_marker(&guard.marker_path, &guard.token);
        guard.released = true;
        debug!(marker = %guard.marker_path.display(), "lock released");
    }

    /// Current holder of the lock for `resource`, if any.
    pub fn inspect(&self, resource: &Path) -> Result<Option<LockStatus>, MemlogError> {
        let marker_path = marker_path_for(resource);
        match read_marker(&marker_path) {
            Ok(observed) => {
                let age = observed.age();
                let stale = self.is_stale(&observed);
                Ok(Some(LockStatus {
                    marker: observed.marker,
                    age_ms: age.as_millis() as u64,
                    stale,
                }))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(MemlogError::IoError(err)),
        }
    }

    fn is_stale(&self, observed: &ObservedMarker) -> bool {
        if observed.age() <= self.stale_after {
            return false;
        }
        match &observed.marker {
            Some(marker) => !process_alive(marker.pid),
            None => true,
        }
    }

    /// Returns true when the marker is gone and acquisition should retry now.
    fn reclaim_if_stale(&self, marker_path: &Path) -> Result<bool, MemlogError> {
        let observed = match read_marker(marker_path) {
            Ok(observed) => observed,
            // Released between our create attempt and this read.
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(MemlogError::IoError(err)),
        };
        if !self.is_stale(&observed) {
            return Ok(false);
        }

        let _gate = ReclaimGate::lock(marker_path)?;
        let current = match read_marker(marker_path) {
            Ok(current) => current,
            // Another waiter reclaimed it while we waited for the gate.
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(MemlogError::IoError(err)),
        };
        if !current.same_holder(&observed) || !self.is_stale(&current) {
            debug!(marker = %marker_path.display(), "stale marker was replaced before reclaim");
            return Ok(false);
        }

        match fs::remove_file(marker_path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(MemlogError::IoError(err)),
        }
        info!(
            marker = %marker_path.display(),
            holder_pid = current.marker.as_ref().map(|m| m.pid),
            age_ms = current.age().as_millis() as u64,
            "reclaimed stale lock"
        );
        Ok(true)
    }
}

/// Gate file path for a marker: `decisions.log.lock` → `decisions.log.lock.gate`.
pub fn gate_path_for(marker_path: &Path) -> PathBuf {
    let mut name = marker_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".gate");
    marker_path.with_file_name(name)
}

/// Exclusive advisory lock on the gate file, held for one reclaim attempt.
/// The gate file itself is never deleted; removing a flocked file lets two
/// openers lock different inodes.
struct ReclaimGate {
    file: File,
}

impl ReclaimGate {
    fn lock(marker_path: &Path) -> Result<Self, MemlogError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(gate_path_for(marker_path))
            .map_err(MemlogError::IoError)?;
        flock(&file, true)?;
        Ok(Self { file })
    }
}

impl Drop for ReclaimGate {
    fn drop(&mut self) {
        if let Err(err) = flock(&self.file, false) {
            warn!(error = %err, "failed to unlock reclaim gate");
        }
    }
}

#[cfg(unix)]
fn flock(file: &File, exclusive: bool) -> Result<(), MemlogError> {
    use std::os::unix::io::AsRawFd;

    let op = if exclusive { libc::LOCK_EX } else { libc::LOCK_UN };
    loop {
        let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(MemlogError::IoError(err));
        }
    }
}

#[cfg(not(unix))]
fn flock(file: &File, exclusive: bool) -> Result<(), MemlogError> {
    if exclusive {
        file.lock().map_err(MemlogError::IoError)
    } else {
        file.unlock().map_err(MemlogError::IoError)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LockStatus {
    pub marker: Option<LockMarker>,
    pub age_ms: u64,
    pub stale: bool,
}

struct ObservedMarker {
    marker: Option<LockMarker>,
    modified: SystemTime,
}

impl ObservedMarker {
    /// Same token, or for unparseable markers the same mtime.
    fn same_holder(&self, other: &ObservedMarker) -> bool {
        match (&self.marker, &other.marker) {
            (Some(a), Some(b)) => a.token == b.token,
            (None, None) => self.modified == other.modified,
            _ => false,
        }
    }

    fn age(&self) -> Duration {
        let from_marker = self.marker.as_ref().map(|m| {
            Duration::from_millis(time::epoch_millis().saturating_sub(m.acquired_at_ms))
        });
        from_marker.unwrap_or_else(|| self.modified.elapsed().unwrap_or_default())
    }
}

fn read_marker(path: &Path) -> std::io::Result<ObservedMarker> {
    let modified = fs::metadata(path)?.modified()?;
    let content = fs::read_to_string(path)?;
    let marker = serde_json::from_str::<LockMarker>(content.trim()).ok();
    Ok(ObservedMarker { marker, modified })
}

fn release_marker(marker_path: &Path, token: &str) {
    match read_marker(marker_path) {
        Ok(observed) => {
            let ours = observed
                .marker
                .as_ref()
                .map(|m| m.token == token)
                .unwrap_or(false);
            if ours {
                let _ = fs::remove_file(marker_path);
            } else {
                warn!(marker = %marker_path.display(), "lock was reclaimed before release");
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!(marker = %marker_path.display(), "lock marker vanished before release");
        }
        Err(err) => warn!(marker = %marker_path.display(), error = %err, "failed to read lock marker"),
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // Signal 0 performs permission and existence checks only.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // Without a portable liveness probe, age alone decides staleness.
    false
}
