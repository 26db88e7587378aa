//! Confines data-file paths to a fixed root.
//!
//! The root is captured (and canonicalized when it exists) at construction.
//! `validate` normalizes lexically, then resolves symlinks on the longest
//! existing ancestor, dangling ones included, so a link inside the root
//! cannot point outside it.

use crate::core::error::MemlogError;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Component, Path, PathBuf};

const MAX_LINK_HOPS: usize = 40;

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, MemlogError> {
        let root = root.as_ref();
        reject_nul(root)?;
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(MemlogError::IoError)?
                .join(root)
        };
        let normalized = normalize(&absolute).ok_or_else(|| {
            MemlogError::SecurityViolation(format!("root {} is not a valid path", root.display()))
        })?;
        let root = normalized.canonicalize().unwrap_or(normalized);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` (relative to the root, or absolute) to a normalized path
    /// that is guaranteed to stay under the root.
    pub fn validate(&self, path: impl AsRef<Path>) -> Result<PathBuf, MemlogError> {
        let path = path.as_ref();
        reject_nul(path)?;
        if path.as_os_str().is_empty() {
            return Err(MemlogError::SecurityViolation("empty path".to_string()));
        }

        for component in path.components() {
            if let Component::Normal(name) = component {
                let name = name.to_string_lossy();
                if is_reserved_name(&name) {
                    return Err(MemlogError::SecurityViolation(format!(
                        "reserved file name '{}' in {}",
                        name,
                        path.display()
                    )));
                }
            }
        }

        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let normalized = normalize(&joined).ok_or_else(|| escape_error(path))?;
        if !normalized.starts_with(&self.root) {
            return Err(escape_error(path));
        }

        let resolved = resolve_existing_prefix(&normalized).ok_or_else(|| {
            MemlogError::SecurityViolation(format!("cannot resolve links in {}", path.display()))
        })?;
        if !resolved.starts_with(&self.root) {
            return Err(MemlogError::SecurityViolation(format!(
                "{} resolves through a link outside the root",
                path.display()
            )));
        }
        Ok(resolved)
    }
}

fn escape_error(path: &Path) -> MemlogError {
    MemlogError::SecurityViolation(format!("path escapes project root: {}", path.display()))
}

fn reject_nul(path: &Path) -> Result<(), MemlogError> {
    if path.as_os_str().to_string_lossy().contains('\0') {
        return Err(MemlogError::SecurityViolation(
            "path contains a null byte".to_string(),
        ));
    }
    Ok(())
}

/// Windows device names are rejected everywhere so data directories stay portable.
fn is_reserved_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name).trim_end();
    RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(stem))
}

/// Lexical normalization. Returns `None` when `..` would climb above the
/// filesystem root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(name) => {
                out.push(name);
                depth += 1;
            }
        }
    }
    Some(out)
}

/// Canonicalize the deepest ancestor that exists and re-append the rest.
/// `canonicalize` refuses dangling links, so those are followed by hand.
/// Returns `None` on a link loop or an unreadable link.
fn resolve_existing_prefix(path: &Path) -> Option<PathBuf> {
    let mut current = path.to_path_buf();
    'hops: for _ in 0..MAX_LINK_HOPS {
        let mut existing = current.clone();
        let mut rest: Vec<OsString> = Vec::new();
        loop {
            if let Ok(canonical) = existing.canonicalize() {
                return Some(rejoin(canonical, &rest));
            }
            let is_link = fs::symlink_metadata(&existing)
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false);
            if is_link {
                let target = fs::read_link(&existing).ok()?;
                let base = existing.parent()?.canonicalize().ok()?;
                current = rejoin(normalize(&base.join(target))?, &rest);
                continue 'hops;
            }
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    rest.push(name.to_os_string());
                    existing = parent.to_path_buf();
                }
                _ => return Some(path.to_path_buf()),
            }
        }
    }
    None
}

fn rejoin(mut base: PathBuf, rest: &[OsString]) -> PathBuf {
    for name in rest.iter().rev() {
        base.push(name);
    }
    base
}

/// Refuse to open through a symlink in the final component. Closes the gap
/// between `validate` and the open when a link is swapped in afterwards.
pub(crate) fn no_follow(options: &mut OpenOptions) -> &mut OpenOptions {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NOFOLLOW);
    }
    options
}

/// Open a validated data file for reading without following a final symlink.
pub(crate) fn open_read(path: &Path) -> std::io::Result<File> {
    no_follow(OpenOptions::new().read(true)).open(path)
}
