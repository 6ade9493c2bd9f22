//! Reversible "safe delete".
//!
//! # Overview
//!
//! [`QuarantineStore::quarantine`] moves a path beneath `<root>/files/`,
//! mirroring its absolute location, and appends a [`QuarantineLogEntry`] as
//! one JSON line to `<root>/quarantine_log.json`. Only restore and purge
//! rewrite the log. The move is a rename when possible and a
//! copy followed by a delete otherwise (for example across volumes).
//!
//! A path that no longer exists is reported as
//! [`QuarantineOutcome::AlreadyGone`] and leaves no log entry, so repeating a
//! quarantine is harmless.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{Duration, Utc};
use walkdir::WalkDir;

use super::{copy_tree, remove_tree, tree_size};
use crate::model::QuarantineLogEntry;
use crate::paths;

const LOG_FILE: &str = "quarantine_log.json";
const FILES_DIR: &str = "files";
const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// Error type for quarantine operations.
#[derive(Debug, thiserror::Error)]
pub enum QuarantineError {
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("no free quarantine name for {0}")]
    NoFreeName(PathBuf),

    #[error("not in quarantine: {0}")]
    Missing(PathBuf),

    #[error("{original} was only partly removed; the full copy is kept at {copy}")]
    Incomplete { original: PathBuf, copy: PathBuf },

    #[error("restore target already exists: {0}")]
    TargetExists(PathBuf),

    #[error("quarantine log {path} is unreadable: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl QuarantineError {
    fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            Self::PermissionDenied(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// What [`QuarantineStore::quarantine`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuarantineOutcome {
    Moved(QuarantineLogEntry),
    /// The path did not exist; nothing was recorded.
    AlreadyGone,
}

/// Holding area for removed paths.
#[derive(Debug)]
pub struct QuarantineStore {
    root: PathBuf,
    log_lock: Mutex<()>,
}

impl QuarantineStore {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            log_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn log_path(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    /// Move `path` into quarantine.
    ///
    /// # Errors
    ///
    /// Returns [`QuarantineError`] when the path cannot be moved or the log
    /// cannot be written. On a log failure the move is undone.
    pub fn quarantine(&self, path: &Path) -> Result<QuarantineOutcome, QuarantineError> {
        let path = paths::absolute(path);
        let metadata = match fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("Already gone: {}", path.display());
                return Ok(QuarantineOutcome::AlreadyGone);
            }
            Err(e) => return Err(QuarantineError::io(&path, e)),
        };
        let size = if metadata.is_dir() {
            tree_size(&path)
        } else {
            metadata.len()
        };

        let _guard = self.log_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let target = self.free_target(&path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| QuarantineError::io(parent, e))?;
        }
        let moved = move_path(&path, &target);
        let entry = QuarantineLogEntry {
            original_path: path.clone(),
            quarantine_path: target.clone(),
            size,
            timestamp: Utc::now(),
        };
        if let Err(e) = moved {
            if matches!(e, QuarantineError::Incomplete { .. }) {
                // The copy is the only complete one; keep it findable.
                if let Err(log_error) = self.append_log(&entry) {
                    log::error!("Failed to record {}: {}", target.display(), log_error);
                }
            }
            return Err(e);
        }

        if let Err(e) = self.append_log(&entry) {
            if let Err(undo) = move_path(&target, &path) {
                log::error!(
                    "Could not return {} after log failure: {}",
                    path.display(),
                    undo
                );
            }
            return Err(e);
        }

        log::debug!("Quarantined {} -> {}", path.display(), target.display());
        Ok(QuarantineOutcome::Moved(entry))
    }

    /// Every entry currently in quarantine, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`QuarantineError`] if the log exists but cannot be read.
    pub fn entries(&self) -> Result<Vec<QuarantineLogEntry>, QuarantineError> {
        let _guard = self.log_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_log()
    }

    /// Most recent entry for `original`.
    ///
    /// # Errors
    ///
    /// Returns [`QuarantineError`] if the log cannot be read.
    pub fn find_latest(
        &self,
        original: &Path,
    ) -> Result<Option<QuarantineLogEntry>, QuarantineError> {
        let original = paths::absolute(original);
        Ok(self
            .entries()?
            .into_iter()
            .rev()
            .find(|e| e.original_path == original))
    }

    /// Move an entry back to its original location and drop it from the log.
    ///
    /// # Errors
    ///
    /// Fails if the original location is occupied, the quarantined copy is
    /// missing, or the move fails.
    pub fn restore(&self, entry: &QuarantineLogEntry) -> Result<(), QuarantineError> {
        let _guard = self.log_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if fs::symlink_metadata(&entry.original_path).is_ok() {
            return Err(QuarantineError::TargetExists(entry.original_path.clone()));
        }
        if fs::symlink_metadata(&entry.quarantine_path).is_err() {
            return Err(QuarantineError::Missing(entry.quarantine_path.clone()));
        }
        if let Some(parent) = entry.original_path.parent() {
            fs::create_dir_all(parent).map_err(|e| QuarantineError::io(parent, e))?;
        }
        move_path(&entry.quarantine_path, &entry.original_path)?;

        let mut entries = self.read_log()?;
        entries.retain(|e| e.quarantine_path != entry.quarantine_path);
        self.write_log(&entries)?;
        log::info!("Restored {}", entry.original_path.display());
        Ok(())
    }

    /// Permanently remove entries quarantined more than `days` days ago.
    /// Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`QuarantineError`] if the log cannot be read or rewritten.
    pub fn purge_older_than(&self, days: u32) -> Result<usize, QuarantineError> {
        let _guard = self.log_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let mut kept = Vec::new();
        let mut purged = 0;
        for entry in self.read_log()? {
            if entry.timestamp >= cutoff {
                kept.push(entry);
                continue;
            }
            match remove_tree(&entry.quarantine_path) {
                Ok(()) => purged += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => purged += 1,
                Err(e) => {
                    log::warn!(
                        "Failed to purge {}: {}",
                        entry.quarantine_path.display(),
                        e
                    );
                    kept.push(entry);
                }
            }
        }
        self.write_log(&kept)?;
        if purged > 0 {
            log::info!("Purged {} quarantined item(s)", purged);
        }
        Ok(purged)
    }

    /// First unused location for `path` beneath `files/`.
    fn free_target(&self, path: &Path) -> Result<PathBuf, QuarantineError> {
        let base = self
            .root
            .join(FILES_DIR)
            .join(paths::relative_to_anchor(path));
        if fs::symlink_metadata(&base).is_err() {
            return Ok(base);
        }

        let stem = base
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = base
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let stamp = Utc::now().timestamp();

        let first = base.with_file_name(format!("{stem}_{stamp}{ext}"));
        if fs::symlink_metadata(&first).is_err() {
            return Ok(first);
        }
        (1..MAX_NAME_ATTEMPTS)
            .map(|n| base.with_file_name(format!("{stem}_{stamp}_{n}{ext}")))
            .find(|candidate| fs::symlink_metadata(candidate).is_err())
            .ok_or_else(|| QuarantineError::NoFreeName(path.to_path_buf()))
    }

    /// Entries in the log, one JSON object per line.
    ///
    /// A torn final line from an interrupted append is skipped. A log written
    /// as a single JSON array is read as well.
    fn read_log(&self) -> Result<Vec<QuarantineLogEntry>, QuarantineError> {
        let path = self.log_path();
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(QuarantineError::io(&path, e)),
        };
        if content.trim_start().starts_with('[') {
            return serde_json::from_str(&content)
                .map_err(|source| QuarantineError::Log { path, source });
        }

        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut entries = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) if i + 1 == lines.len() && !content.ends_with('\n') => {
                    log::warn!("Ignoring torn last line of {}: {}", path.display(), e);
                }
                Err(source) => return Err(QuarantineError::Log { path, source }),
            }
        }
        Ok(entries)
    }

    fn append_log(&self, entry: &QuarantineLogEntry) -> Result<(), QuarantineError> {
        let path = self.log_path();
        let mut line = serde_json::to_string(entry).map_err(|source| QuarantineError::Log {
            path: path.clone(),
            source,
        })?;
        line.push('\n');
        fs::create_dir_all(&self.root).map_err(|e| QuarantineError::io(&self.root, e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| QuarantineError::io(&path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| QuarantineError::io(&path, e))
    }

    fn write_log(&self, entries: &[QuarantineLogEntry]) -> Result<(), QuarantineError> {
        let path = self.log_path();
        fs::create_dir_all(&self.root).map_err(|e| QuarantineError::io(&self.root, e))?;
        let mut content = String::new();
        for entry in entries {
            let line = serde_json::to_string(entry).map_err(|source| QuarantineError::Log {
                path: path.clone(),
                source,
            })?;
            content.push_str(&line);
            content.push('\n');
        }
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, content).map_err(|e| QuarantineError::io(&staging, e))?;
        fs::rename(&staging, &path).map_err(|e| QuarantineError::io(&path, e))
    }
}

/// Rename, or copy then delete when renaming is not possible.
fn move_path(from: &Path, to: &Path) -> Result<(), QuarantineError> {
    let rename_error = match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    log::debug!(
        "Rename {} failed ({}), copying instead",
        from.display(),
        rename_error
    );
    copy_then_remove(from, to, remove_tree)
}

/// Copy `from` to `to`, then remove `from` with `remove`.
///
/// Once the copy exists it is only discarded after `from` is whole again. A
/// removal that fails partway refills `from` from the copy; if even that
/// fails the copy stays at `to` and [`QuarantineError::Incomplete`] names
/// both locations.
fn copy_then_remove(
    from: &Path,
    to: &Path,
    remove: impl Fn(&Path) -> io::Result<()>,
) -> Result<(), QuarantineError> {
    if let Err(e) = copy_tree(from, to) {
        let _ = remove_tree(to);
        return Err(QuarantineError::io(from, e));
    }
    let remove_error = match remove(from) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    match refill(to, from) {
        Ok(()) => {
            if let Err(e) = remove_tree(to) {
                log::warn!("Left a stray copy at {}: {}", to.display(), e);
            }
            Err(QuarantineError::io(from, remove_error))
        }
        Err(e) => {
            log::error!(
                "Could not refill {} from {}: {}",
                from.display(),
                to.display(),
                e
            );
            Err(QuarantineError::Incomplete {
                original: from.to_path_buf(),
                copy: to.to_path_buf(),
            })
        }
    }
}

/// Copy every entry of `copy` that is missing under `original` back into it.
fn refill(copy: &Path, original: &Path) -> io::Result<()> {
    if fs::symlink_metadata(original).is_err() {
        return copy_tree(copy, original).map(|_| ());
    }
    if !fs::symlink_metadata(copy)?.is_dir() {
        return Ok(());
    }
    for entry in WalkDir::new(copy).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(copy).unwrap_or(entry.path());
        let target = original.join(relative);
        if fs::symlink_metadata(&target).is_ok() {
            continue;
        }
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            copy_tree(entry.path(), &target)?;
        }
    }
    Ok(())
}
