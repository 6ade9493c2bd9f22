//! Full-copy snapshots of files about to be cleaned.
//!
//! # Layout
//!
//! ```text
//! <root>/<backup-id>/00000_name.ext   copied payload
//! <root>/<backup-id>.json             manifest in a checksum envelope
//! ```
//!
//! The manifest is wrapped in an envelope carrying the SHA-256 of its compact
//! JSON form; a manifest whose checksum does not match is rejected.
//!
//! Backups can be pinned while a clean task depends on them; pinned backups
//! are never pruned or deleted.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{copy_tree, remove_tree};
use crate::model::{BackupEntry, BackupManifest, BackupSummary, RestoreReport};
use crate::paths;

/// Error type for backup operations.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("backup not found: {0}")]
    NotFound(String),

    #[error("backup {0} is no longer valid")]
    Invalid(String),

    #[error("backup {0} is pinned by a running task")]
    Pinned(String),

    #[error("backup manifest {0} failed its integrity check")]
    Corrupt(PathBuf),

    #[error("failed to encode or decode manifest {path}: {source}")]
    Manifest {
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

impl BackupError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestEnvelope {
    checksum: String,
    manifest: BackupManifest,
}

fn checksum(manifest: &BackupManifest, path: &Path) -> Result<String, BackupError> {
    let json = serde_json::to_string(manifest).map_err(|source| BackupError::Manifest {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Directory of backups.
#[derive(Debug)]
pub struct BackupVault {
    root: PathBuf,
    pinned: Mutex<HashSet<String>>,
}

impl BackupVault {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            pinned: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn manifest_path(&self, backup_id: &str) -> PathBuf {
        self.root.join(format!("{backup_id}.json"))
    }

    fn pins(&self) -> MutexGuard<'_, HashSet<String>> {
        self.pinned.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy `files` into a new backup.
    ///
    /// Files that cannot be read or copied are logged and left out of the
    /// manifest; the backup is still created.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError`] if the backup directory or manifest cannot be
    /// written.
    pub fn create(
        &self,
        files: &[PathBuf],
        source_task_id: Option<&str>,
    ) -> Result<BackupManifest, BackupError> {
        self.create_with(files, source_task_id, false)
    }

    /// Like [`create`](Self::create), but the backup is pinned before its
    /// manifest becomes visible, so pruning can never remove it before the
    /// caller calls [`unpin`](Self::unpin).
    ///
    /// # Errors
    ///
    /// Same as [`create`](Self::create). On error nothing stays pinned.
    pub fn create_pinned(
        &self,
        files: &[PathBuf],
        source_task_id: Option<&str>,
    ) -> Result<BackupManifest, BackupError> {
        self.create_with(files, source_task_id, true)
    }

    fn create_with(
        &self,
        files: &[PathBuf],
        source_task_id: Option<&str>,
        pinned: bool,
    ) -> Result<BackupManifest, BackupError> {
        let backup_id = uuid::Uuid::new_v4().to_string();
        if pinned {
            self.pin(&backup_id);
        }
        let created = self.write_backup(backup_id.clone(), files, source_task_id);
        if pinned && created.is_err() {
            self.unpin(&backup_id);
        }
        created
    }

    fn write_backup(
        &self,
        backup_id: String,
        files: &[PathBuf],
        source_task_id: Option<&str>,
    ) -> Result<BackupManifest, BackupError> {
        let payload = self.root.join(&backup_id);
        fs::create_dir_all(&payload).map_err(|e| BackupError::io(&payload, e))?;

        let mut entries = Vec::with_capacity(files.len());
        let mut total_size = 0;
        for (index, file) in files.iter().enumerate() {
            let original = paths::absolute(file);
            let metadata = match fs::symlink_metadata(&original) {
                Ok(m) => m,
                Err(e) => {
                    log::warn!("Not backing up {}: {}", original.display(), e);
                    continue;
                }
            };
            let name = original
                .file_name()
                .map_or_else(|| "item".to_string(), |n| n.to_string_lossy().into_owned());
            let rel_path = PathBuf::from(format!("{index:05}_{name}"));
            let target = payload.join(&rel_path);
            match copy_tree(&original, &target) {
                Ok(size) => {
                    total_size += size;
                    entries.push(BackupEntry {
                        original_path: original,
                        rel_path,
                        size,
                        is_dir: metadata.is_dir(),
                    });
                }
                Err(e) => {
                    log::warn!("Failed to back up {}: {}", original.display(), e);
                    let _ = remove_tree(&target);
                }
            }
        }

        let manifest = BackupManifest {
            backup_id,
            created_at: Utc::now(),
            source_task_id: source_task_id.map(str::to_string),
            backup_root: payload,
            entries,
            total_size,
            is_valid: true,
        };
        self.write_manifest(&manifest)?;
        log::info!(
            "Backup {} created: {} of {} item(s), {} bytes",
            manifest.backup_id,
            manifest.entries.len(),
            files.len(),
            manifest.total_size
        );
        Ok(manifest)
    }

    /// Read and verify a manifest.
    ///
    /// # Errors
    ///
    /// [`BackupError::NotFound`] for an unknown id, [`BackupError::Corrupt`]
    /// on a checksum mismatch.
    pub fn load_manifest(&self, backup_id: &str) -> Result<BackupManifest, BackupError> {
        let path = self.manifest_path(backup_id);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound(backup_id.to_string()))
            }
            Err(e) => return Err(BackupError::io(&path, e)),
        };
        let envelope: ManifestEnvelope =
            serde_json::from_str(&content).map_err(|source| BackupError::Manifest {
                path: path.clone(),
                source,
            })?;
        if checksum(&envelope.manifest, &path)? != envelope.checksum {
            return Err(BackupError::Corrupt(path));
        }
        Ok(envelope.manifest)
    }

    fn write_manifest(&self, manifest: &BackupManifest) -> Result<(), BackupError> {
        let path = self.manifest_path(&manifest.backup_id);
        let envelope = ManifestEnvelope {
            checksum: checksum(manifest, &path)?,
            manifest: manifest.clone(),
        };
        let json =
            serde_json::to_string_pretty(&envelope).map_err(|source| BackupError::Manifest {
                path: path.clone(),
                source,
            })?;
        fs::write(&path, json).map_err(|e| BackupError::io(&path, e))
    }

    /// Every readable backup, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError`] if the backup directory cannot be listed.
    pub fn list(&self) -> Result<Vec<BackupSummary>, BackupError> {
        let dir = match fs::read_dir(&self.root) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackupError::io(&self.root, e)),
        };
        let mut summaries: Vec<BackupSummary> = dir
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .filter_map(|p| {
                let id = p.file_stem()?.to_string_lossy().into_owned();
                match self.load_manifest(&id) {
                    Ok(m) => Some(m.summary()),
                    Err(e) => {
                        log::warn!("Skipping backup {}: {}", id, e);
                        None
                    }
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    /// Copy entries back to their original locations. With `selected`, only
    /// entries whose original path is listed are restored.
    ///
    /// An existing file at the original location is replaced.
    ///
    /// # Errors
    ///
    /// Rejects unknown, corrupt and invalid backups. Per-entry failures are
    /// counted in the report instead.
    pub fn restore(
        &self,
        backup_id: &str,
        selected: Option<&[PathBuf]>,
    ) -> Result<RestoreReport, BackupError> {
        let manifest = self.load_manifest(backup_id)?;
        if !manifest.is_valid || !manifest.backup_root.is_dir() {
            return Err(BackupError::Invalid(backup_id.to_string()));
        }
        let selected: Option<Vec<PathBuf>> =
            selected.map(|s| s.iter().map(|p| paths::absolute(p)).collect());

        let mut report = RestoreReport::default();
        for entry in &manifest.entries {
            if selected
                .as_ref()
                .is_some_and(|s| !s.contains(&entry.original_path))
            {
                continue;
            }
            let source = manifest.backup_root.join(&entry.rel_path);
            if fs::symlink_metadata(&source).is_err() {
                report.record_failure(entry.original_path.clone(), "missing from backup");
                continue;
            }
            match fs::symlink_metadata(&entry.original_path) {
                Ok(_) => {
                    if let Err(e) = remove_tree(&entry.original_path) {
                        report.record_failure(entry.original_path.clone(), e.to_string());
                        continue;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    report.record_failure(entry.original_path.clone(), e.to_string());
                    continue;
                }
            }
            match copy_tree(&source, &entry.original_path) {
                Ok(_) => report.restored += 1,
                Err(e) => {
                    log::warn!("Failed to restore {}: {}", entry.original_path.display(), e);
                    report.record_failure(entry.original_path.clone(), e.to_string());
                }
            }
        }
        log::info!("Backup {}: {}", backup_id, report.summary());
        Ok(report)
    }

    /// Remove a backup's payload and manifest.
    ///
    /// # Errors
    ///
    /// Refuses pinned backups; fails for unknown ids or when removal fails.
    pub fn delete(&self, backup_id: &str) -> Result<(), BackupError> {
        if self.is_pinned(backup_id) {
            return Err(BackupError::Pinned(backup_id.to_string()));
        }
        let payload = self.root.join(backup_id);
        let manifest = self.manifest_path(backup_id);
        if !payload.exists() && !manifest.exists() {
            return Err(BackupError::NotFound(backup_id.to_string()));
        }
        for path in [&payload, &manifest] {
            match remove_tree(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(BackupError::io(path, e)),
            }
        }
        log::info!("Deleted backup {}", backup_id);
        Ok(())
    }

    /// Delete unpinned backups older than `days` days. Returns how many were
    /// removed. A backup that is only partly removed is marked invalid.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError`] if the backup directory cannot be listed.
    pub fn prune_older_than(&self, days: u32) -> Result<usize, BackupError> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let mut removed = 0;
        for summary in self.list()? {
            if summary.created_at >= cutoff {
                continue;
            }
            if self.is_pinned(&summary.backup_id) {
                log::debug!("Keeping pinned backup {}", summary.backup_id);
                continue;
            }
            match self.delete(&summary.backup_id) {
                Ok(()) => removed += 1,
                Err(e) => {
                    log::warn!("Failed to prune backup {}: {}", summary.backup_id, e);
                    self.invalidate(&summary.backup_id);
                }
            }
        }
        Ok(removed)
    }

    fn invalidate(&self, backup_id: &str) {
        match self.load_manifest(backup_id) {
            Ok(mut manifest) if manifest.is_valid => {
                manifest.is_valid = false;
                if let Err(e) = self.write_manifest(&manifest) {
                    log::warn!("Failed to mark backup {} invalid: {}", backup_id, e);
                }
            }
            Ok(_) => {}
            Err(e) => log::debug!("Backup {} manifest unavailable: {}", backup_id, e),
        }
    }

    pub fn pin(&self, backup_id: &str) {
        self.pins().insert(backup_id.to_string());
    }

    pub fn unpin(&self, backup_id: &str) {
        self.pins().remove(backup_id);
    }

    #[must_use]
    pub fn is_pinned(&self, backup_id: &str) -> bool {
        self.pins().contains(backup_id)
    }
}
