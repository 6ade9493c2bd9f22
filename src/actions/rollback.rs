//! Restore and retention over the backup vault and the quarantine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{BackupError, BackupVault, QuarantineError, QuarantineStore};
use crate::config::Config;
use crate::model::{BackupManifest, BackupSummary, RestoreReport};
use crate::store::{Repository, StoreError};

/// Error type for rollback operations.
#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
    #[error("unknown clean task: {0}")]
    UnknownTask(String),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Quarantine(#[from] QuarantineError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Undo for clean tasks, plus pruning.
pub struct RollbackManager {
    backups: Arc<BackupVault>,
    quarantine: Arc<QuarantineStore>,
    repository: Arc<dyn Repository>,
    backup_retention_days: u32,
    quarantine_retention_days: u32,
}

impl RollbackManager {
    #[must_use]
    pub fn new(
        config: &Config,
        backups: Arc<BackupVault>,
        quarantine: Arc<QuarantineStore>,
        repository: Arc<dyn Repository>,
    ) -> Self {
        Self {
            backups,
            quarantine,
            repository,
            backup_retention_days: config.safety.backup.retention_days,
            quarantine_retention_days: config.safety.quarantine.retention_days,
        }
    }

    /// Restore a backup, or only the `selected` original paths of it.
    ///
    /// # Errors
    ///
    /// See [`BackupVault::restore`].
    pub fn restore(
        &self,
        backup_id: &str,
        selected: Option<&[PathBuf]>,
    ) -> Result<RestoreReport, BackupError> {
        self.backups.restore(backup_id, selected)
    }

    /// # Errors
    ///
    /// Returns [`BackupError`] if the vault cannot be listed.
    pub fn list_backups(&self) -> Result<Vec<BackupSummary>, BackupError> {
        self.backups.list()
    }

    /// # Errors
    ///
    /// Returns [`BackupError`] for unknown or corrupt backups.
    pub fn backup_info(&self, backup_id: &str) -> Result<BackupManifest, BackupError> {
        self.backups.load_manifest(backup_id)
    }

    /// # Errors
    ///
    /// See [`BackupVault::delete`].
    pub fn delete_backup(&self, backup_id: &str) -> Result<(), BackupError> {
        self.backups.delete(backup_id)
    }

    /// Prune backups older than `days`, or the configured retention.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError`] if the vault cannot be listed.
    pub fn prune(&self, days: Option<u32>) -> Result<usize, BackupError> {
        let days = days.unwrap_or(self.backup_retention_days);
        let removed = self.backups.prune_older_than(days)?;
        log::info!("Pruned {} backup(s) older than {} day(s)", removed, days);
        Ok(removed)
    }

    /// Purge quarantined items older than `days`, or the configured retention.
    ///
    /// # Errors
    ///
    /// Returns [`QuarantineError`] if the quarantine log cannot be updated.
    pub fn purge_quarantine(&self, days: Option<u32>) -> Result<usize, QuarantineError> {
        self.quarantine
            .purge_older_than(days.unwrap_or(self.quarantine_retention_days))
    }

    /// Move the latest quarantined copy of `original` back.
    ///
    /// # Errors
    ///
    /// [`QuarantineError::Missing`] when nothing for that path is in
    /// quarantine, or the failure of the move itself.
    pub fn restore_from_quarantine(&self, original: &Path) -> Result<(), QuarantineError> {
        match self.quarantine.find_latest(original)? {
            Some(entry) => self.quarantine.restore(&entry),
            None => Err(QuarantineError::Missing(original.to_path_buf())),
        }
    }

    /// Undo a clean task: each file comes back from quarantine, and files
    /// that cannot be recovered that way come from the task's backup.
    ///
    /// # Errors
    ///
    /// Fails for unknown tasks; per-file failures are counted in the report.
    pub fn restore_task(&self, task_id: &str) -> Result<RestoreReport, RollbackError> {
        let task = self
            .repository
            .get_clean_task(task_id)?
            .ok_or_else(|| RollbackError::UnknownTask(task_id.to_string()))?;

        let mut report = RestoreReport::default();
        let mut leftovers = Vec::new();
        for path in &task.files_to_clean {
            match self.restore_from_quarantine(path) {
                Ok(()) => report.restored += 1,
                Err(QuarantineError::Missing(_)) if !path.exists() => leftovers.push(path.clone()),
                Err(QuarantineError::Missing(_)) => {}
                Err(e) => {
                    log::debug!("Quarantine restore of {} failed: {}", path.display(), e);
                    leftovers.push(path.clone());
                }
            }
        }

        if leftovers.is_empty() {
            return Ok(report);
        }
        match &task.backup_id {
            Some(backup_id) => match self.backups.restore(backup_id, Some(leftovers.as_slice())) {
                Ok(from_backup) => report.absorb(from_backup),
                Err(e) => {
                    log::warn!("Backup {} unusable: {}", backup_id, e);
                    for path in leftovers {
                        report.record_failure(path, e.to_string());
                    }
                }
            },
            None => {
                for path in leftovers {
                    report.record_failure(path, "not in quarantine and no backup");
                }
            }
        }
        Ok(report)
    }
}
