//! Records that make deletions reversible: backup manifests and the
//! quarantine log.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One copied file or directory inside a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub original_path: PathBuf,
    /// Location of the copy, relative to the backup's payload directory.
    pub rel_path: PathBuf,
    pub size: u64,
    pub is_dir: bool,
}

/// Description of one full-copy snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub backup_id: String,
    pub created_at: DateTime<Utc>,
    pub source_task_id: Option<String>,
    /// Payload directory holding the copies.
    pub backup_root: PathBuf,
    pub entries: Vec<BackupEntry>,
    pub total_size: u64,
    /// False once any part of the payload has been pruned or lost.
    pub is_valid: bool,
}

impl BackupManifest {
    #[must_use]
    pub fn summary(&self) -> BackupSummary {
        BackupSummary {
            backup_id: self.backup_id.clone(),
            created_at: self.created_at,
            source_task_id: self.source_task_id.clone(),
            file_count: self.entries.len(),
            total_size: self.total_size,
            is_valid: self.is_valid && self.backup_root.exists(),
        }
    }
}

/// Listing row for a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub backup_id: String,
    pub created_at: DateTime<Utc>,
    pub source_task_id: Option<String>,
    pub file_count: usize,
    pub total_size: u64,
    pub is_valid: bool,
}

/// Outcome of a restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub restored: usize,
    pub failed: usize,
    /// Per-entry failure reasons.
    pub failures: Vec<(PathBuf, String)>,
}

impl RestoreReport {
    pub(crate) fn record_failure(&mut self, path: PathBuf, reason: impl Into<String>) {
        self.failed += 1;
        self.failures.push((path, reason.into()));
    }

    #[must_use]
    pub fn all_restored(&self) -> bool {
        self.failed == 0
    }

    /// Merge another report into this one.
    pub fn absorb(&mut self, other: RestoreReport) {
        self.restored += other.restored;
        self.failed += other.failed;
        self.failures.extend(other.failures);
    }

    #[must_use]
    pub fn summary(&self) -> String {
        if self.all_restored() {
            format!("Restored {} item(s)", self.restored)
        } else {
            format!(
                "Restored {} item(s), {} failed",
                self.restored, self.failed
            )
        }
    }
}

/// A file moved into quarantine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineLogEntry {
    pub original_path: PathBuf,
    pub quarantine_path: PathBuf,
    pub size: u64,
    pub timestamp: DateTime<Utc>,
}
