//! Persistence of scan results, clean tasks and backup manifests.
//!
//! The core writes through the [`Repository`] trait at fixed points: when a
//! scan finishes and whenever a clean task changes status. Two
//! implementations ship:
//!
//! * [`MemoryRepository`]: process-lifetime storage, used by tests and when
//!   no database path is configured
//! * [`SqliteRepository`]: JSON records in a SQLite file

pub mod sqlite;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::model::{BackupManifest, CleanTask, ScanResult};

pub use sqlite::SqliteRepository;

/// Errors raised by a repository.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to encode or decode record: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage for the records the core produces.
pub trait Repository: Send + Sync {
    /// Insert or replace a scan result.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the record cannot be written.
    fn save_scan_result(&self, result: &ScanResult) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the record cannot be read.
    fn get_scan_result(&self, scan_id: &str) -> Result<Option<ScanResult>, StoreError>;

    /// Id of the most recently finished scan.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be queried.
    fn latest_scan_id(&self) -> Result<Option<String>, StoreError>;

    /// Insert or replace a clean task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the record cannot be written.
    fn save_clean_task(&self, task: &CleanTask) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the record cannot be read.
    fn get_clean_task(&self, task_id: &str) -> Result<Option<CleanTask>, StoreError>;

    /// Insert or replace a backup manifest.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the record cannot be written.
    fn save_backup_manifest(&self, manifest: &BackupManifest) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the record cannot be read.
    fn get_backup_manifest(&self, backup_id: &str) -> Result<Option<BackupManifest>, StoreError>;
}

#[derive(Debug, Default)]
struct Tables {
    scans: HashMap<String, ScanResult>,
    scan_order: Vec<String>,
    tasks: HashMap<String, CleanTask>,
    manifests: HashMap<String, BackupManifest>,
}

/// In-process repository.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Repository for MemoryRepository {
    fn save_scan_result(&self, result: &ScanResult) -> Result<(), StoreError> {
        let mut t = self.lock();
        t.scan_order.retain(|id| *id != result.scan_id);
        t.scan_order.push(result.scan_id.clone());
        t.scans.insert(result.scan_id.clone(), result.clone());
        Ok(())
    }

    fn get_scan_result(&self, scan_id: &str) -> Result<Option<ScanResult>, StoreError> {
        Ok(self.lock().scans.get(scan_id).cloned())
    }

    fn latest_scan_id(&self) -> Result<Option<String>, StoreError> {
        Ok(self.lock().scan_order.last().cloned())
    }

    fn save_clean_task(&self, task: &CleanTask) -> Result<(), StoreError> {
        self.lock().tasks.insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    fn get_clean_task(&self, task_id: &str) -> Result<Option<CleanTask>, StoreError> {
        Ok(self.lock().tasks.get(task_id).cloned())
    }

    fn save_backup_manifest(&self, manifest: &BackupManifest) -> Result<(), StoreError> {
        self.lock()
            .manifests
            .insert(manifest.backup_id.clone(), manifest.clone());
        Ok(())
    }

    fn get_backup_manifest(&self, backup_id: &str) -> Result<Option<BackupManifest>, StoreError> {
        Ok(self.lock().manifests.get(backup_id).cloned())
    }
}
