//! SQLite-backed repository.
//!
//! Records are stored as JSON bodies keyed by id, one table per record type.
//! The schema is versioned through `PRAGMA user_version`.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Repository, StoreError};
use crate::model::{BackupManifest, CleanTask, ScanResult};

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS scan_result (
    id          TEXT PRIMARY KEY,
    finished_at TEXT,
    body        TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS clean_task (
    id     TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    body   TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS backup_manifest (
    id         TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    body       TEXT NOT NULL
);
";

/// Repository over a single SQLite connection.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open or create the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the file cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version < SCHEMA_VERSION {
            log::debug!(
                "Migrating schema from version {} to {}",
                version,
                SCHEMA_VERSION
            );
        }
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load<T: DeserializeOwned>(&self, sql: &str, id: &str) -> Result<Option<T>, StoreError> {
        let body: Option<String> = self
            .conn()
            .query_row(sql, params![id], |row| row.get(0))
            .optional()?;
        body.map(|b| serde_json::from_str(&b))
            .transpose()
            .map_err(StoreError::from)
    }
}

fn encode<T: Serialize>(record: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string(record)?)
}

impl Repository for SqliteRepository {
    fn save_scan_result(&self, result: &ScanResult) -> Result<(), StoreError> {
        let body = encode(result)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO scan_result (id, finished_at, body) VALUES (?1, ?2, ?3)",
            params![
                result.scan_id,
                result.finished_at.map(|t| t.to_rfc3339()),
                body
            ],
        )?;
        Ok(())
    }

    fn get_scan_result(&self, scan_id: &str) -> Result<Option<ScanResult>, StoreError> {
        self.load("SELECT body FROM scan_result WHERE id = ?1", scan_id)
    }

    fn latest_scan_id(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id FROM scan_result ORDER BY finished_at DESC, rowid DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn save_clean_task(&self, task: &CleanTask) -> Result<(), StoreError> {
        let body = encode(task)?;
        let status = serde_json::to_value(task.status)?
            .as_str()
            .unwrap_or_default()
            .to_string();
        self.conn().execute(
            "INSERT OR REPLACE INTO clean_task (id, status, body) VALUES (?1, ?2, ?3)",
            params![task.task_id, status, body],
        )?;
        Ok(())
    }

    fn get_clean_task(&self, task_id: &str) -> Result<Option<CleanTask>, StoreError> {
        self.load("SELECT body FROM clean_task WHERE id = ?1", task_id)
    }

    fn save_backup_manifest(&self, manifest: &BackupManifest) -> Result<(), StoreError> {
        let body = encode(manifest)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO backup_manifest (id, created_at, body) VALUES (?1, ?2, ?3)",
            params![manifest.backup_id, manifest.created_at.to_rfc3339(), body],
        )?;
        Ok(())
    }

    fn get_backup_manifest(&self, backup_id: &str) -> Result<Option<BackupManifest>, StoreError> {
        self.load("SELECT body FROM backup_manifest WHERE id = ?1", backup_id)
    }
}
