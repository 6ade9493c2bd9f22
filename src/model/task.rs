//! Clean task records.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::file::Category;

/// Lifecycle of a clean task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Stopped,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }
}

/// One cleanup run over files selected from a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanTask {
    pub task_id: String,
    pub name: String,
    pub scan_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub files_to_clean: Vec<PathBuf>,
    pub categories: Vec<Category>,
    pub status: TaskStatus,
    pub progress: f64,
    pub total_size: u64,
    /// Bytes actually moved to quarantine; only grows while running.
    pub cleaned_size: u64,
    pub cleaned_count: usize,
    pub failed_count: usize,
    pub backup_id: Option<String>,
    pub error_message: Option<String>,
}

impl CleanTask {
    #[must_use]
    pub fn new(task_id: String, name: String, scan_id: Option<String>) -> Self {
        Self {
            task_id,
            name,
            scan_id,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            files_to_clean: Vec::new(),
            categories: Vec::new(),
            status: TaskStatus::Pending,
            progress: 0.0,
            total_size: 0,
            cleaned_size: 0,
            cleaned_count: 0,
            failed_count: 0,
            backup_id: None,
            error_message: None,
        }
    }

    /// Move to a terminal status and stamp the finish time.
    pub fn finish(&mut self, status: TaskStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
        if status == TaskStatus::Completed {
            self.progress = 1.0;
        }
    }

    /// Human-readable one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} cleaned ({} bytes of {}), {} failed, status {:?}",
            self.cleaned_count, self.cleaned_size, self.total_size, self.failed_count, self.status
        )
    }
}

/// Snapshot of a clean task's progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CleanProgress {
    pub status: TaskStatus,
    pub cleaned_size: u64,
    pub total_size: u64,
    pub fraction: f64,
}

impl CleanProgress {
    /// Build a snapshot, clamping the fraction into `[0, 1]`.
    #[must_use]
    pub fn new(status: TaskStatus, cleaned_size: u64, total_size: u64) -> Self {
        let fraction = if status == TaskStatus::Completed {
            1.0
        } else if total_size == 0 {
            0.0
        } else {
            (cleaned_size as f64 / total_size as f64).clamp(0.0, 1.0)
        };
        Self {
            status,
            cleaned_size,
            total_size,
            fraction,
        }
    }
}
