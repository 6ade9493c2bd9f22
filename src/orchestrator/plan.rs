//! Plan steps supplied by a planner.
//!
//! A planner hands over raw JSON steps of the form
//! `{"action": ..., "path": ..., "parameters": {...}}`. They are validated
//! into the closed [`PlanStep`] enum before anything runs; a step that does
//! not validate is reported and skipped.
//!
//! A step without an action gets one inferred from its path: an existing
//! directory becomes `delete_dir`, an existing file `delete_file`. Steps
//! marked `"safety": "forbid"` never run.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Category;

/// Why a raw step was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("step is not a JSON object")]
    NotAnObject,

    #[error("step has no action and none can be inferred")]
    MissingAction,

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("'{0}' requires a path")]
    MissingPath(&'static str),

    #[error("invalid parameters for '{action}': {reason}")]
    InvalidParameters { action: &'static str, reason: String },

    #[error("step is marked forbid")]
    Forbidden,
}

/// One validated step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStep {
    /// Scan; missing lists fall back to the configured directories.
    ScanPaths {
        paths: Option<Vec<PathBuf>>,
        exclude_paths: Option<Vec<PathBuf>>,
    },
    /// Clean the result of the plan's most recent scan.
    PerformCleanup {
        categories: Option<Vec<Category>>,
        /// `None` defers to `safety.backup.enabled`.
        create_backup: Option<bool>,
        include_confirm: bool,
        task_name: Option<String>,
    },
    DeleteFile { path: PathBuf, create_backup: bool },
    DeleteDir { path: PathBuf, create_backup: bool },
}

#[derive(Debug, Deserialize)]
struct RawStep {
    action: Option<String>,
    path: Option<PathBuf>,
    #[serde(default)]
    parameters: Option<Value>,
    safety: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScanParams {
    paths: Option<Vec<PathBuf>>,
    exclude_paths: Option<Vec<PathBuf>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CleanupParams {
    categories: Option<Vec<Category>>,
    create_backup: Option<bool>,
    include_confirm: bool,
    task_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DeleteParams {
    create_backup: bool,
    path: Option<PathBuf>,
}

impl Default for DeleteParams {
    fn default() -> Self {
        Self {
            create_backup: true,
            path: None,
        }
    }
}

fn params<T: DeserializeOwned + Default>(
    action: &'static str,
    raw: Option<Value>,
) -> Result<T, PlanError> {
    match raw {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => {
            serde_json::from_value(value).map_err(|e| PlanError::InvalidParameters {
                action,
                reason: e.to_string(),
            })
        }
    }
}

fn infer_action(path: Option<&Path>) -> Option<&'static str> {
    let metadata = std::fs::metadata(path?).ok()?;
    if metadata.is_dir() {
        Some("delete_dir")
    } else if metadata.is_file() {
        Some("delete_file")
    } else {
        None
    }
}

impl PlanStep {
    /// Validate one raw step.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] describing the first problem found.
    pub fn from_value(value: &Value) -> Result<Self, PlanError> {
        if !value.is_object() {
            return Err(PlanError::NotAnObject);
        }
        let raw: RawStep = serde_json::from_value(value.clone()).map_err(|e| {
            PlanError::InvalidParameters {
                action: "step",
                reason: e.to_string(),
            }
        })?;
        if raw
            .safety
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("forbid"))
        {
            return Err(PlanError::Forbidden);
        }

        let action = match raw.action.as_deref().map(str::trim) {
            Some(a) if !a.is_empty() => a.to_string(),
            _ => infer_action(raw.path.as_deref())
                .ok_or(PlanError::MissingAction)?
                .to_string(),
        };

        match action.as_str() {
            "scan_paths" => {
                let p: ScanParams = params("scan_paths", raw.parameters)?;
                Ok(Self::ScanPaths {
                    paths: p.paths.filter(|v| !v.is_empty()),
                    exclude_paths: p.exclude_paths.filter(|v| !v.is_empty()),
                })
            }
            "perform_cleanup" => {
                let p: CleanupParams = params("perform_cleanup", raw.parameters)?;
                Ok(Self::PerformCleanup {
                    categories: p.categories.filter(|v| !v.is_empty()),
                    create_backup: p.create_backup,
                    include_confirm: p.include_confirm,
                    task_name: p.task_name,
                })
            }
            "delete_file" | "delete_dir" => {
                let name = if action == "delete_file" {
                    "delete_file"
                } else {
                    "delete_dir"
                };
                let p: DeleteParams = params(name, raw.parameters)?;
                let path = raw.path.or(p.path).ok_or(PlanError::MissingPath(name))?;
                Ok(if name == "delete_file" {
                    Self::DeleteFile {
                        path,
                        create_backup: p.create_backup,
                    }
                } else {
                    Self::DeleteDir {
                        path,
                        create_backup: p.create_backup,
                    }
                })
            }
            _ => Err(PlanError::UnknownAction(action)),
        }
    }

    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::ScanPaths { .. } => "scan_paths",
            Self::PerformCleanup { .. } => "perform_cleanup",
            Self::DeleteFile { .. } => "delete_file",
            Self::DeleteDir { .. } => "delete_dir",
        }
    }
}

/// Pull the step list out of a planner document.
///
/// Accepts a bare array, or an object holding the list under `steps`,
/// `cleanup_plan`, `actions` or `plan`.
#[must_use]
pub fn steps_from_document(document: Value) -> Option<Vec<Value>> {
    match document {
        Value::Array(steps) => Some(steps),
        Value::Object(mut map) => ["steps", "cleanup_plan", "actions", "plan"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(steps)) => Some(steps),
                _ => None,
            }),
        _ => None,
    }
}

/// What happened to one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Done,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub action: Option<String>,
    pub status: StepStatus,
    pub detail: String,
}

/// Outcome of a whole plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    pub steps: Vec<StepReport>,
}

impl PlanReport {
    pub(crate) fn record(
        &mut self,
        action: Option<&str>,
        status: StepStatus,
        detail: impl Into<String>,
    ) {
        let index = self.steps.len();
        let detail = detail.into();
        match status {
            StepStatus::Done => log::info!("Plan step {}: {}", index + 1, detail),
            StepStatus::Skipped => log::warn!("Plan step {} skipped: {}", index + 1, detail),
            StepStatus::Failed => log::error!("Plan step {} failed: {}", index + 1, detail),
        }
        self.steps.push(StepReport {
            index,
            action: action.map(str::to_string),
            status,
            detail,
        });
    }

    #[must_use]
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}
