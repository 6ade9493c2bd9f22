//! Entry point for callers: sequences the scanner, the cleaner and recovery.
//!
//! # Overview
//!
//! [`TaskOrchestrator`] owns one instance of every subsystem, built once
//! from a [`Config`], and exposes their operations to the CLI, a scheduler or
//! a planner. It also executes plans: ordered lists of raw JSON steps
//! validated into [`PlanStep`] values and run one after another, each scan
//! or clean step waiting for a terminal state before the next begins.
//!
//! # Example
//!
//! ```no_run
//! use diskwarden::config::Config;
//! use diskwarden::orchestrator::TaskOrchestrator;
//! use serde_json::json;
//!
//! let orchestrator = TaskOrchestrator::open(Config::default()).unwrap();
//! let report = orchestrator.execute_plan(&[
//!     json!({"action": "scan_paths", "parameters": {"paths": ["/tmp"]}}),
//!     json!({"action": "perform_cleanup", "parameters": {"categories": ["temp_files"]}}),
//! ]);
//! println!("{} step(s) done", report.steps.len());
//! ```

pub mod plan;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::actions::{
    BackupError, BackupVault, CleanOptions, Cleaner, QuarantineError, QuarantineOutcome,
    QuarantineStore, RollbackError, RollbackManager,
};
use crate::config::Config;
use crate::model::{
    BackupSummary, CleanProgress, CleanTask, QuarantineLogEntry, RestoreReport, SafetyTier,
    ScanProgress, ScanResult, ScanState, TaskStatus,
};
use crate::paths;
use crate::rules::RuleEngine;
use crate::scanner::{Scanner, StopOutcome};
use crate::store::{MemoryRepository, Repository, SqliteRepository};

pub use plan::{steps_from_document, PlanError, PlanReport, PlanStep, StepReport, StepStatus};

/// How often plan execution re-checks a running scan or clean.
const PLAN_POLL: Duration = Duration::from_secs(1);

/// A collaborator that turns a goal into raw plan steps.
pub trait Planner {
    /// # Errors
    ///
    /// Returns an error when no plan can be produced.
    fn plan(&self, goal: &str) -> Result<Vec<Value>>;
}

/// Planner reading a prepared plan document from disk.
///
/// The goal is only logged; the file decides the steps.
#[derive(Debug, Clone)]
pub struct JsonPlanFile {
    path: PathBuf,
}

impl JsonPlanFile {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Planner for JsonPlanFile {
    fn plan(&self, goal: &str) -> Result<Vec<Value>> {
        log::debug!("Loading plan for '{}' from {}", goal, self.path.display());
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read plan file: {}", self.path.display()))?;
        let document: Value = serde_json::from_str(&content)
            .with_context(|| format!("Plan file is not valid JSON: {}", self.path.display()))?;
        steps_from_document(document)
            .with_context(|| format!("Plan file has no step list: {}", self.path.display()))
    }
}

/// Owns the scanner, cleaner and recovery subsystems.
pub struct TaskOrchestrator {
    config: Arc<Config>,
    repository: Arc<dyn Repository>,
    scanner: Scanner,
    cleaner: Cleaner,
    rollback: RollbackManager,
    quarantine: Arc<QuarantineStore>,
    backups: Arc<BackupVault>,
}

impl TaskOrchestrator {
    #[must_use]
    pub fn new(config: Config, repository: Arc<dyn Repository>) -> Self {
        let config = Arc::new(config);
        let scanner = Scanner::new(Arc::clone(&config), Arc::clone(&repository));
        let quarantine = Arc::new(QuarantineStore::new(
            config.safety.quarantine.path.clone(),
        ));
        let backups = Arc::new(BackupVault::new(config.safety.backup.path.clone()));
        let cleaner = Cleaner::new(
            Arc::clone(&config),
            Arc::clone(scanner.rules()),
            Arc::clone(&repository),
            Arc::clone(&quarantine),
            Arc::clone(&backups),
        );
        let rollback = RollbackManager::new(
            &config,
            Arc::clone(&backups),
            Arc::clone(&quarantine),
            Arc::clone(&repository),
        );
        Self {
            config,
            repository,
            scanner,
            cleaner,
            rollback,
            quarantine,
            backups,
        }
    }

    /// Build with the repository `storage.database_path` selects: SQLite at
    /// that path, or in-memory when unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(config: Config) -> Result<Self> {
        let repository: Arc<dyn Repository> = match &config.storage.database_path {
            Some(path) => Arc::new(
                SqliteRepository::open(path)
                    .with_context(|| format!("Failed to open database: {}", path.display()))?,
            ),
            None => Arc::new(MemoryRepository::new()),
        };
        Ok(Self::new(config, repository))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn rules(&self) -> &RuleEngine {
        self.scanner.rules()
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    // Scans

    pub fn start_scan(
        &self,
        roots: Option<Vec<PathBuf>>,
        excludes: Option<Vec<PathBuf>>,
    ) -> Option<String> {
        self.scanner.start(roots, excludes)
    }

    #[must_use]
    pub fn scan_progress(&self) -> ScanProgress {
        self.scanner.progress()
    }

    pub fn pause_scan(&self, scan_id: &str) -> bool {
        self.scanner.pause(scan_id)
    }

    pub fn resume_scan(&self, scan_id: &str) -> bool {
        self.scanner.resume(scan_id)
    }

    pub fn stop_scan(&self, scan_id: &str) -> StopOutcome {
        self.scanner.stop(scan_id)
    }

    pub fn wait_scan(&self, timeout: Duration) -> ScanState {
        self.scanner.wait(timeout)
    }

    #[must_use]
    pub fn active_scan_id(&self) -> Option<String> {
        self.scanner.active_scan_id()
    }

    /// Why the last scan failed, if it did.
    #[must_use]
    pub fn last_scan_error(&self) -> Option<String> {
        self.scanner.last_error()
    }

    #[must_use]
    pub fn scan_result(&self, scan_id: &str) -> Option<ScanResult> {
        self.scanner.result(scan_id)
    }

    /// The last finished scan of this process, or the newest one stored.
    #[must_use]
    pub fn latest_scan_result(&self) -> Option<ScanResult> {
        if let Some(result) = self.scanner.latest_result() {
            return Some(result);
        }
        match self.repository.latest_scan_id() {
            Ok(Some(id)) => self.scanner.result(&id),
            Ok(None) => None,
            Err(e) => {
                log::warn!("Failed to look up latest scan: {}", e);
                None
            }
        }
    }

    // Clean tasks

    /// Start cleaning the result of `scan_id`. Returns `None` for an unknown
    /// scan, an empty selection or while another task runs.
    pub fn start_clean(&self, scan_id: &str, options: &CleanOptions) -> Option<String> {
        let Some(scan) = self.scanner.result(scan_id) else {
            log::warn!("Unknown scan {}, cannot clean", scan_id);
            return None;
        };
        self.cleaner.start(&scan, options)
    }

    #[must_use]
    pub fn clean_progress(&self) -> Option<CleanProgress> {
        self.cleaner.progress()
    }

    pub fn pause_clean(&self, task_id: &str) -> bool {
        self.cleaner.pause(task_id)
    }

    pub fn resume_clean(&self, task_id: &str) -> bool {
        self.cleaner.resume(task_id)
    }

    pub fn stop_clean(&self, task_id: &str) -> bool {
        self.cleaner.stop(task_id)
    }

    pub fn wait_clean(&self, timeout: Duration) -> Option<TaskStatus> {
        self.cleaner.wait(timeout)
    }

    #[must_use]
    pub fn active_task_id(&self) -> Option<String> {
        self.cleaner.active_task_id()
    }

    #[must_use]
    pub fn clean_task(&self, task_id: &str) -> Option<CleanTask> {
        self.cleaner.task(task_id)
    }

    #[must_use]
    pub fn select_files(&self, scan: &ScanResult, options: &CleanOptions) -> Vec<PathBuf> {
        self.cleaner
            .select_files(scan, options)
            .into_iter()
            .map(|d| d.path.clone())
            .collect()
    }

    // Recovery

    /// # Errors
    ///
    /// See [`BackupVault::restore`].
    pub fn restore_from_backup(
        &self,
        backup_id: &str,
        selected: Option<&[PathBuf]>,
    ) -> Result<RestoreReport, BackupError> {
        self.rollback.restore(backup_id, selected)
    }

    /// # Errors
    ///
    /// See [`RollbackManager::restore_task`].
    pub fn restore_task(&self, task_id: &str) -> Result<RestoreReport, RollbackError> {
        self.rollback.restore_task(task_id)
    }

    /// # Errors
    ///
    /// See [`RollbackManager::restore_from_quarantine`].
    pub fn restore_from_quarantine(&self, original: &Path) -> Result<(), QuarantineError> {
        self.rollback.restore_from_quarantine(original)
    }

    /// # Errors
    ///
    /// Returns [`BackupError`] if the vault cannot be listed.
    pub fn list_backups(&self) -> Result<Vec<BackupSummary>, BackupError> {
        self.rollback.list_backups()
    }

    /// # Errors
    ///
    /// See [`RollbackManager::delete_backup`].
    pub fn delete_backup(&self, backup_id: &str) -> Result<(), BackupError> {
        self.rollback.delete_backup(backup_id)
    }

    /// # Errors
    ///
    /// Returns [`BackupError`] if the vault cannot be listed.
    pub fn prune_backups(&self, days: Option<u32>) -> Result<usize, BackupError> {
        self.rollback.prune(days)
    }

    /// # Errors
    ///
    /// Returns [`QuarantineError`] if the quarantine log cannot be updated.
    pub fn purge_quarantine(&self, days: Option<u32>) -> Result<usize, QuarantineError> {
        self.rollback.purge_quarantine(days)
    }

    /// # Errors
    ///
    /// Returns [`QuarantineError`] if the quarantine log cannot be read.
    pub fn quarantine_entries(&self) -> Result<Vec<QuarantineLogEntry>, QuarantineError> {
        self.quarantine.entries()
    }

    // Plans

    /// Ask `planner` for steps toward `goal` and execute them.
    ///
    /// # Errors
    ///
    /// Returns the planner's error; step failures are in the report.
    pub fn run_planner(&self, planner: &dyn Planner, goal: &str) -> Result<PlanReport> {
        let steps = planner
            .plan(goal)
            .with_context(|| format!("Planner produced no plan for '{goal}'"))?;
        log::info!("Executing {} plan step(s) for '{}'", steps.len(), goal);
        Ok(self.execute_plan(&steps))
    }

    /// Execute raw steps in order. Malformed steps are skipped.
    pub fn execute_plan(&self, steps: &[Value]) -> PlanReport {
        let mut report = PlanReport::default();
        let mut last_scan: Option<String> = None;

        for raw in steps {
            let step = match PlanStep::from_value(raw) {
                Ok(step) => step,
                Err(e) => {
                    let action = raw.get("action").and_then(Value::as_str);
                    report.record(action, StepStatus::Skipped, e.to_string());
                    continue;
                }
            };
            let action = step.action();
            let (status, detail) = match step {
                PlanStep::ScanPaths {
                    paths,
                    exclude_paths,
                } => self.run_scan_step(paths, exclude_paths, &mut last_scan),
                PlanStep::PerformCleanup {
                    categories,
                    create_backup,
                    include_confirm,
                    task_name,
                } => {
                    let options = CleanOptions {
                        categories,
                        create_backup: create_backup.unwrap_or(self.config.safety.backup.enabled),
                        include_confirm,
                        name: task_name,
                    };
                    self.run_clean_step(last_scan.as_deref(), &options)
                }
                PlanStep::DeleteFile {
                    path,
                    create_backup,
                } => self.delete_path(&path, create_backup, false),
                PlanStep::DeleteDir {
                    path,
                    create_backup,
                } => self.delete_path(&path, create_backup, true),
            };
            report.record(Some(action), status, detail);
        }

        log::info!(
            "Plan finished: {} done, {} skipped, {} failed",
            report.count(StepStatus::Done),
            report.count(StepStatus::Skipped),
            report.count(StepStatus::Failed)
        );
        report
    }

    fn run_scan_step(
        &self,
        paths: Option<Vec<PathBuf>>,
        excludes: Option<Vec<PathBuf>>,
        last_scan: &mut Option<String>,
    ) -> (StepStatus, String) {
        let Some(scan_id) = self.scanner.start(paths, excludes) else {
            return (StepStatus::Failed, "scan could not start".to_string());
        };
        *last_scan = Some(scan_id.clone());

        let state = loop {
            let state = self.scanner.wait(PLAN_POLL);
            if state != ScanState::Scanning {
                break state;
            }
            let progress = self.scanner.progress();
            log::debug!(
                "Scan {} running: {} items, {:.0}%",
                scan_id,
                progress.items,
                progress.fraction * 100.0
            );
        };
        match (state, self.scanner.result(&scan_id)) {
            (ScanState::Completed, Some(result)) => (
                StepStatus::Done,
                format!("scan {} found {} item(s)", scan_id, result.total_items()),
            ),
            (state, _) => (
                StepStatus::Failed,
                format!("scan {scan_id} ended {state:?}"),
            ),
        }
    }

    fn run_clean_step(
        &self,
        scan_id: Option<&str>,
        options: &CleanOptions,
    ) -> (StepStatus, String) {
        let Some(scan_id) = scan_id else {
            return (
                StepStatus::Skipped,
                "no scan earlier in this plan to clean".to_string(),
            );
        };
        let Some(task_id) = self.start_clean(scan_id, options) else {
            return (
                StepStatus::Skipped,
                "no clean task started: nothing selected or another task running".to_string(),
            );
        };

        while self.cleaner.wait(PLAN_POLL).is_some_and(|s| !s.is_terminal()) {
            if let Some(progress) = self.cleaner.progress() {
                log::debug!(
                    "Clean {} running: {:.0}%",
                    task_id,
                    progress.fraction * 100.0
                );
            }
        }
        match self.cleaner.task(&task_id) {
            Some(task) if task.status == TaskStatus::Completed => {
                (StepStatus::Done, format!("task {}: {}", task_id, task.summary()))
            }
            Some(task) => (
                StepStatus::Failed,
                format!("task {}: {}", task_id, task.summary()),
            ),
            None => (StepStatus::Failed, format!("task {task_id} vanished")),
        }
    }

    /// Guarded removal of one path: safety rules, optional backup, then
    /// quarantine.
    fn delete_path(&self, path: &Path, create_backup: bool, is_dir: bool) -> (StepStatus, String) {
        let path = paths::absolute(path);
        let shown = path.display().to_string();
        let metadata = match std::fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(_) => return (StepStatus::Skipped, format!("{shown} does not exist")),
        };
        if metadata.is_dir() != is_dir {
            let expected = if is_dir { "a directory" } else { "a file" };
            return (StepStatus::Skipped, format!("{shown} is not {expected}"));
        }

        let rules = self.scanner.rules();
        let allowed = if is_dir {
            rules.can_remove_tree(&path)
        } else {
            match rules.describe(&path) {
                Ok(desc) => desc.eligible && desc.safety_tier != SafetyTier::Forbid,
                Err(e) => return (StepStatus::Failed, format!("{shown}: {e}")),
            }
        };
        if !allowed {
            return (
                StepStatus::Skipped,
                format!("{shown} is protected by safety rules"),
            );
        }

        let mut backup_id = None;
        if create_backup && self.config.safety.backup.enabled {
            match self.backups.create_pinned(std::slice::from_ref(&path), None) {
                Ok(manifest) => {
                    if let Err(e) = self.repository.save_backup_manifest(&manifest) {
                        log::warn!("Failed to record backup {}: {}", manifest.backup_id, e);
                    }
                    backup_id = Some(manifest.backup_id);
                }
                Err(e) => log::warn!("Backup of {} failed, continuing: {}", shown, e),
            }
        }

        let outcome = self.quarantine.quarantine(&path);
        if let Some(id) = &backup_id {
            self.backups.unpin(id);
        }
        match outcome {
            Ok(QuarantineOutcome::Moved(entry)) => (
                StepStatus::Done,
                format!("{} quarantined at {}", shown, entry.quarantine_path.display()),
            ),
            Ok(QuarantineOutcome::AlreadyGone) => {
                (StepStatus::Skipped, format!("{shown} already gone"))
            }
            Err(e) => (StepStatus::Failed, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn orchestrator(dir: &TempDir) -> TaskOrchestrator {
        let mut config = Config::default();
        config.safety.user_dirs.clear();
        config.safety.quarantine.path = dir.path().join("state/quarantine");
        config.safety.backup.path = dir.path().join("state/backups");
        config.storage.database_path = None;
        TaskOrchestrator::open(config).unwrap()
    }

    #[test]
    fn test_plan_skips_bad_steps_and_deletes_guarded() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir);
        let work = dir.path().join("work");
        fs::create_dir_all(work.join("cache")).unwrap();
        fs::write(work.join("junk.tmp"), b"junk").unwrap();
        fs::write(work.join("cache/blob"), b"blob").unwrap();

        let report = orchestrator.execute_plan(&[
            json!({"action": "explode"}),
            json!(42),
            json!({"action": "delete_file", "path": work.join("junk.tmp")}),
            json!({"action": "delete_dir", "path": work.join("cache"), "parameters": {"create_backup": false}}),
            json!({"action": "delete_file", "path": work.join("missing.tmp")}),
        ]);

        let statuses: Vec<StepStatus> = report.steps.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![
                StepStatus::Skipped,
                StepStatus::Skipped,
                StepStatus::Done,
                StepStatus::Done,
                StepStatus::Skipped
            ]
        );
        assert!(!work.join("junk.tmp").exists());
        assert!(!work.join("cache").exists());
        assert_eq!(orchestrator.quarantine_entries().unwrap().len(), 2);
        assert_eq!(orchestrator.list_backups().unwrap().len(), 1);
    }

    #[test]
    fn test_cleanup_without_scan_is_skipped() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir);
        let report = orchestrator.execute_plan(&[json!({"action": "perform_cleanup"})]);
        assert_eq!(report.count(StepStatus::Skipped), 1);
    }

    #[test]
    fn test_delete_refuses_protected_tree() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir);
        let report = orchestrator.execute_plan(&[json!({"action": "delete_dir", "path": "/usr"})]);
        assert_eq!(report.steps[0].status, StepStatus::Skipped);
        assert!(Path::new("/usr").exists());
    }

    #[test]
    fn test_delete_step_backup_is_released_after_move() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir);
        let work = dir.path().join("work");
        fs::create_dir_all(&work).unwrap();
        fs::write(work.join("old.log"), b"log line").unwrap();

        let report = orchestrator.execute_plan(&[json!({
            "action": "delete_file",
            "path": work.join("old.log"),
            "parameters": {"create_backup": true}
        })]);
        assert_eq!(report.steps[0].status, StepStatus::Done);

        let backups = orchestrator.list_backups().unwrap();
        assert_eq!(backups.len(), 1);
        assert!(!orchestrator.backups.is_pinned(&backups[0].backup_id));

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(orchestrator.prune_backups(Some(0)).unwrap(), 1);
    }
}
