//! Clean tasks: Idle → Running ⇄ Paused → {Completed, Stopped, Failed}.
//!
//! # Overview
//!
//! [`Cleaner::start`] selects files from a [`ScanResult`], optionally backs
//! them up, and spawns one worker thread that quarantines them one at a
//! time. A single file failing never aborts the task; it is counted and the
//! worker moves on.
//!
//! Only one clean task is active at a time. Every status transition is saved
//! through the [`Repository`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::Utc;

use super::{BackupVault, QuarantineOutcome, QuarantineStore};
use crate::config::Config;
use crate::control::{panic_message, WorkerControl};
use crate::model::{
    Category, CleanProgress, CleanTask, FileDescriptor, SafetyTier, ScanResult, TaskStatus,
};
use crate::rules::{DuplicateIndex, RuleEngine};
use crate::store::Repository;

/// What to clean and how.
#[derive(Debug, Clone, Default)]
pub struct CleanOptions {
    /// Categories to include; `None` means all of them.
    pub categories: Option<Vec<Category>>,
    pub create_backup: bool,
    /// Also clean files tiered `confirm`.
    pub include_confirm: bool,
    pub name: Option<String>,
}

struct CleanRun {
    task_id: String,
    control: Arc<WorkerControl>,
    total_size: u64,
    cleaned_size: AtomicU64,
    cleaned_count: AtomicUsize,
    failed_count: AtomicUsize,
}

#[derive(Default)]
struct Slot {
    task: Option<CleanTask>,
    run: Option<Arc<CleanRun>>,
    /// Task id reserved while its backup is taken, before the worker exists.
    starting: Option<String>,
}

impl Slot {
    fn is_busy(&self) -> bool {
        self.run.is_some() || self.starting.is_some()
    }
}

#[derive(Default)]
struct Shared {
    slot: Mutex<Slot>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs clean tasks against the quarantine.
pub struct Cleaner {
    config: Arc<Config>,
    rules: Arc<RuleEngine>,
    repository: Arc<dyn Repository>,
    quarantine: Arc<QuarantineStore>,
    backups: Arc<BackupVault>,
    shared: Arc<Shared>,
}

impl Cleaner {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        rules: Arc<RuleEngine>,
        repository: Arc<dyn Repository>,
        quarantine: Arc<QuarantineStore>,
        backups: Arc<BackupVault>,
    ) -> Self {
        Self {
            config,
            rules,
            repository,
            quarantine,
            backups,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Files of `scan` the options allow to be cleaned.
    ///
    /// Eligibility is re-checked against the scan's duplicate sets; `forbid`
    /// files are never selected and `confirm` files only with
    /// `include_confirm`.
    #[must_use]
    pub fn select_files<'a>(
        &self,
        scan: &'a ScanResult,
        options: &CleanOptions,
    ) -> Vec<&'a FileDescriptor> {
        let index = DuplicateIndex::new(&scan.duplicate_sets, self.rules.keep_strategy());
        scan.descriptors
            .iter()
            .filter(|d| match &options.categories {
                None => true,
                Some(categories) => {
                    categories.contains(&d.category)
                        || (categories.contains(&Category::DuplicateFiles)
                            && index.is_redundant(&d.path))
                }
            })
            .filter(|d| self.rules.can_delete_indexed(d, &index))
            .filter(|d| match d.safety_tier {
                SafetyTier::Safe => true,
                SafetyTier::Confirm => options.include_confirm,
                SafetyTier::Forbid => false,
            })
            .collect()
    }

    /// Start a clean task over `scan`.
    ///
    /// Returns `None` when a task is already active or nothing is selected.
    pub fn start(&self, scan: &ScanResult, options: &CleanOptions) -> Option<String> {
        let mut slot = self.shared.lock();
        if slot.is_busy() {
            log::warn!("A clean task is already running, rejecting new task");
            return None;
        }

        let selected = self.select_files(scan, options);
        if selected.is_empty() {
            log::info!("Nothing to clean in scan {}", scan.scan_id);
            return None;
        }
        let files: Vec<(PathBuf, u64)> = selected.iter().map(|d| (d.path.clone(), d.size)).collect();

        let task_id = uuid::Uuid::new_v4().to_string();
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| format!("clean {}", Utc::now().format("%Y-%m-%d %H:%M")));
        let mut task = CleanTask::new(task_id.clone(), name, Some(scan.scan_id.clone()));
        task.files_to_clean = files.iter().map(|(p, _)| p.clone()).collect();
        task.categories = options
            .categories
            .clone()
            .unwrap_or_else(|| Category::ALL.to_vec());
        task.total_size = files.iter().map(|(_, size)| size).sum();

        if options.create_backup {
            if self.config.safety.backup.enabled {
                // The backup copies every file; readers must not wait on it.
                slot.starting = Some(task_id.clone());
                slot.task = Some(task.clone());
                drop(slot);
                self.back_up(&mut task);
                slot = self.shared.lock();
            } else {
                log::info!("Backups are disabled, cleaning without one");
            }
        }
        slot.starting = None;

        let run = Arc::new(CleanRun {
            task_id: task_id.clone(),
            control: Arc::new(WorkerControl::new(Duration::from_millis(
                self.config.safety.pause_poll_ms,
            ))),
            total_size: task.total_size,
            cleaned_size: AtomicU64::new(0),
            cleaned_count: AtomicUsize::new(0),
            failed_count: AtomicUsize::new(0),
        });
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());

        let worker = Worker {
            quarantine: Arc::clone(&self.quarantine),
            backups: Arc::clone(&self.backups),
            repository: Arc::clone(&self.repository),
            shared: Arc::clone(&self.shared),
            run: Arc::clone(&run),
        };
        let spawned = thread::Builder::new()
            .name("diskwarden-clean".into())
            .spawn(move || worker.run(&files));
        if let Err(e) = spawned {
            log::error!("Failed to spawn clean worker: {}", e);
            task.error_message = Some(e.to_string());
            task.finish(TaskStatus::Failed);
            if let Some(id) = &task.backup_id {
                self.backups.unpin(id);
            }
            self.save(&task);
            slot.task = Some(task);
            self.shared.changed.notify_all();
            return None;
        }

        log::info!(
            "Clean task {} started: {} file(s), {} bytes",
            task_id,
            task.files_to_clean.len(),
            task.total_size
        );
        self.save(&task);
        slot.task = Some(task);
        slot.run = Some(run);
        Some(task_id)
    }

    fn back_up(&self, task: &mut CleanTask) {
        match self
            .backups
            .create_pinned(&task.files_to_clean, Some(task.task_id.as_str()))
        {
            Ok(manifest) => {
                if let Err(e) = self.repository.save_backup_manifest(&manifest) {
                    log::warn!("Failed to record backup {}: {}", manifest.backup_id, e);
                }
                task.backup_id = Some(manifest.backup_id);
            }
            Err(e) => log::warn!("Backup failed, cleaning without one: {}", e),
        }
    }

    fn save(&self, task: &CleanTask) {
        if let Err(e) = self.repository.save_clean_task(task) {
            log::warn!("Failed to save clean task {}: {}", task.task_id, e);
        }
    }

    fn set_paused(&self, task_id: &str, paused: bool) -> bool {
        let mut slot = self.shared.lock();
        let Some(run) = slot.run.as_ref().filter(|r| r.task_id == task_id).cloned() else {
            return false;
        };
        if paused {
            run.control.pause();
        } else {
            run.control.resume();
        }
        if let Some(task) = slot.task.as_mut() {
            task.status = if paused {
                TaskStatus::Paused
            } else {
                TaskStatus::Running
            };
            self.save(task);
        }
        log::info!(
            "Clean task {} {}",
            task_id,
            if paused { "paused" } else { "resumed" }
        );
        true
    }

    /// Pause the running task. Returns `false` if `task_id` is not running.
    pub fn pause(&self, task_id: &str) -> bool {
        self.set_paused(task_id, true)
    }

    /// Resume a paused task. Returns `false` if `task_id` is not running.
    pub fn resume(&self, task_id: &str) -> bool {
        self.set_paused(task_id, false)
    }

    /// Request a stop and wait up to `safety.stop_timeout_secs`. Returns
    /// whether the task reached a terminal state in time.
    pub fn stop(&self, task_id: &str) -> bool {
        let slot = self.shared.lock();
        let Some(run) = slot.run.as_ref().filter(|r| r.task_id == task_id).cloned() else {
            return false;
        };
        log::info!("Stopping clean task {}", task_id);
        run.control.request_stop();

        let timeout = Duration::from_secs(self.config.safety.stop_timeout_secs);
        let (slot, _) = self
            .shared
            .changed
            .wait_timeout_while(slot, timeout, |s| {
                s.run.as_ref().is_some_and(|r| r.task_id == task_id)
            })
            .unwrap_or_else(PoisonError::into_inner);
        let finished = slot.run.is_none();
        if !finished {
            log::warn!("Clean task {} still finishing after {:?}", task_id, timeout);
        }
        finished
    }

    /// Progress of the current or most recent task.
    #[must_use]
    pub fn progress(&self) -> Option<CleanProgress> {
        let slot = self.shared.lock();
        let task = slot.task.as_ref()?;
        Some(match &slot.run {
            Some(run) => CleanProgress::new(
                task.status,
                run.cleaned_size.load(Ordering::SeqCst),
                run.total_size,
            ),
            None => CleanProgress::new(task.status, task.cleaned_size, task.total_size),
        })
    }

    /// Block until no task is running or `timeout` passes. Returns the status
    /// of the current or most recent task.
    pub fn wait(&self, timeout: Duration) -> Option<TaskStatus> {
        let slot = self.shared.lock();
        let (slot, _) = self
            .shared
            .changed
            .wait_timeout_while(slot, timeout, |s| s.is_busy())
            .unwrap_or_else(PoisonError::into_inner);
        slot.task.as_ref().map(|t| t.status)
    }

    /// Id of the running task, if any.
    #[must_use]
    pub fn active_task_id(&self) -> Option<String> {
        let slot = self.shared.lock();
        slot.run
            .as_ref()
            .map(|run| run.task_id.clone())
            .or_else(|| slot.starting.clone())
    }

    /// A task by id, from memory or the repository.
    #[must_use]
    pub fn task(&self, task_id: &str) -> Option<CleanTask> {
        {
            let slot = self.shared.lock();
            if let Some(task) = slot.task.as_ref().filter(|t| t.task_id == task_id) {
                let mut task = task.clone();
                if let Some(run) = &slot.run {
                    run.fill(&mut task);
                }
                return Some(task);
            }
        }
        match self.repository.get_clean_task(task_id) {
            Ok(task) => task,
            Err(e) => {
                log::warn!("Failed to load clean task {}: {}", task_id, e);
                None
            }
        }
    }
}

impl CleanRun {
    /// Copy live counters into `task`.
    fn fill(&self, task: &mut CleanTask) {
        task.cleaned_size = self.cleaned_size.load(Ordering::SeqCst);
        task.cleaned_count = self.cleaned_count.load(Ordering::SeqCst);
        task.failed_count = self.failed_count.load(Ordering::SeqCst);
        task.progress =
            CleanProgress::new(task.status, task.cleaned_size, task.total_size).fraction;
    }
}

/// State moved into the clean worker.
struct Worker {
    quarantine: Arc<QuarantineStore>,
    backups: Arc<BackupVault>,
    repository: Arc<dyn Repository>,
    shared: Arc<Shared>,
    run: Arc<CleanRun>,
}

impl Worker {
    fn run(self, files: &[(PathBuf, u64)]) {
        let outcome =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.clean(files)));
        let (status, error) = match outcome {
            Ok(true) => (TaskStatus::Completed, None),
            Ok(false) => (TaskStatus::Stopped, None),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("Clean worker panicked: {}", message);
                (TaskStatus::Failed, Some(message))
            }
        };

        let mut slot = self.shared.lock();
        if let Some(task) = slot.task.as_mut() {
            self.run.fill(task);
            task.error_message = error;
            task.finish(status);
            if let Some(id) = &task.backup_id {
                self.backups.unpin(id);
            }
            if let Err(e) = self.repository.save_clean_task(task) {
                log::warn!("Failed to save clean task {}: {}", task.task_id, e);
            }
            log::info!("Clean task {}: {}", task.task_id, task.summary());
        }
        slot.run = None;
        self.shared.changed.notify_all();
    }

    /// Quarantine each file. Returns `false` when stopped early.
    fn clean(&self, files: &[(PathBuf, u64)]) -> bool {
        for (path, size) in files {
            if !self.run.control.checkpoint() {
                return false;
            }
            match self.quarantine.quarantine(path) {
                Ok(QuarantineOutcome::Moved(_)) => {
                    self.run.cleaned_size.fetch_add(*size, Ordering::SeqCst);
                    self.run.cleaned_count.fetch_add(1, Ordering::SeqCst);
                }
                Ok(QuarantineOutcome::AlreadyGone) => {}
                Err(e) => {
                    log::warn!("Failed to clean {}: {}", path.display(), e);
                    self.run.failed_count.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        true
    }
}
