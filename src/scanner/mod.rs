//! Scanner: discovers files under a set of roots and classifies them.
//!
//! # Architecture
//!
//! A scan runs on two threads joined by a bounded `crossbeam-channel` queue:
//!
//! - the walk worker traverses each root with [`Walker`] and sends entries,
//!   a marker after each finished root, and an explicit end-of-stream
//! - the classify worker owns the in-progress [`ScanResult`]: it derives
//!   kind and category, hashes content with [`Hasher`], fingerprints images
//!   with [`PerceptualHasher`], and tiers every entry through the
//!   [`RuleEngine`]
//!
//! When the queue ends (or a stop is requested) the classify worker groups
//! exact duplicates, clusters similar images, flags blurry ones, saves the
//! result through the [`Repository`] and publishes the final state.
//!
//! Only one scan is active at a time. Progress is read through atomics.
//!
//! # Example
//!
//! ```no_run
//! use diskwarden::config::Config;
//! use diskwarden::scanner::Scanner;
//! use diskwarden::store::MemoryRepository;
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let scanner = Scanner::new(Arc::new(Config::default()), Arc::new(MemoryRepository::new()));
//! let id = scanner.start(Some(vec![PathBuf::from("/tmp")]), None).unwrap();
//! scanner.wait(Duration::from_secs(60));
//! let result = scanner.result(&id).unwrap();
//! println!("{} items, {} bytes", result.total_items(), result.total_size());
//! ```

pub mod cluster;
pub mod hasher;
pub mod perceptual;
pub mod walker;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::config::Config;
use crate::control::{panic_message, WorkerControl};
use crate::model::{Category, FileDescriptor, ScanProgress, ScanResult, ScanState};
use crate::rules::{detect_kind, is_decodable_image, DuplicateIndex, RuleEngine};
use crate::store::Repository;

pub use cluster::HashIndex;
pub use hasher::{Hasher, BLOCK_SIZE};
pub use perceptual::{ImageFingerprint, PerceptualError, PerceptualHasher};
pub use walker::{WalkEntry, Walker, WalkerConfig};

const RECV_POLL: Duration = Duration::from_secs(1);

/// Errors that can occur during directory scanning.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur during file hashing.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of [`Scanner::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No scan with that id is running.
    NotRunning,
    /// The workers finished within the timeout.
    Stopped,
    /// The stop was requested but the workers are still winding down.
    StillFinishing,
}

enum Message {
    Entry(WalkEntry),
    RootDone,
    Failed(String),
    End,
}

/// Counters and control for the active scan.
struct ScanRun {
    scan_id: String,
    control: Arc<WorkerControl>,
    items: AtomicU64,
    bytes: AtomicU64,
    roots_total: usize,
    roots_done: AtomicUsize,
    hashes: HashIndex,
}

impl ScanRun {
    fn fraction(&self) -> f64 {
        if self.roots_total == 0 {
            return 0.0;
        }
        let done = self.roots_done.load(Ordering::SeqCst) as f64;
        (done / self.roots_total as f64).min(0.99)
    }

    fn snapshot(&self, state: ScanState) -> ScanProgress {
        ScanProgress {
            state,
            items: self.items.load(Ordering::SeqCst),
            bytes: self.bytes.load(Ordering::SeqCst),
            fraction: if state == ScanState::Completed {
                1.0
            } else {
                self.fraction()
            },
        }
    }
}

#[derive(Default)]
struct Slot {
    state: ScanState,
    run: Option<Arc<ScanRun>>,
    last_progress: Option<ScanProgress>,
    last_result: Option<ScanResult>,
    last_error: Option<String>,
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

/// Owns the scan lifecycle: Idle → Scanning → {Completed, Stopped, Failed}.
pub struct Scanner {
    config: Arc<Config>,
    rules: Arc<RuleEngine>,
    repository: Arc<dyn Repository>,
    shared: Arc<Shared>,
}

impl Scanner {
    #[must_use]
    pub fn new(config: Arc<Config>, repository: Arc<dyn Repository>) -> Self {
        let rules = Arc::new(RuleEngine::new(&config));
        Self {
            config,
            rules,
            repository,
            shared: Arc::new(Shared::default()),
        }
    }

    #[must_use]
    pub fn rules(&self) -> &Arc<RuleEngine> {
        &self.rules
    }

    /// Start a scan. Missing arguments fall back to the configured include
    /// and exclude directories.
    ///
    /// Returns `None` when a scan is already running or there is nothing to
    /// scan; the running scan is left untouched.
    pub fn start(
        &self,
        roots: Option<Vec<PathBuf>>,
        excludes: Option<Vec<PathBuf>>,
    ) -> Option<String> {
        let roots = roots.unwrap_or_else(|| self.config.scanner.include_dirs.clone());
        let excludes = excludes.unwrap_or_else(|| self.config.scanner.exclude_dirs.clone());
        if roots.is_empty() {
            log::warn!("No scan roots given, nothing to scan");
            return None;
        }

        let mut slot = self.shared.lock();
        if slot.state == ScanState::Scanning {
            log::warn!("A scan is already running, rejecting new scan");
            return None;
        }

        let scan_id = uuid::Uuid::new_v4().to_string();
        let control = Arc::new(WorkerControl::new(Duration::from_millis(
            self.config.safety.pause_poll_ms,
        )));
        let run = Arc::new(ScanRun {
            scan_id: scan_id.clone(),
            control,
            items: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            roots_total: roots.len(),
            roots_done: AtomicUsize::new(0),
            hashes: HashIndex::new(),
        });

        let (tx, rx) = bounded(self.config.scanner.queue_capacity.max(1));
        let walker_config = WalkerConfig {
            max_depth: self.config.scanner.max_depth,
            follow_symlinks: self.config.scanner.follow_symlinks,
            skip_hidden: self.config.scanner.skip_hidden,
            excludes: excludes.clone(),
            ignore_patterns: self.config.scanner.ignore_patterns.clone(),
        };

        let walk = {
            let roots = roots.clone();
            let control = Arc::clone(&run.control);
            thread::Builder::new()
                .name("diskwarden-walk".into())
                .spawn(move || walk_worker(&roots, &walker_config, &control, &tx))
        };
        if let Err(e) = walk {
            log::error!("Failed to spawn walk worker: {}", e);
            slot.state = ScanState::Failed;
            slot.last_error = Some(e.to_string());
            return None;
        }

        let classifier = Classifier {
            config: Arc::clone(&self.config),
            rules: Arc::clone(&self.rules),
            repository: Arc::clone(&self.repository),
            shared: Arc::clone(&self.shared),
            run: Arc::clone(&run),
        };
        let classify = thread::Builder::new()
            .name("diskwarden-classify".into())
            .spawn(move || classifier.run(rx, roots, excludes));
        if let Err(e) = classify {
            // The walk worker ends once its sends fail on the dropped queue.
            run.control.request_stop();
            log::error!("Failed to spawn classify worker: {}", e);
            slot.state = ScanState::Failed;
            slot.last_error = Some(e.to_string());
            return None;
        }

        log::info!("Scan {} started over {} root(s)", scan_id, run.roots_total);
        slot.state = ScanState::Scanning;
        slot.run = Some(run);
        slot.last_error = None;
        slot.last_progress = None;
        Some(scan_id)
    }

    /// Request a stop and wait up to `safety.stop_timeout_secs` for the
    /// workers to finish.
    pub fn stop(&self, scan_id: &str) -> StopOutcome {
        let slot = self.shared.lock();
        let Some(run) = active_run(&slot, scan_id) else {
            return StopOutcome::NotRunning;
        };
        log::info!("Stopping scan {}", scan_id);
        run.control.request_stop();

        let timeout = Duration::from_secs(self.config.safety.stop_timeout_secs);
        let (slot, _) = self
            .shared
            .changed
            .wait_timeout_while(slot, timeout, |s| active_run(s, scan_id).is_some())
            .unwrap_or_else(PoisonError::into_inner);
        if active_run(&slot, scan_id).is_some() {
            log::warn!("Scan {} still finishing after {:?}", scan_id, timeout);
            StopOutcome::StillFinishing
        } else {
            StopOutcome::Stopped
        }
    }

    /// Pause the running scan. Returns `false` if `scan_id` is not running.
    pub fn pause(&self, scan_id: &str) -> bool {
        let slot = self.shared.lock();
        match active_run(&slot, scan_id) {
            Some(run) => {
                run.control.pause();
                log::info!("Scan {} paused", scan_id);
                true
            }
            None => false,
        }
    }

    /// Resume a paused scan. Returns `false` if `scan_id` is not running.
    pub fn resume(&self, scan_id: &str) -> bool {
        let slot = self.shared.lock();
        match active_run(&slot, scan_id) {
            Some(run) => {
                run.control.resume();
                log::info!("Scan {} resumed", scan_id);
                true
            }
            None => false,
        }
    }

    /// Id of the running scan, if any.
    #[must_use]
    pub fn active_scan_id(&self) -> Option<String> {
        let slot = self.shared.lock();
        slot.run.as_ref().map(|run| run.scan_id.clone())
    }

    #[must_use]
    pub fn state(&self) -> ScanState {
        self.shared.lock().state
    }

    #[must_use]
    pub fn progress(&self) -> ScanProgress {
        let slot = self.shared.lock();
        match (&slot.run, slot.last_progress) {
            (Some(run), _) => run.snapshot(slot.state),
            (None, Some(last)) => last,
            (None, None) => ScanProgress {
                state: slot.state,
                items: 0,
                bytes: 0,
                fraction: 0.0,
            },
        }
    }

    /// Block until no scan is running or `timeout` passes. Returns the state
    /// at that point.
    pub fn wait(&self, timeout: Duration) -> ScanState {
        let slot = self.shared.lock();
        let (slot, _) = self
            .shared
            .changed
            .wait_timeout_while(slot, timeout, |s| s.state == ScanState::Scanning)
            .unwrap_or_else(PoisonError::into_inner);
        slot.state
    }

    /// Message of the last failed scan.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    /// Most recently finished result.
    #[must_use]
    pub fn latest_result(&self) -> Option<ScanResult> {
        self.shared.lock().last_result.clone()
    }

    /// A finished result by id, from memory or the repository.
    #[must_use]
    pub fn result(&self, scan_id: &str) -> Option<ScanResult> {
        if let Some(result) = self
            .shared
            .lock()
            .last_result
            .as_ref()
            .filter(|r| r.scan_id == scan_id)
        {
            return Some(result.clone());
        }
        match self.repository.get_scan_result(scan_id) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Failed to load scan {}: {}", scan_id, e);
                None
            }
        }
    }
}

fn active_run(slot: &Slot, scan_id: &str) -> Option<Arc<ScanRun>> {
    slot.run
        .as_ref()
        .filter(|run| slot.state == ScanState::Scanning && run.scan_id == scan_id)
        .cloned()
}

fn walk_worker(
    roots: &[PathBuf],
    config: &WalkerConfig,
    control: &Arc<WorkerControl>,
    tx: &Sender<Message>,
) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        for root in roots {
            if !control.checkpoint() {
                return;
            }
            let walker = Walker::new(root, config.clone()).with_control(Arc::clone(control));
            if !walker.root().exists() {
                log::warn!("Scan root {} does not exist, skipping", root.display());
            } else {
                for entry in walker.walk() {
                    if !control.checkpoint() {
                        return;
                    }
                    match entry {
                        Ok(entry) => {
                            if tx.send(Message::Entry(entry)).is_err() {
                                return;
                            }
                        }
                        Err(e) => log::debug!("Skipping: {}", e),
                    }
                }
            }
            if control.is_stopped() || tx.send(Message::RootDone).is_err() {
                return;
            }
        }
    }));
    if let Err(payload) = outcome {
        let message = panic_message(payload.as_ref());
        log::error!("Walk worker panicked: {}", message);
        let _ = tx.send(Message::Failed(message));
    }
    let _ = tx.send(Message::End);
}

/// State moved into the classify worker.
struct Classifier {
    config: Arc<Config>,
    rules: Arc<RuleEngine>,
    repository: Arc<dyn Repository>,
    shared: Arc<Shared>,
    run: Arc<ScanRun>,
}

impl Classifier {
    fn run(self, rx: Receiver<Message>, roots: Vec<PathBuf>, excludes: Vec<PathBuf>) {
        let mut result = ScanResult::new(self.run.scan_id.clone(), roots, excludes);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.consume(&rx, &mut result)
        }));
        drop(rx);
        let mut failure = match outcome {
            Ok(worker_failure) => worker_failure,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("Classify worker panicked: {}", message);
                Some(message)
            }
        };

        let analysis = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.analyse(&mut result);
        }));
        if let Err(payload) = analysis {
            let message = panic_message(payload.as_ref());
            log::error!("Scan analysis panicked: {}", message);
            failure.get_or_insert(message);
        }

        self.finish(result, failure);
    }

    /// Drain the queue. Returns the walk worker's failure, if any.
    fn consume(&self, rx: &Receiver<Message>, result: &mut ScanResult) -> Option<String> {
        let control = &self.run.control;
        let hasher = Hasher::new().with_control(Arc::clone(control));
        let images = self
            .config
            .scanner
            .image_analysis
            .then(PerceptualHasher::new);

        loop {
            if !control.checkpoint() {
                log::debug!("Classify worker: stop requested");
                return None;
            }
            match rx.recv_timeout(RECV_POLL) {
                Ok(Message::Entry(entry)) => {
                    let desc = self.describe(entry, &hasher, images.as_ref());
                    self.run.items.fetch_add(1, Ordering::SeqCst);
                    self.run.bytes.fetch_add(desc.size, Ordering::SeqCst);
                    result.push(desc);
                }
                Ok(Message::RootDone) => {
                    self.run.roots_done.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Message::Failed(message)) => return Some(message),
                Ok(Message::End) | Err(RecvTimeoutError::Disconnected) => return None,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }

    fn describe(
        &self,
        entry: WalkEntry,
        hasher: &Hasher,
        images: Option<&PerceptualHasher>,
    ) -> FileDescriptor {
        let kind = detect_kind(&entry.path, &entry.metadata);
        let mut desc = FileDescriptor::from_metadata(entry.path, &entry.metadata, kind);
        desc.category = self.rules.categorize(&desc);

        let hashable = kind.has_content() && desc.size > 0;
        if hashable && desc.size >= self.config.scanner.duplicate_min_size() {
            if let Some(hex) = hasher.fingerprint(&desc.path) {
                self.run.hashes.insert(hex.clone(), desc.path.clone());
                desc.content_hash = Some(hex);
            }
        }
        if let Some(images) = images.filter(|_| hashable && is_decodable_image(&desc.path)) {
            match images.fingerprint(&desc.path) {
                Ok(fp) => {
                    desc.perceptual_hash = Some(fp.hash);
                    desc.blur_score = Some(fp.blur_score);
                }
                Err(e) => log::debug!("Skipping image analysis: {}", e),
            }
        }

        desc.eligible = self.rules.can_delete(&desc, &[]);
        desc.safety_tier = self.rules.classify_safety(&desc);
        desc
    }

    /// Duplicate grouping, image clustering and blur flags.
    fn analyse(&self, result: &mut ScanResult) {
        let sets = cluster::duplicate_sets(&self.run.hashes, &result.descriptors);
        let index = DuplicateIndex::new(&sets, self.rules.keep_strategy());
        for desc in &mut result.descriptors {
            if index.role(&desc.path).is_none() {
                continue;
            }
            desc.eligible = self.rules.can_delete_indexed(desc, &index);
            let category = if index.is_redundant(&desc.path) && desc.category == Category::Other {
                Category::DuplicateFiles
            } else {
                desc.category
            };
            desc.safety_tier = self.rules.classify_safety_as(desc, category);
        }

        let reclaimable: u64 = sets.iter().map(|s| s.reclaimable()).sum();
        if reclaimable > 0 {
            *result
                .category_sizes
                .entry(Category::DuplicateFiles)
                .or_insert(0) += reclaimable;
        }
        result.duplicate_sets = sets;

        let scanner = &self.config.scanner;
        if scanner.image_analysis {
            result.duplicate_image_clusters =
                cluster::image_clusters(&result.descriptors, scanner.similar_image_distance);
            result.blurry_images = cluster::blurry_images(&result.descriptors, scanner.blur_threshold);
        }
    }

    fn finish(&self, mut result: ScanResult, failure: Option<String>) {
        let stopped = self.run.control.is_stopped();
        result.finished_at = Some(Utc::now());
        result.is_complete = !stopped && failure.is_none();
        let state = if failure.is_some() {
            ScanState::Failed
        } else if stopped {
            ScanState::Stopped
        } else {
            ScanState::Completed
        };

        if let Err(e) = self.repository.save_scan_result(&result) {
            log::warn!("Failed to save scan {}: {}", result.scan_id, e);
        }
        log::info!(
            "Scan {} {:?}: {} items, {} duplicate set(s)",
            result.scan_id,
            state,
            result.total_items(),
            result.duplicate_sets.len()
        );

        let mut slot = self.shared.lock();
        slot.last_progress = Some(self.run.snapshot(state));
        slot.state = state;
        slot.run = None;
        slot.last_result = Some(result);
        slot.last_error = failure;
        self.shared.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SafetyTier;
    use crate::store::MemoryRepository;
    use std::fs;
    use tempfile::TempDir;

    fn scanner() -> Scanner {
        let mut config = Config::default();
        config.scanner.duplicate_min_size_mb = 0;
        config.scanner.skip_hidden = false;
        config.safety.user_dirs.clear();
        Scanner::new(Arc::new(config), Arc::new(MemoryRepository::new()))
    }

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::PermissionDenied(PathBuf::from("/test"));
        assert_eq!(err.to_string(), "Permission denied: /test");

        let err = ScanError::NotADirectory(PathBuf::from("/file.txt"));
        assert_eq!(err.to_string(), "Not a directory: /file.txt");
    }

    #[test]
    fn test_scan_completes_with_duplicates() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.bin"), b"same bytes").unwrap();
        fs::write(dir.path().join("b.bin"), b"same bytes").unwrap();
        fs::write(dir.path().join("c.tmp"), b"scratch").unwrap();

        let scanner = scanner();
        let id = scanner
            .start(Some(vec![dir.path().to_path_buf()]), Some(vec![]))
            .unwrap();
        assert_eq!(scanner.wait(Duration::from_secs(30)), ScanState::Completed);

        let result = scanner.result(&id).unwrap();
        assert!(result.is_complete);
        assert_eq!(result.total_items(), 3);
        assert_eq!(result.duplicate_sets.len(), 1);
        assert_eq!(result.category_size(Category::DuplicateFiles), 10);

        let keeper = result.descriptor(&dir.path().join("a.bin")).unwrap();
        assert!(!keeper.eligible);
        assert_eq!(keeper.safety_tier, SafetyTier::Forbid);
        assert!(result.descriptor(&dir.path().join("b.bin")).unwrap().eligible);

        let progress = scanner.progress();
        assert_eq!(progress.items, 3);
        assert!((progress.fraction - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_root_is_skipped() {
        let dir = TempDir::new().unwrap();
        let scanner = scanner();
        scanner
            .start(Some(vec![dir.path().join("missing")]), None)
            .unwrap();
        assert_eq!(scanner.wait(Duration::from_secs(30)), ScanState::Completed);
        assert_eq!(scanner.latest_result().unwrap().total_items(), 0);
    }

    #[test]
    fn test_control_rejects_unknown_id() {
        let scanner = scanner();
        assert!(!scanner.pause("nope"));
        assert!(!scanner.resume("nope"));
        assert_eq!(scanner.stop("nope"), StopOutcome::NotRunning);
        assert!(scanner.start(Some(vec![]), None).is_none());
    }
}
