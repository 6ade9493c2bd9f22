//! Data model shared by the scanner, the cleaner and the recovery subsystem.
//!
//! # Overview
//!
//! - [`FileDescriptor`]: one classified filesystem entry
//! - [`ScanResult`]: everything one scan produced, including duplicate sets
//! - [`CleanTask`]: one cleanup run and its counters
//! - [`BackupManifest`] / [`QuarantineLogEntry`]: what makes a removal reversible
//!
//! All records serialize with serde so repositories can persist them as JSON.

pub mod file;
pub mod recovery;
pub mod scan;
pub mod task;

pub use file::{Category, FileDescriptor, FileKind, SafetyTier, UnknownCategory};
pub use recovery::{BackupEntry, BackupManifest, BackupSummary, QuarantineLogEntry, RestoreReport};
pub use scan::{DuplicateMember, DuplicateSet, ScanProgress, ScanResult, ScanState};
pub use task::{CleanProgress, CleanTask, TaskStatus};
