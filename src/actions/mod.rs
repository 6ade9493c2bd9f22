//! Reversible removal and recovery.
//!
//! This module provides:
//! - [`QuarantineStore`]: moves paths into a holding area instead of erasing
//!   them, and moves them back on request
//! - [`BackupVault`]: full-copy snapshots with checksummed manifests
//! - [`Cleaner`]: runs a clean task over a scan result on its own thread
//! - [`RollbackManager`]: restore and retention over both of the above
//!
//! Nothing here deletes data permanently except the explicit, time-gated
//! pruning of quarantine and backups.
//!
//! # Quarantine
//!
//! ```no_run
//! use diskwarden::actions::{QuarantineOutcome, QuarantineStore};
//! use std::path::{Path, PathBuf};
//!
//! let store = QuarantineStore::new(PathBuf::from("/var/lib/diskwarden/quarantine"));
//! match store.quarantine(Path::new("/tmp/old.log")) {
//!     Ok(QuarantineOutcome::Moved(entry)) => println!("moved to {}", entry.quarantine_path.display()),
//!     Ok(QuarantineOutcome::AlreadyGone) => println!("nothing to do"),
//!     Err(e) => eprintln!("failed: {}", e),
//! }
//! ```

pub mod backup;
pub mod cleaner;
pub mod quarantine;
pub mod rollback;

use std::fs;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

pub use backup::{BackupError, BackupVault};
pub use cleaner::{CleanOptions, Cleaner};
pub use quarantine::{QuarantineError, QuarantineOutcome, QuarantineStore};
pub use rollback::{RollbackError, RollbackManager};

/// Copy a file, a symlink or a whole directory tree to `to`.
///
/// Returns the number of content bytes copied.
pub(crate) fn copy_tree(from: &Path, to: &Path) -> io::Result<u64> {
    let metadata = fs::symlink_metadata(from)?;
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if metadata.file_type().is_symlink() {
        copy_symlink(from, to)?;
        return Ok(0);
    }
    if metadata.is_file() {
        return fs::copy(from, to);
    }

    let mut copied = 0;
    for entry in WalkDir::new(from).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let target = to.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            copied += fs::copy(entry.path(), &target)?;
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(from)?, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    fs::copy(from, to).map(|_| ())
}

/// Remove a file, a symlink or a directory tree.
pub(crate) fn remove_tree(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Content bytes under `path`. Unreadable entries count as zero.
pub(crate) fn tree_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
