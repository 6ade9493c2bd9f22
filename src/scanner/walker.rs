//! Directory walker built on walkdir.
//!
//! # Overview
//!
//! [`Walker`] traverses one root and yields every entry beneath it (files,
//! directories and links) with its `symlink_metadata`. It:
//!
//! - prunes excluded subtrees before descending into them
//! - applies gitignore-style patterns via the `ignore` crate
//! - honours depth, hidden-file and symlink policy
//! - visits children in file-name order, so discovery order is stable
//! - stops at the next entry once its [`WorkerControl`] is stopped
//!
//! Unreadable entries are reported as [`ScanError`] values and the walk
//! carries on with their siblings.
//!
//! # Example
//!
//! ```no_run
//! use diskwarden::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let walker = Walker::new(Path::new("/home/user/Downloads"), WalkerConfig::default());
//! for entry in walker.walk() {
//!     match entry {
//!         Ok(e) => println!("{} ({} bytes)", e.path.display(), e.metadata.len()),
//!         Err(e) => eprintln!("Warning: {}", e),
//!     }
//! }
//! ```

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use walkdir::{DirEntry, WalkDir};

use super::ScanError;
use crate::control::WorkerControl;
use crate::paths;

/// Walk policy.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    /// Deepest level yielded; the root's children are depth 1.
    pub max_depth: usize,
    pub follow_symlinks: bool,
    /// Skip entries whose name starts with `.`.
    pub skip_hidden: bool,
    /// Subtrees never entered. Matched per component on normalized paths.
    pub excludes: Vec<PathBuf>,
    /// Gitignore-style patterns, relative to the root.
    pub ignore_patterns: Vec<String>,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            follow_symlinks: false,
            skip_hidden: true,
            excludes: Vec::new(),
            ignore_patterns: Vec::new(),
        }
    }
}

/// One discovered entry.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    pub path: PathBuf,
    /// `symlink_metadata`, or followed metadata when links are followed.
    pub metadata: Metadata,
    pub depth: usize,
}

/// Traverses one root.
#[derive(Debug)]
pub struct Walker {
    root: PathBuf,
    config: WalkerConfig,
    control: Option<Arc<WorkerControl>>,
}

impl Walker {
    #[must_use]
    pub fn new(root: &Path, config: WalkerConfig) -> Self {
        let excludes = config.excludes.iter().map(|p| paths::absolute(p)).collect();
        Self {
            root: paths::absolute(root),
            config: WalkerConfig {
                excludes,
                ..config
            },
            control: None,
        }
    }

    /// Stop the walk when `control` is stopped.
    #[must_use]
    pub fn with_control(mut self, control: Arc<WorkerControl>) -> Self {
        self.control = Some(control);
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_stopped(&self) -> bool {
        self.control.as_ref().is_some_and(|c| c.is_stopped())
    }

    fn build_gitignore(&self) -> Option<Gitignore> {
        if self.config.ignore_patterns.is_empty() {
            return None;
        }
        let mut builder = GitignoreBuilder::new(&self.root);
        for pattern in &self.config.ignore_patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                log::warn!("Invalid ignore pattern '{}': {}", pattern, e);
            }
        }
        match builder.build() {
            Ok(gitignore) if !gitignore.is_empty() => Some(gitignore),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Failed to build ignore patterns: {}", e);
                None
            }
        }
    }

    /// Whether `path` falls inside an excluded subtree.
    #[must_use]
    pub fn is_excluded(&self, path: &Path) -> bool {
        !self.config.excludes.is_empty() && paths::is_under_any(path, &self.config.excludes)
    }

    fn keep(&self, entry: &DirEntry, gitignore: Option<&Gitignore>) -> bool {
        if entry.depth() == 0 {
            return true;
        }
        if self.config.skip_hidden && entry.file_name().to_string_lossy().starts_with('.') {
            return false;
        }
        if self.is_excluded(entry.path()) {
            log::trace!("Pruning excluded path: {}", entry.path().display());
            return false;
        }
        if let Some(gi) = gitignore {
            let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            if gi
                .matched_path_or_any_parents(relative, entry.file_type().is_dir())
                .is_ignore()
            {
                log::trace!("Ignoring: {}", entry.path().display());
                return false;
            }
        }
        true
    }

    /// Walk the tree, yielding entries in discovery order. The root itself
    /// is not yielded.
    pub fn walk(&self) -> Box<dyn Iterator<Item = Result<WalkEntry, ScanError>> + '_> {
        match std::fs::metadata(&self.root) {
            Ok(m) if m.is_dir() => {}
            Ok(_) => return Box::new(std::iter::once(Err(ScanError::NotADirectory(self.root.clone())))),
            Err(e) => return Box::new(std::iter::once(Err(map_io_error(&self.root, e)))),
        }
        if self.is_excluded(&self.root) {
            log::debug!("Root {} is excluded, skipping", self.root.display());
            return Box::new(std::iter::empty());
        }

        let gitignore = self.build_gitignore();
        let iter = WalkDir::new(&self.root)
            .max_depth(self.config.max_depth)
            .follow_links(self.config.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| self.keep(e, gitignore.as_ref()));

        Box::new(
            iter.take_while(move |_| {
                let stopped = self.is_stopped();
                if stopped {
                    log::debug!("Walker: stop requested, ending walk");
                }
                !stopped
            })
            .filter_map(move |result| match result {
                Ok(entry) if entry.depth() == 0 => None,
                Ok(entry) => match entry.metadata() {
                    Ok(metadata) => Some(Ok(WalkEntry {
                        depth: entry.depth(),
                        path: entry.into_path(),
                        metadata,
                    })),
                    Err(e) => {
                        let path = entry.path().to_path_buf();
                        Some(Err(map_walkdir_error(path, e)))
                    }
                },
                Err(e) => {
                    let path = e
                        .path()
                        .map_or_else(|| self.root.clone(), Path::to_path_buf);
                    Some(Err(map_walkdir_error(path, e)))
                }
            }),
        )
    }
}

fn map_walkdir_error(path: PathBuf, error: walkdir::Error) -> ScanError {
    if error.loop_ancestor().is_some() {
        log::debug!("Symlink loop at {}", path.display());
        return ScanError::Io {
            source: std::io::Error::other(error.to_string()),
            path,
        };
    }
    match error.into_io_error() {
        Some(io) => map_io_error(&path, io),
        None => ScanError::Io {
            source: std::io::Error::other("walk error"),
            path,
        },
    }
}

fn map_io_error(path: &Path, error: std::io::Error) -> ScanError {
    use std::io::ErrorKind;

    match error.kind() {
        ErrorKind::PermissionDenied => {
            log::debug!("Permission denied: {}", path.display());
            ScanError::PermissionDenied(path.to_path_buf())
        }
        ErrorKind::NotFound => {
            log::debug!("Not found (may have been deleted): {}", path.display());
            ScanError::NotFound(path.to_path_buf())
        }
        _ => {
            log::debug!("I/O error for {}: {}", path.display(), error);
            ScanError::Io {
                path: path.to_path_buf(),
                source: error,
            }
        }
    }
}
