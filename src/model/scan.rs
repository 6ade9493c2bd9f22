//! Scan results and scan progress.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::file::{Category, FileDescriptor};

/// One member of a duplicate set, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateMember {
    pub path: PathBuf,
    pub modified: Option<DateTime<Utc>>,
}

/// Files sharing one content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateSet {
    /// Hex BLAKE3 digest shared by every member.
    pub hash: String,
    /// Size of each member in bytes.
    pub size: u64,
    /// At least two members, ordered as the walker discovered them.
    pub members: Vec<DuplicateMember>,
}

impl DuplicateSet {
    /// Bytes freed by removing every member but one.
    #[must_use]
    pub fn reclaimable(&self) -> u64 {
        self.size
            .saturating_mul(self.members.len().saturating_sub(1) as u64)
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.members.iter().any(|m| m.path == path)
    }
}

/// Lifecycle of the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    Idle,
    Scanning,
    Completed,
    Stopped,
    Failed,
}

/// Snapshot of a scan's progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScanProgress {
    pub state: ScanState,
    /// Entries classified so far.
    pub items: u64,
    /// Bytes classified so far.
    pub bytes: u64,
    /// Fraction of roots finished; capped below one until the scan completes.
    pub fraction: f64,
}

/// Output of one scan.
///
/// `total_size()` is the sum of descriptor sizes. The `duplicate_files`
/// entry of `category_sizes` holds reclaimable duplicate bytes and overlaps
/// the other categories, so it is not part of that sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub root_paths: Vec<PathBuf>,
    pub excluded_paths: Vec<PathBuf>,
    pub is_complete: bool,
    pub descriptors: Vec<FileDescriptor>,
    pub category_sizes: BTreeMap<Category, u64>,
    pub duplicate_sets: Vec<DuplicateSet>,
    pub duplicate_image_clusters: Vec<Vec<PathBuf>>,
    pub blurry_images: Vec<PathBuf>,
}

impl ScanResult {
    #[must_use]
    pub fn new(scan_id: String, root_paths: Vec<PathBuf>, excluded_paths: Vec<PathBuf>) -> Self {
        Self {
            scan_id,
            started_at: Utc::now(),
            finished_at: None,
            root_paths,
            excluded_paths,
            is_complete: false,
            descriptors: Vec::new(),
            category_sizes: BTreeMap::new(),
            duplicate_sets: Vec::new(),
            duplicate_image_clusters: Vec::new(),
            blurry_images: Vec::new(),
        }
    }

    /// Append a classified descriptor and account for its size.
    pub fn push(&mut self, desc: FileDescriptor) {
        *self.category_sizes.entry(desc.category).or_insert(0) += desc.size;
        self.descriptors.push(desc);
    }

    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.descriptors.iter().map(|d| d.size).sum()
    }

    #[must_use]
    pub fn total_items(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn descriptor(&self, path: &Path) -> Option<&FileDescriptor> {
        self.descriptors.iter().find(|d| d.path == path)
    }

    /// Descriptors whose primary category is `category`.
    pub fn in_category(&self, category: Category) -> impl Iterator<Item = &FileDescriptor> {
        self.descriptors
            .iter()
            .filter(move |d| d.category == category)
    }

    #[must_use]
    pub fn duplicate_set_for(&self, path: &Path) -> Option<&DuplicateSet> {
        self.duplicate_sets.iter().find(|s| s.contains(path))
    }

    /// Bytes recorded for `category`.
    #[must_use]
    pub fn category_size(&self, category: Category) -> u64 {
        self.category_sizes.get(&category).copied().unwrap_or(0)
    }
}
