//! Per-file classification records.

use std::fmt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse file kind derived from metadata and name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Temp,
    Log,
    Cache,
    Download,
    System,
    Backup,
    Document,
    Media,
    Unknown,
}

impl FileKind {
    /// True for kinds that hold file content (everything but directories,
    /// links and special files).
    #[must_use]
    pub fn has_content(self) -> bool {
        !matches!(self, Self::Directory | Self::Symlink | Self::Unknown)
    }
}

/// Removal category assigned by the rule engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    TempFiles,
    LogFiles,
    SystemCache,
    DownloadTemp,
    DevelopmentCache,
    BrowserCache,
    OsCache,
    LargeFiles,
    OldFiles,
    RecycleBin,
    DuplicateFiles,
    Other,
}

impl Category {
    /// Every category, in classification priority order.
    pub const ALL: [Category; 12] = [
        Self::TempFiles,
        Self::LogFiles,
        Self::SystemCache,
        Self::DownloadTemp,
        Self::DevelopmentCache,
        Self::BrowserCache,
        Self::OsCache,
        Self::LargeFiles,
        Self::OldFiles,
        Self::RecycleBin,
        Self::DuplicateFiles,
        Self::Other,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TempFiles => "temp_files",
            Self::LogFiles => "log_files",
            Self::SystemCache => "system_cache",
            Self::DownloadTemp => "download_temp",
            Self::DevelopmentCache => "development_cache",
            Self::BrowserCache => "browser_cache",
            Self::OsCache => "os_cache",
            Self::LargeFiles => "large_files",
            Self::OldFiles => "old_files",
            Self::RecycleBin => "recycle_bin",
            Self::DuplicateFiles => "duplicate_files",
            Self::Other => "other",
        }
    }

    /// Categories whose contents are regenerated or discarded by their owners,
    /// so a recent modification time is not a reason to ask first.
    #[must_use]
    pub fn is_volatile(self) -> bool {
        matches!(
            self,
            Self::TempFiles
                | Self::SystemCache
                | Self::BrowserCache
                | Self::OsCache
                | Self::RecycleBin
        )
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a category name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Three-tier gate for automated removal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum SafetyTier {
    /// May be removed without asking.
    Safe,
    /// Removed only when the caller explicitly opts in.
    Confirm,
    /// Never removed.
    #[default]
    Forbid,
}

impl fmt::Display for SafetyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safe => f.write_str("safe"),
            Self::Confirm => f.write_str("confirm"),
            Self::Forbid => f.write_str("forbid"),
        }
    }
}

/// Everything the scanner learned about one filesystem entry.
///
/// Built by the classify worker and never mutated after the scan that
/// produced it has finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub name: String,
    /// Size in bytes; zero for directories.
    pub size: u64,
    pub kind: FileKind,
    pub modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub is_hidden: bool,
    pub is_read_only: bool,
    /// Hex BLAKE3 digest, present for files at or above the duplicate threshold.
    pub content_hash: Option<String>,
    /// Base64 perceptual hash, present for decodable images.
    pub perceptual_hash: Option<String>,
    /// Laplacian variance; lower is blurrier.
    pub blur_score: Option<f64>,
    pub category: Category,
    pub eligible: bool,
    pub safety_tier: SafetyTier,
}

impl FileDescriptor {
    /// Create an unclassified descriptor.
    ///
    /// The result is ineligible and forbidden until the rule engine says
    /// otherwise.
    #[must_use]
    pub fn new(path: PathBuf, size: u64, kind: FileKind) -> Self {
        let name = file_name_of(&path);
        let is_hidden = name.starts_with('.');
        Self {
            path,
            name,
            size,
            kind,
            modified: None,
            accessed: None,
            created: None,
            is_hidden,
            is_read_only: false,
            content_hash: None,
            perceptual_hash: None,
            blur_score: None,
            category: Category::Other,
            eligible: false,
            safety_tier: SafetyTier::Forbid,
        }
    }

    /// Create an unclassified descriptor from `symlink_metadata` output.
    #[must_use]
    pub fn from_metadata(path: PathBuf, metadata: &Metadata, kind: FileKind) -> Self {
        let size = if metadata.is_dir() { 0 } else { metadata.len() };
        let mut desc = Self::new(path, size, kind);
        desc.modified = metadata.modified().ok().map(to_utc);
        desc.accessed = metadata.accessed().ok().map(to_utc);
        desc.created = metadata.created().ok().map(to_utc);
        desc.is_read_only = metadata.permissions().readonly();
        desc
    }

    /// Whole days since the last modification, or `None` when unknown.
    #[must_use]
    pub fn age_days(&self, now: DateTime<Utc>) -> Option<i64> {
        self.modified.map(|m| (now - m).num_days())
    }

    /// Lowercased name, used for case-insensitive pattern checks.
    #[must_use]
    pub fn lower_name(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Convert a filesystem timestamp.
#[must_use]
pub fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
