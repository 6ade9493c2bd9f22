//! Name patterns and kind detection.
//!
//! Patterns are shell-style wildcards (`*`, `?`) matched against a file name,
//! case-insensitively. They compile to anchored regexes once, when the rule
//! engine is built.

use std::fs::Metadata;
use std::path::Path;

use regex::{Regex, RegexBuilder};

use crate::model::FileKind;

/// A compiled set of wildcard name patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<Regex>,
}

impl PatternSet {
    /// Compile `patterns`. Invalid ones are logged and dropped.
    #[must_use]
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match wildcard_to_regex(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    log::warn!("Ignoring invalid name pattern '{}': {}", p, e);
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// True when any pattern matches `name` in full.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(name))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

fn wildcard_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for c in pattern.chars() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    RegexBuilder::new(&source).case_insensitive(true).build()
}

const TEMP_EXTENSIONS: &[&str] = &["tmp", "temp", "bak", "swp", "swo"];
const LOG_EXTENSIONS: &[&str] = &["log"];
const CACHE_EXTENSIONS: &[&str] = &["cache"];
const DOWNLOAD_EXTENSIONS: &[&str] = &["crdownload", "part", "partial", "download"];
const SYSTEM_EXTENSIONS: &[&str] = &["sys", "dll", "so", "dylib", "drv", "efi", "ko"];
const BACKUP_EXTENSIONS: &[&str] = &["backup", "old", "orig", "sav"];
const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "txt", "md", "rtf",
    "csv", "epub",
];
const MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "heic", "raw", "svg", "mp3", "wav",
    "flac", "aac", "ogg", "m4a", "mp4", "mkv", "avi", "mov", "wmv", "webm",
];

/// Extensions the image decoder can open for perceptual analysis.
pub const DECODABLE_IMAGE_EXTENSIONS: &[&str] = &["png", "gif", "bmp", "tif", "tiff", "webp"];

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// True when the image decoder can be expected to open `path`.
#[must_use]
pub fn is_decodable_image(path: &Path) -> bool {
    extension_of(path).is_some_and(|e| DECODABLE_IMAGE_EXTENSIONS.contains(&e.as_str()))
}

/// Kind of the entry at `path`, from its `symlink_metadata`.
#[must_use]
pub fn detect_kind(path: &Path, metadata: &Metadata) -> FileKind {
    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        FileKind::Symlink
    } else if file_type.is_dir() {
        FileKind::Directory
    } else if file_type.is_file() {
        kind_from_name(path)
    } else {
        FileKind::Unknown
    }
}

/// Kind of a regular file from its name alone.
#[must_use]
pub fn kind_from_name(path: &Path) -> FileKind {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.ends_with('~') {
        return FileKind::Temp;
    }
    if name.contains(".log.") {
        return FileKind::Log;
    }

    let Some(ext) = extension_of(path) else {
        return FileKind::Regular;
    };
    let ext = ext.as_str();
    let tables: [(&[&str], FileKind); 8] = [
        (TEMP_EXTENSIONS, FileKind::Temp),
        (LOG_EXTENSIONS, FileKind::Log),
        (CACHE_EXTENSIONS, FileKind::Cache),
        (DOWNLOAD_EXTENSIONS, FileKind::Download),
        (SYSTEM_EXTENSIONS, FileKind::System),
        (BACKUP_EXTENSIONS, FileKind::Backup),
        (DOCUMENT_EXTENSIONS, FileKind::Document),
        (MEDIA_EXTENSIONS, FileKind::Media),
    ];
    tables
        .iter()
        .find(|(exts, _)| exts.contains(&ext))
        .map_or(FileKind::Regular, |(_, kind)| *kind)
}
