//! Path normalization and containment checks.
//!
//! macOS stores names in NFD while Linux and Windows usually use NFC, so the
//! same visible name can have two byte forms. Every path compared against a
//! configured prefix goes through [`clean_path`] first, which folds both forms
//! to NFC and resolves `.` and `..` lexically.
//!
//! ```
//! use diskwarden::paths::{clean_path, is_under};
//! use std::path::Path;
//!
//! let nfd = clean_path(Path::new("/data/cafe\u{0301}/./x.txt"));
//! assert_eq!(nfd, Path::new("/data/caf\u{e9}/x.txt"));
//! assert!(is_under(&nfd, Path::new("/data")));
//! assert!(!is_under(Path::new("/database"), Path::new("/data")));
//! ```

use std::path::{Component, Path, PathBuf};

use unicode_normalization::UnicodeNormalization;

/// Normalize a string to NFC.
#[must_use]
pub fn normalize_path_str(s: &str) -> String {
    s.nfc().collect()
}

/// Resolve `.` and `..` without touching the filesystem and fold the result
/// to NFC. Non-UTF-8 paths keep their bytes.
#[must_use]
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let climbing = matches!(out.components().next_back(), Some(Component::ParentDir));
                if climbing || out.as_os_str().is_empty() {
                    out.push("..");
                } else {
                    // Popping past a root is a no-op.
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    match out.to_str() {
        Some(s) => PathBuf::from(normalize_path_str(s)),
        None => out,
    }
}

/// Make `path` absolute against the working directory, then clean it.
#[must_use]
pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return clean_path(path);
    }
    match std::env::current_dir() {
        Ok(cwd) => clean_path(&cwd.join(path)),
        Err(_) => clean_path(path),
    }
}

/// True when `path` equals `prefix` or lies beneath it.
///
/// Matching is per component, so `/data` does not contain `/database`.
/// Comparison is case-insensitive on Windows.
#[must_use]
pub fn is_under(path: &Path, prefix: &Path) -> bool {
    let path = clean_path(path);
    let prefix = clean_path(prefix);
    if prefix.as_os_str().is_empty() {
        return false;
    }
    if cfg!(windows) {
        let lower = |p: &Path| PathBuf::from(p.to_string_lossy().to_lowercase());
        lower(&path).starts_with(lower(&prefix))
    } else {
        path.starts_with(&prefix)
    }
}

/// True when `path` lies under any of `prefixes`.
#[must_use]
pub fn is_under_any(path: &Path, prefixes: &[PathBuf]) -> bool {
    prefixes.iter().any(|p| is_under(path, p))
}

/// True when `path` sits directly in a filesystem root (`/x`, `C:\x`).
#[must_use]
pub fn is_volume_root_child(path: &Path) -> bool {
    let path = clean_path(path);
    matches!(path.parent(), Some(parent) if parent.parent().is_none() && path.has_root())
}

/// True when `path` is a filesystem root itself.
#[must_use]
pub fn is_volume_root(path: &Path) -> bool {
    let path = clean_path(path);
    path.has_root() && path.parent().is_none()
}

/// `path` without its root, with a Windows drive prefix turned into a plain
/// directory name (`C:\Users\x` becomes `C/Users/x`).
///
/// Used to mirror an absolute path beneath another directory.
#[must_use]
pub fn relative_to_anchor(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in clean_path(path).components() {
        match component {
            Component::Prefix(prefix) => {
                let drive: String = prefix
                    .as_os_str()
                    .to_string_lossy()
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect();
                out.push(if drive.is_empty() { "drive".to_string() } else { drive });
            }
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir => out.push("_up"),
            Component::Normal(part) => out.push(part),
        }
    }
    out
}
