//! Rule engine: category, eligibility and safety tier for a file.
//!
//! # Overview
//!
//! [`RuleEngine`] is pure: the same descriptor, duplicate context and
//! configuration always give the same answer. It holds compiled patterns and
//! normalized path lists built once from [`Config`].
//!
//! Three questions are answered per file:
//!
//! 1. [`RuleEngine::categorize`]: which removal category, first match wins
//!    in the order temp → log → system cache → download temp → development
//!    cache → browser cache → OS cache → large → old → recycle bin → other.
//! 2. [`RuleEngine::can_delete`]: whether removal is permitted at all.
//! 3. [`RuleEngine::classify_safety`]: safe, confirm or forbid.
//!
//! # Example
//!
//! ```no_run
//! use diskwarden::config::Config;
//! use diskwarden::rules::RuleEngine;
//! use std::path::Path;
//!
//! let rules = RuleEngine::new(&Config::default());
//! let desc = rules.describe(Path::new("/tmp/build.tmp")).unwrap();
//! println!("{} -> {} ({})", desc.path.display(), desc.category, desc.safety_tier);
//! ```

pub mod patterns;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::config::{Config, KeepStrategy};
use crate::model::{Category, DuplicateSet, FileDescriptor, FileKind, SafetyTier};
use crate::paths::{self, clean_path};

pub use patterns::{detect_kind, is_decodable_image, kind_from_name, PatternSet};

const BYTES_PER_MB: u64 = 1024 * 1024;
const BYTES_PER_GB: u64 = 1024 * BYTES_PER_MB;

/// Whether a duplicate member is the one that stays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateRole {
    Keeper,
    Redundant,
}

/// Path → role lookup for every member of a list of duplicate sets.
#[derive(Debug, Clone, Default)]
pub struct DuplicateIndex {
    roles: HashMap<PathBuf, DuplicateRole>,
}

impl DuplicateIndex {
    #[must_use]
    pub fn new(sets: &[DuplicateSet], strategy: KeepStrategy) -> Self {
        let mut roles = HashMap::new();
        for set in sets {
            let keeper = keeper_of(set, strategy);
            for member in &set.members {
                let role = if Some(member.path.as_path()) == keeper {
                    DuplicateRole::Keeper
                } else {
                    DuplicateRole::Redundant
                };
                roles.insert(member.path.clone(), role);
            }
        }
        Self { roles }
    }

    #[must_use]
    pub fn role(&self, path: &Path) -> Option<DuplicateRole> {
        self.roles.get(path).copied()
    }

    #[must_use]
    pub fn is_redundant(&self, path: &Path) -> bool {
        self.role(path) == Some(DuplicateRole::Redundant)
    }
}

/// The member of `set` that `strategy` keeps. Ties go to the earliest
/// discovered member.
#[must_use]
pub fn keeper_of(set: &DuplicateSet, strategy: KeepStrategy) -> Option<&Path> {
    let mut best = set.members.first()?;
    for member in set.members.iter().skip(1) {
        let better = match strategy {
            KeepStrategy::KeepFirst => false,
            KeepStrategy::KeepNewest => member.modified > best.modified,
            KeepStrategy::KeepOldest => match (member.modified, best.modified) {
                (Some(m), Some(b)) => m < b,
                (Some(_), None) => true,
                _ => false,
            },
        };
        if better {
            best = member;
        }
    }
    Some(best.path.as_path())
}

/// Classification policy compiled from configuration.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    temp: PatternSet,
    log: PatternSet,
    system_cache: PatternSet,
    download_temp: PatternSet,
    dev_cache_dirs: Vec<String>,
    browser_cache_paths: Vec<PathBuf>,
    os_cache_paths: Vec<PathBuf>,
    recycle_bin_paths: Vec<PathBuf>,
    large_min_size: u64,
    old_enabled: bool,
    old_days: i64,
    keep_strategy: KeepStrategy,
    protected_paths: Vec<PathBuf>,
    user_dirs: Vec<PathBuf>,
    critical_names: Vec<String>,
    confirm_size: u64,
    recent_days: i64,
}

fn cleaned(paths: &[PathBuf]) -> Vec<PathBuf> {
    paths.iter().map(|p| clean_path(p)).collect()
}

impl RuleEngine {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let rules = &config.rules;
        let safety = &config.safety;
        Self {
            temp: PatternSet::new(&rules.temp_files.patterns),
            log: PatternSet::new(&rules.log_files.patterns),
            system_cache: PatternSet::new(&rules.system_cache.patterns),
            download_temp: PatternSet::new(&rules.download_temp.patterns),
            dev_cache_dirs: rules
                .development_cache
                .markers
                .iter()
                .map(|d| d.to_lowercase())
                .collect(),
            browser_cache_paths: cleaned(&rules.browser_cache.paths),
            os_cache_paths: cleaned(&rules.os_cache.paths),
            recycle_bin_paths: cleaned(&rules.recycle_bin.paths),
            large_min_size: rules.large_files.min_size_mb.saturating_mul(BYTES_PER_MB),
            old_enabled: rules.old_files.enabled,
            old_days: rules.old_files.days,
            keep_strategy: rules.duplicate_files.keep_strategy,
            protected_paths: cleaned(&safety.protected_paths),
            user_dirs: cleaned(&safety.user_dirs),
            critical_names: safety
                .critical_filenames
                .iter()
                .map(|n| n.to_lowercase())
                .collect(),
            confirm_size: safety.confirm_size_gb.saturating_mul(BYTES_PER_GB),
            recent_days: safety.recent_days,
        }
    }

    #[must_use]
    pub fn keep_strategy(&self) -> KeepStrategy {
        self.keep_strategy
    }

    /// Build a fully classified descriptor for an arbitrary path, without
    /// duplicate context.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from reading the entry's metadata.
    pub fn describe(&self, path: &Path) -> io::Result<FileDescriptor> {
        let metadata = std::fs::symlink_metadata(path)?;
        let kind = detect_kind(path, &metadata);
        let mut desc = FileDescriptor::from_metadata(paths::absolute(path), &metadata, kind);
        self.classify(&mut desc, &[]);
        Ok(desc)
    }

    /// Fill in category, eligibility and tier.
    pub fn classify(&self, desc: &mut FileDescriptor, duplicate_sets: &[DuplicateSet]) {
        desc.category = self.categorize(desc);
        desc.eligible = self.can_delete(desc, duplicate_sets);
        desc.safety_tier = self.classify_safety(desc);
    }

    /// Removal category. First matching rule wins.
    #[must_use]
    pub fn categorize(&self, desc: &FileDescriptor) -> Category {
        let name = desc.name.as_str();
        let path = desc.path.as_path();
        let is_file = desc.kind.has_content();

        if is_file && self.temp.matches(name) {
            return Category::TempFiles;
        }
        if is_file && self.log.matches(name) {
            return Category::LogFiles;
        }
        if is_file && self.system_cache.matches(name) {
            return Category::SystemCache;
        }
        if is_file && self.download_temp.matches(name) {
            return Category::DownloadTemp;
        }
        if self.in_dev_cache(path) {
            return Category::DevelopmentCache;
        }
        if paths::is_under_any(path, &self.browser_cache_paths) {
            return Category::BrowserCache;
        }
        if paths::is_under_any(path, &self.os_cache_paths) {
            return Category::OsCache;
        }
        if desc.kind.has_content() && desc.size >= self.large_min_size && self.large_min_size > 0 {
            return Category::LargeFiles;
        }
        if is_file
            && self.old_enabled
            && desc
                .age_days(Utc::now())
                .is_some_and(|age| age >= self.old_days)
        {
            return Category::OldFiles;
        }
        if self.in_recycle_bin(path) {
            return Category::RecycleBin;
        }
        Category::Other
    }

    /// Whether removal is permitted, given the scan's duplicate sets.
    ///
    /// The member a duplicate set keeps is never eligible.
    #[must_use]
    pub fn can_delete(&self, desc: &FileDescriptor, duplicate_sets: &[DuplicateSet]) -> bool {
        if !self.base_eligible(desc) {
            return false;
        }
        match duplicate_sets.iter().find(|s| s.contains(&desc.path)) {
            Some(set) => keeper_of(set, self.keep_strategy) != Some(desc.path.as_path()),
            None => true,
        }
    }

    /// [`can_delete`](Self::can_delete) against a prebuilt index.
    #[must_use]
    pub fn can_delete_indexed(&self, desc: &FileDescriptor, index: &DuplicateIndex) -> bool {
        self.base_eligible(desc) && index.role(&desc.path) != Some(DuplicateRole::Keeper)
    }

    fn base_eligible(&self, desc: &FileDescriptor) -> bool {
        if matches!(
            desc.kind,
            FileKind::Directory | FileKind::Symlink | FileKind::Unknown | FileKind::System
        ) {
            return false;
        }
        if desc.is_read_only || self.is_critical_name(&desc.name) {
            return false;
        }
        if paths::is_under_any(&desc.path, &self.protected_paths) {
            return false;
        }
        // A user directory itself, or anything containing one, stays.
        !self
            .user_dirs
            .iter()
            .any(|dir| paths::is_under(dir, &desc.path))
    }

    /// Safety tier from the descriptor's own category.
    #[must_use]
    pub fn classify_safety(&self, desc: &FileDescriptor) -> SafetyTier {
        self.classify_safety_as(desc, desc.category)
    }

    /// Safety tier as if the descriptor belonged to `category`.
    ///
    /// Used to tier a redundant duplicate as `duplicate_files`.
    #[must_use]
    pub fn classify_safety_as(&self, desc: &FileDescriptor, category: Category) -> SafetyTier {
        if matches!(
            desc.kind,
            FileKind::System | FileKind::Symlink | FileKind::Unknown
        ) || !desc.eligible
            || self.is_critical_name(&desc.name)
            || paths::is_volume_root_child(&desc.path)
        {
            return SafetyTier::Forbid;
        }

        if paths::is_under_any(&desc.path, &self.user_dirs) {
            return SafetyTier::Confirm;
        }
        if self.confirm_size > 0 && desc.size >= self.confirm_size {
            return SafetyTier::Confirm;
        }
        let recent = desc
            .age_days(Utc::now())
            .is_some_and(|age| age < self.recent_days);
        if recent && !category.is_volatile() {
            return SafetyTier::Confirm;
        }
        if matches!(category, Category::LargeFiles | Category::OldFiles) {
            return SafetyTier::Confirm;
        }
        if matches!(
            desc.kind,
            FileKind::Document
                | FileKind::Media
                | FileKind::Backup
                | FileKind::Log
                | FileKind::Download
        ) {
            return SafetyTier::Confirm;
        }

        match category {
            Category::TempFiles
            | Category::SystemCache
            | Category::BrowserCache
            | Category::OsCache
            | Category::RecycleBin
            | Category::DuplicateFiles => SafetyTier::Safe,
            _ => SafetyTier::Confirm,
        }
    }

    /// Whether a whole directory tree may be quarantined.
    ///
    /// Refuses filesystem roots, protected system paths, user directories and
    /// their ancestors, and trees whose name is critical.
    #[must_use]
    pub fn can_remove_tree(&self, path: &Path) -> bool {
        let path = clean_path(path);
        if paths::is_volume_root(&path) || paths::is_volume_root_child(&path) {
            return false;
        }
        if paths::is_under_any(&path, &self.protected_paths) {
            return false;
        }
        if self.user_dirs.iter().any(|dir| paths::is_under(dir, &path)) {
            return false;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        !name.is_empty() && !self.is_critical_name(&name)
    }

    #[must_use]
    pub fn is_critical_name(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.critical_names.iter().any(|c| *c == lower)
    }

    #[must_use]
    pub fn is_protected(&self, path: &Path) -> bool {
        paths::is_under_any(path, &self.protected_paths)
    }

    fn in_dev_cache(&self, path: &Path) -> bool {
        path.components().any(|c| {
            let part = c.as_os_str().to_string_lossy().to_lowercase();
            self.dev_cache_dirs.iter().any(|d| *d == part)
        })
    }

    fn in_recycle_bin(&self, path: &Path) -> bool {
        paths::is_under_any(path, &self.recycle_bin_paths)
            || path
                .components()
                .any(|c| c.as_os_str().to_string_lossy().eq_ignore_ascii_case("$recycle.bin"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DuplicateMember;
    use chrono::{Duration, Utc};

    fn engine() -> RuleEngine {
        let mut config = Config::default();
        config.rules.large_files.min_size_mb = 1;
        config.rules.browser_cache.paths = vec![PathBuf::from("/home/u/.cache/mozilla")];
        config.rules.recycle_bin.paths = vec![PathBuf::from("/home/u/.local/share/Trash")];
        config.safety.user_dirs = vec![PathBuf::from("/home/u/Documents")];
        RuleEngine::new(&config)
    }

    fn file(path: &str, size: u64, age_days: i64) -> FileDescriptor {
        let p = PathBuf::from(path);
        let kind = kind_from_name(&p);
        let mut d = FileDescriptor::new(p, size, kind);
        d.modified = Some(Utc::now() - Duration::days(age_days));
        d
    }

    fn classified(rules: &RuleEngine, path: &str, size: u64, age_days: i64) -> FileDescriptor {
        let mut d = file(path, size, age_days);
        rules.classify(&mut d, &[]);
        d
    }

    fn set(paths: &[(&str, i64)]) -> DuplicateSet {
        DuplicateSet {
            hash: "h".into(),
            size: 2 * BYTES_PER_MB,
            members: paths
                .iter()
                .map(|(p, age)| DuplicateMember {
                    path: PathBuf::from(p),
                    modified: Some(Utc::now() - Duration::days(*age)),
                })
                .collect(),
        }
    }

    // ==== Categorize Tests ====

    #[test]
    fn test_categorize_priority() {
        let rules = engine();
        assert_eq!(rules.categorize(&file("/w/a.tmp", 1, 1)), Category::TempFiles);
        assert_eq!(rules.categorize(&file("/w/app.log", 1, 1)), Category::LogFiles);
        assert_eq!(rules.categorize(&file("/w/x.cache", 1, 1)), Category::SystemCache);
        assert_eq!(
            rules.categorize(&file("/w/movie.mp4.part", 1, 1)),
            Category::DownloadTemp
        );
        assert_eq!(
            rules.categorize(&file("/w/proj/node_modules/a/index.js", 1, 1)),
            Category::DevelopmentCache
        );
        assert_eq!(
            rules.categorize(&file("/home/u/.cache/mozilla/x/entry", 1, 1)),
            Category::BrowserCache
        );
        assert_eq!(
            rules.categorize(&file("/var/cache/apt/pkg.deb", 1, 1)),
            Category::OsCache
        );
        assert_eq!(
            rules.categorize(&file("/w/b.txt", 10 * BYTES_PER_MB, 1)),
            Category::LargeFiles
        );
        assert_eq!(rules.categorize(&file("/w/c.bin", 10, 400)), Category::OldFiles);
        assert_eq!(
            rules.categorize(&file("/home/u/.local/share/Trash/files/z", 10, 1)),
            Category::RecycleBin
        );
        assert_eq!(rules.categorize(&file("/w/d.bin", 10, 1)), Category::Other);
    }

    #[test]
    fn test_temp_wins_over_large() {
        let rules = engine();
        let d = file("/w/huge.tmp", 50 * BYTES_PER_MB, 1000);
        assert_eq!(rules.categorize(&d), Category::TempFiles);
    }

    #[test]
    fn test_directories_are_not_large() {
        let rules = engine();
        let d = FileDescriptor::new(PathBuf::from("/w/dir.tmp"), 0, FileKind::Directory);
        assert_eq!(rules.categorize(&d), Category::Other);
    }

    // ==== Eligibility Tests ====

    #[test]
    fn test_can_delete_rejects_protected() {
        let rules = engine();
        assert!(!rules.can_delete(&file("/usr/lib/x.tmp", 1, 1), &[]));
        assert!(!rules.can_delete(&file("/etc/passwd", 1, 1), &[]));
        assert!(!rules.can_delete(&file("/w/pagefile.sys", 1, 1), &[]));
        assert!(!rules.can_delete(&file("/w/.bashrc", 1, 1), &[]));
        assert!(rules.can_delete(&file("/w/a.tmp", 1, 1), &[]));
    }

    #[test]
    fn test_can_delete_rejects_kinds_and_readonly() {
        let rules = engine();
        for kind in [
            FileKind::Directory,
            FileKind::Symlink,
            FileKind::Unknown,
            FileKind::System,
        ] {
            let d = FileDescriptor::new(PathBuf::from("/w/thing"), 1, kind);
            assert!(!rules.can_delete(&d, &[]), "{kind:?} should be ineligible");
        }
        let mut d = file("/w/a.tmp", 1, 1);
        d.is_read_only = true;
        assert!(!rules.can_delete(&d, &[]));
    }

    #[test]
    fn test_user_dir_itself_is_ineligible_contents_are_not() {
        let rules = engine();
        let mut dir_as_file = file("/home/u/Documents", 1, 1);
        dir_as_file.kind = FileKind::Regular;
        assert!(!rules.can_delete(&dir_as_file, &[]));
        assert!(!rules.can_delete(&file("/home/u", 1, 1), &[]));
        assert!(rules.can_delete(&file("/home/u/Documents/old.tmp", 1, 1), &[]));
    }

    #[test]
    fn test_keep_first_duplicate() {
        let rules = engine();
        let sets = vec![set(&[("/w/dup1.bin", 1), ("/w/dup2.bin", 5)])];
        assert!(!rules.can_delete(&file("/w/dup1.bin", 2 * BYTES_PER_MB, 1), &sets));
        assert!(rules.can_delete(&file("/w/dup2.bin", 2 * BYTES_PER_MB, 5), &sets));
    }

    #[test]
    fn test_keep_newest_and_oldest() {
        let s = set(&[("/w/a", 10), ("/w/b", 1), ("/w/c", 30)]);
        assert_eq!(
            keeper_of(&s, KeepStrategy::KeepNewest),
            Some(Path::new("/w/b"))
        );
        assert_eq!(
            keeper_of(&s, KeepStrategy::KeepOldest),
            Some(Path::new("/w/c"))
        );
        assert_eq!(
            keeper_of(&s, KeepStrategy::KeepFirst),
            Some(Path::new("/w/a"))
        );
    }

    #[test]
    fn test_keeper_ties_go_to_first() {
        let mut s = set(&[("/w/a", 3), ("/w/b", 3)]);
        let same = s.members[0].modified;
        s.members[1].modified = same;
        assert_eq!(keeper_of(&s, KeepStrategy::KeepNewest), Some(Path::new("/w/a")));
        assert_eq!(keeper_of(&s, KeepStrategy::KeepOldest), Some(Path::new("/w/a")));
    }

    #[test]
    fn test_duplicate_index_agrees_with_can_delete() {
        let rules = engine();
        let sets = vec![set(&[("/w/x1", 1), ("/w/x2", 1), ("/w/x3", 1)])];
        let index = DuplicateIndex::new(&sets, rules.keep_strategy());
        for p in ["/w/x1", "/w/x2", "/w/x3", "/w/other"] {
            let d = file(p, 10, 1);
            assert_eq!(
                rules.can_delete(&d, &sets),
                rules.can_delete_indexed(&d, &index),
                "{p}"
            );
        }
        assert!(index.is_redundant(Path::new("/w/x2")));
        assert!(!index.is_redundant(Path::new("/w/x1")));
    }

    // ==== Safety Tier Tests ====

    #[test]
    fn test_temp_file_is_safe_even_when_recent() {
        let rules = engine();
        let d = classified(&rules, "/w/a.tmp", 10, 0);
        assert_eq!(d.category, Category::TempFiles);
        assert_eq!(d.safety_tier, SafetyTier::Safe);
    }

    #[test]
    fn test_large_file_needs_confirmation() {
        let rules = engine();
        let d = classified(&rules, "/w/b.txt", 10 * BYTES_PER_MB, 0);
        assert_eq!(d.category, Category::LargeFiles);
        assert_eq!(d.safety_tier, SafetyTier::Confirm);
    }

    #[test]
    fn test_recent_non_volatile_needs_confirmation() {
        let rules = engine();
        let recent = classified(&rules, "/w/proj/node_modules/x.js", 10, 1);
        assert_eq!(recent.safety_tier, SafetyTier::Confirm);
        let old_dupe = file("/w/blob.bin", 10, 100);
        let mut old_dupe = old_dupe;
        old_dupe.eligible = true;
        assert_eq!(
            rules.classify_safety_as(&old_dupe, Category::DuplicateFiles),
            SafetyTier::Safe
        );
    }

    #[test]
    fn test_forbid_cases() {
        let rules = engine();
        assert_eq!(
            classified(&rules, "/w/libfoo.so", 10, 100).safety_tier,
            SafetyTier::Forbid
        );
        assert_eq!(
            classified(&rules, "/etc/x.tmp", 10, 100).safety_tier,
            SafetyTier::Forbid
        );
        assert_eq!(
            classified(&rules, "/stray.tmp", 10, 100).safety_tier,
            SafetyTier::Forbid
        );
    }

    #[test]
    fn test_user_dir_contents_need_confirmation() {
        let rules = engine();
        let d = classified(&rules, "/home/u/Documents/cache.tmp", 10, 100);
        assert!(d.eligible);
        assert_eq!(d.safety_tier, SafetyTier::Confirm);
    }

    #[test]
    fn test_can_remove_tree() {
        let rules = engine();
        assert!(rules.can_remove_tree(Path::new("/w/proj/node_modules")));
        assert!(!rules.can_remove_tree(Path::new("/")));
        assert!(!rules.can_remove_tree(Path::new("/home")));
        assert!(!rules.can_remove_tree(Path::new("/home/u")));
        assert!(!rules.can_remove_tree(Path::new("/home/u/Documents")));
        assert!(!rules.can_remove_tree(Path::new("/usr/share")));
    }
}
