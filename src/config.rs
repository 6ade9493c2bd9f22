//! Application configuration management.
//!
//! # Overview
//!
//! Configuration is layered with figment, later layers winning:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. A TOML file (by default `config.toml` in the platform config directory)
//! 3. Environment variables prefixed `DISKWARDEN_`, with `__` separating
//!    nested keys (`DISKWARDEN_SCANNER__MAX_DEPTH=4`)
//!
//! The typed struct is the primary interface. [`Config::get`] and
//! [`Config::get_or`] add a dotted-key view (`"rules.large_files.min_size_mb"`)
//! for callers that address settings by name.
//!
//! # Example
//!
//! ```no_run
//! use diskwarden::config::Config;
//!
//! let config = Config::load().unwrap_or_default();
//! let depth: usize = config.get_or("scanner.max_depth", 10);
//! assert_eq!(depth, config.scanner.max_depth);
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::{BaseDirs, ProjectDirs, UserDirs};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "DISKWARDEN_";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub rules: RulesConfig,
    pub safety: SafetyConfig,
    pub storage: StorageConfig,
}

/// Walk and fingerprint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Roots scanned when a caller does not name any.
    pub include_dirs: Vec<PathBuf>,
    /// Subtrees pruned when a caller does not name any.
    pub exclude_dirs: Vec<PathBuf>,
    pub max_depth: usize,
    pub follow_symlinks: bool,
    pub skip_hidden: bool,
    /// Files at or above this size are content-hashed.
    pub duplicate_min_size_mb: u64,
    /// Capacity of the queue between the walk and classify workers.
    pub queue_capacity: usize,
    /// Compute perceptual hashes and blur scores for images.
    pub image_analysis: bool,
    /// Images whose blur score falls below this are reported as blurry.
    pub blur_threshold: f64,
    /// Maximum Hamming distance between near-duplicate image hashes.
    pub similar_image_distance: u32,
    /// Gitignore-style patterns skipped during the walk.
    pub ignore_patterns: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            include_dirs: UserDirs::new()
                .map(|d| vec![d.home_dir().to_path_buf()])
                .unwrap_or_default(),
            exclude_dirs: Vec::new(),
            max_depth: 10,
            follow_symlinks: false,
            skip_hidden: true,
            duplicate_min_size_mb: 1,
            queue_capacity: 1024,
            image_analysis: true,
            blur_threshold: 100.0,
            similar_image_distance: 1,
            ignore_patterns: Vec::new(),
        }
    }
}

impl ScannerConfig {
    #[must_use]
    pub fn duplicate_min_size(&self) -> u64 {
        self.duplicate_min_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Keep strategy for duplicate sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeepStrategy {
    /// Keep the member discovered first.
    #[default]
    #[serde(alias = "first")]
    KeepFirst,
    /// Keep the most recently modified member.
    #[serde(alias = "newest")]
    KeepNewest,
    /// Keep the least recently modified member.
    #[serde(alias = "oldest")]
    KeepOldest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LargeFilesRule {
    pub min_size_mb: u64,
}

impl Default for LargeFilesRule {
    fn default() -> Self {
        Self { min_size_mb: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OldFilesRule {
    pub enabled: bool,
    pub days: i64,
}

impl Default for OldFilesRule {
    fn default() -> Self {
        Self {
            enabled: true,
            days: 365,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DuplicateFilesRule {
    pub keep_strategy: KeepStrategy,
}

/// Name patterns for one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PatternRule {
    pub patterns: Vec<String>,
}

/// Path prefixes for one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PathRule {
    pub paths: Vec<PathBuf>,
}

/// Directory names marking development caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MarkerRule {
    pub markers: Vec<String>,
}

/// Category rules, evaluated in the order the fields are listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub temp_files: PatternRule,
    pub log_files: PatternRule,
    pub system_cache: PatternRule,
    pub download_temp: PatternRule,
    pub development_cache: MarkerRule,
    pub browser_cache: PathRule,
    pub os_cache: PathRule,
    pub large_files: LargeFilesRule,
    pub old_files: OldFilesRule,
    pub recycle_bin: PathRule,
    pub duplicate_files: DuplicateFilesRule,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn patterns(items: &[&str]) -> PatternRule {
    PatternRule {
        patterns: strings(items),
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        let base = BaseDirs::new();
        let cache = base.as_ref().map(|b| b.cache_dir().to_path_buf());
        let home = base.as_ref().map(|b| b.home_dir().to_path_buf());

        let browser_cache = cache
            .map(|c| {
                [
                    "google-chrome",
                    "chromium",
                    "mozilla",
                    "BraveSoftware",
                    "microsoft-edge",
                    "Google/Chrome",
                    "Firefox",
                    "com.apple.Safari",
                ]
                .iter()
                .map(|p| c.join(p))
                .collect()
            })
            .unwrap_or_default();

        let mut recycle_bin = vec![PathBuf::from(r"C:\$Recycle.Bin")];
        if let Some(home) = &home {
            recycle_bin.push(home.join(".local/share/Trash"));
            recycle_bin.push(home.join(".Trash"));
        }

        Self {
            temp_files: patterns(&["*.tmp", "*.temp", "~*", "*.bak", "*.swp", "*~"]),
            log_files: patterns(&["*.log", "*.log.*"]),
            system_cache: patterns(&["*.cache", "Thumbs.db", "iconcache_*.db", "*.dmp"]),
            download_temp: patterns(&["*.crdownload", "*.part", "*.partial", "*.download"]),
            development_cache: MarkerRule {
                markers: strings(&[
                    "node_modules",
                    "__pycache__",
                    ".git",
                    ".pytest_cache",
                    ".mypy_cache",
                    ".gradle",
                    ".tox",
                    ".next",
                    ".parcel-cache",
                ]),
            },
            browser_cache: PathRule {
                paths: browser_cache,
            },
            os_cache: PathRule {
                paths: vec![
                    PathBuf::from("/var/tmp"),
                    PathBuf::from("/var/cache"),
                    PathBuf::from(r"C:\Windows\Temp"),
                    PathBuf::from(r"C:\Windows\SoftwareDistribution\Download"),
                ],
            },
            large_files: LargeFilesRule::default(),
            old_files: OldFilesRule::default(),
            recycle_bin: PathRule { paths: recycle_bin },
            duplicate_files: DuplicateFilesRule::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Snapshot files before cleaning unless the caller says otherwise.
    pub enabled: bool,
    pub path: PathBuf,
    pub retention_days: u32,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: data_dir().join("backups"),
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarantineSettings {
    pub path: PathBuf,
    pub retention_days: u32,
}

impl Default for QuarantineSettings {
    fn default() -> Self {
        Self {
            path: data_dir().join("quarantine"),
            retention_days: 30,
        }
    }
}

/// Safety policy inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// System roots that are never touched.
    pub protected_paths: Vec<PathBuf>,
    /// User content directories; their contents always need confirmation.
    pub user_dirs: Vec<PathBuf>,
    /// File names that are never removed (case-insensitive).
    pub critical_filenames: Vec<String>,
    /// Files at or above this size need confirmation.
    pub confirm_size_gb: u64,
    /// Files modified within this many days need confirmation.
    pub recent_days: i64,
    pub backup: BackupSettings,
    pub quarantine: QuarantineSettings,
    /// How long `stop` waits for workers to wind down.
    pub stop_timeout_secs: u64,
    /// Upper bound on how long a paused worker sleeps between checks.
    pub pause_poll_ms: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        let protected_paths = [
            "/bin",
            "/boot",
            "/dev",
            "/etc",
            "/lib",
            "/lib64",
            "/proc",
            "/sbin",
            "/sys",
            "/usr",
            "/System",
            "/Library",
            r"C:\Windows",
            r"C:\Program Files",
            r"C:\Program Files (x86)",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();

        let user_dirs = UserDirs::new()
            .map(|d| {
                [
                    d.document_dir(),
                    d.picture_dir(),
                    d.desktop_dir(),
                    d.audio_dir(),
                    d.video_dir(),
                ]
                .into_iter()
                .flatten()
                .map(Path::to_path_buf)
                .collect()
            })
            .unwrap_or_default();

        Self {
            protected_paths,
            user_dirs,
            critical_filenames: strings(&[
                "pagefile.sys",
                "hiberfil.sys",
                "swapfile.sys",
                "bootmgr",
                "ntldr",
                "boot.ini",
                "ntuser.dat",
                "vmlinuz",
                "initrd.img",
                "fstab",
                "passwd",
                "shadow",
                "sudoers",
                ".bashrc",
                ".profile",
                ".zshrc",
                "id_rsa",
                "id_ed25519",
                "authorized_keys",
                "known_hosts",
            ]),
            confirm_size_gb: 10,
            recent_days: 30,
            backup: BackupSettings::default(),
            quarantine: QuarantineSettings::default(),
            stop_timeout_secs: 5,
            pause_poll_ms: 250,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file for scan results, tasks and manifests. `None` keeps
    /// records in memory for the life of the process.
    pub database_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: Some(data_dir().join("diskwarden.db")),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "diskwarden", "diskwarden")
}

fn data_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("diskwarden"))
}

impl Config {
    /// Load from the default config path, the environment and defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or the environment holds values that do
    /// not fit the schema.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from_path(&path),
            None => Self::extract(Self::figment()),
        }
    }

    /// Load from a specific TOML file layered over defaults, with
    /// environment overrides on top. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(figment)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().context("Invalid configuration")?;
        Ok(config.validated())
    }

    /// Default platform-specific configuration file.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|p| p.config_dir().join("config.toml"))
    }

    /// Write the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write configuration to {}", path.display()))?;
        Ok(())
    }

    /// Clamp out-of-range values, logging each correction.
    #[must_use]
    pub fn validated(mut self) -> Self {
        fn clamp_warn<T: PartialOrd + Copy + std::fmt::Debug>(
            key: &str,
            value: &mut T,
            min: T,
            max: T,
        ) {
            let clamped = if *value < min {
                min
            } else if *value > max {
                max
            } else {
                *value
            };
            if clamped != *value {
                log::warn!("{} = {:?} is out of range, using {:?}", key, value, clamped);
                *value = clamped;
            }
        }

        clamp_warn("scanner.max_depth", &mut self.scanner.max_depth, 1, 256);
        clamp_warn(
            "scanner.queue_capacity",
            &mut self.scanner.queue_capacity,
            1,
            1 << 20,
        );
        clamp_warn(
            "scanner.blur_threshold",
            &mut self.scanner.blur_threshold,
            0.0,
            f64::MAX,
        );
        clamp_warn(
            "scanner.similar_image_distance",
            &mut self.scanner.similar_image_distance,
            0,
            64,
        );
        clamp_warn("rules.old_files.days", &mut self.rules.old_files.days, 1, 36_500);
        clamp_warn("safety.recent_days", &mut self.safety.recent_days, 0, 36_500);
        clamp_warn(
            "safety.stop_timeout_secs",
            &mut self.safety.stop_timeout_secs,
            1,
            600,
        );
        clamp_warn("safety.pause_poll_ms", &mut self.safety.pause_poll_ms, 10, 5_000);
        clamp_warn(
            "safety.backup.retention_days",
            &mut self.safety.backup.retention_days,
            1,
            36_500,
        );
        clamp_warn(
            "safety.quarantine.retention_days",
            &mut self.safety.quarantine.retention_days,
            1,
            36_500,
        );
        self
    }

    /// Look up a setting by dotted key.
    ///
    /// Unknown keys return `None` and log the closest known key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let root = serde_json::to_value(self).ok()?;
        let found = key
            .split('.')
            .try_fold(&root, |node, part| node.get(part))
            .cloned();
        if found.is_none() {
            match self.suggest_key(key) {
                Some(suggestion) => {
                    log::warn!("Unknown config key '{}', did you mean '{}'?", key, suggestion)
                }
                None => log::warn!("Unknown config key '{}'", key),
            }
        }
        found
    }

    /// Look up a setting by dotted key, falling back to `default` when the key
    /// is unknown or holds a value of another type. Never fails.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(default)
    }

    /// Every dotted key addressing a leaf value.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        fn walk(prefix: &str, node: &Value, out: &mut Vec<String>) {
            match node {
                Value::Object(map) => {
                    for (k, v) in map {
                        let key = if prefix.is_empty() {
                            k.clone()
                        } else {
                            format!("{prefix}.{k}")
                        };
                        walk(&key, v, out);
                    }
                }
                _ => out.push(prefix.to_string()),
            }
        }

        let mut keys = Vec::new();
        if let Ok(root) = serde_json::to_value(self) {
            walk("", &root, &mut keys);
        }
        keys
    }

    /// Closest known key to a misspelled one.
    #[must_use]
    pub fn suggest_key(&self, key: &str) -> Option<String> {
        self.keys()
            .into_iter()
            .map(|k| (strsim::jaro_winkler(key, &k), k))
            .filter(|(score, _)| *score > 0.8)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, k)| k)
    }
}
