//! Command-line interface definitions for diskwarden.
//!
//! The CLI only drives the orchestrator: every subcommand maps onto one or
//! two [`TaskOrchestrator`](crate::orchestrator::TaskOrchestrator) calls. It
//! never prompts; anything needing confirmation is left out unless a flag
//! opts in.
//!
//! # Example
//!
//! ```bash
//! # Scan the configured directories and print a category breakdown
//! diskwarden scan
//!
//! # Scan a directory, then quarantine its temp and log files
//! diskwarden clean ~/Downloads --category temp_files --category log_files
//!
//! # Undo a clean task
//! diskwarden restore --task 5b0e...
//!
//! # Run a prepared plan
//! diskwarden plan cleanup.json --goal "free space in downloads"
//! ```

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};

use crate::model::Category;

/// Local disk-cleanup agent.
///
/// diskwarden finds reclaimable space, classifies it by category and safety
/// tier, and removes it reversibly through a quarantine and optional
/// backups.
#[derive(Debug, Parser)]
#[command(name = "diskwarden")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (TOML). Defaults to the platform config directory.
    #[arg(long, global = true, value_name = "PATH", env = "DISKWARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Keep records in memory instead of the configured database
    #[arg(long, global = true)]
    pub no_database: bool,

    /// Report errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan directories and classify what could be removed
    Scan(ScanArgs),
    /// Scan (or reuse a stored scan) and quarantine the selected files
    Clean(CleanArgs),
    /// Restore from a backup, a clean task or the quarantine
    Restore(RestoreArgs),
    /// List backups
    Backups(ListArgs),
    /// Remove backups and quarantined items past retention
    Prune(PruneArgs),
    /// List quarantined items
    Quarantine(ListArgs),
    /// Execute a plan file
    Plan(PlanArgs),
    /// Show configuration values
    Config(ConfigArgs),
}

/// Scan-shaping options shared by `scan` and `clean`.
#[derive(Debug, Args)]
pub struct ScanOptions {
    /// Directories to scan (defaults to `scanner.include_dirs`)
    #[arg(value_name = "PATH")]
    pub paths: Vec<PathBuf>,

    /// Directories to leave out (can be specified multiple times)
    #[arg(short, long = "exclude", value_name = "PATH")]
    pub exclude: Vec<PathBuf>,

    /// Maximum directory depth
    #[arg(long, value_name = "N")]
    pub max_depth: Option<usize>,

    /// Glob patterns to ignore (can be specified multiple times)
    #[arg(short, long = "ignore", value_name = "PATTERN")]
    pub ignore_patterns: Vec<String>,

    /// Follow symbolic links during the walk
    #[arg(long)]
    pub follow_symlinks: bool,

    /// Include hidden files and directories
    #[arg(long)]
    pub hidden: bool,

    /// Skip perceptual hashing and blur detection of images
    #[arg(long)]
    pub no_images: bool,

    /// Size from which a file counts as large (e.g., 500MB, 2GiB)
    ///
    /// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub large_files: Option<u64>,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    #[command(flatten)]
    pub scan: ScanOptions,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct CleanArgs {
    #[command(flatten)]
    pub scan: ScanOptions,

    /// Clean a stored scan instead of scanning first
    #[arg(long, value_name = "SCAN_ID", conflicts_with = "paths")]
    pub scan_id: Option<String>,

    /// Clean the most recent stored scan
    #[arg(long, conflicts_with_all = ["paths", "scan_id"])]
    pub latest: bool,

    /// Categories to clean (all eligible categories when omitted)
    #[arg(short, long = "category", value_name = "CATEGORY")]
    pub categories: Vec<Category>,

    /// Also clean files in the confirm tier
    #[arg(long)]
    pub include_confirm: bool,

    /// Skip the backup snapshot before quarantining
    #[arg(long)]
    pub no_backup: bool,

    /// Task name
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// Only list what would be cleaned
    #[arg(long)]
    pub dry_run: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["backup", "task", "quarantined"])
))]
pub struct RestoreArgs {
    /// Backup to restore
    #[arg(long, value_name = "BACKUP_ID")]
    pub backup: Option<String>,

    /// Only restore these original paths of the backup
    #[arg(long = "path", value_name = "PATH", requires = "backup")]
    pub paths: Vec<PathBuf>,

    /// Undo a clean task
    #[arg(long, value_name = "TASK_ID")]
    pub task: Option<String>,

    /// Move a quarantined path back to where it was
    #[arg(long, value_name = "PATH")]
    pub quarantined: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct PruneArgs {
    /// Age in days (defaults to the configured retention)
    #[arg(long, value_name = "DAYS")]
    pub days: Option<u32>,

    /// Only prune backups
    #[arg(long, conflicts_with = "quarantine_only")]
    pub backups_only: bool,

    /// Only purge the quarantine
    #[arg(long)]
    pub quarantine_only: bool,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// JSON plan: a step array, or an object holding one
    #[arg(value_name = "PLAN_FILE")]
    pub file: PathBuf,

    /// Goal the plan works toward, for the log
    #[arg(long, value_name = "TEXT", default_value = "clean up disk space")]
    pub goal: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Dotted key to print (all keys when omitted)
    #[arg(value_name = "KEY")]
    pub key: Option<String>,

    /// Print the default configuration file path
    #[arg(long, conflicts_with = "key")]
    pub path: bool,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary
    Text,
    /// JSON for scripting
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Parse a human-readable size string into bytes.
///
/// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
/// Case-insensitive. Numbers without suffix are treated as bytes.
///
/// # Examples
///
/// ```
/// use diskwarden::cli::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("1KB").unwrap(), 1000);
/// assert_eq!(parse_size("1MiB").unwrap(), 1_048_576);
/// ```
///
/// # Errors
///
/// Returns an error if the string is empty, contains an invalid number or
/// an unknown size suffix.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1_024,
        "MB" | "M" => 1_000_000,
        "MIB" => 1_048_576,
        "GB" | "G" => 1_000_000_000,
        "GIB" => 1_073_741_824,
        "TB" | "T" => 1_000_000_000_000,
        "TIB" => 1_099_511_627_776,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    Ok((num * multiplier as f64) as u64)
}
