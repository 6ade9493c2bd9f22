//! Subcommand dispatch for the `diskwarden` binary.
//!
//! [`run_app`] loads configuration, builds the orchestrator and runs one
//! subcommand, returning the [`ExitCode`] to exit with. Errors that should
//! abort with `DW001` come back as `anyhow` errors; conditions with their
//! own exit code (nothing selected, partial failure, Ctrl+C) are mapped
//! here.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::actions::{BackupError, CleanOptions, QuarantineError, RollbackError};
use crate::cli::{
    CleanArgs, Cli, Commands, ConfigArgs, ListArgs, OutputFormat, PlanArgs, PruneArgs,
    RestoreArgs, ScanArgs, ScanOptions,
};
use crate::config::Config;
use crate::error::ExitCode;
use crate::logging;
use crate::model::{Category, CleanTask, RestoreReport, ScanResult, ScanState, TaskStatus};
use crate::orchestrator::{JsonPlanFile, PlanReport, StepStatus, TaskOrchestrator};
use crate::progress::{format_size, Progress};
use crate::signal::{self, ShutdownHandler};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Run the application. Returns the exit code for a handled outcome.
///
/// # Errors
///
/// Returns an error for configuration, storage or worker failures.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if cli.no_database {
        config.storage.database_path = None;
    }

    if let Commands::Config(args) = &cli.command {
        return show_config(&config, args);
    }
    if let Commands::Scan(ScanArgs { scan, .. }) | Commands::Clean(CleanArgs { scan, .. }) =
        &cli.command
    {
        apply_scan_options(&mut config, scan);
    }

    let shutdown = signal::install_handler()?;
    let session = Session {
        orchestrator: TaskOrchestrator::open(config)?,
        progress: Progress::new(cli.quiet),
        shutdown,
    };

    match &cli.command {
        Commands::Scan(args) => session.scan(args),
        Commands::Clean(args) => session.clean(args),
        Commands::Restore(args) => session.restore(args),
        Commands::Backups(args) => session.backups(args),
        Commands::Prune(args) => session.prune(args),
        Commands::Quarantine(args) => session.quarantine(args),
        Commands::Plan(args) => session.plan(args),
        Commands::Config(args) => show_config(session.orchestrator.config(), args),
    }
}

/// Fold command-line scan flags into the configuration.
fn apply_scan_options(config: &mut Config, options: &ScanOptions) {
    let scanner = &mut config.scanner;
    if let Some(depth) = options.max_depth {
        scanner.max_depth = depth;
    }
    scanner
        .ignore_patterns
        .extend(options.ignore_patterns.iter().cloned());
    if options.follow_symlinks {
        scanner.follow_symlinks = true;
    }
    if options.hidden {
        scanner.skip_hidden = false;
    }
    if options.no_images {
        scanner.image_analysis = false;
    }
    if let Some(bytes) = options.large_files {
        config.rules.large_files.min_size_mb = bytes.div_ceil(BYTES_PER_MB).max(1);
    }
}

fn show_config(config: &Config, args: &ConfigArgs) -> Result<ExitCode> {
    if args.path {
        match Config::default_path() {
            Some(path) => println!("{}", path.display()),
            None => bail!("No configuration directory on this platform"),
        }
        return Ok(ExitCode::Success);
    }
    match &args.key {
        Some(key) => match config.get(key) {
            Some(value) => println!("{value}"),
            None => {
                match config.suggest_key(key) {
                    Some(s) => eprintln!("Unknown key '{key}', did you mean '{s}'?"),
                    None => eprintln!("Unknown key '{key}'"),
                }
                return Ok(ExitCode::NothingToDo);
            }
        },
        None => {
            let text = toml::to_string_pretty(config).context("Failed to render configuration")?;
            print!("{text}");
        }
    }
    Ok(ExitCode::Success)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}

/// Scan overview for output; the full descriptor list stays in storage.
#[derive(Debug, Serialize)]
struct ScanReport<'a> {
    scan_id: &'a str,
    root_paths: &'a [PathBuf],
    is_complete: bool,
    total_items: usize,
    total_size: u64,
    category_sizes: &'a BTreeMap<Category, u64>,
    duplicate_sets: usize,
    duplicate_reclaimable: u64,
    similar_image_clusters: usize,
    blurry_images: &'a [PathBuf],
}

impl<'a> ScanReport<'a> {
    fn new(result: &'a ScanResult) -> Self {
        Self {
            scan_id: &result.scan_id,
            root_paths: &result.root_paths,
            is_complete: result.is_complete,
            total_items: result.total_items(),
            total_size: result.total_size(),
            category_sizes: &result.category_sizes,
            duplicate_sets: result.duplicate_sets.len(),
            duplicate_reclaimable: result.duplicate_sets.iter().map(|s| s.reclaimable()).sum(),
            similar_image_clusters: result.duplicate_image_clusters.len(),
            blurry_images: &result.blurry_images,
        }
    }

    fn print_text(&self) {
        println!("Scan {}", self.scan_id);
        println!(
            "  {} item(s), {}",
            self.total_items,
            format_size(self.total_size)
        );
        for (category, size) in self.category_sizes.iter().filter(|(_, s)| **s > 0) {
            println!("  {:<18} {:>12}", category.as_str(), format_size(*size));
        }
        if self.duplicate_sets > 0 {
            println!(
                "  {} duplicate set(s), {} reclaimable",
                self.duplicate_sets,
                format_size(self.duplicate_reclaimable)
            );
        }
        if self.similar_image_clusters > 0 {
            println!("  {} similar image cluster(s)", self.similar_image_clusters);
        }
        if !self.blurry_images.is_empty() {
            println!("  {} blurry image(s)", self.blurry_images.len());
        }
    }
}

struct Session {
    orchestrator: TaskOrchestrator,
    progress: Progress,
    shutdown: ShutdownHandler,
}

impl Session {
    fn interrupted(&self) -> bool {
        self.shutdown.is_shutdown_requested()
    }

    /// Run a scan to its end. `Err(code)` carries the exit code when no
    /// usable result came out.
    fn run_scan(&self, options: &ScanOptions) -> Result<std::result::Result<ScanResult, ExitCode>> {
        let roots = (!options.paths.is_empty()).then(|| options.paths.clone());
        let excludes = (!options.exclude.is_empty()).then(|| options.exclude.clone());
        let Some(scan_id) = self.orchestrator.start_scan(roots, excludes) else {
            bail!("Scan could not start; another scan may be running");
        };

        match self
            .progress
            .watch_scan(&self.orchestrator, &scan_id, &self.shutdown)
        {
            ScanState::Completed => {}
            ScanState::Stopped if self.interrupted() => return Ok(Err(ExitCode::Interrupted)),
            ScanState::Failed => {
                let reason = self
                    .orchestrator
                    .last_scan_error()
                    .unwrap_or_else(|| "unknown error".to_string());
                bail!("Scan {} failed: {}", scan_id, reason);
            }
            state => bail!("Scan {} ended {:?}", scan_id, state),
        }
        self.orchestrator
            .scan_result(&scan_id)
            .map(Ok)
            .with_context(|| format!("Scan {scan_id} finished without a result"))
    }

    fn scan(&self, args: &ScanArgs) -> Result<ExitCode> {
        let result = match self.run_scan(&args.scan)? {
            Ok(result) => result,
            Err(code) => return Ok(code),
        };
        let report = ScanReport::new(&result);
        match args.output {
            OutputFormat::Text => report.print_text(),
            OutputFormat::Json => print_json(&report)?,
        }
        Ok(ExitCode::Success)
    }

    fn clean(&self, args: &CleanArgs) -> Result<ExitCode> {
        let scan = if let Some(id) = &args.scan_id {
            match self.orchestrator.scan_result(id) {
                Some(scan) => scan,
                None => {
                    eprintln!("Unknown scan: {id}");
                    return Ok(ExitCode::NothingToDo);
                }
            }
        } else if args.latest {
            match self.orchestrator.latest_scan_result() {
                Some(scan) => scan,
                None => {
                    eprintln!("No stored scan to clean");
                    return Ok(ExitCode::NothingToDo);
                }
            }
        } else {
            match self.run_scan(&args.scan)? {
                Ok(scan) => scan,
                Err(code) => return Ok(code),
            }
        };

        let options = CleanOptions {
            categories: (!args.categories.is_empty()).then(|| args.categories.clone()),
            create_backup: !args.no_backup,
            include_confirm: args.include_confirm,
            name: args.name.clone(),
        };

        if args.dry_run {
            let files = self.orchestrator.select_files(&scan, &options);
            match args.output {
                OutputFormat::Text => {
                    for file in &files {
                        println!("{}", file.display());
                    }
                    println!("{} file(s) would be cleaned", files.len());
                }
                OutputFormat::Json => print_json(&files)?,
            }
            return Ok(if files.is_empty() {
                ExitCode::NothingToDo
            } else {
                ExitCode::Success
            });
        }

        let Some(task_id) = self.orchestrator.start_clean(&scan.scan_id, &options) else {
            eprintln!("Nothing to clean");
            return Ok(ExitCode::NothingToDo);
        };
        self.progress
            .watch_clean(&self.orchestrator, &task_id, &self.shutdown);
        let task = self
            .orchestrator
            .clean_task(&task_id)
            .with_context(|| format!("Clean task {task_id} vanished"))?;

        match args.output {
            OutputFormat::Text => print_task(&task),
            OutputFormat::Json => print_json(&task)?,
        }
        match task.status {
            TaskStatus::Failed => bail!(
                "Clean task {} failed: {}",
                task_id,
                task.error_message.as_deref().unwrap_or("unknown error")
            ),
            TaskStatus::Stopped if self.interrupted() => Ok(ExitCode::Interrupted),
            _ if task.failed_count > 0 => Ok(ExitCode::PartialSuccess),
            _ => Ok(ExitCode::Success),
        }
    }

    fn restore(&self, args: &RestoreArgs) -> Result<ExitCode> {
        if let Some(original) = &args.quarantined {
            return match self.orchestrator.restore_from_quarantine(original) {
                Ok(()) => {
                    println!("Restored {}", original.display());
                    Ok(ExitCode::Success)
                }
                Err(QuarantineError::Missing(path)) => {
                    eprintln!("Not in quarantine: {}", path.display());
                    Ok(ExitCode::NothingToDo)
                }
                Err(e) => Err(e).context("Failed to restore from quarantine"),
            };
        }

        let report = if let Some(task_id) = &args.task {
            match self.orchestrator.restore_task(task_id) {
                Ok(report) => report,
                Err(RollbackError::UnknownTask(id)) => {
                    eprintln!("Unknown clean task: {id}");
                    return Ok(ExitCode::NothingToDo);
                }
                Err(e) => return Err(e).context("Failed to restore clean task"),
            }
        } else if let Some(backup_id) = &args.backup {
            let selected = (!args.paths.is_empty()).then_some(args.paths.as_slice());
            match self.orchestrator.restore_from_backup(backup_id, selected) {
                Ok(report) => report,
                Err(BackupError::NotFound(id)) => {
                    eprintln!("Unknown backup: {id}");
                    return Ok(ExitCode::NothingToDo);
                }
                Err(e) => return Err(e).context("Failed to restore backup"),
            }
        } else {
            bail!("Nothing to restore from");
        };
        Ok(print_restore(&report))
    }

    fn backups(&self, args: &ListArgs) -> Result<ExitCode> {
        let backups = self.orchestrator.list_backups()?;
        match args.output {
            OutputFormat::Json => print_json(&backups)?,
            OutputFormat::Text => {
                for b in &backups {
                    println!(
                        "{}  {}  {} file(s)  {}{}",
                        b.backup_id,
                        b.created_at.format("%Y-%m-%d %H:%M"),
                        b.file_count,
                        format_size(b.total_size),
                        if b.is_valid { "" } else { "  (invalid)" }
                    );
                }
                if backups.is_empty() {
                    println!("No backups");
                }
            }
        }
        Ok(ExitCode::Success)
    }

    fn prune(&self, args: &PruneArgs) -> Result<ExitCode> {
        if !args.quarantine_only {
            let removed = self.orchestrator.prune_backups(args.days)?;
            println!("Pruned {removed} backup(s)");
        }
        if !args.backups_only {
            let purged = self.orchestrator.purge_quarantine(args.days)?;
            println!("Purged {purged} quarantined item(s)");
        }
        Ok(ExitCode::Success)
    }

    fn quarantine(&self, args: &ListArgs) -> Result<ExitCode> {
        let entries = self.orchestrator.quarantine_entries()?;
        match args.output {
            OutputFormat::Json => print_json(&entries)?,
            OutputFormat::Text => {
                for e in &entries {
                    println!(
                        "{}  {}  {}",
                        e.timestamp.format("%Y-%m-%d %H:%M"),
                        format_size(e.size),
                        e.original_path.display()
                    );
                }
                if entries.is_empty() {
                    println!("Quarantine is empty");
                }
            }
        }
        Ok(ExitCode::Success)
    }

    fn plan(&self, args: &PlanArgs) -> Result<ExitCode> {
        let planner = JsonPlanFile::new(args.file.clone());
        let report = self.orchestrator.run_planner(&planner, &args.goal)?;
        match args.output {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Text => print_plan(&report),
        }
        Ok(plan_exit_code(&report, self.interrupted()))
    }
}

fn print_task(task: &CleanTask) {
    println!("Task {} ({})", task.task_id, task.name);
    println!(
        "  {} of {} file(s) cleaned, {} reclaimed",
        task.cleaned_count,
        task.files_to_clean.len(),
        format_size(task.cleaned_size)
    );
    if task.failed_count > 0 {
        println!("  {} file(s) failed", task.failed_count);
    }
    if let Some(backup_id) = &task.backup_id {
        println!("  backup {backup_id}");
    }
    println!("  status {:?}", task.status);
}

fn print_restore(report: &RestoreReport) -> ExitCode {
    println!("{}", report.summary());
    for (path, reason) in &report.failures {
        println!("  {}: {}", path.display(), reason);
    }
    if report.all_restored() {
        ExitCode::Success
    } else {
        ExitCode::PartialSuccess
    }
}

fn print_plan(report: &PlanReport) {
    for step in &report.steps {
        println!(
            "{:>3}. {:<16} {:<8} {}",
            step.index + 1,
            step.action.as_deref().unwrap_or("?"),
            format!("{:?}", step.status).to_lowercase(),
            step.detail
        );
    }
}

fn plan_exit_code(report: &PlanReport, interrupted: bool) -> ExitCode {
    if interrupted {
        ExitCode::Interrupted
    } else if report.steps.is_empty() || report.count(StepStatus::Done) == 0 {
        ExitCode::NothingToDo
    } else if report.count(StepStatus::Failed) > 0 {
        ExitCode::PartialSuccess
    } else {
        ExitCode::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::StepReport;

    fn step(status: StepStatus) -> StepReport {
        StepReport {
            index: 0,
            action: Some("delete_file".into()),
            status,
            detail: String::new(),
        }
    }

    #[test]
    fn test_plan_exit_codes() {
        let empty = PlanReport::default();
        assert_eq!(plan_exit_code(&empty, false), ExitCode::NothingToDo);

        let mixed = PlanReport {
            steps: vec![step(StepStatus::Done), step(StepStatus::Failed)],
        };
        assert_eq!(plan_exit_code(&mixed, false), ExitCode::PartialSuccess);
        assert_eq!(plan_exit_code(&mixed, true), ExitCode::Interrupted);

        let done = PlanReport {
            steps: vec![step(StepStatus::Done), step(StepStatus::Skipped)],
        };
        assert_eq!(plan_exit_code(&done, false), ExitCode::Success);
    }

    #[test]
    fn test_apply_scan_options() {
        let mut config = Config::default();
        let options = ScanOptions {
            paths: vec![],
            exclude: vec![],
            max_depth: Some(3),
            ignore_patterns: vec!["*.iso".into()],
            follow_symlinks: false,
            hidden: true,
            no_images: true,
            large_files: Some(5 * BYTES_PER_MB + 1),
        };
        apply_scan_options(&mut config, &options);
        assert_eq!(config.scanner.max_depth, 3);
        assert!(!config.scanner.skip_hidden);
        assert!(!config.scanner.image_analysis);
        assert!(config.scanner.ignore_patterns.contains(&"*.iso".to_string()));
        assert_eq!(config.rules.large_files.min_size_mb, 6);
    }
}
