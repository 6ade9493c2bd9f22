//! Terminal progress for the CLI using indicatif.
//!
//! Scans and clean tasks run on their own threads; the CLI thread polls the
//! orchestrator here, renders what it sees and forwards Ctrl+C as a stop
//! request.

use std::time::Duration;

use bytesize::ByteSize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::model::{ScanState, TaskStatus};
use crate::orchestrator::TaskOrchestrator;
use crate::signal::ShutdownHandler;

/// Poll interval for the watch loops.
const TICK: Duration = Duration::from_millis(100);

/// Format a byte count with IEC units.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    ByteSize::b(bytes).to_string()
}

/// Progress renderer. Quiet mode keeps the polling but draws nothing.
pub struct Progress {
    quiet: bool,
}

impl Progress {
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    fn spinner(&self) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
        );
        pb.enable_steady_tick(TICK);
        pb
    }

    fn bar(&self, total: u64) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::with_template(
                "[{elapsed_precise}] [{bar:40.green/blue}] {bytes}/{total_bytes} ({percent}%) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█>-"),
        );
        pb
    }

    /// Follow a scan until it leaves `Scanning`. Ctrl+C stops it.
    pub fn watch_scan(
        &self,
        orchestrator: &TaskOrchestrator,
        scan_id: &str,
        shutdown: &ShutdownHandler,
    ) -> ScanState {
        let pb = self.spinner();
        let mut stopping = false;
        let state = loop {
            let state = orchestrator.wait_scan(TICK);
            if state != ScanState::Scanning {
                break state;
            }
            if shutdown.is_shutdown_requested() && !stopping {
                stopping = true;
                pb.set_message("Stopping scan...");
                orchestrator.stop_scan(scan_id);
                continue;
            }
            let progress = orchestrator.scan_progress();
            pb.set_message(format!(
                "Scanning: {} items, {} ({:.0}%)",
                progress.items,
                format_size(progress.bytes),
                progress.fraction * 100.0
            ));
        };
        pb.finish_and_clear();
        state
    }

    /// Follow a clean task until it reaches a terminal status. Ctrl+C stops
    /// it.
    pub fn watch_clean(
        &self,
        orchestrator: &TaskOrchestrator,
        task_id: &str,
        shutdown: &ShutdownHandler,
    ) -> Option<TaskStatus> {
        let total = orchestrator
            .clean_progress()
            .map_or(0, |p| p.total_size);
        let pb = self.bar(total);
        let mut stopping = false;
        let status = loop {
            let status = orchestrator.wait_clean(TICK);
            match status {
                Some(s) if !s.is_terminal() => {}
                _ => break status,
            }
            if shutdown.is_shutdown_requested() && !stopping {
                stopping = true;
                pb.set_message("stopping");
                orchestrator.stop_clean(task_id);
                continue;
            }
            if let Some(progress) = orchestrator.clean_progress() {
                pb.set_length(progress.total_size);
                pb.set_position(progress.cleaned_size);
                if progress.status == TaskStatus::Paused {
                    pb.set_message("paused");
                } else {
                    pb.set_message("");
                }
            }
        };
        pb.finish_and_clear();
        status.or_else(|| orchestrator.clean_task(task_id).map(|t| t.status))
    }
}
