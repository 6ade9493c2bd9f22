use diskwarden::actions::CleanOptions;
use diskwarden::config::Config;
use diskwarden::model::{Category, SafetyTier, ScanState, TaskStatus};
use diskwarden::orchestrator::TaskOrchestrator;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn orchestrator(state: &Path) -> TaskOrchestrator {
    let mut config = Config::default();
    config.scanner.skip_hidden = false;
    config.safety.user_dirs.clear();
    config.safety.quarantine.path = state.join("quarantine");
    config.safety.backup.path = state.join("backups");
    config.storage.database_path = None;
    TaskOrchestrator::new(
        config,
        std::sync::Arc::new(diskwarden::store::MemoryRepository::new()),
    )
}

fn scan(orchestrator: &TaskOrchestrator, root: &Path) -> String {
    let id = orchestrator
        .start_scan(Some(vec![root.to_path_buf()]), None)
        .unwrap();
    assert_eq!(
        orchestrator.wait_scan(Duration::from_secs(60)),
        ScanState::Completed
    );
    id
}

fn write_files(dir: &Path, names: &[&str], content: &[u8]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            fs::write(&path, content).unwrap();
            path
        })
        .collect()
}

#[test]
fn test_clean_with_backup_skips_externally_deleted_file() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let files = write_files(work.path(), &["a.tmp", "b.tmp", "c.tmp"], b"0123456789");

    let orchestrator = orchestrator(state.path());
    let scan_id = scan(&orchestrator, work.path());
    fs::remove_file(&files[2]).unwrap();

    let options = CleanOptions {
        create_backup: true,
        ..CleanOptions::default()
    };
    let task_id = orchestrator.start_clean(&scan_id, &options).unwrap();
    assert_eq!(
        orchestrator.wait_clean(Duration::from_secs(60)),
        Some(TaskStatus::Completed)
    );

    let task = orchestrator.clean_task(&task_id).unwrap();
    assert_eq!(task.files_to_clean.len(), 3);
    assert_eq!(task.cleaned_count, 2);
    assert_eq!(task.cleaned_size, 20);
    assert_eq!(task.failed_count, 0);

    let backup_id = task.backup_id.expect("backup was requested");
    let backups = orchestrator.list_backups().unwrap();
    let summary = backups.iter().find(|b| b.backup_id == backup_id).unwrap();
    assert_eq!(summary.file_count, 2);
    assert!(summary.is_valid);
    assert!(files.iter().all(|f| !f.exists()));
}

#[test]
fn test_forbidden_files_are_never_cleaned() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    fs::write(work.path().join("junk.tmp"), b"junk").unwrap();
    fs::write(work.path().join("authorized_keys"), b"ssh-ed25519 AAAA").unwrap();

    let orchestrator = orchestrator(state.path());
    let scan_id = scan(&orchestrator, work.path());
    let scan = orchestrator.scan_result(&scan_id).unwrap();

    let options = CleanOptions {
        categories: Some(Category::ALL.to_vec()),
        include_confirm: true,
        ..CleanOptions::default()
    };
    let selected = orchestrator.select_files(&scan, &options);
    let forbidden: Vec<&PathBuf> = scan
        .descriptors
        .iter()
        .filter(|d| d.safety_tier == SafetyTier::Forbid)
        .map(|d| &d.path)
        .collect();
    assert!(!forbidden.is_empty());
    assert!(forbidden.iter().all(|p| !selected.contains(p)));

    let task_id = orchestrator.start_clean(&scan_id, &options).unwrap();
    orchestrator.wait_clean(Duration::from_secs(60));
    let task = orchestrator.clean_task(&task_id).unwrap();
    assert!(forbidden.iter().all(|p| !task.files_to_clean.contains(p)));
    assert!(work.path().join("authorized_keys").exists());
}

#[test]
fn test_category_filter_limits_selection() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    fs::write(work.path().join("a.tmp"), b"a").unwrap();
    fs::write(work.path().join("b.log"), b"b").unwrap();

    let orchestrator = orchestrator(state.path());
    let scan_id = scan(&orchestrator, work.path());
    let options = CleanOptions {
        categories: Some(vec![Category::TempFiles]),
        create_backup: false,
        include_confirm: true,
        name: Some("temp only".into()),
    };
    let task_id = orchestrator.start_clean(&scan_id, &options).unwrap();
    orchestrator.wait_clean(Duration::from_secs(60));

    let task = orchestrator.clean_task(&task_id).unwrap();
    assert_eq!(task.name, "temp only");
    assert_eq!(task.files_to_clean, vec![work.path().join("a.tmp")]);
    assert!(task.backup_id.is_none());
    assert!(work.path().join("b.log").exists());
}

#[test]
fn test_cleaned_size_is_monotonic_until_terminal() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let names: Vec<String> = (0..400).map(|i| format!("f{i}.tmp")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    write_files(work.path(), &refs, &[1u8; 512]);

    let orchestrator = orchestrator(state.path());
    let scan_id = scan(&orchestrator, work.path());
    let options = CleanOptions::default();
    orchestrator.start_clean(&scan_id, &options).unwrap();

    let mut last = 0;
    loop {
        let progress = orchestrator.clean_progress().unwrap();
        assert!(progress.cleaned_size >= last);
        last = progress.cleaned_size;
        if progress.status.is_terminal() {
            break;
        }
        orchestrator.wait_clean(Duration::from_millis(1));
    }
    assert_eq!(last, 400 * 512);
}

#[test]
fn test_pause_resume_and_stop_clean() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let names: Vec<String> = (0..2000).map(|i| format!("f{i}.tmp")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    write_files(work.path(), &refs, b"x");

    let orchestrator = orchestrator(state.path());
    let scan_id = scan(&orchestrator, work.path());
    let options = CleanOptions::default();
    let task_id = orchestrator.start_clean(&scan_id, &options).unwrap();

    // The task may finish before the pause lands; only a task that is
    // actually paused is checked for being held.
    if orchestrator.pause_clean(&task_id) {
        std::thread::sleep(Duration::from_millis(50));
        let held = orchestrator.clean_progress().unwrap();
        if held.status == TaskStatus::Paused {
            std::thread::sleep(Duration::from_millis(200));
            let later = orchestrator.clean_progress().unwrap();
            assert_eq!(later.status, TaskStatus::Paused);
            assert_eq!(later.cleaned_size, held.cleaned_size);

            // A second task is rejected while one is active.
            assert!(orchestrator.start_clean(&scan_id, &options).is_none());
            assert!(orchestrator.resume_clean(&task_id));
        }
    }

    orchestrator.stop_clean(&task_id);
    orchestrator.wait_clean(Duration::from_secs(60));
    let task = orchestrator.clean_task(&task_id).unwrap();
    assert!(task.status.is_terminal());
    assert!(task.cleaned_count <= 2000);
    assert!(!orchestrator.pause_clean(&task_id));
}

#[test]
fn test_unknown_scan_cannot_be_cleaned() {
    let state = TempDir::new().unwrap();
    let orchestrator = orchestrator(state.path());
    assert!(orchestrator
        .start_clean("no-such-scan", &CleanOptions::default())
        .is_none());
}
