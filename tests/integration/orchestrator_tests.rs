use diskwarden::actions::CleanOptions;
use diskwarden::config::Config;
use diskwarden::model::{ScanState, TaskStatus};
use diskwarden::orchestrator::{JsonPlanFile, Planner, StepStatus, TaskOrchestrator};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn config(state: &Path, database: bool) -> Config {
    let mut config = Config::default();
    config.scanner.skip_hidden = false;
    config.safety.user_dirs.clear();
    config.safety.quarantine.path = state.join("quarantine");
    config.safety.backup.path = state.join("backups");
    config.storage.database_path = database.then(|| state.join("diskwarden.db"));
    config
}

#[test]
fn test_plan_scans_then_cleans() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    fs::write(work.path().join("a.tmp"), b"aaaa").unwrap();
    fs::write(work.path().join("keep.txt"), b"keep").unwrap();

    let orchestrator = TaskOrchestrator::open(config(state.path(), false)).unwrap();
    let report = orchestrator.execute_plan(&[
        json!({"action": "scan_paths", "parameters": {"paths": [work.path()]}}),
        json!({"action": "perform_cleanup", "parameters": {
            "categories": ["temp_files"],
            "create_backup": false,
            "task_name": "planned"
        }}),
    ]);

    assert_eq!(report.count(StepStatus::Done), 2, "{report:?}");
    assert!(!work.path().join("a.tmp").exists());
    assert!(work.path().join("keep.txt").exists());
    assert_eq!(orchestrator.quarantine_entries().unwrap().len(), 1);
    assert!(orchestrator.list_backups().unwrap().is_empty());
}

#[test]
fn test_plan_file_with_wrapped_steps() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let target = work.path().join("old.log");
    fs::write(&target, b"log line").unwrap();
    let plan_path = state.path().join("plan.json");
    let plan = json!({
        "summary": "remove one log",
        "cleanup_plan": [
            {"path": target, "parameters": {"create_backup": false}},
            {"action": "delete_file", "path": work.path().join("ghost.log")},
            {"action": "delete_file", "path": work.path(), "safety": "forbid"}
        ]
    });
    fs::write(&plan_path, serde_json::to_string_pretty(&plan).unwrap()).unwrap();

    let planner = JsonPlanFile::new(plan_path);
    assert_eq!(planner.plan("tidy").unwrap().len(), 3);

    let orchestrator = TaskOrchestrator::open(config(state.path(), false)).unwrap();
    let report = orchestrator.run_planner(&planner, "tidy").unwrap();
    let statuses: Vec<StepStatus> = report.steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Done, StepStatus::Skipped, StepStatus::Skipped]
    );
    assert_eq!(report.steps[0].action.as_deref(), Some("delete_file"));
    assert!(!target.exists());
    assert!(work.path().exists());

    orchestrator.restore_from_quarantine(&target).unwrap();
    assert_eq!(fs::read(&target).unwrap(), b"log line");
}

#[test]
fn test_planner_errors_are_reported() {
    struct Broken;
    impl Planner for Broken {
        fn plan(&self, _goal: &str) -> anyhow::Result<Vec<Value>> {
            anyhow::bail!("model unavailable")
        }
    }

    let state = TempDir::new().unwrap();
    let orchestrator = TaskOrchestrator::open(config(state.path(), false)).unwrap();
    let err = orchestrator.run_planner(&Broken, "anything").unwrap_err();
    assert!(format!("{err:#}").contains("model unavailable"));

    let missing = JsonPlanFile::new(state.path().join("missing.json"));
    assert!(orchestrator.run_planner(&missing, "anything").is_err());
}

#[test]
fn test_restore_task_brings_files_back() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let a = work.path().join("a.tmp");
    let b = work.path().join("b.tmp");
    fs::write(&a, b"alpha").unwrap();
    fs::write(&b, b"beta").unwrap();

    let orchestrator = TaskOrchestrator::open(config(state.path(), false)).unwrap();
    let scan_id = orchestrator
        .start_scan(Some(vec![work.path().to_path_buf()]), None)
        .unwrap();
    assert_eq!(
        orchestrator.wait_scan(Duration::from_secs(60)),
        ScanState::Completed
    );
    let options = CleanOptions {
        create_backup: true,
        ..CleanOptions::default()
    };
    let task_id = orchestrator.start_clean(&scan_id, &options).unwrap();
    assert_eq!(
        orchestrator.wait_clean(Duration::from_secs(60)),
        Some(TaskStatus::Completed)
    );
    assert!(!a.exists() && !b.exists());

    // One file is lost from quarantine; the backup covers it.
    let entries = orchestrator.quarantine_entries().unwrap();
    let lost = entries.iter().find(|e| e.original_path == b).unwrap();
    fs::remove_file(&lost.quarantine_path).unwrap();

    let report = orchestrator.restore_task(&task_id).unwrap();
    assert!(report.all_restored(), "{report:?}");
    assert_eq!(report.restored, 2);
    assert_eq!(fs::read(&a).unwrap(), b"alpha");
    assert_eq!(fs::read(&b).unwrap(), b"beta");
}

#[test]
fn test_records_survive_reopen_with_sqlite() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    fs::write(work.path().join("x.tmp"), b"x").unwrap();

    let scan_id = {
        let orchestrator = TaskOrchestrator::open(config(state.path(), true)).unwrap();
        let id = orchestrator
            .start_scan(Some(vec![work.path().to_path_buf()]), None)
            .unwrap();
        assert_eq!(
            orchestrator.wait_scan(Duration::from_secs(60)),
            ScanState::Completed
        );
        id
    };

    let reopened = TaskOrchestrator::open(config(state.path(), true)).unwrap();
    let latest = reopened.latest_scan_result().unwrap();
    assert_eq!(latest.scan_id, scan_id);
    assert!(latest.descriptor(&work.path().join("x.tmp")).is_some());

    let task_id = reopened
        .start_clean(&scan_id, &CleanOptions::default())
        .unwrap();
    reopened.wait_clean(Duration::from_secs(60));
    drop(reopened);

    let again = TaskOrchestrator::open(config(state.path(), true)).unwrap();
    let task = again.clean_task(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.cleaned_count, 1);
}

#[test]
fn test_prune_and_purge_with_zero_days() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let file = work.path().join("z.tmp");
    fs::write(&file, b"z").unwrap();

    let orchestrator = TaskOrchestrator::open(config(state.path(), false)).unwrap();
    let report = orchestrator.execute_plan(&[json!({"action": "delete_file", "path": file})]);
    assert_eq!(report.count(StepStatus::Done), 1);
    assert_eq!(orchestrator.list_backups().unwrap().len(), 1);

    assert_eq!(orchestrator.prune_backups(Some(0)).unwrap(), 1);
    assert_eq!(orchestrator.purge_quarantine(Some(0)).unwrap(), 1);
    assert!(orchestrator.list_backups().unwrap().is_empty());
    assert!(orchestrator.quarantine_entries().unwrap().is_empty());
}
