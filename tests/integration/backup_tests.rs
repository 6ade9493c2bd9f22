use diskwarden::actions::{BackupError, BackupVault};
use diskwarden::scanner::Hasher;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn fixture(dir: &TempDir) -> Vec<PathBuf> {
    let docs = dir.path().join("docs");
    fs::create_dir_all(docs.join("inner")).unwrap();
    fs::write(docs.join("inner/deep.txt"), b"deep").unwrap();
    let a = dir.path().join("a.bin");
    fs::write(&a, vec![1u8; 70_000]).unwrap();
    let b = dir.path().join("b.txt");
    fs::write(&b, b"bravo").unwrap();
    vec![a, b, docs]
}

#[test]
fn test_backup_restore_round_trip() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let vault = BackupVault::new(state.path().join("backups"));
    let files = fixture(&work);
    let hasher = Hasher::new();
    let before: Vec<Option<String>> = files[..2].iter().map(|f| hasher.fingerprint(f)).collect();

    let manifest = vault.create(&files, Some("task-1")).unwrap();
    assert_eq!(manifest.entries.len(), 3);
    assert_eq!(manifest.total_size, 70_000 + 5 + 4);
    assert_eq!(manifest.source_task_id.as_deref(), Some("task-1"));
    assert!(manifest.entries[2].is_dir);

    fs::remove_file(&files[0]).unwrap();
    fs::write(&files[1], b"changed").unwrap();
    fs::remove_dir_all(&files[2]).unwrap();

    let report = vault.restore(&manifest.backup_id, None).unwrap();
    assert!(report.all_restored());
    assert_eq!(report.restored, 3);

    let after: Vec<Option<String>> = files[..2].iter().map(|f| hasher.fingerprint(f)).collect();
    assert_eq!(before, after);
    for entry in &manifest.entries {
        if !entry.is_dir {
            assert_eq!(fs::metadata(&entry.original_path).unwrap().len(), entry.size);
        }
    }
    assert_eq!(fs::read(files[2].join("inner/deep.txt")).unwrap(), b"deep");
}

#[test]
fn test_selective_restore_touches_only_selected() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let vault = BackupVault::new(state.path().join("backups"));
    let files = fixture(&work);
    let manifest = vault.create(&files, None).unwrap();

    fs::remove_file(&files[0]).unwrap();
    fs::remove_file(&files[1]).unwrap();

    let report = vault
        .restore(&manifest.backup_id, Some(std::slice::from_ref(&files[1])))
        .unwrap();
    assert_eq!(report.restored, 1);
    assert!(files[1].exists());
    assert!(!files[0].exists());
}

#[test]
fn test_list_delete_and_unknown_ids() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let vault = BackupVault::new(state.path().join("backups"));
    let files = fixture(&work);

    let first = vault.create(&files[..1], None).unwrap();
    let second = vault.create(&files[1..2], None).unwrap();
    let listed: Vec<String> = vault.list().unwrap().into_iter().map(|b| b.backup_id).collect();
    assert_eq!(listed.len(), 2);
    assert!(listed.contains(&first.backup_id));
    assert!(listed.contains(&second.backup_id));

    vault.pin(&first.backup_id);
    assert!(matches!(
        vault.delete(&first.backup_id),
        Err(BackupError::Pinned(_))
    ));
    vault.unpin(&first.backup_id);
    vault.delete(&first.backup_id).unwrap();
    assert_eq!(vault.list().unwrap().len(), 1);

    assert!(matches!(
        vault.restore(&first.backup_id, None),
        Err(BackupError::NotFound(_))
    ));
}

#[test]
fn test_edited_manifest_is_rejected() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let root = state.path().join("backups");
    let vault = BackupVault::new(root.clone());
    let files = fixture(&work);
    let manifest = vault.create(&files, None).unwrap();

    let path = root.join(format!("{}.json", manifest.backup_id));
    let text = fs::read_to_string(&path).unwrap();
    fs::write(&path, text.replace("b.txt", "evil.txt")).unwrap();

    assert!(matches!(
        vault.restore(&manifest.backup_id, None),
        Err(BackupError::Corrupt(_))
    ));
    assert!(vault.list().unwrap().is_empty());
}
