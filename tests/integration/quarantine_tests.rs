use diskwarden::actions::{QuarantineOutcome, QuarantineStore};
use diskwarden::scanner::Hasher;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_quarantine_then_restore_preserves_content() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let store = QuarantineStore::new(state.path().join("q"));

    let path = work.path().join("nested/report.tmp");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, vec![9u8; 100_000]).unwrap();
    let hasher = Hasher::new();
    let before = hasher.fingerprint(&path).unwrap();

    let entry = match store.quarantine(&path).unwrap() {
        QuarantineOutcome::Moved(entry) => entry,
        QuarantineOutcome::AlreadyGone => panic!("file existed"),
    };
    assert!(!path.exists());
    assert!(entry.quarantine_path.starts_with(store.root()));
    assert_eq!(entry.size, 100_000);

    let found = store.find_latest(&path).unwrap().unwrap();
    assert_eq!(found, entry);
    store.restore(&found).unwrap();

    assert_eq!(hasher.fingerprint(&path).unwrap(), before);
    assert!(store.entries().unwrap().is_empty());
}

#[test]
fn test_missing_path_leaves_no_log_entry() {
    let state = TempDir::new().unwrap();
    let store = QuarantineStore::new(state.path().join("q"));

    let outcome = store.quarantine(&state.path().join("never-was.tmp")).unwrap();
    assert_eq!(outcome, QuarantineOutcome::AlreadyGone);
    assert!(store.entries().unwrap().is_empty());
}

#[test]
fn test_same_path_quarantined_twice_keeps_both() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let store = QuarantineStore::new(state.path().join("q"));
    let path = work.path().join("cache.bin");

    fs::write(&path, b"first").unwrap();
    store.quarantine(&path).unwrap();
    fs::write(&path, b"second").unwrap();
    store.quarantine(&path).unwrap();

    let entries = store.entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert_ne!(entries[0].quarantine_path, entries[1].quarantine_path);

    // The newest copy comes back first.
    let latest = store.find_latest(&path).unwrap().unwrap();
    store.restore(&latest).unwrap();
    assert_eq!(fs::read(&path).unwrap(), b"second");
}

#[test]
fn test_purge_with_zero_days_empties_quarantine() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let store = QuarantineStore::new(state.path().join("q"));
    let path = work.path().join("a.tmp");
    fs::write(&path, b"bye").unwrap();
    let entry = match store.quarantine(&path).unwrap() {
        QuarantineOutcome::Moved(entry) => entry,
        QuarantineOutcome::AlreadyGone => panic!("file existed"),
    };

    assert_eq!(store.purge_older_than(0).unwrap(), 1);
    assert!(store.entries().unwrap().is_empty());
    assert!(!entry.quarantine_path.exists());
}
