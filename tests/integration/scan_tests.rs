use diskwarden::config::Config;
use diskwarden::model::{Category, SafetyTier, ScanState};
use diskwarden::scanner::{Scanner, StopOutcome};
use diskwarden::store::MemoryRepository;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const MB: usize = 1024 * 1024;

fn scanner_with(configure: impl FnOnce(&mut Config)) -> Scanner {
    let mut config = Config::default();
    config.scanner.skip_hidden = false;
    config.safety.user_dirs.clear();
    configure(&mut config);
    Scanner::new(Arc::new(config), Arc::new(MemoryRepository::new()))
}

fn scan(scanner: &Scanner, root: &Path) -> String {
    let id = scanner
        .start(Some(vec![root.to_path_buf()]), None)
        .expect("scan should start");
    assert_eq!(scanner.wait(Duration::from_secs(60)), ScanState::Completed);
    id
}

#[test]
fn test_temp_and_large_files_are_tiered() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.tmp"), b"scratch").unwrap();
    fs::write(dir.path().join("b.txt"), vec![7u8; 10 * MB]).unwrap();

    let scanner = scanner_with(|c| c.rules.large_files.min_size_mb = 1);
    let id = scan(&scanner, dir.path());
    let result = scanner.result(&id).unwrap();

    let temp = result.descriptor(&dir.path().join("a.tmp")).unwrap();
    assert_eq!(temp.category, Category::TempFiles);
    assert_eq!(temp.safety_tier, SafetyTier::Safe);

    let large = result.descriptor(&dir.path().join("b.txt")).unwrap();
    assert_eq!(large.category, Category::LargeFiles);
    assert_eq!(large.safety_tier, SafetyTier::Confirm);

    assert_eq!(result.category_size(Category::LargeFiles), (10 * MB) as u64);
}

#[test]
fn test_identical_files_form_one_duplicate_set() {
    let dir = TempDir::new().unwrap();
    let content = vec![42u8; 2 * MB];
    fs::write(dir.path().join("dup1.bin"), &content).unwrap();
    fs::write(dir.path().join("dup2.bin"), &content).unwrap();

    let scanner = scanner_with(|_| {});
    let id = scan(&scanner, dir.path());
    let result = scanner.result(&id).unwrap();

    assert_eq!(result.duplicate_sets.len(), 1);
    let set = &result.duplicate_sets[0];
    assert_eq!(set.members.len(), 2);
    assert_eq!(set.reclaimable(), (2 * MB) as u64);

    let first = result.descriptor(&dir.path().join("dup1.bin")).unwrap();
    let second = result.descriptor(&dir.path().join("dup2.bin")).unwrap();
    assert!(!first.eligible);
    assert!(second.eligible);
}

#[test]
fn test_small_duplicates_below_threshold_are_not_grouped() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("one.bin"), b"tiny").unwrap();
    fs::write(dir.path().join("two.bin"), b"tiny").unwrap();

    let scanner = scanner_with(|_| {});
    let id = scan(&scanner, dir.path());
    assert!(scanner.result(&id).unwrap().duplicate_sets.is_empty());
}

#[test]
fn test_second_scan_is_rejected_while_active() {
    let dir = TempDir::new().unwrap();
    for i in 0..3000 {
        fs::write(dir.path().join(format!("f{i}.log")), format!("line {i}")).unwrap();
    }

    let scanner = scanner_with(|_| {});
    let first = scanner
        .start(Some(vec![dir.path().to_path_buf()]), None)
        .unwrap();
    assert!(scanner.pause(&first));

    assert!(scanner
        .start(Some(vec![dir.path().to_path_buf()]), None)
        .is_none());
    assert_eq!(scanner.active_scan_id().as_deref(), Some(first.as_str()));
    assert_eq!(scanner.state(), ScanState::Scanning);

    assert!(scanner.resume(&first));
    assert_eq!(scanner.wait(Duration::from_secs(60)), ScanState::Completed);
    assert_eq!(scanner.result(&first).unwrap().total_items(), 3000);
}

#[test]
fn test_stop_keeps_partial_result() {
    let dir = TempDir::new().unwrap();
    for i in 0..3000 {
        fs::write(dir.path().join(format!("f{i}.tmp")), b"x").unwrap();
    }

    let scanner = scanner_with(|_| {});
    let id = scanner
        .start(Some(vec![dir.path().to_path_buf()]), None)
        .unwrap();
    assert!(scanner.pause(&id));
    assert_eq!(scanner.stop(&id), StopOutcome::Stopped);
    assert_eq!(scanner.state(), ScanState::Stopped);

    let result = scanner.result(&id).unwrap();
    assert!(!result.is_complete);
    assert!(result.total_items() < 3000);
    assert_eq!(scanner.stop(&id), StopOutcome::NotRunning);
}

#[test]
fn test_excluded_subtree_is_pruned() {
    let dir = TempDir::new().unwrap();
    let keep = dir.path().join("keep");
    let skip = dir.path().join("skip");
    fs::create_dir_all(&keep).unwrap();
    fs::create_dir_all(&skip).unwrap();
    fs::write(keep.join("a.tmp"), b"a").unwrap();
    fs::write(skip.join("b.tmp"), b"b").unwrap();

    let scanner = scanner_with(|_| {});
    let id = scanner
        .start(Some(vec![dir.path().to_path_buf()]), Some(vec![skip.clone()]))
        .unwrap();
    assert_eq!(scanner.wait(Duration::from_secs(60)), ScanState::Completed);

    let result = scanner.result(&id).unwrap();
    assert!(result.descriptor(&keep.join("a.tmp")).is_some());
    assert!(result.descriptor(&skip.join("b.tmp")).is_none());
    assert!(result.descriptors.iter().all(|d| !d.path.starts_with(&skip)));
}

#[test]
fn test_critical_names_are_forbidden() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("id_rsa"), b"secret").unwrap();
    fs::write(dir.path().join("notes.tmp"), b"scratch").unwrap();

    let scanner = scanner_with(|_| {});
    let id = scan(&scanner, dir.path());
    let result = scanner.result(&id).unwrap();

    let key = result.descriptor(&dir.path().join("id_rsa")).unwrap();
    assert!(!key.eligible);
    assert_eq!(key.safety_tier, SafetyTier::Forbid);
}

#[test]
fn test_stale_files_are_old_and_need_confirmation() {
    let dir = TempDir::new().unwrap();
    let stale = dir.path().join("notes.txt");
    fs::write(&stale, b"from long ago").unwrap();
    let two_years = filetime::FileTime::from_unix_time(chrono::Utc::now().timestamp() - 730 * 86_400, 0);
    filetime::set_file_mtime(&stale, two_years).unwrap();
    fs::write(dir.path().join("fresh.txt"), b"today").unwrap();

    let scanner = scanner_with(|_| {});
    let id = scan(&scanner, dir.path());
    let result = scanner.result(&id).unwrap();

    let old = result.descriptor(&stale).unwrap();
    assert_eq!(old.category, Category::OldFiles);
    assert_eq!(old.safety_tier, SafetyTier::Confirm);
    let fresh = result.descriptor(&dir.path().join("fresh.txt")).unwrap();
    assert_eq!(fresh.category, Category::Other);
}

/// Soft gradient under 16px blocks: strong edges, low-frequency structure.
fn blocks() -> image::RgbImage {
    image::RgbImage::from_fn(64, 64, |x, y| {
        let base = (x + y) as u8;
        let v = if (x / 16 + y / 16) % 2 == 0 { base + 100 } else { base };
        image::Rgb([v, v, v])
    })
}

#[test]
fn test_similar_images_cluster_and_flat_image_is_blurry() {
    let dir = TempDir::new().unwrap();
    let original = dir.path().join("photo.png");
    let reencoded = dir.path().join("photo_copy.bmp");
    let flat = dir.path().join("wall.png");
    blocks().save(&original).unwrap();
    blocks().save(&reencoded).unwrap();
    image::RgbImage::from_pixel(64, 64, image::Rgb([128, 128, 128]))
        .save(&flat)
        .unwrap();

    let scanner = scanner_with(|_| {});
    let id = scan(&scanner, dir.path());
    let result = scanner.result(&id).unwrap();

    // Same picture, different bytes: similar but not an exact duplicate.
    assert!(result.duplicate_sets.is_empty());
    assert_eq!(
        result.duplicate_image_clusters,
        vec![vec![original.clone(), reencoded.clone()]]
    );
    assert_eq!(result.blurry_images, vec![flat.clone()]);

    for path in [&original, &reencoded, &flat] {
        let desc = result.descriptor(path).unwrap();
        assert!(desc.perceptual_hash.is_some(), "{}", path.display());
    }
    let sharp = result.descriptor(&original).unwrap().blur_score.unwrap();
    assert!(sharp > 100.0, "{sharp}");
    assert_eq!(result.descriptor(&flat).unwrap().blur_score, Some(0.0));
}

#[test]
fn test_image_analysis_can_be_disabled() {
    let dir = TempDir::new().unwrap();
    blocks().save(dir.path().join("a.png")).unwrap();
    blocks().save(dir.path().join("b.bmp")).unwrap();

    let scanner = scanner_with(|c| c.scanner.image_analysis = false);
    let id = scan(&scanner, dir.path());
    let result = scanner.result(&id).unwrap();

    assert!(result.duplicate_image_clusters.is_empty());
    assert!(result.blurry_images.is_empty());
    assert!(result.descriptors.iter().all(|d| d.perceptual_hash.is_none()));
}
