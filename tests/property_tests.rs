use diskwarden::actions::{BackupVault, CleanOptions, Cleaner, QuarantineStore};
use diskwarden::config::Config;
use diskwarden::model::{
    Category, CleanProgress, DuplicateMember, DuplicateSet, FileDescriptor, FileKind,
    SafetyTier, ScanResult, TaskStatus,
};
use diskwarden::orchestrator::{PlanError, PlanStep};
use diskwarden::rules::RuleEngine;
use diskwarden::store::MemoryRepository;
use proptest::prelude::*;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn config() -> Config {
    let mut config = Config::default();
    config.safety.user_dirs.clear();
    config
}

fn tier_strategy() -> impl Strategy<Value = SafetyTier> {
    prop_oneof![
        Just(SafetyTier::Safe),
        Just(SafetyTier::Confirm),
        Just(SafetyTier::Forbid),
    ]
}

fn category_strategy() -> impl Strategy<Value = Category> {
    (0..Category::ALL.len()).prop_map(|i| Category::ALL[i])
}

proptest! {
    #[test]
    fn test_forbid_is_never_selected(
        files in prop::collection::vec((category_strategy(), tier_strategy(), 1u64..10_000), 1..40),
        wanted in prop::option::of(prop::collection::vec(category_strategy(), 1..5)),
        include_confirm in any::<bool>(),
    ) {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(config());
        let cleaner = Cleaner::new(
            Arc::clone(&config),
            Arc::new(RuleEngine::new(&config)),
            Arc::new(MemoryRepository::new()),
            Arc::new(QuarantineStore::new(dir.path().join("q"))),
            Arc::new(BackupVault::new(dir.path().join("b"))),
        );

        let mut scan = ScanResult::new("s".into(), vec![], vec![]);
        for (i, (category, tier, size)) in files.iter().enumerate() {
            let mut desc = FileDescriptor::new(
                PathBuf::from(format!("/data/work/f{i}.tmp")),
                *size,
                FileKind::Temp,
            );
            desc.category = *category;
            desc.eligible = true;
            desc.safety_tier = *tier;
            scan.push(desc);
        }

        let options = CleanOptions {
            categories: wanted,
            include_confirm,
            ..CleanOptions::default()
        };
        for desc in cleaner.select_files(&scan, &options) {
            prop_assert_ne!(desc.safety_tier, SafetyTier::Forbid);
            if !include_confirm {
                prop_assert_eq!(desc.safety_tier, SafetyTier::Safe);
            }
        }
    }

    #[test]
    fn test_keep_first_protects_exactly_the_first_member(members in 2usize..8) {
        let rules = RuleEngine::new(&config());
        let paths: Vec<PathBuf> = (0..members)
            .map(|i| PathBuf::from(format!("/data/photos/copy{i}.bin")))
            .collect();
        let set = DuplicateSet {
            hash: "ab".repeat(32),
            size: 4096,
            members: paths
                .iter()
                .map(|p| DuplicateMember { path: p.clone(), modified: None })
                .collect(),
        };
        let sets = vec![set];

        let verdicts: Vec<bool> = paths
            .iter()
            .map(|p| rules.can_delete(&FileDescriptor::new(p.clone(), 4096, FileKind::Regular), &sets))
            .collect();
        prop_assert!(!verdicts[0]);
        prop_assert!(verdicts[1..].iter().all(|v| *v));

        let again: Vec<bool> = paths
            .iter()
            .map(|p| rules.can_delete(&FileDescriptor::new(p.clone(), 4096, FileKind::Regular), &sets))
            .collect();
        prop_assert_eq!(verdicts, again);
    }

    #[test]
    fn test_ineligible_descriptors_are_forbidden(
        category in category_strategy(),
        size in 0u64..(1 << 40),
        name in "[a-z]{1,8}\\.(tmp|log|txt|bin)",
    ) {
        let rules = RuleEngine::new(&config());
        let mut desc = FileDescriptor::new(PathBuf::from("/data/work").join(name), size, FileKind::Regular);
        desc.eligible = false;
        prop_assert_eq!(rules.classify_safety_as(&desc, category), SafetyTier::Forbid);
    }

    #[test]
    fn test_clean_progress_fraction_is_bounded(cleaned in any::<u64>(), total in any::<u64>()) {
        let progress = CleanProgress::new(TaskStatus::Running, cleaned, total);
        prop_assert!((0.0..=1.0).contains(&progress.fraction));
    }

    #[test]
    fn test_unknown_actions_are_rejected(action in "[a-z_]{1,20}") {
        let known = ["scan_paths", "perform_cleanup", "delete_file", "delete_dir"];
        let result = PlanStep::from_value(&json!({"action": action, "path": "/data/x"}));
        if known.contains(&action.as_str()) {
            prop_assert!(result.is_ok());
        } else {
            prop_assert_eq!(result, Err(PlanError::UnknownAction(action)));
        }
    }
}
