use diskwarden::config::{Config, KeepStrategy};
use figment::providers::{Env, Serialized};
use figment::Figment;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn test_config_load_from_toml() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let toml_content = r#"
[scanner]
include_dirs = ["/srv/data"]
max_depth = 4
image_analysis = false

[rules.large_files]
min_size_mb = 250

[rules.duplicate_files]
keep_strategy = "newest"

[safety.backup]
enabled = false
retention_days = 7
"#;
    fs::write(&config_path, toml_content).unwrap();

    let config = Config::load_from_path(&config_path).unwrap();
    assert_eq!(config.scanner.include_dirs, vec![PathBuf::from("/srv/data")]);
    assert_eq!(config.scanner.max_depth, 4);
    assert!(!config.scanner.image_analysis);
    assert_eq!(config.rules.large_files.min_size_mb, 250);
    assert_eq!(
        config.rules.duplicate_files.keep_strategy,
        KeepStrategy::KeepNewest
    );
    assert!(!config.safety.backup.enabled);
    assert_eq!(config.safety.backup.retention_days, 7);
    // Untouched sections keep their defaults.
    assert_eq!(config.safety.stop_timeout_secs, 5);
}

#[test]
fn test_config_missing_file_uses_defaults() {
    let temp_dir = tempdir().unwrap();
    let config = Config::load_from_path(&temp_dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.scanner.queue_capacity, Config::default().scanner.queue_capacity);
}

#[test]
fn test_config_out_of_range_values_are_clamped() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        "[scanner]\nmax_depth = 0\nsimilar_image_distance = 500\n[safety]\npause_poll_ms = 1\n",
    )
    .unwrap();

    let config = Config::load_from_path(&config_path).unwrap();
    assert_eq!(config.scanner.max_depth, 1);
    assert_eq!(config.scanner.similar_image_distance, 64);
    assert_eq!(config.safety.pause_poll_ms, 10);
}

#[test]
fn test_config_malformed_file_is_an_error() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "[scanner]\nmax_depth = \"deep\"\n").unwrap();

    let err = Config::load_from_path(&config_path).unwrap_err();
    assert!(format!("{err:#}").contains("config.toml"));
}

#[test]
fn test_config_env_overrides_nested_keys() {
    std::env::set_var("DWTEST_SCANNER__MAX_DEPTH", "7");
    std::env::set_var("DWTEST_SAFETY__QUARANTINE__RETENTION_DAYS", "3");

    // A private prefix keeps this test from leaking into others.
    let figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Env::prefixed("DWTEST_").split("__"));
    let config: Config = figment.extract().unwrap();

    assert_eq!(config.scanner.max_depth, 7);
    assert_eq!(config.safety.quarantine.retention_days, 3);

    std::env::remove_var("DWTEST_SCANNER__MAX_DEPTH");
    std::env::remove_var("DWTEST_SAFETY__QUARANTINE__RETENTION_DAYS");
}

#[test]
fn test_config_save_and_reload() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("nested/config.toml");

    let mut config = Config::default();
    config.scanner.exclude_dirs = vec![PathBuf::from("/proc")];
    config.rules.old_files.days = 90;
    config.storage.database_path = Some(temp_dir.path().join("db.sqlite"));
    config.save(&config_path).unwrap();

    let loaded = Config::load_from_path(&config_path).unwrap();
    assert_eq!(loaded.scanner.exclude_dirs, vec![PathBuf::from("/proc")]);
    assert_eq!(loaded.rules.old_files.days, 90);
    assert_eq!(loaded.storage.database_path, config.storage.database_path);
}

#[test]
fn test_dotted_access_and_suggestions() {
    let config = Config::default();
    assert_eq!(config.get("safety.backup.enabled"), Some(Value::Bool(true)));
    assert_eq!(config.get_or("safety.backup.retention_days", 0u32), 30);
    assert!(config.get("safety.backup.enabeld").is_none());
    assert_eq!(
        config.suggest_key("safety.backup.enabeld").as_deref(),
        Some("safety.backup.enabled")
    );
    assert!(config.keys().iter().any(|k| k == "scanner.queue_capacity"));
}
