//! Configuration loading tests

use super::*;
use crate::worker::WorkerMode;
use serde_json::json;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_detect_format() {
    assert!(matches!(detect_format("hotswap.toml"), Ok(FileFormat::Toml)));
    assert!(matches!(detect_format("hotswap.yml"), Ok(FileFormat::Yaml)));
    assert!(matches!(detect_format("hotswap.JSON"), Ok(FileFormat::Json)));
    assert!(matches!(
        detect_format("hotswap.ini"),
        Err(ConfigError::UnsupportedFormat(_))
    ));
    assert!(matches!(
        detect_format("hotswap"),
        Err(ConfigError::UnsupportedFormat(_))
    ));
}

#[test]
fn test_defaults_fill_missing_fields() {
    let config: HotswapConfig = from_str("stop_timeout_ms = 250", FileFormat::Toml).unwrap();
    assert_eq!(config.stop_timeout(), Duration::from_millis(250));
    assert_eq!(config.ready_timeout(), Duration::from_secs(5));
    assert_eq!(config.loop_interval(), Duration::from_millis(50));
    assert_eq!(config.backup_dir, std::path::PathBuf::from("module_backups"));
    assert!(config.units.is_empty());
}

#[test]
fn test_units_with_worker_from_toml() {
    let toml = r#"
backup_dir = "backups"
search_paths = ["units"]

[[units]]
name = "calc"
source = "units/calc.rhai"

[units.worker]
operation = "tick"
mode = "one_shot"

[units.worker.args.keyword]
n = 1
"#;
    let config: HotswapConfig = from_str(toml, FileFormat::Toml).unwrap();
    assert_eq!(config.units.len(), 1);

    let unit = &config.units[0];
    assert_eq!(unit.name, "calc");
    assert!(!unit.accelerate);

    let worker = unit.worker.clone().unwrap();
    assert_eq!(worker.operation, "tick");
    assert_eq!(worker.mode, WorkerMode::OneShot);
    assert_eq!(worker.args.keyword["n"], json!(1));
}

#[test]
fn test_load_yaml_file_with_env_substitution() {
    let temp_dir = TempDir::new().unwrap();
    unsafe {
        std::env::set_var("HOTSWAP_TEST_BACKUP_DIR", "/var/lib/hotswap");
    }

    let path = temp_dir.path().join("hotswap.yaml");
    fs::write(
        &path,
        "backup_dir: ${HOTSWAP_TEST_BACKUP_DIR}\nloop_interval_ms: 10\n",
    )
    .unwrap();

    let config: HotswapConfig = load_config(&path).unwrap();
    assert_eq!(
        config.backup_dir,
        std::path::PathBuf::from("/var/lib/hotswap")
    );
    assert_eq!(config.loop_interval(), Duration::from_millis(10));
}

#[test]
fn test_unset_variables_are_kept() {
    let out = substitute_env_vars("dir: ${HOTSWAP_SURELY_UNSET_VAR_42}");
    assert_eq!(out, "dir: ${HOTSWAP_SURELY_UNSET_VAR_42}");
}

#[test]
fn test_load_merged_later_overrides() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("base.toml");
    let local = temp_dir.path().join("local.json");
    fs::write(&base, "stop_timeout_ms = 100\nready_timeout_ms = 200\n").unwrap();
    fs::write(&local, r#"{ "stop_timeout_ms": 900 }"#).unwrap();

    let config: HotswapConfig = load_merged(&[base.as_path(), local.as_path()]).unwrap();
    assert_eq!(config.stop_timeout_ms, 900);
    assert_eq!(config.ready_timeout_ms, 200);
}

#[test]
fn test_builder_methods() {
    let config = HotswapConfig::new()
        .with_backup_dir("b")
        .with_search_path("units")
        .with_stop_timeout(Duration::from_millis(75))
        .with_unit(UnitConfig::new("calc").with_source("calc.rhai"));
    assert_eq!(config.stop_timeout_ms, 75);
    assert_eq!(config.search_paths.len(), 1);
    assert_eq!(config.units[0].source.as_deref(), Some(std::path::Path::new("calc.rhai")));
}
