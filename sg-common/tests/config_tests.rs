//! Integration tests for configuration loading and graceful degradation
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate SHOPLIFT_* variables are marked with #[serial].

use serial_test::serial;
use sg_common::config::{read_toml_config, write_toml_config, TomlConfig, CONFIG_PATH_ENV};
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

const OVERRIDE_VARS: &[&str] = &[
    "SHOPLIFT_DRY_RUN",
    "SHOPLIFT_ALERTS_DIR",
    "SHOPLIFT_COOLDOWN_SECONDS",
    "SHOPLIFT_JUDGE_MIN_CONFIDENCE",
    "SHOPLIFT_JUDGE_ENDPOINT",
    "SHOPLIFT_JUDGE_API_KEY",
    "SHOPLIFT_VOICE_ENDPOINT",
    "SHOPLIFT_VOICE_API_KEY",
    "SHOPLIFT_ALERT_TEMPLATE",
    "SHOPLIFT_LOG_LEVEL",
];

fn clear_env() {
    env::remove_var(CONFIG_PATH_ENV);
    for var in OVERRIDE_VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_load_reads_file_named_by_env() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
        dry_run = true
        alerts_dir = "/var/tmp/sg"

        [gate]
        cooldown_seconds = 45

        [judge]
        min_confidence = 0.75
        "#,
    )
    .unwrap();
    env::set_var(CONFIG_PATH_ENV, &path);

    let config = TomlConfig::load();

    assert!(config.dry_run);
    assert_eq!(config.alerts_dir, PathBuf::from("/var/tmp/sg"));
    assert_eq!(config.gate.cooldown_seconds, 45);
    assert_eq!(config.judge.min_confidence, 0.75);

    clear_env();
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "[gate]\ncooldown_seconds = 45\n").unwrap();
    env::set_var(CONFIG_PATH_ENV, &path);
    env::set_var("SHOPLIFT_COOLDOWN_SECONDS", "7");
    env::set_var("SHOPLIFT_JUDGE_ENDPOINT", "http://127.0.0.1:9/judge");
    env::set_var("SHOPLIFT_JUDGE_API_KEY", "k");

    let config = TomlConfig::load();

    assert_eq!(config.gate.cooldown_seconds, 7);
    assert_eq!(
        config.judge.external_service(),
        Some(("http://127.0.0.1:9/judge", "k"))
    );

    clear_env();
}

#[test]
#[serial]
fn test_missing_config_file_uses_defaults() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    env::set_var(CONFIG_PATH_ENV, temp_dir.path().join("absent.toml"));

    let config = TomlConfig::load();
    assert_eq!(config, TomlConfig::default());

    clear_env();
}

#[test]
#[serial]
fn test_malformed_config_file_degrades_to_defaults() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "this is = = not toml [").unwrap();
    env::set_var(CONFIG_PATH_ENV, &path);

    assert!(read_toml_config(&path).is_err());
    let config = TomlConfig::load();
    assert_eq!(config, TomlConfig::default());

    clear_env();
}

#[test]
fn test_write_then_read_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("config.toml");

    let mut config = TomlConfig::default();
    config.voice.endpoint = Some("http://voice.local/tts".to_string());
    config.voice.api_key = Some("voice-key".to_string());
    config.gate.cooldown_seconds = 12;

    write_toml_config(&config, &path).unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("toml.tmp").exists());

    let loaded = read_toml_config(&path).unwrap();
    assert_eq!(loaded, config);
}
