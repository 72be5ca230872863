//! Tests for `src/config.rs`.

use std::path::PathBuf;

use difc::config::MonitorConfig;

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = MonitorConfig::load_from(&dir.path().join("absent.toml")).expect("defaults");
    assert!(config.enforcement.same_origin_for_content);
    assert!(config.audit.path.is_none());
}

#[test]
fn file_values_are_loaded() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("difc.toml");
    std::fs::write(
        &path,
        r#"
[logging]
level = "debug"
json = true
logs_dir = "/var/log/difc"

[audit]
path = "/var/lib/difc/audit.jsonl"

[enforcement]
same_origin_for_content = false
allow_fetch_schemes = ["https"]
"#,
    )
    .expect("write config");

    let config = MonitorConfig::load_from(&path).expect("valid config");
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json);
    assert_eq!(
        config.logs_dir().expect("logs dir"),
        PathBuf::from("/var/log/difc")
    );
    assert_eq!(
        config.audit.path,
        Some(PathBuf::from("/var/lib/difc/audit.jsonl"))
    );
    assert!(!config.enforcement.same_origin_for_content);
    assert_eq!(config.enforcement.allow_fetch_schemes, vec!["https"]);
}

#[test]
fn partial_sections_keep_defaults() {
    let config = MonitorConfig::from_toml(
        r#"
[enforcement]
same_origin_for_content = false
"#,
    )
    .expect("valid config");
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.enforcement.allow_fetch_schemes, vec!["http", "https"]);
}

#[test]
fn malformed_file_is_an_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("difc.toml");
    std::fs::write(&path, "[logging\nlevel = ").expect("write config");
    assert!(MonitorConfig::load_from(&path).is_err());
}

#[test]
fn mistyped_value_is_an_error() {
    assert!(MonitorConfig::from_toml("[enforcement]\nsame_origin_for_content = \"yes\"").is_err());
}

#[test]
fn env_overrides_win() {
    let mut config = MonitorConfig::from_toml("[logging]\nlevel = \"warn\"").expect("valid config");
    config.apply_overrides(|key| match key {
        "DIFC_LOG_LEVEL" => Some("trace".to_owned()),
        "DIFC_AUDIT_LOG" => Some("/tmp/audit.jsonl".to_owned()),
        "DIFC_LOGS_DIR" => Some("/tmp/logs".to_owned()),
        "DIFC_SAME_ORIGIN" => Some("false".to_owned()),
        _ => None,
    });

    assert_eq!(config.logging.level, "trace");
    assert_eq!(config.audit.path, Some(PathBuf::from("/tmp/audit.jsonl")));
    assert_eq!(config.logging.logs_dir, Some(PathBuf::from("/tmp/logs")));
    assert!(!config.enforcement.same_origin_for_content);
}

#[test]
fn config_path_honours_env() {
    let path = MonitorConfig::config_path_with(|key| {
        (key == "DIFC_CONFIG_PATH").then(|| "/etc/difc/custom.toml".to_owned())
    });
    assert_eq!(path, PathBuf::from("/etc/difc/custom.toml"));
}
