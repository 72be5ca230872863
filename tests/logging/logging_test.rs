//! Tests for `src/logging.rs`.

use difc::config::MonitorConfig;
use difc::logging::LoggingGuard;

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_production_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("logs");
    assert!(!logs_dir.exists());

    // Only one global subscriber can be installed per process, so the call
    // may fail here; the directory is created before that point.
    let _result = difc::logging::init_production(&logs_dir, "info");
    assert!(logs_dir.exists(), "logs directory should be created");
}

#[test]
fn init_cli_twice_does_not_panic() {
    difc::logging::init_cli("debug");
    difc::logging::init_cli("debug");
}

#[test]
fn plain_config_does_not_write_files() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("never-created");
    let mut config = MonitorConfig::default();
    config.logging.logs_dir = Some(logs_dir.clone());

    let guard = difc::logging::init_from_config(&config).expect("stderr only");
    assert!(guard.is_none());
    assert!(!logs_dir.exists());
}
