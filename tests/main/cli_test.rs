//! CLI contract tests.

use std::path::PathBuf;

use assert_cmd::Command;

fn difc(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_difc"));
    cmd.current_dir(dir.path())
        .env("DIFC_CONFIG_PATH", dir.path().join("difc.toml"))
        .env_remove("DIFC_AUDIT_LOG")
        .env_remove("DIFC_LOGS_DIR")
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_of(cmd: &mut Command) -> (bool, String) {
    let output = cmd.output().expect("binary runs");
    (
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).into_owned(),
    )
}

#[test]
fn flow_reports_float_and_perimeter() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (ok, stdout) = stdout_of(difc(&dir).args([
        "flow",
        "--object-privacy",
        r#"[["https://a.com"]]"#,
    ]));

    assert!(ok, "{stdout}");
    assert!(stdout.contains("floated"));
    assert!(stdout.contains(r#"privacy: [["https://a.com"]]"#));
    assert!(stdout.contains("connect-src https://a.com"));
}

#[test]
fn flow_with_privilege_is_direct() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (ok, stdout) = stdout_of(difc(&dir).args([
        "flow",
        "--object-privacy",
        r#"[["https://a.com"]]"#,
        "--privileges",
        r#"[["https://a.com"]]"#,
    ]));

    assert!(ok, "{stdout}");
    assert!(stdout.starts_with("direct"));
    assert!(stdout.contains("privacy: []"));
}

#[test]
fn flow_above_clearance_fails() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (ok, stdout) = stdout_of(difc(&dir).args([
        "flow",
        "--object-privacy",
        r#"[["https://c.com"]]"#,
        "--clearance",
        r#"[["https://a.com","https://b.com"]]"#,
    ]));

    assert!(!ok);
    assert!(stdout.contains("denied: privacy label would exceed clearance"));
    assert!(stdout.contains("privacy: []"));
}

#[test]
fn flow_rejects_malformed_label() {
    let dir = tempfile::tempdir().expect("temp dir");
    difc(&dir)
        .args(["flow", "--object-privacy", "[[]]"])
        .assert()
        .failure();
}

#[test]
fn run_demo_scenario_passes() {
    let dir = tempfile::tempdir().expect("temp dir");
    let scenario = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos/isolation.toml");
    let (ok, stdout) = stdout_of(difc(&dir).arg("run").arg(&scenario));

    assert!(ok, "{stdout}");
    assert!(stdout.contains("scenario passed"));
    assert_eq!(stdout.lines().filter(|l| l.starts_with("[ok]")).count(), 8);
}

#[test]
fn run_fails_on_mismatch() {
    let dir = tempfile::tempdir().expect("temp dir");
    let scenario = dir.path().join("bad.toml");
    std::fs::write(
        &scenario,
        r#"
[[compartment]]
name = "page"

[[step]]
action = "guard_read"
dest = "page"
privacy = [["https://a.com"]]
expect = "direct"
"#,
    )
    .expect("write scenario");

    let (ok, stdout) = stdout_of(difc(&dir).arg("run").arg(&scenario));
    assert!(!ok);
    assert!(stdout.contains("[FAIL] step 1 guard_read"));
    assert!(stdout.contains("scenario FAILED"));
}

#[test]
fn explicit_config_enables_audit_log() {
    let dir = tempfile::tempdir().expect("temp dir");
    let audit = dir.path().join("audit.jsonl");
    let config = dir.path().join("custom.toml");
    std::fs::write(
        &config,
        format!("[audit]\npath = {:?}\n", audit.display().to_string()),
    )
    .expect("write config");

    difc(&dir)
        .arg("--config")
        .arg(&config)
        .args(["flow", "--object-privacy", r#"[["https://a.com"]]"#])
        .assert()
        .success();

    let log = std::fs::read_to_string(&audit).expect("audit written");
    assert!(log.contains("label_floated"));
}

#[test]
fn json_logging_config_writes_log_files() {
    let dir = tempfile::tempdir().expect("temp dir");
    let logs = dir.path().join("logs");
    let config = dir.path().join("custom.toml");
    std::fs::write(
        &config,
        format!(
            "[logging]\njson = true\nlogs_dir = {:?}\n",
            logs.display().to_string()
        ),
    )
    .expect("write config");

    let (ok, stdout) = stdout_of(
        difc(&dir)
            .arg("--config")
            .arg(&config)
            .args(["flow", "--object-privacy", r#"[["https://a.com"]]"#]),
    );
    assert!(ok, "{stdout}");
    assert!(stdout.contains("floated"));
    assert!(logs.is_dir(), "logs directory should be created");
}

#[test]
fn help_lists_subcommands() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (ok, stdout) = stdout_of(difc(&dir).arg("--help"));
    assert!(ok);
    assert!(stdout.contains("flow"));
    assert!(stdout.contains("run"));
}
