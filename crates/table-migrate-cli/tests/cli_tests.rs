//! CLI integration tests for table-migrate.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn cmd() -> Command {
    Command::cargo_bin("table-migrate").unwrap()
}

fn json_source(dir: &Path) -> String {
    let src = dir.join("src");
    fs::create_dir(&src).unwrap();
    fs::write(
        src.join("users.json"),
        r#"[{"id": 1, "name": "ann"}, {"id": 2, "name": "bob"}]"#,
    )
    .unwrap();
    fs::write(src.join("tmp_cache.json"), r#"[{"k": "v"}]"#).unwrap();
    format!("jsonfile:::{}", src.display())
}

// ===== Help and Version Tests =====

#[test]
fn test_help() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--from"))
        .stdout(predicate::str::contains("--to"))
        .stdout(predicate::str::contains("--transfer-mode"))
        .stdout(predicate::str::contains("--exclude"));
}

#[test]
fn test_version() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("table-migrate"));
}

// ===== Usage Error Tests =====

#[test]
fn test_missing_endpoints_prints_usage() {
    cmd()
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_missing_destination_prints_usage() {
    cmd()
        .args(["-f", "jsonfile:::/tmp"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("-t"));
}

#[test]
fn test_unknown_flag_is_usage_error() {
    cmd().arg("--frobnicate").assert().code(2);
}

// ===== Configuration Error Tests =====

#[test]
fn test_unknown_backend_tag() {
    let dir = tempfile::tempdir().unwrap();
    let src = json_source(dir.path());
    cmd()
        .args(["-f", &src, "-t", "nope:::somewhere"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unknown backend 'nope'"));
}

#[test]
fn test_url_without_delimiter() {
    cmd()
        .args(["-f", "jsonfile:/tmp", "-t", "jsonfile:::/tmp"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("<backend>:::<locator>"));
}

#[test]
fn test_invalid_compare_mode() {
    cmd()
        .args([
            "-f",
            "jsonfile:::/tmp",
            "-t",
            "jsonfile:::/tmp",
            "--compare-mode",
            "MAYBE",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid compare_mode"));
}

#[test]
fn test_zero_paquet() {
    cmd()
        .args(["-f", "jsonfile:::/tmp", "-t", "jsonfile:::/tmp", "--paquet", "0"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("paquet"));
}

#[test]
fn test_invalid_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("run.yaml");
    fs::write(&config, "source: [").unwrap();
    cmd()
        .args(["--config", config.to_str().unwrap()])
        .assert()
        .code(1);
}

#[test]
fn test_missing_config_file() {
    cmd()
        .args(["--config", "/nonexistent/run.yaml"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_log_format() {
    let dir = tempfile::tempdir().unwrap();
    let src = json_source(dir.path());
    cmd()
        .args(["-f", &src, "-t", &src, "--log-format", "xml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid log format"));
}

// ===== Migration Tests =====

#[test]
fn test_json_to_csv_run_with_report_and_stats() {
    let dir = tempfile::tempdir().unwrap();
    let src = json_source(dir.path());
    let out = dir.path().join("out");
    let report = dir.path().join("report.html");
    let stats = dir.path().join("stats.json");

    cmd()
        .args(["-f", &src, "-t"])
        .arg(format!("csvfile:::{}", out.display()))
        .args(["--exclude", "tmp_", "--paquet", "1", "--check"])
        .arg("--report")
        .arg(&report)
        .arg("--stats-json")
        .arg(&stats)
        .assert()
        .success()
        .stdout(predicate::str::contains("Records transferred: 2"))
        .stdout(predicate::str::contains("exceptions: 0"))
        .stdout(predicate::str::contains("users: 0 missing"));

    assert_eq!(
        fs::read_to_string(out.join("users.csv")).unwrap(),
        "id;name\n1;ann\n2;bob\n"
    );
    assert!(!out.join("tmp_cache.csv").exists());

    let html = fs::read_to_string(&report).unwrap();
    assert!(html.contains("users"));

    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&stats).unwrap()).unwrap();
    assert_eq!(value["total_records_transferred"], 2);
    assert_eq!(value["tables"]["tmp_cache"]["skipped"], true);
}

#[test]
fn test_run_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let src = json_source(dir.path());
    let out = dir.path().join("out");
    let config = dir.path().join("run.yaml");
    fs::write(
        &config,
        format!(
            "source: \"{}\"\ndestination: \"jsonfile:::{}\"\ntables: [users]\n",
            src,
            out.display()
        ),
    )
    .unwrap();

    cmd()
        .args(["--config", config.to_str().unwrap(), "--log-format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Tables: 1"));

    let rows: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("users.json")).unwrap()).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 2);
}

#[test]
fn test_verbose_echoes_engine_messages() {
    let dir = tempfile::tempdir().unwrap();
    let src = json_source(dir.path());
    let out = dir.path().join("out");

    cmd()
        .args(["-v", "-f", &src, "-t"])
        .arg(format!("jsonfile:::{}", out.display()))
        .arg("users")
        .assert()
        .success()
        .stdout(predicate::str::contains("migrating users"));
}
