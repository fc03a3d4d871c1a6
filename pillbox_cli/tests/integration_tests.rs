//! Integration tests for the pillbox binary.
//!
//! These tests verify end-to-end behavior including:
//! - Intake recording and inventory checks
//! - Settings, reset and forecast output
//! - CSV export and legacy import
//! - Mirror push and connectivity check

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a test data directory
fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// CLI bound to a data directory with an empty config file, so the
/// user's own configuration never leaks into a test.
fn cli(data_dir: &Path) -> Command {
    let config = data_dir.join("config.toml");
    if !config.exists() {
        fs::write(&config, "").expect("Failed to write config");
    }

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("pillbox"));
    cmd.arg("--data-dir")
        .arg(data_dir)
        .arg("--config")
        .arg(config);
    cmd
}

fn read_ledger(data_dir: &Path) -> Value {
    let contents = fs::read_to_string(data_dir.join("ledger.json")).expect("Failed to read ledger");
    serde_json::from_str(&contents).expect("Ledger is not valid JSON")
}

#[test]
fn test_cli_help() {
    Command::new(assert_cmd::cargo::cargo_bin!("pillbox"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Medication inventory and intake tracker",
        ));
}

#[test]
fn test_default_command_shows_status() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("My Medication"))
        .stdout(predicate::str::contains("Pills remaining: 30 / 30"));

    // Reading does not create a ledger
    assert!(!temp_dir.path().join("ledger.json").exists());
}

#[test]
fn test_verbose_logs_to_stderr() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .env_remove("RUST_LOG")
        .args(["--verbose", "status"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Using data dir"))
        .stdout(predicate::str::contains("Using data dir").not());
}

#[test]
fn test_take_records_intake() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli(data_dir)
        .args(["--today", "2024-03-05", "take", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("25 of 30 remaining"));

    let ledger = read_ledger(data_dir);
    assert_eq!(ledger["schemaVersion"], 1);
    assert_eq!(ledger["pillsRemaining"], 25);
    assert_eq!(ledger["intakeHistory"][0]["date"], "2024-03-05");
    assert_eq!(ledger["intakeHistory"][0]["count"], 5);
}

#[test]
fn test_take_more_than_remaining_is_rejected() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli(data_dir)
        .args(["--today", "2024-03-05", "take", "5"])
        .assert()
        .success();

    cli(data_dir)
        .args(["--today", "2024-03-05", "take", "30"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("short by 5"));

    let ledger = read_ledger(data_dir);
    assert_eq!(ledger["pillsRemaining"], 25);
    assert_eq!(ledger["intakeHistory"].as_array().unwrap().len(), 1);
}

#[test]
fn test_take_zero_is_rejected() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["take", "0"])
        .assert()
        .failure();

    assert!(!temp_dir.path().join("ledger.json").exists());
}

#[test]
fn test_same_day_intakes_merge() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    for (day, count) in [("2024-03-05", "1"), ("2024-03-05", "2"), ("2024-03-06", "1")] {
        cli(data_dir)
            .args(["--today", day, "take", count])
            .assert()
            .success();
    }

    let ledger = read_ledger(data_dir);
    let history = ledger["intakeHistory"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["count"], 3);
    assert_eq!(history[1]["count"], 1);
    assert_eq!(ledger["pillsRemaining"], 26);
}

#[test]
fn test_settings_capacity_change_resets_remaining() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli(data_dir).args(["take", "7"]).assert().success();

    cli(data_dir)
        .args(["settings", "--name", "Vitamin D", "--daily-dose", "2"])
        .assert()
        .success();
    assert_eq!(read_ledger(data_dir)["pillsRemaining"], 23);

    cli(data_dir)
        .args(["settings", "--total-pills", "60"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pills: 60 / 60"));

    let ledger = read_ledger(data_dir);
    assert_eq!(ledger["name"], "Vitamin D");
    assert_eq!(ledger["dailyDose"], 2);
    assert_eq!(ledger["pillsRemaining"], 60);
}

#[test]
fn test_settings_validation() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli(data_dir)
        .args(["settings", "--name", "   "])
        .assert()
        .failure();

    cli(data_dir)
        .args(["settings", "--daily-dose", "0"])
        .assert()
        .failure();

    cli(data_dir)
        .args(["settings", "--start-date", "2023-02-30"])
        .assert()
        .failure();

    assert!(!data_dir.join("ledger.json").exists());
}

#[test]
fn test_reset_refills() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli(data_dir).args(["take", "4"]).assert().success();
    cli(data_dir)
        .arg("reset")
        .assert()
        .success()
        .stdout(predicate::str::contains("Refilled: 30 pills"));

    let ledger = read_ledger(data_dir);
    assert_eq!(ledger["pillsRemaining"], 30);
    assert!(ledger["intakeHistory"].as_array().unwrap().is_empty());
}

#[test]
fn test_forecast_with_monthly_refill() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli(data_dir)
        .args(["--today", "2024-03-15", "take", "20"])
        .assert()
        .success();

    let output = cli(data_dir)
        .args([
            "--today",
            "2024-03-15",
            "forecast",
            "--days",
            "6",
            "--refill-monthly",
            "19",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8_lossy(&output);

    let rows: Vec<&str> = stdout
        .lines()
        .filter(|l| l.trim_start().starts_with("2024-"))
        .collect();
    assert_eq!(rows.len(), 6);
    assert!(rows[0].ends_with(" 10"));
    assert!(rows[3].ends_with(" 7"));
    assert!(rows[4].contains("2024-03-19") && rows[4].ends_with(" 30"));
    assert!(rows[5].ends_with(" 29"));
}

#[test]
fn test_forecast_rejects_conflicting_refill_flags() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["forecast", "--refill-monthly", "19", "--refill-every", "28"])
        .assert()
        .failure();
}

#[test]
fn test_forecast_rejects_invalid_refill_day() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["forecast", "--refill-monthly", "40"])
        .assert()
        .failure();
}

#[test]
fn test_history_lists_entries() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli(data_dir)
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("No intake recorded yet"));

    cli(data_dir)
        .args(["--today", "2024-03-05", "take", "1"])
        .assert()
        .success();
    cli(data_dir)
        .args(["--today", "2024-03-06", "take", "2"])
        .assert()
        .success();

    cli(data_dir)
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("2024-03-05"))
        .stdout(predicate::str::contains("Total: 3 pills over 2 days"))
        .stdout(predicate::str::contains("Average: 1.5 per day"));
}

#[test]
fn test_export_creates_csv() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli(data_dir)
        .args(["--today", "2024-03-05", "take", "2"])
        .assert()
        .success();

    let history_path = data_dir.join("history.csv");
    let forecast_path = data_dir.join("forecast.csv");
    cli(data_dir)
        .args(["--today", "2024-03-05", "export", "--days", "3"])
        .arg("--history")
        .arg(&history_path)
        .arg("--forecast")
        .arg(&forecast_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 1 intake entries"))
        .stdout(predicate::str::contains("Exported 3 forecast days"));

    let history = fs::read_to_string(&history_path).unwrap();
    assert_eq!(history, "date,count\n2024-03-05,2\n");

    let forecast = fs::read_to_string(&forecast_path).unwrap();
    assert!(forecast.starts_with("date,remaining\n2024-03-05,28\n"));
}

#[test]
fn test_import_legacy_document() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    // Existing ledger is replaced, not merged
    cli(data_dir).args(["take", "3"]).assert().success();

    let legacy = data_dir.join("medicine-storage.json");
    fs::write(
        &legacy,
        r#"{"state":{"name":"Metformin","totalPills":90,"pillsRemaining":80,
            "dailyDose":2,"startDate":"2024-01-10",
            "intakeHistory":[{"date":"2024-01-11","count":10}]},"version":0}"#,
    )
    .unwrap();

    cli(data_dir)
        .arg("import")
        .arg(&legacy)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported Metformin"));

    let ledger = read_ledger(data_dir);
    assert_eq!(ledger["name"], "Metformin");
    assert_eq!(ledger["pillsRemaining"], 80);
    assert_eq!(ledger["schemaVersion"], 1);
    assert_eq!(ledger["revision"], 2);
}

#[test]
fn test_mirror_push_and_check() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli(data_dir)
        .args(["--today", "2024-03-05", "take", "2"])
        .assert()
        .success();

    cli(data_dir)
        .args(["mirror", "push"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 intake records"));

    let medications = fs::read_to_string(data_dir.join("mirror/medications.jsonl")).unwrap();
    assert_eq!(medications.lines().count(), 1);
    assert!(medications.contains("\"pills_remaining\":28"));

    cli(data_dir)
        .args(["mirror", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Mirror reachable"));

    // The check cleans up after itself
    let medications = fs::read_to_string(data_dir.join("mirror/medications.jsonl")).unwrap();
    assert_eq!(medications.lines().count(), 1);
}

#[test]
fn test_config_refill_policy_used_by_status() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    fs::write(
        data_dir.join("config.toml"),
        "[forecast]\nrefill = { kind = \"monthly\", day = 19 }\n",
    )
    .unwrap();

    cli(data_dir)
        .args(["--today", "2024-03-01", "settings", "--daily-dose", "3"])
        .assert()
        .success();

    cli(data_dir)
        .args(["--today", "2024-03-10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Next refill: 2024-03-19"));
}
