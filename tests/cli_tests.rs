//! CLI integration tests
//!
//! These tests run the built binary against a policy tree in a temporary
//! directory and check exit codes and output:
//! - init: creates decompile.toml, --force behavior
//! - decompile: human and JSONL output, --output, error exit codes
//! - macros: template listing

mod common;

use assert_cmd::Command;
use common::{DECOMPILE_TOML, setup_policy_tree, write_file};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sepolicy-decompile").unwrap();
    cmd.current_dir(dir.path()).env_remove("RUST_LOG");
    cmd
}

fn policy_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    setup_policy_tree(dir.path());
    write_file(dir.path(), "decompile.toml", DECOMPILE_TOML);
    dir
}

#[test]
fn test_init_creates_config() {
    let dir = TempDir::new().unwrap();
    cmd(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));
    assert!(dir.path().join("decompile.toml").exists());

    cmd(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("--force"));
}

#[test]
fn test_init_force_overwrites() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "decompile.toml", "old");
    cmd(&dir)
        .args(["init", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Overwrote"));
    let content = fs::read_to_string(dir.path().join("decompile.toml")).unwrap();
    assert!(content.contains("[decompile]"));
}

#[test]
fn test_decompile_human_output() {
    let dir = policy_tree();
    cmd(&dir)
        .args(["decompile", "--color", "never"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "hal_client_domain(vendor_foo_client, vendor_foo_hwservice)",
        ))
        .stdout(predicate::str::contains("genfscon sysfs /kernel/bar"))
        .stdout(predicate::str::contains(
            "# file_contexts\n/vendor/bin/bar u:object_r:vendor_bar_exec:s0\n",
        ))
        .stdout(predicate::str::contains("vendor.foo-service").not())
        .stderr(predicate::str::contains("Leftover rules:"));
}

#[test]
fn test_decompile_jsonl_output() {
    let dir = policy_tree();
    let output = cmd(&dir)
        .args(["decompile", "--format", "jsonl"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let records: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let last = records.last().unwrap();
    assert_eq!(last["type"], "summary");
    assert!(records.iter().any(|r| r["macro_name"] == "hal_client_domain"));
    assert!(
        records
            .iter()
            .any(|r| r["type"] == "context" && r["contexts_type"] == "hwservice_contexts")
    );
    assert_eq!(last["contexts_removed"]["file_contexts"], 1);
}

#[test]
fn test_decompile_writes_output_file() {
    let dir = policy_tree();
    cmd(&dir)
        .args(["decompile", "-o", "vendor_decompiled.te"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let text = fs::read_to_string(dir.path().join("vendor_decompiled.te")).unwrap();
    assert!(text.contains("hal_client_domain(vendor_foo_client, vendor_foo_hwservice)"));
}

#[test]
fn test_decompile_without_consolidation() {
    let dir = policy_tree();
    cmd(&dir)
        .args(["decompile", "--no-consolidate"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "allow vendor_foo_client vendor_data_file:file { getattr read write };",
        ));
}

#[test]
fn test_decompile_flags_without_config() {
    let dir = TempDir::new().unwrap();
    setup_policy_tree(dir.path());
    cmd(&dir)
        .args([
            "decompile",
            "-p",
            "vendor_sepolicy.cil",
            "-m",
            "public",
            "--policy-version",
            "30.0",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("hal_client_domain("));
}

#[test]
fn test_decompile_parse_error_exit_code() {
    let dir = policy_tree();
    write_file(dir.path(), "vendor_sepolicy.cil", "(allow a b (file (read)))\n(bogus a)\n");
    cmd(&dir)
        .arg("decompile")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("vendor_sepolicy.cil:2"));
}

#[test]
fn test_decompile_invalid_config_exit_code() {
    let dir = policy_tree();
    write_file(dir.path(), "decompile.toml", "[decompile\n");
    cmd(&dir).arg("decompile").assert().code(3);
}

#[test]
fn test_decompile_missing_input_exit_code() {
    let dir = TempDir::new().unwrap();
    cmd(&dir)
        .args(["decompile", "-p", "missing.cil", "-m", "public"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_macros_listing() {
    let dir = policy_tree();
    cmd(&dir)
        .arg("macros")
        .assert()
        .success()
        .stdout(predicate::str::contains("hal_client_domain  2 args  2 rules"))
        .stdout(predicate::str::contains("rw_file_perms (2)"));
}
