//! Integration tests for the `ndb` CLI binary.
//!
//! Every invocation runs against `memory://` sources, so each process
//! starts from a fresh namespace holding only the loopback interface.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `ndb` binary with env isolation.
///
/// Points config directories at `home` so tests never touch the user's
/// real configuration, and clears every override variable.
fn ndb_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("ndb");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("NDB_CONFIG_FILE")
        .env_remove("NDB_DEFAULT_TARGET")
        .env_remove("NDB_REQUEST_TIMEOUT_MS");
    cmd
}

fn write_config(dir: &Path, text: &str) -> std::path::PathBuf {
    let path = dir.join("ndb.toml");
    std::fs::write(&path, text).unwrap();
    path
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = ndb_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    ndb_cmd(home.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("show")
            .and(predicate::str::contains("query"))
            .and(predicate::str::contains("serve")),
    );
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    ndb_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ndb"));
}

// ── Views ───────────────────────────────────────────────────────────

#[test]
fn test_show_interfaces_table() {
    let home = tempfile::tempdir().unwrap();
    ndb_cmd(home.path())
        .args(["show", "interfaces"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ifname").and(predicate::str::contains("lo")));
}

#[test]
fn test_show_csv_has_no_header() {
    let home = tempfile::tempdir().unwrap();
    ndb_cmd(home.path())
        .args(["show", "interfaces", "-f", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("localhost,1,lo,loopback,up,"));
}

#[test]
fn test_show_address_summary() {
    let home = tempfile::tempdir().unwrap();
    ndb_cmd(home.path())
        .args(["show", "addr", "-f", "summary"])
        .assert()
        .success()
        .stdout(
            predicate::str::starts_with("target")
                .and(predicate::str::contains("127.0.0.1")),
        );
}

#[test]
fn test_show_single_entity_json() {
    let home = tempfile::tempdir().unwrap();
    ndb_cmd(home.path())
        .args(["show", "interface", "lo", "-f", "json"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains(r#""ifname": "lo""#)
                .and(predicate::str::contains(r#""target": "localhost""#)),
        );
}

#[test]
fn test_show_missing_entity() {
    let home = tempfile::tempdir().unwrap();
    let output = ndb_cmd(home.path())
        .args(["show", "interfaces", "nope0"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("not found"));
}

#[test]
fn test_unknown_target() {
    let home = tempfile::tempdir().unwrap();
    let output = ndb_cmd(home.path())
        .args(["show", "interfaces", "--target", "elsewhere"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7));
    assert!(combined_output(&output).contains("elsewhere"));
}

// ── Edits ───────────────────────────────────────────────────────────

#[test]
fn test_add_dummy_interface() {
    let home = tempfile::tempdir().unwrap();
    ndb_cmd(home.path())
        .args(["add", "interfaces", "ifname=d0", "kind=dummy", "-f", "json"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains(r#""state": "down""#)
                .and(predicate::str::contains(r#""index": 2"#)),
        );
}

#[test]
fn test_add_rejected_kind_keeps_errno() {
    let home = tempfile::tempdir().unwrap();
    let output = ndb_cmd(home.path())
        .args(["add", "interfaces", "ifname=wg0", "kind=wireguard"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(6));
    assert!(combined_output(&output).contains("errno 95"));
}

#[test]
fn test_add_rejects_malformed_assignment() {
    let home = tempfile::tempdir().unwrap();
    ndb_cmd(home.path())
        .args(["add", "interfaces", "ifname"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_set_loopback_mtu() {
    let home = tempfile::tempdir().unwrap();
    ndb_cmd(home.path())
        .args(["set", "interfaces", "lo", "mtu=9000", "-f", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::contains("interface lo@localhost"));
}

#[test]
fn test_del_loopback_address() {
    let home = tempfile::tempdir().unwrap();
    ndb_cmd(home.path())
        .args(["del", "addresses", "127.0.0.1/8"])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed address 127.0.0.1/8@localhost"));
}

// ── Query / sources ─────────────────────────────────────────────────

#[test]
fn test_query_counts_rows() {
    let home = tempfile::tempdir().unwrap();
    ndb_cmd(home.path())
        .args(["query", "SELECT count(*) AS n FROM interfaces", "-f", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::diff("1\n"));
}

#[test]
fn test_sources_lists_synced_targets() {
    let home = tempfile::tempdir().unwrap();
    ndb_cmd(home.path())
        .args(["sources", "-f", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::diff("localhost,synced\n"));
}

#[test]
fn test_watch_stops_after_deadline() {
    let home = tempfile::tempdir().unwrap();
    ndb_cmd(home.path())
        .args(["watch", "--seconds", "0"])
        .assert()
        .success();
}

// ── Configuration ───────────────────────────────────────────────────

#[test]
fn test_config_file_selects_sources() {
    let home = tempfile::tempdir().unwrap();
    let path = write_config(
        home.path(),
        r#"
        default_target = "a"

        [[sources]]
        target = "a"
        url = "memory://"

        [[sources]]
        target = "b"
        url = "memory://"
        "#,
    );

    ndb_cmd(home.path())
        .arg("--config")
        .arg(&path)
        .args(["show", "interfaces", "-t", "b", "-f", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("b,1,lo,"));

    ndb_cmd(home.path())
        .arg("--config")
        .arg(&path)
        .args(["sources", "-f", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::diff("a,synced\nb,synced\n"));
}

#[test]
fn test_invalid_config_is_a_usage_error() {
    let home = tempfile::tempdir().unwrap();
    let path = write_config(
        home.path(),
        r#"
        [[sources]]
        target = "far"
        url = "tcp://10.0.0.1"
        "#,
    );
    let output = ndb_cmd(home.path())
        .arg("--config")
        .arg(&path)
        .args(["show", "interfaces"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("missing port"));
}

#[test]
fn test_config_init_then_show() {
    let home = tempfile::tempdir().unwrap();
    let path = home.path().join("conf").join("ndb.toml");

    ndb_cmd(home.path())
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .success();
    assert!(path.exists());

    ndb_cmd(home.path())
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .failure()
        .code(2);

    ndb_cmd(home.path())
        .arg("--config")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains(r#"default_target = "localhost""#)
                .and(predicate::str::contains("memory://")),
        );
}
