//! Integration tests for the `shadowgraph` binary.
//!
//! Everything runs against temp files and the in-memory dry run; the only
//! network use is a connection attempt to a closed local port.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::TempDir;

// ── Helpers ─────────────────────────────────────────────────────────

const PROJECT: &str = "00000000-0000-0000-0000-000000000001";
const VN: &str = "00000000-0000-0000-0000-000000000002";

const CONFIG: &str = r#"
[coordinator]
partitions = 2

[[resources]]
name = "project"

[[resources]]
name = "route_target"
indexing = "fq_name"

[[resources]]
name = "virtual_network"
parent = "project"
refs = [{ name = "route_target", target = "route_target" }]

[[reactions]]
source = "virtual_network"
target = "route_target"
direction = "downstream"

[[reactions]]
source = "route_target"
target = "virtual_network"
direction = "upstream"
"#;

/// Build a command with env isolation: no `SHADOWGRAPH_*` leakage and a
/// config directory that does not exist.
fn shadowgraph_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("shadowgraph");
    cmd.env("HOME", "/tmp/shadowgraph-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/shadowgraph-cli-test-nonexistent")
        .env_remove("SHADOWGRAPH_CONFIG")
        .env_remove("SHADOWGRAPH_LOG_FORMAT")
        .env_remove("SHADOWGRAPH_STORE__URL")
        .env_remove("SHADOWGRAPH_FEED__URL")
        .env_remove("RUST_LOG");
    cmd
}

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn seed() -> Value {
    json!({
        "project": [{"uuid": PROJECT, "fq_name": ["default-domain", "admin"]}],
        "route_target": [{"fq_name": ["target:64512:1"]}],
        "virtual_network": [{
            "uuid": VN,
            "fq_name": ["default-domain", "admin", "vn-blue"],
            "parent_type": "project",
            "parent_uuid": PROJECT,
            "route_target_refs": [{"to": ["target:64512:1"], "attr": null}],
        }],
    })
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = shadowgraph_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(text.contains("Usage"), "Expected 'Usage' in:\n{text}");
}

#[test]
fn test_help_lists_subcommands() {
    shadowgraph_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("run")
            .and(predicate::str::contains("check"))
            .and(predicate::str::contains("reactions")),
    );
}

#[test]
fn test_version_flag() {
    shadowgraph_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("shadowgraph"));
}

// ── config ──────────────────────────────────────────────────────────

#[test]
fn test_config_shows_env_override() {
    let dir = TempDir::new().unwrap();
    let config = write(dir.path(), "config.toml", CONFIG);

    shadowgraph_cmd()
        .args(["--config", config.to_str().unwrap(), "config"])
        .env("SHADOWGRAPH_STORE__URL", "http://store.lab:9100")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("http://store.lab:9100")
                .and(predicate::str::contains("partitions = 2")),
        );
}

#[test]
fn test_config_masks_plaintext_token() {
    let dir = TempDir::new().unwrap();
    let config = write(
        dir.path(),
        "config.toml",
        "[store]\ntoken = \"hunter2\"\n",
    );

    shadowgraph_cmd()
        .args(["--config", config.to_str().unwrap(), "config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hunter2").not());
}

// ── reactions ───────────────────────────────────────────────────────

#[test]
fn test_reactions_prints_compiled_edges() {
    let dir = TempDir::new().unwrap();
    let config = write(dir.path(), "config.toml", CONFIG);

    let output = shadowgraph_cmd()
        .args(["--config", config.to_str().unwrap(), "reactions"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = stdout_json(&output);
    let rules = report["rules"].as_array().unwrap();
    assert_eq!(rules.len(), 2);
    assert!(rules.iter().any(|rule| rule["edge"]["edge"] == "forward"
        && rule["edge"]["reference"] == "route_target"));
    assert!(rules.iter().any(|rule| rule["edge"]["edge"] == "backward"));
    assert_eq!(report["types"].as_array().unwrap().len(), 3);
}

#[test]
fn test_reactions_rejects_unknown_type() {
    let dir = TempDir::new().unwrap();
    let config = write(
        dir.path(),
        "config.toml",
        &format!(
            "{CONFIG}\n[[reactions]]\nsource = \"bgp_router\"\ntarget = \"project\"\ndirection = \"parent\"\n"
        ),
    );

    shadowgraph_cmd()
        .args(["--config", config.to_str().unwrap(), "reactions"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("bgp_router"));
}

#[test]
fn test_reactions_without_resources_fails() {
    let dir = TempDir::new().unwrap();
    let config = write(dir.path(), "config.toml", "");

    shadowgraph_cmd()
        .args(["--config", config.to_str().unwrap(), "reactions"])
        .assert()
        .code(3);
}

// ── check ───────────────────────────────────────────────────────────

#[test]
fn test_check_resyncs_seed() {
    let dir = TempDir::new().unwrap();
    let config = write(dir.path(), "config.toml", CONFIG);
    let seed = write(dir.path(), "seed.json", &seed().to_string());

    let output = shadowgraph_cmd()
        .args([
            "--config",
            config.to_str().unwrap(),
            "check",
            "--seed",
            seed.to_str().unwrap(),
        ])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report = stdout_json(&output);
    assert_eq!(report["state"], "ready");
    assert_eq!(report["sync"]["objects"], 3);
    assert_eq!(report["graph"]["total"], 3);
    assert_eq!(report["violations"], json!([]));
    assert_eq!(report["events"], json!([]));
}

#[test]
fn test_check_replays_events() {
    let dir = TempDir::new().unwrap();
    let config = write(dir.path(), "config.toml", CONFIG);
    let seed = write(dir.path(), "seed.json", &seed().to_string());
    let events = write(
        dir.path(),
        "events.json",
        &json!([
            {
                "oper": "UPDATE",
                "type": "virtual-network",
                "uuid": VN,
                "fq_name": ["default-domain", "admin", "vn-blue"],
                "request-id": "req-1",
            },
            {"oper": "FROB", "type": "virtual-network", "uuid": VN},
        ])
        .to_string(),
    );

    let output = shadowgraph_cmd()
        .args([
            "--config",
            config.to_str().unwrap(),
            "--output",
            "json-compact",
            "check",
            "--seed",
            seed.to_str().unwrap(),
            "--events",
            events.to_str().unwrap(),
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = stdout_json(&output);
    let events = report["events"].as_array().unwrap();
    assert_eq!(events.len(), 1, "malformed event should be skipped");
    assert_eq!(events[0]["outcome"], "fast_path");
    assert_eq!(events[0]["correlation_id"], "req-1");
}

#[test]
fn test_check_missing_seed_file() {
    let dir = TempDir::new().unwrap();
    let config = write(dir.path(), "config.toml", CONFIG);

    shadowgraph_cmd()
        .args([
            "--config",
            config.to_str().unwrap(),
            "check",
            "--seed",
            dir.path().join("absent.json").to_str().unwrap(),
        ])
        .assert()
        .code(1);
}

// ── run ─────────────────────────────────────────────────────────────

#[test]
fn test_run_fails_when_store_unreachable() {
    let dir = TempDir::new().unwrap();
    let config = write(dir.path(), "config.toml", CONFIG);

    shadowgraph_cmd()
        .args([
            "--config",
            config.to_str().unwrap(),
            "run",
            "--store-url",
            "http://127.0.0.1:1",
            "--feed-url",
            "ws://127.0.0.1:1/watch",
        ])
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .code(10)
        .stderr(predicate::str::contains("Coordinator failed"));
}

#[test]
fn test_run_rejects_http_feed_url() {
    let dir = TempDir::new().unwrap();
    let config = write(dir.path(), "config.toml", CONFIG);

    shadowgraph_cmd()
        .args([
            "--config",
            config.to_str().unwrap(),
            "run",
            "--feed-url",
            "http://127.0.0.1:1/watch",
        ])
        .assert()
        .code(3);
}
