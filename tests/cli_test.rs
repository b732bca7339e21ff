//! E2E tests for the courier binary.
//!
//! Every run gets its own data directory, a config path that does not
//! exist, and a scrubbed environment so host settings cannot leak in.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

mod common;

use common::fixtures::{GROQ_KEY, dead_url};
use common::logger::TestLogger;

const SCRUBBED_ENV: &[&str] = &[
    "COURIER_CONFIG",
    "COURIER_SHARED_URL",
    "COURIER_MODE",
    "COURIER_TIMEOUT",
    "COURIER_DATA_DIR",
    "COURIER_FORMAT",
    "COURIER_NO_COLOR",
    "COURIER_PRETTY",
    "COURIER_LOG",
    "COURIER_LOG_FORMAT",
    "COURIER_LOG_FILE",
    "NO_COLOR",
    "RUST_LOG",
];

struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
        }
    }

    #[allow(deprecated)]
    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("courier").expect("courier binary");
        for key in SCRUBBED_ENV {
            cmd.env_remove(key);
        }
        cmd.arg("--data-dir")
            .arg(self.dir.path())
            .arg("--config")
            .arg(self.dir.path().join("missing.toml"))
            .arg("--shared-url")
            .arg(dead_url())
            .arg("--no-color");
        cmd
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self.cmd().args(args).arg("--json").output().expect("run courier");
        serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
            panic!(
                "stdout of {args:?} is not JSON ({e}): {}",
                String::from_utf8_lossy(&output.stdout)
            )
        })
    }
}

#[test]
fn providers_json_lists_the_directory() {
    let log = TestLogger::new("providers_json_lists_the_directory");
    let sandbox = Sandbox::new();

    log.phase("execute");
    let value = sandbox.json(&["providers"]);
    assert_eq!(value["schemaVersion"], "courier.v1");
    assert_eq!(value["command"], "providers");

    let rows = value["data"].as_array().expect("provider rows");
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0]["id"], "groq");
    assert!(rows.iter().all(|r| r["credential"] == "missing"));
    log.finish_ok();
}

#[test]
fn mode_set_persists_and_session_flag_overrides() {
    let sandbox = Sandbox::new();

    let set = sandbox.json(&["mode", "set", "direct"]);
    assert_eq!(set["data"]["stored"], "force-direct");
    assert_eq!(set["data"]["changed"], true);

    let shown = sandbox.json(&["mode", "show"]);
    assert_eq!(shown["data"]["mode"], "force-direct");

    let session = sandbox.json(&["--mode", "shared", "mode", "show"]);
    assert_eq!(session["data"]["mode"], "force-shared");
    assert_eq!(session["data"]["stored"], "force-direct");
}

#[test]
fn unknown_mode_flag_is_a_config_error() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["--mode", "warp", "mode", "show"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown mode 'warp'"));
}

#[test]
fn malformed_key_is_refused() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["credentials", "set", "groq", "not-a-groq-key"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("gsk_"));

    let listed = sandbox.json(&["credentials", "list"]);
    assert_eq!(listed["data"].as_array().map(Vec::len), Some(0));
}

#[test]
fn stored_key_is_listed_by_fingerprint_only() {
    let sandbox = Sandbox::new();
    let set = sandbox.json(&["credentials", "set", "groq", GROQ_KEY]);
    let fingerprint = set["data"]["fingerprint"].as_str().expect("fingerprint").to_string();
    assert_eq!(fingerprint.len(), 12);
    assert_eq!(set["data"]["status"], "valid");

    sandbox
        .cmd()
        .args(["credentials", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains(fingerprint.as_str()))
        .stdout(predicate::str::contains(GROQ_KEY).not());

    sandbox.cmd().args(["credentials", "clear", "--all"]).assert().success();
    let listed = sandbox.json(&["credentials", "list"]);
    assert_eq!(listed["data"].as_array().map(Vec::len), Some(0));
}

#[test]
fn offline_send_is_queued_and_removable() {
    let log = TestLogger::new("offline_send_is_queued_and_removable");
    let sandbox = Sandbox::new();

    log.phase("send");
    let output = sandbox
        .cmd()
        .args(["--offline", "--json", "send", "--chat", "c1", "hello", "there"])
        .output()
        .expect("run courier");
    assert_eq!(output.status.code(), Some(3));
    let sent: Value = serde_json::from_slice(&output.stdout).expect("send json");
    assert_eq!(sent["data"]["outcome"], "queued");
    assert_eq!(sent["data"]["reason"]["reason"], "offline");
    let id = sent["data"]["entry"]["id"].as_str().expect("entry id").to_string();

    log.phase("list");
    let listed = sandbox.json(&["queue", "list"]);
    let entries = listed["data"].as_array().expect("queue entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["chatId"], "c1");
    assert_eq!(entries[0]["message"]["messages"][0]["content"], "hello there");

    log.phase("remove");
    sandbox.cmd().args(["queue", "remove", &id]).assert().success();
    let listed = sandbox.json(&["queue", "list"]);
    assert_eq!(listed["data"].as_array().map(Vec::len), Some(0));

    sandbox
        .cmd()
        .args(["queue", "remove", &id])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not found"));
    log.finish_ok();
}

#[test]
fn status_json_reports_blocked_route_without_keys() {
    let sandbox = Sandbox::new();
    let value = sandbox.json(&["status"]);
    let data = &value["data"];
    assert_eq!(data["online"], true);
    assert_eq!(data["sharedReachable"], false);
    assert_eq!(data["decision"]["canSend"], false);
    assert_eq!(data["queueLen"], 0);
}

#[test]
fn empty_message_is_rejected() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["send", " "])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("empty"));
}
