//! End-to-end tests of the `triage` binary against a temp database.
//!
//! Nothing here talks to GitHub or an embedding backend: commands run with
//! embeddings disabled and `--offline` where a lookup would happen.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn triage_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("triage");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/triage.sqlite"

[github]
repo = "octo/widgets"
lookup_delay_ms = 0

[embedding]
provider = "disabled"

[dedupe]
threshold = 0.9
"#,
        root.display()
    );
    let config_path = config_dir.join("triage.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn run_triage(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = triage_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run triage binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_triage(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/triage.sqlite").exists());
}

#[test]
fn init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_triage(&config_path, &["init"]);
    let (_, stderr, second) = run_triage(&config_path, &["init"]);
    assert!(first && second, "second init failed: {}", stderr);
}

#[test]
fn stats_on_empty_store() {
    let (_tmp, config_path) = setup_test_env();
    run_triage(&config_path, &["init"]);

    let (stdout, stderr, success) = run_triage(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("pr-triage store stats"));
    assert!(stdout.contains("(none)"));

    let (stdout, _, success) = run_triage(&config_path, &["stats", "--json"]);
    assert!(success);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["repos"].as_array().unwrap().len(), 0);
    assert!(json["meta"]["embedding_model"].is_null());
}

#[test]
fn analysis_commands_on_empty_store() {
    let (_tmp, config_path) = setup_test_env();
    run_triage(&config_path, &["init"]);

    let (stdout, stderr, success) = run_triage(&config_path, &["dedupe"]);
    assert!(success, "dedupe failed: {}", stderr);
    assert!(stdout.contains("dedupe octo/widgets"));

    let (stdout, stderr, success) = run_triage(&config_path, &["rank", "--offline"]);
    assert!(success, "rank failed: {}", stderr);
    assert!(stdout.contains("No items."));

    let (stdout, _, success) = run_triage(&config_path, &["dedupe", "--json"]);
    assert!(success);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["clusters"].as_array().unwrap().len(), 0);
}

#[test]
fn dedupe_rejects_out_of_range_threshold() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_triage(&config_path, &["dedupe", "--threshold", "1.5"]);
    assert!(!success);
    assert!(stderr.contains("threshold"), "stderr: {}", stderr);
}

#[test]
fn repo_flag_is_validated() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_triage(&config_path, &["--repo", "not-a-repo", "dedupe"]);
    assert!(!success);
    assert!(stderr.contains("owner/name"), "stderr: {}", stderr);
}

#[test]
fn get_missing_item_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_triage(&config_path, &["init"]);

    let (_, stderr, success) = run_triage(&config_path, &["get", "42"]);
    assert!(!success);
    assert!(stderr.contains("triage scan"), "stderr: {}", stderr);

    let (_, stderr, success) = run_triage(&config_path, &["get", "42", "--type", "commit"]);
    assert!(!success, "bad --type accepted: {}", stderr);
}

#[test]
fn vision_needs_a_provider() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_triage(&config_path, &["vision"]);
    assert!(!success);
    assert!(stderr.contains("provider"), "stderr: {}", stderr);
}

#[test]
fn embed_reset_on_fresh_store() {
    let (_tmp, config_path) = setup_test_env();
    run_triage(&config_path, &["init"]);

    let (stdout, stderr, success) = run_triage(&config_path, &["embed", "reset"]);
    assert!(success, "embed reset failed: {}", stderr);
    assert!(stdout.contains("embeddings deleted: 0"));
}

#[test]
fn completions_need_no_config() {
    let missing = PathBuf::from("/nonexistent/triage.toml");
    let (stdout, stderr, success) = run_triage(&missing, &["completions", "bash"]);
    assert!(success, "completions failed: {}", stderr);
    assert!(stdout.contains("triage"));
}

#[test]
fn invalid_config_is_reported() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "[embedding]\nprovider = \"carrier-pigeon\"\n").unwrap();

    let (_, stderr, success) = run_triage(&bad, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("carrier-pigeon"), "stderr: {}", stderr);
}
