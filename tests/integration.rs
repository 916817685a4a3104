use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rqh_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_rqh"))
}

fn setup_test_env(extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("projects")).unwrap();

    fs::write(
        root.join("catalog.json"),
        r#"[{"id": "sso", "name": "Portal SSO", "summary": "OAuth2 login", "documents": {"design": "sso/design.md"}}]"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/rqh.sqlite"

[documents]
root = "{root}/projects"
{extra}
"#,
        root = root.display(),
        extra = extra,
    );

    let config_path = config_dir.join("rqh.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rqh(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rqh_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rqh binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env("");

    let (stdout, stderr, success) = run_rqh(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/rqh.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("");

    let (_, _, success1) = run_rqh(&config_path, &["init"]);
    assert!(success1, "First init failed");
    let (_, _, success2) = run_rqh(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_stats_on_empty_index() {
    let (_tmp, config_path) = setup_test_env("");
    run_rqh(&config_path, &["init"]);

    let (stdout, stderr, success) = run_rqh(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("projects: 0"));
    assert!(stdout.contains("last indexed: never"));
}

#[test]
fn test_index_requires_embedding_provider() {
    let (tmp, config_path) = setup_test_env("");
    run_rqh(&config_path, &["init"]);

    let catalog = tmp.path().join("catalog.json");
    let (_, stderr, success) = run_rqh(&config_path, &["index", catalog.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("disabled"), "stderr: {}", stderr);
}

#[test]
fn test_search_rejects_bad_weights() {
    let (_tmp, config_path) = setup_test_env("");
    let (_, stderr, success) = run_rqh(
        &config_path,
        &["search", "oauth2", "--semantic-weight", "0.7", "--lexical-weight", "0.7"],
    );
    assert!(!success);
    assert!(stderr.contains("must equal 1.0"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config_path) = setup_test_env("[retrieval]\nsemantic_weight = 0.9\nlexical_weight = 0.9\n");
    let (_, stderr, success) = run_rqh(&config_path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("must equal 1.0"), "stderr: {}", stderr);
}

#[test]
fn test_analyze_reports_run_state_on_failure() {
    let (_tmp, config_path) = setup_test_env("");
    run_rqh(&config_path, &["init"]);

    let (stdout, stderr, success) = run_rqh(&config_path, &["analyze", "Add OAuth2 login"]);
    assert!(!success);
    let state: serde_json::Value = serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("stdout is not JSON ({}): {} / {}", e, stdout, stderr));
    assert_eq!(state["status"], "error");
    assert_eq!(state["error"]["kind"], "retrieval_unavailable");
    assert_eq!(state["error"]["step"], "find_candidates");
}

#[test]
fn test_analyze_blank_requirement() {
    let (_tmp, config_path) = setup_test_env("");
    let (stdout, _, success) = run_rqh(&config_path, &["analyze", "  "]);
    assert!(!success);
    let state: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(state["error"]["kind"], "invalid_input");
}
