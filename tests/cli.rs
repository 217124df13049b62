use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn cmdex_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("cmdex");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // The embedding service is never reached: these runs have nothing to
    // embed.
    let config_content = format!(
        r#"[db]
path = "{}/data/cmdex.sqlite"

[embedding]
provider = "service"
url = "http://127.0.0.1:9"
dims = 8

[index]
backend = "memory"

[server]
bind = "127.0.0.1:7341"
"#,
        root.display()
    );

    let config_path = config_dir.join("cmdex.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cmdex(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cmdex_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cmdex binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cmdex(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/cmdex.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_cmdex(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_cmdex(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_sync_empty_store() {
    let (_tmp, config_path) = setup_test_env();

    run_cmdex(&config_path, &["init"]);
    let (stdout, stderr, success) = run_cmdex(&config_path, &["sync", "--reset"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("sync complete"));
    assert!(stdout.contains("scanned:  0"));
    assert!(stdout.contains("deleted:  0"));
}

#[test]
fn test_status_on_fresh_database() {
    let (_tmp, config_path) = setup_test_env();

    run_cmdex(&config_path, &["init"]);
    let (stdout, _, success) = run_cmdex(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("indexed: 0"));
    assert!(!stdout.contains("Recent failures"));
}

#[test]
fn test_blank_search_has_no_results() {
    let (_tmp, config_path) = setup_test_env();

    run_cmdex(&config_path, &["init"]);
    let (stdout, stderr, success) = run_cmdex(&config_path, &["search", "   "]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_rejects_unknown_version() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_cmdex(&config_path, &["search", "defer", "--version", "5"]);
    assert!(!success);
    assert!(stderr.contains("unsupported toolkit version"));
}

#[test]
fn test_stats_on_memory_backend() {
    let (_tmp, config_path) = setup_test_env();

    run_cmdex(&config_path, &["init"]);
    let (stdout, stderr, success) = run_cmdex(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Vectors:     0"));
    assert!(stdout.contains("commands (green)"));
}

#[test]
fn test_invalid_config_fails() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(
        &bad,
        r#"[db]
path = "./x.sqlite"

[embedding]
url = "http://127.0.0.1:9"

[retrieval]
dense_weight = 1.5
"#,
    )
    .unwrap();

    let (_, stderr, success) = run_cmdex(&bad, &["init"]);
    assert!(!success);
    assert!(stderr.contains("dense_weight"));
}
