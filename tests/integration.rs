use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn mdrag_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mdrag"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("nested")).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    )
    .unwrap();
    fs::write(
        files_dir.join("nested").join("beta.md"),
        "# Beta Document\n\n## Frameworks\n\nThis document discusses Python and machine learning.",
    )
    .unwrap();
    fs::write(
        files_dir.join("gamma.txt"),
        "Gamma plain text file, not markdown.",
    )
    .unwrap();

    let config_content = format!(
        r#"[store]
path = "{root}/_vector_db"

[ingest]
dir = "{root}/files"
glob = "**/*.md"

[chunking]
chunk_size = 250
chunk_overlap = 30
"#,
        root = root.display()
    );

    let config_path = root.join("mdrag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_mdrag_with_env(
    config_path: &Path,
    args: &[&str],
    env: &[(&str, &str)],
) -> (String, String, bool) {
    let binary = mdrag_binary();
    let mut cmd = Command::new(&binary);
    cmd.arg("--config")
        .arg(config_path)
        .arg("--progress")
        .arg("off")
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .env_remove("VECTOR_DB_PATH");
    for (k, v) in env {
        cmd.env(k, v);
    }
    let output = cmd
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mdrag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn run_mdrag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    run_mdrag_with_env(config_path, args, &[])
}

#[test]
fn test_ingest_dry_run_counts() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_mdrag(&config, &["ingest", "--dry-run"]);
    assert!(success, "ingest --dry-run failed: {}", stderr);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("documents: 2"), "stdout: {}", stdout);
    assert!(stdout.contains("chunks: 2"), "stdout: {}", stdout);
}

#[test]
fn test_ingest_dry_run_needs_no_api_key() {
    let (tmp, config) = setup_test_env();
    let (_, _, success) = run_mdrag(&config, &["ingest", "--dry-run"]);
    assert!(success);
    assert!(!tmp.path().join("_vector_db").exists());
}

#[test]
fn test_ingest_glob_override() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_mdrag(&config, &["ingest", "--dry-run", "--glob", "nested/*.md"]);
    assert!(success);
    assert!(stdout.contains("documents: 1"), "stdout: {}", stdout);
}

#[test]
fn test_ingest_empty_dir_reports_no_chunks() {
    let (tmp, config) = setup_test_env();
    let empty = tmp.path().join("empty");
    fs::create_dir_all(&empty).unwrap();

    let (stdout, stderr, success) =
        run_mdrag(&config, &["ingest", "--dir", empty.to_str().unwrap()]);
    assert!(success, "ingest of empty dir failed: {}", stderr);
    assert!(stdout.contains("no chunks"), "stdout: {}", stdout);
    assert!(!tmp.path().join("_vector_db").exists());
}

#[test]
fn test_ingest_missing_dir_fails() {
    let (tmp, config) = setup_test_env();
    let missing = tmp.path().join("does-not-exist");
    let (_, stderr, success) =
        run_mdrag(&config, &["ingest", "--dir", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("failed to load documents"), "stderr: {}", stderr);
}

#[test]
fn test_ingest_without_api_key_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_mdrag(&config, &["ingest"]);
    assert!(!success);
    assert!(stderr.contains("OPENAI_API_KEY"), "stderr: {}", stderr);
}

#[test]
fn test_status_without_index() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_mdrag(&config, &["status"]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("(not built)"), "stdout: {}", stdout);
}

#[test]
fn test_vector_db_path_env_overrides_config() {
    let (tmp, config) = setup_test_env();
    let other = tmp.path().join("elsewhere");
    let (stdout, _, success) = run_mdrag_with_env(
        &config,
        &["status"],
        &[("VECTOR_DB_PATH", other.to_str().unwrap())],
    );
    assert!(success);
    assert!(stdout.contains("elsewhere"), "stdout: {}", stdout);
}

#[test]
fn test_status_on_corrupt_index_fails() {
    let (tmp, config) = setup_test_env();
    let store = tmp.path().join("_vector_db");
    fs::create_dir_all(&store).unwrap();
    fs::write(store.join("index.sqlite"), "not a database").unwrap();

    let (_, stderr, success) = run_mdrag(&config, &["status"]);
    assert!(!success);
    assert!(stderr.contains("vector store error"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_chunking_config_fails() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("mdrag.toml");
    fs::write(
        &config_path,
        "[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
    )
    .unwrap();

    let (_, stderr, success) = run_mdrag(&config_path, &["status"]);
    assert!(!success);
    assert!(stderr.contains("chunk_overlap"), "stderr: {}", stderr);
}

#[test]
fn test_search_zero_k_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_mdrag(&config, &["search", "rust", "--k", "0"]);
    assert!(!success);
    assert!(stderr.contains("--k must be at least 1"), "stderr: {}", stderr);
}
