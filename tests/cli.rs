//! Smoke tests driving the compiled `mnemo` binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn mnemo_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("mnemo");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt covers cargo and crates.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.",
    )
    .unwrap();

    let config_content = format!(
        r#"[storage]
path = "{root}/data/kb.sqlite"

[index]
dir = "{root}/data/index"

[chunking]
min_chunk_size = 100
max_chunk_size = 1500
overlap_ratio = 0.2
"#,
        root = root.display()
    );

    let config_path = config_dir.join("mnemo.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_mnemo(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = mnemo_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mnemo binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn init_creates_store() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_mnemo(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("kb.sqlite").exists());

    // idempotent
    let (_, _, success2) = run_mnemo(&config_path, &["init"]);
    assert!(success2);
}

#[test]
fn add_and_search_round_trip() {
    let (tmp, config_path) = setup_test_env();
    run_mnemo(&config_path, &["init"]);

    let alpha = tmp.path().join("files").join("alpha.md");
    let (stdout, stderr, success) =
        run_mnemo(&config_path, &["add", alpha.to_str().unwrap()]);
    assert!(success, "add failed: {} {}", stdout, stderr);
    assert!(stdout.contains("added"));
    assert!(stdout.contains("Alpha Document"));

    let (stdout, _, success) = run_mnemo(&config_path, &["search", "Rust programming"]);
    assert!(success);
    assert!(
        stdout.contains("Alpha Document"),
        "expected hit, got: {}",
        stdout
    );
    assert!(stdout.contains("id:"));
}

#[test]
fn search_without_matches_reports_no_results() {
    let (_tmp, config_path) = setup_test_env();
    run_mnemo(&config_path, &["init"]);

    let (stdout, _, success) = run_mnemo(&config_path, &["search", "xyznonexistent"]);
    assert!(success);
    assert!(stdout.contains("No results"));
}

#[test]
fn get_prints_item_and_chunks() {
    let (tmp, config_path) = setup_test_env();
    run_mnemo(&config_path, &["init"]);

    let alpha = tmp.path().join("files").join("alpha.md");
    run_mnemo(&config_path, &["add", alpha.to_str().unwrap()]);

    let (search_out, _, _) = run_mnemo(&config_path, &["search", "Rust"]);
    let id = search_out
        .lines()
        .find(|l| l.trim().starts_with("id:"))
        .and_then(|l| l.split("id:").nth(1))
        .map(|s| s.trim().to_string())
        .expect("no id in search output");

    let (stdout, _, success) = run_mnemo(&config_path, &["get", &id]);
    assert!(success);
    assert!(stdout.contains("--- Item ---"));
    assert!(stdout.contains(&id));
    assert!(stdout.contains("--- Chunks"));
}

#[test]
fn get_missing_item_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_mnemo(&config_path, &["init"]);

    let (_, stderr, success) = run_mnemo(&config_path, &["get", "nonexistent-id"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn import_walks_directory() {
    let (tmp, config_path) = setup_test_env();
    run_mnemo(&config_path, &["init"]);

    let files = tmp.path().join("files");
    let (stdout, stderr, success) =
        run_mnemo(&config_path, &["import", files.to_str().unwrap()]);
    assert!(success, "import failed: {} {}", stdout, stderr);
    assert!(stdout.contains("ingested:  2"));

    // second run sees unchanged content
    let (stdout, _, _) = run_mnemo(&config_path, &["import", files.to_str().unwrap()]);
    assert!(stdout.contains("unchanged: 2"), "got: {}", stdout);
}

#[test]
fn delete_removes_item() {
    let (tmp, config_path) = setup_test_env();
    run_mnemo(&config_path, &["init"]);

    let alpha = tmp.path().join("files").join("alpha.md");
    run_mnemo(&config_path, &["add", alpha.to_str().unwrap()]);

    let (search_out, _, _) = run_mnemo(&config_path, &["search", "Rust"]);
    let id = search_out
        .lines()
        .find(|l| l.trim().starts_with("id:"))
        .and_then(|l| l.split("id:").nth(1))
        .map(|s| s.trim().to_string())
        .expect("no id in search output");

    let (stdout, _, success) = run_mnemo(&config_path, &["delete", &id]);
    assert!(success);
    assert!(stdout.contains("deleted"));

    let (stdout, _, _) = run_mnemo(&config_path, &["search", "Rust"]);
    assert!(stdout.contains("No results"), "got: {}", stdout);

    let (_, _, success) = run_mnemo(&config_path, &["delete", &id]);
    assert!(!success, "second delete should fail");
}

#[test]
fn stats_reports_counts() {
    let (tmp, config_path) = setup_test_env();
    run_mnemo(&config_path, &["init"]);
    let files = tmp.path().join("files");
    run_mnemo(&config_path, &["import", files.to_str().unwrap()]);

    let (stdout, _, success) = run_mnemo(&config_path, &["stats"]);
    assert!(success);
    let items_line = stdout
        .lines()
        .find(|l| l.contains("Items:"))
        .expect("no Items line in stats output");
    assert!(items_line.trim().ends_with('2'), "got: {}", items_line);
    assert!(stdout.contains("Chunk index"));
}

#[test]
fn reindex_succeeds() {
    let (tmp, config_path) = setup_test_env();
    run_mnemo(&config_path, &["init"]);
    let files = tmp.path().join("files");
    run_mnemo(&config_path, &["import", files.to_str().unwrap()]);

    let (stdout, stderr, success) = run_mnemo(&config_path, &["reindex"]);
    assert!(success, "reindex failed: {} {}", stdout, stderr);
    assert!(stdout.contains("reindexed"));
}

#[test]
fn unknown_source_type_is_rejected() {
    let (tmp, config_path) = setup_test_env();
    run_mnemo(&config_path, &["init"]);

    let alpha = tmp.path().join("files").join("alpha.md");
    let (_, stderr, success) = run_mnemo(
        &config_path,
        &["add", alpha.to_str().unwrap(), "--source-type", "zip"],
    );
    assert!(!success);
    assert!(stderr.contains("unknown source type"));
}

#[test]
fn pdf_source_type_reports_not_supported() {
    let (tmp, config_path) = setup_test_env();
    run_mnemo(&config_path, &["init"]);

    let pdf = tmp.path().join("files").join("doc.pdf");
    fs::write(&pdf, b"%PDF-1.4 fake").unwrap();
    let (_, stderr, success) = run_mnemo(
        &config_path,
        &["add", pdf.to_str().unwrap(), "--source-type", "pdf"],
    );
    assert!(!success);
    assert!(stderr.contains("not supported"));
}
