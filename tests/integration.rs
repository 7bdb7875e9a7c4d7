use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;
use tempfile::TempDir;

fn pctx_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_pctx"))
}

/// Workspace with a `hash`-provider config and a `files/` directory.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("notes.md"), "Alpha Beta Gamma").unwrap();
    fs::write(
        files_dir.join("deploy.txt"),
        "Notes about deployment and infrastructure. Kubernetes and Docker are mentioned here.",
    )
    .unwrap();

    let config_content = format!(
        r#"[workspace]
root = "{}/projects"

[embedding]
provider = "hash"
dims = 256

[retrieval]
default_top_k = 5
"#,
        root.display()
    );
    let config_path = root.join("pctx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_pctx(config_path: &Path, args: &[&str]) -> (Value, String, bool) {
    let binary = pctx_binary();
    let output = Command::new(&binary)
        .env_remove("PCTX_ROOT")
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pctx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let json: Value = serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("stdout is not JSON ({}): {}\nstderr: {}", e, stdout, stderr));
    (json, stderr, output.status.success())
}

fn file(tmp: &TempDir, name: &str) -> String {
    tmp.path().join("files").join(name).display().to_string()
}

#[test]
fn test_init_is_idempotent() {
    let (tmp, config_path) = setup_test_env();

    let (first, stderr, success) = run_pctx(&config_path, &["init", "demo"]);
    assert!(success, "init failed: {} {}", first, stderr);
    assert_eq!(first["created"], true);
    assert!(tmp.path().join("projects/demo/manifest.json").is_file());
    assert!(tmp.path().join("projects/demo/vectordb/index.sqlite").is_file());
    assert!(tmp.path().join("projects/demo/sources/gdocs").is_dir());

    let (second, _, success) = run_pctx(&config_path, &["init", "demo"]);
    assert!(success);
    assert_eq!(second["created"], false);
    assert_eq!(second["created_at"], first["created_at"]);
}

#[test]
fn test_invalid_project_name() {
    let (_tmp, config_path) = setup_test_env();
    let (json, _, success) = run_pctx(&config_path, &["init", "a/b"]);
    assert!(!success);
    assert_eq!(json["error_kind"], "invalid_project_name");
}

#[test]
fn test_ingest_and_query_local_notes() {
    let (tmp, config_path) = setup_test_env();
    let notes = file(&tmp, "notes.md");

    let (ingest, stderr, success) = run_pctx(&config_path, &["ingest", "demo", "local", &notes]);
    assert!(success, "ingest failed: {} {}", ingest, stderr);
    let extraction = &ingest["results"][0]["extraction"];
    assert_eq!(extraction["word_count"], 3);
    let source_id = extraction["source_id"].as_str().unwrap().to_string();
    assert_eq!(source_id.len(), 12);

    // Same file, same id.
    let (again, _, _) = run_pctx(&config_path, &["ingest", "demo", "local", &notes]);
    assert_eq!(again["results"][0]["extraction"]["source_id"], source_id.as_str());

    let (query, _, success) = run_pctx(&config_path, &["query", "demo", "What is Alpha?"]);
    assert!(success, "query failed: {}", query);
    let top = &query["results"][0];
    assert_eq!(top["source_id"], source_id.as_str());
    assert_eq!(top["rank"], 1);
    assert!(top["relevance_score"].as_f64().unwrap() > 0.0);
    assert_eq!(query["sources_summary"][0]["source_id"], source_id.as_str());
    assert_eq!(query["total_chunks_searched"], 1);
}

#[test]
fn test_ingest_multiple_locators_isolates_failures() {
    let (tmp, config_path) = setup_test_env();
    let notes = file(&tmp, "notes.md");
    let deploy = file(&tmp, "deploy.txt");
    let missing = file(&tmp, "missing.md");

    let (json, _, success) = run_pctx(
        &config_path,
        &["ingest", "demo", "local", &notes, &missing, &deploy],
    );
    assert!(!success);
    assert_eq!(json["succeeded"], 2);
    assert_eq!(json["failed"], 1);
    assert_eq!(json["results"][1]["error_kind"], "not_found");
    assert_eq!(json["results"][2]["success"], true);

    let (listing, _, _) = run_pctx(&config_path, &["projects", "demo"]);
    assert_eq!(listing["stats"]["total_sources"], 2);
    assert_eq!(listing["sources_by_type"]["local"].as_array().unwrap().len(), 2);
}

#[test]
fn test_reingest_changed_content_replaces_chunks() {
    let (tmp, config_path) = setup_test_env();
    let notes = file(&tmp, "notes.md");

    run_pctx(&config_path, &["ingest", "demo", "local", &notes]);
    fs::write(tmp.path().join("files/notes.md"), "Delta Epsilon Zeta").unwrap();
    let (json, _, success) = run_pctx(&config_path, &["ingest", "demo", "local", &notes]);
    assert!(success);
    assert_eq!(json["results"][0]["total_chunks"], 1);

    let (query, _, _) = run_pctx(&config_path, &["query", "demo", "Alpha Beta Gamma", "--top-k", "10"]);
    let results = query["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results
        .iter()
        .all(|r| !r["content"].as_str().unwrap().contains("Alpha")));
}

#[test]
fn test_query_empty_and_unknown_projects() {
    let (_tmp, config_path) = setup_test_env();

    let (json, _, success) = run_pctx(&config_path, &["query", "ghost", "anything"]);
    assert!(!success);
    assert_eq!(json["error_kind"], "no_index");
    assert!(json["suggestion"].is_string());

    run_pctx(&config_path, &["init", "empty"]);
    let (json, _, success) = run_pctx(&config_path, &["query", "empty", "anything"]);
    assert!(!success);
    assert_eq!(json["error_kind"], "empty_index");
    assert!(json["error"].as_str().unwrap().contains("Build context first"));
}

#[test]
fn test_extract_failure_writes_no_artifact() {
    let (tmp, config_path) = setup_test_env();
    let out = tmp.path().join("out");
    fs::write(tmp.path().join("files/blank.md"), "   \n\n").unwrap();

    let (json, _, success) = run_pctx(
        &config_path,
        &["extract", "local", &file(&tmp, "blank.md"), "--output-dir", out.to_str().unwrap()],
    );
    assert!(!success);
    assert_eq!(json["error_kind"], "empty_content");
    let written = fs::read_dir(&out).map(|d| d.count()).unwrap_or(0);
    assert_eq!(written, 0);
}

#[test]
fn test_extract_then_index() {
    let (tmp, config_path) = setup_test_env();
    let out = tmp.path().join("out");

    let (json, _, success) = run_pctx(
        &config_path,
        &["extract", "local", &file(&tmp, "deploy.txt"), "--output-dir", out.to_str().unwrap()],
    );
    assert!(success, "{}", json);
    let artifact = json["output_file"].as_str().unwrap().to_string();
    let body = fs::read_to_string(&artifact).unwrap();
    assert!(body.starts_with("---\nsource_type: local\n"));
    assert!(body.contains("Kubernetes"));

    let (json, _, success) = run_pctx(&config_path, &["index", "demo", &artifact]);
    assert!(success, "{}", json);
    assert_eq!(json["chunks_written"], 1);

    let (json, _, success) = run_pctx(&config_path, &["index", "demo", "/nonexistent/x.md"]);
    assert!(!success);
    assert_eq!(json["error_kind"], "not_found");
}

#[test]
fn test_projects_lists_corrupt_manifest_with_error() {
    let (tmp, config_path) = setup_test_env();
    run_pctx(&config_path, &["init", "good"]);
    run_pctx(&config_path, &["init", "broken"]);
    fs::write(tmp.path().join("projects/broken/manifest.json"), "{ not json").unwrap();

    let (json, _, success) = run_pctx(&config_path, &["projects"]);
    assert!(success);
    let projects = json["projects"].as_array().unwrap();
    assert_eq!(projects.len(), 2);
    assert_eq!(projects[0]["name"], "good");
    assert!(projects[0].get("error").is_none());
    assert_eq!(projects[1]["name"], "broken");
    assert!(projects[1]["error"].is_string());

    let (json, _, success) = run_pctx(&config_path, &["projects", "broken"]);
    assert!(!success);
    assert_eq!(json["error_kind"], "manifest_corrupt");
}

#[test]
fn test_root_flag_overrides_config() {
    let (tmp, config_path) = setup_test_env();
    let other = tmp.path().join("elsewhere");
    let (json, _, success) = run_pctx(
        &config_path,
        &["--root", other.to_str().unwrap(), "init", "demo"],
    );
    assert!(success, "{}", json);
    assert!(other.join("demo/manifest.json").is_file());
}

#[test]
fn test_invalid_config_reports_json_error() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "[chunking]\nmax_tokens = 0\n").unwrap();

    let (json, _, success) = run_pctx(&bad, &["init", "demo"]);
    assert!(!success);
    assert_eq!(json["success"], false);
    assert_eq!(json["error_kind"], "invalid_config");
    assert!(json["error"].as_str().unwrap().contains("max_tokens"));
    assert!(!tmp.path().join("projects/demo").exists());

    fs::write(&bad, "not = [valid").unwrap();
    let (json, _, success) = run_pctx(&bad, &["projects"]);
    assert!(!success);
    assert_eq!(json["error_kind"], "invalid_config");
}
