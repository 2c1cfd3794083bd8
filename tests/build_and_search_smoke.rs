use std::fs;
use std::process::Command;

/// Builds an index over a small fixture repo, then searches it through the
/// compiled binary end to end. Requires network access on first run (the
/// embedding model is pulled from the Hugging Face Hub), same as the
/// `--query` path of the teacher's own CLI.
#[test]
fn build_then_search_finds_the_right_chunk() {
    let bin = env!("CARGO_BIN_EXE_coderag");
    let fixture = tempfile::tempdir().unwrap();
    let root = fixture.path();

    fs::write(
        root.join("config.rs"),
        "pub fn parse_config(path: &str) -> String {\n    std::fs::read_to_string(path).unwrap()\n}\n",
    )
    .unwrap();
    fs::write(
        root.join("yaml.rs"),
        "pub fn parse_yaml(text: &str) -> String {\n    text.to_string()\n}\n",
    )
    .unwrap();

    let build_status = Command::new(bin).arg("build").arg(".").current_dir(root).status().expect("spawn coderag build");
    assert!(build_status.success(), "build should exit cleanly");

    assert!(root.join(".coderag").join("vectors.json").exists());
    assert!(root.join(".coderag").join("lexical.json").exists());
    assert!(root.join(".coderag").join("chunks.json").exists());
    assert!(root.join(".coderag").join("graph.json").exists());

    let search_output = Command::new(bin).arg("search").arg("parse_config").current_dir(root).output().expect("spawn coderag search");
    assert!(search_output.status.success(), "search should exit cleanly");

    let stdout = String::from_utf8(search_output.stdout).unwrap();
    let results: serde_json::Value = serde_json::from_str(&stdout).expect("search output is json");
    let results = results.as_array().expect("search output is a json array");
    assert!(!results.is_empty(), "search should return at least one hit");

    let top_file = results[0].get("file_path").and_then(|v| v.as_str()).unwrap_or_default();
    assert!(top_file.ends_with("config.rs"), "expected config.rs to rank first, got {top_file}");
}
