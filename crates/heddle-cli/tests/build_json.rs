//! Integration test for `heddle build --json`: runs the compiled binary end to end
//! against a small fixture project and checks the JSON contract.

use std::process::Command;

use tempfile::tempdir;

#[test]
fn build_json_reports_bundle_and_asset_count() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("index.js"), b"require(\"./util.js\");").unwrap();
    std::fs::write(dir.path().join("util.js"), b"module.exports = 1;").unwrap();
    let out_dir = dir.path().join("dist");

    let output = Command::new(env!("CARGO_BIN_EXE_heddle"))
        .arg("--json")
        .arg("build")
        .arg(dir.path().join("index.js"))
        .arg("--out-dir")
        .arg(&out_dir)
        .arg("--cwd")
        .arg(dir.path())
        .output()
        .expect("failed to run heddle binary");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(json["ok"], true);
    assert_eq!(json["asset_count"], 2);
    assert_eq!(json["bundles"].as_array().unwrap().len(), 1);
}

#[test]
fn build_json_reports_error_for_missing_entry() {
    let dir = tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_heddle"))
        .arg("--json")
        .arg("build")
        .arg(dir.path().join("missing.js"))
        .arg("--cwd")
        .arg(dir.path())
        .output()
        .expect("failed to run heddle binary");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(json["ok"], false);
    assert!(json["error"].is_string());
}
