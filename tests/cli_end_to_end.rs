use std::fs;

use assert_cmd::Command;
use image::{Rgba, RgbaImage};
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

fn mathmark(dir: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("mathmark"));
    cmd.current_dir(dir.path())
        .env_remove("MATHMARK_CONFIG_FILE")
        .env("RUST_LOG", "error");
    cmd
}

fn write_document(dir: &TempDir, text: &str) -> std::path::PathBuf {
    let path = dir.path().join("notes.md");
    fs::write(&path, text).expect("write document");
    path
}

#[test]
fn segments_prints_json_with_reformatted_text() {
    let dir = TempDir::new().expect("temp dir");
    let doc = write_document(&dir, "Area $\\pi r^2$ here.");

    let assert = mathmark(&dir)
        .arg("segments")
        .arg(&doc)
        .arg("--json")
        .assert()
        .success();

    let output: Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json output");
    let segments = output["segments"].as_array().expect("segments array");
    assert_eq!(segments.len(), 3);
    assert_eq!(segments[1]["kind"], "inline_math");
    assert_eq!(segments[1]["latex"], "\\pi r^2");
    assert!(
        !output["reformatted"]
            .as_str()
            .expect("reformatted text")
            .contains('$')
    );
}

#[test]
fn segments_does_not_need_a_lossless_parse() {
    let dir = TempDir::new().expect("temp dir");
    let doc = write_document(&dir, "```sh\necho $HOME and $PATH\n```\n");

    mathmark(&dir)
        .arg("toc")
        .arg(&doc)
        .assert()
        .code(65);

    let assert = mathmark(&dir)
        .arg("segments")
        .arg(&doc)
        .arg("--json")
        .assert()
        .success();
    let output: Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json output");
    let segments = output["segments"].as_array().expect("segments array");
    assert!(
        segments
            .iter()
            .any(|segment| segment["latex"] == "HOME and")
    );
}

#[test]
fn toc_prints_outline() {
    let dir = TempDir::new().expect("temp dir");
    let doc = write_document(&dir, "# Intro\n\ntext\n\n## Sum $n$\n");

    mathmark(&dir)
        .arg("toc")
        .arg(&doc)
        .assert()
        .success()
        .stdout(contains("# Intro"))
        .stdout(contains("   ## Sum $n$"));
}

#[test]
fn render_writes_bitmaps_and_reports_failures() {
    let dir = TempDir::new().expect("temp dir");
    RgbaImage::from_pixel(3, 2, Rgba([200, 0, 0, 255]))
        .save(dir.path().join("dot.png"))
        .expect("write image");
    let doc = write_document(&dir, "![dot](dot.png)\n\nAnd $x$.\n");
    let out = dir.path().join("out");

    let assert = mathmark(&dir)
        .arg("render")
        .arg(&doc)
        .arg("--json")
        .arg("--output")
        .arg(&out)
        .arg("--math-cli-path")
        .arg(dir.path().join("no-such-rasteriser"))
        .arg("--math-cache-dir")
        .arg(dir.path().join("math-cache"))
        .assert()
        .success();

    let output: Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json output");
    assert_eq!(output["phase"], "completed");
    assert_eq!(output["total"], 2);
    let placements = output["placements"].as_array().expect("placements");
    assert_eq!(placements[0]["kind"], "image");
    assert_eq!(placements[0]["status"], "rendered");
    assert_eq!(placements[0]["width"], 3);
    assert_eq!(placements[1]["kind"], "math");
    assert_eq!(placements[1]["status"], "failed");
    assert_eq!(placements[1]["error_kind"], "render");

    let written: Vec<_> = fs::read_dir(&out)
        .expect("output dir")
        .map(|entry| entry.expect("entry").file_name())
        .collect();
    assert_eq!(written.len(), 1);
    assert!(
        written[0]
            .to_str()
            .is_some_and(|name| name.ends_with(".png") && !name.contains(':'))
    );
}

#[test]
fn missing_input_exits_with_noinput() {
    let dir = TempDir::new().expect("temp dir");
    mathmark(&dir)
        .arg("toc")
        .arg(dir.path().join("absent.md"))
        .assert()
        .code(66)
        .stderr(contains("absent.md"));
}

#[test]
fn invalid_configuration_exits_with_config_code() {
    let dir = TempDir::new().expect("temp dir");
    let doc = write_document(&dir, "$x$");
    mathmark(&dir)
        .arg("render")
        .arg(&doc)
        .arg("--remote-concurrency")
        .arg("0")
        .assert()
        .code(78)
        .stderr(contains("render.remote_concurrency"));
}
