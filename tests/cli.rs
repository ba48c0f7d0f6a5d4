//! CLI test cases.
//!
//! None of these talk to the real API. The end-to-end test runs against a
//! tiny loopback server which replays canned chat completion responses.

use std::{
    io::{Cursor, Write as _},
    net::TcpListener,
    path::{Path, PathBuf},
    process::Command,
    thread,
};

use assert_cmd::prelude::*;
use image::{ImageFormat, RgbImage};
use predicates::prelude::*;

/// Fake API key.
static API_KEY: &str = "sk-1234";

/// Create a new `Command` with our binary, isolated from any real
/// configuration in the environment.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("snap-ocr").unwrap();
    cmd.env_remove("MISTRAL_API_KEY")
        .env_remove("MISTRAL_API_BASE")
        .env_remove("MISTRAL_MODEL");
    cmd
}

/// Write a small PNG into `dir`.
fn write_png(dir: &Path) -> PathBuf {
    let path = dir.join("receipt.png");
    let mut bytes = Vec::new();
    RgbImage::new(8, 8)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Serve one canned chat completion per connection, in order. Returns the
/// API base URL.
fn serve_completions(contents: Vec<&'static str>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}/v1", listener.local_addr().unwrap());
    thread::spawn(move || {
        for content in contents {
            let (mut socket, _) = listener.accept().unwrap();
            read_request(&mut socket);
            let body = serde_json::json!({
                "id": "cmpl-test",
                "object": "chat.completion",
                "model": "pixtral-12b-latest",
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": content },
                    "finish_reason": "stop"
                }]
            })
            .to_string();
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).unwrap();
        }
    });
    base
}

/// Read an HTTP request's headers and body.
fn read_request(socket: &mut impl std::io::Read) {
    let mut request = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = socket.read(&mut buf).unwrap();
        if n == 0 {
            return;
        }
        request.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&request);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if request.len() >= header_end + 4 + content_length {
                return;
            }
        }
    }
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_schema_ocr_result() {
    cmd()
        .args(["schema", "OcrResult"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"structured\""))
        .stdout(predicate::str::contains("\"error\""));
}

#[test]
fn test_ocr_requires_api_key() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_png(dir.path());
    cmd()
        .current_dir(dir.path())
        .arg("ocr")
        .arg(&image)
        .assert()
        .failure()
        .stderr(predicate::str::contains("MISTRAL_API_KEY"));
}

#[test]
fn test_ocr_missing_image() {
    let dir = tempfile::tempdir().unwrap();
    cmd()
        .current_dir(dir.path())
        .env("MISTRAL_API_KEY", API_KEY)
        .arg("ocr")
        .arg(dir.path().join("missing.jpg"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to select image"))
        .stderr(predicate::str::contains(
            "Failed to pick an image from the gallery.",
        ));
}

#[test]
fn test_ocr_camera_failure_raises_alert() {
    let dir = tempfile::tempdir().unwrap();
    // Any readable file stands in for a camera device we may open.
    let device = write_png(dir.path());
    cmd()
        .current_dir(dir.path())
        .env("MISTRAL_API_KEY", API_KEY)
        .arg("ocr")
        .arg("--camera-command")
        .arg("false {output}")
        .arg("--back-camera")
        .arg(&device)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to take picture"))
        .stderr(predicate::str::contains("failed to take picture"));
}

#[test]
fn test_ocr_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_png(dir.path());
    let out = dir.path().join("result.json");
    let base = serve_completions(vec!["# Title\nBody", r#"{"title":"Title","body":"Body"}"#]);

    cmd()
        .current_dir(dir.path())
        .env("MISTRAL_API_KEY", API_KEY)
        .env("MISTRAL_API_BASE", &base)
        .arg("ocr")
        .arg(&image)
        .arg("-o")
        .arg(&out)
        .assert()
        .success();

    let result: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(
        result,
        serde_json::json!({
            "raw": "# Title\nBody",
            "structured": { "title": "Title", "body": "Body" }
        })
    );
}

#[test]
fn test_ocr_malformed_json_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_png(dir.path());
    let base = serve_completions(vec!["# Title\nBody", "not json"]);

    cmd()
        .current_dir(dir.path())
        .env("MISTRAL_API_KEY", API_KEY)
        .env("MISTRAL_API_BASE", &base)
        .arg("ocr")
        .arg(&image)
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"error\": \"Failed to process image"))
        .stdout(predicate::str::contains("\"raw\"").not());
}
