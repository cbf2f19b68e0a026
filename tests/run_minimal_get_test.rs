//! End-to-end: a minimal one-request stash against a real in-process HTTP
//! server, run through the CLI binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn minimal_get_archives_response_and_exits_zero() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}").insert_header("content-type", "application/json"))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let config_path = dir.path().join("stash.yml");
    std::fs::write(
        &config_path,
        format!(
            r#"
StashConfig:
  Name: Mini
  Defaults:
    URLRoot: {}
    FlowControl: {{DelaySeconds: 0, TimeoutSeconds: 5}}
  Sequences:
    - Name: Solo
      Type: Sequential
      Requests:
        - Ping: {{Method: GET, URLPath: /health}}
"#,
            server.uri()
        ),
    )
    .unwrap();

    let out_dir = dir.path().join("out");

    Command::cargo_bin("payloadstash")
        .unwrap()
        .arg("run")
        .arg(&config_path)
        .arg("--out")
        .arg(&out_dir)
        .arg("--yes")
        .assert()
        .success()
        .stdout(predicate::str::contains("1/1 requests succeeded"));

    let run_dir = find_run_dir(&out_dir, "Mini");
    assert!(run_dir.join("stash-resolved.yml").exists());
    assert!(run_dir.join("stash-results.csv").exists());
    assert!(run_dir.join("stash-log.txt").exists());
    assert!(run_dir.join("seq001-Solo/req001-Ping-response.json").exists());

    let results = std::fs::read_to_string(run_dir.join("stash-results.csv")).unwrap();
    assert_eq!(results.lines().next().unwrap(), "sequence,request,timestamp,status,duration_ms,attempts");
    assert!(results.lines().nth(1).unwrap().starts_with("Solo,Ping,"));
    assert!(results.lines().nth(1).unwrap().contains(",200,"));
}

/// The run timestamp is generated at runtime, so locate the single
/// `<stash-name>/<run-timestamp>` directory the run actually produced.
fn find_run_dir(out_dir: &std::path::Path, stash_name: &str) -> std::path::PathBuf {
    let stash_dir = out_dir.join(stash_name);
    std::fs::read_dir(&stash_dir)
        .unwrap()
        .next()
        .expect("run directory was created")
        .unwrap()
        .path()
}
