// CLI integration tests: the `tabula` binary against a loopback table server.
mod common;

use std::io::Write;
use std::process::{Command, Output, Stdio};

use common::FakeServer;
use serde_json::{Value, json};

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_tabula");
    let mut command = Command::new(exe);
    command
        .env_remove("TABULA_TOKEN")
        .env_remove("TABULA_PROJECT")
        .env_remove("TABULA_BASE_URL")
        .env_remove("RUST_LOG");
    command
}

fn run(server: &FakeServer, args: &[&str]) -> Output {
    cmd()
        .arg("--base-url")
        .arg(&server.base_url)
        .args(args)
        .output()
        .expect("run tabula")
}

fn parse_json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).expect("valid json")
}

fn json_lines(bytes: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

fn server_with_rows(rows: u64) -> FakeServer {
    let server = FakeServer::start();
    server.create_table(
        "proj",
        "logs",
        "events",
        json!([{"name": "n", "type": "INTEGER"}, {"name": "name", "type": "STRING"}]),
    );
    server.append_rows(
        "proj",
        "logs",
        "events",
        (0..rows)
            .map(|n| vec![json!(n.to_string()), json!(format!("event {n}"))])
            .collect(),
    );
    server
}

#[test]
fn decorate_prints_snapshot_and_window_names() {
    let snapshot = cmd()
        .args(["decorate", "proj:logs.events", "--at", "1h"])
        .output()
        .expect("decorate");
    assert!(snapshot.status.success());
    assert_eq!(
        parse_json(&snapshot.stdout),
        json!({"table": "proj:logs.events@-3600000"})
    );

    let window = cmd()
        .args([
            "--project", "proj", "decorate", "logs.events", "--since", "2h", "--until", "1h",
        ])
        .output()
        .expect("decorate");
    assert!(window.status.success());
    assert_eq!(
        parse_json(&window.stdout),
        json!({"table": "proj:logs.events@-7200000--3600000"})
    );
}

#[test]
fn decorate_rejects_views_older_than_the_limit() {
    let output = cmd()
        .args(["decorate", "proj:logs.events", "--at", "8d"])
        .output()
        .expect("decorate");
    assert_eq!(output.status.code(), Some(2));
    let err = parse_json(&output.stderr);
    assert_eq!(err["error"]["kind"], "Validation");

    let output = cmd()
        .args(["decorate", "proj:logs.events@-1000", "--at", "1h"])
        .output()
        .expect("decorate");
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(parse_json(&output.stderr)["error"]["kind"], "Precondition");
}

#[test]
fn rows_and_get_emit_json_lines() {
    let server = server_with_rows(5);
    let rows = run(&server, &["--page-size", "2", "rows", "proj:logs.events", "--start", "-3"]);
    assert!(rows.status.success(), "{}", String::from_utf8_lossy(&rows.stderr));
    let lines = json_lines(&rows.stdout);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], json!({"n": 2, "name": "event 2"}));

    let get = run(&server, &["get", "proj:logs.events", "0", "-1"]);
    assert!(get.status.success());
    let lines = json_lines(&get.stdout);
    assert_eq!(lines[0]["n"], 0);
    assert_eq!(lines[1]["n"], 4);
}

#[test]
fn info_reports_length_and_schema() {
    let server = server_with_rows(3);
    let info = run(&server, &["info", "proj:logs.events"]);
    assert!(info.status.success());
    let value = parse_json(&info.stdout);
    assert_eq!(value["table"], "proj:logs.events");
    assert_eq!(value["rows"], 3);
    assert_eq!(value["created"], "2023-11-14T22:13:20Z");
    assert_eq!(value["schema"][0]["name"], "n");
}

#[test]
fn insert_reads_jsonl_from_stdin() {
    let server = server_with_rows(0);
    let mut child = cmd()
        .args(["--base-url", &server.base_url, "insert", "proj:logs.events"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"{\"n\": 1, \"name\": \"a\"}\n{\"n\": 2, \"name\": \"b\"}\n")
        .expect("write");
    let output = child.wait_with_output().expect("wait");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let summary = parse_json(&output.stdout);
    assert_eq!(summary["rows"], 2);
    assert_eq!(summary["batches"], 1);
    assert_eq!(server.row_count("proj", "logs", "events"), 2);
}

#[test]
fn insert_with_unknown_field_fails_validation() {
    let server = server_with_rows(0);
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("records.jsonl");
    std::fs::write(&path, "{\"n\": 1, \"extra\": true}\n").expect("write");
    let output = run(
        &server,
        &["insert", "proj:logs.events", "--file", path.to_str().expect("path")],
    );
    assert_eq!(output.status.code(), Some(2));
    let err = parse_json(&output.stderr);
    assert_eq!(err["error"]["field"], "extra");
    assert_eq!(server.row_count("proj", "logs", "events"), 0);
}

#[test]
fn export_writes_csv() {
    let server = server_with_rows(2);
    let stdout = run(&server, &["export", "proj:logs.events"]);
    assert!(stdout.status.success());
    assert_eq!(
        String::from_utf8_lossy(&stdout.stdout),
        "n,name\n0,event 0\n1,event 1\n"
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("out.csv");
    let file = run(
        &server,
        &[
            "export",
            "proj:logs.events",
            "--no-header",
            "--output",
            path.to_str().expect("path"),
        ],
    );
    assert!(file.status.success());
    assert_eq!(parse_json(&file.stdout)["rows"], 2);
    assert_eq!(
        std::fs::read_to_string(&path).expect("read"),
        "0,event 0\n1,event 1\n"
    );
}

#[test]
fn missing_table_exits_with_not_found() {
    let server = server_with_rows(0);
    let output = run(&server, &["info", "proj:logs.nope"]);
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(parse_json(&output.stderr)["error"]["kind"], "NotFound");
}

#[test]
fn bad_arguments_exit_with_usage_code() {
    let output = cmd().args(["get", "proj:logs.events"]).output().expect("run");
    assert_eq!(output.status.code(), Some(2));
    let output = cmd()
        .args(["decorate", "proj:logs.events"])
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(2));
}
