//! Unit tests for the JSONL message trace.

use serde_json::json;

use app_server_probe::rpc::message::Message;
use app_server_probe::rpc::trace::{
    truncate_encoding, TraceSink, MAX_TRACE_CHARS, TRUNCATION_MARKER,
};

/// Creating a sink empties an existing file.
#[test]
fn create_truncates_existing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dump.jsonl");
    std::fs::write(&path, "old line\nanother\n").expect("seed file");

    let sink = TraceSink::create(&path).expect("sink");

    assert_eq!(sink.path(), path.as_path());
    assert_eq!(std::fs::read_to_string(&path).expect("read"), "");
}

/// Each recorded message becomes one JSON line, flushed immediately.
#[test]
fn record_writes_one_line_per_message() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dump.jsonl");
    let sink = TraceSink::create(&path).expect("sink");

    sink.record(&Message::response(0, json!({ "userAgent": "dummy" })));
    sink.record(&Message::notification("turn/started", None));

    let written = std::fs::read_to_string(&path).expect("read");
    let lines: Vec<serde_json::Value> = written
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line is JSON"))
        .collect();
    assert_eq!(
        lines,
        vec![
            json!({ "id": 0, "result": { "userAgent": "dummy" } }),
            json!({ "method": "turn/started" }),
        ]
    );
}

/// Long encodings are cut at the character limit and marked.
#[test]
fn long_message_is_truncated_with_marker() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dump.jsonl");
    let sink = TraceSink::create(&path).expect("sink");

    let big = "x".repeat(MAX_TRACE_CHARS * 2);
    sink.record(&Message::notification(
        "item/agentMessage/delta",
        Some(json!({ "delta": big })),
    ));

    let written = std::fs::read_to_string(&path).expect("read");
    let line = written.lines().next().expect("one line");
    assert!(line.ends_with(TRUNCATION_MARKER));
    assert_eq!(
        line.chars().count(),
        MAX_TRACE_CHARS + TRUNCATION_MARKER.chars().count()
    );
}

/// Short encodings are untouched and multi-byte text is cut on a character
/// boundary.
#[test]
fn truncate_encoding_respects_char_boundaries() {
    assert_eq!(truncate_encoding("{\"a\":1}"), "{\"a\":1}");

    let exact = "é".repeat(MAX_TRACE_CHARS);
    assert_eq!(truncate_encoding(&exact), exact);

    let over = "é".repeat(MAX_TRACE_CHARS + 1);
    let cut = truncate_encoding(&over);
    assert_eq!(cut, format!("{}{TRUNCATION_MARKER}", "é".repeat(MAX_TRACE_CHARS)));
}

/// A trace path inside a missing directory is an I/O error.
#[test]
fn create_in_missing_directory_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = TraceSink::create(dir.path().join("missing").join("dump.jsonl"))
        .expect_err("creation must fail");
    assert!(err.to_string().starts_with("io:"), "{err}");
}
