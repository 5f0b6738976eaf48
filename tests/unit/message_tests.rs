//! Unit tests for message classification and outbound shapes.

use serde_json::{json, Value};

use app_server_probe::rpc::message::{Message, MessageKind};

fn parse(line: &str) -> Message {
    Message::parse_line(line).expect("line must parse as a message")
}

// ── Classification ────────────────────────────────────────────────────────────

/// `result` or `error` makes a response, regardless of other members.
#[test]
fn result_or_error_classifies_as_response() {
    assert_eq!(parse(r#"{"id":0,"result":{}}"#).kind(), MessageKind::Response);
    assert_eq!(
        parse(r#"{"id":0,"error":{"code":-32600,"message":"bad"}}"#).kind(),
        MessageKind::Response
    );
    assert_eq!(
        parse(r#"{"id":0,"method":"odd","result":1}"#).kind(),
        MessageKind::Response,
        "result wins over method"
    );
}

/// `method` with an id is a peer-initiated request; without one it is a
/// notification.
#[test]
fn method_classifies_by_id_presence() {
    assert_eq!(
        parse(r#"{"id":7,"method":"item/commandExecution/requestApproval","params":{}}"#).kind(),
        MessageKind::Request
    );
    assert_eq!(
        parse(r#"{"method":"turn/started","params":{}}"#).kind(),
        MessageKind::Notification
    );
}

/// A JSON object without any protocol member is noise.
#[test]
fn object_without_protocol_fields_is_noise() {
    assert_eq!(parse(r#"{"hello":"world"}"#).kind(), MessageKind::Noise);
    assert_eq!(parse(r#"{"id":4}"#).kind(), MessageKind::Noise);
}

/// Blank and non-JSON lines produce no message at all.
#[test]
fn blank_and_malformed_lines_do_not_parse() {
    assert!(Message::parse_line("").is_none());
    assert!(Message::parse_line("   ").is_none());
    assert!(Message::parse_line("codex starting up...").is_none());
    assert!(Message::parse_line("{\"id\":1,").is_none());
}

/// Surrounding whitespace is tolerated.
#[test]
fn surrounding_whitespace_is_tolerated() {
    let msg = parse("  {\"method\":\"turn/completed\"}  ");
    assert_eq!(msg.method(), Some("turn/completed"));
}

// ── Correlation helpers ───────────────────────────────────────────────────────

/// `is_response_to` requires both a response payload and the exact id.
#[test]
fn is_response_to_requires_payload_and_matching_id() {
    let response = parse(r#"{"id":2,"result":{"thread":{"id":"t"}}}"#);
    assert!(response.is_response_to(2));
    assert!(!response.is_response_to(3));

    let request = parse(r#"{"id":2,"method":"approve","params":{}}"#);
    assert!(
        !request.is_response_to(2),
        "a peer request sharing the id is not a response"
    );
}

/// `param` looks up a member of `params`.
#[test]
fn param_reads_named_member() {
    let msg = parse(r#"{"method":"item/agentMessage/delta","params":{"delta":"Hi"}}"#);
    assert_eq!(msg.param("delta"), Some(&json!("Hi")));
    assert_eq!(msg.param("missing"), None);
    assert_eq!(Message::notification("x", None).param("delta"), None);
}

// ── Outbound shapes ───────────────────────────────────────────────────────────

/// Requests serialise with `id`, `method`, and `params` only.
#[test]
fn request_serialises_with_id_method_params() {
    let msg = Message::request(0, "initialize", json!({"clientInfo":{"name":"p","version":"1"}}));
    let encoded = serde_json::to_string(&msg).expect("encode");

    assert!(!encoded.contains('\n'), "encoding must be a single line");
    let value: Value = serde_json::from_str(&encoded).expect("valid json");
    assert_eq!(
        value,
        json!({"id":0,"method":"initialize","params":{"clientInfo":{"name":"p","version":"1"}}})
    );
}

/// Notifications never carry an `id`.
#[test]
fn notification_serialises_without_id() {
    let value = serde_json::to_value(Message::notification("initialized", None)).expect("encode");
    assert_eq!(value, json!({"method":"initialized"}));
}

/// Error responses keep the error payload and are classified as responses.
#[test]
fn error_response_round_trips_as_response() {
    let msg = Message::error_response(5, json!({"code":-1,"message":"nope"}));
    let line = serde_json::to_string(&msg).expect("encode");
    let back = parse(&line);

    assert!(back.is_response_to(5));
    assert_eq!(back.error, Some(json!({"code":-1,"message":"nope"})));
    assert_eq!(back.result, None);
}
