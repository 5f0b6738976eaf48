//! Unit tests for response correlation.

use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use app_server_probe::rpc::correlator::{Awaited, Correlator, DEFAULT_POLL_INTERVAL};
use app_server_probe::rpc::message::Message;
use app_server_probe::rpc::router::Inbox;

fn correlator(inbox: &Inbox) -> Correlator {
    Correlator::new(inbox.clone(), Duration::from_millis(20))
}

/// A response already queued is returned without waiting.
#[tokio::test]
async fn queued_response_is_returned_immediately() {
    let inbox = Inbox::new();
    inbox.push(Message::response(0, json!({"userAgent": "dummy"})));

    let started = Instant::now();
    let awaited = correlator(&inbox)
        .await_response(0, Duration::from_secs(5))
        .await;

    assert!(started.elapsed() < Duration::from_secs(1));
    let response = awaited.into_response().expect("response");
    assert_eq!(response.result, Some(json!({"userAgent": "dummy"})));
    assert!(inbox.is_empty(), "the claimed response leaves the inbox");
}

/// A response arriving mid-wait is picked up before the deadline.
#[tokio::test]
async fn late_response_is_picked_up() {
    let inbox = Inbox::new();
    let producer = inbox.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        producer.push(Message::notification("turn/started", None));
        tokio::time::sleep(Duration::from_millis(30)).await;
        producer.push(Message::response(4, json!({})));
    });

    let awaited = correlator(&inbox)
        .await_response(4, Duration::from_secs(5))
        .await;

    assert!(awaited.into_response().is_some_and(|m| m.is_response_to(4)));
    assert_eq!(inbox.len(), 1, "the notification stays for the turn consumer");
}

/// Responses to other ids are never returned, and the wait times out.
#[tokio::test]
async fn other_ids_are_never_claimed() {
    let inbox = Inbox::new();
    inbox.push(Message::response(1, json!({})));
    inbox.push(Message::request(2, "peer/request", json!({})));

    let awaited = correlator(&inbox)
        .await_response(2, Duration::from_millis(100))
        .await;

    assert!(awaited.is_timed_out());
    assert_eq!(inbox.len(), 2, "nothing may be removed on timeout");
}

/// An error response is still the response.
#[tokio::test]
async fn error_response_is_returned() {
    let inbox = Inbox::new();
    inbox.push(Message::error_response(7, json!({"code": -32601})));

    let awaited = correlator(&inbox)
        .await_response(7, Duration::from_millis(100))
        .await;

    assert_eq!(
        awaited,
        Awaited::Response(Message::error_response(7, json!({"code": -32601})))
    );
}

/// The deadline is honoured within one poll interval.
#[tokio::test]
async fn timeout_is_honoured_within_poll_interval() {
    let inbox = Inbox::new();
    let correlator = Correlator::new(inbox.clone(), DEFAULT_POLL_INTERVAL);
    let timeout = Duration::from_millis(250);

    let started = Instant::now();
    let awaited = correlator.await_response(0, timeout).await;
    let elapsed = started.elapsed();

    assert!(awaited.is_timed_out());
    assert!(elapsed >= timeout, "returned early after {elapsed:?}");
    assert!(
        elapsed < timeout + DEFAULT_POLL_INTERVAL + Duration::from_millis(200),
        "overshot the deadline: {elapsed:?}"
    );
}
