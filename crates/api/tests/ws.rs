//! Tests for the WebSocket manager, in-process gateway and message handling.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use axum::extract::ws::Message;
use unplugd_api::ws::{handle_text, receive_until_expiry, SessionEnd, WsGateway, WsManager};
use unplugd_events::{ConnectionGateway, DeliveryError};

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Added connections are counted and reachable until removed.
#[tokio::test]
async fn test_add_send_remove() {
    let manager = WsManager::new();
    let mut rx = manager.add("c1".into(), "alice").await;

    assert_eq!(manager.connection_count().await, 1);
    assert_eq!(manager.owner_of("c1").await.as_deref(), Some("alice"));
    assert!(manager.send("c1", Message::Text("hi".into())).await);
    assert_matches!(rx.recv().await, Some(Message::Text(t)) if t.as_str() == "hi");

    manager.remove("c1").await;
    assert_eq!(manager.connection_count().await, 0);
    assert!(!manager.send("c1", Message::Text("again".into())).await);
}

/// Shutdown sends Close to everyone and empties the map.
#[tokio::test]
async fn test_shutdown_all_closes_connections() {
    let manager = WsManager::new();
    let mut a = manager.add("a".into(), "alice").await;
    let mut b = manager.add("b".into(), "bob").await;

    manager.shutdown_all().await;

    assert_eq!(manager.connection_count().await, 0);
    assert_matches!(a.recv().await, Some(Message::Close(None)));
    assert_matches!(b.recv().await, Some(Message::Close(None)));
}

/// Heartbeat pings reach every connection.
#[tokio::test]
async fn test_ping_all() {
    let manager = WsManager::new();
    let mut rx = manager.add("c1".into(), "alice").await;

    manager.ping_all().await;
    assert_matches!(rx.recv().await, Some(Message::Ping(_)));
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Payloads are delivered as text frames.
#[tokio::test]
async fn test_gateway_delivers_text() {
    let manager = Arc::new(WsManager::new());
    let mut rx = manager.add("c1".into(), "alice").await;
    let gateway = WsGateway::new(manager.clone());

    gateway
        .post_to_connection("c1", r#"{"type":"COMPLETED"}"#)
        .await
        .unwrap();
    assert_matches!(rx.recv().await, Some(Message::Text(t)) if t.as_str() == r#"{"type":"COMPLETED"}"#);
}

/// A connection not held by this process is gone.
#[tokio::test]
async fn test_gateway_unknown_connection_is_gone() {
    let gateway = WsGateway::new(Arc::new(WsManager::new()));
    let result = gateway.post_to_connection("nope", "{}").await;
    assert_matches!(result, Err(DeliveryError::Gone));
}

/// A connection whose socket task has exited is closed.
#[tokio::test]
async fn test_gateway_closed_channel() {
    let manager = Arc::new(WsManager::new());
    let rx = manager.add("c1".into(), "alice").await;
    drop(rx);

    let gateway = WsGateway::new(manager);
    let result = gateway.post_to_connection("c1", "{}").await;
    assert_matches!(result, Err(DeliveryError::Closed(id)) if id == "c1");
}

// ---------------------------------------------------------------------------
// Inbound messages
// ---------------------------------------------------------------------------

/// `ping` is answered with `pong`.
#[test]
fn test_ping_action() {
    let reply: serde_json::Value = serde_json::from_str(&handle_text(r#"{"action":"ping"}"#)).unwrap();
    assert_eq!(reply, serde_json::json!({ "action": "pong" }));
}

/// Anything else gets the unknown-action reply.
#[test]
fn test_unknown_action() {
    for input in [r#"{"action":"subscribe"}"#, "not json", "{}"] {
        let reply: serde_json::Value = serde_json::from_str(&handle_text(input)).unwrap();
        assert_eq!(reply["action"], "unknown");
        assert_eq!(reply["message"], "Unrecognized action");
    }
}

// ---------------------------------------------------------------------------
// Session lifetime
// ---------------------------------------------------------------------------

/// A silent client is cut off once its connection row would expire.
#[tokio::test(start_paused = true)]
async fn test_session_ends_at_ttl() {
    let manager = WsManager::new();
    let _rx = manager.add("c1".into(), "alice").await;
    let mut stream = futures::stream::pending::<Result<Message, axum::Error>>();

    let started = tokio::time::Instant::now();
    let end = receive_until_expiry(&mut stream, &manager, "c1", Duration::from_secs(7200)).await;

    assert_eq!(end, SessionEnd::Expired);
    assert!(started.elapsed() >= Duration::from_secs(7200));
}

/// Frames are answered until the client closes, well before the TTL.
#[tokio::test(start_paused = true)]
async fn test_session_replies_until_client_closes() {
    let manager = WsManager::new();
    let mut rx = manager.add("c1".into(), "alice").await;
    let mut stream = futures::stream::iter([
        Ok::<_, axum::Error>(Message::Text(r#"{"action":"ping"}"#.into())),
        Ok(Message::Close(None)),
    ]);

    let end = receive_until_expiry(&mut stream, &manager, "c1", Duration::from_secs(7200)).await;

    assert_eq!(end, SessionEnd::Closed);
    assert_matches!(rx.recv().await, Some(Message::Text(t)) if t.as_str().contains("pong"));
}
