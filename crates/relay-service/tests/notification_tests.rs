//! Notification fan-out integration tests.
//!
//! Sends events through `POST /v1/notification/send` and checks which open
//! streams receive them.

use futures::StreamExt;
use relay_service::identity::mock::StaticIdentityProvider;
use relay_test_utils::{TestRelayServer, TestStream};
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

fn identity() -> StaticIdentityProvider {
    StaticIdentityProvider::new()
        .with_user("tok-a", "alice")
        .with_user("tok-b", "bob")
}

/// Next event frame within `wait`, or `None` if nothing arrives.
async fn next_event(
    stream: &mut TestStream,
    wait: Duration,
) -> Result<Option<serde_json::Value>, anyhow::Error> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let next = match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(next) => next,
            Err(_) => return Ok(None),
        };
        match next.ok_or_else(|| anyhow::anyhow!("stream ended"))?? {
            Message::Text(text) => return Ok(Some(serde_json::from_str(&text)?)),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => anyhow::bail!("unexpected frame: {:?}", other),
        }
    }
}

async fn open_stream(
    server: &TestRelayServer,
    credential: &str,
) -> Result<TestStream, anyhow::Error> {
    let context_id = server.issue_context_id(credential).await?;
    Ok(server.connect_stream(&context_id).await?)
}

/// Accepted without any open streams.
#[tokio::test]
async fn test_send_without_streams_is_accepted() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn(identity()).await?;

    let response = server
        .send_notification("tok-a", &json!({"event": "ping", "payload": null}))
        .await?;
    assert_eq!(response.status(), 202);

    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["message"], "sending notifications");

    Ok(())
}

/// Each user only sees their own events.
#[tokio::test]
async fn test_events_are_isolated_per_user() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn(identity()).await?;
    let mut alice = open_stream(&server, "tok-a").await?;
    let mut bob = open_stream(&server, "tok-b").await?;

    let response = server
        .send_notification("tok-a", &json!({"event": "for-alice", "payload": {"n": 1}}))
        .await?;
    assert_eq!(response.status(), 202);

    let event = next_event(&mut alice, Duration::from_secs(2))
        .await?
        .ok_or_else(|| anyhow::anyhow!("alice received nothing"))?;
    assert_eq!(event["event"], "for-alice");
    assert_eq!(event["payload"]["n"], 1);

    let response = server
        .send_notification("tok-b", &json!({"event": "for-bob", "payload": {}}))
        .await?;
    assert_eq!(response.status(), 202);

    // Bob's first frame is his own event, not alice's.
    let event = next_event(&mut bob, Duration::from_secs(2))
        .await?
        .ok_or_else(|| anyhow::anyhow!("bob received nothing"))?;
    assert_eq!(event["event"], "for-bob");

    assert!(next_event(&mut alice, Duration::from_millis(200))
        .await?
        .is_none());

    Ok(())
}

/// Every stream a user holds receives the event.
#[tokio::test]
async fn test_events_reach_all_of_a_users_streams() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn(identity()).await?;
    let mut first = open_stream(&server, "tok-a").await?;
    let mut second = open_stream(&server, "tok-a").await?;

    assert_eq!(server.registry().status().await?.users, 1);

    let response = server
        .send_notification("tok-a", &json!({"event": "update", "payload": [1, 2]}))
        .await?;
    assert_eq!(response.status(), 202);

    for stream in [&mut first, &mut second] {
        let event = next_event(stream, Duration::from_secs(2))
            .await?
            .ok_or_else(|| anyhow::anyhow!("stream received nothing"))?;
        assert_eq!(event["event"], "update");
        assert_eq!(event["payload"], json!([1, 2]));
    }

    Ok(())
}

/// A closed stream stops receiving while the user's other streams carry on.
#[tokio::test]
async fn test_closed_stream_is_skipped() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn(identity()).await?;
    let mut kept = open_stream(&server, "tok-a").await?;
    let mut closed = open_stream(&server, "tok-a").await?;

    closed.close(None).await?;

    let response = server
        .send_notification("tok-a", &json!({"event": "after-close", "payload": null}))
        .await?;
    assert_eq!(response.status(), 202);

    let event = next_event(&mut kept, Duration::from_secs(2))
        .await?
        .ok_or_else(|| anyhow::anyhow!("stream received nothing"))?;
    assert_eq!(event["event"], "after-close");

    Ok(())
}

/// Bodies without a string `event` are rejected.
#[tokio::test]
async fn test_malformed_body_returns_400() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn(identity()).await?;

    for body in [json!({"payload": 1}), json!({"event": 5}), json!("text")] {
        let response = server.send_notification("tok-a", &body).await?;
        assert_eq!(response.status(), 400, "body: {body}");
    }

    Ok(())
}

/// Sending requires a resolvable credential, and never takes a slot.
#[tokio::test]
async fn test_send_requires_identity_and_holds_no_slot() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn_with(identity(), &[("MAX_SESSIONS", "1")]).await?;

    let response = server
        .send_notification("nobody", &json!({"event": "x", "payload": null}))
        .await?;
    assert_eq!(response.status(), 403);

    for _ in 0..3 {
        let response = server
            .send_notification("tok-a", &json!({"event": "x", "payload": null}))
            .await?;
        assert_eq!(response.status(), 202);
    }

    let status = server.registry().status().await?;
    assert_eq!(status.free, 1);

    Ok(())
}
