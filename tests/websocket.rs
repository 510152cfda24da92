//! End to end over a real local WebSocket server.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hass_session::{Error, Session};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

const TOKEN: &str = "ws-token";

/// Minimal upstream: authenticates, answers `get_states`, acknowledges
/// subscriptions with one event each, acknowledges unsubscribes.
async fn serve(listener: TcpListener) {
    let (stream, _) = listener.accept().await.expect("accept");
    let mut ws = accept_async(stream).await.expect("upgrade");

    let send = |value: Value| Message::Text(value.to_string().into());

    ws.send(send(json!({ "type": "auth_required", "ha_version": "2024.1.0" })))
        .await
        .expect("greet");

    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let frame: Value = serde_json::from_str(text.as_str()).expect("json");
        let id = frame["id"].clone();

        let replies = match frame["type"].as_str() {
            Some("auth") if frame["access_token"] == TOKEN => {
                vec![json!({ "type": "auth_ok", "ha_version": "2024.1.0" })]
            }
            Some("auth") => vec![json!({ "type": "auth_invalid", "message": "Invalid access token or password" })],
            Some("get_states") => vec![json!({
                "id": id,
                "type": "result",
                "success": true,
                "result": [{ "entity_id": "sun.sun", "state": "above_horizon", "attributes": { "friendly_name": "Sun" } }]
            })],
            Some("subscribe_events") => vec![
                json!({ "id": id, "type": "result", "success": true, "result": null }),
                json!({ "id": id, "type": "event", "event": { "event_type": "ping_event", "data": { "n": 1 } } }),
            ],
            Some("unsubscribe_events") | Some("ping") => {
                vec![json!({ "id": id, "type": "result", "success": true, "result": null })]
            }
            _ => vec![json!({
                "id": id,
                "type": "result",
                "success": false,
                "error": { "code": "unknown_command", "message": "Unknown command." }
            })],
        };

        for reply in replies {
            if ws.send(send(reply)).await.is_err() {
                return;
            }
        }
    }
}

async fn local_session(token: &str) -> Session {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    tokio::spawn(serve(listener));

    Session::builder()
        .url(format!("http://127.0.0.1:{port}"))
        .token(token)
        .keepalive_interval(None)
        .request_timeout(Some(Duration::from_secs(5)))
        .build()
        .expect("session")
}

#[tokio::test]
async fn queries_and_subscriptions_over_websocket() {
    let session = local_session(TOKEN).await;

    let states = session.get_states().await.expect("states");
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].friendly_name(), Some("Sun"));
    assert_eq!(session.ha_version().as_deref(), Some("2024.1.0"));

    let events = Arc::new(Mutex::new(Vec::new()));
    let handle = {
        let events = Arc::clone(&events);
        session
            .subscribe_events(Some("ping_event"), move |event| events.lock().push(event))
            .await
            .expect("subscribed")
    };

    // The event follows the acknowledgment; a ping round trip flushes it.
    session.ping().await.expect("ping");
    assert_eq!(events.lock().len(), 1);
    assert_eq!(events.lock()[0].data["n"], 1);

    handle.unsubscribe().await.expect("unsubscribed");

    let unknown = session
        .call(hass_session::Command::custom(json!({ "type": "does/not/exist" })).expect("command"))
        .await;
    assert!(matches!(unknown, Err(Error::Remote { ref code, .. }) if code == "unknown_command"));

    session.close();
    assert!(!session.is_connected());
}

#[tokio::test]
async fn rejected_token_over_websocket() {
    let session = local_session("wrong").await;

    let outcome = session.connect().await;
    assert!(matches!(outcome, Err(Error::Authentication { .. })));
    assert!(!session.is_connected());
}
