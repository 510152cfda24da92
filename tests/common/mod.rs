//! Scripted upstream shared by the integration tests.

#![allow(dead_code)]

use std::time::Duration;

use hass_session::{ChannelConnector, Session, Upstream, UpstreamAcceptor};
use serde_json::{Value, json};

pub const TOKEN: &str = "integration-token";
pub const VERSION: &str = "2024.1.0";

/// Builds a session over an in-memory channel, without keepalive pings.
pub fn session() -> (Session, UpstreamAcceptor) {
    let (connector, acceptor) = ChannelConnector::new();
    (session_over(connector), acceptor)
}

pub fn session_over(connector: impl hass_session::Connector + 'static) -> Session {
    Session::builder()
        .token(TOKEN)
        .keepalive_interval(None)
        .request_timeout(Some(Duration::from_secs(5)))
        .connector(connector)
        .build()
        .expect("session")
}

/// Accepts one connection and completes the handshake.
pub async fn accept(acceptor: &mut UpstreamAcceptor) -> Upstream {
    let mut upstream = acceptor.accept().await.expect("connect");
    authenticate(&mut upstream).await;
    upstream
}

pub async fn authenticate(upstream: &mut Upstream) {
    upstream
        .send_json(&json!({ "type": "auth_required", "ha_version": VERSION }))
        .expect("greet");
    let auth = upstream.recv_json().await.expect("auth");
    assert_eq!(auth["type"], "auth");
    assert_eq!(auth["access_token"], TOKEN);
    upstream
        .send_json(&json!({ "type": "auth_ok", "ha_version": VERSION }))
        .expect("auth_ok");
}

pub fn result(id: &Value, result: Value) -> Value {
    json!({ "id": id, "type": "result", "success": true, "result": result })
}

pub fn failure(id: &Value, code: &str, message: &str) -> Value {
    json!({
        "id": id,
        "type": "result",
        "success": false,
        "error": { "code": code, "message": message }
    })
}

/// Receives one request and answers it with `value`.
pub async fn answer(upstream: &mut Upstream, value: Value) -> Value {
    let request = upstream.recv_json().await.expect("request");
    upstream
        .send_json(&result(&request["id"], value))
        .expect("result");
    request
}

/// Installs a test subscriber once; honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
