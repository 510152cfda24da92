//! Session facade.
//!
//! The [`Session`] is the only entry point callers need. Every operation
//! first passes through one readiness guard that connects and authenticates
//! on demand. Concurrent first callers share a single handshake.
//!
//! # Example
//!
//! ```no_run
//! use hass_session::Session;
//!
//! # async fn example() -> hass_session::Result<()> {
//! let session = Session::from_env()?;
//!
//! let config = session.get_config().await?;
//! println!("{} runs {}", config.location_name, config.version);
//!
//! let handle = session
//!     .subscribe_events(Some("state_changed"), |event| {
//!         println!("{:?} changed", event.entity_id());
//!     })
//!     .await?;
//!
//! handle.unsubscribe().await?;
//! session.close();
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    Command, ConfigCheck, CoreCommand, EntityState, Event, HassConfig, Services, Target,
};
use crate::transport::{Connection, SubscriptionFilter, SubscriptionHandle};

use super::builder::{SessionBuilder, SessionConfig};

// ============================================================================
// Types
// ============================================================================

/// Caller waiting on an in-flight handshake.
type Waiter = oneshot::Sender<Result<Connection>>;

/// Connection lifecycle as seen by the session.
enum Phase {
    /// No usable connection.
    Disconnected,
    /// Handshake in flight; every caller queued here gets its outcome.
    Connecting { waiters: Vec<Waiter> },
    /// Authenticated.
    Ready(Connection),
}

/// Mutable session state.
struct SessionState {
    phase: Phase,
    /// Bumped on every close so a handshake that finishes afterwards is
    /// discarded instead of installed.
    epoch: u64,
    /// Handshakes started so far.
    attempts: u64,
}

/// Internal shared state for the session.
pub(crate) struct SessionInner {
    config: SessionConfig,
    state: Mutex<SessionState>,
}

// ============================================================================
// Session
// ============================================================================

/// Client session for the Home Assistant WebSocket API.
///
/// Cheap to clone; clones share one connection. Created explicitly through
/// [`Session::builder`] or [`Session::from_env`]; nothing is global.
#[derive(Clone)]
pub struct Session {
    /// Shared inner state.
    pub(crate) inner: Arc<SessionInner>,
}

// ============================================================================
// Session - Display
// ============================================================================

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.inner.config.url().as_str())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session - Construction
// ============================================================================

impl Session {
    /// Creates a configuration builder for the session.
    #[inline]
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Creates a session from `HA_WEBSOCKET_URL` (or `HA_URL`) and `HA_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingCredential`] if `HA_TOKEN` is unset or blank.
    pub fn from_env() -> Result<Self> {
        SessionBuilder::from_env().build()
    }

    /// Creates a session from a validated configuration.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config,
                state: Mutex::new(SessionState {
                    phase: Phase::Disconnected,
                    epoch: 0,
                    attempts: 0,
                }),
            }),
        }
    }

    /// Returns the session configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

// ============================================================================
// Session - Connection Lifecycle
// ============================================================================

impl Session {
    /// Connects and authenticates, unless already connected.
    ///
    /// Concurrent callers share one handshake and observe the same outcome.
    /// After a close or a lost connection, the next call opens a new
    /// connection; subscriptions of the old one stay inactive.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if the endpoint is unreachable
    /// - [`Error::Authentication`] if the token is rejected
    /// - [`Error::ConnectionTimeout`] if the handshake takes too long
    pub async fn connect(&self) -> Result<()> {
        self.ensure_ready().await.map(drop)
    }

    /// Closes the connection.
    ///
    /// Pending commands fail with [`Error::ConnectionClosed`], subscriptions
    /// are deactivated, and callers waiting on an in-flight handshake fail
    /// the same way. The session stays usable; the next operation
    /// reconnects.
    pub fn close(&self) {
        let previous = {
            let mut state = self.inner.state.lock();
            state.epoch += 1;
            mem::replace(&mut state.phase, Phase::Disconnected)
        };

        match previous {
            Phase::Ready(connection) => {
                info!("Closing session");
                connection.shutdown();
            }
            Phase::Connecting { waiters } => {
                debug!(waiters = waiters.len(), "Closing session during handshake");
                for waiter in waiters {
                    let _ = waiter.send(Err(Error::ConnectionClosed));
                }
            }
            Phase::Disconnected => {}
        }
    }

    /// Returns `true` if an authenticated connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(&self.inner.state.lock().phase, Phase::Ready(c) if !c.is_closed())
    }

    /// Returns the upstream version of the current connection.
    #[must_use]
    pub fn ha_version(&self) -> Option<String> {
        match &self.inner.state.lock().phase {
            Phase::Ready(connection) => connection.ha_version().map(str::to_string),
            _ => None,
        }
    }

    /// Returns the current connection without connecting.
    #[must_use]
    pub fn connection(&self) -> Option<Connection> {
        match &self.inner.state.lock().phase {
            Phase::Ready(connection) if !connection.is_closed() => Some(connection.clone()),
            _ => None,
        }
    }

    /// Returns how many handshakes this session has started.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.inner.state.lock().attempts
    }

    /// Returns the current connection, connecting first if needed.
    async fn ensure_ready(&self) -> Result<Connection> {
        let (waiter, outcome) = oneshot::channel();

        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;

            match &mut state.phase {
                Phase::Ready(connection) if !connection.is_closed() => {
                    return Ok(connection.clone());
                }
                Phase::Connecting { waiters } => {
                    debug!(waiting = waiters.len() + 1, "Joining in-flight handshake");
                    waiters.push(waiter);
                }
                _ => {
                    state.phase = Phase::Connecting {
                        waiters: vec![waiter],
                    };
                    state.attempts += 1;
                    tokio::spawn(Arc::clone(&self.inner).handshake(state.epoch));
                }
            }
        }

        outcome.await.map_err(|_| Error::ConnectionClosed)?
    }
}

// ============================================================================
// SessionInner - Handshake
// ============================================================================

impl SessionInner {
    /// Runs one handshake and hands its outcome to every waiter.
    async fn handshake(self: Arc<Self>, epoch: u64) {
        let config = &self.config;
        debug!(url = %config.url(), "Connecting");

        let outcome = match config.connector.connect(config.url()).await {
            Ok(pair) => Connection::open(pair, &config.token, config.options()).await,
            Err(e) => Err(e),
        };

        let waiters = {
            let mut state = self.state.lock();

            if state.epoch != epoch {
                // Closed while connecting; waiters were already answered.
                if let Ok(connection) = &outcome {
                    connection.shutdown();
                }
                return;
            }

            let next = match &outcome {
                Ok(connection) => Phase::Ready(connection.clone()),
                Err(_) => Phase::Disconnected,
            };

            match mem::replace(&mut state.phase, next) {
                Phase::Connecting { waiters } => waiters,
                _ => Vec::new(),
            }
        };

        match &outcome {
            Ok(_) => info!(url = %config.url(), waiters = waiters.len(), "Session connected"),
            Err(e) => warn!(url = %config.url(), error = %e, "Connection attempt failed"),
        }

        for waiter in waiters {
            let shared = match &outcome {
                Ok(connection) => Ok(connection.clone()),
                Err(e) => Err(e.replicate()),
            };
            let _ = waiter.send(shared);
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Phase::Ready(connection) = &self.state.get_mut().phase {
            connection.shutdown();
        }
    }
}

// ============================================================================
// Session - Commands
// ============================================================================

impl Session {
    /// Sends any command and returns its raw result.
    ///
    /// Use [`Command::custom`] for command types without a typed variant.
    ///
    /// # Errors
    ///
    /// - Connection errors from [`connect`](Self::connect)
    /// - [`Error::Remote`] if the upstream reports failure
    /// - [`Error::RequestTimeout`] if no result arrives in time
    /// - [`Error::ConnectionClosed`] if the connection closes while waiting
    pub async fn call(&self, command: impl Into<Command>) -> Result<Value> {
        self.ensure_ready().await?.send(command).await
    }

    /// Sends any command with a custom timeout; `None` waits indefinitely.
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call).
    pub async fn call_with_timeout(
        &self,
        command: impl Into<Command>,
        request_timeout: Option<Duration>,
    ) -> Result<Value> {
        self.ensure_ready()
            .await?
            .send_with_timeout(command, request_timeout)
            .await
    }

    /// Returns every entity state.
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call), plus [`Error::Json`] if the payload
    /// does not decode.
    pub async fn get_states(&self) -> Result<Vec<EntityState>> {
        decode(self.call(CoreCommand::GetStates).await?)
    }

    /// Returns the state of one entity, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `entity_id` is empty
    /// - Same as [`get_states`](Self::get_states)
    pub async fn get_state(&self, entity_id: &str) -> Result<Option<EntityState>> {
        if entity_id.trim().is_empty() {
            return Err(Error::invalid_argument("entity_id must not be empty"));
        }

        let states = self.get_states().await?;
        Ok(states.into_iter().find(|s| s.entity_id == entity_id))
    }

    /// Returns the core configuration.
    ///
    /// # Errors
    ///
    /// Same as [`get_states`](Self::get_states).
    pub async fn get_config(&self) -> Result<HassConfig> {
        decode(self.call(CoreCommand::GetConfig).await?)
    }

    /// Returns every service, grouped by domain.
    ///
    /// # Errors
    ///
    /// Same as [`get_states`](Self::get_states).
    pub async fn get_services(&self) -> Result<Services> {
        decode(self.call(CoreCommand::GetServices).await?)
    }

    /// Calls a service and returns the upstream acknowledgment.
    ///
    /// # Arguments
    ///
    /// * `domain` - e.g. `light`
    /// * `service` - e.g. `turn_on`
    /// * `service_data` - optional service fields
    /// * `target` - optional entities, devices or areas
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `domain` or `service` is empty
    /// - Same as [`call`](Self::call)
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        service_data: Option<Value>,
        target: Option<Target>,
    ) -> Result<Value> {
        if domain.trim().is_empty() || service.trim().is_empty() {
            return Err(Error::invalid_argument(
                "service calls need a domain and a service",
            ));
        }

        self.call(CoreCommand::CallService {
            domain: domain.to_string(),
            service: service.to_string(),
            service_data,
            target: target.filter(|t| !t.is_empty()),
        })
        .await
    }

    /// Fires a custom event on the event bus.
    ///
    /// One round trip for the acknowledgment; nothing is subscribed.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `event_type` is empty
    /// - Same as [`call`](Self::call)
    pub async fn fire_event(&self, event_type: &str, event_data: Option<Value>) -> Result<Value> {
        if event_type.trim().is_empty() {
            return Err(Error::invalid_argument("event_type must not be empty"));
        }

        self.call(CoreCommand::FireEvent {
            event_type: event_type.to_string(),
            event_data,
        })
        .await
    }

    /// Validates the configuration files.
    ///
    /// # Errors
    ///
    /// Same as [`get_states`](Self::get_states).
    pub async fn validate_config(&self) -> Result<ConfigCheck> {
        decode(self.call(CoreCommand::CheckConfig).await?)
    }

    /// Sends an application-level ping and returns the round-trip time.
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call).
    pub async fn ping(&self) -> Result<Duration> {
        let connection = self.ensure_ready().await?;
        let started = Instant::now();
        connection.send(CoreCommand::Ping).await?;
        Ok(started.elapsed())
    }
}

// ============================================================================
// Session - Subscriptions
// ============================================================================

impl Session {
    /// Subscribes to bus events, optionally of one type only.
    ///
    /// The callback runs on the connection's event loop, once per event, in
    /// arrival order. Payloads that do not decode as [`Event`] are logged and
    /// skipped.
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call); a failed subscribe registers nothing.
    pub async fn subscribe_events<F>(
        &self,
        event_type: Option<&str>,
        callback: F,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let filter = SubscriptionFilter::Events {
            event_type: event_type.map(str::to_string),
        };

        let decoded = move |payload: Value| match serde_json::from_value::<Event>(payload) {
            Ok(event) => callback(event),
            Err(e) => warn!(error = %e, "Dropping undecodable event"),
        };

        self.ensure_ready()
            .await?
            .subscribe(filter, Box::new(decoded))
            .await
    }

    /// Subscribes to an automation trigger.
    ///
    /// The callback receives the raw trigger payload (`{"variables": ..}`).
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call); a failed subscribe registers nothing.
    pub async fn subscribe_trigger<F>(&self, trigger: Value, callback: F) -> Result<SubscriptionHandle>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        if !trigger.is_object() && !trigger.is_array() {
            return Err(Error::invalid_argument(
                "trigger must be an object or a list of objects",
            ));
        }

        self.ensure_ready()
            .await?
            .subscribe(SubscriptionFilter::Trigger { trigger }, Box::new(callback))
            .await
    }

    /// Collects events for `window`, then unsubscribes.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe_events`](Self::subscribe_events), plus errors from
    /// the final unsubscribe.
    pub async fn collect_events(
        &self,
        event_type: Option<&str>,
        window: Duration,
    ) -> Result<Vec<Event>> {
        let collected = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let collected = Arc::clone(&collected);
            self.subscribe_events(event_type, move |event| collected.lock().push(event))
                .await?
        };

        tokio::time::sleep(window).await;
        handle.unsubscribe().await?;

        let events = mem::take(&mut *collected.lock());
        debug!(count = events.len(), ?event_type, "Collected events");
        Ok(events)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Decodes a result payload into `T`.
fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(Error::from)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::transport::{ChannelConnector, Upstream, UpstreamAcceptor};

    fn session_with(connector: ChannelConnector) -> Session {
        Session::builder()
            .token("test-token")
            .keepalive_interval(None)
            .request_timeout(Some(Duration::from_secs(5)))
            .connector(connector)
            .build()
            .expect("session")
    }

    async fn accept_authenticated(acceptor: &mut UpstreamAcceptor) -> Upstream {
        let mut upstream = acceptor.accept().await.expect("upstream");
        upstream
            .send_json(&json!({ "type": "auth_required", "ha_version": "2024.1.0" }))
            .expect("greet");
        upstream.recv_json().await.expect("auth");
        upstream
            .send_json(&json!({ "type": "auth_ok", "ha_version": "2024.1.0" }))
            .expect("auth ok");
        upstream
    }

    async fn answer(upstream: &mut Upstream, result: Value) -> Value {
        let request = upstream.recv_json().await.expect("request");
        upstream
            .send_json(&json!({ "id": request["id"], "type": "result", "success": true, "result": result }))
            .expect("result");
        request
    }

    #[test]
    fn test_decode_mismatch_is_json_error() {
        let result: Result<ConfigCheck> = decode(json!([1, 2, 3]));
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[tokio::test]
    async fn test_get_state_filters_states() {
        let (connector, mut acceptor) = ChannelConnector::new();
        let session = session_with(connector);

        let server = tokio::spawn(async move {
            let mut upstream = accept_authenticated(&mut acceptor).await;
            let states = json!([
                { "entity_id": "light.kitchen", "state": "on" },
                { "entity_id": "sensor.door", "state": "closed" }
            ]);
            answer(&mut upstream, states.clone()).await;
            answer(&mut upstream, states).await;
            upstream
        });

        let door = session.get_state("sensor.door").await.expect("state");
        assert_eq!(door.map(|s| s.state), Some("closed".to_string()));

        let missing = session.get_state("sensor.nope").await.expect("state");
        assert!(missing.is_none());

        let _upstream = server.await.expect("server");
        assert_eq!(session.ha_version().as_deref(), Some("2024.1.0"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_do_not_connect() {
        let (connector, _acceptor) = ChannelConnector::new();
        let session = session_with(connector);

        assert!(matches!(
            session.get_state("").await,
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            session.call_service("light", " ", None, None).await,
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            session.fire_event("", None).await,
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            session.subscribe_trigger(json!("nope"), |_| {}).await,
            Err(Error::InvalidArgument { .. })
        ));
        assert_eq!(session.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_call_service_payload() {
        let (connector, mut acceptor) = ChannelConnector::new();
        let session = session_with(connector);

        let server = tokio::spawn(async move {
            let mut upstream = accept_authenticated(&mut acceptor).await;
            answer(&mut upstream, json!({ "context": { "id": "c1" } })).await
        });

        let ack = session
            .call_service(
                "light",
                "turn_on",
                Some(json!({ "brightness": 128 })),
                Some(Target::entity("light.kitchen")),
            )
            .await
            .expect("ack");
        assert_eq!(ack["context"]["id"], "c1");

        let sent = server.await.expect("server");
        assert_eq!(sent["type"], "call_service");
        assert_eq!(sent["domain"], "light");
        assert_eq!(sent["service"], "turn_on");
        assert_eq!(sent["service_data"], json!({ "brightness": 128 }));
        assert_eq!(sent["target"]["entity_id"], json!(["light.kitchen"]));
    }

    #[tokio::test]
    async fn test_close_then_reconnect() {
        let (connector, mut acceptor) = ChannelConnector::new();
        let session = session_with(connector);

        let server = tokio::spawn(async move {
            let first = accept_authenticated(&mut acceptor).await;
            let second = accept_authenticated(&mut acceptor).await;
            (first, second)
        });

        session.connect().await.expect("first connect");
        assert!(session.is_connected());

        session.close();
        assert!(!session.is_connected());

        session.connect().await.expect("second connect");
        assert!(session.is_connected());
        assert_eq!(session.connect_attempts(), 2);

        let _ = server.await.expect("server");
    }

    #[tokio::test]
    async fn test_close_during_handshake_fails_waiters() {
        let (connector, mut acceptor) = ChannelConnector::new();
        let session = session_with(connector);

        let connecting = tokio::spawn({
            let session = session.clone();
            async move { session.connect().await }
        });

        // The handshake stalls until the greeting is sent.
        let upstream = acceptor.accept().await.expect("upstream");
        session.close();

        assert!(matches!(
            connecting.await.expect("task"),
            Err(Error::ConnectionClosed)
        ));
        assert!(!session.is_connected());
        drop(upstream);
    }

    #[tokio::test]
    async fn test_collect_events() {
        let (connector, mut acceptor) = ChannelConnector::new();
        let session = session_with(connector);

        let server = tokio::spawn(async move {
            let mut upstream = accept_authenticated(&mut acceptor).await;
            let subscribe = answer(&mut upstream, Value::Null).await;
            assert_eq!(subscribe["event_type"], "custom_event");

            for n in 0..2 {
                upstream
                    .send_json(&json!({
                        "id": subscribe["id"],
                        "type": "event",
                        "event": { "event_type": "custom_event", "data": { "n": n } }
                    }))
                    .expect("event");
            }

            let unsubscribe = answer(&mut upstream, Value::Null).await;
            assert_eq!(unsubscribe["subscription"], subscribe["id"]);
            upstream
        });

        let events = session
            .collect_events(Some("custom_event"), Duration::from_millis(50))
            .await
            .expect("events");

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].data["n"], 1);
        let _upstream = server.await.expect("server");
    }
}
