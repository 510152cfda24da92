//! Authenticated connection and event loop.
//!
//! [`Connection::open`] performs the authentication handshake over a fresh
//! [`FramePair`] and then spawns a tokio task that owns both halves:
//!
//! - Outgoing commands from the public API, written one frame at a time
//! - Incoming frames, demultiplexed in arrival order
//! - Result/pong frames resolve the pending request with the same id
//! - Event frames go to the subscription with the same id
//!
//! When the loop ends, for whatever reason, every pending request fails with
//! [`Error::ConnectionClosed`] and every subscription is deactivated.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, to_string};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, interval_at, timeout};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{RequestId, SubscriptionId};
use crate::protocol::{AuthMessage, Command, CoreCommand, Frame, Request, SubscriptionCommand};

use super::connector::{FramePair, FrameSink, FrameStream};
use super::correlation::{Correlator, PendingKind, PendingRequest, Responder};
use super::subscription::{
    EventCallback, Subscription, SubscriptionFilter, SubscriptionHandle, SubscriptionRegistry,
};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for command execution.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for the authentication handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default keepalive ping interval.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Timing knobs for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Per-command timeout; `None` waits until the connection closes.
    pub request_timeout: Option<Duration>,
    /// Upper bound on the authentication handshake.
    pub handshake_timeout: Duration,
    /// Interval between keepalive pings; `None` disables them.
    pub keepalive_interval: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            keepalive_interval: Some(DEFAULT_KEEPALIVE_INTERVAL),
        }
    }
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write a request and track its response.
    Send {
        request: Request,
        kind: PendingKind,
        responder: Responder,
    },
    /// Drop a timed-out correlation entry.
    RemoveCorrelation(RequestId),
    /// Close the channel.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// An authenticated connection to the upstream.
///
/// Cheap to clone; all clones drive the same event loop. The loop stops on
/// [`shutdown`](Self::shutdown), when the upstream closes, or once every
/// clone (including those held by [`SubscriptionHandle`]s) is dropped.
#[derive(Clone)]
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Pending requests (shared with event loop).
    correlator: Arc<Correlator>,
    /// Live subscriptions (shared with event loop).
    subscriptions: Arc<SubscriptionRegistry>,
    /// Default per-command timeout.
    request_timeout: Option<Duration>,
    /// Version reported in `auth_ok`.
    ha_version: Option<Arc<str>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("ha_version", &self.ha_version)
            .field("pending", &self.pending_count())
            .field("subscriptions", &self.subscription_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Connection - Handshake
// ============================================================================

impl Connection {
    /// Authenticates over `pair` and starts the event loop.
    ///
    /// # Errors
    ///
    /// - [`Error::Authentication`] if the token is rejected
    /// - [`Error::ConnectionTimeout`] if the handshake exceeds its timeout
    /// - [`Error::Connection`] if the channel closes or misbehaves mid-handshake
    pub async fn open(pair: FramePair, access_token: &str, options: ConnectionOptions) -> Result<Self> {
        let FramePair {
            mut sink,
            mut stream,
        } = pair;

        let ha_version = timeout(
            options.handshake_timeout,
            Self::authenticate(&mut sink, &mut stream, access_token),
        )
        .await
        .map_err(|_| Error::connection_timeout(millis(options.handshake_timeout)))??;

        info!(ha_version = ha_version.as_deref().unwrap_or("unknown"), "Authenticated");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let correlator = Arc::new(Correlator::new());
        let subscriptions = Arc::new(SubscriptionRegistry::new());

        tokio::spawn(Self::run_event_loop(
            sink,
            stream,
            command_rx,
            Arc::clone(&correlator),
            Arc::clone(&subscriptions),
        ));

        let connection = Self {
            command_tx,
            correlator,
            subscriptions,
            request_timeout: options.request_timeout,
            ha_version: ha_version.map(Arc::from),
        };

        if let Some(every) = options.keepalive_interval.filter(|every| !every.is_zero()) {
            connection.spawn_keepalive(every);
        }

        Ok(connection)
    }

    /// Runs `auth_required` → `auth` → `auth_ok`.
    async fn authenticate(
        sink: &mut FrameSink,
        stream: &mut FrameStream,
        access_token: &str,
    ) -> Result<Option<String>> {
        match Self::next_handshake_frame(stream).await? {
            Frame::AuthRequired { ha_version } => {
                debug!(?ha_version, "Upstream requested authentication");
            }
            Frame::AuthInvalid { message } => return Err(Error::authentication(message)),
            other => {
                return Err(Error::connection(format!(
                    "expected auth_required, got {other:?}"
                )));
            }
        }

        sink.send(to_string(&AuthMessage::new(access_token))?).await?;

        match Self::next_handshake_frame(stream).await? {
            Frame::AuthOk { ha_version } => Ok(ha_version),
            Frame::AuthInvalid { message } => {
                warn!(%message, "Access token rejected");
                Err(Error::authentication(message))
            }
            other => Err(Error::connection(format!(
                "expected auth_ok, got {other:?}"
            ))),
        }
    }

    async fn next_handshake_frame(stream: &mut FrameStream) -> Result<Frame> {
        let text = stream
            .next()
            .await
            .ok_or_else(|| Error::connection("connection closed during authentication"))??;
        Frame::parse(&text)
    }
}

// ============================================================================
// Connection - Public API
// ============================================================================

impl Connection {
    /// Returns the upstream version reported during authentication.
    #[inline]
    #[must_use]
    pub fn ha_version(&self) -> Option<&str> {
        self.ha_version.as_deref()
    }

    /// Sends a command and waits for its result with the default timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the event loop has already stopped
    /// - [`Error::ConnectionClosed`] if the connection closes while waiting
    /// - [`Error::Remote`] if the upstream reports failure
    /// - [`Error::RequestTimeout`] if no result arrives in time
    pub async fn send(&self, command: impl Into<Command>) -> Result<Value> {
        self.send_with_timeout(command, self.request_timeout).await
    }

    /// Sends a command and waits for its result with a custom timeout.
    ///
    /// `None` waits until the result arrives or the connection closes.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_with_timeout(
        &self,
        command: impl Into<Command>,
        request_timeout: Option<Duration>,
    ) -> Result<Value> {
        let request = Request::new(self.correlator.next_id(), command);
        self.round_trip(request, PendingKind::Command, request_timeout)
            .await
    }

    /// Opens a subscription.
    ///
    /// The subscription is registered before the subscribe command is
    /// written, so no push frame that follows the acknowledgment is missed.
    /// If the command fails it is removed again and never reported.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn subscribe(
        &self,
        filter: SubscriptionFilter,
        callback: EventCallback,
    ) -> Result<SubscriptionHandle> {
        let request = Request::new(self.correlator.next_id(), filter.to_command());
        let subscription_id = SubscriptionId::from(request.id);
        let subscription = Arc::new(Subscription::new(subscription_id, filter, callback));

        self.subscriptions.insert(Arc::clone(&subscription));

        let outcome = self
            .round_trip(
                request,
                PendingKind::Subscribe(subscription_id),
                self.request_timeout,
            )
            .await;

        if let Err(e) = outcome {
            self.subscriptions.remove(subscription_id);
            debug!(%subscription_id, error = %e, "Subscribe failed");
            return Err(e);
        }

        Ok(SubscriptionHandle::new(subscription, self.clone()))
    }

    /// Cancels a subscription.
    ///
    /// The event loop deactivates the subscription when it processes the
    /// acknowledgment; if no acknowledgment can be obtained it is deactivated
    /// here instead. Unknown ids and a connection that is already gone are
    /// not errors.
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] if the upstream rejected the cancellation
    /// - [`Error::RequestTimeout`] if no acknowledgment arrived in time
    pub async fn unsubscribe(&self, subscription_id: SubscriptionId) -> Result<()> {
        if !self.subscriptions.contains(subscription_id) {
            trace!(%subscription_id, "Unsubscribe for inactive subscription");
            return Ok(());
        }

        let request = Request::new(
            self.correlator.next_id(),
            SubscriptionCommand::UnsubscribeEvents {
                subscription: subscription_id,
            },
        );

        let outcome = self
            .round_trip(
                request,
                PendingKind::Unsubscribe(subscription_id),
                self.request_timeout,
            )
            .await;

        self.subscriptions.remove(subscription_id);

        match outcome {
            Ok(_) | Err(Error::NotConnected | Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlator.len()
    }

    /// Returns the number of live subscriptions.
    #[inline]
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns `true` once the event loop has stopped.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// Shuts down the connection gracefully.
    ///
    /// Pending requests fail with [`Error::ConnectionClosed`]; subscriptions
    /// are deactivated.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Queues `request` and waits for its outcome.
    async fn round_trip(
        &self,
        request: Request,
        kind: PendingKind,
        request_timeout: Option<Duration>,
    ) -> Result<Value> {
        let request_id = request.id;
        let (responder, response_rx) = oneshot::channel();

        self.command_tx
            .send(ConnectionCommand::Send {
                request,
                kind,
                responder,
            })
            .map_err(|_| Error::NotConnected)?;

        let received = match request_timeout {
            Some(limit) => match timeout(limit, response_rx).await {
                Ok(received) => received,
                Err(_) => {
                    let _ = self
                        .command_tx
                        .send(ConnectionCommand::RemoveCorrelation(request_id));

                    return Err(Error::request_timeout(
                        request_id,
                        millis(limit),
                    ));
                }
            },
            None => response_rx.await,
        };

        received.map_err(|_| Error::ConnectionClosed)?
    }
}

// ============================================================================
// Connection - Keepalive
// ============================================================================

impl Connection {
    /// Pings every `every`; a ping left unanswered for a full interval shuts
    /// the connection down. Holds only a weak sender, so it never keeps the
    /// loop alive by itself.
    fn spawn_keepalive(&self, every: Duration) {
        let weak_tx = self.command_tx.downgrade();
        let correlator = Arc::clone(&self.correlator);
        let subscriptions = Arc::clone(&self.subscriptions);
        let ha_version = self.ha_version.clone();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);

            loop {
                ticker.tick().await;

                let Some(command_tx) = weak_tx.upgrade() else {
                    break;
                };
                let connection = Self {
                    command_tx,
                    correlator: Arc::clone(&correlator),
                    subscriptions: Arc::clone(&subscriptions),
                    request_timeout: Some(every),
                    ha_version: ha_version.clone(),
                };

                let started = Instant::now();
                match connection.send(CoreCommand::Ping).await {
                    Ok(_) => trace!(rtt_ms = millis(started.elapsed()), "Keepalive pong"),
                    Err(Error::NotConnected | Error::ConnectionClosed) => break,
                    Err(e) if e.is_timeout() => {
                        warn!(error = %e, "Keepalive ping unanswered, closing connection");
                        connection.shutdown();
                        break;
                    }
                    Err(e) => warn!(error = %e, "Keepalive ping failed"),
                }
            }

            trace!("Keepalive stopped");
        });
    }
}

// ============================================================================
// Connection - Event Loop
// ============================================================================

impl Connection {
    /// Event loop that owns both halves of the channel.
    async fn run_event_loop(
        mut sink: FrameSink,
        mut stream: FrameStream,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        correlator: Arc<Correlator>,
        subscriptions: Arc<SubscriptionRegistry>,
    ) {
        loop {
            tokio::select! {
                // Incoming frames from upstream
                frame = stream.next() => {
                    match frame {
                        Some(Ok(text)) => {
                            Self::handle_incoming_frame(&text, &correlator, &subscriptions);
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "Transport error");
                            break;
                        }

                        None => {
                            debug!("Upstream closed the connection");
                            break;
                        }
                    }
                }

                // Commands from the public API
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { request, kind, responder }) => {
                            Self::handle_send_command(
                                request,
                                kind,
                                responder,
                                &mut sink,
                                &correlator,
                                &subscriptions,
                            ).await;
                        }

                        Some(ConnectionCommand::RemoveCorrelation(request_id)) => {
                            if let Some(pending) = correlator.take(request_id) {
                                debug!(%request_id, "Removed timed-out correlation");
                                Self::settle(pending, Err(Error::ConnectionClosed), &subscriptions);
                            }
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = sink.close().await;
                            break;
                        }

                        None => {
                            debug!("All connection handles dropped");
                            let _ = sink.close().await;
                            break;
                        }
                    }
                }
            }
        }

        // Refuse new work, then fail whatever is still queued or pending.
        command_rx.close();
        while let Ok(command) = command_rx.try_recv() {
            if let ConnectionCommand::Send { kind, responder, .. } = command {
                Self::settle(
                    PendingRequest::new(responder, kind),
                    Err(Error::ConnectionClosed),
                    &subscriptions,
                );
            }
        }

        Self::fail_pending_requests(&correlator, &subscriptions);

        debug!("Event loop terminated");
    }

    /// Handles one incoming text frame.
    fn handle_incoming_frame(
        text: &str,
        correlator: &Correlator,
        subscriptions: &SubscriptionRegistry,
    ) {
        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, frame = %text, "Failed to parse incoming frame");
                return;
            }
        };

        match frame {
            Frame::Result(result) => match correlator.take(result.id) {
                Some(pending) => {
                    trace!(
                        request_id = %result.id,
                        success = result.success,
                        elapsed_ms = millis(pending.elapsed()),
                        "Result received"
                    );
                    Self::settle(pending, result.into_result(), subscriptions);
                }
                None => warn!(request_id = %result.id, "Result for unknown request"),
            },

            Frame::Pong { id } => match correlator.take(id) {
                Some(pending) => Self::settle(pending, Ok(Value::Null), subscriptions),
                None => warn!(request_id = %id, "Pong for unknown request"),
            },

            Frame::Event(event) => subscriptions.dispatch(event),

            Frame::AuthRequired { .. } | Frame::AuthOk { .. } | Frame::AuthInvalid { .. } => {
                warn!("Unexpected auth frame after handshake");
            }

            Frame::Unknown { kind } => debug!(%kind, "Ignoring frame of unknown type"),
        }
    }

    /// Writes one request, registering it first so its result can't race it.
    async fn handle_send_command(
        request: Request,
        kind: PendingKind,
        responder: Responder,
        sink: &mut FrameSink,
        correlator: &Correlator,
        subscriptions: &SubscriptionRegistry,
    ) {
        let request_id = request.id;
        let pending = PendingRequest::new(responder, kind);

        let json = match to_string(&request) {
            Ok(json) => json,
            Err(e) => {
                Self::settle(pending, Err(Error::Json(e)), subscriptions);
                return;
            }
        };

        correlator.register(request_id, pending);

        if let Err(e) = sink.send(json).await {
            if let Some(pending) = correlator.take(request_id) {
                Self::settle(pending, Err(Error::connection(e.to_string())), subscriptions);
            }
            return;
        }

        trace!(%request_id, kind = request.command.kind(), "Request sent");
    }

    /// Applies a pending request's side effects, then answers its caller.
    ///
    /// A failed subscribe drops its subscription; an unsubscribe drops it
    /// whatever the outcome. Both happen before the caller is woken.
    fn settle(pending: PendingRequest, outcome: Result<Value>, subscriptions: &SubscriptionRegistry) {
        match pending.kind() {
            PendingKind::Subscribe(id) if outcome.is_err() => {
                subscriptions.remove(id);
            }
            PendingKind::Unsubscribe(id) => {
                subscriptions.remove(id);
            }
            _ => {}
        }

        pending.resolve(outcome);
    }

    /// Fails all pending requests with ConnectionClosed and deactivates
    /// every subscription.
    fn fail_pending_requests(correlator: &Correlator, subscriptions: &SubscriptionRegistry) {
        let pending = correlator.drain();
        let count = pending.len();

        for request in pending {
            request.resolve(Err(Error::ConnectionClosed));
        }

        let deactivated = subscriptions.clear();

        if count > 0 || deactivated > 0 {
            debug!(count, deactivated, "Failed pending requests on shutdown");
        }
    }
}

/// Milliseconds in `duration`, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;
    use serde_json::json;
    use url::Url;

    use crate::transport::channel::{ChannelConnector, Upstream};
    use crate::transport::connector::Connector;

    const TOKEN: &str = "test-token";

    fn quiet_options() -> ConnectionOptions {
        ConnectionOptions {
            request_timeout: Some(Duration::from_secs(5)),
            handshake_timeout: Duration::from_secs(5),
            keepalive_interval: None,
        }
    }

    async fn open_pair(options: ConnectionOptions) -> (Connection, Upstream) {
        let (connector, mut acceptor) = ChannelConnector::new();
        let url = Url::parse("ws://localhost:8123/api/websocket").expect("url");
        let pair = connector.connect(&url).await.expect("connect");
        let mut upstream = acceptor.accept().await.expect("upstream");

        let server = async {
            upstream
                .send_json(&json!({ "type": "auth_required", "ha_version": "2024.1.0" }))
                .expect("greet");
            let auth = upstream.recv_json().await.expect("auth frame");
            assert_eq!(auth, json!({ "type": "auth", "access_token": TOKEN }));
            upstream
                .send_json(&json!({ "type": "auth_ok", "ha_version": "2024.1.0" }))
                .expect("auth ok");
        };

        let (connection, ()) = tokio::join!(Connection::open(pair, TOKEN, options), server);
        (connection.expect("open"), upstream)
    }

    #[test]
    fn test_default_options() {
        let options = ConnectionOptions::default();
        assert_eq!(options.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(options.handshake_timeout.as_secs(), 30);
        assert_eq!(options.keepalive_interval, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_handshake_reports_version() {
        let (connection, _upstream) = open_pair(quiet_options()).await;
        assert_eq!(connection.ha_version(), Some("2024.1.0"));
        assert!(!connection.is_closed());
    }

    #[tokio::test]
    async fn test_auth_invalid() {
        let (connector, mut acceptor) = ChannelConnector::new();
        let url = Url::parse("ws://localhost:8123/api/websocket").expect("url");
        let pair = connector.connect(&url).await.expect("connect");
        let mut upstream = acceptor.accept().await.expect("upstream");

        let server = async {
            upstream
                .send_json(&json!({ "type": "auth_required" }))
                .expect("greet");
            upstream.recv().await.expect("auth frame");
            upstream
                .send_json(&json!({ "type": "auth_invalid", "message": "Invalid access token or password" }))
                .expect("reject");
        };

        let (result, ()) = tokio::join!(Connection::open(pair, "bad", quiet_options()), server);
        match result {
            Err(Error::Authentication { message }) => {
                assert_eq!(message, "Invalid access token or password");
            }
            other => panic!("expected authentication error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let (connector, mut acceptor) = ChannelConnector::new();
        let url = Url::parse("ws://localhost:8123/api/websocket").expect("url");
        let pair = connector.connect(&url).await.expect("connect");
        let _silent = acceptor.accept().await.expect("upstream");

        let options = ConnectionOptions {
            handshake_timeout: Duration::from_millis(50),
            ..quiet_options()
        };

        let result = Connection::open(pair, TOKEN, options).await;
        assert!(matches!(result, Err(Error::ConnectionTimeout { timeout_ms: 50 })));
    }

    #[tokio::test]
    async fn test_closed_during_handshake() {
        let (connector, mut acceptor) = ChannelConnector::new();
        let url = Url::parse("ws://localhost:8123/api/websocket").expect("url");
        let pair = connector.connect(&url).await.expect("connect");
        acceptor.accept().await.expect("upstream").close();

        let result = Connection::open(pair, TOKEN, quiet_options()).await;
        assert!(matches!(result, Err(Error::Connection { .. })));
    }

    #[tokio::test]
    async fn test_command_round_trip() {
        let (connection, mut upstream) = open_pair(quiet_options()).await;

        let call = tokio::spawn({
            let connection = connection.clone();
            async move { connection.send(CoreCommand::GetConfig).await }
        });

        let sent = upstream.recv_json().await.expect("command");
        assert_eq!(sent, json!({ "id": 1, "type": "get_config" }));

        upstream
            .send_json(&json!({ "id": 1, "type": "result", "success": true, "result": { "version": "2024.1" } }))
            .expect("result");

        let result = call.await.expect("task").expect("success");
        assert_eq!(result, json!({ "version": "2024.1" }));
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_error() {
        let (connection, mut upstream) = open_pair(quiet_options()).await;

        let call = tokio::spawn({
            let connection = connection.clone();
            async move {
                connection
                    .send(CoreCommand::CallService {
                        domain: "light".into(),
                        service: "explode".into(),
                        service_data: None,
                        target: None,
                    })
                    .await
            }
        });

        let sent = upstream.recv_json().await.expect("command");
        upstream
            .send_json(&json!({
                "id": sent["id"],
                "type": "result",
                "success": false,
                "error": { "code": "not_found", "message": "Service light.explode not found." }
            }))
            .expect("result");

        match call.await.expect("task") {
            Err(Error::Remote { code, .. }) => assert_eq!(code, "not_found"),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_timeout_then_late_result_is_ignored() {
        let (connection, mut upstream) = open_pair(quiet_options()).await;

        let result = connection
            .send_with_timeout(CoreCommand::GetStates, Some(Duration::from_millis(30)))
            .await;
        assert!(matches!(result, Err(Error::RequestTimeout { timeout_ms: 30, .. })));

        let sent = upstream.recv_json().await.expect("command");
        upstream
            .send_json(&json!({ "id": sent["id"], "type": "result", "success": true, "result": [] }))
            .expect("late result");

        // The connection keeps working after the late frame.
        let ping = tokio::spawn({
            let connection = connection.clone();
            async move { connection.send(CoreCommand::Ping).await }
        });
        let sent = upstream.recv_json().await.expect("ping");
        assert_eq!(sent["type"], "ping");
        upstream
            .send_json(&json!({ "id": sent["id"], "type": "pong" }))
            .expect("pong");

        assert_eq!(ping.await.expect("task").expect("pong"), Value::Null);
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_upstream_close_fails_pending() {
        let (connection, mut upstream) = open_pair(quiet_options()).await;

        let calls: Vec<_> = (0..3)
            .map(|_| {
                let connection = connection.clone();
                tokio::spawn(async move { connection.send(CoreCommand::GetStates).await })
            })
            .collect();

        for _ in 0..3 {
            upstream.recv().await.expect("command");
        }
        upstream.close();

        for call in calls {
            assert!(matches!(call.await.expect("task"), Err(Error::ConnectionClosed)));
        }

        // Give the loop a moment to close the command channel.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(connection.is_closed());
        assert!(matches!(
            connection.send(CoreCommand::GetConfig).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_subscription_lifecycle() {
        let (connection, mut upstream) = open_pair(quiet_options()).await;
        let seen = Arc::new(Mutex::new(Vec::new()));

        let subscribe = tokio::spawn({
            let connection = connection.clone();
            let seen = Arc::clone(&seen);
            async move {
                connection
                    .subscribe(
                        SubscriptionFilter::Events {
                            event_type: Some("state_changed".into()),
                        },
                        Box::new(move |event| seen.lock().push(event)),
                    )
                    .await
            }
        });

        let sent = upstream.recv_json().await.expect("subscribe");
        assert_eq!(sent["type"], "subscribe_events");
        let id = sent["id"].as_u64().expect("id");
        upstream
            .send_json(&json!({ "id": id, "type": "result", "success": true, "result": null }))
            .expect("ack");
        let handle = subscribe.await.expect("task").expect("subscribed");
        assert_eq!(handle.id(), SubscriptionId::new(id));

        for n in 0..3 {
            upstream
                .send_json(&json!({ "id": id, "type": "event", "event": { "n": n } }))
                .expect("event");
        }

        let unsubscribe = tokio::spawn(handle.unsubscribe());
        let sent = upstream.recv_json().await.expect("unsubscribe");
        assert_eq!(sent["type"], "unsubscribe_events");
        assert_eq!(sent["subscription"], id);
        upstream
            .send_json(&json!({ "id": sent["id"], "type": "result", "success": true, "result": null }))
            .expect("ack");
        unsubscribe.await.expect("task").expect("unsubscribed");

        upstream
            .send_json(&json!({ "id": id, "type": "event", "event": { "n": 99 } }))
            .expect("late event");

        // Round trip a ping so the late event has been processed.
        let ping = tokio::spawn({
            let connection = connection.clone();
            async move { connection.send(CoreCommand::Ping).await }
        });
        let sent = upstream.recv_json().await.expect("ping");
        upstream
            .send_json(&json!({ "id": sent["id"], "type": "pong" }))
            .expect("pong");
        ping.await.expect("task").expect("pong");

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2], json!({ "n": 2 }));
        assert_eq!(connection.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_subscribe_is_not_registered() {
        let (connection, mut upstream) = open_pair(quiet_options()).await;

        let subscribe = tokio::spawn({
            let connection = connection.clone();
            async move {
                connection
                    .subscribe(
                        SubscriptionFilter::Trigger {
                            trigger: json!({ "platform": "bogus" }),
                        },
                        Box::new(|_| {}),
                    )
                    .await
            }
        });

        let sent = upstream.recv_json().await.expect("subscribe");
        upstream
            .send_json(&json!({
                "id": sent["id"],
                "type": "result",
                "success": false,
                "error": { "code": "invalid_format", "message": "Invalid platform" }
            }))
            .expect("reject");

        assert!(matches!(
            subscribe.await.expect("task"),
            Err(Error::Remote { .. })
        ));
        assert_eq!(connection.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_keepalive_closes_unresponsive_connection() {
        let options = ConnectionOptions {
            keepalive_interval: Some(Duration::from_millis(20)),
            ..quiet_options()
        };
        let (connection, mut upstream) = open_pair(options).await;

        let ping = upstream.recv_json().await.expect("keepalive ping");
        assert_eq!(ping["type"], "ping");

        // Never answer; the keepalive gives up after one interval.
        tokio::time::timeout(Duration::from_secs(2), async {
            while !connection.is_closed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("connection closed by keepalive");
    }

    #[tokio::test]
    async fn test_zero_keepalive_sends_no_pings() {
        let options = ConnectionOptions {
            keepalive_interval: Some(Duration::ZERO),
            ..quiet_options()
        };
        let (connection, mut upstream) = open_pair(options).await;

        let next = tokio::time::timeout(Duration::from_millis(50), upstream.recv()).await;
        assert!(next.is_err(), "no ping expected");
        assert!(!connection.is_closed());
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_dropping_all_handles_stops_loop() {
        let (connection, mut upstream) = open_pair(quiet_options()).await;
        drop(connection);

        let next = tokio::time::timeout(Duration::from_secs(2), upstream.recv())
            .await
            .expect("loop ended");
        assert!(next.is_none());
    }
}
