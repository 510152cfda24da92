//! In-memory frame transport.
//!
//! [`ChannelConnector`] implements [`Connector`] over tokio channels. Every
//! `connect()` produces an [`Upstream`], the remote end of the new channel,
//! delivered through [`UpstreamAcceptor::accept`]. The holder of the
//! `Upstream` plays the server: it reads what the session sends and pushes
//! frames back.
//!
//! # Example
//!
//! ```no_run
//! use hass_session::Session;
//! use hass_session::transport::ChannelConnector;
//!
//! # async fn example() -> hass_session::Result<()> {
//! let (connector, mut acceptor) = ChannelConnector::new();
//! let session = Session::builder()
//!     .token("test-token")
//!     .connector(connector)
//!     .build()?;
//!
//! tokio::spawn(async move {
//!     let mut upstream = acceptor.accept().await.expect("connect");
//!     upstream.send_json(&serde_json::json!({ "type": "auth_required" })).ok();
//!     // ... play the server ...
//! });
//!
//! session.connect().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{sink, stream};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

use super::connector::{Connector, FramePair};

// ============================================================================
// ChannelConnector
// ============================================================================

/// Connector whose remote ends are handed to an [`UpstreamAcceptor`].
#[derive(Debug)]
pub struct ChannelConnector {
    /// Delivers the remote end of each new channel.
    upstreams: mpsc::UnboundedSender<Upstream>,
    /// Number of `connect()` calls so far.
    connects: AtomicUsize,
    /// Artificial latency before each connect completes.
    delay: Option<Duration>,
}

impl ChannelConnector {
    /// Creates a connector and the acceptor receiving its remote ends.
    #[must_use]
    pub fn new() -> (Self, UpstreamAcceptor) {
        let (upstreams, rx) = mpsc::unbounded_channel();
        let connector = Self {
            upstreams,
            connects: AtomicUsize::new(0),
            delay: None,
        };
        (connector, UpstreamAcceptor { rx })
    }

    /// Delays every connect by `delay`.
    #[inline]
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns how many times `connect()` was called.
    #[inline]
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self, url: &Url) -> Result<FramePair> {
        let attempt = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(%url, attempt, "Opening in-memory channel");

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let (client_tx, from_client) = mpsc::unbounded_channel::<String>();
        let (to_client, client_rx) = mpsc::unbounded_channel::<String>();

        self.upstreams
            .send(Upstream {
                from_client,
                to_client,
            })
            .map_err(|_| Error::connection(format!("no upstream accepting at {url}")))?;

        let sink = sink::unfold(client_tx, |client_tx, frame: String| async move {
            client_tx.send(frame).map_err(|_| Error::ConnectionClosed)?;
            Ok::<_, Error>(client_tx)
        });

        let stream = stream::unfold(client_rx, |mut client_rx| async move {
            client_rx.recv().await.map(|frame| (Ok(frame), client_rx))
        });

        Ok(FramePair::new(Box::pin(sink), Box::pin(stream)))
    }
}

// ============================================================================
// UpstreamAcceptor
// ============================================================================

/// Receives the remote end of each channel opened by a [`ChannelConnector`].
///
/// Dropping the acceptor makes further connects fail with
/// [`Error::Connection`].
#[derive(Debug)]
pub struct UpstreamAcceptor {
    rx: mpsc::UnboundedReceiver<Upstream>,
}

impl UpstreamAcceptor {
    /// Waits for the next connect.
    ///
    /// Returns `None` once the connector is dropped.
    pub async fn accept(&mut self) -> Option<Upstream> {
        self.rx.recv().await
    }
}

// ============================================================================
// Upstream
// ============================================================================

/// The remote end of one in-memory channel.
///
/// Dropping it (or calling [`close`](Self::close)) ends the session's
/// inbound stream, which the session observes as a closed connection.
#[derive(Debug)]
pub struct Upstream {
    /// Frames sent by the session.
    from_client: mpsc::UnboundedReceiver<String>,
    /// Frames delivered to the session.
    to_client: mpsc::UnboundedSender<String>,
}

impl Upstream {
    /// Receives the next frame the session sent.
    ///
    /// Returns `None` once the session side has gone away.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Receives the next frame and parses it as JSON.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the session side has gone away
    /// - [`Error::Json`] if the frame is not JSON
    pub async fn recv_json(&mut self) -> Result<Value> {
        let frame = self.recv().await.ok_or(Error::ConnectionClosed)?;
        Ok(serde_json::from_str(&frame)?)
    }

    /// Pushes a raw text frame to the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the session stopped reading.
    pub fn send(&self, frame: impl Into<String>) -> Result<()> {
        self.to_client
            .send(frame.into())
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Pushes a JSON frame to the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the session stopped reading.
    pub fn send_json(&self, frame: &Value) -> Result<()> {
        self.send(frame.to_string())
    }

    /// Closes the channel from the remote side.
    pub fn close(self) {
        drop(self);
    }
}

// ============================================================================
// Tests
// ============================================================================
