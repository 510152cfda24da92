//! Low-level frame transport seam.
//!
//! The session never touches a socket directly. A [`Connector`] opens the
//! channel and hands back a text-frame sink and stream; the connection layer
//! only ever sees whole frames, one JSON object per message.
//!
//! [`WsConnector`] is the production implementation on top of
//! `tokio-tungstenite`.

// ============================================================================
// Imports
// ============================================================================

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt, stream};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// Outbound half: accepts one text frame per item.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// Inbound half: yields one text frame per item, ends when the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Both halves of an open channel.
pub struct FramePair {
    /// Outbound frames.
    pub sink: FrameSink,
    /// Inbound frames.
    pub stream: FrameStream,
}

impl FramePair {
    /// Bundles a sink and a stream.
    #[inline]
    #[must_use]
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Opens the underlying frame channel.
///
/// Called once per connection attempt; the session performs the
/// authentication handshake over the returned pair.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a channel to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] (or a wrapped transport error) if the
    /// endpoint is unreachable.
    async fn connect(&self, url: &Url) -> Result<FramePair>;
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for std::sync::Arc<C> {
    async fn connect(&self, url: &Url) -> Result<FramePair> {
        (**self).connect(url).await
    }
}

// ============================================================================
// WsConnector
// ============================================================================

/// WebSocket connector backed by `tokio-tungstenite`.
///
/// Text messages become frames; close ends the stream; ping/pong and binary
/// messages are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<FramePair> {
        debug!(%url, "Opening WebSocket");

        let (ws_stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::connection(format!("WebSocket connect to {url} failed: {e}")))?;

        info!(%url, status = %response.status(), "WebSocket connection established");

        let (ws_write, ws_read) = ws_stream.split();

        let sink = ws_write.with(|text: String| async move {
            Ok::<_, Error>(Message::Text(text.into()))
        });

        let stream = stream::unfold(ws_read, |mut ws_read| async move {
            loop {
                match ws_read.next().await? {
                    Ok(Message::Text(text)) => return Some((Ok(text.as_str().to_owned()), ws_read)),
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "WebSocket closed by remote");
                        return None;
                    }
                    Ok(other) => trace!(kind = ?other, "Ignoring non-text message"),
                    Err(e) => return Some((Err(Error::from(e)), ws_read)),
                }
            }
        });

        Ok(FramePair::new(Box::pin(sink), Box::pin(stream)))
    }
}

// ============================================================================
// Tests
// ============================================================================
