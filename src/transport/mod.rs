//! Frame transport, correlation and subscription multiplexing.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                          ┌──────────────────┐
//! │  Connection      │      FramePair           │  Upstream        │
//! │                  │  (one JSON per message)  │  (Home Assistant │
//! │  Correlator      │◄────────────────────────►│   WebSocket API) │
//! │  Subscriptions   │                          │                  │
//! └──────────────────┘                          └──────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. [`Connector::connect`] - Open the frame channel
//! 2. [`Connection::open`] - `auth_required` → `auth` → `auth_ok`
//! 3. [`Connection::send`] / [`Connection::subscribe`] - Correlated traffic
//! 4. [`Connection::shutdown`] - Fail pending requests, deactivate subscriptions
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connector` | `Connector` seam and the tokio-tungstenite implementation |
//! | `channel` | In-memory connector driven by the caller |
//! | `connection` | Handshake, event loop and keepalive |
//! | `subscription` | Subscription registry and handles |

// ============================================================================
// Submodules
// ============================================================================

/// In-memory frame channel.
pub mod channel;

/// Authenticated connection and event loop.
pub mod connection;

/// Frame channel seam.
pub mod connector;

/// Pending-request table.
mod correlation;

/// Subscription registry.
pub mod subscription;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{ChannelConnector, Upstream, UpstreamAcceptor};
pub use connection::{
    Connection, ConnectionOptions, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_KEEPALIVE_INTERVAL,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use connector::{Connector, FramePair, FrameSink, FrameStream, WsConnector};
pub use subscription::{EventCallback, SubscriptionFilter, SubscriptionHandle};
