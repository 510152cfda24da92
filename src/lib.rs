//! Home Assistant WebSocket session - authenticated, correlated, multiplexed.
//!
//! This library keeps one authenticated WebSocket connection to a Home
//! Assistant instance and shares it between any number of concurrent
//! callers.
//!
//! # Architecture
//!
//! - **Session**: the public facade; connects on first use, single-flight
//! - **Connection**: owns the frame channel and its event loop
//! - **Correlator**: matches each result frame to the command with its id
//! - **Subscriptions**: routes push frames to the callback registered for them
//!
//! Key design principles:
//!
//! - Explicitly constructed sessions, no global client
//! - One JSON object per WebSocket message
//! - Inbound frames are processed one at a time, in arrival order
//! - Connection loss fails every pending command and deactivates every
//!   subscription; nothing is retried automatically
//!
//! # Quick Start
//!
//! ```no_run
//! use hass_session::{Result, Session, Target};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let session = Session::builder()
//!         .url("http://homeassistant.local:8123")
//!         .token("long-lived-access-token")
//!         .build()?;
//!
//!     session
//!         .call_service(
//!             "light",
//!             "turn_on",
//!             Some(json!({ "brightness": 200 })),
//!             Some(Target::entity("light.kitchen")),
//!         )
//!         .await?;
//!
//!     let states = session.get_states().await?;
//!     println!("{} entities", states.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`session`] | [`Session`] facade and [`SessionBuilder`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Commands, inbound frames and payload types |
//! | [`transport`] | Connectors, connection event loop, subscriptions |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for commands and subscriptions.
pub mod identifiers;

/// WebSocket protocol message types.
///
/// Outbound commands, inbound frame classification and decoded payloads.
pub mod protocol;

/// Session facade and configuration.
///
/// Use [`Session::builder()`] to create a configured session.
pub mod session;

/// Frame transport layer.
///
/// Connectors, the connection event loop and the subscription registry.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Session types
pub use session::{Session, SessionBuilder, SessionConfig};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{RequestId, SubscriptionId};

// Protocol types
pub use protocol::{
    Command, ConfigCheck, CoreCommand, CustomCommand, EntityState, Event, HassConfig, ServiceDefinition,
    Services, SubscriptionCommand, Target,
};

// Transport types
pub use transport::{
    ChannelConnector, Connection, ConnectionOptions, Connector, SubscriptionFilter,
    SubscriptionHandle, Upstream, UpstreamAcceptor, WsConnector,
};
