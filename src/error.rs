//! Error types for the Home Assistant session.
//!
//! Every fallible operation returns [`Result<T>`] which uses [`Error`].
//! The session never retries on its own: each failure surfaces to the
//! immediate caller unchanged.
//!
//! # Usage
//!
//! ```ignore
//! use hass_session::{Error, Result, Session};
//!
//! async fn example(session: &Session) -> Result<()> {
//!     match session.get_config().await {
//!         Ok(config) => println!("version {}", config.version),
//!         Err(Error::Authentication { .. }) => eprintln!("token rejected"),
//!         Err(e) => return Err(e),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Construction | [`Error::MissingCredential`], [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::Authentication`], [`Error::NotConnected`], [`Error::ConnectionClosed`] |
//! | Command | [`Error::Remote`], [`Error::RequestTimeout`], [`Error::InvalidArgument`], [`Error::Protocol`] |
//! | External | [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Construction Errors
    // ========================================================================
    /// No access token was supplied.
    ///
    /// Fatal at construction time; never deferred to first use.
    #[error("Missing credential: {message}")]
    MissingCredential {
        /// What was missing and where it was looked up.
        message: String,
    },

    /// Configuration error.
    ///
    /// Returned when the endpoint URL or another setting is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport-level failure while connecting.
    ///
    /// The caller may retry `connect()`.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The authentication handshake did not finish in time.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The upstream rejected the access token.
    ///
    /// Not retryable without a new credential.
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Message supplied by the upstream.
        message: String,
    },

    /// A command was issued while no authenticated connection was usable.
    #[error("Not connected")]
    NotConnected,

    /// The connection closed while the operation was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Command Errors
    // ========================================================================
    /// The upstream reported that a command failed.
    #[error("Remote error [{code}]: {message}")]
    Remote {
        /// Upstream error code (e.g. `not_found`, `invalid_format`).
        code: String,
        /// Upstream error message.
        message: String,
    },

    /// No response arrived for a command within the configured window.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Invalid argument supplied by the caller.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// Protocol violation or unexpected frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a missing credential error.
    #[inline]
    pub fn missing_credential(message: impl Into<String>) -> Self {
        Self::MissingCredential {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates an authentication error.
    #[inline]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Creates a remote error.
    #[inline]
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Rebuilds an owned error from one shared between several waiters.
    ///
    /// Variants carrying only plain data are reproduced exactly; wrapped
    /// external errors collapse into [`Error::Connection`] with the same text.
    pub(crate) fn replicate(&self) -> Self {
        match self {
            Self::MissingCredential { message } => Self::missing_credential(message.clone()),
            Self::Config { message } => Self::config(message.clone()),
            Self::Connection { message } => Self::connection(message.clone()),
            Self::ConnectionTimeout { timeout_ms } => Self::connection_timeout(*timeout_ms),
            Self::Authentication { message } => Self::authentication(message.clone()),
            Self::NotConnected => Self::NotConnected,
            Self::ConnectionClosed => Self::ConnectionClosed,
            Self::Remote { code, message } => Self::remote(code.clone(), message.clone()),
            Self::RequestTimeout {
                request_id,
                timeout_ms,
            } => Self::request_timeout(*request_id, *timeout_ms),
            Self::InvalidArgument { message } => Self::invalid_argument(message.clone()),
            Self::Protocol { message } => Self::protocol(message.clone()),
            other => Self::connection(other.to_string()),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::NotConnected
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the upstream explicitly rejected a command.
    #[inline]
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry without changing configuration.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::NotConnected
                | Self::RequestTimeout { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
