//! Outbound message types.
//!
//! Every command leaves as a [`Request`]: the command body with the
//! connection-unique correlation `id` merged in. The single exception is the
//! [`AuthMessage`], which is sent once, before any id is allocated.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;

use crate::identifiers::RequestId;

use super::Command;

// ============================================================================
// Request
// ============================================================================

/// A correlated command frame.
///
/// # Format
///
/// ```json
/// { "id": 1, "type": "get_config" }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Correlation identifier echoed by the matching result frame.
    pub id: RequestId,

    /// Command type and fields.
    #[serde(flatten)]
    pub command: Command,
}

impl Request {
    /// Creates a request with the given correlation id.
    #[inline]
    #[must_use]
    pub fn new(id: RequestId, command: impl Into<Command>) -> Self {
        Self {
            id,
            command: command.into(),
        }
    }
}

// ============================================================================
// AuthMessage
// ============================================================================

/// The authentication frame sent in reply to `auth_required`.
///
/// # Format
///
/// ```json
/// { "type": "auth", "access_token": "..." }
/// ```
#[derive(Clone, Serialize)]
pub struct AuthMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    access_token: &'a str,
}

impl<'a> AuthMessage<'a> {
    /// Creates an auth frame for a long-lived access token.
    #[inline]
    #[must_use]
    pub fn new(access_token: &'a str) -> Self {
        Self {
            kind: "auth",
            access_token,
        }
    }
}

impl std::fmt::Debug for AuthMessage<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMessage")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
