//! Session facade and its configuration.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Session`] | Connects on demand; commands, queries and subscriptions |
//! | [`SessionBuilder`] | Fluent configuration builder |
//! | [`SessionConfig`] | Validated configuration |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for session configuration.
pub mod builder;

/// Session facade.
pub mod core;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{DEFAULT_URL, ENV_TOKEN, ENV_URL, ENV_WEBSOCKET_URL, SessionBuilder, SessionConfig};
pub use self::core::Session;
