//! WebSocket protocol message types.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | `AuthMessage` | Local → Remote | One-time authentication |
//! | `Request` | Local → Remote | Correlated command |
//! | `Frame::Result` / `Frame::Pong` | Remote → Local | Command response |
//! | `Frame::Event` | Remote → Local | Subscription push |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Command payloads |
//! | `frame` | Inbound frame classification |
//! | `request` | Outbound request and auth frames |
//! | `types` | Decoded result payloads |

// ============================================================================
// Submodules
// ============================================================================

/// Command payloads.
pub mod command;

/// Inbound frame classification.
pub mod frame;

/// Outbound request and auth frames.
pub mod request;

/// Decoded result payloads.
pub mod types;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{Command, CoreCommand, CustomCommand, SubscriptionCommand};
pub use frame::{EventFrame, Frame, RemoteErrorDetail, ResultFrame};
pub use request::{AuthMessage, Request};
pub use types::{
    ConfigCheck, Context, EntityState, Event, HassConfig, ServiceDefinition, Services, Target,
};
