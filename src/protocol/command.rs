//! Outbound command payloads.
//!
//! Commands serialize to the body of a frame; the correlation `id` is added
//! by [`Request`](super::Request) when the command is sent.
//!
//! # Command Kinds
//!
//! | Enum | Commands |
//! |------|----------|
//! | [`CoreCommand`] | `get_states`, `get_config`, `get_services`, `call_service`, `fire_event`, `core/check_config`, `ping` |
//! | [`SubscriptionCommand`] | `subscribe_events`, `subscribe_trigger`, `unsubscribe_events` |
//! | [`Command::Custom`] | any other JSON object with a `type` field |

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;

use super::types::Target;

// ============================================================================
// Command Wrapper
// ============================================================================

/// All commands the session can send.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Command {
    /// Read and service commands.
    Core(CoreCommand),
    /// Subscription management commands.
    Subscription(SubscriptionCommand),
    /// Caller-built command object, see [`Command::custom`].
    Custom(CustomCommand),
}

impl Command {
    /// Builds a command from an arbitrary JSON object.
    ///
    /// A caller-supplied `id` is removed; ids are allocated per connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `payload` is not an object or
    /// has no string `type` field.
    pub fn custom(payload: Value) -> Result<Self> {
        let Value::Object(mut map) = payload else {
            return Err(Error::invalid_argument("command payload must be a JSON object"));
        };

        if !map.get("type").is_some_and(Value::is_string) {
            return Err(Error::invalid_argument(
                "command payload requires a string \"type\" field",
            ));
        }

        map.remove("id");
        Ok(Self::Custom(CustomCommand(map)))
    }

    /// Returns the command's `type` string, used for logging.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Core(command) => command.kind(),
            Self::Subscription(command) => command.kind(),
            Self::Custom(command) => command.kind(),
        }
    }
}

impl From<CoreCommand> for Command {
    #[inline]
    fn from(command: CoreCommand) -> Self {
        Self::Core(command)
    }
}

impl From<SubscriptionCommand> for Command {
    #[inline]
    fn from(command: SubscriptionCommand) -> Self {
        Self::Subscription(command)
    }
}

/// A validated caller-built command.
///
/// Only [`Command::custom`] constructs one, so the payload always has a
/// string `type` and never an `id` of its own.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct CustomCommand(Map<String, Value>);

impl CustomCommand {
    /// Returns the wire `type` string.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.0.get("type").and_then(Value::as_str).unwrap_or("custom")
    }

    /// Returns the command fields.
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

// ============================================================================
// Core Commands
// ============================================================================

/// One-shot commands answered by a single result frame.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum CoreCommand {
    /// Dump every entity state.
    #[serde(rename = "get_states")]
    GetStates,

    /// Read the core configuration.
    #[serde(rename = "get_config")]
    GetConfig,

    /// List every registered service by domain.
    #[serde(rename = "get_services")]
    GetServices,

    /// Invoke a service.
    #[serde(rename = "call_service")]
    CallService {
        /// Service domain, e.g. `light`.
        domain: String,
        /// Service name, e.g. `turn_on`.
        service: String,
        /// Service data.
        #[serde(skip_serializing_if = "Option::is_none")]
        service_data: Option<Value>,
        /// Entities, devices or areas to act on.
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<Target>,
    },

    /// Fire a custom event on the event bus.
    #[serde(rename = "fire_event")]
    FireEvent {
        /// Event type to fire.
        event_type: String,
        /// Event payload.
        #[serde(skip_serializing_if = "Option::is_none")]
        event_data: Option<Value>,
    },

    /// Validate the configuration files.
    #[serde(rename = "core/check_config")]
    CheckConfig,

    /// Application-level heartbeat, answered by a `pong` frame.
    #[serde(rename = "ping")]
    Ping,
}

impl CoreCommand {
    /// Returns the wire `type` string.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GetStates => "get_states",
            Self::GetConfig => "get_config",
            Self::GetServices => "get_services",
            Self::CallService { .. } => "call_service",
            Self::FireEvent { .. } => "fire_event",
            Self::CheckConfig => "core/check_config",
            Self::Ping => "ping",
        }
    }
}

// ============================================================================
// Subscription Commands
// ============================================================================

/// Commands that open or close a standing subscription.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SubscriptionCommand {
    /// Subscribe to bus events, optionally of one type.
    #[serde(rename = "subscribe_events")]
    SubscribeEvents {
        /// Event type filter; all events when absent.
        #[serde(skip_serializing_if = "Option::is_none")]
        event_type: Option<String>,
    },

    /// Subscribe to an automation trigger.
    #[serde(rename = "subscribe_trigger")]
    SubscribeTrigger {
        /// Trigger configuration (platform, entity_id, ...).
        trigger: Value,
    },

    /// Cancel a subscription.
    #[serde(rename = "unsubscribe_events")]
    UnsubscribeEvents {
        /// Subscription to cancel.
        subscription: SubscriptionId,
    },
}

impl SubscriptionCommand {
    /// Returns the wire `type` string.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SubscribeEvents { .. } => "subscribe_events",
            Self::SubscribeTrigger { .. } => "subscribe_trigger",
            Self::UnsubscribeEvents { .. } => "unsubscribe_events",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
