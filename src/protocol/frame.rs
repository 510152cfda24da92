//! Inbound frame classification.
//!
//! Every text message from the upstream is exactly one JSON object. It is
//! classified by its `type` field; frames without one are classified by
//! shape (`success` → result, `event` → push).
//!
//! | Frame | Shape |
//! |-------|-------|
//! | [`Frame::AuthRequired`] | `{"type":"auth_required","ha_version":"…"}` |
//! | [`Frame::AuthOk`] | `{"type":"auth_ok","ha_version":"…"}` |
//! | [`Frame::AuthInvalid`] | `{"type":"auth_invalid","message":"…"}` |
//! | [`Frame::Result`] | `{"id":1,"type":"result","success":true,"result":…}` |
//! | [`Frame::Event`] | `{"id":7,"type":"event","event":…}` |
//! | [`Frame::Pong`] | `{"id":3,"type":"pong"}` |

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::{RequestId, SubscriptionId};

// ============================================================================
// Frame
// ============================================================================

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Server greeting; the client must authenticate next.
    AuthRequired {
        /// Upstream version, when reported.
        ha_version: Option<String>,
    },

    /// Token accepted.
    AuthOk {
        /// Upstream version, when reported.
        ha_version: Option<String>,
    },

    /// Token rejected.
    AuthInvalid {
        /// Rejection reason.
        message: String,
    },

    /// Response to a correlated command.
    Result(ResultFrame),

    /// Push notification for a subscription.
    Event(EventFrame),

    /// Response to a `ping` command.
    Pong {
        /// Correlation id of the ping.
        id: RequestId,
    },

    /// Any other frame type; ignored by the session.
    Unknown {
        /// The frame's `type`, or empty if absent.
        kind: String,
    },
}

/// A command result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultFrame {
    /// Correlation id of the command.
    pub id: RequestId,
    /// Whether the command succeeded.
    pub success: bool,
    /// Result payload on success (`null` when absent).
    pub result: Value,
    /// Error detail on failure.
    pub error: Option<RemoteErrorDetail>,
}

impl ResultFrame {
    /// Converts the frame into the caller-facing outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the upstream reported failure.
    pub fn into_result(self) -> Result<Value> {
        if self.success {
            return Ok(self.result);
        }

        let detail = self.error.unwrap_or_default();
        Err(Error::remote(
            detail.code.unwrap_or_else(|| "unknown_error".to_string()),
            detail.message.unwrap_or_else(|| "command failed".to_string()),
        ))
    }
}

/// Upstream error detail on a failed result.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RemoteErrorDetail {
    /// Error code, e.g. `not_found`.
    #[serde(default)]
    pub code: Option<String>,
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
}

impl RemoteErrorDetail {
    /// Reads an `error` field of any shape.
    ///
    /// An object contributes its string `code` and `message`; a bare string
    /// becomes the message; anything else is kept as its JSON text.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => {
                let field = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
                Self {
                    code: field("code"),
                    message: field("message"),
                }
            }
            Value::String(message) => Self {
                code: None,
                message: Some(message),
            },
            other => Self {
                code: None,
                message: Some(other.to_string()),
            },
        }
    }
}

/// A push frame for a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFrame {
    /// Subscription the push belongs to.
    pub subscription: SubscriptionId,
    /// Event payload.
    pub event: Value,
}

// ============================================================================
// Parsing
// ============================================================================

/// The fields of an inbound frame the classifier looks at.
///
/// Fields are read leniently: a value of an unexpected shape counts as
/// absent, so one odd field never hides the frame's `id`.
#[derive(Debug, Default)]
struct RawFrame {
    kind: Option<String>,
    id: Option<u64>,
    success: Option<bool>,
    has_success: bool,
    result: Option<Value>,
    error: Option<Value>,
    event: Option<Value>,
    subscription: Option<u64>,
    message: Option<String>,
    ha_version: Option<String>,
}

impl RawFrame {
    fn from_object(mut map: Map<String, Value>) -> Self {
        let string = |value: Option<Value>| match value {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };

        Self {
            kind: string(map.remove("type")),
            id: map.get("id").and_then(Value::as_u64),
            success: map.get("success").and_then(Value::as_bool),
            has_success: map.contains_key("success"),
            result: map.remove("result"),
            error: map.remove("error").filter(|value| !value.is_null()),
            event: map.remove("event"),
            subscription: map.get("subscription").and_then(Value::as_u64),
            message: string(map.remove("message")),
            ha_version: string(map.remove("ha_version")),
        }
    }
}

impl Frame {
    /// Parses and classifies one text message.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the text is not a single JSON value
    /// - [`Error::Protocol`] if the value is not an object, or a result,
    ///   event or pong lacks its id
    pub fn parse(text: &str) -> Result<Self> {
        let Value::Object(map) = serde_json::from_str(text)? else {
            return Err(Error::protocol("frame is not a JSON object"));
        };
        Self::classify(RawFrame::from_object(map))
    }

    fn classify(raw: RawFrame) -> Result<Self> {
        let kind = raw.kind.clone().unwrap_or_default();

        match kind.as_str() {
            "auth_required" => Ok(Self::AuthRequired {
                ha_version: raw.ha_version,
            }),
            "auth_ok" => Ok(Self::AuthOk {
                ha_version: raw.ha_version,
            }),
            "auth_invalid" => Ok(Self::AuthInvalid {
                message: raw
                    .message
                    .unwrap_or_else(|| "invalid access token".to_string()),
            }),
            "pong" => {
                let id = raw
                    .id
                    .ok_or_else(|| Error::protocol("pong frame without id"))?;
                Ok(Self::Pong {
                    id: RequestId::new(id),
                })
            }
            "result" => Self::result(raw),
            "event" => Self::event(raw),
            "" if raw.has_success => Self::result(raw),
            "" if raw.event.is_some() => Self::event(raw),
            other => Ok(Self::Unknown {
                kind: other.to_string(),
            }),
        }
    }

    fn result(raw: RawFrame) -> Result<Self> {
        let id = raw
            .id
            .ok_or_else(|| Error::protocol("result frame without id"))?;

        Ok(Self::Result(ResultFrame {
            id: RequestId::new(id),
            success: raw.success.unwrap_or(false),
            result: raw.result.unwrap_or(Value::Null),
            error: raw.error.map(RemoteErrorDetail::from_value),
        }))
    }

    fn event(raw: RawFrame) -> Result<Self> {
        let subscription = raw
            .subscription
            .or(raw.id)
            .ok_or_else(|| Error::protocol("event frame without subscription id"))?;

        Ok(Self::Event(EventFrame {
            subscription: SubscriptionId::new(subscription),
            event: raw.event.unwrap_or(Value::Null),
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================
