//! Decoded payloads returned by session operations.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Target
// ============================================================================

/// Entities, devices and areas a service call acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Entity ids, e.g. `light.kitchen`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_id: Vec<String>,
    /// Device ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_id: Vec<String>,
    /// Area ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub area_id: Vec<String>,
}

impl Target {
    /// Targets a single entity.
    #[must_use]
    pub fn entity(entity_id: impl Into<String>) -> Self {
        Self::default().with_entity(entity_id)
    }

    /// Targets a single device.
    #[must_use]
    pub fn device(device_id: impl Into<String>) -> Self {
        Self::default().with_device(device_id)
    }

    /// Targets a single area.
    #[must_use]
    pub fn area(area_id: impl Into<String>) -> Self {
        Self::default().with_area(area_id)
    }

    /// Adds an entity.
    #[must_use]
    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id.push(entity_id.into());
        self
    }

    /// Adds a device.
    #[must_use]
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id.push(device_id.into());
        self
    }

    /// Adds an area.
    #[must_use]
    pub fn with_area(mut self, area_id: impl Into<String>) -> Self {
        self.area_id.push(area_id.into());
        self
    }

    /// Returns `true` if nothing is targeted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entity_id.is_empty() && self.device_id.is_empty() && self.area_id.is_empty()
    }
}

// ============================================================================
// Context
// ============================================================================

/// Origin of a state change or event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Context id.
    pub id: String,
    /// Parent context id.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// User that caused the change.
    #[serde(default)]
    pub user_id: Option<String>,
}

// ============================================================================
// EntityState
// ============================================================================

/// The state of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// Entity id, e.g. `sensor.outside_temperature`.
    pub entity_id: String,
    /// State value.
    pub state: String,
    /// Entity attributes.
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Last time the state value changed (ISO 8601).
    #[serde(default)]
    pub last_changed: Option<String>,
    /// Last time the state or attributes changed (ISO 8601).
    #[serde(default)]
    pub last_updated: Option<String>,
    /// Change context.
    #[serde(default)]
    pub context: Option<Context>,
}

impl EntityState {
    /// Returns the domain part of the entity id.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map_or(self.entity_id.as_str(), |(domain, _)| domain)
    }

    /// Returns the `friendly_name` attribute, if set.
    #[must_use]
    pub fn friendly_name(&self) -> Option<&str> {
        self.attributes.get("friendly_name").and_then(Value::as_str)
    }
}

// ============================================================================
// Event
// ============================================================================

/// A bus event delivered to an event subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type, e.g. `state_changed`.
    pub event_type: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
    /// `LOCAL` or `REMOTE`.
    #[serde(default)]
    pub origin: Option<String>,
    /// Fire time (ISO 8601).
    #[serde(default)]
    pub time_fired: Option<String>,
    /// Event context.
    #[serde(default)]
    pub context: Option<Context>,
}

impl Event {
    /// Returns `data.entity_id`, present on state change events.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        self.data.get("entity_id").and_then(Value::as_str)
    }

    /// Decodes `data.new_state` of a `state_changed` event.
    #[must_use]
    pub fn new_state(&self) -> Option<EntityState> {
        self.data
            .get("new_state")
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

// ============================================================================
// HassConfig
// ============================================================================

/// Core configuration as reported by `get_config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HassConfig {
    /// Installation name.
    #[serde(default)]
    pub location_name: String,
    /// Core version.
    #[serde(default)]
    pub version: String,
    /// Latitude.
    #[serde(default)]
    pub latitude: Option<f64>,
    /// Longitude.
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Elevation in meters.
    #[serde(default)]
    pub elevation: Option<f64>,
    /// IANA time zone.
    #[serde(default)]
    pub time_zone: Option<String>,
    /// Loaded integrations.
    #[serde(default)]
    pub components: Vec<String>,
    /// Core run state, e.g. `RUNNING`.
    #[serde(default)]
    pub state: Option<String>,
    /// Every other reported field.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// Services
// ============================================================================

/// Services grouped by domain, then by service name.
pub type Services = BTreeMap<String, BTreeMap<String, ServiceDefinition>>;

/// Description of one service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Accepted fields.
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Target selector, if the service accepts one.
    #[serde(default)]
    pub target: Option<Value>,
}

// ============================================================================
// ConfigCheck
// ============================================================================

/// Outcome of `core/check_config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigCheck {
    /// `valid` or `invalid`.
    pub result: String,
    /// Error text when invalid.
    #[serde(default)]
    pub errors: Option<String>,
    /// Warning text.
    #[serde(default)]
    pub warnings: Option<String>,
}

impl ConfigCheck {
    /// Returns `true` if the configuration is valid.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.result == "valid"
    }
}

// ============================================================================
// Tests
// ============================================================================
