//! Subscription multiplexing.
//!
//! Any number of subscriptions share one connection. Each push frame carries
//! the id of the subscription it belongs to; the [`SubscriptionRegistry`]
//! routes it to that subscription's callback, in delivery order, on the
//! connection's event loop.
//!
//! An inactive subscription never sees its callback invoked again: frames for
//! it are dropped without error.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, error, trace};

use crate::error::Result;
use crate::identifiers::SubscriptionId;
use crate::protocol::{EventFrame, SubscriptionCommand};

use super::Connection;

// ============================================================================
// Types
// ============================================================================

/// Callback invoked once per push frame, with the frame's `event` payload.
///
/// Runs on the connection's event loop: it must not block.
pub type EventCallback = Box<dyn Fn(Value) + Send + Sync>;

// ============================================================================
// SubscriptionFilter
// ============================================================================

/// What a subscription listens to, as sent upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionFilter {
    /// Bus events, optionally of one type.
    Events {
        /// Event type filter.
        event_type: Option<String>,
    },
    /// An automation trigger.
    Trigger {
        /// Trigger configuration.
        trigger: Value,
    },
}

impl SubscriptionFilter {
    /// Builds the upstream subscribe command for this filter.
    #[must_use]
    pub fn to_command(&self) -> SubscriptionCommand {
        match self {
            Self::Events { event_type } => SubscriptionCommand::SubscribeEvents {
                event_type: event_type.clone(),
            },
            Self::Trigger { trigger } => SubscriptionCommand::SubscribeTrigger {
                trigger: trigger.clone(),
            },
        }
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// One standing interest in push frames.
pub(crate) struct Subscription {
    id: SubscriptionId,
    filter: SubscriptionFilter,
    callback: EventCallback,
    active: AtomicBool,
    delivered: AtomicU64,
}

impl Subscription {
    /// Creates an active subscription.
    pub(crate) fn new(id: SubscriptionId, filter: SubscriptionFilter, callback: EventCallback) -> Self {
        Self {
            id,
            filter,
            callback,
            active: AtomicBool::new(true),
            delivered: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Invokes the callback if still active. A panicking callback is logged
    /// and does not take the event loop down.
    fn deliver(&self, event: Value) {
        if !self.is_active() {
            trace!(subscription_id = %self.id, "Dropping event for inactive subscription");
            return;
        }

        self.delivered.fetch_add(1, Ordering::Relaxed);
        if catch_unwind(AssertUnwindSafe(|| (self.callback)(event))).is_err() {
            error!(subscription_id = %self.id, "Subscription callback panicked");
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SubscriptionRegistry
// ============================================================================

/// Per-connection table of live subscriptions.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    entries: Mutex<FxHashMap<SubscriptionId, Arc<Subscription>>>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers an active subscription.
    pub(crate) fn insert(&self, subscription: Arc<Subscription>) {
        debug!(subscription_id = %subscription.id, filter = ?subscription.filter, "Subscription registered");
        self.entries.lock().insert(subscription.id, subscription);
    }

    /// Deactivates and forgets a subscription.
    ///
    /// Returns `false` if it was not registered.
    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let removed = self.entries.lock().remove(&id);
        match removed {
            Some(subscription) => {
                subscription.deactivate();
                debug!(subscription_id = %id, delivered = subscription.delivered(), "Subscription removed");
                true
            }
            None => false,
        }
    }

    /// Returns `true` if `id` is registered.
    #[inline]
    pub(crate) fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Routes a push frame to its subscription.
    ///
    /// Frames for unknown or inactive subscriptions are dropped.
    pub(crate) fn dispatch(&self, frame: EventFrame) {
        let subscription = self.entries.lock().get(&frame.subscription).cloned();

        match subscription {
            Some(subscription) => subscription.deliver(frame.event),
            None => trace!(subscription_id = %frame.subscription, "Event for unknown subscription"),
        }
    }

    /// Deactivates and forgets every subscription.
    pub(crate) fn clear(&self) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().map(|(_, s)| s).collect();
        for subscription in &drained {
            subscription.deactivate();
        }
        drained.len()
    }

    /// Returns the number of registered subscriptions.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

// ============================================================================
// SubscriptionHandle
// ============================================================================

/// Handle to a live subscription.
///
/// Dropping the handle does not unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe).
pub struct SubscriptionHandle {
    subscription: Arc<Subscription>,
    connection: Connection,
}

impl SubscriptionHandle {
    pub(crate) fn new(subscription: Arc<Subscription>, connection: Connection) -> Self {
        Self {
            subscription,
            connection,
        }
    }

    /// Returns the subscription id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.subscription.id
    }

    /// Returns what the subscription listens to.
    #[inline]
    #[must_use]
    pub fn filter(&self) -> &SubscriptionFilter {
        &self.subscription.filter
    }

    /// Returns `true` while callbacks may still fire.
    ///
    /// Turns `false` after unsubscribing or when the connection closes.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.subscription.is_active()
    }

    /// Returns how many events were delivered to the callback.
    #[inline]
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.subscription.delivered()
    }

    /// Cancels the subscription.
    ///
    /// Sends `unsubscribe_events` and deactivates the subscription when the
    /// acknowledgment is processed. The subscription is inactive when this
    /// returns, whatever the outcome. A connection that is already gone is
    /// not an error: there is nothing left to cancel.
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`](crate::Error::Remote) if the upstream rejected the cancellation
    /// - [`Error::RequestTimeout`](crate::Error::RequestTimeout) if it was not acknowledged in time
    pub async fn unsubscribe(self) -> Result<()> {
        let outcome = self.connection.unsubscribe(self.subscription.id).await;
        self.subscription.deactivate();
        outcome
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.subscription.id)
            .field("filter", &self.subscription.filter)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
