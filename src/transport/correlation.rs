//! Request/response correlation.
//!
//! The [`Correlator`] hands out connection-unique ids and keeps one
//! [`PendingRequest`] per in-flight command until its result frame arrives,
//! it times out, or the connection closes.

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::Result;
use crate::identifiers::{IdGenerator, RequestId, SubscriptionId};

// ============================================================================
// Types
// ============================================================================

/// Channel resolving the waiting caller.
pub(crate) type Responder = oneshot::Sender<Result<Value>>;

/// What settling a pending request does besides answering the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingKind {
    /// Plain command.
    Command,
    /// Opens a subscription; the subscription is dropped if this fails.
    Subscribe(SubscriptionId),
    /// Cancels a subscription; the subscription is dropped either way.
    Unsubscribe(SubscriptionId),
}

// ============================================================================
// PendingRequest
// ============================================================================

/// One in-flight command awaiting a single response.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    responder: Responder,
    kind: PendingKind,
    created_at: Instant,
}

impl PendingRequest {
    /// Creates a pending entry stamped with the current time.
    pub(crate) fn new(responder: Responder, kind: PendingKind) -> Self {
        Self {
            responder,
            kind,
            created_at: Instant::now(),
        }
    }

    /// Returns the entry's kind.
    #[inline]
    pub(crate) fn kind(&self) -> PendingKind {
        self.kind
    }

    /// Returns how long the request has been pending.
    #[inline]
    pub(crate) fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Delivers the outcome to the waiting caller.
    ///
    /// A caller that already gave up (timeout, dropped future) is ignored.
    pub(crate) fn resolve(self, outcome: Result<Value>) {
        let _ = self.responder.send(outcome);
    }
}

// ============================================================================
// Correlator
// ============================================================================

/// Pending-request table for one connection.
#[derive(Debug, Default)]
pub(crate) struct Correlator {
    ids: IdGenerator,
    pending: Mutex<FxHashMap<RequestId, PendingRequest>>,
}

impl Correlator {
    /// Creates an empty table whose first id is 1.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh correlation id.
    #[inline]
    pub(crate) fn next_id(&self) -> RequestId {
        self.ids.next_id()
    }

    /// Stores a pending request under `id`.
    ///
    /// `id` must come from [`next_id`](Self::next_id).
    pub(crate) fn register(&self, id: RequestId, request: PendingRequest) {
        let previous = self.pending.lock().insert(id, request);
        debug_assert!(previous.is_none(), "correlation id {id} registered twice");
    }

    /// Removes and returns the pending request for `id`.
    #[inline]
    pub(crate) fn take(&self, id: RequestId) -> Option<PendingRequest> {
        self.pending.lock().remove(&id)
    }

    /// Removes every pending request.
    pub(crate) fn drain(&self) -> Vec<PendingRequest> {
        let drained: Vec<_> = self.pending.lock().drain().map(|(_, p)| p).collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "Drained pending requests");
        }
        drained
    }

    /// Returns the number of pending requests.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

// ============================================================================
// Tests
// ============================================================================
