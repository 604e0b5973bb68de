//! Folding a peer's sync response into the local clock.

use crate::messages::{MessageError, SyncResponse};
use driftsync_core::{current_time_ms, diff, Clock, ClockError, Timestamp};

/// Outcome of applying a [`SyncResponse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Incoming timestamps, in the order they were applied
    pub received: Vec<Timestamp>,
    /// Cursor for the next request; `None` when both digests agree
    pub since: Option<Timestamp>,
}

impl Reconciliation {
    /// Whether another round trip is needed.
    #[must_use]
    pub fn needs_resync(&self) -> bool {
        self.since.is_some()
    }
}

/// Apply a peer response using the system clock.
///
/// # Errors
///
/// See [`reconcile_at`].
pub fn reconcile(clock: &mut Clock, response: &SyncResponse) -> Result<Reconciliation, SyncError> {
    reconcile_at(clock, response, current_time_ms())
}

/// Apply a peer response at the given wall-clock reading.
///
/// Every incoming timestamp is received into `clock` (which also records it
/// in the digest), then the peer digest is compared with the local one.
///
/// # Errors
///
/// Returns [`SyncError::Clock`] on the first timestamp the clock rejects;
/// earlier messages stay applied. Returns [`SyncError::Merkle`] if the peer
/// digest cannot be decoded.
pub fn reconcile_at(
    clock: &mut Clock,
    response: &SyncResponse,
    physical_ms: u64,
) -> Result<Reconciliation, SyncError> {
    let mut received = Vec::with_capacity(response.messages.len());
    for message in &response.messages {
        clock.recv_at(&message.timestamp, physical_ms)?;
        received.push(message.timestamp.clone());
    }

    let remote = response
        .merkle_trie()
        .map_err(|e| SyncError::Merkle(e.to_string()))?;
    let since = diff(&remote, clock.merkle()).map(Timestamp::since);

    tracing::debug!(
        received = received.len(),
        since = ?since.as_ref().map(ToString::to_string),
        "applied sync response"
    );
    Ok(Reconciliation { received, since })
}

/// Errors raised while reconciling with a peer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Clock rejected an incoming timestamp
    #[error("clock error: {0}")]
    Clock(#[from] ClockError),
    /// Peer digest is unreadable
    #[error("invalid merkle digest: {0}")]
    Merkle(String),
    /// Message encoding failed
    #[error("message error: {0}")]
    Message(#[from] MessageError),
}
