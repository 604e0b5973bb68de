//! Replica clock: the advancing HLC state plus the Merkle digest of every
//! timestamp it has accepted.

use crate::hlc::{
    advance_recv, advance_send, current_time_ms, duration_ms, validate_node, ClockError, Logical,
    Timestamp, DEFAULT_MAX_DRIFT, NODE_LENGTH,
};
use crate::merkle::{MerkleError, TrieNode};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

/// Options for a fresh clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockOptions {
    /// Node identifier; empty (all zeros) when unset
    pub node: Option<String>,
    /// How far logical time may run ahead of the wall clock
    pub max_drift: Duration,
}

impl Default for ClockOptions {
    fn default() -> Self {
        Self {
            node: None,
            max_drift: DEFAULT_MAX_DRIFT,
        }
    }
}

impl ClockOptions {
    /// Options with a fixed node id.
    #[must_use]
    pub fn with_node(node: impl Into<String>) -> Self {
        Self {
            node: Some(node.into()),
            ..Self::default()
        }
    }
}

/// Per-replica clock state.
///
/// `merkle` holds exactly the timestamps that went through [`Clock::send`],
/// [`Clock::recv`] or [`Clock::insert`] since the clock was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clock {
    millis: u64,
    counter: u16,
    node: String,
    merkle: TrieNode,
    max_drift: Duration,
}

impl Default for Clock {
    fn default() -> Self {
        Self::from_parts(&Timestamp::zero(), TrieNode::new(), DEFAULT_MAX_DRIFT)
    }
}

impl Clock {
    /// Create a clock at the zero timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidNode`] unless the node id is at most 16
    /// ASCII alphanumeric characters.
    pub fn new(options: ClockOptions) -> Result<Self, ClockError> {
        let node = options.node.unwrap_or_default();
        validate_node(&node)?;
        let zero = Timestamp::new(0, 0, node);
        Ok(Self::from_parts(&zero, TrieNode::new(), options.max_drift))
    }

    /// Restore a clock from its current timestamp and digest.
    #[must_use]
    pub fn from_parts(timestamp: &Timestamp, merkle: TrieNode, max_drift: Duration) -> Self {
        Self {
            millis: timestamp.millis(),
            counter: timestamp.counter(),
            node: timestamp.node().to_string(),
            merkle,
            max_drift,
        }
    }

    /// Reset to the zero timestamp with new options, discarding the digest.
    ///
    /// # Errors
    ///
    /// See [`Clock::new`]; the clock is left unchanged on error.
    pub fn init(&mut self, options: ClockOptions) -> Result<(), ClockError> {
        *self = Self::new(options)?;
        Ok(())
    }

    /// Current timestamp.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        Timestamp::new(self.millis, self.counter, &self.node)
    }

    /// Node identifier.
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Assign a new node identifier, keeping time and digest.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidNode`] for ids that cannot appear in a
    /// timestamp string; the node is left unchanged.
    pub fn set_node(&mut self, node: impl AsRef<str>) -> Result<(), ClockError> {
        let node = node.as_ref();
        validate_node(node)?;
        self.node = Timestamp::new(0, 0, node).node().to_string();
        Ok(())
    }

    /// Digest of all accepted timestamps.
    #[must_use]
    pub fn merkle(&self) -> &TrieNode {
        &self.merkle
    }

    /// Drift limit.
    #[must_use]
    pub fn max_drift(&self) -> Duration {
        self.max_drift
    }

    /// Change the drift limit.
    pub fn set_max_drift(&mut self, max_drift: Duration) {
        self.max_drift = max_drift;
    }

    /// Stamp a local event using the system clock.
    ///
    /// # Errors
    ///
    /// See [`Clock::send_at`].
    pub fn send(&mut self) -> Result<Timestamp, ClockError> {
        self.send_at(current_time_ms())
    }

    /// Stamp a local event at the given wall-clock reading.
    ///
    /// The new timestamp is recorded in the digest.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::DriftExceeded`] if logical time would run more
    /// than `max_drift` ahead of `physical_ms`, or
    /// [`ClockError::CounterOverflow`] after 65536 events in one millisecond.
    /// The clock is left unchanged on error.
    pub fn send_at(&mut self, physical_ms: u64) -> Result<Timestamp, ClockError> {
        let next = advance_send(self.logical(), physical_ms, duration_ms(self.max_drift))?;
        self.commit(next);

        let timestamp = self.timestamp();
        self.merkle.insert(&timestamp);
        tracing::trace!(%timestamp, "stamped local event");
        Ok(timestamp)
    }

    /// Fold in a timestamp received from a peer using the system clock.
    ///
    /// # Errors
    ///
    /// See [`Clock::recv_at`].
    pub fn recv(&mut self, remote: &Timestamp) -> Result<Timestamp, ClockError> {
        self.recv_at(remote, current_time_ms())
    }

    /// Fold in a timestamp received from a peer at the given wall-clock
    /// reading, returning the clock's new timestamp.
    ///
    /// The remote timestamp is recorded in the digest.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::DriftExceeded`] if the remote timestamp or the
    /// resulting logical time is more than `max_drift` ahead of
    /// `physical_ms`, or [`ClockError::CounterOverflow`]. The clock is left
    /// unchanged on error.
    pub fn recv_at(
        &mut self,
        remote: &Timestamp,
        physical_ms: u64,
    ) -> Result<Timestamp, ClockError> {
        let next = advance_recv(
            self.logical(),
            remote,
            physical_ms,
            duration_ms(self.max_drift),
        )?;
        self.commit(next);
        self.merkle.insert(remote);

        let timestamp = self.timestamp();
        tracing::trace!(%remote, %timestamp, "received remote event");
        Ok(timestamp)
    }

    /// Record an already-accepted timestamp without advancing time.
    pub fn insert(&mut self, timestamp: &Timestamp) {
        self.merkle.insert(timestamp);
    }

    /// Bound the digest to the `keep` highest children per level.
    ///
    /// # Errors
    ///
    /// Returns [`MerkleError`] if the digest is inconsistent; the clock is
    /// left unchanged.
    pub fn prune(&mut self, keep: usize) -> Result<(), MerkleError> {
        self.merkle = self.merkle.pruned(keep)?;
        Ok(())
    }

    /// JSON envelope `{"timestamp": "...", "merkle": {...}}`.
    #[must_use]
    pub fn serialize(&self) -> String {
        serde_json::json!({
            "timestamp": self.timestamp(),
            "merkle": &self.merkle,
        })
        .to_string()
    }

    /// Restore a clock from [`Clock::serialize`] output.
    ///
    /// Unreadable input yields a zero clock with a fresh node id instead of
    /// an error.
    #[must_use]
    pub fn deserialize(input: &str) -> Self {
        match serde_json::from_str::<ClockRecord>(input) {
            Ok(record) => Self::from_parts(&record.timestamp, record.merkle, DEFAULT_MAX_DRIFT),
            Err(error) => {
                let node = make_client_id();
                tracing::debug!(%error, %node, "unreadable clock state, starting from zero");
                Self::from_parts(&Timestamp::new(0, 0, node), TrieNode::new(), DEFAULT_MAX_DRIFT)
            }
        }
    }

    fn logical(&self) -> Logical {
        Logical {
            millis: self.millis,
            counter: self.counter,
        }
    }

    fn commit(&mut self, next: Logical) {
        self.millis = next.millis;
        self.counter = next.counter;
    }
}

#[derive(Deserialize)]
struct ClockRecord {
    timestamp: Timestamp,
    #[serde(default)]
    merkle: TrieNode,
}

/// Generate a random 16-character node identifier.
#[must_use]
pub fn make_client_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[id.len() - NODE_LENGTH..].to_string()
}
