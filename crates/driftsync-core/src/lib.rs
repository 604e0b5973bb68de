//! # DriftSync Core
//!
//! Coordination-free timestamps and divergence detection for offline-first
//! replicas.
//!
//! This crate provides:
//! - Hybrid Logical Clock (HLC) timestamps with drift and overflow checks
//! - A base-3 Merkle digest trie over minute buckets, with `diff` and `prune`
//! - A per-replica [`Clock`] pairing the two, with JSON persistence hand-off
//! - A thread-safe [`ClockHandle`] for sharing one clock within a session

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod handle;
pub mod hlc;
pub mod merkle;

pub use clock::{make_client_id, Clock, ClockOptions};
pub use handle::{ClockHandle, TimeSource};
pub use hlc::{
    current_time_ms, ClockError, Timestamp, DEFAULT_MAX_DRIFT, MAX_COUNTER, NODE_LENGTH,
};
pub use merkle::{
    diff, MerkleError, TrieNode, BUCKET_MS, DEFAULT_PRUNE_KEEP, KEY_BASE, KEY_LENGTH,
};
