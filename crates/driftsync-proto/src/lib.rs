//! # DriftSync Protocol
//!
//! Payload shapes for the sync exchange and the step that folds a peer
//! response into a local [`driftsync_core::Clock`].
//!
//! ## Messages
//!
//! - `MessageEnvelope`: One stamped, opaque mutation
//! - `SyncRequest`: Local changes plus the `since` cursor
//! - `SyncResponse`: Peer digest (trie JSON) plus missing messages
//!
//! Transport is left to the caller; messages encode to CBOR.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod messages;
pub mod sync;

pub use messages::{MessageEnvelope, MessageError, SyncRequest, SyncResponse};
pub use sync::{reconcile, reconcile_at, Reconciliation, SyncError};
