//! Protocol messages for the sync exchange.

use driftsync_core::{Timestamp, TrieNode};
use serde::{Deserialize, Serialize};

/// A single stamped mutation.
///
/// The payload is opaque here; only the timestamp takes part in clock and
/// digest maintenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// HLC timestamp assigned by the originating replica
    pub timestamp: Timestamp,
    /// Whether `content` is encrypted
    pub is_encrypted: bool,
    /// Encoded mutation
    pub content: Vec<u8>,
}

impl MessageEnvelope {
    /// Create a plaintext envelope.
    #[must_use]
    pub fn new(timestamp: Timestamp, content: Vec<u8>) -> Self {
        Self {
            timestamp,
            is_encrypted: false,
            content,
        }
    }
}

/// Request for messages newer than a cursor, carrying local changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Local messages the peer may be missing
    pub messages: Vec<MessageEnvelope>,
    /// File identifier
    pub file_id: String,
    /// Sync group identifier
    pub group_id: String,
    /// Encryption key identifier, if content is encrypted
    pub key_id: Option<String>,
    /// Only messages at or after this timestamp are wanted
    pub since: Timestamp,
}

impl SyncRequest {
    /// Create a request; file and group ids are left for the caller.
    #[must_use]
    pub fn new(since: Timestamp, messages: Vec<MessageEnvelope>) -> Self {
        Self {
            messages,
            file_id: String::new(),
            group_id: String::new(),
            key_id: None,
            since,
        }
    }

    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_cbor(&self) -> Result<Vec<u8>, MessageError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| MessageError::Serialize(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, MessageError> {
        ciborium::from_reader(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

/// Peer reply: its digest plus the messages the requester lacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Peer digest as trie JSON
    pub merkle: String,
    /// Messages newer than the request cursor
    pub messages: Vec<MessageEnvelope>,
}

impl SyncResponse {
    /// Build a response from a digest and messages.
    ///
    /// # Errors
    ///
    /// Returns error if the digest cannot be encoded.
    pub fn from_parts(
        merkle: &TrieNode,
        messages: Vec<MessageEnvelope>,
    ) -> Result<Self, MessageError> {
        let merkle =
            serde_json::to_string(merkle).map_err(|e| MessageError::Serialize(e.to_string()))?;
        Ok(Self { merkle, messages })
    }

    /// Decode the peer digest.
    ///
    /// # Errors
    ///
    /// Returns error if the digest is not valid trie JSON.
    pub fn merkle_trie(&self) -> Result<TrieNode, MessageError> {
        serde_json::from_str(&self.merkle).map_err(|e| MessageError::Deserialize(e.to_string()))
    }

    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_cbor(&self) -> Result<Vec<u8>, MessageError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| MessageError::Serialize(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, MessageError> {
        ciborium::from_reader(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

/// Errors for message serialization/deserialization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(millis: u64, counter: u16) -> Timestamp {
        Timestamp::new(millis, counter, "0123456789ABCDEF")
    }

    #[test]
    fn sync_request_cbor_roundtrip() {
        let mut request = SyncRequest::new(
            Timestamp::since(1_704_067_200_000),
            vec![MessageEnvelope::new(ts(1_704_067_200_123, 2), vec![1, 2, 3])],
        );
        request.group_id = "group".to_string();
        request.key_id = Some("key".to_string());

        let bytes = request.to_cbor().unwrap();
        let decoded = SyncRequest::from_cbor(&bytes).unwrap();

        assert_eq!(decoded, request);
    }

    #[test]
    fn sync_response_carries_trie_json() {
        let stamps = [ts(1_704_067_200_000, 0), ts(1_704_067_260_000, 1)];
        let trie = TrieNode::build(&stamps);
        let response = SyncResponse::from_parts(&trie, Vec::new()).unwrap();

        assert!(response.merkle.contains("\"hash\""));
        assert_eq!(response.merkle_trie().unwrap(), trie);

        let decoded = SyncResponse::from_cbor(&response.to_cbor().unwrap()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(
            SyncResponse::from_cbor(&[0xff, 0x00]),
            Err(MessageError::Deserialize(_))
        ));

        let response = SyncResponse {
            merkle: "not json".to_string(),
            messages: Vec::new(),
        };
        assert!(matches!(
            response.merkle_trie(),
            Err(MessageError::Deserialize(_))
        ));
    }
}
