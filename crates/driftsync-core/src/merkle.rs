//! Merkle digest trie over minute buckets.
//!
//! Every accepted timestamp is XORed into the nodes along a 16-digit base-3
//! path derived from its minute bucket. Two replicas compare their roots and,
//! when they differ, walk down together to the earliest bucket where the
//! hashes disagree. That bucket is the cursor for requesting missing messages.
//!
//! | Constant | Value |
//! |----------|-------|
//! | [`KEY_BASE`] | 3 |
//! | [`KEY_LENGTH`] | 16 digits |
//! | [`BUCKET_MS`] | 60 000 ms |
//! | [`DEFAULT_PRUNE_KEEP`] | 2 children per level |

use crate::hlc::Timestamp;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Radix of the bucket key.
pub const KEY_BASE: u64 = 3;

/// Number of digits in a bucket key.
pub const KEY_LENGTH: usize = 16;

/// Width of one bucket in milliseconds.
pub const BUCKET_MS: u64 = 60_000;

/// Children kept per level by [`TrieNode::pruned`] when no count is given.
pub const DEFAULT_PRUNE_KEEP: usize = 2;

const BRANCHES: u8 = 3;
const DIGIT_KEYS: [&str; 3] = ["0", "1", "2"];

/// A node of the digest trie.
///
/// `hash` is the XOR of every timestamp hash inserted at or below this node,
/// so an empty node hashes to 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawNode")]
pub struct TrieNode {
    children: [Option<Box<TrieNode>>; 3],
    hash: u32,
}

impl TrieNode {
    /// Create an empty trie.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a trie from a sequence of timestamps.
    ///
    /// The result does not depend on insertion order.
    #[must_use]
    pub fn build<'a>(timestamps: impl IntoIterator<Item = &'a Timestamp>) -> Self {
        let mut trie = Self::new();
        for timestamp in timestamps {
            trie.insert(timestamp);
        }
        trie
    }

    /// Aggregate hash of this subtree.
    #[must_use]
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Whether nothing was ever inserted below this node.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hash == 0 && self.children.iter().all(Option::is_none)
    }

    /// Child under `digit`, if present.
    #[must_use]
    pub fn child(&self, digit: u8) -> Option<&TrieNode> {
        self.children.get(usize::from(digit))?.as_deref()
    }

    /// XOR a timestamp into every node along its bucket path.
    ///
    /// Inserting the same timestamp twice removes it again; callers insert
    /// each accepted timestamp exactly once.
    pub fn insert(&mut self, timestamp: &Timestamp) {
        let hash = timestamp.hash();
        self.hash ^= hash;

        let mut node = self;
        for digit in timestamp_to_key(timestamp) {
            node = &mut **node.children[usize::from(digit)].get_or_insert_with(Box::default);
            node.hash ^= hash;
        }
    }

    /// Find the earliest point where two tries disagree.
    ///
    /// Returns `None` when the roots match. Otherwise returns milliseconds
    /// since the epoch before which both histories are identical.
    ///
    /// The walk descends into the lowest child whose hashes differ. It stops
    /// at the current prefix as soon as either node was pruned at that level,
    /// since a dropped lower child may hold the real divergence. Between two
    /// complete nodes, a child present on only one side ends the walk at the
    /// start of that child's range.
    #[must_use]
    pub fn diff(&self, other: &TrieNode) -> Option<u64> {
        if self.hash == other.hash {
            return None;
        }

        let mut prefix = Vec::with_capacity(KEY_LENGTH);
        let (mut left, mut right) = (self, other);

        'walk: loop {
            if !(left.is_complete() && right.is_complete()) {
                break;
            }
            for digit in 0..BRANCHES {
                match (left.child(digit), right.child(digit)) {
                    (None, None) => {}
                    (Some(a), Some(b)) if a.hash == b.hash => {}
                    (Some(a), Some(b)) => {
                        prefix.push(digit);
                        left = a;
                        right = b;
                        continue 'walk;
                    }
                    _ => {
                        prefix.push(digit);
                        break 'walk;
                    }
                }
            }
            // Complete nodes with different hashes always differ in a child,
            // unless child hashes collided.
            break;
        }

        let millis = key_to_millis(&prefix);
        tracing::debug!(depth = prefix.len(), millis, "trie divergence found");
        Some(millis)
    }

    /// Copy of this trie keeping only the `keep` highest children per level.
    ///
    /// Hashes of retained nodes are unchanged, so a pruned trie still
    /// disagrees with any trie the unpruned one disagreed with; `diff` can only
    /// become coarser.
    ///
    /// # Errors
    ///
    /// Returns [`MerkleError::MissingChild`] if a selected child vanished,
    /// which means the trie was corrupted.
    pub fn pruned(&self, keep: usize) -> Result<TrieNode, MerkleError> {
        self.pruned_at(keep, 0)
    }

    fn pruned_at(&self, keep: usize, depth: usize) -> Result<TrieNode, MerkleError> {
        let present: Vec<u8> = (0..BRANCHES)
            .filter(|&digit| self.child(digit).is_some())
            .collect();

        let mut next = TrieNode {
            children: Default::default(),
            hash: self.hash,
        };
        for &digit in &present[present.len().saturating_sub(keep)..] {
            let child = self
                .child(digit)
                .ok_or(MerkleError::MissingChild { digit, depth })?;
            next.children[usize::from(digit)] = Some(Box::new(child.pruned_at(keep, depth + 1)?));
        }

        Ok(next)
    }

    /// Whether the children account for this node's whole hash. False where
    /// pruning dropped a child, and at non-empty leaves.
    fn is_complete(&self) -> bool {
        self.children
            .iter()
            .flatten()
            .fold(0, |acc, child| acc ^ child.hash)
            == self.hash
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        for digit in 0..BRANCHES {
            if let Some(child) = self.child(digit) {
                writeln!(f, "{:indent$}{digit}: {}", "", child.hash)?;
                child.render(f, indent + 2)?;
            }
        }
        Ok(())
    }
}

/// Find the earliest divergence between two tries. See [`TrieNode::diff`].
#[must_use]
pub fn diff(a: &TrieNode, b: &TrieNode) -> Option<u64> {
    a.diff(b)
}

/// Base-3 path of a timestamp's minute bucket.
#[must_use]
pub fn timestamp_to_key(timestamp: &Timestamp) -> Vec<u8> {
    bucket_key(timestamp.millis() / BUCKET_MS)
}

/// Encode a minute bucket as a fixed-width base-3 numeral.
///
/// Buckets past 3^16 (November 2051) need more than 16 digits and keep
/// their natural length.
#[must_use]
pub fn bucket_key(bucket: u64) -> Vec<u8> {
    let mut digits = Vec::with_capacity(KEY_LENGTH);
    let mut rest = bucket;
    while rest > 0 {
        digits.push(u8::try_from(rest % KEY_BASE).unwrap_or_default());
        rest /= KEY_BASE;
    }
    digits.resize(digits.len().max(KEY_LENGTH), 0);
    digits.reverse();
    digits
}

/// Decode a key prefix into the first millisecond of its bucket range.
///
/// The prefix is right-padded with zeros to [`KEY_LENGTH`] digits.
#[must_use]
pub fn key_to_millis(prefix: &[u8]) -> u64 {
    let width = prefix.len().max(KEY_LENGTH);
    let bucket = prefix
        .iter()
        .copied()
        .chain(std::iter::repeat(0))
        .take(width)
        .fold(0u64, |acc, digit| {
            acc.saturating_mul(KEY_BASE)
                .saturating_add(u64::from(digit))
        });
    bucket.saturating_mul(BUCKET_MS)
}

impl fmt::Display for TrieNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "hash: {}", self.hash)?;
        self.render(f, 2)
    }
}

impl Serialize for TrieNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (key, child) in DIGIT_KEYS.iter().zip(&self.children) {
            if let Some(child) = child {
                map.serialize_entry(key, child)?;
            }
        }
        // JS peers produce signed hashes from `^`.
        map.serialize_entry("hash", &i32::from_ne_bytes(self.hash.to_ne_bytes()))?;
        map.end()
    }
}

/// Wire shape of a node: optional `"0"`/`"1"`/`"2"` children and a hash.
#[derive(Deserialize)]
struct RawNode {
    #[serde(rename = "0")]
    zero: Option<Box<TrieNode>>,
    #[serde(rename = "1")]
    one: Option<Box<TrieNode>>,
    #[serde(rename = "2")]
    two: Option<Box<TrieNode>>,
    #[serde(default)]
    hash: i64,
}

impl TryFrom<RawNode> for TrieNode {
    type Error = String;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let hash = u32::try_from(raw.hash)
            .or_else(|_| i32::try_from(raw.hash).map(|h| u32::from_ne_bytes(h.to_ne_bytes())))
            .map_err(|_| format!("trie hash {} is not a 32-bit integer", raw.hash))?;

        Ok(Self {
            children: [raw.zero, raw.one, raw.two],
            hash,
        })
    }
}

/// Errors raised by trie maintenance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MerkleError {
    /// A child selected for retention was not found
    #[error("trie inconsistency: missing child {digit} at depth {depth}")]
    MissingChild {
        /// Digit of the missing child
        digit: u8,
        /// Depth of the parent node
        depth: usize,
    },
}
