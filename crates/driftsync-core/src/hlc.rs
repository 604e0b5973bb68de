//! Hybrid Logical Clock (HLC) timestamps.
//!
//! A timestamp combines:
//! - Physical wall-clock time (milliseconds)
//! - Logical counter for events at the same physical time
//! - Node ID for deterministic tiebreaking
//!
//! The canonical string form is 46 characters and sorts the same way the
//! timestamps do:
//!
//! ```text
//! 2015-04-24T22:23:42.123Z-1000-0123456789ABCDEF
//! ```
//!
//! # References
//!
//! Kulkarni, Demirbas, et al. "Logical Physical Clocks and Consistent Snapshots
//! in Globally Distributed Databases" (2014)

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Largest logical counter value before a send or receive overflows.
pub const MAX_COUNTER: u16 = 0xFFFF;

/// Fixed width of a node identifier in the canonical string form.
pub const NODE_LENGTH: usize = 16;

/// Default limit on how far logical time may run ahead of the wall clock.
pub const DEFAULT_MAX_DRIFT: Duration = Duration::from_secs(5 * 60);

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";
const DATE_LENGTH: usize = 24;

/// Last millisecond representable with a four-digit year.
const MAX_MILLIS: u64 = 253_402_300_799_999;

/// A globally unique timestamp combining physical time, logical counter, and node ID.
///
/// Ordering is `(millis, counter, node)`, which matches the byte order of the
/// canonical string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    millis: u64,
    counter: u16,
    node: String,
}

impl Timestamp {
    /// Create a timestamp, normalizing the node to exactly 16 characters.
    ///
    /// Shorter node ids are zero-padded on the left; longer ones keep their
    /// last 16 characters. `millis` is clamped to the last millisecond of
    /// year 9999 so the canonical string stays 46 characters. Only nodes
    /// accepted by [`Timestamp::is_valid_node`] survive a round trip
    /// through [`Timestamp::parse`].
    #[must_use]
    pub fn new(millis: u64, counter: u16, node: impl AsRef<str>) -> Self {
        Self {
            millis: millis.min(MAX_MILLIS),
            counter,
            node: normalize_node(node.as_ref()),
        }
    }

    /// The smallest timestamp, `1970-01-01T00:00:00.000Z-0000-0000000000000000`.
    #[must_use]
    pub fn zero() -> Self {
        Self::new(0, 0, "")
    }

    /// The largest timestamp with a four-digit year.
    #[must_use]
    pub fn max() -> Self {
        Self::new(MAX_MILLIS, MAX_COUNTER, "FFFFFFFFFFFFFFFF")
    }

    /// A cursor that sorts before every real timestamp at `millis`.
    #[must_use]
    pub fn since(millis: u64) -> Self {
        Self::new(millis, 0, "")
    }

    /// Parse the canonical string form.
    ///
    /// Returns `None` unless the input is exactly
    /// `<ISO8601-millis>-<hex counter>-<node>` with a counter no larger than
    /// `0xFFFF` and a node of at most 16 characters.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let parts: Vec<&str> = input.split('-').collect();
        let [year, month, rest, counter, node] = parts.as_slice() else {
            return None;
        };

        let date = format!("{year}-{month}-{rest}");
        if date.len() != DATE_LENGTH {
            return None;
        }
        let date = NaiveDateTime::parse_from_str(&date, DATE_FORMAT).ok()?;
        let millis = u64::try_from(date.and_utc().timestamp_millis()).ok()?;

        if counter.is_empty() || !counter.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let counter = u32::from_str_radix(counter, 16).ok()?;
        let counter = u16::try_from(counter).ok()?;

        if !Self::is_valid_node(node) {
            return None;
        }

        Some(Self::new(millis, counter, node))
    }

    /// Whether `node` fits the canonical string: at most 16 ASCII
    /// alphanumeric characters.
    #[must_use]
    pub fn is_valid_node(node: &str) -> bool {
        node.len() <= NODE_LENGTH && node.bytes().all(|b| b.is_ascii_alphanumeric())
    }

    /// Physical component in milliseconds since the UNIX epoch.
    #[must_use]
    pub fn millis(&self) -> u64 {
        self.millis
    }

    /// Logical counter.
    #[must_use]
    pub fn counter(&self) -> u16 {
        self.counter
    }

    /// Node identifier (always 16 characters).
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// 32-bit MurmurHash3 (x86, seed 0) of the canonical string.
    ///
    /// Peers XOR these into their digest tries, so the value must stay
    /// stable across implementations.
    #[must_use]
    pub fn hash(&self) -> u32 {
        let text = self.to_string();
        murmur3::murmur3_32(&mut Cursor::new(text.as_bytes()), 0)
            .expect("reading from an in-memory buffer cannot fail")
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let date = i64::try_from(self.millis)
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        write!(
            f,
            "{}-{:04X}-{}",
            date.format(DATE_FORMAT),
            self.counter,
            self.node
        )
    }
}

impl FromStr for Timestamp {
    type Err = ClockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ClockError::ParseFailed(s.to_string()))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {text}")))
    }
}

/// The `(millis, counter)` pair advanced by the HLC rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Logical {
    pub millis: u64,
    pub counter: u16,
}

/// Advance logical time for a locally originated event.
pub(crate) fn advance_send(
    last: Logical,
    physical_ms: u64,
    max_drift_ms: u64,
) -> Result<Logical, ClockError> {
    let millis = last.millis.max(physical_ms);
    let counter = if millis == last.millis {
        u32::from(last.counter) + 1
    } else {
        0
    };

    checked(millis, counter, physical_ms, max_drift_ms)
}

/// Advance logical time past a timestamp received from a peer.
pub(crate) fn advance_recv(
    last: Logical,
    remote: &Timestamp,
    physical_ms: u64,
    max_drift_ms: u64,
) -> Result<Logical, ClockError> {
    let remote_drift = remote.millis.saturating_sub(physical_ms);
    if remote_drift > max_drift_ms {
        return Err(ClockError::DriftExceeded {
            drift_ms: remote_drift,
            max_drift_ms,
        });
    }

    let millis = last.millis.max(physical_ms).max(remote.millis);
    let counter = match (millis == last.millis, millis == remote.millis) {
        (true, true) => u32::from(last.counter.max(remote.counter)) + 1,
        (true, false) => u32::from(last.counter) + 1,
        (false, true) => u32::from(remote.counter) + 1,
        (false, false) => 0,
    };

    checked(millis, counter, physical_ms, max_drift_ms)
}

fn checked(
    millis: u64,
    counter: u32,
    physical_ms: u64,
    max_drift_ms: u64,
) -> Result<Logical, ClockError> {
    let drift_ms = millis.saturating_sub(physical_ms);
    if drift_ms > max_drift_ms {
        return Err(ClockError::DriftExceeded {
            drift_ms,
            max_drift_ms,
        });
    }
    let counter = u16::try_from(counter).map_err(|_| ClockError::CounterOverflow)?;

    Ok(Logical { millis, counter })
}

/// Reject node ids that cannot appear in the canonical string.
pub(crate) fn validate_node(node: &str) -> Result<(), ClockError> {
    if Timestamp::is_valid_node(node) {
        Ok(())
    } else {
        Err(ClockError::InvalidNode(node.to_string()))
    }
}

fn normalize_node(node: &str) -> String {
    let chars: Vec<char> = node.chars().collect();
    if chars.len() >= NODE_LENGTH {
        chars[chars.len() - NODE_LENGTH..].iter().collect()
    } else {
        format!("{node:0>width$}", width = NODE_LENGTH)
    }
}

/// Errors that can occur while advancing or parsing timestamps.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// Logical time ran too far ahead of the wall clock
    #[error("clock drift of {drift_ms}ms exceeds the {max_drift_ms}ms limit")]
    DriftExceeded {
        /// Observed distance between logical and physical time
        drift_ms: u64,
        /// Configured limit
        max_drift_ms: u64,
    },
    /// More than 65536 events within one millisecond
    #[error("timestamp counter overflow")]
    CounterOverflow,
    /// Input was not a canonical timestamp string
    #[error("invalid timestamp: {0}")]
    ParseFailed(String),
    /// Node id is longer than 16 characters or not ASCII alphanumeric
    #[error("invalid node id: {0:?}")]
    InvalidNode(String),
}

/// Get current wall clock time in milliseconds since UNIX epoch.
#[must_use]
pub fn current_time_ms() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// Convert a drift limit into whole milliseconds.
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MAX_DRIFT_MS: u64 = 5 * 60 * 1000;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    #[test]
    fn rejects_malformed_strings() {
        let invalid = [
            "",
            " ",
            "0",
            "invalid",
            "1969-1-1T0:0:0.0Z-0-0-0",
            "1969-01-01T00:00:00.000Z-0000-0000000000000000",
            "10000-01-01T00:00:00.000Z-FFFF-FFFFFFFFFFFFFFFF",
            "9999-12-31T23:59:59.999Z-10000-FFFFFFFFFFFFFFFF",
            "9999-12-31T23:59:59.999Z-FFFF-10000000000000000",
            "2015-04-24T22:23:42.123Z-+FFF-0123456789ABCDEF",
            "2015-04-24T22:23:42.123Z--0123456789ABCDEF",
            "2015-13-24T22:23:42.123Z-0000-0123456789ABCDEF",
            "2015-04-24T22:23:42.123Z-0000-replica_1",
            "2015-04-24T22:23:42.123Z-0000-nodé",
        ];

        for input in invalid {
            assert_eq!(Timestamp::parse(input), None, "{input:?} should not parse");
        }
    }

    #[test]
    fn parses_canonical_strings() {
        let valid = [
            "1970-01-01T00:00:00.000Z-0000-0000000000000000",
            "2015-04-24T22:23:42.123Z-1000-0123456789ABCDEF",
            "9999-12-31T23:59:59.999Z-FFFF-FFFFFFFFFFFFFFFF",
        ];

        for input in valid {
            let parsed = ts(input);
            assert!(parsed.millis() < 253_402_300_800_000);
            assert_eq!(parsed.to_string(), input);
            assert_eq!(parsed.to_string().len(), 46);
        }

        let parsed = ts("2015-04-24T22:23:42.123Z-1000-0123456789ABCDEF");
        assert_eq!(parsed.millis(), 1_429_914_222_123);
        assert_eq!(parsed.counter(), 0x1000);
        assert_eq!(parsed.node(), "0123456789ABCDEF");
    }

    #[test]
    fn short_nodes_are_zero_padded() {
        let t = Timestamp::new(10, 1, "1");
        assert_eq!(t.node(), "0000000000000001");
        assert_eq!(t.to_string(), "1970-01-01T00:00:00.010Z-0001-0000000000000001");
        assert_eq!(ts("1970-01-01T00:00:00.010Z-0001-1"), t);
    }

    #[test]
    fn zero_and_max_bound_everything() {
        let t = Timestamp::new(1_700_000_000_000, 7, "abc");
        assert!(Timestamp::zero() < t);
        assert!(t < Timestamp::max());
        assert_eq!(
            Timestamp::max().to_string(),
            "9999-12-31T23:59:59.999Z-FFFF-FFFFFFFFFFFFFFFF"
        );
        assert!(Timestamp::since(t.millis()) < t);
    }

    #[test]
    fn node_ids_must_be_ascii_alphanumeric() {
        assert!(Timestamp::is_valid_node(""));
        assert!(Timestamp::is_valid_node("0123456789abcDEF"));
        assert!(!Timestamp::is_valid_node("replica-1"));
        assert!(!Timestamp::is_valid_node("nodé"));
        assert!(!Timestamp::is_valid_node("0123456789abcdef0"));

        assert_eq!(validate_node("abc"), Ok(()));
        assert_eq!(
            validate_node("replica-1"),
            Err(ClockError::InvalidNode("replica-1".to_string()))
        );
    }

    #[test]
    fn millis_past_year_9999_are_clamped() {
        let t = Timestamp::new(u64::MAX, 3, "A");
        assert_eq!(t.millis(), MAX_MILLIS);

        let text = t.to_string();
        assert_eq!(text, "9999-12-31T23:59:59.999Z-0003-000000000000000A");
        assert_eq!(Timestamp::parse(&text), Some(t));
    }

    #[test]
    fn from_str_reports_parse_failure() {
        let err = "garbage".parse::<Timestamp>().unwrap_err();
        assert_eq!(err, ClockError::ParseFailed("garbage".to_string()));
    }

    #[test]
    fn serde_uses_canonical_string() {
        let t = ts("2015-04-24T22:23:42.123Z-1000-0123456789ABCDEF");
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"2015-04-24T22:23:42.123Z-1000-0123456789ABCDEF\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
        assert!(serde_json::from_str::<Timestamp>("\"nope\"").is_err());
    }

    #[test]
    fn hash_is_stable() {
        let a = ts("2015-04-24T22:23:42.123Z-1000-0123456789ABCDEF");
        let b = ts("2015-04-24T22:23:42.123Z-1000-0123456789ABCDEF");
        let c = ts("2015-04-24T22:23:42.123Z-1001-0123456789ABCDEF");
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
        assert_eq!(
            a.hash(),
            murmur3::murmur3_32(&mut Cursor::new(a.to_string().as_bytes()), 0).unwrap()
        );
    }

    #[test]
    fn send_counts_within_a_millisecond() {
        let start = Logical { millis: 0, counter: 0 };

        let first = advance_send(start, 20, MAX_DRIFT_MS).unwrap();
        assert_eq!(first, Logical { millis: 20, counter: 0 });
        let second = advance_send(first, 20, MAX_DRIFT_MS).unwrap();
        assert_eq!(second, Logical { millis: 20, counter: 1 });
        let third = advance_send(second, 19, MAX_DRIFT_MS).unwrap();
        assert_eq!(third, Logical { millis: 20, counter: 2 });
        let fourth = advance_send(third, 21, MAX_DRIFT_MS).unwrap();
        assert_eq!(fourth, Logical { millis: 21, counter: 0 });
    }

    #[test]
    fn send_overflows_past_max_counter() {
        let last = Logical {
            millis: 40,
            counter: MAX_COUNTER,
        };
        assert_eq!(
            advance_send(last, 40, MAX_DRIFT_MS),
            Err(ClockError::CounterOverflow)
        );
    }

    #[test]
    fn send_rejects_drift() {
        let last = Logical {
            millis: MAX_DRIFT_MS + 1,
            counter: 0,
        };
        assert_eq!(
            advance_send(last, 0, MAX_DRIFT_MS),
            Err(ClockError::DriftExceeded {
                drift_ms: MAX_DRIFT_MS + 1,
                max_drift_ms: MAX_DRIFT_MS,
            })
        );
    }

    #[test]
    fn recv_picks_counter_from_the_winning_side() {
        let both = advance_recv(
            Logical { millis: 62, counter: 3 },
            &ts("1970-01-01T00:00:00.062Z-0005-0000000000000002"),
            60,
            MAX_DRIFT_MS,
        )
        .unwrap();
        assert_eq!(both, Logical { millis: 62, counter: 6 });

        let local = advance_recv(
            Logical { millis: 93, counter: 0 },
            &ts("1970-01-01T00:00:00.092Z-0000-0000000000000002"),
            92,
            MAX_DRIFT_MS,
        )
        .unwrap();
        assert_eq!(local, Logical { millis: 93, counter: 1 });

        let remote = advance_recv(
            Logical { millis: 0, counter: 0 },
            &ts("1970-01-01T00:00:00.083Z-0000-0000000000000002"),
            81,
            MAX_DRIFT_MS,
        )
        .unwrap();
        assert_eq!(remote, Logical { millis: 83, counter: 1 });

        let physical = advance_recv(
            Logical { millis: 0, counter: 0 },
            &ts("1970-01-01T00:00:00.051Z-0000-0000000000000002"),
            52,
            MAX_DRIFT_MS,
        )
        .unwrap();
        assert_eq!(physical, Logical { millis: 52, counter: 0 });
    }

    #[test]
    fn recv_rejects_remote_drift() {
        let remote = ts("1980-01-01T00:00:00.101Z-0000-0000000000000002");
        let result = advance_recv(Logical { millis: 0, counter: 0 }, &remote, 0, MAX_DRIFT_MS);
        assert!(matches!(result, Err(ClockError::DriftExceeded { .. })));
    }

    proptest! {
        #[test]
        fn parse_roundtrips_display(
            millis in 0u64..=MAX_MILLIS,
            counter in any::<u16>(),
            node in "[0-9a-fA-F]{0,16}",
        ) {
            let t = Timestamp::new(millis, counter, &node);
            let text = t.to_string();
            prop_assert_eq!(text.len(), 46);
            prop_assert_eq!(Timestamp::parse(&text), Some(t.clone()));
            prop_assert_eq!(t.hash(), Timestamp::parse(&text).unwrap().hash());
        }

        #[test]
        fn ordering_matches_string_order(
            a in (0u64..=MAX_MILLIS, any::<u16>(), "[0-9A-F]{16}"),
            b in (0u64..=MAX_MILLIS, any::<u16>(), "[0-9A-F]{16}"),
        ) {
            let a = Timestamp::new(a.0, a.1, a.2);
            let b = Timestamp::new(b.0, b.1, b.2);
            prop_assert_eq!(a.cmp(&b), a.to_string().cmp(&b.to_string()));
        }
    }
}
