//! Identity types for Tandem.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing or constructing an [`ActionId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// The id did not have exactly three space-separated parts.
    #[error("action id must be \"<time> <node> <seq>\"")]
    Parts,

    /// The time part was not a decimal number.
    #[error("action id time must be decimal digits")]
    Time,

    /// The sequence part was not a decimal number.
    #[error("action id sequence must be decimal digits")]
    Sequence,

    /// The node part was empty or contained a space or tab.
    #[error("node id must be non-empty and free of spaces and tabs")]
    Node,
}

/// A globally unique identifier for an action.
///
/// The string form is `"<time> <node> <seq>"`: the logical creation time in
/// milliseconds, the id of the log that created the action, and a sequence
/// number disambiguating actions created in the same millisecond.
///
/// Ids order by `(time, node, seq)`: time and sequence numerically, the node
/// component lexicographically. This is *not* the same as ordering the string
/// form (`"1 1 2"` sorts before `"1 11 1"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionId {
    time: i64,
    node: String,
    seq: u64,
}

impl ActionId {
    /// Create an id from its parts.
    ///
    /// The node id must be non-empty and must not contain spaces or tabs,
    /// otherwise the string form would not round-trip.
    pub fn new(time: i64, node: impl Into<String>, seq: u64) -> Result<Self, IdError> {
        let node = node.into();
        if node.is_empty() || node.contains(' ') || node.contains('\t') {
            return Err(IdError::Node);
        }
        Ok(Self { time, node, seq })
    }

    /// The logical creation time in milliseconds.
    pub fn time(&self) -> i64 {
        self.time
    }

    /// The id of the log that created the action.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// The per-millisecond sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.time, self.node, self.seq)
    }
}

impl FromStr for ActionId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(' ');
        let (time, node, seq) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(time), Some(node), Some(seq), None) => (time, node, seq),
            _ => return Err(IdError::Parts),
        };
        if time.is_empty() || !time.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdError::Time);
        }
        let time = time.parse::<i64>().map_err(|_| IdError::Time)?;
        if seq.is_empty() || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdError::Sequence);
        }
        let seq = seq.parse::<u64>().map_err(|_| IdError::Sequence)?;
        Self::new(time, node, seq)
    }
}

impl Ord for ActionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.node.cmp(&other.node))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for ActionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for ActionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ActionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let id: ActionId = "1487805099387 100:uImkcF4z 0".parse().unwrap();
        assert_eq!(id.time(), 1487805099387);
        assert_eq!(id.node(), "100:uImkcF4z");
        assert_eq!(id.seq(), 0);
        assert_eq!(id.to_string(), "1487805099387 100:uImkcF4z 0");
    }

    #[test]
    fn rejects_malformed_ids() {
        assert_eq!("1 a".parse::<ActionId>(), Err(IdError::Parts));
        assert_eq!("1 a 2 3".parse::<ActionId>(), Err(IdError::Parts));
        assert_eq!("x a 2".parse::<ActionId>(), Err(IdError::Time));
        assert_eq!("-1 a 2".parse::<ActionId>(), Err(IdError::Time));
        assert_eq!("1 a x".parse::<ActionId>(), Err(IdError::Sequence));
        assert_eq!("1  2".parse::<ActionId>(), Err(IdError::Node));
    }

    #[test]
    fn rejects_bad_node_ids() {
        assert_eq!(ActionId::new(1, "", 0), Err(IdError::Node));
        assert_eq!(ActionId::new(1, "a\tb", 0), Err(IdError::Node));
    }

    #[test]
    fn orders_by_parts_not_string() {
        let a: ActionId = "1 1 2".parse().unwrap();
        let b: ActionId = "1 11 1".parse().unwrap();
        assert!(a < b);

        let c: ActionId = "2 a 0".parse().unwrap();
        let d: ActionId = "10 a 0".parse().unwrap();
        assert!(c < d);
    }

    #[test]
    fn serde_uses_string_form() {
        let id: ActionId = "1 server 0".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"1 server 0\"");
        let back: ActionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<ActionId>("\"1 a\"").is_err());
    }
}
