//! The log data model: actions, their metadata, and the total order over them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::ActionId;

/// A user-supplied log action.
///
/// The only required attribute is a non-empty `type` naming the action kind;
/// every other field is an opaque JSON payload carried verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// The action type, e.g. `"user/rename"`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Open payload fields, flattened into the same JSON object.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Action {
    /// Create an action with no payload fields.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    /// Add a payload field, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Metadata paired with an action.
///
/// `id`, `time`, `added`, and `subprotocol` are read-only once assigned;
/// [`MetaDiff`] carries them only so that the change-meta API can reject
/// attempts to touch them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Globally unique action id; the primary key.
    pub id: ActionId,

    /// Creation time in milliseconds. Defaults to the id's time prefix.
    /// Base-relative and skew-corrected on the wire.
    pub time: i64,

    /// Store-assigned insertion counter, `>= 1` once persisted. Never sent
    /// on the wire: the receiving store assigns its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<u64>,

    /// Retention tags. An entry with no reasons is purged.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub reasons: BTreeSet<String>,

    /// The sender's subprotocol version, set by the node on receive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subprotocol: Option<String>,

    /// Transient convenience tag: replaces earlier actions carrying the same
    /// tag, then becomes a reason. Consumed by `Log::add`, never serialized.
    #[serde(skip)]
    pub keep_last: Option<String>,
}

impl Meta {
    /// Create metadata for a fresh action. Time defaults to the id's prefix.
    pub fn new(id: ActionId) -> Self {
        Self {
            time: id.time(),
            id,
            added: None,
            reasons: BTreeSet::new(),
            subprotocol: None,
            keep_last: None,
        }
    }

    /// Add a retention reason, builder style.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.insert(reason.into());
        self
    }
}

/// An `(action, meta)` pair as stored in a log.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// The user payload.
    pub action: Action,
    /// Its metadata.
    pub meta: Meta,
}

impl Entry {
    /// Pair an action with its metadata.
    pub fn new(action: Action, meta: Meta) -> Self {
        Self { action, meta }
    }
}

/// A partial update applied to stored metadata.
///
/// Only `reasons` is mutable. The read-only fields are present so the
/// change-meta API can detect and reject attempts to rewrite them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaDiff {
    /// Replacement reason set. An empty set purges the entry.
    pub reasons: Option<BTreeSet<String>>,

    /// Rejected: ids are immutable.
    pub id: Option<ActionId>,
    /// Rejected: creation time is immutable.
    pub time: Option<i64>,
    /// Rejected: the insertion counter is store-owned.
    pub added: Option<u64>,
    /// Rejected: the subprotocol tag is node-owned.
    pub subprotocol: Option<String>,
}

impl MetaDiff {
    /// A diff replacing the reason set.
    pub fn reasons<I, S>(reasons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reasons: Some(reasons.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// True when the diff touches a field that is read-only once assigned.
    pub fn touches_read_only(&self) -> bool {
        self.id.is_some() || self.time.is_some() || self.added.is_some() || self.subprotocol.is_some()
    }
}

/// Strict total order over optional metadata: is `first` older than `second`?
///
/// An absent meta is older than any present one. Present metas compare by
/// `time`, then by the id's node component lexicographically, then by the
/// id's sequence number, then by the id's time prefix. Equal ids are neither
/// older nor younger.
pub fn is_older(first: Option<&Meta>, second: Option<&Meta>) -> bool {
    let (a, b) = match (first, second) {
        (Some(a), Some(b)) => (a, b),
        (None, Some(_)) => return true,
        (Some(_), None) | (None, None) => return false,
    };

    if a.time != b.time {
        return a.time < b.time;
    }
    if a.id.node() != b.id.node() {
        return a.id.node() < b.id.node();
    }
    if a.id.seq() != b.id.seq() {
        return a.id.seq() < b.id.seq();
    }
    if a.id.time() != b.id.time() {
        return a.id.time() < b.id.time();
    }
    false
}
