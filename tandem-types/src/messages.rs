//! Protocol frames and their JSON-array codec.
//!
//! Every frame is a UTF-8 JSON array whose first element is the message tag,
//! delivered as one transport message. The codec is strict: unknown tags,
//! wrong arity, wrong element types, and reserved trailing elements all fail
//! to decode, so a node can answer `wrong-format` / `unknown-message` with
//! the offending input echoed back.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::{Action, Entry, ErrorKind, Meta};

/// The sync protocol version spoken by this crate.
pub const PROTOCOL: u32 = 1;

/// Optional handshake block carried by `connect` and `connected`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthBlock {
    /// Opaque credentials checked by the peer's authenticator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Value>,

    /// Application subprotocol version, e.g. `"1.2.0"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subprotocol: Option<String>,
}

/// Errors from the JSON-array codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The input was not a frame of any known shape. Carries the raw text so
    /// it can be echoed back in a `wrong-format` error frame.
    #[error("wrong message format: {0}")]
    WrongFormat(String),

    /// The frame was well-formed but its tag is not part of the vocabulary.
    /// Carries the tag for the `unknown-message` error frame.
    #[error("unknown message type: {0}")]
    UnknownMessage(String),

    /// Serialization failed.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Handshake opener, client to server.
    Connect {
        /// Sync protocol version of the sender.
        protocol: u32,
        /// The client log's node id.
        node_id: String,
        /// The client store's last assigned `added`.
        synced: u64,
        /// Credentials and subprotocol.
        auth: Option<AuthBlock>,
    },

    /// Handshake reply, server to client.
    Connected {
        /// Sync protocol version of the sender.
        protocol: u32,
        /// The server log's node id.
        node_id: String,
        /// Server wallclock at `connect` receive and at `connected` send,
        /// used for clock-skew correction.
        times: (i64, i64),
        /// Credentials and subprotocol.
        auth: Option<AuthBlock>,
    },

    /// Liveness probe carrying the sender's highest assigned `added`.
    Ping {
        /// The sender's `get_last_added`.
        synced: u64,
    },

    /// Liveness answer carrying the responder's highest assigned `added`.
    Pong {
        /// The responder's `get_last_added`.
        synced: u64,
    },

    /// A batch of actions. `added` is the highest sender-side insertion
    /// counter the batch covers; entries follow in ascending `added` order.
    /// A batch may carry no entries at all when everything it covers was
    /// filtered away: the counter still advances the receiver's bookmark.
    Sync {
        /// Highest sender-side `added` covered by the batch.
        added: u64,
        /// The `(action, meta)` pairs, flattened on the wire.
        entries: Vec<Entry>,
    },

    /// Acknowledgment of a `sync` batch up to `added`.
    Synced {
        /// The acknowledged counter.
        added: u64,
    },

    /// Diagnostic channel; allowed before authentication.
    Debug {
        /// Diagnostic kind, e.g. `"error"`.
        kind: String,
        /// Arbitrary payload.
        data: Value,
    },

    /// A protocol error report.
    Error {
        /// What went wrong.
        kind: ErrorKind,
        /// Optional payload, e.g. the offending raw frame.
        options: Option<Value>,
    },
}

impl Message {
    /// The wire tag of this frame.
    pub fn tag(&self) -> &'static str {
        match self {
            Message::Connect { .. } => "connect",
            Message::Connected { .. } => "connected",
            Message::Ping { .. } => "ping",
            Message::Pong { .. } => "pong",
            Message::Sync { .. } => "sync",
            Message::Synced { .. } => "synced",
            Message::Debug { .. } => "debug",
            Message::Error { .. } => "error",
        }
    }

    /// Serialize to a JSON frame.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(&self.to_value()?)?)
    }

    /// Build the JSON-array form of this frame.
    pub fn to_value(&self) -> Result<Value, CodecError> {
        let frame = match self {
            Message::Connect {
                protocol,
                node_id,
                synced,
                auth,
            } => {
                let mut frame = vec![json!("connect"), json!(protocol), json!(node_id), json!(synced)];
                if let Some(auth) = auth {
                    frame.push(serde_json::to_value(auth)?);
                }
                frame
            }
            Message::Connected {
                protocol,
                node_id,
                times,
                auth,
            } => {
                let mut frame = vec![
                    json!("connected"),
                    json!(protocol),
                    json!(node_id),
                    json!([times.0, times.1]),
                ];
                if let Some(auth) = auth {
                    frame.push(serde_json::to_value(auth)?);
                }
                frame
            }
            Message::Ping { synced } => vec![json!("ping"), json!(synced)],
            Message::Pong { synced } => vec![json!("pong"), json!(synced)],
            Message::Sync { added, entries } => {
                let mut frame = vec![json!("sync"), json!(added)];
                for entry in entries {
                    frame.push(serde_json::to_value(&entry.action)?);
                    frame.push(serde_json::to_value(&entry.meta)?);
                }
                frame
            }
            Message::Synced { added } => vec![json!("synced"), json!(added)],
            Message::Debug { kind, data } => vec![json!("debug"), json!(kind), data.clone()],
            Message::Error { kind, options } => {
                let mut frame = vec![json!("error"), json!(kind.as_str())];
                if let Some(options) = options {
                    frame.push(options.clone());
                }
                frame
            }
        };
        Ok(Value::Array(frame))
    }

    /// Parse a raw transport frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let raw = || String::from_utf8_lossy(bytes).into_owned();
        let value: Value =
            serde_json::from_slice(bytes).map_err(|_| CodecError::WrongFormat(raw()))?;
        Self::from_value(&value).map_err(|err| match err {
            // Echo the original input, not its re-serialization.
            CodecError::WrongFormat(_) => CodecError::WrongFormat(raw()),
            other => other,
        })
    }

    /// Parse an already-deserialized JSON value.
    pub fn from_value(value: &Value) -> Result<Self, CodecError> {
        let wrong = || CodecError::WrongFormat(value.to_string());

        let items = value.as_array().ok_or_else(wrong)?;
        let (tag, rest) = items.split_first().ok_or_else(wrong)?;
        let tag = tag.as_str().ok_or_else(wrong)?;

        match tag {
            "connect" => {
                if rest.len() < 3 || rest.len() > 4 {
                    return Err(wrong());
                }
                Ok(Message::Connect {
                    protocol: as_u32(&rest[0]).ok_or_else(wrong)?,
                    node_id: rest[1].as_str().ok_or_else(wrong)?.to_string(),
                    synced: rest[2].as_u64().ok_or_else(wrong)?,
                    auth: decode_auth(rest.get(3)).map_err(|_| wrong())?,
                })
            }
            "connected" => {
                if rest.len() < 3 || rest.len() > 4 {
                    return Err(wrong());
                }
                let times = rest[2].as_array().ok_or_else(wrong)?;
                if times.len() != 2 {
                    return Err(wrong());
                }
                Ok(Message::Connected {
                    protocol: as_u32(&rest[0]).ok_or_else(wrong)?,
                    node_id: rest[1].as_str().ok_or_else(wrong)?.to_string(),
                    times: (
                        times[0].as_i64().ok_or_else(wrong)?,
                        times[1].as_i64().ok_or_else(wrong)?,
                    ),
                    auth: decode_auth(rest.get(3)).map_err(|_| wrong())?,
                })
            }
            "ping" | "pong" => {
                if rest.len() != 1 {
                    return Err(wrong());
                }
                let synced = rest[0].as_u64().ok_or_else(wrong)?;
                Ok(if tag == "ping" {
                    Message::Ping { synced }
                } else {
                    Message::Pong { synced }
                })
            }
            "sync" => {
                let (added, pairs) = rest.split_first().ok_or_else(wrong)?;
                let added = added.as_u64().ok_or_else(wrong)?;
                if pairs.len() % 2 != 0 {
                    return Err(wrong());
                }
                let mut entries = Vec::with_capacity(pairs.len() / 2);
                for pair in pairs.chunks(2) {
                    let action: Action =
                        serde_json::from_value(pair[0].clone()).map_err(|_| wrong())?;
                    if action.kind.is_empty() {
                        return Err(wrong());
                    }
                    let meta: Meta = serde_json::from_value(pair[1].clone()).map_err(|_| wrong())?;
                    entries.push(Entry::new(action, meta));
                }
                Ok(Message::Sync { added, entries })
            }
            "synced" => {
                if rest.len() != 1 {
                    return Err(wrong());
                }
                Ok(Message::Synced {
                    added: rest[0].as_u64().ok_or_else(wrong)?,
                })
            }
            "debug" => {
                if rest.len() != 2 {
                    return Err(wrong());
                }
                Ok(Message::Debug {
                    kind: rest[0].as_str().ok_or_else(wrong)?.to_string(),
                    data: rest[1].clone(),
                })
            }
            "error" => {
                if rest.is_empty() || rest.len() > 2 {
                    return Err(wrong());
                }
                Ok(Message::Error {
                    kind: ErrorKind::from_wire(rest[0].as_str().ok_or_else(wrong)?),
                    options: rest.get(1).cloned(),
                })
            }
            other => Err(CodecError::UnknownMessage(other.to_string())),
        }
    }
}

fn as_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|n| u32::try_from(n).ok())
}

fn decode_auth(value: Option<&Value>) -> Result<Option<AuthBlock>, serde_json::Error> {
    value
        .map(|v| serde_json::from_value(v.clone()))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Action, ActionId, Meta};
    use serde_json::json;

    fn decode(json: &str) -> Result<Message, CodecError> {
        Message::decode(json.as_bytes())
    }

    fn id(time: i64, node: &str, seq: u64) -> ActionId {
        ActionId::new(time, node, seq).unwrap()
    }

    // ===========================================
    // Handshake frames
    // ===========================================

    #[test]
    fn connect_frame_shape() {
        let msg = Message::Connect {
            protocol: PROTOCOL,
            node_id: "client".into(),
            synced: 0,
            auth: None,
        };
        let encoded = String::from_utf8(msg.encode().unwrap()).unwrap();
        assert_eq!(encoded, "[\"connect\",1,\"client\",0]");
        assert_eq!(decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn connected_frame_carries_both_times() {
        let msg = Message::Connected {
            protocol: PROTOCOL,
            node_id: "server".into(),
            times: (2, 3),
            auth: None,
        };
        let encoded = String::from_utf8(msg.encode().unwrap()).unwrap();
        assert_eq!(encoded, "[\"connected\",1,\"server\",[2,3]]");
        assert_eq!(decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn connect_with_auth_block() {
        let original = Message::Connect {
            protocol: PROTOCOL,
            node_id: "client".into(),
            synced: 5,
            auth: Some(AuthBlock {
                credentials: Some(json!("secret")),
                subprotocol: Some("1.0.0".into()),
            }),
        };
        let bytes = original.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), original);
    }

    #[test]
    fn auth_block_rejects_unknown_fields() {
        let err = decode("[\"connect\",1,\"client\",0,{\"token\":1}]").unwrap_err();
        assert!(matches!(err, CodecError::WrongFormat(_)));
    }

    // ===========================================
    // Sync frames
    // ===========================================

    #[test]
    fn sync_frame_flattens_pairs() {
        let entry = |time: i64| Entry::new(Action::new("tick"), Meta::new(id(time, "client", 0)));
        let msg = Message::Sync {
            added: 5,
            entries: vec![entry(1), entry(2)],
        };
        let value = msg.to_value().unwrap();
        let frame = value.as_array().unwrap();
        assert_eq!(frame.len(), 6);
        assert_eq!(frame[0], "sync");
        assert_eq!(frame[1], 5);
        assert_eq!(frame[2]["type"], "tick");
        assert_eq!(frame[3]["id"], "1 client 0");
    }

    #[test]
    fn sync_rejects_dangling_action() {
        let err = decode("[\"sync\",1,{\"type\":\"tick\"}]").unwrap_err();
        assert!(matches!(err, CodecError::WrongFormat(_)));
    }

    #[test]
    fn sync_rejects_actions_without_type() {
        let err = decode("[\"sync\",1,{\"a\":1},{\"id\":\"1 a 0\",\"time\":1}]").unwrap_err();
        assert!(matches!(err, CodecError::WrongFormat(_)));
    }

    #[test]
    fn sync_roundtrips_meta_reasons() {
        let meta = Meta::new(id(1, "client", 0)).with_reason("chat");
        let msg = Message::Sync {
            added: 1,
            entries: vec![Entry::new(Action::new("tick"), meta)],
        };
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    // ===========================================
    // Malformed input
    // ===========================================

    #[test]
    fn non_json_is_wrong_format() {
        let err = Message::decode(b"not json").unwrap_err();
        match err {
            CodecError::WrongFormat(raw) => assert_eq!(raw, "not json"),
            other => panic!("expected wrong-format, got {other:?}"),
        }
    }

    #[test]
    fn non_array_echoes_raw_input() {
        let err = decode("{\"hi\":1}").unwrap_err();
        match err {
            CodecError::WrongFormat(raw) => assert_eq!(raw, "{\"hi\":1}"),
            other => panic!("expected wrong-format, got {other:?}"),
        }
    }

    #[test]
    fn trailing_elements_are_reserved() {
        assert!(matches!(
            decode("[\"ping\",1,2]").unwrap_err(),
            CodecError::WrongFormat(_)
        ));
        assert!(matches!(
            decode("[\"connect\",1,\"client\",0,{},true]").unwrap_err(),
            CodecError::WrongFormat(_)
        ));
    }

    #[test]
    fn unknown_tag_is_reported_separately() {
        match decode("[\"subscribe\",\"chat\"]").unwrap_err() {
            CodecError::UnknownMessage(tag) => assert_eq!(tag, "subscribe"),
            other => panic!("expected unknown-message, got {other:?}"),
        }
    }

    #[test]
    fn error_frame_parses_kind_and_payload() {
        let msg = decode("[\"error\",\"wrong-protocol\",{\"supported\":1,\"used\":0}]").unwrap();
        match msg {
            Message::Error { kind, options } => {
                assert_eq!(kind, ErrorKind::WrongProtocol);
                assert_eq!(options.unwrap()["supported"], 1);
            }
            other => panic!("expected error frame, got {other:?}"),
        }
    }
}
