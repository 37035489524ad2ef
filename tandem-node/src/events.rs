//! The observable surface of a node.

use tandem_types::{Entry, SyncError};

/// Protocol states of a node.
///
/// ```text
/// Disconnected -> Connecting -> (SendingConnect | WaitingConnect)
///     -> Authenticating -> Synchronized <-> Sending -> Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No transport, or the connection has ended.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Client role: `connect` sent, waiting for `connected`.
    SendingConnect,
    /// Server role: waiting for the peer's `connect`.
    WaitingConnect,
    /// Handshake received, running authentication and connect hooks.
    Authenticating,
    /// A `sync` batch is in flight, waiting for its `synced` ack.
    Sending,
    /// Every local action is acknowledged by the peer, and everything the
    /// peer has reported holding has been received here.
    Synchronized,
}

/// Events broadcast by a node.
///
/// `Connect` fires once the peer's handshake message has been validated and
/// authenticated; `Connected` when the node is fully operational (skew
/// correction applied, sync about to start).
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// The peer's handshake passed validation and authentication.
    Connect {
        /// The peer log's node id.
        node_id: String,
    },
    /// The handshake is complete and synchronization is starting.
    Connected,
    /// The connection ended.
    Disconnect {
        /// Close reason, when one is known.
        reason: Option<String>,
    },
    /// The node moved to a new protocol state.
    State(NodeState),
    /// Both directions are current: local actions up to `added` are
    /// acknowledged, and the peer's reported backlog has been received.
    Synchronized {
        /// The acknowledged `added` counter.
        added: u64,
    },
    /// A received action was applied to the local log.
    Add(Entry),
    /// A diagnostic `debug` frame arrived from the peer.
    Debug {
        /// Diagnostic kind.
        kind: String,
        /// Arbitrary payload.
        data: serde_json::Value,
    },
    /// An error frame was sent to the peer.
    ClientError(SyncError),
    /// A local or received protocol error.
    Error(SyncError),
}
