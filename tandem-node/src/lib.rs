//! # tandem-node
//!
//! The protocol state machine of the Tandem action-log sync protocol.
//!
//! A [`Node`] owns one [`tandem_log::Log`] and one [`Connection`]. It drives
//! the version/authentication handshake, streams pending actions in both
//! directions, corrects clock skew, detects dead peers, and surfaces
//! everything observable through a typed event stream.
//!
//! ## Architecture
//!
//! ```text
//! Application ── Log ──┐
//!                      ├── Node (state machine) ── Connection ── peer
//! events  ◄────────────┘
//! ```
//!
//! The two handshake roles are [`ClientNode`] (sends `connect`) and
//! [`ServerNode`] (awaits `connect`). Everything after the handshake is
//! symmetric.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod client;
mod config;
mod connection;
mod events;
mod node;
mod server;
mod timefix;

pub use client::ClientNode;
pub use config::{
    AuthError, Authenticator, ConnectHook, EntryFilter, EntryMap, NodeOptions, RemoteInfo,
    DEFAULT_SUBPROTOCOL,
};
pub use connection::{Connection, ConnectionError, MemoryConnection};
pub use events::{NodeEvent, NodeState};
pub use node::{Node, NodeError};
pub use server::{BruteforceGuard, ServerNode};
pub use timefix::TimeFix;
