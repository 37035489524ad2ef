//! Transport abstraction.
//!
//! A [`Connection`] delivers opaque frames in order, in both directions.
//! The node owns the JSON codec: frames cross this interface as raw bytes so
//! that undecodable input can still be echoed back in a `wrong-format`
//! error. Concrete network transports (WebSocket and friends) live outside
//! this crate; [`MemoryConnection`] is the in-process implementation every
//! test is built on.

mod memory;

pub use memory::MemoryConnection;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Opening the transport failed.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The transport is not open.
    #[error("not connected")]
    NotConnected,

    /// The peer is gone.
    #[error("connection closed")]
    Closed,

    /// A frame could not be delivered.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// A bidirectional, ordered, message-oriented transport.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Open the transport. Resolves once frames can flow.
    async fn connect(&self) -> Result<(), ConnectionError>;

    /// Close the transport. Idempotent.
    async fn disconnect(&self);

    /// Deliver one frame to the peer.
    async fn send(&self, frame: Vec<u8>) -> Result<(), ConnectionError>;

    /// Receive the next frame. Returns [`ConnectionError::Closed`] once the
    /// peer is gone.
    async fn recv(&self) -> Result<Vec<u8>, ConnectionError>;

    /// Is the transport currently open?
    fn is_connected(&self) -> bool;
}
