//! Protocol-level error types.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// The kind of a protocol error, as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A frame could not be parsed as a known message shape.
    WrongFormat,
    /// A well-formed frame carried an unknown tag.
    UnknownMessage,
    /// The peer's protocol version is below the supported minimum.
    WrongProtocol,
    /// The peer's application subprotocol was rejected.
    WrongSubprotocol,
    /// Authentication failed.
    WrongCredentials,
    /// The peer went silent past the liveness deadline.
    Timeout,
    /// Too many failed authentication attempts.
    Bruteforce,
    /// An application-defined error raised by an auth or connect hook.
    Custom(String),
}

impl ErrorKind {
    /// The wire string for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::WrongFormat => "wrong-format",
            ErrorKind::UnknownMessage => "unknown-message",
            ErrorKind::WrongProtocol => "wrong-protocol",
            ErrorKind::WrongSubprotocol => "wrong-subprotocol",
            ErrorKind::WrongCredentials => "wrong-credentials",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Bruteforce => "bruteforce",
            ErrorKind::Custom(kind) => kind,
        }
    }

    /// Parse a wire string; unknown strings become [`ErrorKind::Custom`].
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "wrong-format" => ErrorKind::WrongFormat,
            "unknown-message" => ErrorKind::UnknownMessage,
            "wrong-protocol" => ErrorKind::WrongProtocol,
            "wrong-subprotocol" => ErrorKind::WrongSubprotocol,
            "wrong-credentials" => ErrorKind::WrongCredentials,
            "timeout" => ErrorKind::Timeout,
            "bruteforce" => ErrorKind::Bruteforce,
            other => ErrorKind::Custom(other.to_string()),
        }
    }

    /// Informational errors are reported through the event surface but are
    /// never raised as hard failures when received from a peer.
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::WrongProtocol | ErrorKind::WrongSubprotocol
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol error, either produced locally or delivered by the peer.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct SyncError {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Optional payload carried with the error frame.
    pub options: Option<Value>,
    /// True when the error was delivered by the peer rather than raised here.
    pub received: bool,
}

impl SyncError {
    /// An error raised on this side of the connection.
    pub fn local(kind: ErrorKind) -> Self {
        Self {
            kind,
            options: None,
            received: false,
        }
    }

    /// An error delivered by the peer.
    pub fn received(kind: ErrorKind, options: Option<Value>) -> Self {
        Self {
            kind,
            options,
            received: true,
        }
    }

    /// Attach a payload, builder style.
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }

    /// See [`ErrorKind::is_informational`].
    pub fn is_informational(&self) -> bool {
        self.kind.is_informational()
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = if self.received { "peer reported" } else { "sync" };
        match &self.options {
            Some(options) => write!(f, "{} error: {} ({})", source, self.kind, options),
            None => write!(f, "{} error: {}", source, self.kind),
        }
    }
}
