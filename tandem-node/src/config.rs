//! Node configuration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tandem_types::{Action, Meta, SyncError, PROTOCOL};
use thiserror::Error;

/// The default application subprotocol, advertised when nothing was set.
pub const DEFAULT_SUBPROTOCOL: &str = "0.0.0";

/// What the handshake revealed about the peer.
#[derive(Debug, Clone)]
pub struct RemoteInfo {
    /// The peer log's node id.
    pub node_id: String,
    /// The peer's sync protocol version.
    pub protocol: u32,
    /// The peer's application subprotocol, when it sent one.
    pub subprotocol: Option<String>,
}

/// Failure modes of an [`Authenticator`].
#[derive(Debug, Error)]
pub enum AuthError {
    /// A protocol error to deliver to the peer before disconnecting,
    /// e.g. `wrong-subprotocol`.
    #[error(transparent)]
    Domain(#[from] SyncError),

    /// An infrastructure failure. Surfaced locally; the connection closes
    /// without a wire error.
    #[error("authenticator failure: {0}")]
    Internal(String),
}

/// Validates the credentials a peer presented in its handshake.
///
/// Returning `Ok(false)` rejects the peer with `wrong-credentials`.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Decide whether a peer may connect.
    async fn authenticate(
        &self,
        credentials: Option<&Value>,
        node_id: &str,
    ) -> Result<bool, AuthError>;
}

/// Drops entries from a stream when it returns `false`.
pub type EntryFilter = Arc<dyn Fn(&Action, &Meta) -> bool + Send + Sync>;

/// Rewrites entries in a stream.
pub type EntryMap = Arc<dyn Fn(Action, Meta) -> (Action, Meta) + Send + Sync>;

/// Validates the peer after authentication, e.g. a subprotocol check.
/// A returned error is sent on the wire and the connection closed.
pub type ConnectHook = Arc<dyn Fn(&RemoteInfo) -> Result<(), SyncError> + Send + Sync>;

/// Configuration for a [`crate::Node`].
#[derive(Clone, Default)]
pub struct NodeOptions {
    /// Application subprotocol advertised to the peer.
    /// Default: [`DEFAULT_SUBPROTOCOL`].
    pub subprotocol: Option<String>,

    /// Opaque credentials sent in the handshake.
    pub credentials: Option<Value>,

    /// Peer-side authenticator. `None` accepts everyone.
    pub auth: Option<Arc<dyn Authenticator>>,

    /// Handshake and liveness deadline. [`Duration::ZERO`] disables.
    /// Default: 20 s.
    pub timeout: Option<Duration>,

    /// Idle interval before probing the peer with `ping`.
    /// [`Duration::ZERO`] disables. Default: 10 s.
    pub ping: Option<Duration>,

    /// Enable clock-skew correction during the handshake.
    pub fix_time: bool,

    /// Lowest peer protocol version this node accepts.
    /// Default: the crate's own [`PROTOCOL`].
    pub min_protocol: Option<u32>,

    /// Applied to incoming entries before `in_filter`.
    pub in_map: Option<EntryMap>,

    /// Drops incoming entries when it returns `false`.
    pub in_filter: Option<EntryFilter>,

    /// Applied to outgoing entries before `out_filter`.
    pub out_map: Option<EntryMap>,

    /// Omits outgoing entries when it returns `false`.
    pub out_filter: Option<EntryFilter>,

    /// Runs after authentication with the peer's handshake info.
    pub on_connect: Option<ConnectHook>,
}

impl NodeOptions {
    /// Options with every default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the advertised subprotocol.
    pub fn subprotocol(mut self, version: impl Into<String>) -> Self {
        self.subprotocol = Some(version.into());
        self
    }

    /// Set the handshake credentials.
    pub fn credentials(mut self, credentials: Value) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Install an authenticator.
    pub fn auth(mut self, auth: impl Authenticator + 'static) -> Self {
        self.auth = Some(Arc::new(auth));
        self
    }

    /// Set the handshake/liveness deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the idle-ping interval.
    pub fn ping(mut self, ping: Duration) -> Self {
        self.ping = Some(ping);
        self
    }

    /// Enable clock-skew correction.
    pub fn fix_time(mut self) -> Self {
        self.fix_time = true;
        self
    }

    /// Install a connect hook.
    pub fn on_connect(
        mut self,
        hook: impl Fn(&RemoteInfo) -> Result<(), SyncError> + Send + Sync + 'static,
    ) -> Self {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    pub(crate) fn effective_subprotocol(&self) -> &str {
        self.subprotocol.as_deref().unwrap_or(DEFAULT_SUBPROTOCOL)
    }

    pub(crate) fn effective_timeout(&self) -> Duration {
        self.timeout.unwrap_or(Duration::from_secs(20))
    }

    pub(crate) fn effective_ping(&self) -> Duration {
        self.ping.unwrap_or(Duration::from_secs(10))
    }

    pub(crate) fn effective_min_protocol(&self) -> u32 {
        self.min_protocol.unwrap_or(PROTOCOL)
    }
}

impl std::fmt::Debug for NodeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeOptions")
            .field("subprotocol", &self.effective_subprotocol())
            .field("credentials", &self.credentials.is_some())
            .field("auth", &self.auth.is_some())
            .field("timeout", &self.effective_timeout())
            .field("ping", &self.effective_ping())
            .field("fix_time", &self.fix_time)
            .field("min_protocol", &self.effective_min_protocol())
            .finish_non_exhaustive()
    }
}
