//! The protocol state machine shared by both handshake roles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tandem_log::{
    Iteration, LastSynced, Log, LogError, NewMeta, Order, StoreError, SyncedUpdate,
};
use tandem_types::{AuthBlock, CodecError, Entry, ErrorKind, Message, SyncError, PROTOCOL};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::Instant;

use crate::config::{AuthError, NodeOptions, RemoteInfo, DEFAULT_SUBPROTOCOL};
use crate::connection::{Connection, ConnectionError};
use crate::events::{NodeEvent, NodeState};
use crate::server::BruteforceGuard;
use crate::timefix::TimeFix;

/// Which side of the handshake this node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Client,
    Server,
}

/// Errors surfaced by a node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A protocol error, local or received.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The transport failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The log rejected an operation.
    #[error(transparent)]
    Log(#[from] LogError),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A frame could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The authenticator failed for non-protocol reasons.
    #[error("authenticator failure: {0}")]
    Auth(String),
}

struct ProtocolState {
    state: NodeState,
    connected: bool,
    remote: Option<RemoteInfo>,
    /// The peer's highest known `added` counter: seeded from its `connect`
    /// frame on the server, folded forward from every `sync`, `ping`, and
    /// `pong`. `None` until the peer has told us — the `connected` frame
    /// carries no counter, so a client starts out not knowing.
    remote_last_added: Option<u64>,
    time: TimeFix,
    /// Local clock when the client role sent `connect`.
    connect_sent_at: i64,
    /// `added` of the sync batch awaiting its `synced` ack.
    unacked: Option<u64>,
    last_error: Option<SyncError>,
    /// Frames that arrived before authentication completed.
    buffered: Vec<Message>,
}

struct Liveness {
    last_received: Instant,
    /// Set while an answer is due: during the handshake, and after an idle
    /// ping. The timeout deadline counts from here.
    waiting_since: Option<Instant>,
}

/// The protocol state machine pairing one [`Log`] with one [`Connection`].
///
/// Constructed through [`crate::ClientNode`] or [`crate::ServerNode`]; the
/// two roles differ only in who opens the handshake. Cloning yields another
/// handle onto the same node.
pub struct Node<C: Connection> {
    shared: Arc<Shared<C>>,
}

impl<C: Connection> Clone for Node<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<C: Connection> {
    role: Role,
    log: Arc<Log>,
    connection: C,
    options: NodeOptions,
    guard: Option<BruteforceGuard>,
    state: Mutex<ProtocolState>,
    events: broadcast::Sender<NodeEvent>,
    wake_tx: mpsc::UnboundedSender<()>,
    wake_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
    shutdown: Notify,
    destroyed: AtomicBool,
    hook: Mutex<Option<tandem_log::HookHandle>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<C: Connection> Node<C> {
    pub(crate) fn build(
        role: Role,
        log: Arc<Log>,
        connection: C,
        options: NodeOptions,
        guard: Option<BruteforceGuard>,
    ) -> Self {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);
        let shared = Arc::new(Shared {
            role,
            log,
            connection,
            options,
            guard,
            state: Mutex::new(ProtocolState {
                state: NodeState::Disconnected,
                connected: false,
                remote: None,
                remote_last_added: None,
                time: TimeFix::default(),
                connect_sent_at: 0,
                unacked: None,
                last_error: None,
                buffered: Vec::new(),
            }),
            events,
            wake_tx,
            wake_rx: Mutex::new(Some(wake_rx)),
            shutdown: Notify::new(),
            destroyed: AtomicBool::new(false),
            hook: Mutex::new(None),
            task: Mutex::new(None),
        });

        // Local additions wake the loop so they can be streamed to the peer.
        let wake = shared.wake_tx.clone();
        let handle = shared.log.on_add(move |_, _| {
            let _ = wake.send(());
        });
        *shared.hook.lock().unwrap() = Some(handle);

        Node { shared }
    }

    /// Open the transport and start the protocol loop.
    ///
    /// Idempotent: a node that is already running is left alone.
    pub async fn connect(&self) -> Result<(), NodeError> {
        if self.shared.task.lock().unwrap().is_some() {
            return Ok(());
        }
        self.shared.set_state(NodeState::Connecting);
        self.shared.connection.connect().await?;
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move { shared.run().await });
        *self.shared.task.lock().unwrap() = Some(task);
        Ok(())
    }

    /// Stop the loop, close the transport, and detach the log subscription.
    pub async fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        // notify_one stores a permit, so the loop also sees a shutdown that
        // fires while it is busy between two awaits.
        self.shared.shutdown.notify_one();
        self.shared.connection.disconnect().await;
        if let Some(handle) = self.shared.hook.lock().unwrap().take() {
            self.shared.log.unsubscribe(handle);
        }
    }

    /// The current protocol state.
    pub fn state(&self) -> NodeState {
        self.shared.state.lock().unwrap().state
    }

    /// True between a successful handshake and disconnect or terminal error.
    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().unwrap().connected
    }

    /// The last hard error this node saw, when one occurred.
    pub fn last_error(&self) -> Option<SyncError> {
        self.shared.state.lock().unwrap().last_error.clone()
    }

    /// The clock-skew correction agreed during the handshake.
    pub fn time_fix(&self) -> TimeFix {
        self.shared.state.lock().unwrap().time
    }

    /// The log this node synchronizes.
    pub fn log(&self) -> &Arc<Log> {
        &self.shared.log
    }

    /// Subscribe to the node's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.shared.events.subscribe()
    }

    /// Resolve once the node reaches the given state.
    pub async fn wait_for(&self, target: NodeState) {
        let mut events = self.subscribe();
        if self.state() == target {
            return;
        }
        loop {
            match events.recv().await {
                Ok(NodeEvent::State(state)) if state == target => return,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if self.state() == target {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Send a diagnostic `debug` frame to the peer.
    pub async fn send_debug(
        &self,
        kind: impl Into<String>,
        data: Value,
    ) -> Result<(), NodeError> {
        self.shared
            .send_msg(&Message::Debug {
                kind: kind.into(),
                data,
            })
            .await
    }
}

impl<C: Connection> Shared<C> {
    async fn run(self: Arc<Self>) {
        let result = self.drive().await;
        match &result {
            Ok(()) => {}
            Err(NodeError::Connection(ConnectionError::Closed)) => {}
            Err(err) => tracing::warn!(error = %err, "sync session ended with failure"),
        }

        self.connection.disconnect().await;
        if let Some(handle) = self.hook.lock().unwrap().take() {
            self.log.unsubscribe(handle);
        }
        let transitioned = {
            let mut state = self.state.lock().unwrap();
            let was = state.state;
            state.connected = false;
            state.state = NodeState::Disconnected;
            was != NodeState::Disconnected
        };
        if transitioned {
            self.emit(NodeEvent::State(NodeState::Disconnected));
            self.emit(NodeEvent::Disconnect { reason: None });
        }
    }

    async fn drive(&self) -> Result<(), NodeError> {
        match self.role {
            Role::Client => self.start_client().await?,
            Role::Server => self.set_state(NodeState::WaitingConnect),
        }

        let mut wake_rx = self
            .wake_rx
            .lock()
            .unwrap()
            .take()
            .expect("protocol loop started twice");

        let timeout = self.options.effective_timeout();
        let ping = self.options.effective_ping();
        let mut liveness = Liveness {
            last_received: Instant::now(),
            waiting_since: (!timeout.is_zero()).then(Instant::now),
        };

        loop {
            let deadline = self.next_deadline(&liveness, timeout, ping);
            tokio::select! {
                result = self.connection.recv() => match result {
                    Ok(frame) => {
                        liveness.last_received = Instant::now();
                        self.handle_frame(frame, &mut liveness).await?;
                    }
                    Err(_) => return Ok(()),
                },
                _ = wake_rx.recv() => self.flush_pending().await?,
                _ = sleep_until(deadline), if deadline.is_some() => {
                    if liveness.waiting_since.is_some() {
                        let err = SyncError::local(ErrorKind::Timeout)
                            .with_options(json!(timeout.as_millis() as u64));
                        return Err(self.fail_local(err).await);
                    }
                    let added = self.log.store().get_last_added().await?;
                    self.send_msg(&Message::Ping { synced: added }).await?;
                    liveness.waiting_since = Some(Instant::now());
                },
                _ = self.shutdown.notified() => return Ok(()),
            }
        }
    }

    fn next_deadline(
        &self,
        liveness: &Liveness,
        timeout: std::time::Duration,
        ping: std::time::Duration,
    ) -> Option<Instant> {
        if let Some(since) = liveness.waiting_since {
            (!timeout.is_zero()).then(|| since + timeout)
        } else if self.is_connected_now() && !ping.is_zero() {
            Some(liveness.last_received + ping)
        } else {
            None
        }
    }

    async fn start_client(&self) -> Result<(), NodeError> {
        self.set_state(NodeState::SendingConnect);
        // The handshake must carry the real counter, so wait for the store.
        let synced = self.log.store().get_last_added().await?;
        let sent_at = self.log.clock().now();
        self.state.lock().unwrap().connect_sent_at = sent_at;
        self.send_msg(&Message::Connect {
            protocol: PROTOCOL,
            node_id: self.log.node_id().to_string(),
            synced,
            auth: self.own_auth_block(),
        })
        .await
    }

    async fn handle_frame(
        &self,
        frame: Vec<u8>,
        liveness: &mut Liveness,
    ) -> Result<(), NodeError> {
        let message = match Message::decode(&frame) {
            Ok(message) => message,
            Err(CodecError::WrongFormat(raw)) => {
                let err =
                    SyncError::local(ErrorKind::WrongFormat).with_options(Value::String(raw));
                return Err(self.fail_local(err).await);
            }
            Err(CodecError::UnknownMessage(tag)) => {
                let err =
                    SyncError::local(ErrorKind::UnknownMessage).with_options(Value::String(tag));
                return Err(self.fail_local(err).await);
            }
            Err(other) => return Err(other.into()),
        };
        tracing::trace!(tag = message.tag(), "frame received");

        match message {
            Message::Connect {
                protocol,
                node_id,
                synced,
                auth,
            } => {
                if self.role != Role::Server
                    || self.current_state() != NodeState::WaitingConnect
                {
                    return Err(self.unexpected("connect").await);
                }
                let buffered = self
                    .on_connect_frame(protocol, node_id, synced, auth, liveness)
                    .await?;
                for queued in buffered {
                    self.dispatch_ready(queued, liveness).await?;
                }
                self.flush_pending().await
            }
            Message::Connected {
                protocol,
                node_id,
                times,
                auth,
            } => {
                if self.role != Role::Client
                    || self.current_state() != NodeState::SendingConnect
                {
                    return Err(self.unexpected("connected").await);
                }
                let buffered = self
                    .on_connected_frame(protocol, node_id, times, auth, liveness)
                    .await?;
                for queued in buffered {
                    self.dispatch_ready(queued, liveness).await?;
                }
                self.flush_pending().await
            }
            // Diagnostics and errors are legal before authentication.
            message @ (Message::Debug { .. } | Message::Error { .. }) => {
                self.dispatch_ready(message, liveness).await
            }
            message => {
                if self.is_connected_now() {
                    self.dispatch_ready(message, liveness).await
                } else {
                    self.state.lock().unwrap().buffered.push(message);
                    Ok(())
                }
            }
        }
    }

    async fn dispatch_ready(
        &self,
        message: Message,
        liveness: &mut Liveness,
    ) -> Result<(), NodeError> {
        if self.is_connected_now() {
            liveness.waiting_since = None;
        }
        match message {
            Message::Ping { synced } => {
                self.note_remote_last_added(synced);
                let added = self.log.store().get_last_added().await?;
                self.send_msg(&Message::Pong { synced: added }).await?;
                self.flush_pending().await
            }
            Message::Pong { synced } => {
                self.note_remote_last_added(synced);
                self.flush_pending().await
            }
            Message::Sync { added, entries } => self.on_sync(added, entries).await,
            Message::Synced { added } => self.on_synced(added).await,
            Message::Debug { kind, data } => {
                self.emit(NodeEvent::Debug { kind, data });
                Ok(())
            }
            Message::Error { kind, options } => self.on_error_frame(kind, options),
            Message::Connect { .. } => Err(self.unexpected("connect").await),
            Message::Connected { .. } => Err(self.unexpected("connected").await),
        }
    }

    /// Server side of the handshake.
    async fn on_connect_frame(
        &self,
        protocol: u32,
        node_id: String,
        synced: u64,
        auth: Option<AuthBlock>,
        liveness: &mut Liveness,
    ) -> Result<Vec<Message>, NodeError> {
        let t0 = self.log.clock().now();
        self.set_state(NodeState::Authenticating);

        if let Some(guard) = &self.guard {
            if guard.is_locked(&node_id) {
                return Err(self.fail_local(SyncError::local(ErrorKind::Bruteforce)).await);
            }
        }

        let min = self.options.effective_min_protocol();
        if protocol < min {
            let err = SyncError::local(ErrorKind::WrongProtocol)
                .with_options(json!({ "supported": min, "used": protocol }));
            return Err(self.fail_local(err).await);
        }

        let auth = auth.unwrap_or_default();
        let info = RemoteInfo {
            node_id: node_id.clone(),
            protocol,
            subprotocol: auth.subprotocol,
        };
        self.authenticate(&info, auth.credentials.as_ref()).await?;
        self.run_connect_hook(&info).await?;

        let drained = self.accept_peer(info, Some(synced));
        self.emit(NodeEvent::Connect { node_id });

        let t1 = self.log.clock().now();
        self.state.lock().unwrap().time = TimeFix::server(t1);
        self.send_msg(&Message::Connected {
            protocol: PROTOCOL,
            node_id: self.log.node_id().to_string(),
            times: (t0, t1),
            auth: self.own_auth_block(),
        })
        .await?;

        // `connected` carries no counter, so the peer learns our high-water
        // mark from an immediate ping.
        let added = self.log.store().get_last_added().await?;
        self.send_msg(&Message::Ping { synced: added }).await?;

        liveness.waiting_since = None;
        self.emit(NodeEvent::Connected);
        Ok(drained)
    }

    /// Client side of the handshake.
    async fn on_connected_frame(
        &self,
        protocol: u32,
        node_id: String,
        times: (i64, i64),
        auth: Option<AuthBlock>,
        liveness: &mut Liveness,
    ) -> Result<Vec<Message>, NodeError> {
        let received_at = self.log.clock().now();
        self.set_state(NodeState::Authenticating);

        let min = self.options.effective_min_protocol();
        if protocol < min {
            let err = SyncError::local(ErrorKind::WrongProtocol)
                .with_options(json!({ "supported": min, "used": protocol }));
            return Err(self.fail_local(err).await);
        }

        let auth = auth.unwrap_or_default();
        let info = RemoteInfo {
            node_id: node_id.clone(),
            protocol,
            subprotocol: auth.subprotocol,
        };
        self.authenticate(&info, auth.credentials.as_ref()).await?;
        self.run_connect_hook(&info).await?;

        {
            let mut state = self.state.lock().unwrap();
            state.time = TimeFix::client(
                state.connect_sent_at,
                received_at,
                times.0,
                times.1,
                self.options.fix_time,
            );
        }
        let drained = self.accept_peer(info, None);
        self.emit(NodeEvent::Connect { node_id });

        liveness.waiting_since = None;
        self.emit(NodeEvent::Connected);
        Ok(drained)
    }

    fn accept_peer(&self, info: RemoteInfo, remote_last_added: Option<u64>) -> Vec<Message> {
        let mut state = self.state.lock().unwrap();
        state.remote = Some(info);
        state.remote_last_added = remote_last_added;
        state.connected = true;
        std::mem::take(&mut state.buffered)
    }

    /// Fold a counter the peer reported (in `sync`, `ping`, or `pong`) into
    /// our view of its high-water mark.
    fn note_remote_last_added(&self, added: u64) {
        let mut state = self.state.lock().unwrap();
        state.remote_last_added = Some(state.remote_last_added.unwrap_or(0).max(added));
    }

    async fn authenticate(
        &self,
        info: &RemoteInfo,
        credentials: Option<&Value>,
    ) -> Result<(), NodeError> {
        let Some(auth) = &self.options.auth else {
            return Ok(());
        };
        match auth.authenticate(credentials, &info.node_id).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                if let Some(guard) = &self.guard {
                    guard.record_failure(&info.node_id);
                }
                Err(self
                    .fail_local(SyncError::local(ErrorKind::WrongCredentials))
                    .await)
            }
            Err(AuthError::Domain(err)) => Err(self.fail_local(err).await),
            Err(AuthError::Internal(reason)) => {
                // Not a protocol error: nothing goes on the wire.
                tracing::error!(%reason, "authenticator failed");
                Err(NodeError::Auth(reason))
            }
        }
    }

    async fn run_connect_hook(&self, info: &RemoteInfo) -> Result<(), NodeError> {
        let Some(hook) = &self.options.on_connect else {
            return Ok(());
        };
        match hook(info) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail_local(err).await),
        }
    }

    /// Apply a received batch, then acknowledge it.
    async fn on_sync(&self, added: u64, entries: Vec<Entry>) -> Result<(), NodeError> {
        self.note_remote_last_added(added);
        let (remote_subprotocol, time) = {
            let state = self.state.lock().unwrap();
            let subprotocol = state
                .remote
                .as_ref()
                .and_then(|remote| remote.subprotocol.clone())
                .unwrap_or_else(|| DEFAULT_SUBPROTOCOL.to_string());
            (subprotocol, state.time)
        };

        for Entry { action, meta } in entries {
            let (action, mut meta) = match &self.options.in_map {
                Some(map) => map(action, meta),
                None => (action, meta),
            };
            if let Some(filter) = &self.options.in_filter {
                if !filter(&action, &meta) {
                    continue;
                }
            }
            if meta.subprotocol.is_none() {
                meta.subprotocol = Some(remote_subprotocol.clone());
            }
            meta.time = time.incoming(meta.time);
            meta.added = None;

            match self.log.add(action.clone(), NewMeta::from(meta)).await {
                Ok(Some(stored)) => self.emit(NodeEvent::Add(Entry::new(action, stored))),
                Ok(None) => tracing::trace!("duplicate action skipped"),
                Err(err) => return Err(err.into()),
            }
        }

        self.send_msg(&Message::Synced { added }).await?;
        if added > self.bookmarks().await?.received {
            self.set_last_synced(SyncedUpdate::received(added)).await?;
        }
        // The batch may have been the last thing the peer owed us.
        self.flush_pending().await
    }

    /// The peer acknowledged a batch: advance the bookmark, send the next.
    async fn on_synced(&self, added: u64) -> Result<(), NodeError> {
        if added > self.bookmarks().await?.sent {
            self.set_last_synced(SyncedUpdate::sent(added)).await?;
        }
        {
            let mut state = self.state.lock().unwrap();
            if state.unacked.is_some_and(|unacked| unacked <= added) {
                state.unacked = None;
            }
        }
        self.flush_pending().await
    }

    /// Stream everything the peer has not acknowledged yet, one batch at a
    /// time. The `lastSent` bookmark only moves when `synced` arrives.
    async fn flush_pending(&self) -> Result<(), NodeError> {
        let (ready, unacked, remote_node) = {
            let state = self.state.lock().unwrap();
            (
                state.connected,
                state.unacked,
                state.remote.as_ref().map(|remote| remote.node_id.clone()),
            )
        };
        let Some(remote_node) = remote_node else {
            return Ok(());
        };
        if !ready || unacked.is_some() {
            return Ok(());
        }

        let bookmarks = self.bookmarks().await?;
        let mut pending: Vec<Entry> = Vec::new();
        let mut highest = bookmarks.sent;
        self.log
            .each(Order::Added, |action, meta| {
                let added = meta.added.unwrap_or(0);
                if added <= bookmarks.sent {
                    return Iteration::Stop;
                }
                highest = highest.max(added);
                // Never echo what the peer itself created.
                if meta.id.node() != remote_node {
                    pending.push(Entry::new(action.clone(), meta.clone()));
                }
                Iteration::Continue
            })
            .await?;

        let time = self.state.lock().unwrap().time;
        let own_subprotocol = self.options.effective_subprotocol();
        pending.reverse();
        let mut wire = Vec::with_capacity(pending.len());
        for Entry { action, meta } in pending {
            let (action, mut meta) = match &self.options.out_map {
                Some(map) => map(action, meta),
                None => (action, meta),
            };
            if let Some(filter) = &self.options.out_filter {
                if !filter(&action, &meta) {
                    continue;
                }
            }
            meta.time = time.outgoing(meta.time);
            meta.added = None;
            if meta.subprotocol.is_none() && own_subprotocol != DEFAULT_SUBPROTOCOL {
                meta.subprotocol = Some(own_subprotocol.to_string());
            }
            if meta.subprotocol.as_deref() == Some(DEFAULT_SUBPROTOCOL) {
                meta.subprotocol = None;
            }
            wire.push(Entry::new(action, meta));
        }

        if highest > bookmarks.sent {
            // The batch travels even with every entry filtered or
            // peer-originated: its counter moves the peer's received
            // bookmark, and our own `lastSent` still only moves on the ack.
            self.set_state(NodeState::Sending);
            self.state.lock().unwrap().unacked = Some(highest);
            return self
                .send_msg(&Message::Sync {
                    added: highest,
                    entries: wire,
                })
                .await;
        }

        // Nothing left to send. Synchronized additionally requires that the
        // peer's counter is known and covered by what we have received: a
        // client has no counter until the server's first ping or sync.
        let received = self.bookmarks().await?.received;
        let expected = self.state.lock().unwrap().remote_last_added;
        if expected.is_some_and(|expected| received >= expected) {
            self.enter_synchronized(highest);
        }
        Ok(())
    }

    fn enter_synchronized(&self, added: u64) {
        let changed = {
            let mut state = self.state.lock().unwrap();
            if state.connected && state.state != NodeState::Synchronized {
                state.state = NodeState::Synchronized;
                true
            } else {
                false
            }
        };
        if changed {
            self.emit(NodeEvent::State(NodeState::Synchronized));
            self.emit(NodeEvent::Synchronized { added });
        }
    }

    fn on_error_frame(&self, kind: ErrorKind, options: Option<Value>) -> Result<(), NodeError> {
        let err = SyncError::received(kind, options);
        tracing::warn!(error = %err, "error frame from peer");
        if err.is_informational() {
            self.emit(NodeEvent::Error(err));
            Ok(())
        } else {
            self.record_error(err.clone());
            Err(NodeError::Sync(err))
        }
    }

    /// Deliver a protocol error to the peer, record it locally, and hand the
    /// caller the terminal error for the loop.
    async fn fail_local(&self, err: SyncError) -> NodeError {
        self.send_error(&err).await;
        self.record_error(err.clone());
        NodeError::Sync(err)
    }

    async fn unexpected(&self, tag: &str) -> NodeError {
        self.fail_local(
            SyncError::local(ErrorKind::UnknownMessage).with_options(Value::String(tag.into())),
        )
        .await
    }

    async fn send_error(&self, err: &SyncError) {
        let message = Message::Error {
            kind: err.kind.clone(),
            options: err.options.clone(),
        };
        match message.encode() {
            Ok(frame) => {
                if self.connection.send(frame).await.is_err() {
                    tracing::debug!("error frame could not be delivered");
                }
            }
            Err(encode_err) => tracing::debug!(error = %encode_err, "error frame not encodable"),
        }
        self.emit(NodeEvent::ClientError(err.clone()));
    }

    fn record_error(&self, err: SyncError) {
        self.state.lock().unwrap().last_error = Some(err.clone());
        self.emit(NodeEvent::Error(err));
    }

    async fn send_msg(&self, message: &Message) -> Result<(), NodeError> {
        tracing::trace!(tag = message.tag(), "frame sent");
        let frame = message.encode()?;
        self.connection.send(frame).await?;
        Ok(())
    }

    fn own_auth_block(&self) -> Option<AuthBlock> {
        let subprotocol = self.options.effective_subprotocol();
        let credentials = self.options.credentials.clone();
        if credentials.is_none() && subprotocol == DEFAULT_SUBPROTOCOL {
            return None;
        }
        Some(AuthBlock {
            credentials,
            subprotocol: (subprotocol != DEFAULT_SUBPROTOCOL).then(|| subprotocol.to_string()),
        })
    }

    async fn bookmarks(&self) -> Result<LastSynced, NodeError> {
        let remote = {
            let state = self.state.lock().unwrap();
            state.remote.as_ref().map(|remote| remote.node_id.clone())
        };
        let Some(remote) = remote else {
            return Ok(LastSynced::default());
        };
        Ok(self.log.store().get_last_synced(&remote).await?)
    }

    async fn set_last_synced(&self, update: SyncedUpdate) -> Result<(), NodeError> {
        let remote = {
            let state = self.state.lock().unwrap();
            state.remote.as_ref().map(|remote| remote.node_id.clone())
        };
        let Some(remote) = remote else {
            return Ok(());
        };
        Ok(self.log.store().set_last_synced(&remote, update).await?)
    }

    fn current_state(&self) -> NodeState {
        self.state.lock().unwrap().state
    }

    fn is_connected_now(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn set_state(&self, next: NodeState) {
        let changed = {
            let mut state = self.state.lock().unwrap();
            if state.state != next {
                state.state = next;
                true
            } else {
                false
            }
        };
        if changed {
            self.emit(NodeEvent::State(next));
        }
    }

    fn emit(&self, event: NodeEvent) {
        let _ = self.events.send(event);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
