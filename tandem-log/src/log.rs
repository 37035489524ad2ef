//! The action log: id generation, invariants, retention, lifecycle events.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tandem_types::{Action, ActionId, Entry, IdError, Meta, MetaDiff};
use thiserror::Error;

use crate::clock::{Clock, TestTime};
use crate::memory::MemoryStore;
use crate::store::{Criteria, Order, PageToken, Store, StoreError};

/// Errors from log operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// The action had an empty `type`.
    #[error("action type must be a non-empty string")]
    MissingType,

    /// A meta diff tried to rewrite a read-only field.
    #[error("meta id, time, added, and subprotocol are read-only once assigned")]
    ReadOnlyMeta,

    /// The log's node id cannot appear inside an action id.
    #[error("invalid node id: {0}")]
    NodeId(#[from] IdError),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Caller-supplied metadata for [`Log::add`].
///
/// When `id` is absent the log generates one, which also marks the action as
/// locally created (relevant for the no-reason fast path).
#[derive(Debug, Clone, Default)]
pub struct NewMeta {
    /// Pre-existing id, for actions arriving from a peer.
    pub id: Option<ActionId>,
    /// Creation time override; defaults to the id's time prefix.
    pub time: Option<i64>,
    /// Initial retention reasons.
    pub reasons: BTreeSet<String>,
    /// Sender's subprotocol, tagged by the node on receive.
    pub subprotocol: Option<String>,
    /// Replace earlier actions carrying the same tag, then keep this one.
    pub keep_last: Option<String>,
}

impl NewMeta {
    /// Metadata for an action that already has an id.
    pub fn with_id(id: ActionId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// Add a retention reason, builder style.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.insert(reason.into());
        self
    }

    /// Set the keep-last tag, builder style.
    pub fn keep_last(mut self, tag: impl Into<String>) -> Self {
        self.keep_last = Some(tag.into());
        self
    }
}

impl From<Meta> for NewMeta {
    fn from(meta: Meta) -> Self {
        Self {
            id: Some(meta.id),
            time: Some(meta.time),
            reasons: meta.reasons,
            subprotocol: meta.subprotocol,
            keep_last: meta.keep_last,
        }
    }
}

/// Whether [`Log::each`] keeps iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    /// Continue with the next (older) entry.
    Continue,
    /// Stop the traversal.
    Stop,
}

type PreaddHook = Arc<dyn Fn(&Action, &mut Meta) + Send + Sync>;
type EntryHook = Arc<dyn Fn(&Action, &Meta) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookEvent {
    Preadd,
    Add,
    Clean,
}

/// Detachable subscription to a log event, returned by the `on_*` methods.
#[derive(Debug)]
pub struct HookHandle {
    event: HookEvent,
    id: u64,
}

#[derive(Default)]
struct Hooks {
    next_id: u64,
    preadd: Vec<(u64, PreaddHook)>,
    add: Vec<(u64, EntryHook)>,
    clean: Vec<(u64, EntryHook)>,
}

#[derive(Debug, Default)]
struct IdState {
    last_time: i64,
    sequence: u64,
}

/// An ordered store of actions with monotonic identifiers and reason-based
/// retention.
///
/// The log wraps a [`Store`], assigns ids, enforces the
/// at-most-one-insertion-per-id invariant, and fans lifecycle events out to
/// subscribers. Several sync nodes may share one log behind an [`Arc`].
pub struct Log {
    node_id: String,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    id_state: Mutex<IdState>,
    hooks: Mutex<Hooks>,
}

impl Log {
    /// Create a log over the given store and clock.
    ///
    /// The node id must be usable as the middle part of an action id.
    pub fn new(
        node_id: impl Into<String>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LogError> {
        let node_id = node_id.into();
        ActionId::new(0, node_id.clone(), 0)?;
        Ok(Self {
            node_id,
            store,
            clock,
            id_state: Mutex::new(IdState::default()),
            hooks: Mutex::new(Hooks::default()),
        })
    }

    /// A log over a fresh [`MemoryStore`] and [`TestTime`], for tests.
    ///
    /// # Panics
    ///
    /// Panics when `node_id` is not a valid id part.
    pub fn test(node_id: &str) -> Self {
        Self::with_test_time(node_id, TestTime::new())
    }

    /// Like [`Log::test`] but sharing an existing [`TestTime`], so several
    /// logs can be driven from one deterministic clock.
    ///
    /// # Panics
    ///
    /// Panics when `node_id` is not a valid id part.
    pub fn with_test_time(node_id: &str, time: TestTime) -> Self {
        Self::new(node_id, Arc::new(MemoryStore::new()), Arc::new(time))
            .expect("test node id must be a valid id part")
    }

    /// The id of this log.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The underlying store.
    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    /// The clock this log reads time from.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Generate the next action id.
    ///
    /// Ids are strictly increasing per log even when the wallclock regresses:
    /// a non-advancing clock reuses the last time and bumps the sequence.
    pub fn generate_id(&self) -> ActionId {
        let mut state = self.id_state.lock().unwrap();
        let now = self.clock.now();
        if now > state.last_time {
            state.last_time = now;
            state.sequence = 0;
        } else {
            state.sequence += 1;
        }
        ActionId::new(state.last_time, self.node_id.as_str(), state.sequence)
            .expect("node id was validated when the log was created")
    }

    /// Add an action to the log.
    ///
    /// Returns the final meta, or `None` when an entry with the same id
    /// already exists. Actions that end up with no retention reasons are
    /// announced (`add` then `clean`) but never persisted.
    pub async fn add(&self, action: Action, meta: NewMeta) -> Result<Option<Meta>, LogError> {
        if action.kind.is_empty() {
            return Err(LogError::MissingType);
        }

        let (id, fresh_id) = match meta.id {
            Some(id) => (id, false),
            None => (self.generate_id(), true),
        };
        let mut assembled = Meta::new(id);
        if let Some(time) = meta.time {
            assembled.time = time;
        }
        assembled.reasons = meta.reasons;
        assembled.subprotocol = meta.subprotocol;
        assembled.keep_last = meta.keep_last;

        for hook in self.hooks_for_preadd() {
            hook(&action, &mut assembled);
        }

        if let Some(tag) = assembled.keep_last.take() {
            self.remove_reason(&tag, Criteria::older_than(assembled.clone()))
                .await?;
            assembled.reasons.insert(tag);
        }

        if assembled.reasons.is_empty() {
            if !fresh_id && self.store.by_id(&assembled.id).await?.is_some() {
                return Ok(None);
            }
            tracing::trace!(id = %assembled.id, kind = %action.kind, "pass-through action");
            self.emit(HookEvent::Add, &action, &assembled);
            self.emit(HookEvent::Clean, &action, &assembled);
            return Ok(Some(assembled));
        }

        match self.store.add(action.clone(), assembled).await? {
            Some(stored) => {
                tracing::debug!(id = %stored.id, kind = %action.kind, "action stored");
                self.emit(HookEvent::Add, &action, &stored);
                Ok(Some(stored))
            }
            None => Ok(None),
        }
    }

    /// Iterate entries from newest to oldest.
    ///
    /// The callback may return [`Iteration::Stop`] to end the traversal
    /// early; otherwise pages are fetched until the store is exhausted.
    pub async fn each<F>(&self, order: Order, mut callback: F) -> Result<(), LogError>
    where
        F: FnMut(&Action, &Meta) -> Iteration,
    {
        let mut token: Option<PageToken> = None;
        loop {
            let page = self.store.get(order, token).await?;
            for entry in &page.entries {
                if callback(&entry.action, &entry.meta) == Iteration::Stop {
                    return Ok(());
                }
            }
            match page.next {
                Some(next) => token = Some(next),
                None => return Ok(()),
            }
        }
    }

    /// Look up an entry by id.
    pub async fn by_id(&self, id: &ActionId) -> Result<Option<Entry>, LogError> {
        Ok(self.store.by_id(id).await?)
    }

    /// Merge a diff into an entry's meta.
    ///
    /// Diffs touching `id`, `time`, `added`, or `subprotocol` are a
    /// programmer error. A diff with an empty reason set purges the entry
    /// and emits `clean`. Returns `false` on unknown id.
    pub async fn change_meta(&self, id: &ActionId, diff: MetaDiff) -> Result<bool, LogError> {
        if diff.touches_read_only() {
            return Err(LogError::ReadOnlyMeta);
        }
        if diff.reasons.as_ref().is_some_and(|reasons| reasons.is_empty()) {
            return match self.store.remove(id).await? {
                Some(entry) => {
                    self.emit(HookEvent::Clean, &entry.action, &entry.meta);
                    Ok(true)
                }
                None => Ok(false),
            };
        }
        Ok(self.store.change_meta(id, &diff).await?)
    }

    /// Remove a retention reason from every matching entry, purging entries
    /// whose reason set becomes empty and emitting `clean` for each.
    pub async fn remove_reason(
        &self,
        reason: &str,
        criteria: Criteria,
    ) -> Result<(), LogError> {
        let cleaned = self.store.remove_reason(reason, &criteria).await?;
        for entry in &cleaned {
            tracing::debug!(id = %entry.meta.id, reason, "action released");
            self.emit(HookEvent::Clean, &entry.action, &entry.meta);
        }
        Ok(())
    }

    /// Subscribe to `preadd`: runs before dispatch and may mutate the meta,
    /// typically to attach reasons or a keep-last tag.
    pub fn on_preadd(
        &self,
        hook: impl Fn(&Action, &mut Meta) + Send + Sync + 'static,
    ) -> HookHandle {
        let mut hooks = self.hooks.lock().unwrap();
        let id = hooks.next_id;
        hooks.next_id += 1;
        hooks.preadd.push((id, Arc::new(hook)));
        HookHandle {
            event: HookEvent::Preadd,
            id,
        }
    }

    /// Subscribe to `add`: fires for every accepted action, with the final
    /// (frozen) meta.
    pub fn on_add(&self, hook: impl Fn(&Action, &Meta) + Send + Sync + 'static) -> HookHandle {
        self.subscribe(HookEvent::Add, Arc::new(hook))
    }

    /// Subscribe to `clean`: fires when an entry leaves the log.
    pub fn on_clean(&self, hook: impl Fn(&Action, &Meta) + Send + Sync + 'static) -> HookHandle {
        self.subscribe(HookEvent::Clean, Arc::new(hook))
    }

    /// Detach a subscription.
    pub fn unsubscribe(&self, handle: HookHandle) {
        let mut hooks = self.hooks.lock().unwrap();
        match handle.event {
            HookEvent::Preadd => hooks.preadd.retain(|(id, _)| *id != handle.id),
            HookEvent::Add => hooks.add.retain(|(id, _)| *id != handle.id),
            HookEvent::Clean => hooks.clean.retain(|(id, _)| *id != handle.id),
        }
    }

    fn subscribe(&self, event: HookEvent, hook: EntryHook) -> HookHandle {
        let mut hooks = self.hooks.lock().unwrap();
        let id = hooks.next_id;
        hooks.next_id += 1;
        match event {
            HookEvent::Add => hooks.add.push((id, hook)),
            HookEvent::Clean => hooks.clean.push((id, hook)),
            HookEvent::Preadd => unreachable!("preadd hooks have a different signature"),
        }
        HookHandle { event, id }
    }

    fn hooks_for_preadd(&self) -> Vec<PreaddHook> {
        let hooks = self.hooks.lock().unwrap();
        hooks.preadd.iter().map(|(_, hook)| Arc::clone(hook)).collect()
    }

    // Hooks are cloned out of the registry before invocation so a listener
    // can subscribe or detach without deadlocking.
    fn emit(&self, event: HookEvent, action: &Action, meta: &Meta) {
        let listeners: Vec<EntryHook> = {
            let hooks = self.hooks.lock().unwrap();
            let source = match event {
                HookEvent::Add => &hooks.add,
                HookEvent::Clean => &hooks.clean,
                HookEvent::Preadd => return,
            };
            source.iter().map(|(_, hook)| Arc::clone(hook)).collect()
        };
        for listener in listeners {
            listener(action, meta);
        }
    }
}
