//! The persistence capability set a [`crate::Log`] is built on.

use async_trait::async_trait;
use tandem_types::{is_older, Action, ActionId, Entry, Meta, MetaDiff};
use thiserror::Error;

/// Errors from a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed the operation.
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// The ordering a [`Store::get`] page follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// By action id (the total order of `is_older`), newest first.
    Created,
    /// By insertion counter, newest first.
    Added,
}

/// An opaque continuation position returned in a [`Page`].
///
/// The value is backend-defined; callers only pass it back unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageToken(pub u64);

/// One page of entries from [`Store::get`], newest first.
#[derive(Debug, Clone)]
pub struct Page {
    /// The entries of this page.
    pub entries: Vec<Entry>,
    /// Pass back to [`Store::get`] for the next page; `None` when exhausted.
    pub next: Option<PageToken>,
}

/// Selection criteria for [`Store::remove_reason`].
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    /// Only entries with `added >= min_added`.
    pub min_added: Option<u64>,
    /// Only entries with `added <= max_added`.
    pub max_added: Option<u64>,
    /// Only entries older than this meta.
    pub older_than: Option<Meta>,
    /// Only entries younger than this meta.
    pub younger_than: Option<Meta>,
    /// Only the entry with exactly this id.
    pub id: Option<ActionId>,
}

impl Criteria {
    /// Criteria matching entries older than the given meta.
    pub fn older_than(meta: Meta) -> Self {
        Self {
            older_than: Some(meta),
            ..Self::default()
        }
    }

    /// Criteria matching exactly one id.
    pub fn id(id: ActionId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// Does a stored meta satisfy every bound of this criteria?
    pub fn matches(&self, meta: &Meta) -> bool {
        let added = meta.added.unwrap_or(0);
        if self.min_added.is_some_and(|min| added < min) {
            return false;
        }
        if self.max_added.is_some_and(|max| added > max) {
            return false;
        }
        if let Some(older_than) = &self.older_than {
            if !is_older(Some(meta), Some(older_than)) {
                return false;
            }
        }
        if let Some(younger_than) = &self.younger_than {
            if !is_older(Some(younger_than), Some(meta)) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if meta.id != *id {
                return false;
            }
        }
        true
    }
}

/// Per-peer synchronization bookmarks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LastSynced {
    /// Highest local `added` acknowledged by the peer.
    pub sent: u64,
    /// Highest peer `added` applied locally.
    pub received: u64,
}

/// A partial update to [`LastSynced`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncedUpdate {
    /// New `sent` bookmark, if any.
    pub sent: Option<u64>,
    /// New `received` bookmark, if any.
    pub received: Option<u64>,
}

impl SyncedUpdate {
    /// Update only the `sent` bookmark.
    pub fn sent(value: u64) -> Self {
        Self {
            sent: Some(value),
            received: None,
        }
    }

    /// Update only the `received` bookmark.
    pub fn received(value: u64) -> Self {
        Self {
            sent: None,
            received: Some(value),
        }
    }
}

/// Persistence of actions with reason-based retention and a monotonic
/// insertion counter.
///
/// Implementations are free to persist on any medium provided two invariants
/// hold across the store's entire lifetime (including restarts):
/// ids are unique, and `added` values are assigned only by [`Store::add`],
/// strictly increasing and never reused.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert an entry if its id is absent.
    ///
    /// Assigns the next `added` counter and returns the updated meta, or
    /// `None` when an entry with the same id already exists.
    async fn add(&self, action: Action, meta: Meta) -> Result<Option<Meta>, StoreError>;

    /// Fetch a page of entries in the given order, newest first.
    async fn get(&self, order: Order, page: Option<PageToken>) -> Result<Page, StoreError>;

    /// Look up an entry by id.
    async fn by_id(&self, id: &ActionId) -> Result<Option<Entry>, StoreError>;

    /// Remove an entry unconditionally, returning it when present.
    async fn remove(&self, id: &ActionId) -> Result<Option<Entry>, StoreError>;

    /// Merge a diff into an entry's meta. Returns `false` on unknown id.
    async fn change_meta(&self, id: &ActionId, diff: &MetaDiff) -> Result<bool, StoreError>;

    /// Remove `reason` from every entry matching `criteria` that carries it.
    ///
    /// Entries whose reason set becomes empty are deleted; the deleted
    /// entries are returned so the log can emit `clean` events for them.
    async fn remove_reason(
        &self,
        reason: &str,
        criteria: &Criteria,
    ) -> Result<Vec<Entry>, StoreError>;

    /// The maximum `added` ever assigned, or 0 when nothing was inserted.
    async fn get_last_added(&self) -> Result<u64, StoreError>;

    /// The synchronization bookmarks for a peer.
    async fn get_last_synced(&self, node_id: &str) -> Result<LastSynced, StoreError>;

    /// Partially update the synchronization bookmarks for a peer.
    async fn set_last_synced(&self, node_id: &str, update: SyncedUpdate)
        -> Result<(), StoreError>;

    /// Release all resources held by the store.
    async fn clean(&self) -> Result<(), StoreError>;
}
