//! In-memory reference store.
//!
//! This is the store every test is built on and the template for production
//! backends. Entries are kept twice-indexed: in insertion (`added`) order and
//! in log (`created`) order, so both page orderings are cheap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tandem_types::{is_older, Action, ActionId, Entry, Meta, MetaDiff};

use crate::store::{
    Criteria, LastSynced, Order, Page, PageToken, Store, StoreError, SyncedUpdate,
};

const DEFAULT_PAGE_SIZE: usize = 100;

/// An in-memory [`Store`].
///
/// Clones share the same underlying state, so a store can be handed to a log
/// and still be inspected from a test.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    page_size: usize,
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<ActionId, Entry>,
    /// Ids in ascending `added` order.
    added_order: Vec<ActionId>,
    /// Ids in ascending log order (oldest first).
    created_order: Vec<ActionId>,
    last_added: u64,
    synced: HashMap<String, LastSynced>,
}

impl MemoryStore {
    /// Create an empty store with the default page size.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create an empty store serving pages of at most `page_size` entries.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            inner: Arc::default(),
        }
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn add(&self, action: Action, mut meta: Meta) -> Result<Option<Meta>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.contains_key(&meta.id) {
            return Ok(None);
        }

        inner.last_added += 1;
        meta.added = Some(inner.last_added);

        let Inner {
            entries,
            added_order,
            created_order,
            ..
        } = &mut *inner;
        let position = created_order
            .partition_point(|id| is_older(Some(&entries[id].meta), Some(&meta)));
        created_order.insert(position, meta.id.clone());
        added_order.push(meta.id.clone());
        entries.insert(meta.id.clone(), Entry::new(action, meta.clone()));

        Ok(Some(meta))
    }

    async fn get(&self, order: Order, page: Option<PageToken>) -> Result<Page, StoreError> {
        let inner = self.inner.lock().unwrap();
        let ids = match order {
            Order::Created => &inner.created_order,
            Order::Added => &inner.added_order,
        };

        // The token counts entries already served from the newest end.
        let served = page.map(|token| token.0 as usize).unwrap_or(0);
        let remaining = ids.len().saturating_sub(served);
        let take = remaining.min(self.page_size);

        let entries = ids[remaining - take..remaining]
            .iter()
            .rev()
            .map(|id| inner.entries[id].clone())
            .collect();
        let next = (remaining > take).then(|| PageToken((served + take) as u64));

        Ok(Page { entries, next })
    }

    async fn by_id(&self, id: &ActionId) -> Result<Option<Entry>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.entries.get(id).cloned())
    }

    async fn remove(&self, id: &ActionId) -> Result<Option<Entry>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.entries.remove(id);
        if entry.is_some() {
            inner.added_order.retain(|other| other != id);
            inner.created_order.retain(|other| other != id);
        }
        Ok(entry)
    }

    async fn change_meta(&self, id: &ActionId, diff: &MetaDiff) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.entries.get_mut(id) else {
            return Ok(false);
        };
        // Only the reason set is mutable; the log rejects diffs touching
        // read-only fields before they reach a store.
        if let Some(reasons) = &diff.reasons {
            entry.meta.reasons = reasons.clone();
        }
        Ok(true)
    }

    async fn remove_reason(
        &self,
        reason: &str,
        criteria: &Criteria,
    ) -> Result<Vec<Entry>, StoreError> {
        let mut inner = self.inner.lock().unwrap();

        let matching: Vec<ActionId> = inner
            .added_order
            .iter()
            .filter(|id| {
                let meta = &inner.entries[*id].meta;
                meta.reasons.contains(reason) && criteria.matches(meta)
            })
            .cloned()
            .collect();

        let mut cleaned = Vec::new();
        for id in matching {
            let Some(entry) = inner.entries.get_mut(&id) else {
                continue;
            };
            entry.meta.reasons.remove(reason);
            if entry.meta.reasons.is_empty() {
                if let Some(entry) = inner.entries.remove(&id) {
                    inner.added_order.retain(|other| *other != id);
                    inner.created_order.retain(|other| *other != id);
                    cleaned.push(entry);
                }
            }
        }
        Ok(cleaned)
    }

    async fn get_last_added(&self) -> Result<u64, StoreError> {
        Ok(self.inner.lock().unwrap().last_added)
    }

    async fn get_last_synced(&self, node_id: &str) -> Result<LastSynced, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.synced.get(node_id).copied().unwrap_or_default())
    }

    async fn set_last_synced(
        &self,
        node_id: &str,
        update: SyncedUpdate,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let bookmarks = inner.synced.entry(node_id.to_string()).or_default();
        if let Some(sent) = update.sent {
            bookmarks.sent = sent;
        }
        if let Some(received) = update.received {
            bookmarks.received = received;
        }
        Ok(())
    }

    async fn clean(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner::default();
        Ok(())
    }
}
