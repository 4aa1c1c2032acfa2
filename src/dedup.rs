// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-origin duplicate-id caches.
//!
//! Replay must be exactly-once per `(origin, internal id)`: the link
//! redelivers on reconnect, and paging or persistence latency on this
//! side can reorder settlement enough that the source retransmits.
//! Each origin gets a bounded FIFO set of internal ids sized to the
//! link's credit window; the window bounds how many deliveries can be
//! in flight, so the cache cannot overflow within one round of
//! retransmissions.
//!
//! # Transactional Insertion
//!
//! An id becomes visible only when the replay transaction that routed
//! the message commits. [`DuplicateIdCache::stage()`] returns a
//! [`StagedId`] guard: `confirm()` publishes the id, dropping the
//! guard (transaction abort) discards it. A crashed replay therefore
//! never poisons the cache against a legitimate retransmission.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::post_office::PostOffice;

/// Bounded FIFO set of internal ids for one origin.
#[derive(Debug)]
pub struct DuplicateIdCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    set: HashSet<u64>,
    order: VecDeque<u64>,
}

impl DuplicateIdCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// O(1) membership test.
    pub fn contains(&self, internal_id: u64) -> bool {
        self.inner.lock().expect("dedup lock").set.contains(&internal_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("dedup lock").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stage a tentative insert bound to a transaction.
    pub fn stage(cache: &Arc<Self>, internal_id: u64) -> StagedId {
        StagedId {
            cache: Arc::clone(cache),
            internal_id,
        }
    }

    fn publish(&self, internal_id: u64) {
        let mut inner = self.inner.lock().expect("dedup lock");
        if !inner.set.insert(internal_id) {
            return;
        }
        inner.order.push_back(internal_id);
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.set.remove(&evicted);
            }
        }
    }
}

/// A tentative cache insert following its transaction's outcome.
///
/// Commit calls [`confirm()`](Self::confirm); abort just drops the
/// guard, leaving the cache untouched.
#[derive(Debug)]
pub struct StagedId {
    cache: Arc<DuplicateIdCache>,
    internal_id: u64,
}

impl StagedId {
    pub fn internal_id(&self) -> u64 {
        self.internal_id
    }

    /// Publish the id; it is now visible to `contains()`.
    pub fn confirm(self) {
        self.cache.publish(self.internal_id);
    }
}

/// Registry of per-origin caches with a single-slot fast path.
///
/// Mirror streams are typically single-origin, so one memoized
/// `(origin, cache)` pair avoids the durable-registry lookup on
/// virtually every message. The slot is a plain field, as the registry
/// is only ever touched from the link's handler task.
pub struct OriginCacheRegistry {
    post_office: Arc<dyn PostOffice>,
    namespace: String,
    capacity: usize,
    last: Option<(String, Arc<DuplicateIdCache>)>,
}

impl OriginCacheRegistry {
    pub fn new(
        post_office: Arc<dyn PostOffice>,
        namespace: impl Into<String>,
        capacity: usize,
    ) -> Self {
        Self {
            post_office,
            namespace: namespace.into(),
            capacity,
            last: None,
        }
    }

    /// The cache for one origin, via the fast path when possible.
    ///
    /// On a slot miss the durable registry is consulted under the key
    /// `"<namespace>_<origin>"`, creating the cache (sized to the
    /// credit window) on first use.
    pub async fn get(&mut self, origin: &str) -> Arc<DuplicateIdCache> {
        if let Some((last_origin, cache)) = &self.last {
            if last_origin == origin {
                return Arc::clone(cache);
            }
        }

        let key = format!("{}_{}", self.namespace, origin);
        tracing::trace!(origin = %origin, key = %key, capacity = self.capacity, "duplicate-id cache slot miss");
        let cache = self.post_office.duplicate_id_cache(&key, self.capacity).await;
        self.last = Some((origin.to_string(), Arc::clone(&cache)));
        cache
    }
}
