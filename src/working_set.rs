//! A [WorkingSet] bounds how many slots of a collection may be materialized at once.
//!
//! Every time a registered slot computes, it's recorded as most recently used in an LRU [BoundedCache] keyed by slot
//! id.  When that cache overflows, the slot it evicts is reset, which releases its value.  The tracker holds at most
//! `size` slots, so owners must call [WorkingSet::removed] for slots they let go of.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ahash::RandomState;

use crate::*;

type Tracker = BoundedCache<u64, dyn Resettable>;

pub struct WorkingSet {
    tracker: Arc<Tracker>,
    /// Listener registered on each slot, by slot id.
    listeners: HashMap<u64, ListenerId, RandomState>,
}

impl WorkingSet {
    pub fn new(size: usize) -> Result<WorkingSet, ConfigError> {
        let config = CacheConfig {
            capacity: size,
            lru: true,
            ..Default::default()
        };
        let tracker = Tracker::with_eviction_listener(config, |id, slot: Arc<dyn Resettable>| {
            tracing::debug!(slot = id, "working set full, releasing least recently computed slot");
            slot.reset();
        })?;

        Ok(WorkingSet {
            tracker: Arc::new(tracker),
            listeners: Default::default(),
        })
    }

    /// Maximum number of slots kept materialized.
    pub fn size(&self) -> usize {
        self.tracker.config().capacity
    }

    /// Number of slots currently tracked as materialized.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start tracking a slot's computations.
    pub fn added<T, E>(&mut self, slot: &Arc<Memoized<T, E>>)
    where
        T: Send + Sync + 'static,
        E: 'static,
    {
        let id = slot.id();
        let tracker = Arc::downgrade(&self.tracker);
        let weak_slot = Arc::downgrade(slot);
        let listener = slot.add_listener(move || {
            if let (Some(tracker), Some(slot)) = (tracker.upgrade(), weak_slot.upgrade()) {
                tracker.insert(id, slot);
            }
        });

        if let Some(old) = self.listeners.insert(id, listener) {
            slot.remove_listener(old);
        }
    }

    /// Stop tracking a slot.  Its value, if any, is left alone.
    pub fn removed<T, E>(&mut self, slot: &Memoized<T, E>) {
        let id = slot.id();
        self.tracker.remove(&id);
        if let Some(listener) = self.listeners.remove(&id) {
            slot.remove_listener(listener);
        }
    }

    /// Forget recency without touching any slot, for when the caller has reset all of them anyway.
    pub fn clear(&self) {
        self.tracker.clear();
    }
}

impl fmt::Debug for WorkingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkingSet")
            .field("size", &self.size())
            .field("len", &self.len())
            .finish()
    }
}
