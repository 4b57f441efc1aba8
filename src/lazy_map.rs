//! A [LazyMap] maps keys to [Memoized] slots, so that each value is computed the first time its key is read.
//!
//! This is the keyed sibling of [crate::LazyList] and behaves the same way: one [InvalidationGroup] for every slot,
//! an optional working set bounding how many values stay materialized, and slots detached from both before a
//! removed or replaced value is handed back.
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use ahash::RandomState;

use crate::*;

pub struct LazyMap<K, V, E = Infallible> {
    slots: HashMap<K, Arc<Memoized<V, E>>, RandomState>,
    group: InvalidationGroup,
    working_set: Option<WorkingSet>,
}

impl<K: Hash + Eq, V: Send + Sync + 'static, E: 'static> LazyMap<K, V, E> {
    pub fn new() -> LazyMap<K, V, E> {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> LazyMap<K, V, E> {
        LazyMap {
            slots: HashMap::with_capacity_and_hasher(capacity, Default::default()),
            group: InvalidationGroup::new(),
            working_set: None,
        }
    }

    /// A map which keeps at most `size` values materialized.
    pub fn with_working_set(capacity: usize, size: usize) -> Result<LazyMap<K, V, E>, ConfigError> {
        let mut ret = Self::with_capacity(capacity);
        ret.working_set = Some(WorkingSet::new(size)?);
        Ok(ret)
    }

    fn register(&mut self, slot: Memoized<V, E>) -> Arc<Memoized<V, E>> {
        let slot = self.group.add(Arc::new(slot));
        if let Some(ws) = self.working_set.as_mut() {
            ws.added(&slot);
        }
        slot
    }

    fn unregister(&mut self, slot: &Arc<Memoized<V, E>>) {
        self.group.remove(slot);
        if let Some(ws) = self.working_set.as_mut() {
            ws.removed(slot);
        }
    }

    /// Map `key` to a value computed by `computation`, returning the slot it replaced.
    pub fn try_insert_with<F>(&mut self, key: K, computation: F) -> Option<Arc<Memoized<V, E>>>
    where
        F: Fn() -> Result<V, E> + Send + Sync + 'static,
    {
        let slot = self.register(Memoized::try_new(computation));
        let old = self.slots.insert(key, slot)?;
        self.unregister(&old);
        Some(old)
    }

    /// Map `key` to a known value, returning the old value, which is computed if it has to be.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<Arc<V>>, E> {
        let slot = self.register(Memoized::constant(value));
        match self.slots.insert(key, slot) {
            Some(old) => {
                self.unregister(&old);
                old.get().map(Some)
            }
            None => Ok(None),
        }
    }

    /// Like [LazyMap::insert], but only if `key` is already present.
    pub fn replace(&mut self, key: K, value: V) -> Result<Option<Arc<V>>, E> {
        if !self.slots.contains_key(&key) {
            return Ok(None);
        }
        self.insert(key, value)
    }

    /// Get the value for `key`, computing it if needed.
    pub fn get<Q>(&self, key: &Q) -> Result<Arc<V>, LazyError<E>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.slots
            .get(key)
            .ok_or(LazyError::MissingKey)?
            .get()
            .map_err(LazyError::Computation)
    }

    pub fn slot<Q>(&self, key: &Q) -> Option<&Arc<Memoized<V, E>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.slots.get(key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.slots.contains_key(key)
    }

    /// Remove `key` and return its value, computing it if needed.
    pub fn remove<Q>(&mut self, key: &Q) -> Result<Arc<V>, LazyError<E>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.remove_slot(key).ok_or(LazyError::MissingKey)?;
        slot.get().map_err(LazyError::Computation)
    }

    /// Remove `key` without computing its value.
    pub fn remove_slot<Q>(&mut self, key: &Q) -> Option<Arc<Memoized<V, E>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.slots.remove(key)?;
        self.unregister(&slot);
        Some(slot)
    }

    /// Keep only the entries for which `keep` returns true, returning how many were removed.
    ///
    /// Every value is computed to be shown to `keep`.  If a computation fails, nothing is removed.
    pub fn retain<F>(&mut self, mut keep: F) -> Result<usize, E>
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut doomed = HashSet::with_hasher(RandomState::new());
        for (k, slot) in self.slots.iter() {
            let value = slot.get()?;
            if !keep(k, &value) {
                doomed.insert(slot.id());
            }
        }

        let mut removed = vec![];
        self.slots.retain(|_, slot| {
            if doomed.contains(&slot.id()) {
                removed.push(slot.clone());
                false
            } else {
                true
            }
        });
        for slot in removed.iter() {
            self.unregister(slot);
        }
        Ok(removed.len())
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.slots.keys()
    }

    /// Iterate over the entries in arbitrary order, computing each value as it's reached.
    pub fn iter(&self) -> impl Iterator<Item = (&K, Result<Arc<V>, E>)> {
        self.slots.iter().map(|(k, s)| (k, s.get()))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Forget every computed value.  Entries inserted as values keep them.
    pub fn reset_cache(&self) {
        self.group.reset_all();
        if let Some(ws) = self.working_set.as_ref() {
            ws.clear();
        }
    }

    pub fn materialized_count(&self) -> usize {
        self.slots.values().filter(|s| s.has_run()).count()
    }
}

impl<K: Hash + Eq, V: Send + Sync + 'static> LazyMap<K, V, Infallible> {
    pub fn insert_with<F>(&mut self, key: K, computation: F) -> Option<Arc<Memoized<V>>>
    where
        F: Fn() -> V + Send + Sync + 'static,
    {
        self.try_insert_with(key, move || Ok(computation()))
    }
}

impl<K: Hash + Eq, V: Send + Sync + 'static, E: 'static> Default for LazyMap<K, V, E> {
    fn default() -> LazyMap<K, V, E> {
        Self::new()
    }
}

impl<K, V, E> Resettable for LazyMap<K, V, E>
where
    K: Hash + Eq + Send + Sync,
    V: Send + Sync + 'static,
    E: 'static,
{
    fn reset(&self) {
        self.reset_cache()
    }
}

impl<K, V, E> fmt::Debug for LazyMap<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyMap")
            .field("len", &self.slots.len())
            .field("working_set", &self.working_set)
            .finish()
    }
}
