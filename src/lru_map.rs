//! An [LruMap] is a map with a fixed capacity which evicts the least recently used entry to make room.
//!
//! This is implemented as a vec-backed linked list, most recent first, plus an auxiliary hash-based index from keys
//! to slots in the vec.  Emptied slots are threaded into a free list and reused.
//!
//! Both [LruMap::get] and [LruMap::insert] count as uses.  [LruMap::peek] and [LruMap::contains_key] don't.  Evicted
//! entries are handed, key and value, to the eviction listener if one is set.  Entries removed any other way are not.
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use ahash::RandomState;

use crate::*;

/// Called with the original key and value of every entry evicted to make room.
pub type EvictionListener<K, V> = Box<dyn FnMut(K, V) + Send>;

/// Most entries any map in this crate reserves room for up front.  Larger capacities grow on demand.
pub(crate) const MAX_PRESIZE: usize = 1 << 16;

struct OccupiedEntry<K, V> {
    key: K,
    item: V,
    prev: Option<usize>,
    next: Option<usize>,
}

struct EmptyEntry {
    next_empty: Option<usize>,
}

enum CacheEntry<K, V> {
    /// This entry is empty, possibly with a pointer at the next empty entry.
    Empty(EmptyEntry),
    /// This entry is occupied, and doubly linked to the previous and next entry.
    Occupied(OccupiedEntry<K, V>),
}

impl<K, V> CacheEntry<K, V> {
    fn as_occupied_mut(&mut self) -> &mut OccupiedEntry<K, V> {
        match self {
            Self::Occupied(ref mut x) => x,
            _ => panic!("Entry should be occupied"),
        }
    }

    fn as_occupied(&self) -> &OccupiedEntry<K, V> {
        match self {
            Self::Occupied(ref x) => x,
            _ => panic!("Entry should be occupied"),
        }
    }

    fn as_empty_mut(&mut self) -> &mut EmptyEntry {
        match self {
            CacheEntry::Empty(ref mut x) => x,
            _ => panic!("Entry should be empty"),
        }
    }
}

pub struct LruMap<K, V> {
    entries: Vec<CacheEntry<K, V>>,
    /// Points at the index of the key.
    index: HashMap<K, usize, RandomState>,
    capacity: usize,
    entries_head: Option<usize>,
    entries_tail: Option<usize>,
    empty_head: Option<usize>,
    on_evict: Option<EvictionListener<K, V>>,
}

impl<K: Hash + Eq + Clone, V> LruMap<K, V> {
    pub fn new(capacity: usize) -> Result<LruMap<K, V>, ConfigError> {
        if capacity < 1 {
            return Err(ConfigError::InvalidCapacity(capacity));
        }

        Ok(LruMap {
            entries: Vec::new(),
            index: HashMap::with_capacity_and_hasher(capacity.min(MAX_PRESIZE), Default::default()),
            capacity,
            entries_head: None,
            entries_tail: None,
            empty_head: None,
            on_evict: None,
        })
    }

    pub fn with_eviction_listener(
        capacity: usize,
        listener: EvictionListener<K, V>,
    ) -> Result<LruMap<K, V>, ConfigError> {
        let mut ret = Self::new(capacity)?;
        ret.on_evict = Some(listener);
        Ok(ret)
    }

    pub fn set_eviction_listener(&mut self, listener: Option<EvictionListener<K, V>>) {
        self.on_evict = listener;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Entirely unlink an occupied index from the list, leaving its own links cleared.
    fn unlink_index(&mut self, index: usize) {
        let (prev, next) = {
            let e = self.entries[index].as_occupied_mut();
            let links = (e.prev, e.next);
            e.prev = None;
            e.next = None;
            links
        };

        match prev {
            Some(p) => self.entries[p].as_occupied_mut().next = next,
            None => self.entries_head = next,
        }

        match next {
            Some(n) => self.entries[n].as_occupied_mut().prev = prev,
            None => self.entries_tail = prev,
        }
    }

    /// Link an occupied index which isn't in the list in as the most recent item.
    fn link_as_head(&mut self, index: usize) {
        self.entries[index].as_occupied_mut().next = self.entries_head;
        if let Some(h) = self.entries_head {
            self.entries[h].as_occupied_mut().prev = Some(index);
        }
        self.entries_head = Some(index);

        if self.entries_tail.is_none() {
            self.entries_tail = Some(index);
        }
    }

    /// Given the index of an occupied entry, make it the most recent item.
    fn make_most_recent(&mut self, index: usize) {
        if self.entries_head == Some(index) {
            return;
        }

        self.unlink_index(index);
        self.link_as_head(index);
    }

    /// Get a value, making it the most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_mut(key).map(|x| &*x)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let ind = *self.index.get(key)?;
        self.make_most_recent(ind);
        Some(&mut self.entries[ind].as_occupied_mut().item)
    }

    /// Get a value without counting it as a use.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let ind = *self.index.get(key)?;
        Some(&self.entries[ind].as_occupied().item)
    }

    /// Get a value mutably without counting it as a use.
    pub fn peek_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let ind = *self.index.get(key)?;
        Some(&mut self.entries[ind].as_occupied_mut().item)
    }

    /// The least recently used entry, which is the next to be evicted.
    pub fn peek_lru_mut(&mut self) -> Option<(&K, &mut V)> {
        let tail = self.entries_tail?;
        let e = self.entries[tail].as_occupied_mut();
        Some((&e.key, &mut e.item))
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(key)
    }

    /// Make a specific index of the map become empty, returning what was there.
    fn become_empty(&mut self, index: usize) -> (K, V) {
        self.unlink_index(index);
        let mut old = CacheEntry::Empty(EmptyEntry {
            next_empty: self.empty_head,
        });
        std::mem::swap(&mut old, &mut self.entries[index]);
        self.empty_head = Some(index);
        match old {
            CacheEntry::Occupied(OccupiedEntry { key, item, .. }) => {
                self.index.remove(&key);
                (key, item)
            }
            _ => panic!("Should have been occupied"),
        }
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let ind = *self.index.get(key)?;
        Some(self.become_empty(ind).1)
    }

    /// Find an available empty index, or make one if necessary.
    fn find_empty(&mut self) -> usize {
        if let Some(e) = self.empty_head {
            self.empty_head = self.entries[e].as_empty_mut().next_empty;
            return e;
        }

        self.entries
            .push(CacheEntry::Empty(EmptyEntry { next_empty: None }));
        self.entries.len() - 1
    }

    /// Add an entry to the map.  Return the old value if this key was already present.
    ///
    /// Replacing a value is a use of that key, not a new entry, so it never evicts anything.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(&ind) = self.index.get(&key) {
            self.make_most_recent(ind);
            let entry = self.entries[ind].as_occupied_mut();
            return Some(std::mem::replace(&mut entry.item, value));
        }

        // Make room first, so that the capacity is never exceeded.
        while self.len() >= self.capacity {
            self.evict_one();
        }

        let ind = self.find_empty();
        self.entries[ind] = CacheEntry::Occupied(OccupiedEntry {
            key: key.clone(),
            item: value,
            prev: None,
            next: None,
        });
        self.link_as_head(ind);
        self.index.insert(key, ind);
        None
    }

    /// Remove and return the least recently used entry, without notifying the eviction listener.
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        let tail = self.entries_tail?;
        Some(self.become_empty(tail))
    }

    fn evict_one(&mut self) {
        let (key, item) = match self.pop_lru() {
            Some(x) => x,
            None => panic!("Not enough entries to explain length"),
        };

        tracing::trace!(capacity = self.capacity, "evicting least recently used entry");
        if let Some(listener) = self.on_evict.as_mut() {
            listener(key, item);
        }
    }

    /// Drop every entry for which `keep` returns false, returning how many were dropped.
    ///
    /// This is not eviction: the eviction listener isn't called, and recency is unchanged for the survivors.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        let mut doomed = vec![];
        let mut ind = self.entries_head;
        while let Some(i) = ind {
            let e = self.entries[i].as_occupied_mut();
            ind = e.next;
            if !keep(&e.key, &mut e.item) {
                doomed.push(i);
            }
        }

        for i in doomed.iter() {
            self.become_empty(*i);
        }
        doomed.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.entries_head = None;
        self.entries_tail = None;
        self.empty_head = None;
    }

    /// Iterator visiting entries in most-recently-used order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        let mut ind = self.entries_head;
        std::iter::from_fn(move || {
            let next = ind?;
            let ret = self.entries[next].as_occupied();
            ind = ret.next;
            Some((&ret.key, &ret.item))
        })
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for LruMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut m = f.debug_map();
        let mut ind = self.entries_head;
        while let Some(i) = ind {
            let e = self.entries[i].as_occupied();
            m.entry(&e.key, &e.item);
            ind = e.next;
        }
        m.finish()
    }
}
