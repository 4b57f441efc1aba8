//! A [BoundedCache] is a thread-safe key-value cache, configured along two axes by a [CacheConfig]:
//!
//! - Capacity policy: unbounded, where `capacity` only sizes the initial table, or LRU, where `capacity` is a hard
//!   limit and the least recently used entry is evicted to make room.
//! - [Strength]: whether values are held strongly, softly, or weakly.
//!
//! That gives four kinds of cache: a plain growable map, a strong LRU map, a reclaimable map, and a reclaimable LRU
//! map.  Values go in and come out as `Arc`s.
//!
//! Soft and weak values may vanish at any time without the cache being told, so the cache reconciles as it goes: a
//! lookup checks the one entry it touches, a full LRU cache drops reclaimed entries from its cold end before evicting
//! anything live, and the whole cache is swept when it has doubled in size since the last sweep and before anything
//! which reports on all entries.  A reclaimed entry is indistinguishable from one which was never inserted.
//! Reclamation and LRU eviction are independent; only eviction calls the eviction listener, and only if the evicted
//! value is still alive.
//!
//! Every operation takes one lock on the whole cache.  Eviction listeners run under it, so they must not call back
//! into the cache that invoked them.
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use ahash::RandomState;

use crate::lru_map::MAX_PRESIZE;
use crate::reference::Handle;
use crate::*;

pub const DEFAULT_CAPACITY: usize = 16;
pub const DEFAULT_LOAD_FACTOR: f32 = 0.75;

/// How to build a [BoundedCache].
///
/// Eviction listeners aren't part of the configuration; pass one to [BoundedCache::with_eviction_listener] along
/// with the built config.
#[derive(Debug, Clone, PartialEq, derive_builder::Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct CacheConfig {
    /// Maximum number of entries for LRU caches; initial number of entries to make room for otherwise.
    #[builder(default = "DEFAULT_CAPACITY")]
    pub capacity: usize,
    /// How full the initial table may get before it would have to grow.
    #[builder(default = "DEFAULT_LOAD_FACTOR")]
    pub load_factor: f32,
    #[builder(default)]
    pub strength: Strength,
    /// Bound the cache at `capacity`, evicting least recently used entries.
    #[builder(default)]
    pub lru: bool,
}

impl CacheConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(c) = self.capacity {
            check_capacity(c).map_err(|e| e.to_string())?;
        }
        if let Some(lf) = self.load_factor {
            check_load_factor(lf).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

fn check_capacity(capacity: usize) -> Result<(), ConfigError> {
    if capacity < 1 {
        return Err(ConfigError::InvalidCapacity(capacity));
    }
    Ok(())
}

fn check_load_factor(load_factor: f32) -> Result<(), ConfigError> {
    if !(load_factor > 0.0 && load_factor.is_finite()) {
        return Err(ConfigError::InvalidLoadFactor(load_factor));
    }
    Ok(())
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_capacity(self.capacity)?;
        check_load_factor(self.load_factor)
    }

    /// Number of entries to reserve so that `capacity` entries fit at the configured load factor, up to a limit past
    /// which the table grows on demand instead.
    fn table_size(&self) -> usize {
        let wanted = (self.capacity as f64 / self.load_factor as f64).ceil();
        if wanted >= MAX_PRESIZE as f64 {
            MAX_PRESIZE
        } else {
            wanted as usize
        }
    }
}

impl Default for CacheConfig {
    fn default() -> CacheConfig {
        CacheConfig {
            capacity: DEFAULT_CAPACITY,
            load_factor: DEFAULT_LOAD_FACTOR,
            strength: Strength::Strong,
            lru: false,
        }
    }
}

/// Called with the original key and value of every entry evicted from an LRU cache.
pub type EvictionCallback<K, V> = Box<dyn FnMut(K, Arc<V>) + Send>;

/// Smallest store size at which reclaimable caches sweep on insert.
const MIN_SWEEP: usize = 64;

enum Store<K, V: ?Sized> {
    Map(HashMap<K, Handle<V>, RandomState>),
    Lru(LruMap<K, Handle<V>>),
}

impl<K: Hash + Eq + Clone, V: ?Sized> Store<K, V> {
    fn len(&self) -> usize {
        match self {
            Store::Map(m) => m.len(),
            Store::Lru(m) => m.len(),
        }
    }

    /// Look a key up, counting it as a use for LRU stores.
    fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut Handle<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self {
            Store::Map(m) => m.get_mut(key),
            Store::Lru(m) => m.get_mut(key),
        }
    }

    /// Look a key up without counting it as a use.
    fn peek_mut<Q>(&mut self, key: &Q) -> Option<&mut Handle<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self {
            Store::Map(m) => m.get_mut(key),
            Store::Lru(m) => m.peek_mut(key),
        }
    }

    fn insert(&mut self, key: K, value: Handle<V>) -> Option<Handle<V>> {
        match self {
            Store::Map(m) => m.insert(key, value),
            Store::Lru(m) => m.insert(key, value),
        }
    }

    fn remove<Q>(&mut self, key: &Q) -> Option<Handle<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self {
            Store::Map(m) => m.remove(key),
            Store::Lru(m) => m.remove(key),
        }
    }

    fn retain<F: FnMut(&K, &mut Handle<V>) -> bool>(&mut self, mut keep: F) -> usize {
        match self {
            Store::Map(m) => {
                let before = m.len();
                m.retain(|k, v| keep(k, v));
                before - m.len()
            }
            Store::Lru(m) => m.retain(keep),
        }
    }

    fn clear(&mut self) {
        match self {
            Store::Map(m) => m.clear(),
            Store::Lru(m) => m.clear(),
        }
    }

    /// Visit live entries, most recently used first for LRU stores.
    fn collect<T, F: FnMut(&K, Arc<V>) -> T>(&self, mut f: F) -> Vec<T> {
        let visit = |(k, h): (&K, &Handle<V>)| h.peek().map(|v| f(k, v));
        match self {
            Store::Map(m) => m.iter().filter_map(visit).collect(),
            Store::Lru(m) => m.iter().filter_map(visit).collect(),
        }
    }
}

struct State<K, V: ?Sized> {
    store: Store<K, V>,
    /// Sweep the whole store once an insert finds it at least this big.
    sweep_at: usize,
}

pub struct BoundedCache<K, V: ?Sized> {
    config: CacheConfig,
    /// Soft handles let go of their values once this moves past their stamp.
    pressure: Arc<Generation>,
    state: Mutex<State<K, V>>,
}

impl<K: Hash + Eq + Clone + 'static, V: ?Sized + 'static> BoundedCache<K, V> {
    pub fn new(config: CacheConfig) -> Result<BoundedCache<K, V>, ConfigError> {
        Self::build(config, None)
    }

    /// Build an LRU cache which hands evicted entries to `listener`.  This forces `config.lru` on.
    pub fn with_eviction_listener<F>(mut config: CacheConfig, listener: F) -> Result<BoundedCache<K, V>, ConfigError>
    where
        F: FnMut(K, Arc<V>) + Send + 'static,
    {
        config.lru = true;
        Self::build(config, Some(Box::new(listener)))
    }

    fn build(
        config: CacheConfig,
        listener: Option<EvictionCallback<K, V>>,
    ) -> Result<BoundedCache<K, V>, ConfigError> {
        config.validate()?;

        let store = if config.lru {
            let mut map = LruMap::new(config.capacity)?;
            if let Some(mut listener) = listener {
                map.set_eviction_listener(Some(Box::new(move |key: K, handle: Handle<V>| {
                    match handle.into_value() {
                        Some(value) => listener(key, value),
                        None => tracing::trace!("evicted value was already reclaimed"),
                    }
                })));
            }
            Store::Lru(map)
        } else {
            Store::Map(HashMap::with_capacity_and_hasher(
                config.table_size(),
                Default::default(),
            ))
        };

        Ok(BoundedCache {
            config,
            pressure: Generation::memory_pressure().clone(),
            state: Mutex::new(State {
                store,
                sweep_at: MIN_SWEEP,
            }),
        })
    }

    /// A plain growable map of strong references.
    pub fn unbounded() -> BoundedCache<K, V> {
        Self::new(Default::default()).expect("The default configuration is valid")
    }

    /// A strong map holding at most `capacity` entries.
    pub fn lru(capacity: usize) -> Result<BoundedCache<K, V>, ConfigError> {
        Self::new(CacheConfig {
            capacity,
            lru: true,
            ..Default::default()
        })
    }

    /// A growable map of soft references.
    pub fn soft() -> BoundedCache<K, V> {
        Self::new(CacheConfig {
            strength: Strength::Soft,
            ..Default::default()
        })
        .expect("The default configuration is valid")
    }

    /// A growable map of weak references.
    pub fn weak() -> BoundedCache<K, V> {
        Self::new(CacheConfig {
            strength: Strength::Weak,
            ..Default::default()
        })
        .expect("The default configuration is valid")
    }

    /// A map of soft references holding at most `capacity` entries.
    pub fn soft_lru(capacity: usize) -> Result<BoundedCache<K, V>, ConfigError> {
        Self::new(CacheConfig {
            capacity,
            strength: Strength::Soft,
            lru: true,
            ..Default::default()
        })
    }

    /// A map of weak references holding at most `capacity` entries.
    pub fn weak_lru(capacity: usize) -> Result<BoundedCache<K, V>, ConfigError> {
        Self::new(CacheConfig {
            capacity,
            strength: Strength::Weak,
            lru: true,
            ..Default::default()
        })
    }

    /// Watch a different memory-pressure clock than the process-wide one.
    pub fn with_pressure_clock(mut self, clock: Arc<Generation>) -> BoundedCache<K, V> {
        self.pressure = clock;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn strength(&self) -> Strength {
        self.config.strength
    }

    /// The entry limit, if this is an LRU cache.
    pub fn capacity(&self) -> Option<usize> {
        if self.config.lru {
            Some(self.config.capacity)
        } else {
            None
        }
    }

    fn is_reclaimable(&self) -> bool {
        self.config.strength != Strength::Strong
    }

    /// Drop every entry whose value has been reclaimed.
    fn sweep(&self, state: &mut State<K, V>) {
        if !self.is_reclaimable() {
            return;
        }
        let pressure = self.pressure.current();
        let dropped = state.store.retain(|_, h| h.reconcile(pressure));
        state.sweep_at = (state.store.len() * 2).max(MIN_SWEEP);
        if dropped > 0 {
            tracing::debug!(dropped, "dropped reclaimed cache entries");
        }
    }

    /// Lock the state after a full sweep, for operations which report on every entry.
    fn swept(&self) -> MutexGuard<'_, State<K, V>> {
        let mut state = self.state.lock().unwrap();
        self.sweep(&mut state);
        state
    }

    /// Insert a value, returning the previous one if it was still alive.
    pub fn insert(&self, key: K, value: Arc<V>) -> Option<Arc<V>> {
        let pressure = self.pressure.current();
        let handle = Handle::new(self.config.strength, value, pressure);
        let mut state = self.state.lock().unwrap();

        if self.is_reclaimable() {
            if state.store.len() >= state.sweep_at {
                self.sweep(&mut state);
            }
            // Reclaimed entries at the cold end make room without evicting anything live.
            if let Store::Lru(m) = &mut state.store {
                if !m.contains_key(&key) {
                    while m.len() >= m.capacity() {
                        let dead = m
                            .peek_lru_mut()
                            .map(|(_, h)| !h.reconcile(pressure))
                            .unwrap_or(false);
                        if !dead {
                            break;
                        }
                        m.pop_lru();
                    }
                }
            }
        }

        let mut old = state.store.insert(key, handle)?;
        if old.reconcile(pressure) {
            old.into_value()
        } else {
            None
        }
    }

    /// Get a value.  For LRU caches this counts as a use.
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let pressure = self.pressure.current();
        let mut state = self.state.lock().unwrap();
        let handle = state.store.get_mut(key)?;
        let ret = if handle.reconcile(pressure) {
            handle.upgrade(pressure)
        } else {
            None
        };
        if ret.is_none() {
            state.store.remove(key);
        }
        ret
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let pressure = self.pressure.current();
        let mut state = self.state.lock().unwrap();
        let alive = match state.store.peek_mut(key) {
            Some(h) => h.reconcile(pressure),
            None => return false,
        };
        if !alive {
            state.store.remove(key);
        }
        alive
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let pressure = self.pressure.current();
        let mut handle = self.state.lock().unwrap().store.remove(key)?;
        if handle.reconcile(pressure) {
            handle.into_value()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.swept().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.store.clear();
        state.sweep_at = MIN_SWEEP;
    }

    /// Keys of live entries, most recently used first for LRU caches.
    pub fn keys(&self) -> Vec<K> {
        self.swept().store.collect(|k, _| k.clone())
    }

    pub fn values(&self) -> Vec<Arc<V>> {
        self.swept().store.collect(|_, v| v)
    }

    pub fn entries(&self) -> Vec<(K, Arc<V>)> {
        self.swept().store.collect(|k, v| (k.clone(), v))
    }

    /// Stop holding soft values strongly, then drop whatever that reclaimed.  Returns the number of entries dropped.
    ///
    /// Strong and weak caches are unaffected beyond the usual reconciliation.
    pub fn relieve_memory_pressure(&self) -> usize {
        let pressure = self.pressure.current();
        let mut state = self.swept();
        let dropped = state.store.retain(|_, h| {
            h.demote();
            h.reconcile(pressure)
        });
        tracing::debug!(dropped, "relieved memory pressure");
        dropped
    }
}

impl<K, V> Resettable for BoundedCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: ?Sized + Send + Sync + 'static,
{
    fn reset(&self) {
        self.clear()
    }
}

impl<K, V: ?Sized> fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedCache")
            .field("config", &self.config)
            .finish()
    }
}
