//! The [Memoizer] caches the results of a function of one argument, keyed by that argument.
//!
//! Results live in a [BoundedCache], so a memoizer can be unbounded, LRU, or reclaimable, depending on its
//! [CacheConfig].  Only one thread computes the result for a given argument at a time; other threads asking for the
//! same argument wait for it and then read what it stored.  Different arguments compute in parallel.
//!
//! A computation which fails stores nothing, and the next caller for that argument tries again.
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ahash::RandomState;

use crate::*;

pub struct Memoizer<A, V: ?Sized> {
    values: BoundedCache<A, V>,
    /// Mutexes that stop multiple threads computing the same argument.
    computing_guards: Mutex<HashMap<A, Arc<Mutex<()>>, RandomState>>,
}

impl<A: Hash + Eq + Clone + 'static, V: 'static> Memoizer<A, V> {
    /// A memoizer which never forgets anything it wasn't told to.
    pub fn new() -> Memoizer<A, V> {
        Memoizer {
            values: BoundedCache::unbounded(),
            computing_guards: Default::default(),
        }
    }

    pub fn with_config(config: CacheConfig) -> Result<Memoizer<A, V>, ConfigError> {
        Ok(Memoizer {
            values: BoundedCache::new(config)?,
            computing_guards: Default::default(),
        })
    }

    /// Compute, assuming we hold the guard for `arg`.  Someone may have stored it while we waited for the guard.
    fn compute_postchecked<E, F>(&self, arg: &A, computation: F) -> Result<Arc<V>, E>
    where
        F: FnOnce(&A) -> Result<V, E>,
    {
        if let Some(x) = self.values.get(arg) {
            return Ok(x);
        }

        let value = Arc::new(computation(arg)?);
        self.values.insert(arg.clone(), value.clone());
        tracing::trace!("memoized a new result");
        Ok(value)
    }

    /// Get the result for `arg`, running `computation` if there isn't one.
    pub fn compute_if_absent<E, F>(&self, arg: &A, computation: F) -> Result<Arc<V>, E>
    where
        F: FnOnce(&A) -> Result<V, E>,
    {
        if let Some(x) = self.values.get(arg) {
            return Ok(x);
        }

        let mutex = {
            let mut guards = self.computing_guards.lock().unwrap();
            guards
                .entry(arg.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let ret = {
            // A panicking computation leaves nothing behind for the guard to protect.
            let _guard: MutexGuard<()> = mutex.lock().unwrap_or_else(PoisonError::into_inner);
            self.compute_postchecked(arg, computation)
        };

        // Last one out removes the guard.  Guards are only cloned and dropped with the map locked.
        let mut guards = self.computing_guards.lock().unwrap();
        drop(mutex);
        let unused = guards
            .get(arg)
            .map(|x| Arc::strong_count(x) == 1)
            .unwrap_or(false);
        if unused {
            guards.remove(arg);
        }

        ret
    }

    /// Get a stored result without computing anything.
    pub fn get(&self, arg: &A) -> Option<Arc<V>> {
        self.values.get(arg)
    }

    /// Forget the result for `arg`, returning it if there was one.
    pub fn remove(&self, arg: &A) -> Option<Arc<V>> {
        self.values.remove(arg)
    }

    pub fn clear(&self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// [Memoizer::compute_if_absent] for computations which can't fail.
    pub fn compute<F>(&self, arg: &A, computation: F) -> Arc<V>
    where
        F: FnOnce(&A) -> V,
    {
        match self.compute_if_absent(arg, |a| Ok::<V, std::convert::Infallible>(computation(a))) {
            Ok(x) => x,
            Err(never) => match never {},
        }
    }
}

impl<A: Hash + Eq + Clone + 'static, V: 'static> Default for Memoizer<A, V> {
    fn default() -> Memoizer<A, V> {
        Self::new()
    }
}

impl<A, V> Resettable for Memoizer<A, V>
where
    A: Hash + Eq + Clone + Send + 'static,
    V: Send + Sync + 'static,
{
    fn reset(&self) {
        self.clear()
    }
}

impl<A, V: ?Sized> fmt::Debug for Memoizer<A, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoizer")
            .field("values", &self.values)
            .finish()
    }
}
