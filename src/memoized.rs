//! A [Memoized] is a single-slot cache around a zero-argument computation.
//!
//! The computation runs at most once per generation: the first [Memoized::get] runs it and stores the result, and
//! every later `get` returns the stored `Arc` until the slot is reset or its [Generation] clock advances.  Threads
//! which race on an empty slot are funneled through a guard so that only one of them computes; the rest wait for it
//! and then read what it stored.
//!
//! A failing computation stores nothing, so the next `get` simply tries again.  If failures should be remembered,
//! use [Memoized::catching], which stores the whole `Result`.
//!
//! Pinned slots (see [Memoized::run_once] and [Memoized::constant]) ignore both resets and generation bumps.
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::*;

type Computation<T, E> = Box<dyn Fn() -> Result<T, E> + Send + Sync>;
type Listener = Arc<dyn Fn() + Send + Sync>;

static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(0);

/// Handle returned by [Memoized::add_listener], used to remove the listener again.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ListenerId(u64);

struct Materialized<T> {
    value: Arc<T>,
    generation: u64,
}

struct SlotState<T> {
    cached: Option<Materialized<T>>,
    /// Bumped by every explicit reset, so that an in-flight computation can tell its result is no longer wanted.
    resets: u64,
}

pub struct Memoized<T, E = Infallible> {
    id: u64,
    computation: Computation<T, E>,
    state: RwLock<SlotState<T>>,
    /// Held for the duration of a computation.
    compute_guard: Mutex<()>,
    generation: Arc<Generation>,
    pinned: bool,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl<T: 'static, E: 'static> Memoized<T, E> {
    fn build(generation: Arc<Generation>, pinned: bool, computation: Computation<T, E>) -> Memoized<T, E> {
        Memoized {
            id: NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed),
            computation,
            state: RwLock::new(SlotState {
                cached: None,
                resets: 0,
            }),
            compute_guard: Mutex::new(()),
            generation,
            pinned,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    /// Wrap a fallible computation, using the global generation clock.
    pub fn try_new<F>(computation: F) -> Memoized<T, E>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Self::try_with_generation(Generation::global().clone(), computation)
    }

    /// Wrap a fallible computation which is invalidated whenever `generation` advances.
    pub fn try_with_generation<F>(generation: Arc<Generation>, computation: F) -> Memoized<T, E>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Self::build(generation, false, Box::new(computation))
    }

    /// A pinned slot: the computation runs until it first succeeds, and never again.
    pub fn try_run_once<F>(computation: F) -> Memoized<T, E>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Self::build(Generation::global().clone(), true, Box::new(computation))
    }

    /// A pinned slot which already holds `value`.
    pub fn constant(value: T) -> Memoized<T, E> {
        let ret = Self::build(
            Generation::global().clone(),
            true,
            Box::new(|| -> Result<T, E> { unreachable!("Constant slots are materialized at construction") }),
        );
        ret.state.write().unwrap().cached = Some(Materialized {
            value: Arc::new(value),
            generation: 0,
        });
        ret
    }
}

impl<T, E> Memoized<T, E> {
    /// Identity of this slot, unique for the life of the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    fn is_current(&self, stamp: u64) -> bool {
        self.pinned || stamp == self.generation.current()
    }

    /// Return the stored value if there is one and it isn't stale.
    fn lookup(&self) -> Option<Arc<T>> {
        let state = self.state.read().unwrap();
        let cached = state.cached.as_ref()?;
        if self.is_current(cached.generation) {
            Some(cached.value.clone())
        } else {
            None
        }
    }

    /// Get the value, running the computation if this slot isn't materialized.
    pub fn get(&self) -> Result<Arc<T>, E> {
        if let Some(x) = self.lookup() {
            return Ok(x);
        }

        // Nothing in the guard to protect, so a computation which panicked doesn't make the slot unusable.
        let _guard: MutexGuard<()> = self
            .compute_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Someone else may have finished computing while we waited on the guard.
        if let Some(x) = self.lookup() {
            return Ok(x);
        }

        let generation = self.generation.current();
        let resets = self.state.read().unwrap().resets;
        let value = Arc::new((self.computation)()?);

        // A reset or generation bump which landed mid-computation wins: the caller gets the value, but it isn't kept.
        let stored = {
            let mut state = self.state.write().unwrap();
            let keep = state.resets == resets && self.is_current(generation);
            if keep {
                state.cached = Some(Materialized {
                    value: value.clone(),
                    generation,
                });
            }
            keep
        };

        if stored {
            tracing::trace!(slot = self.id, generation, "materialized slot");
            self.fire_listeners();
        } else {
            tracing::trace!(slot = self.id, "discarded value invalidated while computing");
        }
        Ok(value)
    }

    /// Whether a call to [Memoized::get] would currently be answered without running the computation.
    pub fn has_run(&self) -> bool {
        let state = self.state.read().unwrap();
        state
            .cached
            .as_ref()
            .map(|x| self.is_current(x.generation))
            .unwrap_or(false)
    }

    /// Forget the stored value.  Does nothing to pinned slots.
    pub fn reset(&self) {
        if self.pinned {
            return;
        }

        let old = {
            let mut state = self.state.write().unwrap();
            state.resets = state.resets.wrapping_add(1);
            state.cached.take()
        };

        if old.is_some() {
            tracing::trace!(slot = self.id, "reset slot");
        }
    }

    /// Register a callback which runs, in registration order, after every computation of this slot whose value is
    /// kept.
    ///
    /// Cache hits never invoke listeners, and neither do computations invalidated before they finished.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener, returning whether it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut guard = self.listeners.lock().unwrap();
        let before = guard.len();
        guard.retain(|(x, _)| *x != id);
        guard.len() != before
    }

    fn fire_listeners(&self) {
        // Snapshot, so that listeners are free to add or remove listeners.
        let listeners = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, l)| l.clone())
            .collect::<Vec<_>>();
        for l in listeners {
            l();
        }
    }
}

impl<T: 'static> Memoized<T, Infallible> {
    pub fn new<F>(computation: F) -> Memoized<T, Infallible>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::try_new(move || Ok(computation()))
    }

    pub fn with_generation<F>(generation: Arc<Generation>, computation: F) -> Memoized<T, Infallible>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::try_with_generation(generation, move || Ok(computation()))
    }

    /// A pinned slot whose computation runs exactly once.
    pub fn run_once<F>(computation: F) -> Memoized<T, Infallible>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::try_run_once(move || Ok(computation()))
    }

    /// [Memoized::get] for computations which can't fail.
    pub fn value(&self) -> Arc<T> {
        match self.get() {
            Ok(x) => x,
            Err(never) => match never {},
        }
    }
}

impl<T: 'static, E: 'static> Memoized<Result<T, E>, Infallible> {
    /// Wrap a fallible computation whose failures are cached just like successes.
    ///
    /// The stored `Result` follows the usual reset and generation rules, so resetting the slot is how a cached
    /// failure gets retried.
    pub fn catching<F>(computation: F) -> Memoized<Result<T, E>, Infallible>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Self::new(computation)
    }

    /// Run the computation if needed and report whether it failed.
    pub fn failed(&self) -> bool {
        self.value().is_err()
    }
}

impl<T: Send + Sync, E> Resettable for Memoized<T, E> {
    fn reset(&self) {
        Memoized::reset(self)
    }
}

impl<T, E> fmt::Debug for Memoized<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("id", &self.id)
            .field("pinned", &self.pinned)
            .field("has_run", &self.has_run())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    use super::*;

    fn counting(clock: &Arc<Generation>) -> (Arc<AtomicUsize>, Memoized<usize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let slot = Memoized::with_generation(clock.clone(), move || c.fetch_add(1, Ordering::SeqCst));
        (counter, slot)
    }

    #[test]
    fn test_doesnt_run_until_called() {
        let (counter, slot) = counting(&Generation::shared());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(!slot.has_run());
        assert_eq!(*slot.value(), 0);
        assert!(slot.has_run());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_repeated_gets_run_once() {
        let (counter, slot) = counting(&Generation::shared());
        for _ in 0..5 {
            assert_eq!(*slot.value(), 0);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_recomputes() {
        let (counter, slot) = counting(&Generation::shared());
        assert_eq!(*slot.value(), 0);
        slot.reset();
        assert!(!slot.has_run());
        assert_eq!(*slot.value(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reset_one_leaves_other() {
        let clock = Generation::shared();
        let (c1, s1) = counting(&clock);
        let (c2, s2) = counting(&clock);
        s1.value();
        s2.value();
        s1.reset();
        s1.value();
        s2.value();
        assert_eq!(c1.load(Ordering::SeqCst), 2);
        assert_eq!(c2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_generation_bump_invalidates_lazily() {
        let clock = Generation::shared();
        let (c1, s1) = counting(&clock);
        let (c2, s2) = counting(&clock);
        s1.value();
        s2.value();

        clock.advance();
        assert!(!s1.has_run());
        assert!(!s2.has_run());
        // Nothing has recomputed yet.
        assert_eq!(c1.load(Ordering::SeqCst), 1);

        s1.value();
        s2.value();
        assert_eq!(c1.load(Ordering::SeqCst), 2);
        assert_eq!(c2.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_pinned_ignores_reset_and_generation() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let slot = Memoized::run_once(move || c.fetch_add(1, Ordering::SeqCst));
        assert!(slot.is_pinned());
        slot.value();
        slot.reset();
        slot.value();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(slot.has_run());
    }

    #[test]
    fn test_constant() {
        let slot = Memoized::<_, Infallible>::constant("abc");
        assert!(slot.has_run());
        slot.reset();
        assert_eq!(*slot.value(), "abc");
    }

    #[test]
    fn test_failure_does_not_poison() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let slot = Memoized::try_with_generation(Generation::shared(), move || {
            if a.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("first call fails")
            } else {
                Ok(42)
            }
        });

        assert_eq!(slot.get().unwrap_err(), "first call fails");
        assert!(!slot.has_run());
        assert_eq!(*slot.get().unwrap(), 42);
        assert_eq!(*slot.get().unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_catching_caches_failure() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let slot = Memoized::catching(move || -> Result<u32, String> {
            a.fetch_add(1, Ordering::SeqCst);
            Err("boom".to_string())
        });

        assert!(slot.failed());
        assert!(slot.failed());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        slot.reset();
        assert_eq!(*slot.value(), Err("boom".to_string()));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listeners_fire_only_on_computation() {
        let (_, slot) = counting(&Generation::shared());
        let fired = Arc::new(Mutex::new(vec![]));

        let f1 = fired.clone();
        slot.add_listener(move || f1.lock().unwrap().push(1));
        let f2 = fired.clone();
        let second = slot.add_listener(move || f2.lock().unwrap().push(2));

        slot.value();
        slot.value();
        assert_eq!(*fired.lock().unwrap(), vec![1, 2]);

        assert!(slot.remove_listener(second));
        assert!(!slot.remove_listener(second));
        slot.reset();
        slot.value();
        assert_eq!(*fired.lock().unwrap(), vec![1, 2, 1]);
    }

    #[test]
    fn test_listeners_skip_failures() {
        let slot = Memoized::<u32, &str>::try_with_generation(Generation::shared(), || Err("nope"));
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        slot.add_listener(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(slot.get().is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_first_access_computes_once() {
        const THREADS: usize = 16;

        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let slot = Arc::new(Memoized::with_generation(Generation::shared(), move || {
            c.fetch_add(1, Ordering::SeqCst);
            // Widen the race window.
            std::thread::sleep(std::time::Duration::from_millis(20));
            vec![7u8; 1024]
        }));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles = (0..THREADS)
            .map(|_| {
                let slot = slot.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    slot.value()
                })
            })
            .collect::<Vec<_>>();
        let results = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        for r in &results {
            assert!(Arc::ptr_eq(r, &results[0]));
        }
    }

    #[test]
    fn test_reset_during_computation_discards_result() {
        let started = Arc::new(Barrier::new(2));
        let resumed = Arc::new(Barrier::new(2));
        let (s, r) = (started.clone(), resumed.clone());
        let slot = Arc::new(Memoized::with_generation(Generation::shared(), move || {
            s.wait();
            r.wait();
            1u32
        }));

        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        slot.add_listener(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        let s = slot.clone();
        let handle = std::thread::spawn(move || s.value());
        started.wait();
        slot.reset();
        resumed.wait();

        assert_eq!(*handle.join().unwrap(), 1);
        assert!(!slot.has_run());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_generation_bump_during_computation_discards_result() {
        let clock = Generation::shared();
        let started = Arc::new(Barrier::new(2));
        let resumed = Arc::new(Barrier::new(2));
        let runs = Arc::new(AtomicUsize::new(0));
        let (s, r, n) = (started.clone(), resumed.clone(), runs.clone());
        let slot = Arc::new(Memoized::with_generation(clock.clone(), move || {
            // Only the first run waits.
            let run = n.fetch_add(1, Ordering::SeqCst);
            if run == 0 {
                s.wait();
                r.wait();
            }
            run
        }));

        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        slot.add_listener(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        let s = slot.clone();
        let handle = std::thread::spawn(move || s.value());
        started.wait();
        clock.advance();
        resumed.wait();

        assert_eq!(*handle.join().unwrap(), 0);
        assert!(!slot.has_run());
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        assert_eq!(*slot.value(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(slot.has_run());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
