//! A [Generation] is a versioned clock: a counter which only ever moves forward.
//!
//! Memoized slots stamp their results with the clock's value at the time they start computing, and treat anything
//! stamped with an older value as absent.  Advancing the clock therefore invalidates every slot sharing it without
//! having to visit any of them.
//!
//! Two process-wide clocks exist.  [Generation::global] is the default for every [crate::Memoized] which isn't given
//! one explicitly, and [invalidate_all] advances it.  [Generation::memory_pressure] is watched by soft references
//! in [crate::BoundedCache], and [signal_memory_pressure] advances it.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Default)]
pub struct Generation {
    counter: AtomicU64,
}

impl Generation {
    pub fn new() -> Generation {
        Generation {
            counter: AtomicU64::new(0),
        }
    }

    /// Convenience for building a private clock to hand to several slots.
    pub fn shared() -> Arc<Generation> {
        Arc::new(Generation::new())
    }

    /// The clock used by memoized slots which weren't given one.
    pub fn global() -> &'static Arc<Generation> {
        static GLOBAL: OnceLock<Arc<Generation>> = OnceLock::new();
        GLOBAL.get_or_init(Generation::shared)
    }

    /// The clock soft references compare their stamps against.
    pub fn memory_pressure() -> &'static Arc<Generation> {
        static PRESSURE: OnceLock<Arc<Generation>> = OnceLock::new();
        PRESSURE.get_or_init(Generation::shared)
    }

    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Move the clock forward, returning the new value.
    ///
    /// This never blocks and never touches the slots; they notice the next time they're read.
    pub fn advance(&self) -> u64 {
        let next = self.counter.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(generation = next, "advanced generation");
        next
    }
}

/// Flag every memoized slot on the global clock to recompute on its next read.
///
/// Pinned slots are unaffected.
pub fn invalidate_all() {
    Generation::global().advance();
}

/// Tell every soft-referencing cache on the global pressure clock to stop holding its values strongly.
///
/// Values which nothing outside the caches keeps alive disappear at each cache's next reconciliation.
pub fn signal_memory_pressure() {
    Generation::memory_pressure().advance();
}
