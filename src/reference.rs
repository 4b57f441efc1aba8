//! Value handles for [crate::BoundedCache], one per [Strength].
//!
//! There is no tracing collector to clear references behind our back, so reclamation is modelled with reference
//! counts: a weak handle is a [Weak] which dies as soon as everyone outside the cache drops their `Arc`.  A soft handle
//! additionally keeps the value alive until the memory-pressure clock moves past the stamp it was taken at, and only
//! then behaves like a weak one.  So a soft value always outlives a weak one under the same pressure.
use std::sync::{Arc, Weak};

/// How strongly a cache holds on to its values.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Strength {
    /// Values live until they're removed or evicted.
    Strong,
    /// Values live until memory pressure is signalled, then only as long as something else holds them.
    Soft,
    /// Values live only as long as something outside the cache holds them.
    Weak,
}

impl Default for Strength {
    fn default() -> Strength {
        Strength::Strong
    }
}

pub(crate) enum Handle<V: ?Sized> {
    Strong(Arc<V>),
    Soft {
        held: Option<Arc<V>>,
        weak: Weak<V>,
        /// Pressure clock value when `held` was last filled.
        stamp: u64,
    },
    Weak(Weak<V>),
}

impl<V: ?Sized> Handle<V> {
    pub(crate) fn new(strength: Strength, value: Arc<V>, pressure: u64) -> Handle<V> {
        match strength {
            Strength::Strong => Handle::Strong(value),
            Strength::Soft => Handle::Soft {
                weak: Arc::downgrade(&value),
                held: Some(value),
                stamp: pressure,
            },
            Strength::Weak => Handle::Weak(Arc::downgrade(&value)),
        }
    }

    /// Let go of any strong hold a soft handle has.
    pub(crate) fn demote(&mut self) {
        if let Handle::Soft { held, .. } = self {
            *held = None;
        }
    }

    /// Demote soft handles which predate `pressure`, then report whether the referent is still alive.
    pub(crate) fn reconcile(&mut self, pressure: u64) -> bool {
        match self {
            Handle::Strong(_) => true,
            Handle::Soft { held, weak, stamp } => {
                if *stamp != pressure {
                    *held = None;
                }
                weak.strong_count() > 0
            }
            Handle::Weak(w) => w.strong_count() > 0,
        }
    }

    /// Read the value as a use: a live soft handle goes back to holding its value strongly.
    pub(crate) fn upgrade(&mut self, pressure: u64) -> Option<Arc<V>> {
        match self {
            Handle::Strong(x) => Some(x.clone()),
            Handle::Soft { held, weak, stamp } => {
                let ret = weak.upgrade()?;
                *held = Some(ret.clone());
                *stamp = pressure;
                Some(ret)
            }
            Handle::Weak(w) => w.upgrade(),
        }
    }

    /// Read the value without touching the handle.
    pub(crate) fn peek(&self) -> Option<Arc<V>> {
        match self {
            Handle::Strong(x) => Some(x.clone()),
            Handle::Soft { weak, .. } => weak.upgrade(),
            Handle::Weak(w) => w.upgrade(),
        }
    }

    /// Consume the handle, returning the value if it's still alive.
    pub(crate) fn into_value(self) -> Option<Arc<V>> {
        match self {
            Handle::Strong(x) => Some(x),
            Handle::Soft { held: Some(x), .. } => Some(x),
            Handle::Soft { held: None, weak, .. } => weak.upgrade(),
            Handle::Weak(w) => w.upgrade(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weak_dies_with_last_arc() {
        let value = Arc::new(5);
        let mut handle = Handle::new(Strength::Weak, value.clone(), 0);
        assert!(handle.reconcile(0));
        assert_eq!(handle.peek().as_deref(), Some(&5));
        drop(value);
        assert!(!handle.reconcile(0));
        assert!(handle.upgrade(0).is_none());
    }

    #[test]
    fn test_soft_survives_until_pressure() {
        let mut handle = Handle::new(Strength::Soft, Arc::new(5), 0);
        assert!(handle.reconcile(0));
        assert!(handle.reconcile(0));
        // The clock moved, so the strong hold goes and nothing else is keeping the value.
        assert!(!handle.reconcile(1));
    }

    #[test]
    fn test_soft_upgrade_repromotes() {
        let value = Arc::new(5);
        let mut handle = Handle::new(Strength::Soft, value.clone(), 0);
        assert!(handle.reconcile(1));
        assert_eq!(handle.upgrade(1).as_deref(), Some(&5));
        drop(value);
        // Held again since the upgrade at pressure 1.
        assert!(handle.reconcile(1));
        handle.demote();
        assert!(!handle.reconcile(1));
    }

    #[test]
    fn test_strong_never_dies() {
        let mut handle = Handle::new(Strength::Strong, Arc::new(5), 0);
        assert!(handle.reconcile(100));
        assert_eq!(handle.into_value().as_deref(), Some(&5));
    }
}
