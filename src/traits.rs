//! The [Resettable] trait is the one capability shared by everything an [crate::InvalidationGroup] can hold.
//!
//! Memoized slots, bounded caches, lazy collections, memoizers and groups themselves all implement it, so a group is
//! a tree of resettable things and resetting the root resets the whole tree.

/// Something which caches the result of a computation and can be told to forget it.
///
/// Resets must be safe to run concurrently with reads of the same object, and resets of different members must
/// commute: a group makes no promises about ordering between its members beyond insertion order.
pub trait Resettable: Send + Sync {
    /// Drop any cached state so that the next access recomputes it.
    fn reset(&self);
}
