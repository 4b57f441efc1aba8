//! Lazily computed values, and the caches that keep them around for as long as they're worth keeping.
//!
//! The building block is [Memoized], a slot around a computation which runs the first time the slot is read and
//! whose result is kept until something says otherwise.  Three things can say otherwise:
//!
//! - Resetting the slot directly, or through an [InvalidationGroup] it belongs to.  Groups nest.
//! - Advancing the [Generation] clock the slot watches.  [invalidate_all] does this for the process-wide clock, which
//!   flags every slot using it at once without visiting any of them.
//! - A [WorkingSet] deciding the slot is no longer among the most recently computed.
//!
//! Slots built with [Memoized::run_once] or [Memoized::constant] are pinned and ignore all of the above.
//!
//! On top of that sit the collections:
//!
//! - [LazyList] and [LazyMap] hold one slot per element, optionally bounded by a working set.
//!   [LazyListBuilder] maps a generator over a list of inputs to build a [LazyList].
//! - [BoundedCache] is a thread-safe key-value cache which is either unbounded or LRU, holding its values strongly,
//!   softly, or weakly.  The LRU part is [LruMap], which is also usable on its own.
//! - [Memoizer] caches a function of one argument on top of a [BoundedCache], computing each argument at most once
//!   at a time.
mod bounded_cache;
mod builder;
mod error;
mod generation;
mod group;
mod lazy_list;
mod lazy_map;
mod lru_map;
mod memoized;
mod memoizer;
mod reference;
mod traits;
mod working_set;

pub use bounded_cache::*;
pub use builder::*;
pub use error::*;
pub use generation::*;
pub use group::*;
pub use lazy_list::*;
pub use lazy_map::*;
pub use lru_map::*;
pub use memoized::*;
pub use memoizer::*;
pub use reference::*;
pub use traits::*;
pub use working_set::*;
