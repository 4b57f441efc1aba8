//! A [LazyList] is a vector of [Memoized] slots: each element is a computation which runs the first time the element
//! is read.
//!
//! All elements belong to one [InvalidationGroup], so [LazyList::reset_cache] forgets every computed value at once.
//! Lists built with a working set keep only the most recently computed elements materialized; reading an element
//! which has been released simply computes it again.
//!
//! Structural changes take `&mut self`, reads take `&self`.  Removing or replacing an element detaches its slot from
//! the group and the working set before the old value is handed back.
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use crate::*;

pub struct LazyList<T, E = Infallible> {
    slots: Vec<Arc<Memoized<T, E>>>,
    group: InvalidationGroup,
    working_set: Option<WorkingSet>,
}

impl<T: Send + Sync + 'static, E: 'static> LazyList<T, E> {
    pub fn new() -> LazyList<T, E> {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> LazyList<T, E> {
        LazyList {
            slots: Vec::with_capacity(capacity),
            group: InvalidationGroup::new(),
            working_set: None,
        }
    }

    /// A list which keeps at most `size` elements materialized.
    pub fn with_working_set(capacity: usize, size: usize) -> Result<LazyList<T, E>, ConfigError> {
        let mut ret = Self::with_capacity(capacity);
        ret.working_set = Some(WorkingSet::new(size)?);
        Ok(ret)
    }

    fn register(&mut self, slot: Memoized<T, E>) -> Arc<Memoized<T, E>> {
        let slot = self.group.add(Arc::new(slot));
        if let Some(ws) = self.working_set.as_mut() {
            ws.added(&slot);
        }
        slot
    }

    fn unregister(&mut self, slot: &Arc<Memoized<T, E>>) {
        self.group.remove(slot);
        if let Some(ws) = self.working_set.as_mut() {
            ws.removed(slot);
        }
    }

    fn check_index(&self, index: usize, len: usize) -> Result<(), LazyError<E>> {
        if index >= len {
            return Err(LazyError::IndexOutOfBounds {
                index,
                len: self.slots.len(),
            });
        }
        Ok(())
    }

    fn place(&mut self, index: usize, slot: Memoized<T, E>) -> Result<Arc<Memoized<T, E>>, LazyError<E>> {
        // Inserting at the end is fine.
        self.check_index(index, self.slots.len() + 1)?;
        let slot = self.register(slot);
        self.slots.insert(index, slot.clone());
        Ok(slot)
    }

    /// Append an element computed by `computation`.
    pub fn try_push<F>(&mut self, computation: F) -> Arc<Memoized<T, E>>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        let slot = self.register(Memoized::try_new(computation));
        self.slots.push(slot.clone());
        slot
    }

    /// Insert an element computed by `computation` at `index`, shifting later elements up.
    pub fn try_insert<F>(&mut self, index: usize, computation: F) -> Result<Arc<Memoized<T, E>>, LazyError<E>>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        self.place(index, Memoized::try_new(computation))
    }

    /// Append an element whose value is already known.
    pub fn push_value(&mut self, value: T) -> Arc<Memoized<T, E>> {
        let slot = self.register(Memoized::constant(value));
        self.slots.push(slot.clone());
        slot
    }

    pub fn insert_value(&mut self, index: usize, value: T) -> Result<Arc<Memoized<T, E>>, LazyError<E>> {
        self.place(index, Memoized::constant(value))
    }

    /// Replace the element at `index` with a known value, returning the old element's value.
    ///
    /// The old element is computed if it has to be, after it has left the list.
    pub fn set(&mut self, index: usize, value: T) -> Result<Arc<T>, LazyError<E>> {
        self.check_index(index, self.slots.len())?;
        let new_slot = self.register(Memoized::constant(value));
        let old = std::mem::replace(&mut self.slots[index], new_slot);
        self.unregister(&old);
        old.get().map_err(LazyError::Computation)
    }

    /// Get the element at `index`, computing it if needed.
    pub fn get(&self, index: usize) -> Result<Arc<T>, LazyError<E>> {
        self.check_index(index, self.slots.len())?;
        self.slots[index].get().map_err(LazyError::Computation)
    }

    pub fn slot(&self, index: usize) -> Option<&Arc<Memoized<T, E>>> {
        self.slots.get(index)
    }

    /// Remove the element at `index` and return its value, computing it if needed.
    pub fn remove(&mut self, index: usize) -> Result<Arc<T>, LazyError<E>> {
        self.check_index(index, self.slots.len())?;
        let slot = self.slots.remove(index);
        self.unregister(&slot);
        slot.get().map_err(LazyError::Computation)
    }

    /// Remove the element at `index` without computing it.
    pub fn remove_slot(&mut self, index: usize) -> Option<Arc<Memoized<T, E>>> {
        if index >= self.slots.len() {
            return None;
        }
        let slot = self.slots.remove(index);
        self.unregister(&slot);
        Some(slot)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Forget every computed value.  Elements inserted as values keep them.
    pub fn reset_cache(&self) {
        self.group.reset_all();
        if let Some(ws) = self.working_set.as_ref() {
            ws.clear();
        }
    }

    /// Number of elements which currently hold a value.
    pub fn materialized_count(&self) -> usize {
        self.slots.iter().filter(|s| s.has_run()).count()
    }

    /// Maximum number of elements kept materialized, if this list has a working set.
    pub fn working_set_size(&self) -> Option<usize> {
        self.working_set.as_ref().map(|ws| ws.size())
    }

    /// Iterate over the elements in order, computing each as it's reached.
    pub fn iter(&self) -> impl Iterator<Item = Result<Arc<T>, E>> + '_ {
        self.slots.iter().map(|s| s.get())
    }
}

impl<T: Send + Sync + 'static> LazyList<T, Infallible> {
    pub fn push<F>(&mut self, computation: F) -> Arc<Memoized<T>>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.try_push(move || Ok(computation()))
    }

    pub fn insert<F>(&mut self, index: usize, computation: F) -> Result<Arc<Memoized<T>>, LazyError<Infallible>>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.try_insert(index, move || Ok(computation()))
    }
}

impl<T: Send + Sync + 'static, E: 'static> Default for LazyList<T, E> {
    fn default() -> LazyList<T, E> {
        Self::new()
    }
}

impl<T: Send + Sync + 'static, E: 'static> Resettable for LazyList<T, E> {
    fn reset(&self) {
        self.reset_cache()
    }
}

impl<T, E> fmt::Debug for LazyList<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyList")
            .field("len", &self.slots.len())
            .field("working_set", &self.working_set)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Push `count` elements whose value is their index, counting how often each computes.
    fn counting_list(list: &mut LazyList<usize>, count: usize) -> Vec<Arc<AtomicUsize>> {
        (0..count)
            .map(|i| {
                let counter = Arc::new(AtomicUsize::new(0));
                let c = counter.clone();
                list.push(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    i
                });
                counter
            })
            .collect()
    }

    #[test]
    fn test_elements_compute_lazily_once() {
        let mut list = LazyList::new();
        let counters = counting_list(&mut list, 3);
        assert_eq!(list.materialized_count(), 0);

        assert_eq!(*list.get(1).unwrap(), 1);
        assert_eq!(*list.get(1).unwrap(), 1);
        assert_eq!(counters[1].load(Ordering::SeqCst), 1);
        assert_eq!(counters[0].load(Ordering::SeqCst), 0);
        assert_eq!(list.materialized_count(), 1);
    }

    #[test]
    fn test_working_set_keeps_most_recent() {
        let mut list = LazyList::with_working_set(10, 5).unwrap();
        counting_list(&mut list, 10);
        for i in 0..10 {
            assert_eq!(*list.get(i).unwrap(), i);
        }

        for i in 0..5 {
            assert!(!list.slot(i).unwrap().has_run(), "element {} is still materialized", i);
        }
        for i in 5..10 {
            assert!(list.slot(i).unwrap().has_run(), "element {} was released", i);
        }
        assert_eq!(list.materialized_count(), 5);
    }

    #[test]
    fn test_working_set_larger_than_list_caches_everything() {
        let mut list = LazyList::with_working_set(10, 20).unwrap();
        let counters = counting_list(&mut list, 10);
        for _ in 0..2 {
            for i in 0..10 {
                list.get(i).unwrap();
            }
        }
        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
        assert_eq!(list.materialized_count(), 10);
    }

    #[test]
    fn test_unlimited_working_set() {
        let mut list = LazyList::with_working_set(0, usize::MAX).unwrap();
        let counters = counting_list(&mut list, 10);
        for i in 0..10 {
            list.get(i).unwrap();
        }
        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
        assert_eq!(list.materialized_count(), 10);
    }

    #[test]
    fn test_insert_in_middle_releases_oldest() {
        let mut list = LazyList::with_working_set(10, 10).unwrap();
        counting_list(&mut list, 10);
        for i in 0..10 {
            list.get(i).unwrap();
        }

        list.insert(4, || 100).unwrap();
        assert_eq!(list.len(), 11);
        assert!(!list.slot(4).unwrap().has_run());
        assert_eq!(*list.get(4).unwrap(), 100);

        assert!(!list.slot(0).unwrap().has_run());
        for i in 1..11 {
            assert!(list.slot(i).unwrap().has_run());
        }
    }

    #[test]
    fn test_removed_element_leaves_group_and_working_set() {
        let mut list = LazyList::with_working_set(3, 2).unwrap();
        counting_list(&mut list, 3);
        list.get(0).unwrap();
        list.get(1).unwrap();

        let removed = list.remove_slot(0).unwrap();
        assert_eq!(list.len(), 2);
        // The tracker now only holds the old element 1, so computing the old element 2 evicts nothing.
        list.get(1).unwrap();
        assert!(list.slot(0).unwrap().has_run());
        assert!(list.slot(1).unwrap().has_run());

        list.reset_cache();
        assert!(removed.has_run());
        assert_eq!(list.materialized_count(), 0);
    }

    #[test]
    fn test_remove_computes_value() {
        let mut list = LazyList::new();
        let counters = counting_list(&mut list, 2);
        assert_eq!(*list.remove(1).unwrap(), 1);
        assert_eq!(counters[1].load(Ordering::SeqCst), 1);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_set_returns_old_value() {
        let mut list = LazyList::new();
        counting_list(&mut list, 2);
        assert_eq!(*list.set(0, 50).unwrap(), 0);
        assert_eq!(*list.get(0).unwrap(), 50);

        // Values survive resets.
        list.reset_cache();
        assert!(list.slot(0).unwrap().has_run());
        assert!(!list.slot(1).unwrap().has_run());
    }

    #[test]
    fn test_values_and_computations_mix() {
        let mut list = LazyList::<u32>::new();
        list.push_value(1);
        list.push(|| 3);
        list.insert_value(1, 2).unwrap();
        let all = list.iter().map(|x| *x.unwrap()).collect::<Vec<_>>();
        assert_eq!(all, vec![1, 2, 3]);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut list = LazyList::new();
        counting_list(&mut list, 3);
        assert_eq!(
            list.get(3).unwrap_err(),
            LazyError::IndexOutOfBounds { index: 3, len: 3 }
        );
        assert_eq!(
            list.insert(5, || 0).unwrap_err(),
            LazyError::IndexOutOfBounds { index: 5, len: 3 }
        );
        assert!(list.set(3, 0).is_err());
        assert!(list.remove(3).is_err());
        assert!(list.remove_slot(3).is_none());
        assert_eq!(list.len(), 3);

        list.insert(3, || 3).unwrap();
        assert_eq!(*list.get(3).unwrap(), 3);
    }

    #[test]
    fn test_failed_element_retries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let mut list = LazyList::<u32, String>::new();
        list.try_push(move || {
            if a.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("boom".to_string())
            } else {
                Ok(7)
            }
        });

        assert_eq!(
            list.get(0).unwrap_err(),
            LazyError::Computation("boom".to_string())
        );
        assert_eq!(*list.get(0).unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_reads() {
        let mut list = LazyList::new();
        let counters = counting_list(&mut list, 8);
        let list = Arc::new(list);

        let handles = (0..4)
            .map(|_| {
                let list = list.clone();
                std::thread::spawn(move || {
                    for i in 0..8 {
                        assert_eq!(*list.get(i).unwrap(), i);
                    }
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            h.join().unwrap();
        }

        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }
}
