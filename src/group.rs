//! An [InvalidationGroup] collects [Resettable] things so that they can be reset together.
//!
//! Groups hold their members strongly and compare them by identity, so adding the same `Arc` twice keeps one entry.
//! Groups are themselves [Resettable], which is how they nest.  Don't make a group a member of itself, directly or
//! through other groups: resetting it would never finish.
use std::sync::{Arc, Mutex};

use crate::*;

#[derive(Default)]
pub struct InvalidationGroup {
    members: Mutex<Vec<Arc<dyn Resettable>>>,
}

fn identity<R: ?Sized>(x: &Arc<R>) -> *const () {
    Arc::as_ptr(x) as *const ()
}

impl InvalidationGroup {
    pub fn new() -> InvalidationGroup {
        Default::default()
    }

    /// Add a member, returning it so that this can be chained with building it.
    pub fn add<R: Resettable + 'static>(&self, member: Arc<R>) -> Arc<R> {
        let id = identity(&member);
        let mut guard = self.members.lock().unwrap();
        if !guard.iter().any(|x| identity(x) == id) {
            guard.push(member.clone());
        }
        member
    }

    /// Remove a member, returning whether it was present.
    pub fn remove<R: ?Sized>(&self, member: &Arc<R>) -> bool {
        let id = identity(member);
        let mut guard = self.members.lock().unwrap();
        let before = guard.len();
        guard.retain(|x| identity(x) != id);
        guard.len() != before
    }

    pub fn contains<R: ?Sized>(&self, member: &Arc<R>) -> bool {
        let id = identity(member);
        self.members
            .lock()
            .unwrap()
            .iter()
            .any(|x| identity(x) == id)
    }

    pub fn len(&self) -> usize {
        self.members.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reset every member in insertion order, recursing through nested groups.
    ///
    /// The member list is copied first, so the group isn't locked while members reset and members may be added or
    /// removed concurrently.
    pub fn reset_all(&self) {
        let members = self.members.lock().unwrap().clone();
        tracing::debug!(members = members.len(), "resetting invalidation group");
        for m in members {
            m.reset();
        }
    }
}

impl Resettable for InvalidationGroup {
    fn reset(&self) {
        self.reset_all()
    }
}
