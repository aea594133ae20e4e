// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! A fixed-capacity keyed table.
//!
//! Used for transaction tables. The `non_full` event fires when the
//! occupancy transitions below capacity, which is the signal agents block
//! on when a command list requires a free entry.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use cohsim_engine::event::Event;
use cohsim_engine::kernel::Kernel;
use cohsim_engine::sim_error;
use cohsim_engine::types::SimResult;
use cohsim_track::entity::Entity;

/// Fixed-capacity map with a non-full event.
pub struct Table<K, V> {
    /// Entity for diagnostics.
    pub entity: Arc<Entity>,

    capacity: usize,
    m: RefCell<HashMap<K, V>>,
    non_full_event: Event,
}

impl<K: Eq + Hash + Copy, V> Table<K, V> {
    /// Create a table with the given capacity.
    #[must_use]
    pub fn new(kernel: &Kernel, parent: &Arc<Entity>, name: &str, capacity: usize) -> Self {
        Self {
            entity: Arc::new(Entity::new(parent, name)),
            capacity,
            m: RefCell::new(HashMap::new()),
            non_full_event: Event::new(kernel),
        }
    }

    /// Event notified when the table leaves the full state.
    #[must_use]
    pub fn non_full_event(&self) -> &Event {
        &self.non_full_event
    }

    /// The table capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The current occupancy.
    #[must_use]
    pub fn len(&self) -> usize {
        self.m.borrow().len()
    }

    /// True when the table holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.m.borrow().is_empty()
    }

    /// True when no further entries can be installed.
    #[must_use]
    pub fn full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Flag denoting whether the table has at least `i` free entries.
    #[must_use]
    pub fn has_at_least(&self, i: usize) -> bool {
        self.capacity - self.len() >= i
    }

    /// True when an entry exists for `k`.
    #[must_use]
    pub fn contains(&self, k: K) -> bool {
        self.m.borrow().contains_key(&k)
    }

    /// Install an entry. Installing into a full table is an error: the
    /// resource check must have reserved the entry beforehand.
    pub fn install(&self, k: K, v: V) -> SimResult {
        let mut m = self.m.borrow_mut();
        if m.len() == self.capacity && !m.contains_key(&k) {
            sim_error!("{}: install on full table", self.entity);
        }
        m.insert(k, v);
        Ok(())
    }

    /// Remove the entry for `k`, notifying `non_full` on the full to
    /// non-full transition.
    pub fn remove(&self, k: K) -> Option<V> {
        let was_full = self.full();
        let v = self.m.borrow_mut().remove(&k);
        if v.is_some() && was_full {
            self.non_full_event.notify();
        }
        v
    }

    /// Apply `f` to the entry for `k`.
    pub fn with<R>(&self, k: K, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.m.borrow().get(&k).map(f)
    }

    /// Apply `f` to the mutable entry for `k`.
    pub fn with_mut<R>(&self, k: K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.m.borrow_mut().get_mut(&k).map(f)
    }

    /// Find a key matching the predicate over values.
    pub fn find_key(&self, pred: impl Fn(&V) -> bool) -> Option<K> {
        self.m
            .borrow()
            .iter()
            .find(|(_, v)| pred(v))
            .map(|(k, _)| *k)
    }
}

#[cfg(test)]
mod tests {
    use cohsim_engine::test_helpers::start_test;

    use super::*;

    #[test]
    fn capacity_enforced() {
        let kernel = start_test();
        let t: Table<u64, &str> = Table::new(&kernel, kernel.top(), "tt", 2);
        t.install(1, "a").unwrap();
        t.install(2, "b").unwrap();
        assert!(t.full());
        assert!(t.install(3, "c").is_err());
        // Overwriting an existing key does not need a free entry.
        t.install(2, "b2").unwrap();
        assert_eq!(t.with(2, |v| *v), Some("b2"));
    }

    #[test]
    fn remove_frees_entry() {
        let kernel = start_test();
        let t: Table<u64, u32> = Table::new(&kernel, kernel.top(), "tt", 1);
        t.install(7, 70).unwrap();
        assert!(!t.has_at_least(1));
        assert_eq!(t.remove(7), Some(70));
        assert!(t.has_at_least(1));
        assert!(t.is_empty());
    }
}
