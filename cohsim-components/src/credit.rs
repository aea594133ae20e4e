// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! Credit-based flow control counter.
//!
//! A non-negative counter of transfer rights. Producers debit a credit per
//! emission and block on `credit_event` when empty; consumers (or the
//! response messages of the class) return credits.

use std::cell::Cell;
use std::sync::Arc;

use cohsim_engine::event::Event;
use cohsim_engine::kernel::Kernel;
use cohsim_engine::sim_error;
use cohsim_engine::types::SimResult;
use cohsim_track::entity::Entity;
use cohsim_track::trace;

/// A non-negative credit counter.
pub struct CreditCounter {
    /// Entity for diagnostics.
    pub entity: Arc<Entity>,

    capacity: usize,
    i: Cell<usize>,
    credit_event: Event,
}

impl CreditCounter {
    /// Create a counter holding `capacity` credits.
    #[must_use]
    pub fn new(kernel: &Kernel, parent: &Arc<Entity>, name: &str, capacity: usize) -> Self {
        Self {
            entity: Arc::new(Entity::new(parent, name)),
            capacity,
            i: Cell::new(capacity),
            credit_event: Event::new(kernel),
        }
    }

    /// The number of credits the counter was created with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The current credit count.
    #[must_use]
    pub fn i(&self) -> usize {
        self.i.get()
    }

    /// True when no credits remain.
    #[must_use]
    pub fn empty(&self) -> bool {
        self.i.get() == 0
    }

    /// Event notified whenever a credit is returned.
    #[must_use]
    pub fn credit_event(&self) -> &Event {
        &self.credit_event
    }

    /// Consume one credit. The caller must have checked availability.
    pub fn debit(&self) -> SimResult {
        if self.empty() {
            sim_error!("{}: debit on empty credit counter", self.entity);
        }
        self.i.set(self.i.get() - 1);
        trace!(self.entity ; "debit, {} remain", self.i.get());
        Ok(())
    }

    /// Return one credit.
    pub fn credit(&self) -> SimResult {
        if self.i.get() == self.capacity {
            sim_error!("{}: credit above capacity", self.entity);
        }
        self.i.set(self.i.get() + 1);
        trace!(self.entity ; "credit, {} remain", self.i.get());
        self.credit_event.notify();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cohsim_engine::test_helpers::start_test;

    use super::*;

    #[test]
    fn debit_credit_roundtrip() {
        let kernel = start_test();
        let cc = CreditCounter::new(&kernel, kernel.top(), "cc", 2);
        assert_eq!(cc.i(), 2);
        cc.debit().unwrap();
        cc.debit().unwrap();
        assert!(cc.empty());
        assert!(cc.debit().is_err());
        cc.credit().unwrap();
        assert_eq!(cc.i(), 1);
    }

    #[test]
    fn credit_above_capacity_is_error() {
        let kernel = start_test();
        let cc = CreditCounter::new(&kernel, kernel.top(), "cc", 1);
        assert!(cc.credit().is_err());
    }
}
