// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! Monitor hooks and statistics.
//!
//! The core emits an event per significant state change; sinks are
//! external. [`SocStatistics`] is the built-in counting sink registered
//! when statistics are enabled in the configuration.

use std::cell::Cell;
use std::rc::Rc;

use crate::types::{Addr, AgentId, TransactionId};

/// Significant L1 cache state changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum L1CacheEvent {
    /// L1 cache installs a line in a shareable state.
    InstallShareable,
    /// L1 cache installs a line in a writeable state.
    InstallWriteable,
    /// L1 cache experiences a read hit.
    LoadHit,
    /// L1 cache experiences a read miss.
    LoadMiss,
    /// L1 cache experiences a write hit.
    StoreHit,
    /// L1 cache experiences a write miss.
    StoreMiss,
    /// Line is invalidated.
    InvalidateLine,
}

/// Receiver of model events. All hooks default to no-ops so sinks
/// implement only what they observe.
pub trait Monitor {
    /// An L1 cache event for the line at `addr`.
    fn cache_event(&self, _l1: AgentId, _event: L1CacheEvent, _addr: Addr) {}

    /// A CPU started a transaction.
    fn transaction_start(&self, _cpu: AgentId, _t: TransactionId, _time: u64) {}

    /// A CPU retired a transaction.
    fn transaction_end(&self, _cpu: AgentId, _t: TransactionId, _time: u64) {}
}

/// Counting statistics sink.
#[derive(Default)]
pub struct SocStatistics {
    load_hit_n: Cell<u64>,
    load_miss_n: Cell<u64>,
    store_hit_n: Cell<u64>,
    store_miss_n: Cell<u64>,
    invalidate_n: Cell<u64>,
    start_n: Cell<u64>,
    end_n: Cell<u64>,
}

impl SocStatistics {
    /// Create a shared statistics sink.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Total load hits observed.
    #[must_use]
    pub fn load_hit_n(&self) -> u64 {
        self.load_hit_n.get()
    }

    /// Total load misses observed.
    #[must_use]
    pub fn load_miss_n(&self) -> u64 {
        self.load_miss_n.get()
    }

    /// Total store hits observed.
    #[must_use]
    pub fn store_hit_n(&self) -> u64 {
        self.store_hit_n.get()
    }

    /// Total store misses observed.
    #[must_use]
    pub fn store_miss_n(&self) -> u64 {
        self.store_miss_n.get()
    }

    /// Total line invalidations observed.
    #[must_use]
    pub fn invalidate_n(&self) -> u64 {
        self.invalidate_n.get()
    }

    /// Total transactions started.
    #[must_use]
    pub fn transaction_start_n(&self) -> u64 {
        self.start_n.get()
    }

    /// Total transactions retired.
    #[must_use]
    pub fn transaction_end_n(&self) -> u64 {
        self.end_n.get()
    }
}

impl Monitor for SocStatistics {
    fn cache_event(&self, _l1: AgentId, event: L1CacheEvent, _addr: Addr) {
        let counter = match event {
            L1CacheEvent::LoadHit => &self.load_hit_n,
            L1CacheEvent::LoadMiss => &self.load_miss_n,
            L1CacheEvent::StoreHit => &self.store_hit_n,
            L1CacheEvent::StoreMiss => &self.store_miss_n,
            L1CacheEvent::InvalidateLine => &self.invalidate_n,
            L1CacheEvent::InstallShareable | L1CacheEvent::InstallWriteable => return,
        };
        counter.set(counter.get() + 1);
    }

    fn transaction_start(&self, _cpu: AgentId, _t: TransactionId, _time: u64) {
        self.start_n.set(self.start_n.get() + 1);
    }

    fn transaction_end(&self, _cpu: AgentId, _t: TransactionId, _time: u64) {
        self.end_n.set(self.end_n.get() + 1);
    }
}
