// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! Fundamental types shared across the coherence model.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// A physical address.
pub type Addr = u64;

/// Underlying primitive type denoting all cache line states in the
/// simulation (overloaded where applicable by each coherence protocol).
pub type State = u8;

/// Stable handle of an agent within the SoC.
///
/// Agents are held in an arena owned by the top level; all cross-references
/// use these handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(pub usize);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// Opaque identity of a transaction.
///
/// Created when a request leaves a CPU (or when a directory initiates a
/// recall) and destroyed when the corresponding response retires. It is the
/// key under which each agent on the path installs its per-transaction
/// state record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Mints unique [`TransactionId`]s across the SoC.
#[derive(Default)]
pub struct TransactionFactory {
    next: Cell<u64>,
}

impl TransactionFactory {
    /// Create a shared factory.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self { next: Cell::new(0) })
    }

    /// Allocate the next transaction identity.
    pub fn alloc(&self) -> TransactionId {
        let t = self.next.get();
        self.next.set(t + 1);
        TransactionId(t)
    }
}
