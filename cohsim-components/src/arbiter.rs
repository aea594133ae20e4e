// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! Round-robin arbitration across requester interfaces.
//!
//! The arbiter scans its requesters starting from one past the previous
//! winner. A requester participates when it has work (`has_req`) and is not
//! blocked by some protocol condition. When every requester has work but
//! all are blocked the tournament reports a deadlock, which callers treat
//! as a fatal diagnostic.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use cohsim_engine::event::{Event, EventOr};
use cohsim_engine::kernel::Kernel;
use cohsim_engine::types::SimResult;
use cohsim_track::entity::Entity;
use cohsim_track::trace;

/// Interface exposed by agents that request arbitration.
pub trait Requester {
    /// The requester has pending work.
    fn has_req(&self) -> bool;

    /// The requester is blocked by some protocol condition.
    fn blocked(&self) -> bool;

    /// Event notified on the transition to the non-empty state.
    fn non_empty_event(&self) -> &Event;
}

/// The result of a single arbitration round.
pub struct Tournament<T> {
    winner: Option<(usize, Rc<T>)>,
    deadlock: bool,
}

impl<T> Tournament<T> {
    /// The winning requester interface, if any.
    #[must_use]
    pub fn winner(&self) -> Option<(usize, &Rc<T>)> {
        self.winner.as_ref().map(|(i, t)| (*i, t))
    }

    /// True when every requester has work but all are blocked.
    #[must_use]
    pub fn deadlock(&self) -> bool {
        self.deadlock
    }
}

/// Round-robin arbiter over a set of [`Requester`]s.
pub struct Arbiter<T: Requester> {
    /// Entity for diagnostics.
    pub entity: Arc<Entity>,

    /// Current arbitration index: the next scan starts here.
    idx: Cell<usize>,

    ts: RefCell<Vec<Rc<T>>>,

    /// Notified when any requester transitions to having work.
    request_arrival_event: EventOr,
}

impl<T: Requester> Arbiter<T> {
    /// Create an empty arbiter.
    #[must_use]
    pub fn new(kernel: &Kernel, parent: &Arc<Entity>, name: &str) -> Self {
        Self {
            entity: Arc::new(Entity::new(parent, name)),
            idx: Cell::new(0),
            ts: RefCell::new(Vec::new()),
            request_arrival_event: EventOr::new(kernel),
        }
    }

    /// Add a requester (Build-/Elaboration-Phases only).
    pub fn add_requester(&self, t: Rc<T>) {
        self.ts.borrow_mut().push(t);
    }

    /// The number of requesting agents.
    #[must_use]
    pub fn n(&self) -> usize {
        self.ts.borrow().len()
    }

    /// The requester at index `i`.
    #[must_use]
    pub fn requester(&self, i: usize) -> Rc<T> {
        self.ts.borrow()[i].clone()
    }

    /// Event denoting the arrival of work at any requester.
    #[must_use]
    pub fn request_arrival_event(&self) -> &Event {
        self.request_arrival_event.event()
    }

    /// Construct the arrival EventOr (Elaboration-Phase only).
    pub fn elab(&self) -> SimResult {
        for t in self.ts.borrow().iter() {
            self.request_arrival_event.add_child_event(t.non_empty_event());
        }
        self.request_arrival_event.finalize()
    }

    /// Initiate an arbitration tournament.
    ///
    /// The winner is the first non-blocked requester with work, scanning
    /// round-robin from one past the previous winner. Ties at the same
    /// index are impossible by construction; ties in time are broken by the
    /// kernel's insertion order.
    pub fn tournament(&self) -> Tournament<T> {
        let ts = self.ts.borrow();
        let n = ts.len();
        let mut requesters = 0;
        for i in 0..n {
            let idx = (self.idx.get() + i) % n;
            let cur = &ts[idx];
            if !cur.has_req() {
                continue;
            }
            requesters += 1;
            if !cur.blocked() {
                trace!(self.entity ; "grant {}", idx);
                return Tournament {
                    winner: Some((idx, cur.clone())),
                    deadlock: false,
                };
            }
        }
        // A deadlock has occurred iff there are pending work items in the
        // requester queues, but all of them are currently blocked awaiting
        // the completion of some other action.
        Tournament {
            winner: None,
            deadlock: requesters == n && n != 0,
        }
    }

    /// Advance arbitration state past the winning index.
    pub fn advance(&self, winner_idx: usize) {
        self.idx.set((winner_idx + 1) % self.n());
    }
}

#[cfg(test)]
mod tests {
    use cohsim_engine::test_helpers::start_test;

    use super::*;

    struct FakeRequester {
        req: Cell<bool>,
        blocked: Cell<bool>,
        non_empty: Event,
    }

    impl FakeRequester {
        fn new(kernel: &Kernel, req: bool, blocked: bool) -> Rc<Self> {
            Rc::new(Self {
                req: Cell::new(req),
                blocked: Cell::new(blocked),
                non_empty: Event::new(kernel),
            })
        }
    }

    impl Requester for FakeRequester {
        fn has_req(&self) -> bool {
            self.req.get()
        }
        fn blocked(&self) -> bool {
            self.blocked.get()
        }
        fn non_empty_event(&self) -> &Event {
            &self.non_empty
        }
    }

    fn build(kernel: &Kernel, spec: &[(bool, bool)]) -> Arbiter<FakeRequester> {
        let arb = Arbiter::new(kernel, kernel.top(), "arb");
        for (req, blocked) in spec {
            arb.add_requester(FakeRequester::new(kernel, *req, *blocked));
        }
        arb.elab().unwrap();
        arb
    }

    #[test]
    fn round_robin_rotation() {
        let kernel = start_test();
        let arb = build(&kernel, &[(true, false), (true, false), (true, false)]);

        for expected in [0, 1, 2, 0, 1] {
            let t = arb.tournament();
            let (idx, _) = t.winner().unwrap();
            assert_eq!(idx, expected);
            arb.advance(idx);
        }
    }

    #[test]
    fn skips_blocked_and_idle() {
        let kernel = start_test();
        let arb = build(&kernel, &[(true, true), (false, false), (true, false)]);

        let t = arb.tournament();
        let (idx, _) = t.winner().unwrap();
        assert_eq!(idx, 2);
        assert!(!t.deadlock());
    }

    #[test]
    fn all_blocked_is_deadlock() {
        let kernel = start_test();
        let arb = build(&kernel, &[(true, true), (true, true)]);

        let t = arb.tournament();
        assert!(t.winner().is_none());
        assert!(t.deadlock());
    }

    #[test]
    fn idle_is_not_deadlock() {
        let kernel = start_test();
        let arb = build(&kernel, &[(false, false), (true, true)]);

        let t = arb.tournament();
        assert!(t.winner().is_none());
        assert!(!t.deadlock());
    }
}
