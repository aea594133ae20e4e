// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! Simulation events.
//!
//! An [`Event`] holds the set of processes waiting on it. Notification
//! wakes every waiter on the next delta cycle. An [`EventOr`] is notified
//! when any of its child events fires; children forward their notifications
//! to the parent's waiter set.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::kernel::{Kernel, ProcessId};
use crate::sim_error;
use crate::time::SimTime;
use crate::types::SimResult;

struct EventState {
    kernel: Kernel,
    waiters: RefCell<Vec<ProcessId>>,
    forwards: RefCell<Vec<Event>>,
}

/// A notification point that processes can wait on.
#[derive(Clone)]
pub struct Event {
    state: Rc<EventState>,
}

impl Event {
    /// Create a new event.
    #[must_use]
    pub fn new(kernel: &Kernel) -> Self {
        Self {
            state: Rc::new(EventState {
                kernel: kernel.clone(),
                waiters: RefCell::new(Vec::new()),
                forwards: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Notify the event: every current waiter is woken on the next delta
    /// cycle. The waiter set is consumed; waits are single-shot.
    pub fn notify(&self) {
        let at = self.state.kernel.time().next_delta();
        self.notify_at(at);
    }

    fn notify_at(&self, at: SimTime) {
        let waiters: Vec<ProcessId> = self.state.waiters.borrow_mut().drain(..).collect();
        for pid in waiters {
            self.state.kernel.schedule(pid, at);
        }
        let forwards: Vec<Event> = self.state.forwards.borrow().clone();
        for forward in forwards {
            forward.notify_at(at);
        }
    }

    pub(crate) fn add_waiter(&self, pid: ProcessId) {
        let mut waiters = self.state.waiters.borrow_mut();
        if !waiters.contains(&pid) {
            waiters.push(pid);
        }
    }

    fn add_forward(&self, to: Event) {
        self.state.forwards.borrow_mut().push(to);
    }
}

/// An event that is notified when any one of a set of child events fires.
///
/// Children are added during elaboration; [`finalize`](EventOr::finalize)
/// checks that the set is non-empty.
pub struct EventOr {
    event: Event,
    children_n: Cell<usize>,
}

impl EventOr {
    /// Create a new `EventOr` with no children.
    #[must_use]
    pub fn new(kernel: &Kernel) -> Self {
        Self {
            event: Event::new(kernel),
            children_n: Cell::new(0),
        }
    }

    /// Add a child event (Elaboration-Phase only).
    pub fn add_child_event(&self, child: &Event) {
        child.add_forward(self.event.clone());
        self.children_n.set(self.children_n.get() + 1);
    }

    /// Complete construction; it is an error to finalize with no children.
    pub fn finalize(&self) -> SimResult {
        if self.children_n.get() == 0 {
            sim_error!("EventOr finalized with no child events");
        }
        Ok(())
    }

    /// The underlying event to wait on.
    #[must_use]
    pub fn event(&self) -> &Event {
        &self.event
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cohsim_track::entity::Entity;

    use super::*;
    use crate::process::{Process, ProcessCtrl};
    use crate::test_helpers::start_test;

    struct Waiter {
        event: Event,
        woken: Rc<Cell<u32>>,
    }

    impl Process for Waiter {
        fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
            pc.wait_on(&self.event);
            Ok(())
        }
        fn eval(&mut self, _pc: &mut ProcessCtrl) -> SimResult {
            self.woken.set(self.woken.get() + 1);
            Ok(())
        }
    }

    struct Notifier {
        event: Event,
        at: u64,
    }

    impl Process for Notifier {
        fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
            pc.wait_for(self.at);
            Ok(())
        }
        fn eval(&mut self, _pc: &mut ProcessCtrl) -> SimResult {
            self.event.notify();
            Ok(())
        }
    }

    fn add(kernel: &Kernel, name: &str, p: impl Process + 'static) {
        let entity = Arc::new(Entity::new(kernel.top(), name));
        kernel.add_process(&entity, 10, Rc::new(RefCell::new(p)));
    }

    #[test]
    fn notify_wakes_waiter() {
        let kernel = start_test();
        let event = Event::new(&kernel);
        let woken = Rc::new(Cell::new(0));

        add(
            &kernel,
            "waiter",
            Waiter {
                event: event.clone(),
                woken: woken.clone(),
            },
        );
        add(
            &kernel,
            "notifier",
            Notifier {
                event: event.clone(),
                at: 100,
            },
        );

        kernel.init().unwrap();
        kernel.run().unwrap();
        assert_eq!(woken.get(), 1);
        assert_eq!(kernel.time().time(), 100);
    }

    #[test]
    fn event_or_any_child_fires() {
        let kernel = start_test();
        let a = Event::new(&kernel);
        let b = Event::new(&kernel);
        let any = EventOr::new(&kernel);
        any.add_child_event(&a);
        any.add_child_event(&b);
        any.finalize().unwrap();

        let woken = Rc::new(Cell::new(0));
        add(
            &kernel,
            "waiter",
            Waiter {
                event: any.event().clone(),
                woken: woken.clone(),
            },
        );
        add(&kernel, "notifier", Notifier { event: b, at: 42 });

        kernel.init().unwrap();
        kernel.run().unwrap();
        assert_eq!(woken.get(), 1);
    }

    #[test]
    fn event_or_empty_is_error() {
        let kernel = start_test();
        let any = EventOr::new(&kernel);
        assert!(any.finalize().is_err());
    }
}
