// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! A bounded queue with occupancy events.
//!
//! The queue models a hardware FIFO: capacity is fixed at construction and
//! an enqueue onto a full queue is an error (a protocol or sizing bug, never
//! silently dropped). Events fire on enqueue, dequeue, and on the
//! empty-to-non-empty and full-to-non-full edges.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use cohsim_engine::event::Event;
use cohsim_engine::kernel::Kernel;
use cohsim_engine::sim_error;
use cohsim_engine::types::SimResult;
use cohsim_track::entity::Entity;

/// Bounded FIFO with occupancy events.
pub struct Queue<T> {
    /// Entity for diagnostics.
    pub entity: Arc<Entity>,

    capacity: usize,
    ts: RefCell<VecDeque<T>>,

    enqueue_event: Event,
    dequeue_event: Event,
    non_empty_event: Event,
    non_full_event: Event,
}

impl<T> Queue<T> {
    /// Create a queue with the given capacity.
    ///
    /// **Panics** if `capacity` is 0.
    #[must_use]
    pub fn new(kernel: &Kernel, parent: &Arc<Entity>, name: &str, capacity: usize) -> Self {
        assert_ne!(capacity, 0, "Unsupported Queue with 0 capacity");
        Self {
            entity: Arc::new(Entity::new(parent, name)),
            capacity,
            ts: RefCell::new(VecDeque::with_capacity(capacity)),
            enqueue_event: Event::new(kernel),
            dequeue_event: Event::new(kernel),
            non_empty_event: Event::new(kernel),
            non_full_event: Event::new(kernel),
        }
    }

    /// The capacity of the queue.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The occupancy of the queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ts.borrow().len()
    }

    /// The number of free entries in the queue.
    #[must_use]
    pub fn free(&self) -> usize {
        self.capacity - self.len()
    }

    /// Flag denoting full status of the queue.
    #[must_use]
    pub fn full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Flag denoting empty status of the queue.
    #[must_use]
    pub fn empty(&self) -> bool {
        self.ts.borrow().is_empty()
    }

    /// Event notified on the enqueue of an entry into the queue.
    #[must_use]
    pub fn enqueue_event(&self) -> &Event {
        &self.enqueue_event
    }

    /// Event notified on the dequeue of an entry from the queue.
    #[must_use]
    pub fn dequeue_event(&self) -> &Event {
        &self.dequeue_event
    }

    /// Event notified on the transition to the non-empty state.
    #[must_use]
    pub fn non_empty_event(&self) -> &Event {
        &self.non_empty_event
    }

    /// Event notified on the transition out of the full state.
    #[must_use]
    pub fn non_full_event(&self) -> &Event {
        &self.non_full_event
    }

    /// Enqueue an entry. Failure indicates a protocol or sizing bug: the
    /// producer must have checked for space beforehand.
    pub fn enqueue(&self, t: T) -> SimResult {
        if self.full() {
            sim_error!("{}: enqueue on full queue", self.entity);
        }
        let was_empty = self.empty();
        self.ts.borrow_mut().push_back(t);
        if was_empty {
            self.non_empty_event.notify();
        }
        self.enqueue_event.notify();
        Ok(())
    }

    /// True when any queued entry satisfies the predicate.
    #[must_use]
    pub fn any(&self, pred: impl Fn(&T) -> bool) -> bool {
        self.ts.borrow().iter().any(pred)
    }

    /// Dequeue the head entry, if any.
    pub fn dequeue(&self) -> Option<T> {
        let was_full = self.full();
        let t = self.ts.borrow_mut().pop_front();
        if t.is_some() {
            if was_full {
                self.non_full_event.notify();
            }
            self.dequeue_event.notify();
        }
        t
    }
}

impl<T: Clone> Queue<T> {
    /// A copy of the head entry, if any, without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        self.ts.borrow().front().cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use cohsim_engine::test_helpers::start_test;

    use super::*;

    #[test]
    fn fifo_order() {
        let kernel = start_test();
        let q = Queue::new(&kernel, kernel.top(), "q", 3);
        q.enqueue(1).unwrap();
        q.enqueue(2).unwrap();
        q.enqueue(3).unwrap();
        assert!(q.full());
        assert_eq!(q.peek(), Some(1));
        assert_eq!(q.dequeue(), Some(1));
        assert_eq!(q.dequeue(), Some(2));
        assert_eq!(q.dequeue(), Some(3));
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn enqueue_on_full_is_error() {
        let kernel = start_test();
        let q = Queue::new(&kernel, kernel.top(), "q", 1);
        q.enqueue(1).unwrap();
        assert!(q.enqueue(2).is_err());
    }

    #[test]
    fn edge_events_wake_consumer() {
        use std::cell::RefCell;

        use cohsim_engine::process::{Process, ProcessCtrl};

        // Producer enqueues a pair of values at t=10 and a further value at
        // t=20; the consumer waits on the non-empty edge and drains.
        struct Producer {
            q: Rc<Queue<u32>>,
            step: u32,
        }
        impl Process for Producer {
            fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
                pc.wait_for(10);
                Ok(())
            }
            fn eval(&mut self, pc: &mut ProcessCtrl) -> SimResult {
                if self.step == 0 {
                    self.q.enqueue(1)?;
                    self.q.enqueue(2)?;
                    self.step = 1;
                    pc.wait_for(10);
                } else {
                    self.q.enqueue(3)?;
                }
                Ok(())
            }
        }

        struct Consumer {
            q: Rc<Queue<u32>>,
            seen: Rc<RefCell<Vec<u32>>>,
        }
        impl Process for Consumer {
            fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
                pc.wait_on(self.q.non_empty_event());
                Ok(())
            }
            fn eval(&mut self, pc: &mut ProcessCtrl) -> SimResult {
                while let Some(v) = self.q.dequeue() {
                    self.seen.borrow_mut().push(v);
                }
                pc.wait_on(self.q.non_empty_event());
                Ok(())
            }
        }

        let kernel = start_test();
        let q = Rc::new(Queue::new(&kernel, kernel.top(), "q", 2));
        let seen = Rc::new(RefCell::new(Vec::new()));

        let pe = Arc::new(Entity::new(kernel.top(), "producer"));
        kernel.add_process(
            &pe,
            10,
            Rc::new(RefCell::new(Producer {
                q: q.clone(),
                step: 0,
            })),
        );
        let ce = Arc::new(Entity::new(kernel.top(), "consumer"));
        kernel.add_process(
            &ce,
            10,
            Rc::new(RefCell::new(Consumer {
                q: q.clone(),
                seen: seen.clone(),
            })),
        );

        kernel.init().unwrap();
        kernel.run().unwrap();
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
        assert!(q.empty());
    }
}
