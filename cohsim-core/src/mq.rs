// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! Message queues.
//!
//! A [`MessageQueue`] is a bounded queue of [`Message`]s that also exposes
//! the [`Requester`] interface consumed by agent arbiters. A queue can be
//! marked blocked by a protocol condition (typically a prior transaction to
//! the same line); blocked queues are skipped by arbitration until
//! explicitly unblocked.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use cohsim_components::arbiter::Requester;
use cohsim_components::queue::Queue;
use cohsim_engine::event::Event;
use cohsim_engine::kernel::Kernel;
use cohsim_engine::types::SimResult;
use cohsim_track::entity::Entity;

use crate::msg::Message;

/// A bounded queue of messages with a protocol blocked flag.
pub struct MessageQueue {
    q: Queue<Message>,
    blocked: Cell<bool>,
}

impl MessageQueue {
    /// Create a message queue with capacity `n`.
    #[must_use]
    pub fn new(kernel: &Kernel, parent: &Arc<Entity>, name: &str, n: usize) -> Rc<Self> {
        Rc::new(Self {
            q: Queue::new(kernel, parent, name, n),
            blocked: Cell::new(false),
        })
    }

    /// Entity for diagnostics.
    #[must_use]
    pub fn entity(&self) -> &Arc<Entity> {
        &self.q.entity
    }

    /// Enqueue a message; failure is a protocol/sizing bug.
    pub fn enqueue(&self, msg: Message) -> SimResult {
        self.q.enqueue(msg)
    }

    /// Dequeue the head message, if any.
    pub fn dequeue(&self) -> Option<Message> {
        self.q.dequeue()
    }

    /// A copy of the head message, if any.
    #[must_use]
    pub fn peek(&self) -> Option<Message> {
        self.q.peek()
    }

    /// True when any queued message satisfies the predicate.
    #[must_use]
    pub fn any(&self, pred: impl Fn(&Message) -> bool) -> bool {
        self.q.any(pred)
    }

    /// Queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.q.capacity()
    }

    /// Number of free entries.
    #[must_use]
    pub fn free(&self) -> usize {
        self.q.free()
    }

    /// True when no further entries can be enqueued.
    #[must_use]
    pub fn full(&self) -> bool {
        self.q.full()
    }

    /// True when the queue holds no messages.
    #[must_use]
    pub fn empty(&self) -> bool {
        self.q.empty()
    }

    /// Event notified on the transition out of the full state.
    #[must_use]
    pub fn non_full_event(&self) -> &Event {
        self.q.non_full_event()
    }

    /// Set or clear the protocol blocked flag.
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.set(blocked);
    }

    /// Clear the blocked flag. Pending work re-fires the non-empty event
    /// so an arbiter waiting in another process observes the queue again.
    pub fn unblock(&self) {
        self.blocked.set(false);
        if !self.q.empty() {
            self.q.non_empty_event().notify();
        }
    }
}

impl Requester for MessageQueue {
    fn has_req(&self) -> bool {
        !self.q.empty()
    }

    fn blocked(&self) -> bool {
        self.blocked.get()
    }

    fn non_empty_event(&self) -> &Event {
        self.q.non_empty_event()
    }
}

#[cfg(test)]
mod tests {
    use cohsim_engine::test_helpers::start_test;

    use super::*;
    use crate::msg::Payload;
    use crate::types::{AgentId, TransactionId};

    #[test]
    fn blocked_rescinds_request() {
        let kernel = start_test();
        let mq = MessageQueue::new(&kernel, kernel.top(), "mq", 2);
        assert!(!mq.has_req());
        mq.enqueue(Message::new(TransactionId(0), AgentId(0), Payload::Dt))
            .unwrap();
        assert!(mq.has_req());
        assert!(!mq.blocked());
        mq.set_blocked(true);
        assert!(mq.blocked());
        // The request is still present; only arbitration skips it.
        assert!(mq.has_req());
    }
}
