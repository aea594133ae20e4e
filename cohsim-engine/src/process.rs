// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! The process abstraction.
//!
//! A [`Process`] is a coroutine-style state machine driven by the kernel.
//! All progress happens inside `eval` and terminates at the next wait; the
//! wait predicate is set through the [`ProcessCtrl`] passed to each hook.
//! A process that sets no wait predicate is dormant until some event it
//! previously registered with wakes it.

use crate::event::Event;
use crate::kernel::{Kernel, ProcessId};
use crate::types::SimResult;

/// A stepwise simulation process with three observable hooks.
pub trait Process {
    /// Called once before the simulation runs; typically sets the initial
    /// wait predicate.
    fn init(&mut self, _pc: &mut ProcessCtrl) -> SimResult {
        Ok(())
    }

    /// Called at each wakeup. Any message emission made here is visible to
    /// the consumer's next `eval` via the destination queue's events.
    fn eval(&mut self, pc: &mut ProcessCtrl) -> SimResult;

    /// Called once after the simulation has run to completion.
    fn fini(&mut self) {}
}

/// The kernel-side view handed to a process during `init`/`eval`.
///
/// Exposes the wait predicates and a read-only view of the current time.
pub struct ProcessCtrl<'k> {
    kernel: &'k Kernel,
    pid: ProcessId,
    epoch: u64,
}

impl<'k> ProcessCtrl<'k> {
    pub(crate) fn new(kernel: &'k Kernel, pid: ProcessId, epoch: u64) -> Self {
        Self { kernel, pid, epoch }
    }

    /// Resume when the event fires.
    pub fn wait_on(&mut self, event: &Event) {
        event.add_waiter(self.pid);
    }

    /// Resume at current time + `ticks`.
    pub fn wait_for(&mut self, ticks: u64) {
        let at = self.kernel.time().advance(ticks);
        self.kernel.schedule(self.pid, at);
    }

    /// Resume at current time + the process's configured epoch.
    pub fn wait_epoch(&mut self) {
        self.wait_for(self.epoch);
    }

    /// The current simulation tick.
    #[must_use]
    pub fn time(&self) -> u64 {
        self.kernel.time().time()
    }

    /// The process's configured epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}
