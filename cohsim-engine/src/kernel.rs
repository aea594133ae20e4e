// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! The discrete-event kernel.
//!
//! The kernel owns the set of registered processes and a calendar of
//! pending wakeups ordered by [`SimTime`]. [`run`](Kernel::run) dispatches
//! one process `eval` per calendar entry until the calendar drains or a
//! process reports a fatal error.

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::sync::Arc;

use cohsim_track::entity::{Entity, toplevel};
use cohsim_track::{Tracker, set_time, trace};

use crate::process::{Process, ProcessCtrl};
use crate::time::SimTime;
use crate::types::SimResult;

/// Identifies a process registered with a [`Kernel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessId(pub(crate) usize);

/// A calendar entry: wake process `pid` at time `at`.
///
/// Entries at the same time are dispatched in insertion order, which the
/// `seq` field enforces.
#[derive(PartialEq, Eq)]
struct CalEntry {
    at: SimTime,
    seq: u64,
    pid: ProcessId,
}

impl Ord for CalEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

impl PartialOrd for CalEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct ProcessSlot {
    name: String,
    epoch: u64,
    process: Rc<RefCell<dyn Process>>,
}

pub(crate) struct KernelState {
    time: Cell<SimTime>,
    seq: Cell<u64>,
    calendar: RefCell<BinaryHeap<Reverse<CalEntry>>>,
    processes: RefCell<Vec<ProcessSlot>>,
}

/// Single-threaded discrete-event kernel.
///
/// This is a thin wrapper (using [`Rc`]) around the kernel state, so that
/// this struct can be cloned and passed around.
#[derive(Clone)]
pub struct Kernel {
    toplevel: Arc<Entity>,
    entity: Arc<Entity>,
    tracker: Tracker,
    state: Rc<KernelState>,
}

impl Kernel {
    /// Create a standalone kernel.
    pub fn new(tracker: &Tracker) -> Self {
        let toplevel = toplevel(tracker, "top");
        let entity = Arc::new(Entity::new(&toplevel, "kernel"));
        Self {
            toplevel,
            entity,
            tracker: tracker.clone(),
            state: Rc::new(KernelState {
                time: Cell::new(SimTime::ZERO),
                seq: Cell::new(0),
                calendar: RefCell::new(BinaryHeap::new()),
                processes: RefCell::new(Vec::new()),
            }),
        }
    }

    /// The top-level entity of the simulation hierarchy.
    pub fn top(&self) -> &Arc<Entity> {
        &self.toplevel
    }

    /// The shared tracker.
    pub fn tracker(&self) -> Tracker {
        self.tracker.clone()
    }

    /// The current simulation time.
    #[must_use]
    pub fn time(&self) -> SimTime {
        self.state.time.get()
    }

    /// Register a process (Build-Phase only).
    ///
    /// `epoch` is the process's atomic unit of work cost in ticks, used by
    /// [`wait_epoch`](crate::process::ProcessCtrl::wait_epoch).
    pub fn add_process(
        &self,
        entity: &Arc<Entity>,
        epoch: u64,
        process: Rc<RefCell<dyn Process>>,
    ) -> ProcessId {
        let mut processes = self.state.processes.borrow_mut();
        let pid = ProcessId(processes.len());
        processes.push(ProcessSlot {
            name: entity.path().to_owned(),
            epoch,
            process,
        });
        pid
    }

    /// The registered name of a process, for diagnostics.
    #[must_use]
    pub fn process_name(&self, pid: ProcessId) -> String {
        self.state.processes.borrow()[pid.0].name.clone()
    }

    pub(crate) fn schedule(&self, pid: ProcessId, at: SimTime) {
        debug_assert!(at > self.time(), "wakeup scheduled in the past");
        let seq = self.state.seq.get();
        self.state.seq.set(seq + 1);
        self.state
            .calendar
            .borrow_mut()
            .push(Reverse(CalEntry { at, seq, pid }));
    }

    /// Call `init` on every registered process.
    pub fn init(&self) -> SimResult {
        let n = self.state.processes.borrow().len();
        for i in 0..n {
            let (epoch, process) = {
                let processes = self.state.processes.borrow();
                (processes[i].epoch, processes[i].process.clone())
            };
            let mut pc = ProcessCtrl::new(self, ProcessId(i), epoch);
            process.borrow_mut().init(&mut pc)?;
        }
        Ok(())
    }

    /// Run the simulation until no process can make progress and no future
    /// event is scheduled.
    pub fn run(&self) -> SimResult {
        loop {
            let entry = self.state.calendar.borrow_mut().pop();
            let Some(Reverse(entry)) = entry else {
                break;
            };

            let now = self.time();
            debug_assert!(entry.at >= now, "time moving backwards");
            if entry.at.time() != now.time() {
                set_time!(self.entity ; entry.at.time());
            }
            self.state.time.set(entry.at);

            let (epoch, process) = {
                let processes = self.state.processes.borrow();
                let slot = &processes[entry.pid.0];
                (slot.epoch, slot.process.clone())
            };
            trace!(self.entity ; "dispatch {} @ {}", self.process_name(entry.pid), entry.at);

            let mut pc = ProcessCtrl::new(self, entry.pid, epoch);
            process.borrow_mut().eval(&mut pc)?;
        }
        Ok(())
    }

    /// Call `fini` on every registered process.
    pub fn fini(&self) {
        let n = self.state.processes.borrow().len();
        for i in 0..n {
            let process = self.state.processes.borrow()[i].process.clone();
            process.borrow_mut().fini();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ticker {
        period: u64,
        remaining: u32,
        fired: Rc<Cell<u32>>,
    }

    impl Process for Ticker {
        fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
            pc.wait_for(self.period);
            Ok(())
        }

        fn eval(&mut self, pc: &mut ProcessCtrl) -> SimResult {
            self.fired.set(self.fired.get() + 1);
            self.remaining -= 1;
            if self.remaining != 0 {
                pc.wait_for(self.period);
            }
            Ok(())
        }
    }

    #[test]
    fn ticker_runs_to_exhaustion() {
        let kernel = crate::test_helpers::start_test();
        let fired = Rc::new(Cell::new(0));
        let entity = Arc::new(Entity::new(kernel.top(), "ticker"));
        kernel.add_process(
            &entity,
            10,
            Rc::new(RefCell::new(Ticker {
                period: 10,
                remaining: 5,
                fired: fired.clone(),
            })),
        );
        kernel.init().unwrap();
        kernel.run().unwrap();
        assert_eq!(fired.get(), 5);
        assert_eq!(kernel.time().time(), 50);
    }

    #[test]
    fn same_tick_fifo_order() {
        struct Recorder {
            id: u32,
            order: Rc<RefCell<Vec<u32>>>,
        }
        impl Process for Recorder {
            fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
                pc.wait_for(5);
                Ok(())
            }
            fn eval(&mut self, _pc: &mut ProcessCtrl) -> SimResult {
                self.order.borrow_mut().push(self.id);
                Ok(())
            }
        }

        let kernel = crate::test_helpers::start_test();
        let order = Rc::new(RefCell::new(Vec::new()));
        for id in 0..4 {
            let entity = Arc::new(Entity::new(kernel.top(), format!("p{id}").as_str()));
            kernel.add_process(
                &entity,
                10,
                Rc::new(RefCell::new(Recorder {
                    id,
                    order: order.clone(),
                })),
            );
        }
        kernel.init().unwrap();
        kernel.run().unwrap();
        assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
    }
}
