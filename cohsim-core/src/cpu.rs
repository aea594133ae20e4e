// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! The CPU model.
//!
//! A stimulus-driven producer and a response sink. The producer reads the
//! head command from its [`StimulusContext`] and, once simulation time
//! reaches that command's time, starts a new transaction and enqueues a
//! `CpuCmd` on the CPU to L1 queue; issue is throttled by that queue's
//! non-full event. The consumer retires transactions as `CpuRsp` messages
//! arrive.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use cohsim_components::arbiter::Requester;
use cohsim_engine::kernel::Kernel;
use cohsim_engine::process::{Process, ProcessCtrl};
use cohsim_engine::sim_error;
use cohsim_engine::types::SimResult;
use cohsim_track::entity::Entity;
use cohsim_track::trace;

use crate::cfgs::CpuConfig;
use crate::monitor::Monitor;
use crate::mq::MessageQueue;
use crate::msg::{Message, MessageClass, Payload};
use crate::stimulus::StimulusContext;
use crate::types::{AgentId, TransactionFactory, TransactionId};

/// A CPU: stimulus-driven message generator and response sink.
pub struct Cpu {
    entity: Arc<Entity>,
    id: AgentId,

    stimulus: Rc<StimulusContext>,

    /// L1 to CPU response queue (CPU owned).
    l1_cpu__rsp_q: Rc<MessageQueue>,
    /// CPU to L1 command queue (L1 owned, bound at elaboration).
    cpu_l1__cmd_q: RefCell<Option<Rc<MessageQueue>>>,

    /// Outstanding transactions.
    ts: RefCell<HashSet<TransactionId>>,

    tfactory: Rc<TransactionFactory>,
    monitors: RefCell<Vec<Rc<dyn Monitor>>>,
}

impl Cpu {
    /// Construct the CPU and register its producer and consumer processes.
    pub fn new_and_register(
        kernel: &Kernel,
        parent: &Arc<Entity>,
        id: AgentId,
        config: &CpuConfig,
        stimulus: Rc<StimulusContext>,
        tfactory: Rc<TransactionFactory>,
    ) -> Rc<Self> {
        let entity = Arc::new(Entity::new(parent, config.name.as_str()));
        let l1_cpu__rsp_q =
            MessageQueue::new(kernel, &entity, "l1_cpu__rsp_q", config.l1_cpu__rsp_n);
        let cpu = Rc::new(Self {
            entity,
            id,
            stimulus,
            l1_cpu__rsp_q,
            cpu_l1__cmd_q: RefCell::new(None),
            ts: RefCell::new(HashSet::new()),
            tfactory,
            monitors: RefCell::new(Vec::new()),
        });

        let producer_entity = Arc::new(Entity::new(&cpu.entity, "producer"));
        kernel.add_process(
            &producer_entity,
            config.epoch,
            Rc::new(RefCell::new(ProducerProcess { cpu: cpu.clone() })),
        );
        let consumer_entity = Arc::new(Entity::new(&cpu.entity, "consumer"));
        kernel.add_process(
            &consumer_entity,
            config.epoch,
            Rc::new(RefCell::new(ConsumerProcess { cpu: cpu.clone() })),
        );
        cpu
    }

    /// The CPU's agent handle.
    #[must_use]
    pub fn id(&self) -> AgentId {
        self.id
    }

    /// The L1 to CPU response queue (CPU owned).
    #[must_use]
    pub fn l1_cpu__rsp_q(&self) -> Rc<MessageQueue> {
        self.l1_cpu__rsp_q.clone()
    }

    /// Bind the CPU to L1 command queue (Elaboration-Phase only).
    pub fn set_cpu_l1__cmd_q(&self, mq: Rc<MessageQueue>) {
        *self.cpu_l1__cmd_q.borrow_mut() = Some(mq);
    }

    /// Attach a monitor sink.
    pub fn register_monitor(&self, monitor: Rc<dyn Monitor>) {
        self.monitors.borrow_mut().push(monitor);
    }

    /// Design-rule check.
    pub fn drc(&self) -> SimResult {
        if self.cpu_l1__cmd_q.borrow().is_none() {
            sim_error!("{}: CPU to L1 command queue has not been bound", self.entity);
        }
        Ok(())
    }

    /// The number of in-flight transactions; zero at end of simulation.
    #[must_use]
    pub fn outstanding_n(&self) -> usize {
        self.ts.borrow().len()
    }
}

struct ProducerProcess {
    cpu: Rc<Cpu>,
}

impl Process for ProducerProcess {
    fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        if let Some(frontier) = self.cpu.stimulus.front() {
            pc.wait_for(frontier.time);
        }
        Ok(())
    }

    fn eval(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        let cpu = &self.cpu;
        let Some(frontier) = cpu.stimulus.front() else {
            // Stimulus exhausted; the producer goes dormant.
            return Ok(());
        };
        let now = pc.time();
        if frontier.time > now {
            pc.wait_for(frontier.time - now);
            return Ok(());
        }

        let cmd_q = cpu.cpu_l1__cmd_q.borrow().as_ref().unwrap().clone();
        if cmd_q.full() {
            pc.wait_on(cmd_q.non_full_event());
            return Ok(());
        }

        let t = cpu.tfactory.alloc();
        cpu.ts.borrow_mut().insert(t);
        cpu.stimulus.consume();
        cpu.stimulus.note_issue();
        for monitor in cpu.monitors.borrow().iter() {
            monitor.transaction_start(cpu.id, t, now);
        }
        trace!(cpu.entity ; "issue {} {:?} addr {:#x}", t, frontier.cmd.opcode, frontier.cmd.addr);
        cmd_q.enqueue(Message::new(
            t,
            cpu.id,
            Payload::CpuCmd {
                opcode: frontier.cmd.opcode,
                addr: frontier.cmd.addr,
            },
        ))?;

        if let Some(next) = cpu.stimulus.front() {
            if next.time > now {
                pc.wait_for(next.time - now);
            } else {
                pc.wait_epoch();
            }
        }
        Ok(())
    }
}

struct ConsumerProcess {
    cpu: Rc<Cpu>,
}

impl Process for ConsumerProcess {
    fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        pc.wait_on(self.cpu.l1_cpu__rsp_q.non_empty_event());
        Ok(())
    }

    fn eval(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        let cpu = &self.cpu;
        while let Some(msg) = cpu.l1_cpu__rsp_q.dequeue() {
            if msg.cls() != MessageClass::CpuRsp {
                sim_error!("{}: invalid message class received: {}", cpu.entity, msg);
            }
            if !cpu.ts.borrow_mut().remove(&msg.t) {
                sim_error!("{}: response for unknown transaction: {}", cpu.entity, msg);
            }
            cpu.stimulus.note_retire();
            for monitor in cpu.monitors.borrow().iter() {
                monitor.transaction_end(cpu.id, msg.t, pc.time());
            }
            trace!(cpu.entity ; "retire {}", msg.t);
        }
        pc.wait_on(cpu.l1_cpu__rsp_q.non_empty_event());
        Ok(())
    }
}
