// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! The main-memory controller.
//!
//! A fixed-latency fill/writeback endpoint: each registered origin gets
//! its own ingress queue, a round-robin arbiter selects one command per
//! epoch and the matching `MemRsp` is returned over the NOC.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use cohsim_components::arbiter::Arbiter;
use cohsim_engine::kernel::Kernel;
use cohsim_engine::process::{Process, ProcessCtrl};
use cohsim_engine::sim_error;
use cohsim_engine::types::SimResult;
use cohsim_track::entity::Entity;
use cohsim_track::trace;

use crate::cfgs::MemModelConfig;
use crate::mq::MessageQueue;
use crate::msg::{MemCmdOpcode, MemRspOpcode, Message, Payload};
use crate::noc::NocPort;
use crate::types::AgentId;

/// Fixed-latency memory endpoint.
pub struct MemAgent {
    entity: Arc<Entity>,
    id: AgentId,
    config: MemModelConfig,

    /// Per-origin command queues (memory owned).
    rdis_mqs: RefCell<Vec<(AgentId, Rc<MessageQueue>)>>,
    rdis_arb: Arbiter<MessageQueue>,

    noc_port: RefCell<Option<Rc<NocPort>>>,
    kernel: Kernel,
}

impl MemAgent {
    /// Construct the agent and register its dispatcher process.
    pub fn new_and_register(
        kernel: &Kernel,
        parent: &Arc<Entity>,
        id: AgentId,
        config: &MemModelConfig,
    ) -> Rc<Self> {
        let entity = Arc::new(Entity::new(parent, config.name.as_str()));
        let rdis_arb = Arbiter::new(kernel, &entity, "arb");
        let mem = Rc::new(Self {
            entity,
            id,
            config: config.clone(),
            rdis_mqs: RefCell::new(Vec::new()),
            rdis_arb,
            noc_port: RefCell::new(None),
            kernel: kernel.clone(),
        });
        let rdis_entity = Arc::new(Entity::new(&mem.entity, "rdis"));
        kernel.add_process(
            &rdis_entity,
            config.epoch,
            Rc::new(RefCell::new(RdisProcess { mem: mem.clone() })),
        );
        mem
    }

    /// The agent handle.
    #[must_use]
    pub fn id(&self) -> AgentId {
        self.id
    }

    /// The agent entity.
    #[must_use]
    pub fn entity(&self) -> &Arc<Entity> {
        &self.entity
    }

    /// Create the ingress queue for commands from `agent`
    /// (Build-Phase only).
    pub fn register_agent(&self, agent: AgentId) -> Rc<MessageQueue> {
        let name = format!("{agent}_mq");
        let mq = MessageQueue::new(
            &self.kernel,
            &self.entity,
            name.as_str(),
            self.config.cmd_queue_n,
        );
        self.rdis_mqs.borrow_mut().push((agent, mq.clone()));
        self.rdis_arb.add_requester(mq.clone());
        mq
    }

    /// The registered per-origin queues, for endpoint routing.
    #[must_use]
    pub fn rdis_mqs(&self) -> Vec<(AgentId, Rc<MessageQueue>)> {
        self.rdis_mqs.borrow().clone()
    }

    /// Bind the NOC port (Elaboration-Phase only).
    pub fn set_noc_port(&self, port: Rc<NocPort>) {
        *self.noc_port.borrow_mut() = Some(port);
    }

    /// Elaboration phase.
    pub fn elab(&self) -> SimResult {
        self.rdis_arb.elab()
    }

    /// Design-rule check.
    pub fn drc(&self) -> SimResult {
        if self.noc_port.borrow().is_none() {
            sim_error!("{}: NOC port has not been bound", self.entity);
        }
        Ok(())
    }
}

struct RdisProcess {
    mem: Rc<MemAgent>,
}

impl Process for RdisProcess {
    fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        pc.wait_on(self.mem.rdis_arb.request_arrival_event());
        Ok(())
    }

    fn eval(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        let mem = &self.mem;
        let t = mem.rdis_arb.tournament();
        let Some((idx, mq)) = t.winner() else {
            pc.wait_on(mem.rdis_arb.request_arrival_event());
            return Ok(());
        };
        let mq = mq.clone();
        let msg = mq.peek().unwrap();

        // Check NOC port credits before accepting the command.
        let port = mem.noc_port.borrow().as_ref().unwrap().clone();
        if port.ingress_cc().empty() {
            pc.wait_on(port.ingress_cc().credit_event());
            return Ok(());
        }

        let Payload::MemCmd { opcode } = &msg.payload else {
            sim_error!("{}: invalid message class received: {}", mem.entity, msg);
        };
        let rsp_opcode = match opcode {
            MemCmdOpcode::Read => MemRspOpcode::ReadOkay,
            MemCmdOpcode::Write => MemRspOpcode::WriteOkay,
        };
        trace!(mem.entity ; "execute {}", msg);

        let msg = mq.dequeue().unwrap();
        mem.rdis_arb.advance(idx);
        port.ingress_cc().debit()?;
        port.ingress().enqueue(
            Message::new(msg.t, mem.id, Payload::MemRsp { opcode: rsp_opcode })
                .into_noc(msg.origin),
        )?;

        if mem.rdis_arb.tournament().winner().is_some() {
            pc.wait_epoch();
        } else {
            pc.wait_on(mem.rdis_arb.request_arrival_event());
        }
        Ok(())
    }
}
