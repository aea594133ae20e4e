// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! The last-level cache, co-located with its directory.
//!
//! The LLC is the home node's victim/fill engine. A `Fill` reads the line
//! from memory and forwards the data to the agent named by the command; a
//! `PutLine` serves the data directly; an `Evict` writes the line back to
//! memory. In-flight per-transaction state correlates each `MemRsp` with
//! the triggering `LLCCmd`; a forwarded `Dt` keeps the transaction open
//! until the receiver's `DtRsp` arrives.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use cohsim_components::arbiter::Arbiter;
use cohsim_components::credit::CreditCounter;
use cohsim_components::table::Table;
use cohsim_engine::event::Event;
use cohsim_engine::kernel::Kernel;
use cohsim_engine::process::{Process, ProcessCtrl};
use cohsim_engine::sim_error;
use cohsim_engine::types::SimResult;
use cohsim_track::entity::Entity;
use cohsim_track::trace;

use crate::cfgs::LLCAgentConfig;
use crate::mq::MessageQueue;
use crate::msg::{
    LLCCmdOpcode, LLCRspStatus, MemCmdOpcode, MemRspOpcode, Message, MessageClass, Payload,
};
use crate::noc::NocPort;
use crate::types::{Addr, AgentId, TransactionId};

struct LLCTState {
    opcode: LLCCmdOpcode,
    addr: Addr,
    agent: Option<AgentId>,
    awaiting_dt_rsp: bool,
}

/// Fixed-function fill/put/evict engine of a home node.
pub struct LLCAgent {
    entity: Arc<Entity>,
    id: AgentId,

    /// Directory to LLC command queue (LLC owned).
    dir_llc__cmd_q: Rc<MessageQueue>,
    /// Memory response queue (LLC owned).
    mem_llc__rsp_q: Rc<MessageQueue>,
    /// `DtRsp` ingress queue (LLC owned).
    llc__dtrsp_q: Rc<MessageQueue>,
    arb: Arbiter<MessageQueue>,

    /// LLC to directory response queue (directory owned, bound at
    /// elaboration).
    llc_dir__rsp_q: RefCell<Option<Rc<MessageQueue>>>,
    noc_port: RefCell<Option<Rc<NocPort>>>,
    /// Home memory controller.
    mc: RefCell<Option<AgentId>>,

    tt: Table<TransactionId, LLCTState>,
    ccntrs: RefCell<HashMap<(MessageClass, AgentId), Rc<CreditCounter>>>,
}

impl LLCAgent {
    /// Construct the agent and register its dispatcher process.
    pub fn new_and_register(
        kernel: &Kernel,
        parent: &Arc<Entity>,
        id: AgentId,
        config: &LLCAgentConfig,
    ) -> Rc<Self> {
        let entity = Arc::new(Entity::new(parent, config.name.as_str()));
        let dir_llc__cmd_q = MessageQueue::new(kernel, &entity, "dir_llc__cmd_q", config.cmd_queue_n);
        let mem_llc__rsp_q = MessageQueue::new(kernel, &entity, "mem_llc__rsp_q", config.rsp_queue_n);
        let llc__dtrsp_q = MessageQueue::new(kernel, &entity, "llc__dtrsp_q", config.rsp_queue_n);

        let arb = Arbiter::new(kernel, &entity, "arb");
        arb.add_requester(dir_llc__cmd_q.clone());
        arb.add_requester(mem_llc__rsp_q.clone());
        arb.add_requester(llc__dtrsp_q.clone());

        let tt = Table::new(kernel, &entity, "tt", config.tt_entries_n);

        let llc = Rc::new(Self {
            entity,
            id,
            dir_llc__cmd_q,
            mem_llc__rsp_q,
            llc__dtrsp_q,
            arb,
            llc_dir__rsp_q: RefCell::new(None),
            noc_port: RefCell::new(None),
            mc: RefCell::new(None),
            tt,
            ccntrs: RefCell::new(HashMap::new()),
        });

        let main_entity = Arc::new(Entity::new(&llc.entity, "rdis"));
        kernel.add_process(
            &main_entity,
            config.epoch,
            Rc::new(RefCell::new(RdisProcess { llc: llc.clone() })),
        );
        llc
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

    /// The command queue (LLC owned), for the directory to bind.
    #[must_use]
    pub fn dir_llc__cmd_q(&self) -> Rc<MessageQueue> {
        self.dir_llc__cmd_q.clone()
    }

    /// The memory response queue (LLC owned), for endpoint routing.
    #[must_use]
    pub fn mem_llc__rsp_q(&self) -> Rc<MessageQueue> {
        self.mem_llc__rsp_q.clone()
    }

    /// The `DtRsp` queue (LLC owned), for endpoint routing.
    #[must_use]
    pub fn llc__dtrsp_q(&self) -> Rc<MessageQueue> {
        self.llc__dtrsp_q.clone()
    }

    /// Bind the LLC to directory response queue (Elaboration-Phase only).
    pub fn set_llc_dir__rsp_q(&self, mq: Rc<MessageQueue>) {
        *self.llc_dir__rsp_q.borrow_mut() = Some(mq);
    }

    /// Bind the NOC port (Elaboration-Phase only).
    pub fn set_noc_port(&self, port: Rc<NocPort>) {
        *self.noc_port.borrow_mut() = Some(port);
    }

    /// Set the home memory controller (Elaboration-Phase only).
    pub fn set_mc(&self, mc: AgentId) {
        *self.mc.borrow_mut() = Some(mc);
    }

    /// Register a per-(class, destination) credit counter
    /// (Elaboration-Phase only).
    pub fn register_credit(&self, cls: MessageClass, dest: AgentId, cc: Rc<CreditCounter>) {
        self.ccntrs.borrow_mut().insert((cls, dest), cc);
    }

    /// All registered credit counters, for conservation checks.
    #[must_use]
    pub fn credits(&self) -> Vec<Rc<CreditCounter>> {
        self.ccntrs.borrow().values().cloned().collect()
    }

    /// Elaboration phase.
    pub fn elab(&self) -> SimResult {
        self.arb.elab()
    }

    /// Design-rule check.
    pub fn drc(&self) -> SimResult {
        if self.llc_dir__rsp_q.borrow().is_none() {
            sim_error!("{}: directory response queue has not been bound", self.entity);
        }
        if self.noc_port.borrow().is_none() {
            sim_error!("{}: NOC port has not been bound", self.entity);
        }
        if self.mc.borrow().is_none() {
            sim_error!("{}: home memory controller has not been bound", self.entity);
        }
        Ok(())
    }

    /// Number of in-flight transactions; zero at end of simulation.
    #[must_use]
    pub fn outstanding_n(&self) -> usize {
        self.tt.len()
    }

    fn class_credit(&self, cls: MessageClass, dest: AgentId) -> Option<Rc<CreditCounter>> {
        self.ccntrs.borrow().get(&(cls, dest)).cloned()
    }

    fn emit_to_noc(&self, dest: AgentId, msg: Message) -> SimResult {
        if let Some(cc) = self.class_credit(msg.cls(), dest) {
            cc.debit()?;
        }
        let port = self.noc_port.borrow().as_ref().unwrap().clone();
        port.ingress_cc().debit()?;
        trace!(self.entity ; "emit {} to {}", msg, dest);
        port.ingress().enqueue(msg.into_noc(dest))
    }

    /// Check NOC and per-class credits for pending emissions, and the
    /// directory response queue.
    fn check_resources(
        &self,
        emissions: &[(AgentId, MessageClass)],
        dir_rsp_n: usize,
        tt_entry_n: usize,
    ) -> Result<(), Event> {
        if !self.tt.has_at_least(tt_entry_n) {
            return Err(self.tt.non_full_event().clone());
        }
        if dir_rsp_n > 0 {
            let q = self.llc_dir__rsp_q.borrow().as_ref().unwrap().clone();
            if q.free() < dir_rsp_n {
                return Err(q.non_full_event().clone());
            }
        }
        let port = self.noc_port.borrow().as_ref().unwrap().clone();
        if port.ingress_cc().i() < emissions.len() {
            return Err(port.ingress_cc().credit_event().clone());
        }
        for (dest, cls) in emissions {
            if matches!(cls, MessageClass::Dt | MessageClass::MemCmd) {
                if let Some(cc) = self.class_credit(*cls, *dest) {
                    if cc.empty() {
                        return Err(cc.credit_event().clone());
                    }
                }
            }
        }
        Ok(())
    }

    fn issue_dir_rsp(&self, t: TransactionId, opcode: LLCCmdOpcode) -> SimResult {
        let q = self.llc_dir__rsp_q.borrow().as_ref().unwrap().clone();
        q.enqueue(Message::new(
            t,
            self.id,
            Payload::LLCRsp {
                opcode,
                status: LLCRspStatus::Okay,
            },
        ))
    }
}

struct RdisProcess {
    llc: Rc<LLCAgent>,
}

impl Process for RdisProcess {
    fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        pc.wait_on(self.llc.arb.request_arrival_event());
        Ok(())
    }

    fn eval(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        let llc = &self.llc;
        let t = llc.arb.tournament();
        if t.deadlock() {
            sim_error!("{}: a protocol deadlock has been detected", llc.entity);
        }
        let Some((idx, mq)) = t.winner() else {
            pc.wait_on(llc.arb.request_arrival_event());
            return Ok(());
        };
        let mq = mq.clone();
        let msg = mq.peek().unwrap();

        match &msg.payload {
            Payload::LLCCmd {
                opcode,
                addr,
                agent,
            } => {
                let mc = llc.mc.borrow().unwrap();
                match opcode {
                    LLCCmdOpcode::Fill | LLCCmdOpcode::Evict => {
                        // Fill reads from memory, Evict writes back; the
                        // directory response follows the MemRsp.
                        if let Err(shortage) = llc.check_resources(&[(mc, MessageClass::MemCmd)], 0, 1)
                        {
                            pc.wait_on(&shortage);
                            return Ok(());
                        }
                        llc.tt.install(
                            msg.t,
                            LLCTState {
                                opcode: *opcode,
                                addr: *addr,
                                agent: *agent,
                                awaiting_dt_rsp: false,
                            },
                        )?;
                        let mem_opcode = match opcode {
                            LLCCmdOpcode::Fill => MemCmdOpcode::Read,
                            _ => MemCmdOpcode::Write,
                        };
                        llc.emit_to_noc(
                            mc,
                            Message::new(msg.t, llc.id, Payload::MemCmd { opcode: mem_opcode }),
                        )?;
                    }
                    LLCCmdOpcode::PutLine => {
                        // Serve directly from the resident copy.
                        let Some(agent) = agent else {
                            sim_error!("{}: PutLine without a target agent", llc.entity);
                        };
                        if let Err(shortage) =
                            llc.check_resources(&[(*agent, MessageClass::Dt)], 1, 1)
                        {
                            pc.wait_on(&shortage);
                            return Ok(());
                        }
                        llc.tt.install(
                            msg.t,
                            LLCTState {
                                opcode: *opcode,
                                addr: *addr,
                                agent: Some(*agent),
                                awaiting_dt_rsp: true,
                            },
                        )?;
                        llc.emit_to_noc(*agent, Message::new(msg.t, llc.id, Payload::Dt))?;
                        llc.issue_dir_rsp(msg.t, *opcode)?;
                    }
                }
                mq.dequeue();
                llc.arb.advance(idx);
            }
            Payload::MemRsp { opcode } => {
                let Some((cmd_opcode, agent, addr)) =
                    llc.tt.with(msg.t, |ts| (ts.opcode, ts.agent, ts.addr))
                else {
                    sim_error!("{}: transaction not found in table: {}", llc.entity, msg);
                };
                trace!(llc.entity ; "{:?} {:#x} completes with {:?}", cmd_opcode, addr, opcode);
                match opcode {
                    MemRspOpcode::ReadOkay => {
                        let Some(agent) = agent else {
                            sim_error!("{}: fill without a target agent", llc.entity);
                        };
                        if let Err(shortage) =
                            llc.check_resources(&[(agent, MessageClass::Dt)], 1, 0)
                        {
                            pc.wait_on(&shortage);
                            return Ok(());
                        }
                        llc.emit_to_noc(agent, Message::new(msg.t, llc.id, Payload::Dt))?;
                        llc.issue_dir_rsp(msg.t, cmd_opcode)?;
                        llc.tt.with_mut(msg.t, |ts| ts.awaiting_dt_rsp = true);
                        if let Some(cc) = llc.class_credit(MessageClass::MemCmd, msg.origin) {
                            cc.credit()?;
                        }
                    }
                    MemRspOpcode::WriteOkay => {
                        if let Err(shortage) = llc.check_resources(&[], 1, 0) {
                            pc.wait_on(&shortage);
                            return Ok(());
                        }
                        llc.issue_dir_rsp(msg.t, cmd_opcode)?;
                        llc.tt.remove(msg.t);
                        if let Some(cc) = llc.class_credit(MessageClass::MemCmd, msg.origin) {
                            cc.credit()?;
                        }
                    }
                }
                mq.dequeue();
                llc.arb.advance(idx);
            }
            Payload::DtRsp => {
                let found = llc
                    .tt
                    .with(msg.t, |ts| ts.awaiting_dt_rsp)
                    .unwrap_or(false);
                if !found {
                    sim_error!("{}: unexpected DtRsp: {}", llc.entity, msg);
                }
                if let Some(cc) = llc.class_credit(MessageClass::Dt, msg.origin) {
                    cc.credit()?;
                }
                llc.tt.remove(msg.t);
                mq.dequeue();
                llc.arb.advance(idx);
            }
            _ => {
                sim_error!("{}: invalid message class received: {}", llc.entity, msg);
            }
        }

        if llc.arb.tournament().winner().is_some() {
            pc.wait_epoch();
        } else {
            pc.wait_on(llc.arb.request_arrival_event());
        }
        Ok(())
    }
}
