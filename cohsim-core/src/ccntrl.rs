// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! The cache controller (CC): the bridge between a cluster's ACE side and
//! the NOC's coherence-message side.
//!
//! Two processes run side by side. The request dispatcher translates ACE
//! commands into the `CohSrt`/`CohCmd` pair toward the home directory and
//! collects `CohCmdRsp`, `Dt` and `CohEnd` into a per-transaction line; the
//! line is complete when no reply is awaited and the expected data
//! transfers have arrived, at which point the ACE response is returned to
//! the L2. The snoop process forwards `CohSnp` to the L2 as an ACE snoop,
//! forwards intervention data to the named agent and answers the
//! originating directory.
//!
//! Every NOC emission costs one port credit; `CohSrt`, `CohCmd` and `Dt`
//! additionally cost a per-(class, destination) credit which the matching
//! response returns.

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

use crate::cfgs::CCAgentConfig;
use crate::mq::MessageQueue;
use crate::msg::{AceCmdOpcode, Message, MessageClass};
use crate::noc::{DirMapper, NocPort};
use crate::protocol::CCProtocol;
use crate::types::{Addr, AgentId, TransactionId};

/// Per-transaction state of an in-flight request (the "CC line").
#[derive(Clone)]
pub struct CCLine {
    /// Line address of the transaction.
    pub addr: Addr,
    /// The ACE opcode being performed.
    pub opcode: AceCmdOpcode,
    /// `CohEnd` reported the line shared.
    pub is_shared: bool,
    /// `CohEnd` reported dirty responsibility passed.
    pub pass_dirty: bool,
    /// Expected data transfers (valid once `CohEnd` has arrived).
    pub dt_n: usize,
    /// Received data transfers.
    pub dt_i: usize,
    /// `CohEnd` has not yet arrived.
    pub awaiting_coh_end: bool,
    /// `CohCmdRsp` has not yet arrived.
    pub awaiting_coh_cmd_rsp: bool,
    blocked_mqs: Vec<Rc<MessageQueue>>,
}

impl CCLine {
    /// A fresh line for a newly received ACE command.
    #[must_use]
    pub fn new(addr: Addr, opcode: AceCmdOpcode) -> Self {
        Self {
            addr,
            opcode,
            is_shared: false,
            pass_dirty: false,
            dt_n: 0,
            dt_i: 0,
            awaiting_coh_end: true,
            awaiting_coh_cmd_rsp: true,
            blocked_mqs: Vec::new(),
        }
    }

    /// A stable (complete) line has no outstanding expected messages.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        if self.awaiting_coh_end || self.awaiting_coh_cmd_rsp {
            return false;
        }
        self.dt_n == self.dt_i
    }
}

/// Per-snoop-transaction state.
#[derive(Clone)]
pub struct CCSnpLine {
    /// Line address of the snoop.
    pub addr: Addr,
    /// Originating directory.
    pub origin: AgentId,
    /// Agent to which intervention data should be passed, if any.
    pub agent: Option<AgentId>,
    /// A `Dt` was forwarded; the snoop closes on its `DtRsp`.
    pub dt_sent: bool,
}

/// The context one request-side protocol invocation operates on.
pub struct CCContext {
    /// The head message of the nominated queue.
    pub msg: Message,
    /// Snapshot of the transaction line, when in flight.
    pub line: Option<CCLine>,
    /// Home directory of the addressed line (ACE commands only).
    pub dir: Option<AgentId>,
    /// Agent handle of this CC.
    pub cc_id: AgentId,
}

/// The context one snoop-side protocol invocation operates on.
pub struct CCSnpContext {
    /// The head message of the nominated queue.
    pub msg: Message,
    /// Snapshot of the snoop line, when in flight.
    pub line: Option<CCSnpLine>,
    /// A request transaction to the snooped line whose grant the snoop
    /// must let land first. Directory-to-CC delivery is ordered, so a
    /// snoop that post-dates the grant always finds either the applied
    /// ordering response or that response still queued locally.
    pub req_stall: Option<TransactionId>,
    /// Agent handle of this CC.
    pub cc_id: AgentId,
}

/// The opcodes of the request-side command interpreter.
pub enum CCCommand {
    /// Install a transaction line keyed by the current message.
    StartTransaction(CCLine),
    /// Retire the current message's transaction and unblock its waiters.
    EndTransaction,
    /// Fold a `CohEnd` into the transaction line.
    ApplyCohEnd {
        /// Line granted shared.
        is_shared: bool,
        /// Dirty responsibility passed.
        pass_dirty: bool,
        /// Expected data transfers.
        dt_n: usize,
    },
    /// Fold a `CohCmdRsp` into the transaction line.
    ApplyCohCmdRsp,
    /// Fold a `Dt` into the transaction line.
    ApplyDt,
    /// Issue the ACE response to the L2.
    IssueAceRsp(Message),
    /// Emit a message onto the NOC.
    EmitToNoc {
        /// Destination agent.
        dest: AgentId,
        /// The message to wrap and send.
        msg: Message,
    },
    /// Return a credit of the given command class to the edge from the
    /// current message's origin.
    AddCredit(MessageClass),
    /// Consume the head message of the nominated queue.
    Consume,
    /// Re-evaluate after an epoch has elapsed.
    WaitNextEpoch,
}

/// A linear program of [`CCCommand`]s.
#[derive(Default)]
pub struct CCCommandList {
    cmds: Vec<CCCommand>,
}

impl CCCommandList {
    /// Append a command.
    pub fn push(&mut self, cmd: CCCommand) {
        self.cmds.push(cmd);
    }

    /// Iterate the program.
    pub fn iter(&self) -> std::slice::Iter<'_, CCCommand> {
        self.cmds.iter()
    }
}

/// The opcodes of the snoop-side command interpreter.
pub enum CCSnpCommand {
    /// Install a snoop transaction keyed by the current message.
    StartTransaction(CCSnpLine),
    /// Retire the current message's snoop transaction.
    EndTransaction,
    /// Record that intervention data was forwarded.
    MarkDtSent,
    /// Block the nominated queue until the given request transaction
    /// completes.
    BlockOnReqTransaction(TransactionId),
    /// Issue an ACE snoop to the L2.
    IssueAceSnp(Message),
    /// Emit a message onto the NOC.
    EmitToNoc {
        /// Destination agent.
        dest: AgentId,
        /// The message to wrap and send.
        msg: Message,
    },
    /// Return a credit of the given command class to the edge from the
    /// current message's origin.
    AddCredit(MessageClass),
    /// Consume the head message of the nominated queue.
    Consume,
    /// Re-evaluate after an epoch has elapsed.
    WaitNextEpoch,
}

/// A linear program of [`CCSnpCommand`]s.
#[derive(Default)]
pub struct CCSnpCommandList {
    cmds: Vec<CCSnpCommand>,
}

impl CCSnpCommandList {
    /// Append a command.
    pub fn push(&mut self, cmd: CCSnpCommand) {
        self.cmds.push(cmd);
    }

    /// Iterate the program.
    pub fn iter(&self) -> std::slice::Iter<'_, CCSnpCommand> {
        self.cmds.iter()
    }
}

/// Cluster-to-NOC bridge.
pub struct CCAgent {
    entity: Arc<Entity>,
    id: AgentId,

    /// L2 to CC ACE command queue (CC owned).
    l2_cc__cmd_q: Rc<MessageQueue>,
    /// Directory to CC response queue: `CohCmdRsp` and `CohEnd` (CC owned).
    dir_cc__rsp_q: Rc<MessageQueue>,
    /// Data-transfer ingress queue (CC owned).
    cc__dt_q: Rc<MessageQueue>,
    rdis_arb: Arbiter<MessageQueue>,

    /// Snoop ingress queue: `CohSnp` (CC owned).
    cc__snp_q: Rc<MessageQueue>,
    /// L2 to CC snoop response queue (CC owned).
    l2_cc__snprsp_q: Rc<MessageQueue>,
    /// Snoop-side `DtRsp` ingress queue (CC owned).
    cc__snp_dtrsp_q: Rc<MessageQueue>,
    snp_arb: Arbiter<MessageQueue>,

    /// CC to L2 ACE response queue (L2 owned, bound at elaboration).
    cc_l2__rsp_q: RefCell<Option<Rc<MessageQueue>>>,
    /// CC to L2 snoop queue (L2 owned, bound at elaboration).
    cc_l2__snp_q: RefCell<Option<Rc<MessageQueue>>>,

    noc_port: RefCell<Option<Rc<NocPort>>>,
    dm: RefCell<Option<Rc<dyn DirMapper>>>,

    tt: Table<TransactionId, CCLine>,
    snp_tt: Table<TransactionId, CCSnpLine>,

    /// Per-(class, destination) command credits.
    ccntrs: RefCell<HashMap<(MessageClass, AgentId), Rc<CreditCounter>>>,

    protocol: Box<dyn CCProtocol>,
}

impl CCAgent {
    /// Construct the agent and register its request and snoop processes.
    pub fn new_and_register(
        kernel: &Kernel,
        parent: &Arc<Entity>,
        id: AgentId,
        config: &CCAgentConfig,
        protocol: Box<dyn CCProtocol>,
    ) -> Rc<Self> {
        let entity = Arc::new(Entity::new(parent, config.name.as_str()));
        let l2_cc__cmd_q = MessageQueue::new(kernel, &entity, "l2_cc__cmd_q", config.l2_cc__cmd_n);
        let dir_cc__rsp_q = MessageQueue::new(kernel, &entity, "dir_cc__rsp_q", config.dir_cc__rsp_n);
        let cc__dt_q = MessageQueue::new(kernel, &entity, "cc__dt_q", config.cc_dt_n);

        let rdis_arb = Arbiter::new(kernel, &entity, "rdis_arb");
        rdis_arb.add_requester(l2_cc__cmd_q.clone());
        rdis_arb.add_requester(dir_cc__rsp_q.clone());
        rdis_arb.add_requester(cc__dt_q.clone());

        let cc__snp_q = MessageQueue::new(kernel, &entity, "cc__snp_q", config.cc_snp_n);
        let l2_cc__snprsp_q =
            MessageQueue::new(kernel, &entity, "l2_cc__snprsp_q", config.l2_cc__snprsp_n);
        let cc__snp_dtrsp_q =
            MessageQueue::new(kernel, &entity, "cc__snp_dtrsp_q", config.cc_snp_dtrsp_n);

        let snp_arb = Arbiter::new(kernel, &entity, "snp_arb");
        snp_arb.add_requester(cc__snp_q.clone());
        snp_arb.add_requester(l2_cc__snprsp_q.clone());
        snp_arb.add_requester(cc__snp_dtrsp_q.clone());

        let tt = Table::new(kernel, &entity, "tt", config.tt_entries_n);
        let snp_tt = Table::new(kernel, &entity, "snp_tt", config.snp_tt_entries_n);

        let cc = Rc::new(Self {
            entity,
            id,
            l2_cc__cmd_q,
            dir_cc__rsp_q,
            cc__dt_q,
            rdis_arb,
            cc__snp_q,
            l2_cc__snprsp_q,
            cc__snp_dtrsp_q,
            snp_arb,
            cc_l2__rsp_q: RefCell::new(None),
            cc_l2__snp_q: RefCell::new(None),
            noc_port: RefCell::new(None),
            dm: RefCell::new(None),
            tt,
            snp_tt,
            ccntrs: RefCell::new(HashMap::new()),
            protocol,
        });

        let rdis_entity = Arc::new(Entity::new(&cc.entity, "rdis"));
        kernel.add_process(
            &rdis_entity,
            config.epoch,
            Rc::new(RefCell::new(RdisProcess { cc: cc.clone() })),
        );
        let snp_entity = Arc::new(Entity::new(&cc.entity, "snp"));
        kernel.add_process(
            &snp_entity,
            config.epoch,
            Rc::new(RefCell::new(SnpProcess { cc: cc.clone() })),
        );
        cc
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

    /// The ACE command queue (CC owned).
    #[must_use]
    pub fn l2_cc__cmd_q(&self) -> Rc<MessageQueue> {
        self.l2_cc__cmd_q.clone()
    }

    /// The L2 to CC snoop response queue (CC owned).
    #[must_use]
    pub fn l2_cc__snprsp_q(&self) -> Rc<MessageQueue> {
        self.l2_cc__snprsp_q.clone()
    }

    /// The directory response queue (CC owned), for endpoint routing.
    #[must_use]
    pub fn dir_cc__rsp_q(&self) -> Rc<MessageQueue> {
        self.dir_cc__rsp_q.clone()
    }

    /// The data-transfer queue (CC owned), for endpoint routing.
    #[must_use]
    pub fn cc__dt_q(&self) -> Rc<MessageQueue> {
        self.cc__dt_q.clone()
    }

    /// The snoop queue (CC owned), for endpoint routing.
    #[must_use]
    pub fn cc__snp_q(&self) -> Rc<MessageQueue> {
        self.cc__snp_q.clone()
    }

    /// The snoop-side `DtRsp` queue (CC owned), for endpoint routing.
    #[must_use]
    pub fn cc__snp_dtrsp_q(&self) -> Rc<MessageQueue> {
        self.cc__snp_dtrsp_q.clone()
    }

    /// Bind the CC to L2 ACE response queue (Elaboration-Phase only).
    pub fn set_cc_l2__rsp_q(&self, mq: Rc<MessageQueue>) {
        *self.cc_l2__rsp_q.borrow_mut() = Some(mq);
    }

    /// Bind the CC to L2 snoop queue (Elaboration-Phase only).
    pub fn set_cc_l2__snp_q(&self, mq: Rc<MessageQueue>) {
        *self.cc_l2__snp_q.borrow_mut() = Some(mq);
    }

    /// Bind the NOC port (Elaboration-Phase only).
    pub fn set_noc_port(&self, port: Rc<NocPort>) {
        *self.noc_port.borrow_mut() = Some(port);
    }

    /// Set the directory mapper (Elaboration-Phase only).
    pub fn set_dm(&self, dm: Rc<dyn DirMapper>) {
        *self.dm.borrow_mut() = Some(dm);
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
        self.rdis_arb.elab()?;
        self.snp_arb.elab()
    }

    /// Design-rule check.
    pub fn drc(&self) -> SimResult {
        if self.dm.borrow().is_none() {
            // The DirMapper computes the home directory for an address; a
            // system without one cannot route coherence commands.
            sim_error!("{}: directory mapper is not defined", self.entity);
        }
        if self.noc_port.borrow().is_none() {
            sim_error!("{}: NOC port has not been bound", self.entity);
        }
        if self.cc_l2__rsp_q.borrow().is_none() || self.cc_l2__snp_q.borrow().is_none() {
            sim_error!("{}: L2 egress queues have not been bound", self.entity);
        }
        Ok(())
    }

    /// Number of in-flight request and snoop transactions.
    #[must_use]
    pub fn outstanding_n(&self) -> usize {
        self.tt.len() + self.snp_tt.len()
    }

    fn noc_port(&self) -> Rc<NocPort> {
        self.noc_port.borrow().as_ref().unwrap().clone()
    }

    fn class_credit(&self, cls: MessageClass, dest: AgentId) -> Option<Rc<CreditCounter>> {
        self.ccntrs.borrow().get(&(cls, dest)).cloned()
    }

    /// Check NOC and per-class credits for a set of pending emissions.
    fn check_emissions(&self, emissions: &[(AgentId, MessageClass)]) -> Result<(), Event> {
        let port = self.noc_port();
        if port.ingress_cc().i() < emissions.len() {
            return Err(port.ingress_cc().credit_event().clone());
        }
        let mut need: HashMap<(MessageClass, AgentId), usize> = HashMap::new();
        for (dest, cls) in emissions {
            if matches!(
                cls,
                MessageClass::CohSrt | MessageClass::CohCmd | MessageClass::Dt
            ) {
                *need.entry((*cls, *dest)).or_default() += 1;
            }
        }
        for ((cls, dest), n) in need {
            if let Some(cc) = self.class_credit(cls, dest) {
                if cc.i() < n {
                    return Err(cc.credit_event().clone());
                }
            }
        }
        Ok(())
    }

    fn emit_to_noc(&self, dest: AgentId, msg: Message) -> SimResult {
        let cls = msg.cls();
        if let Some(cc) = self.class_credit(cls, dest) {
            cc.debit()?;
        }
        let port = self.noc_port();
        port.ingress_cc().debit()?;
        trace!(self.entity ; "emit {} to {}", msg, dest);
        port.ingress().enqueue(msg.into_noc(dest))
    }

    fn add_credit(&self, cls: MessageClass, origin: AgentId) -> SimResult {
        if let Some(cc) = self.class_credit(cls, origin) {
            cc.credit()?;
        }
        Ok(())
    }

    /// The in-flight request transaction addressing `addr` that a snoop
    /// must wait behind, if any. A request that has been ordered at the
    /// directory (its `CohCmdRsp` applied or still queued) owns the line;
    /// an unordered request predates the snoop and is ignored.
    fn req_stall_for(&self, addr: Addr) -> Option<TransactionId> {
        let t = self.tt.find_key(|line| line.addr == addr)?;
        let awaiting = self.tt.with(t, |line| line.awaiting_coh_cmd_rsp).unwrap();
        let ordered = !awaiting || self.dir_cc__rsp_q.any(|m| m.t == t);
        ordered.then_some(t)
    }

    fn execute(
        &self,
        cl: &CCCommandList,
        ctxt: &CCContext,
        winner_idx: usize,
        mq: &Rc<MessageQueue>,
    ) -> SimResult {
        for cmd in cl.iter() {
            match cmd {
                CCCommand::StartTransaction(line) => {
                    self.tt.install(ctxt.msg.t, line.clone())?;
                }
                CCCommand::EndTransaction => {
                    let Some(line) = self.tt.remove(ctxt.msg.t) else {
                        sim_error!(
                            "{}: end of transaction not found in table: {}",
                            self.entity,
                            ctxt.msg
                        );
                    };
                    // The waiters may include the snoop process's queues;
                    // unblocking re-fires their arrival events.
                    for blocked in &line.blocked_mqs {
                        blocked.unblock();
                    }
                }
                CCCommand::ApplyCohEnd {
                    is_shared,
                    pass_dirty,
                    dt_n,
                } => {
                    self.with_line(ctxt, |line| {
                        line.is_shared = *is_shared;
                        line.pass_dirty = *pass_dirty;
                        line.dt_n = *dt_n;
                        line.awaiting_coh_end = false;
                    })?;
                }
                CCCommand::ApplyCohCmdRsp => {
                    self.with_line(ctxt, |line| line.awaiting_coh_cmd_rsp = false)?;
                }
                CCCommand::ApplyDt => {
                    self.with_line(ctxt, |line| line.dt_i += 1)?;
                }
                CCCommand::IssueAceRsp(msg) => {
                    let q = self.cc_l2__rsp_q.borrow().as_ref().unwrap().clone();
                    q.enqueue(msg.clone())?;
                }
                CCCommand::EmitToNoc { dest, msg } => {
                    self.emit_to_noc(*dest, msg.clone())?;
                }
                CCCommand::AddCredit(cls) => {
                    self.add_credit(*cls, ctxt.msg.origin)?;
                }
                CCCommand::Consume => {
                    mq.dequeue();
                    self.rdis_arb.advance(winner_idx);
                }
                CCCommand::WaitNextEpoch => {}
            }
        }
        Ok(())
    }

    fn with_line(&self, ctxt: &CCContext, f: impl FnOnce(&mut CCLine)) -> SimResult {
        if self.tt.with_mut(ctxt.msg.t, f).is_none() {
            sim_error!(
                "{}: transaction not found in table: {}",
                self.entity,
                ctxt.msg
            );
        }
        Ok(())
    }

    fn execute_snp(
        &self,
        cl: &CCSnpCommandList,
        ctxt: &CCSnpContext,
        winner_idx: usize,
        mq: &Rc<MessageQueue>,
    ) -> SimResult {
        for cmd in cl.iter() {
            match cmd {
                CCSnpCommand::StartTransaction(line) => {
                    self.snp_tt.install(ctxt.msg.t, line.clone())?;
                }
                CCSnpCommand::EndTransaction => {
                    if self.snp_tt.remove(ctxt.msg.t).is_none() {
                        sim_error!(
                            "{}: end of snoop transaction not found in table: {}",
                            self.entity,
                            ctxt.msg
                        );
                    }
                }
                CCSnpCommand::MarkDtSent => {
                    if self
                        .snp_tt
                        .with_mut(ctxt.msg.t, |line| line.dt_sent = true)
                        .is_none()
                    {
                        sim_error!(
                            "{}: snoop transaction not found in table: {}",
                            self.entity,
                            ctxt.msg
                        );
                    }
                }
                CCSnpCommand::BlockOnReqTransaction(t) => {
                    if self
                        .tt
                        .with_mut(*t, |line| line.blocked_mqs.push(mq.clone()))
                        .is_none()
                    {
                        sim_error!("{}: block on unknown transaction {t}", self.entity);
                    }
                    mq.set_blocked(true);
                }
                CCSnpCommand::IssueAceSnp(msg) => {
                    let q = self.cc_l2__snp_q.borrow().as_ref().unwrap().clone();
                    q.enqueue(msg.clone())?;
                }
                CCSnpCommand::EmitToNoc { dest, msg } => {
                    self.emit_to_noc(*dest, msg.clone())?;
                }
                CCSnpCommand::AddCredit(cls) => {
                    self.add_credit(*cls, ctxt.msg.origin)?;
                }
                CCSnpCommand::Consume => {
                    mq.dequeue();
                    self.snp_arb.advance(winner_idx);
                }
                CCSnpCommand::WaitNextEpoch => {}
            }
        }
        Ok(())
    }
}

struct RdisProcess {
    cc: Rc<CCAgent>,
}

impl Process for RdisProcess {
    fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        pc.wait_on(self.cc.rdis_arb.request_arrival_event());
        Ok(())
    }

    fn eval(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        let cc = &self.cc;
        let t = cc.rdis_arb.tournament();
        if t.deadlock() {
            sim_error!("{}: a protocol deadlock has been detected", cc.entity);
        }
        let Some((idx, mq)) = t.winner() else {
            pc.wait_on(cc.rdis_arb.request_arrival_event());
            return Ok(());
        };
        let mq = mq.clone();
        let msg = mq.peek().unwrap();

        let dir = match &msg.payload {
            crate::msg::Payload::AceCmd { addr, .. } => {
                Some(cc.dm.borrow().as_ref().unwrap().lookup(*addr))
            }
            _ => None,
        };
        let ctxt = CCContext {
            line: cc.tt.with(msg.t, Clone::clone),
            dir,
            cc_id: cc.id,
            msg,
        };

        let mut cl = CCCommandList::default();
        cc.protocol.apply(&ctxt, &mut cl)?;

        // Resource check: transaction table, L2 response queue, NOC and
        // per-class credits.
        let mut tt_entry_n = 0;
        let mut rsp_n = 0;
        let mut emissions = Vec::new();
        for cmd in cl.iter() {
            match cmd {
                CCCommand::StartTransaction(_) => tt_entry_n += 1,
                CCCommand::IssueAceRsp(_) => rsp_n += 1,
                CCCommand::EmitToNoc { dest, msg } => emissions.push((*dest, msg.cls())),
                _ => {}
            }
        }
        if !cc.tt.has_at_least(tt_entry_n) {
            pc.wait_on(cc.tt.non_full_event());
            return Ok(());
        }
        let rsp_q = cc.cc_l2__rsp_q.borrow().as_ref().unwrap().clone();
        if rsp_q.free() < rsp_n {
            pc.wait_on(rsp_q.non_full_event());
            return Ok(());
        }
        if let Err(shortage) = cc.check_emissions(&emissions) {
            pc.wait_on(&shortage);
            return Ok(());
        }

        cc.execute(&cl, &ctxt, idx, &mq)?;

        if cc.rdis_arb.tournament().winner().is_some() {
            pc.wait_epoch();
        } else {
            pc.wait_on(cc.rdis_arb.request_arrival_event());
        }
        Ok(())
    }
}

struct SnpProcess {
    cc: Rc<CCAgent>,
}

impl Process for SnpProcess {
    fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        pc.wait_on(self.cc.snp_arb.request_arrival_event());
        Ok(())
    }

    fn eval(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        let cc = &self.cc;
        let t = cc.snp_arb.tournament();
        if t.deadlock() {
            sim_error!("{}: a snoop deadlock has been detected", cc.entity);
        }
        let Some((idx, mq)) = t.winner() else {
            pc.wait_on(cc.snp_arb.request_arrival_event());
            return Ok(());
        };
        let mq = mq.clone();
        let msg = mq.peek().unwrap();

        let req_stall = match &msg.payload {
            crate::msg::Payload::CohSnp { addr, .. } => cc.req_stall_for(*addr),
            _ => None,
        };
        let ctxt = CCSnpContext {
            line: cc.snp_tt.with(msg.t, Clone::clone),
            req_stall,
            cc_id: cc.id,
            msg,
        };

        let mut cl = CCSnpCommandList::default();
        cc.protocol.apply_snp(&ctxt, &mut cl)?;

        let mut tt_entry_n = 0;
        let mut snp_n = 0;
        let mut emissions = Vec::new();
        for cmd in cl.iter() {
            match cmd {
                CCSnpCommand::StartTransaction(_) => tt_entry_n += 1,
                CCSnpCommand::IssueAceSnp(_) => snp_n += 1,
                CCSnpCommand::EmitToNoc { dest, msg } => emissions.push((*dest, msg.cls())),
                _ => {}
            }
        }
        if !cc.snp_tt.has_at_least(tt_entry_n) {
            pc.wait_on(cc.snp_tt.non_full_event());
            return Ok(());
        }
        let snp_q = cc.cc_l2__snp_q.borrow().as_ref().unwrap().clone();
        if snp_q.free() < snp_n {
            pc.wait_on(snp_q.non_full_event());
            return Ok(());
        }
        if let Err(shortage) = cc.check_emissions(&emissions) {
            pc.wait_on(&shortage);
            return Ok(());
        }

        cc.execute_snp(&cl, &ctxt, idx, &mq)?;

        if cc.snp_arb.tournament().winner().is_some() {
            pc.wait_epoch();
        } else {
            pc.wait_on(cc.snp_arb.request_arrival_event());
        }
        Ok(())
    }
}
