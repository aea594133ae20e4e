// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! The directory agent (home node).
//!
//! The directory holds a tag store keyed by line address with per-line
//! owner, sharer set and LLC residency. Transactions arrive as a
//! `CohSrt`/`CohCmd` pair; the directory serializes transactions per line
//! (a command for a busy line blocks its queue on the owning transaction),
//! dispatches snoops to the holding clusters, falls back to the co-located
//! LLC for fills and direct serves, and closes each transaction with a
//! `CohEnd` to the requester.
//!
//! A recall (directory-initiated eviction) is an internal transaction: the
//! victim's holders are snooped with `CleanInvalid`/`MakeInvalid`, dirty
//! data is written back through the LLC, and the line is invalidated.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use std::sync::Arc;

use cohsim_components::arbiter::Arbiter;
use cohsim_components::cache::CacheModel;
use cohsim_components::credit::CreditCounter;
use cohsim_components::table::Table;
use cohsim_engine::event::Event;
use cohsim_engine::kernel::Kernel;
use cohsim_engine::process::{Process, ProcessCtrl};
use cohsim_engine::sim_error;
use cohsim_engine::types::{SimError, SimResult};
use cohsim_track::entity::Entity;
use cohsim_track::trace;

use crate::cfgs::DirAgentConfig;
use crate::mq::MessageQueue;
use crate::msg::{AceCmdOpcode, LLCCmdOpcode, Message, MessageClass, Payload};
use crate::noc::NocPort;
use crate::protocol::DirProtocol;
use crate::types::{Addr, AgentId, State, TransactionFactory, TransactionId};

/// A directory line: protocol state, owner, sharers and LLC residency.
#[derive(Clone)]
pub struct DirLine {
    /// Protocol state.
    pub state: State,
    /// Cluster (CC agent) holding the line writeable, if any.
    pub owner: Option<AgentId>,
    /// Clusters holding shared copies.
    pub sharers: BTreeSet<AgentId>,
    /// A clean copy resides in the co-located LLC.
    pub llc_valid: bool,
}

impl DirLine {
    fn new(state: State) -> Self {
        Self {
            state,
            owner: None,
            sharers: BTreeSet::new(),
            llc_valid: false,
        }
    }
}

/// Per-transaction state held by the directory.
#[derive(Clone)]
pub struct DirTState {
    /// Requesting agent (the directory itself for recalls).
    pub origin: AgentId,
    /// Line address of the transaction.
    pub addr: Addr,
    /// The ACE opcode being performed (set by `CohCmd`).
    pub opcode: Option<AceCmdOpcode>,
    /// Snoop responses awaited.
    pub snoop_expected: usize,
    /// Snoop responses received.
    pub snoop_received: usize,
    /// Data transfers reported by the snoop responses.
    pub dt_n: usize,
    /// Any snoop response passed dirty.
    pub pd: bool,
    /// Any snoop response retained a shared copy.
    pub retained: bool,
    /// An LLC command is outstanding, of this opcode.
    pub llc_op: Option<LLCCmdOpcode>,
    /// This is a directory-initiated recall.
    pub recall: bool,
}

impl DirTState {
    /// A fresh record for a transaction at `addr` from `origin`.
    #[must_use]
    pub fn new(origin: AgentId, addr: Addr, recall: bool) -> Self {
        Self {
            origin,
            addr,
            opcode: None,
            snoop_expected: 0,
            snoop_received: 0,
            dt_n: 0,
            pd: false,
            retained: false,
            llc_op: None,
            recall,
        }
    }
}

struct DirTEntry {
    tstate: DirTState,
    blocked_mqs: Vec<Rc<MessageQueue>>,
}

/// Recall obligation computed before the protocol runs: the victim line
/// that must leave the tag store to admit the addressed line.
pub struct RecallContext {
    /// Internal transaction identity allocated for the recall.
    pub t: TransactionId,
    /// Victim line address.
    pub victim_addr: Addr,
    /// Victim line contents.
    pub victim: DirLine,
}

/// The context one protocol invocation operates on.
pub struct DirContext {
    /// The head message of the nominated queue.
    pub msg: Message,
    /// Line address the message addresses.
    pub addr: Addr,
    /// Snapshot of the addressed line, when resident.
    pub line: Option<DirLine>,
    /// Transaction record for `msg.t`, when in flight.
    pub tstate: Option<DirTState>,
    /// Transaction currently holding the addressed line busy.
    pub busy_owner: Option<TransactionId>,
    /// Recall required before the addressed line can be installed.
    pub recall: Option<RecallContext>,
    /// Agent handle of this directory.
    pub dir_id: AgentId,
}

/// The opcodes of the directory command interpreter.
pub enum DirCommand {
    /// Install a new line.
    InstallLine {
        /// Line address.
        addr: Addr,
        /// Initial state.
        state: State,
    },
    /// Update the state of a resident line.
    UpdateState {
        /// Line address.
        addr: Addr,
        /// Next state.
        state: State,
    },
    /// Remove a resident line.
    RemoveLine {
        /// Line address.
        addr: Addr,
    },
    /// Record the owning cluster of a line.
    SetOwner {
        /// Line address.
        addr: Addr,
        /// Owning agent.
        agent: AgentId,
    },
    /// Clear the owning cluster of a line.
    DelOwner {
        /// Line address.
        addr: Addr,
    },
    /// Add a cluster to a line's sharer set.
    AddSharer {
        /// Line address.
        addr: Addr,
        /// Sharer agent.
        agent: AgentId,
    },
    /// Clear a line's sharer set.
    ClearSharers {
        /// Line address.
        addr: Addr,
    },
    /// Record LLC residency of a line.
    SetLlcValid {
        /// Line address.
        addr: Addr,
        /// Residency flag.
        valid: bool,
    },
    /// Install a transaction record.
    StartTransaction {
        /// Transaction identity (a fresh one for recalls).
        t: TransactionId,
        /// Initial record.
        tstate: DirTState,
    },
    /// Retire a transaction and unblock its waiters.
    EndTransaction {
        /// Transaction identity.
        t: TransactionId,
    },
    /// Record the `CohCmd` opcode on the current transaction.
    NoteCohCmd {
        /// The opcode.
        opcode: AceCmdOpcode,
    },
    /// Record the number of snoop responses awaited.
    NoteSnoopExpected {
        /// Transaction identity.
        t: TransactionId,
        /// Number of snoops dispatched.
        n: usize,
    },
    /// Fold the current `CohSnpRsp` into its transaction.
    NoteSnoopRsp,
    /// Record an outstanding LLC command.
    SetAwaitingLlc {
        /// Transaction identity.
        t: TransactionId,
        /// The LLC opcode issued.
        op: LLCCmdOpcode,
    },
    /// Block the nominated queue until the given transaction completes.
    BlockOnTransaction {
        /// Transaction identity.
        t: TransactionId,
    },
    /// Issue a command to the co-located LLC.
    IssueLLCCmd(Message),
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
    /// Mark the addressed line busy under a transaction.
    MarkBusy {
        /// Line address.
        addr: Addr,
        /// Owning transaction.
        t: TransactionId,
    },
    /// Release the busy marking of a line.
    ClearBusy {
        /// Line address.
        addr: Addr,
    },
    /// Consume the head message of the nominated queue.
    Consume,
    /// Re-evaluate after an epoch has elapsed.
    WaitNextEpoch,
}

/// A linear program of [`DirCommand`]s.
#[derive(Default)]
pub struct DirCommandList {
    cmds: Vec<DirCommand>,
}

impl DirCommandList {
    /// Append a command.
    pub fn push(&mut self, cmd: DirCommand) {
        self.cmds.push(cmd);
    }

    /// Iterate the program.
    pub fn iter(&self) -> std::slice::Iter<'_, DirCommand> {
        self.cmds.iter()
    }
}

/// Sharer/owner tracking, snoop dispatch and LLC driving for one home
/// node.
pub struct DirAgent {
    entity: Arc<Entity>,
    id: AgentId,
    config: DirAgentConfig,

    /// Per-CC command queues: `CohSrt` and `CohCmd` (directory owned).
    cmd_qs: RefCell<Vec<(AgentId, Rc<MessageQueue>)>>,
    /// Snoop response queue (directory owned).
    snprsp_q: Rc<MessageQueue>,
    /// LLC response queue (directory owned; the LLC holds a reference).
    llc_rsp_q: Rc<MessageQueue>,
    arb: Arbiter<MessageQueue>,

    /// Directory to LLC command queue (LLC owned, bound at elaboration).
    dir_llc__cmd_q: RefCell<Option<Rc<MessageQueue>>>,
    noc_port: RefCell<Option<Rc<NocPort>>>,

    cache: RefCell<CacheModel<DirLine>>,
    tt: Table<TransactionId, DirTEntry>,
    busy: RefCell<HashMap<Addr, TransactionId>>,

    ccntrs: RefCell<HashMap<(MessageClass, AgentId), Rc<CreditCounter>>>,
    protocol: Box<dyn DirProtocol>,
    tfactory: Rc<TransactionFactory>,
    kernel: Kernel,
}

impl DirAgent {
    /// Construct the agent and register its main process.
    pub fn new_and_register(
        kernel: &Kernel,
        parent: &Arc<Entity>,
        id: AgentId,
        config: &DirAgentConfig,
        protocol: Box<dyn DirProtocol>,
        tfactory: Rc<TransactionFactory>,
    ) -> Result<Rc<Self>, SimError> {
        let entity = Arc::new(Entity::new(parent, config.name.as_str()));
        let snprsp_q = MessageQueue::new(kernel, &entity, "snprsp_q", config.rsp_queue_n);
        let llc_rsp_q = MessageQueue::new(kernel, &entity, "llc_rsp_q", config.rsp_queue_n);

        let arb = Arbiter::new(kernel, &entity, "arb");
        arb.add_requester(snprsp_q.clone());
        arb.add_requester(llc_rsp_q.clone());

        let cache = CacheModel::new(&config.cconfig.geometry())?;
        let tt = Table::new(kernel, &entity, "tt", config.tt_entries_n);

        let dir = Rc::new(Self {
            entity,
            id,
            config: config.clone(),
            cmd_qs: RefCell::new(Vec::new()),
            snprsp_q,
            llc_rsp_q,
            arb,
            dir_llc__cmd_q: RefCell::new(None),
            noc_port: RefCell::new(None),
            cache: RefCell::new(cache),
            tt,
            busy: RefCell::new(HashMap::new()),
            ccntrs: RefCell::new(HashMap::new()),
            protocol,
            tfactory,
            kernel: kernel.clone(),
        });

        let main_entity = Arc::new(Entity::new(&dir.entity, "main"));
        kernel.add_process(
            &main_entity,
            config.epoch,
            Rc::new(RefCell::new(MainProcess { dir: dir.clone() })),
        );
        Ok(dir)
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

    /// Create the command queue for requester `cc` (Build-Phase only).
    pub fn register_cc(&self, cc: AgentId) -> Rc<MessageQueue> {
        let name = format!("cmd_q_{cc}");
        let q = MessageQueue::new(
            &self.kernel,
            &self.entity,
            name.as_str(),
            self.config.cmd_queue_n,
        );
        self.cmd_qs.borrow_mut().push((cc, q.clone()));
        self.arb.add_requester(q.clone());
        q
    }

    /// The snoop response queue (directory owned), for endpoint routing.
    #[must_use]
    pub fn snprsp_q(&self) -> Rc<MessageQueue> {
        self.snprsp_q.clone()
    }

    /// The LLC response queue (directory owned).
    #[must_use]
    pub fn llc_rsp_q(&self) -> Rc<MessageQueue> {
        self.llc_rsp_q.clone()
    }

    /// Bind the directory to LLC command queue (Elaboration-Phase only).
    pub fn set_dir_llc__cmd_q(&self, mq: Rc<MessageQueue>) {
        *self.dir_llc__cmd_q.borrow_mut() = Some(mq);
    }

    /// Bind the NOC port (Elaboration-Phase only).
    pub fn set_noc_port(&self, port: Rc<NocPort>) {
        *self.noc_port.borrow_mut() = Some(port);
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
        if self.dir_llc__cmd_q.borrow().is_none() {
            sim_error!("{}: LLC command queue has not been bound", self.entity);
        }
        if self.noc_port.borrow().is_none() {
            sim_error!("{}: NOC port has not been bound", self.entity);
        }
        if self.cmd_qs.borrow().is_empty() {
            sim_error!("{}: no requesters registered", self.entity);
        }
        Ok(())
    }

    /// Number of in-flight transactions; zero at end of simulation.
    #[must_use]
    pub fn outstanding_n(&self) -> usize {
        self.tt.len()
    }

    /// The line containing `addr`, for checkers.
    #[must_use]
    pub fn line(&self, addr: Addr) -> Option<DirLine> {
        let cache = self.cache.borrow();
        let base = cache.ah().line_base(addr);
        cache.lookup(base).cloned()
    }

    /// State name of the line containing `addr`, for checkers.
    #[must_use]
    pub fn line_state(&self, addr: Addr) -> Option<&'static str> {
        self.line(addr).map(|l| self.protocol.state_name(l.state))
    }

    fn line_addr_of(&self, msg: &Message) -> Result<Addr, SimError> {
        let ah = *self.cache.borrow().ah();
        match &msg.payload {
            Payload::CohSrt { addr } | Payload::CohCmd { addr, .. } => Ok(ah.line_base(*addr)),
            Payload::CohSnpRsp { .. } | Payload::LLCRsp { .. } => {
                match self.tt.with(msg.t, |e| e.tstate.addr) {
                    Some(addr) => Ok(addr),
                    None => Err(SimError(format!(
                        "{}: transaction not found in table: {}",
                        self.entity, msg
                    ))),
                }
            }
            _ => Err(SimError(format!(
                "{}: invalid message class received: {}",
                self.entity, msg
            ))),
        }
    }

    fn class_credit(&self, cls: MessageClass, dest: AgentId) -> Option<Rc<CreditCounter>> {
        self.ccntrs.borrow().get(&(cls, dest)).cloned()
    }

    fn check_resources(&self, cl: &DirCommandList) -> Result<(), Event> {
        let mut tt_entry_n = 0;
        let mut llc_cmd_n = 0;
        let mut emissions: Vec<(AgentId, MessageClass)> = Vec::new();
        for cmd in cl.iter() {
            match cmd {
                DirCommand::StartTransaction { .. } => tt_entry_n += 1,
                DirCommand::IssueLLCCmd(_) => llc_cmd_n += 1,
                DirCommand::EmitToNoc { dest, msg } => emissions.push((*dest, msg.cls())),
                _ => {}
            }
        }
        if !self.tt.has_at_least(tt_entry_n) {
            return Err(self.tt.non_full_event().clone());
        }
        if llc_cmd_n > 0 {
            let q = self.dir_llc__cmd_q.borrow().as_ref().unwrap().clone();
            if q.free() < llc_cmd_n {
                return Err(q.non_full_event().clone());
            }
        }
        let port = self.noc_port.borrow().as_ref().unwrap().clone();
        if port.ingress_cc().i() < emissions.len() {
            return Err(port.ingress_cc().credit_event().clone());
        }
        let mut need: HashMap<(MessageClass, AgentId), usize> = HashMap::new();
        for (dest, cls) in &emissions {
            if *cls == MessageClass::CohSnp {
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

    fn execute(
        &self,
        cl: &DirCommandList,
        ctxt: &DirContext,
        winner_idx: usize,
        mq: &Rc<MessageQueue>,
    ) -> SimResult {
        for cmd in cl.iter() {
            match cmd {
                DirCommand::InstallLine { addr, state } => {
                    self.cache
                        .borrow_mut()
                        .install(*addr, DirLine::new(*state))?;
                }
                DirCommand::UpdateState { addr, state } => {
                    let mut cache = self.cache.borrow_mut();
                    let Some(line) = cache.lookup_mut(*addr) else {
                        sim_error!("{}: state update of absent line {addr:#x}", self.entity);
                    };
                    trace!(self.entity ; "line {:#x}: {} -> {}",
                        addr,
                        self.protocol.state_name(line.state),
                        self.protocol.state_name(*state));
                    line.state = *state;
                }
                DirCommand::RemoveLine { addr } => {
                    self.cache.borrow_mut().remove(*addr);
                }
                DirCommand::SetOwner { addr, agent } => {
                    if let Some(line) = self.cache.borrow_mut().lookup_mut(*addr) {
                        line.owner = Some(*agent);
                        line.sharers.remove(agent);
                    }
                }
                DirCommand::DelOwner { addr } => {
                    if let Some(line) = self.cache.borrow_mut().lookup_mut(*addr) {
                        line.owner = None;
                    }
                }
                DirCommand::AddSharer { addr, agent } => {
                    if let Some(line) = self.cache.borrow_mut().lookup_mut(*addr) {
                        line.sharers.insert(*agent);
                    }
                }
                DirCommand::ClearSharers { addr } => {
                    if let Some(line) = self.cache.borrow_mut().lookup_mut(*addr) {
                        line.sharers.clear();
                    }
                }
                DirCommand::SetLlcValid { addr, valid } => {
                    if let Some(line) = self.cache.borrow_mut().lookup_mut(*addr) {
                        line.llc_valid = *valid;
                    }
                }
                DirCommand::StartTransaction { t, tstate } => {
                    self.tt.install(
                        *t,
                        DirTEntry {
                            tstate: tstate.clone(),
                            blocked_mqs: Vec::new(),
                        },
                    )?;
                }
                DirCommand::EndTransaction { t } => {
                    let Some(entry) = self.tt.remove(*t) else {
                        sim_error!("{}: end of unknown transaction {t}", self.entity);
                    };
                    for blocked in &entry.blocked_mqs {
                        blocked.unblock();
                    }
                }
                DirCommand::NoteCohCmd { opcode } => {
                    self.with_tstate(ctxt.msg.t, |ts| ts.opcode = Some(*opcode))?;
                }
                DirCommand::NoteSnoopExpected { t, n } => {
                    self.with_tstate(*t, |ts| ts.snoop_expected = *n)?;
                }
                DirCommand::NoteSnoopRsp => {
                    let Payload::CohSnpRsp {
                        dt, pd, is_shared, ..
                    } = &ctxt.msg.payload
                    else {
                        sim_error!("{}: NoteSnoopRsp outside CohSnpRsp", self.entity);
                    };
                    self.with_tstate(ctxt.msg.t, |ts| {
                        ts.snoop_received += 1;
                        if *dt {
                            ts.dt_n += 1;
                        }
                        ts.pd |= *pd;
                        ts.retained |= *is_shared;
                    })?;
                }
                DirCommand::SetAwaitingLlc { t, op } => {
                    self.with_tstate(*t, |ts| ts.llc_op = Some(*op))?;
                }
                DirCommand::BlockOnTransaction { t } => {
                    let found = self
                        .tt
                        .with_mut(*t, |e| e.blocked_mqs.push(mq.clone()))
                        .is_some();
                    if !found {
                        sim_error!("{}: block on unknown transaction {t}", self.entity);
                    }
                    mq.set_blocked(true);
                }
                DirCommand::IssueLLCCmd(msg) => {
                    let q = self.dir_llc__cmd_q.borrow().as_ref().unwrap().clone();
                    q.enqueue(msg.clone())?;
                }
                DirCommand::EmitToNoc { dest, msg } => {
                    let cls = msg.cls();
                    if let Some(cc) = self.class_credit(cls, *dest) {
                        cc.debit()?;
                    }
                    let port = self.noc_port.borrow().as_ref().unwrap().clone();
                    port.ingress_cc().debit()?;
                    trace!(self.entity ; "emit {} to {}", msg, dest);
                    port.ingress().enqueue(msg.clone().into_noc(*dest))?;
                }
                DirCommand::AddCredit(cls) => {
                    if let Some(cc) = self.class_credit(*cls, ctxt.msg.origin) {
                        cc.credit()?;
                    }
                }
                DirCommand::MarkBusy { addr, t } => {
                    self.busy.borrow_mut().insert(*addr, *t);
                }
                DirCommand::ClearBusy { addr } => {
                    self.busy.borrow_mut().remove(addr);
                }
                DirCommand::Consume => {
                    mq.dequeue();
                    self.arb.advance(winner_idx);
                }
                DirCommand::WaitNextEpoch => {}
            }
        }
        Ok(())
    }

    fn with_tstate(&self, t: TransactionId, f: impl FnOnce(&mut DirTState)) -> SimResult {
        if self.tt.with_mut(t, |e| f(&mut e.tstate)).is_none() {
            sim_error!("{}: transaction {t} not found in table", self.entity);
        }
        Ok(())
    }
}

struct MainProcess {
    dir: Rc<DirAgent>,
}

impl Process for MainProcess {
    fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        pc.wait_on(self.dir.arb.request_arrival_event());
        Ok(())
    }

    fn eval(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        let dir = &self.dir;
        let t = dir.arb.tournament();
        if t.deadlock() {
            sim_error!("{}: a protocol deadlock has been detected", dir.entity);
        }
        let Some((idx, mq)) = t.winner() else {
            pc.wait_on(dir.arb.request_arrival_event());
            return Ok(());
        };
        let mq = mq.clone();
        let msg = mq.peek().unwrap();
        let addr = dir.line_addr_of(&msg)?;

        // A CohCmd that must install a line into a full set first recalls a
        // victim; pick one that is stable and not owned by a transaction.
        let recall = if msg.cls() == MessageClass::CohCmd
            && !dir.cache.borrow().hit(addr)
            && dir.cache.borrow().requires_eviction(addr)
        {
            let busy = dir.busy.borrow();
            let victim_addr = {
                let cache = dir.cache.borrow();
                let candidate = cache.victim(addr, |line| dir.protocol.is_stable(line.state));
                candidate.filter(|vaddr| !busy.contains_key(vaddr))
            };
            drop(busy);
            match victim_addr {
                Some(vaddr) => {
                    let victim = dir.cache.borrow().lookup(vaddr).cloned().unwrap();
                    Some(RecallContext {
                        t: dir.tfactory.alloc(),
                        victim_addr: vaddr,
                        victim,
                    })
                }
                None => {
                    // Every candidate is busy; wait behind one of them.
                    // The current transaction addresses a line that is not
                    // resident, so matching on another address in the set
                    // never selects it.
                    let set = dir.cache.borrow().ah().set(addr);
                    let Some(t) = dir.tt.find_key(|e| {
                        e.tstate.addr != addr
                            && dir.cache.borrow().ah().set(e.tstate.addr) == set
                    }) else {
                        sim_error!("{}: full set with no transaction in flight", dir.entity);
                    };
                    dir.tt.with_mut(t, |e| e.blocked_mqs.push(mq.clone()));
                    mq.set_blocked(true);
                    pc.wait_epoch();
                    return Ok(());
                }
            }
        } else {
            None
        };

        let ctxt = DirContext {
            addr,
            line: dir.cache.borrow().lookup(addr).cloned(),
            tstate: dir.tt.with(msg.t, |e| e.tstate.clone()),
            busy_owner: dir.busy.borrow().get(&addr).copied(),
            recall,
            dir_id: dir.id,
            msg,
        };

        let mut cl = DirCommandList::default();
        dir.protocol.apply(&ctxt, &mut cl)?;

        if let Err(shortage) = dir.check_resources(&cl) {
            pc.wait_on(&shortage);
            return Ok(());
        }

        dir.execute(&cl, &ctxt, idx, &mq)?;

        if dir.arb.tournament().winner().is_some() {
            pc.wait_epoch();
        } else {
            pc.wait_on(dir.arb.request_arrival_event());
        }
        Ok(())
    }
}
