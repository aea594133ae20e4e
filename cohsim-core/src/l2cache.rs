// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! The per-cluster shared L2 cache agent.
//!
//! The L2 owns one ACE master toward the cluster's cache controller and is
//! write-through with respect to its L1 children: a writeable line at an L1
//! is always writeable here, and any transition that demotes an L2 line
//! first demotes or invalidates the L1 copies through a back door.
//!
//! ACE grants are applied with priority over snoops so that a snoop never
//! observes a granted line still in transit to this cache.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use std::sync::Arc;

use cohsim_components::arbiter::Arbiter;
use cohsim_components::cache::CacheModel;
use cohsim_components::table::Table;
use cohsim_engine::event::Event;
use cohsim_engine::kernel::Kernel;
use cohsim_engine::process::{Process, ProcessCtrl};
use cohsim_engine::sim_error;
use cohsim_engine::types::{SimError, SimResult};
use cohsim_track::entity::Entity;
use cohsim_track::trace;

use crate::cfgs::L2CacheAgentConfig;
use crate::l1cache::L1CacheAgent;
use crate::mq::MessageQueue;
use crate::msg::{L2CmdOpcode, Message, MessageClass, Payload};
use crate::protocol::L2Protocol;
use crate::types::{Addr, AgentId, State, TransactionId};

/// An L2 line: protocol state plus owner and sharer tracking of the L1
/// copies below.
#[derive(Clone)]
pub struct L2Line {
    /// Protocol state.
    pub state: State,
    /// L1 (by cluster index) holding the line writeable, if any.
    pub owner: Option<usize>,
    /// L1s (by cluster index) holding shared copies.
    pub sharers: BTreeSet<usize>,
}

impl L2Line {
    fn new(state: State) -> Self {
        Self {
            state,
            owner: None,
            sharers: BTreeSet::new(),
        }
    }
}

/// Per-transaction state held by the L2.
pub struct L2TState {
    /// Line address of the transaction.
    pub addr: Addr,
    /// The initiating command opcode.
    pub opcode: L2CmdOpcode,
    /// Index of the requesting L1 within the cluster.
    pub l1: usize,
    blocked_mqs: Vec<Rc<MessageQueue>>,
}

impl L2TState {
    /// A new record for an in-flight transaction.
    #[must_use]
    pub fn new(addr: Addr, opcode: L2CmdOpcode, l1: usize) -> Self {
        Self {
            addr,
            opcode,
            l1,
            blocked_mqs: Vec::new(),
        }
    }
}

/// Read-only view of the transaction record handed to the protocol.
#[derive(Clone, Copy)]
pub struct L2TSnapshot {
    /// Line address of the transaction.
    pub addr: Addr,
    /// The initiating command opcode.
    pub opcode: L2CmdOpcode,
    /// Index of the requesting L1.
    pub l1: usize,
}

/// The context one protocol invocation operates on.
pub struct L2Context {
    /// The head message of the nominated queue.
    pub msg: Message,
    /// Line address the message addresses.
    pub addr: Addr,
    /// Snapshot of the resident line, when present.
    pub line: Option<L2Line>,
    /// Transaction record for `msg.t`, when in flight.
    pub tstate: Option<L2TSnapshot>,
    /// Transaction in flight for the addressed line, if any.
    pub inflight: Option<TransactionId>,
    /// Agent handle of this L2.
    pub l2_id: AgentId,
}

/// The opcodes of the L2 command interpreter.
pub enum L2Command {
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
    /// Record the L1 owner of a line.
    SetOwner {
        /// Line address.
        addr: Addr,
        /// Owning L1 index.
        l1: usize,
    },
    /// Clear the L1 owner of a line.
    DelOwner {
        /// Line address.
        addr: Addr,
    },
    /// Add an L1 to a line's sharer set.
    AddSharer {
        /// Line address.
        addr: Addr,
        /// Sharer L1 index.
        l1: usize,
    },
    /// Issue a response to one of the L1s.
    IssueL1Rsp {
        /// Target L1 index.
        l1: usize,
        /// The response.
        msg: Message,
    },
    /// Issue an ACE command to the cache controller.
    IssueAceCmd(Message),
    /// Issue an ACE snoop response to the cache controller.
    IssueSnpRsp(Message),
    /// Demote every L1 copy of a line to Shared through the back door.
    SetL1LinesShared {
        /// Line address.
        addr: Addr,
        /// L1 to exclude (typically the requester).
        except: Option<usize>,
    },
    /// Invalidate every L1 copy of a line through the back door.
    SetL1LinesInvalid {
        /// Line address.
        addr: Addr,
        /// L1 to exclude (typically the requester).
        except: Option<usize>,
    },
    /// Install a transaction record keyed by the current message.
    StartTransaction(L2TState),
    /// Retire the current message's transaction and unblock its waiters.
    EndTransaction,
    /// Block the nominated queue until the given transaction completes.
    BlockOnTransaction(TransactionId),
    /// Consume the head message of the nominated queue.
    Consume,
    /// Re-evaluate after an epoch has elapsed.
    WaitNextEpoch,
}

/// A linear program of [`L2Command`]s.
#[derive(Default)]
pub struct L2CommandList {
    cmds: Vec<L2Command>,
}

impl L2CommandList {
    /// Append a command.
    pub fn push(&mut self, cmd: L2Command) {
        self.cmds.push(cmd);
    }

    /// Iterate the program.
    pub fn iter(&self) -> std::slice::Iter<'_, L2Command> {
        self.cmds.iter()
    }
}

#[derive(Default)]
struct L2Resources {
    tt_entry_n: usize,
    ace_cmd_n: usize,
    snprsp_n: usize,
    l1_rsp_n: HashMap<usize, usize>,
}

impl L2Resources {
    fn build(cl: &L2CommandList) -> Self {
        let mut r = Self::default();
        for cmd in cl.iter() {
            match cmd {
                L2Command::IssueL1Rsp { l1, .. } => *r.l1_rsp_n.entry(*l1).or_default() += 1,
                L2Command::IssueAceCmd(_) => r.ace_cmd_n += 1,
                L2Command::IssueSnpRsp(_) => r.snprsp_n += 1,
                L2Command::StartTransaction(_) => r.tt_entry_n += 1,
                _ => {}
            }
        }
        r
    }
}

const RSP_QI: usize = 0;

/// Per-cluster cache and ACE master; write-through toward its L1s.
pub struct L2CacheAgent {
    entity: Arc<Entity>,
    id: AgentId,

    /// CC to L2 ACE response queue (L2 owned). Applied with priority.
    cc_l2__rsp_q: Rc<MessageQueue>,
    /// CC to L2 snoop queue (L2 owned).
    cc_l2__snp_q: Rc<MessageQueue>,
    /// Per-L1 command queues (L2 owned).
    l1_l2__cmd_qs: Vec<Rc<MessageQueue>>,
    arb: Arbiter<MessageQueue>,

    /// Per-L1 response queues (L1 owned, bound at elaboration).
    l2_l1__rsp_qs: RefCell<Vec<Rc<MessageQueue>>>,
    /// L2 to CC ACE command queue (CC owned, bound at elaboration).
    l2_cc__cmd_q: RefCell<Option<Rc<MessageQueue>>>,
    /// L2 to CC snoop response queue (CC owned, bound at elaboration).
    l2_cc__snprsp_q: RefCell<Option<Rc<MessageQueue>>>,

    cache: RefCell<CacheModel<L2Line>>,
    tt: Table<TransactionId, L2TState>,
    protocol: Box<dyn L2Protocol>,

    l1caches: RefCell<Vec<Rc<L1CacheAgent>>>,
}

impl L2CacheAgent {
    /// Construct the agent and register its main process.
    pub fn new_and_register(
        kernel: &Kernel,
        parent: &Arc<Entity>,
        id: AgentId,
        l1_n: usize,
        config: &L2CacheAgentConfig,
        protocol: Box<dyn L2Protocol>,
    ) -> Result<Rc<Self>, SimError> {
        let entity = Arc::new(Entity::new(parent, config.name.as_str()));
        let cc_l2__rsp_q = MessageQueue::new(kernel, &entity, "cc_l2__rsp_q", config.cc_l2__rsp_n);
        let cc_l2__snp_q = MessageQueue::new(kernel, &entity, "cc_l2__snp_q", config.cc_l2__snp_n);
        let l1_l2__cmd_qs: Vec<Rc<MessageQueue>> = (0..l1_n)
            .map(|i| {
                MessageQueue::new(
                    kernel,
                    &entity,
                    format!("l1_l2__cmd_q{i}").as_str(),
                    config.l1_l2__cmd_n,
                )
            })
            .collect();

        let arb = Arbiter::new(kernel, &entity, "arb");
        arb.add_requester(cc_l2__rsp_q.clone());
        arb.add_requester(cc_l2__snp_q.clone());
        for q in &l1_l2__cmd_qs {
            arb.add_requester(q.clone());
        }

        let cache = CacheModel::new(&config.cconfig.geometry())?;
        let tt = Table::new(kernel, &entity, "tt", config.tt_entries_n);

        let l2 = Rc::new(Self {
            entity,
            id,
            cc_l2__rsp_q,
            cc_l2__snp_q,
            l1_l2__cmd_qs,
            arb,
            l2_l1__rsp_qs: RefCell::new(Vec::new()),
            l2_cc__cmd_q: RefCell::new(None),
            l2_cc__snprsp_q: RefCell::new(None),
            cache: RefCell::new(cache),
            tt,
            protocol,
            l1caches: RefCell::new(Vec::new()),
        });

        let main_entity = Arc::new(Entity::new(&l2.entity, "main"));
        kernel.add_process(
            &main_entity,
            config.epoch,
            Rc::new(RefCell::new(MainProcess { l2: l2.clone() })),
        );
        Ok(l2)
    }

    /// The agent handle.
    #[must_use]
    pub fn id(&self) -> AgentId {
        self.id
    }

    /// The command queue serving L1 `i` (L2 owned).
    #[must_use]
    pub fn l1_l2__cmd_q(&self, i: usize) -> Rc<MessageQueue> {
        self.l1_l2__cmd_qs[i].clone()
    }

    /// The ACE response queue (L2 owned).
    #[must_use]
    pub fn cc_l2__rsp_q(&self) -> Rc<MessageQueue> {
        self.cc_l2__rsp_q.clone()
    }

    /// The snoop queue (L2 owned).
    #[must_use]
    pub fn cc_l2__snp_q(&self) -> Rc<MessageQueue> {
        self.cc_l2__snp_q.clone()
    }

    /// Bind the per-L1 response queues (Elaboration-Phase only).
    pub fn set_l2_l1__rsp_qs(&self, qs: Vec<Rc<MessageQueue>>) {
        *self.l2_l1__rsp_qs.borrow_mut() = qs;
    }

    /// Bind the ACE command queue (Elaboration-Phase only).
    pub fn set_l2_cc__cmd_q(&self, mq: Rc<MessageQueue>) {
        *self.l2_cc__cmd_q.borrow_mut() = Some(mq);
    }

    /// Bind the snoop response queue (Elaboration-Phase only).
    pub fn set_l2_cc__snprsp_q(&self, mq: Rc<MessageQueue>) {
        *self.l2_cc__snprsp_q.borrow_mut() = Some(mq);
    }

    /// Set the child L1s (Elaboration-Phase only).
    pub fn set_l1caches(&self, l1s: Vec<Rc<L1CacheAgent>>) {
        *self.l1caches.borrow_mut() = l1s;
    }

    /// Elaboration phase.
    pub fn elab(&self) -> SimResult {
        self.arb.elab()
    }

    /// Design-rule check.
    pub fn drc(&self) -> SimResult {
        if self.l2_cc__cmd_q.borrow().is_none() {
            sim_error!("{}: ACE command queue has not been bound", self.entity);
        }
        if self.l2_cc__snprsp_q.borrow().is_none() {
            sim_error!("{}: snoop response queue has not been bound", self.entity);
        }
        if self.l2_l1__rsp_qs.borrow().len() != self.l1_l2__cmd_qs.len() {
            sim_error!("{}: L1 response queues have not been bound", self.entity);
        }
        if self.l1caches.borrow().len() != self.l1_l2__cmd_qs.len() {
            sim_error!("{}: child L1s have not been bound", self.entity);
        }
        Ok(())
    }

    /// Number of in-flight transactions; zero at end of simulation.
    #[must_use]
    pub fn outstanding_n(&self) -> usize {
        self.tt.len()
    }

    /// State name of the resident line containing `addr`, for checkers.
    #[must_use]
    pub fn line_state(&self, addr: Addr) -> Option<&'static str> {
        let cache = self.cache.borrow();
        let base = cache.ah().line_base(addr);
        cache
            .lookup(base)
            .map(|line| self.protocol.state_name(line.state))
    }

    /// True when the resident line containing `addr` is writeable.
    #[must_use]
    pub fn is_writeable(&self, addr: Addr) -> bool {
        let cache = self.cache.borrow();
        let base = cache.ah().line_base(addr);
        cache
            .lookup(base)
            .is_some_and(|line| self.protocol.is_writeable(line.state))
    }

    /// True when the resident line containing `addr` is readable.
    #[must_use]
    pub fn is_readable(&self, addr: Addr) -> bool {
        let cache = self.cache.borrow();
        let base = cache.ah().line_base(addr);
        cache
            .lookup(base)
            .is_some_and(|line| self.protocol.is_readable(line.state))
    }

    /// "Back-door" store promotion: an L1 store to an Exclusive line
    /// promotes the L2 copy to Modified.
    pub fn set_line_modified(&self, addr: Addr) -> SimResult {
        let mut cache = self.cache.borrow_mut();
        let base = cache.ah().line_base(addr);
        let Some(line) = cache.lookup_mut(base) else {
            sim_error!("{}: modified promotion of absent line {addr:#x}", self.entity);
        };
        line.state = self.protocol.set_modified(line.state)?;
        Ok(())
    }

    fn line_addr_of(&self, msg: &Message) -> Result<Addr, SimError> {
        let ah = *self.cache.borrow().ah();
        match &msg.payload {
            Payload::L2Cmd { addr, .. } | Payload::AceSnp { addr, .. } => Ok(ah.line_base(*addr)),
            Payload::AceCmdRsp { .. } => match self.tt.with(msg.t, |ts| ts.addr) {
                Some(addr) => Ok(addr),
                None => Err(SimError(format!(
                    "{}: transaction not found in table: {}",
                    self.entity, msg
                ))),
            },
            _ => Err(SimError(format!(
                "{}: invalid message class received: {}",
                self.entity, msg
            ))),
        }
    }

    fn check_resources(&self, r: &L2Resources) -> Result<(), Event> {
        if !self.tt.has_at_least(r.tt_entry_n) {
            return Err(self.tt.non_full_event().clone());
        }
        let cmd_q = self.l2_cc__cmd_q.borrow().as_ref().unwrap().clone();
        if cmd_q.free() < r.ace_cmd_n {
            return Err(cmd_q.non_full_event().clone());
        }
        let snprsp_q = self.l2_cc__snprsp_q.borrow().as_ref().unwrap().clone();
        if snprsp_q.free() < r.snprsp_n {
            return Err(snprsp_q.non_full_event().clone());
        }
        for (l1, n) in &r.l1_rsp_n {
            let q = self.l2_l1__rsp_qs.borrow()[*l1].clone();
            if q.free() < *n {
                return Err(q.non_full_event().clone());
            }
        }
        Ok(())
    }

    fn demote_l1_lines(&self, addr: Addr, shared: bool, except: Option<usize>) -> SimResult {
        let holders: Vec<usize> = {
            let cache = self.cache.borrow();
            match cache.lookup(addr) {
                Some(line) => line
                    .sharers
                    .iter()
                    .copied()
                    .chain(line.owner)
                    .filter(|i| Some(*i) != except)
                    .collect(),
                None => Vec::new(),
            }
        };
        for i in holders {
            self.l1caches.borrow()[i].set_cache_line_shared_or_invalid(addr, shared)?;
        }
        // Track the resulting L1 states on the line itself.
        let mut cache = self.cache.borrow_mut();
        if let Some(line) = cache.lookup_mut(addr) {
            if shared {
                if let Some(owner) = line.owner.take() {
                    if Some(owner) != except {
                        line.sharers.insert(owner);
                    } else {
                        line.owner = Some(owner);
                    }
                }
            } else {
                line.sharers.retain(|i| Some(*i) == except);
                if line.owner.is_some() && line.owner != except {
                    line.owner = None;
                }
            }
        }
        Ok(())
    }

    fn execute(
        &self,
        cl: &L2CommandList,
        ctxt: &L2Context,
        winner_idx: usize,
        mq: &Rc<MessageQueue>,
    ) -> SimResult {
        for cmd in cl.iter() {
            match cmd {
                L2Command::InstallLine { addr, state } => {
                    self.cache.borrow_mut().install(*addr, L2Line::new(*state))?;
                }
                L2Command::UpdateState { addr, state } => {
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
                L2Command::RemoveLine { addr } => {
                    self.cache.borrow_mut().remove(*addr);
                }
                L2Command::SetOwner { addr, l1 } => {
                    let mut cache = self.cache.borrow_mut();
                    if let Some(line) = cache.lookup_mut(*addr) {
                        line.owner = Some(*l1);
                        line.sharers.remove(l1);
                    }
                }
                L2Command::DelOwner { addr } => {
                    let mut cache = self.cache.borrow_mut();
                    if let Some(line) = cache.lookup_mut(*addr) {
                        line.owner = None;
                    }
                }
                L2Command::AddSharer { addr, l1 } => {
                    let mut cache = self.cache.borrow_mut();
                    if let Some(line) = cache.lookup_mut(*addr) {
                        line.sharers.insert(*l1);
                    }
                }
                L2Command::IssueL1Rsp { l1, msg } => {
                    let q = self.l2_l1__rsp_qs.borrow()[*l1].clone();
                    q.enqueue(msg.clone())?;
                }
                L2Command::IssueAceCmd(msg) => {
                    let q = self.l2_cc__cmd_q.borrow().as_ref().unwrap().clone();
                    q.enqueue(msg.clone())?;
                }
                L2Command::IssueSnpRsp(msg) => {
                    let q = self.l2_cc__snprsp_q.borrow().as_ref().unwrap().clone();
                    q.enqueue(msg.clone())?;
                }
                L2Command::SetL1LinesShared { addr, except } => {
                    self.demote_l1_lines(*addr, true, *except)?;
                }
                L2Command::SetL1LinesInvalid { addr, except } => {
                    self.demote_l1_lines(*addr, false, *except)?;
                }
                L2Command::StartTransaction(tstate) => {
                    self.tt.install(
                        ctxt.msg.t,
                        L2TState {
                            addr: tstate.addr,
                            opcode: tstate.opcode,
                            l1: tstate.l1,
                            blocked_mqs: Vec::new(),
                        },
                    )?;
                }
                L2Command::EndTransaction => {
                    let Some(tstate) = self.tt.remove(ctxt.msg.t) else {
                        sim_error!(
                            "{}: end of transaction not found in table: {}",
                            self.entity,
                            ctxt.msg
                        );
                    };
                    for blocked in &tstate.blocked_mqs {
                        blocked.unblock();
                    }
                }
                L2Command::BlockOnTransaction(t) => {
                    if self
                        .tt
                        .with_mut(*t, |ts| ts.blocked_mqs.push(mq.clone()))
                        .is_none()
                    {
                        sim_error!("{}: block on unknown transaction {t}", self.entity);
                    }
                    mq.set_blocked(true);
                }
                L2Command::Consume => {
                    mq.dequeue();
                    self.arb.advance(winner_idx);
                }
                L2Command::WaitNextEpoch => {}
            }
        }
        Ok(())
    }
}

struct MainProcess {
    l2: Rc<L2CacheAgent>,
}

impl Process for MainProcess {
    fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        pc.wait_on(self.l2.arb.request_arrival_event());
        Ok(())
    }

    fn eval(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        let l2 = &self.l2;

        // Grants first: an ACE response pending in the queue is applied
        // before any snoop so a snoop never sees a grant still in transit.
        let (idx, mq) = if !l2.cc_l2__rsp_q.empty() {
            (RSP_QI, l2.cc_l2__rsp_q.clone())
        } else {
            let t = l2.arb.tournament();
            if t.deadlock() {
                sim_error!("{}: a protocol deadlock has been detected", l2.entity);
            }
            let Some((idx, mq)) = t.winner() else {
                pc.wait_on(l2.arb.request_arrival_event());
                return Ok(());
            };
            (idx, mq.clone())
        };
        let msg = mq.peek().unwrap();
        let addr = l2.line_addr_of(&msg)?;

        // Install of a missing line may first displace a victim.
        if msg.cls() == MessageClass::L2Cmd && !l2.cache.borrow().hit(addr) {
            let requires_eviction = l2.cache.borrow().requires_eviction(addr);
            if requires_eviction {
                let victim = l2
                    .cache
                    .borrow()
                    .victim(addr, |line| l2.protocol.is_stable(line.state));
                match victim {
                    Some(vaddr) => {
                        let line = l2.cache.borrow().lookup(vaddr).cloned();
                        let vctxt = L2Context {
                            msg: msg.clone(),
                            addr: vaddr,
                            line,
                            tstate: None,
                            inflight: None,
                            l2_id: l2.id,
                        };
                        let mut cl = L2CommandList::default();
                        l2.protocol.evict(&vctxt, &mut cl)?;
                        l2.execute(&cl, &vctxt, idx, &mq)?;
                    }
                    None => {
                        let set = l2.cache.borrow().ah().set(addr);
                        let Some(t) = l2
                            .tt
                            .find_key(|ts| l2.cache.borrow().ah().set(ts.addr) == set)
                        else {
                            sim_error!("{}: full set with no transaction in flight", l2.entity);
                        };
                        l2.tt.with_mut(t, |ts| ts.blocked_mqs.push(mq.clone()));
                        mq.set_blocked(true);
                        pc.wait_epoch();
                        return Ok(());
                    }
                }
            }
        }

        let ctxt = L2Context {
            addr,
            line: l2.cache.borrow().lookup(addr).cloned(),
            tstate: l2.tt.with(msg.t, |ts| L2TSnapshot {
                addr: ts.addr,
                opcode: ts.opcode,
                l1: ts.l1,
            }),
            inflight: l2.tt.find_key(|ts| ts.addr == addr),
            l2_id: l2.id,
            msg,
        };

        let mut cl = L2CommandList::default();
        l2.protocol.apply(&ctxt, &mut cl)?;

        let resources = L2Resources::build(&cl);
        if let Err(shortage) = l2.check_resources(&resources) {
            pc.wait_on(&shortage);
            return Ok(());
        }

        l2.execute(&cl, &ctxt, idx, &mq)?;

        if !l2.cc_l2__rsp_q.empty() || l2.arb.tournament().winner().is_some() {
            pc.wait_epoch();
        } else {
            pc.wait_on(l2.arb.request_arrival_event());
        }
        Ok(())
    }
}
