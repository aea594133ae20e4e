// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! The private L1 cache agent.
//!
//! Three ingress queues (CPU commands, L2 responses and an internal replay
//! queue) feed a round-robin arbiter. The head message of the winning queue
//! goes through the protocol's `apply`, which emits a linear command list;
//! the interpreter first totals the resources the list needs in each
//! downstream queue and table and, on any shortage, leaves the message
//! unconsumed and blocks the process on the shortage's non-full event. This
//! is the sole backpressure mechanism.
//!
//! A command that addresses a line with a transaction already in flight is
//! parked in the replay queue, which stays blocked until that transaction
//! ends.

use std::cell::RefCell;
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

use crate::cfgs::L1CacheAgentConfig;
use crate::l2cache::L2CacheAgent;
use crate::monitor::{L1CacheEvent, Monitor};
use crate::mq::MessageQueue;
use crate::msg::{CpuOpcode, Message, MessageClass, Payload};
use crate::protocol::L1Protocol;
use crate::types::{Addr, AgentId, State, TransactionId};

/// Per-transaction state held by the L1.
pub struct L1TState {
    /// Line address of the transaction.
    pub addr: Addr,
    /// The initiating CPU opcode.
    pub opcode: CpuOpcode,
    /// Demotion requested by the L2 while the grant was in flight; applied
    /// when the transaction ends.
    pub demote_pending: Option<bool>,
    /// Queues blocked until this transaction completes.
    blocked_mqs: Vec<Rc<MessageQueue>>,
}

impl L1TState {
    /// A new record for an in-flight transaction.
    #[must_use]
    pub fn new(addr: Addr, opcode: CpuOpcode) -> Self {
        Self {
            addr,
            opcode,
            demote_pending: None,
            blocked_mqs: Vec::new(),
        }
    }
}

/// Read-only view of the transaction record handed to the protocol.
#[derive(Clone, Copy)]
pub struct L1TSnapshot {
    /// Line address of the transaction.
    pub addr: Addr,
    /// The initiating CPU opcode.
    pub opcode: CpuOpcode,
}

/// The context one protocol invocation operates on.
pub struct L1Context {
    /// The head message of the nominated queue.
    pub msg: Message,
    /// Line address the message addresses.
    pub addr: Addr,
    /// Current line state, when resident.
    pub state: Option<State>,
    /// Transaction record, when one is in flight for `msg.t`.
    pub tstate: Option<L1TSnapshot>,
    /// Index of this L1 (and its CPU) within the cluster.
    pub cpu_index: usize,
    /// Agent handle of this L1.
    pub l1_id: AgentId,
    /// The nominated queue is the replay queue.
    pub from_replay: bool,
}

/// The opcodes of the L1 command interpreter.
pub enum L1Command {
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
    /// Issue a response to the CPU.
    IssueCpuRsp(Message),
    /// Issue a command to the L2.
    IssueL2Cmd(Message),
    /// Install a transaction record keyed by the current message.
    StartTransaction(L1TState),
    /// Retire the current message's transaction and unblock its waiters.
    EndTransaction,
    /// Park the head message in the replay queue, blocked on the in-flight
    /// transaction to the same line.
    MoveToReplay,
    /// Raise a cache event toward the monitors.
    RaiseEvent(L1CacheEvent, Addr),
    /// Promote the corresponding L2 line to Modified (store promotion).
    SetL2LineModified {
        /// Line address.
        addr: Addr,
    },
    /// Consume the head message of the nominated queue.
    Consume,
    /// Re-evaluate after an epoch has elapsed.
    WaitNextEpoch,
}

/// A linear program of [`L1Command`]s, applied atomically with respect to
/// the outside world.
#[derive(Default)]
pub struct L1CommandList {
    cmds: Vec<L1Command>,
}

impl L1CommandList {
    /// Append a command.
    pub fn push(&mut self, cmd: L1Command) {
        self.cmds.push(cmd);
    }

    /// Iterate the program.
    pub fn iter(&self) -> std::slice::Iter<'_, L1Command> {
        self.cmds.iter()
    }
}

/// Resource requirements of a tentative command list.
#[derive(Default)]
struct L1Resources {
    tt_entry_n: usize,
    l2_cmd_n: usize,
    cpu_rsp_n: usize,
    replay_n: usize,
}

impl L1Resources {
    fn build(cl: &L1CommandList, from_replay: bool) -> Self {
        let mut r = Self::default();
        for cmd in cl.iter() {
            match cmd {
                L1Command::IssueCpuRsp(_) => r.cpu_rsp_n += 1,
                L1Command::IssueL2Cmd(_) => r.l2_cmd_n += 1,
                L1Command::StartTransaction(_) => r.tt_entry_n += 1,
                // Re-parking from the replay queue frees its own slot.
                L1Command::MoveToReplay if !from_replay => r.replay_n += 1,
                _ => {}
            }
        }
        r
    }
}

/// Arbiter index of the replay queue; parked messages re-enter from it.
const REPLAY_QI: usize = 2;

/// Private cache plus the CPU-facing protocol state machine.
pub struct L1CacheAgent {
    entity: Arc<Entity>,
    id: AgentId,
    cpu_index: usize,

    /// CPU to L1 command queue (L1 owned).
    cpu_l1__cmd_q: Rc<MessageQueue>,
    /// L2 to L1 response queue (L1 owned).
    l2_l1__rsp_q: Rc<MessageQueue>,
    /// Replay queue (internal).
    replay__cmd_q: Rc<MessageQueue>,
    arb: Arbiter<MessageQueue>,

    /// L1 to L2 command queue (L2 owned, bound at elaboration).
    l1_l2__cmd_q: RefCell<Option<Rc<MessageQueue>>>,
    /// L1 to CPU response queue (CPU owned, bound at elaboration).
    l1_cpu__rsp_q: RefCell<Option<Rc<MessageQueue>>>,

    cache: RefCell<CacheModel<State>>,
    tt: Table<TransactionId, L1TState>,
    protocol: Box<dyn L1Protocol>,

    /// Parent L2, for the write-through back door.
    l2cache: RefCell<Option<Rc<L2CacheAgent>>>,
    monitors: RefCell<Vec<Rc<dyn Monitor>>>,
}

impl L1CacheAgent {
    /// Construct the agent and register its main process.
    pub fn new_and_register(
        kernel: &Kernel,
        parent: &Arc<Entity>,
        id: AgentId,
        cpu_index: usize,
        config: &L1CacheAgentConfig,
        protocol: Box<dyn L1Protocol>,
    ) -> Result<Rc<Self>, SimError> {
        let entity = Arc::new(Entity::new(parent, config.name.as_str()));
        let cpu_l1__cmd_q = MessageQueue::new(kernel, &entity, "cpu_l1__cmd_q", config.cpu_l1__cmd_n);
        let l2_l1__rsp_q = MessageQueue::new(kernel, &entity, "l2_l1__rsp_q", config.l2_l1__rsp_n);
        let replay__cmd_q = MessageQueue::new(kernel, &entity, "replay__cmd_q", config.replay_n);

        let arb = Arbiter::new(kernel, &entity, "arb");
        arb.add_requester(cpu_l1__cmd_q.clone());
        arb.add_requester(l2_l1__rsp_q.clone());
        arb.add_requester(replay__cmd_q.clone());

        let cache = CacheModel::new(&config.cconfig.geometry())?;
        let tt = Table::new(kernel, &entity, "tt", config.tt_entries_n);

        let l1 = Rc::new(Self {
            entity,
            id,
            cpu_index,
            cpu_l1__cmd_q,
            l2_l1__rsp_q,
            replay__cmd_q,
            arb,
            l1_l2__cmd_q: RefCell::new(None),
            l1_cpu__rsp_q: RefCell::new(None),
            cache: RefCell::new(cache),
            tt,
            protocol,
            l2cache: RefCell::new(None),
            monitors: RefCell::new(Vec::new()),
        });

        let main_entity = Arc::new(Entity::new(&l1.entity, "main"));
        kernel.add_process(
            &main_entity,
            config.epoch,
            Rc::new(RefCell::new(MainProcess { l1: l1.clone() })),
        );
        Ok(l1)
    }

    /// The agent handle.
    #[must_use]
    pub fn id(&self) -> AgentId {
        self.id
    }

    /// The CPU to L1 command queue (L1 owned).
    #[must_use]
    pub fn cpu_l1__cmd_q(&self) -> Rc<MessageQueue> {
        self.cpu_l1__cmd_q.clone()
    }

    /// The L2 to L1 response queue (L1 owned).
    #[must_use]
    pub fn l2_l1__rsp_q(&self) -> Rc<MessageQueue> {
        self.l2_l1__rsp_q.clone()
    }

    /// Bind the L1 to L2 command queue (Elaboration-Phase only).
    pub fn set_l1_l2__cmd_q(&self, mq: Rc<MessageQueue>) {
        *self.l1_l2__cmd_q.borrow_mut() = Some(mq);
    }

    /// Bind the L1 to CPU response queue (Elaboration-Phase only).
    pub fn set_l1_cpu__rsp_q(&self, mq: Rc<MessageQueue>) {
        *self.l1_cpu__rsp_q.borrow_mut() = Some(mq);
    }

    /// Set the parent L2 (Elaboration-Phase only).
    pub fn set_l2cache(&self, l2: Rc<L2CacheAgent>) {
        *self.l2cache.borrow_mut() = Some(l2);
    }

    /// Attach a monitor sink.
    pub fn register_monitor(&self, monitor: Rc<dyn Monitor>) {
        self.monitors.borrow_mut().push(monitor);
    }

    /// Elaboration phase.
    pub fn elab(&self) -> SimResult {
        self.arb.elab()
    }

    /// Design-rule check.
    pub fn drc(&self) -> SimResult {
        if self.l1_l2__cmd_q.borrow().is_none() {
            sim_error!("{}: L1 to L2 command queue has not been bound", self.entity);
        }
        if self.l1_cpu__rsp_q.borrow().is_none() {
            sim_error!("{}: L1 to CPU response queue has not been bound", self.entity);
        }
        if self.l2cache.borrow().is_none() {
            sim_error!("{}: parent L2 has not been bound", self.entity);
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
        cache.lookup(base).map(|s| self.protocol.state_name(*s))
    }

    /// True when the resident line containing `addr` is writeable.
    #[must_use]
    pub fn is_writeable(&self, addr: Addr) -> bool {
        let cache = self.cache.borrow();
        let base = cache.ah().line_base(addr);
        cache
            .lookup(base)
            .is_some_and(|s| self.protocol.is_writeable(*s))
    }

    /// True when the resident line containing `addr` is readable.
    #[must_use]
    pub fn is_readable(&self, addr: Addr) -> bool {
        let cache = self.cache.borrow();
        let base = cache.ah().line_base(addr);
        cache
            .lookup(base)
            .is_some_and(|s| self.protocol.is_readable(*s))
    }

    /// "Back-door" write-through method: demote the line at `addr` to
    /// either Shared or Invalid on an L2-initiated demotion.
    ///
    /// When the line's grant is still in flight the demotion is recorded on
    /// the transaction and applied as it ends.
    pub fn set_cache_line_shared_or_invalid(&self, addr: Addr, shared: bool) -> SimResult {
        let base = self.cache.borrow().ah().line_base(addr);
        let resident_stable = {
            let cache = self.cache.borrow();
            cache.lookup(base).map(|s| self.protocol.is_stable(*s))
        };
        match resident_stable {
            Some(true) => {
                if shared {
                    let mut cache = self.cache.borrow_mut();
                    let state = cache.lookup_mut(base).unwrap();
                    *state = self.protocol.demote(*state, true);
                } else {
                    self.cache.borrow_mut().remove(base);
                    self.raise_event(L1CacheEvent::InvalidateLine, base);
                }
                Ok(())
            }
            _ => {
                // Not resident or in transit; defer to transaction end.
                if let Some(t) = self.tt.find_key(|ts| ts.addr == base) {
                    self.tt.with_mut(t, |ts| {
                        ts.demote_pending =
                            Some(shared && ts.demote_pending.unwrap_or(true));
                    });
                }
                Ok(())
            }
        }
    }

    fn raise_event(&self, event: L1CacheEvent, addr: Addr) {
        for monitor in self.monitors.borrow().iter() {
            monitor.cache_event(self.id, event, addr);
        }
    }

    /// The line address the head message addresses; responses recover it
    /// from the transaction table.
    fn line_addr_of(&self, msg: &Message) -> Result<Addr, SimError> {
        let ah = *self.cache.borrow().ah();
        match &msg.payload {
            Payload::CpuCmd { addr, .. } => Ok(ah.line_base(*addr)),
            Payload::L2CmdRsp { .. } => match self.tt.with(msg.t, |ts| ts.addr) {
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

    fn check_resources(&self, r: &L1Resources) -> Result<(), Event> {
        if !self.tt.has_at_least(r.tt_entry_n) {
            return Err(self.tt.non_full_event().clone());
        }
        let l2_cmd_q = self.l1_l2__cmd_q.borrow().as_ref().unwrap().clone();
        if l2_cmd_q.free() < r.l2_cmd_n {
            return Err(l2_cmd_q.non_full_event().clone());
        }
        let cpu_rsp_q = self.l1_cpu__rsp_q.borrow().as_ref().unwrap().clone();
        if cpu_rsp_q.free() < r.cpu_rsp_n {
            return Err(cpu_rsp_q.non_full_event().clone());
        }
        if self.replay__cmd_q.free() < r.replay_n {
            return Err(self.replay__cmd_q.non_full_event().clone());
        }
        Ok(())
    }

    fn execute(
        &self,
        cl: &L1CommandList,
        ctxt: &L1Context,
        winner_idx: usize,
        mq: &Rc<MessageQueue>,
    ) -> SimResult {
        for cmd in cl.iter() {
            match cmd {
                L1Command::InstallLine { addr, state } => {
                    self.cache.borrow_mut().install(*addr, *state)?;
                }
                L1Command::UpdateState { addr, state } => {
                    let mut cache = self.cache.borrow_mut();
                    let Some(s) = cache.lookup_mut(*addr) else {
                        sim_error!("{}: state update of absent line {addr:#x}", self.entity);
                    };
                    trace!(self.entity ; "line {:#x}: {} -> {}",
                        addr, self.protocol.state_name(*s), self.protocol.state_name(*state));
                    *s = *state;
                }
                L1Command::RemoveLine { addr } => {
                    self.cache.borrow_mut().remove(*addr);
                }
                L1Command::IssueCpuRsp(msg) => {
                    let q = self.l1_cpu__rsp_q.borrow().as_ref().unwrap().clone();
                    q.enqueue(msg.clone())?;
                }
                L1Command::IssueL2Cmd(msg) => {
                    let q = self.l1_l2__cmd_q.borrow().as_ref().unwrap().clone();
                    q.enqueue(msg.clone())?;
                }
                L1Command::StartTransaction(tstate) => {
                    self.tt.install(
                        ctxt.msg.t,
                        L1TState {
                            addr: tstate.addr,
                            opcode: tstate.opcode,
                            demote_pending: None,
                            blocked_mqs: Vec::new(),
                        },
                    )?;
                }
                L1Command::EndTransaction => {
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
                    if let Some(shared) = tstate.demote_pending {
                        self.set_cache_line_shared_or_invalid(tstate.addr, shared)?;
                    }
                }
                L1Command::MoveToReplay => {
                    let msg = mq.dequeue().unwrap();
                    self.arb.advance(winner_idx);
                    let Some(t) = self.tt.find_key(|ts| ts.addr == ctxt.addr) else {
                        sim_error!(
                            "{}: no transaction in flight for parked line {:#x}",
                            self.entity,
                            ctxt.addr
                        );
                    };
                    trace!(self.entity ; "park {} on {}", msg, t);
                    self.replay__cmd_q.enqueue(msg)?;
                    self.tt
                        .with_mut(t, |ts| ts.blocked_mqs.push(self.replay__cmd_q.clone()));
                    self.replay__cmd_q.set_blocked(true);
                }
                L1Command::RaiseEvent(event, addr) => {
                    self.raise_event(*event, *addr);
                }
                L1Command::SetL2LineModified { addr } => {
                    let l2 = self.l2cache.borrow().as_ref().unwrap().clone();
                    l2.set_line_modified(*addr)?;
                }
                L1Command::Consume => {
                    mq.dequeue();
                    self.arb.advance(winner_idx);
                }
                L1Command::WaitNextEpoch => {}
            }
        }
        Ok(())
    }
}

struct MainProcess {
    l1: Rc<L1CacheAgent>,
}

impl Process for MainProcess {
    fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        pc.wait_on(self.l1.arb.request_arrival_event());
        Ok(())
    }

    fn eval(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        let l1 = &self.l1;
        let t = l1.arb.tournament();
        if t.deadlock() {
            sim_error!("{}: a protocol deadlock has been detected", l1.entity);
        }
        let Some((idx, mq)) = t.winner() else {
            pc.wait_on(l1.arb.request_arrival_event());
            return Ok(());
        };
        let mq = mq.clone();
        let msg = mq.peek().unwrap();
        let addr = l1.line_addr_of(&msg)?;

        // Install of a missing line may first displace a victim.
        if msg.cls() == MessageClass::CpuCmd && !l1.cache.borrow().hit(addr) {
            let requires_eviction = l1.cache.borrow().requires_eviction(addr);
            if requires_eviction {
                let victim = l1
                    .cache
                    .borrow()
                    .victim(addr, |s| l1.protocol.is_stable(*s));
                match victim {
                    Some(vaddr) => {
                        let state = l1.cache.borrow().lookup(vaddr).copied();
                        let vctxt = L1Context {
                            msg: msg.clone(),
                            addr: vaddr,
                            state,
                            tstate: None,
                            cpu_index: l1.cpu_index,
                            l1_id: l1.id,
                            from_replay: idx == REPLAY_QI,
                        };
                        let mut cl = L1CommandList::default();
                        l1.protocol.evict(&vctxt, &mut cl)?;
                        l1.execute(&cl, &vctxt, idx, &mq)?;
                    }
                    None => {
                        // Every way is in transit; wait behind one of the
                        // set's transactions.
                        let set = l1.cache.borrow().ah().set(addr);
                        let Some(t) = l1
                            .tt
                            .find_key(|ts| l1.cache.borrow().ah().set(ts.addr) == set)
                        else {
                            sim_error!(
                                "{}: full set with no transaction in flight",
                                l1.entity
                            );
                        };
                        l1.tt.with_mut(t, |ts| ts.blocked_mqs.push(mq.clone()));
                        mq.set_blocked(true);
                        pc.wait_epoch();
                        return Ok(());
                    }
                }
            }
        }

        let ctxt = L1Context {
            addr,
            state: l1.cache.borrow().lookup(addr).copied(),
            tstate: l1.tt.with(msg.t, |ts| L1TSnapshot {
                addr: ts.addr,
                opcode: ts.opcode,
            }),
            cpu_index: l1.cpu_index,
            l1_id: l1.id,
            from_replay: idx == REPLAY_QI,
            msg,
        };

        let mut cl = L1CommandList::default();
        l1.protocol.apply(&ctxt, &mut cl)?;

        let resources = L1Resources::build(&cl, ctxt.from_replay);
        if let Err(shortage) = l1.check_resources(&resources) {
            pc.wait_on(&shortage);
            return Ok(());
        }

        l1.execute(&cl, &ctxt, idx, &mq)?;

        if l1.arb.tournament().winner().is_some() {
            pc.wait_epoch();
        } else {
            pc.wait_on(l1.arb.request_arrival_event());
        }
        Ok(())
    }
}
