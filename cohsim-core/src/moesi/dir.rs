// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! MOESI rules for the directory.
//!
//! The directory knows its own previous line state, so snoop responses do
//! not need to distinguish a clean retain from a dirty retain: a line that
//! was Modified or Owned and whose owner retained a copy stays dirty at
//! that owner (state Owned), while a clean Exclusive line degrades to
//! Shared.

use cohsim_engine::sim_error;
use cohsim_engine::types::SimResult;

use super::DirState;
use crate::dir::{DirCommand, DirCommandList, DirContext, DirLine, DirTState};
use crate::msg::{
    AceCmdOpcode, AceSnpOpcode, LLCCmdOpcode, Message, MessageClass, Payload,
};
use crate::protocol::DirProtocol;
use crate::types::{AgentId, State, TransactionId};

/// The home-node MOESI state machine.
pub struct MoesiDirProtocol;

impl MoesiDirProtocol {
    fn apply_coh_srt(&self, ctxt: &DirContext, cl: &mut DirCommandList) -> SimResult {
        if let Some(busy_t) = ctxt.busy_owner {
            // The line is owned by another transaction; this queue waits
            // its turn.
            cl.push(DirCommand::BlockOnTransaction { t: busy_t });
            cl.push(DirCommand::WaitNextEpoch);
            return Ok(());
        }
        cl.push(DirCommand::StartTransaction {
            t: ctxt.msg.t,
            tstate: DirTState::new(ctxt.msg.origin, ctxt.addr, false),
        });
        cl.push(DirCommand::MarkBusy {
            addr: ctxt.addr,
            t: ctxt.msg.t,
        });
        cl.push(DirCommand::Consume);
        cl.push(DirCommand::WaitNextEpoch);
        Ok(())
    }

    fn apply_coh_cmd(
        &self,
        ctxt: &DirContext,
        cl: &mut DirCommandList,
        opcode: AceCmdOpcode,
    ) -> SimResult {
        let Some(tstate) = &ctxt.tstate else {
            sim_error!("CohCmd without a transaction in flight: {}", ctxt.msg);
        };
        if let Some(recall) = &ctxt.recall {
            let has_holders =
                recall.victim.owner.is_some() || !recall.victim.sharers.is_empty();
            if has_holders || recall.victim.llc_valid {
                return self.recall(ctxt, cl);
            }
            // Nothing holds the victim anywhere; drop it and continue.
            cl.push(DirCommand::RemoveLine {
                addr: recall.victim_addr,
            });
        }

        cl.push(DirCommand::NoteCohCmd { opcode });
        cl.push(DirCommand::EmitToNoc {
            dest: tstate.origin,
            msg: Message::new(ctxt.msg.t, ctxt.dir_id, Payload::CohCmdRsp),
        });

        let line = match &ctxt.line {
            Some(line) => line.clone(),
            None => {
                cl.push(DirCommand::InstallLine {
                    addr: ctxt.addr,
                    state: self.initial_state(),
                });
                DirLine {
                    state: DirState::I.pack(),
                    owner: None,
                    sharers: Default::default(),
                    llc_valid: false,
                }
            }
        };
        let origin = tstate.origin;

        match opcode {
            AceCmdOpcode::ReadShared => {
                if let Some(owner) = line.owner {
                    // A single cluster holds the line; intervene.
                    cl.push(DirCommand::EmitToNoc {
                        dest: owner,
                        msg: Message::new(
                            ctxt.msg.t,
                            ctxt.dir_id,
                            Payload::CohSnp {
                                opcode: AceSnpOpcode::ReadShared,
                                addr: ctxt.addr,
                                agent: Some(origin),
                            },
                        ),
                    });
                    cl.push(DirCommand::NoteSnoopExpected { t: ctxt.msg.t, n: 1 });
                } else {
                    self.llc_serve(ctxt, cl, ctxt.msg.t, &line, origin);
                }
            }
            AceCmdOpcode::ReadUnique => {
                let targets = snoop_targets(&line, origin);
                if targets.is_empty() {
                    self.llc_serve(ctxt, cl, ctxt.msg.t, &line, origin);
                } else {
                    for target in &targets {
                        cl.push(DirCommand::EmitToNoc {
                            dest: *target,
                            msg: Message::new(
                                ctxt.msg.t,
                                ctxt.dir_id,
                                Payload::CohSnp {
                                    opcode: AceSnpOpcode::ReadUnique,
                                    addr: ctxt.addr,
                                    agent: Some(origin),
                                },
                            ),
                        });
                    }
                    cl.push(DirCommand::NoteSnoopExpected {
                        t: ctxt.msg.t,
                        n: targets.len(),
                    });
                }
            }
            AceCmdOpcode::CleanUnique => {
                let origin_holds =
                    line.sharers.contains(&origin) || line.owner == Some(origin);
                let targets = snoop_targets(&line, origin);
                if origin_holds {
                    if targets.is_empty() {
                        // Nothing else to invalidate; complete at once.
                        self.finalize_unique(ctxt, cl, ctxt.msg.t, origin, false, 0);
                    } else {
                        for target in &targets {
                            cl.push(DirCommand::EmitToNoc {
                                dest: *target,
                                msg: Message::new(
                                    ctxt.msg.t,
                                    ctxt.dir_id,
                                    Payload::CohSnp {
                                        opcode: AceSnpOpcode::MakeInvalid,
                                        addr: ctxt.addr,
                                        agent: None,
                                    },
                                ),
                            });
                        }
                        cl.push(DirCommand::NoteSnoopExpected {
                            t: ctxt.msg.t,
                            n: targets.len(),
                        });
                    }
                } else {
                    // The requester lost its copy while the upgrade was in
                    // flight; data must now be provided as for ReadUnique.
                    if targets.is_empty() {
                        self.llc_serve(ctxt, cl, ctxt.msg.t, &line, origin);
                    } else {
                        for target in &targets {
                            cl.push(DirCommand::EmitToNoc {
                                dest: *target,
                                msg: Message::new(
                                    ctxt.msg.t,
                                    ctxt.dir_id,
                                    Payload::CohSnp {
                                        opcode: AceSnpOpcode::ReadUnique,
                                        addr: ctxt.addr,
                                        agent: Some(origin),
                                    },
                                ),
                            });
                        }
                        cl.push(DirCommand::NoteSnoopExpected {
                            t: ctxt.msg.t,
                            n: targets.len(),
                        });
                    }
                }
            }
        }
        cl.push(DirCommand::Consume);
        cl.push(DirCommand::WaitNextEpoch);
        Ok(())
    }

    fn llc_serve(
        &self,
        ctxt: &DirContext,
        cl: &mut DirCommandList,
        t: TransactionId,
        line: &DirLine,
        agent: AgentId,
    ) {
        let op = if line.llc_valid {
            LLCCmdOpcode::PutLine
        } else {
            LLCCmdOpcode::Fill
        };
        cl.push(DirCommand::IssueLLCCmd(Message::new(
            t,
            ctxt.dir_id,
            Payload::LLCCmd {
                opcode: op,
                addr: ctxt.addr,
                agent: Some(agent),
            },
        )));
        cl.push(DirCommand::SetAwaitingLlc { t, op });
    }

    /// Close a transaction that leaves `origin` as the sole writer.
    fn finalize_unique(
        &self,
        ctxt: &DirContext,
        cl: &mut DirCommandList,
        t: TransactionId,
        origin: AgentId,
        pd: bool,
        dt_n: usize,
    ) {
        cl.push(DirCommand::EmitToNoc {
            dest: origin,
            msg: Message::new(
                t,
                ctxt.dir_id,
                Payload::CohEnd {
                    is_shared: false,
                    pass_dirty: pd,
                    dt_n,
                },
            ),
        });
        cl.push(DirCommand::ClearSharers { addr: ctxt.addr });
        cl.push(DirCommand::SetOwner {
            addr: ctxt.addr,
            agent: origin,
        });
        cl.push(DirCommand::UpdateState {
            addr: ctxt.addr,
            state: DirState::M.pack(),
        });
        cl.push(DirCommand::SetLlcValid {
            addr: ctxt.addr,
            valid: false,
        });
        cl.push(DirCommand::EndTransaction { t });
        cl.push(DirCommand::ClearBusy { addr: ctxt.addr });
    }

    fn apply_coh_snp_rsp(
        &self,
        ctxt: &DirContext,
        cl: &mut DirCommandList,
        dt: bool,
        pd: bool,
        is_shared: bool,
    ) -> SimResult {
        let Some(tstate) = &ctxt.tstate else {
            sim_error!("CohSnpRsp without a transaction in flight: {}", ctxt.msg);
        };
        cl.push(DirCommand::AddCredit(MessageClass::CohSnp));
        cl.push(DirCommand::NoteSnoopRsp);

        let mut after = tstate.clone();
        after.snoop_received += 1;
        if dt {
            after.dt_n += 1;
        }
        after.pd |= pd;
        after.retained |= is_shared;

        if after.snoop_received == after.snoop_expected {
            if after.recall {
                self.finish_recall(ctxt, cl, &after);
            } else {
                self.finish_snoops(ctxt, cl, &after)?;
            }
        }
        cl.push(DirCommand::Consume);
        cl.push(DirCommand::WaitNextEpoch);
        Ok(())
    }

    fn finish_snoops(
        &self,
        ctxt: &DirContext,
        cl: &mut DirCommandList,
        ts: &DirTState,
    ) -> SimResult {
        let Some(line) = &ctxt.line else {
            sim_error!("snoop completion for an absent line {:#x}", ctxt.addr);
        };
        let Some(opcode) = ts.opcode else {
            sim_error!("snoop completion without a command opcode");
        };
        let t = ctxt.msg.t;
        let origin = ts.origin;

        match opcode {
            AceCmdOpcode::ReadShared => {
                if ts.dt_n == 0 {
                    // The holder had silently evicted; fall back to the
                    // home LLC (or memory).
                    self.llc_serve(ctxt, cl, t, line, origin);
                    return Ok(());
                }
                cl.push(DirCommand::EmitToNoc {
                    dest: origin,
                    msg: Message::new(
                        t,
                        ctxt.dir_id,
                        Payload::CohEnd {
                            is_shared: true,
                            pass_dirty: ts.pd,
                            dt_n: ts.dt_n,
                        },
                    ),
                });
                let prev = DirState::unpack(line.state);
                if ts.pd {
                    // Dirtiness moved to the requester.
                    if let Some(old) = line.owner {
                        if ts.retained {
                            cl.push(DirCommand::AddSharer {
                                addr: ctxt.addr,
                                agent: old,
                            });
                        }
                    }
                    cl.push(DirCommand::SetOwner {
                        addr: ctxt.addr,
                        agent: origin,
                    });
                    cl.push(DirCommand::UpdateState {
                        addr: ctxt.addr,
                        state: DirState::O.pack(),
                    });
                    cl.push(DirCommand::SetLlcValid {
                        addr: ctxt.addr,
                        valid: false,
                    });
                } else if matches!(prev, DirState::M | DirState::O) && ts.retained {
                    // The owner kept its dirty copy.
                    cl.push(DirCommand::AddSharer {
                        addr: ctxt.addr,
                        agent: origin,
                    });
                    cl.push(DirCommand::UpdateState {
                        addr: ctxt.addr,
                        state: DirState::O.pack(),
                    });
                } else {
                    let old = line.owner;
                    cl.push(DirCommand::DelOwner { addr: ctxt.addr });
                    if ts.retained {
                        if let Some(old) = old {
                            cl.push(DirCommand::AddSharer {
                                addr: ctxt.addr,
                                agent: old,
                            });
                        }
                    }
                    cl.push(DirCommand::AddSharer {
                        addr: ctxt.addr,
                        agent: origin,
                    });
                    cl.push(DirCommand::UpdateState {
                        addr: ctxt.addr,
                        state: DirState::S.pack(),
                    });
                }
                cl.push(DirCommand::EndTransaction { t });
                cl.push(DirCommand::ClearBusy { addr: ctxt.addr });
            }
            AceCmdOpcode::ReadUnique => {
                if ts.dt_n == 0 {
                    self.llc_serve(ctxt, cl, t, line, origin);
                    return Ok(());
                }
                cl.push(DirCommand::EmitToNoc {
                    dest: origin,
                    msg: Message::new(
                        t,
                        ctxt.dir_id,
                        Payload::CohEnd {
                            is_shared: false,
                            pass_dirty: ts.pd,
                            dt_n: ts.dt_n,
                        },
                    ),
                });
                cl.push(DirCommand::ClearSharers { addr: ctxt.addr });
                cl.push(DirCommand::SetOwner {
                    addr: ctxt.addr,
                    agent: origin,
                });
                cl.push(DirCommand::UpdateState {
                    addr: ctxt.addr,
                    state: DirState::M.pack(),
                });
                cl.push(DirCommand::SetLlcValid {
                    addr: ctxt.addr,
                    valid: false,
                });
                cl.push(DirCommand::EndTransaction { t });
                cl.push(DirCommand::ClearBusy { addr: ctxt.addr });
            }
            AceCmdOpcode::CleanUnique => {
                self.finalize_unique(ctxt, cl, t, origin, false, 0);
            }
        }
        Ok(())
    }

    fn finish_recall(&self, ctxt: &DirContext, cl: &mut DirCommandList, ts: &DirTState) {
        let llc_valid = ctxt.line.as_ref().is_some_and(|l| l.llc_valid);
        if ts.pd || llc_valid {
            // Dirty data (or a stale LLC copy) is written back to memory
            // before the line leaves the tag store.
            cl.push(DirCommand::IssueLLCCmd(Message::new(
                ctxt.msg.t,
                ctxt.dir_id,
                Payload::LLCCmd {
                    opcode: LLCCmdOpcode::Evict,
                    addr: ctxt.addr,
                    agent: None,
                },
            )));
            cl.push(DirCommand::SetAwaitingLlc {
                t: ctxt.msg.t,
                op: LLCCmdOpcode::Evict,
            });
        } else {
            cl.push(DirCommand::RemoveLine { addr: ctxt.addr });
            cl.push(DirCommand::EndTransaction { t: ctxt.msg.t });
            cl.push(DirCommand::ClearBusy { addr: ctxt.addr });
        }
    }

    fn apply_llc_rsp(
        &self,
        ctxt: &DirContext,
        cl: &mut DirCommandList,
        opcode: LLCCmdOpcode,
    ) -> SimResult {
        let Some(tstate) = &ctxt.tstate else {
            sim_error!("LLCRsp without a transaction in flight: {}", ctxt.msg);
        };
        if tstate.llc_op != Some(opcode) {
            sim_error!("unexpected LLC completion: {}", ctxt.msg);
        }
        let t = ctxt.msg.t;

        if tstate.recall {
            cl.push(DirCommand::RemoveLine { addr: ctxt.addr });
            cl.push(DirCommand::EndTransaction { t });
            cl.push(DirCommand::ClearBusy { addr: ctxt.addr });
            cl.push(DirCommand::Consume);
            cl.push(DirCommand::WaitNextEpoch);
            return Ok(());
        }

        let Some(cmd_opcode) = tstate.opcode else {
            sim_error!("LLC completion without a command opcode");
        };
        let origin = tstate.origin;
        match (cmd_opcode, opcode) {
            (AceCmdOpcode::ReadShared, LLCCmdOpcode::PutLine) => {
                cl.push(DirCommand::EmitToNoc {
                    dest: origin,
                    msg: Message::new(
                        t,
                        ctxt.dir_id,
                        Payload::CohEnd {
                            is_shared: true,
                            pass_dirty: false,
                            dt_n: 1,
                        },
                    ),
                });
                cl.push(DirCommand::DelOwner { addr: ctxt.addr });
                cl.push(DirCommand::AddSharer {
                    addr: ctxt.addr,
                    agent: origin,
                });
                cl.push(DirCommand::UpdateState {
                    addr: ctxt.addr,
                    state: DirState::S.pack(),
                });
            }
            (AceCmdOpcode::ReadShared, LLCCmdOpcode::Fill) => {
                // Sharers may survive a silent-eviction fallback, in which
                // case the fill joins them; only a line invalid everywhere
                // is granted exclusive.
                let shared = ctxt
                    .line
                    .as_ref()
                    .is_some_and(|l| !l.sharers.is_empty());
                cl.push(DirCommand::EmitToNoc {
                    dest: origin,
                    msg: Message::new(
                        t,
                        ctxt.dir_id,
                        Payload::CohEnd {
                            is_shared: shared,
                            pass_dirty: false,
                            dt_n: 1,
                        },
                    ),
                });
                cl.push(DirCommand::DelOwner { addr: ctxt.addr });
                if shared {
                    cl.push(DirCommand::AddSharer {
                        addr: ctxt.addr,
                        agent: origin,
                    });
                    cl.push(DirCommand::UpdateState {
                        addr: ctxt.addr,
                        state: DirState::S.pack(),
                    });
                    cl.push(DirCommand::SetLlcValid {
                        addr: ctxt.addr,
                        valid: true,
                    });
                } else {
                    cl.push(DirCommand::SetOwner {
                        addr: ctxt.addr,
                        agent: origin,
                    });
                    cl.push(DirCommand::UpdateState {
                        addr: ctxt.addr,
                        state: DirState::E.pack(),
                    });
                    cl.push(DirCommand::SetLlcValid {
                        addr: ctxt.addr,
                        valid: false,
                    });
                }
            }
            (AceCmdOpcode::ReadUnique | AceCmdOpcode::CleanUnique, _) => {
                cl.push(DirCommand::EmitToNoc {
                    dest: origin,
                    msg: Message::new(
                        t,
                        ctxt.dir_id,
                        Payload::CohEnd {
                            is_shared: false,
                            pass_dirty: false,
                            dt_n: 1,
                        },
                    ),
                });
                cl.push(DirCommand::ClearSharers { addr: ctxt.addr });
                cl.push(DirCommand::SetOwner {
                    addr: ctxt.addr,
                    agent: origin,
                });
                cl.push(DirCommand::UpdateState {
                    addr: ctxt.addr,
                    state: DirState::M.pack(),
                });
                cl.push(DirCommand::SetLlcValid {
                    addr: ctxt.addr,
                    valid: false,
                });
            }
            (AceCmdOpcode::ReadShared, LLCCmdOpcode::Evict) => {
                sim_error!("unexpected LLC eviction completion: {}", ctxt.msg);
            }
        }
        cl.push(DirCommand::EndTransaction { t });
        cl.push(DirCommand::ClearBusy { addr: ctxt.addr });
        cl.push(DirCommand::Consume);
        cl.push(DirCommand::WaitNextEpoch);
        Ok(())
    }
}

fn snoop_targets(line: &DirLine, origin: AgentId) -> Vec<AgentId> {
    line.sharers
        .iter()
        .copied()
        .chain(line.owner)
        .filter(|a| *a != origin)
        .collect()
}

impl DirProtocol for MoesiDirProtocol {
    fn initial_state(&self) -> State {
        DirState::I.pack()
    }

    fn apply(&self, ctxt: &DirContext, cl: &mut DirCommandList) -> SimResult {
        match &ctxt.msg.payload {
            Payload::CohSrt { .. } => self.apply_coh_srt(ctxt, cl),
            Payload::CohCmd { opcode, .. } => self.apply_coh_cmd(ctxt, cl, *opcode),
            Payload::CohSnpRsp {
                dt, pd, is_shared, ..
            } => self.apply_coh_snp_rsp(ctxt, cl, *dt, *pd, *is_shared),
            Payload::LLCRsp { opcode, .. } => self.apply_llc_rsp(ctxt, cl, *opcode),
            _ => {
                sim_error!("invalid message class received: {}", ctxt.msg);
            }
        }
    }

    fn recall(&self, ctxt: &DirContext, cl: &mut DirCommandList) -> SimResult {
        let Some(recall) = &ctxt.recall else {
            sim_error!("recall without a victim");
        };
        let victim = &recall.victim;
        cl.push(DirCommand::StartTransaction {
            t: recall.t,
            tstate: DirTState::new(ctxt.dir_id, recall.victim_addr, true),
        });
        cl.push(DirCommand::MarkBusy {
            addr: recall.victim_addr,
            t: recall.t,
        });

        let mut n = 0;
        if let Some(owner) = victim.owner {
            cl.push(DirCommand::EmitToNoc {
                dest: owner,
                msg: Message::new(
                    recall.t,
                    ctxt.dir_id,
                    Payload::CohSnp {
                        opcode: AceSnpOpcode::CleanInvalid,
                        addr: recall.victim_addr,
                        agent: None,
                    },
                ),
            });
            n += 1;
        }
        for sharer in &victim.sharers {
            cl.push(DirCommand::EmitToNoc {
                dest: *sharer,
                msg: Message::new(
                    recall.t,
                    ctxt.dir_id,
                    Payload::CohSnp {
                        opcode: AceSnpOpcode::MakeInvalid,
                        addr: recall.victim_addr,
                        agent: None,
                    },
                ),
            });
            n += 1;
        }
        if n != 0 {
            cl.push(DirCommand::NoteSnoopExpected { t: recall.t, n });
        } else {
            // Only the LLC holds the victim; write it back directly.
            cl.push(DirCommand::IssueLLCCmd(Message::new(
                recall.t,
                ctxt.dir_id,
                Payload::LLCCmd {
                    opcode: LLCCmdOpcode::Evict,
                    addr: recall.victim_addr,
                    agent: None,
                },
            )));
            cl.push(DirCommand::SetAwaitingLlc {
                t: recall.t,
                op: LLCCmdOpcode::Evict,
            });
        }
        // The command that provoked the recall waits for it to finish.
        cl.push(DirCommand::BlockOnTransaction { t: recall.t });
        cl.push(DirCommand::WaitNextEpoch);
        Ok(())
    }

    fn is_stable(&self, _state: State) -> bool {
        // Directory lines hold no transient encodings; transactions in
        // flight are tracked by the busy set instead.
        true
    }

    fn state_name(&self, state: State) -> &'static str {
        match DirState::unpack(state) {
            DirState::I => "I",
            DirState::S => "S",
            DirState::E => "E",
            DirState::M => "M",
            DirState::O => "O",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::dir::RecallContext;
    use crate::types::TransactionId;

    fn line(state: DirState, owner: Option<AgentId>, sharers: &[AgentId], llc: bool) -> DirLine {
        DirLine {
            state: state.pack(),
            owner,
            sharers: BTreeSet::from_iter(sharers.iter().copied()),
            llc_valid: llc,
        }
    }

    fn ctxt(
        l: Option<DirLine>,
        tstate: Option<DirTState>,
        payload: Payload,
    ) -> DirContext {
        DirContext {
            msg: Message::new(TransactionId(1), AgentId(0), payload),
            addr: 0x40,
            line: l,
            tstate,
            busy_owner: None,
            recall: None,
            dir_id: AgentId(9),
        }
    }

    #[test]
    fn read_shared_of_owned_line_snoops_owner() {
        let p = MoesiDirProtocol;
        let owner = AgentId(5);
        let mut ts = DirTState::new(AgentId(0), 0x40, false);
        ts.opcode = None;
        let c = ctxt(
            Some(line(DirState::E, Some(owner), &[], false)),
            Some(ts),
            Payload::CohCmd {
                opcode: AceCmdOpcode::ReadShared,
                addr: 0x40,
            },
        );
        let mut cl = DirCommandList::default();
        p.apply(&c, &mut cl).unwrap();
        assert!(cl.iter().any(|cmd| matches!(
            cmd,
            DirCommand::EmitToNoc { dest, msg } if *dest == owner && matches!(
                msg.payload,
                Payload::CohSnp { opcode: AceSnpOpcode::ReadShared, agent: Some(AgentId(0)), .. }
            )
        )));
    }

    #[test]
    fn read_shared_of_invalid_line_fills_from_memory() {
        let p = MoesiDirProtocol;
        let ts = DirTState::new(AgentId(0), 0x40, false);
        let c = ctxt(
            None,
            Some(ts),
            Payload::CohCmd {
                opcode: AceCmdOpcode::ReadShared,
                addr: 0x40,
            },
        );
        let mut cl = DirCommandList::default();
        p.apply(&c, &mut cl).unwrap();
        assert!(cl.iter().any(|cmd| matches!(
            cmd,
            DirCommand::IssueLLCCmd(m) if matches!(
                m.payload,
                Payload::LLCCmd { opcode: LLCCmdOpcode::Fill, .. }
            )
        )));
    }

    #[test]
    fn clean_unique_snoops_sharers_without_data() {
        let p = MoesiDirProtocol;
        let origin = AgentId(2);
        let other = AgentId(3);
        let ts = DirTState::new(origin, 0x40, false);
        let c = ctxt(
            Some(line(DirState::S, None, &[origin, other], true)),
            Some(ts),
            Payload::CohCmd {
                opcode: AceCmdOpcode::CleanUnique,
                addr: 0x40,
            },
        );
        let mut cl = DirCommandList::default();
        p.apply(&c, &mut cl).unwrap();
        assert!(cl.iter().any(|cmd| matches!(
            cmd,
            DirCommand::EmitToNoc { dest, msg } if *dest == other && matches!(
                msg.payload,
                Payload::CohSnp { opcode: AceSnpOpcode::MakeInvalid, agent: None, .. }
            )
        )));
    }

    #[test]
    fn dirty_retain_keeps_owner_in_o() {
        let p = MoesiDirProtocol;
        let owner = AgentId(5);
        let origin = AgentId(2);
        let mut ts = DirTState::new(origin, 0x40, false);
        ts.opcode = Some(AceCmdOpcode::ReadShared);
        ts.snoop_expected = 1;
        let c = ctxt(
            Some(line(DirState::M, Some(owner), &[], false)),
            Some(ts),
            Payload::CohSnpRsp {
                dt: true,
                pd: false,
                is_shared: true,
                was_unique: true,
            },
        );
        let mut cl = DirCommandList::default();
        p.apply(&c, &mut cl).unwrap();
        assert!(cl.iter().any(|cmd| matches!(
            cmd,
            DirCommand::UpdateState { state, .. } if DirState::unpack(*state) == DirState::O
        )));
        // Ownership is unchanged; the requester joins the sharers.
        assert!(!cl.iter().any(|cmd| matches!(cmd, DirCommand::DelOwner { .. })));
    }

    #[test]
    fn recall_snoops_victim_holders() {
        let p = MoesiDirProtocol;
        let owner = AgentId(5);
        let ts = DirTState::new(AgentId(0), 0x1040, false);
        let mut c = ctxt(
            None,
            Some(ts),
            Payload::CohCmd {
                opcode: AceCmdOpcode::ReadShared,
                addr: 0x1040,
            },
        );
        c.recall = Some(RecallContext {
            t: TransactionId(77),
            victim_addr: 0x40,
            victim: line(DirState::M, Some(owner), &[], false),
        });
        let mut cl = DirCommandList::default();
        p.apply(&c, &mut cl).unwrap();
        assert!(cl.iter().any(|cmd| matches!(
            cmd,
            DirCommand::EmitToNoc { dest, msg } if *dest == owner && matches!(
                msg.payload,
                Payload::CohSnp { opcode: AceSnpOpcode::CleanInvalid, agent: None, .. }
            )
        )));
        // The provoking command is neither acknowledged nor consumed yet.
        assert!(!cl.iter().any(|cmd| matches!(cmd, DirCommand::Consume)));
        assert!(cl
            .iter()
            .any(|cmd| matches!(cmd, DirCommand::BlockOnTransaction { t } if *t == TransactionId(77))));
    }
}
