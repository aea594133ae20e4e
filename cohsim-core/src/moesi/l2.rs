// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! MOESI rules for the L2 cache agent.
//!
//! Snoop behaviour follows the ACE recommendations: `ReadShared` may
//! retain a demoted copy, `ReadUnique` always relinquishes, `CleanInvalid`
//! transfers data only when held dirty and `MakeInvalid` never transfers.
//! A snoop that reaches a line whose own request has not yet been ordered
//! at the directory sees a miss; ordering is guaranteed by the cache
//! controller, which stalls snoops to lines with an ordered request in
//! flight.

use cohsim_engine::sim_error;
use cohsim_engine::types::{SimError, SimResult};

use super::L2State;
use crate::l2cache::{L2Command, L2CommandList, L2Context, L2TState};
use crate::msg::{AceCmdOpcode, AceSnpOpcode, L2CmdOpcode, Message, Payload};
use crate::protocol::L2Protocol;
use crate::types::State;

/// The cluster-level MOESI state machine (ACE master side).
pub struct MoesiL2Protocol;

impl MoesiL2Protocol {
    fn apply_l2_cmd(
        &self,
        ctxt: &L2Context,
        cl: &mut L2CommandList,
        opcode: L2CmdOpcode,
        r: usize,
    ) -> SimResult {
        let state = ctxt.line.as_ref().map(|l| L2State::unpack(l.state));
        match state {
            None => {
                // Miss; fetch over ACE and install a transient line.
                let (ace, next) = match opcode {
                    L2CmdOpcode::L1GetS => (AceCmdOpcode::ReadShared, L2State::IS),
                    L2CmdOpcode::L1GetE => (AceCmdOpcode::ReadUnique, L2State::IE),
                };
                cl.push(L2Command::InstallLine {
                    addr: ctxt.addr,
                    state: self.initial_state(),
                });
                cl.push(L2Command::UpdateState {
                    addr: ctxt.addr,
                    state: next.pack(),
                });
                cl.push(L2Command::IssueAceCmd(Message::new(
                    ctxt.msg.t,
                    ctxt.l2_id,
                    Payload::AceCmd {
                        opcode: ace,
                        addr: ctxt.addr,
                    },
                )));
                cl.push(L2Command::StartTransaction(L2TState::new(
                    ctxt.addr, opcode, r,
                )));
                cl.push(L2Command::Consume);
                cl.push(L2Command::WaitNextEpoch);
            }
            Some(L2State::S) => match opcode {
                L2CmdOpcode::L1GetS => {
                    cl.push(L2Command::AddSharer {
                        addr: ctxt.addr,
                        l1: r,
                    });
                    cl.push(L2Command::IssueL1Rsp {
                        l1: r,
                        msg: l1_rsp(ctxt, true),
                    });
                    cl.push(L2Command::Consume);
                    cl.push(L2Command::WaitNextEpoch);
                }
                L2CmdOpcode::L1GetE => {
                    // The data is already resident; only other copies in
                    // the system need invalidating.
                    cl.push(L2Command::UpdateState {
                        addr: ctxt.addr,
                        state: L2State::IE.pack(),
                    });
                    cl.push(L2Command::IssueAceCmd(Message::new(
                        ctxt.msg.t,
                        ctxt.l2_id,
                        Payload::AceCmd {
                            opcode: AceCmdOpcode::CleanUnique,
                            addr: ctxt.addr,
                        },
                    )));
                    cl.push(L2Command::StartTransaction(L2TState::new(
                        ctxt.addr, opcode, r,
                    )));
                    cl.push(L2Command::Consume);
                    cl.push(L2Command::WaitNextEpoch);
                }
            },
            Some(state @ (L2State::E | L2State::M)) => {
                match opcode {
                    L2CmdOpcode::L1GetS => {
                        // Demote the owning L1 to shared. A Shared line has
                        // no owner; a Modified line keeps its dirtiness and
                        // becomes Owned, as on the snoop side.
                        cl.push(L2Command::SetL1LinesShared {
                            addr: ctxt.addr,
                            except: None,
                        });
                        cl.push(L2Command::DelOwner { addr: ctxt.addr });
                        cl.push(L2Command::AddSharer {
                            addr: ctxt.addr,
                            l1: r,
                        });
                        let next = if state == L2State::E {
                            L2State::S
                        } else {
                            L2State::O
                        };
                        cl.push(L2Command::UpdateState {
                            addr: ctxt.addr,
                            state: next.pack(),
                        });
                        cl.push(L2Command::IssueL1Rsp {
                            l1: r,
                            msg: l1_rsp(ctxt, true),
                        });
                    }
                    L2CmdOpcode::L1GetE => {
                        cl.push(L2Command::SetL1LinesInvalid {
                            addr: ctxt.addr,
                            except: Some(r),
                        });
                        cl.push(L2Command::SetOwner {
                            addr: ctxt.addr,
                            l1: r,
                        });
                        cl.push(L2Command::IssueL1Rsp {
                            l1: r,
                            msg: l1_rsp(ctxt, false),
                        });
                    }
                }
                cl.push(L2Command::Consume);
                cl.push(L2Command::WaitNextEpoch);
            }
            Some(L2State::O) => match opcode {
                L2CmdOpcode::L1GetS => {
                    // Dirty copy is resident; serve the sharer locally.
                    cl.push(L2Command::AddSharer {
                        addr: ctxt.addr,
                        l1: r,
                    });
                    cl.push(L2Command::IssueL1Rsp {
                        l1: r,
                        msg: l1_rsp(ctxt, true),
                    });
                    cl.push(L2Command::Consume);
                    cl.push(L2Command::WaitNextEpoch);
                }
                L2CmdOpcode::L1GetE => {
                    // Promote to exclusive ownership via CleanUnique.
                    cl.push(L2Command::UpdateState {
                        addr: ctxt.addr,
                        state: L2State::OE.pack(),
                    });
                    cl.push(L2Command::IssueAceCmd(Message::new(
                        ctxt.msg.t,
                        ctxt.l2_id,
                        Payload::AceCmd {
                            opcode: AceCmdOpcode::CleanUnique,
                            addr: ctxt.addr,
                        },
                    )));
                    cl.push(L2Command::StartTransaction(L2TState::new(
                        ctxt.addr, opcode, r,
                    )));
                    cl.push(L2Command::Consume);
                    cl.push(L2Command::WaitNextEpoch);
                }
            },
            Some(L2State::IS | L2State::IE | L2State::OE) => {
                let Some(t) = ctxt.inflight else {
                    sim_error!("transient line without a transaction in flight");
                };
                cl.push(L2Command::BlockOnTransaction(t));
                cl.push(L2Command::WaitNextEpoch);
            }
            Some(L2State::I) => {
                sim_error!("invalid resident L2 line in state I");
            }
        }
        Ok(())
    }

    fn apply_ace_rsp(
        &self,
        ctxt: &L2Context,
        cl: &mut L2CommandList,
        is_shared: bool,
        pass_dirty: bool,
    ) -> SimResult {
        let Some(tstate) = ctxt.tstate else {
            sim_error!("ACE response without a transaction in flight");
        };
        let r = tstate.l1;
        let addr = tstate.addr;
        let state = ctxt.line.as_ref().map(|l| L2State::unpack(l.state));
        match state {
            Some(L2State::IS) => {
                // Compute the final line state from (is, pd).
                let (next, rsp_shared) = if pass_dirty {
                    (L2State::O, true)
                } else if is_shared {
                    (L2State::S, true)
                } else {
                    (L2State::E, false)
                };
                cl.push(L2Command::UpdateState {
                    addr,
                    state: next.pack(),
                });
                if rsp_shared {
                    cl.push(L2Command::AddSharer { addr, l1: r });
                } else {
                    cl.push(L2Command::SetOwner { addr, l1: r });
                }
                cl.push(L2Command::IssueL1Rsp {
                    l1: r,
                    msg: l1_rsp(ctxt, rsp_shared),
                });
            }
            Some(L2State::IE) => {
                if is_shared {
                    sim_error!("exclusive fill granted shared");
                }
                // Ownership, dirty when the data was passed dirty; the L1
                // store completion will promote to Modified.
                let next = if pass_dirty { L2State::O } else { L2State::E };
                cl.push(L2Command::SetL1LinesInvalid {
                    addr,
                    except: Some(r),
                });
                cl.push(L2Command::UpdateState {
                    addr,
                    state: next.pack(),
                });
                cl.push(L2Command::SetOwner { addr, l1: r });
                cl.push(L2Command::IssueL1Rsp {
                    l1: r,
                    msg: l1_rsp(ctxt, false),
                });
            }
            Some(L2State::OE) => {
                cl.push(L2Command::SetL1LinesInvalid {
                    addr,
                    except: Some(r),
                });
                cl.push(L2Command::UpdateState {
                    addr,
                    state: L2State::E.pack(),
                });
                cl.push(L2Command::SetOwner { addr, l1: r });
                cl.push(L2Command::IssueL1Rsp {
                    l1: r,
                    msg: l1_rsp(ctxt, false),
                });
            }
            _ => {
                sim_error!("ACE response for a line not in a transient state");
            }
        }
        cl.push(L2Command::EndTransaction);
        cl.push(L2Command::Consume);
        cl.push(L2Command::WaitNextEpoch);
        Ok(())
    }

    fn apply_ace_snp(
        &self,
        ctxt: &L2Context,
        cl: &mut L2CommandList,
        opcode: AceSnpOpcode,
    ) -> SimResult {
        let state = ctxt.line.as_ref().map(|l| L2State::unpack(l.state));
        let stable = matches!(
            state,
            Some(L2State::S | L2State::E | L2State::M | L2State::O)
        );

        if !stable {
            // Either silently evicted, or the local request for this line
            // has not yet been ordered at the directory: the snoop sees a
            // miss. An invalidating snoop still clears the L1 copies held
            // from before the in-flight upgrade.
            if state.is_some()
                && matches!(
                    opcode,
                    AceSnpOpcode::ReadUnique
                        | AceSnpOpcode::CleanInvalid
                        | AceSnpOpcode::MakeInvalid
                )
            {
                cl.push(L2Command::SetL1LinesInvalid {
                    addr: ctxt.addr,
                    except: None,
                });
            }
            cl.push(L2Command::IssueSnpRsp(snp_rsp(ctxt, false, false, false, false)));
            cl.push(L2Command::Consume);
            cl.push(L2Command::WaitNextEpoch);
            return Ok(());
        }
        let state = state.unwrap();

        match opcode {
            AceSnpOpcode::ReadShared => match state {
                L2State::E => {
                    // Retain a shared copy and transfer clean data.
                    cl.push(L2Command::SetL1LinesShared {
                        addr: ctxt.addr,
                        except: None,
                    });
                    cl.push(L2Command::UpdateState {
                        addr: ctxt.addr,
                        state: L2State::S.pack(),
                    });
                    cl.push(L2Command::IssueSnpRsp(snp_rsp(ctxt, true, false, true, true)));
                }
                L2State::M => {
                    // Retain as owner; dirtiness stays here.
                    cl.push(L2Command::SetL1LinesShared {
                        addr: ctxt.addr,
                        except: None,
                    });
                    cl.push(L2Command::UpdateState {
                        addr: ctxt.addr,
                        state: L2State::O.pack(),
                    });
                    cl.push(L2Command::IssueSnpRsp(snp_rsp(ctxt, true, false, true, true)));
                }
                L2State::O => {
                    cl.push(L2Command::SetL1LinesShared {
                        addr: ctxt.addr,
                        except: None,
                    });
                    cl.push(L2Command::IssueSnpRsp(snp_rsp(ctxt, true, false, true, false)));
                }
                L2State::S => {
                    cl.push(L2Command::IssueSnpRsp(snp_rsp(ctxt, false, false, true, false)));
                }
                _ => unreachable!(),
            },
            AceSnpOpcode::ReadUnique => {
                let pd = matches!(state, L2State::M | L2State::O);
                cl.push(L2Command::SetL1LinesInvalid {
                    addr: ctxt.addr,
                    except: None,
                });
                cl.push(L2Command::IssueSnpRsp(snp_rsp(ctxt, true, pd, false, true)));
                cl.push(L2Command::UpdateState {
                    addr: ctxt.addr,
                    state: L2State::I.pack(),
                });
                cl.push(L2Command::RemoveLine { addr: ctxt.addr });
            }
            AceSnpOpcode::CleanInvalid => {
                // Transfer data only when held dirty.
                let dirty = matches!(state, L2State::M | L2State::O);
                let wu = matches!(state, L2State::E | L2State::M);
                cl.push(L2Command::SetL1LinesInvalid {
                    addr: ctxt.addr,
                    except: None,
                });
                cl.push(L2Command::IssueSnpRsp(snp_rsp(ctxt, dirty, dirty, false, wu)));
                cl.push(L2Command::UpdateState {
                    addr: ctxt.addr,
                    state: L2State::I.pack(),
                });
                cl.push(L2Command::RemoveLine { addr: ctxt.addr });
            }
            AceSnpOpcode::MakeInvalid => {
                // Never transfer data.
                let wu = matches!(state, L2State::E | L2State::M);
                cl.push(L2Command::SetL1LinesInvalid {
                    addr: ctxt.addr,
                    except: None,
                });
                cl.push(L2Command::IssueSnpRsp(snp_rsp(ctxt, false, false, false, wu)));
                cl.push(L2Command::UpdateState {
                    addr: ctxt.addr,
                    state: L2State::I.pack(),
                });
                cl.push(L2Command::RemoveLine { addr: ctxt.addr });
            }
        }
        cl.push(L2Command::Consume);
        cl.push(L2Command::WaitNextEpoch);
        Ok(())
    }
}

fn l1_rsp(ctxt: &L2Context, is_shared: bool) -> Message {
    Message::new(ctxt.msg.t, ctxt.l2_id, Payload::L2CmdRsp { is_shared })
}

fn snp_rsp(ctxt: &L2Context, dt: bool, pd: bool, is_shared: bool, was_unique: bool) -> Message {
    Message::new(
        ctxt.msg.t,
        ctxt.l2_id,
        Payload::AceSnpRsp {
            dt,
            pd,
            is_shared,
            was_unique,
        },
    )
}

impl L2Protocol for MoesiL2Protocol {
    fn initial_state(&self) -> State {
        L2State::I.pack()
    }

    fn apply(&self, ctxt: &L2Context, cl: &mut L2CommandList) -> SimResult {
        match &ctxt.msg.payload {
            Payload::L2Cmd { opcode, l1, .. } => self.apply_l2_cmd(ctxt, cl, *opcode, *l1),
            Payload::AceCmdRsp {
                is_shared,
                pass_dirty,
            } => self.apply_ace_rsp(ctxt, cl, *is_shared, *pass_dirty),
            Payload::AceSnp { opcode, .. } => self.apply_ace_snp(ctxt, cl, *opcode),
            _ => {
                sim_error!("invalid message class received: {}", ctxt.msg);
            }
        }
    }

    fn evict(&self, ctxt: &L2Context, cl: &mut L2CommandList) -> SimResult {
        if ctxt.line.is_none() {
            sim_error!("eviction of an absent line {:#x}", ctxt.addr);
        }
        // Clean or dirty, the victim is dropped without traffic; the home
        // node handles the resulting silently-evicted snoop responses.
        cl.push(L2Command::SetL1LinesInvalid {
            addr: ctxt.addr,
            except: None,
        });
        cl.push(L2Command::RemoveLine { addr: ctxt.addr });
        Ok(())
    }

    fn set_modified(&self, state: State) -> Result<State, SimError> {
        match L2State::unpack(state) {
            L2State::E | L2State::O | L2State::M => Ok(L2State::M.pack()),
            other => Err(SimError(format!(
                "unable to set modified state; line is not owned (state {other:?})"
            ))),
        }
    }

    fn is_stable(&self, state: State) -> bool {
        matches!(
            L2State::unpack(state),
            L2State::I | L2State::S | L2State::E | L2State::M | L2State::O
        )
    }

    fn is_readable(&self, state: State) -> bool {
        matches!(
            L2State::unpack(state),
            L2State::S | L2State::E | L2State::M | L2State::O
        )
    }

    fn is_writeable(&self, state: State) -> bool {
        matches!(L2State::unpack(state), L2State::E | L2State::M)
    }

    fn state_name(&self, state: State) -> &'static str {
        match L2State::unpack(state) {
            L2State::I => "I",
            L2State::IS => "IS",
            L2State::IE => "IE",
            L2State::S => "S",
            L2State::E => "E",
            L2State::M => "M",
            L2State::O => "O",
            L2State::OE => "OE",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::l2cache::L2Line;
    use crate::types::{AgentId, TransactionId};

    fn line(state: L2State, owner: Option<usize>, sharers: &[usize]) -> L2Line {
        L2Line {
            state: state.pack(),
            owner,
            sharers: BTreeSet::from_iter(sharers.iter().copied()),
        }
    }

    fn ctxt(l: Option<L2Line>, payload: Payload) -> L2Context {
        L2Context {
            msg: Message::new(TransactionId(1), AgentId(0), payload),
            addr: 0x40,
            line: l,
            tstate: None,
            inflight: None,
            l2_id: AgentId(4),
        }
    }

    #[test]
    fn gets_miss_issues_read_shared() {
        let p = MoesiL2Protocol;
        let c = ctxt(
            None,
            Payload::L2Cmd {
                opcode: L2CmdOpcode::L1GetS,
                addr: 0x40,
                l1: 0,
            },
        );
        let mut cl = L2CommandList::default();
        p.apply(&c, &mut cl).unwrap();
        assert!(cl.iter().any(|cmd| matches!(
            cmd,
            L2Command::IssueAceCmd(m) if matches!(
                m.payload,
                Payload::AceCmd { opcode: AceCmdOpcode::ReadShared, .. }
            )
        )));
    }

    #[test]
    fn gete_in_o_upgrades_via_clean_unique() {
        let p = MoesiL2Protocol;
        let c = ctxt(
            Some(line(L2State::O, None, &[0, 1])),
            Payload::L2Cmd {
                opcode: L2CmdOpcode::L1GetE,
                addr: 0x40,
                l1: 0,
            },
        );
        let mut cl = L2CommandList::default();
        p.apply(&c, &mut cl).unwrap();
        assert!(cl.iter().any(|cmd| matches!(
            cmd,
            L2Command::IssueAceCmd(m) if matches!(
                m.payload,
                Payload::AceCmd { opcode: AceCmdOpcode::CleanUnique, .. }
            )
        )));
        assert!(cl.iter().any(|cmd| matches!(
            cmd,
            L2Command::UpdateState { state, .. } if L2State::unpack(*state) == L2State::OE
        )));
    }

    #[test]
    fn gets_on_modified_line_demotes_to_owned() {
        let p = MoesiL2Protocol;
        let c = ctxt(
            Some(line(L2State::M, Some(0), &[])),
            Payload::L2Cmd {
                opcode: L2CmdOpcode::L1GetS,
                addr: 0x40,
                l1: 1,
            },
        );
        let mut cl = L2CommandList::default();
        p.apply(&c, &mut cl).unwrap();
        // The dirty line stays resident as Owned: no owner below, the
        // requester joins the sharers.
        assert!(cl.iter().any(|cmd| matches!(
            cmd,
            L2Command::UpdateState { state, .. } if L2State::unpack(*state) == L2State::O
        )));
        assert!(cl.iter().any(|cmd| matches!(cmd, L2Command::DelOwner { .. })));
        assert!(cl.iter().any(|cmd| matches!(
            cmd,
            L2Command::AddSharer { l1: 1, .. }
        )));
        assert!(cl.iter().any(|cmd| matches!(
            cmd,
            L2Command::IssueL1Rsp { l1: 1, msg } if matches!(
                msg.payload,
                Payload::L2CmdRsp { is_shared: true }
            )
        )));
    }

    #[test]
    fn read_shared_snoop_in_m_retains_as_owner() {
        let p = MoesiL2Protocol;
        let c = ctxt(
            Some(line(L2State::M, Some(0), &[])),
            Payload::AceSnp {
                opcode: AceSnpOpcode::ReadShared,
                addr: 0x40,
            },
        );
        let mut cl = L2CommandList::default();
        p.apply(&c, &mut cl).unwrap();
        assert!(cl.iter().any(|cmd| matches!(
            cmd,
            L2Command::IssueSnpRsp(m) if matches!(
                m.payload,
                Payload::AceSnpRsp { dt: true, pd: false, is_shared: true, was_unique: true }
            )
        )));
        assert!(cl.iter().any(|cmd| matches!(
            cmd,
            L2Command::UpdateState { state, .. } if L2State::unpack(*state) == L2State::O
        )));
    }

    #[test]
    fn snoop_of_transient_line_sees_miss() {
        let p = MoesiL2Protocol;
        let c = ctxt(
            Some(line(L2State::IE, None, &[])),
            Payload::AceSnp {
                opcode: AceSnpOpcode::ReadUnique,
                addr: 0x40,
            },
        );
        let mut cl = L2CommandList::default();
        p.apply(&c, &mut cl).unwrap();
        assert!(cl.iter().any(|cmd| matches!(
            cmd,
            L2Command::IssueSnpRsp(m) if matches!(
                m.payload,
                Payload::AceSnpRsp { dt: false, .. }
            )
        )));
        // The line itself stays in its transient state.
        assert!(!cl.iter().any(|cmd| matches!(cmd, L2Command::UpdateState { .. })));
    }

    #[test]
    fn make_invalid_never_transfers_data() {
        let p = MoesiL2Protocol;
        let c = ctxt(
            Some(line(L2State::O, None, &[0])),
            Payload::AceSnp {
                opcode: AceSnpOpcode::MakeInvalid,
                addr: 0x40,
            },
        );
        let mut cl = L2CommandList::default();
        p.apply(&c, &mut cl).unwrap();
        assert!(cl.iter().any(|cmd| matches!(
            cmd,
            L2Command::IssueSnpRsp(m) if matches!(
                m.payload,
                Payload::AceSnpRsp { dt: false, pd: false, .. }
            )
        )));
        assert!(cl.iter().any(|cmd| matches!(cmd, L2Command::RemoveLine { .. })));
    }
}
