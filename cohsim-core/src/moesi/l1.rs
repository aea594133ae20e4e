// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! MOESI rules for the L1 cache agent.

use cohsim_engine::sim_error;
use cohsim_engine::types::SimResult;

use super::L1State;
use crate::l1cache::{L1Command, L1CommandList, L1Context, L1TState};
use crate::monitor::L1CacheEvent;
use crate::msg::{CpuOpcode, L2CmdOpcode, Message, Payload};
use crate::protocol::L1Protocol;
use crate::types::State;

/// The CPU-facing MOESI state machine.
pub struct MoesiL1Protocol;

impl MoesiL1Protocol {
    fn apply_cpu_cmd(
        &self,
        ctxt: &L1Context,
        cl: &mut L1CommandList,
        opcode: CpuOpcode,
    ) -> SimResult {
        let state = ctxt.state.map(L1State::unpack);
        match state {
            None => {
                // Miss; fetch through the L2 and install a transient line.
                let (event, l2_opcode, next) = match opcode {
                    CpuOpcode::Load => (L1CacheEvent::LoadMiss, L2CmdOpcode::L1GetS, L1State::IS),
                    CpuOpcode::Store => (L1CacheEvent::StoreMiss, L2CmdOpcode::L1GetE, L1State::IE),
                };
                cl.push(L1Command::RaiseEvent(event, ctxt.addr));
                cl.push(L1Command::IssueL2Cmd(Message::new(
                    ctxt.msg.t,
                    ctxt.l1_id,
                    Payload::L2Cmd {
                        opcode: l2_opcode,
                        addr: ctxt.addr,
                        l1: ctxt.cpu_index,
                    },
                )));
                cl.push(L1Command::InstallLine {
                    addr: ctxt.addr,
                    state: self.initial_state(),
                });
                cl.push(L1Command::UpdateState {
                    addr: ctxt.addr,
                    state: next.pack(),
                });
                cl.push(L1Command::StartTransaction(L1TState::new(ctxt.addr, opcode)));
                cl.push(L1Command::Consume);
                cl.push(L1Command::WaitNextEpoch);
            }
            Some(L1State::S) => match opcode {
                CpuOpcode::Load => {
                    cl.push(L1Command::RaiseEvent(L1CacheEvent::LoadHit, ctxt.addr));
                    cl.push(L1Command::IssueCpuRsp(cpu_rsp(ctxt)));
                    cl.push(L1Command::Consume);
                    cl.push(L1Command::WaitNextEpoch);
                }
                CpuOpcode::Store => {
                    // Upgrade through the L2; the line already holds data.
                    cl.push(L1Command::RaiseEvent(L1CacheEvent::StoreMiss, ctxt.addr));
                    cl.push(L1Command::IssueL2Cmd(Message::new(
                        ctxt.msg.t,
                        ctxt.l1_id,
                        Payload::L2Cmd {
                            opcode: L2CmdOpcode::L1GetE,
                            addr: ctxt.addr,
                            l1: ctxt.cpu_index,
                        },
                    )));
                    cl.push(L1Command::UpdateState {
                        addr: ctxt.addr,
                        state: L1State::IE.pack(),
                    });
                    cl.push(L1Command::StartTransaction(L1TState::new(ctxt.addr, opcode)));
                    cl.push(L1Command::Consume);
                    cl.push(L1Command::WaitNextEpoch);
                }
            },
            Some(L1State::E) => match opcode {
                CpuOpcode::Load => {
                    cl.push(L1Command::RaiseEvent(L1CacheEvent::LoadHit, ctxt.addr));
                    cl.push(L1Command::IssueCpuRsp(cpu_rsp(ctxt)));
                    cl.push(L1Command::Consume);
                    cl.push(L1Command::WaitNextEpoch);
                }
                CpuOpcode::Store => {
                    // The store promotes the line to Modified and pokes the
                    // corresponding promotion into the L2, emulating the
                    // store queue of a hardware implementation.
                    cl.push(L1Command::RaiseEvent(L1CacheEvent::StoreHit, ctxt.addr));
                    cl.push(L1Command::UpdateState {
                        addr: ctxt.addr,
                        state: L1State::EM.pack(),
                    });
                    cl.push(L1Command::SetL2LineModified { addr: ctxt.addr });
                    cl.push(L1Command::UpdateState {
                        addr: ctxt.addr,
                        state: L1State::M.pack(),
                    });
                    cl.push(L1Command::IssueCpuRsp(cpu_rsp(ctxt)));
                    cl.push(L1Command::Consume);
                    cl.push(L1Command::WaitNextEpoch);
                }
            },
            Some(L1State::M) => {
                let event = match opcode {
                    CpuOpcode::Load => L1CacheEvent::LoadHit,
                    CpuOpcode::Store => L1CacheEvent::StoreHit,
                };
                cl.push(L1Command::RaiseEvent(event, ctxt.addr));
                cl.push(L1Command::IssueCpuRsp(cpu_rsp(ctxt)));
                cl.push(L1Command::Consume);
                cl.push(L1Command::WaitNextEpoch);
            }
            Some(L1State::IS | L1State::IE | L1State::EM | L1State::MI) => {
                // A transaction to this line is in flight; park the command
                // until it completes.
                cl.push(L1Command::MoveToReplay);
                cl.push(L1Command::WaitNextEpoch);
            }
            Some(L1State::I) => {
                sim_error!("invalid resident L1 line in state I");
            }
        }
        Ok(())
    }

    fn apply_l2_rsp(
        &self,
        ctxt: &L1Context,
        cl: &mut L1CommandList,
        is_shared: bool,
    ) -> SimResult {
        let Some(tstate) = ctxt.tstate else {
            sim_error!("L2 response without a transaction in flight");
        };
        let state = ctxt.state.map(L1State::unpack);
        match state {
            Some(L1State::IS) => {
                // Load fill; writeable when granted exclusive.
                let (next, event) = if is_shared {
                    (L1State::S, L1CacheEvent::InstallShareable)
                } else {
                    (L1State::E, L1CacheEvent::InstallWriteable)
                };
                cl.push(L1Command::UpdateState {
                    addr: tstate.addr,
                    state: next.pack(),
                });
                cl.push(L1Command::RaiseEvent(event, tstate.addr));
            }
            Some(L1State::IE) => {
                if is_shared {
                    sim_error!("exclusive fill granted shared");
                }
                // The store completes against the granted line.
                cl.push(L1Command::UpdateState {
                    addr: tstate.addr,
                    state: L1State::M.pack(),
                });
                cl.push(L1Command::SetL2LineModified { addr: tstate.addr });
                cl.push(L1Command::RaiseEvent(
                    L1CacheEvent::InstallWriteable,
                    tstate.addr,
                ));
            }
            _ => {
                sim_error!("L2 response for a line not in a fill state");
            }
        }
        cl.push(L1Command::IssueCpuRsp(cpu_rsp(ctxt)));
        cl.push(L1Command::EndTransaction);
        cl.push(L1Command::Consume);
        cl.push(L1Command::WaitNextEpoch);
        Ok(())
    }
}

fn cpu_rsp(ctxt: &L1Context) -> Message {
    Message::new(ctxt.msg.t, ctxt.l1_id, Payload::CpuRsp)
}

impl L1Protocol for MoesiL1Protocol {
    fn initial_state(&self) -> State {
        L1State::I.pack()
    }

    fn apply(&self, ctxt: &L1Context, cl: &mut L1CommandList) -> SimResult {
        match &ctxt.msg.payload {
            Payload::CpuCmd { opcode, .. } => self.apply_cpu_cmd(ctxt, cl, *opcode),
            Payload::L2CmdRsp { is_shared } => self.apply_l2_rsp(ctxt, cl, *is_shared),
            _ => {
                sim_error!("invalid message class received: {}", ctxt.msg);
            }
        }
    }

    fn evict(&self, ctxt: &L1Context, cl: &mut L1CommandList) -> SimResult {
        let Some(state) = ctxt.state.map(L1State::unpack) else {
            sim_error!("eviction of an absent line {:#x}", ctxt.addr);
        };
        // Write-through: the L2 copy is never behind an L1 line, so even a
        // modified victim can be dropped without traffic.
        if state == L1State::M {
            cl.push(L1Command::UpdateState {
                addr: ctxt.addr,
                state: L1State::MI.pack(),
            });
        }
        cl.push(L1Command::RaiseEvent(L1CacheEvent::InvalidateLine, ctxt.addr));
        cl.push(L1Command::RemoveLine { addr: ctxt.addr });
        Ok(())
    }

    fn demote(&self, state: State, shared: bool) -> State {
        let s = L1State::unpack(state);
        if !shared {
            return L1State::I.pack();
        }
        match s {
            L1State::E | L1State::M | L1State::S => L1State::S.pack(),
            // Transient states keep their fill in flight.
            other => other.pack(),
        }
    }

    fn is_stable(&self, state: State) -> bool {
        matches!(
            L1State::unpack(state),
            L1State::I | L1State::S | L1State::E | L1State::M
        )
    }

    fn is_readable(&self, state: State) -> bool {
        matches!(
            L1State::unpack(state),
            L1State::S | L1State::E | L1State::M
        )
    }

    fn is_writeable(&self, state: State) -> bool {
        matches!(L1State::unpack(state), L1State::E | L1State::M)
    }

    fn state_name(&self, state: State) -> &'static str {
        match L1State::unpack(state) {
            L1State::I => "I",
            L1State::IS => "IS",
            L1State::S => "S",
            L1State::IE => "IE",
            L1State::E => "E",
            L1State::EM => "EM",
            L1State::M => "M",
            L1State::MI => "MI",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentId, TransactionId};

    fn ctxt(state: Option<L1State>, payload: Payload) -> L1Context {
        L1Context {
            msg: Message::new(TransactionId(1), AgentId(0), payload),
            addr: 0x40,
            state: state.map(L1State::pack),
            tstate: None,
            cpu_index: 0,
            l1_id: AgentId(3),
            from_replay: false,
        }
    }

    #[test]
    fn load_miss_fetches_gets() {
        let p = MoesiL1Protocol;
        let c = ctxt(
            None,
            Payload::CpuCmd {
                opcode: CpuOpcode::Load,
                addr: 0x40,
            },
        );
        let mut cl = L1CommandList::default();
        p.apply(&c, &mut cl).unwrap();

        let mut saw_gets = false;
        let mut saw_install = false;
        let mut transient = None;
        for cmd in cl.iter() {
            match cmd {
                L1Command::IssueL2Cmd(m) => {
                    saw_gets = matches!(
                        m.payload,
                        Payload::L2Cmd {
                            opcode: L2CmdOpcode::L1GetS,
                            ..
                        }
                    );
                }
                L1Command::InstallLine { .. } => saw_install = true,
                L1Command::UpdateState { state, .. } => {
                    transient = Some(L1State::unpack(*state));
                }
                _ => {}
            }
        }
        assert!(saw_gets && saw_install);
        assert_eq!(transient, Some(L1State::IS));
    }

    #[test]
    fn store_hit_in_e_promotes_and_pokes_l2() {
        let p = MoesiL1Protocol;
        let c = ctxt(
            Some(L1State::E),
            Payload::CpuCmd {
                opcode: CpuOpcode::Store,
                addr: 0x40,
            },
        );
        let mut cl = L1CommandList::default();
        p.apply(&c, &mut cl).unwrap();

        let mut saw_poke = false;
        let mut final_state = None;
        for cmd in cl.iter() {
            match cmd {
                L1Command::SetL2LineModified { .. } => saw_poke = true,
                L1Command::UpdateState { state, .. } => {
                    final_state = Some(L1State::unpack(*state));
                }
                _ => {}
            }
        }
        assert!(saw_poke);
        assert_eq!(final_state, Some(L1State::M));
    }

    #[test]
    fn transient_line_parks_to_replay() {
        let p = MoesiL1Protocol;
        let c = ctxt(
            Some(L1State::IS),
            Payload::CpuCmd {
                opcode: CpuOpcode::Load,
                addr: 0x40,
            },
        );
        let mut cl = L1CommandList::default();
        p.apply(&c, &mut cl).unwrap();
        assert!(cl.iter().any(|c| matches!(c, L1Command::MoveToReplay)));
        assert!(!cl.iter().any(|c| matches!(c, L1Command::Consume)));
    }

    #[test]
    fn demotion_mapping() {
        let p = MoesiL1Protocol;
        assert_eq!(
            L1State::unpack(p.demote(L1State::M.pack(), true)),
            L1State::S
        );
        assert_eq!(
            L1State::unpack(p.demote(L1State::E.pack(), false)),
            L1State::I
        );
        assert_eq!(
            L1State::unpack(p.demote(L1State::IE.pack(), true)),
            L1State::IE
        );
    }
}
