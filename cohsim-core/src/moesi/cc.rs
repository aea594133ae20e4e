// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! MOESI rules for the cache controller.

use cohsim_engine::sim_error;
use cohsim_engine::types::SimResult;

use crate::ccntrl::{
    CCCommand, CCCommandList, CCContext, CCLine, CCSnpCommand, CCSnpCommandList, CCSnpContext,
    CCSnpLine,
};
use crate::msg::{Message, MessageClass, Payload};
use crate::protocol::CCProtocol;

/// The MOESI ACE-to-coherence-message translation.
pub struct MoesiCCProtocol;

impl MoesiCCProtocol {
    /// Emit the ACE response and retire the transaction once the line has
    /// collected everything it was waiting for.
    fn complete_if_ready(&self, ctxt: &CCContext, cl: &mut CCCommandList, line: &CCLine) {
        if !line.is_complete() {
            return;
        }
        cl.push(CCCommand::IssueAceRsp(Message::new(
            ctxt.msg.t,
            ctxt.cc_id,
            Payload::AceCmdRsp {
                is_shared: line.is_shared,
                pass_dirty: line.pass_dirty,
            },
        )));
        cl.push(CCCommand::EndTransaction);
    }
}

impl CCProtocol for MoesiCCProtocol {
    fn apply(&self, ctxt: &CCContext, cl: &mut CCCommandList) -> SimResult {
        match &ctxt.msg.payload {
            Payload::AceCmd { opcode, addr } => {
                let Some(dir) = ctxt.dir else {
                    sim_error!("ACE command without a home directory");
                };
                // Open the transaction with the three-phase command pair.
                cl.push(CCCommand::EmitToNoc {
                    dest: dir,
                    msg: Message::new(ctxt.msg.t, ctxt.cc_id, Payload::CohSrt { addr: *addr }),
                });
                cl.push(CCCommand::EmitToNoc {
                    dest: dir,
                    msg: Message::new(
                        ctxt.msg.t,
                        ctxt.cc_id,
                        Payload::CohCmd {
                            opcode: *opcode,
                            addr: *addr,
                        },
                    ),
                });
                cl.push(CCCommand::StartTransaction(CCLine::new(*addr, *opcode)));
                cl.push(CCCommand::Consume);
                cl.push(CCCommand::WaitNextEpoch);
            }
            Payload::CohCmdRsp => {
                let Some(line) = &ctxt.line else {
                    sim_error!("CohCmdRsp without a transaction in flight: {}", ctxt.msg);
                };
                cl.push(CCCommand::AddCredit(MessageClass::CohCmd));
                cl.push(CCCommand::ApplyCohCmdRsp);
                let mut after = line.clone();
                after.awaiting_coh_cmd_rsp = false;
                self.complete_if_ready(ctxt, cl, &after);
                cl.push(CCCommand::Consume);
                cl.push(CCCommand::WaitNextEpoch);
            }
            Payload::CohEnd {
                is_shared,
                pass_dirty,
                dt_n,
            } => {
                let Some(line) = &ctxt.line else {
                    sim_error!("CohEnd without a transaction in flight: {}", ctxt.msg);
                };
                cl.push(CCCommand::AddCredit(MessageClass::CohSrt));
                cl.push(CCCommand::ApplyCohEnd {
                    is_shared: *is_shared,
                    pass_dirty: *pass_dirty,
                    dt_n: *dt_n,
                });
                let mut after = line.clone();
                after.is_shared = *is_shared;
                after.pass_dirty = *pass_dirty;
                after.dt_n = *dt_n;
                after.awaiting_coh_end = false;
                self.complete_if_ready(ctxt, cl, &after);
                cl.push(CCCommand::Consume);
                cl.push(CCCommand::WaitNextEpoch);
            }
            Payload::Dt => {
                let Some(line) = &ctxt.line else {
                    sim_error!("Dt without a transaction in flight: {}", ctxt.msg);
                };
                cl.push(CCCommand::ApplyDt);
                // Acknowledge the transfer toward its sender.
                cl.push(CCCommand::EmitToNoc {
                    dest: ctxt.msg.origin,
                    msg: Message::new(ctxt.msg.t, ctxt.cc_id, Payload::DtRsp),
                });
                let mut after = line.clone();
                after.dt_i += 1;
                self.complete_if_ready(ctxt, cl, &after);
                cl.push(CCCommand::Consume);
                cl.push(CCCommand::WaitNextEpoch);
            }
            _ => {
                sim_error!("invalid message class received: {}", ctxt.msg);
            }
        }
        Ok(())
    }

    fn apply_snp(&self, ctxt: &CCSnpContext, cl: &mut CCSnpCommandList) -> SimResult {
        match &ctxt.msg.payload {
            Payload::CohSnp {
                opcode,
                addr,
                agent,
            } => {
                // A snoop for a line whose own request has been ordered at
                // the directory must wait for the grant to land; before
                // ordering, the snoop simply sees the pre-request state.
                if let Some(req_t) = ctxt.req_stall {
                    cl.push(CCSnpCommand::BlockOnReqTransaction(req_t));
                    cl.push(CCSnpCommand::WaitNextEpoch);
                    return Ok(());
                }
                cl.push(CCSnpCommand::StartTransaction(CCSnpLine {
                    addr: *addr,
                    origin: ctxt.msg.origin,
                    agent: *agent,
                    dt_sent: false,
                }));
                cl.push(CCSnpCommand::IssueAceSnp(Message::new(
                    ctxt.msg.t,
                    ctxt.cc_id,
                    Payload::AceSnp {
                        opcode: *opcode,
                        addr: *addr,
                    },
                )));
                cl.push(CCSnpCommand::Consume);
                cl.push(CCSnpCommand::WaitNextEpoch);
            }
            Payload::AceSnpRsp {
                dt,
                pd,
                is_shared,
                was_unique,
            } => {
                let Some(line) = &ctxt.line else {
                    sim_error!("snoop response without a transaction: {}", ctxt.msg);
                };
                let forwards_data = *dt && line.agent.is_some();
                if forwards_data {
                    // Intervention: pass the data to the requesting agent;
                    // the snoop closes on its DtRsp.
                    cl.push(CCSnpCommand::EmitToNoc {
                        dest: line.agent.unwrap(),
                        msg: Message::new(ctxt.msg.t, ctxt.cc_id, Payload::Dt),
                    });
                    cl.push(CCSnpCommand::MarkDtSent);
                }
                // Always answer the originating directory; on a write-back
                // snoop (no target agent) the directory drives the LLC.
                cl.push(CCSnpCommand::EmitToNoc {
                    dest: line.origin,
                    msg: Message::new(
                        ctxt.msg.t,
                        ctxt.cc_id,
                        Payload::CohSnpRsp {
                            dt: *dt,
                            pd: *pd,
                            is_shared: *is_shared,
                            was_unique: *was_unique,
                        },
                    ),
                });
                if !forwards_data {
                    cl.push(CCSnpCommand::EndTransaction);
                }
                cl.push(CCSnpCommand::Consume);
                cl.push(CCSnpCommand::WaitNextEpoch);
            }
            Payload::DtRsp => {
                if ctxt.line.is_none() {
                    sim_error!("DtRsp without a snoop transaction: {}", ctxt.msg);
                }
                cl.push(CCSnpCommand::AddCredit(MessageClass::Dt));
                cl.push(CCSnpCommand::EndTransaction);
                cl.push(CCSnpCommand::Consume);
                cl.push(CCSnpCommand::WaitNextEpoch);
            }
            _ => {
                sim_error!("invalid message class received: {}", ctxt.msg);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::AceCmdOpcode;
    use crate::types::{AgentId, TransactionId};

    fn req_ctxt(line: Option<CCLine>, payload: Payload) -> CCContext {
        CCContext {
            msg: Message::new(TransactionId(9), AgentId(1), payload),
            line,
            dir: Some(AgentId(7)),
            cc_id: AgentId(2),
        }
    }

    #[test]
    fn ace_cmd_opens_three_phase_pair() {
        let p = MoesiCCProtocol;
        let c = req_ctxt(
            None,
            Payload::AceCmd {
                opcode: AceCmdOpcode::ReadShared,
                addr: 0x40,
            },
        );
        let mut cl = CCCommandList::default();
        p.apply(&c, &mut cl).unwrap();

        let classes: Vec<MessageClass> = cl
            .iter()
            .filter_map(|cmd| match cmd {
                CCCommand::EmitToNoc { msg, .. } => Some(msg.cls()),
                _ => None,
            })
            .collect();
        assert_eq!(classes, vec![MessageClass::CohSrt, MessageClass::CohCmd]);
        assert!(cl.iter().any(|c| matches!(c, CCCommand::StartTransaction(_))));
    }

    #[test]
    fn line_completes_once_all_replies_land() {
        let p = MoesiCCProtocol;
        let mut line = CCLine::new(0x40, AceCmdOpcode::ReadShared);
        line.awaiting_coh_cmd_rsp = false;
        line.dt_i = 1;

        // CohEnd expecting exactly the one transfer already received.
        let c = req_ctxt(
            Some(line),
            Payload::CohEnd {
                is_shared: true,
                pass_dirty: false,
                dt_n: 1,
            },
        );
        let mut cl = CCCommandList::default();
        p.apply(&c, &mut cl).unwrap();
        assert!(cl.iter().any(|cmd| matches!(
            cmd,
            CCCommand::IssueAceRsp(m) if matches!(
                m.payload,
                Payload::AceCmdRsp { is_shared: true, pass_dirty: false }
            )
        )));
        assert!(cl.iter().any(|cmd| matches!(cmd, CCCommand::EndTransaction)));
    }

    #[test]
    fn incomplete_line_does_not_respond() {
        let p = MoesiCCProtocol;
        let mut line = CCLine::new(0x40, AceCmdOpcode::ReadShared);
        line.awaiting_coh_cmd_rsp = false;

        // CohEnd expects one transfer that has not yet arrived.
        let c = req_ctxt(
            Some(line),
            Payload::CohEnd {
                is_shared: false,
                pass_dirty: false,
                dt_n: 1,
            },
        );
        let mut cl = CCCommandList::default();
        p.apply(&c, &mut cl).unwrap();
        assert!(!cl.iter().any(|cmd| matches!(cmd, CCCommand::IssueAceRsp(_))));
    }

    #[test]
    fn ordered_request_stalls_snoop() {
        let p = MoesiCCProtocol;
        let c = CCSnpContext {
            msg: Message::new(
                TransactionId(5),
                AgentId(7),
                Payload::CohSnp {
                    opcode: crate::msg::AceSnpOpcode::ReadShared,
                    addr: 0x40,
                    agent: Some(AgentId(3)),
                },
            ),
            line: None,
            req_stall: Some(TransactionId(4)),
            cc_id: AgentId(2),
        };
        let mut cl = CCSnpCommandList::default();
        p.apply_snp(&c, &mut cl).unwrap();
        assert!(cl
            .iter()
            .any(|cmd| matches!(cmd, CCSnpCommand::BlockOnReqTransaction(_))));
        assert!(!cl.iter().any(|cmd| matches!(cmd, CCSnpCommand::Consume)));
    }
}
