// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! Messages exchanged between agents.
//!
//! Every message carries its parent transaction, the originating agent and
//! a class-specific payload. Messages are plain values: ownership moves
//! through the queues, so a message is held by exactly one agent at a time
//! and releasing it is simply dropping it.

use std::fmt;

use crate::types::{Addr, AgentId, TransactionId};

/// Opcodes issued by a CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuOpcode {
    /// Load from a region contained within a single cache line.
    Load,
    /// Store to a region contained within a single cache line.
    Store,
}

/// Opcodes of L1 to L2 commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum L2CmdOpcode {
    /// Obtain a shareable (readable) copy.
    L1GetS,
    /// Obtain an exclusive (writeable) copy.
    L1GetE,
}

/// ACE command opcodes issued by an L2 toward its cache controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AceCmdOpcode {
    /// Read with the intent to share.
    ReadShared,
    /// Read with the intent to modify; all other copies are invalidated.
    ReadUnique,
    /// Invalidate all other copies; the requester already holds the data.
    CleanUnique,
}

/// ACE snoop opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AceSnpOpcode {
    /// Request a shareable copy from the snooped cache.
    ReadShared,
    /// Request the line and invalidate the snooped cache.
    ReadUnique,
    /// Invalidate; transfer data only if held dirty.
    CleanInvalid,
    /// Invalidate; never transfer data.
    MakeInvalid,
}

/// Opcodes of directory to LLC commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LLCCmdOpcode {
    /// Transfer a line from main memory to the cache.
    Fill,
    /// Write a line back to main memory and remove it.
    Evict,
    /// Transfer a line present in the cache to some agent.
    PutLine,
}

/// LLC command response status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LLCRspStatus {
    /// Command completed successfully.
    Okay,
}

/// Memory command opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemCmdOpcode {
    /// Read a line.
    Read,
    /// Write a line.
    Write,
}

/// Memory response opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemRspOpcode {
    /// Read completed.
    ReadOkay,
    /// Write completed.
    WriteOkay,
}

/// Discriminant of a message, used for endpoint demultiplexing and credit
/// accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum MessageClass {
    CpuCmd,
    CpuRsp,
    L2Cmd,
    L2CmdRsp,
    AceCmd,
    AceCmdRsp,
    AceSnp,
    AceSnpRsp,
    CohSrt,
    CohCmd,
    CohCmdRsp,
    CohEnd,
    CohSnp,
    CohSnpRsp,
    Dt,
    DtRsp,
    LLCCmd,
    LLCRsp,
    MemCmd,
    MemRsp,
    Noc,
}

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Class-specific message payloads.
#[derive(Clone, Debug)]
pub enum Payload {
    /// CPU to L1 command.
    CpuCmd {
        /// Load or store.
        opcode: CpuOpcode,
        /// Target address.
        addr: Addr,
    },
    /// L1 to CPU response.
    CpuRsp,
    /// L1 to L2 command.
    L2Cmd {
        /// GetS or GetE.
        opcode: L2CmdOpcode,
        /// Target address.
        addr: Addr,
        /// Index of the issuing L1 within the cluster.
        l1: usize,
    },
    /// L2 to L1 response.
    L2CmdRsp {
        /// The granted copy is shared (not writeable).
        is_shared: bool,
    },
    /// L2 to CC ACE command.
    AceCmd {
        /// The ACE opcode.
        opcode: AceCmdOpcode,
        /// Target address.
        addr: Addr,
    },
    /// CC to L2 ACE response.
    AceCmdRsp {
        /// Line granted shared.
        is_shared: bool,
        /// Dirty responsibility passed to the requester.
        pass_dirty: bool,
    },
    /// CC to L2 snoop.
    AceSnp {
        /// The snoop opcode.
        opcode: AceSnpOpcode,
        /// Target address.
        addr: Addr,
    },
    /// L2 to CC snoop response.
    AceSnpRsp {
        /// Data transferred.
        dt: bool,
        /// Dirty responsibility passed.
        pd: bool,
        /// Snooped cache retained a shared copy.
        is_shared: bool,
        /// Snooped cache held the line unique.
        was_unique: bool,
    },
    /// Coherence transaction start (CC to directory).
    CohSrt {
        /// Target address.
        addr: Addr,
    },
    /// Coherence command (CC to directory).
    CohCmd {
        /// The ACE opcode being performed.
        opcode: AceCmdOpcode,
        /// Target address.
        addr: Addr,
    },
    /// Coherence command acknowledge; releases the `CohCmd` credit.
    CohCmdRsp,
    /// Coherence transaction end (directory to requesting CC).
    CohEnd {
        /// Line granted shared.
        is_shared: bool,
        /// Dirty responsibility passed.
        pass_dirty: bool,
        /// Number of data transfers the requester should expect.
        dt_n: usize,
    },
    /// Coherence snoop (directory to CC).
    CohSnp {
        /// The snoop opcode.
        opcode: AceSnpOpcode,
        /// Target address.
        addr: Addr,
        /// Agent to which intervention data should be passed; when absent
        /// the line is written back to the home LLC if dirty.
        agent: Option<AgentId>,
    },
    /// Coherence snoop response (CC to directory).
    CohSnpRsp {
        /// Data transferred.
        dt: bool,
        /// Dirty responsibility passed.
        pd: bool,
        /// Snooped cluster retained a shared copy.
        is_shared: bool,
        /// Snooped cluster held the line unique.
        was_unique: bool,
    },
    /// Data transfer (intervention or fill).
    Dt,
    /// Data transfer acknowledge; releases the `Dt` credit.
    DtRsp,
    /// Directory to LLC command.
    LLCCmd {
        /// Fill, evict or put.
        opcode: LLCCmdOpcode,
        /// Target address.
        addr: Addr,
        /// Agent to which the line should be transferred, if any.
        agent: Option<AgentId>,
    },
    /// LLC to directory response.
    LLCRsp {
        /// The original command opcode.
        opcode: LLCCmdOpcode,
        /// Completion status.
        status: LLCRspStatus,
    },
    /// LLC to memory command.
    MemCmd {
        /// Read or write.
        opcode: MemCmdOpcode,
    },
    /// Memory to LLC response.
    MemRsp {
        /// Completion opcode.
        opcode: MemRspOpcode,
    },
    /// NOC transport envelope.
    Noc {
        /// The encapsulated message.
        payload: Box<Message>,
        /// Destination agent.
        dest: AgentId,
    },
}

/// A message in flight between two agents.
#[derive(Clone, Debug)]
pub struct Message {
    /// Parent transaction.
    pub t: TransactionId,
    /// Originating agent.
    pub origin: AgentId,
    /// Class-specific payload.
    pub payload: Payload,
}

impl Message {
    /// Construct a message.
    #[must_use]
    pub fn new(t: TransactionId, origin: AgentId, payload: Payload) -> Self {
        Self { t, origin, payload }
    }

    /// The class of this message.
    #[must_use]
    pub fn cls(&self) -> MessageClass {
        match &self.payload {
            Payload::CpuCmd { .. } => MessageClass::CpuCmd,
            Payload::CpuRsp => MessageClass::CpuRsp,
            Payload::L2Cmd { .. } => MessageClass::L2Cmd,
            Payload::L2CmdRsp { .. } => MessageClass::L2CmdRsp,
            Payload::AceCmd { .. } => MessageClass::AceCmd,
            Payload::AceCmdRsp { .. } => MessageClass::AceCmdRsp,
            Payload::AceSnp { .. } => MessageClass::AceSnp,
            Payload::AceSnpRsp { .. } => MessageClass::AceSnpRsp,
            Payload::CohSrt { .. } => MessageClass::CohSrt,
            Payload::CohCmd { .. } => MessageClass::CohCmd,
            Payload::CohCmdRsp => MessageClass::CohCmdRsp,
            Payload::CohEnd { .. } => MessageClass::CohEnd,
            Payload::CohSnp { .. } => MessageClass::CohSnp,
            Payload::CohSnpRsp { .. } => MessageClass::CohSnpRsp,
            Payload::Dt => MessageClass::Dt,
            Payload::DtRsp => MessageClass::DtRsp,
            Payload::LLCCmd { .. } => MessageClass::LLCCmd,
            Payload::LLCRsp { .. } => MessageClass::LLCRsp,
            Payload::MemCmd { .. } => MessageClass::MemCmd,
            Payload::MemRsp { .. } => MessageClass::MemRsp,
            Payload::Noc { .. } => MessageClass::Noc,
        }
    }

    /// Wrap this message in a NOC transport envelope addressed to `dest`.
    #[must_use]
    pub fn into_noc(self, dest: AgentId) -> Message {
        Message {
            t: self.t,
            origin: self.origin,
            payload: Payload::Noc {
                payload: Box::new(self),
                dest,
            },
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{{t:{}, origin:{}", self.cls(), self.t, self.origin)?;
        match &self.payload {
            Payload::CpuCmd { opcode, addr } => write!(f, ", opcode:{opcode:?}, addr:{addr:#x}")?,
            Payload::L2Cmd { opcode, addr, l1 } => {
                write!(f, ", opcode:{opcode:?}, addr:{addr:#x}, l1:{l1}")?;
            }
            Payload::L2CmdRsp { is_shared } => write!(f, ", is:{is_shared}")?,
            Payload::AceCmd { opcode, addr } => write!(f, ", opcode:{opcode:?}, addr:{addr:#x}")?,
            Payload::AceCmdRsp {
                is_shared,
                pass_dirty,
            } => write!(f, ", is:{is_shared}, pd:{pass_dirty}")?,
            Payload::AceSnp { opcode, addr } => write!(f, ", opcode:{opcode:?}, addr:{addr:#x}")?,
            Payload::AceSnpRsp {
                dt,
                pd,
                is_shared,
                was_unique,
            } => write!(f, ", dt:{dt}, pd:{pd}, is:{is_shared}, wu:{was_unique}")?,
            Payload::CohSrt { addr } => write!(f, ", addr:{addr:#x}")?,
            Payload::CohCmd { opcode, addr } => write!(f, ", opcode:{opcode:?}, addr:{addr:#x}")?,
            Payload::CohEnd {
                is_shared,
                pass_dirty,
                dt_n,
            } => write!(f, ", is:{is_shared}, pd:{pass_dirty}, dt_n:{dt_n}")?,
            Payload::CohSnp {
                opcode,
                addr,
                agent,
            } => write!(f, ", opcode:{opcode:?}, addr:{addr:#x}, agent:{agent:?}")?,
            Payload::CohSnpRsp {
                dt,
                pd,
                is_shared,
                was_unique,
            } => write!(f, ", dt:{dt}, pd:{pd}, is:{is_shared}, wu:{was_unique}")?,
            Payload::LLCCmd {
                opcode,
                addr,
                agent,
            } => write!(f, ", opcode:{opcode:?}, addr:{addr:#x}, agent:{agent:?}")?,
            Payload::LLCRsp { opcode, status } => {
                write!(f, ", opcode:{opcode:?}, status:{status:?}")?;
            }
            Payload::MemCmd { opcode } => write!(f, ", opcode:{opcode:?}")?,
            Payload::MemRsp { opcode } => write!(f, ", opcode:{opcode:?}")?,
            Payload::Noc { payload, dest } => write!(f, ", dest:{dest}, payload:{payload}")?,
            Payload::CpuRsp | Payload::CohCmdRsp | Payload::Dt | Payload::DtRsp => {}
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_of_payload() {
        let m = Message::new(
            TransactionId(1),
            AgentId(0),
            Payload::AceCmd {
                opcode: AceCmdOpcode::ReadShared,
                addr: 0x40,
            },
        );
        assert_eq!(m.cls(), MessageClass::AceCmd);
    }

    #[test]
    fn noc_envelope_wraps_payload() {
        let m = Message::new(TransactionId(3), AgentId(1), Payload::Dt);
        let wrapped = m.into_noc(AgentId(5));
        assert_eq!(wrapped.cls(), MessageClass::Noc);
        match wrapped.payload {
            Payload::Noc { payload, dest } => {
                assert_eq!(dest, AgentId(5));
                assert_eq!(payload.cls(), MessageClass::Dt);
                assert_eq!(payload.t, TransactionId(3));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn display_renders_fields() {
        let m = Message::new(
            TransactionId(7),
            AgentId(2),
            Payload::CohEnd {
                is_shared: true,
                pass_dirty: false,
                dt_n: 1,
            },
        );
        let s = format!("{m}");
        assert!(s.starts_with("CohEnd{"));
        assert!(s.contains("t:t7"));
        assert!(s.contains("dt_n:1"));
    }
}
