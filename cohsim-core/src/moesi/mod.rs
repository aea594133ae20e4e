// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! The MOESI protocol family.
//!
//! Concrete line states and apply/evict rules for the L1, L2, CC and
//! directory agents. Line states are tagged variants packed into the
//! erased [`State`](crate::types::State) byte the agents store.

mod cc;
mod dir;
mod l1;
mod l2;

pub use cc::MoesiCCProtocol;
pub use dir::MoesiDirProtocol;
pub use l1::MoesiL1Protocol;
pub use l2::MoesiL2Protocol;

use crate::protocol::{CCProtocol, DirProtocol, L1Protocol, L2Protocol, ProtocolBuilder};
use crate::types::State;

/// MOESI L1 line states, stable and transient.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum L1State {
    /// Invalid.
    I = 0,
    /// Fill for a load in flight.
    IS,
    /// Shared.
    S,
    /// Fill or upgrade for a store in flight.
    IE,
    /// Exclusive.
    E,
    /// Store promotion in progress.
    EM,
    /// Modified.
    M,
    /// Eviction of a modified line in progress.
    MI,
}

impl L1State {
    pub(crate) fn unpack(state: State) -> Self {
        match state {
            0 => Self::I,
            1 => Self::IS,
            2 => Self::S,
            3 => Self::IE,
            4 => Self::E,
            5 => Self::EM,
            6 => Self::M,
            7 => Self::MI,
            _ => panic!("invalid MOESI L1 state encoding {state}"),
        }
    }

    pub(crate) fn pack(self) -> State {
        self as State
    }
}

/// MOESI L2 line states, stable and transient.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum L2State {
    /// Invalid.
    I = 0,
    /// Fill for a shareable copy in flight.
    IS,
    /// Fill or upgrade for an exclusive copy in flight.
    IE,
    /// Shared.
    S,
    /// Exclusive.
    E,
    /// Modified.
    M,
    /// Owned (dirty, shared).
    O,
    /// Owned-to-exclusive upgrade in flight.
    OE,
}

impl L2State {
    pub(crate) fn unpack(state: State) -> Self {
        match state {
            0 => Self::I,
            1 => Self::IS,
            2 => Self::IE,
            3 => Self::S,
            4 => Self::E,
            5 => Self::M,
            6 => Self::O,
            7 => Self::OE,
            _ => panic!("invalid MOESI L2 state encoding {state}"),
        }
    }

    pub(crate) fn pack(self) -> State {
        self as State
    }
}

/// MOESI directory line states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DirState {
    /// No cluster holds the line.
    I = 0,
    /// One or more clusters hold shared copies.
    S,
    /// A single cluster holds the line clean and exclusive.
    E,
    /// A single cluster holds the line dirty.
    M,
    /// A cluster owns the line dirty while others share it.
    O,
}

impl DirState {
    pub(crate) fn unpack(state: State) -> Self {
        match state {
            0 => Self::I,
            1 => Self::S,
            2 => Self::E,
            3 => Self::M,
            4 => Self::O,
            _ => panic!("invalid MOESI directory state encoding {state}"),
        }
    }

    pub(crate) fn pack(self) -> State {
        self as State
    }
}

/// Builder for the MOESI protocol family, registered as `"moesi"`.
pub struct MoesiProtocolBuilder;

impl ProtocolBuilder for MoesiProtocolBuilder {
    fn create_l1(&self) -> Box<dyn L1Protocol> {
        Box::new(MoesiL1Protocol)
    }

    fn create_l2(&self) -> Box<dyn L2Protocol> {
        Box::new(MoesiL2Protocol)
    }

    fn create_cc(&self) -> Box<dyn CCProtocol> {
        Box::new(MoesiCCProtocol)
    }

    fn create_dir(&self) -> Box<dyn DirProtocol> {
        Box::new(MoesiDirProtocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_pack_roundtrip() {
        for s in [
            L1State::I,
            L1State::IS,
            L1State::S,
            L1State::IE,
            L1State::E,
            L1State::EM,
            L1State::M,
            L1State::MI,
        ] {
            assert_eq!(L1State::unpack(s.pack()), s);
        }
        for s in [
            L2State::I,
            L2State::IS,
            L2State::IE,
            L2State::S,
            L2State::E,
            L2State::M,
            L2State::O,
            L2State::OE,
        ] {
            assert_eq!(L2State::unpack(s.pack()), s);
        }
        for s in [
            DirState::I,
            DirState::S,
            DirState::E,
            DirState::M,
            DirState::O,
        ] {
            assert_eq!(DirState::unpack(s.pack()), s);
        }
    }
}
