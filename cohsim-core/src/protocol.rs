// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! Protocol capability interfaces and the protocol registry.
//!
//! Line state is an erased [`State`] byte; each protocol level defines its
//! own tagged-variant enum over it. The agents stay protocol-agnostic: they
//! pass a context to the protocol's `apply` hook and execute the returned
//! command list under a resource check, so protocol actions remain
//! side-effect-free until commit.

use std::collections::HashMap;
use std::rc::Rc;

use cohsim_engine::sim_error;
use cohsim_engine::types::{SimError, SimResult};

use crate::ccntrl::{CCCommandList, CCContext, CCSnpCommandList, CCSnpContext};
use crate::dir::{DirCommandList, DirContext};
use crate::l1cache::{L1CommandList, L1Context};
use crate::l2cache::{L2CommandList, L2Context};
use crate::types::State;

/// The CPU-facing L1 protocol state machine.
pub trait L1Protocol {
    /// The state a freshly constructed line starts in.
    fn initial_state(&self) -> State;

    /// Apply the protocol to the message at the head of the nominated
    /// queue, emitting a command list.
    fn apply(&self, ctxt: &L1Context, cl: &mut L1CommandList) -> SimResult;

    /// Emit the commands that evict the victim line in `ctxt`.
    fn evict(&self, ctxt: &L1Context, cl: &mut L1CommandList) -> SimResult;

    /// The state a line demotes to on an L2-initiated back-door demotion.
    fn demote(&self, state: State, shared: bool) -> State;

    /// The line is not in a transient state.
    fn is_stable(&self, state: State) -> bool;

    /// The line may service loads.
    fn is_readable(&self, state: State) -> bool;

    /// The line may service stores.
    fn is_writeable(&self, state: State) -> bool;

    /// Human-readable state name.
    fn state_name(&self, state: State) -> &'static str;
}

/// The cluster-level L2 protocol state machine (ACE master side).
pub trait L2Protocol {
    /// The state a freshly constructed line starts in.
    fn initial_state(&self) -> State;

    /// Apply the protocol to the head message, emitting a command list.
    fn apply(&self, ctxt: &L2Context, cl: &mut L2CommandList) -> SimResult;

    /// Emit the commands that evict the victim line in `ctxt`.
    fn evict(&self, ctxt: &L2Context, cl: &mut L2CommandList) -> SimResult;

    /// The state reached when an L1 store promotes its line to Modified.
    fn set_modified(&self, state: State) -> Result<State, SimError>;

    /// The line is not in a transient state.
    fn is_stable(&self, state: State) -> bool;

    /// The line may be read below this L2.
    fn is_readable(&self, state: State) -> bool;

    /// The line may be written below this L2.
    fn is_writeable(&self, state: State) -> bool;

    /// Human-readable state name.
    fn state_name(&self, state: State) -> &'static str;
}

/// The cache-controller protocol: ACE to coherence-message translation.
pub trait CCProtocol {
    /// Apply the protocol to a request-side message.
    fn apply(&self, ctxt: &CCContext, cl: &mut CCCommandList) -> SimResult;

    /// Apply the protocol to a snoop-side message.
    fn apply_snp(&self, ctxt: &CCSnpContext, cl: &mut CCSnpCommandList) -> SimResult;
}

/// The directory (home node) protocol.
pub trait DirProtocol {
    /// The state a freshly constructed directory line starts in.
    fn initial_state(&self) -> State;

    /// Apply the protocol to the head message, emitting a command list.
    fn apply(&self, ctxt: &DirContext, cl: &mut DirCommandList) -> SimResult;

    /// Emit the commands that begin a recall of the victim line in `ctxt`.
    fn recall(&self, ctxt: &DirContext, cl: &mut DirCommandList) -> SimResult;

    /// The line is not in a transient state.
    fn is_stable(&self, state: State) -> bool;

    /// Human-readable state name.
    fn state_name(&self, state: State) -> &'static str;
}

/// Constructs the per-level protocol instances of one protocol family.
pub trait ProtocolBuilder {
    /// Create an instance of the L1 protocol.
    fn create_l1(&self) -> Box<dyn L1Protocol>;

    /// Create an instance of the L2 protocol.
    fn create_l2(&self) -> Box<dyn L2Protocol>;

    /// Create an instance of the cache-controller protocol.
    fn create_cc(&self) -> Box<dyn CCProtocol>;

    /// Create an instance of the directory protocol.
    fn create_dir(&self) -> Box<dyn DirProtocol>;
}

/// Registry of protocol families keyed by name.
///
/// An explicit value passed through configuration; the builder receives it
/// by reference. A request for an unknown name is a configuration error.
#[derive(Default)]
pub struct ProtocolRegistry {
    m: HashMap<String, Rc<dyn ProtocolBuilder>>,
}

impl ProtocolRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in protocol families.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("moesi", Rc::new(crate::moesi::MoesiProtocolBuilder));
        registry
    }

    /// Register a protocol family under `name`.
    pub fn register(&mut self, name: &str, builder: Rc<dyn ProtocolBuilder>) {
        self.m.insert(name.to_owned(), builder);
    }

    /// Look up a protocol family; unknown names are configuration errors.
    pub fn lookup(&self, name: &str) -> Result<Rc<dyn ProtocolBuilder>, SimError> {
        match self.m.get(name) {
            Some(builder) => Ok(builder.clone()),
            None => sim_error!("configuration: unknown protocol '{name}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_moesi_registered() {
        let registry = ProtocolRegistry::with_builtins();
        assert!(registry.lookup("moesi").is_ok());
    }

    #[test]
    fn unknown_protocol_is_error() {
        let registry = ProtocolRegistry::with_builtins();
        assert!(registry.lookup("mesi2000").is_err());
    }
}
