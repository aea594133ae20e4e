// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! `cohsim-core` - the distributed cache-coherence engine.
//!
//! A cycle-approximate, discrete-event model of a chip-multiprocessor
//! memory hierarchy: CPUs drive private L1 caches, per-cluster shared L2
//! caches sit behind a cache controller (CC) that bridges the cluster to a
//! credit-based network-on-chip, and one or more directory agents (each
//! with a last-level cache) provide the home nodes backed by a main-memory
//! controller.
//!
//! Each agent is a set of bounded message queues driven by a local process
//! that applies the coherence protocol to one selected queue per
//! arbitration round, producing a command list that is executed atomically
//! under a resource check.
//!
//! The [`SocTop`](crate::soc::SocTop) performs elaboration; protocols are
//! looked up by name in a [`ProtocolRegistry`](crate::protocol::ProtocolRegistry)
//! (the MOESI family is built in); stimulus is either programmatic or read
//! from a trace file.

pub mod ccntrl;
pub mod cfgs;
pub mod cpu;
pub mod dir;
pub mod l1cache;
pub mod l2cache;
pub mod llc;
pub mod mem;
pub mod moesi;
pub mod monitor;
pub mod mq;
pub mod msg;
pub mod noc;
pub mod protocol;
pub mod soc;
pub mod stimulus;
pub mod testing;
pub mod types;
