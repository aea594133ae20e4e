// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! Simulation primitives.
//!
//! The bounded [`Queue`](crate::queue::Queue), the round-robin
//! [`Arbiter`](crate::arbiter::Arbiter) with deadlock detection, the
//! fixed-capacity [`Table`](crate::table::Table), the
//! [`CreditCounter`](crate::credit::CreditCounter) and the set-associative
//! [`CacheModel`](crate::cache::CacheModel) are the building blocks from
//! which every agent of the coherence model is assembled.

pub mod arbiter;
pub mod cache;
pub mod credit;
pub mod queue;
pub mod table;
