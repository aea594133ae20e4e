// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! This module provides combined _track_ capabilities for the cohsim project.
//!
//! _Track_ means the combination of _log_ and _trace_ where:
//!
//!   - _log_ are text-based human-readable messages emitted at various levels
//!     of verbosity (from `Trace` through to `Error`).
//!   - _trace_ provides a standard set of modelling events that can be
//!     emitted, for example entity creation/destruction and simulation time
//!     updates.
//!
//! Every part of a model owns an [`Entity`](crate::entity::Entity) which
//! carries its hierarchical name, a unique [`Tag`] and a shared [`Tracker`].
//! The logging macros take the entity as their first argument so that
//! messages can be filtered per entity.

#![warn(missing_docs)]

use std::fmt;
use std::sync::{Arc, Mutex};

pub use log;

pub mod entity;

/// Include the trackers.
pub mod tracker;
pub use tracker::{Track, Tracker};

pub mod test_helpers;

/// A type alias for objects that receive _log_ / _trace_ events.
///
/// The writer must implement Send in order to be shared between threads.
pub type Writer = Box<dyn std::io::Write + Send>;
type SharedWriter = Arc<Mutex<Writer>>;

/// Identifies one event source (usually an entity) across the simulation.
///
/// Tags are allocated by the [`Tracker`] and stamped onto every trace and
/// log event. Two values are reserved: [`NO_ID`] marks the absence of a
/// tag and [`ROOT`] is the ancestor all others derive from.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Tag(u64);

impl Tag {
    /// Construct a tag from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw value, for allocators that hand out consecutive tags.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tag value which indicates that there is no valid tag.
pub const NO_ID: Tag = Tag::new(0);

/// The root tag from which all other tags are derived.
pub const ROOT: Tag = Tag::new(1);

/// Add an entity creation event.
#[macro_export]
macro_rules! create {
    ($entity:expr) => {{
        if $entity
            .tracker
            .is_entity_enabled($entity.tag, $crate::log::Level::Trace)
        {
            let parent_tag = $entity.parent_tag.unwrap_or($crate::NO_ID);
            $entity
                .tracker
                .create(parent_tag, $entity.tag, $entity.path());
        }
    }};
}

/// Add an entity destroy event.
#[macro_export]
macro_rules! destroy {
    ($entity:expr) => {{
        if $entity
            .tracker
            .is_entity_enabled($entity.tag, $crate::log::Level::Trace)
        {
            let parent_tag = $entity.parent_tag.unwrap_or($crate::NO_ID);
            $entity.tracker.destroy($entity.tag, parent_tag);
        }
    }};
}

/// Update the current simulation time.
#[macro_export]
macro_rules! set_time {
    ($entity:expr ; $time:expr) => {{
        if $entity
            .tracker
            .is_entity_enabled($entity.tag, $crate::log::Level::Trace)
        {
            $entity.tracker.time($entity.tag, $time);
        }
    }};
}

/// Base macro for log messages of all levels.
///
/// This wrapper checks the per-entity enable before formatting so that
/// disabled entities pay no formatting cost.
#[macro_export]
macro_rules! log_base {
    ($entity:expr ; $lvl:expr, $($arg:tt)+) => (
        if $entity.tracker.is_entity_enabled($entity.tag, $lvl) {
            $entity.tracker.log($entity.tag, $lvl, format_args!($($arg)+));
        }
    );
}

/// The `trace` macro provides a wrapper for [`log_base`](crate::log_base) at
/// level `log::Level::Trace`.
#[macro_export]
macro_rules! trace {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Trace, $($arg)+);
    );
}

/// The `debug` macro provides a wrapper for [`log_base`](crate::log_base) at
/// level `log::Level::Debug`.
#[macro_export]
macro_rules! debug {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Debug, $($arg)+);
    );
}

/// The `info` macro provides a wrapper for [`log_base`](crate::log_base) at
/// level `log::Level::Info`.
#[macro_export]
macro_rules! info {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Info, $($arg)+);
    );
}

/// The `warn` macro provides a wrapper for [`log_base`](crate::log_base) at
/// level `log::Level::Warn`.
#[macro_export]
macro_rules! warn {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Warn, $($arg)+);
    );
}

/// The `error` macro provides a wrapper for [`log_base`](crate::log_base) at
/// level `log::Level::Error`.
#[macro_export]
macro_rules! error {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Error, $($arg)+);
    );
}
