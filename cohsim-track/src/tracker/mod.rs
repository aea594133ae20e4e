// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! Define the [`Track`] trait and a number of trackers.

/// Include the /dev/null tracker.
pub mod dev_null;
/// Include the text-based tracker.
pub mod text;

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub use dev_null::DevNullTracker;
use regex::Regex;
pub use text::TextTracker;

use crate::{ROOT, Tag};

/// Trace enable state used when configuring an [`EntityManager`].
#[derive(Copy, Clone, PartialEq, Eq)]
pub enum TraceState {
    /// Trace events are recorded.
    Enabled,
    /// Trace events are suppressed.
    Disabled,
}

/// This is the interface that is supported by all trackers.
pub trait Track {
    /// Allocate a new global tag.
    fn unique_tag(&self) -> Tag;

    /// Determine whether an event at `level` should be emitted for the
    /// entity with the given tag.
    fn is_entity_enabled(&self, tag: Tag, level: log::Level) -> bool;

    /// Register an entity name against its tag.
    fn add_entity(&self, tag: Tag, entity_name: &str);

    /// Track when an entity with the given tag is created.
    fn create(&self, created_by: Tag, tag: Tag, name: &str);

    /// Track when an entity with the given tag is destroyed.
    fn destroy(&self, destroyed_by: Tag, tag: Tag);

    /// Track a log message of the given level.
    fn log(&self, tag: Tag, level: log::Level, msg: std::fmt::Arguments);

    /// Advance the simulation time.
    fn time(&self, set_by: Tag, time: u64);

    /// Flush any pending output.
    fn shutdown(&self);
}

/// The type of a tracker that is shared across entities.
pub type Tracker = Arc<dyn Track + Send + Sync>;

/// Create a [`Tracker`] that prints all track events to `stdout`.
pub fn stdout_tracker(level: log::Level) -> Tracker {
    let manager = EntityManager::new(TraceState::Disabled, level);
    let stdout_writer = Box::new(io::BufWriter::new(io::stdout()));
    Arc::new(TextTracker::new(manager, stdout_writer))
}

/// Create a [`Tracker`] that suppresses all track events.
pub fn dev_null_tracker() -> Tracker {
    Arc::new(DevNullTracker {})
}

/// The [`EntityManager`] is responsible for determining entity log / trace
/// enable states.
///
/// This manager is also used to allocate unique [`Tag`] values.
pub struct EntityManager {
    /// Whether trace events are emitted by default.
    default_trace_enabled: bool,

    /// Level of _log_ events to output by default.
    default_log_level: log::Level,

    /// List of regular expressions mapping entity names to log levels. The
    /// first matching pattern wins.
    regex_to_log_level: Vec<(Regex, log::Level)>,

    /// Used to assign unique tags.
    unique_tag: AtomicU64,

    /// Names of all registered entities, indexed by tag.
    entity_names: Mutex<Vec<(Tag, String)>>,
}

impl EntityManager {
    /// Constructor with [`TraceState`] and [`log::Level`].
    #[must_use]
    pub fn new(default_trace_enabled: TraceState, default_log_level: log::Level) -> Self {
        Self {
            default_trace_enabled: default_trace_enabled == TraceState::Enabled,
            default_log_level,
            regex_to_log_level: Vec::new(),
            unique_tag: AtomicU64::new(ROOT.raw() + 1),
            entity_names: Mutex::new(Vec::new()),
        }
    }

    /// Add a log filter regular expression.
    ///
    /// # Example
    ///
    /// ```rust
    /// use cohsim_track::tracker::{EntityManager, TraceState};
    /// let mut manager = EntityManager::new(TraceState::Disabled, log::Level::Warn);
    /// manager.add_log_filter(".*arb.*", log::Level::Trace);
    /// ```
    pub fn add_log_filter(&mut self, regex_str: &str, level: log::Level) {
        match Regex::new(regex_str) {
            Ok(regex) => self.regex_to_log_level.push((regex, level)),
            Err(e) => panic!("Failed to parse regex {regex_str}:\n{e}\n"),
        };
    }

    pub(crate) fn unique_tag(&self) -> Tag {
        let tag = self.unique_tag.fetch_add(1, Ordering::SeqCst);
        Tag::new(tag)
    }

    pub(crate) fn add_entity(&self, tag: Tag, name: &str) {
        self.entity_names
            .lock()
            .unwrap()
            .push((tag, name.to_owned()));
    }

    pub(crate) fn name_for(&self, tag: Tag) -> String {
        let names = self.entity_names.lock().unwrap();
        match names.iter().find(|(t, _)| *t == tag) {
            Some((_, name)) => name.clone(),
            None => tag.to_string(),
        }
    }

    pub(crate) fn is_enabled(&self, tag: Tag, level: log::Level) -> bool {
        let name = self.name_for(tag);
        if level <= self.log_level_for(&name) {
            return true;
        }
        // Trace-level events (entity creation, time updates) can be enabled
        // globally regardless of the per-entity log level.
        level == log::Level::Trace && self.default_trace_enabled
    }

    fn log_level_for(&self, entity_name: &str) -> log::Level {
        for (regex, level) in self.regex_to_log_level.iter() {
            if regex.is_match(entity_name) {
                return *level;
            }
        }
        self.default_log_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity_paths() -> Vec<&'static str> {
        vec!["top", "top::cl0", "top::cl0::l1c0", "top::cl0::l1c1"]
    }

    #[test]
    fn no_filters() {
        let manager = EntityManager::new(TraceState::Disabled, log::Level::Error);
        for p in entity_paths() {
            assert_eq!(manager.log_level_for(p), log::Level::Error);
        }
    }

    #[test]
    fn first_filter_wins() {
        let mut manager = EntityManager::new(TraceState::Disabled, log::Level::Error);
        manager.add_log_filter(r".*l1c0", log::Level::Info);
        manager.add_log_filter(r".*cl0.*", log::Level::Trace);
        manager.add_log_filter(r"top.*", log::Level::Warn);

        let expected_levels = [
            log::Level::Warn,
            log::Level::Trace,
            log::Level::Info,
            log::Level::Trace,
        ];
        for (i, p) in entity_paths().iter().enumerate() {
            assert_eq!(manager.log_level_for(p), expected_levels[i]);
        }
    }

    #[test]
    fn tags() {
        let manager = EntityManager::new(TraceState::Disabled, log::Level::Error);
        for i in 0..10 {
            assert_eq!(manager.unique_tag(), Tag::new(i + ROOT.raw() + 1));
        }
    }
}
