// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! This module provides helper functions for testing logging output.
//!
//! The aim of this module is to provide commonly-used functions that enable
//! the testing of the output that should appear from the logging macros.

use core::sync::atomic::Ordering;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;

use regex::Regex;

use crate::{Tag, Track};

/// A tracker that keeps track events in memory.
pub struct TestTracker {
    events: Mutex<Vec<String>>,

    unique_tag: AtomicU64,
}

impl TestTracker {
    /// Create a new tracker for the tests.
    ///
    /// This keeps the track events in memory for checking later.
    #[must_use]
    pub fn new(initial_tag: u64) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            unique_tag: AtomicU64::new(initial_tag),
        }
    }

    fn add_event(&self, event: String) {
        println!("{event}");
        let mut events = self.events.lock().unwrap();
        events.push(event);
    }
}

impl Track for TestTracker {
    fn unique_tag(&self) -> Tag {
        let tag = self.unique_tag.fetch_add(1, Ordering::SeqCst);
        Tag::new(tag)
    }

    fn is_entity_enabled(&self, _tag: Tag, _level: log::Level) -> bool {
        true
    }

    fn add_entity(&self, _tag: Tag, _entity_name: &str) {
        // Do nothing
    }

    fn create(&self, created_by: Tag, tag: Tag, name: &str) {
        self.add_event(format!("{created_by}: created {tag}, {name}"));
    }

    fn destroy(&self, destroyed_by: Tag, tag: Tag) {
        self.add_event(format!("{destroyed_by}: destroyed {tag}"));
    }

    fn log(&self, tag: Tag, level: log::Level, msg: std::fmt::Arguments) {
        self.add_event(format!("{tag}:{level}: {msg}"));
    }

    fn time(&self, set_by: Tag, time: u64) {
        self.add_event(format!("{set_by}: set time {time}"));
    }

    fn shutdown(&self) {
        // Do nothing
    }
}

/// Initialise the logging system for tests.
///
/// Returns a pair of the concrete [`TestTracker`] (for assertions) and the
/// shared [`Tracker`](crate::Tracker) handle to hand to the simulation.
///
/// # Arguments
///
/// * `start_tag` - The tag value to be set as the starting value.
#[macro_export]
macro_rules! test_init {
    ($start_tag:expr) => {{
        let test_tracker = std::sync::Arc::new($crate::test_helpers::TestTracker::new($start_tag));
        let tracker: $crate::Tracker = test_tracker.clone();
        (test_tracker, tracker)
    }};
}

/// Check and clear the _trace_ and _log_ output.
///
/// This function asserts that the logging output lines seen since the start
/// or the last time this function was called match the expected regular
/// expressions, then clears the recorded output.
pub fn check_and_clear(tracker: &TestTracker, expected: &[&str]) {
    let mut log_contents_ref = tracker.events.lock().unwrap();

    assert_eq!(expected.len(), log_contents_ref.len());

    for (i, log_expect) in expected.iter().enumerate() {
        let re = Regex::new(log_expect).unwrap();
        let actual = &(*log_contents_ref[i]);
        assert!(
            re.is_match(actual),
            "event {i}: {log_expect:?} does not match {actual:?}"
        );
    }

    log_contents_ref.clear();
}
