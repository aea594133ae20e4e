// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! A tracker that discards every event.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::tracker::Track;
use crate::{ROOT, Tag};

/// Discard all track events while still allocating unique tags.
pub struct DevNullTracker {}

static UNIQUE_TAG: AtomicU64 = AtomicU64::new(ROOT.raw() + 1);

impl Track for DevNullTracker {
    fn unique_tag(&self) -> Tag {
        Tag::new(UNIQUE_TAG.fetch_add(1, Ordering::SeqCst))
    }

    fn is_entity_enabled(&self, _tag: Tag, _level: log::Level) -> bool {
        false
    }

    fn add_entity(&self, _tag: Tag, _entity_name: &str) {}

    fn create(&self, _created_by: Tag, _tag: Tag, _name: &str) {}

    fn destroy(&self, _destroyed_by: Tag, _tag: Tag) {}

    fn log(&self, _tag: Tag, _level: log::Level, _msg: std::fmt::Arguments) {}

    fn time(&self, _set_by: Tag, _time: u64) {}

    fn shutdown(&self) {}
}
