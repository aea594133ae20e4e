// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! Simulation entities.
//!
//! Every part of a model owns an entity: one node of the simulation's
//! hierarchical namespace. An entity stores its full path eagerly at
//! construction, so rendering a name never walks the hierarchy, and the
//! only upward link it keeps is the parent's [`Tag`] for the creation and
//! destruction trace events.

use std::fmt;
use std::sync::Arc;

use crate::{Tag, Tracker, create, destroy};

const JOIN: &str = "::";

/// A node in the simulation hierarchy.
///
/// Log macros take the entity as their first argument so that messages
/// carry its unique tag and can be filtered per entity.
pub struct Entity {
    /// Full hierarchical path, e.g. `top::cl0::l1c0`.
    path: String,

    /// Byte offset of the leaf name within `path`.
    leaf: usize,

    /// Tag of the parent entity; `None` only for the top level.
    pub parent_tag: Option<Tag>,

    /// Unique simulation tag used for log messages.
    pub tag: Tag,

    /// [`Tracker`] that receives this entity's trace/log events.
    pub tracker: Tracker,
}

impl Entity {
    /// Create a child of `parent` named `name`.
    #[must_use]
    pub fn new(parent: &Arc<Entity>, name: &str) -> Self {
        let mut path = String::with_capacity(parent.path.len() + JOIN.len() + name.len());
        path.push_str(&parent.path);
        path.push_str(JOIN);
        let leaf = path.len();
        path.push_str(name);

        let tracker = parent.tracker.clone();
        let tag = tracker.unique_tag();
        tracker.add_entity(tag, &path);

        let entity = Self {
            path,
            leaf,
            parent_tag: Some(parent.tag),
            tag,
            tracker,
        };
        create!(entity);
        entity
    }

    /// The full hierarchical path of this entity.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The leaf name of this entity.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.path[self.leaf..]
    }
}

impl Drop for Entity {
    fn drop(&mut self) {
        destroy!(self);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("path", &self.path)
            .field("tag", &self.tag)
            .finish()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Create the top-level entity. This should be the only entity without a
/// parent.
pub fn toplevel(tracker: &Tracker, name: &str) -> Arc<Entity> {
    let tag = tracker.unique_tag();
    tracker.add_entity(tag, name);
    let top = Arc::new(Entity {
        path: name.to_owned(),
        leaf: 0,
        parent_tag: None,
        tag,
        tracker: tracker.clone(),
    });
    create!(top);
    top
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_init;

    #[test]
    fn paths_are_built_eagerly() {
        let (_test_tracker, tracker) = test_init!(10);
        let top = toplevel(&tracker, "top");
        let child = Arc::new(Entity::new(&top, "child"));
        let grandchild = Entity::new(&child, "grandchild");
        assert_eq!(grandchild.path(), "top::child::grandchild");
        assert_eq!(grandchild.name(), "grandchild");
        assert_eq!(format!("{grandchild}"), "top::child::grandchild");
    }

    #[test]
    fn top_level_has_no_parent() {
        let (_test_tracker, tracker) = test_init!(10);
        let top = toplevel(&tracker, "top");
        assert!(top.parent_tag.is_none());
        assert_eq!(top.name(), "top");

        let child = Entity::new(&top, "child");
        assert_eq!(child.parent_tag, Some(top.tag));
    }

    #[test]
    fn unique_tags() {
        let (_test_tracker, tracker) = test_init!(10);
        let top = toplevel(&tracker, "top");
        let a = Entity::new(&top, "a");
        let b = Entity::new(&top, "b");
        assert_ne!(a.tag, b.tag);
    }
}
