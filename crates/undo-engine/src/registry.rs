#![forbid(unsafe_code)]

//! Change-kind handler registry.
//!
//! Each change kind (`"change"`, `"add"`, `"change:style"`, ...) maps to one
//! [`ChangeHandler`] that decides whether a mutation is recorded, captures its
//! before/after snapshots, and replays it. Registering a kind twice replaces
//! the earlier handler; unregistered kinds are never captured.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::entity::{ChangeOptions, EntityId, Mutation, Snapshot, Trackable};
use crate::recorder::PendingSnapshots;

/// Snapshots produced by [`ChangeHandler::capture`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capture {
    pub before: Option<Snapshot>,
    pub after: Option<Snapshot>,
}

impl Capture {
    #[must_use]
    pub fn new(before: Option<Snapshot>, after: Option<Snapshot>) -> Self {
        Self { before, after }
    }
}

/// What a handler sees while capturing one mutation.
pub struct CaptureContext<'a> {
    entity: &'a dyn Trackable,
    mutation: &'a Mutation,
    pending: &'a mut PendingSnapshots,
}

impl<'a> CaptureContext<'a> {
    pub(crate) fn new(
        entity: &'a dyn Trackable,
        mutation: &'a Mutation,
        pending: &'a mut PendingSnapshots,
    ) -> Self {
        Self {
            entity,
            mutation,
            pending,
        }
    }

    /// The entity that mutated.
    #[must_use]
    pub fn entity(&self) -> &'a dyn Trackable {
        self.entity
    }

    /// The `Changed` notification being captured.
    #[must_use]
    pub fn mutation(&self) -> &'a Mutation {
        self.mutation
    }

    /// Identity of the entity that mutated.
    #[must_use]
    pub fn entity_id(&self) -> EntityId {
        self.entity.entity_id()
    }

    /// Take the state cached at this entity's first `BeforeChange` since its
    /// last recorded change.
    pub fn take_before(&mut self) -> Option<Snapshot> {
        self.pending.take(self.entity.entity_id())
    }
}

/// Capture and replay semantics for one change kind.
pub trait ChangeHandler {
    /// Whether the mutation should be recorded at all.
    fn condition(&self, _entity: &dyn Trackable, _mutation: &Mutation) -> bool {
        true
    }

    /// Produce before/after snapshots, or `None` to skip the mutation.
    fn capture(&self, cx: &mut CaptureContext<'_>) -> Option<Capture>;

    /// Revert a recorded change on the live entity.
    fn apply_undo(
        &self,
        entity: &dyn Trackable,
        before: Option<&Snapshot>,
        after: Option<&Snapshot>,
        options: &ChangeOptions,
    );

    /// Re-apply a reverted change on the live entity.
    fn apply_redo(
        &self,
        entity: &dyn Trackable,
        before: Option<&Snapshot>,
        after: Option<&Snapshot>,
        options: &ChangeOptions,
    );
}

/// Map from change kind to handler.
#[derive(Default, Clone)]
pub struct TypeRegistry {
    handlers: HashMap<String, Rc<dyn ChangeHandler>>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl TypeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the stock handlers installed.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        crate::handlers::install_defaults(&mut registry);
        registry
    }

    /// Register `handler` for `kind`, replacing any earlier registration.
    pub fn register(&mut self, kind: impl Into<String>, handler: impl ChangeHandler + 'static) {
        self.register_rc(kind, Rc::new(handler));
    }

    /// Register an already shared handler.
    pub fn register_rc(&mut self, kind: impl Into<String>, handler: Rc<dyn ChangeHandler>) {
        let kind = kind.into();
        if self.handlers.insert(kind.clone(), handler).is_some() {
            tracing::debug!(kind = %kind, "replaced change handler");
        }
    }

    /// Handler for `kind`, if registered.
    #[must_use]
    pub fn resolve(&self, kind: &str) -> Option<Rc<dyn ChangeHandler>> {
        self.handlers.get(kind).cloned()
    }

    /// Remove the handler for `kind`. Returns whether one was registered.
    pub fn unregister(&mut self, kind: &str) -> bool {
        self.handlers.remove(kind).is_some()
    }

    /// Whether `kind` has a handler.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::CustomHandler;
    use serde_json::json;

    #[test]
    fn defaults_cover_stock_kinds() {
        let registry = TypeRegistry::with_defaults();
        assert_eq!(
            registry.kinds(),
            vec![
                "add",
                "change",
                "change:attributes",
                "change:content",
                "change:src",
                "change:style",
                "remove",
                "reset",
            ]
        );
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = TypeRegistry::new();
        registry.register(
            "custom",
            CustomHandler::new().with_capture(|_| Some(Capture::new(None, Some(json!(1))))),
        );
        registry.register(
            "custom",
            CustomHandler::new().with_capture(|_| Some(Capture::new(None, Some(json!(2))))),
        );
        assert_eq!(registry.kinds(), vec!["custom"]);

        let handler = registry.resolve("custom").unwrap();
        let model = crate::model::TrackedModel::from_json(json!({}));
        let mutation = Mutation::attributes(
            "custom",
            crate::entity::MutationPhase::Changed,
            Vec::new(),
            ChangeOptions::new(),
        );
        let mut pending = PendingSnapshots::default();
        let mut cx = CaptureContext::new(&*model, &mutation, &mut pending);
        assert_eq!(handler.capture(&mut cx).unwrap().after, Some(json!(2)));
    }

    #[test]
    fn unknown_kind_resolves_none() {
        let mut registry = TypeRegistry::with_defaults();
        assert!(registry.resolve("change:visibility").is_none());
        assert!(registry.unregister("add"));
        assert!(!registry.unregister("add"));
        assert!(!registry.contains("add"));
    }
}
