#![forbid(unsafe_code)]

//! Stock change handlers.
//!
//! | Kind                | Handler                  | Condition                  |
//! |---------------------|--------------------------|----------------------------|
//! | `change`            | [`AttributeChange`]      | entity [`UndoPolicy`]      |
//! | `change:style` etc. | [`StateSnapshot`]        | policy not disabled        |
//! | `add`               | [`ElementInsert`]        | policy not disabled        |
//! | `remove`            | [`ElementRemove`]        | policy not disabled        |
//! | `reset`             | [`ElementReset`]         | policy not disabled        |
//!
//! Attribute handlers snapshot and restore the full serialized entity state,
//! not a partial diff. Element handlers store `{"index", "element"}` and
//! replay through [`ElementContainer`](crate::ElementContainer).
//!
//! [`UndoPolicy`]: crate::UndoPolicy

use std::fmt;

use serde_json::{Value, json};

use crate::entity::{ChangeOptions, ElementChange, Mutation, Snapshot, Trackable};
use crate::registry::{Capture, CaptureContext, ChangeHandler, TypeRegistry};

pub const KIND_CHANGE: &str = "change";
pub const KIND_ADD: &str = "add";
pub const KIND_REMOVE: &str = "remove";
pub const KIND_RESET: &str = "reset";
pub const KIND_STYLE: &str = "change:style";
pub const KIND_ATTRIBUTES: &str = "change:attributes";
pub const KIND_CONTENT: &str = "change:content";
pub const KIND_SRC: &str = "change:src";

/// Cosmetic sub-property kinds that snapshot the whole entity.
pub const COSMETIC_KINDS: [&str; 4] = [KIND_STYLE, KIND_ATTRIBUTES, KIND_CONTENT, KIND_SRC];

/// Install every stock handler into `registry`.
pub fn install_defaults(registry: &mut TypeRegistry) {
    registry.register(KIND_CHANGE, AttributeChange);
    for kind in COSMETIC_KINDS {
        registry.register(kind, StateSnapshot);
    }
    registry.register(KIND_ADD, ElementInsert);
    registry.register(KIND_REMOVE, ElementRemove);
    registry.register(KIND_RESET, ElementReset);
}

fn capture_state(cx: &mut CaptureContext<'_>) -> Option<Capture> {
    let before = cx.take_before()?;
    let after = cx.entity().snapshot();
    if before == after {
        return None;
    }
    Some(Capture::new(Some(before), Some(after)))
}

fn restore(entity: &dyn Trackable, snapshot: Option<&Snapshot>, options: &ChangeOptions) {
    if let Some(snapshot) = snapshot {
        entity.restore(snapshot, options);
    }
}

fn element_entry(index: usize, element: &Snapshot) -> Snapshot {
    json!({ "index": index, "element": element })
}

fn parse_entry(entry: Option<&Snapshot>) -> Option<(usize, Snapshot)> {
    let entry = entry?;
    let index = usize::try_from(entry.get("index")?.as_u64()?).ok()?;
    let element = entry.get("element")?.clone();
    Some((index, element))
}

fn elements_of(snapshot: Option<&Snapshot>) -> Vec<Snapshot> {
    match snapshot {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

/// Generic attribute change, filtered by the entity's undo policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeChange;

impl ChangeHandler for AttributeChange {
    fn condition(&self, entity: &dyn Trackable, mutation: &Mutation) -> bool {
        entity.undo_policy().allows(&mutation.changed)
    }

    fn capture(&self, cx: &mut CaptureContext<'_>) -> Option<Capture> {
        capture_state(cx)
    }

    fn apply_undo(
        &self,
        entity: &dyn Trackable,
        before: Option<&Snapshot>,
        _after: Option<&Snapshot>,
        options: &ChangeOptions,
    ) {
        restore(entity, before, options);
    }

    fn apply_redo(
        &self,
        entity: &dyn Trackable,
        _before: Option<&Snapshot>,
        after: Option<&Snapshot>,
        options: &ChangeOptions,
    ) {
        restore(entity, after, options);
    }
}

/// Full-state snapshot for cosmetic sub-properties (style, attributes,
/// textual content, source reference).
#[derive(Debug, Clone, Copy, Default)]
pub struct StateSnapshot;

impl ChangeHandler for StateSnapshot {
    fn condition(&self, entity: &dyn Trackable, _mutation: &Mutation) -> bool {
        !entity.undo_policy().is_disabled()
    }

    fn capture(&self, cx: &mut CaptureContext<'_>) -> Option<Capture> {
        capture_state(cx)
    }

    fn apply_undo(
        &self,
        entity: &dyn Trackable,
        before: Option<&Snapshot>,
        _after: Option<&Snapshot>,
        options: &ChangeOptions,
    ) {
        restore(entity, before, options);
    }

    fn apply_redo(
        &self,
        entity: &dyn Trackable,
        _before: Option<&Snapshot>,
        after: Option<&Snapshot>,
        options: &ChangeOptions,
    ) {
        restore(entity, after, options);
    }
}

/// An element was added: `after` holds it, there is no `before`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElementInsert;

impl ChangeHandler for ElementInsert {
    fn condition(&self, entity: &dyn Trackable, _mutation: &Mutation) -> bool {
        !entity.undo_policy().is_disabled()
    }

    fn capture(&self, cx: &mut CaptureContext<'_>) -> Option<Capture> {
        match &cx.mutation().elements {
            Some(ElementChange::Inserted { index, element }) => {
                Some(Capture::new(None, Some(element_entry(*index, element))))
            }
            _ => None,
        }
    }

    fn apply_undo(
        &self,
        entity: &dyn Trackable,
        _before: Option<&Snapshot>,
        after: Option<&Snapshot>,
        options: &ChangeOptions,
    ) {
        if let (Some(container), Some((index, _))) = (entity.as_container(), parse_entry(after)) {
            container.remove_element(index, options);
        }
    }

    fn apply_redo(
        &self,
        entity: &dyn Trackable,
        _before: Option<&Snapshot>,
        after: Option<&Snapshot>,
        options: &ChangeOptions,
    ) {
        if let (Some(container), Some((index, element))) = (entity.as_container(), parse_entry(after))
        {
            container.insert_element(index, element, options);
        }
    }
}

/// An element was removed: `before` holds it, there is no `after`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElementRemove;

impl ChangeHandler for ElementRemove {
    fn condition(&self, entity: &dyn Trackable, _mutation: &Mutation) -> bool {
        !entity.undo_policy().is_disabled()
    }

    fn capture(&self, cx: &mut CaptureContext<'_>) -> Option<Capture> {
        match &cx.mutation().elements {
            Some(ElementChange::Removed { index, element }) => {
                Some(Capture::new(Some(element_entry(*index, element)), None))
            }
            _ => None,
        }
    }

    fn apply_undo(
        &self,
        entity: &dyn Trackable,
        before: Option<&Snapshot>,
        _after: Option<&Snapshot>,
        options: &ChangeOptions,
    ) {
        if let (Some(container), Some((index, element))) =
            (entity.as_container(), parse_entry(before))
        {
            container.insert_element(index, element, options);
        }
    }

    fn apply_redo(
        &self,
        entity: &dyn Trackable,
        before: Option<&Snapshot>,
        _after: Option<&Snapshot>,
        options: &ChangeOptions,
    ) {
        if let (Some(container), Some((index, _))) = (entity.as_container(), parse_entry(before)) {
            container.remove_element(index, options);
        }
    }
}

/// The element list was replaced wholesale.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElementReset;

impl ChangeHandler for ElementReset {
    fn condition(&self, entity: &dyn Trackable, _mutation: &Mutation) -> bool {
        !entity.undo_policy().is_disabled()
    }

    fn capture(&self, cx: &mut CaptureContext<'_>) -> Option<Capture> {
        match &cx.mutation().elements {
            Some(ElementChange::Reset { previous, current }) => Some(Capture::new(
                Some(Value::Array(previous.clone())),
                Some(Value::Array(current.clone())),
            )),
            _ => None,
        }
    }

    fn apply_undo(
        &self,
        entity: &dyn Trackable,
        before: Option<&Snapshot>,
        _after: Option<&Snapshot>,
        options: &ChangeOptions,
    ) {
        if let Some(container) = entity.as_container() {
            container.reset_elements(elements_of(before), options);
        }
    }

    fn apply_redo(
        &self,
        entity: &dyn Trackable,
        _before: Option<&Snapshot>,
        after: Option<&Snapshot>,
        options: &ChangeOptions,
    ) {
        if let Some(container) = entity.as_container() {
            container.reset_elements(elements_of(after), options);
        }
    }
}

// ============================================================================
// Closure-built handlers
// ============================================================================

/// Callback deciding whether a mutation is recorded.
pub type ConditionFn = Box<dyn Fn(&dyn Trackable, &Mutation) -> bool>;
/// Callback producing snapshots for a mutation.
pub type CaptureFn = Box<dyn Fn(&mut CaptureContext<'_>) -> Option<Capture>>;
/// Callback replaying a record: `(entity, before, after, options)`.
pub type ReplayFn = Box<dyn Fn(&dyn Trackable, Option<&Snapshot>, Option<&Snapshot>, &ChangeOptions)>;

/// A handler assembled from callbacks, for host-defined kinds.
///
/// Unset callbacks fall back to [`StateSnapshot`] behavior: always record,
/// snapshot the whole entity, restore `before` on undo and `after` on redo.
#[derive(Default)]
pub struct CustomHandler {
    condition: Option<ConditionFn>,
    capture: Option<CaptureFn>,
    undo: Option<ReplayFn>,
    redo: Option<ReplayFn>,
}

impl fmt::Debug for CustomHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomHandler")
            .field("has_condition", &self.condition.is_some())
            .field("has_capture", &self.capture.is_some())
            .field("has_undo", &self.undo.is_some())
            .field("has_redo", &self.redo.is_some())
            .finish()
    }
}

impl CustomHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the condition callback.
    #[must_use]
    pub fn with_condition(mut self, f: impl Fn(&dyn Trackable, &Mutation) -> bool + 'static) -> Self {
        self.condition = Some(Box::new(f));
        self
    }

    /// Set the capture callback.
    #[must_use]
    pub fn with_capture(
        mut self,
        f: impl Fn(&mut CaptureContext<'_>) -> Option<Capture> + 'static,
    ) -> Self {
        self.capture = Some(Box::new(f));
        self
    }

    /// Set the undo callback.
    #[must_use]
    pub fn with_undo(
        mut self,
        f: impl Fn(&dyn Trackable, Option<&Snapshot>, Option<&Snapshot>, &ChangeOptions) + 'static,
    ) -> Self {
        self.undo = Some(Box::new(f));
        self
    }

    /// Set the redo callback.
    #[must_use]
    pub fn with_redo(
        mut self,
        f: impl Fn(&dyn Trackable, Option<&Snapshot>, Option<&Snapshot>, &ChangeOptions) + 'static,
    ) -> Self {
        self.redo = Some(Box::new(f));
        self
    }
}

impl ChangeHandler for CustomHandler {
    fn condition(&self, entity: &dyn Trackable, mutation: &Mutation) -> bool {
        self.condition.as_ref().is_none_or(|f| f(entity, mutation))
    }

    fn capture(&self, cx: &mut CaptureContext<'_>) -> Option<Capture> {
        match &self.capture {
            Some(f) => f(cx),
            None => capture_state(cx),
        }
    }

    fn apply_undo(
        &self,
        entity: &dyn Trackable,
        before: Option<&Snapshot>,
        after: Option<&Snapshot>,
        options: &ChangeOptions,
    ) {
        match &self.undo {
            Some(f) => f(entity, before, after, options),
            None => restore(entity, before, options),
        }
    }

    fn apply_redo(
        &self,
        entity: &dyn Trackable,
        before: Option<&Snapshot>,
        after: Option<&Snapshot>,
        options: &ChangeOptions,
    ) {
        match &self.redo {
            Some(f) => f(entity, before, after, options),
            None => restore(entity, after, options),
        }
    }
}
