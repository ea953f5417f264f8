#![forbid(unsafe_code)]

//! Tracked-entity capability interface.
//!
//! The engine never knows what an entity *is*. It only needs to:
//!
//! 1. read the entity's observable state as a [`Snapshot`],
//! 2. subscribe to its mutation notifications,
//! 3. write a snapshot back during undo/redo,
//! 4. ask whether a given mutation is undoable ([`UndoPolicy`]).
//!
//! Entities that own an ordered list of child elements additionally expose
//! [`ElementContainer`] through [`Trackable::as_container`], which is what the
//! `add` / `remove` / `reset` change kinds replay against.
//!
//! # Notification Protocol
//!
//! An attribute mutation is announced twice: once with
//! [`MutationPhase::BeforeChange`] while the old state is still readable, and
//! once with [`MutationPhase::Changed`] after the new state is in place.
//! Element mutations (`add`, `remove`, `reset`) only send `Changed`; their
//! payload travels in [`Mutation::elements`].
//!
//! Entities must release any interior borrow before notifying, since
//! listeners call back into [`Trackable::snapshot`].

use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};

use crate::listener::Subscription;

/// Serialized observable state of an entity at one point in time.
pub type Snapshot = Value;

/// Callback type entities invoke for every mutation notification.
pub type MutationListener = Rc<dyn Fn(&dyn Trackable, &Mutation)>;

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Create an ID from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate a fresh, process-unique ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Options attached to a single mutation.
///
/// `avoid_store` and `no_undo` both keep the mutation out of history. They
/// differ in what happens to an in-flight "before" snapshot: `avoid_store`
/// keeps it (an intermediate step of a longer gesture such as a drag), while
/// `no_undo` discards it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeOptions {
    /// Intermediate change: do not record, keep the pending "before" state.
    pub avoid_store: bool,
    /// Never undoable: do not record, drop the pending "before" state.
    pub no_undo: bool,
    /// Set by the engine on options passed to replay handlers.
    pub from_history: bool,
    /// Free-form options forwarded to handlers untouched.
    pub extra: Map<String, Value>,
}

impl ChangeOptions {
    /// Options for a regular, recordable mutation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for an intermediate change.
    #[must_use]
    pub fn avoid_store() -> Self {
        Self {
            avoid_store: true,
            ..Self::default()
        }
    }

    /// Options for a change that must never be undoable.
    #[must_use]
    pub fn no_undo() -> Self {
        Self {
            no_undo: true,
            ..Self::default()
        }
    }

    /// Attach a free-form option.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Whether either suppression flag is set.
    #[must_use]
    pub fn is_suppressed(&self) -> bool {
        self.avoid_store || self.no_undo
    }
}

/// Which half of a mutation a notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    /// The old state is still in place.
    BeforeChange,
    /// The new state is in place.
    Changed,
}

/// Element payload for container change kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementChange {
    /// `element` now lives at `index`.
    Inserted { index: usize, element: Snapshot },
    /// `element` was removed from `index`.
    Removed { index: usize, element: Snapshot },
    /// The whole element list was replaced.
    Reset {
        previous: Vec<Snapshot>,
        current: Vec<Snapshot>,
    },
}

/// One mutation notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Change kind, e.g. `"change"`, `"add"`, `"change:style"`.
    pub kind: String,
    /// Before or after the state moved.
    pub phase: MutationPhase,
    /// Names of the attributes touched by the mutation.
    pub changed: Vec<String>,
    /// Element payload for container kinds.
    pub elements: Option<ElementChange>,
    /// Options the mutation was issued with.
    pub options: ChangeOptions,
}

impl Mutation {
    /// Notification for an attribute change.
    #[must_use]
    pub fn attributes(
        kind: impl Into<String>,
        phase: MutationPhase,
        changed: Vec<String>,
        options: ChangeOptions,
    ) -> Self {
        Self {
            kind: kind.into(),
            phase,
            changed,
            elements: None,
            options,
        }
    }

    /// `Changed` notification for an element-list change.
    #[must_use]
    pub fn elements(kind: impl Into<String>, elements: ElementChange, options: ChangeOptions) -> Self {
        Self {
            kind: kind.into(),
            phase: MutationPhase::Changed,
            changed: Vec::new(),
            elements: Some(elements),
            options,
        }
    }
}

/// Which attribute changes of an entity are undoable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoMode {
    /// Nothing is recorded for this entity.
    Disabled,
    /// Every attribute change is recorded.
    All,
    /// Only changes touching at least one listed attribute are recorded.
    Only(BTreeSet<String>),
}

/// Declared undo policy of an entity.
///
/// # Invariants
///
/// A change is undoable iff none of its changed attributes is excluded and
/// the mode is [`UndoMode::All`], or [`UndoMode::Only`] with at least one
/// changed attribute in the set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoPolicy {
    pub mode: UndoMode,
    pub excluded: BTreeSet<String>,
}

impl Default for UndoPolicy {
    fn default() -> Self {
        Self::all()
    }
}

impl UndoPolicy {
    /// Record every change.
    #[must_use]
    pub fn all() -> Self {
        Self {
            mode: UndoMode::All,
            excluded: BTreeSet::new(),
        }
    }

    /// Record nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            mode: UndoMode::Disabled,
            excluded: BTreeSet::new(),
        }
    }

    /// Record only changes touching one of `attributes`.
    #[must_use]
    pub fn only<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: UndoMode::Only(attributes.into_iter().map(Into::into).collect()),
            excluded: BTreeSet::new(),
        }
    }

    /// Never record changes touching one of `attributes`.
    #[must_use]
    pub fn excluding<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(attributes.into_iter().map(Into::into));
        self
    }

    /// Whether the entity opted out entirely.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.mode == UndoMode::Disabled
    }

    /// Apply the policy to a set of changed attribute names.
    #[must_use]
    pub fn allows<S: AsRef<str>>(&self, changed: &[S]) -> bool {
        if changed
            .iter()
            .any(|name| self.excluded.contains(name.as_ref()))
        {
            return false;
        }
        match &self.mode {
            UndoMode::Disabled => false,
            UndoMode::All => true,
            UndoMode::Only(set) => changed.iter().any(|name| set.contains(name.as_ref())),
        }
    }
}

/// A stateful value the engine can observe and replay.
pub trait Trackable: 'static {
    /// Stable identity of this entity.
    fn entity_id(&self) -> EntityId;

    /// Serialize the current observable state.
    fn snapshot(&self) -> Snapshot;

    /// Write a previously captured snapshot back.
    ///
    /// Implementations notify listeners as for any other mutation; the engine
    /// suppresses recording while it replays.
    fn restore(&self, snapshot: &Snapshot, options: &ChangeOptions);

    /// Which changes of this entity may be recorded.
    fn undo_policy(&self) -> UndoPolicy {
        UndoPolicy::all()
    }

    /// Register for mutation notifications.
    fn subscribe(&self, listener: MutationListener) -> Subscription;

    /// Element-list capability, if the entity has one.
    fn as_container(&self) -> Option<&dyn ElementContainer> {
        None
    }
}

/// Entities owning an ordered list of child elements.
pub trait ElementContainer {
    /// Insert `element` at `index` (clamped to the list length).
    fn insert_element(&self, index: usize, element: Snapshot, options: &ChangeOptions);

    /// Remove the element at `index`, if any.
    fn remove_element(&self, index: usize, options: &ChangeOptions) -> Option<Snapshot>;

    /// Replace the whole element list.
    fn reset_elements(&self, elements: Vec<Snapshot>, options: &ChangeOptions);
}

/// Non-owning reference to a tracked entity.
///
/// The host owns entity lifetimes; a record whose target was dropped simply
/// cannot be replayed.
#[derive(Clone)]
pub struct EntityRef {
    id: EntityId,
    entity: Weak<dyn Trackable>,
}

impl EntityRef {
    /// Downgrade a shared entity handle.
    #[must_use]
    pub fn new(entity: &Rc<dyn Trackable>) -> Self {
        Self {
            id: entity.entity_id(),
            entity: Rc::downgrade(entity),
        }
    }

    /// Identity of the referenced entity.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Get the live entity, if the host still holds it.
    #[must_use]
    pub fn upgrade(&self) -> Option<Rc<dyn Trackable>> {
        self.entity.upgrade()
    }

    /// Whether the entity has been dropped.
    #[must_use]
    pub fn is_dangling(&self) -> bool {
        self.entity.strong_count() == 0
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRef")
            .field("id", &self.id)
            .field("alive", &!self.is_dangling())
            .finish()
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
