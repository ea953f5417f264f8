#![forbid(unsafe_code)]

//! Attribute-map entity with an ordered element list.
//!
//! [`TrackedModel`] is the stock [`Trackable`] implementation: a JSON object
//! of attributes plus a list of child elements, with change notification in
//! the shape the recorder expects. Hosts with their own entity types
//! implement [`Trackable`] directly; this type serves as a building block and
//! as the reference for the notification protocol.
//!
//! # Invariants
//!
//! 1. A `set` that changes nothing notifies nobody.
//! 2. Attribute mutations send `BeforeChange` then `Changed`.
//! 3. Element mutations send a single `Changed` (`add`, `remove`, `reset`).
//! 4. No interior borrow is held while listeners run.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::entity::{
    ChangeOptions, ElementChange, ElementContainer, EntityId, Mutation, MutationListener,
    MutationPhase, Snapshot, Trackable, UndoPolicy,
};
use crate::handlers::{KIND_ADD, KIND_CHANGE, KIND_REMOVE, KIND_RESET};
use crate::listener::{ListenerSet, Subscription};

struct ModelInner {
    attributes: Map<String, Value>,
    elements: Vec<Snapshot>,
    policy: UndoPolicy,
}

/// A tracked attribute map with child elements.
pub struct TrackedModel {
    id: EntityId,
    inner: RefCell<ModelInner>,
    listeners: ListenerSet<dyn Fn(&dyn Trackable, &Mutation)>,
}

impl fmt::Debug for TrackedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("TrackedModel")
            .field("id", &self.id)
            .field("attributes", &inner.attributes)
            .field("elements", &inner.elements.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl TrackedModel {
    /// Create a model from an attribute map.
    #[must_use]
    pub fn new(attributes: Map<String, Value>) -> Rc<Self> {
        Rc::new(Self {
            id: EntityId::next(),
            inner: RefCell::new(ModelInner {
                attributes,
                elements: Vec::new(),
                policy: UndoPolicy::all(),
            }),
            listeners: ListenerSet::new(),
        })
    }

    /// Create a model from a JSON object literal. Non-object values yield an
    /// empty attribute map.
    #[must_use]
    pub fn from_json(value: Value) -> Rc<Self> {
        match value {
            Value::Object(map) => Self::new(map),
            _ => Self::new(Map::new()),
        }
    }

    /// Replace the declared undo policy.
    pub fn set_policy(&self, policy: UndoPolicy) {
        self.inner.borrow_mut().policy = policy;
    }

    /// Builder form of [`set_policy`](Self::set_policy).
    #[must_use]
    pub fn with_policy(self: Rc<Self>, policy: UndoPolicy) -> Rc<Self> {
        self.set_policy(policy);
        self
    }

    /// Read one attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.borrow().attributes.get(name).cloned()
    }

    /// Clone of all attributes.
    #[must_use]
    pub fn attributes(&self) -> Map<String, Value> {
        self.inner.borrow().attributes.clone()
    }

    /// Clone of the element list.
    #[must_use]
    pub fn elements(&self) -> Vec<Snapshot> {
        self.inner.borrow().elements.clone()
    }

    /// Set a single attribute with default options (kind `change`).
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        let mut attrs = Map::new();
        attrs.insert(name.into(), value.into());
        self.set_with(attrs, KIND_CHANGE, ChangeOptions::new());
    }

    /// Set several attributes as one mutation of the given kind.
    ///
    /// Returns `false` (and notifies nobody) when nothing changed.
    pub fn set_with(&self, attrs: Map<String, Value>, kind: &str, options: ChangeOptions) -> bool {
        let changed: Vec<String> = {
            let inner = self.inner.borrow();
            attrs
                .iter()
                .filter(|(k, v)| inner.attributes.get(*k) != Some(*v))
                .map(|(k, _)| k.clone())
                .collect()
        };
        if changed.is_empty() {
            return false;
        }

        self.notify(&Mutation::attributes(
            kind,
            MutationPhase::BeforeChange,
            changed.clone(),
            options.clone(),
        ));
        {
            let mut inner = self.inner.borrow_mut();
            for (k, v) in attrs {
                inner.attributes.insert(k, v);
            }
        }
        self.notify(&Mutation::attributes(
            kind,
            MutationPhase::Changed,
            changed,
            options,
        ));
        true
    }

    /// Remove an attribute (kind `change`).
    pub fn unset(&self, name: &str, options: ChangeOptions) -> bool {
        if !self.inner.borrow().attributes.contains_key(name) {
            return false;
        }
        let changed = vec![name.to_string()];
        self.notify(&Mutation::attributes(
            KIND_CHANGE,
            MutationPhase::BeforeChange,
            changed.clone(),
            options.clone(),
        ));
        self.inner.borrow_mut().attributes.remove(name);
        self.notify(&Mutation::attributes(
            KIND_CHANGE,
            MutationPhase::Changed,
            changed,
            options,
        ));
        true
    }

    /// Append an element (kind `add`).
    pub fn push(&self, element: impl Into<Value>, options: ChangeOptions) {
        let index = self.inner.borrow().elements.len();
        self.insert(index, element, options);
    }

    /// Insert an element at `index`, clamped to the list length (kind `add`).
    pub fn insert(&self, index: usize, element: impl Into<Value>, options: ChangeOptions) {
        let element = element.into();
        let index = {
            let mut inner = self.inner.borrow_mut();
            let index = index.min(inner.elements.len());
            inner.elements.insert(index, element.clone());
            index
        };
        self.notify(&Mutation::elements(
            KIND_ADD,
            ElementChange::Inserted { index, element },
            options,
        ));
    }

    /// Remove the element at `index` (kind `remove`).
    pub fn remove(&self, index: usize, options: ChangeOptions) -> Option<Snapshot> {
        let element = {
            let mut inner = self.inner.borrow_mut();
            if index >= inner.elements.len() {
                return None;
            }
            inner.elements.remove(index)
        };
        self.notify(&Mutation::elements(
            KIND_REMOVE,
            ElementChange::Removed {
                index,
                element: element.clone(),
            },
            options,
        ));
        Some(element)
    }

    /// Replace all elements (kind `reset`).
    pub fn reset(&self, elements: Vec<Snapshot>, options: ChangeOptions) {
        let previous = {
            let mut inner = self.inner.borrow_mut();
            std::mem::replace(&mut inner.elements, elements.clone())
        };
        if previous == elements {
            return;
        }
        self.notify(&Mutation::elements(
            KIND_RESET,
            ElementChange::Reset {
                previous,
                current: elements,
            },
            options,
        ));
    }

    fn notify(&self, mutation: &Mutation) {
        for listener in self.listeners.live() {
            listener(self as &dyn Trackable, mutation);
        }
    }
}

impl Trackable for TrackedModel {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn snapshot(&self) -> Snapshot {
        Value::Object(self.inner.borrow().attributes.clone())
    }

    fn restore(&self, snapshot: &Snapshot, options: &ChangeOptions) {
        let Value::Object(target) = snapshot else {
            return;
        };
        let changed: Vec<String> = {
            let inner = self.inner.borrow();
            let mut names: Vec<String> = target
                .iter()
                .filter(|(k, v)| inner.attributes.get(*k) != Some(*v))
                .map(|(k, _)| k.clone())
                .collect();
            names.extend(
                inner
                    .attributes
                    .keys()
                    .filter(|k| !target.contains_key(*k))
                    .cloned(),
            );
            names
        };
        if changed.is_empty() {
            return;
        }
        self.notify(&Mutation::attributes(
            KIND_CHANGE,
            MutationPhase::BeforeChange,
            changed.clone(),
            options.clone(),
        ));
        self.inner.borrow_mut().attributes = target.clone();
        self.notify(&Mutation::attributes(
            KIND_CHANGE,
            MutationPhase::Changed,
            changed,
            options.clone(),
        ));
    }

    fn undo_policy(&self) -> UndoPolicy {
        self.inner.borrow().policy.clone()
    }

    fn subscribe(&self, listener: MutationListener) -> Subscription {
        self.listeners.subscribe(listener)
    }

    fn as_container(&self) -> Option<&dyn ElementContainer> {
        Some(self)
    }
}

impl ElementContainer for TrackedModel {
    fn insert_element(&self, index: usize, element: Snapshot, options: &ChangeOptions) {
        self.insert(index, element, options.clone());
    }

    fn remove_element(&self, index: usize, options: &ChangeOptions) -> Option<Snapshot> {
        self.remove(index, options.clone())
    }

    fn reset_elements(&self, elements: Vec<Snapshot>, options: &ChangeOptions) {
        self.reset(elements, options.clone());
    }
}
