#![forbid(unsafe_code)]

//! Set of entities currently observed for history.
//!
//! Tracking an entity means holding a [`Subscription`] to its mutation
//! notifications. The registry never owns the entity itself; dropping the
//! subscription (on [`remove`](TrackingRegistry::remove) or
//! [`clear`](TrackingRegistry::clear)) is the whole of untracking. Records
//! already on the stack keep their own weak references and stay replayable.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::entity::{EntityId, EntityRef, MutationListener, Trackable};
use crate::listener::Subscription;

struct Tracked {
    target: EntityRef,
    _subscription: Subscription,
}

/// Entities whose mutations feed the recorder, keyed by identity.
#[derive(Default)]
pub struct TrackingRegistry {
    entries: BTreeMap<EntityId, Tracked>,
}

impl fmt::Debug for TrackingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingRegistry")
            .field("tracked", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TrackingRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start observing `entity` through `listener`.
    ///
    /// Returns `false` without subscribing when the entity is already tracked.
    pub fn add(&mut self, entity: &Rc<dyn Trackable>, listener: MutationListener) -> bool {
        let id = entity.entity_id();
        if self.entries.contains_key(&id) {
            return false;
        }
        let subscription = entity.subscribe(listener);
        self.entries.insert(
            id,
            Tracked {
                target: EntityRef::new(entity),
                _subscription: subscription,
            },
        );
        true
    }

    /// Stop observing `id`. Returns whether it was tracked.
    pub fn remove(&mut self, id: EntityId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Stop observing everything. Returns how many entities were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Weak reference to a tracked entity.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&EntityRef> {
        self.entries.get(&id).map(|t| &t.target)
    }

    /// Tracked identities in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<EntityId> {
        self.entries.keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Mutation;
    use crate::model::TrackedModel;
    use serde_json::json;
    use std::cell::Cell;

    fn counting_listener(hits: &Rc<Cell<u32>>) -> MutationListener {
        let hits = hits.clone();
        Rc::new(move |_: &dyn Trackable, _: &Mutation| hits.set(hits.get() + 1))
    }

    #[test]
    fn add_subscribes_once() {
        let model = TrackedModel::from_json(json!({"x": 0}));
        let entity: Rc<dyn Trackable> = model.clone();
        let hits = Rc::new(Cell::new(0));
        let mut registry = TrackingRegistry::new();

        assert!(registry.add(&entity, counting_listener(&hits)));
        assert!(!registry.add(&entity, counting_listener(&hits)));
        assert_eq!(registry.len(), 1);

        model.set("x", 1);
        // BeforeChange + Changed from a single subscription.
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn remove_stops_notifications() {
        let model = TrackedModel::from_json(json!({"x": 0}));
        let entity: Rc<dyn Trackable> = model.clone();
        let hits = Rc::new(Cell::new(0));
        let mut registry = TrackingRegistry::new();
        registry.add(&entity, counting_listener(&hits));

        assert!(registry.remove(model.entity_id()));
        assert!(!registry.remove(model.entity_id()));
        model.set("x", 1);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn clear_drops_everything() {
        let hits = Rc::new(Cell::new(0));
        let a = TrackedModel::from_json(json!({}));
        let b = TrackedModel::from_json(json!({}));
        let (ea, eb): (Rc<dyn Trackable>, Rc<dyn Trackable>) = (a.clone(), b.clone());
        let mut registry = TrackingRegistry::new();
        registry.add(&ea, counting_listener(&hits));
        registry.add(&eb, counting_listener(&hits));

        let mut ids = vec![a.entity_id(), b.entity_id()];
        ids.sort();
        assert_eq!(registry.ids(), ids);
        assert!(registry.get(a.entity_id()).is_some());

        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());
        a.set("y", 1);
        b.set("y", 1);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn does_not_keep_entity_alive() {
        let hits = Rc::new(Cell::new(0));
        let model = TrackedModel::from_json(json!({}));
        let id = model.entity_id();
        let entity: Rc<dyn Trackable> = model;
        let mut registry = TrackingRegistry::new();
        registry.add(&entity, counting_listener(&hits));
        drop(entity);

        assert!(registry.contains(id));
        assert!(registry.get(id).is_some_and(EntityRef::is_dangling));
    }
}
