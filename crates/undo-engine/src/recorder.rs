#![forbid(unsafe_code)]

//! Mutation-to-record conversion.
//!
//! The [`Recorder`] receives every notification from tracked entities and
//! decides whether it becomes a [`ChangeRecord`]. It owns the in-flight
//! "before" cache ([`PendingSnapshots`]) and the [`GroupIndex`].
//!
//! # Rules for one notification
//!
//! | Situation                         | Effect                                 |
//! |-----------------------------------|----------------------------------------|
//! | recorder stopped                  | ignored; `Changed` drops pending state |
//! | `BeforeChange`, `no_undo`         | ignored                                |
//! | `BeforeChange`                    | cache entity state unless one pending  |
//! | `Changed`, `no_undo`              | skipped; pending state dropped         |
//! | `Changed`, `avoid_store`          | skipped; pending state kept            |
//! | unknown kind / condition false    | skipped; pending state dropped         |
//! | capture declined                  | skipped; pending state dropped         |
//! | otherwise                         | record tagged with the next group      |
//!
//! "Dropped" applies to attribute mutations only. Element mutations (`add`,
//! `remove`, `reset`) carry their payload in [`Mutation::elements`] and leave
//! the pending state alone, unless their handler takes it explicitly.
//!
//! Keeping the pending state across `avoid_store` changes is what lets a
//! gesture made of many intermediate steps undo back to where it started.
//! Replaying history invalidates it; see [`Recorder::forget`].
//!
//! The cache is keyed by entity so that several entities can be mid-change at
//! once without reading each other's "before" state.

use std::collections::HashMap;

use web_time::Instant;

use crate::entity::{EntityId, EntityRef, Mutation, MutationPhase, Snapshot, Trackable};
use crate::group::GroupIndex;
use crate::registry::{CaptureContext, TypeRegistry};
use crate::stack::ChangeRecord;

/// In-flight "before" snapshots, one slot per entity.
#[derive(Debug, Clone, Default)]
pub struct PendingSnapshots {
    slots: HashMap<EntityId, Snapshot>,
}

impl PendingSnapshots {
    /// Cache `snapshot` for `id` unless a snapshot is already pending.
    pub fn stash(&mut self, id: EntityId, snapshot: Snapshot) {
        self.slots.entry(id).or_insert(snapshot);
    }

    /// Whether `id` has a pending snapshot.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Remove and return the pending snapshot for `id`.
    pub fn take(&mut self, id: EntityId) -> Option<Snapshot> {
        self.slots.remove(&id)
    }

    /// Drop every pending snapshot.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Why a notification produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Stopped,
    BeforePhase,
    NoUndo,
    AvoidStore,
    UnknownKind,
    Condition,
    Declined,
}

impl SkipReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::BeforePhase => "before_phase",
            Self::NoUndo => "no_undo",
            Self::AvoidStore => "avoid_store",
            Self::UnknownKind => "unknown_kind",
            Self::Condition => "condition",
            Self::Declined => "declined",
        }
    }
}

/// Converts entity notifications into [`ChangeRecord`]s.
#[derive(Debug)]
pub struct Recorder {
    enabled: bool,
    pending: PendingSnapshots,
    groups: GroupIndex,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new(GroupIndex::default())
    }
}

impl Recorder {
    /// Create an enabled recorder.
    #[must_use]
    pub fn new(groups: GroupIndex) -> Self {
        Self {
            enabled: true,
            pending: PendingSnapshots::default(),
            groups,
        }
    }

    /// Resume recording.
    pub fn start(&mut self) {
        self.enabled = true;
    }

    /// Pause recording. Pending "before" state is discarded.
    pub fn stop(&mut self) {
        self.enabled = false;
        self.pending.clear();
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Grouping state.
    pub fn groups_mut(&mut self) -> &mut GroupIndex {
        &mut self.groups
    }

    #[must_use]
    pub fn groups(&self) -> &GroupIndex {
        &self.groups
    }

    #[must_use]
    pub fn pending(&self) -> &PendingSnapshots {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut PendingSnapshots {
        &mut self.pending
    }

    /// Forget in-flight state for one entity, e.g. when it stops being tracked
    /// or history has been replayed onto it.
    pub fn forget(&mut self, id: EntityId) {
        self.pending.take(id);
    }

    /// Handle one notification from `entity`.
    ///
    /// `target` is the non-owning reference stored on the record.
    pub fn observe(
        &mut self,
        registry: &TypeRegistry,
        entity: &dyn Trackable,
        target: &EntityRef,
        mutation: &Mutation,
        now: Instant,
    ) -> Option<ChangeRecord> {
        match self.try_observe(registry, entity, target, mutation, now) {
            Ok(record) => {
                tracing::debug!(
                    kind = %record.kind,
                    entity = %target.id(),
                    group = record.group.get(),
                    "captured change"
                );
                Some(record)
            }
            Err(reason) => {
                tracing::trace!(
                    kind = %mutation.kind,
                    entity = %target.id(),
                    reason = reason.as_str(),
                    "change not recorded"
                );
                None
            }
        }
    }

    fn try_observe(
        &mut self,
        registry: &TypeRegistry,
        entity: &dyn Trackable,
        target: &EntityRef,
        mutation: &Mutation,
        now: Instant,
    ) -> Result<ChangeRecord, SkipReason> {
        let id = entity.entity_id();

        if !self.enabled {
            if mutation.phase == MutationPhase::Changed {
                self.settle(id, mutation);
            }
            return Err(SkipReason::Stopped);
        }

        if mutation.phase == MutationPhase::BeforeChange {
            if !mutation.options.no_undo && !self.pending.contains(id) {
                self.pending.stash(id, entity.snapshot());
            }
            return Err(SkipReason::BeforePhase);
        }

        if mutation.options.no_undo {
            self.settle(id, mutation);
            return Err(SkipReason::NoUndo);
        }
        if mutation.options.avoid_store {
            return Err(SkipReason::AvoidStore);
        }

        let Some(handler) = registry.resolve(&mutation.kind) else {
            self.settle(id, mutation);
            return Err(SkipReason::UnknownKind);
        };
        if !handler.condition(entity, mutation) {
            self.settle(id, mutation);
            return Err(SkipReason::Condition);
        }

        let capture = {
            let mut cx = CaptureContext::new(entity, mutation, &mut self.pending);
            handler.capture(&mut cx)
        };
        self.settle(id, mutation);
        let capture = capture.ok_or(SkipReason::Declined)?;

        Ok(ChangeRecord {
            kind: mutation.kind.clone(),
            target: target.clone(),
            before: capture.before,
            after: capture.after,
            group: self.groups.next_tag(now),
            options: mutation.options.clone(),
        })
    }

    /// Drop the pending snapshot once an attribute mutation is resolved.
    ///
    /// Element mutations never announce a `BeforeChange`, so the slot is not
    /// theirs to clear; it may belong to a gesture still in progress.
    fn settle(&mut self, id: EntityId, mutation: &Mutation) {
        if mutation.elements.is_none() {
            self.pending.take(id);
        }
    }
}
