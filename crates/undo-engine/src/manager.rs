#![forbid(unsafe_code)]

//! Host-facing history facade.
//!
//! [`UndoManager`] wires the pieces together: entities registered with
//! [`add`](UndoManager::add) feed their notifications to the [`Recorder`],
//! captured records land on the [`CommandStack`], and
//! [`undo`](UndoManager::undo) / [`redo`](UndoManager::redo) replay them
//! through the [`TypeRegistry`].
//!
//! # Usage
//!
//! ```ignore
//! let history = UndoManager::new(HistoryConfig::default());
//! let shape = TrackedModel::from_json(json!({"color": "red"}));
//! history.add(&shape);
//!
//! shape.set("color", "blue");
//! history.undo(true);
//! assert_eq!(shape.get("color"), Some(json!("red")));
//! ```
//!
//! # Invariants
//!
//! 1. Replaying history never records history: notifications raised while a
//!    replay is running are ignored.
//! 2. Records leave the stack before any entity is touched, so listeners may
//!    query the manager from inside a replay.
//! 3. Every undo or redo closes the current group.
//!
//! # Failure Modes
//!
//! - **Dropped target**: a record whose entity no longer exists is skipped
//!   with a warning; the pointer still moves past it.
//! - **Re-entrant registry edits**: registering kinds from inside a capture
//!   callback panics on the registry borrow.
//! - **Re-entrant changes**: a tracked entity changed from inside a capture
//!   callback is not recorded; a warning is logged instead.
//! - **Destroyed manager**: once any handle is destroyed, the remaining
//!   clones ignore `add`, `start`, changes and replays.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::field::Empty;
use web_time::Instant;

use crate::config::HistoryConfig;
use crate::entity::{ChangeOptions, EntityId, Mutation, MutationListener, Trackable};
use crate::group::{GroupIndex, GroupTag};
use crate::listener::{ListenerSet, Subscription};
use crate::recorder::Recorder;
use crate::registry::{ChangeHandler, TypeRegistry};
use crate::stack::{ChangeRecord, CommandStack, Direction, Steps};
use crate::tracking::TrackingRegistry;

/// Notifications emitted to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    /// A change was pushed onto the stack.
    Recorded { kind: String, group: GroupTag },
    /// An undo moved the pointer.
    Undo,
    /// A redo moved the pointer.
    Redo,
    /// Views showing tracked entities should re-render.
    Refresh,
    /// The stack was emptied.
    Cleared,
}

type EventListener = dyn Fn(&HistoryEvent);
type EditingProbe = Rc<dyn Fn() -> bool>;

/// Read-only copy of the stack at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackView {
    pub records: Vec<Rc<ChangeRecord>>,
    pub pointer: usize,
}

impl StackView {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.pointer > 0
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.pointer < self.records.len()
    }
}

struct Shared {
    config: HistoryConfig,
    registry: RefCell<TypeRegistry>,
    tracking: RefCell<TrackingRegistry>,
    recorder: RefCell<Recorder>,
    stack: RefCell<CommandStack>,
    /// Active replays. Notifications are ignored while non-zero.
    replay_depth: Cell<u32>,
    /// Active `skip` scopes. Mutations are treated as `no_undo` while non-zero.
    skip_depth: Cell<u32>,
    destroyed: Cell<bool>,
    editing: RefCell<Option<EditingProbe>>,
    events: ListenerSet<EventListener>,
}

/// Undo/redo engine for a set of tracked entities.
///
/// Cloning yields another handle to the same history.
#[derive(Clone)]
pub struct UndoManager {
    shared: Rc<Shared>,
}

impl fmt::Debug for UndoManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stack = self.shared.stack.borrow();
        f.debug_struct("UndoManager")
            .field("tracked", &self.shared.tracking.borrow().len())
            .field("records", &stack.len())
            .field("pointer", &stack.pointer())
            .field("recording", &self.is_recording())
            .finish()
    }
}

impl Default for UndoManager {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

/// Decrements a depth counter on drop, so panicking handlers cannot leave
/// the manager stuck in replay or skip mode.
struct DepthGuard<'a>(&'a Cell<u32>);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<u32>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

impl UndoManager {
    /// Create a manager with the stock change handlers.
    #[must_use]
    pub fn new(config: HistoryConfig) -> Self {
        Self::with_registry(config, TypeRegistry::with_defaults())
    }

    /// Create a manager with a caller-built registry.
    #[must_use]
    pub fn with_registry(config: HistoryConfig, registry: TypeRegistry) -> Self {
        let stack = CommandStack::new(config.maximum_stack_length);
        let recorder = Recorder::new(GroupIndex::new(config.group_window()));
        Self {
            shared: Rc::new(Shared {
                config,
                registry: RefCell::new(registry),
                tracking: RefCell::new(TrackingRegistry::new()),
                recorder: RefCell::new(recorder),
                stack: RefCell::new(stack),
                replay_depth: Cell::new(0),
                skip_depth: Cell::new(0),
            destroyed: Cell::new(false),
                editing: RefCell::new(None),
                events: ListenerSet::new(),
            }),
        }
    }

    /// Configuration the manager was built with.
    #[must_use]
    pub fn config(&self) -> &HistoryConfig {
        &self.shared.config
    }

    // ========================================================================
    // Tracking
    // ========================================================================

    /// Start recording changes of `entity`. Adding twice is a no-op.
    pub fn add<T: Trackable>(&self, entity: &Rc<T>) -> &Self {
        let entity: Rc<dyn Trackable> = entity.clone();
        self.add_dyn(&entity)
    }

    /// [`add`](Self::add) for an already type-erased entity.
    pub fn add_dyn(&self, entity: &Rc<dyn Trackable>) -> &Self {
        if self.shared.destroyed.get() {
            tracing::debug!(entity = %entity.entity_id(), "history destroyed, not tracking");
            return self;
        }
        let weak: Weak<Shared> = Rc::downgrade(&self.shared);
        let listener: MutationListener =
            Rc::new(move |entity: &dyn Trackable, mutation: &Mutation| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_mutation(entity, mutation);
                }
            });
        if self.shared.tracking.borrow_mut().add(entity, listener) {
            tracing::debug!(entity = %entity.entity_id(), "tracking entity");
        }
        self
    }

    /// Stop recording changes of `entity`. Its records stay on the stack.
    pub fn remove<T: Trackable + ?Sized>(&self, entity: &T) -> &Self {
        self.remove_id(entity.entity_id())
    }

    /// [`remove`](Self::remove) by identity.
    pub fn remove_id(&self, id: EntityId) -> &Self {
        if self.shared.tracking.borrow_mut().remove(id) {
            self.shared.recorder.borrow_mut().forget(id);
            tracing::debug!(entity = %id, "untracked entity");
        }
        self
    }

    /// Stop recording changes of every entity.
    pub fn remove_all(&self) -> &Self {
        let n = self.shared.tracking.borrow_mut().clear();
        self.shared.recorder.borrow_mut().pending_mut().clear();
        tracing::debug!(count = n, "untracked all entities");
        self
    }

    #[must_use]
    pub fn is_tracked(&self, id: EntityId) -> bool {
        self.shared.tracking.borrow().contains(id)
    }

    /// Identities of the tracked entities.
    #[must_use]
    pub fn tracked(&self) -> Vec<EntityId> {
        self.shared.tracking.borrow().ids()
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Resume recording.
    pub fn start(&self) -> &Self {
        if self.shared.destroyed.get() {
            tracing::debug!("history destroyed, not starting");
            return self;
        }
        self.shared.recorder.borrow_mut().start();
        self
    }

    /// Pause recording. Entities stay tracked.
    pub fn stop(&self) -> &Self {
        self.shared.recorder.borrow_mut().stop();
        self
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.shared.recorder.borrow().is_enabled()
    }

    /// Whether any handle to this manager has been destroyed.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.get()
    }

    /// Run `f` with every mutation treated as `no_undo`.
    pub fn skip<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = DepthGuard::enter(&self.shared.skip_depth);
        f()
    }

    /// Register or replace the handler for `kind`.
    pub fn register_kind(&self, kind: impl Into<String>, handler: impl ChangeHandler + 'static) -> &Self {
        self.shared.registry.borrow_mut().register(kind, handler);
        self
    }

    /// Remove the handler for `kind`. Returns whether one was registered.
    pub fn unregister_kind(&self, kind: &str) -> bool {
        self.shared.registry.borrow_mut().unregister(kind)
    }

    #[must_use]
    pub fn has_kind(&self, kind: &str) -> bool {
        self.shared.registry.borrow().contains(kind)
    }

    // ========================================================================
    // Grouping
    // ========================================================================

    /// Open an explicit group. Nested calls join the outermost one.
    pub fn begin_group(&self) -> &Self {
        self.shared.recorder.borrow_mut().groups_mut().begin();
        self
    }

    /// Close an explicit group.
    pub fn end_group(&self) -> &Self {
        self.shared.recorder.borrow_mut().groups_mut().end();
        self
    }

    /// Open a group that closes when the returned guard drops.
    #[must_use = "the group closes as soon as the scope is dropped"]
    pub fn group_scope(&self) -> GroupScope {
        self.begin_group();
        GroupScope {
            manager: self.clone(),
        }
    }

    // ========================================================================
    // Undo / Redo
    // ========================================================================

    /// Install a callback reporting whether the host is mid inline edit.
    /// While it returns `true`, [`undo`](Self::undo) and [`redo`](Self::redo)
    /// do nothing.
    pub fn set_editing_probe(&self, probe: impl Fn() -> bool + 'static) -> &Self {
        *self.shared.editing.borrow_mut() = Some(Rc::new(probe));
        self
    }

    /// Remove the editing probe.
    pub fn clear_editing_probe(&self) -> &Self {
        self.shared.editing.borrow_mut().take();
        self
    }

    /// Whether the editing probe currently reports an active edit.
    #[must_use]
    pub fn is_editing(&self) -> bool {
        let probe = self.shared.editing.borrow().clone();
        probe.is_some_and(|probe| probe())
    }

    /// Undo one logical group (`whole_group`) or one record.
    pub fn undo(&self, whole_group: bool) -> &Self {
        self.guarded(Direction::Undo, whole_group);
        self
    }

    /// Redo one logical group (`whole_group`) or one record.
    pub fn redo(&self, whole_group: bool) -> &Self {
        self.guarded(Direction::Redo, whole_group);
        self
    }

    /// Undo everything, regardless of the editing probe.
    pub fn undo_all(&self) -> &Self {
        self.replay(Direction::Undo, Steps::All);
        self
    }

    /// Redo everything, regardless of the editing probe.
    pub fn redo_all(&self) -> &Self {
        self.replay(Direction::Redo, Steps::All);
        self
    }

    fn guarded(&self, direction: Direction, whole_group: bool) -> bool {
        if self.is_editing() {
            tracing::debug!(%direction, "history step blocked by active edit");
            return false;
        }
        let steps = if whole_group {
            Steps::Groups(1)
        } else {
            Steps::Records(1)
        };
        self.replay(direction, steps)
    }

    /// Move through history by `steps` and apply the records passed.
    ///
    /// Returns whether the pointer moved. Ignores the editing probe.
    pub fn replay(&self, direction: Direction, steps: Steps) -> bool {
        let span = tracing::debug_span!(
            "history.replay",
            %direction,
            steps = ?steps,
            applied = Empty
        );
        let _enter = span.enter();

        if self.shared.destroyed.get() {
            tracing::debug!("history destroyed, nothing to replay");
            return false;
        }

        let records = {
            let mut stack = self.shared.stack.borrow_mut();
            match direction {
                Direction::Undo => stack.take_undo(steps),
                Direction::Redo => stack.take_redo(steps),
            }
        };
        {
            // Replayed entities no longer hold the state a pending gesture began from.
            let mut recorder = self.shared.recorder.borrow_mut();
            for record in &records {
                recorder.forget(record.target.id());
            }
            recorder.groups_mut().mark_boundary();
        }

        let mut applied = 0_u64;
        {
            let _replaying = DepthGuard::enter(&self.shared.replay_depth);
            for record in &records {
                if self.shared.apply(direction, record) {
                    applied += 1;
                }
            }
        }
        span.record("applied", applied);

        if records.is_empty() {
            return false;
        }
        self.shared.emit(&match direction {
            Direction::Undo => HistoryEvent::Undo,
            Direction::Redo => HistoryEvent::Redo,
        });
        self.shared.emit(&HistoryEvent::Refresh);
        true
    }

    #[must_use]
    pub fn has_undo(&self) -> bool {
        self.shared.stack.borrow().can_undo()
    }

    #[must_use]
    pub fn has_redo(&self) -> bool {
        self.shared.stack.borrow().can_redo()
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// All records plus the pointer.
    #[must_use]
    pub fn stack(&self) -> StackView {
        let stack = self.shared.stack.borrow();
        StackView {
            records: stack.records().cloned().collect(),
            pointer: stack.pointer(),
        }
    }

    /// One representative record per logical group.
    #[must_use]
    pub fn stack_group(&self) -> Vec<Rc<ChangeRecord>> {
        self.shared.stack.borrow().grouped()
    }

    #[must_use]
    pub fn pointer(&self) -> usize {
        self.shared.stack.borrow().pointer()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Forget all history. Tracked entities stay tracked.
    pub fn clear(&self) -> &Self {
        self.shared.stack.borrow_mut().clear();
        {
            let mut recorder = self.shared.recorder.borrow_mut();
            recorder.pending_mut().clear();
            recorder.groups_mut().mark_boundary();
        }
        tracing::debug!("history cleared");
        self.shared.emit(&HistoryEvent::Cleared);
        self
    }

    /// Subscribe to [`HistoryEvent`]s until the guard drops.
    pub fn subscribe(&self, listener: impl Fn(&HistoryEvent) + 'static) -> Subscription {
        let listener: Rc<EventListener> = Rc::new(listener);
        self.shared.events.subscribe(listener)
    }

    /// Tear the manager down: history, tracking, probe and listeners are
    /// released and recording stops. Other handles see an empty, stopped
    /// manager.
    pub fn destroy(self) {
        self.stop();
        self.remove_all();
        self.shared.stack.borrow_mut().clear();
        self.shared.editing.borrow_mut().take();
        self.shared.events.clear();
        self.shared.destroyed.set(true);
        tracing::debug!("history destroyed");
    }
}

impl Shared {
    fn on_mutation(&self, entity: &dyn Trackable, mutation: &Mutation) {
        if self.replay_depth.get() > 0 {
            return;
        }
        if self.destroyed.get() {
            tracing::debug!(entity = %entity.entity_id(), "history destroyed, ignoring change");
            return;
        }
        let Some(target) = self.tracking.borrow().get(entity.entity_id()).cloned() else {
            return;
        };

        let skipped;
        let mutation = if self.skip_depth.get() > 0 && !mutation.options.no_undo {
            skipped = Mutation {
                options: ChangeOptions {
                    no_undo: true,
                    ..mutation.options.clone()
                },
                ..mutation.clone()
            };
            &skipped
        } else {
            mutation
        };

        let record = {
            let Ok(mut recorder) = self.recorder.try_borrow_mut() else {
                tracing::warn!(
                    kind = %mutation.kind,
                    entity = %entity.entity_id(),
                    "ignoring change raised while another change is being captured"
                );
                return;
            };
            let registry = self.registry.borrow();
            recorder.observe(&registry, entity, &target, mutation, Instant::now())
        };
        let Some(record) = record else {
            return;
        };

        let kind = record.kind.clone();
        let group = record.group;
        {
            let mut stack = self.stack.borrow_mut();
            stack.push(record);
            tracing::debug!(
                kind = %kind,
                group = group.get(),
                pointer = stack.pointer(),
                len = stack.len(),
                "recorded change"
            );
        }
        self.emit(&HistoryEvent::Recorded { kind, group });
    }

    fn apply(&self, direction: Direction, record: &ChangeRecord) -> bool {
        let Some(entity) = record.target.upgrade() else {
            tracing::warn!(
                kind = %record.kind,
                entity = %record.target.id(),
                "skipping change for dropped entity"
            );
            return false;
        };
        let Some(handler) = self.registry.borrow().resolve(&record.kind) else {
            tracing::warn!(kind = %record.kind, "skipping change with unregistered kind");
            return false;
        };

        let options = ChangeOptions {
            from_history: true,
            ..record.options.clone()
        };
        let (before, after) = (record.before.as_ref(), record.after.as_ref());
        match direction {
            Direction::Undo => handler.apply_undo(&*entity, before, after, &options),
            Direction::Redo => handler.apply_redo(&*entity, before, after, &options),
        }
        true
    }

    fn emit(&self, event: &HistoryEvent) {
        for listener in self.events.live() {
            listener(event);
        }
    }
}

/// RAII guard for an explicit group. See [`UndoManager::group_scope`].
pub struct GroupScope {
    manager: UndoManager,
}

impl fmt::Debug for GroupScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupScope").finish_non_exhaustive()
    }
}

impl Drop for GroupScope {
    fn drop(&mut self) {
        self.manager.end_group();
    }
}
