#![forbid(unsafe_code)]

//! Undo Engine
//!
//! In-memory change history for a set of host-owned stateful entities.
//! Entity mutations are captured as before/after snapshots, stored on a
//! bounded pointer-indexed stack, and replayed on undo/redo.
//!
//! # Key Components
//!
//! - [`UndoManager`] - Host-facing facade: tracking, recording, undo/redo, events
//! - [`Trackable`] - Capability interface an entity implements to be tracked
//! - [`TrackedModel`] - Stock attribute-map entity with child elements
//! - [`TypeRegistry`] / [`ChangeHandler`] - Per-kind capture and replay
//! - [`Recorder`] - Turns notifications into [`ChangeRecord`]s
//! - [`CommandStack`] - Bounded history with a pointer and redo tail
//! - [`GroupIndex`] - Groups bursts of changes into logical operations
//! - [`HistoryConfig`] - Stack bound, group window, pass-through options
//!
//! # Threading
//! Everything is single-threaded and synchronous. Shared state uses `Rc` and
//! `RefCell`; no type here is `Send`.

pub mod config;
pub mod entity;
pub mod group;
pub mod handlers;
pub mod listener;
pub mod manager;
pub mod model;
pub mod recorder;
pub mod registry;
pub mod stack;
pub mod tracking;

pub use config::{ConfigError, DEFAULT_MAXIMUM_STACK_LENGTH, HistoryConfig};
pub use entity::{
    ChangeOptions, ElementChange, ElementContainer, EntityId, EntityRef, Mutation,
    MutationListener, MutationPhase, Snapshot, Trackable, UndoMode, UndoPolicy,
};
pub use group::{GroupIndex, GroupTag};
pub use handlers::CustomHandler;
pub use listener::{ListenerSet, Subscription};
pub use manager::{GroupScope, HistoryEvent, StackView, UndoManager};
pub use model::TrackedModel;
pub use recorder::{PendingSnapshots, Recorder, SkipReason};
pub use registry::{Capture, CaptureContext, ChangeHandler, TypeRegistry};
pub use stack::{ChangeRecord, CommandStack, Direction, Steps, group_representatives};
pub use tracking::TrackingRegistry;
