#![forbid(unsafe_code)]

//! Weak subscriber lists with RAII unsubscription.
//!
//! Both tracked entities (mutation notifications) and the [`UndoManager`]
//! (history events) hand out listeners through a [`ListenerSet`]. The set
//! stores only `Weak` references; the strong `Rc` lives inside the returned
//! [`Subscription`] guard, so dropping the guard is all it takes to stop
//! receiving callbacks.
//!
//! # Failure Modes
//!
//! - **Subscriber leak**: guards stored indefinitely keep their callbacks
//!   alive. Dead weak references are pruned lazily on [`ListenerSet::live`].
//!
//! [`UndoManager`]: crate::UndoManager

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Registration-ordered list of weakly held callbacks.
///
/// `F` is normally an unsized closure type such as `dyn Fn(&HistoryEvent)`.
pub struct ListenerSet<F: ?Sized> {
    listeners: RefCell<Vec<Weak<F>>>,
}

impl<F: ?Sized> Default for ListenerSet<F> {
    fn default() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
        }
    }
}

impl<F: ?Sized> fmt::Debug for ListenerSet<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("registered", &self.listeners.borrow().len())
            .finish()
    }
}

impl<F: ?Sized + 'static> ListenerSet<F> {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. It stays registered until the returned guard drops.
    pub fn subscribe(&self, callback: Rc<F>) -> Subscription {
        self.listeners.borrow_mut().push(Rc::downgrade(&callback));
        Subscription {
            _guard: Box::new(callback),
        }
    }

    /// Prune dead entries and return strong handles to the live ones.
    ///
    /// The internal borrow is released before returning, so callers may
    /// invoke the callbacks even if they subscribe further listeners.
    pub fn live(&self) -> Vec<Rc<F>> {
        let mut listeners = self.listeners.borrow_mut();
        listeners.retain(|w| w.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }

    /// Forget every registration. Outstanding guards become inert.
    pub fn clear(&self) {
        self.listeners.borrow_mut().clear();
    }

    /// Number of registered entries, including dead ones not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Whether no entries are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.borrow().is_empty()
    }
}

/// RAII guard for a registered callback.
///
/// Dropping the `Subscription` drops the strong `Rc`, so the weak entry in
/// the owning [`ListenerSet`] fails to upgrade from then on.
pub struct Subscription {
    /// Type-erased strong reference keeping the callback alive.
    _guard: Box<dyn Any>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
