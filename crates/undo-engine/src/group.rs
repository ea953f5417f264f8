#![forbid(unsafe_code)]

//! Grouping of change bursts into logical operations.
//!
//! Every [`ChangeRecord`](crate::ChangeRecord) carries a [`GroupTag`].
//! Consecutive records with the same tag undo and redo as one step. A new tag
//! is issued whenever a logical-operation boundary has been crossed since the
//! previous change:
//!
//! - an explicit group opens ([`GroupIndex::begin`], outermost only),
//! - an explicit group closes ([`GroupIndex::end`], outermost only),
//! - history was replayed ([`GroupIndex::mark_boundary`]),
//! - outside explicit groups: always, unless an idle window is configured and
//!   the previous change happened within it.
//!
//! # Invariants
//!
//! 1. Tags increase monotonically from 1 and are never reused.
//! 2. All changes inside one outermost `begin`/`end` pair share a tag.

use std::time::Duration;

use web_time::Instant;

/// Identifier shared by the records of one logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupTag(pub u64);

impl GroupTag {
    /// Get the raw tag value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Issues [`GroupTag`]s for incoming changes.
#[derive(Debug, Clone)]
pub struct GroupIndex {
    /// Last issued tag (0 before the first change).
    current: u64,
    /// Nesting depth of explicit groups.
    depth: u32,
    /// The next change must open a new group.
    boundary: bool,
    /// When the previous change was tagged.
    last_change: Option<Instant>,
    /// Idle gap under which ungrouped changes coalesce.
    window: Option<Duration>,
}

impl Default for GroupIndex {
    fn default() -> Self {
        Self::new(None)
    }
}

impl GroupIndex {
    /// Create an index. `window` of `None` or zero disables idle coalescing.
    #[must_use]
    pub fn new(window: Option<Duration>) -> Self {
        Self {
            current: 0,
            depth: 0,
            boundary: true,
            last_change: None,
            window: window.filter(|w| !w.is_zero()),
        }
    }

    /// Open an explicit group. Nested calls join the outermost group.
    pub fn begin(&mut self) {
        if self.depth == 0 {
            self.boundary = true;
        }
        self.depth += 1;
    }

    /// Close an explicit group. Unbalanced calls are ignored.
    pub fn end(&mut self) {
        if self.depth == 0 {
            return;
        }
        self.depth -= 1;
        if self.depth == 0 {
            self.mark_boundary();
        }
    }

    /// Force the next change into a new group.
    pub fn mark_boundary(&mut self) {
        self.boundary = true;
        self.last_change = None;
    }

    /// Tag for a change observed at `now`.
    pub fn next_tag(&mut self, now: Instant) -> GroupTag {
        let coalesce = if self.depth > 0 {
            !self.boundary
        } else {
            !self.boundary
                && matches!(
                    (self.window, self.last_change),
                    (Some(window), Some(last)) if now.saturating_duration_since(last) <= window
                )
        };
        if !coalesce {
            self.current += 1;
        }
        self.boundary = false;
        self.last_change = Some(now);
        GroupTag(self.current)
    }

    /// Nesting depth of explicit groups.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Last issued tag, if any.
    #[must_use]
    pub fn current(&self) -> Option<GroupTag> {
        (self.current > 0).then_some(GroupTag(self.current))
    }

    /// Configured idle window.
    #[must_use]
    pub fn window(&self) -> Option<Duration> {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ungrouped_changes_get_distinct_tags() {
        let mut idx = GroupIndex::default();
        let now = Instant::now();
        let a = idx.next_tag(now);
        let b = idx.next_tag(now);
        assert_eq!(a, GroupTag(1));
        assert_eq!(b, GroupTag(2));
    }

    #[test]
    fn explicit_group_shares_tag() {
        let mut idx = GroupIndex::default();
        let now = Instant::now();
        let before = idx.next_tag(now);

        idx.begin();
        let a = idx.next_tag(now);
        idx.begin();
        let b = idx.next_tag(now);
        idx.end();
        let c = idx.next_tag(now);
        idx.end();

        let after = idx.next_tag(now);
        assert_ne!(before, a);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_ne!(c, after);
        assert_eq!(idx.depth(), 0);
    }

    #[test]
    fn unbalanced_end_is_ignored() {
        let mut idx = GroupIndex::default();
        idx.end();
        assert_eq!(idx.depth(), 0);
        assert_eq!(idx.current(), None);
    }

    #[test]
    fn idle_window_coalesces() {
        let mut idx = GroupIndex::new(Some(Duration::from_millis(100)));
        let t0 = Instant::now();
        let a = idx.next_tag(t0);
        let b = idx.next_tag(t0 + Duration::from_millis(50));
        let c = idx.next_tag(t0 + Duration::from_millis(120));
        let d = idx.next_tag(t0 + Duration::from_millis(400));
        assert_eq!(a, b);
        assert_eq!(b, c, "window measured from the previous change");
        assert_ne!(c, d);
    }

    #[test]
    fn boundary_breaks_window() {
        let mut idx = GroupIndex::new(Some(Duration::from_secs(10)));
        let t0 = Instant::now();
        let a = idx.next_tag(t0);
        idx.mark_boundary();
        let b = idx.next_tag(t0);
        assert_ne!(a, b);
    }

    #[test]
    fn zero_window_is_disabled() {
        let idx = GroupIndex::new(Some(Duration::ZERO));
        assert_eq!(idx.window(), None);
    }
}
