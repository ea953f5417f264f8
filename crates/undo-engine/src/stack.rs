#![forbid(unsafe_code)]

//! Pointer-indexed command stack.
//!
//! [`CommandStack`] keeps recorded changes in one linear sequence plus a
//! `pointer` that counts how many of them are currently applied. Records
//! below the pointer are done history; records at or above it are the redo
//! tail, which only survives until the next push.
//!
//! ```text
//! push(r5)
//! ┌──────────────────────────────────────────────┐
//! │ records: [r1, r2, r3, r4, r5]    pointer: 5  │
//! └──────────────────────────────────────────────┘
//!
//! undo() x2
//! ┌──────────────────────────────────────────────┐
//! │ records: [r1, r2, r3 | r4, r5]   pointer: 3  │
//! └──────────────────────────────────────────────┘
//!
//! push(r6)  <-- new branch, drops the redo tail
//! ┌──────────────────────────────────────────────┐
//! │ records: [r1, r2, r3, r6]        pointer: 4  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! 1. `0 <= pointer <= len`.
//! 2. `len <= max_len` after every push (unless `max_len == 0`, unbounded).
//! 3. After a push, `pointer == len`.
//! 4. Eviction drops the oldest record and shifts the pointer with it.
//!
//! The stack moves the pointer and hands records out; replaying them against
//! entities is the caller's job (see [`CommandStack::undo`]).

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::entity::{ChangeOptions, EntityRef, Snapshot};
use crate::group::GroupTag;

/// One captured change.
///
/// Immutable once pushed; shared as `Rc<ChangeRecord>` between the stack and
/// read-only views.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    /// Change kind the record was captured under.
    pub kind: String,
    /// The live entity to replay against.
    pub target: EntityRef,
    /// State to restore on undo.
    pub before: Option<Snapshot>,
    /// State to restore on redo.
    pub after: Option<Snapshot>,
    /// Logical operation this record belongs to.
    pub group: GroupTag,
    /// Options the originating mutation carried.
    pub options: ChangeOptions,
}

/// Replay direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Undo,
    Redo,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undo => f.write_str("undo"),
            Self::Redo => f.write_str("redo"),
        }
    }
}

/// How far an undo or redo walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steps {
    /// A number of individual records.
    Records(usize),
    /// A number of logical groups (runs of records sharing a tag).
    Groups(usize),
    /// Until the stack is exhausted in that direction.
    All,
}

impl Default for Steps {
    fn default() -> Self {
        Self::Groups(1)
    }
}

/// Bounded, pointer-indexed history of [`ChangeRecord`]s.
pub struct CommandStack {
    records: VecDeque<Rc<ChangeRecord>>,
    pointer: usize,
    max_len: usize,
}

impl fmt::Debug for CommandStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandStack")
            .field("len", &self.records.len())
            .field("pointer", &self.pointer)
            .field("max_len", &self.max_len)
            .finish()
    }
}

impl Default for CommandStack {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAXIMUM_STACK_LENGTH)
    }
}

impl CommandStack {
    /// Create a stack holding at most `max_len` records (`0` = unbounded).
    #[must_use]
    pub fn new(max_len: usize) -> Self {
        Self {
            records: VecDeque::new(),
            pointer: 0,
            max_len,
        }
    }

    // ========================================================================
    // Core Operations
    // ========================================================================

    /// Push a record, dropping the redo tail and enforcing the length bound.
    ///
    /// Returns the evicted record, if the bound forced one out.
    pub fn push(&mut self, record: impl Into<Rc<ChangeRecord>>) -> Option<Rc<ChangeRecord>> {
        self.records.truncate(self.pointer);
        self.records.push_back(record.into());
        self.pointer += 1;

        if self.max_len > 0 && self.records.len() > self.max_len {
            let evicted = self.records.pop_front();
            self.pointer -= 1;
            if let Some(ref rec) = evicted {
                tracing::trace!(
                    kind = %rec.kind,
                    group = rec.group.get(),
                    max_len = self.max_len,
                    "evicted oldest change record"
                );
            }
            return evicted;
        }
        None
    }

    /// Move the pointer left by `steps` and return the records to revert, in
    /// the order they must be reverted (newest first).
    pub fn take_undo(&mut self, steps: Steps) -> Vec<Rc<ChangeRecord>> {
        let start = self.pointer;
        let mut groups_left = match steps {
            Steps::Groups(n) => n,
            _ => 0,
        };
        let mut records_left = match steps {
            Steps::Records(n) => n,
            _ => 0,
        };

        while self.pointer > 0 {
            match steps {
                Steps::All => {}
                Steps::Records(_) => {
                    if records_left == 0 {
                        break;
                    }
                    records_left -= 1;
                }
                Steps::Groups(_) => {
                    if groups_left == 0 {
                        break;
                    }
                    let tag = self.records[self.pointer - 1].group;
                    let continues = self.pointer >= 2 && self.records[self.pointer - 2].group == tag;
                    if !continues {
                        groups_left -= 1;
                    }
                }
            }
            self.pointer -= 1;
        }

        self.records
            .range(self.pointer..start)
            .rev()
            .cloned()
            .collect()
    }

    /// Move the pointer right by `steps` and return the records to re-apply,
    /// in application order (oldest first).
    pub fn take_redo(&mut self, steps: Steps) -> Vec<Rc<ChangeRecord>> {
        let start = self.pointer;
        let len = self.records.len();
        let mut groups_left = match steps {
            Steps::Groups(n) => n,
            _ => 0,
        };
        let mut records_left = match steps {
            Steps::Records(n) => n,
            _ => 0,
        };

        while self.pointer < len {
            match steps {
                Steps::All => {}
                Steps::Records(_) => {
                    if records_left == 0 {
                        break;
                    }
                    records_left -= 1;
                }
                Steps::Groups(_) => {
                    if groups_left == 0 {
                        break;
                    }
                    let tag = self.records[self.pointer].group;
                    let continues =
                        self.pointer + 1 < len && self.records[self.pointer + 1].group == tag;
                    if !continues {
                        groups_left -= 1;
                    }
                }
            }
            self.pointer += 1;
        }

        self.records.range(start..self.pointer).cloned().collect()
    }

    /// Undo `steps`, handing each record to `apply` in revert order.
    ///
    /// Returns whether at least one record was reverted.
    pub fn undo(&mut self, steps: Steps, mut apply: impl FnMut(&ChangeRecord)) -> bool {
        let taken = self.take_undo(steps);
        for record in &taken {
            apply(record);
        }
        !taken.is_empty()
    }

    /// Redo `steps`, handing each record to `apply` in application order.
    ///
    /// Returns whether at least one record was re-applied.
    pub fn redo(&mut self, steps: Steps, mut apply: impl FnMut(&ChangeRecord)) -> bool {
        let taken = self.take_redo(steps);
        for record in &taken {
            apply(record);
        }
        !taken.is_empty()
    }

    /// Undo everything.
    pub fn undo_all(&mut self, apply: impl FnMut(&ChangeRecord)) -> bool {
        self.undo(Steps::All, apply)
    }

    /// Redo everything.
    pub fn redo_all(&mut self, apply: impl FnMut(&ChangeRecord)) -> bool {
        self.redo(Steps::All, apply)
    }

    /// Whether a step is available in `direction`.
    #[must_use]
    pub fn is_available(&self, direction: Direction) -> bool {
        match direction {
            Direction::Undo => self.pointer > 0,
            Direction::Redo => self.pointer < self.records.len(),
        }
    }

    /// Check if undo is available.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.is_available(Direction::Undo)
    }

    /// Check if redo is available.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.is_available(Direction::Redo)
    }

    // ========================================================================
    // Info
    // ========================================================================

    /// Number of stored records, redo tail included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the stack holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records currently applied.
    #[must_use]
    pub fn pointer(&self) -> usize {
        self.pointer
    }

    /// Length bound (`0` = unbounded).
    #[must_use]
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// All records in stack order.
    pub fn records(&self) -> impl Iterator<Item = &Rc<ChangeRecord>> {
        self.records.iter()
    }

    /// One representative record per group, in order of first appearance.
    #[must_use]
    pub fn grouped(&self) -> Vec<Rc<ChangeRecord>> {
        group_representatives(self.records.iter())
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Drop all records and reset the pointer.
    pub fn clear(&mut self) {
        self.records.clear();
        self.pointer = 0;
    }
}

/// Keep the first record of each distinct group, preserving order.
pub fn group_representatives<'a>(
    records: impl IntoIterator<Item = &'a Rc<ChangeRecord>>,
) -> Vec<Rc<ChangeRecord>> {
    let mut seen = std::collections::HashSet::new();
    records
        .into_iter()
        .filter(|rec| seen.insert(rec.group))
        .cloned()
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityId, Trackable};
    use crate::model::TrackedModel;
    use serde_json::json;

    fn target() -> EntityRef {
        thread_local! {
            static MODEL: Rc<dyn Trackable> = {
                let model: Rc<dyn Trackable> = TrackedModel::from_json(json!({}));
                model
            };
        }
        MODEL.with(EntityRef::new)
    }

    fn rec(name: &str, group: u64) -> ChangeRecord {
        ChangeRecord {
            kind: "change".into(),
            target: target(),
            before: None,
            after: Some(json!(name)),
            group: GroupTag(group),
            options: ChangeOptions::new(),
        }
    }

    fn names(records: &[Rc<ChangeRecord>]) -> Vec<String> {
        records
            .iter()
            .map(|r| r.after.as_ref().and_then(|v| v.as_str()).unwrap_or("").to_string())
            .collect()
    }

    fn stack_names(stack: &CommandStack) -> Vec<String> {
        names(&stack.records().cloned().collect::<Vec<_>>())
    }

    #[test]
    fn test_new_stack() {
        let stack = CommandStack::new(10);
        assert!(stack.is_empty());
        assert_eq!(stack.pointer(), 0);
        assert!(!stack.can_undo());
        assert!(!stack.can_redo());
    }

    #[test]
    fn test_push_advances_pointer() {
        let mut stack = CommandStack::new(10);
        stack.push(rec("a", 1));
        stack.push(rec("b", 2));
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.pointer(), 2);
        assert!(stack.can_undo());
        assert!(!stack.can_redo());
    }

    #[test]
    fn test_bound_evicts_oldest() {
        let mut stack = CommandStack::new(2);
        assert!(stack.push(rec("A", 1)).is_none());
        assert!(stack.push(rec("B", 2)).is_none());
        let evicted = stack.push(rec("C", 3)).expect("A evicted");
        assert_eq!(evicted.after, Some(json!("A")));
        assert_eq!(stack_names(&stack), vec!["B", "C"]);
        assert_eq!(stack.pointer(), 2);
    }

    #[test]
    fn test_zero_bound_is_unbounded() {
        let mut stack = CommandStack::new(0);
        for i in 0..1000 {
            stack.push(rec("x", i));
        }
        assert_eq!(stack.len(), 1000);
    }

    #[test]
    fn test_undo_then_push_discards_tail() {
        let mut stack = CommandStack::new(10);
        stack.push(rec("a", 1));
        stack.push(rec("b", 2));
        stack.push(rec("c", 3));

        let undone = stack.take_undo(Steps::Records(2));
        assert_eq!(names(&undone), vec!["c", "b"]);
        assert_eq!(stack.pointer(), 1);
        assert_eq!(stack.len(), 3, "tail kept until next push");

        stack.push(rec("d", 4));
        assert_eq!(stack_names(&stack), vec!["a", "d"]);
        assert!(!stack.can_redo());
    }

    #[test]
    fn test_redo_order() {
        let mut stack = CommandStack::new(10);
        stack.push(rec("a", 1));
        stack.push(rec("b", 2));
        stack.take_undo(Steps::All);
        let redone = stack.take_redo(Steps::All);
        assert_eq!(names(&redone), vec!["a", "b"]);
        assert_eq!(stack.pointer(), 2);
    }

    #[test]
    fn test_group_steps() {
        let mut stack = CommandStack::new(10);
        stack.push(rec("a", 1));
        stack.push(rec("b", 2));
        stack.push(rec("c", 2));
        stack.push(rec("d", 2));
        stack.push(rec("e", 3));

        assert_eq!(names(&stack.take_undo(Steps::Groups(1))), vec!["e"]);
        assert_eq!(names(&stack.take_undo(Steps::Groups(1))), vec!["d", "c", "b"]);
        assert_eq!(stack.pointer(), 1);

        assert_eq!(names(&stack.take_redo(Steps::Groups(1))), vec!["b", "c", "d"]);
        assert_eq!(names(&stack.take_redo(Steps::Groups(2))), vec!["e"]);
        assert_eq!(stack.pointer(), 5);
    }

    #[test]
    fn test_undo_callback_and_result() {
        let mut stack = CommandStack::new(10);
        let mut seen = Vec::new();
        assert!(!stack.undo(Steps::Records(1), |r| seen.push(r.group)));

        stack.push(rec("a", 1));
        stack.push(rec("b", 2));
        assert!(stack.undo_all(|r| seen.push(r.group)));
        assert_eq!(seen, vec![GroupTag(2), GroupTag(1)]);

        seen.clear();
        assert!(stack.redo_all(|r| seen.push(r.group)));
        assert_eq!(seen, vec![GroupTag(1), GroupTag(2)]);
        assert!(!stack.redo(Steps::Records(1), |_| {}));
    }

    #[test]
    fn test_grouped_view() {
        let mut stack = CommandStack::new(10);
        stack.push(rec("a", 1));
        stack.push(rec("b", 2));
        stack.push(rec("c", 2));
        stack.push(rec("d", 3));
        assert_eq!(names(&stack.grouped()), vec!["a", "b", "d"]);
    }

    #[test]
    fn test_clear() {
        let mut stack = CommandStack::new(10);
        stack.push(rec("a", 1));
        stack.take_undo(Steps::All);
        stack.clear();
        assert!(stack.is_empty());
        assert_eq!(stack.pointer(), 0);
        assert!(!stack.can_redo());
    }

    #[test]
    fn test_debug_impl() {
        let stack = CommandStack::default();
        let debug_str = format!("{stack:?}");
        assert!(debug_str.contains("CommandStack"));
        assert!(debug_str.contains("pointer"));
        assert_eq!(stack.max_len(), 500);
    }

    #[test]
    fn test_record_target_identity() {
        let record = rec("a", 1);
        assert!(!record.target.is_dangling());
        assert_ne!(record.target.id(), EntityId::new(0));
    }
}
