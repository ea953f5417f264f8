#![forbid(unsafe_code)]

//! Property tests for history invariants.
//!
//! Validates:
//! - The stack never exceeds its bound and keeps the most recent records.
//! - The pointer always stays within `0..=len`.
//! - A new change after undo discards the redo tail.
//! - Undo restores the exact prior state; redo restores the exact later one.
//! - Group-level undo never splits a group.
//! - Drag-style `avoid_store` changes interleaved with undo/redo replay the
//!   same states as a shadow model of the stack.

use std::rc::Rc;

use proptest::prelude::*;
use serde_json::{Map, Value, json};

use undo_engine::{
    ChangeOptions, ChangeRecord, CommandStack, Direction, EntityRef, GroupTag, HistoryConfig,
    Steps, Trackable, TrackedModel, UndoManager,
};

// ============================================================================
// Strategy helpers
// ============================================================================

/// Operations driven through the facade.
#[derive(Debug, Clone)]
enum Op {
    Set(i64),
    /// An intermediate step of a gesture, kept out of history.
    AvoidStore(i64),
    Undo,
    Redo,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0i64..1000).prop_map(Op::Set),
        2 => (0i64..1000).prop_map(Op::AvoidStore),
        2 => Just(Op::Undo),
        2 => Just(Op::Redo),
    ]
}

fn ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(), 1..=max_len)
}

fn record(target: &EntityRef, n: usize) -> ChangeRecord {
    ChangeRecord {
        kind: "change".into(),
        target: target.clone(),
        before: None,
        after: Some(json!(n)),
        group: GroupTag(n as u64 + 1),
        options: ChangeOptions::new(),
    }
}

fn value_of(model: &TrackedModel) -> Value {
    model.get("v").unwrap_or(Value::Null)
}

fn set_v(model: &TrackedModel, v: i64, options: ChangeOptions) {
    let mut attrs = Map::new();
    attrs.insert("v".into(), json!(v));
    model.set_with(attrs, "change", options);
}

/// What the stack should hold: one `(before, after)` pair per record, a
/// pointer, the live value and the start of an unfinished gesture.
#[derive(Debug)]
struct Shadow {
    records: Vec<(i64, i64)>,
    pointer: usize,
    current: i64,
    gesture_start: Option<i64>,
}

impl Shadow {
    fn new(current: i64) -> Self {
        Self {
            records: Vec::new(),
            pointer: 0,
            current,
            gesture_start: None,
        }
    }

    fn apply(&mut self, op: &Op) {
        match *op {
            Op::Set(v) if v != self.current => {
                let before = self.gesture_start.take().unwrap_or(self.current);
                self.current = v;
                if before != v {
                    self.records.truncate(self.pointer);
                    self.records.push((before, v));
                    self.pointer += 1;
                }
            }
            Op::AvoidStore(v) if v != self.current => {
                self.gesture_start.get_or_insert(self.current);
                self.current = v;
            }
            Op::Set(_) | Op::AvoidStore(_) => {}
            Op::Undo => {
                if self.pointer > 0 {
                    self.pointer -= 1;
                    self.current = self.records[self.pointer].0;
                    self.gesture_start = None;
                }
            }
            Op::Redo => {
                if self.pointer < self.records.len() {
                    self.current = self.records[self.pointer].1;
                    self.pointer += 1;
                    self.gesture_start = None;
                }
            }
        }
    }
}

// ============================================================================
// Invariant 1: Stack bound keeps the most recent records
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn bound_keeps_most_recent(
        max_len in 1usize..20,
        extra in 1usize..20,
    ) {
        let model: Rc<dyn Trackable> = TrackedModel::from_json(json!({}));
        let target = EntityRef::new(&model);
        let mut stack = CommandStack::new(max_len);

        let total = max_len + extra;
        for n in 0..total {
            stack.push(record(&target, n));
        }

        prop_assert_eq!(stack.len(), max_len);
        prop_assert_eq!(stack.pointer(), max_len);
        let kept: Vec<Value> = stack
            .records()
            .filter_map(|r| r.after.clone())
            .collect();
        let expected: Vec<Value> = (total - max_len..total).map(|n| json!(n)).collect();
        prop_assert_eq!(kept, expected);
    }
}

// ============================================================================
// Invariant 2: Pointer range and bound under random operation sequences
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn pointer_stays_in_range(
        max_len in 1usize..10,
        ops in ops_strategy(80),
    ) {
        let history = UndoManager::new(HistoryConfig::new(max_len));
        let model = TrackedModel::from_json(json!({"v": -1}));
        history.add(&model);

        for op in &ops {
            match op {
                Op::Set(v) => model.set("v", *v),
                Op::AvoidStore(v) => set_v(&model, *v, ChangeOptions::avoid_store()),
                Op::Undo => { history.undo(true); }
                Op::Redo => { history.redo(true); }
            }
            let view = history.stack();
            prop_assert!(view.pointer <= view.len(), "pointer {} > len {} after {:?}", view.pointer, view.len(), op);
            prop_assert!(view.len() <= max_len, "len {} > max {} after {:?}", view.len(), max_len, op);
            prop_assert_eq!(history.has_undo(), view.pointer > 0);
            prop_assert_eq!(history.has_redo(), view.pointer < view.len());
        }
    }
}

// ============================================================================
// Invariant 3: A change after undo discards the redo tail
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn new_change_discards_redo_tail(
        count in 2usize..20,
        undos in 1usize..20,
    ) {
        let history = UndoManager::new(HistoryConfig::unlimited());
        let model = TrackedModel::from_json(json!({"v": 0}));
        history.add(&model);

        for n in 1..=count {
            model.set("v", n as i64);
        }
        let undos = undos.min(count);
        for _ in 0..undos {
            history.undo(true);
        }
        prop_assert!(history.has_redo());

        model.set("v", -1);
        prop_assert!(!history.has_redo());
        prop_assert_eq!(history.stack().len(), count - undos + 1);
        prop_assert_eq!(history.pointer(), count - undos + 1);
    }
}

// ============================================================================
// Invariant 4: Undo/redo round-trip restores exact states
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn undo_redo_round_trip(
        values in prop::collection::vec(0i64..1000, 1..30),
    ) {
        let history = UndoManager::new(HistoryConfig::unlimited());
        let model = TrackedModel::from_json(json!({"v": -1}));
        history.add(&model);

        let mut states = vec![value_of(&model)];
        for v in &values {
            model.set("v", *v);
            let current = value_of(&model);
            if states.last() != Some(&current) {
                states.push(current);
            }
        }
        prop_assert_eq!(history.stack().len(), states.len() - 1);

        // Walk back to the start, checking every intermediate state.
        for expected in states.iter().rev().skip(1) {
            history.undo(true);
            prop_assert_eq!(&value_of(&model), expected);
        }
        prop_assert!(!history.has_undo());

        // And forward again.
        for expected in states.iter().skip(1) {
            history.redo(true);
            prop_assert_eq!(&value_of(&model), expected);
        }
        prop_assert!(!history.has_redo());
        prop_assert_eq!(history.stack().len(), states.len() - 1);
    }
}

// ============================================================================
// Invariant 5: Group-level undo moves the pointer to a group boundary
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn group_undo_lands_on_boundary(
        groups in prop::collection::vec(1u64..4, 1..15),
    ) {
        let model: Rc<dyn Trackable> = TrackedModel::from_json(json!({}));
        let target = EntityRef::new(&model);
        let mut stack = CommandStack::new(0);

        let mut n = 0;
        for (tag, size) in groups.iter().enumerate() {
            for _ in 0..*size {
                let mut rec = record(&target, n);
                rec.group = GroupTag(tag as u64 + 1);
                stack.push(rec);
                n += 1;
            }
        }

        while stack.can_undo() {
            let taken = stack.take_undo(Steps::Groups(1));
            prop_assert!(!taken.is_empty());
            let tag = taken[0].group;
            prop_assert!(taken.iter().all(|r| r.group == tag));
            let p = stack.pointer();
            if p > 0 {
                let below = stack.records().nth(p - 1).map(|r| r.group);
                prop_assert_ne!(below, Some(tag));
            }
        }
        prop_assert!(stack.is_available(Direction::Redo));
    }
}

// ============================================================================
// Invariant 6: Gestures interleaved with undo/redo match a shadow model
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn gestures_and_replay_match_shadow(
        ops in ops_strategy(60),
    ) {
        let history = UndoManager::new(HistoryConfig::unlimited());
        let model = TrackedModel::from_json(json!({"v": -1}));
        history.add(&model);
        let mut shadow = Shadow::new(-1);

        for op in &ops {
            match op {
                Op::Set(v) => set_v(&model, *v, ChangeOptions::new()),
                Op::AvoidStore(v) => set_v(&model, *v, ChangeOptions::avoid_store()),
                Op::Undo => { history.undo(true); }
                Op::Redo => { history.redo(true); }
            }
            shadow.apply(op);

            prop_assert_eq!(value_of(&model), json!(shadow.current), "value after {:?}", op);
            prop_assert_eq!(history.pointer(), shadow.pointer, "pointer after {:?}", op);
            prop_assert_eq!(history.stack().len(), shadow.records.len(), "len after {:?}", op);
        }

        // Unwinding lands on each recorded "before" in turn.
        while shadow.pointer > 0 {
            history.undo(true);
            shadow.apply(&Op::Undo);
            prop_assert_eq!(value_of(&model), json!(shadow.current));
        }
        prop_assert!(!history.has_undo());
    }
}
