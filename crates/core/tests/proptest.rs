//! Property-based tests for rivulet-core using proptest.

use proptest::prelude::*;
use rivulet_core::{
    find_insertion_index, PositionRegistry, RangePositionRegistry, SortDirection, TieBreak,
};

#[derive(Clone, Debug)]
enum Op {
    Insert(usize),
    Remove(usize),
    Move(usize, usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..64).prop_map(Op::Insert),
        (0usize..64).prop_map(Op::Remove),
        (0usize..64, 0usize..64).prop_map(|(a, b)| Op::Move(a, b)),
    ]
}

proptest! {
    /// Indices stay gap-free and every id follows its payload through any
    /// sequence of inserts, removes and moves.
    #[test]
    fn registry_indices_track_model(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let mut registry = PositionRegistry::new();
        let mut model: Vec<u32> = Vec::new();
        let mut ids = Vec::new();
        let mut next = 0u32;

        for op in ops {
            match op {
                Op::Insert(at) => {
                    let at = at % (model.len() + 1);
                    let id = registry.insert(at, next).unwrap();
                    model.insert(at, next);
                    ids.push((next, id));
                    next += 1;
                }
                Op::Remove(at) if !model.is_empty() => {
                    let at = at % model.len();
                    let removed = registry.remove(at).unwrap();
                    prop_assert_eq!(removed, model.remove(at));
                }
                Op::Move(from, to) if !model.is_empty() => {
                    let from = from % model.len();
                    let to = to % model.len();
                    registry.move_position(from, to).unwrap();
                    let value = model.remove(from);
                    model.insert(to, value);
                }
                _ => {}
            }
            prop_assert!(registry.validate_consistency().is_ok());
        }

        let actual: Vec<u32> = registry.iter().map(|(_, &v)| v).collect();
        prop_assert_eq!(&actual, &model);

        for (value, id) in ids {
            let expected = model.iter().position(|&v| v == value);
            prop_assert_eq!(registry.index_of(id), expected);
        }
    }

    /// plain_index(k) is always the sum of the lengths before k.
    #[test]
    fn range_registry_sum_invariant(
        lengths in prop::collection::vec(0usize..6, 1..40),
        deltas in prop::collection::vec((0usize..40, -3isize..4), 0..60),
        moves in prop::collection::vec((0usize..40, 0usize..40), 0..20),
    ) {
        let mut registry = RangePositionRegistry::new();
        for (i, &length) in lengths.iter().enumerate() {
            if i % 2 == 0 {
                registry.add(length, i);
            } else {
                registry.insert(0, length, i).unwrap();
            }
        }

        for (at, delta) in deltas {
            let at = at % registry.len();
            let current = registry.length(at).unwrap() as isize;
            let result = registry.modify_length(at, delta);
            prop_assert_eq!(result.is_ok(), current + delta >= 0);
        }
        for (from, to) in moves {
            let len = registry.len();
            registry.move_range(from % len, to % len).unwrap();
        }

        prop_assert!(registry.validate_consistency().is_ok());
        let mut sum = 0;
        for index in 0..registry.len() {
            prop_assert_eq!(registry.plain_index(index).unwrap(), sum);
            sum += registry.length(index).unwrap();
        }
        prop_assert_eq!(sum, registry.total_length());
    }

    /// Appending each key at its search result builds the same sequence as
    /// a stable sort by key of the insertion order.
    #[test]
    fn search_agrees_with_stable_sort(keys in prop::collection::vec(0i32..8, 0..80), descending in any::<bool>()) {
        let direction = if descending { SortDirection::Descending } else { SortDirection::Ascending };
        let mut sorted: Vec<(i32, usize)> = Vec::new();
        for (order, &key) in keys.iter().enumerate() {
            let just_keys: Vec<i32> = sorted.iter().map(|(k, _)| *k).collect();
            let at = find_insertion_index(&just_keys, &key, 0..just_keys.len(), direction, TieBreak::Append, |a, b| a.cmp(b));
            sorted.insert(at, (key, order));
        }

        let mut expected: Vec<(i32, usize)> = keys.iter().copied().enumerate().map(|(o, k)| (k, o)).collect();
        expected.sort_by(|a, b| direction.apply(a.0.cmp(&b.0)));
        prop_assert_eq!(sorted, expected);
    }

    /// Prepend places a new key before every equal key.
    #[test]
    fn search_prepend_matches_lower_bound(mut keys in prop::collection::vec(0i32..10, 0..60), key in 0i32..10) {
        keys.sort();
        let at = find_insertion_index(&keys, &key, 0..keys.len(), SortDirection::Ascending, TieBreak::Prepend, |a, b| a.cmp(b));
        prop_assert_eq!(at, keys.partition_point(|&k| k < key));
    }
}
