//! Sorted-output bookkeeping shared by `Ordering` and `ThenOrdering`.
//!
//! The output is split into blocks: the whole output for a primary
//! ordering, the parent's equal-key runs for a secondary one. Items are
//! sorted within their block only. Runs of equal keys tile the output and
//! never cross a block boundary.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cmp;
use core::ops::Range;
use rivulet_core::{
    find_insertion_index, Error, PositionId, PositionRegistry, RangePositionRegistry, Result,
    SortDirection, TieBreak,
};
use rivulet_reactive::WatchHandle;

/// Key comparer of an ordering operator.
pub type Comparer<K> = Rc<dyn Fn(&K, &K) -> cmp::Ordering>;

#[derive(Clone)]
pub(crate) struct SortRules<K> {
    pub(crate) comparer: Comparer<K>,
    pub(crate) direction: SortDirection,
    pub(crate) tie_break: TieBreak,
}

impl<K> SortRules<K> {
    fn equal(&self, a: &K, b: &K) -> bool {
        (self.comparer)(a, b) == cmp::Ordering::Equal
    }

    fn compare(&self, a: &K, b: &K) -> cmp::Ordering {
        self.direction.apply((self.comparer)(a, b))
    }
}

pub(crate) struct SortItem {
    pub(crate) watch: WatchHandle,
    /// Own entry in the ordered registry.
    pub(crate) ordered: PositionId,
}

pub(crate) struct SortState<K> {
    /// Items in source order.
    pub(crate) items: PositionRegistry<SortItem>,
    /// Items in output order; the payload is the source entry.
    ordered: PositionRegistry<PositionId>,
    /// Keys in output order.
    keys: Vec<K>,
    /// Arrival stamps in output order. Within a run they increase, since
    /// newcomers join a run at the end (or the start, on `Prepend`).
    stamps: Vec<i64>,
    /// Next stamp handed out on `Append`.
    newest: i64,
    /// Last stamp handed out on `Prepend`.
    oldest: i64,
    runs: RangePositionRegistry<()>,
    rules: SortRules<K>,
}

impl<K: Clone> SortState<K> {
    pub(crate) fn new(capacity: usize, rules: SortRules<K>) -> Self {
        Self {
            items: PositionRegistry::with_capacity(capacity),
            ordered: PositionRegistry::with_capacity(capacity),
            keys: Vec::with_capacity(capacity),
            stamps: Vec::with_capacity(capacity),
            newest: 0,
            oldest: 0,
            runs: RangePositionRegistry::new(),
            rules,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    /// Builds the sorted state in one pass. `evaluate` yields the key and
    /// watch of the source item at an index; `blocks` tile the source.
    /// Returns the source index shown at each output index.
    pub(crate) fn load(
        &mut self,
        len: usize,
        blocks: &[Range<usize>],
        mut evaluate: impl FnMut(usize, PositionId) -> (K, WatchHandle),
    ) -> Result<Vec<usize>> {
        let mut ids = Vec::with_capacity(len);
        let mut keys = Vec::with_capacity(len);
        for index in 0..len {
            let id = self.items.next_id();
            let (key, watch) = evaluate(index, id);
            // `ordered` is patched once the ordered entries exist
            ids.push(self.items.push(SortItem { watch, ordered: id }));
            keys.push(key);
        }

        let mut order: Vec<usize> = (0..ids.len()).collect();
        for block in blocks {
            let rules = &self.rules;
            order[block.clone()].sort_by(|&a, &b| rules.compare(&keys[a], &keys[b]));
        }

        for block in blocks {
            for k in block.clone() {
                let source = order[k];
                let ordered = self.ordered.push(ids[source]);
                if let Some(item) = self.items.at_mut(source) {
                    item.ordered = ordered;
                }
                let starts_run =
                    k == block.start || !self.rules.equal(&keys[order[k - 1]], &keys[source]);
                if starts_run {
                    self.runs.add(1, ());
                } else {
                    let last = self.runs.len() - 1;
                    self.runs.modify_length(last, 1)?;
                }
                self.keys.push(keys[source].clone());
                // the sort is stable, so equal keys keep source order
                self.stamps.push(source as i64);
            }
        }
        self.newest = len as i64;
        Ok(order)
    }

    /// Output index of the item at source `index`.
    pub(crate) fn output_index(&self, index: usize) -> Result<usize> {
        let item = self
            .items
            .at(index)
            .ok_or_else(|| Error::not_found(index, self.items.len()))?;
        self.ordered
            .index_of(item.ordered)
            .ok_or_else(|| Error::invalid_operation("sorted item has no output position"))
    }

    #[inline]
    pub(crate) fn direction(&self) -> SortDirection {
        self.rules.direction
    }

    /// Returns true if `key` sorts with the key cached at output `at`.
    pub(crate) fn same_key(&self, at: usize, key: &K) -> bool {
        self.keys.get(at).is_some_and(|cached| self.rules.equal(cached, key))
    }

    pub(crate) fn set_key(&mut self, at: usize, key: K) {
        if let Some(cached) = self.keys.get_mut(at) {
            *cached = key;
        }
    }

    /// Equal-key run containing output `index`.
    pub(crate) fn run_range(&self, index: usize) -> Option<Range<usize>> {
        let run = self.runs.find_by_plain_index(index)?;
        self.runs.range(run).ok()
    }

    /// Registers a new item at source `index`, sorted into `block` of the
    /// output as it is without the item. Returns its output index.
    pub(crate) fn insert(
        &mut self,
        index: usize,
        id: PositionId,
        watch: WatchHandle,
        key: K,
        block: Range<usize>,
    ) -> Result<usize> {
        let at = self.find(&key, block.clone());
        let ordered = self.place(at, block, id, key)?;
        let inserted = self.items.insert(index, SortItem { watch, ordered })?;
        if inserted != id {
            return Err(Error::invalid_operation("sorted item registered out of turn"));
        }
        Ok(at)
    }

    /// Unregisters the item at source `index`. Returns its output index.
    pub(crate) fn remove(&mut self, index: usize) -> Result<usize> {
        let at = self.output_index(index)?;
        self.items.remove(index)?;
        self.unplace(at)?;
        Ok(at)
    }

    /// Takes the item at source `index` out of the output and sorts it back
    /// in under `key`. `block` is evaluated on the output without the item.
    /// Returns the old and new output indices.
    pub(crate) fn relocate(
        &mut self,
        index: usize,
        key: K,
        block: impl FnOnce(usize) -> Range<usize>,
    ) -> Result<(usize, usize)> {
        let id = self
            .items
            .id_at(index)
            .ok_or_else(|| Error::not_found(index, self.items.len()))?;
        let from = self.output_index(index)?;
        self.unplace(from)?;
        let block = block(self.keys.len());
        let to = self.find(&key, block.clone());
        let ordered = self.place(to, block, id, key)?;
        if let Some(item) = self.items.get_mut(id) {
            item.ordered = ordered;
        }
        Ok((from, to))
    }

    /// Replaces the watch of the item at source `index`.
    pub(crate) fn rewatch(&mut self, index: usize, watch: WatchHandle) -> Result<()> {
        let len = self.items.len();
        let item = self
            .items
            .at_mut(index)
            .ok_or_else(|| Error::not_found(index, len))?;
        item.watch = watch;
        Ok(())
    }

    /// Cached key at output `at`.
    pub(crate) fn key_at(&self, at: usize) -> Result<K> {
        self.keys
            .get(at)
            .cloned()
            .ok_or_else(|| Error::not_found(at, self.keys.len()))
    }

    fn find(&self, key: &K, block: Range<usize>) -> usize {
        let comparer = &self.rules.comparer;
        find_insertion_index(
            &self.keys,
            key,
            block,
            self.rules.direction,
            self.rules.tie_break,
            |a, b| comparer(a, b),
        )
    }

    fn place(&mut self, at: usize, block: Range<usize>, id: PositionId, key: K) -> Result<PositionId> {
        if at > block.start && self.rules.equal(&self.keys[at - 1], &key) {
            let run = self.run_at(at - 1)?;
            self.runs.modify_length(run, 1)?;
        } else if at < block.end && self.rules.equal(&self.keys[at], &key) {
            let run = self.run_at(at)?;
            self.runs.modify_length(run, 1)?;
        } else {
            let run = match self.runs.find_by_plain_index(at) {
                Some(run) if self.runs.plain_index(run)? != at => {
                    return Err(Error::invalid_operation(
                        "comparer does not define a consistent order",
                    ))
                }
                Some(run) => run,
                None => self.runs.len(),
            };
            self.runs.insert(run, 1, ())?;
        }
        let ordered = self.ordered.insert(at, id)?;
        self.keys.insert(at, key);
        let stamp = match self.rules.tie_break {
            TieBreak::Append => {
                self.newest += 1;
                self.newest
            }
            TieBreak::Prepend => {
                self.oldest -= 1;
                self.oldest
            }
        };
        self.stamps.insert(at, stamp);
        Ok(ordered)
    }

    fn unplace(&mut self, at: usize) -> Result<()> {
        let run = self.run_at(at)?;
        if self.runs.length(run)? == 1 {
            self.runs.remove(run)?;
        } else {
            self.runs.modify_length(run, -1)?;
        }
        self.ordered.remove(at)?;
        self.keys.remove(at);
        self.stamps.remove(at);
        Ok(())
    }

    fn run_at(&self, at: usize) -> Result<usize> {
        self.runs
            .find_by_plain_index(at)
            .ok_or_else(|| Error::not_found(at, self.runs.total_length()))
    }

    /// Source index of the item shown at output `at`.
    pub(crate) fn source_index(&self, at: usize) -> Option<usize> {
        let id = self.ordered.at(at)?;
        self.items.index_of(*id)
    }

    /// Checks the bookkeeping against `expected` keys in source order.
    /// `block_of` gives the block containing an output index. Returns the
    /// first failing check.
    pub(crate) fn validate(
        &self,
        expected: &[K],
        block_of: impl Fn(usize) -> Option<Range<usize>>,
    ) -> Result<Option<u32>> {
        self.items.validate_consistency()?;
        self.ordered.validate_consistency()?;
        self.runs.validate_consistency()?;

        let len = self.items.len();
        if len != expected.len() {
            return Ok(Some(1));
        }
        if self.ordered.len() != len || self.keys.len() != len || self.stamps.len() != len {
            return Ok(Some(2));
        }

        let mut seen = alloc::vec![false; len];
        for (at, (ordered, id)) in self.ordered.iter().enumerate() {
            let Some(source) = self.items.index_of(*id) else {
                return Ok(Some(3));
            };
            let linked = self.items.get(*id).map(|item| item.ordered);
            if linked != Some(ordered) || core::mem::replace(&mut seen[source], true) {
                return Ok(Some(3));
            }
            if !self.rules.equal(&self.keys[at], &expected[source]) {
                return Ok(Some(4));
            }
            let Some(block) = block_of(at) else {
                return Ok(Some(5));
            };
            if !block.contains(&source) {
                return Ok(Some(5));
            }
            if at > block.start
                && self.rules.compare(&self.keys[at - 1], &self.keys[at]) == cmp::Ordering::Greater
            {
                return Ok(Some(6));
            }
        }

        if self.runs.total_length() != len {
            return Ok(Some(7));
        }
        let mut previous: Option<Range<usize>> = None;
        for (_, run) in self.runs.iter() {
            let range = run.range();
            let Some(block) = block_of(range.start) else {
                return Ok(Some(7));
            };
            if range.is_empty()
                || range.end > block.end
                || range.clone().any(|at| !self.rules.equal(&self.keys[range.start], &self.keys[at]))
            {
                return Ok(Some(7));
            }
            if let Some(previous) = previous {
                let same_block = previous.start >= block.start;
                if same_block && self.rules.equal(&self.keys[previous.start], &self.keys[range.start]) {
                    return Ok(Some(8));
                }
            }
            if self.stamps[range.clone()].windows(2).any(|pair| pair[0] >= pair[1]) {
                return Ok(Some(9));
            }
            previous = Some(range);
        }
        Ok(None)
    }
}

/// Tiles `0..len` with the ranges returned by `block_at`.
pub(crate) fn collect_blocks(
    len: usize,
    block_at: impl Fn(usize) -> Option<Range<usize>>,
) -> Result<Vec<Range<usize>>> {
    let mut blocks = Vec::new();
    let mut start = 0;
    while start < len {
        let block = block_at(start)
            .filter(|block| block.start == start && block.end > start && block.end <= len)
            .ok_or_else(|| Error::invalid_operation("ordered source reported a broken run"))?;
        start = block.end;
        blocks.push(block);
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn rules() -> SortRules<i32> {
        SortRules {
            comparer: Rc::new(|a: &i32, b: &i32| a.cmp(b)),
            direction: SortDirection::Ascending,
            tie_break: TieBreak::Append,
        }
    }

    fn loaded(keys: Vec<i32>) -> SortState<i32> {
        let mut state = SortState::new(keys.len(), rules());
        let len = keys.len();
        state
            .load(len, &[0..len], |index, _| (keys[index], WatchHandle::empty()))
            .unwrap();
        state
    }

    fn output(state: &SortState<i32>) -> Vec<i32> {
        state.keys.clone()
    }

    fn everything(state: &SortState<i32>) -> impl Fn(usize) -> Option<Range<usize>> {
        let len = state.len();
        move |_| Some(0..len)
    }

    #[test]
    fn test_load_builds_runs() {
        let state = loaded(vec![5, 3, 3, 1]);
        assert_eq!(output(&state), vec![1, 3, 3, 5]);
        assert_eq!(state.run_range(2), Some(1..3));
        assert_eq!(state.output_index(0).unwrap(), 3);
        assert_eq!(state.validate(&[5, 3, 3, 1], everything(&state)).unwrap(), None);
    }

    #[test]
    fn test_insert_appends_to_run() {
        let mut state = loaded(vec![5, 3, 3, 1]);
        let id = state.items.next_id();
        let at = state.insert(0, id, WatchHandle::empty(), 3, 0..4).unwrap();
        assert_eq!(at, 3);
        assert_eq!(state.run_range(3), Some(1..4));
        assert_eq!(state.source_index(3), Some(0));
        assert_eq!(state.validate(&[3, 5, 3, 3, 1], everything(&state)).unwrap(), None);
    }

    #[test]
    fn test_remove_drops_empty_run() {
        let mut state = loaded(vec![2, 1, 3]);
        assert_eq!(state.remove(0).unwrap(), 1);
        assert_eq!(output(&state), vec![1, 3]);
        assert_eq!(state.runs.len(), 2);
        assert_eq!(state.validate(&[1, 3], everything(&state)).unwrap(), None);
    }

    #[test]
    fn test_relocate_moves_between_runs() {
        let mut state = loaded(vec![1, 2, 2, 4]);
        let (from, to) = state.relocate(1, 3, |len| 0..len).unwrap();
        assert_eq!((from, to), (1, 2));
        assert_eq!(output(&state), vec![1, 2, 3, 4]);
        assert_eq!(state.validate(&[1, 3, 2, 4], everything(&state)).unwrap(), None);
    }

    #[test]
    fn test_runs_stop_at_block_boundaries() {
        let mut state = SortState::new(4, rules());
        state
            .load(4, &[0..2, 2..4], |_, _| (7, WatchHandle::empty()))
            .unwrap();
        assert_eq!(state.run_range(1), Some(0..2));
        assert_eq!(state.run_range(2), Some(2..4));
        let blocks = |at: usize| Some(if at < 2 { 0..2 } else { 2..4 });
        assert_eq!(state.validate(&[7, 7, 7, 7], blocks).unwrap(), None);
    }

    #[test]
    fn test_newcomers_join_runs_at_the_tie_break_end() {
        let mut state = loaded(vec![3, 1, 3]);
        let id = state.items.next_id();
        state.insert(3, id, WatchHandle::empty(), 3, 0..3).unwrap();
        assert_eq!(state.stamps, vec![1, 0, 2, 4]);
        assert_eq!(state.validate(&[3, 1, 3, 3], everything(&state)).unwrap(), None);

        let mut prepending = SortState::new(
            3,
            SortRules {
                tie_break: TieBreak::Prepend,
                ..rules()
            },
        );
        prepending
            .load(2, &[0..2], |index, _| ([3, 3][index], WatchHandle::empty()))
            .unwrap();
        let id = prepending.items.next_id();
        prepending.insert(2, id, WatchHandle::empty(), 3, 0..2).unwrap();
        assert_eq!(prepending.stamps, vec![-1, 0, 1]);
        assert_eq!(prepending.validate(&[3, 3, 3], everything(&prepending)).unwrap(), None);
    }

    #[test]
    fn test_item_out_of_arrival_order_is_reported() {
        let mut state = loaded(vec![2, 2, 2]);
        state.stamps.swap(0, 2);
        assert_eq!(state.validate(&[2, 2, 2], everything(&state)).unwrap(), Some(9));
    }

    #[test]
    fn test_stale_key_is_reported() {
        let state = loaded(vec![1, 2]);
        assert_eq!(state.validate(&[1, 5], everything(&state)).unwrap(), Some(4));
    }

    #[test]
    fn test_collect_blocks() {
        let blocks = collect_blocks(5, |at| Some(if at < 2 { 0..2 } else { 2..5 })).unwrap();
        assert_eq!(blocks, vec![0..2, 2..5]);
        assert!(collect_blocks(3, |_| Some(0..1)).is_err());
    }
}
