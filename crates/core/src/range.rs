//! Range-position registry.
//!
//! Each entry stands for a contiguous run of flattened elements. Besides its
//! index an entry carries a `length` and a `plain_index`, the sum of the
//! lengths of all entries before it.

use crate::error::{Error, Result};
use crate::position::{PositionId, PositionRegistry};
use core::ops::Range;

const OPERATOR: &str = "RangePositions";

/// Entry of a `RangePositionRegistry`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeEntry<P> {
    length: usize,
    plain_index: usize,
    payload: P,
}

impl<P> RangeEntry<P> {
    /// Number of flattened elements in this run.
    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Flattened start offset of this run.
    #[inline]
    pub fn plain_index(&self) -> usize {
        self.plain_index
    }

    /// Flattened range covered by this run.
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.plain_index..self.plain_index + self.length
    }

    /// Returns the payload.
    #[inline]
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Returns the payload mutably.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut P {
        &mut self.payload
    }
}

/// Ordered registry of variable-length runs.
pub struct RangePositionRegistry<P> {
    positions: PositionRegistry<RangeEntry<P>>,
    total: usize,
}

impl<P> Default for RangePositionRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> RangePositionRegistry<P> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            positions: PositionRegistry::new(),
            total: 0,
        }
    }

    /// Creates an empty registry with room for `capacity` runs.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            positions: PositionRegistry::with_capacity(capacity),
            total: 0,
        }
    }

    /// Returns the number of runs.
    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true if there are no runs.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Returns the total flattened element count.
    #[inline]
    pub fn total_length(&self) -> usize {
        self.total
    }

    /// Returns the id the next added or inserted run will receive.
    #[inline]
    pub fn next_id(&self) -> PositionId {
        self.positions.next_id()
    }

    /// Appends a run of `length` elements.
    pub fn add(&mut self, length: usize, payload: P) -> PositionId {
        let entry = RangeEntry {
            length,
            plain_index: self.total,
            payload,
        };
        self.total += length;
        self.positions.push(entry)
    }

    /// Inserts a run of `length` elements at run index `index`.
    pub fn insert(&mut self, index: usize, length: usize, payload: P) -> Result<PositionId> {
        let plain_index = match self.positions.at(index) {
            Some(entry) => entry.plain_index,
            None => self.total,
        };
        let id = self.positions.insert(
            index,
            RangeEntry {
                length,
                plain_index,
                payload,
            },
        )?;
        self.total += length;
        self.shift_from(index + 1, length as isize);
        Ok(id)
    }

    /// Removes the run at `index`, returning its length and payload.
    pub fn remove(&mut self, index: usize) -> Result<(usize, P)> {
        let entry = self.positions.remove(index)?;
        self.total -= entry.length;
        self.shift_from(index, -(entry.length as isize));
        Ok((entry.length, entry.payload))
    }

    /// Moves the run at `from` to `to` and recomputes the plain indices of
    /// the runs in between.
    pub fn move_range(&mut self, from: usize, to: usize) -> Result<()> {
        self.positions.move_position(from, to)?;
        let start = from.min(to);
        let end = from.max(to) + 1;
        let mut plain = match start.checked_sub(1).and_then(|i| self.positions.at(i)) {
            Some(prev) => prev.plain_index + prev.length,
            None => 0,
        };
        for index in start..end {
            if let Some(entry) = self.positions.at_mut(index) {
                entry.plain_index = plain;
                plain += entry.length;
            }
        }
        Ok(())
    }

    /// Adjusts the length of the run at `index` by `delta` and shifts the
    /// plain indices of every later run.
    pub fn modify_length(&mut self, index: usize, delta: isize) -> Result<()> {
        let len = self.positions.len();
        let entry = self
            .positions
            .at_mut(index)
            .ok_or(Error::not_found(index, len))?;
        let length = entry.length as isize + delta;
        if length < 0 {
            return Err(Error::invalid_operation("run length would become negative"));
        }
        entry.length = length as usize;
        self.total = (self.total as isize + delta) as usize;
        self.shift_from(index + 1, delta);
        Ok(())
    }

    /// Sets the length of the run at `index`.
    pub fn set_length(&mut self, index: usize, length: usize) -> Result<()> {
        let current = self.length(index)?;
        self.modify_length(index, length as isize - current as isize)
    }

    /// Returns the length of the run at `index`.
    pub fn length(&self, index: usize) -> Result<usize> {
        self.entry(index).map(RangeEntry::length)
    }

    /// Returns the plain index of the run at `index`.
    pub fn plain_index(&self, index: usize) -> Result<usize> {
        self.entry(index).map(RangeEntry::plain_index)
    }

    /// Returns the flattened range of the run at `index`.
    pub fn range(&self, index: usize) -> Result<Range<usize>> {
        self.entry(index).map(RangeEntry::range)
    }

    /// Returns the run at `index`.
    pub fn entry(&self, index: usize) -> Result<&RangeEntry<P>> {
        self.positions
            .at(index)
            .ok_or(Error::not_found(index, self.positions.len()))
    }

    /// Returns the run at `index` mutably.
    pub fn entry_mut(&mut self, index: usize) -> Result<&mut RangeEntry<P>> {
        let len = self.positions.len();
        self.positions.at_mut(index).ok_or(Error::not_found(index, len))
    }

    /// Returns the current run index of `id`.
    #[inline]
    pub fn index_of(&self, id: PositionId) -> Option<usize> {
        self.positions.index_of(id)
    }

    /// Returns the run with the given id.
    #[inline]
    pub fn get(&self, id: PositionId) -> Option<&RangeEntry<P>> {
        self.positions.get(id)
    }

    /// Returns the run with the given id mutably.
    #[inline]
    pub fn get_mut(&mut self, id: PositionId) -> Option<&mut RangeEntry<P>> {
        self.positions.get_mut(id)
    }

    /// Finds the run containing flattened index `plain`.
    ///
    /// Runs of length zero never contain an element.
    pub fn find_by_plain_index(&self, plain: usize) -> Option<usize> {
        let ids = self.positions.ids();
        let mut low = 0;
        let mut high = ids.len();
        while low < high {
            let mid = low + (high - low) / 2;
            let entry = self.positions.get(ids[mid])?;
            if entry.plain_index + entry.length <= plain {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        let entry = self.positions.at(low)?;
        (entry.plain_index <= plain && plain < entry.plain_index + entry.length).then_some(low)
    }

    /// Iterates runs in order.
    pub fn iter(&self) -> impl Iterator<Item = (PositionId, &RangeEntry<P>)> + '_ {
        self.positions.iter()
    }

    /// Removes every run.
    pub fn clear(&mut self) {
        self.positions.clear();
        self.total = 0;
    }

    /// Removes every run and returns the payloads in order.
    pub fn drain(&mut self) -> alloc::vec::Vec<P> {
        self.total = 0;
        self.positions
            .drain()
            .into_iter()
            .map(|entry| entry.payload)
            .collect()
    }

    /// Checks index bookkeeping and the plain-index sum invariant.
    pub fn validate_consistency(&self) -> Result<()> {
        self.positions.validate_consistency()?;

        let mut plain = 0;
        for (_, entry) in self.positions.iter() {
            if entry.plain_index != plain {
                return Err(Error::consistency_violation(OPERATOR, 1));
            }
            plain += entry.length;
        }
        if plain != self.total {
            return Err(Error::consistency_violation(OPERATOR, 2));
        }
        Ok(())
    }

    fn shift_from(&mut self, start: usize, delta: isize) {
        if delta == 0 {
            return;
        }
        for index in start..self.positions.len() {
            if let Some(entry) = self.positions.at_mut(index) {
                entry.plain_index = (entry.plain_index as isize + delta) as usize;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    fn layout(registry: &RangePositionRegistry<char>) -> Vec<(char, usize, usize)> {
        registry
            .iter()
            .map(|(_, e)| (*e.payload(), e.plain_index(), e.length()))
            .collect()
    }

    #[test]
    fn test_add_accumulates_plain_index() {
        let mut registry = RangePositionRegistry::new();
        registry.add(2, 'a');
        registry.add(0, 'b');
        registry.add(3, 'c');

        assert_eq!(layout(&registry), vec![('a', 0, 2), ('b', 2, 0), ('c', 2, 3)]);
        assert_eq!(registry.total_length(), 5);
        registry.validate_consistency().unwrap();
    }

    #[test]
    fn test_insert_shifts_later_runs() {
        let mut registry = RangePositionRegistry::new();
        registry.add(2, 'a');
        registry.add(1, 'c');
        registry.insert(1, 4, 'b').unwrap();

        assert_eq!(layout(&registry), vec![('a', 0, 2), ('b', 2, 4), ('c', 6, 1)]);
        registry.insert(3, 1, 'd').unwrap();
        assert_eq!(registry.plain_index(3), Ok(7));
        registry.validate_consistency().unwrap();
    }

    #[test]
    fn test_remove_shifts_back() {
        let mut registry = RangePositionRegistry::new();
        registry.add(2, 'a');
        registry.add(3, 'b');
        registry.add(1, 'c');

        assert_eq!(registry.remove(1), Ok((3, 'b')));
        assert_eq!(layout(&registry), vec![('a', 0, 2), ('c', 2, 1)]);
        assert_eq!(registry.total_length(), 3);
    }

    #[test]
    fn test_modify_length() {
        let mut registry = RangePositionRegistry::new();
        registry.add(2, 'a');
        registry.add(1, 'b');

        registry.modify_length(0, 1).unwrap();
        assert_eq!(layout(&registry), vec![('a', 0, 3), ('b', 3, 1)]);

        registry.modify_length(0, -3).unwrap();
        assert_eq!(layout(&registry), vec![('a', 0, 0), ('b', 0, 1)]);

        assert!(registry.modify_length(0, -1).is_err());
        assert!(registry.modify_length(5, 1).is_err());
        registry.validate_consistency().unwrap();
    }

    #[test]
    fn test_move_range_recomputes_plain_indices() {
        let mut registry = RangePositionRegistry::new();
        registry.add(1, 'a');
        registry.add(2, 'b');
        registry.add(3, 'c');

        registry.move_range(0, 2).unwrap();
        assert_eq!(layout(&registry), vec![('b', 0, 2), ('c', 2, 3), ('a', 5, 1)]);

        registry.move_range(2, 1).unwrap();
        assert_eq!(layout(&registry), vec![('b', 0, 2), ('a', 2, 1), ('c', 3, 3)]);
        registry.validate_consistency().unwrap();
    }

    #[test]
    fn test_find_by_plain_index_skips_empty_runs() {
        let mut registry = RangePositionRegistry::new();
        registry.add(2, 'a');
        registry.add(0, 'b');
        registry.add(3, 'c');

        assert_eq!(registry.find_by_plain_index(0), Some(0));
        assert_eq!(registry.find_by_plain_index(1), Some(0));
        assert_eq!(registry.find_by_plain_index(2), Some(2));
        assert_eq!(registry.find_by_plain_index(4), Some(2));
        assert_eq!(registry.find_by_plain_index(5), None);
    }

    #[test]
    fn test_set_length_and_range() {
        let mut registry = RangePositionRegistry::new();
        registry.add(2, 'a');
        registry.add(2, 'b');
        registry.set_length(0, 5).unwrap();
        assert_eq!(registry.range(1), Ok(5..7));
        assert_eq!(registry.total_length(), 7);
    }
}
