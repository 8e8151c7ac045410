//! Position registry.
//!
//! A `PositionRegistry` keeps an ordered sequence of logical positions. Each
//! position has a stable identity (`PositionId`) and an integer index that is
//! renumbered whenever earlier entries are inserted, removed or moved.
//!
//! Entries live in a slot arena. A `PositionId` is a slot number plus a
//! generation, so an id that outlived its entry resolves to `None` instead of
//! aliasing a newer entry that reused the slot.

use crate::error::{Error, Result};
use alloc::vec::Vec;

const OPERATOR: &str = "Positions";

/// Stable handle to one entry of a `PositionRegistry`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PositionId {
    slot: u32,
    generation: u32,
}

impl PositionId {
    /// Returns the arena slot of this id.
    #[inline]
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Returns the generation of this id.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

struct Slot<P> {
    generation: u32,
    index: usize,
    payload: Option<P>,
}

/// Ordered registry of stable positions carrying a payload each.
pub struct PositionRegistry<P> {
    slots: Vec<Slot<P>>,
    free: Vec<u32>,
    order: Vec<PositionId>,
}

impl<P> Default for PositionRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> PositionRegistry<P> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            order: Vec::new(),
        }
    }

    /// Creates an empty registry with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            order: Vec::with_capacity(capacity),
        }
    }

    /// Returns the number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if the registry holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns the id the next `insert` or `push` will hand out.
    ///
    /// Lets a caller wire an entry's id into its own payload before the
    /// entry exists.
    pub fn next_id(&self) -> PositionId {
        match self.free.last() {
            Some(&slot) => PositionId {
                slot,
                generation: self.slots[slot as usize].generation,
            },
            None => PositionId {
                slot: self.slots.len() as u32,
                generation: 0,
            },
        }
    }

    /// Inserts a new entry at `index`, shifting later entries by one.
    ///
    /// Fails with `IndexOutOfRange` if `index > len`.
    pub fn insert(&mut self, index: usize, payload: P) -> Result<PositionId> {
        let len = self.order.len();
        if index > len {
            return Err(Error::index_out_of_range(index, len));
        }

        let id = self.allocate(index, payload);
        self.order.insert(index, id);
        self.renumber(index + 1, self.order.len());
        Ok(id)
    }

    /// Appends a new entry at the end.
    pub fn push(&mut self, payload: P) -> PositionId {
        let index = self.order.len();
        let id = self.allocate(index, payload);
        self.order.push(id);
        id
    }

    /// Removes the entry at `index` and returns its payload.
    ///
    /// Fails with `NotFound` if there is no entry at `index`.
    pub fn remove(&mut self, index: usize) -> Result<P> {
        let len = self.order.len();
        if index >= len {
            return Err(Error::not_found(index, len));
        }

        let id = self.order.remove(index);
        let slot = &mut self.slots[id.slot as usize];
        let payload = slot.payload.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.slot);
        self.renumber(index, self.order.len());

        payload.ok_or_else(|| Error::not_found(index, len))
    }

    /// Moves the entry at `from` to `to`, keeping its identity.
    ///
    /// Every entry in the closed interval between the two indices is
    /// renumbered. Moving an entry onto itself is a no-op.
    pub fn move_position(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.order.len();
        if from >= len {
            return Err(Error::not_found(from, len));
        }
        if to >= len {
            return Err(Error::not_found(to, len));
        }
        if from == to {
            return Ok(());
        }

        let id = self.order.remove(from);
        self.order.insert(to, id);
        self.renumber(from.min(to), from.max(to) + 1);
        Ok(())
    }

    /// Returns the current index of `id`, or `None` if the entry is gone.
    #[inline]
    pub fn index_of(&self, id: PositionId) -> Option<usize> {
        self.live_slot(id).map(|slot| slot.index)
    }

    /// Returns true if `id` still refers to a live entry.
    #[inline]
    pub fn contains(&self, id: PositionId) -> bool {
        self.live_slot(id).is_some()
    }

    /// Returns the id of the entry at `index`.
    #[inline]
    pub fn id_at(&self, index: usize) -> Option<PositionId> {
        self.order.get(index).copied()
    }

    /// Returns the payload of `id`.
    pub fn get(&self, id: PositionId) -> Option<&P> {
        self.live_slot(id).and_then(|slot| slot.payload.as_ref())
    }

    /// Returns the payload of `id` mutably.
    pub fn get_mut(&mut self, id: PositionId) -> Option<&mut P> {
        let slot = self.slots.get_mut(id.slot as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.payload.as_mut()
    }

    /// Returns the payload of the entry at `index`.
    pub fn at(&self, index: usize) -> Option<&P> {
        let id = self.id_at(index)?;
        self.get(id)
    }

    /// Returns the payload of the entry at `index` mutably.
    pub fn at_mut(&mut self, index: usize) -> Option<&mut P> {
        let id = self.id_at(index)?;
        self.get_mut(id)
    }

    /// Iterates entries in index order.
    pub fn iter(&self) -> impl Iterator<Item = (PositionId, &P)> + '_ {
        self.order.iter().filter_map(move |&id| {
            self.slots[id.slot as usize]
                .payload
                .as_ref()
                .map(|payload| (id, payload))
        })
    }

    /// Returns the ids in index order.
    #[inline]
    pub fn ids(&self) -> &[PositionId] {
        &self.order
    }

    /// Removes every entry. Outstanding ids become stale.
    pub fn clear(&mut self) {
        for id in self.order.drain(..) {
            let slot = &mut self.slots[id.slot as usize];
            slot.payload = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.slot);
        }
    }

    /// Removes every entry and returns the payloads in index order.
    pub fn drain(&mut self) -> Vec<P> {
        let mut payloads = Vec::with_capacity(self.order.len());
        for id in self.order.drain(..) {
            let slot = &mut self.slots[id.slot as usize];
            if let Some(payload) = slot.payload.take() {
                payloads.push(payload);
            }
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.slot);
        }
        payloads
    }

    /// Checks that every entry's stored index equals its place in the
    /// sequence and that the arena holds no orphaned payloads.
    pub fn validate_consistency(&self) -> Result<()> {
        for (index, &id) in self.order.iter().enumerate() {
            let slot = self
                .slots
                .get(id.slot as usize)
                .ok_or(Error::consistency_violation(OPERATOR, 1))?;
            if slot.generation != id.generation || slot.payload.is_none() {
                return Err(Error::consistency_violation(OPERATOR, 1));
            }
            if slot.index != index {
                return Err(Error::consistency_violation(OPERATOR, 2));
            }
        }

        let live = self.slots.iter().filter(|s| s.payload.is_some()).count();
        if live != self.order.len() {
            return Err(Error::consistency_violation(OPERATOR, 3));
        }
        if live + self.free.len() != self.slots.len() {
            return Err(Error::consistency_violation(OPERATOR, 4));
        }
        Ok(())
    }

    fn allocate(&mut self, index: usize, payload: P) -> PositionId {
        match self.free.pop() {
            Some(slot_no) => {
                let slot = &mut self.slots[slot_no as usize];
                slot.index = index;
                slot.payload = Some(payload);
                PositionId {
                    slot: slot_no,
                    generation: slot.generation,
                }
            }
            None => {
                let slot_no = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    index,
                    payload: Some(payload),
                });
                PositionId {
                    slot: slot_no,
                    generation: 0,
                }
            }
        }
    }

    fn live_slot(&self, id: PositionId) -> Option<&Slot<P>> {
        self.slots
            .get(id.slot as usize)
            .filter(|slot| slot.generation == id.generation && slot.payload.is_some())
    }

    fn renumber(&mut self, start: usize, end: usize) {
        for index in start..end {
            let id = self.order[index];
            self.slots[id.slot as usize].index = index;
        }
    }
}
