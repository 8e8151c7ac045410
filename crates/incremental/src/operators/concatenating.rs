//! Incremental concatenation of a collection of collections.
//!
//! Each inner collection is one run of a `RangePositionRegistry`; the run's
//! plain index is where its items start in the flattened output, so an
//! inner edit at `i` lands at `plain_index + i`.

use crate::binding::SourceBinding;
use crate::computation::Computation;
use crate::gate::PropagationGate;
use crate::options::{OperatorOptions, SourceParam};
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::RefCell;
use rivulet_core::{CollectionChange, Error, PositionId, RangePositionRegistry, Result};
use rivulet_reactive::{
    callback, ChangeCallback, CollectionCallback, Edit, IncrementalCollection, ObservableCollection,
    OutputBuffer, SharedCollection, SubscriptionId,
};

const OPERATOR: &str = "Concatenating";

struct Segment<T> {
    source: SharedCollection<T>,
    subscription: SubscriptionId,
}

impl<T> Segment<T> {
    fn release(self) {
        self.source.unsubscribe(self.subscription);
    }
}

/// Edits rewriting `old_len` items starting at `plain` into `items`: sets
/// over the common prefix, then trailing inserts or removes.
pub(super) fn rewrite<T>(plain: usize, old_len: usize, items: Vec<T>, edits: &mut Vec<Edit<T>>) {
    let new_len = items.len();
    for (offset, item) in items.into_iter().enumerate() {
        let index = plain + offset;
        if offset < old_len {
            edits.push(Edit::Set { index, item });
        } else {
            edits.push(Edit::Insert { index, item });
        }
    }
    for offset in (new_len..old_len).rev() {
        edits.push(Edit::Remove {
            index: plain + offset,
        });
    }
}

/// Edits moving the `len` items at `from` so that they start at `to` in
/// the final sequence.
fn move_block<T>(from: usize, to: usize, len: usize, edits: &mut Vec<Edit<T>>) {
    if to > from {
        for _ in 0..len {
            edits.push(Edit::Move {
                old_index: from,
                new_index: to + len - 1,
            });
        }
    } else if to < from {
        for offset in 0..len {
            edits.push(Edit::Move {
                old_index: from + offset,
                new_index: to + offset,
            });
        }
    }
}

/// The items of every inner collection of a source, flattened in order.
///
/// Edits of the source and of each inner collection are both followed.
/// Adding, removing or moving an inner collection fans out into one
/// single-item edit per item it holds.
pub struct Concatenating<T> {
    binding: SourceBinding<SharedCollection<T>>,
    gate: PropagationGate,
    segments: RefCell<RangePositionRegistry<Segment<T>>>,
    output: OutputBuffer<T>,
    this: Weak<Self>,
}

impl<T: Clone + 'static> Concatenating<T> {
    /// Concatenates the collections held by `sources`.
    pub fn new(sources: impl Into<SourceParam<SharedCollection<T>>>) -> Result<Rc<Self>> {
        Self::with_options(sources, OperatorOptions::default())
    }

    /// Concatenates with explicit options.
    pub fn with_options(
        sources: impl Into<SourceParam<SharedCollection<T>>>,
        options: OperatorOptions,
    ) -> Result<Rc<Self>> {
        let this = Rc::new_cyclic(|weak| Self {
            binding: SourceBinding::new(sources.into()),
            gate: PropagationGate::new(OPERATOR, options.diagnostics.clone()),
            segments: RefCell::new(RangePositionRegistry::new()),
            output: OutputBuffer::with_capacity(options.capacity),
            this: weak.clone(),
        });
        this.binding.watch_param(this.rebind_callback());
        this.attach(false)?;
        Ok(this)
    }

    /// Returns the number of inner collections.
    pub fn segment_count(&self) -> usize {
        self.segments.borrow().len()
    }

    fn source_callback(&self) -> CollectionCallback<SharedCollection<T>> {
        let weak = self.this.clone();
        callback(
            move |change: &CollectionChange<SharedCollection<T>>| match weak.upgrade() {
                Some(this) => this.on_outer_change(change),
                None => Ok(()),
            },
        )
    }

    fn rebind_callback(&self) -> ChangeCallback<()> {
        let weak = self.this.clone();
        callback(move |_: &()| match weak.upgrade() {
            Some(this) => this.attach(true),
            None => Ok(()),
        })
    }

    fn inner_callback(&self, segment: PositionId) -> CollectionCallback<T> {
        let weak = self.this.clone();
        callback(move |change: &CollectionChange<T>| match weak.upgrade() {
            Some(this) => this.on_inner_change(segment, change),
            None => Ok(()),
        })
    }

    fn follow(
        &self,
        segments: &RangePositionRegistry<Segment<T>>,
        source: &SharedCollection<T>,
    ) -> Segment<T> {
        let subscription = source.subscribe(self.inner_callback(segments.next_id()));
        Segment {
            source: source.clone(),
            subscription,
        }
    }

    fn attach(&self, notify: bool) -> Result<()> {
        let sources = self.binding.attach(self.source_callback());
        tracing::debug!(operator = OPERATOR, len = sources.len(), "attached source");
        self.gate
            .initialize(sources.change_marker(), || self.rebuild(&sources, notify))?;
        self.gate.settle(|_| Ok(()))
    }

    fn rebuild(&self, sources: &SharedCollection<SharedCollection<T>>, notify: bool) -> Result<()> {
        let items = {
            let mut segments = self.segments.borrow_mut();
            for segment in segments.drain() {
                segment.release();
            }
            let mut items = Vec::new();
            for source in sources.to_vec() {
                let segment = self.follow(&segments, &source);
                let inner = source.to_vec();
                segments.add(inner.len(), segment);
                items.extend(inner);
            }
            items
        };
        if notify {
            self.output.reset_items(items)
        } else {
            self.output.load(items);
            Ok(())
        }
    }

    fn on_outer_change(&self, change: &CollectionChange<SharedCollection<T>>) -> Result<()> {
        let sources = self.binding.source()?;
        self.gate.structural(sources.change_marker(), change, || match change {
            CollectionChange::Reset => self.rebuild(&sources, true),
            _ => {
                let edits = self.translate_outer(change)?;
                self.output.apply_all(edits)
            }
        })?;
        self.gate.settle(|_| Ok(()))
    }

    fn translate_outer(
        &self,
        change: &CollectionChange<SharedCollection<T>>,
    ) -> Result<Vec<Edit<T>>> {
        let mut edits = Vec::new();
        let mut segments = self.segments.borrow_mut();
        match change {
            CollectionChange::Add { index, items } => {
                let source = &items[0];
                let segment = self.follow(&segments, source);
                let inner = source.to_vec();
                segments.insert(*index, inner.len(), segment)?;
                let plain = segments.plain_index(*index)?;
                rewrite(plain, 0, inner, &mut edits);
            }
            CollectionChange::Remove { index, .. } => {
                let plain = segments.plain_index(*index)?;
                let (len, segment) = segments.remove(*index)?;
                segment.release();
                rewrite(plain, len, Vec::new(), &mut edits);
            }
            CollectionChange::Replace {
                index, new_items, ..
            } => {
                let source = &new_items[0];
                let plain = segments.plain_index(*index)?;
                let (old_len, old) = segments.remove(*index)?;
                old.release();
                let segment = self.follow(&segments, source);
                let inner = source.to_vec();
                segments.insert(*index, inner.len(), segment)?;
                rewrite(plain, old_len, inner, &mut edits);
            }
            CollectionChange::Move {
                old_index,
                new_index,
                ..
            } => {
                let from = segments.plain_index(*old_index)?;
                let len = segments.length(*old_index)?;
                segments.move_range(*old_index, *new_index)?;
                let to = segments.plain_index(*new_index)?;
                move_block(from, to, len, &mut edits);
            }
            CollectionChange::Reset => {}
        }
        Ok(edits)
    }

    fn on_inner_change(&self, segment: PositionId, change: &CollectionChange<T>) -> Result<()> {
        // inner collections carry no marker the outer gate could track
        self.gate
            .structural(None, change, || match self.translate_inner(segment, change)? {
                Some(edits) => self.output.apply_all(edits),
                None => Ok(()),
            })?;
        self.gate.settle(|_| Ok(()))
    }

    fn translate_inner(
        &self,
        segment: PositionId,
        change: &CollectionChange<T>,
    ) -> Result<Option<Vec<Edit<T>>>> {
        let mut segments = self.segments.borrow_mut();
        let Some(at) = segments.index_of(segment) else {
            return Ok(None);
        };
        let plain = segments.plain_index(at)?;
        let mut edits = Vec::new();
        match change {
            CollectionChange::Add { index, items } => {
                segments.modify_length(at, 1)?;
                edits.push(Edit::Insert {
                    index: plain + index,
                    item: items[0].clone(),
                });
            }
            CollectionChange::Remove { index, .. } => {
                segments.modify_length(at, -1)?;
                edits.push(Edit::Remove {
                    index: plain + index,
                });
            }
            CollectionChange::Replace {
                index, new_items, ..
            } => edits.push(Edit::Set {
                index: plain + index,
                item: new_items[0].clone(),
            }),
            CollectionChange::Move {
                old_index,
                new_index,
                ..
            } => edits.push(Edit::Move {
                old_index: plain + old_index,
                new_index: plain + new_index,
            }),
            CollectionChange::Reset => {
                let old_len = segments.length(at)?;
                let items = segments.entry(at)?.payload().source.to_vec();
                segments.set_length(at, items.len())?;
                rewrite(plain, old_len, items, &mut edits);
            }
        }
        Ok(Some(edits))
    }
}

impl<T> Drop for Concatenating<T> {
    fn drop(&mut self) {
        for segment in self.segments.get_mut().drain() {
            segment.release();
        }
    }
}

impl<T: Clone + PartialEq + 'static> Computation for Concatenating<T> {
    fn operator(&self) -> &'static str {
        OPERATOR
    }

    fn is_consistent(&self) -> bool {
        self.gate.is_consistent()
    }

    fn validate_consistency(&self) -> Result<()> {
        let violation = |tag| Error::consistency_violation(OPERATOR, tag);
        let sources = self.binding.source()?.to_vec();
        let segments = self.segments.borrow();
        segments.validate_consistency()?;

        if segments.len() != sources.len() {
            return Err(violation(1));
        }
        let mut expected = Vec::new();
        for ((_, entry), source) in segments.iter().zip(&sources) {
            if !core::ptr::addr_eq(Rc::as_ptr(&entry.payload().source), Rc::as_ptr(source)) {
                return Err(violation(2));
            }
            let inner = source.to_vec();
            if entry.length() != inner.len() {
                return Err(violation(3));
            }
            expected.extend(inner);
        }
        if segments.total_length() != expected.len() {
            return Err(violation(4));
        }
        if self.output.with_items(|items| items != expected.as_slice()) {
            return Err(violation(5));
        }
        Ok(())
    }

    fn subscribe_consistency_restored(&self, callback: ChangeCallback<()>) -> SubscriptionId {
        self.gate.subscribe_restored(callback)
    }

    fn unsubscribe_consistency_restored(&self, id: SubscriptionId) -> bool {
        self.gate.unsubscribe_restored(id)
    }
}

impl<T: Clone> ObservableCollection<T> for Concatenating<T> {
    fn len(&self) -> usize {
        self.output.len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.output.get(index)
    }

    fn to_vec(&self) -> Vec<T> {
        self.output.to_vec()
    }

    fn subscribe(&self, callback: CollectionCallback<T>) -> SubscriptionId {
        self.output.subscribe(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.output.unsubscribe(id)
    }

    fn change_marker(&self) -> Option<bool> {
        self.output.change_marker()
    }
}
