//! Incremental filtering.
//!
//! Every source item carries its predicate result, its position in the
//! filtered sequence when it passes, and the filtered position of the first
//! passing item after it. The latter gives the output index of any item in
//! constant time; keeping it current costs a backward walk over the
//! non-passing items that precede a change.

use crate::binding::{source_item, SourceBinding};
use crate::computation::Computation;
use crate::gate::PropagationGate;
use crate::options::{OperatorOptions, SourceParam};
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::RefCell;
use rivulet_core::{CollectionChange, Error, PositionId, PositionRegistry, Result};
use rivulet_reactive::{
    callback, watch, ChangeCallback, CollectionCallback, Edit, IncrementalCollection,
    ObservableCollection, OutputBuffer, Selector, SharedCollection, SubscriptionId, WatchHandle,
};

const OPERATOR: &str = "Filtering";

struct FilterItem {
    watch: WatchHandle,
    passes: bool,
    /// Own entry in the filtered registry, while passing.
    filtered: Option<PositionId>,
    /// Filtered entry of the first passing item after this one.
    next_filtered: Option<PositionId>,
}

struct FilterState {
    items: PositionRegistry<FilterItem>,
    /// Passing items in source order; the payload is the source entry.
    filtered: PositionRegistry<PositionId>,
}

impl FilterState {
    fn new(capacity: usize) -> Self {
        Self {
            items: PositionRegistry::with_capacity(capacity),
            filtered: PositionRegistry::with_capacity(capacity),
        }
    }

    fn item(&self, index: usize) -> Result<&FilterItem> {
        self.items
            .at(index)
            .ok_or_else(|| Error::not_found(index, self.items.len()))
    }

    fn item_mut(&mut self, index: usize) -> Result<&mut FilterItem> {
        let len = self.items.len();
        self.items
            .at_mut(index)
            .ok_or_else(|| Error::not_found(index, len))
    }

    /// Filtered entry of the first passing item at or after `index`.
    fn next_from(&self, index: usize) -> Option<PositionId> {
        self.items
            .at(index)
            .and_then(|item| item.filtered.or(item.next_filtered))
    }

    /// Output index of an item whose next passing item is `next`.
    fn filtered_index(&self, next: Option<PositionId>) -> usize {
        next.and_then(|id| self.filtered.index_of(id))
            .unwrap_or(self.filtered.len())
    }

    /// Points the items before `index`, back to and including the previous
    /// passing one, at `target`.
    fn relink_before(&mut self, index: usize, target: Option<PositionId>) {
        for j in (0..index).rev() {
            if let Some(item) = self.items.at_mut(j) {
                item.next_filtered = target;
                if item.passes {
                    break;
                }
            }
        }
    }

    /// Makes the item at `index` visible and returns its output index.
    fn show(&mut self, index: usize) -> Result<usize> {
        let id = self
            .items
            .id_at(index)
            .ok_or_else(|| Error::not_found(index, self.items.len()))?;
        let at = self.filtered_index(self.item(index)?.next_filtered);
        let filtered = self.filtered.insert(at, id)?;
        let item = self.item_mut(index)?;
        item.passes = true;
        item.filtered = Some(filtered);
        self.relink_before(index, Some(filtered));
        Ok(at)
    }

    /// Hides the item at `index` and returns the output index it had.
    fn hide(&mut self, index: usize) -> Result<usize> {
        let item = self.item_mut(index)?;
        item.passes = false;
        let next = item.next_filtered;
        let filtered = item
            .filtered
            .take()
            .ok_or_else(|| Error::invalid_operation("hidden item has no filtered position"))?;
        let at = self
            .filtered
            .index_of(filtered)
            .ok_or_else(|| Error::not_found(index, self.filtered.len()))?;
        self.filtered.remove(at)?;
        self.relink_before(index, next);
        Ok(at)
    }

    fn link_all(&mut self) {
        let mut next = None;
        for j in (0..self.items.len()).rev() {
            if let Some(item) = self.items.at_mut(j) {
                item.next_filtered = next;
                if item.filtered.is_some() {
                    next = item.filtered;
                }
            }
        }
    }
}

/// Items of a source collection that satisfy a predicate, in source order.
///
/// The predicate may read reactive values; when one changes, the affected
/// items are re-evaluated and inserted into or removed from the output.
///
/// # Example
///
/// ```ignore
/// let source = SourceList::from_vec(vec![1, 2, 3, 4, 5]);
/// let threshold = Var::new(2);
/// let t = threshold.clone();
/// let filtered = Filtering::new(source, Selector::new(move |x: &i32, cx| *x > cx.read(&t)))?;
/// assert_eq!(filtered.to_vec(), vec![3, 4, 5]);
/// threshold.set(3)?;
/// assert_eq!(filtered.to_vec(), vec![4, 5]);
/// ```
pub struct Filtering<T> {
    binding: SourceBinding<T>,
    predicate: Selector<T, bool>,
    gate: PropagationGate,
    state: RefCell<FilterState>,
    output: OutputBuffer<T>,
    capacity: usize,
    this: Weak<Self>,
}

impl<T: Clone + 'static> Filtering<T> {
    /// Creates a filter over `source`.
    pub fn new(source: impl Into<SourceParam<T>>, predicate: Selector<T, bool>) -> Result<Rc<Self>> {
        Self::with_options(source, predicate, OperatorOptions::default())
    }

    /// Creates a filter with explicit options.
    pub fn with_options(
        source: impl Into<SourceParam<T>>,
        predicate: Selector<T, bool>,
        options: OperatorOptions,
    ) -> Result<Rc<Self>> {
        let this = Rc::new_cyclic(|weak| Self {
            binding: SourceBinding::new(source.into()),
            predicate,
            gate: PropagationGate::new(OPERATOR, options.diagnostics.clone()),
            state: RefCell::new(FilterState::new(options.capacity)),
            output: OutputBuffer::with_capacity(options.capacity),
            capacity: options.capacity,
            this: weak.clone(),
        });
        this.binding.watch_param(this.rebind_callback());
        this.attach(false)?;
        Ok(this)
    }

    /// Returns the predicate.
    pub fn predicate(&self) -> &Selector<T, bool> {
        &self.predicate
    }

    /// Returns the source collection.
    pub fn source(&self) -> Result<SharedCollection<T>> {
        self.binding.source()
    }

    fn source_callback(&self) -> CollectionCallback<T> {
        let weak = self.this.clone();
        callback(move |change: &CollectionChange<T>| match weak.upgrade() {
            Some(this) => this.on_source_change(change),
            None => Ok(()),
        })
    }

    fn rebind_callback(&self) -> ChangeCallback<()> {
        let weak = self.this.clone();
        callback(move |_: &()| match weak.upgrade() {
            Some(this) => this.attach(true),
            None => Ok(()),
        })
    }

    fn watcher(&self, id: PositionId) -> ChangeCallback<()> {
        let weak = self.this.clone();
        callback(move |_: &()| match weak.upgrade() {
            Some(this) => this.on_value_changed(id),
            None => Ok(()),
        })
    }

    fn evaluate(&self, item: &T, id: PositionId) -> (bool, WatchHandle) {
        self.gate
            .diagnostics()
            .evaluate(OPERATOR, || watch(&self.predicate, item, self.watcher(id)))
    }

    fn attach(&self, notify: bool) -> Result<()> {
        let source = self.binding.attach(self.source_callback());
        tracing::debug!(operator = OPERATOR, len = source.len(), "attached source");
        self.gate
            .initialize(source.change_marker(), || self.rebuild(&source, notify))?;
        self.gate.settle(|id| self.replay(id))
    }

    fn rebuild(&self, source: &SharedCollection<T>, notify: bool) -> Result<()> {
        let items = source.to_vec();
        let visible = {
            let mut state = self.state.borrow_mut();
            *state = FilterState::new(self.capacity.max(items.len()));
            let mut visible = Vec::new();
            for item in &items {
                let id = state.items.next_id();
                let (passes, watch) = self.evaluate(item, id);
                let filtered = if passes {
                    visible.push(item.clone());
                    Some(state.filtered.push(id))
                } else {
                    None
                };
                state.items.push(FilterItem {
                    watch,
                    passes,
                    filtered,
                    next_filtered: None,
                });
            }
            state.link_all();
            visible
        };
        if notify {
            self.output.reset_items(visible)
        } else {
            self.output.load(visible);
            Ok(())
        }
    }

    fn on_source_change(&self, change: &CollectionChange<T>) -> Result<()> {
        let source = self.binding.source()?;
        self.gate.structural(source.change_marker(), change, || match change {
            CollectionChange::Add { index, items } => self.insert(*index, &items[0]),
            CollectionChange::Remove { index, .. } => self.remove(*index),
            CollectionChange::Replace {
                index, new_items, ..
            } => self.reevaluate(*index, &new_items[0], true),
            CollectionChange::Move {
                old_index,
                new_index,
                ..
            } => self.move_item(*old_index, *new_index),
            CollectionChange::Reset => self.rebuild(&source, true),
        })?;
        self.gate.settle(|id| self.replay(id))
    }

    fn on_value_changed(&self, id: PositionId) -> Result<()> {
        if self.gate.should_defer(self.binding.marker()) {
            self.gate.defer(id);
            return Ok(());
        }
        self.gate.value_change(|| self.replay(id))?;
        self.gate.settle(|id| self.replay(id))
    }

    fn replay(&self, id: PositionId) -> Result<()> {
        let index = self.state.borrow().items.index_of(id);
        // the item was removed since the change was queued
        let Some(index) = index else { return Ok(()) };
        let item = source_item(&self.binding.source()?, index)?;
        tracing::trace!(operator = OPERATOR, index, "re-evaluating predicate");
        self.reevaluate(index, &item, false)
    }

    fn insert(&self, index: usize, item: &T) -> Result<()> {
        let at = {
            let mut state = self.state.borrow_mut();
            let id = state.items.next_id();
            let (passes, watch) = self.evaluate(item, id);
            let next_filtered = state.next_from(index);
            state.items.insert(
                index,
                FilterItem {
                    watch,
                    passes: false,
                    filtered: None,
                    next_filtered,
                },
            )?;
            if passes {
                Some(state.show(index)?)
            } else {
                None
            }
        };
        match at {
            Some(at) => self.output.insert_item(at, item.clone()),
            None => Ok(()),
        }
    }

    fn remove(&self, index: usize) -> Result<()> {
        let at = {
            let mut state = self.state.borrow_mut();
            let at = if state.item(index)?.passes {
                Some(state.hide(index)?)
            } else {
                None
            };
            state.items.remove(index)?;
            at
        };
        match at {
            Some(at) => self.output.remove_item(at).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Re-evaluates the item at `index`. A replaced item that still passes
    /// is set in place; a value change that keeps the result emits nothing.
    fn reevaluate(&self, index: usize, item: &T, replaced: bool) -> Result<()> {
        let edit = {
            let mut state = self.state.borrow_mut();
            let id = state
                .items
                .id_at(index)
                .ok_or_else(|| Error::not_found(index, state.items.len()))?;
            let (passes, watch) = self.evaluate(item, id);
            let entry = state.item_mut(index)?;
            entry.watch = watch;
            let (was, next) = (entry.passes, entry.next_filtered);
            match (was, passes) {
                (true, true) if replaced => {
                    let at = state.filtered_index(next);
                    // the item itself sits just before its successor
                    Some(Edit::Set {
                        index: at - 1,
                        item: item.clone(),
                    })
                }
                (true, false) => Some(Edit::Remove {
                    index: state.hide(index)?,
                }),
                (false, true) => Some(Edit::Insert {
                    index: state.show(index)?,
                    item: item.clone(),
                }),
                _ => None,
            }
        };
        match edit {
            Some(edit) => self.output.apply(edit),
            None => Ok(()),
        }
    }

    fn move_item(&self, old_index: usize, new_index: usize) -> Result<()> {
        if old_index == new_index {
            return Ok(());
        }
        let moved = {
            let mut state = self.state.borrow_mut();
            let item = state.item(old_index)?;
            let (passes, filtered, next_old) = (item.passes, item.filtered, item.next_filtered);

            if !passes {
                state.items.move_position(old_index, new_index)?;
                let next = state.next_from(new_index + 1);
                state.item_mut(new_index)?.next_filtered = next;
                None
            } else {
                let filtered = filtered
                    .ok_or_else(|| Error::invalid_operation("passing item has no filtered position"))?;
                let from = state
                    .filtered
                    .index_of(filtered)
                    .ok_or_else(|| Error::not_found(old_index, state.filtered.len()))?;
                state.relink_before(old_index, next_old);
                state.items.move_position(old_index, new_index)?;
                let next = state.next_from(new_index + 1);
                state.item_mut(new_index)?.next_filtered = next;
                // target index among the passing items other than this one
                let to = match next.and_then(|n| state.filtered.index_of(n)) {
                    Some(at) if at > from => at - 1,
                    Some(at) => at,
                    None => state.filtered.len() - 1,
                };
                state.filtered.move_position(from, to)?;
                state.relink_before(new_index, Some(filtered));
                (from != to).then_some((from, to))
            }
        };
        match moved {
            Some((from, to)) => self.output.move_item(from, to),
            None => Ok(()),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Computation for Filtering<T> {
    fn operator(&self) -> &'static str {
        OPERATOR
    }

    fn is_consistent(&self) -> bool {
        self.gate.is_consistent()
    }

    fn validate_consistency(&self) -> Result<()> {
        let violation = |tag| Error::consistency_violation(OPERATOR, tag);
        let source = self.binding.source()?.to_vec();
        let passes: Vec<bool> = self.gate.diagnostics().evaluate(OPERATOR, || {
            source.iter().map(|item| self.predicate.evaluate(item)).collect()
        });
        let expected: Vec<T> = source
            .iter()
            .zip(&passes)
            .filter(|(_, p)| **p)
            .map(|(item, _)| item.clone())
            .collect();

        let state = self.state.borrow();
        state.items.validate_consistency()?;
        state.filtered.validate_consistency()?;

        if state.items.len() != source.len() {
            return Err(violation(1));
        }
        if self.output.with_items(|items| items != expected.as_slice()) {
            return Err(violation(2));
        }
        if state.filtered.len() != expected.len() {
            return Err(violation(3));
        }

        let mut next = None;
        for j in (0..state.items.len()).rev() {
            let item = state.item(j)?;
            if item.passes != passes[j] {
                return Err(violation(4));
            }
            if item.filtered.is_some() != item.passes {
                return Err(violation(5));
            }
            if item.next_filtered != next {
                return Err(violation(6));
            }
            if item.filtered.is_some() {
                next = item.filtered;
            }
        }

        let mut previous = None;
        for (filtered, &source_id) in state.filtered.iter() {
            let index = state.items.index_of(source_id).ok_or(violation(7))?;
            if previous.is_some_and(|p| p >= index) {
                return Err(violation(8));
            }
            if state.item(index)?.filtered != Some(filtered) {
                return Err(violation(9));
            }
            previous = Some(index);
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

impl<T: Clone> ObservableCollection<T> for Filtering<T> {
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
