//! Incremental ordering.

use super::sorting::{Comparer, SortRules, SortState};
use crate::binding::{source_item, SourceBinding};
use crate::computation::{Computation, OrderedSource};
use crate::gate::PropagationGate;
use crate::options::{OperatorOptions, Param, ParamSlot, SourceParam};
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::RefCell;
use core::cmp;
use core::ops::Range;
use rivulet_core::{CollectionChange, Error, PositionId, Result, SortDirection, TieBreak};
use rivulet_reactive::{
    callback, watch, ChangeCallback, CollectionCallback, IncrementalCollection, Notifier,
    ObservableCollection, OutputBuffer, Selector, SharedCollection, SubscriptionId, WatchHandle,
};

const OPERATOR: &str = "Ordering";

/// Where a re-keyed item ended up.
pub(crate) enum Placement {
    /// The key still sorts in place.
    Kept(usize),
    /// The item was taken out and sorted back in.
    Relocated { from: usize, to: usize },
}

/// Items of a source collection sorted by a key.
///
/// New items land after existing items with an equal key, unless the
/// options ask for `TieBreak::Prepend`. Moving an item in the source never
/// changes the output.
///
/// # Example
///
/// ```ignore
/// let source = SourceList::from_vec(vec![5, 3, 3, 1]);
/// let sorted = Ordering::new(source.clone(), Selector::plain(|x: &i32| *x))?;
/// assert_eq!(sorted.to_vec(), vec![1, 3, 3, 5]);
/// ```
pub struct Ordering<T, K> {
    binding: SourceBinding<T>,
    key_selector: Selector<T, K>,
    comparer: Comparer<K>,
    direction: ParamSlot<SortDirection>,
    tie_break: TieBreak,
    gate: PropagationGate,
    state: RefCell<SortState<K>>,
    output: OutputBuffer<T>,
    regroup: Notifier<usize>,
    capacity: usize,
    this: Weak<Self>,
}

impl<T, K> Ordering<T, K>
where
    T: Clone + 'static,
    K: Clone + Ord + 'static,
{
    /// Sorts `source` ascending by `key_selector`.
    pub fn new(source: impl Into<SourceParam<T>>, key_selector: Selector<T, K>) -> Result<Rc<Self>> {
        Self::with_comparer(
            source,
            key_selector,
            K::cmp,
            SortDirection::Ascending,
            OperatorOptions::default(),
        )
    }

    /// Sorts `source` by `key_selector` in `direction`, which may follow a
    /// reactive value.
    pub fn with_direction(
        source: impl Into<SourceParam<T>>,
        key_selector: Selector<T, K>,
        direction: impl Into<Param<SortDirection>>,
    ) -> Result<Rc<Self>> {
        Self::with_comparer(
            source,
            key_selector,
            K::cmp,
            direction,
            OperatorOptions::default(),
        )
    }
}

impl<T, K> Ordering<T, K>
where
    T: Clone + 'static,
    K: Clone + 'static,
{
    /// Sorts `source` by `key_selector` under an arbitrary comparer. The
    /// comparer may be non-strict; keys it reports equal share a run.
    pub fn with_comparer(
        source: impl Into<SourceParam<T>>,
        key_selector: Selector<T, K>,
        comparer: impl Fn(&K, &K) -> cmp::Ordering + 'static,
        direction: impl Into<Param<SortDirection>>,
        options: OperatorOptions,
    ) -> Result<Rc<Self>> {
        let comparer: Comparer<K> = Rc::new(comparer);
        let direction = direction.into().into_slot();
        let rules = SortRules {
            comparer: comparer.clone(),
            direction: direction.get(),
            tie_break: options.tie_break,
        };
        let this = Rc::new_cyclic(|weak| Self {
            binding: SourceBinding::new(source.into()),
            key_selector,
            comparer,
            direction,
            tie_break: options.tie_break,
            gate: PropagationGate::new(OPERATOR, options.diagnostics.clone()),
            state: RefCell::new(SortState::new(options.capacity, rules)),
            output: OutputBuffer::with_capacity(options.capacity),
            regroup: Notifier::new(),
            capacity: options.capacity,
            this: weak.clone(),
        });
        this.binding.watch_param(this.rebind_callback());
        this.direction.watch(this.reinitialize_callback());
        this.attach(false)?;
        Ok(this)
    }

    /// Returns the current sort direction.
    pub fn direction(&self) -> SortDirection {
        self.direction.get()
    }

    /// Changes the sort direction and re-sorts, emitting a Reset. Fails with
    /// a configuration error if the direction follows a reactive value.
    pub fn set_direction(&self, direction: SortDirection) -> Result<()> {
        self.direction.set("direction", direction)
    }

    /// Returns the source collection.
    pub fn source(&self) -> Result<SharedCollection<T>> {
        self.binding.source()
    }

    #[cfg(test)]
    pub(crate) fn listener_counts(&self) -> (usize, usize) {
        (self.output.subscriber_count(), self.regroup.len())
    }

    fn rules(&self) -> SortRules<K> {
        SortRules {
            comparer: self.comparer.clone(),
            direction: self.direction.get(),
            tie_break: self.tie_break,
        }
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

    fn reinitialize_callback(&self) -> ChangeCallback<()> {
        let weak = self.this.clone();
        callback(move |_: &()| match weak.upgrade() {
            Some(this) => this.reinitialize(),
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

    fn evaluate(&self, item: &T, id: PositionId) -> (K, WatchHandle) {
        self.gate
            .diagnostics()
            .evaluate(OPERATOR, || watch(&self.key_selector, item, self.watcher(id)))
    }

    fn attach(&self, notify: bool) -> Result<()> {
        let source = self.binding.attach(self.source_callback());
        tracing::debug!(operator = OPERATOR, len = source.len(), "attached source");
        self.gate
            .initialize(source.change_marker(), || self.rebuild(&source, notify))?;
        self.settle()
    }

    fn reinitialize(&self) -> Result<()> {
        if self.gate.should_defer(self.binding.marker()) {
            self.gate.defer_refresh();
            return Ok(());
        }
        self.resort_all()?;
        self.settle()
    }

    fn resort_all(&self) -> Result<()> {
        let source = self.binding.source()?;
        tracing::debug!(operator = OPERATOR, direction = ?self.direction.get(), "re-sorting");
        self.gate
            .initialize(source.change_marker(), || self.rebuild(&source, true))
    }

    fn settle(&self) -> Result<()> {
        self.gate
            .settle_with(|id| self.replay(id), || self.resort_all())
    }

    fn rebuild(&self, source: &SharedCollection<T>, notify: bool) -> Result<()> {
        let values = source.to_vec();
        let len = values.len();
        let sorted = {
            let mut state = self.state.borrow_mut();
            *state = SortState::new(self.capacity.max(len), self.rules());
            let order = state.load(len, &[0..len], |index, id| self.evaluate(&values[index], id))?;
            order.into_iter().map(|index| values[index].clone()).collect()
        };
        if notify {
            self.output.reset_items(sorted)
        } else {
            self.output.load(sorted);
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
            } => self.rekey(*index, &new_items[0], true),
            CollectionChange::Move {
                old_index,
                new_index,
                ..
            } => self.state.borrow_mut().items.move_position(*old_index, *new_index),
            CollectionChange::Reset => self.rebuild(&source, true),
        })?;
        self.settle()
    }

    fn on_value_changed(&self, id: PositionId) -> Result<()> {
        if self.gate.should_defer(self.binding.marker()) {
            self.gate.defer(id);
            return Ok(());
        }
        self.gate.value_change(|| self.replay(id))?;
        self.settle()
    }

    fn replay(&self, id: PositionId) -> Result<()> {
        let index = self.state.borrow().items.index_of(id);
        let Some(index) = index else { return Ok(()) };
        let item = source_item(&self.binding.source()?, index)?;
        tracing::trace!(operator = OPERATOR, index, "re-evaluating key");
        self.rekey(index, &item, false)
    }

    fn insert(&self, index: usize, item: &T) -> Result<()> {
        let at = {
            let mut state = self.state.borrow_mut();
            let id = state.items.next_id();
            let (key, watch) = self.evaluate(item, id);
            let len = state.len();
            state.insert(index, id, watch, key, 0..len)?
        };
        self.output.insert_item(at, item.clone())
    }

    fn remove(&self, index: usize) -> Result<()> {
        let at = self.state.borrow_mut().remove(index)?;
        self.output.remove_item(at).map(|_| ())
    }

    /// Re-evaluates the key of the item at `index`. A replaced item keeping
    /// its key is set in place; otherwise it is re-sorted.
    fn rekey(&self, index: usize, item: &T, replaced: bool) -> Result<()> {
        let placement = {
            let mut state = self.state.borrow_mut();
            let id = state
                .items
                .id_at(index)
                .ok_or_else(|| Error::not_found(index, state.len()))?;
            let (key, watch) = self.evaluate(item, id);
            state.rewatch(index, watch)?;
            rekey_in(&mut state, index, key, |len| 0..len)?
        };
        self.place(placement, item, replaced)
    }

    fn place(&self, placement: Placement, item: &T, replaced: bool) -> Result<()> {
        match placement {
            Placement::Kept(at) if replaced => self.output.set_item(at, item.clone()).map(|_| ()),
            Placement::Kept(_) => Ok(()),
            Placement::Relocated { from, to } if replaced => {
                self.output.remove_item(from)?;
                self.output.insert_item(to, item.clone())
            }
            Placement::Relocated { from, to } if from != to => self.output.move_item(from, to),
            Placement::Relocated { to, .. } => self.regroup.notify(&to),
        }
    }
}

/// Stores a new key for the item at source `index`, re-sorting it if the
/// key no longer sorts in place.
pub(crate) fn rekey_in<K: Clone>(
    state: &mut SortState<K>,
    index: usize,
    key: K,
    block: impl FnOnce(usize) -> Range<usize>,
) -> Result<Placement> {
    let at = state.output_index(index)?;
    if state.same_key(at, &key) {
        state.set_key(at, key);
        return Ok(Placement::Kept(at));
    }
    let (from, to) = state.relocate(index, key, block)?;
    Ok(Placement::Relocated { from, to })
}

impl<T, K> Computation for Ordering<T, K>
where
    T: Clone + PartialEq + 'static,
    K: Clone + 'static,
{
    fn operator(&self) -> &'static str {
        OPERATOR
    }

    fn is_consistent(&self) -> bool {
        self.gate.is_consistent()
    }

    fn validate_consistency(&self) -> Result<()> {
        let violation = |tag| Error::consistency_violation(OPERATOR, tag);
        let source = self.binding.source()?.to_vec();
        let keys: Vec<K> = self.gate.diagnostics().evaluate(OPERATOR, || {
            source
                .iter()
                .map(|item| self.key_selector.evaluate(item))
                .collect()
        });

        let state = self.state.borrow();
        let len = source.len();
        if let Some(tag) = state.validate(&keys, |_| Some(0..len))? {
            return Err(violation(tag));
        }
        let output = self.output.to_vec();
        if output.len() != len {
            return Err(violation(10));
        }
        for (at, item) in output.iter().enumerate() {
            match state.source_index(at) {
                Some(index) if source[index] == *item => {}
                _ => return Err(violation(11)),
            }
        }
        if state.direction() != self.direction.get() {
            return Err(violation(12));
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

impl<T: Clone, K> ObservableCollection<T> for Ordering<T, K> {
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

impl<T: Clone, K: Clone> OrderedSource<T> for Ordering<T, K> {
    fn equal_key_range(&self, index: usize) -> Option<Range<usize>> {
        self.state.borrow().run_range(index)
    }

    fn subscribe_regroup(&self, callback: ChangeCallback<usize>) -> SubscriptionId {
        self.regroup.subscribe(callback)
    }

    fn unsubscribe_regroup(&self, id: SubscriptionId) -> bool {
        self.regroup.unsubscribe(id)
    }
}
