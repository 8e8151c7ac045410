//! Secondary ordering within the equal-key runs of an ordered source.

use super::ordering::{rekey_in, Placement};
use super::sorting::{collect_blocks, Comparer, SortRules, SortState};
use crate::binding::{source_item, SourceBinding};
use crate::computation::{Computation, OrderedSource};
use crate::gate::PropagationGate;
use crate::options::{OperatorOptions, Param, ParamSlot, SourceParam};
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::cmp;
use core::ops::Range;
use rivulet_core::{CollectionChange, Error, PositionId, Result, SortDirection, TieBreak};
use rivulet_reactive::{
    callback, watch, ChangeCallback, CollectionCallback, IncrementalCollection, Notifier,
    ObservableCollection, OutputBuffer, Selector, SubscriptionId, WatchHandle,
};

const OPERATOR: &str = "ThenOrdering";

/// Items of an ordered source, re-sorted by a further key within each run
/// of items the source considers equal.
///
/// A `ThenOrdering` is itself an ordered source, so secondary orderings
/// chain.
pub struct ThenOrdering<T, K> {
    parent: Rc<dyn OrderedSource<T>>,
    binding: SourceBinding<T>,
    key_selector: Selector<T, K>,
    comparer: Comparer<K>,
    direction: ParamSlot<SortDirection>,
    tie_break: TieBreak,
    gate: PropagationGate,
    state: RefCell<SortState<K>>,
    output: OutputBuffer<T>,
    regroup: Notifier<usize>,
    parent_regroup: Cell<Option<SubscriptionId>>,
    capacity: usize,
    this: Weak<Self>,
}

impl<T, K> ThenOrdering<T, K>
where
    T: Clone + 'static,
    K: Clone + Ord + 'static,
{
    /// Sorts each equal-key run of `parent` ascending by `key_selector`.
    pub fn new<S>(parent: Rc<S>, key_selector: Selector<T, K>) -> Result<Rc<Self>>
    where
        S: OrderedSource<T> + 'static,
    {
        Self::with_comparer(
            parent,
            key_selector,
            K::cmp,
            SortDirection::Ascending,
            OperatorOptions::default(),
        )
    }
}

impl<T, K> ThenOrdering<T, K>
where
    T: Clone + 'static,
    K: Clone + 'static,
{
    /// Sorts each equal-key run of `parent` by `key_selector` under an
    /// arbitrary comparer.
    pub fn with_comparer<S>(
        parent: Rc<S>,
        key_selector: Selector<T, K>,
        comparer: impl Fn(&K, &K) -> cmp::Ordering + 'static,
        direction: impl Into<Param<SortDirection>>,
        options: OperatorOptions,
    ) -> Result<Rc<Self>>
    where
        S: OrderedSource<T> + 'static,
    {
        let comparer: Comparer<K> = Rc::new(comparer);
        let direction = direction.into().into_slot();
        let rules = SortRules {
            comparer: comparer.clone(),
            direction: direction.get(),
            tie_break: options.tie_break,
        };
        let source = SourceParam::from(parent.clone());
        let this = Rc::new_cyclic(|weak| Self {
            parent,
            binding: SourceBinding::new(source),
            key_selector,
            comparer,
            direction,
            tie_break: options.tie_break,
            gate: PropagationGate::new(OPERATOR, options.diagnostics.clone()),
            state: RefCell::new(SortState::new(options.capacity, rules)),
            output: OutputBuffer::with_capacity(options.capacity),
            regroup: Notifier::new(),
            parent_regroup: Cell::new(None),
            capacity: options.capacity,
            this: weak.clone(),
        });
        this.parent_regroup
            .set(Some(this.parent.subscribe_regroup(this.regroup_callback())));
        this.direction.watch(this.reinitialize_callback());
        this.attach()?;
        Ok(this)
    }

    /// Returns the current sort direction.
    pub fn direction(&self) -> SortDirection {
        self.direction.get()
    }

    /// Changes the sort direction and re-sorts, emitting a Reset.
    pub fn set_direction(&self, direction: SortDirection) -> Result<()> {
        self.direction.set("direction", direction)
    }

    /// Returns the ordered source.
    pub fn parent(&self) -> &Rc<dyn OrderedSource<T>> {
        &self.parent
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

    fn regroup_callback(&self) -> ChangeCallback<usize> {
        let weak = self.this.clone();
        callback(move |index: &usize| match weak.upgrade() {
            Some(this) => this.on_parent_regroup(*index),
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

    /// Parent run containing `index`, shrunk by the one item the output
    /// does not hold yet.
    fn block_without(&self, index: usize) -> Result<Range<usize>> {
        let run = self
            .parent
            .equal_key_range(index)
            .ok_or_else(|| Error::not_found(index, self.parent.len()))?;
        Ok(run.start..run.end - 1)
    }

    fn attach(&self) -> Result<()> {
        let source = self.binding.attach(self.source_callback());
        self.gate
            .initialize(source.change_marker(), || self.rebuild(false))?;
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
        tracing::debug!(operator = OPERATOR, direction = ?self.direction.get(), "re-sorting");
        self.gate
            .initialize(self.binding.marker(), || self.rebuild(true))
    }

    fn settle(&self) -> Result<()> {
        self.gate
            .settle_with(|id| self.replay(id), || self.resort_all())
    }

    fn rebuild(&self, notify: bool) -> Result<()> {
        let values = self.parent.to_vec();
        let len = values.len();
        let blocks = collect_blocks(len, |at| self.parent.equal_key_range(at))?;
        let sorted = {
            let mut state = self.state.borrow_mut();
            *state = SortState::new(self.capacity.max(len), self.rules());
            let order = state.load(len, &blocks, |index, id| self.evaluate(&values[index], id))?;
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
        self.gate.structural(self.binding.marker(), change, || match change {
            CollectionChange::Add { index, items } => self.insert(*index, &items[0]),
            CollectionChange::Remove { index, .. } => self.remove(*index),
            CollectionChange::Replace {
                index, new_items, ..
            } => self.rekey(*index, &new_items[0], true),
            CollectionChange::Move {
                old_index,
                new_index,
                ..
            } => {
                self.state
                    .borrow_mut()
                    .items
                    .move_position(*old_index, *new_index)?;
                self.resort(*new_index)
            }
            CollectionChange::Reset => self.rebuild(true),
        })?;
        self.settle()
    }

    fn on_parent_regroup(&self, index: usize) -> Result<()> {
        tracing::trace!(operator = OPERATOR, index, "parent run changed");
        self.gate.value_change(|| self.resort(index))?;
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
        self.rekey(index, &item, false)
    }

    fn insert(&self, index: usize, item: &T) -> Result<()> {
        let block = self.block_without(index)?;
        let at = {
            let mut state = self.state.borrow_mut();
            let id = state.items.next_id();
            let (key, watch) = self.evaluate(item, id);
            state.insert(index, id, watch, key, block)?
        };
        self.output.insert_item(at, item.clone())
    }

    fn remove(&self, index: usize) -> Result<()> {
        let at = self.state.borrow_mut().remove(index)?;
        self.output.remove_item(at).map(|_| ())
    }

    /// Sorts the item at parent `index` back into the parent run it now
    /// belongs to, keeping its key.
    fn resort(&self, index: usize) -> Result<()> {
        let block = self.block_without(index)?;
        let (from, to) = {
            let mut state = self.state.borrow_mut();
            let key = state.key_at(state.output_index(index)?)?;
            state.relocate(index, key, |_| block)?
        };
        if from != to {
            self.output.move_item(from, to)
        } else {
            self.regroup.notify(&to)
        }
    }

    fn rekey(&self, index: usize, item: &T, replaced: bool) -> Result<()> {
        let block = self.block_without(index)?;
        let placement = {
            let mut state = self.state.borrow_mut();
            let id = state
                .items
                .id_at(index)
                .ok_or_else(|| Error::not_found(index, state.len()))?;
            let (key, watch) = self.evaluate(item, id);
            state.rewatch(index, watch)?;
            rekey_in(&mut state, index, key, |_| block)?
        };
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

impl<T, K> Drop for ThenOrdering<T, K> {
    fn drop(&mut self) {
        if let Some(id) = self.parent_regroup.take() {
            self.parent.unsubscribe_regroup(id);
        }
    }
}

impl<T, K> Computation for ThenOrdering<T, K>
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
        let source = self.parent.to_vec();
        let keys: Vec<K> = self.gate.diagnostics().evaluate(OPERATOR, || {
            source
                .iter()
                .map(|item| self.key_selector.evaluate(item))
                .collect()
        });

        let state = self.state.borrow();
        if let Some(tag) = state.validate(&keys, |at| self.parent.equal_key_range(at))? {
            return Err(violation(tag));
        }
        let output = self.output.to_vec();
        if output.len() != source.len() {
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

impl<T: Clone, K> ObservableCollection<T> for ThenOrdering<T, K> {
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

impl<T: Clone, K: Clone> OrderedSource<T> for ThenOrdering<T, K> {
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
