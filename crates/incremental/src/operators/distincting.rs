//! Incremental distinct.
//!
//! The distinct items of a source are the keys of its identity grouping.
//! The output follows the grouping's outer edits with every group replaced
//! by its key, so an item shows up where its first occurrence is.

use crate::binding::SourceBinding;
use crate::computation::Computation;
use crate::gate::PropagationGate;
use crate::operators::{Group, Grouping};
use crate::options::{OperatorOptions, SourceParam};
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::hash::Hash;
use hashbrown::HashSet;
use rivulet_core::{CollectionChange, Error, Result};
use rivulet_reactive::{
    callback, ChangeCallback, CollectionCallback, IncrementalCollection, ObservableCollection,
    OutputBuffer, Selector, SharedCollection, SubscriptionId,
};

const OPERATOR: &str = "Distincting";

/// Distinct items of a source collection, in first-occurrence order.
///
/// ```ignore
/// let source = SourceList::from_vec(vec![3, 1, 3, 2]);
/// let distinct = Distincting::new(source.clone())?;
/// assert_eq!(distinct.to_vec(), vec![3, 1, 2]);
/// source.remove(0)?;
/// assert_eq!(distinct.to_vec(), vec![1, 3, 2]);
/// ```
pub struct Distincting<T> {
    groups: Rc<Grouping<T, T>>,
    binding: SourceBinding<Rc<Group<T, T>>>,
    gate: PropagationGate,
    output: OutputBuffer<T>,
    this: Weak<Self>,
}

fn keys<T: Clone>(groups: &[Rc<Group<T, T>>]) -> Vec<T> {
    groups.iter().map(|group| group.key().clone()).collect()
}

impl<T> Distincting<T>
where
    T: Clone + Eq + Hash + 'static,
{
    /// Creates the distinct view of `source`.
    pub fn new(source: impl Into<SourceParam<T>>) -> Result<Rc<Self>> {
        Self::with_options(source, OperatorOptions::default())
    }

    /// Creates the distinct view with explicit options.
    pub fn with_options(source: impl Into<SourceParam<T>>, options: OperatorOptions) -> Result<Rc<Self>> {
        let groups = Grouping::with_options(
            source,
            Selector::plain(|item: &T| item.clone()),
            options.clone(),
        )?;
        let this = Rc::new_cyclic(|weak| Self {
            binding: SourceBinding::new(SourceParam::<Rc<Group<T, T>>>::from(groups.clone())),
            groups,
            gate: PropagationGate::new(OPERATOR, options.diagnostics.clone()),
            output: OutputBuffer::with_capacity(options.capacity),
            this: weak.clone(),
        });
        this.attach()?;
        Ok(this)
    }

    /// Returns the identity grouping the output is read from.
    pub fn grouping(&self) -> &Rc<Grouping<T, T>> {
        &self.groups
    }

    /// Returns the source collection.
    pub fn source(&self) -> Result<SharedCollection<T>> {
        self.groups.source()
    }

    fn groups_callback(&self) -> CollectionCallback<Rc<Group<T, T>>> {
        let weak = self.this.clone();
        callback(move |change: &CollectionChange<Rc<Group<T, T>>>| match weak.upgrade() {
            Some(this) => this.on_groups_change(change),
            None => Ok(()),
        })
    }

    fn attach(&self) -> Result<()> {
        let groups = self.binding.attach(self.groups_callback());
        tracing::debug!(operator = OPERATOR, len = groups.len(), "attached grouping");
        self.gate.initialize(groups.change_marker(), || {
            self.output.load(keys(&groups.to_vec()));
            Ok(())
        })?;
        self.gate.settle(|_| Ok(()))
    }

    fn on_groups_change(&self, change: &CollectionChange<Rc<Group<T, T>>>) -> Result<()> {
        let groups = self.binding.source()?;
        self.gate.structural(groups.change_marker(), change, || match change {
            CollectionChange::Add { index, items } => {
                self.output.insert_item(*index, items[0].key().clone())
            }
            CollectionChange::Remove { index, .. } => self.output.remove_item(*index).map(|_| ()),
            CollectionChange::Replace {
                index, new_items, ..
            } => self
                .output
                .set_item(*index, new_items[0].key().clone())
                .map(|_| ()),
            CollectionChange::Move {
                old_index,
                new_index,
                ..
            } => self.output.move_item(*old_index, *new_index),
            CollectionChange::Reset => self.output.reset_items(keys(&groups.to_vec())),
        })?;
        self.gate.settle(|_| Ok(()))
    }
}

impl<T> Computation for Distincting<T>
where
    T: Clone + Eq + Hash + 'static,
{
    fn operator(&self) -> &'static str {
        OPERATOR
    }

    fn is_consistent(&self) -> bool {
        self.gate.is_consistent() && self.groups.is_consistent()
    }

    fn validate_consistency(&self) -> Result<()> {
        self.groups.validate_consistency()?;

        let mut seen = HashSet::new();
        let expected: Vec<T> = self
            .groups
            .source()?
            .to_vec()
            .into_iter()
            .filter(|item| seen.insert(item.clone()))
            .collect();
        if self.output.with_items(|items| items != expected.as_slice()) {
            return Err(Error::consistency_violation(OPERATOR, 1));
        }
        if self.output.to_vec() != keys(&self.groups.to_vec()) {
            return Err(Error::consistency_violation(OPERATOR, 2));
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

impl<T: Clone> ObservableCollection<T> for Distincting<T> {
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
