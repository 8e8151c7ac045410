//! Incremental aggregates.
//!
//! An aggregate folds the source into one value and keeps it current from
//! the old and new items each change carries, without re-reading the
//! source. The value is published through a `Var`.

use crate::binding::SourceBinding;
use crate::computation::Computation;
use crate::gate::PropagationGate;
use crate::options::{OperatorOptions, SourceParam};
use alloc::rc::{Rc, Weak};
use core::cell::RefCell;
use core::marker::PhantomData;
use core::ops::{Add, Sub};
use rivulet_core::{CollectionChange, Error, Result};
use rivulet_reactive::{
    callback, ChangeCallback, CollectionCallback, SharedCollection, SubscriptionId, Var,
};

/// Running state of an aggregate.
pub trait Accumulator<T>: Default {
    type Output: Clone + PartialEq + 'static;

    const NAME: &'static str;

    fn insert(&mut self, item: &T);

    fn remove(&mut self, item: &T);

    fn replace(&mut self, old: &T, new: &T) {
        self.remove(old);
        self.insert(new);
    }

    fn value(&self) -> Self::Output;

    /// Returns true if both accumulators describe the same items.
    fn agrees(&self, other: &Self) -> bool;
}

/// Types that can be summed and have the sum taken apart again.
pub trait Additive:
    Copy + Default + PartialEq + Add<Output = Self> + Sub<Output = Self> + 'static
{
}

impl<T> Additive for T where
    T: Copy + Default + PartialEq + Add<Output = T> + Sub<Output = T> + 'static
{
}

/// Running total.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sum<T> {
    total: T,
}

impl<T: Additive> Accumulator<T> for Sum<T> {
    type Output = T;

    const NAME: &'static str = "Summing";

    #[inline]
    fn insert(&mut self, item: &T) {
        self.total = self.total + *item;
    }

    #[inline]
    fn remove(&mut self, item: &T) {
        self.total = self.total - *item;
    }

    /// Adds the difference, so the total without `old` is never formed.
    #[inline]
    fn replace(&mut self, old: &T, new: &T) {
        self.total = self.total + (*new - *old);
    }

    fn value(&self) -> T {
        self.total
    }

    fn agrees(&self, other: &Self) -> bool {
        self.total == other.total
    }
}

/// Running sum and count; the mean of no items is `None`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mean {
    sum: f64,
    count: usize,
}

impl<T: Copy + Into<f64>> Accumulator<T> for Mean {
    type Output = Option<f64>;

    const NAME: &'static str = "Averaging";

    fn insert(&mut self, item: &T) {
        self.sum += (*item).into();
        self.count += 1;
    }

    fn remove(&mut self, item: &T) {
        self.count -= 1;
        if self.count == 0 {
            // drop accumulated rounding error
            self.sum = 0.0;
        } else {
            self.sum -= (*item).into();
        }
    }

    fn value(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }

    fn agrees(&self, other: &Self) -> bool {
        let scale = if other.sum < 0.0 { -other.sum } else { other.sum };
        let diff = self.sum - other.sum;
        let diff = if diff < 0.0 { -diff } else { diff };
        self.count == other.count && diff <= 1e-9 * scale.max(1.0)
    }
}

/// A source collection folded into one value.
pub struct Aggregate<T, A: Accumulator<T>> {
    binding: SourceBinding<T>,
    gate: PropagationGate,
    state: RefCell<A>,
    value: Var<A::Output>,
    this: Weak<Self>,
    _item: PhantomData<fn(&T)>,
}

/// The sum of a source collection.
///
/// ```ignore
/// let source = SourceList::from_vec(vec![1, 2, 3]);
/// let sum = Summing::new(source.clone())?;
/// source.push(4)?;
/// assert_eq!(sum.get(), 10);
/// ```
pub type Summing<T> = Aggregate<T, Sum<T>>;

/// The arithmetic mean of a source collection, `None` while it is empty.
pub type Averaging<T> = Aggregate<T, Mean>;

impl<T: Additive> Aggregate<T, Sum<T>> {
    /// Sums `source`.
    pub fn new(source: impl Into<SourceParam<T>>) -> Result<Rc<Self>> {
        Self::with_options(source, OperatorOptions::default())
    }
}

impl<T: Copy + Into<f64> + 'static> Aggregate<T, Mean> {
    /// Averages `source`.
    pub fn new(source: impl Into<SourceParam<T>>) -> Result<Rc<Self>> {
        Self::with_options(source, OperatorOptions::default())
    }
}

impl<T, A> Aggregate<T, A>
where
    T: Clone + 'static,
    A: Accumulator<T> + 'static,
{
    /// Creates an aggregate with explicit options.
    pub fn with_options(source: impl Into<SourceParam<T>>, options: OperatorOptions) -> Result<Rc<Self>> {
        let this = Rc::new_cyclic(|weak| Self {
            binding: SourceBinding::new(source.into()),
            gate: PropagationGate::new(A::NAME, options.diagnostics.clone()),
            state: RefCell::new(A::default()),
            value: Var::new(A::default().value()),
            this: weak.clone(),
            _item: PhantomData,
        });
        this.binding.watch_param(this.rebind_callback());
        this.attach()?;
        Ok(this)
    }

    /// The aggregate as a reactive value.
    pub fn value(&self) -> Var<A::Output> {
        self.value.clone()
    }

    /// Returns the current aggregate.
    pub fn get(&self) -> A::Output {
        self.state.borrow().value()
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
            Some(this) => this.attach(),
            None => Ok(()),
        })
    }

    fn attach(&self) -> Result<()> {
        let source = self.binding.attach(self.source_callback());
        tracing::debug!(operator = A::NAME, len = source.len(), "attached source");
        self.gate.initialize(source.change_marker(), || {
            self.rebuild(&source);
            Ok(())
        })?;
        self.publish()?;
        self.gate.settle(|_| Ok(()))
    }

    fn rebuild(&self, source: &SharedCollection<T>) {
        let mut state = A::default();
        for item in source.to_vec().iter() {
            state.insert(item);
        }
        *self.state.borrow_mut() = state;
    }

    fn on_source_change(&self, change: &CollectionChange<T>) -> Result<()> {
        let source = self.binding.source()?;
        self.gate.structural(source.change_marker(), change, || {
            let mut state = self.state.borrow_mut();
            match change {
                CollectionChange::Add { items, .. } => state.insert(&items[0]),
                CollectionChange::Remove { items, .. } => state.remove(&items[0]),
                CollectionChange::Replace {
                    old_items,
                    new_items,
                    ..
                } => state.replace(&old_items[0], &new_items[0]),
                CollectionChange::Move { .. } => {}
                CollectionChange::Reset => {
                    drop(state);
                    self.rebuild(&source);
                }
            }
            Ok(())
        })?;
        self.publish()?;
        self.gate.settle(|_| Ok(()))
    }

    /// Copies the aggregate into the published value. Runs outside the
    /// propagation step, so subscribers may edit upstream collections.
    fn publish(&self) -> Result<()> {
        let value = self.state.borrow().value();
        self.value.set(value)
    }
}

impl<T, A> Computation for Aggregate<T, A>
where
    T: Clone + 'static,
    A: Accumulator<T> + 'static,
{
    fn operator(&self) -> &'static str {
        A::NAME
    }

    fn is_consistent(&self) -> bool {
        self.gate.is_consistent()
    }

    fn validate_consistency(&self) -> Result<()> {
        let mut expected = A::default();
        for item in self.binding.source()?.to_vec().iter() {
            expected.insert(item);
        }
        let state = self.state.borrow();
        if !state.agrees(&expected) {
            return Err(Error::consistency_violation(A::NAME, 1));
        }
        if self.value.get() != state.value() {
            return Err(Error::consistency_violation(A::NAME, 2));
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
