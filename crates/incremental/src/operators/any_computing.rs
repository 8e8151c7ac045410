//! Incremental any-predicate.
//!
//! The items passing the predicate are kept by a `Filtering`; an aggregate
//! over it counts them and publishes whether there is at least one.

use crate::computation::Computation;
use crate::operators::{Accumulator, Aggregate, Filtering};
use crate::options::{OperatorOptions, SourceParam};
use alloc::rc::Rc;
use rivulet_core::{Diagnostics, Error, Result};
use rivulet_reactive::{ChangeCallback, ObservableCollection, Selector, SharedCollection, SubscriptionId, Var};

const OPERATOR: &str = "AnyComputing";

/// Number of items, published as whether there are any.
#[derive(Clone, Copy, Debug, Default)]
pub struct Occupancy {
    count: usize,
}

impl<T> Accumulator<T> for Occupancy {
    type Output = bool;

    const NAME: &'static str = OPERATOR;

    #[inline]
    fn insert(&mut self, _: &T) {
        self.count += 1;
    }

    #[inline]
    fn remove(&mut self, _: &T) {
        self.count -= 1;
    }

    #[inline]
    fn replace(&mut self, _: &T, _: &T) {}

    fn value(&self) -> bool {
        self.count > 0
    }

    fn agrees(&self, other: &Self) -> bool {
        self.count == other.count
    }
}

/// Whether any item of a source collection satisfies a predicate.
///
/// The predicate may read reactive values, as with `Filtering`.
///
/// ```ignore
/// let source = SourceList::from_vec(vec![1, 3]);
/// let any_even = AnyComputing::new(source.clone(), Selector::plain(|x: &i32| x % 2 == 0))?;
/// assert!(!any_even.get());
/// source.push(4)?;
/// assert!(any_even.value().get());
/// ```
pub struct AnyComputing<T> {
    passing: Rc<Filtering<T>>,
    occupancy: Rc<Aggregate<T, Occupancy>>,
    diagnostics: Diagnostics,
}

impl<T: Clone + 'static> AnyComputing<T> {
    /// Watches `source` for an item satisfying `predicate`.
    pub fn new(source: impl Into<SourceParam<T>>, predicate: Selector<T, bool>) -> Result<Rc<Self>> {
        Self::with_options(source, predicate, OperatorOptions::default())
    }

    /// Creates the predicate watch with explicit options.
    pub fn with_options(
        source: impl Into<SourceParam<T>>,
        predicate: Selector<T, bool>,
        options: OperatorOptions,
    ) -> Result<Rc<Self>> {
        let passing = Filtering::with_options(source, predicate, options.clone())?;
        let occupancy = Aggregate::<T, Occupancy>::with_options(passing.clone(), options.clone())?;
        Ok(Rc::new(Self {
            passing,
            occupancy,
            diagnostics: options.diagnostics,
        }))
    }

    /// The result as a reactive value. It only notifies when the answer flips.
    pub fn value(&self) -> Var<bool> {
        self.occupancy.value()
    }

    /// Returns the current result.
    pub fn get(&self) -> bool {
        self.occupancy.get()
    }

    /// Returns the items currently satisfying the predicate.
    pub fn passing(&self) -> &Rc<Filtering<T>> {
        &self.passing
    }

    /// Returns the source collection.
    pub fn source(&self) -> Result<SharedCollection<T>> {
        self.passing.source()
    }
}

impl<T: Clone + PartialEq + 'static> Computation for AnyComputing<T> {
    fn operator(&self) -> &'static str {
        OPERATOR
    }

    fn is_consistent(&self) -> bool {
        self.passing.is_consistent() && self.occupancy.is_consistent()
    }

    fn validate_consistency(&self) -> Result<()> {
        self.passing.validate_consistency()?;
        self.occupancy.validate_consistency()?;

        let source = self.passing.source()?.to_vec();
        let predicate = self.passing.predicate();
        let expected = self
            .diagnostics
            .evaluate(OPERATOR, || source.iter().any(|item| predicate.evaluate(item)));
        if self.get() != expected {
            return Err(Error::consistency_violation(OPERATOR, 1));
        }
        if self.get() != (self.passing.len() > 0) {
            return Err(Error::consistency_violation(OPERATOR, 2));
        }
        Ok(())
    }

    fn subscribe_consistency_restored(&self, callback: ChangeCallback<()>) -> SubscriptionId {
        self.occupancy.subscribe_consistency_restored(callback)
    }

    fn unsubscribe_consistency_restored(&self, id: SubscriptionId) -> bool {
        self.occupancy.unsubscribe_consistency_restored(id)
    }
}
