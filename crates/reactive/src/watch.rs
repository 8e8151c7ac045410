//! Dependent-value tracking.
//!
//! A `Selector` computes a value from an item and may read reactive values
//! through the `ReadSet` it is handed. `watch` evaluates a selector once,
//! records what it read and subscribes to each of those values. The
//! returned `WatchHandle` owns the subscriptions; dropping or disposing it
//! detaches the watcher.
//!
//! A watcher fires once per change of any dependency and then stays
//! subscribed to the dependencies of that evaluation. Callers that need the
//! new value re-watch, which also picks up dependencies that changed
//! between evaluations.

use crate::subscription::{ChangeCallback, SubscriptionId};
use crate::var::{Dependency, Scalar};
use alloc::rc::Rc;
use alloc::vec::Vec;

/// The set of reactive values read during one evaluation.
#[derive(Default)]
pub struct ReadSet {
    dependencies: Vec<Rc<dyn Dependency>>,
}

impl ReadSet {
    /// Creates an empty read set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `scalar` and records it as a dependency.
    pub fn read<T, S>(&mut self, scalar: &S) -> T
    where
        S: Scalar<T> + Clone + 'static,
    {
        self.track(Rc::new(scalar.clone()));
        scalar.get()
    }

    /// Records a dependency. Repeated reads of the same value are kept once.
    pub fn track(&mut self, dependency: Rc<dyn Dependency>) {
        let identity = dependency.identity();
        if !self.dependencies.iter().any(|d| d.identity() == identity) {
            self.dependencies.push(dependency);
        }
    }

    /// Returns the number of distinct dependencies.
    #[inline]
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Returns true if nothing was read.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}

/// Per-item expression, optionally reading reactive values.
pub struct Selector<T, R> {
    f: Rc<dyn Fn(&T, &mut ReadSet) -> R>,
    tracked: bool,
}

impl<T, R> Clone for Selector<T, R> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            tracked: self.tracked,
        }
    }
}

impl<T: 'static, R: 'static> Selector<T, R> {
    /// Creates a selector that may read reactive values through its
    /// `ReadSet` argument.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&T, &mut ReadSet) -> R + 'static,
    {
        Self {
            f: Rc::new(f),
            tracked: true,
        }
    }

    /// Creates a selector that depends on the item only.
    pub fn plain<F>(f: F) -> Self
    where
        F: Fn(&T) -> R + 'static,
    {
        Self {
            f: Rc::new(move |item: &T, _: &mut ReadSet| f(item)),
            tracked: false,
        }
    }
}

impl<T, R> Selector<T, R> {
    /// Returns true if evaluations may read reactive values.
    #[inline]
    pub fn is_tracked(&self) -> bool {
        self.tracked
    }

    /// Evaluates without tracking.
    pub fn evaluate(&self, item: &T) -> R {
        let mut reads = ReadSet::new();
        (self.f)(item, &mut reads)
    }

    /// Evaluates and returns the values read.
    pub fn evaluate_tracked(&self, item: &T) -> (R, ReadSet) {
        let mut reads = ReadSet::new();
        let value = (self.f)(item, &mut reads);
        (value, reads)
    }
}

/// Subscriptions of one watcher.
#[derive(Default)]
pub struct WatchHandle {
    subscriptions: Vec<(Rc<dyn Dependency>, SubscriptionId)>,
}

impl WatchHandle {
    /// A handle watching nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Subscribes `on_changed` to every dependency in `reads`.
    pub fn subscribe(reads: ReadSet, on_changed: ChangeCallback<()>) -> Self {
        let subscriptions = reads
            .dependencies
            .into_iter()
            .map(|dependency| {
                let id = dependency.subscribe_changed(on_changed.clone());
                (dependency, id)
            })
            .collect();
        Self { subscriptions }
    }

    /// Returns the number of watched values.
    #[inline]
    pub fn dependency_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns true while any value is watched.
    #[inline]
    pub fn is_active(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Unsubscribes from every dependency. Calling it again is a no-op.
    pub fn dispose(&mut self) {
        for (dependency, id) in self.subscriptions.drain(..) {
            dependency.unsubscribe_changed(id);
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Evaluates `selector` for `item` and watches what it read.
pub fn watch<T, R>(
    selector: &Selector<T, R>,
    item: &T,
    on_changed: ChangeCallback<()>,
) -> (R, WatchHandle) {
    if !selector.is_tracked() {
        return (selector.evaluate(item), WatchHandle::empty());
    }
    let (value, reads) = selector.evaluate_tracked(item);
    (value, WatchHandle::subscribe(reads, on_changed))
}
