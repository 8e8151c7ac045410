//! Traits every operator exposes beyond its collection surface.

use core::ops::Range;
use rivulet_core::Result;
use rivulet_reactive::{ChangeCallback, ObservableCollection, SubscriptionId};

/// Consistency surface of an operator.
pub trait Computation {
    /// Operator name, as used in diagnostics and consistency violations.
    fn operator(&self) -> &'static str;

    /// Returns true when the operator is not propagating and its last
    /// propagation succeeded.
    fn is_consistent(&self) -> bool;

    /// Recomputes the expected result from the current source and compares
    /// it with the maintained state. Fails with a numbered
    /// `ConsistencyViolation` naming the first invariant found broken.
    fn validate_consistency(&self) -> Result<()>;

    /// Subscribes to the signal raised after each completed propagation.
    fn subscribe_consistency_restored(&self, callback: ChangeCallback<()>) -> SubscriptionId;

    /// Unsubscribes from the consistency-restored signal.
    fn unsubscribe_consistency_restored(&self, id: SubscriptionId) -> bool;
}

/// A sorted collection that exposes its runs of equal keys, so that a
/// secondary ordering can re-sort within them.
pub trait OrderedSource<T>: ObservableCollection<T> {
    /// Output range of the equal-key run containing `index`.
    fn equal_key_range(&self, index: usize) -> Option<Range<usize>>;

    /// Subscribes to regroup notifications. One is raised with the output
    /// index of an item that changed equal-key run without moving.
    fn subscribe_regroup(&self, callback: ChangeCallback<usize>) -> SubscriptionId;

    /// Unsubscribes from regroup notifications.
    fn unsubscribe_regroup(&self, id: SubscriptionId) -> bool;
}
