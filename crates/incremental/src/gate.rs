//! Propagation state machine shared by every operator.
//!
//! An operator moves through `Uninitialized -> Consistent` on its first full
//! materialization and through `Consistent -> Propagating -> Consistent` for
//! every upstream edit or value change it translates. A failed step leaves it
//! `Faulted` until a Reset or a rebinding re-synchronizes it.
//!
//! Value changes and parameter changes that arrive while the operator is
//! propagating, or while its source has emitted an edit the operator has not
//! seen yet, are queued and replayed once the current step completes.

use alloc::collections::VecDeque;
use alloc::format;
use core::cell::{Cell, RefCell};
use rivulet_core::{CollectionChange, Diagnostics, Error, PositionId, Result};
use rivulet_reactive::{ChangeCallback, Notifier, SubscriptionId};

/// Lifecycle phase of an operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Consistent,
    Propagating,
    Faulted,
}

/// A queued change, replayed by `settle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Deferred {
    /// The value an item's key or predicate reads changed.
    Item(PositionId),
    /// An operator parameter changed; the operator re-reads all of them.
    Refresh,
}

/// Tracks the phase, the last processed source marker and the queue of
/// deferred changes of one operator.
pub struct PropagationGate {
    operator: &'static str,
    phase: Cell<Phase>,
    last_marker: Cell<Option<bool>>,
    deferred: RefCell<VecDeque<Deferred>>,
    restored: Notifier<()>,
    diagnostics: Diagnostics,
}

impl PropagationGate {
    /// Creates a gate for `operator`.
    pub fn new(operator: &'static str, diagnostics: Diagnostics) -> Self {
        Self {
            operator,
            phase: Cell::new(Phase::Uninitialized),
            last_marker: Cell::new(None),
            deferred: RefCell::new(VecDeque::new()),
            restored: Notifier::new(),
            diagnostics,
        }
    }

    /// Returns the operator name.
    #[inline]
    pub fn operator(&self) -> &'static str {
        self.operator
    }

    /// Returns the current phase.
    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    /// Returns true when no propagation is in flight and the last one
    /// succeeded.
    #[inline]
    pub fn is_consistent(&self) -> bool {
        self.phase.get() == Phase::Consistent
    }

    /// Returns the diagnostics handle.
    #[inline]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Number of queued changes.
    pub fn deferred_len(&self) -> usize {
        self.deferred.borrow().len()
    }

    /// Runs a full (re)materialization. Clears the deferred queue and any
    /// fault.
    pub fn initialize(&self, marker: Option<bool>, step: impl FnOnce() -> Result<()>) -> Result<()> {
        if self.phase.get() == Phase::Propagating {
            return Err(self.reentrant());
        }
        self.deferred.borrow_mut().clear();
        self.phase.set(Phase::Propagating);
        self.last_marker.set(marker);
        tracing::debug!(operator = self.operator, "initializing");
        let result = step();
        self.finish(result)
    }

    /// Translates one upstream structural edit.
    ///
    /// Multi-item edits are rejected here, after the gate has entered
    /// `Propagating`, so the operator ends up `Faulted`. A faulted operator
    /// accepts nothing but a Reset.
    pub fn structural<T>(
        &self,
        marker: Option<bool>,
        change: &CollectionChange<T>,
        step: impl FnOnce() -> Result<()>,
    ) -> Result<()> {
        match self.phase.get() {
            Phase::Propagating => return Err(self.reentrant()),
            Phase::Faulted if !change.is_reset() => return Err(self.faulted()),
            _ => {}
        }
        self.phase.set(Phase::Propagating);
        self.last_marker.set(marker);
        if change.is_reset() {
            self.deferred.borrow_mut().clear();
        }
        tracing::trace!(operator = self.operator, action = change.action().name(), "translating edit");
        let result = change.ensure_single_item().and_then(|()| step());
        self.finish(result)
    }

    /// Returns true if a value change must wait: the operator is mid-step,
    /// or its source has moved on to an edit the operator has not processed.
    pub fn should_defer(&self, source_marker: Option<bool>) -> bool {
        match self.phase.get() {
            Phase::Propagating | Phase::Uninitialized => true,
            Phase::Faulted => false,
            Phase::Consistent => source_marker.is_some() && source_marker != self.last_marker.get(),
        }
    }

    /// Queues a value change of the item at `id`.
    pub fn defer(&self, id: PositionId) {
        tracing::trace!(operator = self.operator, "deferring value change");
        self.deferred.borrow_mut().push_back(Deferred::Item(id));
    }

    /// Returns true if a parameter change is queued.
    pub fn refresh_pending(&self) -> bool {
        self.deferred.borrow().contains(&Deferred::Refresh)
    }

    /// Queues a parameter change. Several changes queue one refresh.
    pub fn defer_refresh(&self) {
        let mut deferred = self.deferred.borrow_mut();
        if !deferred.contains(&Deferred::Refresh) {
            tracing::trace!(operator = self.operator, "deferring parameter change");
            deferred.push_back(Deferred::Refresh);
        }
    }

    /// Translates one value change. A faulted operator ignores it.
    pub fn value_change(&self, step: impl FnOnce() -> Result<()>) -> Result<()> {
        match self.phase.get() {
            Phase::Faulted => return Ok(()),
            Phase::Propagating => return Err(self.reentrant()),
            _ => {}
        }
        self.phase.set(Phase::Propagating);
        let result = step();
        self.finish(result)
    }

    /// Replays queued value changes through `replay`, then signals that
    /// consistency is restored.
    pub fn settle(&self, replay: impl Fn(PositionId) -> Result<()>) -> Result<()> {
        self.settle_with(replay, || Ok(()))
    }

    /// Like `settle`, for operators with parameters. A queued parameter
    /// change runs `refresh`, which drives the gate itself.
    pub fn settle_with(
        &self,
        replay: impl Fn(PositionId) -> Result<()>,
        refresh: impl Fn() -> Result<()>,
    ) -> Result<()> {
        loop {
            let next = self.deferred.borrow_mut().pop_front();
            match next {
                None => break,
                Some(Deferred::Item(id)) => self.value_change(|| replay(id))?,
                Some(Deferred::Refresh) => refresh()?,
            }
        }
        if self.is_consistent() {
            self.restored.notify(&())?;
        }
        Ok(())
    }

    /// Subscribes to the consistency-restored signal.
    pub fn subscribe_restored(&self, callback: ChangeCallback<()>) -> SubscriptionId {
        self.restored.subscribe(callback)
    }

    /// Unsubscribes from the consistency-restored signal.
    pub fn unsubscribe_restored(&self, id: SubscriptionId) -> bool {
        self.restored.unsubscribe(id)
    }

    fn finish(&self, result: Result<()>) -> Result<()> {
        match &result {
            Ok(()) => self.phase.set(Phase::Consistent),
            Err(error) => {
                self.phase.set(Phase::Faulted);
                self.deferred.borrow_mut().clear();
                self.diagnostics.report_error(self.operator, error);
                tracing::debug!(operator = self.operator, error = %error, "propagation failed");
            }
        }
        result
    }

    fn reentrant(&self) -> Error {
        Error::invalid_operation(format!(
            "{}: edit received while propagating",
            self.operator
        ))
    }

    fn faulted(&self) -> Error {
        Error::invalid_operation(format!(
            "{}: operator is faulted until its source is reset",
            self.operator
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use alloc::vec;
    use alloc::vec::Vec;
    use rivulet_core::PositionRegistry;
    use rivulet_reactive::callback;

    fn gate() -> PropagationGate {
        PropagationGate::new("Test", Diagnostics::disabled())
    }

    #[test]
    fn test_lifecycle() {
        let gate = gate();
        assert_eq!(gate.phase(), Phase::Uninitialized);
        gate.initialize(Some(false), || Ok(())).unwrap();
        assert!(gate.is_consistent());

        gate.structural(Some(true), &CollectionChange::add(0, 1), || {
            assert_eq!(gate.phase(), Phase::Propagating);
            Ok(())
        })
        .unwrap();
        assert!(gate.is_consistent());
    }

    #[test]
    fn test_multi_item_edit_faults() {
        let gate = gate();
        gate.initialize(None, || Ok(())).unwrap();
        let change = CollectionChange::Add {
            index: 0,
            items: [1, 2].into_iter().collect(),
        };
        let err = gate.structural(None, &change, || Ok(())).unwrap_err();
        assert!(err.is_unsupported());
        assert_eq!(gate.phase(), Phase::Faulted);

        assert!(gate
            .structural(None, &CollectionChange::add(0, 1), || Ok(()))
            .is_err());
        gate.structural(None, &CollectionChange::<i32>::Reset, || Ok(()))
            .unwrap();
        assert!(gate.is_consistent());
    }

    #[test]
    fn test_defer_rules() {
        let gate = gate();
        assert!(gate.should_defer(None));
        gate.initialize(Some(false), || Ok(())).unwrap();
        assert!(!gate.should_defer(Some(false)));
        assert!(gate.should_defer(Some(true)));
        assert!(!gate.should_defer(None));
    }

    #[test]
    fn test_settle_replays_in_order_and_signals() {
        let gate = gate();
        gate.initialize(None, || Ok(())).unwrap();
        let mut ids = PositionRegistry::new();
        let a = ids.push(());
        let b = ids.push(());
        gate.defer(a);
        gate.defer(b);

        let restored = Rc::new(Cell::new(0));
        let inner = restored.clone();
        gate.subscribe_restored(callback(move |_| {
            inner.set(inner.get() + 1);
            Ok(())
        }));

        let seen = RefCell::new(Vec::new());
        gate.settle(|id| {
            seen.borrow_mut().push(id);
            Ok(())
        })
        .unwrap();
        assert_eq!(*seen.borrow(), vec![a, b]);
        assert_eq!(gate.deferred_len(), 0);
        assert_eq!(restored.get(), 1);
    }

    #[test]
    fn test_refresh_is_queued_once_and_replayed() {
        let gate = gate();
        gate.initialize(Some(false), || Ok(())).unwrap();
        let mut ids = PositionRegistry::new();
        let a = ids.push(());
        gate.defer_refresh();
        gate.defer(a);
        gate.defer_refresh();
        assert_eq!(gate.deferred_len(), 2);

        let seen = RefCell::new(Vec::new());
        gate.settle_with(
            |id| {
                seen.borrow_mut().push(Some(id));
                Ok(())
            },
            || {
                seen.borrow_mut().push(None);
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(*seen.borrow(), vec![None, Some(a)]);
        assert!(gate.is_consistent());
    }

    #[test]
    fn test_reentrant_structural_edit_is_rejected() {
        let gate = gate();
        gate.initialize(None, || Ok(())).unwrap();
        let result = gate.structural(None, &CollectionChange::add(0, 1), || {
            gate.structural(None, &CollectionChange::add(0, 2), || Ok(()))
        });
        assert!(result.is_err());
        assert_eq!(gate.phase(), Phase::Faulted);
    }
}
