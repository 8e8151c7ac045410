//! Upstream subscription of a single-source operator.

use crate::options::SourceParam;
use core::cell::{Cell, RefCell};
use rivulet_core::{Error, Result};
use rivulet_reactive::{ChangeCallback, CollectionCallback, SharedCollection, SubscriptionId};

struct Attached<T> {
    source: SharedCollection<T>,
    subscription: SubscriptionId,
}

/// Holds the source parameter of an operator and its live subscription.
///
/// The operator keeps a strong reference to its source; the source only
/// reaches the operator through the callback the operator installed, which
/// captures a weak reference. Dropping the binding unsubscribes.
pub(crate) struct SourceBinding<T> {
    param: SourceParam<T>,
    attached: RefCell<Option<Attached<T>>>,
    param_subscription: Cell<Option<SubscriptionId>>,
}

impl<T: 'static> SourceBinding<T> {
    pub(crate) fn new(param: SourceParam<T>) -> Self {
        Self {
            param,
            attached: RefCell::new(None),
            param_subscription: Cell::new(None),
        }
    }

    /// Subscribes `callback` to the currently selected source and returns
    /// that source. Any previous subscription is released first.
    pub(crate) fn attach(&self, callback: CollectionCallback<T>) -> SharedCollection<T> {
        self.detach();
        let source = self.param.current();
        let subscription = source.subscribe(callback);
        *self.attached.borrow_mut() = Some(Attached {
            source: source.clone(),
            subscription,
        });
        source
    }

    /// Releases the source subscription.
    pub(crate) fn detach(&self) {
        let attached = self.attached.borrow_mut().take();
        if let Some(attached) = attached {
            attached.source.unsubscribe(attached.subscription);
        }
    }

    /// Returns the attached source.
    pub(crate) fn source(&self) -> Result<SharedCollection<T>> {
        self.attached
            .borrow()
            .as_ref()
            .map(|attached| attached.source.clone())
            .ok_or_else(|| Error::invalid_operation("operator is not attached to a source"))
    }

    /// Change marker of the attached source.
    pub(crate) fn marker(&self) -> Option<bool> {
        self.attached
            .borrow()
            .as_ref()
            .and_then(|attached| attached.source.change_marker())
    }

    /// Calls `on_rebind` whenever a bound source parameter selects another
    /// collection. Fixed sources never rebind.
    pub(crate) fn watch_param(&self, on_rebind: ChangeCallback<()>) {
        if let SourceParam::Bound(var) = &self.param {
            self.param_subscription
                .set(Some(var.subscribe(on_rebind)));
        }
    }
}

impl<T> Drop for SourceBinding<T> {
    fn drop(&mut self) {
        if let Some(attached) = self.attached.get_mut().take() {
            attached.source.unsubscribe(attached.subscription);
        }
        if let (SourceParam::Bound(var), Some(id)) = (&self.param, self.param_subscription.get()) {
            var.unsubscribe(id);
        }
    }
}

/// Reads the source item at `index`.
pub(crate) fn source_item<T: Clone>(source: &SharedCollection<T>, index: usize) -> Result<T> {
    source
        .get(index)
        .ok_or_else(|| Error::not_found(index, source.len()))
}
