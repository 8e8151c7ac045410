//! Subscription management for change notifications.
//!
//! This module provides subscription IDs, a manager that tracks callbacks in
//! subscription order, and `Notifier`, the shared-reference wrapper every
//! observable uses to dispatch events.
//!
//! Dispatch works on a snapshot of the subscriptions, so callbacks may
//! subscribe or unsubscribe while a notification is in flight. A subscription
//! removed mid-dispatch is deactivated and will not be called again.

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use rivulet_core::Result;

/// Unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback type for notifications of event type `E`.
pub type ChangeCallback<E> = Rc<dyn Fn(&E) -> Result<()>>;

/// Wraps a closure into a `ChangeCallback`.
pub fn callback<E, F>(f: F) -> ChangeCallback<E>
where
    F: Fn(&E) -> Result<()> + 'static,
{
    Rc::new(f)
}

/// A subscription to events of type `E`.
pub struct Subscription<E> {
    /// Unique identifier
    id: SubscriptionId,
    /// Callback to invoke on events
    callback: ChangeCallback<E>,
    /// Whether this subscription is active, shared with in-flight snapshots
    active: Rc<Cell<bool>>,
}

impl<E> Clone for Subscription<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: self.callback.clone(),
            active: self.active.clone(),
        }
    }
}

impl<E> Subscription<E> {
    /// Creates a new subscription.
    pub fn new(id: SubscriptionId, callback: ChangeCallback<E>) -> Self {
        Self {
            id,
            callback,
            active: Rc::new(Cell::new(true)),
        }
    }

    /// Returns the subscription ID.
    #[inline]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns whether this subscription is active.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Deactivates this subscription.
    #[inline]
    pub fn deactivate(&self) {
        self.active.set(false);
    }

    /// Notifies this subscription of an event.
    pub fn notify(&self, event: &E) -> Result<()> {
        if self.active.get() {
            (self.callback)(event)
        } else {
            Ok(())
        }
    }
}

/// Manages subscriptions in subscription order.
pub struct SubscriptionManager<E> {
    /// Active subscriptions
    subscriptions: BTreeMap<SubscriptionId, Subscription<E>>,
    /// Next subscription ID to assign
    next_id: SubscriptionId,
}

impl<E> Default for SubscriptionManager<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> SubscriptionManager<E> {
    /// Creates a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Subscribes with the given callback.
    ///
    /// Returns the subscription ID that can be used to unsubscribe.
    pub fn subscribe(&mut self, callback: ChangeCallback<E>) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.subscriptions.insert(id, Subscription::new(id, callback));
        id
    }

    /// Unsubscribes by ID.
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        match self.subscriptions.remove(&id) {
            Some(sub) => {
                sub.deactivate();
                true
            }
            None => false,
        }
    }

    /// Returns the active subscriptions in subscription order.
    pub fn snapshot(&self) -> Vec<Subscription<E>> {
        self.subscriptions.values().cloned().collect()
    }

    /// Returns the number of active subscriptions.
    #[inline]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns true if there are no subscriptions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Returns all subscription IDs.
    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.subscriptions.keys().copied().collect()
    }

    /// Clears all subscriptions.
    pub fn clear(&mut self) {
        for sub in self.subscriptions.values() {
            sub.deactivate();
        }
        self.subscriptions.clear();
    }
}

/// Subscription manager behind a shared reference.
///
/// `notify` releases the internal borrow before calling back, so callbacks
/// are free to subscribe and unsubscribe. The first callback error stops the
/// dispatch and is returned.
pub struct Notifier<E> {
    manager: RefCell<SubscriptionManager<E>>,
}

impl<E> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Notifier<E> {
    /// Creates a notifier without subscribers.
    pub fn new() -> Self {
        Self {
            manager: RefCell::new(SubscriptionManager::new()),
        }
    }

    /// Subscribes a callback.
    pub fn subscribe(&self, callback: ChangeCallback<E>) -> SubscriptionId {
        self.manager.borrow_mut().subscribe(callback)
    }

    /// Unsubscribes by ID.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.manager.borrow_mut().unsubscribe(id)
    }

    /// Returns the number of subscribers.
    #[inline]
    pub fn len(&self) -> usize {
        self.manager.borrow().len()
    }

    /// Returns true if there are no subscribers.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.manager.borrow().is_empty()
    }

    /// Notifies every subscriber in subscription order.
    pub fn notify(&self, event: &E) -> Result<()> {
        let subscriptions = self.manager.borrow().snapshot();
        for sub in &subscriptions {
            sub.notify(event)?;
        }
        Ok(())
    }

    /// Removes every subscriber.
    pub fn clear(&self) {
        self.manager.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use rivulet_core::Error;

    fn counter(count: &Rc<RefCell<i32>>, step: i32) -> ChangeCallback<u32> {
        let count = count.clone();
        callback(move |_| {
            *count.borrow_mut() += step;
            Ok(())
        })
    }

    #[test]
    fn test_subscription_new() {
        let sub: Subscription<u32> = Subscription::new(1, callback(|_| Ok(())));
        assert_eq!(sub.id(), 1);
        assert!(sub.is_active());
    }

    #[test]
    fn test_subscription_notify_inactive() {
        let count = Rc::new(RefCell::new(0));
        let sub = Subscription::new(1, counter(&count, 1));
        sub.notify(&0).unwrap();
        sub.deactivate();
        sub.notify(&0).unwrap();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_subscription_manager_subscribe() {
        let mut manager: SubscriptionManager<u32> = SubscriptionManager::new();

        let id1 = manager.subscribe(callback(|_| Ok(())));
        let id2 = manager.subscribe(callback(|_| Ok(())));

        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.subscription_ids(), vec![1, 2]);
    }

    #[test]
    fn test_subscription_manager_unsubscribe() {
        let mut manager: SubscriptionManager<u32> = SubscriptionManager::new();

        let id = manager.subscribe(callback(|_| Ok(())));
        assert!(manager.unsubscribe(id));
        assert!(manager.is_empty());
        assert!(!manager.unsubscribe(id)); // Already removed
    }

    #[test]
    fn test_notifier_order() {
        let notifier: Notifier<u32> = Notifier::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in 0..3 {
            let log = log.clone();
            notifier.subscribe(callback(move |event: &u32| {
                log.borrow_mut().push((tag, *event));
                Ok(())
            }));
        }

        notifier.notify(&7).unwrap();
        assert_eq!(*log.borrow(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn test_notifier_unsubscribe_during_dispatch() {
        let notifier: Rc<Notifier<u32>> = Rc::new(Notifier::new());
        let count = Rc::new(RefCell::new(0));

        let weak = Rc::downgrade(&notifier);
        notifier.subscribe(callback(move |_| {
            if let Some(n) = weak.upgrade() {
                n.unsubscribe(2);
            }
            Ok(())
        }));
        notifier.subscribe(counter(&count, 1));

        notifier.notify(&0).unwrap();
        assert_eq!(*count.borrow(), 0);
        assert_eq!(notifier.len(), 1);
    }

    #[test]
    fn test_notifier_subscribe_during_dispatch() {
        let notifier: Rc<Notifier<u32>> = Rc::new(Notifier::new());
        let count = Rc::new(RefCell::new(0));

        let weak = Rc::downgrade(&notifier);
        let inner = counter(&count, 1);
        notifier.subscribe(callback(move |_| {
            if let Some(n) = weak.upgrade() {
                n.subscribe(inner.clone());
            }
            Ok(())
        }));

        notifier.notify(&0).unwrap();
        assert_eq!(*count.borrow(), 0);
        assert_eq!(notifier.len(), 2);
    }

    #[test]
    fn test_notifier_stops_on_error() {
        let notifier: Notifier<u32> = Notifier::new();
        let count = Rc::new(RefCell::new(0));

        notifier.subscribe(callback(|_| Err(Error::invalid_operation("boom"))));
        notifier.subscribe(counter(&count, 1));

        assert!(notifier.notify(&0).is_err());
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn test_notifier_clear() {
        let notifier: Notifier<u32> = Notifier::new();
        notifier.subscribe(callback(|_| Ok(())));
        notifier.subscribe(callback(|_| Ok(())));
        assert_eq!(notifier.len(), 2);
        notifier.clear();
        assert!(notifier.is_empty());
    }
}
