//! Reactive values.
//!
//! `Var<T>` is a shared value holder that notifies its subscribers after
//! every actual change. It is the scalar contract of the crate: operator
//! parameters bind to it, aggregations publish through it and tracked
//! expressions read it.

use crate::subscription::{ChangeCallback, Notifier, SubscriptionId};
use alloc::rc::Rc;
use core::cell::RefCell;
use core::fmt;
use rivulet_core::Result;

/// Something a tracked expression can depend on.
pub trait Dependency {
    /// Subscribes to change notifications.
    fn subscribe_changed(&self, callback: ChangeCallback<()>) -> SubscriptionId;

    /// Unsubscribes by ID.
    fn unsubscribe_changed(&self, id: SubscriptionId) -> bool;

    /// Address identifying the underlying observable, used to deduplicate
    /// reads of the same value.
    fn identity(&self) -> *const ();
}

/// A readable value with change notification.
pub trait Scalar<T>: Dependency {
    /// Returns the current value.
    fn get(&self) -> T;
}

struct VarCell<T> {
    value: RefCell<T>,
    notifier: Notifier<()>,
}

/// Shared reactive value. Clones refer to the same value.
pub struct Var<T> {
    cell: Rc<VarCell<T>>,
}

impl<T> Clone for Var<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Var<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Var").field(&*self.cell.value.borrow()).finish()
    }
}

impl<T: Default> Default for Var<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Var<T> {
    /// Creates a value holder.
    pub fn new(value: T) -> Self {
        Self {
            cell: Rc::new(VarCell {
                value: RefCell::new(value),
                notifier: Notifier::new(),
            }),
        }
    }

    /// Runs `f` over the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.cell.value.borrow())
    }

    /// Stores `value` and notifies subscribers unconditionally.
    pub fn replace(&self, value: T) -> Result<T> {
        let old = self.cell.value.replace(value);
        self.cell.notifier.notify(&())?;
        Ok(old)
    }

    /// Returns true if both handles refer to the same value.
    #[inline]
    pub fn ptr_eq(&self, other: &Var<T>) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self, callback: ChangeCallback<()>) -> SubscriptionId {
        self.cell.notifier.subscribe(callback)
    }

    /// Unsubscribes by ID.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.cell.notifier.unsubscribe(id)
    }

    /// Returns the number of subscribers.
    #[inline]
    pub fn subscriber_count(&self) -> usize {
        self.cell.notifier.len()
    }
}

impl<T: Clone> Var<T> {
    /// Returns a clone of the current value.
    pub fn get(&self) -> T {
        self.cell.value.borrow().clone()
    }
}

impl<T: PartialEq> Var<T> {
    /// Stores `value`. Subscribers are notified only if it differs from
    /// the current value.
    pub fn set(&self, value: T) -> Result<()> {
        if *self.cell.value.borrow() == value {
            return Ok(());
        }
        *self.cell.value.borrow_mut() = value;
        self.cell.notifier.notify(&())
    }

    /// Updates the value in place, notifying if it changed.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let next = f(&self.cell.value.borrow());
        self.set(next)
    }
}

impl<T: 'static> Dependency for Var<T> {
    fn subscribe_changed(&self, callback: ChangeCallback<()>) -> SubscriptionId {
        self.subscribe(callback)
    }

    fn unsubscribe_changed(&self, id: SubscriptionId) -> bool {
        self.unsubscribe(id)
    }

    fn identity(&self) -> *const () {
        Rc::as_ptr(&self.cell) as *const ()
    }
}

impl<T: Clone + 'static> Scalar<T> for Var<T> {
    fn get(&self) -> T {
        Var::get(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::callback;
    use alloc::string::String;

    fn counted<T: 'static>(var: &Var<T>) -> Rc<RefCell<u32>> {
        let count = Rc::new(RefCell::new(0));
        let inner = count.clone();
        var.subscribe_changed(callback(move |_| {
            *inner.borrow_mut() += 1;
            Ok(())
        }));
        count
    }

    #[test]
    fn test_get_set() {
        let var = Var::new(1);
        let count = counted(&var);

        var.set(2).unwrap();
        assert_eq!(var.get(), 2);
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_set_same_value_is_silent() {
        let var = Var::new(5);
        let count = counted(&var);
        var.set(5).unwrap();
        var.update(|v| v + 0).unwrap();
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn test_replace_always_notifies() {
        let var = Var::new(5);
        let count = counted(&var);
        assert_eq!(var.replace(5), Ok(5));
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_clones_share_value() {
        let a = Var::new(String::from("x"));
        let b = a.clone();
        b.set(String::from("y")).unwrap();
        assert_eq!(a.get(), "y");
        assert!(a.ptr_eq(&b));
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_subscriber_can_read_value() {
        let var = Var::new(1);
        let seen = Rc::new(RefCell::new(0));
        let (reader, sink) = (var.clone(), seen.clone());
        var.subscribe_changed(callback(move |_| {
            *sink.borrow_mut() = reader.get();
            Ok(())
        }));
        var.set(3).unwrap();
        assert_eq!(*seen.borrow(), 3);
    }
}
