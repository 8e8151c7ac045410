//! Observable collection contracts.

use crate::subscription::{ChangeCallback, SubscriptionId};
use alloc::rc::Rc;
use alloc::vec::Vec;
use rivulet_core::{CollectionChange, Result};

/// Callback receiving the structural edits of a collection.
pub type CollectionCallback<T> = ChangeCallback<CollectionChange<T>>;

/// An ordered sequence that emits a `CollectionChange` for every edit.
///
/// Items are handed out by clone; collections of shared items use `Rc`
/// handles so that derived collections share rather than copy them.
pub trait ObservableCollection<T> {
    /// Returns the number of items.
    fn len(&self) -> usize;

    /// Returns true if the collection is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the item at `index`.
    fn get(&self, index: usize) -> Option<T>;

    /// Returns the current content.
    fn to_vec(&self) -> Vec<T>;

    /// Subscribes to structural edits.
    fn subscribe(&self, callback: CollectionCallback<T>) -> SubscriptionId;

    /// Unsubscribes by ID.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Alternating marker flipped before each emitted edit, if supported.
    fn change_marker(&self) -> Option<bool> {
        None
    }
}

/// Shared handle to any observable collection.
pub type SharedCollection<T> = Rc<dyn ObservableCollection<T>>;

/// Edit primitives a derived collection is maintained through.
///
/// Each call applies one edit to the content and emits exactly one
/// matching notification.
pub trait IncrementalCollection<T> {
    /// Inserts `item` at `index`.
    fn insert_item(&self, index: usize, item: T) -> Result<()>;

    /// Removes and returns the item at `index`.
    fn remove_item(&self, index: usize) -> Result<T>;

    /// Moves the item at `old_index` to `new_index`.
    fn move_item(&self, old_index: usize, new_index: usize) -> Result<()>;

    /// Replaces the item at `index` and returns the old one.
    fn set_item(&self, index: usize, item: T) -> Result<T>;

    /// Replaces the whole content and emits a Reset.
    fn reset_items(&self, items: Vec<T>) -> Result<()>;
}
