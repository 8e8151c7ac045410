//! Generic output buffer.
//!
//! `OutputBuffer` owns the item sequence of a derived collection and its
//! subscribers. Operators compose one and drive it through the
//! `IncrementalCollection` primitives; it is read-only to everybody else.

use crate::collection::{CollectionCallback, IncrementalCollection, ObservableCollection};
use crate::subscription::{Notifier, SubscriptionId};
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use rivulet_core::{CollectionChange, Error, Result};

/// One edit to apply to an `OutputBuffer`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Edit<T> {
    Insert { index: usize, item: T },
    Remove { index: usize },
    Move { old_index: usize, new_index: usize },
    Set { index: usize, item: T },
    Reset { items: Vec<T> },
}

/// Item sequence plus subscribers of a derived collection.
pub struct OutputBuffer<T> {
    items: RefCell<Vec<T>>,
    marker: Cell<bool>,
    notifier: Notifier<CollectionChange<T>>,
}

impl<T: Clone> Default for OutputBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> OutputBuffer<T> {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Creates an empty buffer with room for `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_vec(Vec::with_capacity(capacity))
    }

    /// Creates a buffer holding `items`.
    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            items: RefCell::new(items),
            marker: Cell::new(false),
            notifier: Notifier::new(),
        }
    }

    /// Replaces the content without notifying. Used for the first
    /// materialization, before anybody can observe the buffer.
    pub fn load(&self, items: Vec<T>) {
        *self.items.borrow_mut() = items;
    }

    /// Runs `f` over the current content.
    pub fn with_items<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.items.borrow())
    }

    /// Returns the number of subscribers.
    #[inline]
    pub fn subscriber_count(&self) -> usize {
        self.notifier.len()
    }

    /// Applies one edit and emits its notification.
    pub fn apply(&self, edit: Edit<T>) -> Result<()> {
        match edit {
            Edit::Insert { index, item } => self.insert_item(index, item),
            Edit::Remove { index } => self.remove_item(index).map(|_| ()),
            Edit::Move {
                old_index,
                new_index,
            } => self.move_item(old_index, new_index),
            Edit::Set { index, item } => self.set_item(index, item).map(|_| ()),
            Edit::Reset { items } => self.reset_items(items),
        }
    }

    /// Applies edits in order, stopping at the first failure.
    pub fn apply_all(&self, edits: impl IntoIterator<Item = Edit<T>>) -> Result<()> {
        for edit in edits {
            self.apply(edit)?;
        }
        Ok(())
    }

    /// Inserts several items at once and emits a single multi-item Add.
    pub fn insert_many(&self, index: usize, new_items: Vec<T>) -> Result<()> {
        {
            let mut items = self.items.borrow_mut();
            if index > items.len() {
                return Err(Error::index_out_of_range(index, items.len()));
            }
            items.splice(index..index, new_items.iter().cloned());
        }
        self.emit(CollectionChange::Add {
            index,
            items: new_items.into_iter().collect(),
        })
    }

    fn emit(&self, change: CollectionChange<T>) -> Result<()> {
        self.marker.set(!self.marker.get());
        self.notifier.notify(&change)
    }
}

impl<T: Clone> IncrementalCollection<T> for OutputBuffer<T> {
    fn insert_item(&self, index: usize, item: T) -> Result<()> {
        {
            let mut items = self.items.borrow_mut();
            if index > items.len() {
                return Err(Error::index_out_of_range(index, items.len()));
            }
            items.insert(index, item.clone());
        }
        self.emit(CollectionChange::add(index, item))
    }

    fn remove_item(&self, index: usize) -> Result<T> {
        let item = {
            let mut items = self.items.borrow_mut();
            if index >= items.len() {
                return Err(Error::index_out_of_range(index, items.len()));
            }
            items.remove(index)
        };
        self.emit(CollectionChange::remove(index, item.clone()))?;
        Ok(item)
    }

    fn move_item(&self, old_index: usize, new_index: usize) -> Result<()> {
        let item = {
            let mut items = self.items.borrow_mut();
            let len = items.len();
            if old_index >= len {
                return Err(Error::index_out_of_range(old_index, len));
            }
            if new_index >= len {
                return Err(Error::index_out_of_range(new_index, len));
            }
            if old_index == new_index {
                return Ok(());
            }
            let item = items.remove(old_index);
            items.insert(new_index, item.clone());
            item
        };
        self.emit(CollectionChange::moved(old_index, new_index, item))
    }

    fn set_item(&self, index: usize, item: T) -> Result<T> {
        let old = {
            let mut items = self.items.borrow_mut();
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or(Error::index_out_of_range(index, len))?;
            core::mem::replace(slot, item.clone())
        };
        self.emit(CollectionChange::replace(index, old.clone(), item))?;
        Ok(old)
    }

    fn reset_items(&self, items: Vec<T>) -> Result<()> {
        *self.items.borrow_mut() = items;
        self.emit(CollectionChange::Reset)
    }
}

impl<T: Clone> ObservableCollection<T> for OutputBuffer<T> {
    fn len(&self) -> usize {
        self.items.borrow().len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.items.borrow().get(index).cloned()
    }

    fn to_vec(&self) -> Vec<T> {
        self.items.borrow().clone()
    }

    fn subscribe(&self, callback: CollectionCallback<T>) -> SubscriptionId {
        self.notifier.subscribe(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    fn change_marker(&self) -> Option<bool> {
        Some(self.marker.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::callback;
    use alloc::rc::Rc;
    use alloc::vec;

    fn recorded(buffer: &OutputBuffer<char>) -> Rc<RefCell<Vec<CollectionChange<char>>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        buffer.subscribe(callback(move |change: &CollectionChange<char>| {
            sink.borrow_mut().push(change.clone());
            Ok(())
        }));
        log
    }

    #[test]
    fn test_primitives_emit_matching_changes() {
        let buffer = OutputBuffer::from_vec(vec!['a', 'b']);
        let log = recorded(&buffer);

        buffer.insert_item(1, 'x').unwrap();
        buffer.move_item(0, 2).unwrap();
        assert_eq!(buffer.set_item(0, 'y'), Ok('x'));
        assert_eq!(buffer.remove_item(1), Ok('b'));

        assert_eq!(buffer.to_vec(), vec!['y', 'a']);
        assert_eq!(
            *log.borrow(),
            vec![
                CollectionChange::add(1, 'x'),
                CollectionChange::moved(0, 2, 'a'),
                CollectionChange::replace(0, 'x', 'y'),
                CollectionChange::remove(1, 'b'),
            ]
        );
    }

    #[test]
    fn test_marker_flips_per_edit() {
        let buffer = OutputBuffer::new();
        let before = buffer.change_marker();
        buffer.insert_item(0, 'a').unwrap();
        assert_ne!(buffer.change_marker(), before);
        buffer.insert_item(0, 'b').unwrap();
        assert_eq!(buffer.change_marker(), before);
    }

    #[test]
    fn test_marker_visible_inside_callback() {
        let buffer = Rc::new(OutputBuffer::new());
        let seen = Rc::new(Cell::new(None));
        let weak = Rc::downgrade(&buffer);
        let seen_inner = seen.clone();
        buffer.subscribe(callback(move |_: &CollectionChange<char>| {
            seen_inner.set(weak.upgrade().and_then(|b| b.change_marker()));
            Ok(())
        }));
        buffer.insert_item(0, 'a').unwrap();
        assert_eq!(seen.get(), Some(true));
    }

    #[test]
    fn test_out_of_range_edits() {
        let buffer = OutputBuffer::from_vec(vec!['a']);
        assert!(buffer.insert_item(2, 'b').is_err());
        assert!(buffer.remove_item(1).is_err());
        assert!(buffer.move_item(0, 1).is_err());
        assert!(buffer.set_item(3, 'c').is_err());
        assert_eq!(buffer.to_vec(), vec!['a']);
    }

    #[test]
    fn test_apply_edits_and_reset() {
        let buffer = OutputBuffer::new();
        let log = recorded(&buffer);
        buffer
            .apply_all(vec![
                Edit::Insert { index: 0, item: 'a' },
                Edit::Insert { index: 1, item: 'b' },
                Edit::Reset { items: vec!['z'] },
            ])
            .unwrap();
        assert_eq!(buffer.to_vec(), vec!['z']);
        assert_eq!(log.borrow().last(), Some(&CollectionChange::Reset));
    }

    #[test]
    fn test_insert_many_emits_one_notification() {
        let buffer = OutputBuffer::from_vec(vec!['a']);
        let log = recorded(&buffer);
        buffer.insert_many(1, vec!['b', 'c']).unwrap();
        assert_eq!(buffer.len(), 3);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(log.borrow()[0].item_count(), 2);
    }
}
