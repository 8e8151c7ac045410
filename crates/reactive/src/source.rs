//! Mutable source collections.

use crate::collection::{CollectionCallback, IncrementalCollection, ObservableCollection};
use crate::output::OutputBuffer;
use crate::subscription::SubscriptionId;
use alloc::rc::Rc;
use alloc::vec::Vec;
use rivulet_core::Result;

/// A mutable, observable list. The root of every dependency graph.
///
/// Every mutation applies to the content first, flips the change marker and
/// then notifies subscribers synchronously. An error returned by a
/// subscriber is returned from the mutating call; the mutation itself is
/// not rolled back.
///
/// # Example
///
/// ```ignore
/// use rivulet_reactive::SourceList;
///
/// let list = SourceList::from_vec(vec![1, 2, 3]);
/// list.push(4)?;
/// list.move_item(0, 3)?;
/// assert_eq!(list.to_vec(), vec![2, 3, 4, 1]);
/// ```
pub struct SourceList<T> {
    buffer: OutputBuffer<T>,
}

impl<T: Clone + 'static> SourceList<T> {
    /// Creates an empty shared list.
    pub fn new() -> Rc<Self> {
        Self::from_vec(Vec::new())
    }

    /// Creates a shared list holding `items`.
    pub fn from_vec(items: Vec<T>) -> Rc<Self> {
        Rc::new(Self {
            buffer: OutputBuffer::from_vec(items),
        })
    }

    /// Appends an item.
    pub fn push(&self, item: T) -> Result<()> {
        self.buffer.insert_item(self.buffer.len(), item)
    }

    /// Inserts an item at `index`.
    pub fn insert(&self, index: usize, item: T) -> Result<()> {
        self.buffer.insert_item(index, item)
    }

    /// Inserts several items and emits them as one notification.
    pub fn insert_many(&self, index: usize, items: Vec<T>) -> Result<()> {
        self.buffer.insert_many(index, items)
    }

    /// Removes and returns the item at `index`.
    pub fn remove(&self, index: usize) -> Result<T> {
        self.buffer.remove_item(index)
    }

    /// Replaces the item at `index` and returns the old one.
    pub fn replace(&self, index: usize, item: T) -> Result<T> {
        self.buffer.set_item(index, item)
    }

    /// Moves the item at `old_index` to `new_index`.
    pub fn move_item(&self, old_index: usize, new_index: usize) -> Result<()> {
        self.buffer.move_item(old_index, new_index)
    }

    /// Removes every item and emits a Reset.
    pub fn clear(&self) -> Result<()> {
        self.buffer.reset_items(Vec::new())
    }

    /// Replaces the whole content and emits a Reset.
    pub fn reset(&self, items: Vec<T>) -> Result<()> {
        self.buffer.reset_items(items)
    }

    /// Returns the number of subscribers.
    #[inline]
    pub fn subscriber_count(&self) -> usize {
        self.buffer.subscriber_count()
    }
}

impl<T: Clone> ObservableCollection<T> for SourceList<T> {
    fn len(&self) -> usize {
        self.buffer.len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.buffer.get(index)
    }

    fn to_vec(&self) -> Vec<T> {
        self.buffer.to_vec()
    }

    fn subscribe(&self, callback: CollectionCallback<T>) -> SubscriptionId {
        self.buffer.subscribe(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.buffer.unsubscribe(id)
    }

    fn change_marker(&self) -> Option<bool> {
        self.buffer.change_marker()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::callback;
    use alloc::vec;
    use core::cell::RefCell;
    use rivulet_core::{ChangeAction, CollectionChange};

    #[test]
    fn test_mutations() {
        let list = SourceList::from_vec(vec![1, 2, 3]);
        list.push(4).unwrap();
        list.insert(0, 0).unwrap();
        assert_eq!(list.remove(2), Ok(2));
        assert_eq!(list.replace(0, 9), Ok(0));
        list.move_item(0, 3).unwrap();
        assert_eq!(list.to_vec(), vec![1, 3, 4, 9]);
        assert_eq!(list.get(3), Some(9));
    }

    #[test]
    fn test_notifications() {
        let list = SourceList::new();
        let actions = Rc::new(RefCell::new(Vec::new()));
        let sink = actions.clone();
        list.subscribe(callback(move |change: &CollectionChange<u8>| {
            sink.borrow_mut().push(change.action());
            Ok(())
        }));

        list.push(1).unwrap();
        list.push(2).unwrap();
        list.move_item(1, 0).unwrap();
        list.replace(0, 5).unwrap();
        list.remove(1).unwrap();
        list.clear().unwrap();

        assert_eq!(
            *actions.borrow(),
            vec![
                ChangeAction::Add,
                ChangeAction::Add,
                ChangeAction::Move,
                ChangeAction::Replace,
                ChangeAction::Remove,
                ChangeAction::Reset,
            ]
        );
        assert!(list.is_empty());
    }

    #[test]
    fn test_reset_replaces_content() {
        let list = SourceList::from_vec(vec!['a']);
        list.reset(vec!['b', 'c']).unwrap();
        assert_eq!(list.to_vec(), vec!['b', 'c']);
    }
}
