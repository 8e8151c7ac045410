//! Structured change notifications.
//!
//! `CollectionChange` is the single notification shape exchanged between
//! observable collections and the operators that consume them. Payloads are
//! `SmallVec`s so the common single-item case does not allocate; multi-item
//! payloads can be represented but are rejected by consumers.

use crate::error::{Error, Result};
use core::fmt;
use smallvec::{smallvec, SmallVec};

/// Items carried by one notification.
pub type ChangeItems<T> = SmallVec<[T; 1]>;

/// Kind of a structural edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeAction {
    Add,
    Remove,
    Replace,
    Move,
    Reset,
}

impl ChangeAction {
    /// Returns the action name.
    pub fn name(self) -> &'static str {
        match self {
            ChangeAction::Add => "Add",
            ChangeAction::Remove => "Remove",
            ChangeAction::Replace => "Replace",
            ChangeAction::Move => "Move",
            ChangeAction::Reset => "Reset",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One structural edit of an ordered collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CollectionChange<T> {
    /// `items` were inserted starting at `index`.
    Add { index: usize, items: ChangeItems<T> },
    /// `items` were removed starting at `index`.
    Remove { index: usize, items: ChangeItems<T> },
    /// `old_items` starting at `index` were replaced by `new_items`.
    Replace {
        index: usize,
        old_items: ChangeItems<T>,
        new_items: ChangeItems<T>,
    },
    /// `items` moved from `old_index` to `new_index`.
    Move {
        old_index: usize,
        new_index: usize,
        items: ChangeItems<T>,
    },
    /// The content changed wholesale; consumers re-read it.
    Reset,
}

impl<T> CollectionChange<T> {
    /// Single-item insertion.
    pub fn add(index: usize, item: T) -> Self {
        CollectionChange::Add {
            index,
            items: smallvec![item],
        }
    }

    /// Single-item removal.
    pub fn remove(index: usize, item: T) -> Self {
        CollectionChange::Remove {
            index,
            items: smallvec![item],
        }
    }

    /// Single-item replacement.
    pub fn replace(index: usize, old_item: T, new_item: T) -> Self {
        CollectionChange::Replace {
            index,
            old_items: smallvec![old_item],
            new_items: smallvec![new_item],
        }
    }

    /// Single-item move.
    pub fn moved(old_index: usize, new_index: usize, item: T) -> Self {
        CollectionChange::Move {
            old_index,
            new_index,
            items: smallvec![item],
        }
    }

    /// Returns the kind of this edit.
    pub fn action(&self) -> ChangeAction {
        match self {
            CollectionChange::Add { .. } => ChangeAction::Add,
            CollectionChange::Remove { .. } => ChangeAction::Remove,
            CollectionChange::Replace { .. } => ChangeAction::Replace,
            CollectionChange::Move { .. } => ChangeAction::Move,
            CollectionChange::Reset => ChangeAction::Reset,
        }
    }

    /// Returns true for a Reset.
    #[inline]
    pub fn is_reset(&self) -> bool {
        matches!(self, CollectionChange::Reset)
    }

    /// Number of items carried by this edit. Zero for a Reset.
    pub fn item_count(&self) -> usize {
        match self {
            CollectionChange::Add { items, .. }
            | CollectionChange::Remove { items, .. }
            | CollectionChange::Move { items, .. } => items.len(),
            CollectionChange::Replace {
                old_items,
                new_items,
                ..
            } => old_items.len().max(new_items.len()),
            CollectionChange::Reset => 0,
        }
    }

    /// Fails with `UnsupportedMultiItemOperation` unless this edit carries
    /// exactly one item (or is a Reset).
    pub fn ensure_single_item(&self) -> Result<()> {
        let count = self.item_count();
        match self {
            CollectionChange::Reset => Ok(()),
            CollectionChange::Replace {
                old_items,
                new_items,
                ..
            } if old_items.len() == 1 && new_items.len() == 1 => Ok(()),
            CollectionChange::Replace { .. } => {
                Err(Error::unsupported_multi_item(self.action().name(), count))
            }
            _ if count == 1 => Ok(()),
            _ => Err(Error::unsupported_multi_item(self.action().name(), count)),
        }
    }
}

impl<T: Clone> CollectionChange<T> {
    /// Returns the single item of an Add, Remove or Move, or the new item
    /// of a Replace.
    pub fn single_item(&self) -> Result<T> {
        self.ensure_single_item()?;
        match self {
            CollectionChange::Add { items, .. }
            | CollectionChange::Remove { items, .. }
            | CollectionChange::Move { items, .. } => Ok(items[0].clone()),
            CollectionChange::Replace { new_items, .. } => Ok(new_items[0].clone()),
            CollectionChange::Reset => Err(Error::invalid_operation("reset carries no item")),
        }
    }

    /// Returns the single old item of a Replace or Remove.
    pub fn single_old_item(&self) -> Result<T> {
        self.ensure_single_item()?;
        match self {
            CollectionChange::Remove { items, .. } => Ok(items[0].clone()),
            CollectionChange::Replace { old_items, .. } => Ok(old_items[0].clone()),
            _ => Err(Error::invalid_operation(alloc::format!(
                "{} carries no old item",
                self.action()
            ))),
        }
    }
}
