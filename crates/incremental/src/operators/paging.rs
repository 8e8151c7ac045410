//! Incremental paging.

use super::concatenating::rewrite;
use crate::binding::{source_item, SourceBinding};
use crate::computation::Computation;
use crate::gate::{Phase, PropagationGate};
use crate::options::{OperatorOptions, Param, ParamSlot, SourceParam};
use alloc::rc::{Rc, Weak};
use alloc::vec;
use alloc::vec::Vec;
use core::cell::Cell;
use rivulet_core::{CollectionChange, Error, Result};
use rivulet_reactive::{
    callback, ChangeCallback, CollectionCallback, Edit, IncrementalCollection, ObservableCollection,
    OutputBuffer, SharedCollection, SubscriptionId, Var,
};

const OPERATOR: &str = "Paging";

/// The page currently shown. Pages are numbered from one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Window {
    size: usize,
    page: usize,
}

impl Window {
    #[inline]
    fn lower(&self) -> usize {
        self.size * (self.page - 1)
    }

    #[inline]
    fn upper(&self) -> usize {
        self.lower() + self.size
    }

    #[inline]
    fn contains(&self, index: usize) -> bool {
        index >= self.lower() && index < self.upper()
    }

    /// Source range shown for a source of `len` items.
    fn range(&self, len: usize) -> core::ops::Range<usize> {
        self.lower().min(len)..self.upper().min(len)
    }
}

fn page_count(len: usize, size: usize) -> usize {
    len.div_ceil(size)
}

/// One page of a source collection.
///
/// Shows the items `size * (page - 1) .. size * page` of the source. Page
/// size and current page may follow reactive values; changing either
/// rewrites the window in place. When a removal empties the last page, the
/// operator steps back one page.
///
/// A page set through `set_current_page` is stored as the page shown, so
/// clamping and stepping back overwrite it. A page bound to a reactive
/// value is only read.
///
/// # Example
///
/// ```ignore
/// let source = SourceList::from_vec(vec![1, 2, 3, 4, 5]);
/// let page = Paging::new(source.clone(), 2, 2)?;
/// assert_eq!(page.to_vec(), vec![3, 4]);
/// source.remove(0)?;
/// assert_eq!(page.to_vec(), vec![4, 5]);
/// ```
pub struct Paging<T> {
    binding: SourceBinding<T>,
    page_size: ParamSlot<usize>,
    requested_page: ParamSlot<usize>,
    gate: PropagationGate,
    window: Cell<Window>,
    page_count: Var<usize>,
    shown_page: Var<usize>,
    output: OutputBuffer<T>,
    this: Weak<Self>,
}

impl<T: Clone + 'static> Paging<T> {
    /// Shows page `current_page` of `source`, `page_size` items per page.
    pub fn new(
        source: impl Into<SourceParam<T>>,
        page_size: impl Into<Param<usize>>,
        current_page: impl Into<Param<usize>>,
    ) -> Result<Rc<Self>> {
        Self::with_options(source, page_size, current_page, OperatorOptions::default())
    }

    /// Creates a pager with explicit options.
    pub fn with_options(
        source: impl Into<SourceParam<T>>,
        page_size: impl Into<Param<usize>>,
        current_page: impl Into<Param<usize>>,
        options: OperatorOptions,
    ) -> Result<Rc<Self>> {
        let page_size = page_size.into().into_slot();
        let size = checked_size(page_size.get())?;
        let this = Rc::new_cyclic(|weak| Self {
            binding: SourceBinding::new(source.into()),
            page_size,
            requested_page: current_page.into().into_slot(),
            gate: PropagationGate::new(OPERATOR, options.diagnostics.clone()),
            window: Cell::new(Window { size, page: 1 }),
            page_count: Var::new(0),
            shown_page: Var::new(1),
            output: OutputBuffer::with_capacity(size),
            this: weak.clone(),
        });
        this.binding.watch_param(this.rebind_callback());
        this.page_size.watch(this.repage_callback());
        this.requested_page.watch(this.repage_callback());
        this.attach(false)?;
        Ok(this)
    }

    /// Returns the number of items per page.
    pub fn page_size(&self) -> usize {
        self.window.get().size
    }

    /// Changes the page size. Fails if the size is zero or follows a
    /// reactive value.
    pub fn set_page_size(&self, size: usize) -> Result<()> {
        checked_size(size)?;
        self.page_size.set("page size", size)
    }

    /// Returns the page shown, after clamping.
    pub fn current_page(&self) -> usize {
        self.window.get().page
    }

    /// Shows another page. Pages past the last one show the last page.
    pub fn set_current_page(&self, page: usize) -> Result<()> {
        self.requested_page.set("current page", page)
    }

    /// The number of pages, kept current as the source changes.
    pub fn page_count(&self) -> Var<usize> {
        self.page_count.clone()
    }

    /// The page shown, kept current through clamping and stepping back.
    pub fn shown_page(&self) -> Var<usize> {
        self.shown_page.clone()
    }

    /// Returns the source collection.
    pub fn source(&self) -> Result<SharedCollection<T>> {
        self.binding.source()
    }

    fn source_callback(&self) -> CollectionCallback<T> {
        let weak = self.this.clone();
        callback(move |change: &CollectionChange<T>| match weak.upgrade() {
            Some(this) => this.on_source_change(change),
            None => Ok(()),
        })
    }

    fn rebind_callback(&self) -> ChangeCallback<()> {
        let weak = self.this.clone();
        callback(move |_: &()| match weak.upgrade() {
            Some(this) => this.attach(true),
            None => Ok(()),
        })
    }

    fn repage_callback(&self) -> ChangeCallback<()> {
        let weak = self.this.clone();
        callback(move |_: &()| match weak.upgrade() {
            Some(this) => this.repage(),
            None => Ok(()),
        })
    }

    /// The window the parameters ask for, with the page clamped to the
    /// pages a source of `len` items has.
    fn requested(&self, len: usize) -> Result<Window> {
        let size = checked_size(self.page_size.get())?;
        let last = page_count(len, size).max(1);
        Ok(Window {
            size,
            page: self.requested_page.get().clamp(1, last),
        })
    }

    fn attach(&self, notify: bool) -> Result<()> {
        let source = self.binding.attach(self.source_callback());
        tracing::debug!(operator = OPERATOR, len = source.len(), "attached source");
        self.gate
            .initialize(source.change_marker(), || self.rebuild(&source, notify))?;
        self.publish(source.len())?;
        self.settle()
    }

    fn rebuild(&self, source: &SharedCollection<T>, notify: bool) -> Result<()> {
        let len = source.len();
        let window = self.requested(len)?;
        self.window.set(window);
        let items = window_items(source, window.range(len))?;
        if notify {
            self.output.reset_items(items)
        } else {
            self.output.load(items);
            Ok(())
        }
    }

    fn repage(&self) -> Result<()> {
        if self.gate.should_defer(self.binding.marker()) {
            self.gate.defer_refresh();
            return Ok(());
        }
        if self.move_window()? {
            self.settle()?;
        }
        Ok(())
    }

    /// Moves the window to the requested page. Returns false if it is
    /// already there.
    fn move_window(&self) -> Result<bool> {
        let source = self.binding.source()?;
        let len = source.len();
        let window = self.requested(len)?;
        if window == self.window.get() {
            return Ok(false);
        }
        tracing::debug!(operator = OPERATOR, size = window.size, page = window.page, "repaging");
        if self.gate.phase() == Phase::Faulted {
            self.gate
                .initialize(source.change_marker(), || self.rebuild(&source, true))?;
        } else {
            self.gate.value_change(|| self.shift(&source, window))?;
        }
        self.publish(len)?;
        Ok(true)
    }

    fn settle(&self) -> Result<()> {
        self.gate
            .settle_with(|_| Ok(()), || self.move_window().map(|_| ()))
    }

    /// Rewrites the output in place to show `window`.
    fn shift(&self, source: &SharedCollection<T>, window: Window) -> Result<()> {
        self.window.set(window);
        let items = window_items(source, window.range(source.len()))?;
        let mut edits = Vec::with_capacity(window.size);
        rewrite(0, self.output.len(), items, &mut edits);
        self.output.apply_all(edits)
    }

    /// Publishes the page count and the page shown. A fixed page takes the
    /// page shown, unless a newer request is still queued.
    fn publish(&self, len: usize) -> Result<()> {
        let window = self.window.get();
        self.page_count.set(page_count(len, window.size))?;
        if !self.requested_page.is_bound() && !self.gate.refresh_pending() {
            self.requested_page.set("current page", window.page)?;
        }
        self.shown_page.set(window.page)
    }

    fn on_source_change(&self, change: &CollectionChange<T>) -> Result<()> {
        let source = self.binding.source()?;
        self.gate.structural(source.change_marker(), change, || match change {
            CollectionChange::Add { index, items } => self.insert(&source, *index, &items[0]),
            CollectionChange::Remove { index, .. } => self.remove(&source, *index),
            CollectionChange::Replace {
                index, new_items, ..
            } => self.replace(*index, &new_items[0]),
            CollectionChange::Move {
                old_index,
                new_index,
                items,
            } => self.move_item(&source, *old_index, *new_index, &items[0]),
            CollectionChange::Reset => self.rebuild(&source, true),
        })?;
        self.publish(source.len())?;
        self.settle()
    }

    fn insert(&self, source: &SharedCollection<T>, index: usize, item: &T) -> Result<()> {
        let window = self.window.get();
        let mut edits = Vec::with_capacity(2);
        if index < window.lower() {
            // the item before the window shifts in at the front
            edits.push(Edit::Insert {
                index: 0,
                item: source_item(source, window.lower())?,
            });
        } else if window.contains(index) {
            edits.push(Edit::Insert {
                index: index - window.lower(),
                item: item.clone(),
            });
        } else {
            return Ok(());
        }
        if self.output.len() + 1 > window.size {
            edits.push(Edit::Remove { index: window.size });
        }
        self.output.apply_all(edits)
    }

    fn remove(&self, source: &SharedCollection<T>, index: usize) -> Result<()> {
        let window = self.window.get();
        if index < window.lower() {
            if self.output.len() > 0 {
                self.output.remove_item(0)?;
            }
        } else if window.contains(index) {
            self.output.remove_item(index - window.lower())?;
        } else {
            return Ok(());
        }

        let len = source.len();
        if self.output.len() < window.size && len >= window.upper() {
            self.output
                .insert_item(window.size - 1, source_item(source, window.upper() - 1)?)
        } else if self.output.len() == 0 && window.page > 1 {
            let previous = Window {
                page: window.page - 1,
                ..window
            };
            tracing::debug!(operator = OPERATOR, page = previous.page, "last page emptied");
            self.shift(source, previous)
        } else {
            Ok(())
        }
    }

    fn replace(&self, index: usize, item: &T) -> Result<()> {
        let window = self.window.get();
        if !window.contains(index) {
            return Ok(());
        }
        self.output
            .set_item(index - window.lower(), item.clone())
            .map(|_| ())
    }

    fn move_item(
        &self,
        source: &SharedCollection<T>,
        old_index: usize,
        new_index: usize,
        item: &T,
    ) -> Result<()> {
        if old_index == new_index {
            return Ok(());
        }
        let window = self.window.get();
        let (lower, upper, size) = (window.lower(), window.upper(), window.size);
        let edits = match (window.contains(old_index), window.contains(new_index)) {
            (true, true) => vec![Edit::Move {
                old_index: old_index - lower,
                new_index: new_index - lower,
            }],
            (false, true) if old_index < lower => vec![
                Edit::Remove { index: 0 },
                Edit::Insert {
                    index: new_index - lower,
                    item: item.clone(),
                },
            ],
            (false, true) => vec![
                Edit::Insert {
                    index: new_index - lower,
                    item: item.clone(),
                },
                Edit::Remove { index: size },
            ],
            (true, false) if new_index < lower => vec![
                Edit::Remove {
                    index: old_index - lower,
                },
                Edit::Insert {
                    index: 0,
                    item: source_item(source, lower)?,
                },
            ],
            (true, false) => vec![
                Edit::Remove {
                    index: old_index - lower,
                },
                Edit::Insert {
                    index: size - 1,
                    item: source_item(source, upper - 1)?,
                },
            ],
            (false, false) if old_index < lower && new_index >= upper => vec![
                Edit::Remove { index: 0 },
                Edit::Insert {
                    index: size - 1,
                    item: source_item(source, upper - 1)?,
                },
            ],
            (false, false) if old_index >= upper && new_index < lower => vec![
                Edit::Insert {
                    index: 0,
                    item: source_item(source, lower)?,
                },
                Edit::Remove { index: size },
            ],
            (false, false) => return Ok(()),
        };
        self.output.apply_all(edits)
    }
}

fn checked_size(size: usize) -> Result<usize> {
    if size == 0 {
        return Err(Error::configuration("page size must be at least one"));
    }
    Ok(size)
}

fn window_items<T: Clone>(source: &SharedCollection<T>, range: core::ops::Range<usize>) -> Result<Vec<T>> {
    range.map(|index| source_item(source, index)).collect()
}

impl<T: Clone + PartialEq + 'static> Computation for Paging<T> {
    fn operator(&self) -> &'static str {
        OPERATOR
    }

    fn is_consistent(&self) -> bool {
        self.gate.is_consistent()
    }

    fn validate_consistency(&self) -> Result<()> {
        let violation = |tag| Error::consistency_violation(OPERATOR, tag);
        let source = self.binding.source()?.to_vec();
        let window = self.window.get();

        if window.size != self.page_size.get() {
            return Err(violation(1));
        }
        let pages = page_count(source.len(), window.size);
        if window.page < 1 || window.page > pages.max(1) {
            return Err(violation(2));
        }
        if self.page_count.get() != pages {
            return Err(violation(3));
        }
        let expected = &source[window.range(source.len())];
        if self.output.with_items(|items| items != expected) {
            return Err(violation(4));
        }
        Ok(())
    }

    fn subscribe_consistency_restored(&self, callback: ChangeCallback<()>) -> SubscriptionId {
        self.gate.subscribe_restored(callback)
    }

    fn unsubscribe_consistency_restored(&self, id: SubscriptionId) -> bool {
        self.gate.unsubscribe_restored(id)
    }
}

impl<T: Clone> ObservableCollection<T> for Paging<T> {
    fn len(&self) -> usize {
        self.output.len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.output.get(index)
    }

    fn to_vec(&self) -> Vec<T> {
        self.output.to_vec()
    }

    fn subscribe(&self, callback: CollectionCallback<T>) -> SubscriptionId {
        self.output.subscribe(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.output.unsubscribe(id)
    }

    fn change_marker(&self) -> Option<bool> {
        self.output.change_marker()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;
    use rivulet_core::ChangeAction;
    use rivulet_reactive::SourceList;

    fn recorded<C: ObservableCollection<i32>>(collection: &C) -> Rc<RefCell<Vec<ChangeAction>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        collection.subscribe(callback(move |change: &CollectionChange<i32>| {
            sink.borrow_mut().push(change.action());
            Ok(())
        }));
        log
    }

    #[test]
    fn test_removal_before_window_shifts_page() {
        let source = SourceList::from_vec(vec![1, 2, 3, 4, 5]);
        let page = Paging::new(source.clone(), 2, 2).unwrap();
        assert_eq!(page.to_vec(), vec![3, 4]);
        assert_eq!(page.page_count().get(), 3);

        source.remove(0).unwrap();
        assert_eq!(page.to_vec(), vec![4, 5]);
        assert_eq!(page.page_count().get(), 2);
        page.validate_consistency().unwrap();
    }

    #[test]
    fn test_insertions() {
        let source = SourceList::from_vec(vec![1, 2, 3, 4, 5]);
        let page = Paging::new(source.clone(), 2, 2).unwrap();

        source.insert(0, 0).unwrap();
        assert_eq!(page.to_vec(), vec![2, 3]);
        source.insert(3, 9).unwrap();
        assert_eq!(page.to_vec(), vec![2, 9]);
        source.push(7).unwrap();
        assert_eq!(page.to_vec(), vec![2, 9]);
        assert_eq!(page.page_count().get(), 4);
        page.validate_consistency().unwrap();
    }

    #[test]
    fn test_partial_last_page() {
        let source = SourceList::from_vec(vec![1, 2, 3, 4, 5]);
        let page = Paging::new(source.clone(), 2, 3).unwrap();
        assert_eq!(page.to_vec(), vec![5]);

        source.push(6).unwrap();
        assert_eq!(page.to_vec(), vec![5, 6]);
        source.remove(5).unwrap();
        source.remove(1).unwrap();
        assert_eq!(page.to_vec(), vec![4, 5]);
        assert_eq!(page.current_page(), 2);
        page.validate_consistency().unwrap();
    }

    #[test]
    fn test_removal_emptying_last_page_steps_back() {
        let source = SourceList::from_vec(vec![1, 2, 3]);
        let page = Paging::new(source.clone(), 2, 2).unwrap();
        assert_eq!(page.to_vec(), vec![3]);

        source.remove(2).unwrap();
        assert_eq!(page.current_page(), 1);
        assert_eq!(page.to_vec(), vec![1, 2]);
        page.validate_consistency().unwrap();

        source.clear().unwrap();
        assert_eq!(page.current_page(), 1);
        assert!(page.to_vec().is_empty());
        page.validate_consistency().unwrap();
    }

    #[test]
    fn test_stepped_back_page_can_be_requested_again() {
        let source = SourceList::from_vec(vec![1, 2, 3, 4, 5, 6]);
        let page = Paging::new(source.clone(), 2, 3).unwrap();
        let shown = page.shown_page();
        assert_eq!(shown.get(), 3);

        source.remove(5).unwrap();
        source.remove(4).unwrap();
        assert_eq!(page.to_vec(), vec![3, 4]);
        assert_eq!(shown.get(), 2);

        source.push(5).unwrap();
        source.push(6).unwrap();
        assert_eq!(page.to_vec(), vec![3, 4]);
        page.set_current_page(3).unwrap();
        assert_eq!(page.to_vec(), vec![5, 6]);
        assert_eq!(shown.get(), 3);
        page.validate_consistency().unwrap();
    }

    #[test]
    fn test_clamped_page_survives_reset() {
        let source = SourceList::from_vec(vec![1, 2]);
        let page = Paging::new(source.clone(), 1, 1).unwrap();
        page.set_current_page(5).unwrap();
        assert_eq!(page.current_page(), 2);
        assert_eq!(page.to_vec(), vec![2]);

        for item in 3..=5 {
            source.push(item).unwrap();
        }
        source.reset(vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(page.to_vec(), vec![2]);

        page.set_current_page(5).unwrap();
        assert_eq!(page.current_page(), 5);
        assert_eq!(page.to_vec(), vec![5]);
        page.validate_consistency().unwrap();
    }

    #[test]
    fn test_page_change_during_structural_edit_is_deferred() {
        let source = SourceList::from_vec(vec![1, 2, 3, 4]);
        let requested = Var::new(1);

        // subscribed ahead of the pager, so it runs before the pager has
        // seen the edit
        let flip = requested.clone();
        source.subscribe(callback(move |_: &CollectionChange<i32>| flip.update(|page| 3 - page)));

        let page = Paging::new(source.clone(), 2, requested.clone()).unwrap();
        assert_eq!(page.to_vec(), vec![1, 2]);

        source.insert(0, 0).unwrap();
        assert_eq!(requested.get(), 2);
        assert_eq!(page.to_vec(), vec![2, 3]);
        assert!(page.is_consistent());
        page.validate_consistency().unwrap();

        source.remove(4).unwrap();
        assert_eq!(page.to_vec(), vec![0, 1]);
        page.validate_consistency().unwrap();
    }

    #[test]
    fn test_size_change_during_structural_edit_is_deferred() {
        let source = SourceList::from_vec(vec![1, 2, 3, 4, 5, 6]);
        let size = Var::new(2);
        let grow = size.clone();
        source.subscribe(callback(move |_: &CollectionChange<i32>| grow.update(|size| size + 1)));

        let page = Paging::new(source.clone(), size.clone(), 2).unwrap();
        assert_eq!(page.to_vec(), vec![3, 4]);

        source.remove(0).unwrap();
        assert_eq!(page.page_size(), 3);
        assert_eq!(page.to_vec(), vec![5, 6]);
        assert_eq!(page.page_count().get(), 2);
        page.validate_consistency().unwrap();
    }

    #[test]
    fn test_replace_inside_and_outside_window() {
        let source = SourceList::from_vec(vec![1, 2, 3, 4]);
        let page = Paging::new(source.clone(), 2, 1).unwrap();
        let log = recorded(&*page);

        source.replace(3, 40).unwrap();
        source.replace(1, 20).unwrap();
        assert_eq!(page.to_vec(), vec![1, 20]);
        assert_eq!(*log.borrow(), vec![ChangeAction::Replace]);
    }

    #[test]
    fn test_moves() {
        let source = SourceList::from_vec(vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let page = Paging::new(source.clone(), 3, 2).unwrap();
        assert_eq!(page.to_vec(), vec![4, 5, 6]);

        // within the window
        source.move_item(3, 5).unwrap();
        assert_eq!(page.to_vec(), vec![5, 6, 4]);
        page.validate_consistency().unwrap();

        // from before the window into it
        source.move_item(0, 4).unwrap();
        assert_eq!(page.to_vec(), vec![6, 1, 4]);
        page.validate_consistency().unwrap();

        // from after the window into it
        source.move_item(7, 3).unwrap();
        assert_eq!(page.to_vec(), vec![8, 6, 1]);
        page.validate_consistency().unwrap();

        // out of the window, both ways
        source.move_item(4, 0).unwrap();
        assert_eq!(page.to_vec(), vec![5, 8, 1]);
        source.move_item(3, 7).unwrap();
        assert_eq!(page.to_vec(), vec![8, 1, 4]);
        page.validate_consistency().unwrap();

        // across the window, both ways
        source.move_item(0, 7).unwrap();
        assert_eq!(page.to_vec(), vec![1, 4, 7]);
        source.move_item(7, 0).unwrap();
        assert_eq!(page.to_vec(), vec![8, 1, 4]);
        page.validate_consistency().unwrap();

        // outside, same side
        source.move_item(0, 1).unwrap();
        assert_eq!(page.to_vec(), vec![8, 1, 4]);
        page.validate_consistency().unwrap();
    }

    #[test]
    fn test_page_parameters() {
        let source = SourceList::from_vec(vec![1, 2, 3, 4, 5, 6, 7]);
        let size = Var::new(3);
        let page = Paging::new(source.clone(), size.clone(), 1).unwrap();
        assert_eq!(page.to_vec(), vec![1, 2, 3]);

        page.set_current_page(3).unwrap();
        assert_eq!(page.to_vec(), vec![7]);
        page.validate_consistency().unwrap();

        size.set(2).unwrap();
        assert_eq!(page.to_vec(), vec![5, 6]);
        assert_eq!(page.page_count().get(), 4);

        page.set_current_page(10).unwrap();
        assert_eq!(page.current_page(), 4);
        assert_eq!(page.to_vec(), vec![7]);
        page.validate_consistency().unwrap();

        assert!(page.set_page_size(4).is_err());
        assert!(size.set(0).is_err());
    }

    #[test]
    fn test_zero_page_size_is_rejected() {
        let source = SourceList::from_vec(vec![1]);
        assert!(Paging::new(source.clone(), 0, 1).is_err());

        let page = Paging::new(source, 1, 1).unwrap();
        assert!(page.set_page_size(0).is_err());
        assert_eq!(page.page_size(), 1);
    }

    #[test]
    fn test_multi_item_add_is_rejected() {
        let source = SourceList::from_vec(vec![1, 2, 3]);
        let page = Paging::new(source.clone(), 2, 1).unwrap();
        assert!(source.insert_many(0, vec![4, 5]).unwrap_err().is_unsupported());
        assert!(!page.is_consistent());

        page.set_current_page(2).unwrap();
        assert!(page.is_consistent());
        page.validate_consistency().unwrap();
    }
}
