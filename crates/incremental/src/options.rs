//! Operator configuration and reactive parameters.

use alloc::rc::Rc;
use core::cell::Cell;
use rivulet_core::{Diagnostics, Error, Result, TieBreak};
use rivulet_reactive::{ChangeCallback, ObservableCollection, SharedCollection, SubscriptionId, Var};

/// Settings shared by every operator.
///
/// # Example
///
/// ```ignore
/// let options = OperatorOptions::new()
///     .with_capacity(1024)
///     .with_tie_break(TieBreak::Prepend);
/// ```
#[derive(Clone, Debug, Default)]
pub struct OperatorOptions {
    pub(crate) capacity: usize,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) tie_break: TieBreak,
}

impl OperatorOptions {
    /// Creates default options: no preallocation, no diagnostics, stable
    /// append among equal keys.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial capacity of the operator's registries.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Attaches a diagnostic handle.
    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Sets where new items land among equal keys.
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    #[inline]
    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }
}

/// An operator parameter: a fixed value, or bound to a reactive value.
#[derive(Clone, Debug)]
pub enum Param<T> {
    Fixed(T),
    Bound(Var<T>),
}

impl<T: Clone + 'static> Param<T> {
    /// Returns the current value.
    pub fn get(&self) -> T {
        match self {
            Param::Fixed(value) => value.clone(),
            Param::Bound(var) => var.get(),
        }
    }

    /// Returns true if the parameter follows a reactive value.
    #[inline]
    pub fn is_bound(&self) -> bool {
        matches!(self, Param::Bound(_))
    }

    /// Turns the parameter into a value holder the operator can watch.
    /// A fixed value gets a private holder that only the operator writes.
    pub(crate) fn into_slot(self) -> ParamSlot<T> {
        match self {
            Param::Fixed(value) => ParamSlot {
                var: Var::new(value),
                bound: false,
                subscription: Cell::new(None),
            },
            Param::Bound(var) => ParamSlot {
                var,
                bound: true,
                subscription: Cell::new(None),
            },
        }
    }
}

impl<T> From<Var<T>> for Param<T> {
    fn from(var: Var<T>) -> Self {
        Param::Bound(var)
    }
}

impl From<usize> for Param<usize> {
    fn from(value: usize) -> Self {
        Param::Fixed(value)
    }
}

impl From<rivulet_core::SortDirection> for Param<rivulet_core::SortDirection> {
    fn from(value: rivulet_core::SortDirection) -> Self {
        Param::Fixed(value)
    }
}

/// A parameter as held by an operator.
pub(crate) struct ParamSlot<T> {
    var: Var<T>,
    bound: bool,
    subscription: Cell<Option<SubscriptionId>>,
}

impl<T: Clone + PartialEq + 'static> ParamSlot<T> {
    #[inline]
    pub(crate) fn get(&self) -> T {
        self.var.get()
    }

    /// Returns true if the value belongs to a reactive value the caller
    /// passed in.
    #[inline]
    pub(crate) fn is_bound(&self) -> bool {
        self.bound
    }

    /// Stores a new value. Fails if the parameter is bound to a reactive
    /// value owned by somebody else.
    pub(crate) fn set(&self, name: &str, value: T) -> Result<()> {
        if self.bound {
            return Err(Error::configuration(alloc::format!(
                "{} is bound to a reactive value and cannot be set directly",
                name
            )));
        }
        self.var.set(value)
    }

    /// Calls `on_changed` after every change of the value. Replaces any
    /// earlier watcher.
    pub(crate) fn watch(&self, on_changed: ChangeCallback<()>) {
        if let Some(id) = self.subscription.replace(Some(self.var.subscribe(on_changed))) {
            self.var.unsubscribe(id);
        }
    }
}

impl<T> Drop for ParamSlot<T> {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.var.unsubscribe(id);
        }
    }
}

/// The upstream collection of a single-source operator: fixed, or read
/// from a reactive value so it can be swapped at runtime.
pub enum SourceParam<T> {
    Fixed(SharedCollection<T>),
    Bound(Var<SharedCollection<T>>),
}

impl<T> Clone for SourceParam<T> {
    fn clone(&self) -> Self {
        match self {
            SourceParam::Fixed(source) => SourceParam::Fixed(source.clone()),
            SourceParam::Bound(var) => SourceParam::Bound(var.clone()),
        }
    }
}

impl<T: 'static> SourceParam<T> {
    /// Returns the collection currently selected.
    pub fn current(&self) -> SharedCollection<T> {
        match self {
            SourceParam::Fixed(source) => source.clone(),
            SourceParam::Bound(var) => var.with(Rc::clone),
        }
    }
}

impl<T, C> From<Rc<C>> for SourceParam<T>
where
    C: ObservableCollection<T> + 'static,
{
    fn from(source: Rc<C>) -> Self {
        SourceParam::Fixed(source)
    }
}

impl<T> From<Var<SharedCollection<T>>> for SourceParam<T> {
    fn from(var: Var<SharedCollection<T>>) -> Self {
        SourceParam::Bound(var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_reactive::SourceList;

    #[test]
    fn test_options_builder() {
        let options = OperatorOptions::new()
            .with_capacity(8)
            .with_tie_break(TieBreak::Prepend);
        assert_eq!(options.capacity(), 8);
        assert_eq!(options.tie_break(), TieBreak::Prepend);
        assert!(!options.diagnostics().is_enabled());
    }

    #[test]
    fn test_fixed_param_is_settable() {
        let slot = Param::from(3usize).into_slot();
        slot.set("page size", 4).unwrap();
        assert_eq!(slot.get(), 4);
    }

    #[test]
    fn test_bound_param_rejects_set() {
        let var = Var::new(3usize);
        let param = Param::from(var.clone());
        assert!(param.is_bound());
        let slot = param.into_slot();
        let err = slot.set("page size", 4).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        var.set(5).unwrap();
        assert_eq!(slot.get(), 5);
    }

    #[test]
    fn test_slot_watch_released_on_drop() {
        let var = Var::new(1usize);
        let slot = Param::from(var.clone()).into_slot();
        slot.watch(rivulet_reactive::callback(|_: &()| Ok(())));
        slot.watch(rivulet_reactive::callback(|_: &()| Ok(())));
        assert_eq!(var.subscriber_count(), 1);
        drop(slot);
        assert_eq!(var.subscriber_count(), 0);
    }

    #[test]
    fn test_source_param_follows_var() {
        let a = SourceList::from_vec(alloc::vec![1]);
        let b = SourceList::from_vec(alloc::vec![2, 3]);
        let shared: SharedCollection<i32> = a;
        let var = Var::new(shared);
        let param = SourceParam::from(var.clone());
        assert_eq!(param.current().len(), 1);
        var.replace(b).unwrap();
        assert_eq!(param.current().len(), 2);
    }
}
