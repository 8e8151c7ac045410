//! Fluent construction of operator chains.

use crate::computation::OrderedSource;
use crate::operators::{
    Additive, AnyComputing, Averaging, Concatenating, Distincting, Filtering, Grouping, Ordering,
    Paging, Summing, ThenOrdering,
};
use crate::options::Param;
use alloc::rc::Rc;
use core::hash::Hash;
use rivulet_core::{Result, SortDirection};
use rivulet_reactive::{ObservableCollection, Selector, SharedCollection};

/// Operators available on every observable collection held in an `Rc`.
///
/// ```ignore
/// let top = source
///     .filtering(Selector::plain(|x: &i32| *x > 0))?
///     .ordering_by(Selector::plain(|x: &i32| *x), SortDirection::Descending)?
///     .paging(10, 1)?;
/// ```
pub trait CollectionExt<T: Clone + 'static>: ObservableCollection<T> + Sized + 'static {
    fn filtering(self: &Rc<Self>, predicate: Selector<T, bool>) -> Result<Rc<Filtering<T>>> {
        Filtering::new(self.clone(), predicate)
    }

    fn grouping<K>(self: &Rc<Self>, key_selector: Selector<T, K>) -> Result<Rc<Grouping<T, K>>>
    where
        K: Clone + Eq + Hash + 'static,
    {
        Grouping::new(self.clone(), key_selector)
    }

    fn distincting(self: &Rc<Self>) -> Result<Rc<Distincting<T>>>
    where
        T: Eq + Hash,
    {
        Distincting::new(self.clone())
    }

    fn ordering<K>(self: &Rc<Self>, key_selector: Selector<T, K>) -> Result<Rc<Ordering<T, K>>>
    where
        K: Clone + Ord + 'static,
    {
        Ordering::new(self.clone(), key_selector)
    }

    fn ordering_by<K>(
        self: &Rc<Self>,
        key_selector: Selector<T, K>,
        direction: impl Into<Param<SortDirection>>,
    ) -> Result<Rc<Ordering<T, K>>>
    where
        K: Clone + Ord + 'static,
    {
        Ordering::with_direction(self.clone(), key_selector, direction)
    }

    fn paging(
        self: &Rc<Self>,
        page_size: impl Into<Param<usize>>,
        current_page: impl Into<Param<usize>>,
    ) -> Result<Rc<Paging<T>>> {
        Paging::new(self.clone(), page_size, current_page)
    }

    fn summing(self: &Rc<Self>) -> Result<Rc<Summing<T>>>
    where
        T: Additive,
    {
        Summing::new(self.clone())
    }

    fn averaging(self: &Rc<Self>) -> Result<Rc<Averaging<T>>>
    where
        T: Copy + Into<f64>,
    {
        Averaging::new(self.clone())
    }

    fn any_computing(self: &Rc<Self>, predicate: Selector<T, bool>) -> Result<Rc<AnyComputing<T>>> {
        AnyComputing::new(self.clone(), predicate)
    }
}

impl<T, C> CollectionExt<T> for C
where
    T: Clone + 'static,
    C: ObservableCollection<T> + 'static,
{
}

/// Secondary orderings on an already sorted collection.
pub trait OrderedExt<T: Clone + 'static>: OrderedSource<T> + Sized + 'static {
    fn then_by<K>(self: &Rc<Self>, key_selector: Selector<T, K>) -> Result<Rc<ThenOrdering<T, K>>>
    where
        K: Clone + Ord + 'static,
    {
        ThenOrdering::new(self.clone(), key_selector)
    }
}

impl<T, S> OrderedExt<T> for S
where
    T: Clone + 'static,
    S: OrderedSource<T> + 'static,
{
}

/// Flattening of a collection of collections.
pub trait NestedCollectionExt<T: Clone + 'static>:
    ObservableCollection<SharedCollection<T>> + Sized + 'static
{
    fn concatenating(self: &Rc<Self>) -> Result<Rc<Concatenating<T>>> {
        Concatenating::new(self.clone())
    }
}

impl<T, C> NestedCollectionExt<T> for C
where
    T: Clone + 'static,
    C: ObservableCollection<SharedCollection<T>> + 'static,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computation::Computation;
    use alloc::vec;
    use alloc::vec::Vec;
    use rivulet_reactive::{SourceList, Var};

    #[test]
    fn test_chain() {
        let source = SourceList::from_vec(vec![4, -1, 9, 2, 7, 0, 5]);
        let page = source
            .filtering(Selector::plain(|x: &i32| *x > 0))
            .unwrap()
            .ordering_by(Selector::plain(|x: &i32| *x), SortDirection::Descending)
            .unwrap()
            .paging(2, 1)
            .unwrap();
        assert_eq!(page.to_vec(), vec![9, 7]);

        source.push(11).unwrap();
        assert_eq!(page.to_vec(), vec![11, 9]);
        source.remove(2).unwrap();
        assert_eq!(page.to_vec(), vec![11, 7]);
        page.validate_consistency().unwrap();
    }

    #[test]
    fn test_then_by_chain() {
        let source = SourceList::from_vec(vec![(2, 'b'), (1, 'z'), (2, 'a'), (1, 'c')]);
        let sorted = source
            .ordering(Selector::plain(|x: &(i32, char)| x.0))
            .unwrap()
            .then_by(Selector::plain(|x: &(i32, char)| x.1))
            .unwrap();
        assert_eq!(sorted.to_vec(), vec![(1, 'c'), (1, 'z'), (2, 'a'), (2, 'b')]);
    }

    #[test]
    fn test_aggregates_and_flattening() {
        let first: SharedCollection<i32> = SourceList::from_vec(vec![1, 2]);
        let second: SharedCollection<i32> = SourceList::from_vec(vec![3]);
        let outer = SourceList::from_vec(vec![first, second]);
        let flat = outer.concatenating().unwrap();
        assert_eq!(flat.to_vec(), vec![1, 2, 3]);

        let sum = flat.summing().unwrap();
        let mean = flat.averaging().unwrap();
        assert_eq!(sum.get(), 6);
        assert_eq!(mean.get(), Some(2.0));

        outer.remove(0).unwrap();
        assert_eq!(sum.get(), 3);
        assert_eq!(mean.value().get(), Some(3.0));
    }

    #[test]
    fn test_grouping_with_reactive_page() {
        let source = SourceList::from_vec(vec!["ab", "b", "ac", "bd", "c"]);
        let groups = source
            .grouping(Selector::plain(|s: &&str| s.as_bytes()[0]))
            .unwrap();
        let page_number = Var::new(1);
        let page = groups.paging(2, page_number.clone()).unwrap();
        let keys = |page: &Paging<Rc<crate::operators::Group<u8, &str>>>| {
            page.to_vec().iter().map(|g| *g.key()).collect::<Vec<_>>()
        };
        assert_eq!(keys(&page), vec![b'a', b'b']);

        page_number.set(2).unwrap();
        assert_eq!(keys(&page), vec![b'c']);
    }

    #[test]
    fn test_distinct_and_any_chain() {
        let source = SourceList::from_vec(vec![3, 1, 3, 8]);
        let distinct = source.distincting().unwrap();
        let any_large = distinct
            .any_computing(Selector::plain(|x: &i32| *x > 5))
            .unwrap();
        assert_eq!(distinct.to_vec(), vec![3, 1, 8]);
        assert!(any_large.get());

        source.remove(3).unwrap();
        assert_eq!(distinct.to_vec(), vec![3, 1]);
        assert!(!any_large.get());
        any_large.validate_consistency().unwrap();
        distinct.validate_consistency().unwrap();
    }
}
