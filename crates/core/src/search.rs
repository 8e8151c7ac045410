//! Ordered-insertion search.
//!
//! Finds where a new key belongs among keys that are already sorted, for a
//! direction-aware and possibly non-strict comparer. Equal keys form plateaus;
//! the tie-break decides whether a new key lands after or before its plateau.

use core::cmp::Ordering;
use core::ops::Range;

/// Sort direction of an ordering operator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    /// Applies this direction to a comparison result.
    #[inline]
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

/// Placement of a new key relative to existing equal keys.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TieBreak {
    /// After the last equal key (stable append).
    #[default]
    Append,
    /// Before the first equal key.
    Prepend,
}

/// Returns the index in `range` at which `key` belongs among `keys`.
///
/// `keys[range]` must already be sorted under `compare` and `direction`.
/// The result lies in `range.start..=range.end`.
///
/// The search halves the range and, at every step, also inspects the
/// neighbor of the midpoint on the side the comparison points to. A midpoint
/// that sits on the boundary of a plateau is recognized immediately, and a
/// plateau never forces a linear scan.
pub fn find_insertion_index<K, C>(
    keys: &[K],
    key: &K,
    range: Range<usize>,
    direction: SortDirection,
    tie_break: TieBreak,
    compare: C,
) -> usize
where
    C: Fn(&K, &K) -> Ordering,
{
    // true when the new key goes after keys[index]
    let after = |index: usize| -> bool {
        let ordering = direction.apply(compare(&keys[index], key));
        match tie_break {
            TieBreak::Append => ordering != Ordering::Greater,
            TieBreak::Prepend => ordering == Ordering::Less,
        }
    };

    let mut low = range.start;
    let mut high = range.end.min(keys.len());

    loop {
        match high.saturating_sub(low) {
            0 => return low,
            1 => return if after(low) { low + 1 } else { low },
            2 => {
                if !after(low) {
                    return low;
                }
                return if after(low + 1) { low + 2 } else { low + 1 };
            }
            len => {
                let mid = low + len / 2;
                if after(mid) {
                    if !after(mid + 1) {
                        return mid + 1;
                    }
                    low = mid + 2;
                } else {
                    if after(mid - 1) {
                        return mid;
                    }
                    high = mid - 1;
                }
            }
        }
    }
}
