//! Incremental collection operators.
//!
//! Each operator subscribes to its source, translates every single-item
//! edit into the smallest sequence of edits on its own output, and can
//! check itself against a from-scratch recomputation:
//! - Filtering: items satisfying a predicate
//! - Grouping: items partitioned by key, groups in first-occurrence order
//! - Distincting: the keys of an identity grouping
//! - Ordering / ThenOrdering: items sorted by a key, then within equal keys
//! - Concatenating: a collection of collections, flattened
//! - Paging: one fixed-size window of the source
//! - Summing / Averaging: running aggregates published as reactive values
//! - AnyComputing: whether a filtered view is non-empty, as a reactive value

mod aggregate;
mod any_computing;
mod concatenating;
mod distincting;
mod filtering;
mod grouping;
mod ordering;
mod paging;
mod sorting;
mod then_ordering;

pub use aggregate::{Accumulator, Additive, Aggregate, Averaging, Mean, Sum, Summing};
pub use any_computing::{AnyComputing, Occupancy};
pub use concatenating::Concatenating;
pub use distincting::Distincting;
pub use filtering::Filtering;
pub use grouping::{Group, Grouping};
pub use ordering::Ordering;
pub use paging::Paging;
pub use sorting::Comparer;
pub use then_ordering::ThenOrdering;
