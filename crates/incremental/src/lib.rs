//! Rivulet Incremental - incrementally maintained collection operators.
//!
//! Every operator keeps a derived collection in step with its source by
//! translating each upstream edit into edits on its own output, instead
//! of recomputing from scratch. Per-item expressions may read reactive
//! values; when one changes, only the items that read it are revisited.
//!
//! # Core Concepts
//!
//! - `PropagationGate`: the phase machine every operator runs its steps
//!   through; it rejects multi-item and reentrant edits and defers value
//!   changes that arrive while the operator lags behind its source
//! - `Computation`: the consistency surface of an operator, including a
//!   from-scratch oracle (`validate_consistency`)
//! - `OperatorOptions` and `Param`: capacities, diagnostics, tie-breaking
//!   and parameters that may follow reactive values
//!
//! # Operators
//!
//! - `Filtering`, `Grouping`, `Distincting`, `Ordering`, `ThenOrdering`,
//!   `Concatenating`, `Paging`: derived collections
//! - `Summing`, `Averaging`, `AnyComputing`: aggregates published as
//!   reactive values
//!
//! # Example
//!
//! ```ignore
//! use rivulet_incremental::{CollectionExt, Computation};
//! use rivulet_reactive::{ObservableCollection, Selector, SourceList};
//!
//! let source = SourceList::from_vec(vec![5, 3, 8, 1]);
//! let sorted = source
//!     .filtering(Selector::plain(|x: &i32| *x > 1))?
//!     .ordering(Selector::plain(|x: &i32| *x))?;
//! assert_eq!(sorted.to_vec(), vec![3, 5, 8]);
//!
//! source.push(4)?;
//! assert_eq!(sorted.to_vec(), vec![3, 4, 5, 8]);
//! sorted.validate_consistency()?;
//! ```

#![no_std]

extern crate alloc;

mod binding;
pub mod computation;
pub mod ext;
pub mod gate;
pub mod operators;
pub mod options;

pub use computation::{Computation, OrderedSource};
pub use ext::{CollectionExt, NestedCollectionExt, OrderedExt};
pub use gate::{Phase, PropagationGate};
pub use operators::{
    Accumulator, Additive, Aggregate, AnyComputing, Averaging, Comparer, Concatenating, Distincting,
    Filtering, Group, Grouping, Mean, Occupancy, Ordering, Paging, Sum, Summing, ThenOrdering,
};
pub use options::{OperatorOptions, Param, SourceParam};
