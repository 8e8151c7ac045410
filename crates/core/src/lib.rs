//! Rivulet Core - position bookkeeping for incremental collection operators.
//!
//! This crate provides the leaf structures every incremental operator builds on:
//!
//! - `PositionRegistry<P>`: ordered positions with stable identities and
//!   up-to-date indices
//! - `RangePositionRegistry<P>`: positions standing for variable-length runs,
//!   each with a flattened `plain_index`
//! - `find_insertion_index`: binary search with plateau disambiguation for
//!   sorted insertion under any comparer
//! - `CollectionChange<T>`: the structured edit notification
//! - `Diagnostics`: injectable evaluation-scope sink
//! - `Error`: error types for propagation and validation
//!
//! # Example
//!
//! ```rust
//! use rivulet_core::{PositionRegistry, RangePositionRegistry};
//!
//! let mut positions = PositionRegistry::new();
//! let a = positions.push("a");
//! let c = positions.push("c");
//! positions.insert(1, "b").unwrap();
//! assert_eq!(positions.index_of(a), Some(0));
//! assert_eq!(positions.index_of(c), Some(2));
//!
//! let mut runs = RangePositionRegistry::new();
//! runs.add(2, "first");
//! runs.add(1, "second");
//! runs.modify_length(0, 1).unwrap();
//! assert_eq!(runs.plain_index(1).unwrap(), 3);
//! ```

#![no_std]

extern crate alloc;

pub mod change;
pub mod diagnostics;
mod error;
pub mod position;
pub mod range;
pub mod search;

pub use change::{ChangeAction, ChangeItems, CollectionChange};
pub use diagnostics::{DiagnosticSink, Diagnostics, EvaluationScope, NoopSink};
pub use error::{Error, Result};
pub use position::{PositionId, PositionRegistry};
pub use range::{RangeEntry, RangePositionRegistry};
pub use search::{find_insertion_index, SortDirection, TieBreak};
