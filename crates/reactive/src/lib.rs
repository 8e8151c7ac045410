//! Rivulet Reactive - observable collections and reactive values.
//!
//! This crate defines the observable contracts incremental operators consume
//! and produce, plus the tracking used for per-item expressions.
//!
//! # Core Concepts
//!
//! - `ObservableCollection<T>`: an ordered sequence emitting one
//!   `CollectionChange` per edit
//! - `SourceList<T>`: a mutable root collection
//! - `OutputBuffer<T>`: the item sequence behind every derived collection
//! - `Var<T>`: a shared value notifying on change
//! - `Selector` and `watch`: evaluate an expression and subscribe to the
//!   reactive values it read
//!
//! # Example
//!
//! ```ignore
//! use rivulet_reactive::{callback, ObservableCollection, SourceList};
//!
//! let list = SourceList::from_vec(vec![1, 2]);
//! list.subscribe(callback(|change| {
//!     println!("{}", change.action());
//!     Ok(())
//! }));
//! list.push(3)?;
//! ```

#![no_std]

extern crate alloc;

pub mod collection;
pub mod output;
pub mod source;
pub mod subscription;
pub mod var;
pub mod watch;

pub use collection::{
    CollectionCallback, IncrementalCollection, ObservableCollection, SharedCollection,
};
pub use output::{Edit, OutputBuffer};
pub use source::SourceList;
pub use subscription::{
    callback, ChangeCallback, Notifier, Subscription, SubscriptionId, SubscriptionManager,
};
pub use var::{Dependency, Scalar, Var};
pub use watch::{watch, ReadSet, Selector, WatchHandle};
