//! Rivulet Dispatch - handing work and change streams across threads.
//!
//! Incremental operators are single-threaded: they hold `Rc` handles and
//! propagate synchronously. This crate is the boundary between such graphs
//! and other threads.
//!
//! - `Dispatcher`: a named worker thread; `invoke` runs an action there and
//!   waits for its result, `post` enqueues without waiting. Actions run in
//!   the order they were enqueued.
//! - `ChangeSender` / `CollectionDispatching`: forward the edits of a
//!   collection to a copy owned by another thread, preserving their order.
//!
//! # Example
//!
//! ```ignore
//! let (sender, stream) = ChangeSender::new(source.clone())?;
//! let consumer = std::thread::spawn(move || {
//!     let mirror = CollectionDispatching::new(stream)?;
//!     while mirror.pump_wait().is_ok() {}
//!     Ok::<_, Error>(mirror.to_vec())
//! });
//! source.push(1)?;
//! drop(sender);
//! ```

pub mod collection;
pub mod dispatcher;

pub use collection::{ChangeSender, ChangeStream, CollectionDispatching};
pub use dispatcher::Dispatcher;
