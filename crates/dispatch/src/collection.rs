//! Mirroring a collection's change stream onto another thread.
//!
//! A `ChangeSender` subscribes to a collection on the thread that owns it
//! and forwards every edit through a channel. On the consuming thread a
//! `CollectionDispatching` replays the edits, in the order they were sent,
//! onto its own copy of the items whenever it is pumped. A Reset is sent as
//! a full snapshot, since the consumer cannot re-read the source.

use std::cell::Cell;
use std::rc::{Rc, Weak};
use std::sync::mpsc;

use rivulet_core::{CollectionChange, Error, Result};
use rivulet_reactive::{
    callback, CollectionCallback, IncrementalCollection, ObservableCollection, OutputBuffer,
    SharedCollection, SubscriptionId,
};

enum Envelope<T> {
    Snapshot(Vec<T>),
    Change(CollectionChange<T>),
}

/// Receiving end of a change stream. Can be moved to another thread.
pub struct ChangeStream<T> {
    rx: mpsc::Receiver<Envelope<T>>,
}

/// Forwards the edits of a collection to a `ChangeStream`.
///
/// Lives on the thread owning the collection. Dropping it unsubscribes;
/// the stream then reports the sender as gone once drained.
pub struct ChangeSender<T> {
    source: SharedCollection<T>,
    subscription: SubscriptionId,
}

impl<T: Clone + Send + 'static> ChangeSender<T> {
    /// Starts forwarding the edits of `source`. The stream begins with a
    /// snapshot of the current items.
    pub fn new(source: SharedCollection<T>) -> Result<(Self, ChangeStream<T>)> {
        let (tx, rx) = mpsc::channel();
        tx.send(Envelope::Snapshot(source.to_vec()))
            .map_err(|_| Error::dispatch("change stream closed"))?;
        let subscription = source.subscribe(forwarder(Rc::downgrade(&source), tx));
        tracing::debug!(len = source.len(), "forwarding collection changes");
        Ok((
            Self {
                source,
                subscription,
            },
            ChangeStream { rx },
        ))
    }

    /// Returns the forwarded collection.
    pub fn source(&self) -> &SharedCollection<T> {
        &self.source
    }
}

fn forwarder<T: Clone + Send + 'static>(
    source: Weak<dyn ObservableCollection<T>>,
    tx: mpsc::Sender<Envelope<T>>,
) -> CollectionCallback<T> {
    callback(move |change: &CollectionChange<T>| {
        let envelope = match change {
            CollectionChange::Reset => match source.upgrade() {
                Some(source) => Envelope::Snapshot(source.to_vec()),
                None => return Ok(()),
            },
            change => Envelope::Change(change.clone()),
        };
        tracing::trace!(action = change.action().name(), "forwarding change");
        tx.send(envelope)
            .map_err(|_| Error::dispatch("change stream receiver dropped"))
    })
}

impl<T> Drop for ChangeSender<T> {
    fn drop(&mut self) {
        self.source.unsubscribe(self.subscription);
    }
}

/// A copy of a collection owned by another thread, kept current by
/// pumping its change stream.
pub struct CollectionDispatching<T> {
    stream: ChangeStream<T>,
    output: OutputBuffer<T>,
    connected: Cell<bool>,
}

impl<T: Clone + 'static> CollectionDispatching<T> {
    /// Creates the mirror and applies whatever the stream already holds,
    /// at least the initial snapshot.
    pub fn new(stream: ChangeStream<T>) -> Result<Rc<Self>> {
        let this = Rc::new(Self {
            stream,
            output: OutputBuffer::new(),
            connected: Cell::new(true),
        });
        this.pump()?;
        Ok(this)
    }

    /// Returns false once the sender is gone and the stream is drained.
    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    /// Applies every pending edit without blocking and returns how many
    /// were applied.
    pub fn pump(&self) -> Result<usize> {
        let mut applied = 0;
        loop {
            match self.stream.rx.try_recv() {
                Ok(envelope) => {
                    self.apply(envelope)?;
                    applied += 1;
                }
                Err(mpsc::TryRecvError::Empty) => return Ok(applied),
                Err(mpsc::TryRecvError::Disconnected) => {
                    self.connected.set(false);
                    return Ok(applied);
                }
            }
        }
    }

    /// Blocks until at least one edit arrives, then applies every pending
    /// edit. Fails once the sender is gone and nothing is left.
    pub fn pump_wait(&self) -> Result<usize> {
        match self.stream.rx.recv() {
            Ok(envelope) => {
                self.apply(envelope)?;
                Ok(1 + self.pump()?)
            }
            Err(_) => {
                self.connected.set(false);
                Err(Error::dispatch("change sender dropped"))
            }
        }
    }

    fn apply(&self, envelope: Envelope<T>) -> Result<()> {
        match envelope {
            Envelope::Snapshot(items) => self.output.reset_items(items),
            Envelope::Change(CollectionChange::Add { index, mut items }) if items.len() == 1 => {
                match items.pop() {
                    Some(item) => self.output.insert_item(index, item),
                    None => Ok(()),
                }
            }
            Envelope::Change(CollectionChange::Add { index, items }) => {
                self.output.insert_many(index, items.into_vec())
            }
            Envelope::Change(CollectionChange::Remove { index, items }) => {
                for _ in 0..items.len() {
                    self.output.remove_item(index)?;
                }
                Ok(())
            }
            Envelope::Change(CollectionChange::Replace {
                index, new_items, ..
            }) => {
                for (offset, item) in new_items.into_iter().enumerate() {
                    self.output.set_item(index + offset, item)?;
                }
                Ok(())
            }
            Envelope::Change(CollectionChange::Move {
                old_index,
                new_index,
                ..
            }) => self.output.move_item(old_index, new_index),
            // the sender turns every Reset into a snapshot
            Envelope::Change(CollectionChange::Reset) => Ok(()),
        }
    }
}

impl<T: Clone> ObservableCollection<T> for CollectionDispatching<T> {
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
