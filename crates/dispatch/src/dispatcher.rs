//! A dedicated thread that runs actions handed to it by other threads.
//!
//! Actions run one at a time in the order they were enqueued. `invoke`
//! blocks the caller until its action has run and hands back the result;
//! `post` returns immediately. The caller's tracing span is carried into
//! the worker so that logs emitted by an action nest under it.
//!
//! Dropping the `Dispatcher` enqueues a shutdown behind every pending
//! action and joins the worker.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::{self, JoinHandle, ThreadId};

use rivulet_core::{Error, Result};

type Action = Box<dyn FnOnce() + Send>;

enum Job {
    Run { action: Action, span: tracing::Span },
    Shutdown,
}

/// Handle to a worker thread.
pub struct Dispatcher {
    tx: mpsc::Sender<Job>,
    worker: Option<JoinHandle<()>>,
    thread: ThreadId,
    name: String,
}

impl Dispatcher {
    /// Spawns a worker thread named `name`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(rx))
            .map_err(|err| Error::dispatch(format!("failed to spawn dispatcher thread: {err}")))?;
        let thread = worker.thread().id();
        tracing::debug!(dispatcher = %name, "started");
        Ok(Self {
            tx,
            worker: Some(worker),
            thread,
            name,
        })
    }

    /// Returns the worker thread's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true when called from the worker thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Runs `action` on the worker and waits for its result.
    ///
    /// Called from the worker itself, the action runs inline; queueing it
    /// behind the running action would never complete.
    pub fn invoke<R, F>(&self, action: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_current() {
            return Ok(action());
        }
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.send(Box::new(move || {
            let _ = reply_tx.send(action());
        }))?;
        reply_rx
            .recv()
            .map_err(|_| Error::dispatch(format!("{}: action panicked before replying", self.name)))
    }

    /// Enqueues `action` and returns without waiting.
    pub fn post(&self, action: impl FnOnce() + Send + 'static) -> Result<()> {
        self.send(Box::new(action))
    }

    fn send(&self, action: Action) -> Result<()> {
        self.tx
            .send(Job::Run {
                action,
                span: tracing::Span::current(),
            })
            .map_err(|_| Error::dispatch(format!("{}: worker has stopped", self.name)))
    }
}

fn run(rx: mpsc::Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        match job {
            Job::Run { action, span } => {
                let _guard = span.enter();
                if catch_unwind(AssertUnwindSafe(action)).is_err() {
                    tracing::warn!("dispatched action panicked");
                }
            }
            Job::Shutdown => break,
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let _ = self.tx.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            // an action dropping its own dispatcher cannot join itself
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                tracing::warn!(dispatcher = %self.name, "worker exited abnormally");
            }
        }
        tracing::debug!(dispatcher = %self.name, "stopped");
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name)
            .field("thread", &self.thread)
            .finish()
    }
}
