//! Cross-thread callback delivery.
//!
//! Timer callbacks never run on the registry's driver thread. Each delivery
//! is wrapped in a [`Task`] and handed to an injected [`Dispatcher`] -- the
//! stand-in for whatever "home" context the embedding application has: a UI
//! event loop, a thread pumping a channel, an async runtime.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

/// A unit of relayed callback work.
pub type Task = Box<dyn FnOnce() + Send>;

pub trait Dispatcher: Send + Sync {
    /// Hand `task` to the target context. Must not block.
    fn post(&self, task: Task);
}

/// Runs tasks synchronously on the posting thread.
///
/// Meant for tests and single-threaded embeddings. Tasks run on the driver
/// thread while it holds the firing timer's slot, so callbacks delivered
/// inline must not call back into the registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn post(&self, task: Task) {
        task();
    }
}

/// Producer half of a channel-backed dispatch target.
pub struct QueueDispatcher {
    tx: Mutex<Sender<Task>>,
}

/// Consumer half: pump it from the thread that owns callback delivery.
pub struct DispatchQueue {
    rx: Receiver<Task>,
}

/// Create a connected dispatcher/queue pair.
pub fn queue() -> (QueueDispatcher, DispatchQueue) {
    let (tx, rx) = mpsc::channel();
    (QueueDispatcher { tx: Mutex::new(tx) }, DispatchQueue { rx })
}

impl Dispatcher for QueueDispatcher {
    fn post(&self, task: Task) {
        // A closed receiver means the home context shut down; drop the task.
        let _ = self.tx.lock().unwrap().send(task);
    }
}

impl DispatchQueue {
    /// Run every task currently queued. Returns how many ran.
    pub fn drain(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Block up to `timeout` for one task and run it.
    pub fn pump(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

/// Posts tasks onto a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioDispatcher {
    handle: tokio::runtime::Handle,
}

impl TokioDispatcher {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Capture the ambient runtime. Panics outside a runtime context, same
    /// as [`tokio::runtime::Handle::current`].
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl Dispatcher for TokioDispatcher {
    fn post(&self, task: Task) {
        self.handle.spawn(async move { task() });
    }
}
