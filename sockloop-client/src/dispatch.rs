//! Delegate dispatch
//!
//! Notifications are produced on the network thread and handed to a
//! [`Dispatcher`] as boxed closures. The dispatcher decides where they run:
//!
//! - [`InlineDispatcher`] runs them right away on the network thread.
//! - [`QueuedDispatcher`] pushes them onto a FIFO that the application drains
//!   through its [`DispatchQueue`], from a polling main loop, a blocking step
//!   or an async task.
//!
//! Notifications for one connection reach the dispatcher in the order the
//! network thread produced them; both dispatchers preserve that order.

use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

/// A notification ready to run
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Execution context for delegate notifications
pub trait Dispatcher: Send + Sync + 'static {
    /// Run `task`, now or later, in the application's callback context
    fn dispatch(&self, task: Task);
}

/// Runs every notification immediately on the network thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, task: Task) {
        task();
    }
}

/// Queues notifications for the application to run.
///
/// If the [`DispatchQueue`] has been dropped, notifications run inline so that
/// connections still get released.
#[derive(Clone)]
pub struct QueuedDispatcher {
    tx: mpsc::UnboundedSender<Task>,
}

/// Receiving end of a [`QueuedDispatcher`]
pub struct DispatchQueue {
    rx: mpsc::UnboundedReceiver<Task>,
}

impl QueuedDispatcher {
    /// Create a dispatcher and the queue the application drains
    pub fn new() -> (Self, DispatchQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, DispatchQueue { rx })
    }
}

impl Dispatcher for QueuedDispatcher {
    fn dispatch(&self, task: Task) {
        if let Err(mpsc::error::SendError(task)) = self.tx.send(task) {
            debug!("dispatch queue dropped, running notification inline");
            task();
        }
    }
}

impl fmt::Debug for QueuedDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedDispatcher")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl DispatchQueue {
    /// Run every notification queued right now, returning how many ran
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Block until one notification is available and run it.
    ///
    /// Returns `false` once every dispatcher is gone. Must not be called from
    /// inside an async runtime.
    pub fn run_one(&mut self) -> bool {
        match self.rx.blocking_recv() {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Wait for one notification and run it.
    ///
    /// Returns `false` once every dispatcher is gone.
    pub async fn run_one_async(&mut self) -> bool {
        match self.rx.recv().await {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run notifications until every dispatcher is gone
    pub async fn run(&mut self) {
        while self.run_one_async().await {}
    }
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue").finish_non_exhaustive()
    }
}
