//! Named-event command queue
//!
//! A [`CommandSender`] can be cloned to any thread and enqueues payloads under
//! an event name. The [`Looper`] lives on the network thread: handlers are
//! registered per event name with [`Looper::on`], and [`Looper::next`] yields
//! queued commands in FIFO order until a stop is observed.
//!
//! Once [`CommandSender::stop`] has been called, commands still queued and
//! commands enqueued afterwards are dropped and counted.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Handler invoked on the network thread for one event name
pub(crate) type Handler<C, T> = fn(&mut C, T);

enum Envelope<T> {
    Event { name: &'static str, payload: T },
    Stop,
}

struct Flags {
    stopped: AtomicBool,
    dropped: AtomicUsize,
}

/// Enqueueing half of the command queue
pub(crate) struct CommandSender<T> {
    tx: mpsc::UnboundedSender<Envelope<T>>,
    flags: Arc<Flags>,
}

/// Delivery half of the command queue, owned by the network thread
pub(crate) struct Looper<C, T> {
    rx: mpsc::UnboundedReceiver<Envelope<T>>,
    flags: Arc<Flags>,
    handlers: HashMap<&'static str, Handler<C, T>>,
    finished: bool,
}

/// Create a connected sender and looper
pub(crate) fn channel<C, T>() -> (CommandSender<T>, Looper<C, T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let flags = Arc::new(Flags {
        stopped: AtomicBool::new(false),
        dropped: AtomicUsize::new(0),
    });
    (
        CommandSender {
            tx,
            flags: Arc::clone(&flags),
        },
        Looper {
            rx,
            flags,
            handlers: HashMap::new(),
            finished: false,
        },
    )
}

impl<T> CommandSender<T> {
    /// Queue `payload` for the handler registered under `name`.
    ///
    /// Never blocks. Returns `false` if the command was dropped because the
    /// queue is stopping or gone.
    pub(crate) fn enqueue(&self, name: &'static str, payload: T) -> bool {
        if self.flags.stopped.load(Ordering::Acquire) {
            self.flags.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(event = name, "command dropped, queue is stopping");
            return false;
        }

        if self.tx.send(Envelope::Event { name, payload }).is_err() {
            self.flags.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(event = name, "command dropped, queue is gone");
            return false;
        }

        true
    }

    /// Ask the looper to stop.
    ///
    /// Returns `true` for the call that actually requested the stop.
    pub(crate) fn stop(&self) -> bool {
        if self.flags.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        // A closed channel means the looper is already gone.
        let _ = self.tx.send(Envelope::Stop);
        true
    }

    /// Check if a stop has been requested
    pub(crate) fn is_stopped(&self) -> bool {
        self.flags.stopped.load(Ordering::Acquire)
    }

    /// Number of commands dropped so far
    pub(crate) fn dropped(&self) -> usize {
        self.flags.dropped.load(Ordering::Relaxed)
    }
}

impl<T> Clone for CommandSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            flags: Arc::clone(&self.flags),
        }
    }
}

impl<T> fmt::Debug for CommandSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSender")
            .field("stopped", &self.is_stopped())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl<C, T> Looper<C, T> {
    /// Register the handler for an event name, replacing any earlier one
    pub(crate) fn on(&mut self, name: &'static str, handler: Handler<C, T>) {
        if self.handlers.insert(name, handler).is_some() {
            debug!(event = name, "handler replaced");
        }
    }

    /// Handler registered for `name`
    pub(crate) fn handler(&self, name: &'static str) -> Option<Handler<C, T>> {
        self.handlers.get(name).copied()
    }

    /// Wait for the next command.
    ///
    /// Returns `None` once a stop has been observed; everything still queued at
    /// that point is dropped. Cancel safe.
    pub(crate) async fn next(&mut self) -> Option<(&'static str, T)> {
        if self.finished {
            return None;
        }
        let envelope = self.rx.recv().await;
        self.accept(envelope)
    }

    /// Blocking variant of [`next`](Self::next) for use outside a runtime
    pub(crate) fn blocking_next(&mut self) -> Option<(&'static str, T)> {
        if self.finished {
            return None;
        }
        let envelope = self.rx.blocking_recv();
        self.accept(envelope)
    }

    /// Number of commands dropped so far
    pub(crate) fn dropped(&self) -> usize {
        self.flags.dropped.load(Ordering::Relaxed)
    }

    fn accept(&mut self, envelope: Option<Envelope<T>>) -> Option<(&'static str, T)> {
        match envelope {
            Some(Envelope::Event { name, payload }) if !self.flags.stopped.load(Ordering::Acquire) => {
                Some((name, payload))
            }
            Some(Envelope::Event { .. }) => {
                self.flags.dropped.fetch_add(1, Ordering::Relaxed);
                self.finish();
                None
            }
            Some(Envelope::Stop) | None => {
                self.finish();
                None
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.flags.stopped.store(true, Ordering::Release);
        self.rx.close();

        while let Ok(envelope) = self.rx.try_recv() {
            if let Envelope::Event { .. } = envelope {
                self.flags.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        let dropped = self.dropped();
        if dropped > 0 {
            info!(dropped, "command queue stopped, dropped pending commands");
        } else {
            debug!("command queue stopped");
        }
    }
}

impl<C, T> fmt::Debug for Looper<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut events: Vec<_> = self.handlers.keys().collect();
        events.sort();
        f.debug_struct("Looper")
            .field("events", &events)
            .field("finished", &self.finished)
            .finish()
    }
}
