//! Network thread
//!
//! One dedicated thread per running client. It owns a current-thread tokio
//! runtime and the transport context, takes commands off the queue, and routes
//! transport events to connections by id. The thread exits once the queue is
//! stopped, releasing the transport context on its way out.

use crate::client::Shared;
use crate::command::{self, Command};
use crate::connection::{Connection, Notice};
use crate::looper::{self, CommandSender, Looper};
use sockloop_core::{
    ConnectionId, Error, EventSink, EventStream, Fragment, Result, Transport, TransportEvent,
    TransportHandler,
};
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

thread_local! {
    static NETWORK_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Check if the current thread is a network thread
pub(crate) fn on_network_thread() -> bool {
    NETWORK_THREAD.with(Cell::get)
}

/// Handle to a running network thread
pub(crate) struct NetworkThread {
    commands: CommandSender<Command>,
    handle: JoinHandle<()>,
}

impl NetworkThread {
    /// Start a network thread serving `shared`
    pub(crate) fn spawn(shared: Arc<Shared>) -> Result<Self> {
        let (commands, looper) = looper::channel();
        let name = shared.config().thread_name.clone();

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || {
                NETWORK_THREAD.with(|flag| flag.set(true));
                NetworkLoop::new(shared, looper).run();
            })
            .map_err(Error::Spawn)?;

        Ok(Self { commands, handle })
    }

    pub(crate) fn commands(&self) -> &CommandSender<Command> {
        &self.commands
    }

    /// Check if the thread is still serving commands
    pub(crate) fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Request a stop and hand back the join handle
    pub(crate) fn stop(self) -> (bool, JoinHandle<()>) {
        (self.commands.stop(), self.handle)
    }
}

impl fmt::Debug for NetworkThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkThread")
            .field("thread", &self.handle.thread().name())
            .field("commands", &self.commands)
            .finish()
    }
}

/// Join retired network threads, skipping the calling thread itself
pub(crate) fn join_retired(handles: Vec<JoinHandle<()>>) {
    let current = thread::current().id();
    for handle in handles {
        if handle.thread().id() == current {
            continue;
        }
        if handle.join().is_err() {
            warn!("network thread panicked");
        }
    }
}

struct NetworkLoop {
    shared: Arc<Shared>,
    looper: Looper<NetworkLoop, Command>,
    events: EventStream,
    sink: EventSink,
    transport: Option<Box<dyn Transport>>,
}

impl NetworkLoop {
    fn new(shared: Arc<Shared>, looper: Looper<NetworkLoop, Command>) -> Self {
        let (sink, events) = EventSink::channel();
        Self {
            shared,
            looper,
            events,
            sink,
            transport: None,
        }
    }

    fn run(mut self) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build();

        match runtime {
            Ok(runtime) => runtime.block_on(self.drive()),
            Err(e) => {
                error!(error = %e, "failed to build network runtime, refusing connections");
                self.register();
                while let Some((name, command)) = self.looper.blocking_next() {
                    self.deliver(name, command);
                }
            }
        }
    }

    async fn drive(mut self) {
        self.before();
        self.serve().await;
        self.after();
    }

    fn register(&mut self) {
        self.looper.on(command::OPEN, Self::handle_open);
        self.looper.on(command::SEND, Self::handle_send);
        self.looper.on(command::CLOSE, Self::handle_close);
    }

    fn before(&mut self) {
        self.register();

        let options = self.shared.config().context_options();
        match self.shared.connector().create_context(&options, self.sink.clone()) {
            Ok(transport) => {
                debug!("transport context created");
                self.transport = Some(transport);
            }
            Err(e) => {
                error!(error = %e, "failed to create transport context");
            }
        }
        info!("network loop started");
    }

    async fn serve(&mut self) {
        loop {
            tokio::select! {
                Some(event) = self.events.recv() => self.route(event),
                command = self.looper.next() => match command {
                    Some((name, command)) => self.deliver(name, command),
                    None => break,
                },
            }
        }
    }

    fn after(&mut self) {
        if self.transport.take().is_some() {
            debug!("transport context released");
        }
        info!(dropped = self.looper.dropped(), "network loop stopped");
    }

    fn deliver(&mut self, name: &'static str, command: Command) {
        match self.looper.handler(name) {
            Some(handler) => handler(self, command),
            None => warn!(event = name, ?command, "no handler registered, command discarded"),
        }
    }

    fn route(&mut self, event: TransportEvent) {
        trace!(connection = %event.id(), event = event.name(), "transport event");
        event.dispatch(self);
    }

    fn handle_open(&mut self, command: Command) {
        match command {
            Command::Open(connection) => {
                let notices = match self.transport.as_deref_mut() {
                    Some(transport) => connection.start(transport),
                    None => {
                        warn!(connection = %connection.id(), "no transport context, connection refused");
                        connection.refuse()
                    }
                };
                self.notify(&connection, notices);
            }
            other => warn!(command = ?other, "unexpected command for open"),
        }
    }

    fn handle_send(&mut self, command: Command) {
        match command {
            Command::Write(connection, buffer) => match self.transport.as_deref_mut() {
                Some(transport) => connection.push_write(buffer, transport),
                None => debug!(connection = %connection.id(), "write dropped, no transport"),
            },
            other => warn!(command = ?other, "unexpected command for send"),
        }
    }

    fn handle_close(&mut self, command: Command) {
        match command {
            Command::Close(connection) => {
                if let Some(transport) = self.transport.as_deref_mut() {
                    connection.close(transport);
                }
            }
            other => warn!(command = ?other, "unexpected command for close"),
        }
    }

    fn lookup(&self, id: ConnectionId, event: &'static str) -> Option<Arc<Connection>> {
        let found = self.shared.lookup(id);
        if found.is_none() {
            debug!(connection = %id, event, "event for unknown connection ignored");
        }
        found
    }

    fn notify(&self, connection: &Arc<Connection>, notices: impl IntoIterator<Item = Notice>) {
        for notice in notices {
            self.shared.notify(connection, notice);
        }
    }
}

impl TransportHandler for NetworkLoop {
    fn on_established(&mut self, id: ConnectionId, protocol: Option<String>) {
        let Some(connection) = self.lookup(id, "established") else {
            return;
        };
        let Some(transport) = self.transport.as_deref_mut() else {
            return;
        };
        let notice = connection.on_established(protocol, transport);
        self.notify(&connection, notice);
    }

    fn on_connection_error(&mut self, id: ConnectionId, reason: String) {
        let Some(connection) = self.lookup(id, "connection_error") else {
            return;
        };
        let Some(transport) = self.transport.as_deref_mut() else {
            return;
        };
        let notice = connection.on_connection_error(&reason, transport);
        self.notify(&connection, notice);
    }

    fn on_fragment(&mut self, id: ConnectionId, fragment: Fragment) {
        let Some(connection) = self.lookup(id, "fragment") else {
            return;
        };
        let notice = connection.on_fragment(fragment);
        self.notify(&connection, notice);
    }

    fn on_writable(&mut self, id: ConnectionId) {
        let Some(connection) = self.lookup(id, "writable") else {
            return;
        };
        if let Some(transport) = self.transport.as_deref_mut() {
            connection.on_writable(transport);
        }
    }

    fn on_destroyed(&mut self, id: ConnectionId) {
        let Some(connection) = self.lookup(id, "destroyed") else {
            return;
        };
        let notice = connection.on_destroyed();
        self.notify(&connection, notice);
    }

    fn on_unhandled(&mut self, id: ConnectionId, reason: &str) {
        debug!(connection = %id, %reason, "unhandled transport event");
    }
}
