//! WebSocket client service for sockloop
//!
//! A [`Client`] is the process-scoped owner of the connection registry and of
//! the network thread. The thread is started on the first `open` and stopped
//! when the last connection is closed; a later `open` starts a fresh one.
//!
//! The registry and the network thread handle sit under one mutex, so
//! "registry became empty, stop the thread" and "register, reuse or start the
//! thread" never interleave.
//!
//! A panic raised by a delegate callback is logged and contained. If the
//! network thread dies anyway, the next `open` or `wait_idle` retires it and
//! fails the connections it was serving.

use crate::command::{self, Command};
use crate::config::ClientConfig;
use crate::connection::{Connection, Notice};
use crate::delegate::WebSocketDelegate;
use crate::dispatch::{Dispatcher, InlineDispatcher, Task};
use crate::event_loop::{self, NetworkThread};
use crate::looper::CommandSender;
use crate::registry::{Registry, RegistryStats};
use crate::websocket::WebSocket;
use sockloop_core::error::ConfigError;
use sockloop_core::{ConnectRequest, ConnectionId, Connector, Error, Result};
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// WebSocket client service
///
/// Cheap to clone; clones share the registry and the network thread.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Create a client whose notifications run on the network thread
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        Self::with_dispatcher(config, connector, Arc::new(InlineDispatcher))
    }

    /// Create a client with a custom notification dispatcher
    pub fn with_dispatcher(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                connector,
                dispatcher,
                lifecycle: Mutex::new(Lifecycle::default()),
                idle: Condvar::new(),
                threads_started: AtomicUsize::new(0),
                stop_requests: AtomicUsize::new(0),
            }),
        })
    }

    /// Create a client builder
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Open a connection to a `ws://` or `wss://` URI.
    ///
    /// Fails synchronously if the URI or a sub-protocol is invalid or the
    /// network thread cannot be started. Everything after that, including
    /// handshake failure, is reported to `delegate`. `ca_file` overrides the
    /// configured default CA file.
    pub fn open(
        &self,
        uri: &str,
        delegate: Arc<dyn WebSocketDelegate>,
        protocols: &[&str],
        ca_file: Option<&Path>,
    ) -> Result<WebSocket> {
        let config = &self.shared.config;
        let ca_file = ca_file
            .map(Path::to_path_buf)
            .or_else(|| config.ca_file.clone());

        let mut request = ConnectRequest::parse(uri, protocols, ca_file)?;
        if let Some(origin) = &config.origin {
            request = request.with_origin(origin.clone());
        }

        let id = ConnectionId::next();
        let (registered, orphans, retired) = {
            let mut lifecycle = self.shared.lock();
            let orphans = self.shared.reap(&mut lifecycle);
            let registered = self.shared.acquire(&mut lifecycle).map(|commands| {
                let connection = Arc::new(Connection::new(
                    id,
                    request,
                    delegate,
                    commands.clone(),
                    config,
                ));
                lifecycle.registry.insert(Arc::clone(&connection));
                (connection, commands)
            });
            (registered, orphans, mem::take(&mut lifecycle.retired))
        };
        event_loop::join_retired(retired);
        self.shared.fail_orphans(orphans);
        let (connection, commands) = registered?;

        if !commands.enqueue(command::OPEN, Command::Open(Arc::clone(&connection))) {
            warn!(connection = %id, "network thread gone before open");
            self.shared.release(id);
            return Err(Error::QueueStopped);
        }

        #[cfg(feature = "metrics")]
        {
            metrics::counter!("sockloop_client_connections_opened_total").increment(1);
        }

        debug!(connection = %id, url = %connection.request().url(), "open requested");
        Ok(WebSocket::new(connection))
    }

    /// Number of registered connections
    pub fn connection_count(&self) -> usize {
        self.shared.lock().registry.len()
    }

    /// Check if a network thread is currently serving this client
    pub fn is_running(&self) -> bool {
        self.shared
            .lock()
            .network
            .as_ref()
            .is_some_and(NetworkThread::is_alive)
    }

    /// Registry statistics
    pub fn stats(&self) -> RegistryStats {
        self.shared.lock().registry.stats()
    }

    /// Number of network threads started so far
    pub fn threads_started(&self) -> usize {
        self.shared.threads_started.load(Ordering::Relaxed)
    }

    /// Number of times the network thread was asked to stop
    pub fn stop_requests(&self) -> usize {
        self.shared.stop_requests.load(Ordering::Relaxed)
    }

    /// Get the client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Block until every connection is closed and released, and the network
    /// thread has exited.
    ///
    /// With a queued dispatcher, connections are released when their
    /// disconnect notification runs, so the queue must be drained elsewhere.
    pub fn wait_idle(&self, timeout: Duration) -> Result<()> {
        if event_loop::on_network_thread() {
            return Err(Error::OnNetworkThread);
        }

        let orphans = {
            let mut lifecycle = self.shared.lock();
            self.shared.reap(&mut lifecycle)
        };
        self.shared.fail_orphans(orphans);

        let retired = {
            let lifecycle = self.shared.lock();
            let (mut lifecycle, result) = self
                .shared
                .idle
                .wait_timeout_while(lifecycle, timeout, |lifecycle| !lifecycle.registry.is_empty())
                .unwrap_or_else(PoisonError::into_inner);
            if result.timed_out() {
                return Err(Error::Timeout(timeout));
            }
            mem::take(&mut lifecycle.retired)
        };

        event_loop::join_retired(retired);
        Ok(())
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = self.shared.lock();
        f.debug_struct("Client")
            .field("connections", &lifecycle.registry.len())
            .field("running", &lifecycle.network.is_some())
            .field("config", &self.shared.config)
            .finish()
    }
}

/// Client builder
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl ClientBuilder {
    /// Create a new client builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the transport connector
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set the notification dispatcher
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Set maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set origin
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.config.origin = Some(origin.into());
        self
    }

    /// Build the client
    pub fn build(self) -> Result<Client> {
        let connector = self.connector.ok_or_else(|| {
            Error::Config(ConfigError::MissingField {
                field: "connector".to_string(),
            })
        })?;
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(InlineDispatcher) as Arc<dyn Dispatcher>);
        Client::with_dispatcher(self.config, connector, dispatcher)
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("connector", &self.connector.is_some())
            .field("dispatcher", &self.dispatcher.is_some())
            .finish()
    }
}

#[derive(Default)]
struct Lifecycle {
    registry: Registry,
    network: Option<NetworkThread>,
    retired: Vec<JoinHandle<()>>,
}

/// State shared by client handles, the network thread and notifications
pub(crate) struct Shared {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<dyn Dispatcher>,
    lifecycle: Mutex<Lifecycle>,
    idle: Condvar,
    threads_started: AtomicUsize,
    stop_requests: AtomicUsize,
}

impl Shared {
    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    /// Find a registered connection
    pub(crate) fn lookup(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.lock().registry.get(id)
    }

    /// Hand a notification to the dispatcher.
    ///
    /// The closure keeps the connection alive while it runs. The disconnect
    /// notification also releases the connection from the registry.
    pub(crate) fn notify(self: &Arc<Self>, connection: &Arc<Connection>, notice: Notice) {
        let socket = WebSocket::new(Arc::clone(connection));
        let task: Task = match notice {
            Notice::Connected => Box::new(move || {
                guarded(&socket, "on_connected", |socket| {
                    socket.delegate().on_connected(socket)
                })
            }),
            Notice::Message(message) => Box::new(move || {
                guarded(&socket, "on_message", |socket| {
                    socket.delegate().on_message(socket, message)
                })
            }),
            Notice::Error(code) => Box::new(move || {
                guarded(&socket, "on_error", |socket| {
                    socket.delegate().on_error(socket, code)
                })
            }),
            Notice::Disconnected => {
                let shared = Arc::clone(self);
                Box::new(move || {
                    guarded(&socket, "on_disconnected", |socket| {
                        socket.delegate().on_disconnected(socket)
                    });
                    shared.release(socket.id());
                })
            }
        };
        self.dispatcher.dispatch(task);
    }

    /// Remove a closed connection; stop the network thread if it was the last
    pub(crate) fn release(&self, id: ConnectionId) {
        let stopping = {
            let mut lifecycle = self.lock();
            if lifecycle.registry.remove(id).is_none() {
                warn!(connection = %id, "release of unregistered connection");
                return;
            }
            if !lifecycle.registry.is_empty() {
                debug!(connection = %id, remaining = lifecycle.registry.len(), "connection released");
                return;
            }

            self.idle.notify_all();
            match lifecycle.network.take() {
                Some(network) => {
                    let (requested, handle) = network.stop();
                    lifecycle.retired.push(handle);
                    requested
                }
                None => false,
            }
        };

        if stopping {
            self.stop_requests.fetch_add(1, Ordering::Relaxed);
            info!(connection = %id, "last connection released, stopping network thread");
        }
    }

    /// Retire a network thread that died while still registered.
    ///
    /// Returns the connections it was serving; they must be failed with
    /// [`Shared::fail_orphans`] once the lock is released.
    fn reap(&self, lifecycle: &mut Lifecycle) -> Vec<Arc<Connection>> {
        match &lifecycle.network {
            Some(network) if !network.is_alive() => {}
            _ => return Vec::new(),
        }
        let Some(network) = lifecycle.network.take() else {
            return Vec::new();
        };

        let orphans = lifecycle.registry.connections();
        error!(orphaned = orphans.len(), "network thread died, retiring it");
        let (_, handle) = network.stop();
        lifecycle.retired.push(handle);
        orphans
    }

    /// Fail connections whose network thread is gone: error, then closed
    fn fail_orphans(self: &Arc<Self>, orphans: Vec<Arc<Connection>>) {
        for connection in orphans {
            let notices = connection.refuse();
            let releases = notices
                .iter()
                .any(|notice| matches!(notice, Notice::Disconnected));
            for notice in notices {
                self.notify(&connection, notice);
            }
            if !releases {
                self.release(connection.id());
            }
        }
    }

    /// Commands of the running network thread, starting one if needed
    fn acquire(self: &Arc<Self>, lifecycle: &mut Lifecycle) -> Result<CommandSender<Command>> {
        if let Some(network) = &lifecycle.network {
            return Ok(network.commands().clone());
        }

        let network = NetworkThread::spawn(Arc::clone(self))?;
        let commands = network.commands().clone();
        lifecycle.network = Some(network);

        let started = self.threads_started.fetch_add(1, Ordering::Relaxed) + 1;
        info!(thread = %self.config.thread_name, started, "network thread started");
        Ok(commands)
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run a delegate callback, containing any panic it raises
fn guarded(socket: &WebSocket, callback: &'static str, f: impl FnOnce(&WebSocket)) {
    let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| f(socket))) else {
        return;
    };
    let reason = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("opaque panic payload");
    error!(connection = %socket.id(), callback, %reason, "delegate panicked");

    #[cfg(feature = "metrics")]
    {
        metrics::counter!("sockloop_client_delegate_panics_total").increment(1);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let lifecycle = self
            .lifecycle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(network) = lifecycle.network.take() {
            let (_, handle) = network.stop();
            lifecycle.retired.push(handle);
        }
        event_loop::join_retired(mem::take(&mut lifecycle.retired));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::looper;
    use sockloop_core::{ContextOptions, EventSink, Transport};
    use std::sync::atomic::AtomicBool;
    use tracing_test::traced_test;

    struct NoTransport;

    impl Connector for NoTransport {
        fn create_context(
            &self,
            _options: &ContextOptions,
            _events: EventSink,
        ) -> Result<Box<dyn Transport>> {
            Err(Error::Transport("unavailable".into()))
        }
    }

    struct Silent;
    impl WebSocketDelegate for Silent {}

    #[test]
    fn test_builder_requires_connector() {
        assert!(ClientBuilder::new().build().is_err());
        assert!(Client::builder()
            .connector(Arc::new(NoTransport))
            .max_frame_size(1024)
            .build()
            .is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ClientConfig::default().max_frame_size(0);
        assert!(Client::new(config, Arc::new(NoTransport)).is_err());
    }

    #[test]
    fn test_open_rejects_bad_uri_without_starting_thread() {
        let client = Client::new(ClientConfig::default(), Arc::new(NoTransport)).unwrap();
        assert!(client.open("", Arc::new(Silent), &[], None).is_err());
        assert!(client.open("http://example.com", Arc::new(Silent), &[], None).is_err());
        assert!(!client.is_running());
        assert_eq!(client.threads_started(), 0);
    }

    #[test]
    fn test_context_failure_closes_connection() {
        let client = Client::new(ClientConfig::default(), Arc::new(NoTransport)).unwrap();
        let socket = client.open("ws://localhost:1/", Arc::new(Silent), &[], None).unwrap();

        assert!(client.wait_idle(Duration::from_secs(5)).is_ok());
        assert_eq!(socket.state(), crate::ConnectionState::Closed);
        assert_eq!(client.connection_count(), 0);
        assert_eq!(client.stop_requests(), 1);
        assert!(!client.is_running());
    }

    fn socket() -> WebSocket {
        let (commands, _looper) = looper::channel::<(), _>();
        let request = ConnectRequest::parse("ws://localhost/", &[] as &[&str], None::<&str>).unwrap();
        WebSocket::new(Arc::new(Connection::new(
            ConnectionId::next(),
            request,
            Arc::new(Silent),
            commands,
            &ClientConfig::default(),
        )))
    }

    #[test]
    #[traced_test]
    fn test_delegate_panic_contained_and_logged() {
        let socket = socket();
        guarded(&socket, "on_message", |_| panic!("bad payload"));

        let ran = AtomicBool::new(false);
        guarded(&socket, "on_connected", |_| ran.store(true, Ordering::Relaxed));

        assert!(ran.load(Ordering::Relaxed));
        assert!(logs_contain("delegate panicked"));
        assert!(logs_contain("bad payload"));
    }
}
