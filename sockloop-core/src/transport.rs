//! Transport capability
//!
//! The core never touches sockets, TLS or wire framing itself. It drives a
//! transport library through three seams:
//!
//! - [`Connector`] creates a transport context on the network thread.
//! - [`Transport`] is that context: it starts connections, accepts bounded
//!   writes, and arranges writable notifications and socket teardown.
//! - [`EventSink`] is how the transport reports back. Events are queued to the
//!   network thread's event loop, which routes each one by connection id to a
//!   [`TransportHandler`].
//!
//! Contract for implementors: after [`Transport::connect`] returns `Ok`, the
//! transport must eventually emit exactly one `destroyed` event for that id,
//! whatever happens to the connection.

use crate::error::Result;
use crate::message::Fragment;
use crate::protocol::constants::{
    DEFAULT_CLOSE_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_FRAME_SIZE,
};
use crate::protocol::WriteKind;
use crate::request::ConnectRequest;
use crate::ConnectionId;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Options for creating a transport context
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Initialize TLS support in the context
    pub tls: bool,
    /// Default PEM file with trusted certificate authorities
    pub ca_file: Option<PathBuf>,
    /// Accept invalid, expired, self-signed or mismatched server certificates
    pub allow_insecure: bool,
    /// Largest frame the core will write; transports reject larger writes
    pub max_frame_size: usize,
    /// Handshake timeout
    pub handshake_timeout: Duration,
    /// Time to wait for the peer's close frame
    pub close_timeout: Duration,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            tls: true,
            ca_file: None,
            allow_insecure: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

/// Factory for transport contexts.
///
/// Called on the network thread, inside its runtime, each time the shared
/// network resource is (re)created.
pub trait Connector: Send + Sync + 'static {
    /// Create a context able to host outbound client connections
    fn create_context(&self, options: &ContextOptions, events: EventSink) -> Result<Box<dyn Transport>>;
}

/// A transport context owned by the network thread.
///
/// All methods are called from the network thread only and must not block on
/// I/O.
pub trait Transport {
    /// Start a client connection for `id`
    fn connect(&mut self, id: ConnectionId, request: &ConnectRequest) -> Result<()>;

    /// Write one bounded chunk, returning how many bytes were accepted
    fn write(&mut self, id: ConnectionId, chunk: &[u8], kind: WriteKind) -> Result<usize>;

    /// Ask for a `writable` event once the connection can take more data
    fn request_writable(&mut self, id: ConnectionId);

    /// Begin tearing the connection down; a `destroyed` event follows
    fn close(&mut self, id: ConnectionId);
}

/// Events a transport reports to the core
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Handshake completed
    Established {
        id: ConnectionId,
        protocol: Option<String>,
    },
    /// Handshake or connection failed
    ConnectionError { id: ConnectionId, reason: String },
    /// Payload bytes arrived
    Fragment { id: ConnectionId, fragment: Fragment },
    /// The connection can take more data
    Writable { id: ConnectionId },
    /// The socket resource is gone
    Destroyed { id: ConnectionId },
    /// Something the core has no use for
    Unhandled { id: ConnectionId, reason: String },
}

impl TransportEvent {
    /// Connection the event belongs to
    pub fn id(&self) -> ConnectionId {
        match self {
            TransportEvent::Established { id, .. }
            | TransportEvent::ConnectionError { id, .. }
            | TransportEvent::Fragment { id, .. }
            | TransportEvent::Writable { id }
            | TransportEvent::Destroyed { id }
            | TransportEvent::Unhandled { id, .. } => *id,
        }
    }

    /// Short event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::Established { .. } => "established",
            TransportEvent::ConnectionError { .. } => "connection_error",
            TransportEvent::Fragment { .. } => "fragment",
            TransportEvent::Writable { .. } => "writable",
            TransportEvent::Destroyed { .. } => "destroyed",
            TransportEvent::Unhandled { .. } => "unhandled",
        }
    }

    /// Route the event to the matching handler method
    pub fn dispatch<H: TransportHandler + ?Sized>(self, handler: &mut H) {
        match self {
            TransportEvent::Established { id, protocol } => handler.on_established(id, protocol),
            TransportEvent::ConnectionError { id, reason } => {
                handler.on_connection_error(id, reason)
            }
            TransportEvent::Fragment { id, fragment } => handler.on_fragment(id, fragment),
            TransportEvent::Writable { id } => handler.on_writable(id),
            TransportEvent::Destroyed { id } => handler.on_destroyed(id),
            TransportEvent::Unhandled { id, reason } => handler.on_unhandled(id, &reason),
        }
    }
}

/// Receiver of transport events, one method per event kind
pub trait TransportHandler {
    /// Handshake completed
    fn on_established(&mut self, id: ConnectionId, protocol: Option<String>);
    /// Handshake or connection failed
    fn on_connection_error(&mut self, id: ConnectionId, reason: String);
    /// Payload bytes arrived
    fn on_fragment(&mut self, id: ConnectionId, fragment: Fragment);
    /// The connection can take more data
    fn on_writable(&mut self, id: ConnectionId);
    /// The socket resource is gone
    fn on_destroyed(&mut self, id: ConnectionId);
    /// Event the core does not act on
    fn on_unhandled(&mut self, _id: ConnectionId, _reason: &str) {}
}

/// Sending half of the transport event queue.
///
/// Cloneable and `Send`, so transport tasks and tests on other threads can
/// report events; delivery always happens on the network thread.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

/// Receiving half of the transport event queue, owned by the event loop
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl EventSink {
    /// Create a connected sink and stream
    pub fn channel() -> (EventSink, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink { tx }, EventStream { rx })
    }

    /// Queue an event; returns `false` once the event loop is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Report a completed handshake
    pub fn established(&self, id: ConnectionId, protocol: Option<String>) -> bool {
        self.emit(TransportEvent::Established { id, protocol })
    }

    /// Report a handshake or connection failure
    pub fn connection_error(&self, id: ConnectionId, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::ConnectionError {
            id,
            reason: reason.into(),
        })
    }

    /// Report received payload
    pub fn fragment(&self, id: ConnectionId, fragment: Fragment) -> bool {
        self.emit(TransportEvent::Fragment { id, fragment })
    }

    /// Report that the connection can take more data
    pub fn writable(&self, id: ConnectionId) -> bool {
        self.emit(TransportEvent::Writable { id })
    }

    /// Report that the socket resource is gone
    pub fn destroyed(&self, id: ConnectionId) -> bool {
        self.emit(TransportEvent::Destroyed { id })
    }

    /// Report an event the core does not act on
    pub fn unhandled(&self, id: ConnectionId, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::Unhandled {
            id,
            reason: reason.into(),
        })
    }

    /// Check if the event loop has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl EventStream {
    /// Wait for the next event
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }

    /// Take an event if one is queued
    pub fn try_recv(&mut self) -> Option<TransportEvent> {
        self.rx.try_recv().ok()
    }
}
