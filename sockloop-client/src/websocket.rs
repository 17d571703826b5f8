//! Application handle for one connection

use crate::command::{self, Command};
use crate::connection::{Connection, ConnectionState};
use crate::delegate::WebSocketDelegate;
use crate::event_loop;
use bytes::Bytes;
use sockloop_core::{ConnectionId, Error, FrameBuffer, Result};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

/// Handle to a WebSocket connection opened through a [`Client`](crate::Client).
///
/// Cheap to clone. Every operation is forwarded to the network thread through
/// the command queue; only [`state`](Self::state) and the blocking close
/// helpers look at the connection directly.
#[derive(Clone)]
pub struct WebSocket {
    connection: Arc<Connection>,
}

impl WebSocket {
    pub(crate) fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    pub(crate) fn delegate(&self) -> &dyn WebSocketDelegate {
        self.connection.delegate()
    }

    /// Process-unique connection id
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// URI the connection was opened with
    pub fn url(&self) -> &str {
        &self.connection.request().uri
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Check if the handshake completed and no close has started
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Sub-protocol the server selected, once connected
    pub fn protocol(&self) -> Option<String> {
        self.connection.protocol()
    }

    /// Queue a text message
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(FrameBuffer::text(text))
    }

    /// Queue a binary message
    pub fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.send(FrameBuffer::binary(data))
    }

    /// Queue a message.
    ///
    /// Returns whether the command was accepted. Messages sent while
    /// connecting are held until the handshake completes; messages sent once
    /// closing has started are dropped.
    pub fn send(&self, buffer: FrameBuffer) -> bool {
        if matches!(self.state(), ConnectionState::Closing | ConnectionState::Closed) {
            return false;
        }
        let command = Command::Write(Arc::clone(&self.connection), buffer);
        self.connection.commands().enqueue(command::SEND, command)
    }

    /// Start closing the connection.
    ///
    /// Already-queued messages are still written. The delegate's
    /// `on_disconnected` follows once the socket is gone.
    pub fn close(&self) -> bool {
        if self.state() == ConnectionState::Closed {
            return false;
        }
        let command = Command::Close(Arc::clone(&self.connection));
        self.connection.commands().enqueue(command::CLOSE, command)
    }

    /// Close and block until the connection is closed
    pub fn close_sync(&self) -> Result<()> {
        self.close_and_wait(None)
    }

    /// Close and block until the connection is closed or `timeout` elapses
    pub fn close_timeout(&self, timeout: Duration) -> Result<()> {
        self.close_and_wait(Some(timeout))
    }

    fn close_and_wait(&self, timeout: Option<Duration>) -> Result<()> {
        if event_loop::on_network_thread() {
            return Err(Error::OnNetworkThread);
        }
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }
        if !self.close() && self.state() != ConnectionState::Closed {
            return Err(Error::QueueStopped);
        }
        self.connection.wait_closed(timeout)
    }
}

impl PartialEq for WebSocket {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for WebSocket {}

impl Hash for WebSocket {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("id", &self.id())
            .field("url", &self.url())
            .field("state", &self.state())
            .finish()
    }
}
