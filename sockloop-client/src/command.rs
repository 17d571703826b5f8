//! Commands carried from caller threads to the network thread

use crate::connection::Connection;
use sockloop_core::FrameBuffer;
use std::fmt;
use std::sync::Arc;

/// Event name for starting a connection
pub(crate) const OPEN: &str = "open";
/// Event name for queueing an outgoing message
pub(crate) const SEND: &str = "send";
/// Event name for closing a connection
pub(crate) const CLOSE: &str = "close";

/// A request for the network thread.
///
/// The buffer of a `Write` moves into the connection's send queue on delivery.
pub(crate) enum Command {
    Open(Arc<Connection>),
    Write(Arc<Connection>, FrameBuffer),
    Close(Arc<Connection>),
}

impl Command {
    /// Event name the command is queued under
    pub(crate) fn event(&self) -> &'static str {
        match self {
            Command::Open(_) => OPEN,
            Command::Write(..) => SEND,
            Command::Close(_) => CLOSE,
        }
    }

    /// Target connection
    pub(crate) fn connection(&self) -> &Arc<Connection> {
        match self {
            Command::Open(connection)
            | Command::Write(connection, _)
            | Command::Close(connection) => connection,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Write(connection, buffer) => f
                .debug_struct("Write")
                .field("connection", &connection.id())
                .field("len", &buffer.len())
                .field("binary", &buffer.is_binary())
                .finish(),
            other => f
                .debug_struct(other.event())
                .field("connection", &other.connection().id())
                .finish(),
        }
    }
}
