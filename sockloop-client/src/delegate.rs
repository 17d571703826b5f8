//! Application callbacks
//!
//! A [`WebSocketDelegate`] receives the four notifications of one or more
//! connections. Every method has an empty default body, so implementors only
//! write the ones they care about. Where the methods run depends on the
//! client's [`Dispatcher`](crate::dispatch::Dispatcher).

use crate::websocket::WebSocket;
use sockloop_core::{ErrorCode, Message};
use tokio::sync::mpsc;

/// Receiver of connection notifications
pub trait WebSocketDelegate: Send + Sync + 'static {
    /// The handshake completed. Fires at most once per connection.
    fn on_connected(&self, _socket: &WebSocket) {}

    /// A complete message arrived
    fn on_message(&self, _socket: &WebSocket, _message: Message) {}

    /// The connection failed. Fires at most once per connection and is always
    /// followed by [`on_disconnected`](Self::on_disconnected).
    fn on_error(&self, _socket: &WebSocket, _code: ErrorCode) {}

    /// The connection is closed. Fires exactly once per opened connection.
    fn on_disconnected(&self, _socket: &WebSocket) {}
}

/// A notification forwarded by [`ChannelDelegate`]
#[derive(Debug, Clone)]
pub enum Notification {
    /// See [`WebSocketDelegate::on_connected`]
    Connected(WebSocket),
    /// See [`WebSocketDelegate::on_message`]
    Message(WebSocket, Message),
    /// See [`WebSocketDelegate::on_error`]
    Error(WebSocket, ErrorCode),
    /// See [`WebSocketDelegate::on_disconnected`]
    Disconnected(WebSocket),
}

impl Notification {
    /// Connection the notification belongs to
    pub fn socket(&self) -> &WebSocket {
        match self {
            Notification::Connected(socket)
            | Notification::Message(socket, _)
            | Notification::Error(socket, _)
            | Notification::Disconnected(socket) => socket,
        }
    }
}

/// Delegate that forwards every notification into an async channel
#[derive(Debug, Clone)]
pub struct ChannelDelegate {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelDelegate {
    /// Create a delegate and the receiver its notifications arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, notification: Notification) {
        // Nobody listening is fine.
        let _ = self.tx.send(notification);
    }
}

impl WebSocketDelegate for ChannelDelegate {
    fn on_connected(&self, socket: &WebSocket) {
        self.forward(Notification::Connected(socket.clone()));
    }

    fn on_message(&self, socket: &WebSocket, message: Message) {
        self.forward(Notification::Message(socket.clone(), message));
    }

    fn on_error(&self, socket: &WebSocket, code: ErrorCode) {
        self.forward(Notification::Error(socket.clone(), code));
    }

    fn on_disconnected(&self, socket: &WebSocket) {
        self.forward(Notification::Disconnected(socket.clone()));
    }
}
