//! Prelude module for Sockloop Client
//!
//! This module re-exports commonly used types and traits to make them
//! easily accessible for users of the client library.

pub use crate::client::{Client, ClientBuilder};
pub use crate::config::ClientConfig;
pub use crate::connection::ConnectionState;
pub use crate::delegate::{ChannelDelegate, Notification, WebSocketDelegate};
pub use crate::dispatch::{DispatchQueue, Dispatcher, InlineDispatcher, QueuedDispatcher};
pub use crate::websocket::WebSocket;

// Re-export core types for convenience
pub use sockloop_core::prelude::*;

// Re-export commonly used external dependencies
pub use std::time::Duration;
