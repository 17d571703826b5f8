//! Sockloop Client
//!
//! WebSocket client core that runs every connection on one dedicated network
//! thread. Application threads open, write to and close connections through a
//! command queue; the network thread drives the transport and reports back
//! through a [`WebSocketDelegate`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sockloop_client::prelude::*;
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl WebSocketDelegate for Printer {
//!     fn on_connected(&self, socket: &WebSocket) {
//!         socket.send_text("Hello, sockloop!");
//!     }
//!
//!     fn on_message(&self, socket: &WebSocket, message: Message) {
//!         println!("Received: {}", message);
//!         socket.close();
//!     }
//! }
//!
//! fn run(connector: Arc<dyn Connector>) -> Result<()> {
//!     let client = Client::new(ClientConfig::default(), connector)?;
//!     let socket = client.open("wss://echo.example.com", Arc::new(Printer), &[], None)?;
//!     socket.close_timeout(Duration::from_secs(10))?;
//!     Ok(())
//! }
//! ```
//!
//! The network thread starts with the first connection and stops when the last
//! one is released.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/sockloop-client/")]

// Public modules
pub mod client;
pub mod config;
pub mod connection;
pub mod delegate;
pub mod dispatch;
pub mod logging;
pub mod registry;
pub mod websocket;

// Network thread internals
mod command;
mod event_loop;
mod looper;

// Prelude module
pub mod prelude;

// Re-export key types for convenience
pub use client::{Client, ClientBuilder};
pub use config::ClientConfig;
pub use connection::ConnectionState;
pub use delegate::{ChannelDelegate, Notification, WebSocketDelegate};
pub use dispatch::{DispatchQueue, Dispatcher, InlineDispatcher, QueuedDispatcher, Task};
pub use logging::init_logging;
pub use registry::RegistryStats;
pub use websocket::WebSocket;
