//! # sockloop
//!
//! WebSocket client that drives every connection from one dedicated network
//! thread. Applications open connections, send messages and close them from
//! any thread; notifications come back through a [`WebSocketDelegate`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sockloop::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     sockloop::init_logging()?;
//!
//!     let client = sockloop::default_client()?;
//!     let (delegate, mut notifications) = ChannelDelegate::new();
//!     let socket = client.open("wss://echo.example.com", Arc::new(delegate), &[], None)?;
//!
//!     while let Some(notification) = notifications.recv().await {
//!         match notification {
//!             Notification::Connected(socket) => {
//!                 socket.send_text("Hello, sockloop!");
//!             }
//!             Notification::Message(socket, message) => {
//!                 println!("Received: {}", message);
//!                 socket.close();
//!             }
//!             Notification::Error(_, code) => eprintln!("connection failed: {}", code),
//!             Notification::Disconnected(_) => break,
//!         }
//!     }
//!
//!     drop(socket);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `tungstenite` (default): the tokio-tungstenite transport and
//!   [`default_client`]
//! - `logging` (default): [`init_logging`] backed by `tracing-subscriber`
//! - `metrics`: client counters through the `metrics` facade

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/sockloop/")]

// Re-export core components
pub use sockloop_core::*;

pub use sockloop_client as client;
pub use sockloop_client::{
    init_logging, ChannelDelegate, Client, ClientBuilder, ClientConfig, ConnectionState,
    DispatchQueue, Dispatcher, InlineDispatcher, Notification, QueuedDispatcher, RegistryStats,
    WebSocket, WebSocketDelegate,
};

#[cfg(feature = "tungstenite")]
#[cfg_attr(docsrs, doc(cfg(feature = "tungstenite")))]
pub use sockloop_transport_tungstenite as transport_tungstenite;

/// Client on the tokio-tungstenite transport with the default configuration
#[cfg(feature = "tungstenite")]
#[cfg_attr(docsrs, doc(cfg(feature = "tungstenite")))]
pub fn default_client() -> Result<Client> {
    client_with_config(ClientConfig::default())
}

/// Client on the tokio-tungstenite transport
#[cfg(feature = "tungstenite")]
#[cfg_attr(docsrs, doc(cfg(feature = "tungstenite")))]
pub fn client_with_config(config: ClientConfig) -> Result<Client> {
    Client::builder()
        .config(config)
        .connector(std::sync::Arc::new(
            sockloop_transport_tungstenite::TungsteniteConnector::new(),
        ))
        .build()
}

/// Prelude module with common imports
pub mod prelude {
    pub use sockloop_client::prelude::*;

    #[cfg(feature = "tungstenite")]
    pub use sockloop_transport_tungstenite::TungsteniteConnector;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_compiles() {
        assert_eq!(env!("CARGO_PKG_NAME"), "sockloop");
    }

    #[cfg(feature = "tungstenite")]
    #[test]
    fn test_default_client_is_idle() {
        let client = default_client().unwrap();
        assert!(!client.is_running());
        assert_eq!(client.connection_count(), 0);
        assert_eq!(client.config().max_frame_size, 65_535);
    }

    #[cfg(feature = "tungstenite")]
    #[test]
    fn test_client_with_invalid_config() {
        let config = ClientConfig::default().max_frame_size(0);
        assert!(matches!(client_with_config(config), Err(Error::Config(_))));
    }
}
