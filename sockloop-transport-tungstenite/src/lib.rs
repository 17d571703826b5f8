//! tokio-tungstenite transport for sockloop
//!
//! Plugs [`tokio-tungstenite`](https://docs.rs/tokio-tungstenite) into the
//! sockloop client as its socket layer. Plain and rustls TLS connections are
//! supported; trust roots come from a CA file or the bundled Mozilla roots.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/sockloop-transport-tungstenite/")]

pub mod tls;
pub mod tungstenite;

// Re-export transport types
pub use tungstenite::{TungsteniteConnector, TungsteniteTransport};

/// Prelude module
pub mod prelude {
    pub use crate::tungstenite::{TungsteniteConnector, TungsteniteTransport};
    pub use sockloop_core::transport::{Connector, Transport};
}
