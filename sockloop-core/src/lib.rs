//! # Sockloop Core
//!
//! Core types for the sockloop WebSocket client
//!
//! This crate holds everything the client core shares with transport
//! implementations. It includes:
//!
//! - Error handling and types
//! - Outgoing frame buffers and frame tagging
//! - Incoming message assembly
//! - Connection identity and connection parameters
//! - The transport capability: connector, transport context and event sink

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/sockloop-core/")]

// Core modules
pub mod buffer;
pub mod error;
pub mod id;
pub mod message;
pub mod protocol;
pub mod request;
pub mod transport;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use buffer::FrameBuffer;
pub use error::{ConfigError, Error, ErrorCode, Result};
pub use id::ConnectionId;
pub use message::{Fragment, Message, MessageAssembler, MessageKind};
pub use protocol::{Opcode, WriteKind};
pub use request::ConnectRequest;
pub use transport::{
    Connector, ContextOptions, EventSink, EventStream, Transport, TransportEvent, TransportHandler,
};
