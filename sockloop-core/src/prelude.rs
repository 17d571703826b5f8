//! Prelude module for Sockloop Core
//!
//! This module re-exports the types transport implementations need most.

pub use crate::error::{Error, ErrorCode, Result};
pub use crate::id::ConnectionId;
pub use crate::message::{Fragment, Message, MessageKind};
pub use crate::protocol::{Opcode, WriteKind};
pub use crate::request::ConnectRequest;
pub use crate::transport::{Connector, ContextOptions, EventSink, Transport, TransportEvent};

// Re-export commonly used external dependencies
pub use bytes::{Bytes, BytesMut};
