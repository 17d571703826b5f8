//! WebSocket protocol constants and frame tagging
//!
//! This module contains the opcodes the core tags outgoing frames with, the
//! [`WriteKind`] handed to the transport on every write, and the sizing
//! constants shared by the send and receive paths.

use std::fmt;

/// WebSocket opcodes as defined in RFC 6455 Section 5.2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Close frame
    Close = 0x8,
    /// Ping frame
    Ping = 0x9,
    /// Pong frame
    Pong = 0xA,
}

impl Opcode {
    /// Create an Opcode from a u8
    pub fn from(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    /// Get the numeric value of the opcode
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Check if this is a control opcode
    pub fn is_control(&self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }

    /// Check if this is a data opcode
    pub fn is_data(&self) -> bool {
        matches!(self, Opcode::Text | Opcode::Binary | Opcode::Continuation)
    }
}

/// How a chunk handed to [`Transport::write`](crate::transport::Transport::write)
/// must be framed.
///
/// The first chunk of a logical message carries [`Opcode::Text`] or
/// [`Opcode::Binary`]; every later chunk of the same message carries
/// [`Opcode::Continuation`]. `fin` is cleared on every chunk that leaves bytes
/// of the message behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteKind {
    /// Frame opcode
    pub opcode: Opcode,
    /// Whether this chunk completes the message
    pub fin: bool,
}

impl WriteKind {
    /// Tag for a chunk of a message.
    ///
    /// `first` selects the data opcode over continuation, `more` marks that
    /// further chunks of the same message follow.
    pub fn data(binary: bool, first: bool, more: bool) -> Self {
        let opcode = match (first, binary) {
            (false, _) => Opcode::Continuation,
            (true, true) => Opcode::Binary,
            (true, false) => Opcode::Text,
        };
        Self { opcode, fin: !more }
    }

    /// Check if this chunk starts a message
    pub fn is_first(&self) -> bool {
        self.opcode != Opcode::Continuation
    }

    /// Check if more chunks of the message follow this one
    pub fn has_more(&self) -> bool {
        !self.fin
    }
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fin {
            write!(f, "{:?}", self.opcode)
        } else {
            write!(f, "{:?}+more", self.opcode)
        }
    }
}

/// Protocol constants
pub mod constants {
    use std::time::Duration;

    /// Largest chunk written per writable notification, sized to the
    /// transport's receive buffer
    pub const DEFAULT_MAX_FRAME_SIZE: usize = (1 << 16) - 1;

    /// Capacity the receive assembly buffer is reset to after a delivery
    pub const DEFAULT_RECEIVE_RESERVE: usize = 1 << 12;

    /// Default handshake timeout
    pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

    /// Default time to wait for the peer's close frame
    pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default port for `ws://`
    pub const DEFAULT_WS_PORT: u16 = 80;

    /// Default port for `wss://`
    pub const DEFAULT_WSS_PORT: u16 = 443;

    /// Separator used when joining requested sub-protocols
    pub const PROTOCOL_SEPARATOR: &str = ",";
}
