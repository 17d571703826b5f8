//! Message handling for sockloop
//!
//! This module provides the complete [`Message`] handed to delegates, the
//! [`Fragment`] reports a transport produces while a message is arriving, and
//! the [`MessageAssembler`] that turns the latter into the former.

use bytes::{Bytes, BytesMut};
use std::fmt;

/// A complete WebSocket data message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: Bytes,
    kind: MessageKind,
}

/// Message kind for easier matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Text message
    Text,
    /// Binary message
    Binary,
}

impl Message {
    /// Create a message from a payload
    pub fn new(payload: impl Into<Bytes>, kind: MessageKind) -> Self {
        Self {
            payload: payload.into(),
            kind,
        }
    }

    /// Create a text message
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Bytes::from(text.into()), MessageKind::Text)
    }

    /// Create a binary message
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(data, MessageKind::Binary)
    }

    /// Get the message kind
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Check if this is a binary message
    pub fn is_binary(&self) -> bool {
        self.kind == MessageKind::Binary
    }

    /// Check if this is a text message
    pub fn is_text(&self) -> bool {
        self.kind == MessageKind::Text
    }

    /// Get the payload as text.
    ///
    /// Returns `None` for binary messages and for text payloads that are not
    /// valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self.kind {
            MessageKind::Text => std::str::from_utf8(&self.payload).ok(),
            MessageKind::Binary => None,
        }
    }

    /// Get the payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Take the payload
    pub fn into_bytes(self) -> Bytes {
        self.payload
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.as_text()) {
            (MessageKind::Text, Some(text)) => write!(f, "Text({})", text),
            (MessageKind::Text, None) => write!(f, "Text({} bytes, not utf-8)", self.len()),
            (MessageKind::Binary, _) => write!(f, "Binary({} bytes)", self.len()),
        }
    }
}

/// One receive event reported by a transport.
///
/// `remaining` is the number of payload bytes of the current logical message
/// the transport has not delivered yet, `is_final` whether this fragment ends
/// the message.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Bytes carried by this event
    pub data: Bytes,
    /// Payload bytes of the current message still to come
    pub remaining: usize,
    /// Whether this is the final fragment of the message
    pub is_final: bool,
    /// Whether the message is binary
    pub is_binary: bool,
}

impl Fragment {
    /// Fragment that completes its message
    pub fn last(data: impl Into<Bytes>, is_binary: bool) -> Self {
        Self {
            data: data.into(),
            remaining: 0,
            is_final: true,
            is_binary,
        }
    }

    /// Fragment with more of the message to come
    pub fn partial(data: impl Into<Bytes>, remaining: usize, is_final: bool, is_binary: bool) -> Self {
        Self {
            data: data.into(),
            remaining,
            is_final,
            is_binary,
        }
    }

    /// Check if this fragment completes the message
    pub fn completes_message(&self) -> bool {
        self.remaining == 0 && self.is_final
    }
}

/// Receive-side assembly buffer for fragmented messages
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: BytesMut,
    reserve: usize,
}

impl MessageAssembler {
    /// Create an assembler whose buffer is pre-sized to `reserve` bytes
    pub fn new(reserve: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(reserve),
            reserve,
        }
    }

    /// Append a fragment, returning the message once it is complete.
    ///
    /// After a message is returned the buffer is empty again and re-reserved.
    pub fn feed(&mut self, fragment: Fragment) -> Option<Message> {
        if !fragment.data.is_empty() {
            self.buffer.extend_from_slice(&fragment.data);
        }

        if !fragment.completes_message() {
            return None;
        }

        let payload = self.buffer.split().freeze();
        self.buffer.reserve(self.reserve);
        let kind = if fragment.is_binary {
            MessageKind::Binary
        } else {
            MessageKind::Text
        };
        Some(Message::new(payload, kind))
    }

    /// Check if a message is partially assembled
    pub fn is_assembling(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Get the number of bytes currently buffered
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Current buffer capacity
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Drop any partially assembled message
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new(crate::protocol::constants::DEFAULT_RECEIVE_RESERVE)
    }
}
