//! Frame buffers
//!
//! A [`FrameBuffer`] owns the payload of one logical outgoing message and tracks
//! how much of it the transport has already taken. The send path slices it into
//! bounded chunks with [`FrameBuffer::next_chunk`] and advances it with
//! [`FrameBuffer::consume`].

use crate::protocol::WriteKind;
use bytes::Bytes;

/// Payload of one logical message plus its consumption progress.
///
/// `consumed() + remaining() == len()` holds after every operation.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    payload: Bytes,
    consumed: usize,
    binary: bool,
}

impl FrameBuffer {
    /// Create a buffer for a message
    pub fn new(payload: impl Into<Bytes>, binary: bool) -> Self {
        Self {
            payload: payload.into(),
            consumed: 0,
            binary,
        }
    }

    /// Create a text message buffer
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Bytes::from(text.into()), false)
    }

    /// Create a binary message buffer
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(data, true)
    }

    /// Total payload length
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Bytes not yet handed to the transport
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.consumed
    }

    /// Bytes already handed to the transport
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Whether the message is binary rather than text
    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Check whether every byte has been written
    pub fn is_drained(&self) -> bool {
        self.remaining() == 0
    }

    /// Unconsumed part of the payload
    pub fn unconsumed(&self) -> &[u8] {
        &self.payload[self.consumed..]
    }

    /// Next chunk of at most `max` bytes together with its framing.
    ///
    /// Does not advance the buffer; call [`consume`](Self::consume) with the
    /// number of bytes the transport accepted.
    pub fn next_chunk(&self, max: usize) -> (&[u8], WriteKind) {
        let remaining = self.remaining();
        let len = remaining.min(max);
        let kind = WriteKind::data(self.binary, self.consumed == 0, len < remaining);
        (&self.payload[self.consumed..self.consumed + len], kind)
    }

    /// Mark `n` bytes as written.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`remaining`](Self::remaining); the caller broke
    /// the write accounting.
    pub fn consume(&mut self, n: usize) {
        assert!(
            n <= self.remaining(),
            "consumed {} bytes but only {} remain",
            n,
            self.remaining()
        );
        self.consumed += n;
    }

    /// The whole payload
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Opcode;
    use proptest::prelude::*;

    #[test]
    fn test_buffer_creation() {
        let buffer = FrameBuffer::text("hello");
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.remaining(), 5);
        assert_eq!(buffer.consumed(), 0);
        assert!(!buffer.is_binary());
        assert!(!buffer.is_drained());

        let buffer = FrameBuffer::binary(vec![1u8, 2, 3]);
        assert!(buffer.is_binary());
        assert_eq!(buffer.unconsumed(), &[1, 2, 3]);
    }

    #[test]
    fn test_chunking_tags() {
        let mut buffer = FrameBuffer::binary(vec![0u8; 10]);

        let (chunk, kind) = buffer.next_chunk(4);
        assert_eq!(chunk.len(), 4);
        assert_eq!(kind.opcode, Opcode::Binary);
        assert!(!kind.fin);
        buffer.consume(4);

        let (chunk, kind) = buffer.next_chunk(4);
        assert_eq!(chunk.len(), 4);
        assert_eq!(kind.opcode, Opcode::Continuation);
        assert!(!kind.fin);
        buffer.consume(4);

        let (chunk, kind) = buffer.next_chunk(4);
        assert_eq!(chunk.len(), 2);
        assert_eq!(kind.opcode, Opcode::Continuation);
        assert!(kind.fin);
        buffer.consume(2);

        assert!(buffer.is_drained());
    }

    #[test]
    fn test_single_chunk_message() {
        let buffer = FrameBuffer::text("hello");
        let (chunk, kind) = buffer.next_chunk(65535);
        assert_eq!(chunk, b"hello");
        assert_eq!(kind.opcode, Opcode::Text);
        assert!(kind.fin);
    }

    #[test]
    fn test_partial_consume_then_retag() {
        let mut buffer = FrameBuffer::text("abcdef");
        buffer.consume(2);
        let (chunk, kind) = buffer.next_chunk(100);
        assert_eq!(chunk, b"cdef");
        assert_eq!(kind.opcode, Opcode::Continuation);
        assert!(kind.fin);
    }

    #[test]
    #[should_panic(expected = "only 3 remain")]
    fn test_consume_past_end_panics() {
        let mut buffer = FrameBuffer::binary(vec![0u8; 5]);
        buffer.consume(2);
        buffer.consume(4);
    }

    proptest! {
        #[test]
        fn prop_consume_keeps_accounting(
            total in 0usize..4096,
            steps in proptest::collection::vec(0usize..512, 0..32),
        ) {
            let mut buffer = FrameBuffer::binary(vec![7u8; total]);
            for step in steps {
                let n = step.min(buffer.remaining());
                buffer.consume(n);
                prop_assert_eq!(buffer.consumed() + buffer.remaining(), buffer.len());
            }
        }

        #[test]
        fn prop_chunks_reassemble(total in 1usize..20_000, max in 1usize..70_000) {
            let data: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
            let mut buffer = FrameBuffer::binary(data.clone());
            let mut out = Vec::with_capacity(total);
            let mut first = true;
            while !buffer.is_drained() {
                let (chunk, kind) = buffer.next_chunk(max);
                prop_assert_eq!(kind.is_first(), first);
                prop_assert_eq!(kind.fin, chunk.len() == buffer.remaining());
                out.extend_from_slice(chunk);
                let n = chunk.len();
                buffer.consume(n);
                first = false;
            }
            prop_assert_eq!(out, data);
        }
    }
}
