//! Incremental frame reception over a byte stream
//!
//! [`ReceivePipeline`] owns a grow-only [`ReceiveBuffer`] and a two-state
//! machine (header, then body). It reads only as many times as it needs to:
//! when a complete header is already buffered it moves straight on to the
//! body without touching the transport, and when the body is short it asks
//! for at least the missing byte count in one read.

use crate::frame::{decode_payload, try_decode_length, FrameError, HEADER_SCAN_WINDOW};
use crate::Message;
use log::trace;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Why a stream stopped producing messages. None of these are recoverable.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The peer closed the stream between frames
    #[error("connection closed by peer")]
    Closed,

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),
}

/// Byte storage for one connection's inbound stream.
///
/// Bytes in `[consumed, consumed + pending)` have been received but not yet
/// parsed; everything after them is free space for the next read. Capacity
/// never shrinks.
#[derive(Debug)]
pub struct ReceiveBuffer {
    data: Vec<u8>,
    consumed: usize,
    pending: usize,
}

impl ReceiveBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            consumed: 0,
            pending: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes already parsed at the front of the buffer
    pub fn consumed_offset(&self) -> usize {
        self.consumed
    }

    pub fn pending_len(&self) -> usize {
        self.pending
    }

    /// Received bytes that have not been parsed yet
    pub fn pending(&self) -> &[u8] {
        &self.data[self.consumed..self.consumed + self.pending]
    }

    /// Makes room for `required` bytes starting at the consumed offset.
    ///
    /// Compacts first, shifting unparsed bytes to the front, and only grows
    /// when the whole buffer is still too small.
    pub fn reserve(&mut self, required: usize) {
        if self.consumed + required <= self.data.len() {
            return;
        }

        self.compact();

        if required > self.data.len() {
            trace!(
                "Growing receive buffer from {} to {} bytes",
                self.data.len(),
                required
            );
            self.data.resize(required, 0);
        }
    }

    /// Space after the pending bytes, ready to be filled by a read
    pub fn free_space_mut(&mut self) -> &mut [u8] {
        let start = self.consumed + self.pending;
        &mut self.data[start..]
    }

    /// Records `count` bytes written into [`free_space_mut`](Self::free_space_mut)
    pub fn commit(&mut self, count: usize) {
        debug_assert!(self.consumed + self.pending + count <= self.data.len());
        self.pending += count;
    }

    /// Marks `count` pending bytes as parsed
    pub fn consume(&mut self, count: usize) {
        debug_assert!(count <= self.pending);
        self.consumed += count;
        self.pending -= count;
    }

    fn compact(&mut self) {
        if self.consumed == 0 {
            return;
        }
        self.data
            .copy_within(self.consumed..self.consumed + self.pending, 0);
        self.consumed = 0;
    }
}

/// Where the pipeline is within the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    AwaitingHeader,
    AwaitingBody { expected_len: usize },
}

/// Turns a stream of bytes into complete messages.
///
/// A pipeline must be the only reader of its stream. Call
/// [`next_message`](Self::next_message) in a loop; any error is terminal and
/// the stream offset can no longer be trusted afterwards.
pub struct ReceivePipeline<R> {
    reader: R,
    buffer: ReceiveBuffer,
    state: ReceiveState,
}

impl<R> ReceivePipeline<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, initial_capacity: usize) -> Self {
        Self {
            reader,
            buffer: ReceiveBuffer::with_capacity(initial_capacity),
            state: ReceiveState::AwaitingHeader,
        }
    }

    pub fn buffer(&self) -> &ReceiveBuffer {
        &self.buffer
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    /// Waits until one complete message has been received and decoded
    pub async fn next_message(&mut self) -> Result<Message, StreamError> {
        loop {
            match self.state {
                ReceiveState::AwaitingHeader => {
                    self.buffer.reserve(HEADER_SCAN_WINDOW);
                    match try_decode_length(self.buffer.pending())? {
                        Some((expected_len, header_len)) => {
                            self.buffer.consume(header_len);
                            self.state = ReceiveState::AwaitingBody { expected_len };
                        }
                        None => self.fill(1).await?,
                    }
                }
                ReceiveState::AwaitingBody { expected_len } => {
                    self.buffer.reserve(expected_len);
                    let pending = self.buffer.pending_len();

                    if pending >= expected_len {
                        let message = decode_payload(&self.buffer.pending()[..expected_len])?;
                        self.buffer.consume(expected_len);
                        self.state = ReceiveState::AwaitingHeader;
                        return Ok(message);
                    }

                    self.fill(expected_len - pending).await?;
                }
            }
        }
    }

    // Callers reserve first, so free space always covers `at_least`.
    async fn fill(&mut self, at_least: usize) -> Result<(), StreamError> {
        let mut received = 0;

        while received < at_least {
            let read = self.reader.read(self.buffer.free_space_mut()).await?;
            if read == 0 {
                let between_frames = self.state == ReceiveState::AwaitingHeader
                    && self.buffer.pending_len() == 0;
                return Err(if between_frames {
                    StreamError::Closed
                } else {
                    StreamError::Transport(io::ErrorKind::UnexpectedEof.into())
                });
            }
            self.buffer.commit(read);
            received += read;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Frame, MessageKind};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tokio_test::io::Builder;

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::text("alice", ["hello"]),
            Message::command("bob", "dir"),
            Message::text("carol", ["x".repeat(300), String::new(), "tail".to_string()]),
            Message {
                kind: MessageKind::Text,
                author: String::new(),
                text: Vec::new(),
            },
        ]
    }

    fn encode_all(messages: &[Message]) -> Vec<u8> {
        messages
            .iter()
            .flat_map(|message| Frame::encode(message).unwrap().as_bytes().to_vec())
            .collect()
    }

    fn split_randomly(bytes: &[u8], rng: &mut StdRng) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let len = rng.gen_range(1..=(bytes.len() - offset).min(17));
            chunks.push(bytes[offset..offset + len].to_vec());
            offset += len;
        }
        chunks
    }

    #[test]
    fn test_buffer_reserve_within_capacity() {
        let mut buffer = ReceiveBuffer::with_capacity(16);
        buffer.reserve(8);
        assert_eq!(buffer.capacity(), 16);
        assert_eq!(buffer.consumed_offset(), 0);
    }

    #[test]
    fn test_buffer_compacts_before_growing() {
        let mut buffer = ReceiveBuffer::with_capacity(8);
        buffer.free_space_mut()[..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        buffer.commit(6);
        buffer.consume(4);

        // 4 consumed + 6 required > 8, but 2 pending + 6 required fits after compaction
        buffer.reserve(6);

        assert_eq!(buffer.capacity(), 8);
        assert_eq!(buffer.consumed_offset(), 0);
        assert_eq!(buffer.pending(), &[5, 6]);
    }

    #[test]
    fn test_buffer_grows_when_compaction_is_not_enough() {
        let mut buffer = ReceiveBuffer::with_capacity(4);
        buffer.free_space_mut()[..4].copy_from_slice(&[9, 8, 7, 6]);
        buffer.commit(4);
        buffer.consume(1);

        buffer.reserve(10);

        assert_eq!(buffer.capacity(), 10);
        assert_eq!(buffer.consumed_offset(), 0);
        assert_eq!(buffer.pending(), &[8, 7, 6]);
    }

    #[test]
    fn test_buffer_never_shrinks() {
        let mut buffer = ReceiveBuffer::with_capacity(32);
        buffer.reserve(4);
        assert_eq!(buffer.capacity(), 32);
        buffer.reserve(64);
        assert_eq!(buffer.capacity(), 64);
        buffer.reserve(1);
        assert_eq!(buffer.capacity(), 64);
    }

    #[tokio::test]
    async fn test_single_read_yields_message() {
        let message = Message::text("alice", ["hi"]);
        let bytes = encode_all(&[message.clone()]);
        let reader = Builder::new().read(&bytes).build();
        let mut pipeline = ReceivePipeline::new(reader, 64);

        assert_eq!(pipeline.next_message().await.unwrap(), message);
        assert_eq!(pipeline.state(), ReceiveState::AwaitingHeader);
        assert!(matches!(
            pipeline.next_message().await,
            Err(StreamError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_byte_at_a_time_delivery() {
        let messages = sample_messages();
        let bytes = encode_all(&messages);
        let mut builder = Builder::new();
        for byte in &bytes {
            builder.read(std::slice::from_ref(byte));
        }
        let mut pipeline = ReceivePipeline::new(builder.build(), 4);

        for expected in &messages {
            assert_eq!(&pipeline.next_message().await.unwrap(), expected);
        }
        assert!(matches!(
            pipeline.next_message().await,
            Err(StreamError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_random_chunk_boundaries_roundtrip() {
        let messages = sample_messages();
        let bytes = encode_all(&messages);
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..50 {
            let mut builder = Builder::new();
            for chunk in split_randomly(&bytes, &mut rng) {
                builder.read(&chunk);
            }
            let initial_capacity = rng.gen_range(0..64);
            let mut pipeline = ReceivePipeline::new(builder.build(), initial_capacity);
            let mut largest_request = HEADER_SCAN_WINDOW;
            let mut last_capacity = pipeline.buffer().capacity();

            for expected in &messages {
                assert_eq!(&pipeline.next_message().await.unwrap(), expected);

                let capacity = pipeline.buffer().capacity();
                assert!(capacity >= last_capacity);
                last_capacity = capacity;

                let frame = Frame::encode(expected).unwrap();
                let (payload_len, _) = try_decode_length(frame.as_bytes()).unwrap().unwrap();
                largest_request = largest_request.max(payload_len);
                assert!(capacity >= largest_request);
            }
            assert!(matches!(
                pipeline.next_message().await,
                Err(StreamError::Closed)
            ));
        }
    }

    #[tokio::test]
    async fn test_header_already_buffered_needs_no_extra_read() {
        let message = Message::text("dan", ["buffered"]);
        let frame = Frame::encode(&message).unwrap();
        let (header, body) = frame.as_bytes().split_at(1);
        let mut combined = header.to_vec();
        combined.extend_from_slice(&body[..3]);
        let reader = Builder::new().read(&combined).read(&body[3..]).build();
        let mut pipeline = ReceivePipeline::new(reader, 256);

        assert_eq!(pipeline.next_message().await.unwrap(), message);
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_transport_error() {
        let frame = Frame::encode(&Message::text("eve", ["cut short"])).unwrap();
        let reader = Builder::new().read(&frame.as_bytes()[..5]).build();
        let mut pipeline = ReceivePipeline::new(reader, 64);

        match pipeline.next_message().await {
            Err(StreamError::Transport(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_eof_mid_header_is_transport_error() {
        let reader = Builder::new().read(&[0x80]).build();
        let mut pipeline = ReceivePipeline::new(reader, 64);

        assert!(matches!(
            pipeline.next_message().await,
            Err(StreamError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_unterminated_header_rejected_without_waiting() {
        let reader = Builder::new().read(&[0x80, 0x80, 0x80]).build();
        let mut pipeline = ReceivePipeline::new(reader, 64);

        assert!(matches!(
            pipeline.next_message().await,
            Err(StreamError::Protocol(FrameError::HeaderTooLong))
        ));
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_protocol_error() {
        let reader = Builder::new().read(&[0x04, 0xde, 0xad, 0xbe, 0xef]).build();
        let mut pipeline = ReceivePipeline::new(reader, 64);

        assert!(matches!(
            pipeline.next_message().await,
            Err(StreamError::Protocol(FrameError::Decode(_)))
        ));
    }

    #[tokio::test]
    async fn test_read_error_is_transport_error() {
        let reader = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut pipeline = ReceivePipeline::new(reader, 64);

        match pipeline.next_message().await {
            Err(StreamError::Transport(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_large_frame_grows_small_buffer() {
        let message = Message::text("fay", ["z".repeat(5000)]);
        let bytes = encode_all(&[message.clone()]);
        let reader = Builder::new().read(&bytes).build();
        let mut pipeline = ReceivePipeline::new(reader, 8);

        assert_eq!(pipeline.next_message().await.unwrap(), message);
        assert!(pipeline.buffer().capacity() >= bytes.len() - 2);
    }
}
