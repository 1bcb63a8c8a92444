//! Length-prefixed framing for relay messages
//!
//! A frame is `varint(payload_len) ++ payload`. The varint stores seven value
//! bits per byte, least-significant group first, with the high bit set on
//! every byte except the last. Headers are limited to [`HEADER_SCAN_WINDOW`]
//! bytes, which caps a payload at [`MAX_PAYLOAD_LEN`] bytes.

use crate::Message;
use bincode::Options;
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Maximum number of bytes a length header may occupy
pub const HEADER_SCAN_WINDOW: usize = 3;

/// Largest payload expressible within the header window (2^21 - 1)
pub const MAX_PAYLOAD_LEN: usize = (1 << (7 * HEADER_SCAN_WINDOW)) - 1;

const CONTINUATION_BIT: u8 = 0x80;
const VALUE_MASK: u8 = 0x7f;

/// Failures while building or parsing frames. Every variant is a protocol
/// violation for the connection that produced it.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame header not terminated within the header scan window")]
    HeaderTooLong,

    #[error("payload of {len} bytes exceeds the maximum of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("failed to encode message: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[source] bincode::Error),
}

/// An encoded message ready for transmission.
///
/// Cloning is cheap: the bytes are reference counted, so one frame can sit in
/// any number of outbound queues without being copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    /// Serializes a message and prepends its length header
    pub fn encode(message: &Message) -> Result<Self, FrameError> {
        let payload = payload_options()
            .serialize(message)
            .map_err(FrameError::Encode)?;

        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        let mut buffer = BytesMut::with_capacity(HEADER_SCAN_WINDOW + payload.len());
        encode_length(payload.len() as u32, &mut buffer);
        buffer.extend_from_slice(&payload);
        Ok(Frame(buffer.freeze()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Appends `value` to `out` as a base-128 varint
pub fn encode_length(mut value: u32, out: &mut BytesMut) {
    loop {
        let group = (value as u8) & VALUE_MASK;
        value >>= 7;
        if value == 0 {
            out.put_u8(group);
            return;
        }
        out.put_u8(group | CONTINUATION_BIT);
    }
}

/// Parses a length header from the front of `bytes`.
///
/// Returns `Ok(Some((length, header_len)))` once a terminating byte is found,
/// `Ok(None)` if more bytes are needed, and [`FrameError::HeaderTooLong`] as
/// soon as the scan window is full without a terminator.
pub fn try_decode_length(bytes: &[u8]) -> Result<Option<(usize, usize)>, FrameError> {
    let mut value = 0usize;

    for (index, byte) in bytes.iter().take(HEADER_SCAN_WINDOW).enumerate() {
        value |= usize::from(byte & VALUE_MASK) << (7 * index);
        if byte & CONTINUATION_BIT == 0 {
            return Ok(Some((value, index + 1)));
        }
    }

    if bytes.len() >= HEADER_SCAN_WINDOW {
        Err(FrameError::HeaderTooLong)
    } else {
        Ok(None)
    }
}

/// Decodes exactly one message from a complete payload
pub fn decode_payload(payload: &[u8]) -> Result<Message, FrameError> {
    payload_options()
        .with_limit(payload.len() as u64)
        .deserialize(payload)
        .map_err(FrameError::Decode)
}

// Fixed-width integers; a payload with bytes left over after the message is malformed.
fn payload_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageKind;

    fn encoded(value: u32) -> Vec<u8> {
        let mut buffer = BytesMut::new();
        encode_length(value, &mut buffer);
        buffer.to_vec()
    }

    #[test]
    fn test_varint_single_byte() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(1), vec![0x01]);
        assert_eq!(encoded(127), vec![0x7f]);
    }

    #[test]
    fn test_varint_multi_byte_little_endian_groups() {
        assert_eq!(encoded(128), vec![0x80, 0x01]);
        assert_eq!(encoded(300), vec![0xac, 0x02]);
        assert_eq!(encoded(MAX_PAYLOAD_LEN as u32), vec![0xff, 0xff, 0x7f]);
    }

    #[test]
    fn test_decode_length_complete() {
        assert_eq!(try_decode_length(&[0x05]).unwrap(), Some((5, 1)));
        assert_eq!(try_decode_length(&[0xac, 0x02]).unwrap(), Some((300, 2)));
        assert_eq!(
            try_decode_length(&[0xff, 0xff, 0x7f]).unwrap(),
            Some((MAX_PAYLOAD_LEN, 3))
        );
    }

    #[test]
    fn test_decode_length_ignores_trailing_payload() {
        assert_eq!(try_decode_length(&[0x02, 0xaa, 0xbb]).unwrap(), Some((2, 1)));
    }

    #[test]
    fn test_decode_length_incomplete() {
        assert_eq!(try_decode_length(&[]).unwrap(), None);
        assert_eq!(try_decode_length(&[0x80]).unwrap(), None);
        assert_eq!(try_decode_length(&[0xff, 0xff]).unwrap(), None);
    }

    #[test]
    fn test_decode_length_rejects_unterminated_window() {
        let result = try_decode_length(&[0x80, 0x80, 0x80]);
        assert!(matches!(result, Err(FrameError::HeaderTooLong)));

        let result = try_decode_length(&[0xff, 0xff, 0xff, 0x01]);
        assert!(matches!(result, Err(FrameError::HeaderTooLong)));
    }

    #[test]
    fn test_frame_layout() {
        let message = Message::text("a", ["b"]);
        let frame = Frame::encode(&message).unwrap();
        let payload = payload_options().serialize(&message).unwrap();

        assert_eq!(frame.as_bytes()[0] as usize, payload.len());
        assert_eq!(&frame.as_bytes()[1..], payload.as_slice());
        assert_eq!(frame.len(), payload.len() + 1);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let message = Message::text("dave", ["same", "bytes"]);
        let first = Frame::encode(&message).unwrap();
        let second = Frame::encode(&message).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let message = Message::text("eve", ["x".repeat(MAX_PAYLOAD_LEN)]);
        let result = Frame::encode(&message);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_encode_uses_multi_byte_header_for_large_payload() {
        let message = Message::text("frank", ["y".repeat(1000)]);
        let frame = Frame::encode(&message).unwrap();
        let (length, header_len) = try_decode_length(frame.as_bytes()).unwrap().unwrap();

        assert_eq!(header_len, 2);
        assert_eq!(length + header_len, frame.len());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = decode_payload(&[0xde, 0xad, 0xbe, 0xef]);
        assert!(matches!(result, Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_empty_payload() {
        assert!(matches!(decode_payload(&[]), Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let message = Message::text("gina", ["hi"]);
        let mut payload = payload_options().serialize(&message).unwrap();
        payload.push(0);
        assert!(matches!(decode_payload(&payload), Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let message = Message::text("hal", ["hi"]);
        let mut payload = payload_options().serialize(&message).unwrap();
        // The enum discriminant is the leading u32.
        payload[0] = 7;
        assert!(matches!(decode_payload(&payload), Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_decode_payload_roundtrip() {
        let message = Message {
            kind: MessageKind::Command,
            author: "ivy".to_string(),
            text: vec!["dir".to_string()],
        };
        let payload = payload_options().serialize(&message).unwrap();
        assert_eq!(decode_payload(&payload).unwrap(), message);
    }
}
