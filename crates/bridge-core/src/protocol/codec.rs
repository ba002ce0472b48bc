//! Framing codec: header encoding and the incremental message decoder.
//!
//! Wire format:
//! ```text
//! [type:u16][flags:u16][payload_len:4][payload:N]
//! ```
//! Total header size: 8 bytes. All multi-byte integers are little-endian.
//!
//! Encoding is a pure function producing one contiguous buffer so the
//! transport can issue a single socket write per message. Decoding is
//! incremental: callers feed arbitrary byte chunks into a
//! [`MessageDecoder`] and drain whole messages as they complete, which is
//! what the per-channel read loop does with its receive buffer.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

use crate::protocol::message::{MessageFlags, MessageHeader, MessageType, HEADER_SIZE};

/// Largest payload the decoder will accept. Anything larger is treated as
/// a corrupt stream rather than an allocation request.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// Errors produced while framing or de-framing messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The stream ended before a complete 8-byte header arrived.
    #[error("stream ended inside a message header: {available} of {HEADER_SIZE} bytes")]
    ShortHeader { available: usize },

    /// The stream ended before the declared payload arrived.
    #[error("stream ended inside a payload: got {available} of {needed} bytes")]
    ShortPayload { needed: usize, available: usize },

    /// The declared payload length exceeds the configured cap.
    #[error("payload length {declared} exceeds cap of {max} bytes")]
    OversizedPayload { declared: usize, max: usize },

    /// The type word in the header is not part of the closed enumeration.
    #[error("unknown message type: 0x{0:04X}")]
    UnknownType(u16),
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encodes one complete message (header + payload) into a fresh buffer.
pub fn encode_message(msg_type: MessageType, flags: MessageFlags, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    encode_into(&mut buf, msg_type, flags, payload);
    buf
}

/// Encodes one complete message into `buf`, appending to existing content.
///
/// Used by the send path to frame into a pooled buffer without an extra
/// allocation.
pub fn encode_into(buf: &mut Vec<u8>, msg_type: MessageType, flags: MessageFlags, payload: &[u8]) {
    buf.extend_from_slice(&(msg_type as u16).to_le_bytes());
    buf.extend_from_slice(&flags.0.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Incremental de-framer.
///
/// Feed bytes with [`extend`](MessageDecoder::extend) in whatever chunks
/// the socket delivers, then drain completed messages with
/// [`next`](MessageDecoder::next). When the byte stream ends, call
/// [`finish`](MessageDecoder::finish) to distinguish a clean boundary from
/// a truncated message.
#[derive(Debug)]
pub struct MessageDecoder {
    buf: BytesMut,
    max_payload: usize,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD_LEN)
    }

    /// Creates a decoder with a custom payload cap (tests use small caps).
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(64 * 1024),
            max_payload,
        }
    }

    /// Appends a chunk of received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the next complete message, or `None` if more bytes are
    /// needed.
    ///
    /// # Errors
    ///
    /// [`FramingError::OversizedPayload`] as soon as a header declares a
    /// payload beyond the cap, and [`FramingError::UnknownType`] for a type
    /// word outside the closed enumeration. Both indicate a corrupt or
    /// incompatible stream and poison the connection.
    pub fn next(&mut self) -> Result<Option<(MessageHeader, Bytes)>, FramingError> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let raw_type = u16::from_le_bytes([self.buf[0], self.buf[1]]);
        let flags = MessageFlags(u16::from_le_bytes([self.buf[2], self.buf[3]]));
        let payload_len =
            u32::from_le_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;

        if payload_len > self.max_payload {
            return Err(FramingError::OversizedPayload {
                declared: payload_len,
                max: self.max_payload,
            });
        }

        if self.buf.len() < HEADER_SIZE + payload_len {
            // Reserve up front so repeated small reads don't reallocate.
            self.buf.reserve(HEADER_SIZE + payload_len - self.buf.len());
            return Ok(None);
        }

        let msg_type =
            MessageType::try_from(raw_type).map_err(|_| FramingError::UnknownType(raw_type))?;

        self.buf.advance(HEADER_SIZE);
        let payload = self.buf.split_to(payload_len).freeze();

        Ok(Some((
            MessageHeader {
                msg_type,
                flags,
                payload_len: payload_len as u32,
            },
            payload,
        )))
    }

    /// Verifies the stream ended on a message boundary.
    ///
    /// # Errors
    ///
    /// [`FramingError::ShortHeader`] or [`FramingError::ShortPayload`] when
    /// residual bytes form a truncated message.
    pub fn finish(&self) -> Result<(), FramingError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        if self.buf.len() < HEADER_SIZE {
            return Err(FramingError::ShortHeader {
                available: self.buf.len(),
            });
        }
        let payload_len =
            u32::from_le_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;
        Err(FramingError::ShortPayload {
            needed: payload_len,
            available: self.buf.len() - HEADER_SIZE,
        })
    }
}

impl Default for MessageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<(MessageHeader, Bytes)> {
        let mut decoder = MessageDecoder::new();
        decoder.extend(bytes);
        let mut out = Vec::new();
        while let Some(msg) = decoder.next().expect("decode failed") {
            out.push(msg);
        }
        decoder.finish().expect("stream truncated");
        out
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let payload = b"hello bridge";
        let bytes = encode_message(
            MessageType::Heartbeat,
            MessageFlags(MessageFlags::PRIORITY),
            payload,
        );

        let msgs = decode_all(&bytes);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].0.msg_type, MessageType::Heartbeat);
        assert_eq!(msgs[0].0.flags.0, MessageFlags::PRIORITY);
        assert_eq!(msgs[0].0.payload_len, payload.len() as u32);
        assert_eq!(&msgs[0].1[..], payload);
    }

    #[test]
    fn test_empty_payload_round_trips() {
        let bytes = encode_message(MessageType::Disconnect, MessageFlags::NONE, &[]);
        assert_eq!(bytes.len(), HEADER_SIZE);

        let msgs = decode_all(&bytes);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].0.msg_type, MessageType::Disconnect);
        assert!(msgs[0].1.is_empty());
    }

    #[test]
    fn test_header_is_little_endian() {
        let bytes = encode_message(MessageType::VideoFrame, MessageFlags::NONE, &[0xAA]);
        // VideoFrame = 0x0100 → low byte first.
        assert_eq!(bytes[0], 0x00);
        assert_eq!(bytes[1], 0x01);
        // payload_len = 1
        assert_eq!(&bytes[4..8], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_concatenated_messages_decode_in_order() {
        let mut stream = Vec::new();
        for i in 0u8..10 {
            stream.extend_from_slice(&encode_message(
                MessageType::AudioData,
                MessageFlags::NONE,
                &[i; 3],
            ));
        }

        let msgs = decode_all(&stream);
        assert_eq!(msgs.len(), 10);
        for (i, (_, payload)) in msgs.iter().enumerate() {
            assert_eq!(&payload[..], &[i as u8; 3]);
        }
    }

    #[test]
    fn test_decode_is_chunking_independent() {
        let mut stream = Vec::new();
        for i in 0u8..5 {
            stream.extend_from_slice(&encode_message(
                MessageType::MouseMove,
                MessageFlags(MessageFlags::PRIORITY),
                &[i; 7],
            ));
        }

        // Feed the stream one byte at a time.
        let mut decoder = MessageDecoder::new();
        let mut count = 0u8;
        for byte in &stream {
            decoder.extend(std::slice::from_ref(byte));
            while let Some((header, payload)) = decoder.next().unwrap() {
                assert_eq!(header.msg_type, MessageType::MouseMove);
                assert_eq!(&payload[..], &[count; 7]);
                count += 1;
            }
        }
        assert_eq!(count, 5);
        decoder.finish().unwrap();
    }

    #[test]
    fn test_truncated_header_reports_short_header() {
        let bytes = encode_message(MessageType::Heartbeat, MessageFlags::NONE, b"x");
        for cut in 1..HEADER_SIZE {
            let mut decoder = MessageDecoder::new();
            decoder.extend(&bytes[..cut]);
            assert_eq!(decoder.next().unwrap(), None);
            assert_eq!(
                decoder.finish(),
                Err(FramingError::ShortHeader { available: cut })
            );
        }
    }

    #[test]
    fn test_truncated_payload_reports_short_payload() {
        let bytes = encode_message(MessageType::VideoFrame, MessageFlags::NONE, &[7u8; 32]);
        for cut in HEADER_SIZE..bytes.len() {
            let mut decoder = MessageDecoder::new();
            decoder.extend(&bytes[..cut]);
            assert_eq!(decoder.next().unwrap(), None);
            assert_eq!(
                decoder.finish(),
                Err(FramingError::ShortPayload {
                    needed: 32,
                    available: cut - HEADER_SIZE,
                })
            );
        }
    }

    #[test]
    fn test_oversized_payload_is_rejected_before_buffering() {
        let mut decoder = MessageDecoder::with_max_payload(16);
        let mut header = Vec::new();
        header.extend_from_slice(&(MessageType::VideoFrame as u16).to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(&17u32.to_le_bytes());
        decoder.extend(&header);

        assert_eq!(
            decoder.next(),
            Err(FramingError::OversizedPayload {
                declared: 17,
                max: 16
            })
        );
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let mut bytes = encode_message(MessageType::Heartbeat, MessageFlags::NONE, &[]);
        bytes[0] = 0xEF;
        bytes[1] = 0xBE;

        let mut decoder = MessageDecoder::new();
        decoder.extend(&bytes);
        assert_eq!(decoder.next(), Err(FramingError::UnknownType(0xBEEF)));
    }

    #[test]
    fn test_encode_into_appends_after_existing_content() {
        let mut buf = vec![0xFFu8; 4];
        encode_into(&mut buf, MessageType::Heartbeat, MessageFlags::NONE, b"ab");
        assert_eq!(&buf[..4], &[0xFF; 4]);
        assert_eq!(buf.len(), 4 + HEADER_SIZE + 2);
    }
}
