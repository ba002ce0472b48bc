//! The two on-wire layouts carried inside `VideoFrame` payloads.
//!
//! Raw BGRA:
//! ```text
//! [width:i32][height:i32][stride:i32][frame_number:i32][pixels:N]
//! ```
//! Encoded (H.264/H.265):
//! ```text
//! [width:i32][height:i32][codec:u8][frame_type:u8][pts_us:i64][data_len:i32][nal:N]
//! ```
//! A session commits to exactly one layout via `VideoConfig.Codec`; both
//! parsers live here so either peer can speak either layout.

use thiserror::Error;

/// Size of the raw BGRA sub-header.
pub const RAW_HEADER_LEN: usize = 16;
/// Size of the encoded sub-header.
pub const ENCODED_HEADER_LEN: usize = 22;

/// Errors produced while parsing a frame payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameLayoutError {
    #[error("frame payload too short: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    #[error("frame header field out of range: {0}")]
    FieldOutOfRange(&'static str),

    #[error("unknown encoded frame type: {0}")]
    UnknownFrameType(u8),

    #[error("pixel data length {actual} does not match header ({expected})")]
    LengthMismatch { expected: usize, actual: usize },
}

fn read_i32(p: &[u8], off: usize) -> i32 {
    i32::from_le_bytes([p[off], p[off + 1], p[off + 2], p[off + 3]])
}

// ── Raw BGRA layout ───────────────────────────────────────────────────────────

/// 16-byte sub-header preceding raw BGRA pixel data (absolute or delta).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrameHeader {
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    pub frame_number: i32,
}

impl RawFrameHeader {
    /// Appends the sub-header to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.width.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.stride.to_le_bytes());
        buf.extend_from_slice(&self.frame_number.to_le_bytes());
    }

    /// Parses the sub-header and returns it with the trailing pixel bytes.
    ///
    /// # Errors
    ///
    /// Rejects truncated payloads, non-positive dimensions, and pixel data
    /// shorter than one stride-row per line.
    pub fn parse(payload: &[u8]) -> Result<(Self, &[u8]), FrameLayoutError> {
        if payload.len() < RAW_HEADER_LEN {
            return Err(FrameLayoutError::Truncated {
                needed: RAW_HEADER_LEN,
                available: payload.len(),
            });
        }
        let header = Self {
            width: read_i32(payload, 0),
            height: read_i32(payload, 4),
            stride: read_i32(payload, 8),
            frame_number: read_i32(payload, 12),
        };
        if header.width <= 0 || header.height <= 0 {
            return Err(FrameLayoutError::FieldOutOfRange("width/height"));
        }
        if header.stride < header.width * 4 {
            return Err(FrameLayoutError::FieldOutOfRange("stride"));
        }
        let pixels = &payload[RAW_HEADER_LEN..];
        let expected = header.stride as usize * header.height as usize;
        if pixels.len() != expected {
            return Err(FrameLayoutError::LengthMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok((header, pixels))
    }

    /// Pixel byte count implied by the header.
    pub fn pixel_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }
}

// ── Encoded layout ────────────────────────────────────────────────────────────

/// Encoded frame classification. `Idr` is the only self-contained kind and
/// the only one that carries the `KEY_FRAME` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    P = 0,
    Idr = 1,
    B = 2,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameLayoutError;

    fn try_from(value: u8) -> Result<Self, FrameLayoutError> {
        match value {
            0 => Ok(FrameType::P),
            1 => Ok(FrameType::Idr),
            2 => Ok(FrameType::B),
            other => Err(FrameLayoutError::UnknownFrameType(other)),
        }
    }
}

/// 22-byte sub-header preceding an encoded NAL unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedFrameHeader {
    pub width: i32,
    pub height: i32,
    pub codec: u8,
    pub frame_type: FrameType,
    pub pts_us: i64,
    pub data_len: i32,
}

impl EncodedFrameHeader {
    /// Appends the sub-header to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.width.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.push(self.codec);
        buf.push(self.frame_type as u8);
        buf.extend_from_slice(&self.pts_us.to_le_bytes());
        buf.extend_from_slice(&self.data_len.to_le_bytes());
    }

    /// Parses the sub-header and returns it with the trailing NAL bytes.
    pub fn parse(payload: &[u8]) -> Result<(Self, &[u8]), FrameLayoutError> {
        if payload.len() < ENCODED_HEADER_LEN {
            return Err(FrameLayoutError::Truncated {
                needed: ENCODED_HEADER_LEN,
                available: payload.len(),
            });
        }
        let width = read_i32(payload, 0);
        let height = read_i32(payload, 4);
        let codec = payload[8];
        let frame_type = FrameType::try_from(payload[9])?;
        let pts_us = i64::from_le_bytes([
            payload[10],
            payload[11],
            payload[12],
            payload[13],
            payload[14],
            payload[15],
            payload[16],
            payload[17],
        ]);
        let data_len = read_i32(payload, 18);

        if width <= 0 || height <= 0 {
            return Err(FrameLayoutError::FieldOutOfRange("width/height"));
        }
        if data_len < 0 {
            return Err(FrameLayoutError::FieldOutOfRange("data_len"));
        }
        let nal = &payload[ENCODED_HEADER_LEN..];
        if nal.len() != data_len as usize {
            return Err(FrameLayoutError::LengthMismatch {
                expected: data_len as usize,
                actual: nal.len(),
            });
        }
        Ok((
            Self {
                width,
                height,
                codec,
                frame_type,
                pts_us,
                data_len,
            },
            nal,
        ))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
