//! Frame presentation contract.
//!
//! The receiver reconstructs absolute frames and hands them here; what
//! "presenting" means (a Metal layer, a window, a test buffer) is the
//! implementation's business. Encoded frames pass through untouched for a
//! hardware decoder to consume.

use std::sync::Mutex;

use bridge_core::video::frame::EncodedFrameHeader;

/// Geometry of one reconstructed raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDesc {
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    pub frame_number: i32,
}

/// Consumes reconstructed (or still-encoded) frames.
pub trait FrameSink: Send + Sync {
    /// Presents one absolute BGRA frame.
    fn present_raw(&self, desc: FrameDesc, pixels: &[u8]);

    /// Hands one encoded access unit to the platform decoder.
    fn present_encoded(&self, header: EncodedFrameHeader, nal: &[u8]);
}

/// Records presented frames; the test double and headless fallback.
#[derive(Default)]
pub struct RecordingFrameSink {
    pub raw: Mutex<Vec<(FrameDesc, Vec<u8>)>>,
    pub encoded: Mutex<Vec<(EncodedFrameHeader, Vec<u8>)>>,
}

impl RecordingFrameSink {
    pub fn raw_count(&self) -> usize {
        self.raw.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Pixels of the most recently presented raw frame.
    pub fn last_raw_pixels(&self) -> Option<Vec<u8>> {
        self.raw
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .map(|(_, pixels)| pixels.clone())
    }
}

impl FrameSink for RecordingFrameSink {
    fn present_raw(&self, desc: FrameDesc, pixels: &[u8]) {
        self.raw
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((desc, pixels.to_vec()));
    }

    fn present_encoded(&self, header: EncodedFrameHeader, nal: &[u8]) {
        self.encoded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((header, nal.to_vec()));
    }
}
