//! Video receive path: reconstructs absolute frames from the keyframe +
//! XOR-delta stream, or passes encoded frames to the platform decoder.
//!
//! The session commits to one payload layout via `VideoConfig.Codec`. The
//! receiver enforces the keyframe-first invariant: the first frame of a
//! stream, and the first frame after any dimension change, must be
//! self-contained. A delta that arrives without a valid reference is a
//! protocol violation and kills the session.

use std::sync::Arc;

use bridge_core::protocol::handshake::{VideoCodec, VideoConfig};
use bridge_core::protocol::message::MessageFlags;
use bridge_core::video::delta::apply_in_place;
use bridge_core::video::frame::{
    EncodedFrameHeader, FrameLayoutError, FrameType, RawFrameHeader,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::infrastructure::display::{FrameDesc, FrameSink};

/// Errors from the video receive path. All of them are session-fatal.
#[derive(Debug, Error)]
pub enum VideoReceiveError {
    #[error("video frame arrived before VideoConfig")]
    ConfigMissing,

    #[error("compressed frame with no reference frame to apply it to")]
    DeltaBeforeKeyframe,

    #[error("delta length {got} does not match reference length {expected}")]
    DeltaSizeMismatch { expected: usize, got: usize },

    #[error("raw frame carries neither KeyFrame nor Compressed flag")]
    UnflaggedFrame,

    #[error("KeyFrame flag disagrees with encoded frame type {0:?}")]
    FlagMismatch(FrameType),

    #[error(transparent)]
    Layout(#[from] FrameLayoutError),
}

/// Reassembles the video stream for one session.
pub struct VideoReceiver {
    sink: Arc<dyn FrameSink>,
    config: Option<VideoConfig>,
    /// Accumulated absolute pixels for XOR-delta application.
    reference: Option<Vec<u8>>,
    reference_desc: Option<FrameDesc>,
    frames_presented: u64,
    keyframes_received: u64,
}

impl VideoReceiver {
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self {
            sink,
            config: None,
            reference: None,
            reference_desc: None,
            frames_presented: 0,
            keyframes_received: 0,
        }
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn keyframes_received(&self) -> u64 {
        self.keyframes_received
    }

    /// Applies a `VideoConfig`, committing the session to one layout. The
    /// reference is discarded: a config change restarts the stream and the
    /// next frame must be a keyframe again.
    pub fn handle_config(&mut self, config: VideoConfig) {
        info!(
            "video stream: {:?} {}x{} @{}fps",
            config.codec, config.width, config.height, config.target_fps
        );
        self.config = Some(config);
        self.reference = None;
        self.reference_desc = None;
    }

    /// Consumes one `VideoFrame` payload.
    ///
    /// # Errors
    ///
    /// [`VideoReceiveError`] for layout and invariant violations; the
    /// session tears down on any of them.
    pub fn handle_frame(
        &mut self,
        flags: MessageFlags,
        payload: &[u8],
    ) -> Result<(), VideoReceiveError> {
        let config = self.config.ok_or(VideoReceiveError::ConfigMissing)?;
        if config.codec.is_encoded() {
            self.handle_encoded(flags, payload)
        } else {
            self.handle_raw(flags, payload)
        }
    }

    fn handle_raw(
        &mut self,
        flags: MessageFlags,
        payload: &[u8],
    ) -> Result<(), VideoReceiveError> {
        let (header, body) = RawFrameHeader::parse(payload)?;
        let desc = FrameDesc {
            width: header.width,
            height: header.height,
            stride: header.stride,
            frame_number: header.frame_number,
        };

        if flags.key_frame() {
            self.keyframes_received += 1;
            self.reference = Some(body.to_vec());
            self.reference_desc = Some(desc);
            self.present_reference(desc);
            return Ok(());
        }

        if !flags.compressed() {
            return Err(VideoReceiveError::UnflaggedFrame);
        }

        // Delta path: dimensions must match the accumulated reference.
        let dims_match = self
            .reference_desc
            .map(|r| (r.width, r.height, r.stride) == (desc.width, desc.height, desc.stride))
            .unwrap_or(false);
        let reference = match (&mut self.reference, dims_match) {
            (Some(reference), true) => reference,
            _ => return Err(VideoReceiveError::DeltaBeforeKeyframe),
        };
        if reference.len() != body.len() {
            return Err(VideoReceiveError::DeltaSizeMismatch {
                expected: reference.len(),
                got: body.len(),
            });
        }

        apply_in_place(reference, body);
        self.reference_desc = Some(desc);
        self.present_reference(desc);
        Ok(())
    }

    fn present_reference(&mut self, desc: FrameDesc) {
        if let Some(reference) = &self.reference {
            self.sink.present_raw(desc, reference);
            self.frames_presented += 1;
        }
    }

    fn handle_encoded(
        &mut self,
        flags: MessageFlags,
        payload: &[u8],
    ) -> Result<(), VideoReceiveError> {
        let (header, nal) = EncodedFrameHeader::parse(payload)?;

        // The flag and the stream-level frame type must agree.
        let is_idr = matches!(header.frame_type, FrameType::Idr);
        if flags.key_frame() != is_idr {
            return Err(VideoReceiveError::FlagMismatch(header.frame_type));
        }
        if self.keyframes_received == 0 && !is_idr {
            return Err(VideoReceiveError::DeltaBeforeKeyframe);
        }
        if is_idr {
            self.keyframes_received += 1;
        }

        debug!(
            "encoded frame: {:?} {} bytes pts={}us",
            header.frame_type,
            nal.len(),
            header.pts_us
        );
        self.sink.present_encoded(header, nal);
        self.frames_presented += 1;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
