//! Loopback audio capture contract.
//!
//! The platform implementation delivers interleaved PCM in the device's
//! native mix format (commonly 32-bit float, 48 kHz, stereo). Conversion to
//! the negotiated wire format happens in the audio pipeline, not here.

use std::time::Duration;

use thiserror::Error;

pub mod windows;

/// Errors surfaced by audio capture. All of them are pipeline-local: the
/// session survives with video and KVM still running.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio render device available")]
    NoDevice,

    #[error("audio format unsupported: {0}")]
    FormatUnsupported(String),

    #[error("audio backend error: {0}")]
    Backend(String),
}

/// Native sample encoding of a captured block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    F32,
    I16,
}

/// Capture-side stream format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

/// One captured block of interleaved samples in the device format.
#[derive(Debug, Clone, PartialEq)]
pub enum PcmBlock {
    F32(Vec<f32>),
    I16(Vec<i16>),
}

impl PcmBlock {
    pub fn sample_count(&self) -> usize {
        match self {
            PcmBlock::F32(v) => v.len(),
            PcmBlock::I16(v) => v.len(),
        }
    }
}

/// A source of loop-captured system audio.
pub trait AudioSource: Send {
    fn format(&self) -> AudioFormat;

    /// Blocks up to `timeout` for the next device period. `Ok(None)` means
    /// the period elapsed without data (a normal idle return).
    ///
    /// # Errors
    ///
    /// [`AudioError`] for device failures; the pipeline logs and stops.
    fn next_block(&mut self, timeout: Duration) -> Result<Option<PcmBlock>, AudioError>;
}

/// Scripted source for tests: plays blocks in order, then idles.
pub struct ScriptedAudioSource {
    format: AudioFormat,
    blocks: std::collections::VecDeque<PcmBlock>,
}

impl ScriptedAudioSource {
    pub fn new(format: AudioFormat, blocks: Vec<PcmBlock>) -> Self {
        Self {
            format,
            blocks: blocks.into(),
        }
    }
}

impl AudioSource for ScriptedAudioSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn next_block(&mut self, timeout: Duration) -> Result<Option<PcmBlock>, AudioError> {
        match self.blocks.pop_front() {
            Some(block) => Ok(Some(block)),
            None => {
                // Simulate the device period wait of a real capture client.
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }
}
