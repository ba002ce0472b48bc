//! Audio playback contract.
//!
//! The production implementation wires an `AVAudioPlayerNode` into the
//! platform mixer: `configure` builds the output format from the
//! negotiated config, and `schedule` queues one PCM buffer for playback at
//! the node's next available slot. The mixer's jitter buffer lives in the
//! application layer; this sink only plays.

use std::sync::Mutex;

use bridge_core::protocol::handshake::AudioConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no audio output device")]
    NoDevice,

    #[error("output format unsupported: {0}")]
    FormatUnsupported(String),
}

/// Plays PCM buffers in the configured format.
pub trait AudioSink: Send + Sync {
    /// Builds the output format. Called once per session, before the
    /// first `schedule`.
    fn configure(&self, config: &AudioConfig) -> Result<(), PlaybackError>;

    /// Queues one interleaved int16 little-endian buffer for playback.
    fn schedule(&self, timestamp_ms: i64, pcm: &[u8]);
}

/// Records scheduled buffers; the test double and headless fallback.
#[derive(Default)]
pub struct RecordingAudioSink {
    pub configured: Mutex<Option<AudioConfig>>,
    pub scheduled: Mutex<Vec<(i64, Vec<u8>)>>,
}

impl RecordingAudioSink {
    pub fn scheduled_count(&self) -> usize {
        self.scheduled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl AudioSink for RecordingAudioSink {
    fn configure(&self, config: &AudioConfig) -> Result<(), PlaybackError> {
        *self.configured.lock().unwrap_or_else(|e| e.into_inner()) = Some(*config);
        Ok(())
    }

    fn schedule(&self, timestamp_ms: i64, pcm: &[u8]) {
        self.scheduled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((timestamp_ms, pcm.to_vec()));
    }
}
