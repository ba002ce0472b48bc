//! Audio playback mixer with a small jitter buffer.
//!
//! `AudioConfig` arrives first and builds the output format. Each
//! `AudioData` payload drops its 8-byte timestamp prefix (kept as the
//! ordering key) and lands in a jitter buffer of at most five pending
//! buffers: deep enough to absorb network arrival variance, shallow
//! enough that audio never drifts far behind. When the buffer is full the
//! oldest packet is dropped. A playback worker drains the buffer onto the
//! platform sink. `AudioControl` switches routing; `Muted` drains to
//! nowhere.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bridge_core::protocol::handshake::{AudioConfig, AudioControl, AudioRoute};
use bridge_core::queue::DropOldestQueue;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::infrastructure::audio_output::{AudioSink, PlaybackError};

/// Jitter buffer depth (pending playback buffers).
const JITTER_DEPTH: usize = 5;

#[derive(Debug, Error)]
pub enum AudioMixerError {
    #[error("AudioData arrived before AudioConfig")]
    ConfigMissing,

    #[error("AudioData payload too short for the timestamp prefix")]
    ShortPacket,

    #[error("audio output failed: {0}")]
    Playback(#[from] PlaybackError),

    #[error("bad audio control payload: {0}")]
    BadControl(#[from] serde_json::Error),
}

/// Running playback mixer for one session.
pub struct AudioMixer {
    sink: Arc<dyn AudioSink>,
    jitter: Arc<DropOldestQueue<(i64, Vec<u8>)>>,
    configured: AtomicBool,
    route: Arc<AtomicU8>,
    packets_received: AtomicU64,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

fn route_to_byte(route: AudioRoute) -> u8 {
    match route {
        AudioRoute::WindowsToMac => 0,
        AudioRoute::MacToWindows => 1,
        AudioRoute::Both => 2,
        AudioRoute::Muted => 3,
    }
}

impl AudioMixer {
    /// Creates the mixer and its playback worker.
    pub fn start(sink: Arc<dyn AudioSink>) -> Self {
        let jitter: Arc<DropOldestQueue<(i64, Vec<u8>)>> =
            Arc::new(DropOldestQueue::new(JITTER_DEPTH));
        let route = Arc::new(AtomicU8::new(route_to_byte(AudioRoute::WindowsToMac)));

        let worker_sink = Arc::clone(&sink);
        let worker_jitter = Arc::clone(&jitter);
        let worker = std::thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                while let Some((timestamp, pcm)) = worker_jitter.pop() {
                    worker_sink.schedule(timestamp, &pcm);
                }
                debug!("audio playback worker exiting");
            })
            .expect("failed to spawn audio playback thread");

        Self {
            sink,
            jitter,
            configured: AtomicBool::new(false),
            route,
            packets_received: AtomicU64::new(0),
            worker: std::sync::Mutex::new(Some(worker)),
        }
    }

    /// Applies the negotiated output format. Must precede any data.
    ///
    /// # Errors
    ///
    /// [`AudioMixerError::Playback`] when the platform rejects the format;
    /// the audio pipeline stops but the session continues.
    pub fn handle_config(&self, payload: &[u8]) -> Result<(), AudioMixerError> {
        let config = AudioConfig::from_json(payload)
            .map_err(|e| PlaybackError::FormatUnsupported(e.to_string()))?;
        info!(
            "audio output: {} Hz, {} ch, {} bit, {} ms buffer",
            config.sample_rate, config.channels, config.bits_per_sample, config.buffer_ms
        );
        self.sink.configure(&config)?;
        self.configured.store(true, Ordering::Release);
        Ok(())
    }

    /// Enqueues one `AudioData` payload.
    ///
    /// # Errors
    ///
    /// [`AudioMixerError::ConfigMissing`] before a config, and
    /// [`AudioMixerError::ShortPacket`] for a payload without a full
    /// timestamp prefix.
    pub fn handle_data(&self, payload: &[u8]) -> Result<(), AudioMixerError> {
        if !self.configured.load(Ordering::Acquire) {
            return Err(AudioMixerError::ConfigMissing);
        }
        if payload.len() < 8 {
            return Err(AudioMixerError::ShortPacket);
        }
        self.packets_received.fetch_add(1, Ordering::Relaxed);

        // A muted route drains to nowhere.
        if self.route.load(Ordering::Relaxed) == route_to_byte(AudioRoute::Muted) {
            return Ok(());
        }

        let timestamp = i64::from_le_bytes(payload[..8].try_into().expect("8-byte prefix"));
        let pcm = payload[8..].to_vec();
        if self.jitter.push((timestamp, pcm)).is_some() {
            debug!("jitter buffer full; dropped oldest audio packet");
        }
        Ok(())
    }

    /// Applies an `AudioControl` routing change.
    ///
    /// # Errors
    ///
    /// [`AudioMixerError::BadControl`] for malformed JSON.
    pub fn handle_control(&self, payload: &[u8]) -> Result<(), AudioMixerError> {
        let control: AudioControl = serde_json::from_slice(payload)?;
        info!("audio routing: {:?}", control.route);
        self.route
            .store(route_to_byte(control.route), Ordering::Relaxed);
        Ok(())
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    /// Packets evicted from the jitter buffer.
    pub fn packets_dropped(&self) -> u64 {
        self.jitter.dropped()
    }

    /// Drains the jitter buffer and joins the worker. Idempotent.
    pub fn stop(&self) {
        self.jitter.close();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = handle {
            if worker.join().is_err() {
                warn!("audio playback worker panicked during shutdown");
            }
        }
    }
}

impl Drop for AudioMixer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
