//! Audio capture, conversion, and send pipeline.
//!
//! The capture callback hands native-format PCM to this pipeline, which
//! runs the silence gate first (a silent desktop costs zero network),
//! converts to the negotiated wire format (int16 little-endian at the
//! target rate), prepends the 8-byte monotonic timestamp, and queues the
//! packet for the send worker. The queue is capacity-10 drop-oldest: a
//! network stall yields freshness, not buildup.
//!
//! Audio failures are pipeline-local by policy: the pipeline logs, stops,
//! and the session keeps running with video and KVM.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bridge_core::protocol::handshake::AudioConfig;
use bridge_core::protocol::message::{MessageFlags, MessageType};
use bridge_core::queue::DropOldestQueue;
use bridge_net::transport::{Transport, TransportError};
use tracing::{debug, error, info, warn};

use crate::infrastructure::audio_capture::{AudioFormat, AudioSource, PcmBlock};

/// Audio send queue depth.
const AUDIO_QUEUE_DEPTH: usize = 10;

/// Silence threshold for float samples.
const SILENCE_EPSILON_F32: f32 = 1e-4;

/// Where audio packets go. Production is the audio-channel [`Transport`].
pub trait AudioLink: Send + Sync {
    fn send_audio(&self, payload: &[u8]) -> Result<(), TransportError>;
}

impl AudioLink for Transport {
    fn send_audio(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.blocking_send(MessageType::AudioData, MessageFlags::NONE, payload)
    }
}

// ── Stats ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct AudioStats {
    blocks_captured: AtomicU64,
    blocks_silent: AtomicU64,
    packets_sent: AtomicU64,
    send_failures: AtomicU64,
}

impl AudioStats {
    pub fn blocks_captured(&self) -> u64 {
        self.blocks_captured.load(Ordering::Relaxed)
    }

    pub fn blocks_silent(&self) -> u64 {
        self.blocks_silent.load(Ordering::Relaxed)
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }
}

// ── Silence gate ──────────────────────────────────────────────────────────────

/// `true` when every sample sits within the silence band.
pub fn is_silent(block: &PcmBlock) -> bool {
    match block {
        PcmBlock::F32(samples) => samples.iter().all(|s| s.abs() <= SILENCE_EPSILON_F32),
        PcmBlock::I16(samples) => samples.iter().all(|&s| s == 0),
    }
}

// ── Conversion ────────────────────────────────────────────────────────────────

/// Converts a native block to interleaved int16 at the target rate.
///
/// Float input is clamped to [−1, 1] and scaled by 32767; a rate mismatch
/// is bridged by per-channel linear interpolation. Channel count passes
/// through unchanged.
pub fn convert_block(block: &PcmBlock, source: AudioFormat, target: &AudioConfig) -> Vec<i16> {
    let int_samples: Vec<i16> = match block {
        PcmBlock::I16(samples) => samples.clone(),
        PcmBlock::F32(samples) => samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect(),
    };

    if source.sample_rate == target.sample_rate {
        return int_samples;
    }
    resample_linear(
        &int_samples,
        source.channels as usize,
        source.sample_rate,
        target.sample_rate,
    )
}

/// Per-channel linear interpolation to the destination rate.
fn resample_linear(samples: &[i16], channels: usize, src_rate: u32, dst_rate: u32) -> Vec<i16> {
    if channels == 0 || samples.is_empty() {
        return Vec::new();
    }
    let frames_in = samples.len() / channels;
    if frames_in == 0 {
        return Vec::new();
    }
    let frames_out =
        ((frames_in as u64 * dst_rate as u64) / src_rate as u64).max(1) as usize;
    let step = (frames_in - 1) as f64 / (frames_out.max(2) - 1) as f64;

    let mut out = Vec::with_capacity(frames_out * channels);
    for i in 0..frames_out {
        let pos = i as f64 * step;
        let i0 = pos.floor() as usize;
        let i1 = (i0 + 1).min(frames_in - 1);
        let frac = pos - i0 as f64;
        for ch in 0..channels {
            let a = samples[i0 * channels + ch] as f64;
            let b = samples[i1 * channels + ch] as f64;
            out.push((a + (b - a) * frac).round() as i16);
        }
    }
    out
}

/// Serializes int16 samples little-endian behind the 8-byte timestamp.
pub fn packetize(timestamp_ms: i64, samples: &[i16]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + samples.len() * 2);
    payload.extend_from_slice(&timestamp_ms.to_le_bytes());
    for s in samples {
        payload.extend_from_slice(&s.to_le_bytes());
    }
    payload
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// Running audio pipeline: capture driver thread + send worker.
pub struct AudioPipeline {
    queue: Arc<DropOldestQueue<Vec<u8>>>,
    stats: Arc<AudioStats>,
    running: Arc<AtomicBool>,
    capture_worker: std::sync::Mutex<Option<JoinHandle<()>>>,
    send_worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AudioPipeline {
    /// Spawns the capture driver and send worker.
    pub fn start(
        mut source: Box<dyn AudioSource>,
        link: Arc<dyn AudioLink>,
        target: AudioConfig,
    ) -> Self {
        let queue = Arc::new(DropOldestQueue::new(AUDIO_QUEUE_DEPTH));
        let stats = Arc::new(AudioStats::default());
        let running = Arc::new(AtomicBool::new(true));
        let epoch = Instant::now();

        let cap_queue = Arc::clone(&queue);
        let cap_stats = Arc::clone(&stats);
        let cap_running = Arc::clone(&running);
        let capture_worker = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let format = source.format();
                while cap_running.load(Ordering::Relaxed) {
                    let block = match source.next_block(Duration::from_millis(20)) {
                        Ok(Some(block)) => block,
                        Ok(None) => continue,
                        Err(e) => {
                            // Pipeline-local failure: log and stop audio only.
                            error!("audio capture failed; stopping audio pipeline: {e}");
                            break;
                        }
                    };
                    cap_stats.blocks_captured.fetch_add(1, Ordering::Relaxed);

                    if is_silent(&block) {
                        cap_stats.blocks_silent.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }

                    let samples = convert_block(&block, format, &target);
                    if samples.is_empty() {
                        continue;
                    }
                    let timestamp_ms = epoch.elapsed().as_millis() as i64;
                    let packet = packetize(timestamp_ms, &samples);
                    if cap_queue.push(packet).is_some() {
                        debug!("audio queue full; dropped oldest packet");
                    }
                }
                cap_queue.close();
            })
            .expect("failed to spawn audio capture thread");

        let send_queue = Arc::clone(&queue);
        let send_stats = Arc::clone(&stats);
        let send_worker = std::thread::Builder::new()
            .name("audio-send".to_string())
            .spawn(move || {
                while let Some(packet) = send_queue.pop() {
                    match link.send_audio(&packet) {
                        Ok(()) => {
                            send_stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            send_stats.send_failures.fetch_add(1, Ordering::Relaxed);
                            warn!("audio send failed: {e}");
                        }
                    }
                }
                info!(
                    "audio worker exiting: {} packets sent, {} silent blocks elided",
                    send_stats.packets_sent(),
                    send_stats.blocks_silent()
                );
            })
            .expect("failed to spawn audio send thread");

        Self {
            queue,
            stats,
            running,
            capture_worker: std::sync::Mutex::new(Some(capture_worker)),
            send_worker: std::sync::Mutex::new(Some(send_worker)),
        }
    }

    pub fn stats(&self) -> &Arc<AudioStats> {
        &self.stats
    }

    /// Packets evicted by backpressure.
    pub fn packets_dropped(&self) -> u64 {
        self.queue.dropped()
    }

    /// Stops capture, drains, and joins both workers. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.queue.close();
        for slot in [&self.capture_worker, &self.send_worker] {
            let handle = slot.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(worker) = handle {
                if worker.join().is_err() {
                    error!("audio worker panicked during shutdown");
                }
            }
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
