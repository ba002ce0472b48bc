//! Video encode-and-send pipeline.
//!
//! Producer/consumer with a hard latency cap: the capture thread pushes
//! frames into a capacity-2 drop-oldest queue and a single long-running
//! worker drains it. However slow the network gets, at most one stale
//! frame ever sits ahead of the freshest one.
//!
//! Raw-BGRA mode per frame:
//!
//! 1. No reference (or a size change, or a pending key request) → send the
//!    whole frame with `KEY_FRAME` and (re)build the reference.
//! 2. Otherwise XOR against the reference with a fused zero check. All
//!    zero → count a skip, send nothing. Non-zero → send the delta with
//!    `COMPRESSED` and copy the new pixels over the reference.
//!
//! Every buffer in the hop (captured pixels, delta, send buffer) is a
//! pool rental returned on drop, so success, skip, and error paths all
//! balance the pool.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bridge_core::buffer::{BufferPool, PooledBuf};
use bridge_core::protocol::message::{MessageFlags, MessageType};
use bridge_core::queue::DropOldestQueue;
use bridge_core::video::delta::xor_into;
use bridge_core::video::frame::{EncodedFrameHeader, FrameType, RawFrameHeader};
use bridge_net::transport::{Transport, TransportError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::infrastructure::screen_capture::{
    CaptureError, CaptureEvent, CapturedFrame, ScreenSource,
};

/// Video queue depth. Two slots: the frame in flight plus one fresher one.
const VIDEO_QUEUE_DEPTH: usize = 2;

/// Errors from the opaque encoded-frame producer.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// Fatal to the video pipeline (the session survives).
    #[error("encoder initialization failed: {0}")]
    InitFailed(String),

    /// Per-frame; the frame is dropped and the pipeline continues.
    #[error("encode failed: {0}")]
    EncodeFailed(String),
}

/// Opaque producer of already-encoded frames (H.264/H.265 path).
pub trait EncodedFrameSource: Send {
    /// Blocks up to `timeout` for the next encoded frame; `Ok(None)` when
    /// the interval elapses without output.
    fn next_encoded(&mut self, timeout: Duration) -> Result<Option<EncodedChunk>, EncoderError>;

    /// Forces the next emitted frame to be an IDR.
    fn force_idr(&mut self);
}

/// One encoded frame from the OS encoder.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub width: i32,
    pub height: i32,
    pub codec: u8,
    pub frame_type: FrameType,
    pub pts_us: i64,
    pub nal: Vec<u8>,
}

/// Where the pipeline sends framed video payloads. The production
/// implementation is the video-channel [`Transport`]; tests record.
pub trait FrameLink: Send + Sync {
    fn send_frame(&self, flags: MessageFlags, payload: &[u8]) -> Result<(), TransportError>;
}

impl FrameLink for Transport {
    fn send_frame(&self, flags: MessageFlags, payload: &[u8]) -> Result<(), TransportError> {
        self.blocking_send(MessageType::VideoFrame, flags, payload)
    }
}

// ── Stats ─────────────────────────────────────────────────────────────────────

/// Pipeline counters, shared with the UI layer.
#[derive(Debug, Default)]
pub struct VideoStats {
    frames_sent: AtomicU64,
    keyframes_sent: AtomicU64,
    frames_skipped: AtomicU64,
    send_failures: AtomicU64,
}

impl VideoStats {
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn keyframes_sent(&self) -> u64 {
        self.keyframes_sent.load(Ordering::Relaxed)
    }

    /// Frames whose delta was all-zero; nothing was sent.
    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// Running raw-BGRA video pipeline (queue + encode/send worker).
pub struct VideoPipeline {
    queue: Arc<DropOldestQueue<CapturedFrame>>,
    stats: Arc<VideoStats>,
    key_request: Arc<AtomicBool>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl VideoPipeline {
    /// Spawns the dedicated encode/send worker.
    pub fn start(link: Arc<dyn FrameLink>, pool: Arc<BufferPool>) -> Self {
        let queue = Arc::new(DropOldestQueue::new(VIDEO_QUEUE_DEPTH));
        let stats = Arc::new(VideoStats::default());
        let key_request = Arc::new(AtomicBool::new(false));

        let worker_queue = Arc::clone(&queue);
        let worker_stats = Arc::clone(&stats);
        let worker_key = Arc::clone(&key_request);
        let worker = std::thread::Builder::new()
            .name("video-encode".to_string())
            .spawn(move || encode_worker(worker_queue, link, pool, worker_stats, worker_key))
            .expect("failed to spawn video worker");

        Self {
            queue,
            stats,
            key_request,
            worker: std::sync::Mutex::new(Some(worker)),
        }
    }

    /// Producer entry point, called from the capture thread. The evicted
    /// frame (if any) releases its pooled buffer on drop, immediately.
    pub fn submit(&self, frame: CapturedFrame) {
        if let Some(evicted) = self.queue.push(frame) {
            debug!("video queue full; dropped frame {}", evicted.frame_number);
        }
    }

    /// Marks the next frame to be sent as a keyframe (`VideoKeyRequest`).
    pub fn request_keyframe(&self) {
        self.key_request.store(true, Ordering::Release);
    }

    pub fn stats(&self) -> &Arc<VideoStats> {
        &self.stats
    }

    /// Frames evicted by backpressure.
    pub fn frames_dropped(&self) -> u64 {
        self.queue.dropped()
    }

    /// Closes the queue and joins the worker. Idempotent.
    pub fn stop(&self) {
        self.queue.close();
        // Return buffers of anything the worker will no longer consume.
        drop(self.queue.drain());
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = handle {
            if worker.join().is_err() {
                error!("video worker panicked during shutdown");
            }
        }
    }
}

impl Drop for VideoPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The consumer loop: drains the queue until it closes.
fn encode_worker(
    queue: Arc<DropOldestQueue<CapturedFrame>>,
    link: Arc<dyn FrameLink>,
    pool: Arc<BufferPool>,
    stats: Arc<VideoStats>,
    key_request: Arc<AtomicBool>,
) {
    let mut reference: Option<PooledBuf> = None;

    while let Some(frame) = queue.pop() {
        process_frame(&frame, &mut reference, &link, &pool, &stats, &key_request);
        // `frame` drops here, returning the captured pixels to the pool.
    }
    info!(
        "video worker exiting: {} sent ({} key), {} skipped, {} dropped",
        stats.frames_sent(),
        stats.keyframes_sent(),
        stats.frames_skipped(),
        queue.dropped()
    );
}

fn process_frame(
    frame: &CapturedFrame,
    reference: &mut Option<PooledBuf>,
    link: &Arc<dyn FrameLink>,
    pool: &Arc<BufferPool>,
    stats: &Arc<VideoStats>,
    key_request: &AtomicBool,
) {
    let header = RawFrameHeader {
        width: frame.width,
        height: frame.height,
        stride: frame.stride,
        frame_number: frame.frame_number,
    };

    let forced_key = key_request.swap(false, Ordering::AcqRel);
    let need_keyframe = forced_key
        || reference
            .as_ref()
            .map(|r| r.len() != frame.pixels.len())
            .unwrap_or(true);

    if need_keyframe {
        // Absolute frame: payload = sub-header + full pixels.
        let mut send_buf = pool.rent(0);
        header.encode_into(&mut send_buf);
        send_buf.extend_from_slice(&frame.pixels);

        match link.send_frame(MessageFlags(MessageFlags::KEY_FRAME), &send_buf) {
            Ok(()) => {
                stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                stats.keyframes_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.send_failures.fetch_add(1, Ordering::Relaxed);
                warn!("keyframe send failed: {e}");
            }
        }

        // (Re)build the reference regardless of the send outcome so the
        // next delta is computed against what we will re-key from.
        let mut fresh = pool.rent(frame.pixels.len());
        fresh.copy_from_slice(&frame.pixels);
        *reference = Some(fresh);
        return;
    }

    let reference_buf = reference
        .as_mut()
        .expect("reference exists on the delta path");

    // Delta with fused zero check, one pass.
    let mut delta = pool.rent(frame.pixels.len());
    let changed = xor_into(&frame.pixels, reference_buf, &mut delta);
    if !changed {
        stats.frames_skipped.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let mut send_buf = pool.rent(0);
    header.encode_into(&mut send_buf);
    send_buf.extend_from_slice(&delta);

    match link.send_frame(MessageFlags(MessageFlags::COMPRESSED), &send_buf) {
        Ok(()) => {
            stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            stats.send_failures.fetch_add(1, Ordering::Relaxed);
            warn!("delta send failed: {e}");
        }
    }

    // Reference becomes the current frame.
    reference_buf.copy_from_slice(&frame.pixels);
}

// ── Capture driver ────────────────────────────────────────────────────────────

/// Runs the blocking capture loop on a dedicated thread, feeding the
/// pipeline until `running` clears or the source fails fatally.
///
/// The OS capture call paces the loop; the timeout is
/// `max(16, 1000 / target_fps + 4)` ms.
pub fn spawn_capture_thread(
    mut source: Box<dyn ScreenSource>,
    pipeline: Arc<VideoPipeline>,
    target_fps: u32,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("screen-capture".to_string())
        .spawn(move || {
            let timeout = Duration::from_millis(capture_timeout_ms(target_fps));
            let mut frame_number = 0i32;
            while running.load(Ordering::Relaxed) {
                match source.next_frame(timeout) {
                    Ok(CaptureEvent::Frame(mut frame)) => {
                        frame_number = frame_number.wrapping_add(1);
                        frame.frame_number = frame_number;
                        pipeline.submit(frame);
                    }
                    Ok(CaptureEvent::NoChange) => {}
                    Err(CaptureError::AccessLost) => {
                        // Only reachable without a RecoveringSource wrapper.
                        warn!("capture access lost without recovery wrapper");
                    }
                    Err(e) => {
                        error!("screen capture failed fatally: {e}");
                        break;
                    }
                }
            }
        })
        .expect("failed to spawn capture thread")
}

/// Capture wait per the pacing rule.
pub fn capture_timeout_ms(target_fps: u32) -> u64 {
    let fps = target_fps.max(1) as u64;
    (1000 / fps + 4).max(16)
}

// ── Encoded-mode worker ───────────────────────────────────────────────────────

/// Drives an opaque encoder: wraps NAL units in the 22-byte sub-header and
/// tags IDR frames with `KEY_FRAME`. A pending key request forces the next
/// frame to be an IDR via [`EncodedFrameSource::force_idr`].
pub fn spawn_encoded_worker(
    mut source: Box<dyn EncodedFrameSource>,
    link: Arc<dyn FrameLink>,
    pool: Arc<BufferPool>,
    stats: Arc<VideoStats>,
    key_request: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("video-encoded".to_string())
        .spawn(move || {
            while running.load(Ordering::Relaxed) {
                if key_request.swap(false, Ordering::AcqRel) {
                    source.force_idr();
                }
                let chunk = match source.next_encoded(Duration::from_millis(33)) {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => continue,
                    Err(EncoderError::EncodeFailed(e)) => {
                        warn!("encode failed; dropping frame: {e}");
                        continue;
                    }
                    Err(e @ EncoderError::InitFailed(_)) => {
                        error!("encoder died: {e}");
                        break;
                    }
                };

                let header = EncodedFrameHeader {
                    width: chunk.width,
                    height: chunk.height,
                    codec: chunk.codec,
                    frame_type: chunk.frame_type,
                    pts_us: chunk.pts_us,
                    data_len: chunk.nal.len() as i32,
                };
                let mut send_buf = pool.rent(0);
                header.encode_into(&mut send_buf);
                send_buf.extend_from_slice(&chunk.nal);

                let flags = if matches!(chunk.frame_type, FrameType::Idr) {
                    MessageFlags(MessageFlags::KEY_FRAME)
                } else {
                    MessageFlags::NONE
                };
                match link.send_frame(flags, &send_buf) {
                    Ok(()) => {
                        stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                        if flags.key_frame() {
                            stats.keyframes_sent.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(e) => {
                        stats.send_failures.fetch_add(1, Ordering::Relaxed);
                        warn!("encoded frame send failed: {e}");
                    }
                }
            }
        })
        .expect("failed to spawn encoded video worker")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
