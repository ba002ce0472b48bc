//! Screen capture contract and the access-loss recovery wrapper.
//!
//! Pacing is driven by the OS capture primitive: [`ScreenSource::next_frame`]
//! blocks inside the OS call for up to the given timeout and returns either
//! a new frame or [`CaptureEvent::NoChange`]. There are no sleep loops in
//! the capture path. Cursor-only updates (no new desktop image) are
//! reported as `NoChange` by the platform implementation.
//!
//! Frame pixel buffers are rented from the shared pool; the pipeline
//! returns them by dropping the frame, on every path.

use std::time::Duration;

use bridge_core::buffer::PooledBuf;
use thiserror::Error;
use tracing::{error, info};

pub mod windows;

/// Number of in-place rebuilds attempted after an access loss before the
/// error becomes fatal to the capture.
const MAX_RECOVERY_ATTEMPTS: u32 = 3;

/// Errors surfaced by screen capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture device not present: {0}")]
    DeviceNotPresent(String),

    #[error("capture access denied: {0}")]
    AccessDenied(String),

    /// The duplication object was invalidated (monitor unplugged,
    /// resolution change, secure desktop). Recoverable by rebuilding.
    #[error("capture access lost")]
    AccessLost,

    #[error("capture access lost and {attempts} rebuild attempt(s) failed")]
    AccessLostUnrecoverable { attempts: u32 },

    #[error("capture backend error: {0}")]
    Backend(String),
}

/// One captured frame. Dropping it returns `pixels` to the pool.
#[derive(Debug)]
pub struct CapturedFrame {
    pub pixels: PooledBuf,
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    /// Monotonic capture timestamp, milliseconds since pipeline start.
    pub timestamp_ms: u64,
    pub frame_number: i32,
}

/// Result of one blocking capture call.
#[derive(Debug)]
pub enum CaptureEvent {
    Frame(CapturedFrame),
    /// The timeout elapsed, or the update carried no new desktop image.
    NoChange,
}

/// A source of BGRA frames for one monitor.
pub trait ScreenSource: Send {
    /// Blocks up to `timeout` inside the OS capture call.
    ///
    /// # Errors
    ///
    /// [`CaptureError::AccessLost`] is recoverable (see
    /// [`RecoveringSource`]); the other variants are fatal to the video
    /// pipeline.
    fn next_frame(&mut self, timeout: Duration) -> Result<CaptureEvent, CaptureError>;

    /// Current monitor dimensions in pixels.
    fn dimensions(&self) -> (i32, i32);
}

// ── Access-loss recovery ──────────────────────────────────────────────────────

/// Wraps a [`ScreenSource`] factory and transparently rebuilds the source
/// when it reports [`CaptureError::AccessLost`].
///
/// The in-flight frame of a lost capture is gone by definition; the wrapper
/// reports `NoChange` for that call and the next call uses the fresh
/// source. Consecutive failed rebuilds surface as
/// [`CaptureError::AccessLostUnrecoverable`].
pub struct RecoveringSource<F>
where
    F: FnMut() -> Result<Box<dyn ScreenSource>, CaptureError> + Send,
{
    factory: F,
    inner: Box<dyn ScreenSource>,
}

impl<F> RecoveringSource<F>
where
    F: FnMut() -> Result<Box<dyn ScreenSource>, CaptureError> + Send,
{
    /// Builds the initial source eagerly so startup failures surface at
    /// construction.
    pub fn new(mut factory: F) -> Result<Self, CaptureError> {
        let inner = factory()?;
        Ok(Self { factory, inner })
    }
}

impl<F> ScreenSource for RecoveringSource<F>
where
    F: FnMut() -> Result<Box<dyn ScreenSource>, CaptureError> + Send,
{
    fn next_frame(&mut self, timeout: Duration) -> Result<CaptureEvent, CaptureError> {
        match self.inner.next_frame(timeout) {
            Err(CaptureError::AccessLost) => {
                info!("screen capture access lost; rebuilding duplication");
                for attempt in 1..=MAX_RECOVERY_ATTEMPTS {
                    match (self.factory)() {
                        Ok(fresh) => {
                            self.inner = fresh;
                            info!("screen capture rebuilt (attempt {attempt})");
                            return Ok(CaptureEvent::NoChange);
                        }
                        Err(e) => {
                            error!("capture rebuild attempt {attempt} failed: {e}");
                        }
                    }
                }
                Err(CaptureError::AccessLostUnrecoverable {
                    attempts: MAX_RECOVERY_ATTEMPTS,
                })
            }
            other => other,
        }
    }

    fn dimensions(&self) -> (i32, i32) {
        self.inner.dimensions()
    }
}

// ── Test pattern source ───────────────────────────────────────────────────────

/// Deterministic source for tests and the loopback demo: plays a fixed
/// list of frames, then reports `NoChange`.
pub struct TestPatternSource {
    pool: std::sync::Arc<bridge_core::buffer::BufferPool>,
    width: i32,
    height: i32,
    frames: std::collections::VecDeque<Vec<u8>>,
    delivered: u64,
}

impl TestPatternSource {
    /// `frames` are full BGRA images of `width × height` (stride = width×4).
    pub fn from_frames(
        pool: std::sync::Arc<bridge_core::buffer::BufferPool>,
        width: i32,
        height: i32,
        frames: Vec<Vec<u8>>,
    ) -> Self {
        debug_assert!(frames
            .iter()
            .all(|f| f.len() == (width * height * 4) as usize));
        Self {
            pool,
            width,
            height,
            frames: frames.into(),
            delivered: 0,
        }
    }
}

impl ScreenSource for TestPatternSource {
    fn next_frame(&mut self, timeout: Duration) -> Result<CaptureEvent, CaptureError> {
        match self.frames.pop_front() {
            Some(image) => {
                let mut pixels = self.pool.rent(image.len());
                pixels.copy_from_slice(&image);
                self.delivered += 1;
                Ok(CaptureEvent::Frame(CapturedFrame {
                    pixels,
                    width: self.width,
                    height: self.height,
                    stride: self.width * 4,
                    timestamp_ms: self.delivered * 33,
                    frame_number: self.delivered as i32,
                }))
            }
            None => {
                // Honor the blocking contract of the real capture call.
                std::thread::sleep(timeout);
                Ok(CaptureEvent::NoChange)
            }
        }
    }

    fn dimensions(&self) -> (i32, i32) {
        (self.width, self.height)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
