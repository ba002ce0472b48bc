//! Low-level input hook and cursor control contracts.
//!
//! The OS hook runs on its own message-pump thread and delivers raw events
//! over a channel; the callback does nothing heavier than a channel write.
//! Suppression (swallowing events instead of passing them to the local
//! desktop) is a flag the hook callback reads atomically, flipped by the
//! KVM service on focus transitions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use bridge_core::protocol::input::ButtonAction;
use bridge_core::Rect;
use thiserror::Error;

pub mod mock;
pub mod windows;

/// Errors surfaced by the KVM platform layer.
#[derive(Debug, Error)]
pub enum KvmError {
    #[error("input hook installation failed: {0}")]
    HookInstallFailed(String),

    #[error("cursor control unavailable: {0}")]
    CursorControl(String),
}

/// A raw event from the low-level hook, in host screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    KeyDown { vk: u16 },
    KeyUp { vk: u16 },
    MouseMove { x: i32, y: i32 },
    MouseButton { action: ButtonAction, x: i32, y: i32 },
    MouseWheel { dx: i32, dy: i32 },
}

/// The installed OS hook.
pub trait InputHook: Send + Sync {
    /// Installs the hook and returns the event channel. Called once.
    ///
    /// # Errors
    ///
    /// [`KvmError::HookInstallFailed`] when the OS rejects the hook.
    fn start(&mut self) -> Result<Receiver<HookEvent>, KvmError>;

    /// While `true`, hooked events are delivered to the channel but
    /// swallowed before the local desktop sees them.
    fn set_suppress(&self, suppress: bool);

    /// Uninstalls the hook; the event channel completes.
    fn stop(&self);
}

/// Physical cursor control on the host.
pub trait CursorController: Send + Sync {
    /// Confines the OS cursor to `rect` until released.
    fn clip_to(&self, rect: Rect);
    fn release_clip(&self);
    fn hide(&self);
    fn show(&self);
    fn set_pos(&self, x: i32, y: i32);
}

// ── Recording cursor controller ───────────────────────────────────────────────

/// Cursor controller that records calls; used by tests and as the no-op
/// fallback on platforms without a backend.
#[derive(Default)]
pub struct RecordingCursorController {
    pub clips: Mutex<Vec<Rect>>,
    pub releases: Mutex<u32>,
    pub hidden: AtomicBool,
    pub positions: Mutex<Vec<(i32, i32)>>,
}

impl RecordingCursorController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `true` while a clip is active (more clips than releases).
    pub fn is_clipped(&self) -> bool {
        let clips = self.clips.lock().unwrap_or_else(|e| e.into_inner()).len() as u32;
        let releases = *self.releases.lock().unwrap_or_else(|e| e.into_inner());
        clips > releases
    }
}

impl CursorController for RecordingCursorController {
    fn clip_to(&self, rect: Rect) {
        self.clips
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(rect);
    }

    fn release_clip(&self) {
        *self.releases.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    fn hide(&self) {
        self.hidden.store(true, Ordering::SeqCst);
    }

    fn show(&self) {
        self.hidden.store(false, Ordering::SeqCst);
    }

    fn set_pos(&self, x: i32, y: i32) {
        self.positions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((x, y));
    }
}

