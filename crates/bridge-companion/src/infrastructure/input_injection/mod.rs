//! Synthetic input injection contract.
//!
//! The injector translates the portable event representation into the
//! local OS's synthetic-input primitive. Key events carry Windows
//! virtual-key numbers on the wire; the implementation maps them through
//! the static translation table and reports unmapped codes as
//! [`InjectionError::UnsupportedKey`], which the use case drops silently.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use bridge_core::protocol::input::ButtonAction;
use thiserror::Error;

pub mod macos;

#[derive(Debug, Error)]
pub enum InjectionError {
    /// The OS refused synthetic input (macOS Accessibility permission).
    /// Surfaced to the user once per session.
    #[error("input injection permission denied: {0}")]
    PermissionDenied(String),

    /// The virtual-key number has no native mapping. Dropped silently.
    #[error("unsupported key code: 0x{0:02X}")]
    UnsupportedKey(u16),

    #[error("injection backend error: {0}")]
    Backend(String),
}

/// Injects synthetic input events on the local machine.
pub trait InputInjector: Send + Sync {
    fn mouse_move(&self, x: i32, y: i32) -> Result<(), InjectionError>;
    fn mouse_button(&self, action: ButtonAction) -> Result<(), InjectionError>;
    fn mouse_scroll(&self, dx: i32, dy: i32) -> Result<(), InjectionError>;
    /// `down` distinguishes press from release. `vk` is a Windows
    /// virtual-key number.
    fn key(&self, vk: u16, down: bool) -> Result<(), InjectionError>;
}

/// Records injected events; the test double and headless fallback.
#[derive(Default)]
pub struct RecordingInjector {
    pub moves: Mutex<Vec<(i32, i32)>>,
    pub buttons: Mutex<Vec<ButtonAction>>,
    pub scrolls: Mutex<Vec<(i32, i32)>>,
    pub keys: Mutex<Vec<(u16, bool)>>,
    /// When ≥ 0, every call fails with `PermissionDenied` this many times.
    pub deny_permission: AtomicI32,
}

impl RecordingInjector {
    fn check_permission(&self) -> Result<(), InjectionError> {
        if self.deny_permission.load(Ordering::SeqCst) > 0 {
            self.deny_permission.fetch_sub(1, Ordering::SeqCst);
            return Err(InjectionError::PermissionDenied(
                "accessibility not granted".to_string(),
            ));
        }
        Ok(())
    }
}

impl InputInjector for RecordingInjector {
    fn mouse_move(&self, x: i32, y: i32) -> Result<(), InjectionError> {
        self.check_permission()?;
        self.moves
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((x, y));
        Ok(())
    }

    fn mouse_button(&self, action: ButtonAction) -> Result<(), InjectionError> {
        self.check_permission()?;
        self.buttons
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(action);
        Ok(())
    }

    fn mouse_scroll(&self, dx: i32, dy: i32) -> Result<(), InjectionError> {
        self.check_permission()?;
        self.scrolls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((dx, dy));
        Ok(())
    }

    fn key(&self, vk: u16, down: bool) -> Result<(), InjectionError> {
        self.check_permission()?;
        if bridge_core::keymap::vk_to_cgkeycode(vk).is_none() {
            return Err(InjectionError::UnsupportedKey(vk));
        }
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((vk, down));
        Ok(())
    }
}
