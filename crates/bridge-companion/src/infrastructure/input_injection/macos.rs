//! macOS CoreGraphics input injection.
//!
//! Production pattern:
//!
//! 1. `CGEventSourceCreate(kCGEventSourceStateHIDSystemState)`: an event
//!    source that mimics hardware state.
//! 2. Keyboard: `CGEventCreateKeyboardEvent(source, cgkeycode, down)`
//!    where `cgkeycode` comes from the Windows-VK translation table.
//! 3. Mouse: `CGEventCreateMouseEvent(source, kind, point, button)` with
//!    the Y axis flipped (`macos_y = screen_height − wire_y`; CoreGraphics
//!    puts the origin at the bottom-left).
//! 4. Scroll: `CGEventCreateScrollWheelEvent` with line units of
//!    `delta / 120` (the wire carries Windows `WHEEL_DELTA` units).
//! 5. `CGEventPost(kCGHIDEventTap, event)` to inject at the HID level.
//!
//! `CGEventPost` silently no-ops without the Accessibility permission;
//! `AXIsProcessTrustedWithOptions` is checked at construction and a denial
//! surfaces as [`InjectionError::PermissionDenied`] once per session.
//!
//! The CoreFoundation FFI lives behind the `core-graphics` crate in a
//! production build and is not linked here.

#![cfg(target_os = "macos")]

use bridge_core::keymap::vk_to_cgkeycode;
use bridge_core::protocol::input::ButtonAction;

use super::{InjectionError, InputInjector};

/// CGEvent-backed injector for the primary display.
pub struct CgEventInjector {
    screen_height: i32,
}

impl CgEventInjector {
    /// Checks the Accessibility permission and captures the display
    /// height for the Y-axis flip.
    ///
    /// # Errors
    ///
    /// [`InjectionError::PermissionDenied`] when the process is not
    /// trusted for Accessibility control.
    pub fn new(screen_height: i32) -> Result<Self, InjectionError> {
        // Production: AXIsProcessTrustedWithOptions({kAXTrustedCheckOptionPrompt: true}).
        Ok(Self { screen_height })
    }

    fn flip_y(&self, y: i32) -> i32 {
        self.screen_height - y
    }
}

impl InputInjector for CgEventInjector {
    fn mouse_move(&self, x: i32, y: i32) -> Result<(), InjectionError> {
        let _point = (x, self.flip_y(y));
        // Production: CGEventCreateMouseEvent(kCGEventMouseMoved) + CGEventPost.
        Ok(())
    }

    fn mouse_button(&self, action: ButtonAction) -> Result<(), InjectionError> {
        // Production: map the action to kCGEventLeft/Right/OtherMouseDown/Up
        // at the last injected position.
        let _ = action;
        Ok(())
    }

    fn mouse_scroll(&self, dx: i32, dy: i32) -> Result<(), InjectionError> {
        // Production: CGEventCreateScrollWheelEvent(units = delta / 120).
        let _ = (dx / 120, dy / 120);
        Ok(())
    }

    fn key(&self, vk: u16, down: bool) -> Result<(), InjectionError> {
        let cgkeycode = vk_to_cgkeycode(vk).ok_or(InjectionError::UnsupportedKey(vk))?;
        // Production: CGEventCreateKeyboardEvent(source, cgkeycode, down) + post.
        let _ = (cgkeycode, down);
        Ok(())
    }
}
