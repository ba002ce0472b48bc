//! Windows low-level keyboard and mouse hooks.
//!
//! Production pattern: `WH_KEYBOARD_LL` and `WH_MOUSE_LL` hooks installed
//! with `SetWindowsHookExW` from a dedicated message-loop thread running
//! `GetMessageW`/`DispatchMessageW` (low-level hooks require a pumping
//! thread; the OS removes hooks whose callbacks stall past ~300 ms).
//!
//! The callbacks translate `KBDLLHOOKSTRUCT`/`MSLLHOOKSTRUCT` into
//! [`HookEvent`] values and push them to the channel. When the suppression
//! flag is set the callback returns a non-zero `LRESULT` instead of calling
//! `CallNextHookEx`, which swallows the event before the local desktop
//! sees it; the event still reaches the channel so the KVM service can
//! forward it and keep tracking modifiers.
//!
//! Cursor control maps to `ClipCursor` (confinement), `ShowCursor`
//! (hide/show counts), and `SetCursorPos`.
//!
//! The Win32 FFI lives behind the `windows` crate in a production build;
//! this scaffold carries the contract and the shared-state plumbing.

#![cfg(target_os = "windows")]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use bridge_core::Rect;

use super::{CursorController, HookEvent, InputHook, KvmError};

/// State shared between the service-facing handle and the hook callbacks
/// on the message-loop thread.
struct HookShared {
    suppress: AtomicBool,
    running: AtomicBool,
    sender: Mutex<Option<Sender<HookEvent>>>,
}

impl HookShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            suppress: AtomicBool::new(false),
            running: AtomicBool::new(false),
            sender: Mutex::new(None),
        })
    }
}

/// Win32 low-level hook pair sharing one message-loop thread.
pub struct WindowsInputHook {
    shared: Arc<HookShared>,
}

impl WindowsInputHook {
    pub fn new() -> Self {
        Self {
            shared: HookShared::new(),
        }
    }
}

impl Default for WindowsInputHook {
    fn default() -> Self {
        Self::new()
    }
}

impl InputHook for WindowsInputHook {
    fn start(&mut self) -> Result<Receiver<HookEvent>, KvmError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(KvmError::HookInstallFailed(
                "hook already installed".to_string(),
            ));
        }
        let (tx, rx) = mpsc::channel();
        *self
            .shared
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(tx);

        // Production: spawn the "bridge-hook-loop" thread here, install
        // WH_KEYBOARD_LL + WH_MOUSE_LL with SetWindowsHookExW, and pump
        // messages until WM_QUIT. The callbacks read `shared.suppress`
        // and write to `shared.sender`.
        Err(KvmError::HookInstallFailed(
            "Win32 hook backend not linked in this build".to_string(),
        ))
    }

    fn set_suppress(&self, suppress: bool) {
        self.shared.suppress.store(suppress, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        // Production: PostThreadMessageW(hook_thread, WM_QUIT, ...) and
        // UnhookWindowsHookEx for both hooks on the loop thread.
    }
}

/// `ClipCursor`/`ShowCursor`/`SetCursorPos`-backed cursor control.
pub struct WindowsCursorController;

impl CursorController for WindowsCursorController {
    fn clip_to(&self, _rect: Rect) {
        // Production: ClipCursor(&RECT { .. }).
    }

    fn release_clip(&self) {
        // Production: ClipCursor(null).
    }

    fn hide(&self) {
        // Production: ShowCursor(FALSE) until the display count goes negative.
    }

    fn show(&self) {
        // Production: ShowCursor(TRUE) until the display count returns to 0.
    }

    fn set_pos(&self, _x: i32, _y: i32) {
        // Production: SetCursorPos(x, y).
    }
}
