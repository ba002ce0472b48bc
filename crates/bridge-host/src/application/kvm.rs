//! Smart KVM service: focus follows the cursor across the screen edge.
//!
//! The service drains a single queue merging raw hook events and session
//! commands (`CursorReturn`, manual toggle, stop), so concurrent triggers
//! are serialized and a toggle can never race an edge crossing. The pure
//! transition decisions live in [`FocusTracker`]; this service applies
//! their side effects:
//!
//! - Host → Companion: suppress local delivery, clip the cursor to the
//!   edge strip, hide it, send the proportional entry `MouseMove`.
//! - Companion → Host: clear suppression, release the clip, show the
//!   cursor, restore it near the symmetric edge position.
//!
//! While the companion holds focus, every hook event is forwarded on the
//! control channel with the `PRIORITY` flag. Modifier state is tracked on
//! the host regardless of focus so the Ctrl+Alt+K toggle always works.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use bridge_core::kvm::focus::{EdgeSide, Focus, FocusChange, FocusTracker};
use bridge_core::protocol::input::{
    CursorReturnPayload, KeyPayload, MouseButtonPayload, MouseMovePayload, MouseScrollPayload,
};
use bridge_core::protocol::message::{MessageFlags, MessageType};
use bridge_net::transport::{Transport, TransportError};
use tracing::{debug, info, warn};

use crate::infrastructure::input_hook::{CursorController, HookEvent, InputHook, KvmError};

/// Where forwarded input events go. Production is the control-channel
/// [`Transport`]; tests record.
pub trait InputLink: Send + Sync {
    fn send_input(&self, msg_type: MessageType, payload: &[u8]) -> Result<(), TransportError>;
}

impl InputLink for Transport {
    fn send_input(&self, msg_type: MessageType, payload: &[u8]) -> Result<(), TransportError> {
        self.blocking_send(msg_type, MessageFlags(MessageFlags::PRIORITY), payload)
    }
}

/// Commands injected by the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KvmCommand {
    /// The companion handed focus back.
    CursorReturn { edge: EdgeSide, position: f32 },
    /// Manual hotkey pressed (or UI toggle).
    Toggle,
    /// Shut the service down, releasing the cursor if needed.
    Stop,
}

enum ServiceInput {
    Hook(HookEvent),
    Command(KvmCommand),
}

// ── Engine (testable core) ────────────────────────────────────────────────────

/// Modifier state tracked from raw key events, independent of focus.
#[derive(Debug, Default, Clone, Copy)]
struct ModifierState {
    ctrl: bool,
    alt: bool,
}

impl ModifierState {
    fn update(&mut self, vk: u16, is_down: bool) {
        match vk {
            0x11 | 0xA2 | 0xA3 => self.ctrl = is_down,
            0x12 | 0xA4 | 0xA5 => self.alt = is_down,
            _ => {}
        }
    }
}

/// The service state machine, separated from the worker thread so tests
/// drive it synchronously.
pub(crate) struct KvmEngine {
    tracker: FocusTracker,
    modifiers: ModifierState,
    hotkey_vk: u16,
    hook: Arc<dyn InputHook>,
    cursor: Arc<dyn CursorController>,
    link: Arc<dyn InputLink>,
    companion_focus: Arc<AtomicBool>,
}

impl KvmEngine {
    fn apply(&mut self, change: FocusChange) {
        match change {
            FocusChange::ToCompanion { entry_x, entry_y } => {
                info!("focus -> companion (entry {entry_x},{entry_y})");
                self.hook.set_suppress(true);
                self.cursor.clip_to(self.tracker.confinement_strip());
                self.cursor.hide();
                self.companion_focus.store(true, Ordering::Release);
                self.forward(
                    MessageType::MouseMove,
                    &MouseMovePayload {
                        x: entry_x,
                        y: entry_y,
                    }
                    .encode(),
                );
            }
            FocusChange::ToHost {
                restore_x,
                restore_y,
            } => {
                info!("focus -> host (restore {restore_x},{restore_y})");
                self.hook.set_suppress(false);
                self.cursor.release_clip();
                self.cursor.show();
                self.cursor.set_pos(restore_x, restore_y);
                self.companion_focus.store(false, Ordering::Release);
            }
        }
    }

    fn forward(&self, msg_type: MessageType, payload: &[u8]) {
        if let Err(e) = self.link.send_input(msg_type, payload) {
            // The transport will surface Disconnected to the session; the
            // service just keeps going until told to stop.
            warn!("input forward failed: {e}");
        }
    }

    /// Handles one input; returns `false` when the service should exit.
    fn handle(&mut self, input: ServiceInput) -> bool {
        match input {
            ServiceInput::Hook(event) => self.handle_hook(event),
            ServiceInput::Command(cmd) => return self.handle_command(cmd),
        }
        true
    }

    fn handle_hook(&mut self, event: HookEvent) {
        let on_companion = self.tracker.focus() == Focus::Companion;
        match event {
            HookEvent::KeyDown { vk } => {
                self.modifiers.update(vk, true);
                if vk == self.hotkey_vk && self.modifiers.ctrl && self.modifiers.alt {
                    let change = self.tracker.toggle();
                    self.apply(change);
                    return;
                }
                if on_companion {
                    self.forward(MessageType::KeyDown, &KeyPayload { vk_code: vk }.encode());
                }
            }
            HookEvent::KeyUp { vk } => {
                self.modifiers.update(vk, false);
                if on_companion {
                    self.forward(MessageType::KeyUp, &KeyPayload { vk_code: vk }.encode());
                }
            }
            HookEvent::MouseMove { x, y } => {
                if on_companion {
                    let (cx, cy) = self.tracker.map_to_companion(x, y);
                    self.forward(
                        MessageType::MouseMove,
                        &MouseMovePayload { x: cx, y: cy }.encode(),
                    );
                } else if let Some(change) = self.tracker.observe_cursor(x, y) {
                    self.apply(change);
                }
            }
            HookEvent::MouseButton { action, .. } => {
                if on_companion {
                    self.forward(
                        MessageType::MouseButton,
                        &MouseButtonPayload { action }.encode(),
                    );
                }
            }
            HookEvent::MouseWheel { dx, dy } => {
                if on_companion {
                    self.forward(
                        MessageType::MouseScroll,
                        &MouseScrollPayload { dx, dy }.encode(),
                    );
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: KvmCommand) -> bool {
        match cmd {
            KvmCommand::CursorReturn { edge, position } => {
                if let Some(change) = self.tracker.handle_return(edge, position) {
                    self.apply(change);
                } else {
                    debug!("late CursorReturn ignored (focus already on host)");
                }
                true
            }
            KvmCommand::Toggle => {
                let change = self.tracker.toggle();
                self.apply(change);
                true
            }
            KvmCommand::Stop => {
                // Never leave the cursor imprisoned.
                if self.tracker.focus() == Focus::Companion {
                    if let Some(change) = self.tracker.handle_return(EdgeSide::Left, 0.5) {
                        self.apply(change);
                    }
                }
                false
            }
        }
    }
}

// ── Service (worker wrapper) ──────────────────────────────────────────────────

/// Running KVM service.
pub struct KvmService {
    input_tx: Sender<ServiceInput>,
    companion_focus: Arc<AtomicBool>,
    hook: Arc<dyn InputHook>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl KvmService {
    /// Installs the hook and starts the worker.
    ///
    /// # Errors
    ///
    /// [`KvmError::HookInstallFailed`] when the OS hook cannot be
    /// installed; the session treats this as KVM-fatal.
    pub fn start(
        mut hook: Box<dyn InputHook>,
        cursor: Arc<dyn CursorController>,
        link: Arc<dyn InputLink>,
        tracker: FocusTracker,
        hotkey_vk: u16,
    ) -> Result<Self, KvmError> {
        let hook_rx = hook.start()?;
        let hook: Arc<dyn InputHook> = Arc::from(hook);

        let (input_tx, input_rx) = mpsc::channel::<ServiceInput>();
        let companion_focus = Arc::new(AtomicBool::new(false));

        // Forward raw hook events into the merged queue. The hook callback
        // thread only ever does channel writes; this thread is the bridge.
        let forward_tx = input_tx.clone();
        std::thread::Builder::new()
            .name("kvm-hook-pump".to_string())
            .spawn(move || {
                for event in hook_rx {
                    if forward_tx.send(ServiceInput::Hook(event)).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| KvmError::HookInstallFailed(e.to_string()))?;

        let mut engine = KvmEngine {
            tracker,
            modifiers: ModifierState::default(),
            hotkey_vk,
            hook: Arc::clone(&hook),
            cursor,
            link,
            companion_focus: Arc::clone(&companion_focus),
        };
        let worker = std::thread::Builder::new()
            .name("kvm-service".to_string())
            .spawn(move || {
                while let Ok(input) = input_rx.recv() {
                    if !engine.handle(input) {
                        break;
                    }
                }
            })
            .map_err(|e| KvmError::HookInstallFailed(e.to_string()))?;

        Ok(Self {
            input_tx,
            companion_focus,
            hook,
            worker: std::sync::Mutex::new(Some(worker)),
        })
    }

    /// `true` while the companion owns focus.
    pub fn companion_has_focus(&self) -> bool {
        self.companion_focus.load(Ordering::Acquire)
    }

    /// Feeds a `CursorReturn` received from the companion.
    pub fn cursor_return(&self, edge: EdgeSide, position: f32) {
        let _ = self
            .input_tx
            .send(ServiceInput::Command(KvmCommand::CursorReturn {
                edge,
                position,
            }));
    }

    /// Manual focus toggle.
    pub fn toggle(&self) {
        let _ = self.input_tx.send(ServiceInput::Command(KvmCommand::Toggle));
    }

    /// Releases the cursor, uninstalls the hook, and joins the worker.
    /// Idempotent.
    pub fn stop(&self) {
        let _ = self.input_tx.send(ServiceInput::Command(KvmCommand::Stop));
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = handle {
            let _ = worker.join();
        }
        self.hook.stop();
    }
}

impl Drop for KvmService {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
