//! Forwarded-input handling on the companion.
//!
//! Translates received input messages into calls on the platform
//! [`InputInjector`], and runs the companion half of the KVM handshake:
//! when an injected cursor position leaves the screen rectangle, focus is
//! handed back with a `CursorReturn` (crossed edge + normalized position)
//! and injection pauses until the host sends the next entry position.
//!
//! Unsupported key codes are dropped silently. A permission denial is
//! surfaced once per session and further events are swallowed.

use std::sync::Arc;

use bridge_core::kvm::focus::boundary_exit;
use bridge_core::protocol::input::{
    CursorReturnPayload, InputPayloadError, KeyPayload, MouseButtonPayload, MouseMovePayload,
    MouseScrollPayload,
};
use bridge_core::protocol::message::{MessageFlags, MessageType};
use bridge_core::Rect;
use bridge_net::transport::{Transport, TransportError};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::infrastructure::input_injection::{InjectionError, InputInjector};

/// Sends `CursorReturn` back to the host. Production is the control
/// [`Transport`]; tests record.
pub trait ReturnLink: Send + Sync {
    fn send_cursor_return(&self, payload: &CursorReturnPayload) -> Result<(), TransportError>;
}

impl ReturnLink for Transport {
    fn send_cursor_return(&self, payload: &CursorReturnPayload) -> Result<(), TransportError> {
        // Called from the control dispatch loop on the runtime, so this
        // must never block.
        self.try_send(
            MessageType::CursorReturn,
            MessageFlags(MessageFlags::PRIORITY),
            &payload.encode(),
        )
    }
}

#[derive(Debug, Error)]
pub enum InjectError {
    #[error(transparent)]
    Payload(#[from] InputPayloadError),
}

/// Stateful input handler for one session.
pub struct InjectInputUseCase {
    injector: Arc<dyn InputInjector>,
    return_link: Arc<dyn ReturnLink>,
    screen_rect: Rect,
    /// Injection pauses after a boundary exit until the host re-enters.
    active: bool,
    last_mouse_pos: Option<(i32, i32)>,
    permission_reported: bool,
    events_injected: u64,
}

impl InjectInputUseCase {
    pub fn new(
        injector: Arc<dyn InputInjector>,
        return_link: Arc<dyn ReturnLink>,
        screen_rect: Rect,
    ) -> Self {
        Self {
            injector,
            return_link,
            screen_rect,
            active: true,
            last_mouse_pos: None,
            permission_reported: false,
            events_injected: 0,
        }
    }

    pub fn events_injected(&self) -> u64 {
        self.events_injected
    }

    /// Routes one input-family message.
    ///
    /// # Errors
    ///
    /// [`InjectError::Payload`] for malformed payloads (session-fatal);
    /// injector failures are absorbed per the propagation policy.
    pub fn handle(&mut self, msg_type: MessageType, payload: &[u8]) -> Result<(), InjectError> {
        match msg_type {
            MessageType::MouseMove => {
                let mv = MouseMovePayload::decode(payload)?;
                self.handle_mouse_move(mv.x, mv.y);
            }
            MessageType::MouseButton => {
                let btn = MouseButtonPayload::decode(payload)?;
                if self.active {
                    self.inject(|i| i.mouse_button(btn.action));
                }
            }
            MessageType::MouseScroll => {
                let scroll = MouseScrollPayload::decode(payload)?;
                if self.active {
                    self.inject(|i| i.mouse_scroll(scroll.dx, scroll.dy));
                }
            }
            MessageType::KeyDown => {
                let key = KeyPayload::decode(payload)?;
                if self.active {
                    self.inject(|i| i.key(key.vk_code, true));
                }
            }
            MessageType::KeyUp => {
                let key = KeyPayload::decode(payload)?;
                if self.active {
                    self.inject(|i| i.key(key.vk_code, false));
                }
            }
            other => {
                debug!("inject: ignoring non-input message {other:?}");
            }
        }
        Ok(())
    }

    fn handle_mouse_move(&mut self, x: i32, y: i32) {
        if let Some((edge, position)) = boundary_exit(self.screen_rect, x, y) {
            if self.active {
                self.active = false;
                self.last_mouse_pos = None;
                debug!("cursor left screen at {edge:?} ({position:.3}); handing focus back");
                if let Err(e) = self.return_link.send_cursor_return(&CursorReturnPayload {
                    edge,
                    position,
                }) {
                    warn!("CursorReturn send failed: {e}");
                }
            }
            return;
        }

        // A position inside the screen re-arms injection: the host only
        // forwards moves while we own focus.
        self.active = true;
        if self.last_mouse_pos == Some((x, y)) {
            return;
        }
        self.last_mouse_pos = Some((x, y));
        self.inject(|i| i.mouse_move(x, y));
    }

    fn inject<F>(&mut self, f: F)
    where
        F: FnOnce(&dyn InputInjector) -> Result<(), InjectionError>,
    {
        match f(self.injector.as_ref()) {
            Ok(()) => self.events_injected += 1,
            Err(InjectionError::UnsupportedKey(vk)) => {
                debug!("dropping unmapped key 0x{vk:02X}");
            }
            Err(InjectionError::PermissionDenied(msg)) => {
                if !self.permission_reported {
                    self.permission_reported = true;
                    error!("input injection blocked by the OS: {msg}");
                }
            }
            Err(e) => warn!("injection failed: {e}"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::input_injection::RecordingInjector;
    use bridge_core::kvm::focus::EdgeSide;
    use bridge_core::protocol::input::ButtonAction;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingReturnLink {
        returns: Mutex<Vec<CursorReturnPayload>>,
    }

    impl ReturnLink for RecordingReturnLink {
        fn send_cursor_return(&self, payload: &CursorReturnPayload) -> Result<(), TransportError> {
            self.returns.lock().unwrap().push(*payload);
            Ok(())
        }
    }

    struct Fixture {
        use_case: InjectInputUseCase,
        injector: Arc<RecordingInjector>,
        link: Arc<RecordingReturnLink>,
    }

    fn fixture() -> Fixture {
        let injector = Arc::new(RecordingInjector::default());
        let link = Arc::new(RecordingReturnLink::default());
        let use_case = InjectInputUseCase::new(
            Arc::clone(&injector) as Arc<dyn InputInjector>,
            Arc::clone(&link) as Arc<dyn ReturnLink>,
            Rect::from_size(2560, 1600),
        );
        Fixture {
            use_case,
            injector,
            link,
        }
    }

    fn mouse_move(f: &mut Fixture, x: i32, y: i32) {
        f.use_case
            .handle(
                MessageType::MouseMove,
                &MouseMovePayload { x, y }.encode(),
            )
            .unwrap();
    }

    #[test]
    fn test_events_reach_the_injector() {
        let mut f = fixture();
        mouse_move(&mut f, 100, 200);
        f.use_case
            .handle(
                MessageType::MouseButton,
                &MouseButtonPayload {
                    action: ButtonAction::LeftDown,
                }
                .encode(),
            )
            .unwrap();
        f.use_case
            .handle(
                MessageType::KeyDown,
                &KeyPayload { vk_code: 0x41 }.encode(),
            )
            .unwrap();
        f.use_case
            .handle(
                MessageType::MouseScroll,
                &MouseScrollPayload { dx: 0, dy: -120 }.encode(),
            )
            .unwrap();

        assert_eq!(*f.injector.moves.lock().unwrap(), vec![(100, 200)]);
        assert_eq!(
            *f.injector.buttons.lock().unwrap(),
            vec![ButtonAction::LeftDown]
        );
        assert_eq!(*f.injector.keys.lock().unwrap(), vec![(0x41, true)]);
        assert_eq!(*f.injector.scrolls.lock().unwrap(), vec![(0, -120)]);
        assert_eq!(f.use_case.events_injected(), 4);
    }

    #[test]
    fn test_duplicate_mouse_positions_are_filtered() {
        let mut f = fixture();
        mouse_move(&mut f, 50, 50);
        mouse_move(&mut f, 50, 50);
        mouse_move(&mut f, 51, 50);
        assert_eq!(f.injector.moves.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_boundary_exit_emits_cursor_return_and_pauses() {
        let mut f = fixture();
        mouse_move(&mut f, 10, 800);
        // Injected position walks off the left edge.
        mouse_move(&mut f, -4, 800);

        let returns = f.link.returns.lock().unwrap();
        assert_eq!(returns.len(), 1);
        assert_eq!(returns[0].edge, EdgeSide::Left);
        assert!((returns[0].position - 0.5).abs() < 0.01);
        drop(returns);

        // Further events are swallowed while paused.
        f.use_case
            .handle(
                MessageType::KeyDown,
                &KeyPayload { vk_code: 0x41 }.encode(),
            )
            .unwrap();
        f.use_case
            .handle(
                MessageType::MouseButton,
                &MouseButtonPayload {
                    action: ButtonAction::RightDown,
                }
                .encode(),
            )
            .unwrap();
        assert!(f.injector.keys.lock().unwrap().is_empty());
        assert!(f.injector.buttons.lock().unwrap().is_empty());

        // Repeated out-of-bounds moves do not spam CursorReturn.
        mouse_move(&mut f, -10, 700);
        assert_eq!(f.link.returns.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_reentry_rearms_injection() {
        let mut f = fixture();
        mouse_move(&mut f, -1, 100); // exit immediately
        assert_eq!(f.link.returns.lock().unwrap().len(), 1);

        // Host hands focus back with a fresh entry position.
        mouse_move(&mut f, 2559, 100);
        f.use_case
            .handle(
                MessageType::KeyDown,
                &KeyPayload { vk_code: 0x42 }.encode(),
            )
            .unwrap();
        assert_eq!(*f.injector.keys.lock().unwrap(), vec![(0x42, true)]);
    }

    #[test]
    fn test_unmapped_keys_are_dropped_silently() {
        let mut f = fixture();
        f.use_case
            .handle(
                MessageType::KeyDown,
                &KeyPayload { vk_code: 0x07 }.encode(), // undefined VK
            )
            .unwrap();
        assert!(f.injector.keys.lock().unwrap().is_empty());
        assert_eq!(f.use_case.events_injected(), 0);
    }

    #[test]
    fn test_permission_denial_is_absorbed() {
        let mut f = fixture();
        f.injector.deny_permission.store(3, Ordering::SeqCst);
        for _ in 0..3 {
            mouse_move(&mut f, 1, 1);
            f.use_case.last_mouse_pos = None; // defeat dedup for the retry
        }
        // No panic, no propagation; nothing injected.
        assert!(f.injector.moves.lock().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        let mut f = fixture();
        let result = f.use_case.handle(MessageType::MouseMove, &[1, 2]);
        assert!(result.is_err());
    }
}
