//! Scriptable hook for tests: events are injected by the test instead of
//! arriving from the OS.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use super::{HookEvent, InputHook, KvmError};

/// Test double for [`InputHook`]. Clone the [`MockHookDriver`] before
/// handing the hook to the service, then feed events through it.
pub struct MockInputHook {
    rx: Mutex<Option<Receiver<HookEvent>>>,
    driver: MockHookDriver,
}

/// The test's handle for injecting events and observing suppression.
#[derive(Clone)]
pub struct MockHookDriver {
    tx: Sender<HookEvent>,
    suppressed: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl MockInputHook {
    pub fn new() -> (Self, MockHookDriver) {
        let (tx, rx) = mpsc::channel();
        let driver = MockHookDriver {
            tx,
            suppressed: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
        };
        (
            Self {
                rx: Mutex::new(Some(rx)),
                driver: driver.clone(),
            },
            driver,
        )
    }
}

impl InputHook for MockInputHook {
    fn start(&mut self) -> Result<Receiver<HookEvent>, KvmError> {
        self.rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| KvmError::HookInstallFailed("mock hook already started".to_string()))
    }

    fn set_suppress(&self, suppress: bool) {
        self.driver.suppressed.store(suppress, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.driver.stopped.store(true, Ordering::SeqCst);
    }
}

impl MockHookDriver {
    /// Injects one event as if the OS hook had fired.
    pub fn emit(&self, event: HookEvent) {
        let _ = self.tx.send(event);
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
