//! # bridge-host
//!
//! The host side of MacWin Bridge (normally the Windows machine). Owns the
//! outbound session: screen and audio capture feed bounded pipelines, the
//! Smart KVM service follows the cursor across the screen edge, and the
//! session orchestrator wires the three channels together and tears them
//! down as one unit.
//!
//! The crate is split the same way as the companion:
//!
//! - **`application`** – Orchestration and pipeline logic, written against
//!   traits so every piece runs under test without a real OS device.
//! - **`infrastructure`** – The platform contracts (screen capture, audio
//!   loopback capture, low-level input hook, cursor control) plus the JSON
//!   configuration store.

pub mod application;
pub mod infrastructure;
