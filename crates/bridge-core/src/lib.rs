//! # bridge-core
//!
//! Shared library for MacWin Bridge containing the wire protocol codec,
//! video frame layouts and the XOR delta kernel, shared buffer/queue
//! primitives, the pure KVM focus tracker, and the key code translation
//! table.
//!
//! This crate is used by both the host and companion applications. It has
//! zero dependencies on OS APIs, UI frameworks, or network sockets.
//!
//! - **`protocol`** – Message framing (8-byte header + payload), the closed
//!   message-type enumeration, input-event payload codecs, and the JSON
//!   handshake/config documents.
//! - **`video`** – The two on-wire frame payload layouts (raw BGRA and
//!   encoded NAL) and the XOR delta/zero-check kernel.
//! - **`buffer`** / **`queue`** – The shared byte pool with paired
//!   rent/return accounting, and the bounded drop-oldest queue that every
//!   pipeline stage uses for backpressure.
//! - **`kvm`** – Pure focus/edge-transition state machine; all OS effects
//!   (cursor clipping, hook suppression) are emitted as data.
//! - **`keymap`** – Windows virtual-key to macOS CGKeyCode translation.

pub mod buffer;
pub mod keymap;
pub mod kvm;
pub mod protocol;
pub mod queue;
pub mod video;

// Re-export the most-used types at the crate root so callers can write
// `bridge_core::MessageType` instead of the full module path.
pub use buffer::{BufferPool, PooledBuf};
pub use kvm::focus::{boundary_exit, EdgeSide, Focus, FocusChange, FocusTracker};
pub use kvm::geometry::Rect;
pub use protocol::codec::{encode_message, FramingError, MessageDecoder};
pub use protocol::message::{Channel, MessageFlags, MessageHeader, MessageType};
pub use queue::DropOldestQueue;
