//! # bridge-net
//!
//! Networking layer for MacWin Bridge: the framed per-channel TCP
//! transport, UDP broadcast discovery, and local-interface selection.
//!
//! Each of a session's three channels (control, video, audio) is one
//! [`transport::Transport`] instance owning one TCP connection. The
//! transport serializes concurrent sends FIFO through a single writer
//! task, de-frames the receive side into whole messages, and reports a
//! single `Disconnected` event when the connection dies.

pub mod discovery;
pub mod netif;
pub mod transport;

pub use discovery::{discover, DiscoveredPeer, DiscoveryResponder};
pub use transport::{
    MessageStream, Transport, TransportError, TransportEvent, TransportListener, TransportStats,
};
