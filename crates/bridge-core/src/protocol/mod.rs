//! Wire protocol: message framing, type codes, and negotiated JSON documents.
//!
//! Every byte that travels on one of the three TCP channels is part of a
//! framed message:
//!
//! ```text
//! [type:u16][flags:u16][payload_len:u32][payload:N]
//! ```
//!
//! The header is exactly 8 bytes, little-endian, with no trailer. The
//! `codec` sub-module owns encoding and the incremental decoder; `message`
//! defines the closed type enumeration, the flag bits, and the channel
//! routing rule; `input` holds the compact binary payloads of the input
//! event family; `handshake` holds the JSON documents exchanged on the
//! control channel (handshake, video/audio/KVM configuration).

pub mod codec;
pub mod handshake;
pub mod input;
pub mod message;

pub use codec::{encode_message, FramingError, MessageDecoder, MAX_PAYLOAD_LEN};
pub use message::{Channel, MessageFlags, MessageHeader, MessageType, HEADER_SIZE};
