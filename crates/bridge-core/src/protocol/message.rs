//! Message type codes, header layout, flag bits, and channel routing.
//!
//! Message types are grouped by their high byte: `0x00xx` control,
//! `0x01xx` video, `0x02xx` audio, `0x03xx` input. The high byte also
//! decides which TCP channel a message travels on, with two exceptions
//! ([`MessageType::DisplaySwitch`] and [`MessageType::VideoKeyRequest`]
//! steer the video pipeline and therefore travel on Control).

use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Size of the fixed message header in bytes.
pub const HEADER_SIZE: usize = 8;

/// TCP port of the control channel.
pub const CONTROL_PORT: u16 = 42100;
/// TCP port of the video channel.
pub const VIDEO_PORT: u16 = 42101;
/// TCP port of the audio channel.
pub const AUDIO_PORT: u16 = 42102;
/// UDP port used for LAN discovery.
pub const DISCOVERY_PORT: u16 = 42099;

// ── Message type codes ────────────────────────────────────────────────────────

/// All message type codes understood on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum MessageType {
    // Control (0x00xx)
    Handshake = 0x0001,
    HandshakeAck = 0x0002,
    Heartbeat = 0x0003,
    Disconnect = 0x0004,
    // Video (0x01xx)
    VideoFrame = 0x0100,
    VideoConfig = 0x0101,
    DisplaySwitch = 0x0102,
    DisplayStatus = 0x0103,
    VideoKeyRequest = 0x0104,
    // Audio (0x02xx)
    AudioData = 0x0200,
    AudioConfig = 0x0201,
    AudioControl = 0x0202,
    // Input (0x03xx)
    MouseMove = 0x0300,
    MouseButton = 0x0301,
    MouseScroll = 0x0302,
    CursorReturn = 0x0303,
    KeyDown = 0x0310,
    KeyUp = 0x0311,
    ClipboardSync = 0x0320,
    KvmConfig = 0x0330,
}

impl TryFrom<u16> for MessageType {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, ()> {
        match value {
            0x0001 => Ok(MessageType::Handshake),
            0x0002 => Ok(MessageType::HandshakeAck),
            0x0003 => Ok(MessageType::Heartbeat),
            0x0004 => Ok(MessageType::Disconnect),
            0x0100 => Ok(MessageType::VideoFrame),
            0x0101 => Ok(MessageType::VideoConfig),
            0x0102 => Ok(MessageType::DisplaySwitch),
            0x0103 => Ok(MessageType::DisplayStatus),
            0x0104 => Ok(MessageType::VideoKeyRequest),
            0x0200 => Ok(MessageType::AudioData),
            0x0201 => Ok(MessageType::AudioConfig),
            0x0202 => Ok(MessageType::AudioControl),
            0x0300 => Ok(MessageType::MouseMove),
            0x0301 => Ok(MessageType::MouseButton),
            0x0302 => Ok(MessageType::MouseScroll),
            0x0303 => Ok(MessageType::CursorReturn),
            0x0310 => Ok(MessageType::KeyDown),
            0x0311 => Ok(MessageType::KeyUp),
            0x0320 => Ok(MessageType::ClipboardSync),
            0x0330 => Ok(MessageType::KvmConfig),
            _ => Err(()),
        }
    }
}

impl MessageType {
    /// Returns `true` for the input event family (forwarded with
    /// [`MessageFlags::PRIORITY`] while the companion holds focus).
    pub fn is_input(self) -> bool {
        (self as u16) & 0xFF00 == 0x0300
    }
}

// ── Flags ─────────────────────────────────────────────────────────────────────

/// Bitfield carried in the header's second word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageFlags(pub u16);

impl MessageFlags {
    /// Payload is an XOR delta against the accumulated reference frame.
    pub const COMPRESSED: u16 = 1 << 0;
    /// Reserved for a future encrypted transport.
    pub const ENCRYPTED: u16 = 1 << 1;
    /// Input event; should be flushed promptly.
    pub const PRIORITY: u16 = 1 << 2;
    /// Video payload is a self-contained frame.
    pub const KEY_FRAME: u16 = 1 << 3;

    pub const NONE: MessageFlags = MessageFlags(0);

    pub fn compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    pub fn priority(self) -> bool {
        self.0 & Self::PRIORITY != 0
    }

    pub fn key_frame(self) -> bool {
        self.0 & Self::KEY_FRAME != 0
    }
}

// ── Channels ──────────────────────────────────────────────────────────────────

/// One of the three TCP byte streams of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Control,
    Video,
    Audio,
}

impl Channel {
    /// The fixed TCP port of this channel.
    pub fn port(self) -> u16 {
        match self {
            Channel::Control => CONTROL_PORT,
            Channel::Video => VIDEO_PORT,
            Channel::Audio => AUDIO_PORT,
        }
    }

    /// Routes a message type to the channel it travels on.
    ///
    /// `DisplaySwitch` and `VideoKeyRequest` steer the video pipeline
    /// rather than carry frames, so they go on Control alongside the
    /// control and input families.
    pub fn for_type(msg_type: MessageType) -> Channel {
        match msg_type {
            MessageType::DisplaySwitch | MessageType::VideoKeyRequest => Channel::Control,
            other => match (other as u16) & 0xFF00 {
                0x0100 => Channel::Video,
                0x0200 => Channel::Audio,
                _ => Channel::Control,
            },
        }
    }

    /// Short lowercase name used in log lines and thread names.
    pub fn name(self) -> &'static str {
        match self {
            Channel::Control => "control",
            Channel::Video => "video",
            Channel::Audio => "audio",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The TCP port triple of one session. Fixed in production; tests bind
/// ephemeral ports and carry the real values here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPorts {
    pub control: u16,
    pub video: u16,
    pub audio: u16,
}

impl Default for ChannelPorts {
    fn default() -> Self {
        Self {
            control: CONTROL_PORT,
            video: VIDEO_PORT,
            audio: AUDIO_PORT,
        }
    }
}

impl ChannelPorts {
    pub fn port(&self, channel: Channel) -> u16 {
        match channel {
            Channel::Control => self.control,
            Channel::Video => self.video,
            Channel::Audio => self.audio,
        }
    }
}

// ── Header ────────────────────────────────────────────────────────────────────

/// The decoded 8-byte message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub msg_type: MessageType,
    pub flags: MessageFlags,
    pub payload_len: u32,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
