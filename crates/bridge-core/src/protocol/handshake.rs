//! JSON documents exchanged on the control channel.
//!
//! The handshake and the per-pipeline configuration messages are JSON with
//! PascalCase field names. Unknown fields are ignored so either peer can be
//! upgraded first; missing required fields are a parse error and abort the
//! session.

use serde::{Deserialize, Serialize};

use crate::kvm::focus::EdgeSide;

/// Peer platform announced in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Windows,
    #[serde(rename = "macOS")]
    MacOs,
}

/// `Handshake` / `HandshakeAck` body. Both directions use the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HandshakeInfo {
    pub app_version: String,
    pub device_name: String,
    pub platform: Platform,
    pub display_width: i32,
    pub display_height: i32,
    pub refresh_rate: i32,
    pub supports_audio: bool,
    pub supports_input: bool,
}

impl HandshakeInfo {
    pub fn to_json(&self) -> Vec<u8> {
        // Serialization of a plain struct with no maps cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

// ── Video configuration ───────────────────────────────────────────────────────

/// Which frame payload layout the sender commits to for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    #[serde(rename = "raw-bgra")]
    RawBgra,
    #[serde(rename = "h264")]
    H264,
    #[serde(rename = "h265")]
    H265,
}

impl VideoCodec {
    /// `true` when frames carry the 22-byte encoded sub-header.
    pub fn is_encoded(self) -> bool {
        !matches!(self, VideoCodec::RawBgra)
    }
}

/// `VideoConfig` (0x0101): declares the frame layout and stream geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VideoConfig {
    pub codec: VideoCodec,
    pub width: i32,
    pub height: i32,
    pub target_fps: u32,
}

impl VideoConfig {
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Direction of the mirrored display, carried by `DisplaySwitch` (0x0102).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DisplayMode {
    /// Host screen is streamed to the companion (the normal direction).
    #[default]
    HostToCompanion,
    /// Companion screen is streamed back to the host.
    CompanionToHost,
    /// No video stream; audio and KVM remain live.
    Disabled,
}

/// `DisplaySwitch` body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DisplaySwitch {
    pub mode: DisplayMode,
}

// ── Audio configuration ───────────────────────────────────────────────────────

/// `AudioConfig` (0x0201): output format for the playback mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub buffer_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            bits_per_sample: 16,
            buffer_ms: 50,
        }
    }
}

impl AudioConfig {
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Bytes per interleaved sample frame.
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }
}

/// Audio routing selection, carried by `AudioControl` (0x0202).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AudioRoute {
    #[default]
    WindowsToMac,
    MacToWindows,
    Both,
    Muted,
}

/// `AudioControl` body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AudioControl {
    pub route: AudioRoute,
}

// ── KVM configuration ─────────────────────────────────────────────────────────

/// `KvmConfig` (0x0330): edge-crossing parameters shared with the companion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KvmConfig {
    pub edge: EdgeSide,
    pub dead_zone_px: i32,
    pub edge_offset: f32,
}

impl Default for KvmConfig {
    fn default() -> Self {
        Self {
            edge: EdgeSide::Right,
            dead_zone_px: 2,
            edge_offset: 0.0,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
