//! Binary payload layouts of the input event family.
//!
//! Input events are small fixed-size payloads, encoded little-endian like
//! everything else on the wire. Mouse positions are absolute coordinates in
//! the *companion's* space (the host scales before sending). Key events
//! carry the Windows virtual-key number; translation to the native key code
//! happens at the injection boundary.

use thiserror::Error;

use crate::kvm::focus::EdgeSide;

/// Errors produced while decoding an input payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputPayloadError {
    #[error("{context}: need {needed} bytes, got {available}")]
    Truncated {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("{context}: unknown discriminant {value}")]
    UnknownDiscriminant { context: &'static str, value: u8 },
}

fn require_len(
    payload: &[u8],
    needed: usize,
    context: &'static str,
) -> Result<(), InputPayloadError> {
    if payload.len() < needed {
        return Err(InputPayloadError::Truncated {
            context,
            needed,
            available: payload.len(),
        });
    }
    Ok(())
}

fn read_i32(p: &[u8], off: usize) -> i32 {
    i32::from_le_bytes([p[off], p[off + 1], p[off + 2], p[off + 3]])
}

// ── Mouse move ────────────────────────────────────────────────────────────────

/// `MouseMove` (0x0300): absolute cursor position, companion coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseMovePayload {
    pub x: i32,
    pub y: i32,
}

impl MouseMovePayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        buf.extend_from_slice(&self.x.to_le_bytes());
        buf.extend_from_slice(&self.y.to_le_bytes());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, InputPayloadError> {
        require_len(payload, 8, "MouseMove")?;
        Ok(Self {
            x: read_i32(payload, 0),
            y: read_i32(payload, 4),
        })
    }
}

// ── Mouse button ──────────────────────────────────────────────────────────────

/// Button identity and direction folded into one action code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ButtonAction {
    LeftDown = 0x01,
    LeftUp = 0x02,
    RightDown = 0x03,
    RightUp = 0x04,
    MiddleDown = 0x05,
    MiddleUp = 0x06,
}

impl TryFrom<u8> for ButtonAction {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(ButtonAction::LeftDown),
            0x02 => Ok(ButtonAction::LeftUp),
            0x03 => Ok(ButtonAction::RightDown),
            0x04 => Ok(ButtonAction::RightUp),
            0x05 => Ok(ButtonAction::MiddleDown),
            0x06 => Ok(ButtonAction::MiddleUp),
            _ => Err(()),
        }
    }
}

impl ButtonAction {
    /// `true` for the press half of the pair.
    pub fn is_down(self) -> bool {
        matches!(
            self,
            ButtonAction::LeftDown | ButtonAction::RightDown | ButtonAction::MiddleDown
        )
    }
}

/// `MouseButton` (0x0301).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseButtonPayload {
    pub action: ButtonAction,
}

impl MouseButtonPayload {
    pub fn encode(&self) -> Vec<u8> {
        vec![self.action as u8]
    }

    pub fn decode(payload: &[u8]) -> Result<Self, InputPayloadError> {
        require_len(payload, 1, "MouseButton")?;
        let action =
            ButtonAction::try_from(payload[0]).map_err(|_| InputPayloadError::UnknownDiscriminant {
                context: "MouseButton",
                value: payload[0],
            })?;
        Ok(Self { action })
    }
}

// ── Mouse scroll ──────────────────────────────────────────────────────────────

/// `MouseScroll` (0x0302): wheel deltas in Windows `WHEEL_DELTA` units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseScrollPayload {
    pub dx: i32,
    pub dy: i32,
}

impl MouseScrollPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        buf.extend_from_slice(&self.dx.to_le_bytes());
        buf.extend_from_slice(&self.dy.to_le_bytes());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, InputPayloadError> {
        require_len(payload, 8, "MouseScroll")?;
        Ok(Self {
            dx: read_i32(payload, 0),
            dy: read_i32(payload, 4),
        })
    }
}

// ── Key events ────────────────────────────────────────────────────────────────

/// `KeyDown`/`KeyUp` (0x0310/0x0311): Windows virtual-key number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPayload {
    pub vk_code: u16,
}

impl KeyPayload {
    pub fn encode(&self) -> Vec<u8> {
        self.vk_code.to_le_bytes().to_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, InputPayloadError> {
        require_len(payload, 2, "Key")?;
        Ok(Self {
            vk_code: u16::from_le_bytes([payload[0], payload[1]]),
        })
    }
}

// ── Cursor return ─────────────────────────────────────────────────────────────

/// `CursorReturn` (0x0303): the companion hands focus back.
///
/// `position` is the crossing point normalized to `[0, 1]` along the named
/// companion edge; the host may use it to restore its cursor near the
/// symmetric position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorReturnPayload {
    pub edge: EdgeSide,
    pub position: f32,
}

impl CursorReturnPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5);
        buf.push(self.edge as u8);
        buf.extend_from_slice(&self.position.to_le_bytes());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, InputPayloadError> {
        require_len(payload, 5, "CursorReturn")?;
        let edge =
            EdgeSide::try_from(payload[0]).map_err(|_| InputPayloadError::UnknownDiscriminant {
                context: "CursorReturn",
                value: payload[0],
            })?;
        let position = f32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]);
        Ok(Self { edge, position })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
