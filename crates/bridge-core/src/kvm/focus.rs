//! Focus ownership state machine for the Smart KVM layer.
//!
//! [`FocusTracker`] decides *when* focus crosses between host and companion
//! and *where* the cursor lands on the other side. The host's KVM service
//! feeds it cursor positions from the hook, `CursorReturn` messages from
//! the companion, and the manual hotkey; it answers with [`FocusChange`]
//! values describing the transition to apply.
//!
//! Exactly one focus value holds at any instant. While focus is on the
//! companion the caller is expected to confine the physical cursor to a
//! narrow strip along the active edge and suppress local input delivery;
//! the tracker itself only records the state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kvm::geometry::Rect;

/// Which machine currently receives the user's real input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    #[default]
    Host,
    Companion,
}

/// The four edges of a rectangular screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EdgeSide {
    Left = 0x01,
    Right = 0x02,
    Top = 0x03,
    Bottom = 0x04,
}

impl TryFrom<u8> for EdgeSide {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(EdgeSide::Left),
            0x02 => Ok(EdgeSide::Right),
            0x03 => Ok(EdgeSide::Top),
            0x04 => Ok(EdgeSide::Bottom),
            _ => Err(()),
        }
    }
}

impl EdgeSide {
    /// The edge the cursor enters on the other screen.
    pub fn opposite(self) -> EdgeSide {
        match self {
            EdgeSide::Left => EdgeSide::Right,
            EdgeSide::Right => EdgeSide::Left,
            EdgeSide::Top => EdgeSide::Bottom,
            EdgeSide::Bottom => EdgeSide::Top,
        }
    }

    /// `true` for Left/Right, where the crossing position runs along Y.
    pub fn is_vertical(self) -> bool {
        matches!(self, EdgeSide::Left | EdgeSide::Right)
    }
}

/// Configuration error when constructing a tracker.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KvmDomainError {
    #[error("screen rectangle is empty: {0:?}")]
    EmptyRect(Rect),

    #[error("dead zone {dead_zone} px does not fit the {extent} px screen extent")]
    DeadZoneTooLarge { dead_zone: i32, extent: i32 },
}

/// A transition decided by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    /// Focus moves to the companion; the cursor enters at the given
    /// companion-space coordinate.
    ToCompanion { entry_x: i32, entry_y: i32 },
    /// Focus returns to the host; the host cursor should be restored near
    /// the given host-space coordinate.
    ToHost { restore_x: i32, restore_y: i32 },
}

/// Pure focus/edge state machine.
#[derive(Debug, Clone)]
pub struct FocusTracker {
    focus: Focus,
    host_rect: Rect,
    companion_rect: Rect,
    edge: EdgeSide,
    dead_zone: i32,
}

impl FocusTracker {
    /// Creates a tracker with focus on the host.
    ///
    /// # Errors
    ///
    /// Rejects empty rectangles and dead zones wider than the screen.
    pub fn new(
        host_rect: Rect,
        companion_rect: Rect,
        edge: EdgeSide,
        dead_zone: i32,
    ) -> Result<Self, KvmDomainError> {
        for rect in [host_rect, companion_rect] {
            if rect.width() <= 0 || rect.height() <= 0 {
                return Err(KvmDomainError::EmptyRect(rect));
            }
        }
        let extent = if edge.is_vertical() {
            host_rect.width()
        } else {
            host_rect.height()
        };
        if dead_zone < 0 || dead_zone >= extent {
            return Err(KvmDomainError::DeadZoneTooLarge {
                dead_zone,
                extent,
            });
        }
        Ok(Self {
            focus: Focus::Host,
            host_rect,
            companion_rect,
            edge,
            dead_zone,
        })
    }

    pub fn focus(&self) -> Focus {
        self.focus
    }

    pub fn edge(&self) -> EdgeSide {
        self.edge
    }

    pub fn host_rect(&self) -> Rect {
        self.host_rect
    }

    pub fn companion_rect(&self) -> Rect {
        self.companion_rect
    }

    /// Updates the companion geometry (e.g. after a handshake or a display
    /// change on the companion).
    pub fn set_companion_rect(&mut self, rect: Rect) {
        self.companion_rect = rect;
    }

    /// The strip along the active edge the host cursor is confined to
    /// while the companion holds focus (1–4 px wide).
    pub fn confinement_strip(&self) -> Rect {
        let r = self.host_rect;
        let w = 2;
        match self.edge {
            EdgeSide::Right => Rect {
                left: r.right - w,
                ..r
            },
            EdgeSide::Left => Rect {
                right: r.left + w,
                ..r
            },
            EdgeSide::Top => Rect {
                bottom: r.top + w,
                ..r
            },
            EdgeSide::Bottom => Rect {
                top: r.bottom - w,
                ..r
            },
        }
    }

    /// Feeds a host-space cursor position. Returns a transition when the
    /// cursor has pushed past the dead zone of the active edge.
    ///
    /// The dead-zone band is inert: with `dead_zone = 2` on a 1920-wide
    /// screen, x = 1918 stays on the host and x = 1919 crosses.
    pub fn observe_cursor(&mut self, x: i32, y: i32) -> Option<FocusChange> {
        if self.focus != Focus::Host {
            return None;
        }
        if !self.at_edge(x, y) {
            return None;
        }
        self.focus = Focus::Companion;
        let (entry_x, entry_y) = self.entry_point(x, y);
        Some(FocusChange::ToCompanion { entry_x, entry_y })
    }

    fn at_edge(&self, x: i32, y: i32) -> bool {
        let r = self.host_rect;
        let d = self.dead_zone;
        match self.edge {
            EdgeSide::Right => x > r.right - d,
            EdgeSide::Left => x < r.left + d,
            EdgeSide::Top => y < r.top + d,
            EdgeSide::Bottom => y > r.bottom - d,
        }
    }

    /// Companion-space entry coordinate for a crossing at `(x, y)`.
    fn entry_point(&self, x: i32, y: i32) -> (i32, i32) {
        let c = self.companion_rect;
        match self.edge {
            EdgeSide::Right => (c.left, self.map_along(y, false)),
            EdgeSide::Left => (c.right - 1, self.map_along(y, false)),
            EdgeSide::Top => (self.map_along(x, true), c.bottom - 1),
            EdgeSide::Bottom => (self.map_along(x, true), c.top),
        }
    }

    /// Proportionally maps a host coordinate along the crossing edge into
    /// companion space (`⌊(p / L) · dim⌋`, clamped).
    pub fn map_along(&self, pos: i32, horizontal: bool) -> i32 {
        let (host_origin, host_len, comp_origin, comp_len) = if horizontal {
            (
                self.host_rect.left,
                self.host_rect.width(),
                self.companion_rect.left,
                self.companion_rect.width(),
            )
        } else {
            (
                self.host_rect.top,
                self.host_rect.height(),
                self.companion_rect.top,
                self.companion_rect.height(),
            )
        };
        let rel = (pos - host_origin).clamp(0, host_len - 1);
        let mapped = (rel as f64 / host_len as f64 * comp_len as f64).floor() as i32;
        comp_origin + mapped.clamp(0, comp_len - 1)
    }

    /// Maps a full host cursor position into companion space while the
    /// companion holds focus (both axes proportional).
    pub fn map_to_companion(&self, x: i32, y: i32) -> (i32, i32) {
        (self.map_along(x, true), self.map_along(y, false))
    }

    /// Handles a `CursorReturn` from the companion. `position` is the
    /// normalized crossing point along the named companion edge.
    ///
    /// Returns `None` if focus is already on the host (a late or duplicate
    /// return is not an error).
    pub fn handle_return(&mut self, _edge: EdgeSide, position: f32) -> Option<FocusChange> {
        if self.focus != Focus::Companion {
            return None;
        }
        self.focus = Focus::Host;
        let (restore_x, restore_y) = self.restore_point(position);
        Some(FocusChange::ToHost {
            restore_x,
            restore_y,
        })
    }

    /// Manual toggle (hotkey). Flips focus; a forced hand-over enters the
    /// companion at its center.
    pub fn toggle(&mut self) -> FocusChange {
        match self.focus {
            Focus::Host => {
                self.focus = Focus::Companion;
                let c = self.companion_rect;
                FocusChange::ToCompanion {
                    entry_x: c.left + c.width() / 2,
                    entry_y: c.top + c.height() / 2,
                }
            }
            Focus::Companion => {
                self.focus = Focus::Host;
                let (restore_x, restore_y) = self.restore_point(0.5);
                FocusChange::ToHost {
                    restore_x,
                    restore_y,
                }
            }
        }
    }

    /// Host-space position near the active edge, inset past the dead zone
    /// so the restore itself cannot re-trigger a crossing.
    fn restore_point(&self, position: f32) -> (i32, i32) {
        let r = self.host_rect;
        let inset = self.dead_zone + 2;
        let pos = position.clamp(0.0, 1.0);
        match self.edge {
            EdgeSide::Right => (
                r.right - 1 - inset,
                r.top + (pos * (r.height() - 1) as f32) as i32,
            ),
            EdgeSide::Left => (
                r.left + inset,
                r.top + (pos * (r.height() - 1) as f32) as i32,
            ),
            EdgeSide::Top => (
                r.left + (pos * (r.width() - 1) as f32) as i32,
                r.top + inset,
            ),
            EdgeSide::Bottom => (
                r.left + (pos * (r.width() - 1) as f32) as i32,
                r.bottom - 1 - inset,
            ),
        }
    }
}

/// Companion-side complement: detects an injected cursor position leaving
/// the companion rectangle.
///
/// Returns the crossed edge and the normalized position along it, or `None`
/// while the position stays inside.
pub fn boundary_exit(rect: Rect, x: i32, y: i32) -> Option<(EdgeSide, f32)> {
    if rect.contains(x, y) {
        return None;
    }
    let norm_y = (y - rect.top).clamp(0, rect.height() - 1) as f32 / (rect.height() - 1) as f32;
    let norm_x = (x - rect.left).clamp(0, rect.width() - 1) as f32 / (rect.width() - 1) as f32;
    if x < rect.left {
        Some((EdgeSide::Left, norm_y))
    } else if x >= rect.right {
        Some((EdgeSide::Right, norm_y))
    } else if y < rect.top {
        Some((EdgeSide::Top, norm_x))
    } else {
        Some((EdgeSide::Bottom, norm_x))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
