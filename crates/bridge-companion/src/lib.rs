//! # bridge-companion
//!
//! The companion side of MacWin Bridge (normally the Mac). It listens on
//! the three fixed session ports, decodes and presents the video stream,
//! plays the forwarded system audio through a jitter buffer, and injects
//! forwarded input, handing focus back with `CursorReturn` when the
//! injected cursor leaves the screen.

pub mod application;
pub mod infrastructure;
