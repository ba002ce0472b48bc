//! Companion application layer.

pub mod inject_input;
pub mod play_audio;
pub mod render_video;
pub mod session;
