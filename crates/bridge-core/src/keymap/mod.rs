//! Key code translation for cross-platform input injection.
//!
//! The wire carries Windows Virtual-Key numbers (the hook's native
//! vocabulary); the companion translates them to macOS `CGKeyCode` values
//! at the injection boundary. Unmapped keys are dropped silently.

pub mod macos_cg;

pub use macos_cg::vk_to_cgkeycode;
