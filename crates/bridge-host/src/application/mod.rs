//! Host application layer: the pipelines and the session orchestrator.
//!
//! Everything here depends on traits and domain types, never on concrete
//! OS or socket code, so the routing and encoding logic runs fully under
//! test with recording doubles.

pub mod kvm;
pub mod session;
pub mod stream_audio;
pub mod stream_video;
