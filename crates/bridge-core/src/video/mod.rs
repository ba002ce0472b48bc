//! Video frame payload layouts and the XOR delta kernel.

pub mod delta;
pub mod frame;

pub use delta::{apply_in_place, xor_into};
pub use frame::{
    EncodedFrameHeader, FrameLayoutError, FrameType, RawFrameHeader, ENCODED_HEADER_LEN,
    RAW_HEADER_LEN,
};
