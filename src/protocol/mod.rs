//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the binary framing used by connections:
//! - 11-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed accessors and control-frame builders

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::Frame;
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    flags, Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, MAX_CHANNEL_NAME_LEN, NO_LOGIN_INDEX,
};
