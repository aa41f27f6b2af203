//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 11 bytes
//! - `WaitingForBody`: Header parsed, need channel name + payload bytes
//!
//! # Example
//!
//! ```ignore
//! use sidenet::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from the socket
//! let frames = buffer.push(&chunk)?;
//!
//! for frame in frames {
//!     println!("Got frame on channel {:?}", frame.channel);
//! }
//! ```

use bytes::BytesMut;

use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use super::Frame;
use crate::bus::ChannelName;
use crate::error::{Error, Result};

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header (need 11 bytes).
    WaitingForHeader,
    /// Header parsed and validated, waiting for the body.
    WaitingForBody { header: Header },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// Every header is validated before its body is awaited, so an oversized
/// or malformed frame fails fast instead of being buffered.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_payload_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max payload: 1MB.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new frame buffer with custom max payload size.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Returns a vector of complete frames (may be empty if still waiting
    /// for data). Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if a header fails validation or a channel
    /// name is malformed. The buffer should be discarded afterwards.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        loop {
            match &self.state {
                State::WaitingForHeader => {
                    let header = match Header::decode(&self.buffer) {
                        Some(h) => h,
                        None => return Ok(None),
                    };
                    header.validate(self.max_payload_size)?;

                    let _ = self.buffer.split_to(HEADER_SIZE);
                    self.state = State::WaitingForBody { header };
                }

                State::WaitingForBody { header } => {
                    let header = *header;
                    if self.buffer.len() < header.body_len() {
                        return Ok(None);
                    }

                    let channel_bytes = self.buffer.split_to(header.channel_len as usize);
                    let payload = self.buffer.split_to(header.payload_length as usize).freeze();
                    self.state = State::WaitingForHeader;

                    let channel = if channel_bytes.is_empty() {
                        None
                    } else {
                        Some(parse_channel(&channel_bytes)?)
                    };

                    return Ok(Some(Frame::new(header, channel, payload)));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_channel(bytes: &[u8]) -> Result<ChannelName> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| Error::Protocol("Channel name is not valid UTF-8".to_string()))?;
    text.parse()
}
