//! Wire format encoding and decoding.
//!
//! Implements the 11-byte header format:
//! ```text
//! ┌───────┬─────────────┬────────────┬─────────────┐
//! │ Flags │ Login index │ Channel len│ Payload len │
//! │ 1 byte│ 4 bytes     │ 2 bytes    │ 4 bytes     │
//! │       │ int32 BE    │ uint16 BE  │ uint32 BE   │
//! └───────┴─────────────┴────────────┴─────────────┘
//! ```
//!
//! The header is followed by `channel_len` bytes of UTF-8 channel name and
//! `payload_len` bytes of payload. All multi-byte integers are Big Endian.

use crate::direction::Direction;
use crate::error::{Error, Result};

/// Header size in bytes (fixed, exactly 11).
pub const HEADER_SIZE: usize = 11;

/// Default maximum payload size (1 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 1_048_576;

/// Maximum encoded channel name length.
pub const MAX_CHANNEL_NAME_LEN: u16 = 256;

/// Login index of frames that do not belong to the login phase.
pub const NO_LOGIN_INDEX: i32 = -1;

/// Flag constants for the protocol.
pub mod flags {
    /// Direction: to client (1) or to server (0).
    pub const DIRECTION_TO_CLIENT: u8 = 0b0000_0001;
    /// Login-phase payload carrying a correlation index.
    pub const LOGIN: u8 = 0b0000_0010;
    /// Remote registers the channels named in the payload.
    pub const REGISTER: u8 = 0b0000_0100;
    /// Remote unregisters the channels named in the payload.
    pub const UNREGISTER: u8 = 0b0000_1000;
    /// Server finished the login phase.
    pub const LOGIN_COMPLETE: u8 = 0b0001_0000;

    /// Reserved bits mask (bits 5-7).
    pub const RESERVED_MASK: u8 = 0b1110_0000;

    /// Bits that turn a frame into a control frame (no channel).
    pub const CONTROL_MASK: u8 = REGISTER | UNREGISTER | LOGIN_COMPLETE;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Flags byte (see `flags` module).
    pub flags: u8,
    /// Correlation index (-1 outside the login phase).
    pub login_index: i32,
    /// Channel name length in bytes (0 for control frames).
    pub channel_len: u16,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(flags: u8, login_index: i32, channel_len: u16, payload_length: u32) -> Self {
        Self {
            flags,
            login_index,
            channel_len,
            payload_length,
        }
    }

    /// Flags for a frame traveling in `direction`.
    #[inline]
    pub fn direction_flags(direction: Direction) -> u8 {
        match direction {
            Direction::ToServer => 0,
            Direction::ToClient => flags::DIRECTION_TO_CLIENT,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use sidenet::protocol::{Header, flags};
    ///
    /// let header = Header::new(flags::LOGIN, 3, 12, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 11);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (11 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.flags;
        buf[1..5].copy_from_slice(&self.login_index.to_be_bytes());
        buf[5..7].copy_from_slice(&self.channel_len.to_be_bytes());
        buf[7..11].copy_from_slice(&self.payload_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            flags: buf[0],
            login_index: i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
            channel_len: u16::from_be_bytes([buf[5], buf[6]]),
            payload_length: u32::from_be_bytes([buf[7], buf[8], buf[9], buf[10]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Reserved flag bits are 0
    /// - At most one control bit is set, and control frames carry no channel
    /// - Data frames carry a channel name of bounded length
    /// - Payload length doesn't exceed max
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(Error::Protocol("Reserved flag bits must be 0".to_string()));
        }

        let control = self.flags & flags::CONTROL_MASK;
        if control.count_ones() > 1 {
            return Err(Error::Protocol(format!(
                "Conflicting control flags 0x{:02x}",
                control
            )));
        }

        if control != 0 && self.channel_len != 0 {
            return Err(Error::Protocol(
                "Control frames must not name a channel".to_string(),
            ));
        }

        if control == 0 && self.channel_len == 0 {
            return Err(Error::Protocol(
                "Payload frames must name a channel".to_string(),
            ));
        }

        if self.channel_len > MAX_CHANNEL_NAME_LEN {
            return Err(Error::Protocol(format!(
                "Channel name length {} exceeds maximum {}",
                self.channel_len, MAX_CHANNEL_NAME_LEN
            )));
        }

        if self.payload_length > max_payload_size {
            return Err(Error::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        Ok(())
    }

    /// Direction encoded in the flags.
    #[inline]
    pub fn direction(&self) -> Direction {
        if flags::has_flag(self.flags, flags::DIRECTION_TO_CLIENT) {
            Direction::ToClient
        } else {
            Direction::ToServer
        }
    }

    #[inline]
    pub fn is_login(&self) -> bool {
        flags::has_flag(self.flags, flags::LOGIN)
    }

    #[inline]
    pub fn is_register(&self) -> bool {
        flags::has_flag(self.flags, flags::REGISTER)
    }

    #[inline]
    pub fn is_unregister(&self) -> bool {
        flags::has_flag(self.flags, flags::UNREGISTER)
    }

    #[inline]
    pub fn is_login_complete(&self) -> bool {
        flags::has_flag(self.flags, flags::LOGIN_COMPLETE)
    }

    /// Total body size following the header.
    #[inline]
    pub fn body_len(&self) -> usize {
        self.channel_len as usize + self.payload_length as usize
    }
}
