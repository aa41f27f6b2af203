//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame: header, optional channel name and
//! payload. Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use sidenet::protocol::Frame;
//! use sidenet::{ChannelName, Direction};
//! use bytes::Bytes;
//!
//! let channel: ChannelName = "demo:main".parse().unwrap();
//! let frame = Frame::login(Direction::ToClient, channel, 4, Bytes::from_static(b"hello"));
//!
//! assert_eq!(frame.login_index(), 4);
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{flags, Header, HEADER_SIZE, NO_LOGIN_INDEX};
use crate::bus::ChannelName;
use crate::direction::Direction;
use crate::error::{Error, Result};

/// Separator between names in REGISTER/UNREGISTER payloads.
const NAME_SEPARATOR: u8 = 0;

/// Length field for `body`, saturated at `u32::MAX`.
///
/// A saturated length never passes the payload limit, so an oversized
/// body is rejected rather than written with a truncated length.
fn wire_len(body: &[u8]) -> u32 {
    u32::try_from(body.len()).unwrap_or(u32::MAX)
}

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Channel the payload belongs to (`None` for control frames).
    pub channel: Option<ChannelName>,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from its parts. `header.channel_len` must match.
    pub fn new(header: Header, channel: Option<ChannelName>, payload: Bytes) -> Self {
        Self {
            header,
            channel,
            payload,
        }
    }

    /// Build a play-phase payload frame.
    pub fn play(direction: Direction, channel: ChannelName, payload: Bytes) -> Self {
        Self::data(Header::direction_flags(direction), NO_LOGIN_INDEX, channel, payload)
    }

    /// Build a login-phase payload frame tagged with `login_index`.
    pub fn login(direction: Direction, channel: ChannelName, login_index: i32, payload: Bytes) -> Self {
        Self::data(
            Header::direction_flags(direction) | flags::LOGIN,
            login_index,
            channel,
            payload,
        )
    }

    fn data(frame_flags: u8, login_index: i32, channel: ChannelName, payload: Bytes) -> Self {
        let header = Header::new(
            frame_flags,
            login_index,
            u16::try_from(channel.as_str().len()).unwrap_or(u16::MAX),
            wire_len(&payload),
        );
        Self::new(header, Some(channel), payload)
    }

    /// Build a REGISTER (or UNREGISTER) frame announcing `names`.
    pub fn registration<'a, I>(direction: Direction, register: bool, names: I) -> Self
    where
        I: IntoIterator<Item = &'a ChannelName>,
    {
        let mut body = Vec::new();
        for (i, name) in names.into_iter().enumerate() {
            if i > 0 {
                body.push(NAME_SEPARATOR);
            }
            body.extend_from_slice(name.as_str().as_bytes());
        }
        let kind = if register {
            flags::REGISTER
        } else {
            flags::UNREGISTER
        };
        let header = Header::new(
            Header::direction_flags(direction) | kind,
            NO_LOGIN_INDEX,
            0,
            wire_len(&body),
        );
        Self::new(header, None, Bytes::from(body))
    }

    /// Build the frame that ends the login phase.
    pub fn login_complete() -> Self {
        let header = Header::new(
            Header::direction_flags(Direction::ToClient) | flags::LOGIN_COMPLETE,
            NO_LOGIN_INDEX,
            0,
            0,
        );
        Self::new(header, None, Bytes::new())
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get a clone of the payload as Bytes (cheap, zero-copy).
    #[inline]
    pub fn payload_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.header.direction()
    }

    #[inline]
    pub fn login_index(&self) -> i32 {
        self.header.login_index
    }

    #[inline]
    pub fn is_login(&self) -> bool {
        self.header.is_login()
    }

    /// Parse the channel names carried by a REGISTER/UNREGISTER frame.
    ///
    /// Empty segments are skipped.
    pub fn registered_names(&self) -> Result<Vec<ChannelName>> {
        self.payload
            .split(|b| *b == NAME_SEPARATOR)
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                let text = std::str::from_utf8(segment).map_err(|_| {
                    Error::Protocol("Channel name is not valid UTF-8".to_string())
                })?;
                text.parse()
            })
            .collect()
    }

    /// Fail with `PayloadTooLarge` unless the payload fits in `max_payload_size`.
    pub fn check_payload_size(&self, max_payload_size: u32) -> Result<()> {
        if self.payload.len() > max_payload_size as usize {
            return Err(Error::PayloadTooLarge {
                size: self.payload.len(),
                max: max_payload_size,
            });
        }
        Ok(())
    }

    /// Encode the frame into one contiguous buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let channel = self.channel_bytes();
        let mut buf = Vec::with_capacity(HEADER_SIZE + channel.len() + self.payload.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(channel);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Channel name as raw bytes (empty for control frames).
    #[inline]
    pub fn channel_bytes(&self) -> &[u8] {
        self.channel
            .as_ref()
            .map(|c| c.as_str().as_bytes())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameBuffer;

    fn name(s: &str) -> ChannelName {
        s.parse().unwrap()
    }

    #[test]
    fn test_play_frame() {
        let frame = Frame::play(Direction::ToServer, name("demo:chat"), Bytes::from_static(b"hi"));

        assert_eq!(frame.direction(), Direction::ToServer);
        assert_eq!(frame.login_index(), NO_LOGIN_INDEX);
        assert!(!frame.is_login());
        assert_eq!(frame.header.channel_len, 9);
        assert_eq!(frame.payload(), b"hi");
    }

    #[test]
    fn test_login_frame_keeps_index() {
        let frame = Frame::login(Direction::ToClient, name("demo:hs"), 12, Bytes::new());

        assert!(frame.is_login());
        assert_eq!(frame.login_index(), 12);
        assert_eq!(frame.direction(), Direction::ToClient);
    }

    #[test]
    fn test_registration_names() {
        let names = [name("a:one"), name("b:two/sub")];
        let frame = Frame::registration(Direction::ToServer, true, names.iter());

        assert!(frame.header.is_register());
        assert!(frame.channel.is_none());
        assert_eq!(frame.payload(), b"a:one\0b:two/sub");
        assert_eq!(frame.registered_names().unwrap(), names.to_vec());
    }

    #[test]
    fn test_registration_rejects_bad_name() {
        let header = Header::new(flags::UNREGISTER, NO_LOGIN_INDEX, 0, 7);
        let frame = Frame::new(header, None, Bytes::from_static(b"NotGood"));
        assert!(frame.registered_names().is_err());
    }

    #[test]
    fn test_login_complete_is_control() {
        let frame = Frame::login_complete();
        assert!(frame.header.is_login_complete());
        assert!(frame.header.validate(u32::MAX).is_ok());
        assert!(frame.channel_bytes().is_empty());
    }

    #[test]
    fn test_payload_size_check() {
        let frame = Frame::play(Direction::ToServer, name("demo:big"), Bytes::from(vec![0u8; 65]));

        assert!(frame.check_payload_size(65).is_ok());
        match frame.check_payload_size(64) {
            Err(Error::PayloadTooLarge { size, max }) => assert_eq!((size, max), (65, 64)),
            other => panic!("expected PayloadTooLarge, got {:?}", other),
        }
        assert_eq!(frame.header.payload_length, 65);
    }

    #[test]
    fn test_to_bytes_parses_back() {
        let frame = Frame::login(Direction::ToServer, name("demo:hs"), 3, Bytes::from_static(b"xyz"));
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE + 7 + 3);

        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&bytes).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].channel, Some(name("demo:hs")));
        assert_eq!(frames[0].login_index(), 3);
        assert_eq!(frames[0].payload(), b"xyz");
    }
}
