//! Reply targets for inbound messages.

use std::fmt;
use std::sync::{Mutex, PoisonError, Weak};

use bytes::Bytes;
use serde::Serialize;

use crate::bus::ChannelName;
use crate::codec::MsgPackCodec;
use crate::direction::Direction;
use crate::error::{Error, Result};
use crate::protocol::{Frame, NO_LOGIN_INDEX};
use crate::transport::Connection;

/// Sends bytes back over the connection that delivered a message.
///
/// Sends never wait: a full outbound queue is reported as
/// [`Error::Backpressure`], a gone connection as [`Error::ConnectionClosed`].
/// Both are reportable, non-fatal conditions.
pub trait PacketDispatcher: Send + Sync {
    /// Direction replies travel in.
    fn direction(&self) -> Direction;

    /// Correlation index attached to replies (`-1` outside login).
    fn login_index(&self) -> i32 {
        NO_LOGIN_INDEX
    }

    /// Reply on the channel that delivered the message.
    fn send(&self, payload: Bytes) -> Result<()>;

    /// Reply on another channel of the same connection.
    fn send_on(&self, channel: &ChannelName, payload: Bytes) -> Result<()>;
}

impl dyn PacketDispatcher {
    /// Encode `message` with the MsgPack codec and [`send`](Self::send) it.
    pub fn send_message<T: Serialize>(&self, message: &T) -> Result<()> {
        let data = MsgPackCodec::encode(message)?;
        self.send(Bytes::from(data))
    }
}

/// Dispatcher bound to one connection, channel and correlation index.
pub struct ConnectionDispatcher {
    connection: Weak<Connection>,
    direction: Direction,
    channel: ChannelName,
    login_index: i32,
}

impl ConnectionDispatcher {
    /// `direction` is the reply direction. A non-negative `login_index`
    /// makes every reply a login frame carrying that index.
    pub fn new(
        connection: Weak<Connection>,
        direction: Direction,
        channel: ChannelName,
        login_index: i32,
    ) -> Self {
        Self {
            connection,
            direction,
            channel,
            login_index,
        }
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }
}

impl PacketDispatcher for ConnectionDispatcher {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn login_index(&self) -> i32 {
        self.login_index
    }

    fn send(&self, payload: Bytes) -> Result<()> {
        self.send_on(&self.channel, payload)
    }

    fn send_on(&self, channel: &ChannelName, payload: Bytes) -> Result<()> {
        let connection = self.connection.upgrade().ok_or(Error::ConnectionClosed)?;

        let frame = if self.login_index == NO_LOGIN_INDEX {
            Frame::play(self.direction, channel.clone(), payload)
        } else {
            Frame::login(self.direction, channel.clone(), self.login_index, payload)
        };
        connection.try_send_frame(&frame)
    }
}

impl fmt::Debug for ConnectionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDispatcher")
            .field("direction", &self.direction)
            .field("channel", &self.channel)
            .field("login_index", &self.login_index)
            .finish()
    }
}

/// A reply captured by [`RecordingDispatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPayload {
    /// `None` when sent with [`PacketDispatcher::send`].
    pub channel: Option<ChannelName>,
    pub payload: Bytes,
}

/// Dispatcher that keeps replies in memory instead of sending them.
///
/// Useful for contexts that have no connection, such as handler tests.
#[derive(Debug)]
pub struct RecordingDispatcher {
    direction: Direction,
    login_index: i32,
    sent: Mutex<Vec<SentPayload>>,
}

impl RecordingDispatcher {
    pub fn new(direction: Direction) -> Self {
        Self::with_login_index(direction, NO_LOGIN_INDEX)
    }

    pub fn with_login_index(direction: Direction, login_index: i32) -> Self {
        Self {
            direction,
            login_index,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<SentPayload> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, channel: Option<ChannelName>, payload: Bytes) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentPayload { channel, payload });
        Ok(())
    }
}

impl PacketDispatcher for RecordingDispatcher {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn login_index(&self) -> i32 {
        self.login_index
    }

    fn send(&self, payload: Bytes) -> Result<()> {
        self.record(None, payload)
    }

    fn send_on(&self, channel: &ChannelName, payload: Bytes) -> Result<()> {
        self.record(Some(channel.clone()), payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_connection_dispatcher_without_connection() {
        let dispatcher = ConnectionDispatcher::new(
            Weak::new(),
            Direction::ToClient,
            "demo:main".parse().unwrap(),
            NO_LOGIN_INDEX,
        );

        let result = dispatcher.send(Bytes::from_static(b"late"));
        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert_eq!(dispatcher.direction(), Direction::ToClient);
        assert_eq!(dispatcher.login_index(), -1);
    }

    #[test]
    fn test_recording_dispatcher_keeps_order() {
        let dispatcher = RecordingDispatcher::with_login_index(Direction::ToServer, 2);
        let other: ChannelName = "demo:other".parse().unwrap();

        dispatcher.send(Bytes::from_static(b"one")).unwrap();
        dispatcher.send_on(&other, Bytes::from_static(b"two")).unwrap();

        let sent = dispatcher.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].channel, None);
        assert_eq!(sent[1].channel, Some(other));
        assert_eq!(dispatcher.login_index(), 2);
    }

    #[test]
    fn test_send_message_encodes_msgpack() {
        let recording = Arc::new(RecordingDispatcher::new(Direction::ToClient));
        let dispatcher: Arc<dyn PacketDispatcher> = recording.clone();

        dispatcher.send_message(&("hello", 5u8)).unwrap();

        let sent = recording.sent();
        let decoded: (String, u8) = MsgPackCodec::decode(&sent[0].payload).unwrap();
        assert_eq!(decoded, ("hello".to_string(), 5));
    }
}
