//! One live connection between a server and a client endpoint.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use bytes::Bytes;
use tokio::sync::watch;

use crate::bus::ChannelName;
use crate::context::AttributeMap;
use crate::direction::{Direction, LogicalSide, Phase};
use crate::error::{Error, Result};
use crate::protocol::Frame;
use crate::writer::{OutboundFrame, WriterHandle};

/// Authenticated player bound to a server connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Player {
    pub id: u32,
    pub name: String,
}

impl Player {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

/// Protocol state of a connection, as seen by the local side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketListener {
    ServerLogin,
    ServerPlay { player: Option<Arc<Player>> },
    ClientLogin,
    ClientPlay,
}

impl PacketListener {
    /// Initial state for an endpoint on `side`.
    pub fn login(side: LogicalSide) -> Self {
        match side {
            LogicalSide::Server => PacketListener::ServerLogin,
            LogicalSide::Client => PacketListener::ClientLogin,
        }
    }

    pub fn side(&self) -> LogicalSide {
        match self {
            PacketListener::ServerLogin | PacketListener::ServerPlay { .. } => LogicalSide::Server,
            PacketListener::ClientLogin | PacketListener::ClientPlay => LogicalSide::Client,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            PacketListener::ServerLogin | PacketListener::ClientLogin => Phase::Login,
            PacketListener::ServerPlay { .. } | PacketListener::ClientPlay => Phase::Play,
        }
    }
}

#[derive(Debug, Default)]
struct LoginState {
    next_index: i32,
    pending: BTreeSet<i32>,
    answered: HashSet<i32>,
}

/// A connection owned by one endpoint.
///
/// Created by [`Endpoint::open`](super::Endpoint::open). Handlers see it
/// through a weak reference in their context, so a dropped connection
/// never keeps handler state alive.
pub struct Connection {
    side: LogicalSide,
    is_local: bool,
    max_payload_size: u32,
    listener: RwLock<PacketListener>,
    attributes: Arc<AttributeMap>,
    writer: Mutex<Option<WriterHandle>>,
    remote_channels: RwLock<HashSet<ChannelName>>,
    login: Mutex<LoginState>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Connection {
    pub(crate) fn new(side: LogicalSide, is_local: bool, max_payload_size: u32, writer: WriterHandle) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            side,
            is_local,
            max_payload_size,
            listener: RwLock::new(PacketListener::login(side)),
            attributes: Arc::new(AttributeMap::new()),
            writer: Mutex::new(Some(writer)),
            remote_channels: RwLock::new(HashSet::new()),
            login: Mutex::new(LoginState::default()),
            closed: AtomicBool::new(false),
            closed_tx,
        }
    }

    /// Side of the local endpoint.
    #[inline]
    pub fn side(&self) -> LogicalSide {
        self.side
    }

    /// Whether both ends live in this process.
    #[inline]
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    /// Largest payload either end accepts in one frame.
    #[inline]
    pub fn max_payload_size(&self) -> u32 {
        self.max_payload_size
    }

    /// Direction of frames this endpoint sends.
    #[inline]
    pub fn outbound_direction(&self) -> Direction {
        Direction::toward(self.side.opposite())
    }

    pub fn listener(&self) -> PacketListener {
        self.listener.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_listener(&self, listener: PacketListener) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = listener;
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.listener().phase()
    }

    /// Player bound to a server connection in the play phase.
    pub fn player(&self) -> Option<Arc<Player>> {
        match &*self.listener.read().unwrap_or_else(PoisonError::into_inner) {
            PacketListener::ServerPlay { player } => player.clone(),
            _ => None,
        }
    }

    /// Bind `player` to this connection.
    ///
    /// Only valid once a server connection reached the play phase.
    pub fn set_player(&self, player: Player) -> Result<()> {
        let mut listener = self.listener.write().unwrap_or_else(PoisonError::into_inner);
        match &mut *listener {
            PacketListener::ServerPlay { player: slot } => {
                *slot = Some(Arc::new(player));
                Ok(())
            }
            other => Err(Error::Protocol(format!(
                "Cannot bind a player in state {:?}",
                other
            ))),
        }
    }

    #[inline]
    pub fn attributes(&self) -> &Arc<AttributeMap> {
        &self.attributes
    }

    /// Channels the remote party announced, sorted by name.
    pub fn remote_channels(&self) -> Vec<ChannelName> {
        let mut names: Vec<ChannelName> = self
            .remote_channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn is_remote_registered(&self, name: &ChannelName) -> bool {
        self.remote_channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    pub(crate) fn update_remote_channels(&self, names: &[ChannelName], register: bool) {
        let mut set = self.remote_channels.write().unwrap_or_else(PoisonError::into_inner);
        for name in names {
            if register {
                set.insert(name.clone());
            } else {
                set.remove(name);
            }
        }
    }

    /// Send a play-phase message on `channel` without waiting.
    ///
    /// Fails with `PayloadTooLarge` when the payload exceeds
    /// [`max_payload_size`](Self::max_payload_size); the connection stays open.
    pub fn send(&self, channel: &ChannelName, payload: Bytes) -> Result<()> {
        self.try_send_frame(&Frame::play(self.outbound_direction(), channel.clone(), payload))
    }

    /// Send a play-phase message, waiting while the outbound queue is full.
    pub async fn send_async(&self, channel: &ChannelName, payload: Bytes) -> Result<()> {
        self.send_frame(&Frame::play(self.outbound_direction(), channel.clone(), payload))
            .await
    }

    /// Checks that must pass before a frame is queued.
    fn admit(&self, frame: &Frame) -> Result<WriterHandle> {
        frame.check_payload_size(self.max_payload_size)?;
        self.writer()
    }

    fn note_sent(&self, frame: &Frame) {
        if self.side == LogicalSide::Client && frame.is_login() {
            lock(&self.login).answered.insert(frame.login_index());
        }
    }

    fn writer(&self) -> Result<WriterHandle> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        lock(&self.writer).clone().ok_or(Error::ConnectionClosed)
    }

    pub(crate) fn try_send_frame(&self, frame: &Frame) -> Result<()> {
        self.admit(frame)?.try_send(OutboundFrame::new(frame))?;
        self.note_sent(frame);
        Ok(())
    }

    pub(crate) async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let writer = self.admit(frame)?;
        writer.send(OutboundFrame::new(frame)).await?;
        self.note_sent(frame);
        Ok(())
    }

    /// Close the connection.
    ///
    /// Frames already queued are still written; the stream is then shut
    /// down and the read loop stops. Calling it again does nothing.
    pub fn disconnect(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("Disconnecting {} connection", self.side);
        lock(&self.writer).take();
        self.closed_tx.send_replace(true);
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        loop {
            let done = *rx.borrow_and_update();
            if done || rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Reserve `count` consecutive login indices and mark them pending.
    pub(crate) fn begin_login(&self, count: usize) -> Vec<i32> {
        let mut login = lock(&self.login);
        let mut indices = Vec::with_capacity(count);
        for _ in 0..count {
            let index = login.next_index;
            login.next_index += 1;
            login.pending.insert(index);
            indices.push(index);
        }
        indices
    }

    /// Mark a login reply as received. `false` if the index was not pending.
    pub(crate) fn resolve_login(&self, index: i32) -> bool {
        lock(&self.login).pending.remove(&index)
    }

    pub(crate) fn pending_logins(&self) -> usize {
        lock(&self.login).pending.len()
    }

    /// Whether a client already sent a reply for login `index`.
    pub(crate) fn login_answered(&self, index: i32) -> bool {
        lock(&self.login).answered.contains(&index)
    }

    /// Switch a server connection to play once every login reply arrived.
    ///
    /// Returns `true` exactly once, on the call that made the switch.
    pub(crate) fn finish_server_login(&self) -> bool {
        let login = lock(&self.login);
        if !login.pending.is_empty() {
            return false;
        }
        let mut listener = self.listener.write().unwrap_or_else(PoisonError::into_inner);
        if *listener != PacketListener::ServerLogin {
            return false;
        }
        *listener = PacketListener::ServerPlay { player: None };
        true
    }

    /// Switch a client connection to play. `false` if it already was.
    pub(crate) fn finish_client_login(&self) -> bool {
        let mut listener = self.listener.write().unwrap_or_else(PoisonError::into_inner);
        if *listener != PacketListener::ClientLogin {
            return false;
        }
        *listener = PacketListener::ClientPlay;
        true
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("side", &self.side)
            .field("is_local", &self.is_local)
            .field("listener", &self.listener())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
    use crate::writer::{spawn_writer_task, WriterConfig};
    use tokio::io::{duplex, AsyncReadExt};

    fn connection(side: LogicalSide) -> (Connection, tokio::io::DuplexStream) {
        let (local, remote) = duplex(4096);
        let (writer, _task) = spawn_writer_task(local, &WriterConfig::default());
        (Connection::new(side, true, DEFAULT_MAX_PAYLOAD_SIZE, writer), remote)
    }

    #[test]
    fn test_listener_phase_and_side() {
        assert_eq!(PacketListener::login(LogicalSide::Server), PacketListener::ServerLogin);
        assert_eq!(PacketListener::ClientPlay.phase(), Phase::Play);
        assert_eq!(PacketListener::ServerPlay { player: None }.side(), LogicalSide::Server);
    }

    #[tokio::test]
    async fn test_player_only_in_server_play() {
        let (conn, _remote) = connection(LogicalSide::Server);

        assert!(conn.set_player(Player::new(1, "alex")).is_err());
        assert!(conn.finish_server_login());
        conn.set_player(Player::new(1, "alex")).unwrap();

        assert_eq!(conn.player().map(|p| p.name.clone()).as_deref(), Some("alex"));
        assert_eq!(conn.phase(), Phase::Play);
    }

    #[tokio::test]
    async fn test_login_indices_resolve_in_any_order() {
        let (conn, _remote) = connection(LogicalSide::Server);

        assert_eq!(conn.begin_login(3), vec![0, 1, 2]);
        assert!(conn.resolve_login(2));
        assert!(!conn.resolve_login(2));
        assert!(!conn.finish_server_login());
        assert!(conn.resolve_login(0));
        assert!(conn.resolve_login(1));
        assert_eq!(conn.pending_logins(), 0);

        assert!(conn.finish_server_login());
        assert!(!conn.finish_server_login());
    }

    #[tokio::test]
    async fn test_remote_channel_tracking() {
        let (conn, _remote) = connection(LogicalSide::Client);
        let a: ChannelName = "demo:a".parse().unwrap();
        let b: ChannelName = "demo:b".parse().unwrap();

        conn.update_remote_channels(&[b.clone(), a.clone()], true);
        assert_eq!(conn.remote_channels(), vec![a.clone(), b.clone()]);

        conn.update_remote_channels(&[a.clone()], false);
        assert!(!conn.is_remote_registered(&a));
        assert!(conn.is_remote_registered(&b));
    }

    #[tokio::test]
    async fn test_send_after_disconnect() {
        let (conn, _remote) = connection(LogicalSide::Client);
        let channel: ChannelName = "demo:main".parse().unwrap();

        conn.send(&channel, Bytes::from_static(b"ok")).unwrap();
        conn.disconnect();
        conn.disconnect();

        assert!(conn.is_closed());
        assert!(matches!(
            conn.send(&channel, Bytes::new()),
            Err(Error::ConnectionClosed)
        ));
        assert!(matches!(
            conn.send_async(&channel, Bytes::new()).await,
            Err(Error::ConnectionClosed)
        ));
        conn.closed().await;
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected_before_queueing() {
        let (local, mut remote) = duplex(4096);
        let (writer, _task) = spawn_writer_task(local, &WriterConfig::default());
        let conn = Connection::new(LogicalSide::Client, true, 16, writer);
        let channel: ChannelName = "demo:main".parse().unwrap();

        let result = conn.send(&channel, Bytes::from(vec![7u8; 17]));
        assert!(matches!(result, Err(Error::PayloadTooLarge { size: 17, max: 16 })));
        let result = conn.send_async(&channel, Bytes::from(vec![7u8; 17])).await;
        assert!(matches!(result, Err(Error::PayloadTooLarge { .. })));
        assert!(!conn.is_closed());

        conn.send(&channel, Bytes::from_static(b"fits")).unwrap();
        let mut written = vec![0u8; 11 + 9 + 4];
        remote.read_exact(&mut written).await.unwrap();
        assert_eq!(&written[11..], b"demo:mainfits");
    }

    #[tokio::test]
    async fn test_client_login_replies_are_tracked() {
        let (conn, _remote) = connection(LogicalSide::Client);
        let channel: ChannelName = "demo:hs".parse().unwrap();

        assert!(!conn.login_answered(4));
        conn.try_send_frame(&Frame::login(Direction::ToServer, channel, 4, Bytes::new()))
            .unwrap();
        assert!(conn.login_answered(4));
        assert!(!conn.login_answered(5));
    }

    #[tokio::test]
    async fn test_outbound_direction() {
        let (server, _a) = connection(LogicalSide::Server);
        let (client, _b) = connection(LogicalSide::Client);
        assert_eq!(server.outbound_direction(), Direction::ToClient);
        assert_eq!(client.outbound_direction(), Direction::ToServer);
    }
}
