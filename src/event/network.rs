//! Network events delivered to channel listeners.

use std::fmt;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::codec::MsgPackCodec;
use crate::context::NetworkContext;
use crate::direction::{LogicalSide, Phase};
use crate::error::{Error, Result};
use crate::protocol::{Frame, NO_LOGIN_INDEX};

/// Source of raw payload bytes and a correlation index.
pub trait CustomPacket {
    fn internal_data(&self) -> Bytes;
    fn index(&self) -> i32;
}

impl CustomPacket for Frame {
    fn internal_data(&self) -> Bytes {
        self.payload_bytes()
    }

    fn index(&self) -> i32 {
        self.login_index()
    }
}

/// Change announced by the remote party for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationChangeType {
    Register,
    Unregister,
}

/// What a [`NetworkEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkEventKind {
    /// A custom payload observed by `side` during `phase`.
    CustomPayload { side: LogicalSide, phase: Phase },
    /// A raw login payload with its correlation index.
    LoginPayload,
    /// The remote party (un)registered the channel.
    ChannelRegistrationChange(RegistrationChangeType),
}

enum SourceInner {
    Lazy {
        cell: OnceLock<Arc<NetworkContext>>,
        factory: Box<dyn Fn() -> NetworkContext + Send + Sync>,
    },
    Ready(Arc<NetworkContext>),
}

/// Deferred, memoised supplier of a message's [`NetworkContext`].
///
/// The factory runs on first access; every later access (from any clone)
/// returns the same context.
#[derive(Clone)]
pub struct ContextSource {
    inner: Arc<SourceInner>,
}

impl ContextSource {
    /// Build the context on first access.
    pub fn lazy<F>(factory: F) -> Self
    where
        F: Fn() -> NetworkContext + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SourceInner::Lazy {
                cell: OnceLock::new(),
                factory: Box::new(factory),
            }),
        }
    }

    /// Wrap an already built context.
    pub fn ready(context: NetworkContext) -> Self {
        Self {
            inner: Arc::new(SourceInner::Ready(Arc::new(context))),
        }
    }

    /// Get the context, building it if needed.
    pub fn get(&self) -> Arc<NetworkContext> {
        match self.inner.as_ref() {
            SourceInner::Lazy { cell, factory } => {
                cell.get_or_init(|| Arc::new(factory())).clone()
            }
            SourceInner::Ready(context) => context.clone(),
        }
    }

    /// Get the context only if something already asked for it.
    pub fn peek(&self) -> Option<Arc<NetworkContext>> {
        match self.inner.as_ref() {
            SourceInner::Lazy { cell, .. } => cell.get().cloned(),
            SourceInner::Ready(context) => Some(context.clone()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.peek().is_some()
    }
}

impl fmt::Debug for ContextSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSource")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// Notification delivered to channel listeners for one inbound message.
///
/// Immutable; the only mutable state reachable from it is the context's
/// handled flag.
#[derive(Debug, Clone)]
pub struct NetworkEvent {
    kind: NetworkEventKind,
    payload: Option<Bytes>,
    source: ContextSource,
    login_index: i32,
}

impl NetworkEvent {
    /// Event for a received custom packet; reads its data and index.
    pub fn from_packet<P: CustomPacket>(kind: NetworkEventKind, packet: &P, source: ContextSource) -> Self {
        Self {
            kind,
            payload: Some(packet.internal_data()),
            source,
            login_index: packet.index(),
        }
    }

    /// Custom payload observed by `side` during `phase`.
    pub fn custom_payload(
        side: LogicalSide,
        phase: Phase,
        payload: Bytes,
        source: ContextSource,
        login_index: i32,
    ) -> Self {
        let login_index = match phase {
            Phase::Login => login_index,
            Phase::Play => NO_LOGIN_INDEX,
        };
        Self {
            kind: NetworkEventKind::CustomPayload { side, phase },
            payload: Some(payload),
            source,
            login_index,
        }
    }

    /// Raw login payload tagged with its correlation index.
    pub fn login_payload(payload: Bytes, source: ContextSource, login_index: i32) -> Self {
        Self {
            kind: NetworkEventKind::LoginPayload,
            payload: Some(payload),
            source,
            login_index,
        }
    }

    /// Registration change; carries no payload.
    pub fn registration_change(source: ContextSource, change: RegistrationChangeType) -> Self {
        Self {
            kind: NetworkEventKind::ChannelRegistrationChange(change),
            payload: None,
            source,
            login_index: NO_LOGIN_INDEX,
        }
    }

    #[inline]
    pub fn kind(&self) -> &NetworkEventKind {
        &self.kind
    }

    /// Side that observed a custom payload.
    pub fn side(&self) -> Option<LogicalSide> {
        match self.kind {
            NetworkEventKind::CustomPayload { side, .. } => Some(side),
            _ => None,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self.kind {
            NetworkEventKind::CustomPayload { phase, .. } => Some(phase),
            NetworkEventKind::LoginPayload => Some(Phase::Login),
            NetworkEventKind::ChannelRegistrationChange(_) => None,
        }
    }

    pub fn registration_change_type(&self) -> Option<RegistrationChangeType> {
        match self.kind {
            NetworkEventKind::ChannelRegistrationChange(change) => Some(change),
            _ => None,
        }
    }

    #[inline]
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    #[inline]
    pub fn source(&self) -> &ContextSource {
        &self.source
    }

    /// The message's context (built on first call).
    pub fn context(&self) -> Arc<NetworkContext> {
        self.source.get()
    }

    /// Correlation index; `-1` when the event is not a login message.
    #[inline]
    pub fn login_index(&self) -> i32 {
        self.login_index
    }

    /// Decode the payload with the MsgPack codec.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        let payload = self
            .payload
            .as_ref()
            .ok_or_else(|| Error::Protocol("Event carries no payload".to_string()))?;
        MsgPackCodec::decode(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RecordingDispatcher;
    use crate::direction::Direction;
    use crate::work::WorkQueues;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Weak;

    fn detached(direction: Direction) -> NetworkContext {
        NetworkContext::with_dispatcher(
            Weak::new(),
            direction,
            Arc::new(RecordingDispatcher::new(direction.reverse())),
            Arc::new(WorkQueues::new()),
            NO_LOGIN_INDEX,
        )
    }

    #[test]
    fn test_context_is_lazy_and_memoised() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let source = ContextSource::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            detached(Direction::ToServer)
        });
        let event = NetworkEvent::registration_change(source, RegistrationChangeType::Register);

        assert!(!event.source().is_initialized());
        assert_eq!(builds.load(Ordering::SeqCst), 0);

        let first = event.context();
        let cloned = event.clone();
        let second = cloned.context();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(event.source().is_initialized());
    }

    #[test]
    fn test_from_packet_reads_data_and_index() {
        let frame = Frame::login(
            Direction::ToClient,
            "demo:hs".parse().unwrap(),
            9,
            Bytes::from_static(b"probe"),
        );
        let kind = NetworkEventKind::CustomPayload {
            side: LogicalSide::Client,
            phase: Phase::Login,
        };
        let event = NetworkEvent::from_packet(kind, &frame, ContextSource::ready(detached(Direction::ToClient)));

        assert_eq!(event.payload().unwrap().as_ref(), b"probe");
        assert_eq!(event.login_index(), 9);
        assert_eq!(event.side(), Some(LogicalSide::Client));
        assert_eq!(event.phase(), Some(Phase::Login));
    }

    #[test]
    fn test_play_payload_uses_sentinel_index() {
        let event = NetworkEvent::custom_payload(
            LogicalSide::Server,
            Phase::Play,
            Bytes::new(),
            ContextSource::ready(detached(Direction::ToServer)),
            42,
        );
        assert_eq!(event.login_index(), NO_LOGIN_INDEX);
    }

    #[test]
    fn test_registration_change_has_no_payload() {
        let event = NetworkEvent::registration_change(
            ContextSource::ready(detached(Direction::ToClient)),
            RegistrationChangeType::Unregister,
        );

        assert!(event.payload().is_none());
        assert_eq!(event.login_index(), -1);
        assert_eq!(event.phase(), None);
        assert_eq!(
            event.registration_change_type(),
            Some(RegistrationChangeType::Unregister)
        );
        assert!(event.decode_payload::<String>().is_err());
    }

    #[test]
    fn test_login_payload_event() {
        let event = NetworkEvent::login_payload(
            Bytes::from(MsgPackCodec::encode(&"hello").unwrap()),
            ContextSource::ready(detached(Direction::ToServer)),
            3,
        );

        assert_eq!(event.kind(), &NetworkEventKind::LoginPayload);
        assert_eq!(event.phase(), Some(Phase::Login));
        assert_eq!(event.login_index(), 3);
        assert_eq!(event.decode_payload::<String>().unwrap(), "hello");
    }
}
