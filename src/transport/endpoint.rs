//! Endpoint builder and per-connection read loop.
//!
//! An [`Endpoint`] is one side's view of the network: its channel
//! registry, its workers and its configuration. Each call to
//! [`Endpoint::open`] turns a byte stream into a [`Connection`]:
//! 1. Spawn the writer task
//! 2. Spawn the read loop
//! 3. On the server, start the login exchange
//!
//! # Example
//!
//! ```ignore
//! let mut channels = ChannelRegistry::new();
//! channels.register("demo:main")?.add_listener(|event| {
//!     event.context().set_packet_handled(true);
//! });
//!
//! let server = Endpoint::builder(LogicalSide::Server)
//!     .registry(channels)
//!     .work_queues(WorkQueues::new().with_server(WorkQueue::spawn("server-main")?))
//!     .build();
//! let connection = server.open(tcp_stream, false).await?;
//! ```

use std::sync::{Arc, Weak};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use super::connection::Connection;
use crate::bus::{ChannelName, ChannelRegistry};
use crate::config::{NetworkConfig, UnhandledPolicy};
use crate::context::{ConnectionDispatcher, NetworkContext};
use crate::direction::{Direction, LogicalSide, Phase};
use crate::error::Result;
use crate::event::{ContextSource, NetworkEvent, NetworkEventKind, RegistrationChangeType};
use crate::protocol::{Frame, FrameBuffer, NO_LOGIN_INDEX};
use crate::work::WorkQueues;
use crate::writer::spawn_writer_task;

/// Builder for configuring and creating an [`Endpoint`].
pub struct EndpointBuilder {
    side: LogicalSide,
    registry: ChannelRegistry,
    work_queues: WorkQueues,
    config: NetworkConfig,
}

impl EndpointBuilder {
    pub fn new(side: LogicalSide) -> Self {
        Self {
            side,
            registry: ChannelRegistry::new(),
            work_queues: WorkQueues::new(),
            config: NetworkConfig::default(),
        }
    }

    /// Channels this endpoint handles.
    pub fn registry(mut self, registry: ChannelRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Workers that run enqueued handler work.
    pub fn work_queues(mut self, work_queues: WorkQueues) -> Self {
        self.work_queues = work_queues;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: NetworkConfig) -> Self {
        self.config = config;
        self
    }

    /// Largest accepted payload.
    ///
    /// Default: 1 MiB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Set the maximum pending frames for backpressure.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.writer.max_pending_frames = limit;
        self
    }

    /// Set the backpressure timeout used by waiting sends.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.writer.backpressure_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// What to do with messages no handler marked as handled.
    ///
    /// Default: [`UnhandledPolicy::Warn`]
    pub fn unhandled(mut self, policy: UnhandledPolicy) -> Self {
        self.config.unhandled = policy;
        self
    }

    pub fn build(self) -> Endpoint {
        Endpoint {
            shared: Arc::new(Shared {
                side: self.side,
                registry: self.registry,
                work_queues: Arc::new(self.work_queues),
                config: self.config,
            }),
        }
    }
}

struct Shared {
    side: LogicalSide,
    registry: ChannelRegistry,
    work_queues: Arc<WorkQueues>,
    config: NetworkConfig,
}

/// One side's network endpoint. Cheap to clone.
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<Shared>,
}

impl Endpoint {
    pub fn builder(side: LogicalSide) -> EndpointBuilder {
        EndpointBuilder::new(side)
    }

    #[inline]
    pub fn side(&self) -> LogicalSide {
        self.shared.side
    }

    #[inline]
    pub fn registry(&self) -> &ChannelRegistry {
        &self.shared.registry
    }

    #[inline]
    pub fn work_queues(&self) -> &Arc<WorkQueues> {
        &self.shared.work_queues
    }

    #[inline]
    pub fn config(&self) -> &NetworkConfig {
        &self.shared.config
    }

    /// Run a connection over `stream`.
    ///
    /// Must be called from within a Tokio runtime. On the server this also
    /// sends the channel announcement and the gathered login payloads.
    pub async fn open<S>(&self, stream: S, is_local: bool) -> Result<Arc<Connection>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, write_half) = tokio::io::split(stream);
        let (writer, _writer_task) = spawn_writer_task(write_half, &self.shared.config.writer);
        let connection = Arc::new(Connection::new(
            self.side(),
            is_local,
            self.shared.config.max_payload_size,
            writer,
        ));

        tracing::debug!(side = %self.side(), is_local, "Opening connection");

        let read_loop = ReadLoop {
            connection: connection.clone(),
            shared: self.shared.clone(),
        };
        tokio::spawn(async move {
            let connection = read_loop.connection.clone();
            if let Err(e) = read_loop.run(reader).await {
                tracing::error!("Read loop error: {}", e);
            }
            connection.disconnect();
        });

        if self.side() == LogicalSide::Server {
            self.start_login(&connection).await?;
        }

        Ok(connection)
    }

    async fn start_login(&self, connection: &Arc<Connection>) -> Result<()> {
        let direction = connection.outbound_direction();
        let registry = &self.shared.registry;

        connection
            .send_frame(&Frame::registration(direction, true, registry.names()))
            .await?;

        let max = connection.max_payload_size();
        let mut payloads = registry.gather_login_payloads(connection.is_local());
        payloads.retain(|payload| {
            let fits = payload.data.len() <= max as usize;
            if !fits {
                tracing::warn!(
                    channel = %payload.channel,
                    context = %payload.context,
                    size = payload.data.len(),
                    max,
                    "Skipping oversized login payload"
                );
            }
            fits
        });
        // All indices exist before any frame leaves, so an early reply
        // cannot complete the login.
        let indices = connection.begin_login(payloads.len());
        tracing::debug!("Sending {} login payloads", payloads.len());

        for (payload, index) in payloads.into_iter().zip(indices) {
            tracing::trace!(index, channel = %payload.channel, context = %payload.context, "Login payload");
            let frame = Frame::login(direction, payload.channel, index, payload.data);
            connection.send_frame(&frame).await?;
        }

        complete_server_login(connection).await
    }
}

async fn complete_server_login(connection: &Connection) -> Result<()> {
    if connection.is_closed() {
        return Ok(());
    }
    if connection.finish_server_login() {
        tracing::debug!("Login complete, entering play");
        connection.send_frame(&Frame::login_complete()).await?;
    }
    Ok(())
}

/// Reads frames of one connection and dispatches them.
struct ReadLoop {
    connection: Arc<Connection>,
    shared: Arc<Shared>,
}

impl ReadLoop {
    async fn run<R: AsyncRead + Unpin>(self, mut reader: R) -> Result<()> {
        let mut frame_buffer = FrameBuffer::with_max_payload(self.shared.config.max_payload_size);
        let mut buf = vec![0u8; self.shared.config.read_buffer_size.max(1)];

        loop {
            let n = tokio::select! {
                _ = self.connection.closed() => return Ok(()),
                read = reader.read(&mut buf) => match read? {
                    0 => {
                        tracing::debug!("Remote closed the {} connection", self.connection.side());
                        return Ok(());
                    }
                    n => n,
                },
            };

            for frame in frame_buffer.push(&buf[..n])? {
                self.dispatch_frame(frame).await?;
                if self.connection.is_closed() {
                    return Ok(());
                }
            }
        }
    }

    async fn dispatch_frame(&self, frame: Frame) -> Result<()> {
        let expected = Direction::toward(self.connection.side());
        if frame.direction() != expected {
            tracing::warn!(
                "Dropping frame traveling {} on the {} side",
                frame.direction(),
                self.connection.side()
            );
            return Ok(());
        }

        let header = frame.header;
        if header.is_register() || header.is_unregister() {
            self.on_registration(&frame, header.is_register());
            Ok(())
        } else if header.is_login_complete() {
            self.on_login_complete().await
        } else {
            self.on_payload(frame).await
        }
    }

    fn on_registration(&self, frame: &Frame, register: bool) {
        let names = match frame.registered_names() {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("Dropping malformed registration frame: {}", e);
                return;
            }
        };
        self.connection.update_remote_channels(&names, register);

        let change = if register {
            RegistrationChangeType::Register
        } else {
            RegistrationChangeType::Unregister
        };
        for name in &names {
            let Some(channel) = self.shared.registry.get(name) else {
                continue;
            };
            let source = self.context_source(frame.direction(), name.clone(), NO_LOGIN_INDEX);
            channel.post(&NetworkEvent::registration_change(source, change));
        }
    }

    async fn on_login_complete(&self) -> Result<()> {
        if !self.connection.finish_client_login() {
            tracing::warn!("Ignoring login completion outside the login phase");
            return Ok(());
        }
        tracing::debug!("Login complete, entering play");

        let direction = self.connection.outbound_direction();
        self.connection
            .send_frame(&Frame::registration(direction, true, self.shared.registry.names()))
            .await
    }

    async fn on_payload(&self, frame: Frame) -> Result<()> {
        let Some(name) = frame.channel.clone() else {
            return Ok(());
        };
        let side = self.connection.side();
        let phase = if frame.is_login() { Phase::Login } else { Phase::Play };
        let index = frame.login_index();

        let source = self.context_source(frame.direction(), name.clone(), index);
        let kind = NetworkEventKind::CustomPayload { side, phase };
        let event = match phase {
            Phase::Login => NetworkEvent::from_packet(kind, &frame, source.clone()),
            Phase::Play => NetworkEvent::custom_payload(side, phase, frame.payload_bytes(), source.clone(), index),
        };

        let delivered = self.shared.registry.post(&name, &event);
        let handled = source.peek().map_or(false, |ctx| ctx.packet_handled());

        match (side, phase) {
            (LogicalSide::Server, Phase::Login) => {
                if !handled {
                    self.unhandled(&name, side, phase, delivered.is_none());
                }
                if self.connection.resolve_login(index) {
                    tracing::trace!(index, pending = self.connection.pending_logins(), "Login reply received");
                } else {
                    tracing::warn!(index, channel = %name, "Login reply for an index that is not pending");
                }
                complete_server_login(&self.connection).await?;
            }
            (LogicalSide::Client, Phase::Login) if !handled && !self.connection.login_answered(index) => {
                // The server waits for one reply per index.
                tracing::debug!(index, channel = %name, "No handler answered the login payload, replying empty");
                let reply = Frame::login(frame.direction().reverse(), name, index, bytes::Bytes::new());
                self.connection.send_frame(&reply).await?;
            }
            _ if !handled => self.unhandled(&name, side, phase, delivered.is_none()),
            _ => {}
        }
        Ok(())
    }

    fn unhandled(&self, channel: &ChannelName, side: LogicalSide, phase: Phase, unknown_channel: bool) {
        if unknown_channel {
            tracing::warn!(%channel, %side, ?phase, "Message on unknown channel");
        } else {
            tracing::warn!(%channel, %side, ?phase, "Unhandled message");
        }
        if self.shared.config.unhandled == UnhandledPolicy::Disconnect {
            self.connection.disconnect();
        }
    }

    fn context_source(&self, direction: Direction, channel: ChannelName, login_index: i32) -> ContextSource {
        let connection: Weak<Connection> = Arc::downgrade(&self.connection);
        let work_queues = self.shared.work_queues.clone();
        ContextSource::lazy(move || {
            let dispatcher = ConnectionDispatcher::new(connection.clone(), direction.reverse(), channel.clone(), login_index);
            NetworkContext::with_dispatcher(
                connection.clone(),
                direction,
                Arc::new(dispatcher),
                work_queues.clone(),
                login_index,
            )
        })
    }
}
