//! # sidenet
//!
//! Side-aware message dispatch for client/server channel networking.
//!
//! Messages travel over named channels between a [`LogicalSide::Client`]
//! and a [`LogicalSide::Server`]. Each inbound message reaches channel
//! listeners as a [`NetworkEvent`] on an I/O task; its [`NetworkContext`]
//! replies to the origin, carries the handled flag and moves work onto the
//! receiving side's worker with [`NetworkContext::enqueue_work`].
//!
//! ## Architecture
//!
//! - **Login phase**: the server announces its channels, gathers login
//!   payloads and sends each with a correlation index; the client answers
//!   every index, then the server ends the phase.
//! - **Play phase**: free-form payloads on registered channels.
//!
//! ## Example
//!
//! ```ignore
//! use sidenet::{ChannelRegistry, Endpoint, LogicalSide, WorkQueue, WorkQueues};
//!
//! #[tokio::main]
//! async fn main() -> sidenet::Result<()> {
//!     let mut channels = ChannelRegistry::new();
//!     channels.register("demo:chat")?.add_listener(|event| {
//!         let ctx = event.context();
//!         let text: String = event.decode_payload().unwrap_or_default();
//!         ctx.enqueue_work(move || println!("chat: {text}"));
//!         ctx.set_packet_handled(true);
//!     });
//!
//!     let server = Endpoint::builder(LogicalSide::Server)
//!         .registry(channels)
//!         .work_queues(WorkQueues::new().with_server(WorkQueue::spawn("server-main")?))
//!         .build();
//!     let client = Endpoint::builder(LogicalSide::Client).build();
//!
//!     let (_server_conn, client_conn) = sidenet::loopback(&server, &client).await?;
//!     client_conn.send(&"demo:chat".parse()?, bytes::Bytes::new())?;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod codec;
pub mod config;
pub mod context;
pub mod direction;
pub mod error;
pub mod event;
pub mod observability;
pub mod protocol;
pub mod transport;
pub mod work;
pub mod writer;

pub use bus::{ChannelName, ChannelRegistry, EventChannel};
pub use config::{NetworkConfig, UnhandledPolicy};
pub use context::{Attribute, AttributeKey, NetworkContext, PacketDispatcher};
pub use direction::{Direction, LogicalSide, Phase};
pub use error::{Error, Result};
pub use event::{GatherLoginPayloadsEvent, LoginPayload, NetworkEvent, NetworkEventKind, RegistrationChangeType};
pub use transport::{loopback, Connection, Endpoint, EndpointBuilder, PacketListener, Player};
pub use work::{Executor, TickQueue, WorkFuture, WorkQueue, WorkQueues};
