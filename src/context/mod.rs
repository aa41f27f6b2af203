//! Context module - what a handler can do with one inbound message.
//!
//! - [`NetworkContext`] - direction, reply target, handled flag, attributes
//!   and [`enqueue_work`](NetworkContext::enqueue_work)
//! - [`PacketDispatcher`] - reply target; [`ConnectionDispatcher`] for live
//!   connections, [`RecordingDispatcher`] for detached contexts
//! - [`AttributeKey`] / [`Attribute`] - typed connection-scoped state

mod attribute;
mod dispatcher;
mod execution;

pub use attribute::{Attribute, AttributeKey, AttributeMap};
pub use dispatcher::{ConnectionDispatcher, PacketDispatcher, RecordingDispatcher, SentPayload};
pub use execution::NetworkContext;
