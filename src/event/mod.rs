//! Event module - what channel listeners receive.
//!
//! Provides:
//! - [`NetworkEvent`] - one inbound message, tagged by [`NetworkEventKind`]
//! - [`ContextSource`] - lazy supplier of the message's context
//! - [`GatherLoginPayloadsEvent`] - handshake-time payload collection
//!
//! # Example
//!
//! ```ignore
//! channel.add_listener(|event: &NetworkEvent| {
//!     let ctx = event.context();
//!     let payload = event.payload().cloned().unwrap_or_default();
//!     ctx.enqueue_work(move || apply(payload));
//!     ctx.set_packet_handled(true);
//! });
//! ```

mod gather;
mod network;

pub use gather::{GatherLoginPayloadsEvent, LoginPayload};
pub use network::{ContextSource, CustomPacket, NetworkEvent, NetworkEventKind, RegistrationChangeType};
