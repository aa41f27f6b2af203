//! Transport module - connections and endpoints over any byte stream.
//!
//! - [`Endpoint`] / [`EndpointBuilder`] - one side's registry, workers and config
//! - [`Connection`] - listener state, attributes and outbound sends
//! - [`loopback`] - in-process server/client pair

mod connection;
mod endpoint;
mod loopback;

pub use connection::{Connection, PacketListener, Player};
pub use endpoint::{Endpoint, EndpointBuilder};
pub use loopback::loopback;
