//! Bus module - channel names and handler notification.
//!
//! Provides:
//! - [`ChannelName`] - validated `namespace:path` identifiers
//! - [`EventBus`] - synchronous, ordered listener lists
//! - [`ChannelRegistry`] / [`EventChannel`] - per-channel buses for
//!   network events and login-payload gathering

mod listeners;
mod name;
mod registry;

pub use listeners::{EventBus, ListenerId};
pub use name::ChannelName;
pub use registry::{ChannelRegistry, EventChannel};
