//! Channel registry: maps channel names to their listener buses.
//!
//! Channels keep their registration order; login payloads are gathered
//! channel by channel in that order.
//!
//! # Example
//!
//! ```
//! use sidenet::bus::ChannelRegistry;
//!
//! let mut registry = ChannelRegistry::new();
//! let channel = registry.register("demo:main").unwrap();
//!
//! channel.add_listener(|event| {
//!     event.context().set_packet_handled(true);
//! });
//!
//! assert!(registry.get(channel.name()).is_some());
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::{ChannelName, EventBus, ListenerId};
use crate::error::{Error, Result};
use crate::event::{GatherLoginPayloadsEvent, LoginPayload, NetworkEvent};

/// Listener buses for one channel.
#[derive(Debug)]
pub struct EventChannel {
    name: ChannelName,
    events: EventBus<NetworkEvent>,
    gather: EventBus<GatherLoginPayloadsEvent>,
}

impl EventChannel {
    fn new(name: ChannelName) -> Self {
        Self {
            name,
            events: EventBus::new(),
            gather: EventBus::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    /// Listen for network events arriving on this channel.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&NetworkEvent) + Send + Sync + 'static,
    {
        self.events.add_listener(listener)
    }

    /// Listen for the login-payload gathering step of each handshake.
    pub fn add_gather_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&GatherLoginPayloadsEvent) + Send + Sync + 'static,
    {
        self.gather.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.events.remove_listener(id)
    }

    pub fn remove_gather_listener(&self, id: ListenerId) -> bool {
        self.gather.remove_listener(id)
    }

    /// Deliver a network event to this channel's listeners.
    pub fn post(&self, event: &NetworkEvent) -> usize {
        self.events.post(event)
    }

    pub fn post_gather(&self, event: &GatherLoginPayloadsEvent) -> usize {
        self.gather.post(event)
    }
}

/// Registry of event channels.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Vec<Arc<EventChannel>>,
    by_name: HashMap<ChannelName, usize>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel by its textual name.
    pub fn register(&mut self, name: &str) -> Result<Arc<EventChannel>> {
        self.register_name(name.parse()?)
    }

    /// Register a channel.
    ///
    /// Registering the same name twice is an error.
    pub fn register_name(&mut self, name: ChannelName) -> Result<Arc<EventChannel>> {
        if self.by_name.contains_key(&name) {
            return Err(Error::DuplicateChannel(name));
        }

        let channel = Arc::new(EventChannel::new(name.clone()));
        self.by_name.insert(name, self.channels.len());
        self.channels.push(channel.clone());
        Ok(channel)
    }

    pub fn get(&self, name: &ChannelName) -> Option<&Arc<EventChannel>> {
        self.by_name.get(name).map(|&i| &self.channels[i])
    }

    pub fn contains(&self, name: &ChannelName) -> bool {
        self.by_name.contains_key(name)
    }

    /// Channel names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &ChannelName> {
        self.channels.iter().map(|c| c.name())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Post `event` to the named channel. `None` if the channel is unknown.
    pub fn post(&self, name: &ChannelName, event: &NetworkEvent) -> Option<usize> {
        self.get(name).map(|channel| channel.post(event))
    }

    /// Run the gather step of one handshake across every channel.
    ///
    /// All channels append into one shared batch; the returned payloads are
    /// in the order their listeners added them.
    pub fn gather_login_payloads(&self, is_local: bool) -> Vec<LoginPayload> {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let event = GatherLoginPayloadsEvent::new(collected.clone(), is_local);

        for channel in &self.channels {
            channel.post_gather(&event);
        }
        drop(event);

        match Arc::try_unwrap(collected) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(PoisonError::into_inner),
            // A listener kept a clone of the batch; hand back a copy.
            Err(shared) => shared.lock().unwrap_or_else(PoisonError::into_inner).clone(),
        }
    }
}
