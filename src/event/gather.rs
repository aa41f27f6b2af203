//! Login payload gathering.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;

use crate::bus::ChannelName;

/// One payload contributed to a handshake batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPayload {
    pub data: Bytes,
    pub channel: ChannelName,
    /// Free-form label used in logs.
    pub context: String,
}

/// Fired once per handshake so listeners can contribute login payloads.
///
/// Every contribution is appended to one shared, ordered batch owned by
/// the caller; each entry is later sent as its own login message.
#[derive(Debug)]
pub struct GatherLoginPayloadsEvent {
    collected: Arc<Mutex<Vec<LoginPayload>>>,
    is_local: bool,
}

impl GatherLoginPayloadsEvent {
    pub fn new(collected: Arc<Mutex<Vec<LoginPayload>>>, is_local: bool) -> Self {
        Self {
            collected,
            is_local,
        }
    }

    /// Append one payload to the batch.
    pub fn add(&self, buffer: Bytes, channel: ChannelName, context: impl Into<String>) {
        self.collected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LoginPayload {
                data: buffer,
                channel,
                context: context.into(),
            });
    }

    /// Whether the handshake runs over an in-process loopback connection.
    #[inline]
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn len(&self) -> usize {
        self.collected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
