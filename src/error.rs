//! Error types for sidenet.

use thiserror::Error;

use crate::bus::ChannelName;
use crate::direction::LogicalSide;

/// Main error type for all sidenet operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (configuration files only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (invalid frame, wrong flags, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Channel name is not a valid `namespace:path` identifier.
    #[error("Invalid channel name: {0:?}")]
    InvalidChannelName(String),

    /// Channel name registered twice in one registry.
    #[error("Channel already registered: {0}")]
    DuplicateChannel(ChannelName),

    /// Connection closed (or dropped) before the operation ran.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Outbound payload exceeds the configured frame limit.
    #[error("Payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: u32 },

    /// Outbound queue is full and the caller asked not to wait.
    #[error("Outbound queue full")]
    Backpressure,

    /// Backpressure timeout - write buffer stayed full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// No worker is installed for the side that must process the message.
    #[error("No worker registered for the {0} side")]
    NoWorker(LogicalSide),

    /// Worker stopped accepting tasks.
    #[error("Worker has shut down")]
    WorkerShutdown,

    /// Enqueued task panicked; carries the panic message.
    #[error("Task panicked: {0}")]
    TaskPanicked(String),
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Render a captured panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let from_str: Box<dyn std::any::Any + Send> = Box::new("boom");
        let from_string: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn std::any::Any + Send> = Box::new(7u8);

        assert_eq!(panic_message(from_str.as_ref()), "boom");
        assert_eq!(panic_message(from_string.as_ref()), "bang");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::NoWorker(LogicalSide::Client).to_string(),
            "No worker registered for the client side"
        );
        assert_eq!(Error::ConnectionClosed.to_string(), "Connection closed");
    }
}
