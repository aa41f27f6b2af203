//! Endpoint configuration.
//!
//! Every field has a default, so a config file only names what it changes:
//!
//! ```
//! use sidenet::config::{NetworkConfig, UnhandledPolicy};
//!
//! let config = NetworkConfig::from_json_str(r#"{ "unhandled": "disconnect" }"#).unwrap();
//! assert_eq!(config.unhandled, UnhandledPolicy::Disconnect);
//! assert_eq!(config.read_buffer_size, 64 * 1024);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::writer::WriterConfig;

/// Default read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// What an endpoint does with a message no handler marked as handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnhandledPolicy {
    /// Log a warning and keep the connection.
    #[default]
    Warn,
    /// Log a warning and disconnect.
    Disconnect,
}

/// Configuration shared by both sides of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Largest accepted payload in bytes.
    pub max_payload_size: u32,
    /// Size of each read from the stream.
    pub read_buffer_size: usize,
    /// Outbound writer settings.
    pub writer: WriterConfig,
    pub unhandled: UnhandledPolicy,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            writer: WriterConfig::default(),
            unhandled: UnhandledPolicy::default(),
        }
    }
}

impl NetworkConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(NetworkConfig::from_json_str("{}").unwrap(), NetworkConfig::default());
    }

    #[test]
    fn test_nested_writer_overrides() {
        let config = NetworkConfig::from_json_str(
            r#"{ "max_payload_size": 4096, "writer": { "backpressure_timeout_ms": 250 } }"#,
        )
        .unwrap();

        assert_eq!(config.max_payload_size, 4096);
        assert_eq!(config.writer.backpressure_timeout_ms, 250);
        assert_eq!(config.writer.max_pending_frames, WriterConfig::default().max_pending_frames);
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let result = NetworkConfig::from_json_str(r#"{ "unhandled": "explode" }"#);
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[test]
    fn test_from_path() {
        let path = std::env::temp_dir().join(format!("sidenet-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "read_buffer_size": 1024 }"#).unwrap();

        let config = NetworkConfig::from_path(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.read_buffer_size, 1024);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = NetworkConfig::from_path("/nonexistent/sidenet.json");
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
