//! Channel identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::MAX_CHANNEL_NAME_LEN;

/// A `namespace:path` channel identifier, e.g. `demo:handshake`.
///
/// Namespace characters: `a-z 0-9 _ . -`. Path characters additionally
/// allow `/`. Both parts must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelName(String);

impl ChannelName {
    /// Build a channel name from its two parts.
    pub fn new(namespace: &str, path: &str) -> Result<Self> {
        format!("{}:{}", namespace, path).parse()
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> &str {
        self.0.split_once(':').map(|(ns, _)| ns).unwrap_or("")
    }

    pub fn path(&self) -> &str {
        self.0.split_once(':').map(|(_, p)| p).unwrap_or("")
    }
}

fn valid_namespace_char(c: char) -> bool {
    matches!(c, 'a'..='z' | '0'..='9' | '_' | '.' | '-')
}

fn valid_path_char(c: char) -> bool {
    valid_namespace_char(c) || c == '/'
}

impl FromStr for ChannelName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() > MAX_CHANNEL_NAME_LEN as usize {
            return Err(Error::InvalidChannelName(s.to_string()));
        }
        let (namespace, path) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidChannelName(s.to_string()))?;

        let valid = !namespace.is_empty()
            && !path.is_empty()
            && namespace.chars().all(valid_namespace_char)
            && path.chars().all(valid_path_char);
        if !valid {
            return Err(Error::InvalidChannelName(s.to_string()));
        }

        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for ChannelName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ChannelName> for String {
    fn from(name: ChannelName) -> Self {
        name.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let name: ChannelName = "demo:login/probe".parse().unwrap();
        assert_eq!(name.namespace(), "demo");
        assert_eq!(name.path(), "login/probe");
        assert_eq!(name.to_string(), "demo:login/probe");
    }

    #[test]
    fn test_parse_invalid() {
        for bad in ["", "nocolon", ":path", "ns:", "Upper:case", "ns/x:path", "ns:sp ace"] {
            assert!(bad.parse::<ChannelName>().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_too_long_rejected() {
        let long = format!("a:{}", "b".repeat(MAX_CHANNEL_NAME_LEN as usize));
        assert!(long.parse::<ChannelName>().is_err());
    }

    #[test]
    fn test_new_from_parts() {
        let name = ChannelName::new("demo", "chat").unwrap();
        assert_eq!(name.as_str(), "demo:chat");
    }

    #[test]
    fn test_serde_as_string() {
        let name: ChannelName = "demo:chat".parse().unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"demo:chat\"");

        let back: ChannelName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
        assert!(serde_json::from_str::<ChannelName>("\"Bad Name\"").is_err());
    }
}
