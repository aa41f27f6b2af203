//! MsgPack codec using `rmp-serde`.
//!
//! Always encode with `to_vec_named`: structs go over the wire as maps
//! keyed by field name, so peers built from a different revision of a
//! message type still decode the fields they know.
//!
//! # Example
//!
//! ```
//! use sidenet::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Handshake {
//!     version: u32,
//!     mod_list: Vec<String>,
//! }
//!
//! let msg = Handshake { version: 2, mod_list: vec!["core".to_string()] };
//! let encoded = MsgPackCodec::encode(&msg).unwrap();
//! let decoded: Handshake = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use crate::error::Result;

/// MessagePack codec for structured channel payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        // to_vec_named, NOT to_vec
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
