//! Codec module - structured payload encoding.
//!
//! Channel payloads are opaque bytes on the wire. [`MsgPackCodec`] is the
//! codec used by [`NetworkEvent::decode_payload`](crate::event::NetworkEvent::decode_payload)
//! and by `send_message` on a dispatcher.
//!
//! Codecs are marker structs with static methods rather than trait objects.

mod msgpack;

pub use msgpack::MsgPackCodec;
