//! Pluggable frame serialization.
//!
//! Peers operate on decoded [`Frame`](crate::Frame)s; the [`MessageCodec`]
//! turns them into bytes for transports that need a byte encoding. The
//! default [`JsonCodec`] produces the JSON field names described in
//! [`message`](crate::message).
//!
//! # Example
//!
//! ```rust
//! use peerlink::{Frame, JsonCodec, MessageCodec, RequestFrame, RequestId};
//!
//! let codec = JsonCodec;
//! let frame = Frame::Request(RequestFrame::new(RequestId::new(1), "ping", serde_json::Value::Null));
//!
//! let bytes = codec.encode(&frame).unwrap();
//! let decoded: Frame = codec.decode(&bytes).unwrap();
//! assert_eq!(decoded, frame);
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Error type for codec operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Failed to encode a message to bytes.
    #[error("encode error: {0}")]
    Encode(String),
    /// Failed to decode bytes to a message.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Pluggable message serialization format.
///
/// Requires `Clone + 'static` so codec instances can be stored inside
/// transports and moved into their tasks.
pub trait MessageCodec: Clone + 'static {
    /// Encode a serializable message to bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a deserializable message.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if deserialization fails.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using serde_json.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
