//! Error types for peer operations.

use thiserror::Error;

use crate::message::RequestId;
use crate::transport::TransportError;

/// Ways a request, or an operation on a peer, can fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// No response arrived within the configured timeout.
    #[error("request timed out")]
    RequestTimeout,

    /// The remote peer rejected the request.
    #[error("remote error {code}: {reason}")]
    Remote {
        /// Rejection reason sent by the remote.
        reason: String,
        /// Rejection code sent by the remote.
        code: i64,
    },

    /// The peer was closed before or while the request was outstanding.
    #[error("peer is closed")]
    PeerClosed,

    /// A response arrived for an id with no pending request.
    ///
    /// Never returned to a caller of `send`; used when recording stale or
    /// duplicate responses.
    #[error("no pending request for response {id}")]
    UnmatchedResponse {
        /// Id carried by the stray response.
        id: RequestId,
    },

    /// Writing to the transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A typed payload could not be converted to or from JSON.
    #[error("serialization error: {message}")]
    Serialization {
        /// Underlying serde failure.
        message: String,
    },
}

impl From<serde_json::Error> for PeerError {
    fn from(error: serde_json::Error) -> Self {
        PeerError::Serialization {
            message: error.to_string(),
        }
    }
}

/// Result type for peer operations.
pub type PeerResult<T> = Result<T, PeerError>;
