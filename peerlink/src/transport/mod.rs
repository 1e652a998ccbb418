//! Duplex transports that carry decoded frames between two endpoints.
//!
//! A transport exposes a fire-and-forget [`Transport::send`] and reports
//! what happens on the other side through a channel of [`TransportEvent`]s.
//! It emits [`TransportEvent::Closed`] at most once, whether the disconnect
//! was requested locally or came from the remote.
//!
//! Two implementations are provided:
//! - [`MemoryTransport`]: an in-process pair, used by tests and simulations
//! - [`WebSocketTransport`]: JSON text frames over a tungstenite stream

pub mod memory;
pub mod websocket;

pub use memory::{MemoryEnd, MemoryTransport};
pub use websocket::WebSocketTransport;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::codec::CodecError;
use crate::message::Frame;

/// Errors raised while writing to a transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport is closed and cannot carry frames.
    #[error("transport closed")]
    Closed,

    /// The frame could not be encoded.
    #[error("codec error: {message}")]
    Codec {
        /// Underlying codec failure.
        message: String,
    },

    /// The underlying connection failed.
    #[error("I/O error: {message}")]
    Io {
        /// Underlying I/O failure.
        message: String,
    },
}

impl From<CodecError> for TransportError {
    fn from(error: CodecError) -> Self {
        TransportError::Codec {
            message: error.to_string(),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        TransportError::Io {
            message: error.to_string(),
        }
    }
}

/// Something that happened on a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A decoded frame arrived.
    Message(Frame),
    /// The transport disconnected. Emitted at most once.
    Closed,
}

/// Receiving half of a transport's event stream.
///
/// The sender being dropped counts as closure.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// A duplex channel for frames, exclusively owned by one peer.
pub trait Transport {
    /// Write a frame. Failures are returned, never retried.
    fn send(&self, frame: &Frame) -> Result<(), TransportError>;

    /// Begin closing the transport. Idempotent.
    ///
    /// The matching [`TransportEvent::Closed`] is delivered through the
    /// event channel, not synchronously.
    fn close(&self);
}
