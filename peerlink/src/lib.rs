//! # peerlink
//!
//! Peer-to-peer request/response messaging over persistent duplex
//! transports.
//!
//! Each connected endpoint is a [`Peer`]. A peer can send requests that
//! expect a correlated response, and receives requests from the remote that
//! it must explicitly accept or reject.
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ PeerServer: listeners, handshake, ErrorSink   │
//! ├──────────────────────────────────────────────┤
//! │ PeerRegistry: online / offline notifications  │
//! ├──────────────────────────────────────────────┤
//! │ Peer: pending table, timeouts, accept/reject  │
//! ├──────────────────────────────────────────────┤
//! │ message: RequestFrame / ResponseFrame         │
//! ├──────────────────────────────────────────────┤
//! │ Transport: MemoryTransport, WebSocketTransport│
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Runtime
//!
//! Everything is single-threaded. Peers, registries and servers spawn their
//! background tasks with `spawn_local` through [`TaskProvider`], so they must
//! be used inside a [`tokio::task::LocalSet`] on a current-thread runtime.
//!
//! ## Quick start
//!
//! ```ignore
//! use peerlink::{Peer, WebSocketTransport, TokioTaskProvider};
//!
//! let (transport, events) =
//!     WebSocketTransport::connect("ws://127.0.0.1:9000/alice", &TokioTaskProvider).await?;
//! let server = Peer::with_defaults("server", transport, events);
//! let pong = server.send("ping", serde_json::Value::Null).await?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod codec;
pub mod message;
pub mod peer;
pub mod providers;
pub mod registry;
pub mod server;
pub mod sink;
pub mod transport;

pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use message::{
    build_error_response, build_request, build_success_response, Frame, RequestFrame, RequestId,
    RequestIdFactory, ResponseFrame,
};
pub use peer::{
    InboundRequest, Peer, PeerConfig, PeerError, PeerEvent, PeerEvents, PeerId, PeerMetrics,
    PeerResult, ReplyFuture, Responder,
};
pub use providers::{
    Providers, TaskProvider, TimeError, TimeProvider, TokioProviders, TokioTaskProvider,
    TokioTimeProvider,
};
pub use registry::{PeerRegistry, RegistryError, RegistryEvent, RegistryEvents};
pub use server::{PeerServer, ServerConfig, ServerError};
pub use sink::ErrorSink;
pub use transport::{
    MemoryTransport, Transport, TransportError, TransportEvent, TransportEvents,
    WebSocketTransport,
};
