//! Peer request/response engine.
//!
//! A [`Peer`] represents one endpoint of a bidirectional session bound to a
//! single [`Transport`](crate::Transport). It can both send requests that
//! expect a correlated response and receive requests that it must explicitly
//! accept or reject.
//!
//! # Outcomes of a request
//!
//! Exactly one of the following settles every request issued on an open
//! peer:
//! - a matching `ok = true` response resolves it with the response data
//! - a matching `ok = false` response rejects it with [`PeerError::Remote`]
//! - no response within [`PeerConfig::request_timeout`] rejects it with
//!   [`PeerError::RequestTimeout`]
//! - the peer closing first rejects it with [`PeerError::PeerClosed`]
//!
//! # Example
//!
//! ```ignore
//! use peerlink::{MemoryTransport, Peer, PeerEvent};
//!
//! let ((a, a_events), (b, b_events)) = MemoryTransport::pair();
//! let alice = Peer::with_defaults("bob", a, a_events);
//! let bob = Peer::with_defaults("alice", b, b_events);
//!
//! let mut events = bob.take_events().unwrap();
//! tokio::task::spawn_local(async move {
//!     while let Some(PeerEvent::Request(request)) = events.recv().await {
//!         let _ = request.accept("pong".into());
//!     }
//! });
//!
//! assert_eq!(alice.send("ping", serde_json::Value::Null).await?, "pong");
//! ```

/// Core peer implementation and dispatcher
pub mod core;

/// Configuration structures for peer behavior
pub mod config;

/// Error types specific to peer operations
pub mod error;

/// Inbound requests and their responders
pub mod inbound;

/// Request counters
pub mod metrics;

/// Caller-side reply future
pub mod reply;

mod pending;

pub use config::PeerConfig;
pub use self::core::{Peer, PeerEvent, PeerEvents, PeerId};
pub use error::{PeerError, PeerResult};
pub use inbound::{InboundRequest, Responder};
pub use metrics::PeerMetrics;
pub use reply::ReplyFuture;
