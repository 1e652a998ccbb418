//! WebSocket listener that turns accepted connections into registered peers.
//!
//! A [`PeerServer`] may listen on several addresses. Every listener feeds the
//! same [`PeerRegistry`] and reports failures to the same [`ErrorSink`].
//! When a failure is reported and nobody subscribed to
//! [`PeerServer::errors`], the failure is fatal: it is logged and all
//! listeners stop accepting.

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::peer::{Peer, PeerConfig, PeerId};
use crate::providers::{Providers, TaskProvider, TimeProvider, TokioProviders};
use crate::registry::{PeerRegistry, RegistryError};
use crate::sink::ErrorSink;
use crate::transport::WebSocketTransport;

/// Configuration for a [`PeerServer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Configuration given to every accepted peer.
    pub peer: PeerConfig,

    /// Maximum time for the WebSocket handshake of an accepted connection.
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            peer: PeerConfig::default(),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Set the configuration of accepted peers.
    pub fn with_peer_config(mut self, peer: PeerConfig) -> Self {
        self.peer = peer;
        self
    }

    /// Set the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// Failures surfaced by a [`PeerServer`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Binding a listener failed.
    #[error("failed to bind {addr}: {message}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying I/O failure.
        message: String,
    },

    /// Accepting a TCP connection failed.
    #[error("accept failed: {message}")]
    Accept {
        /// Underlying I/O failure.
        message: String,
    },

    /// The WebSocket handshake failed or timed out.
    #[error("handshake with {remote} failed: {message}")]
    Handshake {
        /// Address of the connecting client.
        remote: SocketAddr,
        /// What went wrong.
        message: String,
    },

    /// The new peer could not be registered.
    #[error("registration failed: {0}")]
    Registry(#[from] RegistryError),
}

struct ServerInner<P: Providers> {
    providers: P,
    config: ServerConfig,
    registry: PeerRegistry<P>,
    errors: ErrorSink<ServerError>,
    listeners: RefCell<Vec<JoinHandle<()>>>,
    anonymous: Cell<u64>,
}

/// Accepts WebSocket connections and registers each one as a [`Peer`].
///
/// The last path segment of the handshake URL names the peer:
/// `ws://host:port/alice` registers a peer with id `alice`. An empty path
/// yields a generated `peer-N` id.
pub struct PeerServer<P: Providers = TokioProviders> {
    inner: Rc<ServerInner<P>>,
}

impl PeerServer<TokioProviders> {
    /// Create a server with Tokio providers and the default configuration.
    pub fn with_defaults() -> Self {
        Self::new(TokioProviders::new(), ServerConfig::default())
    }
}

impl<P: Providers> PeerServer<P> {
    /// Create a server. Nothing is bound until [`listen`](PeerServer::listen).
    pub fn new(providers: P, config: ServerConfig) -> Self {
        Self {
            inner: Rc::new(ServerInner {
                registry: PeerRegistry::new(providers.clone()),
                providers,
                config,
                errors: ErrorSink::new(),
                listeners: RefCell::new(Vec::new()),
                anonymous: Cell::new(0),
            }),
        }
    }

    /// Registry holding the connected peers.
    pub fn registry(&self) -> &PeerRegistry<P> {
        &self.inner.registry
    }

    /// Subscribe to server failures.
    ///
    /// While at least one receiver is alive, failures are delivered instead
    /// of stopping the listeners.
    pub fn errors(&self) -> mpsc::UnboundedReceiver<ServerError> {
        self.inner.errors.subscribe()
    }

    /// Bind `addr` and start accepting connections on it.
    ///
    /// Returns the bound address, useful when binding port 0.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address cannot be bound.
    pub async fn listen(&self, addr: &str) -> Result<SocketAddr, ServerError> {
        let bind_error = |e: std::io::Error| ServerError::Bind {
            addr: addr.to_string(),
            message: e.to_string(),
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let handle = self.inner.providers.task().spawn_task(
            "peer_server_accept",
            accept_loop(Rc::downgrade(&self.inner), listener),
        );
        self.inner.listeners.borrow_mut().push(handle);

        info!(addr = %local_addr, "listening for peers");
        Ok(local_addr)
    }

    /// Number of listeners still accepting.
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .borrow()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Stop every listener and close every registered peer.
    pub fn shutdown(&self) {
        self.inner.stop_listeners();
        self.inner.registry.close_all();
    }
}

impl<P: Providers> ServerInner<P> {
    /// Report `error`. Returns false when it was fatal and listeners stopped.
    fn report(&self, error: ServerError) -> bool {
        match self.errors.report(error) {
            Ok(()) => true,
            Err(error) => {
                error!(error = %error, "unhandled server error, stopping listeners");
                self.stop_listeners();
                false
            }
        }
    }

    fn stop_listeners(&self) {
        for handle in self.listeners.borrow_mut().drain(..) {
            handle.abort();
        }
    }

    fn peer_id_for(&self, path: &str) -> PeerId {
        match path.rsplit('/').find(|segment| !segment.is_empty()) {
            Some(name) => PeerId::new(name),
            None => {
                let n = self.anonymous.get() + 1;
                self.anonymous.set(n);
                PeerId::new(format!("peer-{n}"))
            }
        }
    }
}

impl<P: Providers> Drop for ServerInner<P> {
    fn drop(&mut self) {
        self.stop_listeners();
    }
}

async fn accept_loop<P: Providers>(server: Weak<ServerInner<P>>, listener: TcpListener) {
    loop {
        let accepted = listener.accept().await;
        let inner = match server.upgrade() {
            Some(inner) => inner,
            None => return,
        };
        match accepted {
            Ok((stream, remote)) => {
                debug!(remote = %remote, "accepted connection");
                inner.providers.task().spawn_task(
                    "peer_server_handshake",
                    handshake(server.clone(), stream, remote),
                );
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                let error = ServerError::Accept {
                    message: e.to_string(),
                };
                if !inner.report(error) {
                    return;
                }
            }
        }
    }
}

async fn handshake<P: Providers>(server: Weak<ServerInner<P>>, stream: TcpStream, remote: SocketAddr) {
    let (time, task, timeout) = match server.upgrade() {
        Some(inner) => (
            inner.providers.time().clone(),
            inner.providers.task().clone(),
            inner.config.handshake_timeout,
        ),
        None => return,
    };

    let result = time
        .timeout(timeout, WebSocketTransport::accept_with_path(stream, &task))
        .await;

    let inner = match server.upgrade() {
        Some(inner) => inner,
        None => return,
    };
    let (transport, events, path) = match result {
        Ok(Ok(accepted)) => accepted,
        Ok(Err(e)) => {
            inner.report(ServerError::Handshake {
                remote,
                message: e.to_string(),
            });
            return;
        }
        Err(_) => {
            inner.report(ServerError::Handshake {
                remote,
                message: format!("no handshake within {:?}", timeout),
            });
            return;
        }
    };

    let id = inner.peer_id_for(&path);
    let peer = Peer::new(
        id,
        transport,
        events,
        inner.providers.clone(),
        inner.config.peer.clone(),
    );
    if let Err(e) = inner.registry.register(peer.clone()) {
        peer.close();
        inner.report(e.into());
    }
}
