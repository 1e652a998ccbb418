//! Set of connected peers with online/offline notifications.
//!
//! A peer stays in the registry while it is open. Each registration spawns a
//! watcher that removes the peer and emits [`RegistryEvent::Offline`] once
//! the peer closes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::peer::{Peer, PeerId};
use crate::providers::{Providers, TaskProvider, TokioProviders};

/// Errors returned by [`PeerRegistry::register`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// An open peer with the same id is already registered.
    #[error("peer {id} is already registered")]
    Duplicate {
        /// The contested id.
        id: PeerId,
    },

    /// The peer was already closed.
    #[error("peer {id} is closed")]
    PeerClosed {
        /// Id of the closed peer.
        id: PeerId,
    },
}

/// Membership changes of a [`PeerRegistry`].
#[derive(Debug)]
pub enum RegistryEvent<P: Providers = TokioProviders> {
    /// A peer was registered.
    Online(Peer<P>),
    /// A registered peer closed and was removed.
    Offline(PeerId),
}

/// Receiving half of the registry's event stream.
pub type RegistryEvents<P = TokioProviders> = mpsc::UnboundedReceiver<RegistryEvent<P>>;

struct RegistryInner<P: Providers> {
    providers: P,
    peers: RefCell<HashMap<PeerId, Peer<P>>>,
    watchers: RefCell<HashMap<PeerId, JoinHandle<()>>>,
    events_tx: RefCell<Option<mpsc::UnboundedSender<RegistryEvent<P>>>>,
}

/// Registry of open peers keyed by [`PeerId`].
pub struct PeerRegistry<P: Providers = TokioProviders> {
    inner: Rc<RegistryInner<P>>,
}

impl<P: Providers> Clone for PeerRegistry<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Providers> PeerRegistry<P> {
    /// Create an empty registry. Watchers are spawned with `providers`.
    pub fn new(providers: P) -> Self {
        Self {
            inner: Rc::new(RegistryInner {
                providers,
                peers: RefCell::new(HashMap::new()),
                watchers: RefCell::new(HashMap::new()),
                events_tx: RefCell::new(None),
            }),
        }
    }

    /// Take the event stream. Returns `None` after the first call.
    ///
    /// Membership changes are only reported from this point on. Until the
    /// stream is taken the registry holds no peer beyond its open ones.
    pub fn take_events(&self) -> Option<RegistryEvents<P>> {
        let mut slot = self.inner.events_tx.borrow_mut();
        if slot.is_some() {
            return None;
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        *slot = Some(events_tx);
        Some(events_rx)
    }

    /// Add an open peer and emit [`RegistryEvent::Online`].
    ///
    /// A closed peer whose watcher has not run yet is replaced, and its
    /// `Offline` event is emitted first.
    ///
    /// # Errors
    ///
    /// [`RegistryError::PeerClosed`] if `peer` is closed,
    /// [`RegistryError::Duplicate`] if an open peer already holds its id.
    pub fn register(&self, peer: Peer<P>) -> Result<(), RegistryError> {
        let id = peer.id().clone();
        if peer.is_closed() {
            return Err(RegistryError::PeerClosed { id });
        }

        let replaced = self.inner.peers.borrow().get(&id).cloned();
        if let Some(existing) = replaced {
            if !existing.is_closed() {
                return Err(RegistryError::Duplicate { id });
            }
            self.inner.remove(&existing);
        }

        self.inner.peers.borrow_mut().insert(id.clone(), peer.clone());
        let watcher = self.inner.providers.task().spawn_task(
            "registry_watcher",
            watch_peer(Rc::downgrade(&self.inner), peer.clone()),
        );
        self.inner.watchers.borrow_mut().insert(id.clone(), watcher);

        info!(peer = %id, "peer online");
        self.inner.emit(RegistryEvent::Online(peer));
        Ok(())
    }

    /// Look up a registered peer.
    pub fn get(&self, id: &PeerId) -> Option<Peer<P>> {
        self.inner.peers.borrow().get(id).cloned()
    }

    /// Ids of all registered peers, sorted.
    pub fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.inner.peers.borrow().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.inner.peers.borrow().len()
    }

    /// Whether no peer is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.peers.borrow().is_empty()
    }

    /// Close every registered peer. Each one goes offline as it closes.
    pub fn close_all(&self) {
        let peers: Vec<Peer<P>> = self.inner.peers.borrow().values().cloned().collect();
        for peer in peers {
            peer.close();
        }
    }
}

impl<P: Providers> RegistryInner<P> {
    /// Remove `peer` if it is still the one registered under its id.
    fn remove(&self, peer: &Peer<P>) -> bool {
        let id = peer.id();
        let current = self
            .peers
            .borrow()
            .get(id)
            .is_some_and(|existing| existing.same_peer(peer));
        if !current {
            return false;
        }

        self.peers.borrow_mut().remove(id);
        self.watchers.borrow_mut().remove(id);
        info!(peer = %id, "peer offline");
        self.emit(RegistryEvent::Offline(id.clone()));
        true
    }

    fn emit(&self, event: RegistryEvent<P>) {
        let events = self.events_tx.borrow().clone();
        if let Some(events) = events {
            let _ = events.send(event);
        }
    }
}

impl<P: Providers> Drop for RegistryInner<P> {
    fn drop(&mut self) {
        for (_, watcher) in self.watchers.borrow_mut().drain() {
            watcher.abort();
        }
    }
}

async fn watch_peer<P: Providers>(registry: Weak<RegistryInner<P>>, peer: Peer<P>) {
    peer.closed().await;
    match registry.upgrade() {
        Some(registry) => {
            if !registry.remove(&peer) {
                debug!(peer = %peer.id(), "closed peer already replaced");
            }
        }
        None => debug!(peer = %peer.id(), "registry gone before peer closed"),
    }
}
