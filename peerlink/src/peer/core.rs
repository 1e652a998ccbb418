//! Core peer implementation: request correlation, dispatch and lifecycle.
//!
//! A [`Peer`] owns one transport. Outbound requests are tracked in a pending
//! table with one timer each. A background dispatcher consumes transport
//! events, settles pending requests from responses, and surfaces inbound
//! requests as [`PeerEvent::Request`].
//!
//! # Request lifecycle
//!
//! ```text
//!            request()
//!               │
//!               ▼
//!          ┌─────────┐  response ok      ┌──────────┐
//!          │ Pending ├──────────────────►│ Resolved │
//!          └────┬────┘                   └──────────┘
//!               │ response !ok  ──────► Rejected(Remote)
//!               │ timer fires   ──────► Rejected(RequestTimeout)
//!               └ peer closes   ──────► Rejected(PeerClosed)
//! ```
//!
//! Removal from the pending table is the commit point: the first path to
//! remove an entry settles it, later ones find nothing.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::config::PeerConfig;
use super::error::{PeerError, PeerResult};
use super::inbound::{InboundRequest, Responder, ResponseSink};
use super::metrics::PeerMetrics;
use super::pending::{PendingRequest, PendingTable};
use super::reply::ReplyFuture;
use crate::message::{build_request, Frame, RequestFrame, RequestId, RequestIdFactory, ResponseFrame};
use crate::providers::{Providers, TaskProvider, TimeProvider, TokioProviders};
use crate::transport::{Transport, TransportEvent, TransportEvents};

/// Caller-assigned identifier of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// Create an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Notifications emitted by a peer.
#[derive(Debug)]
pub enum PeerEvent {
    /// The remote sent a request; answer it through the [`InboundRequest`].
    Request(InboundRequest),
    /// The peer closed. Emitted exactly once.
    Closed,
}

/// Receiving half of a peer's event stream, obtained with [`Peer::take_events`].
pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseCause {
    Local,
    Transport,
    Dropped,
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cause = match self {
            CloseCause::Local => "local",
            CloseCause::Transport => "transport",
            CloseCause::Dropped => "dropped",
        };
        f.write_str(cause)
    }
}

#[derive(Default)]
struct PeerState {
    closed: bool,
    pending: PendingTable,
    metrics: PeerMetrics,
}

struct PeerCore<P: Providers> {
    id: PeerId,
    transport: Box<dyn Transport>,
    providers: P,
    config: PeerConfig,
    ids: RequestIdFactory,
    state: RefCell<PeerState>,
    events_tx: RefCell<Option<mpsc::UnboundedSender<PeerEvent>>>,
    closed_tx: watch::Sender<bool>,
    dispatcher: RefCell<Option<JoinHandle<()>>>,
}

/// One endpoint of a request/response session bound to a transport.
///
/// `Peer` is a cheap handle; clones refer to the same session. The session
/// is closed when [`close`](Peer::close) is called, when the transport
/// reports closure, or when the last handle is dropped.
///
/// Must be created inside a [`tokio::task::LocalSet`].
pub struct Peer<P: Providers = TokioProviders> {
    core: Rc<PeerCore<P>>,
}

impl<P: Providers> Clone for Peer<P> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<P: Providers> fmt::Debug for Peer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.core.id)
            .field("closed", &self.is_closed())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Peer<TokioProviders> {
    /// Create a peer with Tokio providers and the default configuration.
    pub fn with_defaults(
        id: impl Into<PeerId>,
        transport: impl Transport + 'static,
        events: TransportEvents,
    ) -> Self {
        Self::new(
            id,
            transport,
            events,
            TokioProviders::new(),
            PeerConfig::default(),
        )
    }
}

impl<P: Providers> Peer<P> {
    /// Bind a peer to an already-connected transport.
    ///
    /// `events` is the transport's event stream; a dispatcher task is spawned
    /// to consume it.
    pub fn new(
        id: impl Into<PeerId>,
        transport: impl Transport + 'static,
        events: TransportEvents,
        providers: P,
        config: PeerConfig,
    ) -> Self {
        let (closed_tx, _) = watch::channel(false);
        let core = Rc::new(PeerCore {
            id: id.into(),
            transport: Box::new(transport),
            providers,
            config,
            ids: RequestIdFactory::new(),
            state: RefCell::new(PeerState::default()),
            events_tx: RefCell::new(None),
            closed_tx,
            dispatcher: RefCell::new(None),
        });

        let handle = core
            .providers
            .task()
            .spawn_task("peer_dispatcher", dispatch_loop(Rc::downgrade(&core), events));
        *core.dispatcher.borrow_mut() = Some(handle);

        debug!(peer = %core.id, "peer opened");
        Self { core }
    }

    /// The caller-assigned id.
    pub fn id(&self) -> &PeerId {
        &self.core.id
    }

    /// Configuration this peer was created with.
    pub fn config(&self) -> &PeerConfig {
        &self.core.config
    }

    /// Whether the peer has closed. Never reverts to `false`.
    pub fn is_closed(&self) -> bool {
        self.core.state.borrow().closed
    }

    /// Number of outbound requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.core.state.borrow().pending.len()
    }

    /// Snapshot of the request counters.
    pub fn metrics(&self) -> PeerMetrics {
        self.core.state.borrow().metrics.clone()
    }

    /// Take the event stream. Returns `None` after the first call.
    ///
    /// Events are only produced once the stream is taken. Requests arriving
    /// earlier are dropped unanswered, so the remote sees a timeout. Taking
    /// the stream of a closed peer yields [`PeerEvent::Closed`] alone.
    pub fn take_events(&self) -> Option<PeerEvents> {
        let mut slot = self.core.events_tx.borrow_mut();
        if slot.is_some() {
            return None;
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        if self.is_closed() {
            let _ = events_tx.send(PeerEvent::Closed);
        }
        *slot = Some(events_tx);
        Some(events_rx)
    }

    /// Whether both handles refer to the same session.
    pub fn same_peer(&self, other: &Peer<P>) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    /// Issue a request and return a future for its outcome.
    ///
    /// The frame is written before this returns, so requests issued in
    /// sequence go out in that order.
    ///
    /// # Errors
    ///
    /// [`PeerError::PeerClosed`] if the peer is closed; nothing is written
    /// to the transport in that case. A transport write failure is returned
    /// as [`PeerError::Transport`] and leaves no pending entry behind.
    pub fn request(&self, method: impl Into<String>, data: Value) -> PeerResult<ReplyFuture> {
        self.core.request(method.into(), data)
    }

    /// Issue a request and wait for its outcome.
    pub async fn send(&self, method: impl Into<String>, data: Value) -> PeerResult<Value> {
        self.request(method, data)?.await
    }

    /// Typed variant of [`send`](Peer::send).
    ///
    /// `request` is converted to a JSON payload and the response data is
    /// converted back into `Resp`. Conversion failures surface as
    /// [`PeerError::Serialization`].
    pub async fn call<Req, Resp>(&self, method: impl Into<String>, request: &Req) -> PeerResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let data = serde_json::to_value(request)?;
        let response = self.send(method, data).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Close the peer. Idempotent.
    ///
    /// Closes the transport, rejects every pending request with
    /// [`PeerError::PeerClosed`] and emits [`PeerEvent::Closed`].
    pub fn close(&self) {
        self.core.shutdown(CloseCause::Local);
    }

    /// Resolves once the peer is closed.
    ///
    /// The returned future does not keep the peer alive.
    pub fn closed(&self) -> impl Future<Output = ()> + 'static {
        let mut closed_rx = self.core.closed_tx.subscribe();
        async move {
            // Err means the peer is gone, which also counts as closed.
            let _ = closed_rx.wait_for(|closed| *closed).await;
        }
    }
}

impl<P: Providers> PeerCore<P> {
    fn request(self: &Rc<Self>, method: String, data: Value) -> PeerResult<ReplyFuture> {
        if self.state.borrow().closed {
            debug!(peer = %self.id, method = %method, "request on closed peer");
            return Err(PeerError::PeerClosed);
        }

        let frame = build_request(&self.ids, method, data);
        let id = frame.id;
        let (reply_tx, reply_rx) = oneshot::channel();
        let mut entry = PendingRequest::new(
            frame.method.clone(),
            reply_tx,
            self.providers.time().now(),
        );
        entry.arm(self.spawn_timer(id));
        self.state.borrow_mut().pending.insert(id, entry);

        let frame = Frame::Request(frame);
        if let Err(e) = self.transport.send(&frame) {
            warn!(peer = %self.id, request_id = %id, error = %e, "failed to write request");
            let entry = self.state.borrow_mut().pending.take(id);
            if let Some(entry) = entry {
                entry.discard();
            }
            return Err(e.into());
        }

        self.state.borrow_mut().metrics.requests_sent += 1;
        trace!(peer = %self.id, request_id = %id, "request sent");
        Ok(ReplyFuture::new(id, reply_rx))
    }

    fn spawn_timer(self: &Rc<Self>, id: RequestId) -> JoinHandle<()> {
        let core = Rc::downgrade(self);
        let time = self.providers.time().clone();
        let timeout = self.config.request_timeout;
        self.providers.task().spawn_task("request_timeout", async move {
            if time.sleep(timeout).await.is_err() {
                return;
            }
            if let Some(core) = core.upgrade() {
                core.expire(id);
            }
        })
    }

    fn expire(&self, id: RequestId) {
        let entry = self.state.borrow_mut().pending.take(id);
        if let Some(entry) = entry {
            self.state.borrow_mut().metrics.timeouts += 1;
            debug!(
                peer = %self.id,
                request_id = %id,
                method = %entry.method(),
                "request timed out"
            );
            entry.expire();
        }
    }

    fn dispatch(self: &Rc<Self>, frame: Frame) {
        match frame {
            Frame::Response(response) => self.handle_response(response),
            Frame::Request(request) => self.handle_request(request),
            Frame::Unknown(_) => {
                trace!(peer = %self.id, "ignoring frame that is neither request nor response");
            }
        }
    }

    fn handle_response(&self, response: ResponseFrame) {
        let id = response.id;
        let entry = self.state.borrow_mut().pending.take(id);
        let entry = match entry {
            Some(entry) => entry,
            None => {
                self.state.borrow_mut().metrics.unmatched_responses += 1;
                let error = PeerError::UnmatchedResponse { id };
                debug!(peer = %self.id, error = %error, "dropping response");
                return;
            }
        };

        self.state.borrow_mut().metrics.responses_matched += 1;
        let elapsed = self.providers.time().now().saturating_sub(entry.sent_at());
        trace!(
            peer = %self.id,
            request_id = %id,
            ok = response.ok,
            elapsed = ?elapsed,
            "response matched"
        );

        let outcome = if response.ok {
            Ok(response.data)
        } else {
            Err(PeerError::Remote {
                reason: response.error_reason.unwrap_or_default(),
                code: response.error_code.unwrap_or(0),
            })
        };
        entry.settle(outcome);
    }

    fn handle_request(self: &Rc<Self>, request: RequestFrame) {
        self.state.borrow_mut().metrics.requests_received += 1;
        trace!(peer = %self.id, request_id = %request.id, method = %request.method, "request received");

        let Some(events) = self.events_tx.borrow().clone() else {
            debug!(peer = %self.id, request_id = %request.id, "no event receiver, request left unanswered");
            return;
        };
        let sink: Rc<dyn ResponseSink> = self.clone();
        let inbound = InboundRequest::new(Responder::new(Rc::downgrade(&sink), request));
        if events.send(PeerEvent::Request(inbound)).is_err() {
            debug!(peer = %self.id, "event receiver dropped, request left unanswered");
        }
    }

    fn shutdown(&self, cause: CloseCause) {
        {
            let mut state = self.state.borrow_mut();
            if state.closed {
                return;
            }
            state.closed = true;
        }

        if cause != CloseCause::Transport {
            self.transport.close();
        }

        let drained = self.state.borrow_mut().pending.drain();
        self.state.borrow_mut().metrics.requests_closed += drained.len() as u64;
        debug!(
            peer = %self.id,
            cause = %cause,
            rejected = drained.len(),
            "peer closed"
        );
        for (_, entry) in drained {
            entry.settle(Err(PeerError::PeerClosed));
        }

        let events = self.events_tx.borrow().clone();
        if let Some(events) = events {
            let _ = events.send(PeerEvent::Closed);
        }
        self.closed_tx.send_replace(true);

        if cause != CloseCause::Transport {
            if let Some(dispatcher) = self.dispatcher.borrow_mut().take() {
                dispatcher.abort();
            }
        }
    }
}

impl<P: Providers> ResponseSink for PeerCore<P> {
    fn respond(&self, frame: ResponseFrame) -> PeerResult<()> {
        if self.state.borrow().closed {
            return Err(PeerError::PeerClosed);
        }
        let id = frame.id;
        self.transport.send(&Frame::Response(frame))?;
        trace!(peer = %self.id, request_id = %id, "response sent");
        Ok(())
    }
}

impl<P: Providers> Drop for PeerCore<P> {
    fn drop(&mut self) {
        self.shutdown(CloseCause::Dropped);
    }
}

async fn dispatch_loop<P: Providers>(core: Weak<PeerCore<P>>, mut events: TransportEvents) {
    while let Some(event) = events.recv().await {
        let core = match core.upgrade() {
            Some(core) => core,
            None => return,
        };
        match event {
            TransportEvent::Message(frame) => core.dispatch(frame),
            TransportEvent::Closed => {
                core.shutdown(CloseCause::Transport);
                return;
            }
        }
    }

    // Event channel dropped without a Closed event.
    if let Some(core) = core.upgrade() {
        core.shutdown(CloseCause::Transport);
    }
}
