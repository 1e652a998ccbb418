//! Bookkeeping for outbound requests awaiting a response.
//!
//! Every settlement path (response, timeout, close) goes through
//! [`PendingTable::take`]. Whoever removes the entry settles it; anyone
//! arriving later finds nothing and does nothing.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::error::{PeerError, PeerResult};
use crate::message::RequestId;

/// One outstanding request: its reply channel and timeout timer.
pub(crate) struct PendingRequest {
    method: String,
    reply: oneshot::Sender<PeerResult<Value>>,
    timer: Option<JoinHandle<()>>,
    sent_at: Duration,
}

impl PendingRequest {
    pub(crate) fn new(
        method: String,
        reply: oneshot::Sender<PeerResult<Value>>,
        sent_at: Duration,
    ) -> Self {
        Self {
            method,
            reply,
            timer: None,
            sent_at,
        }
    }

    /// Attach the timer that expires this request.
    pub(crate) fn arm(&mut self, timer: JoinHandle<()>) {
        self.timer = Some(timer);
    }

    pub(crate) fn method(&self) -> &str {
        &self.method
    }

    pub(crate) fn sent_at(&self) -> Duration {
        self.sent_at
    }

    /// Deliver `outcome` and cancel the timer.
    pub(crate) fn settle(mut self, outcome: PeerResult<Value>) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        // The caller may have dropped the future; nothing to report then.
        let _ = self.reply.send(outcome);
    }

    /// Deliver [`PeerError::RequestTimeout`] from the timer itself.
    pub(crate) fn expire(mut self) {
        self.timer = None;
        let _ = self.reply.send(Err(PeerError::RequestTimeout));
    }

    /// Drop the request without notifying anyone, cancelling its timer.
    pub(crate) fn discard(mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Outstanding requests keyed by id.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<RequestId, PendingRequest>,
}

impl PendingTable {
    /// Register `entry` under `id`.
    ///
    /// Ids come from a monotonic factory, so a collision means the counter
    /// wrapped while a request was still outstanding. The older entry is
    /// discarded rather than left unreachable.
    pub(crate) fn insert(&mut self, id: RequestId, entry: PendingRequest) {
        if let Some(previous) = self.entries.insert(id, entry) {
            tracing::warn!(request_id = %id, "request id reused while outstanding");
            previous.settle(Err(PeerError::PeerClosed));
        }
    }

    /// Remove the entry for `id`. This is the commit point for settling it.
    pub(crate) fn take(&mut self, id: RequestId) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    /// Remove every entry.
    pub(crate) fn drain(&mut self) -> Vec<(RequestId, PendingRequest)> {
        self.entries.drain().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
