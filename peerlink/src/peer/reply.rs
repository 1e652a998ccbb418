//! Caller-side future for an outbound request.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;

use super::error::{PeerError, PeerResult};
use crate::message::RequestId;

/// Resolves once the request with [`id`](ReplyFuture::id) settles.
///
/// Yields the response data, or one of [`PeerError::Remote`],
/// [`PeerError::RequestTimeout`] and [`PeerError::PeerClosed`]. If the
/// owning peer is dropped the future resolves with `PeerClosed`.
#[must_use = "a reply future does nothing unless awaited"]
pub struct ReplyFuture {
    id: RequestId,
    receiver: oneshot::Receiver<PeerResult<Value>>,
}

impl ReplyFuture {
    pub(crate) fn new(id: RequestId, receiver: oneshot::Receiver<PeerResult<Value>>) -> Self {
        Self { id, receiver }
    }

    /// Id of the request this future waits on.
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Future for ReplyFuture {
    type Output = PeerResult<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(PeerError::PeerClosed)))
    }
}
