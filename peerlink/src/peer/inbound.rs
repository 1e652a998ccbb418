//! Inbound requests and the handle used to answer them.
//!
//! An [`InboundRequest`] is handed to observers through
//! [`PeerEvent::Request`](super::PeerEvent::Request). Answering may happen
//! at any time later, for example after a database lookup. The
//! [`Responder`] is consumed by [`accept`](Responder::accept) or
//! [`reject`](Responder::reject), so a request can be answered at most once.

use std::fmt;
use std::rc::Weak;

use serde_json::Value;
use tracing::debug;

use super::error::{PeerError, PeerResult};
use crate::message::{build_error_response, build_success_response, RequestFrame, ResponseFrame};

/// Where a responder writes its answer.
pub(crate) trait ResponseSink {
    fn respond(&self, frame: ResponseFrame) -> PeerResult<()>;
}

/// Single-use handle answering one inbound request.
///
/// Dropping it without answering sends nothing; the remote side then sees
/// its request time out.
pub struct Responder {
    peer: Weak<dyn ResponseSink>,
    request: RequestFrame,
    responded: bool,
}

impl Responder {
    pub(crate) fn new(peer: Weak<dyn ResponseSink>, request: RequestFrame) -> Self {
        Self {
            peer,
            request,
            responded: false,
        }
    }

    /// Answer with `ok = true` and `data`.
    ///
    /// # Errors
    ///
    /// [`PeerError::PeerClosed`] if the peer is closed or gone, or the
    /// transport's write failure.
    pub fn accept(mut self, data: Value) -> PeerResult<()> {
        let frame = build_success_response(&self.request, data);
        self.respond(frame)
    }

    /// Answer with `ok = false`, `reason` and `code`.
    ///
    /// # Errors
    ///
    /// Same as [`accept`](Responder::accept).
    pub fn reject(mut self, reason: impl Into<String>, code: i64) -> PeerResult<()> {
        let frame = build_error_response(&self.request, reason, code);
        self.respond(frame)
    }

    fn respond(&mut self, frame: ResponseFrame) -> PeerResult<()> {
        self.responded = true;
        let peer = self.peer.upgrade().ok_or(PeerError::PeerClosed)?;
        peer.respond(frame)
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if !self.responded {
            debug!(
                request_id = %self.request.id,
                method = %self.request.method,
                "inbound request dropped without a response"
            );
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("request_id", &self.request.id)
            .field("responded", &self.responded)
            .finish()
    }
}

/// A request received from the remote peer.
#[derive(Debug)]
pub struct InboundRequest {
    responder: Responder,
}

impl InboundRequest {
    pub(crate) fn new(responder: Responder) -> Self {
        Self { responder }
    }

    /// The request as it arrived.
    pub fn frame(&self) -> &RequestFrame {
        &self.responder.request
    }

    /// Name of the requested operation.
    pub fn method(&self) -> &str {
        &self.responder.request.method
    }

    /// Request payload.
    pub fn data(&self) -> &Value {
        &self.responder.request.data
    }

    /// Accept the request. See [`Responder::accept`].
    pub fn accept(self, data: Value) -> PeerResult<()> {
        self.responder.accept(data)
    }

    /// Reject the request. See [`Responder::reject`].
    pub fn reject(self, reason: impl Into<String>, code: i64) -> PeerResult<()> {
        self.responder.reject(reason, code)
    }

    /// Split into the request frame and its responder, to answer elsewhere.
    pub fn into_parts(self) -> (RequestFrame, Responder) {
        let frame = self.responder.request.clone();
        (frame, self.responder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RequestId;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Collect {
        frames: RefCell<Vec<ResponseFrame>>,
    }

    impl ResponseSink for Collect {
        fn respond(&self, frame: ResponseFrame) -> PeerResult<()> {
            self.frames.borrow_mut().push(frame);
            Ok(())
        }
    }

    fn inbound(sink: &Rc<Collect>) -> InboundRequest {
        let sink: Rc<dyn ResponseSink> = sink.clone();
        let frame = RequestFrame::new(RequestId::new(8), "lookup", Value::from("key"));
        InboundRequest::new(Responder::new(Rc::downgrade(&sink), frame))
    }

    #[test]
    fn test_accept_writes_success() {
        let sink = Rc::new(Collect::default());
        let request = inbound(&sink);
        assert_eq!(request.method(), "lookup");
        assert_eq!(request.data(), &Value::from("key"));

        request.accept(Value::from(42)).expect("accept");

        let frames = sink.frames.borrow();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], ResponseFrame::success(RequestId::new(8), Value::from(42)));
    }

    #[test]
    fn test_reject_writes_failure() {
        let sink = Rc::new(Collect::default());
        inbound(&sink).reject("not allowed", 403).expect("reject");

        let frames = sink.frames.borrow();
        assert_eq!(
            frames[0],
            ResponseFrame::failure(RequestId::new(8), "not allowed", 403)
        );
    }

    #[test]
    fn test_answer_after_peer_gone() {
        let sink = Rc::new(Collect::default());
        let request = inbound(&sink);
        drop(sink);

        assert_eq!(request.accept(Value::Null), Err(PeerError::PeerClosed));
    }

    #[test]
    fn test_dropped_responder_sends_nothing() {
        let sink = Rc::new(Collect::default());
        let (frame, responder) = inbound(&sink).into_parts();
        assert_eq!(frame.id, RequestId::new(8));
        drop(responder);

        assert!(sink.frames.borrow().is_empty());
    }
}
