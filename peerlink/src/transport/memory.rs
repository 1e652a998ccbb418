//! In-process transport pair.
//!
//! Every frame goes through the codec on its way across, so a memory pair
//! exercises the same encode/decode path as a network transport.

use std::cell::Cell;
use std::rc::Rc;

use tokio::sync::mpsc;

use super::{Transport, TransportError, TransportEvent, TransportEvents};
use crate::codec::{JsonCodec, MessageCodec};
use crate::message::Frame;

/// State shared by both ends of a pair.
#[derive(Debug, Default)]
struct Link {
    closed: Cell<bool>,
}

/// One end of a pair together with its event stream.
pub type MemoryEnd<C = JsonCodec> = (MemoryTransport<C>, TransportEvents);

/// One end of an in-process duplex link.
///
/// Closing either end closes the link and delivers exactly one
/// [`TransportEvent::Closed`] to each side. Dropping an end closes it.
pub struct MemoryTransport<C: MessageCodec = JsonCodec> {
    codec: C,
    link: Rc<Link>,
    local: mpsc::UnboundedSender<TransportEvent>,
    remote: mpsc::UnboundedSender<TransportEvent>,
    frames_sent: Cell<u64>,
}

impl MemoryTransport<JsonCodec> {
    /// Create a connected pair using the JSON codec.
    pub fn pair() -> (MemoryEnd, MemoryEnd) {
        Self::pair_with_codec(JsonCodec)
    }
}

impl<C: MessageCodec> MemoryTransport<C> {
    /// Create a connected pair using `codec` for the wire round trip.
    pub fn pair_with_codec(codec: C) -> (MemoryEnd<C>, MemoryEnd<C>) {
        let link = Rc::new(Link::default());
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = MemoryTransport {
            codec: codec.clone(),
            link: link.clone(),
            local: a_tx.clone(),
            remote: b_tx.clone(),
            frames_sent: Cell::new(0),
        };
        let b = MemoryTransport {
            codec,
            link,
            local: b_tx,
            remote: a_tx,
            frames_sent: Cell::new(0),
        };
        ((a, a_rx), (b, b_rx))
    }

    /// Number of frames successfully handed to the other end.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.get()
    }

    /// Whether the link has been closed from either end.
    pub fn is_closed(&self) -> bool {
        self.link.closed.get()
    }
}

impl<C: MessageCodec> Transport for MemoryTransport<C> {
    fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        if self.link.closed.get() {
            return Err(TransportError::Closed);
        }

        let bytes = self.codec.encode(frame)?;
        let decoded: Frame = self.codec.decode(&bytes)?;

        self.remote
            .send(TransportEvent::Message(decoded))
            .map_err(|_| TransportError::Closed)?;
        self.frames_sent.set(self.frames_sent.get() + 1);
        Ok(())
    }

    fn close(&self) {
        if self.link.closed.replace(true) {
            return;
        }
        tracing::trace!("memory transport closed");
        let _ = self.local.send(TransportEvent::Closed);
        let _ = self.remote.send(TransportEvent::Closed);
    }
}

impl<C: MessageCodec> Drop for MemoryTransport<C> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{RequestFrame, RequestId, ResponseFrame};
    use serde_json::json;

    #[test]
    fn test_send_delivers_to_other_end() {
        let ((a, _a_events), (_b, mut b_events)) = MemoryTransport::pair();
        let frame = Frame::Request(RequestFrame::new(RequestId::new(1), "ping", json!(null)));

        a.send(&frame).expect("send should succeed");

        assert_eq!(b_events.try_recv(), Ok(TransportEvent::Message(frame)));
        assert_eq!(a.frames_sent(), 1);
    }

    #[test]
    fn test_close_notifies_both_ends_once() {
        let ((a, mut a_events), (b, mut b_events)) = MemoryTransport::pair();

        a.close();
        a.close();
        b.close();

        assert_eq!(a_events.try_recv(), Ok(TransportEvent::Closed));
        assert_eq!(b_events.try_recv(), Ok(TransportEvent::Closed));
        assert!(a_events.try_recv().is_err());
        assert!(b_events.try_recv().is_err());
        assert!(a.is_closed() && b.is_closed());
    }

    #[test]
    fn test_send_after_close_fails() {
        let ((a, _a_events), (b, _b_events)) = MemoryTransport::pair();
        b.close();

        let frame = Frame::Response(ResponseFrame::success(RequestId::new(1), json!(1)));
        assert_eq!(a.send(&frame), Err(TransportError::Closed));
        assert_eq!(a.frames_sent(), 0);
    }

    #[test]
    fn test_drop_closes_link() {
        let ((a, _a_events), (b, mut b_events)) = MemoryTransport::pair();
        drop(a);

        assert_eq!(b_events.try_recv(), Ok(TransportEvent::Closed));
        assert!(b.is_closed());
    }
}
