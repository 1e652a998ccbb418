//! End-to-end behavior of two peers connected by an in-memory transport.
//!
//! Covers the request lifecycle: resolution, remote rejection, timeouts,
//! stray responses, and the close/cleanup path.

use std::time::Duration;

use peerlink::{
    Frame, MemoryTransport, Peer, PeerConfig, PeerError, PeerEvent, PeerEvents, RequestId,
    ResponseFrame, TokioProviders, Transport, TransportEvents,
};
use serde_json::{json, Value};
use tokio::task::LocalSet;

fn peer_pair(timeout: Duration) -> (Peer, Peer) {
    let ((a, a_events), (b, b_events)) = MemoryTransport::pair();
    let config = PeerConfig::default().with_request_timeout(timeout);
    let alice = Peer::new("bob", a, a_events, TokioProviders::new(), config.clone());
    let bob = Peer::new("alice", b, b_events, TokioProviders::new(), config);
    (alice, bob)
}

/// A peer facing a bare transport end, so tests can inject raw frames.
fn peer_and_raw(timeout: Duration) -> (Peer, MemoryTransport, TransportEvents) {
    let ((a, a_events), (raw, raw_events)) = MemoryTransport::pair();
    let config = PeerConfig::default().with_request_timeout(timeout);
    let peer = Peer::new("raw", a, a_events, TokioProviders::new(), config);
    (peer, raw, raw_events)
}

/// Answer every inbound request using `respond`.
fn serve<F>(mut events: PeerEvents, respond: F)
where
    F: Fn(peerlink::InboundRequest) + 'static,
{
    tokio::task::spawn_local(async move {
        while let Some(event) = events.recv().await {
            match event {
                PeerEvent::Request(request) => respond(request),
                PeerEvent::Closed => break,
            }
        }
    });
}

async fn next_request_id(raw_events: &mut TransportEvents) -> RequestId {
    match raw_events.recv().await {
        Some(peerlink::TransportEvent::Message(Frame::Request(request))) => request.id,
        other => panic!("expected request frame, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_ping_resolves_with_pong() {
    LocalSet::new()
        .run_until(async {
            let (alice, bob) = peer_pair(Duration::from_secs(10));
            serve(bob.take_events().expect("events"), |request| {
                assert_eq!(request.method(), "ping");
                request.accept(json!("pong")).expect("accept");
            });

            let start = tokio::time::Instant::now();
            let pong = alice.send("ping", Value::Null).await;

            assert_eq!(pong, Ok(json!("pong")));
            assert!(start.elapsed() < Duration::from_millis(100));
            assert_eq!(alice.pending_count(), 0);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_times_out() {
    LocalSet::new()
        .run_until(async {
            let (alice, bob) = peer_pair(Duration::from_millis(50));
            let _silent = bob.take_events().expect("events");

            let start = tokio::time::Instant::now();
            let result = alice.send("ping", Value::Null).await;

            assert_eq!(result, Err(PeerError::RequestTimeout));
            assert!(start.elapsed() >= Duration::from_millis(50));
            assert_eq!(alice.pending_count(), 0);
            assert_eq!(alice.metrics().timeouts, 1);
            assert!(!alice.is_closed());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_reject_surfaces_remote_error() {
    LocalSet::new()
        .run_until(async {
            let (alice, bob) = peer_pair(Duration::from_secs(10));
            serve(bob.take_events().expect("events"), |request| {
                request.reject("not allowed", 403).expect("reject");
            });

            let result = alice.send("delete", json!({"key": "a"})).await;

            assert_eq!(
                result,
                Err(PeerError::Remote {
                    reason: "not allowed".to_string(),
                    code: 403
                })
            );
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_late_answer_after_delay() {
    LocalSet::new()
        .run_until(async {
            let (alice, bob) = peer_pair(Duration::from_secs(10));
            let mut events = bob.take_events().expect("events");
            tokio::task::spawn_local(async move {
                if let Some(PeerEvent::Request(request)) = events.recv().await {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    request.accept(json!({"rows": 3})).expect("accept");
                }
            });

            assert_eq!(alice.send("query", Value::Null).await, Ok(json!({"rows": 3})));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_unmatched_response_is_ignored() {
    LocalSet::new()
        .run_until(async {
            let (peer, raw, mut raw_events) = peer_and_raw(Duration::from_secs(10));
            let reply = peer.request("ping", Value::Null).expect("request");
            let id = next_request_id(&mut raw_events).await;

            let stray = ResponseFrame::success(RequestId::new(id.as_u64() + 1000), json!("?"));
            raw.send(&Frame::Response(stray)).expect("send stray");
            raw.send(&Frame::Response(ResponseFrame::success(id, json!("pong"))))
                .expect("send response");

            assert_eq!(reply.await, Ok(json!("pong")));
            assert!(!peer.is_closed());
            assert_eq!(peer.metrics().unmatched_responses, 1);
            assert_eq!(peer.metrics().responses_matched, 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_response_after_timeout_does_not_double_settle() {
    LocalSet::new()
        .run_until(async {
            let (peer, raw, mut raw_events) = peer_and_raw(Duration::from_millis(50));
            let reply = peer.request("slow", Value::Null).expect("request");
            let id = next_request_id(&mut raw_events).await;

            assert_eq!(reply.await, Err(PeerError::RequestTimeout));

            raw.send(&Frame::Response(ResponseFrame::success(id, json!("late"))))
                .expect("send late response");
            tokio::time::sleep(Duration::from_millis(10)).await;

            let metrics = peer.metrics();
            assert_eq!(metrics.timeouts, 1);
            assert_eq!(metrics.unmatched_responses, 1);
            assert_eq!(metrics.responses_matched, 0);
            assert!(!peer.is_closed());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_response_before_timeout_cancels_timer() {
    LocalSet::new()
        .run_until(async {
            let (alice, bob) = peer_pair(Duration::from_millis(50));
            serve(bob.take_events().expect("events"), |request| {
                request.accept(Value::Null).expect("accept");
            });

            assert_eq!(alice.send("ping", Value::Null).await, Ok(Value::Null));
            tokio::time::sleep(Duration::from_millis(200)).await;

            assert_eq!(alice.metrics().timeouts, 0);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_responses() {
    LocalSet::new()
        .run_until(async {
            let (peer, raw, mut raw_events) = peer_and_raw(Duration::from_secs(10));
            let first = peer.request("a", Value::Null).expect("request a");
            let second = peer.request("b", Value::Null).expect("request b");
            let first_id = next_request_id(&mut raw_events).await;
            let second_id = next_request_id(&mut raw_events).await;
            assert_ne!(first_id, second_id);

            raw.send(&Frame::Response(ResponseFrame::success(second_id, json!("b"))))
                .expect("send");
            raw.send(&Frame::Response(ResponseFrame::failure(first_id, "busy", 503)))
                .expect("send");

            assert_eq!(second.await, Ok(json!("b")));
            assert_eq!(
                first.await,
                Err(PeerError::Remote {
                    reason: "busy".to_string(),
                    code: 503
                })
            );
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_close_rejects_pending_requests() {
    LocalSet::new()
        .run_until(async {
            let (alice, bob) = peer_pair(Duration::from_secs(10));
            let _silent = bob.take_events().expect("events");

            let first = alice.request("a", Value::Null).expect("request");
            let second = alice.request("b", Value::Null).expect("request");
            assert_eq!(alice.pending_count(), 2);

            alice.close();

            assert_eq!(first.await, Err(PeerError::PeerClosed));
            assert_eq!(second.await, Err(PeerError::PeerClosed));
            assert_eq!(alice.pending_count(), 0);
            assert_eq!(alice.metrics().requests_closed, 2);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_send_after_close_fails_immediately() {
    LocalSet::new()
        .run_until(async {
            let (peer, _raw, mut raw_events) = peer_and_raw(Duration::from_secs(10));
            peer.close();

            assert_eq!(peer.send("ping", Value::Null).await, Err(PeerError::PeerClosed));

            // Only the closure notification reaches the other end.
            assert_eq!(raw_events.recv().await, Some(peerlink::TransportEvent::Closed));
            assert!(raw_events.try_recv().is_err());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_close_is_idempotent() {
    LocalSet::new()
        .run_until(async {
            let (alice, bob) = peer_pair(Duration::from_secs(10));
            let mut events = alice.take_events().expect("events");

            alice.close();
            alice.close();
            // The remote noticing the disconnect must not add a second event.
            bob.closed().await;
            tokio::time::sleep(Duration::from_millis(10)).await;

            assert!(matches!(events.recv().await, Some(PeerEvent::Closed)));
            assert!(events.try_recv().is_err());
            assert!(alice.is_closed());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_remote_close_closes_peer() {
    LocalSet::new()
        .run_until(async {
            let (alice, bob) = peer_pair(Duration::from_secs(10));
            let mut events = alice.take_events().expect("events");
            let _silent = bob.take_events().expect("events");
            let pending = alice.request("ping", Value::Null).expect("request");

            bob.close();

            assert_eq!(pending.await, Err(PeerError::PeerClosed));
            assert!(matches!(events.recv().await, Some(PeerEvent::Closed)));
            assert!(alice.is_closed());

            // A later explicit close is a no-op.
            alice.close();
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(events.try_recv().is_err());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_both_directions_concurrently() {
    LocalSet::new()
        .run_until(async {
            let (alice, bob) = peer_pair(Duration::from_secs(10));
            serve(alice.take_events().expect("events"), |request| {
                request.accept(json!("from alice")).expect("accept");
            });
            serve(bob.take_events().expect("events"), |request| {
                request.accept(json!("from bob")).expect("accept");
            });

            let (to_bob, to_alice) = tokio::join!(
                alice.send("hello", Value::Null),
                bob.send("hello", Value::Null)
            );

            assert_eq!(to_bob, Ok(json!("from bob")));
            assert_eq!(to_alice, Ok(json!("from alice")));
        })
        .await;
}
