//! Request counters for a peer.

/// Counters describing a peer's request traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerMetrics {
    /// Requests written to the transport
    pub requests_sent: u64,

    /// Responses that settled a pending request
    pub responses_matched: u64,

    /// Responses dropped because no request was pending under their id
    pub unmatched_responses: u64,

    /// Requests that failed with a timeout
    pub timeouts: u64,

    /// Requests rejected because the peer closed
    pub requests_closed: u64,

    /// Inbound requests surfaced to observers
    pub requests_received: u64,
}
