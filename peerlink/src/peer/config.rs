//! Configuration structures for peer behavior.

use std::time::Duration;

/// Default time a request waits for its response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a [`Peer`](super::Peer).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerConfig {
    /// How long an outbound request waits for a matching response before
    /// failing with [`PeerError::RequestTimeout`](super::PeerError::RequestTimeout).
    pub request_timeout: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl PeerConfig {
    /// Set the per-request response timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeout_is_ten_seconds() {
        assert_eq!(PeerConfig::default().request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_with_request_timeout() {
        let config = PeerConfig::default().with_request_timeout(Duration::from_millis(50));
        assert_eq!(config.request_timeout, Duration::from_millis(50));
    }
}
