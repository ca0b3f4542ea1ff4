//! Shared types for the off-chain price feed connectors.

use alloy::primitives::Address;
use thiserror::Error;

/// Off-chain price feed identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PriceSource {
    Binance,
    Pyth,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Pyth => "pyth",
        }
    }
}

impl std::fmt::Display for PriceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event pushed by a feed connector into the aggregator channel.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// A fresh price observation, already mapped to an internal asset.
    Price {
        source: PriceSource,
        asset: Address,
        usd: f64,
    },
    /// The connector established (or re-established) its stream.
    Connected(PriceSource),
    /// The connector lost its stream; a reconnect is already scheduled.
    Disconnected(PriceSource),
}

/// Connector-level failures. All of them are retried by the connector's own
/// reconnect loop; they surface here only for logging.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed feed message: {0}")]
    Malformed(String),
    #[error("feed channel closed")]
    ChannelClosed,
}

/// Reconnect backoff: 1s doubling, capped at 5s.
pub(crate) fn backoff(attempt: u32) -> std::time::Duration {
    let secs = (1u64 << attempt.min(3)).min(5);
    std::time::Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_bounds() {
        assert_eq!(backoff(0).as_secs(), 1);
        assert_eq!(backoff(1).as_secs(), 2);
        assert_eq!(backoff(2).as_secs(), 4);
        assert_eq!(backoff(3).as_secs(), 5);
        assert_eq!(backoff(10).as_secs(), 5);
    }

    #[test]
    fn test_source_labels() {
        assert_eq!(PriceSource::Binance.as_str(), "binance");
        assert_eq!(PriceSource::Pyth.to_string(), "pyth");
    }
}
