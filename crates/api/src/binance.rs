//! Binance spot price connector.
//!
//! Subscribes to the combined bookTicker stream for the configured symbols
//! and pushes mid-prices into the aggregator channel. The connection is
//! owned by a background task that reconnects with bounded backoff.

use std::collections::HashMap;

use alloy::primitives::Address;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::feed::{backoff, FeedError, FeedEvent, PriceSource};

const BINANCE_WS_BASE: &str = "wss://stream.binance.com:9443/stream";

/// Binance bookTicker connector.
pub struct BinanceFeed {
    /// Stream symbols, lowercase (e.g. "ethusdt").
    symbols: Vec<String>,
    /// Uppercase stream symbol -> internal asset address.
    symbol_map: HashMap<String, Address>,
    ws_base: String,
}

/// Combined-stream envelope: `{"stream":"ethusdt@bookTicker","data":{...}}`.
#[derive(Debug, serde::Deserialize)]
struct StreamEnvelope {
    stream: String,
    data: BookTicker,
}

#[derive(Debug, serde::Deserialize)]
struct BookTicker {
    /// Best bid price.
    b: String,
    /// Best ask price.
    a: String,
}

impl BinanceFeed {
    pub fn new(symbols: Vec<String>, symbol_map: HashMap<String, Address>) -> Self {
        Self {
            symbols: symbols.iter().map(|s| s.to_lowercase()).collect(),
            symbol_map: symbol_map
                .into_iter()
                .map(|(k, v)| (k.to_uppercase(), v))
                .collect(),
            ws_base: BINANCE_WS_BASE.to_string(),
        }
    }

    /// Override the websocket endpoint (tests, mirrors).
    pub fn with_endpoint(mut self, ws_base: impl Into<String>) -> Self {
        self.ws_base = ws_base.into();
        self
    }

    fn stream_url(&self) -> String {
        let streams: Vec<String> = self
            .symbols
            .iter()
            .map(|s| format!("{s}@bookTicker"))
            .collect();
        format!("{}?streams={}", self.ws_base, streams.join("/"))
    }

    /// Run the connector until the receiving side of `tx` goes away or
    /// `shutdown` flips. Reconnects forever with bounded backoff.
    pub async fn run(
        self,
        tx: mpsc::Sender<FeedEvent>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        if self.symbols.is_empty() {
            info!("no binance symbols configured, connector idle");
            return;
        }

        let mut attempt = 0u32;
        loop {
            if *shutdown.borrow() {
                return;
            }

            match self.run_once(&tx, &mut shutdown).await {
                Ok(()) => return, // clean shutdown
                Err(e) => {
                    warn!(error = %e, attempt, "binance stream dropped");
                    if tx
                        .send(FeedEvent::Disconnected(PriceSource::Binance))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }

            let delay = backoff(attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    async fn run_once(
        &self,
        tx: &mpsc::Sender<FeedEvent>,
        shutdown: &mut tokio::sync::watch::Receiver<bool>,
    ) -> Result<(), FeedError> {
        let url = self.stream_url();
        let (ws, _) = connect_async(&url).await?;
        info!(symbols = self.symbols.len(), "binance stream connected");

        tx.send(FeedEvent::Connected(PriceSource::Binance))
            .await
            .map_err(|_| FeedError::ChannelClosed)?;

        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                msg = stream.next() => {
                    let Some(msg) = msg else {
                        return Err(FeedError::Malformed("stream ended".into()));
                    };
                    match msg? {
                        Message::Text(text) => {
                            if let Some(event) = self.parse_tick(&text) {
                                tx.send(event).await.map_err(|_| FeedError::ChannelClosed)?;
                            }
                        }
                        Message::Ping(payload) => {
                            sink.send(Message::Pong(payload)).await?;
                        }
                        Message::Close(_) => {
                            return Err(FeedError::Malformed("server closed stream".into()));
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Parse one combined-stream message into a price event. Unknown symbols
    /// and unparsable quotes are dropped, not errors.
    fn parse_tick(&self, text: &str) -> Option<FeedEvent> {
        let envelope: StreamEnvelope = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "skipping unparsable binance message");
                return None;
            }
        };

        let symbol = envelope
            .stream
            .split('@')
            .next()
            .unwrap_or_default()
            .to_uppercase();
        let asset = *self.symbol_map.get(&symbol)?;

        let bid: f64 = envelope.data.b.parse().ok()?;
        let ask: f64 = envelope.data.a.parse().ok()?;
        let mid = (bid + ask) / 2.0;
        if !mid.is_finite() || mid <= 0.0 {
            return None;
        }

        Some(FeedEvent::Price {
            source: PriceSource::Binance,
            asset,
            usd: mid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> BinanceFeed {
        let mut map = HashMap::new();
        map.insert("ETHUSDT".to_string(), Address::repeat_byte(1));
        BinanceFeed::new(vec!["ETHUSDT".to_string()], map)
    }

    #[test]
    fn test_stream_url() {
        let url = feed().stream_url();
        assert!(url.ends_with("?streams=ethusdt@bookTicker"));
    }

    #[test]
    fn test_parse_tick_mid_price() {
        let raw = r#"{"stream":"ethusdt@bookTicker","data":{"u":1,"s":"ETHUSDT","b":"1999.50","B":"1","a":"2000.50","A":"1"}}"#;
        let event = feed().parse_tick(raw).expect("tick should parse");
        match event {
            FeedEvent::Price { source, asset, usd } => {
                assert_eq!(source, PriceSource::Binance);
                assert_eq!(asset, Address::repeat_byte(1));
                assert!((usd - 2000.0).abs() < 1e-9);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_tick_unknown_symbol() {
        let raw = r#"{"stream":"btcusdt@bookTicker","data":{"b":"100","a":"101"}}"#;
        assert!(feed().parse_tick(raw).is_none());
    }

    #[test]
    fn test_parse_tick_garbage() {
        assert!(feed().parse_tick("not json").is_none());
        let negative = r#"{"stream":"ethusdt@bookTicker","data":{"b":"-5","a":"-4"}}"#;
        assert!(feed().parse_tick(negative).is_none());
    }
}
