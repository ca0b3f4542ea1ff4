//! Pyth Hermes price connector.
//!
//! Subscribes to the Hermes websocket for the configured feed ids and pushes
//! scaled USD prices into the aggregator channel. Same ownership model as the
//! Binance connector: one background task, bounded-backoff reconnect.

use std::collections::HashMap;

use alloy::primitives::Address;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::feed::{backoff, FeedError, FeedEvent, PriceSource};

const PYTH_WS_URL: &str = "wss://hermes.pyth.network/ws";

/// Pyth Hermes connector.
pub struct PythFeed {
    /// Hex feed ids, without 0x prefix.
    feed_ids: Vec<String>,
    /// Feed id -> internal asset address.
    feed_map: HashMap<String, Address>,
    ws_url: String,
}

#[derive(Debug, serde::Deserialize)]
struct HermesMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    price_feed: Option<HermesPriceFeed>,
}

#[derive(Debug, serde::Deserialize)]
struct HermesPriceFeed {
    id: String,
    price: HermesPrice,
}

#[derive(Debug, serde::Deserialize)]
struct HermesPrice {
    /// Integer price as a decimal string.
    price: String,
    /// Base-10 exponent, typically negative.
    expo: i32,
}

impl PythFeed {
    pub fn new(feed_ids: Vec<String>, feed_map: HashMap<String, Address>) -> Self {
        let normalize = |id: &str| id.trim_start_matches("0x").to_lowercase();
        Self {
            feed_ids: feed_ids.iter().map(|id| normalize(id)).collect(),
            feed_map: feed_map
                .into_iter()
                .map(|(k, v)| (normalize(&k), v))
                .collect(),
            ws_url: PYTH_WS_URL.to_string(),
        }
    }

    /// Override the websocket endpoint (tests, self-hosted Hermes).
    pub fn with_endpoint(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = ws_url.into();
        self
    }

    pub async fn run(
        self,
        tx: mpsc::Sender<FeedEvent>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        if self.feed_ids.is_empty() {
            info!("no pyth feed ids configured, connector idle");
            return;
        }

        let mut attempt = 0u32;
        loop {
            if *shutdown.borrow() {
                return;
            }

            match self.run_once(&tx, &mut shutdown).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(error = %e, attempt, "pyth stream dropped");
                    if tx
                        .send(FeedEvent::Disconnected(PriceSource::Pyth))
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
        let (ws, _) = connect_async(&self.ws_url).await?;
        let (mut sink, mut stream) = ws.split();

        let subscribe = serde_json::json!({
            "type": "subscribe",
            "ids": self.feed_ids,
            "verbose": false,
            "binary": false,
        });
        sink.send(Message::Text(subscribe.to_string())).await?;
        info!(feeds = self.feed_ids.len(), "pyth stream connected");

        tx.send(FeedEvent::Connected(PriceSource::Pyth))
            .await
            .map_err(|_| FeedError::ChannelClosed)?;

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
                            if let Some(event) = self.parse_update(&text) {
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

    fn parse_update(&self, text: &str) -> Option<FeedEvent> {
        let msg: HermesMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "skipping unparsable pyth message");
                return None;
            }
        };

        if msg.kind != "price_update" {
            return None;
        }
        let feed = msg.price_feed?;
        let id = feed.id.trim_start_matches("0x").to_lowercase();
        let asset = *self.feed_map.get(&id)?;

        let raw: i64 = feed.price.price.parse().ok()?;
        let usd = (raw as f64) * 10f64.powi(feed.price.expo);
        if !usd.is_finite() || usd <= 0.0 {
            return None;
        }

        Some(FeedEvent::Price {
            source: PriceSource::Pyth,
            asset,
            usd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> PythFeed {
        let id = "ff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace";
        let mut map = HashMap::new();
        map.insert(id.to_string(), Address::repeat_byte(2));
        PythFeed::new(vec![format!("0x{id}")], map)
    }

    #[test]
    fn test_parse_price_update() {
        let raw = r#"{"type":"price_update","price_feed":{"id":"ff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace","price":{"price":"200012345678","conf":"1","expo":-8,"publish_time":1}}}"#;
        let event = feed().parse_update(raw).expect("update should parse");
        match event {
            FeedEvent::Price { source, asset, usd } => {
                assert_eq!(source, PriceSource::Pyth);
                assert_eq!(asset, Address::repeat_byte(2));
                assert!((usd - 2000.12345678).abs() < 1e-6);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ignores_control_messages() {
        let ack = r#"{"type":"response","status":"success"}"#;
        assert!(feed().parse_update(ack).is_none());
    }

    #[test]
    fn test_parse_unknown_feed() {
        let raw = r#"{"type":"price_update","price_feed":{"id":"deadbeef","price":{"price":"1","expo":0}}}"#;
        assert!(feed().parse_update(raw).is_none());
    }
}
