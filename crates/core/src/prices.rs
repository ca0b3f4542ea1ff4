//! Price aggregator: feed fan-in, debounce, liveness, and the execution
//! policy gate.
//!
//! Two connectors push into the aggregator; per-asset slots are
//! last-writer-wins. Emission toward the recompute fan-out is debounced per
//! asset so a burst of ticks inside one window produces exactly one
//! notification. The staleness predicate (a warn-signal used during
//! preparation) and the policy gate (the hard execution gate) are distinct
//! on purpose: one stale source should not stop an execution another live
//! source can still justify, but total silence must.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::Address;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use vigil_api::{FeedEvent, PriceSource};

/// A cached price observation. Immutable; updates replace the slot.
#[derive(Debug, Clone, Copy)]
pub struct Price {
    pub asset: Address,
    pub usd: f64,
    pub captured_at: Instant,
    pub source: PriceSource,
}

#[derive(Debug)]
struct SourceHealth {
    configured: bool,
    connected: AtomicBool,
    last_update: Mutex<Option<Instant>>,
}

impl SourceHealth {
    fn new(configured: bool) -> Self {
        Self {
            configured,
            connected: AtomicBool::new(false),
            last_update: Mutex::new(None),
        }
    }

    fn touch(&self) {
        self.connected.store(true, Ordering::Relaxed);
        *self.last_update.lock() = Some(Instant::now());
    }

    fn is_live(&self, stale_after: Duration) -> bool {
        self.configured
            && self.connected.load(Ordering::Relaxed)
            && self
                .last_update
                .lock()
                .is_some_and(|at| at.elapsed() <= stale_after)
    }

    /// Stale = configured, connected, and quiet for longer than the window
    /// (a connected source that never delivered counts as stale).
    fn is_stale(&self, stale_after: Duration) -> bool {
        self.configured
            && self.connected.load(Ordering::Relaxed)
            && !self
                .last_update
                .lock()
                .is_some_and(|at| at.elapsed() <= stale_after)
    }
}

/// Multi-source price fan-in with debounced change notification.
pub struct PriceAggregator {
    slots: DashMap<Address, Price>,
    /// Debounce generation per asset; a newer write supersedes the pending
    /// emission of an older one.
    generations: DashMap<Address, u64>,
    binance: SourceHealth,
    pyth: SourceHealth,
    stale_after_ms: AtomicU64,
    debounce_ms: AtomicU64,
    update_tx: broadcast::Sender<Address>,
}

impl PriceAggregator {
    pub fn new(
        binance_configured: bool,
        pyth_configured: bool,
        stale_after: Duration,
        debounce: Duration,
    ) -> Arc<Self> {
        let (update_tx, _) = broadcast::channel(1024);
        Arc::new(Self {
            slots: DashMap::new(),
            generations: DashMap::new(),
            binance: SourceHealth::new(binance_configured),
            pyth: SourceHealth::new(pyth_configured),
            stale_after_ms: AtomicU64::new(stale_after.as_millis() as u64),
            debounce_ms: AtomicU64::new(debounce.as_millis() as u64),
            update_tx,
        })
    }

    /// Debounced per-asset change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Address> {
        self.update_tx.subscribe()
    }

    /// Apply one connector event.
    pub fn handle_feed_event(self: &Arc<Self>, event: FeedEvent) {
        match event {
            FeedEvent::Price { source, asset, usd } => {
                self.health(source).touch();
                self.slots.insert(
                    asset,
                    Price {
                        asset,
                        usd,
                        captured_at: Instant::now(),
                        source,
                    },
                );
                trace!(asset = %asset, usd, source = %source, "price slot updated");
                self.schedule_emission(asset);
            }
            FeedEvent::Connected(source) => {
                self.health(source).connected.store(true, Ordering::Relaxed);
                debug!(source = %source, "price source connected");
            }
            FeedEvent::Disconnected(source) => {
                self.health(source)
                    .connected
                    .store(false, Ordering::Relaxed);
                warn!(source = %source, "price source disconnected");
            }
        }
    }

    /// Defer the asset notification by the debounce window; any further
    /// write within the window supersedes this one. Exactly one
    /// notification per quiet period per asset.
    fn schedule_emission(self: &Arc<Self>, asset: Address) {
        let generation = {
            let mut entry = self.generations.entry(asset).or_insert(0);
            *entry += 1;
            *entry
        };

        let debounce = Duration::from_millis(self.debounce_ms.load(Ordering::Relaxed));
        let aggregator = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let still_current = aggregator
                .generations
                .get(&asset)
                .is_some_and(|g| *g == generation);
            if still_current {
                // receivers may lag or be absent; both are fine
                let _ = aggregator.update_tx.send(asset);
            }
        });
    }

    pub fn price(&self, asset: &Address) -> Option<Price> {
        self.slots.get(asset).map(|p| *p)
    }

    pub fn price_usd(&self, asset: &Address) -> Option<f64> {
        self.slots.get(asset).map(|p| p.usd)
    }

    fn health(&self, source: PriceSource) -> &SourceHealth {
        match source {
            PriceSource::Binance => &self.binance,
            PriceSource::Pyth => &self.pyth,
        }
    }

    fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms.load(Ordering::Relaxed))
    }

    pub fn is_live(&self, source: PriceSource) -> bool {
        self.health(source).is_live(self.stale_after())
    }

    /// Hard execution gate: at least one configured source must be live.
    /// One reputable source is enough; total silence forbids dispatch.
    pub fn can_execute(&self) -> bool {
        let stale_after = self.stale_after();
        self.binance.is_live(stale_after) || self.pyth.is_live(stale_after)
    }

    /// Preparation warn-signal: any configured-and-connected source has
    /// gone quiet past the window.
    pub fn is_stale(&self) -> bool {
        let stale_after = self.stale_after();
        self.binance.is_stale(stale_after) || self.pyth.is_stale(stale_after)
    }

    /// True when no configured source currently holds a connection.
    pub fn all_disconnected(&self) -> bool {
        let connected = |h: &SourceHealth| h.configured && h.connected.load(Ordering::Relaxed);
        !connected(&self.binance) && !connected(&self.pyth)
    }

    /// Apply hot-reloaded timing parameters.
    pub fn set_timing(&self, stale_after: Duration, debounce: Duration) {
        self.stale_after_ms
            .store(stale_after.as_millis() as u64, Ordering::Relaxed);
        self.debounce_ms
            .store(debounce.as_millis() as u64, Ordering::Relaxed);
    }
}
