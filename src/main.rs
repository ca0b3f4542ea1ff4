//! Event-driven liquidation agent for an Aave-v3-style pool.
//!
//! Wires the core engine to its collaborators: the RPC provider, the pool
//! event stream, the two off-chain price feeds, the swap quoter, and the
//! notifier, then runs until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vigil_api::{
    BinanceFeed, FeedEvent, Notifier, NullNotifier, OneInchQuoter, PythFeed, SwapQuoter,
    WebhookNotifier,
};
use vigil_chain::{ChainClient, PoolEventStream, RelayMode, RpcProvider, TransactionSender};
use vigil_core::{BlockLoop, Config, CoreContext, EventRouter, Pipeline};

const DEFAULT_CONFIG_PATH: &str = "vigil.toml";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config_path =
        std::env::var("VIGIL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    config.validate().context("configuration invalid")?;
    info!(
        chain_id = config.chain_id,
        pool = %config.pool_address,
        flash_mode = config.flash_mode(),
        enable_execution = config.enable_execution,
        dry_run = config.dry_run,
        relay = %config.relay_mode,
        event_confirmations = config.event_confirmations,
        "starting liquidation agent"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Chain client, with a signer only when live execution is configured.
    let relay = RelayMode::parse(&config.relay_mode, config.private_relay_url.as_deref())?;
    let sender = match (&config.signer_key, config.enable_execution && !config.dry_run) {
        (Some(key), true) => Some(
            TransactionSender::new(key, &config.rpc_url, &relay, config.chain_id)
                .await
                .context("initializing transaction sender")?,
        ),
        _ => None,
    };
    let chain: Arc<dyn ChainClient> = Arc::new(RpcProvider::new(
        config.rpc_url.clone(),
        config.pool()?,
        config.oracle()?,
        sender,
    ));

    // Swap quoter: required in flash mode.
    let quoter: Arc<dyn SwapQuoter> = {
        let router_address = config
            .one_inch_router_address
            .as_deref()
            .unwrap_or("0x0000000000000000000000000000000000000000")
            .parse()
            .context("invalid one_inch_router_address")?;
        let base_url = format!("{}/{}", config.one_inch_base_url, config.chain_id);
        Arc::new(OneInchQuoter::new(
            base_url,
            router_address,
            config.max_slippage_bps,
        ))
    };

    let notifier: Arc<dyn Notifier> = match &config.notifier_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(NullNotifier),
    };

    let ws_url = config.ws_url().to_string();
    let pool_address = config.pool()?;

    let ctx = CoreContext::new(config.clone(), chain, quoter, notifier)?;
    let pipeline = Arc::new(Pipeline::new(ctx.clone()));
    let router = EventRouter::new(ctx.clone(), pipeline.clone());

    let mut tasks = Vec::new();

    // Price feed connectors push into one channel; the pump forwards into
    // the aggregator.
    let (feed_tx, mut feed_rx) = mpsc::channel::<FeedEvent>(1_024);

    let binance = BinanceFeed::new(config.binance_symbols.clone(), config.binance_map());
    tasks.push(tokio::spawn(binance.run(feed_tx.clone(), shutdown_rx.clone())));

    let pyth = PythFeed::new(config.pyth_feed_ids.clone(), config.pyth_map());
    tasks.push(tokio::spawn(pyth.run(feed_tx.clone(), shutdown_rx.clone())));
    drop(feed_tx);

    {
        let prices = ctx.prices.clone();
        let mut shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    event = feed_rx.recv() => match event {
                        Some(event) => prices.handle_feed_event(event),
                        None => return,
                    },
                }
            }
        }));
    }

    // Recompute fan-out.
    tasks.push(tokio::spawn(
        router.clone().run_fanout(shutdown_rx.clone()),
    ));

    // Pool event subscription with reconnect.
    {
        let router = router.clone();
        let mut shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let stream_source = PoolEventStream::new(ws_url, pool_address);
            loop {
                if *shutdown.borrow() {
                    return;
                }
                match stream_source.subscribe().await {
                    Ok(mut events) => loop {
                        tokio::select! {
                            _ = shutdown.changed() => return,
                            event = events.next() => match event {
                                Some(event) => router.handle_event(event).await,
                                None => {
                                    warn!("pool event stream ended, resubscribing");
                                    break;
                                }
                            },
                        }
                    },
                    Err(e) => {
                        error!(error = %e, "pool event subscription failed");
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {}
                    _ = shutdown.changed() => return,
                }
            }
        }));
    }

    // Block loop.
    let block_loop = BlockLoop::new(ctx.clone(), pipeline.clone());
    tasks.push(tokio::spawn(block_loop.run(shutdown_rx.clone())));

    info!("all components running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, stopping components");
    let _ = shutdown_tx.send(true);

    // In-flight executions may finish up to the confirmation timeout.
    let grace = ctx.config().tx_timeout();
    let drain = async {
        for task in tasks {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!("shutdown grace period elapsed with tasks still running");
    }

    info!("shutdown complete");
    Ok(())
}
