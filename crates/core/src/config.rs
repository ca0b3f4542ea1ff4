//! Runtime configuration.
//!
//! Loaded from a TOML file with environment overrides for the secrets and
//! endpoints. Everything is hot-reloadable except `chain_id` and `rpc_url`;
//! `CoreContext::reload` enforces that. Validation failures are the only
//! fatal errors in the system.

use std::collections::HashMap;
use std::time::Duration;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assets::AssetInfo;
use crate::state::Bands;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required option: {0}")]
    Missing(&'static str),
    #[error("invalid address for {field}: {value}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("band ordering violated: hf_watch > hf_critical > hf_liquidatable required")]
    BandOrdering,
    #[error("signer_key required when execution is enabled and dry_run is off")]
    MissingSigner,
    #[error("startup-only option {0} cannot be hot-reloaded")]
    StartupOnly(&'static str),
    #[error("config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse: {0}")]
    Parse(#[from] toml::de::Error),
}

/// One asset in the monitored universe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetEntry {
    pub symbol: String,
    pub address: String,
    pub a_token: String,
    pub variable_debt_token: String,
    #[serde(default)]
    pub decimals: Option<u8>,
    #[serde(default)]
    pub liquidation_threshold: Option<f64>,
    #[serde(default)]
    pub native: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Startup-only.
    pub chain_id: u64,
    pub rpc_url: String,
    /// WebSocket endpoint for event subscriptions; falls back to rpc_url.
    #[serde(default)]
    pub ws_url: Option<String>,

    // Contract addresses.
    pub pool_address: String,
    pub oracle_address: String,
    #[serde(default)]
    pub flash_liquidator_address: Option<String>,
    #[serde(default)]
    pub one_inch_router_address: Option<String>,
    #[serde(default = "defaults::one_inch_base_url")]
    pub one_inch_base_url: String,

    // Economics.
    #[serde(default = "defaults::max_slippage_bps")]
    pub max_slippage_bps: u16,
    #[serde(default = "defaults::tx_cache_ttl_blocks")]
    pub tx_cache_ttl_blocks: u64,
    #[serde(default = "defaults::hf_watch")]
    pub hf_watch: f64,
    #[serde(default = "defaults::hf_critical")]
    pub hf_critical: f64,
    #[serde(default = "defaults::hf_liquidatable")]
    pub hf_liquidatable: f64,
    #[serde(default = "defaults::min_profit_usd")]
    pub min_profit_usd: f64,
    #[serde(default = "defaults::max_gas_usd")]
    pub max_gas_usd: f64,
    #[serde(default = "defaults::min_debt_usd")]
    pub min_debt_usd: f64,
    #[serde(default = "defaults::liquidation_bonus_bps")]
    pub liquidation_bonus_bps: u16,

    // Execution switches.
    #[serde(default)]
    pub enable_execution: bool,
    #[serde(default = "defaults::dry_run")]
    pub dry_run: bool,
    #[serde(default = "defaults::max_concurrent_tx")]
    pub max_concurrent_tx: usize,

    // Asset universe.
    #[serde(default)]
    pub assets: Vec<AssetEntry>,
    #[serde(default)]
    pub target_debt_assets: Vec<String>,
    #[serde(default)]
    pub target_collateral_assets: Vec<String>,

    // Price feeds.
    #[serde(default)]
    pub binance_symbols: Vec<String>,
    /// Binance stream symbol (e.g. "ETHUSDT") -> asset address.
    #[serde(default)]
    pub binance_symbol_map: HashMap<String, String>,
    #[serde(default)]
    pub pyth_feed_ids: Vec<String>,
    /// Pyth feed id -> asset address.
    #[serde(default)]
    pub pyth_feed_map: HashMap<String, String>,
    #[serde(default = "defaults::price_stale_ms")]
    pub price_stale_ms: u64,
    #[serde(default = "defaults::price_update_debounce")]
    pub price_update_debounce: u64,

    // Transport.
    #[serde(default = "defaults::relay_mode")]
    pub relay_mode: String,
    #[serde(default)]
    pub private_relay_url: Option<String>,
    #[serde(default)]
    pub signer_key: Option<String>,
    #[serde(default = "defaults::block_poll_interval")]
    pub block_poll_interval: u64,
    #[serde(default)]
    pub event_confirmations: u64,
    #[serde(default = "defaults::tx_timeout_ms")]
    pub tx_timeout_ms: u64,

    // Seed scan.
    #[serde(default = "defaults::seed_lookback_blocks")]
    pub seed_lookback_blocks: u64,
    #[serde(default = "defaults::max_candidates")]
    pub max_candidates: usize,

    // Observability.
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default)]
    pub notifier_webhook_url: Option<String>,
}

mod defaults {
    pub fn one_inch_base_url() -> String {
        "https://api.1inch.dev/swap/v6.0".to_string()
    }
    pub fn max_slippage_bps() -> u16 {
        50
    }
    pub fn tx_cache_ttl_blocks() -> u64 {
        5
    }
    pub fn hf_watch() -> f64 {
        1.10
    }
    pub fn hf_critical() -> f64 {
        1.04
    }
    pub fn hf_liquidatable() -> f64 {
        1.00
    }
    pub fn min_profit_usd() -> f64 {
        50.0
    }
    pub fn max_gas_usd() -> f64 {
        20.0
    }
    pub fn min_debt_usd() -> f64 {
        50.0
    }
    pub fn liquidation_bonus_bps() -> u16 {
        500
    }
    pub fn dry_run() -> bool {
        true
    }
    pub fn max_concurrent_tx() -> usize {
        1
    }
    pub fn price_stale_ms() -> u64 {
        5_000
    }
    pub fn price_update_debounce() -> u64 {
        500
    }
    pub fn relay_mode() -> String {
        "none".to_string()
    }
    pub fn block_poll_interval() -> u64 {
        1_000
    }
    pub fn tx_timeout_ms() -> u64 {
        30_000
    }
    pub fn seed_lookback_blocks() -> u64 {
        100_000
    }
    pub fn max_candidates() -> usize {
        50_000
    }
    pub fn log_level() -> String {
        "info".to_string()
    }
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

impl Config {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Secrets and endpoints may come from the environment instead of the
    /// file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("RPC_URL") {
            self.rpc_url = url;
        }
        if let Ok(url) = std::env::var("WS_URL") {
            self.ws_url = Some(url);
        }
        if let Ok(key) = std::env::var("SIGNER_KEY") {
            self.signer_key = Some(key);
        }
        if let Ok(url) = std::env::var("PRIVATE_RELAY_URL") {
            self.private_relay_url = Some(url);
        }
        if let Ok(url) = std::env::var("NOTIFIER_WEBHOOK_URL") {
            self.notifier_webhook_url = Some(url);
        }
    }

    /// Startup validation. Fatal on failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_url.trim().is_empty() {
            return Err(ConfigError::Missing("rpc_url"));
        }
        if self.pool_address.trim().is_empty() {
            return Err(ConfigError::Missing("pool_address"));
        }
        if !self.bands().is_ordered() {
            return Err(ConfigError::BandOrdering);
        }
        if self.enable_execution && !self.dry_run && self.signer_key.is_none() {
            return Err(ConfigError::MissingSigner);
        }

        self.pool()?;
        self.oracle()?;
        if self.flash_liquidator_address.is_some() {
            self.flash_liquidator()?;
        }
        for entry in &self.assets {
            parse_address("assets.address", &entry.address)?;
            parse_address("assets.a_token", &entry.a_token)?;
            parse_address("assets.variable_debt_token", &entry.variable_debt_token)?;
        }
        for addr in self
            .target_debt_assets
            .iter()
            .chain(self.target_collateral_assets.iter())
        {
            parse_address("target_assets", addr)?;
        }
        Ok(())
    }

    /// Reject changes to startup-only options against a running config.
    pub fn validate_reload(&self, current: &Config) -> Result<(), ConfigError> {
        self.validate()?;
        if self.chain_id != current.chain_id {
            return Err(ConfigError::StartupOnly("chain_id"));
        }
        if self.rpc_url != current.rpc_url {
            return Err(ConfigError::StartupOnly("rpc_url"));
        }
        Ok(())
    }

    pub fn bands(&self) -> Bands {
        Bands {
            watch: self.hf_watch,
            critical: self.hf_critical,
            liquidatable: self.hf_liquidatable,
        }
    }

    pub fn pool(&self) -> Result<Address, ConfigError> {
        parse_address("pool_address", &self.pool_address)
    }

    pub fn oracle(&self) -> Result<Address, ConfigError> {
        parse_address("oracle_address", &self.oracle_address)
    }

    pub fn flash_liquidator(&self) -> Result<Address, ConfigError> {
        let value = self
            .flash_liquidator_address
            .as_deref()
            .ok_or(ConfigError::Missing("flash_liquidator_address"))?;
        parse_address("flash_liquidator_address", value)
    }

    pub fn flash_mode(&self) -> bool {
        self.flash_liquidator_address.is_some()
    }

    pub fn ws_url(&self) -> &str {
        self.ws_url.as_deref().unwrap_or(&self.rpc_url)
    }

    pub fn price_stale(&self) -> Duration {
        Duration::from_millis(self.price_stale_ms)
    }

    pub fn price_debounce(&self) -> Duration {
        Duration::from_millis(self.price_update_debounce)
    }

    pub fn block_poll(&self) -> Duration {
        Duration::from_millis(self.block_poll_interval)
    }

    pub fn tx_timeout(&self) -> Duration {
        Duration::from_millis(self.tx_timeout_ms)
    }

    /// Materialize the asset registry inputs.
    pub fn asset_infos(&self) -> Result<Vec<AssetInfo>, ConfigError> {
        self.assets
            .iter()
            .map(|entry| {
                Ok(AssetInfo {
                    symbol: entry.symbol.clone(),
                    address: parse_address("assets.address", &entry.address)?,
                    a_token: parse_address("assets.a_token", &entry.a_token)?,
                    variable_debt_token: parse_address(
                        "assets.variable_debt_token",
                        &entry.variable_debt_token,
                    )?,
                    liquidation_threshold: entry.liquidation_threshold,
                    native: entry.native,
                })
            })
            .collect()
    }

    pub fn debt_asset_addresses(&self) -> Result<Vec<Address>, ConfigError> {
        self.target_debt_assets
            .iter()
            .map(|a| parse_address("target_debt_assets", a))
            .collect()
    }

    pub fn collateral_asset_addresses(&self) -> Result<Vec<Address>, ConfigError> {
        self.target_collateral_assets
            .iter()
            .map(|a| parse_address("target_collateral_assets", a))
            .collect()
    }

    /// Known decimals from the asset table.
    pub fn known_decimals(&self) -> HashMap<Address, u8> {
        self.assets
            .iter()
            .filter_map(|entry| {
                let addr: Address = entry.address.parse().ok()?;
                Some((addr, entry.decimals?))
            })
            .collect()
    }

    /// Parsed Binance symbol map.
    pub fn binance_map(&self) -> HashMap<String, Address> {
        self.binance_symbol_map
            .iter()
            .filter_map(|(symbol, addr)| Some((symbol.clone(), addr.parse().ok()?)))
            .collect()
    }

    /// Parsed Pyth feed map.
    pub fn pyth_map(&self) -> HashMap<String, Address> {
        self.pyth_feed_map
            .iter()
            .filter_map(|(id, addr)| Some((id.clone(), addr.parse().ok()?)))
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(
            r#"
chain_id = 1
rpc_url = "http://localhost:8545"
pool_address = "0x0000000000000000000000000000000000000000"
oracle_address = "0x0000000000000000000000000000000000000000"
"#,
        )
        .expect("default config literal")
    }
}
