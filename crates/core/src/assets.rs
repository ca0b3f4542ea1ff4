//! Asset registry.
//!
//! Configured assets with their token contracts, the interest-bearing and
//! variable-debt tokens the event router reads balances from, liquidation
//! thresholds, and a process-wide decimals cache. Decimals for assets the
//! config does not pin are resolved lazily over RPC and memoized, with a
//! last-known-good fallback when the refetch fails.

use std::collections::HashMap;

use alloy::primitives::Address;
use anyhow::Result;
use dashmap::DashMap;
use tracing::{debug, warn};

use vigil_chain::ChainClient;

/// Threshold applied when an asset has no configured liquidation threshold.
pub const DEFAULT_LIQUIDATION_THRESHOLD: f64 = 0.75;

/// One configured asset.
#[derive(Debug, Clone)]
pub struct AssetInfo {
    pub symbol: String,
    /// Underlying token contract.
    pub address: Address,
    /// Interest-bearing token tracking supplied collateral.
    pub a_token: Address,
    /// Variable-debt token tracking borrowed amounts.
    pub variable_debt_token: Address,
    /// Fraction of value counting toward collateralization, in [0, 1].
    pub liquidation_threshold: Option<f64>,
    /// Chain-native gas asset marker (exactly one per deployment).
    pub native: bool,
}

/// Registry over the configured asset universe plus the decimals cache.
pub struct AssetRegistry {
    assets: HashMap<Address, AssetInfo>,
    collateral: Vec<Address>,
    debt: Vec<Address>,
    native: Option<Address>,
    decimals: DashMap<Address, u8>,
}

impl AssetRegistry {
    pub fn new(
        assets: Vec<AssetInfo>,
        collateral: Vec<Address>,
        debt: Vec<Address>,
        known_decimals: HashMap<Address, u8>,
    ) -> Self {
        let native = assets.iter().find(|a| a.native).map(|a| a.address);
        let decimals = DashMap::new();
        for (asset, dec) in known_decimals {
            decimals.insert(asset, dec);
        }

        Self {
            assets: assets.into_iter().map(|a| (a.address, a)).collect(),
            collateral,
            debt,
            native,
            decimals,
        }
    }

    pub fn get(&self, asset: &Address) -> Option<&AssetInfo> {
        self.assets.get(asset)
    }

    /// Configured collateral universe, in configured order.
    pub fn collateral_assets(&self) -> &[Address] {
        &self.collateral
    }

    /// Configured debt universe, in configured order.
    pub fn debt_assets(&self) -> &[Address] {
        &self.debt
    }

    /// The chain-native gas asset, when configured.
    pub fn native_asset(&self) -> Option<Address> {
        self.native
    }

    pub fn a_token(&self, asset: &Address) -> Option<Address> {
        self.assets.get(asset).map(|a| a.a_token)
    }

    pub fn variable_debt_token(&self, asset: &Address) -> Option<Address> {
        self.assets.get(asset).map(|a| a.variable_debt_token)
    }

    /// Liquidation threshold with the protocol-wide fallback.
    pub fn liquidation_threshold(&self, asset: &Address) -> f64 {
        self.assets
            .get(asset)
            .and_then(|a| a.liquidation_threshold)
            .unwrap_or(DEFAULT_LIQUIDATION_THRESHOLD)
    }

    /// Cached decimals, if known.
    pub fn decimals(&self, asset: &Address) -> Option<u8> {
        self.decimals.get(asset).map(|d| *d)
    }

    /// Resolve decimals, hitting the chain once per unknown asset. A failed
    /// refetch falls back to the cached value when one exists.
    pub async fn resolve_decimals(&self, chain: &dyn ChainClient, asset: Address) -> Result<u8> {
        if let Some(cached) = self.decimals.get(&asset) {
            return Ok(*cached);
        }

        match chain.token_decimals(asset).await {
            Ok(dec) => {
                debug!(asset = %asset, decimals = dec, "resolved token decimals");
                self.decimals.insert(asset, dec);
                Ok(dec)
            }
            Err(e) => {
                if let Some(cached) = self.decimals.get(&asset) {
                    warn!(asset = %asset, error = %e, "decimals refetch failed, using cached");
                    return Ok(*cached);
                }
                Err(e)
            }
        }
    }

    /// Seed the decimals cache directly (tests, config reload).
    pub fn set_decimals(&self, asset: Address, decimals: u8) {
        self.decimals.insert(asset, decimals);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> AssetRegistry {
        let weth = Address::repeat_byte(1);
        let usdc = Address::repeat_byte(2);
        let assets = vec![
            AssetInfo {
                symbol: "WETH".into(),
                address: weth,
                a_token: Address::repeat_byte(0x11),
                variable_debt_token: Address::repeat_byte(0x21),
                liquidation_threshold: Some(0.825),
                native: true,
            },
            AssetInfo {
                symbol: "USDC".into(),
                address: usdc,
                a_token: Address::repeat_byte(0x12),
                variable_debt_token: Address::repeat_byte(0x22),
                liquidation_threshold: None,
                native: false,
            },
        ];
        let mut known = HashMap::new();
        known.insert(weth, 18u8);
        known.insert(usdc, 6u8);
        AssetRegistry::new(assets, vec![weth], vec![usdc], known)
    }

    #[test]
    fn test_threshold_fallback() {
        let reg = registry();
        assert!((reg.liquidation_threshold(&Address::repeat_byte(1)) - 0.825).abs() < 1e-12);
        // unconfigured threshold and unknown asset both fall back
        assert_eq!(
            reg.liquidation_threshold(&Address::repeat_byte(2)),
            DEFAULT_LIQUIDATION_THRESHOLD
        );
        assert_eq!(
            reg.liquidation_threshold(&Address::repeat_byte(0xFF)),
            DEFAULT_LIQUIDATION_THRESHOLD
        );
    }

    #[test]
    fn test_native_and_tokens() {
        let reg = registry();
        assert_eq!(reg.native_asset(), Some(Address::repeat_byte(1)));
        assert_eq!(
            reg.a_token(&Address::repeat_byte(1)),
            Some(Address::repeat_byte(0x11))
        );
        assert_eq!(
            reg.variable_debt_token(&Address::repeat_byte(2)),
            Some(Address::repeat_byte(0x22))
        );
    }

    #[test]
    fn test_decimals_cache() {
        let reg = registry();
        assert_eq!(reg.decimals(&Address::repeat_byte(1)), Some(18));
        assert_eq!(reg.decimals(&Address::repeat_byte(0xFF)), None);
        reg.set_decimals(Address::repeat_byte(0xFF), 8);
        assert_eq!(reg.decimals(&Address::repeat_byte(0xFF)), Some(8));
    }
}
