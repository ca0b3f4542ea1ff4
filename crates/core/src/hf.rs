//! Health-factor engine and liquidation profit estimation.
//!
//! Predicted HF works off cached balances and the latest off-chain prices;
//! the on-chain oracle HF remains the final authority at execute time. An
//! asset whose price is missing contributes zero to its side of the ratio,
//! which inflates HF for missing collateral prices and deflates it for
//! missing debt prices; the omission is logged, never fatal.

use alloy::primitives::{Address, U256};
use anyhow::Result;
use tracing::{debug, warn};

use vigil_chain::ChainClient;

use crate::assets::AssetRegistry;
use crate::borrower::Borrower;
use crate::math::{apply_bps_up, ceil_div, fixed_to_f64, pow10, price_to_fixed, usd_fixed};
use crate::prices::PriceAggregator;

/// Close factor: a single liquidation may cover half the debt.
const CLOSE_FACTOR_DIVISOR: u64 = 2;

/// A viable (debt, collateral) liquidation with its economics.
#[derive(Debug, Clone)]
pub struct LiquidationEstimate {
    pub debt_asset: Address,
    pub collateral_asset: Address,
    /// Debt to cover, in the debt asset's base units.
    pub debt_amount: U256,
    pub debt_value_usd: f64,
    /// Collateral the liquidator must receive, bonus included.
    pub required_collateral: U256,
    /// Bonus value in USD, before gas.
    pub profit_usd: f64,
}

/// Predicted health factor from cached balances and off-chain prices.
pub fn predicted_health_factor(
    borrower: &Borrower,
    prices: &PriceAggregator,
    assets: &AssetRegistry,
) -> f64 {
    let mut total_debt_usd = 0.0f64;
    for (asset, amount) in &borrower.debt {
        match side_value_usd(asset, *amount, prices, assets) {
            Some(usd) => total_debt_usd += usd,
            None => warn!(borrower = %borrower.address, asset = %asset, "debt asset omitted from HF"),
        }
    }

    let mut weighted_collateral_usd = 0.0f64;
    for (asset, amount) in &borrower.collateral {
        match side_value_usd(asset, *amount, prices, assets) {
            Some(usd) => {
                weighted_collateral_usd += usd * assets.liquidation_threshold(asset);
            }
            None => {
                warn!(borrower = %borrower.address, asset = %asset, "collateral asset omitted from HF")
            }
        }
    }

    if total_debt_usd == 0.0 {
        return f64::INFINITY;
    }
    weighted_collateral_usd / total_debt_usd
}

fn side_value_usd(
    asset: &Address,
    amount: U256,
    prices: &PriceAggregator,
    assets: &AssetRegistry,
) -> Option<f64> {
    let price = price_to_fixed(prices.price_usd(asset)?);
    if price.is_zero() {
        return None;
    }
    let decimals = assets.decimals(asset)?;
    Some(fixed_to_f64(usd_fixed(amount, price, decimals)))
}

/// Estimate one (debt, collateral) pair. Returns None when the borrower
/// does not hold both sides, a price or decimals is unknown, or the
/// bonus-adjusted collateral requirement exceeds the held balance.
pub fn estimate_liquidation(
    borrower: &Borrower,
    debt_asset: Address,
    collateral_asset: Address,
    prices: &PriceAggregator,
    assets: &AssetRegistry,
    bonus_bps: u16,
) -> Option<LiquidationEstimate> {
    let debt_balance = borrower.debt_balance(&debt_asset)?;
    let collateral_balance = borrower.collateral_balance(&collateral_asset)?;
    if debt_balance.is_zero() || collateral_balance.is_zero() {
        return None;
    }

    let debt_price = price_to_fixed(prices.price_usd(&debt_asset)?);
    let collateral_price = price_to_fixed(prices.price_usd(&collateral_asset)?);
    if debt_price.is_zero() || collateral_price.is_zero() {
        return None;
    }
    let debt_decimals = assets.decimals(&debt_asset)?;
    let collateral_decimals = assets.decimals(&collateral_asset)?;

    let debt_amount = debt_balance / U256::from(CLOSE_FACTOR_DIVISOR);
    if debt_amount.is_zero() {
        return None;
    }

    // All integer to the division point: usd values are 1e8 fixed.
    let debt_value_fixed = usd_fixed(debt_amount, debt_price, debt_decimals);
    let required_fixed = apply_bps_up(debt_value_fixed, bonus_bps);
    let required_collateral = ceil_div(
        required_fixed * pow10(collateral_decimals),
        collateral_price,
    );

    if required_collateral > collateral_balance {
        debug!(
            borrower = %borrower.address,
            debt = %debt_asset,
            collateral = %collateral_asset,
            "collateral short of bonus-adjusted requirement"
        );
        return None;
    }

    let debt_value_usd = fixed_to_f64(debt_value_fixed);
    let profit_usd = debt_value_usd * f64::from(bonus_bps) / 10_000.0;

    Some(LiquidationEstimate {
        debt_asset,
        collateral_asset,
        debt_amount,
        debt_value_usd,
        required_collateral,
        profit_usd,
    })
}

/// Best pair over the configured debt x collateral cross product, by bonus
/// profit.
pub fn best_liquidation(
    borrower: &Borrower,
    prices: &PriceAggregator,
    assets: &AssetRegistry,
    bonus_bps: u16,
) -> Option<LiquidationEstimate> {
    let mut best: Option<LiquidationEstimate> = None;

    for debt_asset in assets.debt_assets() {
        for collateral_asset in assets.collateral_assets() {
            if debt_asset == collateral_asset {
                continue;
            }
            let Some(estimate) = estimate_liquidation(
                borrower,
                *debt_asset,
                *collateral_asset,
                prices,
                assets,
                bonus_bps,
            ) else {
                continue;
            };
            if best
                .as_ref()
                .map_or(true, |b| estimate.profit_usd > b.profit_usd)
            {
                best = Some(estimate);
            }
        }
    }

    best
}

/// Total debt in USD priced by the on-chain oracle. Used for the
/// MIN_DEBT_USD gates, where the protocol's own pricing is authoritative.
pub async fn oracle_total_debt_usd(
    borrower: &Borrower,
    chain: &dyn ChainClient,
    assets: &AssetRegistry,
) -> Result<f64> {
    let mut total = U256::ZERO;
    for (asset, amount) in &borrower.debt {
        if amount.is_zero() {
            continue;
        }
        let price = chain.oracle_price(*asset).await?;
        let decimals = match assets.decimals(asset) {
            Some(d) => d,
            None => assets.resolve_decimals(chain, *asset).await?,
        };
        total += usd_fixed(*amount, price, decimals);
    }
    Ok(fixed_to_f64(total))
}
