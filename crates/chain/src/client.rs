//! Chain access trait consumed by the core.
//!
//! Every outbound RPC the pipeline makes goes through [`ChainClient`], so the
//! core can run against the alloy-backed provider in production and a
//! scripted double in tests.

use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use anyhow::Result;
use async_trait::async_trait;

/// An encoded call ready for simulation, gas estimation, or dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCall {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    /// Populated after gas estimation; dispatch uses it as the limit.
    pub gas_limit: Option<u64>,
}

impl PreparedCall {
    pub fn new(to: Address, data: Bytes) -> Self {
        Self {
            to,
            data,
            value: U256::ZERO,
            gas_limit: None,
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }
}

/// Current fee conditions, refreshed by the block loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeData {
    pub base_fee_per_gas: u128,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

impl FeeData {
    /// Worst-case cost of `gas` units in wei.
    pub fn cost_wei(&self, gas: u64) -> U256 {
        U256::from(self.max_fee_per_gas) * U256::from(gas)
    }
}

/// Pool-reported account summary. `health_factor` is WAD-scaled (1e18).
#[derive(Debug, Clone, Copy)]
pub struct UserAccountData {
    pub total_collateral_base: U256,
    pub total_debt_base: U256,
    pub health_factor: U256,
}

impl UserAccountData {
    /// On-chain health factor as a float; +inf when the pool reports no debt.
    pub fn health_factor_f64(&self) -> f64 {
        if self.total_debt_base.is_zero() {
            return f64::INFINITY;
        }
        wad_to_f64(self.health_factor)
    }
}

/// Convert a WAD (1e18) fixed-point value to f64. Display and comparison
/// only; amounts stay in U256.
pub fn wad_to_f64(wad: U256) -> f64 {
    if wad <= U256::from(u128::MAX) {
        let value: u128 = wad.to();
        value as f64 / 1e18
    } else {
        let limbs = wad.as_limbs();
        let mut acc = 0f64;
        for (i, limb) in limbs.iter().enumerate() {
            acc += (*limb as f64) * 2f64.powi(64 * i as i32);
        }
        acc / 1e18
    }
}

/// RPC surface the core depends on.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest block height.
    async fn block_number(&self) -> Result<u64>;

    /// Current fee conditions.
    async fn fee_data(&self) -> Result<FeeData>;

    /// ERC-20 `balanceOf`. Used against aTokens and variable-debt tokens.
    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256>;

    /// ERC-20 `decimals`.
    async fn token_decimals(&self, token: Address) -> Result<u8>;

    /// Protocol oracle price for an asset, 8 decimals.
    async fn oracle_price(&self, asset: Address) -> Result<U256>;

    /// Pool `getUserAccountData`.
    async fn user_account_data(&self, user: Address) -> Result<UserAccountData>;

    /// `eth_call` the exact payload that would be broadcast. Ok(()) means
    /// the call would not revert.
    async fn static_call(&self, call: &PreparedCall) -> Result<()>;

    /// `eth_estimateGas` for the payload.
    async fn estimate_gas(&self, call: &PreparedCall) -> Result<u64>;

    /// Sign and dispatch through the configured relay. Returns the tx hash.
    async fn send(&self, call: &PreparedCall, fees: &FeeData) -> Result<B256>;

    /// Wait for a receipt up to `timeout`. Ok(true) = mined successfully,
    /// Ok(false) = mined but reverted.
    async fn wait_confirmation(&self, tx_hash: B256, timeout: Duration) -> Result<bool>;
}
