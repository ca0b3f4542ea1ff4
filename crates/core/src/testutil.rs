//! Shared fixtures and scripted doubles for the core's tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use vigil_api::{
    FeedEvent, Notifier, NullNotifier, PriceSource, QuoteRequest, QuoterError, SwapQuote,
    SwapQuoter,
};
use vigil_chain::{ChainClient, FeeData, PreparedCall, UserAccountData};

use crate::assets::{AssetInfo, AssetRegistry};
use crate::config::{AssetEntry, Config};
use crate::context::CoreContext;
use crate::math::pow10;
use crate::prices::PriceAggregator;
use crate::state::BorrowerState;

pub const WETH: Address = Address::repeat_byte(0xE1);
pub const USDC: Address = Address::repeat_byte(0xC1);
pub const A_WETH: Address = Address::repeat_byte(0xE2);
pub const A_USDC: Address = Address::repeat_byte(0xC2);
pub const VDEBT_WETH: Address = Address::repeat_byte(0xE3);
pub const VDEBT_USDC: Address = Address::repeat_byte(0xC3);
pub const BORROWER: Address = Address::repeat_byte(0xB0);

/// Scripted chain double. Every value the pipeline reads is a field.
pub struct MockChain {
    pub block: AtomicU64,
    /// (token, owner) -> balance.
    pub balances: DashMap<(Address, Address), U256>,
    pub decimals: DashMap<Address, u8>,
    /// 1e8-scaled oracle prices.
    pub oracle_prices: DashMap<Address, U256>,
    pub account_data: DashMap<Address, UserAccountData>,
    pub fail_balance_reads: AtomicBool,
    pub fail_static_call: AtomicBool,
    pub fail_send: AtomicBool,
    pub gas_estimate: AtomicU64,
    pub confirm_success: AtomicBool,
    pub sent: Mutex<Vec<PreparedCall>>,
}

impl Default for MockChain {
    fn default() -> Self {
        let decimals = DashMap::new();
        decimals.insert(WETH, 18u8);
        decimals.insert(USDC, 6u8);

        Self {
            block: AtomicU64::new(1_000),
            balances: DashMap::new(),
            decimals,
            oracle_prices: DashMap::new(),
            account_data: DashMap::new(),
            fail_balance_reads: AtomicBool::new(false),
            fail_static_call: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            gas_estimate: AtomicU64::new(400_000),
            confirm_success: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl MockChain {
    pub fn set_oracle_price(&self, asset: Address, usd: f64) {
        self.oracle_prices
            .insert(asset, U256::from((usd * 1e8) as u128));
    }

    pub fn set_oracle_hf(&self, user: Address, hf: f64) {
        self.account_data.insert(
            user,
            UserAccountData {
                total_collateral_base: U256::from(1u64),
                total_debt_base: U256::from(1u64),
                health_factor: U256::from((hf * 1e18) as u128),
            },
        );
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.block.load(Ordering::SeqCst))
    }

    async fn fee_data(&self) -> Result<FeeData> {
        Ok(FeeData {
            base_fee_per_gas: 10_000_000_000,
            max_fee_per_gas: 20_000_000_000,
            max_priority_fee_per_gas: 1_000_000_000,
        })
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256> {
        if self.fail_balance_reads.load(Ordering::SeqCst) {
            anyhow::bail!("scripted balance read failure");
        }
        Ok(self
            .balances
            .get(&(token, owner))
            .map(|b| *b)
            .unwrap_or(U256::ZERO))
    }

    async fn token_decimals(&self, token: Address) -> Result<u8> {
        self.decimals
            .get(&token)
            .map(|d| *d)
            .ok_or_else(|| anyhow::anyhow!("unknown token {token}"))
    }

    async fn oracle_price(&self, asset: Address) -> Result<U256> {
        self.oracle_prices
            .get(&asset)
            .map(|p| *p)
            .ok_or_else(|| anyhow::anyhow!("no oracle price for {asset}"))
    }

    async fn user_account_data(&self, user: Address) -> Result<UserAccountData> {
        Ok(self
            .account_data
            .get(&user)
            .map(|d| *d)
            .unwrap_or(UserAccountData {
                total_collateral_base: U256::ZERO,
                total_debt_base: U256::ZERO,
                health_factor: U256::MAX,
            }))
    }

    async fn static_call(&self, _call: &PreparedCall) -> Result<()> {
        if self.fail_static_call.load(Ordering::SeqCst) {
            anyhow::bail!("scripted simulation revert");
        }
        Ok(())
    }

    async fn estimate_gas(&self, _call: &PreparedCall) -> Result<u64> {
        Ok(self.gas_estimate.load(Ordering::SeqCst))
    }

    async fn send(&self, call: &PreparedCall, _fees: &FeeData) -> Result<B256> {
        if self.fail_send.load(Ordering::SeqCst) {
            anyhow::bail!("scripted broadcast failure");
        }
        self.sent.lock().push(call.clone());
        Ok(B256::repeat_byte(0x42))
    }

    async fn wait_confirmation(&self, _tx_hash: B256, _timeout: Duration) -> Result<bool> {
        Ok(self.confirm_success.load(Ordering::SeqCst))
    }
}

/// Scripted quoter double.
pub struct MockQuoter {
    pub fail: AtomicBool,
    pub requests: Mutex<Vec<QuoteRequest>>,
}

impl Default for MockQuoter {
    fn default() -> Self {
        Self {
            fail: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SwapQuoter for MockQuoter {
    async fn quote(&self, request: QuoteRequest) -> Result<SwapQuote, QuoterError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(QuoterError::Rejected("scripted quoter failure".into()));
        }
        let estimated_out = request.amount_in;
        let min_out = estimated_out * U256::from(9_950u64) / U256::from(10_000u64);
        self.requests.lock().push(request);
        Ok(SwapQuote {
            payload: Bytes::from(vec![0xFE, 0xED]),
            estimated_out,
            min_out,
        })
    }
}

/// The two-asset universe used across the core tests.
pub fn test_assets() -> AssetRegistry {
    let assets = vec![
        AssetInfo {
            symbol: "WETH".into(),
            address: WETH,
            a_token: A_WETH,
            variable_debt_token: VDEBT_WETH,
            liquidation_threshold: Some(0.825),
            native: true,
        },
        AssetInfo {
            symbol: "USDC".into(),
            address: USDC,
            a_token: A_USDC,
            variable_debt_token: VDEBT_USDC,
            liquidation_threshold: Some(0.80),
            native: false,
        },
    ];
    let mut known = HashMap::new();
    known.insert(WETH, 18u8);
    known.insert(USDC, 6u8);
    AssetRegistry::new(assets, vec![WETH], vec![USDC], known)
}

/// Aggregator with both sources configured and the given prices applied
/// through the Binance slot.
pub fn test_prices(pairs: &[(Address, f64)]) -> Arc<PriceAggregator> {
    let prices = PriceAggregator::new(
        true,
        true,
        Duration::from_secs(5),
        Duration::from_millis(10),
    );
    for (asset, usd) in pairs {
        prices.handle_feed_event(FeedEvent::Price {
            source: PriceSource::Binance,
            asset: *asset,
            usd: *usd,
        });
    }
    prices
}

pub fn push_price(prices: &Arc<PriceAggregator>, asset: Address, usd: f64) {
    prices.handle_feed_event(FeedEvent::Price {
        source: PriceSource::Binance,
        asset,
        usd,
    });
}

fn asset_entry(symbol: &str, address: Address, a_token: Address, vdebt: Address, decimals: u8, threshold: f64, native: bool) -> AssetEntry {
    AssetEntry {
        symbol: symbol.to_string(),
        address: address.to_string(),
        a_token: a_token.to_string(),
        variable_debt_token: vdebt.to_string(),
        decimals: Some(decimals),
        liquidation_threshold: Some(threshold),
        native,
    }
}

/// Base config for the two-asset universe: execution enabled but dry-run,
/// permissive floors so tests opt in to the gates they exercise.
pub fn base_config() -> Config {
    let mut config = Config::default();
    config.pool_address = Address::repeat_byte(0x70).to_string();
    config.oracle_address = Address::repeat_byte(0x71).to_string();
    config.flash_liquidator_address = Some(Address::repeat_byte(0x72).to_string());
    config.assets = vec![
        asset_entry("WETH", WETH, A_WETH, VDEBT_WETH, 18, 0.825, true),
        asset_entry("USDC", USDC, A_USDC, VDEBT_USDC, 6, 0.80, false),
    ];
    config.target_collateral_assets = vec![WETH.to_string()];
    config.target_debt_assets = vec![USDC.to_string()];
    config.binance_symbols = vec!["ETHUSDT".to_string()];
    config.pyth_feed_ids = vec!["feed".to_string()];
    config.min_debt_usd = 50.0;
    config.min_profit_usd = 10.0;
    config.max_gas_usd = 20.0;
    config.price_update_debounce = 10;
    config
}

pub struct TestHarness {
    pub ctx: Arc<CoreContext>,
    pub chain: Arc<MockChain>,
    pub quoter: Arc<MockQuoter>,
}

pub fn test_harness(tweak: impl FnOnce(&mut Config)) -> TestHarness {
    let mut config = base_config();
    tweak(&mut config);

    let chain = Arc::new(MockChain::default());
    let quoter = Arc::new(MockQuoter::default());
    let notifier: Arc<dyn Notifier> = Arc::new(NullNotifier);

    let chain_client: Arc<dyn ChainClient> = chain.clone();
    let swap_quoter: Arc<dyn SwapQuoter> = quoter.clone();
    let ctx = CoreContext::new(config, chain_client, swap_quoter, notifier)
        .expect("test config must validate");

    TestHarness { ctx, chain, quoter }
}

pub fn test_context(tweak: impl FnOnce(&mut Config)) -> Arc<CoreContext> {
    test_harness(tweak).ctx
}

/// Insert a hydrated (or not) borrower holding WETH collateral and USDC
/// debt in whole-token units.
pub fn insert_borrower(
    ctx: &CoreContext,
    address: Address,
    collateral_weth: u64,
    debt_usdc: u64,
    hydrated: bool,
) {
    ctx.registry.upsert(address, BorrowerState::Safe, hydrated);
    ctx.registry.with_mut(&address, |b| {
        let mut collateral: SmallVec<[(Address, U256); 4]> = SmallVec::new();
        if collateral_weth > 0 {
            collateral.push((WETH, U256::from(collateral_weth) * pow10(18)));
        }
        let mut debt: SmallVec<[(Address, U256); 4]> = SmallVec::new();
        if debt_usdc > 0 {
            debt.push((USDC, U256::from(debt_usdc) * pow10(6)));
        }
        b.set_balances(collateral, debt);
        b.hydrated = hydrated;
    });
}
