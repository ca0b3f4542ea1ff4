//! Alloy-backed [`ChainClient`] implementation.

use std::time::Duration;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::client::{ChainClient, FeeData, PreparedCall, UserAccountData};
use crate::codec::{IPool, IPriceOracle, IERC20};
use crate::gas::FeeTracker;
use crate::relay::TransactionSender;

/// Receipt polling cadence while waiting for confirmation.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Production chain client over HTTP RPC.
pub struct RpcProvider {
    rpc_url: String,
    pool_address: Address,
    oracle_address: Address,
    fee_tracker: FeeTracker,
    sender: Option<TransactionSender>,
}

impl RpcProvider {
    pub fn new(
        rpc_url: impl Into<String>,
        pool_address: Address,
        oracle_address: Address,
        sender: Option<TransactionSender>,
    ) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            pool_address,
            oracle_address,
            fee_tracker: FeeTracker::default(),
            sender,
        }
    }

    fn provider(&self) -> Result<impl Provider> {
        Ok(ProviderBuilder::new().on_http(self.rpc_url.parse().context("invalid rpc url")?))
    }

    fn as_request(call: &PreparedCall) -> TransactionRequest {
        use alloy::network::TransactionBuilder;
        let mut tx = TransactionRequest::default()
            .with_to(call.to)
            .with_input(call.data.clone())
            .with_value(call.value);
        if let Some(gas) = call.gas_limit {
            tx = tx.with_gas_limit(gas);
        }
        tx
    }
}

#[async_trait]
impl ChainClient for RpcProvider {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.provider()?.get_block_number().await?)
    }

    async fn fee_data(&self) -> Result<FeeData> {
        let provider = self.provider()?;

        let block = provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no latest block"))?;
        let base_fee = block.header.base_fee_per_gas.map(u128::from).unwrap_or(0);

        let priority_fee = provider
            .get_max_priority_fee_per_gas()
            .await
            .unwrap_or(1_000_000_000);

        self.fee_tracker.update(base_fee, priority_fee);
        Ok(self.fee_tracker.fee_data())
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256> {
        let provider = self.provider()?;
        let erc20 = IERC20::new(token, &provider);
        Ok(erc20.balanceOf(owner).call().await?._0)
    }

    async fn token_decimals(&self, token: Address) -> Result<u8> {
        let provider = self.provider()?;
        let erc20 = IERC20::new(token, &provider);
        Ok(erc20.decimals().call().await?._0)
    }

    async fn oracle_price(&self, asset: Address) -> Result<U256> {
        let provider = self.provider()?;
        let oracle = IPriceOracle::new(self.oracle_address, &provider);
        Ok(oracle.getAssetPrice(asset).call().await?._0)
    }

    async fn user_account_data(&self, user: Address) -> Result<UserAccountData> {
        let provider = self.provider()?;
        let pool = IPool::new(self.pool_address, &provider);
        let data = pool.getUserAccountData(user).call().await?;

        Ok(UserAccountData {
            total_collateral_base: data.totalCollateralBase,
            total_debt_base: data.totalDebtBase,
            health_factor: data.healthFactor,
        })
    }

    async fn static_call(&self, call: &PreparedCall) -> Result<()> {
        let provider = self.provider()?;
        provider
            .call(Self::as_request(call))
            .await
            .context("static call reverted")?;
        Ok(())
    }

    async fn estimate_gas(&self, call: &PreparedCall) -> Result<u64> {
        let provider = self.provider()?;
        let gas = provider.estimate_gas(Self::as_request(call)).await?;
        Ok(gas)
    }

    async fn send(&self, call: &PreparedCall, fees: &FeeData) -> Result<B256> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no signer configured"))?;
        sender.dispatch(call, fees).await
    }

    async fn wait_confirmation(&self, tx_hash: B256, timeout: Duration) -> Result<bool> {
        let provider = self.provider()?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(receipt) = provider.get_transaction_receipt(tx_hash).await? {
                debug!(
                    tx = %tx_hash,
                    block = receipt.block_number.unwrap_or(0),
                    status = receipt.status(),
                    "receipt observed"
                );
                return Ok(receipt.status());
            }

            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("confirmation timeout for {tx_hash}");
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}
