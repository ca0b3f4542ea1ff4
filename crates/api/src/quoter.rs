//! Swap quoter client for the flash-loan repayment leg.
//!
//! The quoter sells seized collateral back into the debt asset inside the
//! flash-liquidation call. The core treats it as an opaque collaborator: a
//! request goes out, an encoded payload plus output bounds come back.

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

/// Basis points denominator.
const BPS: u64 = 10_000;

/// Parameters for a collateral -> debt swap quote.
#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub sell_asset: Address,
    pub buy_asset: Address,
    pub amount_in: U256,
    /// Contract that performs the swap (the flash liquidator).
    pub recipient: Address,
}

/// A quote ready to embed in the flash-liquidation calldata.
#[derive(Debug, Clone)]
pub struct SwapQuote {
    /// Opaque router calldata, forwarded verbatim.
    pub payload: Bytes,
    /// Router-estimated output in the buy asset's base units.
    pub estimated_out: U256,
    /// Estimated output after the configured slippage haircut.
    pub min_out: U256,
}

#[derive(Debug, Error)]
pub enum QuoterError {
    #[error("quoter http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("quoter rejected request: {0}")]
    Rejected(String),
    #[error("malformed quoter response: {0}")]
    Malformed(String),
}

/// External swap quoter.
#[async_trait]
pub trait SwapQuoter: Send + Sync {
    async fn quote(&self, request: QuoteRequest) -> Result<SwapQuote, QuoterError>;
}

/// 1inch-style aggregation router client.
#[derive(Clone)]
pub struct OneInchQuoter {
    client: reqwest::Client,
    base_url: String,
    router: Address,
    max_slippage_bps: u16,
}

#[derive(Debug, Deserialize)]
struct SwapResponse {
    #[serde(rename = "dstAmount")]
    dst_amount: String,
    tx: SwapTx,
}

#[derive(Debug, Deserialize)]
struct SwapTx {
    data: String,
}

impl std::fmt::Debug for OneInchQuoter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneInchQuoter")
            .field("base_url", &self.base_url)
            .field("router", &self.router)
            .field("max_slippage_bps", &self.max_slippage_bps)
            .finish()
    }
}

impl OneInchQuoter {
    pub fn new(base_url: impl Into<String>, router: Address, max_slippage_bps: u16) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            router,
            max_slippage_bps,
        }
    }

    pub fn router(&self) -> Address {
        self.router
    }

    fn apply_slippage(&self, estimated: U256) -> U256 {
        let factor = U256::from(BPS - u64::from(self.max_slippage_bps.min(BPS as u16)));
        estimated * factor / U256::from(BPS)
    }
}

#[async_trait]
impl SwapQuoter for OneInchQuoter {
    #[instrument(skip(self), fields(sell = %request.sell_asset, buy = %request.buy_asset))]
    async fn quote(&self, request: QuoteRequest) -> Result<SwapQuote, QuoterError> {
        let url = format!("{}/swap", self.base_url);
        let slippage_pct = f64::from(self.max_slippage_bps) / 100.0;

        let response = self
            .client
            .get(&url)
            .query(&[
                ("src", request.sell_asset.to_string()),
                ("dst", request.buy_asset.to_string()),
                ("amount", request.amount_in.to_string()),
                ("from", request.recipient.to_string()),
                ("slippage", slippage_pct.to_string()),
                ("disableEstimate", "true".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QuoterError::Rejected(format!("{status}: {body}")));
        }

        let swap: SwapResponse = response.json().await?;

        let estimated_out = U256::from_str_radix(&swap.dst_amount, 10)
            .map_err(|e| QuoterError::Malformed(format!("dstAmount: {e}")))?;
        let payload: Bytes = swap
            .tx
            .data
            .parse()
            .map_err(|e| QuoterError::Malformed(format!("tx.data: {e}")))?;
        let min_out = self.apply_slippage(estimated_out);

        debug!(
            estimated_out = %estimated_out,
            min_out = %min_out,
            payload_len = payload.len(),
            "swap quote received"
        );

        Ok(SwapQuote {
            payload,
            estimated_out,
            min_out,
        })
    }
}
