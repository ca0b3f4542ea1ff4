//! Transaction signing and relay selection.
//!
//! `RelayMode` picks the endpoint broadcasts go to; `TransactionSender`
//! owns the wallet and a locally cached nonce so dispatch needs no extra
//! RPC round-trip.

use std::sync::atomic::{AtomicU64, Ordering};

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::Result;
use tracing::{debug, info, warn};

use crate::client::{FeeData, PreparedCall};

/// Where signed transactions go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMode {
    /// Plain broadcast through the public RPC endpoint.
    None,
    /// Flashbots Protect endpoint.
    Flashbots,
    /// Operator-supplied private relay URL.
    Custom(String),
}

const FLASHBOTS_RPC: &str = "https://rpc.flashbots.net";

impl RelayMode {
    pub fn parse(mode: &str, private_relay_url: Option<&str>) -> Result<Self> {
        match mode {
            "none" => Ok(Self::None),
            "flashbots" => Ok(Self::Flashbots),
            "custom" => {
                let url = private_relay_url
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| anyhow::anyhow!("relay_mode=custom requires private_relay_url"))?;
                Ok(Self::Custom(url.to_string()))
            }
            other => anyhow::bail!("unknown relay_mode: {other}"),
        }
    }

    /// Endpoint to send through; `rpc_url` is the public fallback.
    pub fn endpoint<'a>(&'a self, rpc_url: &'a str) -> &'a str {
        match self {
            Self::None => rpc_url,
            Self::Flashbots => FLASHBOTS_RPC,
            Self::Custom(url) => url,
        }
    }
}

/// Local nonce cache. Incremented per dispatch, re-synced from chain after
/// a failure.
#[derive(Debug)]
pub struct NonceManager {
    current: AtomicU64,
}

impl NonceManager {
    pub fn new(initial: u64) -> Self {
        Self {
            current: AtomicU64::new(initial),
        }
    }

    #[inline]
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst)
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Force the counter back to the chain's view.
    pub fn reset(&self, chain_nonce: u64) {
        self.current.store(chain_nonce, Ordering::SeqCst);
    }
}

/// Signs and dispatches prepared calls through the selected relay.
pub struct TransactionSender {
    send_url: String,
    rpc_url: String,
    wallet: EthereumWallet,
    pub address: Address,
    chain_id: u64,
    nonce: NonceManager,
}

impl TransactionSender {
    pub async fn new(
        signer_key: &str,
        rpc_url: &str,
        relay: &RelayMode,
        chain_id: u64,
    ) -> Result<Self> {
        let key = signer_key.trim_start_matches("0x");
        let signer: PrivateKeySigner = key.parse()?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);
        let initial_nonce = provider.get_transaction_count(address).await?;

        let send_url = relay.endpoint(rpc_url).to_string();
        info!(
            address = %address,
            chain_id,
            initial_nonce,
            relay = ?relay,
            "transaction sender initialized"
        );

        Ok(Self {
            send_url,
            rpc_url: rpc_url.to_string(),
            wallet,
            address,
            chain_id,
            nonce: NonceManager::new(initial_nonce),
        })
    }

    /// Sign and broadcast. Does not wait for a receipt.
    pub async fn dispatch(&self, call: &PreparedCall, fees: &FeeData) -> Result<B256> {
        let nonce = self.nonce.next();
        let gas_limit = call.gas_limit.unwrap_or(1_000_000);

        let tx = TransactionRequest::default()
            .with_to(call.to)
            .with_input(call.data.clone())
            .with_value(call.value)
            .with_nonce(nonce)
            .with_gas_limit(gas_limit)
            .with_max_fee_per_gas(fees.max_fee_per_gas)
            .with_max_priority_fee_per_gas(fees.max_priority_fee_per_gas)
            .with_chain_id(self.chain_id);

        debug!(
            to = %call.to,
            nonce,
            gas_limit,
            max_fee_gwei = fees.max_fee_per_gas / 1_000_000_000,
            "dispatching transaction"
        );

        let provider = ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(self.send_url.parse()?);

        match provider.send_transaction(tx).await {
            Ok(pending) => Ok(*pending.tx_hash()),
            Err(e) => {
                // A rejected submission may have burned the nonce; re-sync.
                self.sync_nonce().await;
                Err(e.into())
            }
        }
    }

    /// Re-sync the local nonce from chain state.
    pub async fn sync_nonce(&self) {
        let Ok(url) = self.rpc_url.parse() else {
            return;
        };
        let provider = ProviderBuilder::new().on_http(url);
        match provider.get_transaction_count(self.address).await {
            Ok(chain_nonce) => {
                self.nonce.reset(chain_nonce);
                debug!(nonce = chain_nonce, "nonce synced from chain");
            }
            Err(e) => warn!(error = %e, "failed to sync nonce"),
        }
    }

    /// Current signer balance in wei.
    pub async fn balance(&self) -> Result<U256> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        Ok(provider.get_balance(self.address).await?)
    }
}
