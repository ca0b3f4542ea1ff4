//! Pool event types and raw-log decoding.
//!
//! The five Aave-v3 pool events the agent reacts to, decoded straight from
//! log topics/data. The websocket subscription wrapper lives here too; it
//! yields already-typed events and keeps the provider alive inside the
//! stream state.

use std::pin::Pin;

use alloy::primitives::{b256, Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use anyhow::Result;
use futures::stream::{Stream, StreamExt};
use tracing::info;

/// keccak256("Supply(address,address,address,uint256,uint16)")
pub const SUPPLY_SIG: B256 =
    b256!("2b627736bca15cd5381dcf80b0bf11fd197d01a037c52b927a881a10fb73ba61");
/// keccak256("Withdraw(address,address,address,uint256)")
pub const WITHDRAW_SIG: B256 =
    b256!("3115d1449a7b732c986cba18244e897a450f61e1bb8d589cd2e69e6c8924f9f7");
/// keccak256("Borrow(address,address,address,uint256,uint8,uint256,uint16)")
pub const BORROW_SIG: B256 =
    b256!("b3d084820fb1a9decffb176436bd02558d15fac9b0ddfed8c465bc7359d7dce0");
/// keccak256("Repay(address,address,address,uint256,bool)")
pub const REPAY_SIG: B256 =
    b256!("a534c8dbe71f871f9f3530e97a74601fea17b426cae02e1c5aee42c96c784051");
/// keccak256("LiquidationCall(address,address,address,uint256,uint256,address,bool)")
pub const LIQUIDATION_CALL_SIG: B256 =
    b256!("e413a321e8681d831f4dbccbca790d2952b56f977908e45be37335533e005286");

/// All pool event signatures, for log filters.
pub fn pool_signatures() -> Vec<B256> {
    vec![
        SUPPLY_SIG,
        WITHDRAW_SIG,
        BORROW_SIG,
        REPAY_SIG,
        LIQUIDATION_CALL_SIG,
    ]
}

/// A decoded pool event.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    Supply {
        reserve: Address,
        on_behalf_of: Address,
        amount: U256,
        block_number: u64,
    },
    Withdraw {
        reserve: Address,
        user: Address,
        amount: U256,
        block_number: u64,
    },
    Borrow {
        reserve: Address,
        on_behalf_of: Address,
        amount: U256,
        block_number: u64,
    },
    Repay {
        reserve: Address,
        user: Address,
        repayer: Address,
        amount: U256,
        block_number: u64,
    },
    LiquidationCall {
        collateral_asset: Address,
        debt_asset: Address,
        user: Address,
        debt_to_cover: U256,
        liquidated_collateral: U256,
        liquidator: Address,
        block_number: u64,
    },
}

impl PoolEvent {
    /// The borrower whose position the event touches (the on-behalf-of
    /// party where the schema has one).
    pub fn borrower(&self) -> Address {
        match self {
            Self::Supply { on_behalf_of, .. } => *on_behalf_of,
            Self::Withdraw { user, .. } => *user,
            Self::Borrow { on_behalf_of, .. } => *on_behalf_of,
            Self::Repay { user, .. } => *user,
            Self::LiquidationCall { user, .. } => *user,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Supply { .. } => "Supply",
            Self::Withdraw { .. } => "Withdraw",
            Self::Borrow { .. } => "Borrow",
            Self::Repay { .. } => "Repay",
            Self::LiquidationCall { .. } => "LiquidationCall",
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            Self::Supply { block_number, .. }
            | Self::Withdraw { block_number, .. }
            | Self::Borrow { block_number, .. }
            | Self::Repay { block_number, .. }
            | Self::LiquidationCall { block_number, .. } => *block_number,
        }
    }

    /// Decode a raw log. Returns None for unrelated or malformed logs.
    pub fn decode(log: &Log) -> Option<Self> {
        let topics = log.topics();
        let sig = *topics.first()?;
        let data = &log.data().data;
        let block_number = log.block_number.unwrap_or(0);

        let topic_addr = |i: usize| -> Option<Address> {
            topics.get(i).map(|t| Address::from_slice(&t[12..]))
        };
        let data_word = |i: usize| -> Option<U256> {
            let start = i * 32;
            data.get(start..start + 32).map(U256::from_be_slice)
        };
        let data_addr = |i: usize| -> Option<Address> {
            let start = i * 32;
            data.get(start + 12..start + 32).map(Address::from_slice)
        };

        if sig == SUPPLY_SIG {
            // Supply(reserve idx, user, onBehalfOf idx, amount, referral idx)
            Some(Self::Supply {
                reserve: topic_addr(1)?,
                on_behalf_of: topic_addr(2)?,
                amount: data_word(1)?,
                block_number,
            })
        } else if sig == WITHDRAW_SIG {
            // Withdraw(reserve idx, user idx, to idx, amount)
            Some(Self::Withdraw {
                reserve: topic_addr(1)?,
                user: topic_addr(2)?,
                amount: data_word(0)?,
                block_number,
            })
        } else if sig == BORROW_SIG {
            // Borrow(reserve idx, user, onBehalfOf idx, amount, rateMode, rate, referral idx)
            Some(Self::Borrow {
                reserve: topic_addr(1)?,
                on_behalf_of: topic_addr(2)?,
                amount: data_word(1)?,
                block_number,
            })
        } else if sig == REPAY_SIG {
            // Repay(reserve idx, user idx, repayer idx, amount, useATokens)
            Some(Self::Repay {
                reserve: topic_addr(1)?,
                user: topic_addr(2)?,
                repayer: topic_addr(3)?,
                amount: data_word(0)?,
                block_number,
            })
        } else if sig == LIQUIDATION_CALL_SIG {
            // LiquidationCall(collateral idx, debt idx, user idx,
            //                 debtToCover, liquidatedCollateral, liquidator, receiveAToken)
            Some(Self::LiquidationCall {
                collateral_asset: topic_addr(1)?,
                debt_asset: topic_addr(2)?,
                user: topic_addr(3)?,
                debt_to_cover: data_word(0)?,
                liquidated_collateral: data_word(1)?,
                liquidator: data_addr(2)?,
                block_number,
            })
        } else {
            None
        }
    }
}

/// WebSocket subscription to the pool's event log.
pub struct PoolEventStream {
    ws_url: String,
    pool_address: Address,
}

impl PoolEventStream {
    pub fn new(ws_url: impl Into<String>, pool_address: Address) -> Self {
        Self {
            ws_url: ws_url.into(),
            pool_address,
        }
    }

    /// Subscribe and return a typed event stream. The provider is moved into
    /// the stream state so the underlying websocket stays open.
    pub async fn subscribe(&self) -> Result<Pin<Box<dyn Stream<Item = PoolEvent> + Send>>> {
        info!(pool = %self.pool_address, "subscribing to pool events");

        let ws = WsConnect::new(&self.ws_url);
        let provider = ProviderBuilder::new().on_ws(ws).await?;

        let filter = Filter::new()
            .address(self.pool_address)
            .event_signature(pool_signatures());
        let sub = provider.subscribe_logs(&filter).await?;
        let inner = sub.into_stream();

        let stream = futures::stream::unfold(
            (provider, inner),
            |(provider, mut inner)| async move {
                loop {
                    match inner.next().await {
                        Some(log) => {
                            if let Some(event) = PoolEvent::decode(&log) {
                                return Some((event, (provider, inner)));
                            }
                            // unrelated or malformed log, keep reading
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, LogData};

    fn make_log(topics: Vec<B256>, data: Vec<u8>, block: u64) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0xF0),
                data: LogData::new_unchecked(topics, Bytes::from(data)),
            },
            block_number: Some(block),
            ..Default::default()
        }
    }

    fn word_addr(addr: Address) -> B256 {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(addr.as_slice());
        B256::new(word)
    }

    #[test]
    fn test_decode_borrow() {
        let reserve = Address::repeat_byte(1);
        let borrower = Address::repeat_byte(2);

        let mut data = vec![0u8; 64];
        data[12..32].copy_from_slice(Address::repeat_byte(9).as_slice()); // caller
        data[63] = 42; // amount

        let log = make_log(
            vec![BORROW_SIG, word_addr(reserve), word_addr(borrower)],
            data,
            100,
        );

        match PoolEvent::decode(&log).expect("borrow should decode") {
            PoolEvent::Borrow {
                reserve: r,
                on_behalf_of,
                amount,
                block_number,
            } => {
                assert_eq!(r, reserve);
                assert_eq!(on_behalf_of, borrower);
                assert_eq!(amount, U256::from(42u64));
                assert_eq!(block_number, 100);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_liquidation_call() {
        let collateral = Address::repeat_byte(1);
        let debt = Address::repeat_byte(2);
        let user = Address::repeat_byte(3);
        let liquidator = Address::repeat_byte(4);

        let mut data = vec![0u8; 128];
        data[31] = 10; // debtToCover
        data[63] = 11; // liquidatedCollateral
        data[76..96].copy_from_slice(liquidator.as_slice());
        data[127] = 0; // receiveAToken = false

        let log = make_log(
            vec![
                LIQUIDATION_CALL_SIG,
                word_addr(collateral),
                word_addr(debt),
                word_addr(user),
            ],
            data,
            7,
        );

        match PoolEvent::decode(&log).expect("liquidation should decode") {
            PoolEvent::LiquidationCall {
                collateral_asset,
                debt_asset,
                user: u,
                debt_to_cover,
                liquidated_collateral,
                liquidator: l,
                ..
            } => {
                assert_eq!(collateral_asset, collateral);
                assert_eq!(debt_asset, debt);
                assert_eq!(u, user);
                assert_eq!(debt_to_cover, U256::from(10u64));
                assert_eq!(liquidated_collateral, U256::from(11u64));
                assert_eq!(l, liquidator);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_unrelated_log() {
        let log = make_log(vec![B256::repeat_byte(0xAA)], vec![], 1);
        assert!(PoolEvent::decode(&log).is_none());
    }

    #[test]
    fn test_borrower_resolution() {
        let event = PoolEvent::Repay {
            reserve: Address::ZERO,
            user: Address::repeat_byte(5),
            repayer: Address::repeat_byte(6),
            amount: U256::from(1u64),
            block_number: 1,
        };
        // the debt holder, not the repayer
        assert_eq!(event.borrower(), Address::repeat_byte(5));
    }
}
