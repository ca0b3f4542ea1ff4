//! Chain interaction layer.
//!
//! This crate provides:
//! - The [`ChainClient`] trait the core programs against
//! - An alloy-backed RPC implementation with inline contract bindings
//! - Typed pool events and raw-log decoding
//! - EIP-1559 fee tracking
//! - Relay selection and transaction signing

mod client;
mod codec;
mod events;
mod gas;
mod provider;
mod relay;

pub use client::{wad_to_f64, ChainClient, FeeData, PreparedCall, UserAccountData};
pub use codec::{encode_flash_execute, encode_liquidation_call};
pub use events::{pool_signatures, PoolEvent, PoolEventStream};
pub use gas::FeeTracker;
pub use provider::RpcProvider;
pub use relay::{NonceManager, RelayMode, TransactionSender};
