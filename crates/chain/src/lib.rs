//! Contract client for the MedLedger records contract.
//!
//! The records service mirrors registrations and prescriptions on-chain and
//! uses the HTK token contract for doctor fees. Calls go through the
//! [`ChainClient`] trait:
//! - [`RpcChainClient`] talks JSON-RPC to a relayer that owns the contract ABI
//! - [`MockChain`] simulates the contracts in memory for development and tests

pub mod client;
pub mod mock;
pub mod rpc;

pub use client::{ChainClient, TxReceipt};
pub use mock::MockChain;
pub use rpc::RpcChainClient;
