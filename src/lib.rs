//! A single-writer, proof-of-work ledger with Ed25519-signed transactions.

pub mod blockchain;
pub mod config;

pub use blockchain::{Block, Blockchain, Transaction, Wallet};
pub use config::ChainConfig;
