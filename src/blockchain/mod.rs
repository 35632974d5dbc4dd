// Blockchain module
//
// This module contains the ledger core:
// - Proof of work engine and the cancellable mining worker
// - Block structure
// - Blockchain structure
// - Transaction structure and its signing payload
// - Wallets and signatures

pub mod block;
pub mod chain;
pub mod crypto;
pub mod miner;
pub mod pow;
pub mod transaction;

// Re-export main components for easier access
pub use block::{Block, BlockHash};
pub use chain::Blockchain;
pub use crypto::{Address, DigitalSignature, Wallet};
pub use miner::{MiningJob, MiningLimits};
pub use pow::{Difficulty, ProofEngine, ProofOfWork, StopSignal};
pub use transaction::Transaction;
