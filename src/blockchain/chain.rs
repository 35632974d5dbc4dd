use log::{info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use std::sync::Arc;

use super::block::{Block, BlockError, BlockHash};
use super::crypto::Address;
use super::miner::{MiningJob, MiningLimits};
use super::pow::{PowError, ProofEngine};
use super::transaction::{Transaction, TransactionError};
use crate::config::{ChainConfig, ConfigError};

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Block does not extend the tip: expected prev hash {expected}, found {found}")]
    ChainLinkageViolation { expected: BlockHash, found: BlockHash },

    #[error("Invalid block at height {height}: {source}")]
    InvalidBlock {
        height: usize,
        #[source]
        source: BlockError,
    },

    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid chain: {0}")]
    InvalidChain(String),
}

impl From<PowError> for BlockchainError {
    fn from(err: PowError) -> Self {
        BlockchainError::Block(BlockError::Pow(err))
    }
}

/// Append-only chain of mined blocks, starting at genesis.
///
/// Clones share the same block list; appends are serialized by a mutex.
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// The chain of blocks
    chain: Arc<Mutex<Vec<Block>>>,

    /// Proof of work shared by mining and validation
    engine: Arc<dyn ProofEngine>,

    config: ChainConfig,
}

impl Blockchain {
    /// Creates a new blockchain and mines its genesis block
    pub fn new(config: ChainConfig) -> Result<Self, BlockchainError> {
        let engine = Arc::new(config.engine()?);
        Self::with_engine(config, engine)
    }

    /// Creates a blockchain around a caller-supplied proof engine.
    ///
    /// The engine must mine at the configured difficulty.
    pub fn with_engine(config: ChainConfig, engine: Arc<dyn ProofEngine>) -> Result<Self, BlockchainError> {
        config.validate()?;

        let bits = engine.difficulty().bits();
        if bits != config.difficulty {
            return Err(ConfigError::DifficultyMismatch {
                configured: config.difficulty,
                engine: bits,
            }
            .into());
        }

        let genesis = Block::genesis(engine.as_ref(), config.block_reward)?;
        info!("Mined genesis block {}", genesis.hash());

        Ok(Blockchain {
            chain: Arc::new(Mutex::new(vec![genesis])),
            engine,
            config,
        })
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn engine(&self) -> Arc<dyn ProofEngine> {
        self.engine.clone()
    }

    /// Gets the last block in the chain
    pub fn tip(&self) -> Block {
        let chain = self.chain.lock();
        // the chain is created with genesis and never shrinks
        chain[chain.len() - 1].clone()
    }

    pub fn len(&self) -> usize {
        self.chain.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.lock().is_empty()
    }

    /// Gets a copy of every block, genesis first
    pub fn blocks(&self) -> Vec<Block> {
        self.chain.lock().clone()
    }

    /// Verifies `transactions`, mines them into a block on the tip and appends it
    pub fn add_block(
        &self,
        data: impl Into<String>,
        transactions: Vec<Transaction>,
    ) -> Result<Block, BlockchainError> {
        check_signatures(&transactions)?;

        let prev_hash = self.tip().hash().clone();
        let block = Block::create(data, prev_hash, transactions, self.engine.as_ref())?;

        self.append(block.clone())?;
        Ok(block)
    }

    /// Like [`Blockchain::add_block`], paying the block reward to `miner` first
    pub fn add_block_with_reward(
        &self,
        data: impl Into<String>,
        miner: &Address,
        transactions: Vec<Transaction>,
    ) -> Result<Block, BlockchainError> {
        let mut entries = Vec::with_capacity(transactions.len() + 1);
        entries.push(Transaction::new_coinbase(miner.clone(), self.config.block_reward));
        entries.extend(transactions);

        self.add_block(data, entries)
    }

    /// Starts mining the next block in the background.
    ///
    /// The chain is untouched until the returned job's block is passed to
    /// [`Blockchain::append`]. Must be called from within a Tokio runtime.
    pub fn start_mining(
        &self,
        data: impl Into<String>,
        transactions: Vec<Transaction>,
        limits: MiningLimits,
    ) -> Result<MiningJob, BlockchainError> {
        check_signatures(&transactions)?;

        let prev_hash = self.tip().hash().clone();
        Ok(MiningJob::spawn(
            self.engine.clone(),
            data.into(),
            prev_hash,
            transactions,
            limits,
        ))
    }

    /// Mines the next block in the background and appends it on success
    pub async fn mine_block(
        &self,
        data: impl Into<String>,
        transactions: Vec<Transaction>,
        limits: MiningLimits,
    ) -> Result<Block, BlockchainError> {
        let job = self.start_mining(data, transactions, limits)?;
        let block = job.wait().await?;

        self.append(block.clone())?;
        Ok(block)
    }

    /// Appends a mined block after checking linkage, proof and transactions
    pub fn append(&self, block: Block) -> Result<(), BlockchainError> {
        let mut chain = self.chain.lock();
        let height = chain.len();
        let tip_hash = chain[height - 1].hash();

        if block.prev_hash() != tip_hash {
            warn!(
                "Rejected block '{}': prev hash {} does not match tip {}",
                block.data(),
                block.prev_hash(),
                tip_hash
            );
            return Err(BlockchainError::ChainLinkageViolation {
                expected: tip_hash.clone(),
                found: block.prev_hash().clone(),
            });
        }

        block
            .verify(self.engine.as_ref())
            .map_err(|source| BlockchainError::InvalidBlock { height, source })?;

        info!("Appended block {} '{}' with hash {}", height, block.data(), block.hash());
        chain.push(block);
        Ok(())
    }

    /// Audits the whole chain: genesis shape, linkage, proofs and signatures
    pub fn validate_chain(&self) -> Result<(), BlockchainError> {
        let chain = self.chain.lock();

        match chain.first() {
            Some(genesis) if genesis.is_genesis() => {}
            Some(_) => {
                return Err(BlockchainError::InvalidChain(
                    "First block has a predecessor".to_string(),
                ))
            }
            None => return Err(BlockchainError::InvalidChain("Chain is empty".to_string())),
        }

        for (height, block) in chain.iter().enumerate() {
            if height > 0 {
                let previous = &chain[height - 1];
                if block.prev_hash() != previous.hash() {
                    return Err(BlockchainError::ChainLinkageViolation {
                        expected: previous.hash().clone(),
                        found: block.prev_hash().clone(),
                    });
                }
            }

            block
                .verify(self.engine.as_ref())
                .map_err(|source| BlockchainError::InvalidBlock { height, source })?;
        }

        Ok(())
    }

    /// Validates the blockchain
    pub fn is_valid(&self) -> bool {
        match self.validate_chain() {
            Ok(()) => true,
            Err(err) => {
                warn!("Chain failed validation: {}", err);
                false
            }
        }
    }

    #[cfg(test)]
    fn replace_block(&self, height: usize, block: Block) {
        self.chain.lock()[height] = block;
    }
}

/// Rejects the batch if any transfer is unsigned or carries a bad signature
fn check_signatures(transactions: &[Transaction]) -> Result<(), BlockchainError> {
    for transaction in transactions {
        if !transaction.verify_signature()? {
            return Err(BlockchainError::Transaction(TransactionError::InvalidSignature));
        }
    }
    Ok(())
}
