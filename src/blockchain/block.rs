use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fmt;

use super::crypto::Address;
use super::pow::{BlockHeader, PowError, ProofEngine, StopSignal};
use super::transaction::{Transaction, TransactionError};

/// Data label of the first block
pub const GENESIS_DATA: &str = "genesis";

/// Errors that can occur while assembling or checking a block
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Proof of work error: {0}")]
    Pow(#[from] PowError),

    #[error("Block {0} does not satisfy the proof of work")]
    InvalidProof(BlockHash),

    #[error("Stored hash {stored} does not match computed hash {computed}")]
    HashMismatch { stored: BlockHash, computed: BlockHash },

    #[error("Coinbase transaction at position {0}; only the first entry may be a reward")]
    MisplacedCoinbase(usize),

    #[error("Transaction {index} has a signature that does not match its sender")]
    InvalidTransaction { index: usize },

    #[error("Transaction {index} rejected: {source}")]
    UnverifiableTransaction {
        index: usize,
        #[source]
        source: TransactionError,
    },
}

/// A block digest, rendered as hex. Empty only as the genesis predecessor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHash(#[serde(with = "hex")] Vec<u8>);

impl BlockHash {
    pub fn empty() -> Self {
        BlockHash(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for BlockHash {
    fn from(bytes: [u8; 32]) -> Self {
        BlockHash(bytes.to_vec())
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// A mined block. Fields are read-only; any change would break the seal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    hash: BlockHash,
    data: String,
    prev_hash: BlockHash,
    nonce: u64,
    transactions: Vec<Transaction>,
}

impl Block {
    /// Mines a new block on top of `prev_hash`. Blocks until a nonce is found.
    ///
    /// The proof of work covers `prev_hash` and `data` only; the transaction
    /// list is carried alongside and checked by [`Block::verify_transactions`].
    pub fn create<E>(
        data: impl Into<String>,
        prev_hash: BlockHash,
        transactions: Vec<Transaction>,
        engine: &E,
    ) -> Result<Self, BlockError>
    where
        E: ProofEngine + ?Sized,
    {
        Self::create_until(data, prev_hash, transactions, engine, &StopSignal::new())
    }

    /// Like [`Block::create`], giving up with `MiningAborted` once `stop` fires
    pub fn create_until<E>(
        data: impl Into<String>,
        prev_hash: BlockHash,
        transactions: Vec<Transaction>,
        engine: &E,
        stop: &StopSignal,
    ) -> Result<Self, BlockError>
    where
        E: ProofEngine + ?Sized,
    {
        let data = data.into();
        let header = BlockHeader {
            prev_hash: prev_hash.as_bytes(),
            data: &data,
        };
        let seal = engine.mine_until(&header, stop)?;

        Ok(Block {
            hash: BlockHash::from(seal.hash),
            data,
            prev_hash,
            nonce: seal.nonce,
            transactions,
        })
    }

    /// The first block of every chain: data "genesis", no predecessor, one reward
    pub fn genesis<E>(engine: &E, reward: f64) -> Result<Self, BlockError>
    where
        E: ProofEngine + ?Sized,
    {
        let reward = Transaction::new_coinbase(Address::from(GENESIS_DATA), reward);
        Self::create(GENESIS_DATA, BlockHash::empty(), vec![reward], engine)
    }

    pub fn header(&self) -> BlockHeader<'_> {
        BlockHeader {
            prev_hash: self.prev_hash.as_bytes(),
            data: &self.data,
        }
    }

    pub fn hash(&self) -> &BlockHash {
        &self.hash
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn prev_hash(&self) -> &BlockHash {
        &self.prev_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    /// Recomputes the digest and checks both the target and the stored hash
    pub fn verify_proof<E>(&self, engine: &E) -> Result<(), BlockError>
    where
        E: ProofEngine + ?Sized,
    {
        let header = self.header();
        let computed = BlockHash::from(engine.digest(&header, self.nonce));

        if computed != self.hash {
            return Err(BlockError::HashMismatch {
                stored: self.hash.clone(),
                computed,
            });
        }

        if !engine.check(&header, self.nonce) {
            return Err(BlockError::InvalidProof(self.hash.clone()));
        }

        Ok(())
    }

    /// Checks reward placement and shape, and every transfer signature
    pub fn verify_transactions(&self) -> Result<(), BlockError> {
        for (index, transaction) in self.transactions.iter().enumerate() {
            if transaction.is_coinbase() && index != 0 {
                return Err(BlockError::MisplacedCoinbase(index));
            }

            // rewards pass only if well-formed; transfers need a matching signature
            match transaction.verify_signature() {
                Ok(true) => {}
                Ok(false) => return Err(BlockError::InvalidTransaction { index }),
                Err(source) => return Err(BlockError::UnverifiableTransaction { index, source }),
            }
        }

        Ok(())
    }

    /// Proof of work plus transactions
    pub fn verify<E>(&self, engine: &E) -> Result<(), BlockError>
    where
        E: ProofEngine + ?Sized,
    {
        self.verify_proof(engine)?;
        self.verify_transactions()
    }
}
