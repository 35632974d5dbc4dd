use log::{info, warn};
use sha2::{Digest, Sha256};
use thiserror::Error;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Width of the block digest in bits
pub const DIGEST_BITS: u32 = 256;

/// Default number of attempts between two polls of a stop signal
pub const DEFAULT_CHECK_INTERVAL: u64 = 4096;

/// Errors that can occur during proof of work
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PowError {
    #[error("Invalid difficulty: {0} (expected 1..=256)")]
    InvalidDifficulty(u32),

    #[error("Nonce space exhausted without finding a valid hash")]
    NonceSpaceExhausted,

    #[error("Mining aborted after {attempts} attempts")]
    MiningAborted { attempts: u64 },

    #[error("Mining worker failed: {0}")]
    WorkerFailed(String),
}

/// Number of leading zero bits a block digest must carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Difficulty(u32);

impl Difficulty {
    pub fn new(bits: u32) -> Result<Self, PowError> {
        if bits == 0 || bits > DIGEST_BITS {
            return Err(PowError::InvalidDifficulty(bits));
        }
        Ok(Difficulty(bits))
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// The threshold `2^(256 - bits)` every accepted digest must stay below
    pub fn target(&self) -> Target {
        Target::from_difficulty(*self)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 256-bit unsigned integer held as big-endian bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target([u8; 32]);

impl Target {
    fn from_difficulty(difficulty: Difficulty) -> Self {
        let shift = (DIGEST_BITS - difficulty.bits()) as usize;
        let mut bytes = [0u8; 32];
        bytes[31 - shift / 8] = 1u8 << (shift % 8);
        Target(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compares `digest` as a big-endian integer against the target.
    ///
    /// Lexicographic order on equal-length big-endian byte strings is
    /// numeric order, so a slice comparison is the big-integer comparison.
    pub fn is_met_by(&self, digest: &[u8; 32]) -> bool {
        digest.as_slice() < self.0.as_slice()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// The block fields covered by the proof of work
#[derive(Debug, Clone, Copy)]
pub struct BlockHeader<'a> {
    pub prev_hash: &'a [u8],
    pub data: &'a str,
}

/// Result of a successful search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seal {
    pub nonce: u64,
    pub hash: [u8; 32],
    pub attempts: u64,
}

/// Cooperative cancellation for a running search.
///
/// Clones share the same flag, so one clone can be handed to a worker while
/// the owner keeps another to call [`StopSignal::cancel`].
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl StopSignal {
    /// A signal that never fires unless cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that also fires once `timeout` has elapsed
    pub fn with_timeout(timeout: Duration) -> Self {
        StopSignal {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn should_stop(&self) -> bool {
        if self.is_cancelled() {
            return true;
        }
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }
}

/// Capability Block Assembly needs from a proof-of-work scheme
pub trait ProofEngine: Send + Sync + fmt::Debug {
    fn difficulty(&self) -> Difficulty;

    /// Canonical byte encoding of `header` for a given nonce
    fn encode(&self, header: &BlockHeader<'_>, nonce: u64) -> Vec<u8>;

    /// Searches for a nonce until one succeeds or `stop` fires
    fn mine_until(&self, header: &BlockHeader<'_>, stop: &StopSignal) -> Result<Seal, PowError>;

    /// Checks a stored nonce without searching
    fn check(&self, header: &BlockHeader<'_>, nonce: u64) -> bool;

    /// Digest of the encoding for a given nonce
    fn digest(&self, header: &BlockHeader<'_>, nonce: u64) -> [u8; 32] {
        hash_bytes(&self.encode(header, nonce))
    }
}

/// SHA-256 of `data`
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Builds the byte string hashed by both mining and validation:
/// prev hash bytes, data bytes, nonce (u64 BE), difficulty (u64 BE).
pub fn compute_encoding(prev_hash: &[u8], data: &str, nonce: u64, difficulty: Difficulty) -> Vec<u8> {
    let mut buf = Vec::with_capacity(prev_hash.len() + data.len() + 16);
    buf.extend_from_slice(prev_hash);
    buf.extend_from_slice(data.as_bytes());
    buf.extend_from_slice(&nonce.to_be_bytes());
    buf.extend_from_slice(&u64::from(difficulty.bits()).to_be_bytes());
    buf
}

/// Hashcash-style proof of work over SHA-256
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    difficulty: Difficulty,
    target: Target,
    check_interval: u64,
}

impl ProofOfWork {
    pub fn new(difficulty: Difficulty) -> Self {
        ProofOfWork {
            difficulty,
            target: difficulty.target(),
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    /// Sets how many attempts run between two polls of the stop signal
    pub fn with_check_interval(mut self, check_interval: u64) -> Self {
        self.check_interval = check_interval.max(1);
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Blocking search with no way to stop it
    pub fn mine(&self, header: &BlockHeader<'_>) -> Result<Seal, PowError> {
        self.mine_until(header, &StopSignal::new())
    }

    pub fn validate(&self, header: &BlockHeader<'_>, nonce: u64) -> bool {
        self.check(header, nonce)
    }

    /// Searches upward from `start_nonce`; the public entry points start at 0
    pub(crate) fn mine_from(
        &self,
        header: &BlockHeader<'_>,
        start_nonce: u64,
        stop: &StopSignal,
    ) -> Result<Seal, PowError> {
        let started = Instant::now();
        let mut nonce = start_nonce;
        let mut attempts = 0u64;

        loop {
            let hash = self.digest(header, nonce);
            attempts = attempts.saturating_add(1);

            if self.target.is_met_by(&hash) {
                info!(
                    "Mined '{}' at difficulty {}: nonce {} after {} attempts in {:?}",
                    header.data,
                    self.difficulty,
                    nonce,
                    attempts,
                    started.elapsed()
                );
                return Ok(Seal { nonce, hash, attempts });
            }

            if attempts % self.check_interval == 0 && stop.should_stop() {
                warn!("Mining '{}' stopped after {} attempts", header.data, attempts);
                return Err(PowError::MiningAborted { attempts });
            }

            nonce = match nonce.checked_add(1) {
                Some(next) => next,
                None => {
                    warn!("Nonce space exhausted for '{}' after {} attempts", header.data, attempts);
                    return Err(PowError::NonceSpaceExhausted);
                }
            };
        }
    }
}

impl ProofEngine for ProofOfWork {
    fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    fn encode(&self, header: &BlockHeader<'_>, nonce: u64) -> Vec<u8> {
        compute_encoding(header.prev_hash, header.data, nonce, self.difficulty)
    }

    fn mine_until(&self, header: &BlockHeader<'_>, stop: &StopSignal) -> Result<Seal, PowError> {
        self.mine_from(header, 0, stop)
    }

    fn check(&self, header: &BlockHeader<'_>, nonce: u64) -> bool {
        self.target.is_met_by(&self.digest(header, nonce))
    }
}
