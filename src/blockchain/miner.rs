use log::{debug, warn};
use tokio::task::JoinHandle;

use std::sync::Arc;
use std::time::Duration;

use super::block::{Block, BlockError, BlockHash};
use super::pow::{PowError, ProofEngine, StopSignal};
use super::transaction::Transaction;

/// Bounds on a background mining attempt
#[derive(Debug, Clone, Copy, Default)]
pub struct MiningLimits {
    /// Give up once this much time has passed
    pub deadline: Option<Duration>,
}

impl MiningLimits {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Duration) -> Self {
        MiningLimits {
            deadline: Some(deadline),
        }
    }
}

/// A block being mined on the blocking thread pool.
///
/// Dropping the job, including dropping an unfinished [`MiningJob::wait`]
/// future, stops the search at the worker's next poll.
#[derive(Debug)]
pub struct MiningJob {
    stop: StopSignal,
    handle: Option<JoinHandle<Result<Block, BlockError>>>,
}

impl MiningJob {
    /// Starts mining a block. Must be called from within a Tokio runtime.
    pub fn spawn(
        engine: Arc<dyn ProofEngine>,
        data: String,
        prev_hash: BlockHash,
        transactions: Vec<Transaction>,
        limits: MiningLimits,
    ) -> Self {
        let stop = match limits.deadline {
            Some(deadline) => StopSignal::with_timeout(deadline),
            None => StopSignal::new(),
        };

        let worker_stop = stop.clone();
        debug!("Spawning mining job for '{}' on top of {}", data, prev_hash);
        let handle = tokio::task::spawn_blocking(move || {
            Block::create_until(data, prev_hash, transactions, engine.as_ref(), &worker_stop)
        });

        MiningJob {
            stop,
            handle: Some(handle),
        }
    }

    /// Asks the worker to stop at its next poll
    pub fn cancel(&self) {
        warn!("Cancelling mining job");
        self.stop.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the worker; a cancelled or timed-out job yields `MiningAborted`
    pub async fn wait(mut self) -> Result<Block, BlockError> {
        let handle = self.handle.take().ok_or_else(|| {
            BlockError::Pow(PowError::WorkerFailed("job already awaited".to_string()))
        })?;

        match handle.await {
            Ok(result) => result,
            Err(e) => Err(BlockError::Pow(PowError::WorkerFailed(e.to_string()))),
        }
    }
}

impl Drop for MiningJob {
    fn drop(&mut self) {
        // a finished worker never reads the flag again
        self.stop.cancel();
    }
}
