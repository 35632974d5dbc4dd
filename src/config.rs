//! Ledger configuration
//!
//! Defaults can be overridden from the environment:
//! `LEDGER_DIFFICULTY`, `LEDGER_BLOCK_REWARD`, `LEDGER_CHECK_INTERVAL`.

use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;

use std::env;
use std::str::FromStr;

use crate::blockchain::pow::{Difficulty, ProofOfWork, DEFAULT_CHECK_INTERVAL};

pub const DIFFICULTY_ENV: &str = "LEDGER_DIFFICULTY";
pub const BLOCK_REWARD_ENV: &str = "LEDGER_BLOCK_REWARD";
pub const CHECK_INTERVAL_ENV: &str = "LEDGER_CHECK_INTERVAL";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configured difficulty {configured} does not match the engine's {engine}")]
    DifficultyMismatch { configured: u32, engine: u32 },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChainConfig {
    /// Leading zero bits required of every block hash
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,

    /// Amount paid by each coinbase transaction
    #[serde(default = "default_block_reward")]
    pub block_reward: f64,

    /// Mining attempts between two cancellation polls
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
}

fn default_difficulty() -> u32 {
    10
}

fn default_block_reward() -> f64 {
    50.0
}

fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            difficulty: default_difficulty(),
            block_reward: default_block_reward(),
            check_interval: default_check_interval(),
        }
    }
}

impl ChainConfig {
    pub fn with_difficulty(mut self, difficulty: u32) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_block_reward(mut self, block_reward: f64) -> Self {
        self.block_reward = block_reward;
        self
    }

    /// Defaults overlaid with any `LEDGER_*` variables that are set
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = ChainConfig::default();

        if let Some(difficulty) = read_env(DIFFICULTY_ENV)? {
            config.difficulty = difficulty;
        }
        if let Some(block_reward) = read_env(BLOCK_REWARD_ENV)? {
            config.block_reward = block_reward;
        }
        if let Some(check_interval) = read_env(CHECK_INTERVAL_ENV)? {
            config.check_interval = check_interval;
        }

        config.validate()?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pow_difficulty()?;

        if !self.block_reward.is_finite() || self.block_reward < 0.0 {
            return Err(invalid(BLOCK_REWARD_ENV, self.block_reward));
        }
        if self.check_interval == 0 {
            return Err(invalid(CHECK_INTERVAL_ENV, self.check_interval));
        }

        Ok(())
    }

    pub fn pow_difficulty(&self) -> Result<Difficulty, ConfigError> {
        Difficulty::new(self.difficulty).map_err(|_| invalid(DIFFICULTY_ENV, self.difficulty))
    }

    /// Builds the proof-of-work engine described by this configuration
    pub fn engine(&self) -> Result<ProofOfWork, ConfigError> {
        self.validate()?;
        Ok(ProofOfWork::new(self.pow_difficulty()?).with_check_interval(self.check_interval))
    }
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn read_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            warn!("Ignoring configuration: {} has an unparsable value", key);
            invalid(key, raw)
        }),
        Err(_) => Ok(None),
    }
}
