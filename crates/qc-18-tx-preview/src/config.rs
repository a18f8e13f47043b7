//! Configuration for the transaction preview service

use crate::domain::{Address, ChainConfig};
use serde::Deserialize;
use std::num::NonZeroUsize;
use thiserror::Error;
use tracing::warn;

/// Default number of executed identities remembered for duplicate rejection
pub const DEFAULT_EXECUTED_HISTORY_CAPACITY: usize = 1000;

/// Default bound of the worker event queue
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 64;

/// Size of one transaction slot in bytes
pub const TX_SLOT_SIZE: u64 = 32 * 1024;

/// Default maximum encoded transaction size (four slots)
pub const DEFAULT_MAX_TX_SIZE: u64 = 4 * TX_SLOT_SIZE;

/// Default gas available to a preview's virtual block
pub const DEFAULT_EXECUTION_GAS_CEILING: u64 = 10_000_000_000;

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field that must be positive is zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Transaction preview configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Identities retained in the executed history
    pub executed_history_capacity: usize,

    /// Bound of the worker event queue (backpressure point)
    pub event_queue_capacity: usize,

    /// Maximum encoded transaction size in bytes
    pub max_tx_size: u64,

    /// Gas pool size of the virtual block each preview runs in
    pub execution_gas_ceiling: u64,

    /// Chain parameters
    pub chain: ChainConfig,

    /// Fee beneficiary for previews (head coinbase when unset)
    pub coinbase: Option<Address>,

    /// Reject transactions whose destination has no code
    pub require_contract_target: bool,

    /// Only promote on heads that reached the highest known block
    pub require_synced_head: bool,

    /// Record the top-level call trace in preview receipts
    pub record_call_trace: bool,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            executed_history_capacity: DEFAULT_EXECUTED_HISTORY_CAPACITY,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            max_tx_size: DEFAULT_MAX_TX_SIZE,
            execution_gas_ceiling: DEFAULT_EXECUTION_GAS_CEILING,
            chain: ChainConfig::default(),
            coinbase: None,
            require_contract_target: false,
            require_synced_head: true,
            record_call_trace: true,
        }
    }
}

impl PreviewConfig {
    /// Create config for testing (small bounds)
    pub fn for_testing() -> Self {
        Self {
            executed_history_capacity: 16,
            event_queue_capacity: 8,
            ..Default::default()
        }
    }

    /// Overlay `QC_PREVIEW_*` environment variables on the defaults.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        override_parsed(&lookup, "QC_PREVIEW_HISTORY_CAPACITY", &mut config.executed_history_capacity);
        override_parsed(&lookup, "QC_PREVIEW_QUEUE_CAPACITY", &mut config.event_queue_capacity);
        override_parsed(&lookup, "QC_PREVIEW_MAX_TX_SIZE", &mut config.max_tx_size);
        override_parsed(&lookup, "QC_PREVIEW_GAS_CEILING", &mut config.execution_gas_ceiling);
        override_parsed(&lookup, "QC_PREVIEW_CHAIN_ID", &mut config.chain.chain_id);
        override_parsed(&lookup, "QC_PREVIEW_REQUIRE_CONTRACT_TARGET", &mut config.require_contract_target);
        override_parsed(&lookup, "QC_PREVIEW_REQUIRE_SYNCED_HEAD", &mut config.require_synced_head);
        override_parsed(&lookup, "QC_PREVIEW_RECORD_CALL_TRACE", &mut config.record_call_trace);

        if let Some(raw) = lookup("QC_PREVIEW_ISTANBUL_BLOCK") {
            match raw.as_str() {
                "" | "none" => config.chain.istanbul_block = None,
                value => match value.parse() {
                    Ok(height) => config.chain.istanbul_block = Some(height),
                    Err(_) => warn!("QC_PREVIEW_ISTANBUL_BLOCK must be a block height or \"none\""),
                },
            }
        }

        if let Some(raw) = lookup("QC_PREVIEW_COINBASE") {
            let raw = raw.trim_start_matches("0x");
            match hex::decode(raw) {
                Ok(bytes) if bytes.len() == 20 => {
                    let mut coinbase = [0u8; 20];
                    coinbase.copy_from_slice(&bytes);
                    config.coinbase = Some(coinbase);
                }
                _ => warn!("QC_PREVIEW_COINBASE must be 20 bytes (40 hex chars)"),
            }
        }

        config
    }

    /// Checks bounds that would make the service unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executed_history_capacity == 0 {
            return Err(ConfigError::Zero("executed_history_capacity"));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::Zero("event_queue_capacity"));
        }
        if self.max_tx_size == 0 {
            return Err(ConfigError::Zero("max_tx_size"));
        }
        if self.execution_gas_ceiling == 0 {
            return Err(ConfigError::Zero("execution_gas_ceiling"));
        }
        Ok(())
    }

    /// History capacity as a non-zero bound.
    pub fn history_capacity(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.executed_history_capacity)
            .ok_or(ConfigError::Zero("executed_history_capacity"))
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => warn!(key, value = %raw, "Ignoring unparseable environment override"),
        }
    }
}
