//! Error types for the transaction preview service

use crate::config::ConfigError;
use crate::domain::{PoolError, StateError};
use thiserror::Error;

/// Result type alias for preview service operations
pub type Result<T> = std::result::Result<T, PreviewError>;

/// System-level failures of the preview service
#[derive(Debug, Error)]
pub enum PreviewError {
    /// State facade failure; aborts the current batch or promotion cycle
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// A snapshot could not be reverted; shared state may be corrupted
    #[error("Snapshot leak: snapshot {snapshot} not reverted: {source}")]
    SnapshotLeak {
        /// Snapshot id that leaked
        snapshot: u64,
        /// Revert failure
        source: StateError,
    },

    /// Pool bookkeeping broke an invariant; the preview itself completed
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// The worker stopped after a snapshot leak
    #[error("Preview worker halted")]
    Halted,

    /// The worker task is gone or its queue is closed
    #[error("Preview worker unavailable")]
    WorkerUnavailable,

    /// `close` was already called
    #[error("Preview service already closed")]
    AlreadyClosed,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl PreviewError {
    /// Returns true if the worker must stop after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PreviewError::SnapshotLeak { .. })
    }
}
