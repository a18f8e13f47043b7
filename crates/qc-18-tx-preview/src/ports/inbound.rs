//! # Driving Ports (API - Inbound)
//!
//! The interface request handlers use to submit transactions and drive the
//! preview worker.

use crate::domain::{AdmissionError, AdmissionOutcome, BlockHeader, Hash, SignedTransaction, TxStatus};
use crate::error::Result;
use async_trait::async_trait;

/// Per-transaction admission result of a submitted batch.
pub type AdmissionResult = std::result::Result<AdmissionOutcome, AdmissionError>;

/// Public API of the transaction preview subsystem.
#[async_trait]
pub trait TxPreviewApi: Send + Sync {
    /// Validates and admits a batch, then hands executable members to the
    /// worker.
    ///
    /// Returns one result per input transaction, in input order. Blocks
    /// while the worker queue is full.
    async fn submit(&self, transactions: Vec<SignedTransaction>) -> Result<Vec<AdmissionResult>>;

    /// Reports the bucket holding `tx_hash`.
    fn status(&self, tx_hash: &Hash) -> TxStatus;

    /// Announces a new canonical head.
    async fn notify_head(&self, header: BlockHeader) -> Result<()>;

    /// Transitions the worker to Running.
    async fn start(&self) -> Result<()>;

    /// Transitions the worker to Stopped.
    async fn stop(&self) -> Result<()>;

    /// Resolves once every event queued before this call has been handled.
    async fn barrier(&self) -> Result<()>;

    /// Shuts the worker down. A second call fails with `AlreadyClosed`.
    async fn close(&self) -> Result<()>;
}
