//! Core domain entities for the transaction preview subsystem.
//!
//! Defines the pool bucket model, the execution header handed to the
//! execution primitive, and the preview outcome produced for each
//! speculative run.

use super::errors::ExecutionError;
use std::time::Duration;

// Re-export from shared-types for convenience
pub use shared_types::{
    keccak256, short_hex, Address, BlockHeader, EcdsaSignature, Hash, Log, SignedTransaction, U256,
};

/// Timestamp in milliseconds since UNIX epoch.
pub type Timestamp = u64;

/// Bucket membership of a transaction identity.
///
/// Buckets are mutually exclusive: a hash is reported in exactly one state
/// at any observable instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum TxStatus {
    /// Not in any bucket (never seen, or evicted from history).
    #[default]
    Unknown,
    /// Nonce is ahead of the sender's on-chain nonce.
    Queued,
    /// Handed to the executor, preview not yet finalized.
    Executing,
    /// Previewed recently; kept in the bounded history ring.
    Executed,
}

/// Where an admitted transaction landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// Parked until its sender's nonce catches up.
    Queued,
    /// Executable now; the worker will preview it.
    Executing,
}

impl From<AdmissionOutcome> for TxStatus {
    fn from(outcome: AdmissionOutcome) -> Self {
        match outcome {
            AdmissionOutcome::Queued => TxStatus::Queued,
            AdmissionOutcome::Executing => TxStatus::Executing,
        }
    }
}

/// A transaction that passed the validation stage.
#[derive(Clone, Debug)]
pub struct ValidatedTransaction {
    /// The signed transaction.
    pub transaction: SignedTransaction,
    /// Content hash (identity).
    pub hash: Hash,
    /// Sender recovered from the signature.
    pub sender: Address,
}

/// A transaction held by the pool together with its bookkeeping.
#[derive(Clone, Debug)]
pub struct PoolEntry {
    /// The signed transaction.
    pub transaction: SignedTransaction,
    /// Content hash (identity).
    pub hash: Hash,
    /// Recovered sender.
    pub sender: Address,
    /// Sender nonce carried by the transaction.
    pub nonce: u64,
    /// Admission sequence number; orders previews within the pool.
    pub seq: u64,
    /// Wall-clock admission time (ms).
    pub admitted_at: Timestamp,
}

impl PoolEntry {
    /// Wraps a validated transaction with pool bookkeeping.
    pub fn new(validated: ValidatedTransaction, seq: u64, admitted_at: Timestamp) -> Self {
        let nonce = validated.transaction.nonce;
        Self {
            transaction: validated.transaction,
            hash: validated.hash,
            sender: validated.sender,
            nonce,
            seq,
            admitted_at,
        }
    }
}

/// Opaque handle returned when a state view is branched.
///
/// Not `Clone`: reverting consumes the token, so
/// each acquisition can be reverted at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct SnapshotToken(u64);

impl SnapshotToken {
    /// Wraps a state-facade specific snapshot id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the state-facade specific snapshot id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Chain parameters the validation stage and executor depend on.
#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Chain id bound into transaction signatures.
    pub chain_id: u64,
    /// Height at which Istanbul calldata pricing activates (`None` = never).
    pub istanbul_block: Option<u64>,
}

impl ChainConfig {
    /// Returns true when Istanbul pricing applies at `height`.
    pub fn is_istanbul(&self, height: u64) -> bool {
        self.istanbul_block.is_some_and(|activation| height >= activation)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            istanbul_block: Some(0),
        }
    }
}

/// Interpreter knobs passed through to the execution primitive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VmConfig {
    /// Record the top-level call trace in the receipt.
    pub record_call_trace: bool,
}

/// Header of the virtual block a preview executes in.
///
/// Derived from the current head: one block higher, fresh timestamp, gas
/// ceiling taken from configuration rather than the parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionHeader {
    /// Hash of the head the preview builds on.
    pub parent_hash: Hash,
    /// Parent height + 1.
    pub number: u64,
    /// Gas available to the virtual block.
    pub gas_limit: u64,
    /// Wall-clock seconds at preview time.
    pub timestamp: u64,
    /// Fee beneficiary.
    pub coinbase: Address,
}

impl ExecutionHeader {
    /// Builds the child header of `parent`.
    pub fn child_of(parent: &BlockHeader, gas_limit: u64, timestamp: u64, coinbase: Address) -> Self {
        Self {
            parent_hash: parent.hash(),
            number: parent.height.saturating_add(1),
            gas_limit,
            timestamp,
            coinbase,
        }
    }
}

/// Gas remaining in the virtual block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GasPool {
    remaining: u64,
}

impl GasPool {
    /// Creates a pool holding `gas`.
    pub fn new(gas: u64) -> Self {
        Self { remaining: gas }
    }

    /// Gas still available.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Deducts `amount`, failing without change if the pool is short.
    pub fn sub_gas(&mut self, amount: u64) -> Result<(), ExecutionError> {
        if self.remaining < amount {
            return Err(ExecutionError::GasPoolExhausted {
                requested: amount,
                available: self.remaining,
            });
        }
        self.remaining -= amount;
        Ok(())
    }

    /// Returns unused gas to the pool.
    pub fn add_gas(&mut self, amount: u64) {
        self.remaining = self.remaining.saturating_add(amount);
    }
}

/// Kind of the top-level call frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallType {
    /// Message call to an existing account.
    Call,
    /// Contract deployment.
    Create,
}

/// Top-level call frame of a previewed transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallTrace {
    /// Call or create.
    pub call_type: CallType,
    /// Caller.
    pub from: Address,
    /// Callee, or the created contract address.
    pub to: Address,
    /// Call data / init code.
    pub input: Vec<u8>,
    /// Return data.
    pub output: Vec<u8>,
    /// Transferred value.
    pub value: U256,
    /// Position of this frame in the trace (top level is 1).
    pub trace_index: u64,
}

/// Receipt produced by one speculative application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    /// False when the call reverted or failed mid-execution.
    pub success: bool,
    /// Gas consumed by this transaction.
    pub gas_used: u64,
    /// Gas consumed in the virtual block so far.
    pub cumulative_gas_used: u64,
    /// Logs emitted.
    pub logs: Vec<Log>,
    /// Address of the deployed contract, for creations.
    pub contract_address: Option<Address>,
    /// Return data of the top-level frame.
    pub return_data: Vec<u8>,
    /// Top-level call frame, when tracing is enabled.
    pub call_trace: Option<CallTrace>,
}

/// Result of previewing one transaction. Never persisted.
#[derive(Clone, Debug)]
pub struct PreviewOutcome {
    /// Previewed transaction.
    pub tx_hash: Hash,
    /// Recovered sender.
    pub sender: Address,
    /// Height of the head the preview was built on.
    pub head_number: u64,
    /// Receipt, or the error the primitive reported.
    pub result: Result<Receipt, ExecutionError>,
    /// Wall time spent in the preview.
    pub elapsed: Duration,
}

impl PreviewOutcome {
    /// Logs of a successful run; empty for failed ones.
    pub fn logs(&self) -> &[Log] {
        match &self.result {
            Ok(receipt) => &receipt.logs,
            Err(_) => &[],
        }
    }

    /// True when the primitive returned a receipt with success status.
    pub fn succeeded(&self) -> bool {
        matches!(&self.result, Ok(receipt) if receipt.success)
    }
}

/// Counters maintained by the worker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreviewStats {
    /// Previews run to completion (any status).
    pub previews_executed: u64,
    /// Previews whose receipt reported success.
    pub previews_succeeded: u64,
    /// Previews that reverted or errored in the primitive.
    pub previews_failed: u64,
    /// Queued transactions promoted on new heads.
    pub promoted: u64,
    /// Queued transactions dropped because the chain nonce passed them.
    pub dropped_stale: u64,
    /// Batches or promotion cycles aborted by state failures.
    pub system_errors: u64,
    /// Running mean preview time in microseconds.
    pub avg_preview_time_us: u64,
}

impl PreviewStats {
    /// Folds one completed preview into the counters.
    pub fn record_preview(&mut self, outcome: &PreviewOutcome) {
        self.previews_executed += 1;
        if outcome.succeeded() {
            self.previews_succeeded += 1;
        } else {
            self.previews_failed += 1;
        }
        let elapsed_us = u64::try_from(outcome.elapsed.as_micros()).unwrap_or(u64::MAX);
        let total = self.previews_executed;
        self.avg_preview_time_us =
            (self.avg_preview_time_us.saturating_mul(total - 1)).saturating_add(elapsed_us) / total;
    }
}

/// Bucket sizes at a point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolSummary {
    /// Transactions waiting on nonce.
    pub queued: usize,
    /// Transactions handed to the executor.
    pub executing: usize,
    /// Identities held in the executed history.
    pub executed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(result: Result<Receipt, ExecutionError>, micros: u64) -> PreviewOutcome {
        PreviewOutcome {
            tx_hash: [1; 32],
            sender: [2; 20],
            head_number: 1,
            result,
            elapsed: Duration::from_micros(micros),
        }
    }

    fn receipt(success: bool) -> Receipt {
        Receipt {
            success,
            gas_used: 21_000,
            cumulative_gas_used: 21_000,
            logs: vec![],
            contract_address: None,
            return_data: vec![],
            call_trace: None,
        }
    }

    #[test]
    fn test_gas_pool_sub_and_refund() {
        let mut pool = GasPool::new(100_000);
        pool.sub_gas(21_000).unwrap();
        assert_eq!(pool.remaining(), 79_000);

        pool.add_gas(1_000);
        assert_eq!(pool.remaining(), 80_000);
    }

    #[test]
    fn test_gas_pool_exhaustion_leaves_pool_intact() {
        let mut pool = GasPool::new(10);
        let err = pool.sub_gas(11).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::GasPoolExhausted {
                requested: 11,
                available: 10
            }
        ));
        assert_eq!(pool.remaining(), 10);
    }

    #[test]
    fn test_execution_header_is_child_of_parent() {
        let parent = BlockHeader {
            height: 41,
            gas_limit: 8_000_000,
            ..Default::default()
        };
        let header = ExecutionHeader::child_of(&parent, 10_000_000_000, 1_700_000_000, [9; 20]);

        assert_eq!(header.number, 42);
        assert_eq!(header.parent_hash, parent.hash());
        assert_eq!(header.gas_limit, 10_000_000_000);
        assert_eq!(header.coinbase, [9; 20]);
    }

    #[test]
    fn test_istanbul_activation() {
        let config = ChainConfig {
            chain_id: 1,
            istanbul_block: Some(100),
        };
        assert!(!config.is_istanbul(99));
        assert!(config.is_istanbul(100));

        let never = ChainConfig {
            chain_id: 1,
            istanbul_block: None,
        };
        assert!(!never.is_istanbul(u64::MAX));
    }

    #[test]
    fn test_stats_running_average() {
        let mut stats = PreviewStats::default();
        stats.record_preview(&outcome(Ok(receipt(true)), 100));
        stats.record_preview(&outcome(Ok(receipt(false)), 300));
        stats.record_preview(&outcome(Err(ExecutionError::OutOfGas), 200));

        assert_eq!(stats.previews_executed, 3);
        assert_eq!(stats.previews_succeeded, 1);
        assert_eq!(stats.previews_failed, 2);
        assert_eq!(stats.avg_preview_time_us, 200);
    }

    #[test]
    fn test_failed_outcome_has_no_logs() {
        let failed = outcome(Err(ExecutionError::OutOfGas), 1);
        assert!(failed.logs().is_empty());
        assert!(!failed.succeeded());
    }

    #[test]
    fn test_admission_outcome_maps_to_status() {
        assert_eq!(TxStatus::from(AdmissionOutcome::Queued), TxStatus::Queued);
        assert_eq!(
            TxStatus::from(AdmissionOutcome::Executing),
            TxStatus::Executing
        );
    }
}
