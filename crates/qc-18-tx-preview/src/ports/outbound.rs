//! # Driven Ports (SPI - Outbound)
//!
//! Interfaces the transaction preview subsystem depends on. Adapters
//! implement these traits to provide:
//! - Chain head and state access (state snapshot facade)
//! - Single-transaction execution (execution primitive)
//! - Sender recovery from signatures
//! - Delivery of preview outcomes
//!
//! Dependencies point inward: adapters implement these traits, the domain
//! and the worker only ever see the trait objects.

use crate::domain::{
    Address, BlockHeader, ChainConfig, ExecutionError, ExecutionHeader, GasPool, Hash,
    PreviewOutcome, Receipt, SignatureError, SignedTransaction, SnapshotToken, StateError,
    Timestamp, VmConfig, U256,
};
use crate::error::PreviewError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// STATE SNAPSHOT FACADE
// =============================================================================

/// Read access to the canonical chain.
pub trait ChainState: Send + Sync {
    /// Returns the current canonical head.
    fn current_head(&self) -> Result<BlockHeader, StateError>;

    /// Opens a mutable view over the state committed under `root`.
    ///
    /// Views are isolated: writes are visible only through the view that
    /// made them, never to the chain or to other views. Callers that mutate
    /// still bracket the mutation with `snapshot` / `revert_to_snapshot`.
    fn state_at(&self, root: &Hash) -> Result<Box<dyn StateView>, StateError>;

    /// Returns true if a receipt for `tx_hash` exists on chain.
    fn has_receipt(&self, tx_hash: &Hash) -> Result<bool, StateError>;

    /// Highest block height known to the node, if it is still syncing.
    fn highest_known_block(&self) -> Option<u64> {
        None
    }
}

/// Account state at some root, with journaled mutation.
pub trait StateView: Send {
    /// Marks a point the view can be reverted to.
    fn snapshot(&mut self) -> SnapshotToken;

    /// Undoes every mutation made since `token` was taken.
    fn revert_to_snapshot(&mut self, token: SnapshotToken) -> Result<(), StateError>;

    /// Account nonce (0 for unknown accounts).
    fn get_nonce(&self, address: &Address) -> Result<u64, StateError>;

    /// Sets the account nonce.
    fn set_nonce(&mut self, address: &Address, nonce: u64) -> Result<(), StateError>;

    /// Account balance (0 for unknown accounts).
    fn get_balance(&self, address: &Address) -> Result<U256, StateError>;

    /// Sets the account balance.
    fn set_balance(&mut self, address: &Address, balance: U256) -> Result<(), StateError>;

    /// Contract code (empty for externally owned accounts).
    fn get_code(&self, address: &Address) -> Result<Vec<u8>, StateError>;

    /// Installs contract code.
    fn set_code(&mut self, address: &Address, code: Vec<u8>) -> Result<(), StateError>;

    /// Storage slot value (zero when unset).
    fn get_storage(&self, address: &Address, key: &Hash) -> Result<Hash, StateError>;

    /// Writes a storage slot.
    fn set_storage(&mut self, address: &Address, key: Hash, value: Hash) -> Result<(), StateError>;
}

// =============================================================================
// EXECUTION PRIMITIVE
// =============================================================================

/// Everything about the virtual block a single application runs in.
pub struct ApplyContext<'a> {
    /// Chain parameters.
    pub chain_config: &'a ChainConfig,
    /// Chain the virtual block extends.
    pub chain: &'a dyn ChainState,
    /// Virtual block header.
    pub header: &'a ExecutionHeader,
    /// Fee beneficiary, when it differs from the header's.
    pub coinbase: Option<Address>,
    /// Interpreter settings.
    pub vm: VmConfig,
}

/// Applies one transaction to a state view.
pub trait ExecutionPrimitive: Send + Sync {
    /// Executes `tx` from `sender` against `state`.
    ///
    /// Draws gas from `gas_pool` and adds the amount consumed to `gas_used`.
    /// An `Err` leaves `state` in an unspecified partially-applied condition;
    /// callers are expected to revert.
    fn apply(
        &self,
        ctx: &ApplyContext<'_>,
        state: &mut dyn StateView,
        tx: &SignedTransaction,
        sender: Address,
        gas_pool: &mut GasPool,
        gas_used: &mut u64,
    ) -> Result<Receipt, ExecutionError>;
}

// =============================================================================
// SIGNATURES
// =============================================================================

/// Recovers the sender address of a signed transaction.
pub trait SenderRecovery: Send + Sync {
    /// Returns the address whose key produced `tx.signature`.
    fn recover_sender(&self, tx: &SignedTransaction) -> Result<Address, SignatureError>;
}

// =============================================================================
// OUTCOME DELIVERY
// =============================================================================

/// Receives every preview the worker produces.
#[async_trait]
pub trait PreviewSink: Send + Sync {
    /// Delivers one finished preview.
    async fn publish(&self, outcome: &PreviewOutcome);

    /// Reports a system failure that aborted a batch or promotion cycle.
    async fn system_error(&self, _error: &PreviewError) {}
}

// =============================================================================
// TIME
// =============================================================================

/// Time source for consistent timestamp handling.
///
/// Abstracted to allow testing with deterministic time.
pub trait TimeSource: Send + Sync {
    /// Returns the current timestamp in milliseconds.
    fn now(&self) -> Timestamp;
}

/// Default system time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    millis: AtomicU64,
}

impl ManualTimeSource {
    /// Creates a clock reading `millis`.
    pub fn new(millis: Timestamp) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        self.millis.load(Ordering::SeqCst)
    }
}
