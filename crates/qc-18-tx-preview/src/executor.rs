//! # Speculative Executor
//!
//! Runs one transaction against a disposable snapshot of the current head.
//!
//! Every preview:
//! 1. reads the current head and opens a fresh state view at its root
//! 2. takes a snapshot token (held by [`SnapshotGuard`])
//! 3. builds the child execution header with a gas pool of the configured
//!    ceiling and the current wall-clock time
//! 4. invokes the execution primitive
//! 5. reverts the snapshot, whatever the primitive returned
//!
//! A revert failure is reported as [`PreviewError::SnapshotLeak`], which the
//! worker treats as fatal.

use crate::domain::{
    short_hex, Address, ChainConfig, ExecutionHeader, GasPool, PoolEntry, PreviewOutcome,
    SnapshotToken, VmConfig,
};
use crate::error::{PreviewError, Result};
use crate::ports::{ApplyContext, ChainState, ExecutionPrimitive, StateView, TimeSource};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Owns a state view together with the snapshot taken on it.
///
/// [`SnapshotGuard::release`] reverts and reports the outcome. If the guard
/// is dropped without release (the primitive panicked), `Drop` reverts and
/// logs any failure.
pub struct SnapshotGuard {
    state: Box<dyn StateView>,
    token: Option<SnapshotToken>,
}

impl SnapshotGuard {
    /// Takes a snapshot on `state`.
    pub fn acquire(mut state: Box<dyn StateView>) -> Self {
        let token = state.snapshot();
        Self {
            state,
            token: Some(token),
        }
    }

    /// The guarded view.
    pub fn state_mut(&mut self) -> &mut dyn StateView {
        self.state.as_mut()
    }

    /// Reverts the snapshot.
    pub fn release(mut self) -> Result<()> {
        let Some(token) = self.token.take() else {
            return Ok(());
        };
        let snapshot = token.id();
        self.state
            .revert_to_snapshot(token)
            .map_err(|source| PreviewError::SnapshotLeak { snapshot, source })
    }
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            let snapshot = token.id();
            if let Err(err) = self.state.revert_to_snapshot(token) {
                error!(snapshot, error = %err, "[qc-18] Snapshot leaked on unwind");
            }
        }
    }
}

/// Parameters of the virtual block every preview runs in.
#[derive(Clone, Debug)]
pub struct ExecutorSettings {
    /// Chain parameters.
    pub chain: ChainConfig,
    /// Gas pool of the virtual block.
    pub gas_ceiling: u64,
    /// Fee beneficiary override.
    pub coinbase: Option<Address>,
    /// Interpreter settings.
    pub vm: VmConfig,
}

/// Previews single transactions against throwaway snapshots.
pub struct SpeculativeExecutor {
    chain: Arc<dyn ChainState>,
    primitive: Arc<dyn ExecutionPrimitive>,
    time: Arc<dyn TimeSource>,
    settings: ExecutorSettings,
}

impl SpeculativeExecutor {
    /// Creates an executor over the given collaborators.
    pub fn new(
        chain: Arc<dyn ChainState>,
        primitive: Arc<dyn ExecutionPrimitive>,
        time: Arc<dyn TimeSource>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            chain,
            primitive,
            time,
            settings,
        }
    }

    /// Previews `entry` on top of the current head.
    ///
    /// Primitive failures are captured in the outcome. State read failures
    /// and snapshot leaks are returned as errors.
    pub fn preview(&self, entry: &PoolEntry) -> Result<PreviewOutcome> {
        let started = Instant::now();

        let head = self.chain.current_head()?;
        let state = self.chain.state_at(&head.state_root)?;
        let mut guard = SnapshotGuard::acquire(state);

        let coinbase = self.settings.coinbase.unwrap_or(head.coinbase);
        let header = ExecutionHeader::child_of(
            &head,
            self.settings.gas_ceiling,
            self.time.now() / 1000,
            coinbase,
        );
        let ctx = ApplyContext {
            chain_config: &self.settings.chain,
            chain: self.chain.as_ref(),
            header: &header,
            coinbase: self.settings.coinbase,
            vm: self.settings.vm,
        };

        let mut gas_pool = GasPool::new(header.gas_limit);
        let mut gas_used = 0u64;
        let result = self.primitive.apply(
            &ctx,
            guard.state_mut(),
            &entry.transaction,
            entry.sender,
            &mut gas_pool,
            &mut gas_used,
        );

        guard.release()?;

        debug!(
            tx_hash = %short_hex(&entry.hash),
            head = head.height,
            gas_used,
            "[qc-18] Snapshot reverted"
        );

        Ok(PreviewOutcome {
            tx_hash: entry.hash,
            sender: entry.sender,
            head_number: head.height,
            result,
            elapsed: started.elapsed(),
        })
    }
}

impl std::fmt::Debug for SpeculativeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeculativeExecutor")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
