//! # Event Loop
//!
//! The single serialized worker that owns every preview.
//!
//! Producers enqueue tagged [`LoopEvent`]s on a bounded channel; the worker
//! consumes them strictly in arrival order. Admission happens on the
//! producer side, so events received while `Stopped` still leave their
//! transactions in the pool. Execution is deferred until `Start`, which
//! drains the Executing backlog in admission order.
//!
//! ## Error policy
//!
//! - state failures abort the current batch / promotion cycle, are counted
//!   and reported to the sink, and the loop keeps running
//! - entries an aborted cycle left Executing are previewed by the next
//!   batch, head or start handled while `Running`
//! - a snapshot leak halts the worker

use crate::domain::{short_hex, BlockHeader, Hash, PoolEntry, PreviewPool, PreviewStats};
use crate::error::{PreviewError, Result};
use crate::executor::SpeculativeExecutor;
use crate::ports::{ChainState, PreviewSink};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events consumed by the worker.
#[derive(Debug)]
pub enum LoopEvent {
    /// Transactions admitted by one `submit` call, in batch order.
    NewBatch {
        /// Correlates the batch with the submitting call's span.
        correlation_id: Uuid,
        /// Hashes admitted as Executing.
        hashes: Vec<Hash>,
    },
    /// A new canonical head.
    NewHead(BlockHeader),
    /// Stopped -> Running.
    Start,
    /// Running -> Stopped.
    Stop,
    /// Acknowledged once every earlier event is handled.
    Barrier(oneshot::Sender<()>),
}

/// Worker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LoopState {
    /// Events are accepted, nothing executes.
    #[default]
    Stopped,
    /// Executable transactions are previewed as they arrive.
    Running,
}

/// Flags the worker publishes to the service.
#[derive(Debug, Default)]
pub struct WorkerStatus {
    running: AtomicBool,
    halted: AtomicBool,
}

impl WorkerStatus {
    /// True while the worker is in `Running`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// True once the worker stopped on a fatal error.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

/// Serialized preview worker.
pub struct EventLoop {
    pool: Arc<PreviewPool>,
    executor: SpeculativeExecutor,
    chain: Arc<dyn ChainState>,
    sink: Arc<dyn PreviewSink>,
    stats: Arc<RwLock<PreviewStats>>,
    status: Arc<WorkerStatus>,
    require_synced_head: bool,
    state: LoopState,
}

impl EventLoop {
    /// Assembles a worker in the `Stopped` state.
    pub fn new(
        pool: Arc<PreviewPool>,
        executor: SpeculativeExecutor,
        chain: Arc<dyn ChainState>,
        sink: Arc<dyn PreviewSink>,
        stats: Arc<RwLock<PreviewStats>>,
        status: Arc<WorkerStatus>,
        require_synced_head: bool,
    ) -> Self {
        Self {
            pool,
            executor,
            chain,
            sink,
            stats,
            status,
            require_synced_head,
            state: LoopState::Stopped,
        }
    }

    /// Consumes events until shutdown, channel close, or a fatal error.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<LoopEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("[qc-18] Preview worker started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!("[qc-18] Shutdown signal received");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("[qc-18] Event queue closed");
                        break;
                    };
                    if let Err(err) = self.handle(event).await {
                        if err.is_fatal() {
                            self.halt(&err).await;
                            break;
                        }
                        self.report_system_error(&err).await;
                    }
                }
            }
        }

        self.status.running.store(false, Ordering::SeqCst);
        info!("[qc-18] Preview worker stopped");
    }

    async fn handle(&mut self, event: LoopEvent) -> Result<()> {
        match event {
            LoopEvent::NewBatch {
                correlation_id,
                hashes,
            } => self.on_batch(correlation_id, hashes).await,
            LoopEvent::NewHead(header) => self.on_new_head(header).await,
            LoopEvent::Start => self.on_start().await,
            LoopEvent::Stop => {
                if self.state == LoopState::Running {
                    info!("[qc-18] Preview worker paused");
                }
                self.set_state(LoopState::Stopped);
                Ok(())
            }
            LoopEvent::Barrier(ack) => {
                // The waiter may have given up.
                let _ = ack.send(());
                Ok(())
            }
        }
    }

    async fn on_batch(&mut self, correlation_id: Uuid, hashes: Vec<Hash>) -> Result<()> {
        if self.state == LoopState::Stopped {
            debug!(%correlation_id, count = hashes.len(), "[qc-18] Batch deferred while stopped");
            return Ok(());
        }
        debug!(%correlation_id, count = hashes.len(), "[qc-18] Batch received");
        self.drain_backlog().await
    }

    async fn on_new_head(&mut self, header: BlockHeader) -> Result<()> {
        if self.require_synced_head {
            if let Some(highest) = self.chain.highest_known_block() {
                if header.height < highest {
                    debug!(head = header.height, highest, "[qc-18] Skipping head while syncing");
                    return Ok(());
                }
            }
        }

        let head = self.promotion_head(header)?;
        let state = self.chain.state_at(&head.state_root)?;
        let promotion = self.pool.promote(|sender| state.get_nonce(sender))?;

        for entry in &promotion.dropped {
            warn!(
                tx_hash = %short_hex(&entry.hash),
                sender = %short_hex(&entry.sender),
                nonce = entry.nonce,
                head = head.height,
                "[qc-18] Dropped stale queued transaction"
            );
        }
        {
            let mut stats = self.stats.write();
            stats.promoted += promotion.promoted.len() as u64;
            stats.dropped_stale += promotion.dropped.len() as u64;
        }
        debug!(
            head = head.height,
            promoted = promotion.promoted.len(),
            dropped = promotion.dropped.len(),
            "[qc-18] Promotion cycle complete"
        );

        if self.state == LoopState::Stopped {
            return Ok(());
        }
        self.drain_backlog().await
    }

    /// The announced head, or the current one if the chain has moved past it.
    fn promotion_head(&self, announced: BlockHeader) -> Result<BlockHeader> {
        let current = self.chain.current_head()?;
        if current.height >= announced.height && current != announced {
            debug!(
                announced = announced.height,
                current = current.height,
                "[qc-18] Announced head superseded"
            );
            return Ok(current);
        }
        Ok(announced)
    }

    async fn on_start(&mut self) -> Result<()> {
        if self.state == LoopState::Running {
            return Ok(());
        }
        self.set_state(LoopState::Running);
        info!("[qc-18] Preview worker running");
        self.drain_backlog().await
    }

    /// Previews every Executing entry in admission order.
    ///
    /// Entries left behind by an aborted cycle are picked up by the next
    /// drain.
    async fn drain_backlog(&mut self) -> Result<()> {
        let backlog = self.pool.executing_backlog();
        if !backlog.is_empty() {
            debug!(backlog = backlog.len(), "[qc-18] Draining executing backlog");
        }
        for entry in backlog {
            self.preview_and_finish(entry).await?;
        }
        Ok(())
    }

    async fn preview_and_finish(&mut self, entry: PoolEntry) -> Result<()> {
        let outcome = self.executor.preview(&entry)?;

        if let Err(err) = self.pool.finish(&entry.hash) {
            self.report_system_error(&err.into()).await;
        }
        self.stats.write().record_preview(&outcome);

        info!(
            tx_hash = %short_hex(&entry.hash),
            sender = %short_hex(&entry.sender),
            nonce = entry.nonce,
            head = outcome.head_number,
            elapsed_us = outcome.elapsed.as_micros() as u64,
            success = outcome.succeeded(),
            "[qc-18] Preview complete"
        );
        self.sink.publish(&outcome).await;
        Ok(())
    }

    fn set_state(&mut self, state: LoopState) {
        self.state = state;
        self.status
            .running
            .store(state == LoopState::Running, Ordering::SeqCst);
    }

    async fn report_system_error(&self, err: &PreviewError) {
        self.stats.write().system_errors += 1;
        error!(error = %err, "[qc-18] System error");
        self.sink.system_error(err).await;
    }

    async fn halt(&mut self, err: &PreviewError) {
        self.status.halted.store(true, Ordering::SeqCst);
        self.set_state(LoopState::Stopped);
        self.stats.write().system_errors += 1;
        error!(error = %err, "[qc-18] Halting preview worker");
        self.sink.system_error(err).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Account, BroadcastSink, InMemoryChain, TransferPrimitive};
    use crate::domain::{
        Address, ChainConfig, EcdsaSignature, ExecutionError, GasPool, Receipt, SignedTransaction,
        TxStatus, ValidatedTransaction, VmConfig, U256,
    };
    use crate::executor::ExecutorSettings;
    use crate::ports::{ApplyContext, ExecutionPrimitive, StateView, SystemTimeSource};
    use std::num::NonZeroUsize;

    const ALICE: [u8; 20] = [0xA1; 20];

    struct Harness {
        chain: InMemoryChain,
        pool: Arc<PreviewPool>,
        stats: Arc<RwLock<PreviewStats>>,
        status: Arc<WorkerStatus>,
        events: mpsc::Sender<LoopEvent>,
        _shutdown: watch::Sender<bool>,
    }

    impl Harness {
        fn spawn(chain: InMemoryChain) -> Self {
            Self::spawn_with(chain, pool(), Arc::new(TransferPrimitive))
        }

        fn spawn_with(
            chain: InMemoryChain,
            pool: Arc<PreviewPool>,
            primitive: Arc<dyn ExecutionPrimitive>,
        ) -> Self {
            let stats = Arc::new(RwLock::new(PreviewStats::default()));
            let status = Arc::new(WorkerStatus::default());
            let chain_port: Arc<dyn ChainState> = Arc::new(chain.clone());
            let executor = SpeculativeExecutor::new(
                Arc::clone(&chain_port),
                primitive,
                Arc::new(SystemTimeSource),
                ExecutorSettings {
                    chain: ChainConfig::default(),
                    gas_ceiling: 10_000_000,
                    coinbase: None,
                    vm: VmConfig::default(),
                },
            );
            let worker = EventLoop::new(
                Arc::clone(&pool),
                executor,
                chain_port,
                Arc::new(BroadcastSink::new()),
                Arc::clone(&stats),
                Arc::clone(&status),
                true,
            );
            let (events, rx) = mpsc::channel(8);
            let (shutdown, shutdown_rx) = watch::channel(false);
            tokio::spawn(worker.run(rx, shutdown_rx));
            Self {
                chain,
                pool,
                stats,
                status,
                events,
                _shutdown: shutdown,
            }
        }

        async fn send(&self, event: LoopEvent) {
            self.events.send(event).await.unwrap();
        }

        async fn barrier(&self) {
            let (tx, rx) = oneshot::channel();
            self.send(LoopEvent::Barrier(tx)).await;
            rx.await.unwrap();
        }

        fn admit(&self, nonce: u64, account_nonce: u64) -> Hash {
            let transaction = SignedTransaction {
                to: Some([0xB0; 20]),
                value: U256::one(),
                nonce,
                gas_price: U256::one(),
                gas_limit: 21_000,
                data: vec![],
                signature: EcdsaSignature::default(),
            };
            let hash = transaction.hash();
            self.pool
                .admit(
                    ValidatedTransaction {
                        transaction,
                        hash,
                        sender: ALICE,
                    },
                    account_nonce,
                    0,
                )
                .unwrap();
            hash
        }
    }

    fn pool() -> Arc<PreviewPool> {
        Arc::new(PreviewPool::new(NonZeroUsize::new(8).unwrap()))
    }

    fn batch(hashes: Vec<Hash>) -> LoopEvent {
        LoopEvent::NewBatch {
            correlation_id: Uuid::new_v4(),
            hashes,
        }
    }

    /// Finishes the entry itself before delegating, as a misbehaving
    /// collaborator would.
    struct FinishingPrimitive {
        pool: Arc<PreviewPool>,
    }

    impl ExecutionPrimitive for FinishingPrimitive {
        fn apply(
            &self,
            ctx: &ApplyContext<'_>,
            state: &mut dyn StateView,
            tx: &SignedTransaction,
            sender: Address,
            gas_pool: &mut GasPool,
            gas_used: &mut u64,
        ) -> std::result::Result<Receipt, ExecutionError> {
            self.pool.finish(&tx.hash()).unwrap();
            TransferPrimitive.apply(ctx, state, tx, sender, gas_pool, gas_used)
        }
    }

    fn chain() -> InMemoryChain {
        InMemoryChain::new(30_000_000).with_account(ALICE, Account::new(0, 1_000_000u64))
    }

    #[tokio::test]
    async fn test_batch_deferred_until_start() {
        let harness = Harness::spawn(chain());
        let hash = harness.admit(0, 0);

        harness
            .send(LoopEvent::NewBatch {
                correlation_id: Uuid::new_v4(),
                hashes: vec![hash],
            })
            .await;
        harness.barrier().await;
        assert_eq!(harness.pool.status(&hash), TxStatus::Executing);
        assert!(!harness.status.is_running());

        harness.send(LoopEvent::Start).await;
        harness.barrier().await;
        assert!(harness.status.is_running());
        assert_eq!(harness.pool.status(&hash), TxStatus::Executed);
        assert_eq!(harness.stats.read().previews_executed, 1);
    }

    #[tokio::test]
    async fn test_batch_after_drain_is_not_previewed_twice() {
        let harness = Harness::spawn(chain());
        let hash = harness.admit(0, 0);

        harness.send(LoopEvent::Start).await;
        harness
            .send(LoopEvent::NewBatch {
                correlation_id: Uuid::new_v4(),
                hashes: vec![hash],
            })
            .await;
        harness.barrier().await;

        assert_eq!(harness.stats.read().previews_executed, 1);
    }

    #[tokio::test]
    async fn test_unsynced_head_skips_promotion() {
        let harness = Harness::spawn(chain());
        let hash = harness.admit(1, 0);
        harness.send(LoopEvent::Start).await;

        let head = harness.chain.mine_block(&[], |accounts| {
            accounts.entry(ALICE).or_default().nonce = 1;
        });
        harness.chain.set_highest_known(Some(head.height + 10));
        harness.send(LoopEvent::NewHead(head.clone())).await;
        harness.barrier().await;
        assert_eq!(harness.pool.status(&hash), TxStatus::Queued);

        harness.chain.set_highest_known(None);
        harness.send(LoopEvent::NewHead(head)).await;
        harness.barrier().await;
        assert_eq!(harness.pool.status(&hash), TxStatus::Executed);
        assert_eq!(harness.stats.read().promoted, 1);
    }

    #[tokio::test]
    async fn test_state_failure_is_counted_and_loop_survives() {
        let harness = Harness::spawn(chain());
        harness.send(LoopEvent::Start).await;
        let head = harness.chain.current_head().unwrap();

        harness.chain.fail_state_reads(true);
        harness.send(LoopEvent::NewHead(head)).await;
        harness.barrier().await;

        assert_eq!(harness.stats.read().system_errors, 1);
        assert!(harness.status.is_running());
        assert!(!harness.status.is_halted());
    }

    #[tokio::test]
    async fn test_snapshot_leak_halts_worker() {
        let harness = Harness::spawn(chain());
        let hash = harness.admit(0, 0);
        harness.chain.fail_reverts(true);

        harness.send(LoopEvent::Start).await;
        let (tx, rx) = oneshot::channel();
        // The worker may already be gone, in which case send fails.
        let _ = harness.events.send(LoopEvent::Barrier(tx)).await;
        assert!(rx.await.is_err());

        assert!(harness.status.is_halted());
        assert!(!harness.status.is_running());
        assert_eq!(harness.pool.status(&hash), TxStatus::Executing);
    }

    #[tokio::test]
    async fn test_entry_stranded_by_state_failure_is_retried() {
        let harness = Harness::spawn(chain());
        harness.send(LoopEvent::Start).await;

        let stranded = harness.admit(0, 0);
        harness.chain.fail_state_reads(true);
        harness.send(batch(vec![stranded])).await;
        harness.barrier().await;
        assert_eq!(harness.pool.status(&stranded), TxStatus::Executing);
        assert_eq!(harness.stats.read().system_errors, 1);

        harness.chain.fail_state_reads(false);
        let next = harness.admit(1, 1);
        harness.send(batch(vec![next])).await;
        harness.barrier().await;

        assert_eq!(harness.pool.status(&stranded), TxStatus::Executed);
        assert_eq!(harness.pool.status(&next), TxStatus::Executed);
        assert_eq!(harness.pool.summary().executing, 0);
        assert_eq!(harness.stats.read().previews_executed, 2);
    }

    #[tokio::test]
    async fn test_back_to_back_heads_promote_against_current_head() {
        let harness = Harness::spawn(chain());
        let hash = harness.admit(2, 0);
        harness.send(LoopEvent::Start).await;

        let first = harness.chain.mine_block(&[], |accounts| {
            accounts.entry(ALICE).or_default().nonce = 1;
        });
        let second = harness.chain.mine_block(&[], |accounts| {
            accounts.entry(ALICE).or_default().nonce = 2;
        });
        harness.send(LoopEvent::NewHead(first)).await;
        harness.send(LoopEvent::NewHead(second)).await;
        harness.barrier().await;

        let stats = harness.stats.read().clone();
        assert_eq!(stats.system_errors, 0);
        assert_eq!(stats.promoted, 1);
        assert_eq!(stats.previews_succeeded, 1);
        assert_eq!(harness.pool.status(&hash), TxStatus::Executed);
    }

    #[tokio::test]
    async fn test_finish_failure_is_a_system_error() {
        let pool = pool();
        let primitive = Arc::new(FinishingPrimitive {
            pool: Arc::clone(&pool),
        });
        let harness = Harness::spawn_with(chain(), pool, primitive);
        let hash = harness.admit(0, 0);

        harness.send(LoopEvent::Start).await;
        harness.barrier().await;

        let stats = harness.stats.read().clone();
        assert_eq!(stats.system_errors, 1);
        assert_eq!(stats.previews_executed, 1);
        assert_eq!(harness.pool.status(&hash), TxStatus::Executed);
        assert!(harness.status.is_running());
    }
}
