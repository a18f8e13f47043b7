//! # Transaction Preview Service
//!
//! Process-scoped context object owning the pool, the worker handle and every
//! collaborator. Nothing in this crate lives in a global.
//!
//! ## Initialization order
//!
//! 1. validate [`PreviewConfig`]
//! 2. build the pool and the speculative executor
//! 3. open the bounded event queue and the shutdown channel
//! 4. spawn the [`EventLoop`] (it starts `Stopped`)
//!
//! ## Teardown
//!
//! [`PreviewService::close`] is the single teardown path: it signals
//! shutdown, waits for the worker task and refuses a second call.
//!
//! ## Threading
//!
//! `submit` validates and admits on the caller's task, then hands executable
//! hashes to the worker. Awaiting a full queue is the backpressure point.

use crate::config::PreviewConfig;
use crate::domain::{
    short_hex, validate_transaction, AdmissionError, AdmissionOutcome, BlockHeader, Hash,
    PoolSummary, PreviewPool, PreviewStats, SignedTransaction, StateError, TxStatus,
    ValidationError, ValidationRules, VmConfig,
};
use crate::error::{PreviewError, Result};
use crate::executor::{ExecutorSettings, SpeculativeExecutor};
use crate::ports::{
    AdmissionResult, ChainState, ExecutionPrimitive, PreviewSink, SenderRecovery, StateView,
    TimeSource, TxPreviewApi,
};
use crate::scheduler::{EventLoop, LoopEvent, WorkerStatus};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// External collaborators the service is built from.
#[derive(Clone)]
pub struct PreviewContext {
    /// State snapshot facade.
    pub chain: Arc<dyn ChainState>,
    /// Single-transaction executor.
    pub primitive: Arc<dyn ExecutionPrimitive>,
    /// Signature recovery.
    pub recovery: Arc<dyn SenderRecovery>,
    /// Receiver of preview outcomes.
    pub sink: Arc<dyn PreviewSink>,
    /// Wall clock.
    pub time: Arc<dyn TimeSource>,
}

/// The transaction preview service.
pub struct PreviewService {
    config: PreviewConfig,
    rules: ValidationRules,
    pool: Arc<PreviewPool>,
    chain: Arc<dyn ChainState>,
    recovery: Arc<dyn SenderRecovery>,
    time: Arc<dyn TimeSource>,
    stats: Arc<RwLock<PreviewStats>>,
    status: Arc<WorkerStatus>,
    events: mpsc::Sender<LoopEvent>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl PreviewService {
    /// Builds the service and spawns its worker on the current runtime.
    ///
    /// The worker starts `Stopped`; call [`PreviewService::start`] to begin
    /// previewing.
    pub fn spawn(ctx: PreviewContext, config: PreviewConfig) -> Result<Self> {
        config.validate()?;

        info!("[qc-18] Initializing Transaction Preview Service");
        info!("  History capacity: {}", config.executed_history_capacity);
        info!("  Event queue: {}", config.event_queue_capacity);
        info!("  Gas ceiling: {}", config.execution_gas_ceiling);

        let pool = Arc::new(PreviewPool::new(config.history_capacity()?));
        let stats = Arc::new(RwLock::new(PreviewStats::default()));
        let status = Arc::new(WorkerStatus::default());

        let executor = SpeculativeExecutor::new(
            Arc::clone(&ctx.chain),
            Arc::clone(&ctx.primitive),
            Arc::clone(&ctx.time),
            ExecutorSettings {
                chain: config.chain.clone(),
                gas_ceiling: config.execution_gas_ceiling,
                coinbase: config.coinbase,
                vm: VmConfig {
                    record_call_trace: config.record_call_trace,
                },
            },
        );

        let (events, events_rx) = mpsc::channel(config.event_queue_capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let worker = EventLoop::new(
            Arc::clone(&pool),
            executor,
            Arc::clone(&ctx.chain),
            Arc::clone(&ctx.sink),
            Arc::clone(&stats),
            Arc::clone(&status),
            config.require_synced_head,
        );
        let handle = tokio::spawn(worker.run(events_rx, shutdown_rx));

        Ok(Self {
            rules: ValidationRules {
                max_tx_size: config.max_tx_size,
                chain: config.chain.clone(),
            },
            config,
            pool,
            chain: ctx.chain,
            recovery: ctx.recovery,
            time: ctx.time,
            stats,
            status,
            events,
            shutdown,
            worker: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
        })
    }

    /// Submits a batch under a fresh correlation id.
    pub async fn submit(&self, transactions: Vec<SignedTransaction>) -> Result<Vec<AdmissionResult>> {
        self.submit_batch(Uuid::new_v4(), transactions).await
    }

    /// Validates and admits `transactions`, then hands executable ones to
    /// the worker in batch order.
    ///
    /// All transactions are checked against one fresh state view. A state
    /// failure stops admission; transactions already admitted are still
    /// handed over before the error is returned.
    #[instrument(skip(self, transactions), fields(correlation_id = %correlation_id, batch = transactions.len()))]
    pub async fn submit_batch(
        &self,
        correlation_id: Uuid,
        transactions: Vec<SignedTransaction>,
    ) -> Result<Vec<AdmissionResult>> {
        self.ensure_accepting()?;

        let head = self
            .chain
            .current_head()
            .map_err(|err| self.admission_failure(err, 0))?;
        let state = self
            .chain
            .state_at(&head.state_root)
            .map_err(|err| self.admission_failure(err, 0))?;

        let mut results = Vec::with_capacity(transactions.len());
        let mut executable = Vec::new();
        let mut failure = None;

        for tx in &transactions {
            match self.admit_one(tx, state.as_ref(), &head) {
                Ok((hash, outcome)) => {
                    debug!(tx_hash = %short_hex(&hash), ?outcome, "[qc-18] Admitted");
                    if outcome == AdmissionOutcome::Executing {
                        executable.push(hash);
                    }
                    results.push(Ok(outcome));
                }
                Err(ValidationError::Rejected(err)) => {
                    debug!(tx_hash = %short_hex(&tx.hash()), error = %err, "[qc-18] Rejected");
                    results.push(Err(err));
                }
                Err(ValidationError::State(err)) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if !executable.is_empty() {
            self.send(LoopEvent::NewBatch {
                correlation_id,
                hashes: executable,
            })
            .await?;
        }

        if let Some(err) = failure {
            return Err(self.admission_failure(err, results.len()));
        }
        Ok(results)
    }

    fn admission_failure(&self, err: StateError, processed: usize) -> PreviewError {
        self.stats.write().system_errors += 1;
        error!(error = %err, processed, "[qc-18] Admission aborted by state failure");
        err.into()
    }

    fn admit_one(
        &self,
        tx: &SignedTransaction,
        state: &dyn StateView,
        head: &BlockHeader,
    ) -> std::result::Result<(Hash, AdmissionOutcome), ValidationError> {
        let hash = tx.hash();
        match self.pool.status(&hash) {
            TxStatus::Queued | TxStatus::Executing => return Err(AdmissionError::AlreadyKnown.into()),
            TxStatus::Executed => return Err(AdmissionError::AlreadyExecuted.into()),
            TxStatus::Unknown => {}
        }
        if self.chain.has_receipt(&hash)? {
            return Err(AdmissionError::AlreadyMined.into());
        }

        let validated = validate_transaction(tx, state, head, &self.rules, self.recovery.as_ref())?;

        if self.config.require_contract_target {
            if let Some(to) = tx.to {
                if state.get_code(&to)?.is_empty() {
                    return Err(AdmissionError::TargetNotContract(to).into());
                }
            }
        }

        let account_nonce = state.get_nonce(&validated.sender)?;
        let outcome = self.pool.admit(validated, account_nonce, self.time.now())?;
        Ok((hash, outcome))
    }

    /// Reports the bucket holding `tx_hash`.
    pub fn status(&self, tx_hash: &Hash) -> TxStatus {
        self.pool.status(tx_hash)
    }

    /// Announces a new canonical head to the worker.
    pub async fn notify_head(&self, header: BlockHeader) -> Result<()> {
        self.ensure_accepting()?;
        debug!(head = header.height, "[qc-18] New head");
        self.send(LoopEvent::NewHead(header)).await
    }

    /// Asks the worker to begin previewing.
    pub async fn start(&self) -> Result<()> {
        self.ensure_accepting()?;
        self.send(LoopEvent::Start).await
    }

    /// Asks the worker to pause previewing. Admission continues.
    pub async fn stop(&self) -> Result<()> {
        self.ensure_accepting()?;
        self.send(LoopEvent::Stop).await
    }

    /// Waits until every event queued before this call has been handled.
    pub async fn barrier(&self) -> Result<()> {
        self.ensure_accepting()?;
        let (ack, done) = oneshot::channel();
        self.send(LoopEvent::Barrier(ack)).await?;
        done.await.map_err(|_| self.unavailable())
    }

    /// True while the worker is `Running`.
    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// True once the worker stopped on a snapshot leak.
    pub fn is_halted(&self) -> bool {
        self.status.is_halted()
    }

    /// Current statistics.
    pub fn stats(&self) -> PreviewStats {
        self.stats.read().clone()
    }

    /// Current bucket sizes.
    pub fn pool_summary(&self) -> PoolSummary {
        self.pool.summary()
    }

    /// Active configuration.
    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    /// Stops the worker and waits for it to exit.
    ///
    /// Events still queued are not drained. A second call returns
    /// [`PreviewError::AlreadyClosed`].
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(PreviewError::AlreadyClosed);
        }

        info!("[qc-18] Closing Transaction Preview Service");
        // Err means the worker already exited.
        let _ = self.shutdown.send(true);

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "[qc-18] Preview worker task failed");
            }
        }
        Ok(())
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PreviewError::AlreadyClosed);
        }
        if self.status.is_halted() {
            return Err(PreviewError::Halted);
        }
        Ok(())
    }

    async fn send(&self, event: LoopEvent) -> Result<()> {
        self.events.send(event).await.map_err(|_| self.unavailable())
    }

    fn unavailable(&self) -> PreviewError {
        if self.status.is_halted() {
            PreviewError::Halted
        } else {
            PreviewError::WorkerUnavailable
        }
    }
}

impl Drop for PreviewService {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            let _ = self.shutdown.send(true);
        }
    }
}

impl std::fmt::Debug for PreviewService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewService")
            .field("config", &self.config)
            .field("pool", &self.pool.summary())
            .field("running", &self.is_running())
            .field("halted", &self.is_halted())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TxPreviewApi for PreviewService {
    async fn submit(&self, transactions: Vec<SignedTransaction>) -> Result<Vec<AdmissionResult>> {
        PreviewService::submit(self, transactions).await
    }

    fn status(&self, tx_hash: &Hash) -> TxStatus {
        PreviewService::status(self, tx_hash)
    }

    async fn notify_head(&self, header: BlockHeader) -> Result<()> {
        PreviewService::notify_head(self, header).await
    }

    async fn start(&self) -> Result<()> {
        PreviewService::start(self).await
    }

    async fn stop(&self) -> Result<()> {
        PreviewService::stop(self).await
    }

    async fn barrier(&self) -> Result<()> {
        PreviewService::barrier(self).await
    }

    async fn close(&self) -> Result<()> {
        PreviewService::close(self).await
    }
}
