//! Preview sinks.
//!
//! `TracingSink` writes every outcome to the log; `BroadcastSink` fans
//! outcomes out to any number of subscribers over a
//! `tokio::sync::broadcast` channel.

use crate::domain::{short_hex, PreviewOutcome};
use crate::error::PreviewError;
use crate::ports::PreviewSink;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Default buffer of the broadcast channel.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Logs outcomes; drops them otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl PreviewSink for TracingSink {
    async fn publish(&self, outcome: &PreviewOutcome) {
        match &outcome.result {
            Ok(receipt) => info!(
                tx_hash = %short_hex(&outcome.tx_hash),
                success = receipt.success,
                gas_used = receipt.gas_used,
                logs = receipt.logs.len(),
                "[qc-18] Preview result"
            ),
            Err(err) => warn!(
                tx_hash = %short_hex(&outcome.tx_hash),
                error = %err,
                "[qc-18] Preview failed"
            ),
        }
    }

    async fn system_error(&self, err: &PreviewError) {
        error!(error = %err, "[qc-18] Preview system error");
    }
}

/// Publishes outcomes on a broadcast channel.
///
/// Outcomes published while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<Arc<PreviewOutcome>>,
    published: Arc<AtomicU64>,
}

impl BroadcastSink {
    /// Create a sink with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BROADCAST_CAPACITY)
    }

    /// Create a sink buffering up to `capacity` outcomes per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe to outcomes published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PreviewOutcome>> {
        self.sender.subscribe()
    }

    /// Total outcomes published.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PreviewSink for BroadcastSink {
    async fn publish(&self, outcome: &PreviewOutcome) {
        self.published.fetch_add(1, Ordering::Relaxed);
        // Err only means there are no subscribers.
        let _ = self.sender.send(Arc::new(outcome.clone()));
    }

    async fn system_error(&self, err: &PreviewError) {
        warn!(error = %err, "[qc-18] System error (not broadcast)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutionError;
    use std::time::Duration;

    fn outcome(tag: u8) -> PreviewOutcome {
        PreviewOutcome {
            tx_hash: [tag; 32],
            sender: [tag; 20],
            head_number: 1,
            result: Err(ExecutionError::OutOfGas),
            elapsed: Duration::from_micros(5),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_subscriber() {
        let sink = BroadcastSink::with_capacity(4);
        let mut first = sink.subscribe();
        let mut second = sink.subscribe();

        sink.publish(&outcome(1)).await;

        assert_eq!(first.recv().await.unwrap().tx_hash, [1; 32]);
        assert_eq!(second.recv().await.unwrap().tx_hash, [1; 32]);
        assert_eq!(sink.published(), 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let sink = BroadcastSink::new();
        sink.publish(&outcome(2)).await;
        assert_eq!(sink.published(), 1);

        let mut late = sink.subscribe();
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_everything() {
        TracingSink.publish(&outcome(3)).await;
        TracingSink
            .system_error(&PreviewError::WorkerUnavailable)
            .await;
    }
}
