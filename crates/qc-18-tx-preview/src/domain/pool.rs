//! # Preview Pool - Bucketed Transaction Store
//!
//! Classifies admitted transactions by nonce readiness and tracks their
//! progress through the speculative executor.
//!
//! ## Buckets
//!
//! - `queued`: nonce ahead of the sender's on-chain nonce
//! - `executing`: handed to the worker, preview not yet finalized
//! - `executed`: bounded ring of recently previewed identities
//!
//! ## Invariants Enforced
//!
//! - A hash lives in at most one bucket (checked in `admit()` under the lock)
//! - `executed` never exceeds its capacity (`ExecutedHistory` evicts oldest)
//! - Promotion never moves a transaction whose nonce the chain has passed
//!
//! All mutations run under a single write lock. `status()` takes the read
//! side only, so lookups never wait on state reads.

use super::entities::{
    AdmissionOutcome, Address, Hash, PoolEntry, PoolSummary, Timestamp, TxStatus,
    ValidatedTransaction,
};
use super::errors::{AdmissionError, PoolError, StateError};
use super::history::ExecutedHistory;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;

/// Result of one promotion cycle.
#[derive(Debug, Default)]
pub struct Promotion {
    /// Entries moved to Executing, in admission order.
    pub promoted: Vec<PoolEntry>,
    /// Entries dropped because the on-chain nonce passed them.
    pub dropped: Vec<PoolEntry>,
}

#[derive(Debug)]
struct PoolInner {
    queued: HashMap<Hash, PoolEntry>,
    executing: HashMap<Hash, PoolEntry>,
    executed: ExecutedHistory,
    next_seq: u64,
}

impl PoolInner {
    fn status(&self, hash: &Hash) -> TxStatus {
        if self.queued.contains_key(hash) {
            TxStatus::Queued
        } else if self.executing.contains_key(hash) {
            TxStatus::Executing
        } else if self.executed.contains(hash) {
            TxStatus::Executed
        } else {
            TxStatus::Unknown
        }
    }
}

/// Thread-safe three-bucket pool.
#[derive(Debug)]
pub struct PreviewPool {
    inner: RwLock<PoolInner>,
}

impl PreviewPool {
    /// Creates an empty pool whose history holds `history_capacity` identities.
    pub fn new(history_capacity: NonZeroUsize) -> Self {
        Self {
            inner: RwLock::new(PoolInner {
                queued: HashMap::new(),
                executing: HashMap::new(),
                executed: ExecutedHistory::new(history_capacity),
                next_seq: 0,
            }),
        }
    }

    /// Reports which bucket holds `hash`.
    pub fn status(&self, hash: &Hash) -> TxStatus {
        self.inner.read().status(hash)
    }

    /// Inserts a validated transaction given its sender's current nonce.
    ///
    /// Nonce equal to `account_nonce` lands in Executing, ahead of it in
    /// Queued. A nonce behind it never reaches the pool through validation
    /// and is rejected again here.
    pub fn admit(
        &self,
        validated: ValidatedTransaction,
        account_nonce: u64,
        now: Timestamp,
    ) -> Result<AdmissionOutcome, AdmissionError> {
        let tx_nonce = validated.transaction.nonce;
        let mut inner = self.inner.write();

        match inner.status(&validated.hash) {
            TxStatus::Queued | TxStatus::Executing => return Err(AdmissionError::AlreadyKnown),
            TxStatus::Executed => return Err(AdmissionError::AlreadyExecuted),
            TxStatus::Unknown => {}
        }

        if tx_nonce < account_nonce {
            return Err(AdmissionError::NonceTooLow {
                account_nonce,
                tx_nonce,
            });
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let entry = PoolEntry::new(validated, seq, now);

        if tx_nonce == account_nonce {
            inner.executing.insert(entry.hash, entry);
            Ok(AdmissionOutcome::Executing)
        } else {
            inner.queued.insert(entry.hash, entry);
            Ok(AdmissionOutcome::Queued)
        }
    }

    /// Re-evaluates every queued transaction against fresh nonces.
    ///
    /// `nonce_of` is consulted once per distinct sender before any bucket is
    /// touched; a read failure aborts the cycle and leaves the pool as it was.
    pub fn promote<F>(&self, mut nonce_of: F) -> Result<Promotion, StateError>
    where
        F: FnMut(&Address) -> Result<u64, StateError>,
    {
        let senders: HashSet<Address> = self
            .inner
            .read()
            .queued
            .values()
            .map(|entry| entry.sender)
            .collect();

        let mut nonces = HashMap::with_capacity(senders.len());
        for sender in senders {
            nonces.insert(sender, nonce_of(&sender)?);
        }

        let mut inner = self.inner.write();
        let mut candidates: Vec<(Hash, u64, u64)> = inner
            .queued
            .values()
            .filter_map(|entry| {
                nonces
                    .get(&entry.sender)
                    .map(|&nonce| (entry.hash, entry.seq, nonce))
            })
            .collect();
        candidates.sort_by_key(|&(_, seq, _)| seq);

        let mut promotion = Promotion::default();
        for (hash, _, account_nonce) in candidates {
            let Some(entry) = inner.queued.get(&hash) else {
                continue;
            };
            if entry.nonce == account_nonce {
                if let Some(entry) = inner.queued.remove(&hash) {
                    inner.executing.insert(hash, entry.clone());
                    promotion.promoted.push(entry);
                }
            } else if entry.nonce < account_nonce {
                if let Some(entry) = inner.queued.remove(&hash) {
                    promotion.dropped.push(entry);
                }
            }
        }

        Ok(promotion)
    }

    /// Moves `hash` from Executing into the executed history.
    ///
    /// Returns the identity evicted from history, if the ring was full.
    pub fn finish(&self, hash: &Hash) -> Result<Option<Hash>, PoolError> {
        let mut inner = self.inner.write();
        if inner.executing.remove(hash).is_none() {
            return Err(PoolError::NotExecuting(*hash));
        }
        Ok(inner.executed.record(*hash))
    }

    /// Every Executing entry, in admission order.
    pub fn executing_backlog(&self) -> Vec<PoolEntry> {
        let mut backlog: Vec<PoolEntry> = self.inner.read().executing.values().cloned().collect();
        backlog.sort_by_key(|entry| entry.seq);
        backlog
    }

    /// Current bucket sizes.
    pub fn summary(&self) -> PoolSummary {
        let inner = self.inner.read();
        PoolSummary {
            queued: inner.queued.len(),
            executing: inner.executing.len(),
            executed: inner.executed.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{EcdsaSignature, SignedTransaction, U256};

    fn validated(sender: u8, nonce: u64) -> ValidatedTransaction {
        let transaction = SignedTransaction {
            to: Some([0xCC; 20]),
            value: U256::from(1u64),
            nonce,
            gas_price: U256::one(),
            gas_limit: 21_000,
            data: vec![sender],
            signature: EcdsaSignature::default(),
        };
        ValidatedTransaction {
            hash: transaction.hash(),
            transaction,
            sender: [sender; 20],
        }
    }

    fn pool(capacity: usize) -> PreviewPool {
        PreviewPool::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn test_admit_classifies_by_nonce() {
        let pool = pool(10);
        let ready = validated(1, 5);
        let ahead = validated(2, 7);

        assert_eq!(
            pool.admit(ready.clone(), 5, 0).unwrap(),
            AdmissionOutcome::Executing
        );
        assert_eq!(
            pool.admit(ahead.clone(), 5, 0).unwrap(),
            AdmissionOutcome::Queued
        );

        assert_eq!(pool.status(&ready.hash), TxStatus::Executing);
        assert_eq!(pool.status(&ahead.hash), TxStatus::Queued);
    }

    #[test]
    fn test_admit_rejects_duplicates_in_every_bucket() {
        let pool = pool(10);
        let queued = validated(1, 9);
        let executing = validated(2, 0);

        pool.admit(queued.clone(), 0, 0).unwrap();
        pool.admit(executing.clone(), 0, 0).unwrap();

        assert_eq!(
            pool.admit(queued, 0, 0).unwrap_err(),
            AdmissionError::AlreadyKnown
        );
        assert_eq!(
            pool.admit(executing.clone(), 0, 0).unwrap_err(),
            AdmissionError::AlreadyKnown
        );

        pool.finish(&executing.hash).unwrap();
        assert_eq!(
            pool.admit(executing, 0, 0).unwrap_err(),
            AdmissionError::AlreadyExecuted
        );
    }

    #[test]
    fn test_admit_rejects_stale_nonce() {
        let pool = pool(10);
        let err = pool.admit(validated(1, 3), 5, 0).unwrap_err();
        assert!(matches!(err, AdmissionError::NonceTooLow { .. }));
        assert_eq!(pool.summary(), PoolSummary::default());
    }

    #[test]
    fn test_promote_moves_ready_and_drops_stale() {
        let pool = pool(10);
        let ready = validated(1, 7);
        let stale = validated(2, 6);
        let waiting = validated(3, 9);

        for tx in [&ready, &stale, &waiting] {
            pool.admit(tx.clone(), 5, 0).unwrap();
        }

        let promotion = pool
            .promote(|sender| {
                Ok(match sender[0] {
                    1 => 7,
                    2 => 8,
                    _ => 5,
                })
            })
            .unwrap();

        assert_eq!(promotion.promoted.len(), 1);
        assert_eq!(promotion.promoted[0].hash, ready.hash);
        assert_eq!(promotion.dropped.len(), 1);
        assert_eq!(promotion.dropped[0].hash, stale.hash);

        assert_eq!(pool.status(&ready.hash), TxStatus::Executing);
        assert_eq!(pool.status(&stale.hash), TxStatus::Unknown);
        assert_eq!(pool.status(&waiting.hash), TxStatus::Queued);
    }

    #[test]
    fn test_promote_preserves_admission_order() {
        let pool = pool(10);
        let txs: Vec<_> = (1..=5).map(|sender| validated(sender, 1)).collect();
        for tx in &txs {
            pool.admit(tx.clone(), 0, 0).unwrap();
        }

        let promotion = pool.promote(|_| Ok(1)).unwrap();
        let order: Vec<_> = promotion.promoted.iter().map(|e| e.hash).collect();
        let expected: Vec<_> = txs.iter().map(|tx| tx.hash).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_promote_state_failure_leaves_pool_untouched() {
        let pool = pool(10);
        let tx = validated(1, 2);
        pool.admit(tx.clone(), 0, 0).unwrap();

        let err = pool
            .promote(|_| Err(StateError::Unavailable("offline".into())))
            .unwrap_err();
        assert!(matches!(err, StateError::Unavailable(_)));
        assert_eq!(pool.status(&tx.hash), TxStatus::Queued);
    }

    #[test]
    fn test_finish_requires_executing() {
        let pool = pool(10);
        let tx = validated(1, 4);
        pool.admit(tx.clone(), 0, 0).unwrap();

        assert_eq!(
            pool.finish(&tx.hash).unwrap_err(),
            PoolError::NotExecuting(tx.hash)
        );
    }

    #[test]
    fn test_history_eviction_makes_hash_unknown() {
        let pool = pool(2);
        let txs: Vec<_> = (1..=3).map(|sender| validated(sender, 0)).collect();

        let mut evicted = Vec::new();
        for tx in &txs {
            pool.admit(tx.clone(), 0, 0).unwrap();
            evicted.push(pool.finish(&tx.hash).unwrap());
        }

        assert_eq!(evicted, vec![None, None, Some(txs[0].hash)]);
        assert_eq!(pool.status(&txs[0].hash), TxStatus::Unknown);
        assert_eq!(pool.status(&txs[2].hash), TxStatus::Executed);
        assert_eq!(pool.summary().executed, 2);

        // Evicted identities may be resubmitted.
        assert_eq!(
            pool.admit(txs[0].clone(), 0, 0).unwrap(),
            AdmissionOutcome::Executing
        );
    }

    #[test]
    fn test_backlog_is_sorted_by_admission() {
        let pool = pool(10);
        let first = validated(9, 0);
        let second = validated(1, 0);
        pool.admit(first.clone(), 0, 0).unwrap();
        pool.admit(second.clone(), 0, 0).unwrap();

        let backlog: Vec<_> = pool.executing_backlog().into_iter().map(|e| e.hash).collect();
        assert_eq!(backlog, vec![first.hash, second.hash]);
    }
}
