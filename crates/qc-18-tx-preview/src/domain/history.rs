//! # Executed History
//!
//! Bounded ring of recently previewed transaction identities, used to reject
//! duplicate re-submission.
//!
//! ## Data Structures
//!
//! - `slots`: fixed-size circular buffer addressed by `head` and `len`
//! - `members`: O(1) membership index over the live slots
//!
//! Recording into a full ring overwrites the oldest slot, so eviction is
//! O(1) and the buffer never reallocates after construction.

use super::entities::Hash;
use std::collections::HashSet;
use std::num::NonZeroUsize;

/// Fixed-capacity FIFO set of executed transaction hashes.
#[derive(Debug, Clone)]
pub struct ExecutedHistory {
    slots: Vec<Option<Hash>>,
    /// Index of the oldest live slot.
    head: usize,
    len: usize,
    members: HashSet<Hash>,
}

impl ExecutedHistory {
    /// Creates an empty ring holding at most `capacity` identities.
    pub fn new(capacity: NonZeroUsize) -> Self {
        let capacity = capacity.get();
        Self {
            slots: vec![None; capacity],
            head: 0,
            len: 0,
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Maximum number of identities retained.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of identities currently retained.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing has been recorded (or everything was evicted).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if `hash` is still retained.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.members.contains(hash)
    }

    /// Records `hash` as the newest entry.
    ///
    /// Returns the evicted oldest identity when the ring was full. Recording
    /// an identity that is already present is a no-op.
    pub fn record(&mut self, hash: Hash) -> Option<Hash> {
        if self.members.contains(&hash) {
            return None;
        }

        let capacity = self.capacity();
        let mut evicted = None;
        if self.len == capacity {
            evicted = self.slots[self.head].take();
            if let Some(old) = &evicted {
                self.members.remove(old);
            }
            self.head = (self.head + 1) % capacity;
            self.len -= 1;
        }

        let tail = (self.head + self.len) % capacity;
        self.slots[tail] = Some(hash);
        self.members.insert(hash);
        self.len += 1;

        evicted
    }

    /// Iterates retained identities from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Hash> + '_ {
        let capacity = self.capacity();
        (0..self.len).filter_map(move |offset| self.slots[(self.head + offset) % capacity].as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u32) -> Hash {
        let mut h = [0u8; 32];
        h[..4].copy_from_slice(&n.to_be_bytes());
        h
    }

    fn ring(capacity: usize) -> ExecutedHistory {
        ExecutedHistory::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn test_records_until_full_without_eviction() {
        let mut history = ring(3);
        assert!(history.is_empty());

        for n in 0..3 {
            assert_eq!(history.record(hash(n)), None);
        }

        assert_eq!(history.len(), 3);
        assert!((0..3).all(|n| history.contains(&hash(n))));
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut history = ring(3);
        for n in 0..3 {
            history.record(hash(n));
        }

        assert_eq!(history.record(hash(3)), Some(hash(0)));
        assert!(!history.contains(&hash(0)));
        assert!(history.contains(&hash(3)));
        assert_eq!(history.len(), 3);

        let order: Vec<_> = history.iter().copied().collect();
        assert_eq!(order, vec![hash(1), hash(2), hash(3)]);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let capacity = 1000;
        let mut history = ring(capacity);

        for n in 0..2500 {
            history.record(hash(n));
            assert!(history.len() <= capacity);
        }

        assert_eq!(history.len(), capacity);
        assert!(!history.contains(&hash(0)));
        assert!(!history.contains(&hash(1499)));
        assert!(history.contains(&hash(1500)));
        assert!(history.contains(&hash(2499)));
    }

    #[test]
    fn test_duplicate_record_is_noop() {
        let mut history = ring(2);
        history.record(hash(1));
        assert_eq!(history.record(hash(1)), None);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_capacity_one_ring() {
        let mut history = ring(1);
        history.record(hash(1));
        assert_eq!(history.record(hash(2)), Some(hash(1)));
        assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec![hash(2)]);
    }
}
