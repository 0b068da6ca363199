//! Publish guard: stops the same transaction from going to the network
//! twice from one process.
//!
//! Rebroadcasts are explicit: after a restart the guard starts empty, and a
//! reorg makes the arbitrator [`PublishGuard::forget`] the transactions it
//! unconfirmed so they are published again.
//!
//! The guard keeps a bounded, oldest-first cache so memory stays flat on
//! long-lived channels.

use std::collections::{HashSet, VecDeque};

use contractcourt_types::Txid;

pub struct PublishGuard {
    published: HashSet<Txid>,
    /// Insertion order for eviction (front = oldest).
    order: VecDeque<Txid>,
    max_size: usize,
}

impl PublishGuard {
    /// A guard remembering up to `max_size` transactions (at least one).
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            published: HashSet::with_capacity(max_size),
            order: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    /// Record `txid` as published. Returns `false` if it already was.
    pub fn mark_published(&mut self, txid: Txid) -> bool {
        if self.published.contains(&txid) {
            return false;
        }
        if self.published.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.published.remove(&oldest);
            }
        }
        self.published.insert(txid);
        self.order.push_back(txid);
        true
    }

    #[must_use]
    pub fn is_published(&self, txid: &Txid) -> bool {
        self.published.contains(txid)
    }

    /// Allow `txid` to be published again.
    pub fn forget(&mut self, txid: &Txid) -> bool {
        if !self.published.remove(txid) {
            return false;
        }
        self.order.retain(|t| t != txid);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.published.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.published.is_empty()
    }
}
