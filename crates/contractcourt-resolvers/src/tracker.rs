//! Confirmation tracking for a single claim transaction.

use contractcourt_types::{ChainEvent, Height, SignedTx, TxConfirmation, Txid};
use serde::{Deserialize, Serialize};

/// The transaction a resolver has published for its output, and where it
/// sits in the chain.
///
/// A rejected broadcast drops the transaction and schedules a rebuild one
/// block later at the next fee attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimTracker {
    tx: Option<SignedTx>,
    confirmation: Option<TxConfirmation>,
    attempts: u32,
    retry_at: Option<Height>,
}

impl ClaimTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tx(&self) -> Option<&SignedTx> {
        self.tx.as_ref()
    }

    #[must_use]
    pub fn txid(&self) -> Option<Txid> {
        self.tx.as_ref().map(SignedTx::txid)
    }

    #[must_use]
    pub fn confirmation(&self) -> Option<TxConfirmation> {
        self.confirmation
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn retry_at(&self) -> Option<Height> {
        self.retry_at
    }

    /// Track `tx` as the current claim.
    pub fn record(&mut self, tx: SignedTx) {
        self.tx = Some(tx);
        self.confirmation = None;
        self.retry_at = None;
    }

    /// Whether a new claim may be built at `height`.
    #[must_use]
    pub fn ready_to_build(&self, height: Height) -> bool {
        self.tx.is_none() && self.retry_at.is_none_or(|at| height >= at)
    }

    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.confirmation.is_some()
    }

    #[must_use]
    pub fn is_final(&self, depth: u32) -> bool {
        self.confirmation.is_some_and(|c| c.depth >= depth)
    }

    /// Apply a chain event. Returns `true` if anything changed.
    pub fn observe(&mut self, event: &ChainEvent) -> bool {
        let Some(ours) = self.txid() else {
            return false;
        };
        match event {
            ChainEvent::TxConfirmed {
                txid,
                height,
                depth,
            } if *txid == ours => {
                let next = TxConfirmation {
                    height: *height,
                    depth: *depth,
                };
                let changed = self.confirmation != Some(next);
                self.confirmation = Some(next);
                changed
            }
            ChainEvent::TxReorged { txid } if *txid == ours => self.confirmation.take().is_some(),
            ChainEvent::BlockConnected { height } => match &mut self.confirmation {
                Some(c) if *height >= c.height && height - c.height + 1 > c.depth => {
                    c.depth = height - c.height + 1;
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Record a rejected broadcast of `txid` at `height`. Confirmed claims
    /// are never dropped.
    pub fn broadcast_failed(&mut self, txid: &Txid, height: Height) -> bool {
        if self.txid() != Some(*txid) || self.confirmation.is_some() {
            return false;
        }
        self.tx = None;
        self.attempts += 1;
        self.retry_at = Some(height.saturating_add(1));
        true
    }

    /// Forget the claim; another spend of the output won.
    pub fn abandon(&mut self) {
        self.tx = None;
        self.confirmation = None;
        self.retry_at = None;
    }
}
