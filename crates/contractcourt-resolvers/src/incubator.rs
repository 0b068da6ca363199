//! Two-stage incubator for CSV-delayed outputs.
//!
//! ```text
//!  PreMaturity ──(parent confirms)──▶ Kindergarten ──(sweep confirms)──▶ Graduated ──(final depth)──▶ removed
//!       ▲                                 ▲   │                             │
//!       └──────(parent reorged)───────────┘   └──────(sweep reorged)◀───────┘
//! ```
//!
//! A record's maturity height is the first tip height at which a sweep
//! honoring its CSV delay can enter the next block. On each block every
//! mature record without a sweep is swept; records maturing at the same
//! height share one transaction.

use std::collections::BTreeMap;
use std::fmt;

use contractcourt_types::{
    ChainEvent, FeeConfig, Height, OutPoint, OutcomeKind, Result, Satoshis, SignedTx, Signer,
    SpendDescriptor, SpendPath, TxConfirmation, Txid,
};
use serde::{Deserialize, Serialize};
use tracing::Span;

use crate::sweep::build_sweep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncubationStage {
    /// Waiting for the transaction that created the output to confirm.
    PreMaturity,
    /// Confirmed; counting down the CSV delay, or swept and unconfirmed.
    Kindergarten,
    /// Swept; waiting for the sweep to reach final depth.
    Graduated,
}

impl fmt::Display for IncubationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreMaturity => write!(f, "PRE_MATURITY"),
            Self::Kindergarten => write!(f, "KINDERGARTEN"),
            Self::Graduated => write!(f, "GRADUATED"),
        }
    }
}

/// A time-locked output handed over by a resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncubationRequest {
    /// The disputed output the requesting resolver owns.
    pub origin: OutPoint,
    /// The CSV-locked output to sweep. Equals `origin` for commitment
    /// balances; a second-level output otherwise.
    pub outpoint: OutPoint,
    pub amount: Satoshis,
    pub path: SpendPath,
    pub csv_delay: u32,
    /// Transaction creating `outpoint`.
    pub parent_txid: Txid,
    /// Set when the parent is already known to be confirmed.
    pub confirmed_at: Option<Height>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncubationRecord {
    origin: OutPoint,
    outpoint: OutPoint,
    amount: Satoshis,
    path: SpendPath,
    csv_delay: u32,
    parent_txid: Txid,
    confirmed_at: Option<Height>,
    stage: IncubationStage,
    sweep: Option<Txid>,
    attempts: u32,
    retry_at: Option<Height>,
}

impl IncubationRecord {
    fn from_request(req: IncubationRequest) -> Self {
        let stage = if req.confirmed_at.is_some() {
            IncubationStage::Kindergarten
        } else {
            IncubationStage::PreMaturity
        };
        Self {
            origin: req.origin,
            outpoint: req.outpoint,
            amount: req.amount,
            path: req.path,
            csv_delay: req.csv_delay,
            parent_txid: req.parent_txid,
            confirmed_at: req.confirmed_at,
            stage,
            sweep: None,
            attempts: 0,
            retry_at: None,
        }
    }

    #[must_use]
    pub fn origin(&self) -> OutPoint {
        self.origin
    }

    #[must_use]
    pub fn outpoint(&self) -> OutPoint {
        self.outpoint
    }

    #[must_use]
    pub fn amount(&self) -> Satoshis {
        self.amount
    }

    #[must_use]
    pub fn stage(&self) -> IncubationStage {
        self.stage
    }

    #[must_use]
    pub fn parent_txid(&self) -> Txid {
        self.parent_txid
    }

    #[must_use]
    pub fn sweep_txid(&self) -> Option<Txid> {
        self.sweep
    }

    #[must_use]
    pub fn maturity_height(&self) -> Option<Height> {
        self.confirmed_at
            .map(|h| h.saturating_add(self.csv_delay).saturating_sub(1))
    }

    fn is_ready(&self, height: Height) -> bool {
        self.stage == IncubationStage::Kindergarten
            && self.sweep.is_none()
            && self.retry_at.is_none_or(|at| height >= at)
            && self.maturity_height().is_some_and(|m| height >= m)
    }

    fn descriptor(&self) -> SpendDescriptor {
        SpendDescriptor {
            outpoint: self.outpoint,
            amount: self.amount,
            path: self.path,
            csv_delay: Some(self.csv_delay),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SweepBatch {
    tx: SignedTx,
    confirmation: Option<TxConfirmation>,
}

/// A record the incubator is done with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graduation {
    pub origin: OutPoint,
    pub kind: OutcomeKind,
    pub height: Height,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incubator {
    records: Vec<IncubationRecord>,
    batches: Vec<SweepBatch>,
}

impl Incubator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> &[IncubationRecord] {
        &self.records
    }

    #[must_use]
    pub fn record(&self, origin: &OutPoint) -> Option<&IncubationRecord> {
        self.records.iter().find(|r| r.origin == *origin)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Start incubating. Re-registering the same parent is a no-op; a new
    /// parent (a fee-bumped second-level claim) replaces the old record.
    pub fn incubate(&mut self, req: IncubationRequest) -> bool {
        if let Some(existing) = self.record(&req.origin) {
            if existing.parent_txid == req.parent_txid {
                return false;
            }
            self.cancel(&req.origin);
        }
        self.records.push(IncubationRecord::from_request(req));
        true
    }

    /// Stop incubating `origin`. Any sweep it shared is dropped and its
    /// other members are swept again on the next block.
    pub fn cancel(&mut self, origin: &OutPoint) -> Option<IncubationRecord> {
        let pos = self.records.iter().position(|r| r.origin == *origin)?;
        let record = self.records.remove(pos);
        if let Some(txid) = record.sweep {
            self.drop_batch(&txid);
        }
        Some(record)
    }

    fn drop_batch(&mut self, txid: &Txid) {
        self.batches.retain(|b| b.tx.txid() != *txid);
        for r in self.records.iter_mut().filter(|r| r.sweep == Some(*txid)) {
            r.sweep = None;
            r.stage = if r.confirmed_at.is_some() {
                IncubationStage::Kindergarten
            } else {
                IncubationStage::PreMaturity
            };
        }
    }

    fn finalize_batch(&mut self, txid: Txid, height: Height) -> Vec<Graduation> {
        self.batches.retain(|b| b.tx.txid() != txid);
        let mut done = Vec::new();
        self.records.retain(|r| {
            if r.sweep == Some(txid) {
                done.push(Graduation {
                    origin: r.origin,
                    kind: OutcomeKind::Swept { txid },
                    height,
                });
                false
            } else {
                true
            }
        });
        done
    }

    /// Apply a chain event. Returns records whose sweep reached
    /// `final_depth`.
    pub fn observe(&mut self, event: &ChainEvent, final_depth: u32) -> Vec<Graduation> {
        match event {
            ChainEvent::TxConfirmed {
                txid,
                height,
                depth,
            } => {
                for r in self.records.iter_mut().filter(|r| {
                    r.parent_txid == *txid && r.stage == IncubationStage::PreMaturity
                }) {
                    r.confirmed_at = Some(*height);
                    r.stage = IncubationStage::Kindergarten;
                }
                let Some(batch) = self.batches.iter_mut().find(|b| b.tx.txid() == *txid) else {
                    return Vec::new();
                };
                batch.confirmation = Some(TxConfirmation {
                    height: *height,
                    depth: *depth,
                });
                if *depth >= final_depth {
                    return self.finalize_batch(*txid, height + depth - 1);
                }
                for r in self.records.iter_mut().filter(|r| r.sweep == Some(*txid)) {
                    r.stage = IncubationStage::Graduated;
                }
                Vec::new()
            }
            ChainEvent::TxReorged { txid } => {
                let orphaned: Vec<Txid> = self
                    .records
                    .iter_mut()
                    .filter(|r| r.parent_txid == *txid && r.confirmed_at.is_some())
                    .filter_map(|r| {
                        r.confirmed_at = None;
                        r.stage = IncubationStage::PreMaturity;
                        r.sweep
                    })
                    .collect();
                for sweep in orphaned {
                    self.drop_batch(&sweep);
                }
                if let Some(batch) = self.batches.iter_mut().find(|b| b.tx.txid() == *txid) {
                    batch.confirmation = None;
                    for r in self.records.iter_mut().filter(|r| r.sweep == Some(*txid)) {
                        r.stage = IncubationStage::Kindergarten;
                    }
                }
                Vec::new()
            }
            ChainEvent::BlockConnected { height } => {
                let ready: Vec<Txid> = self
                    .batches
                    .iter_mut()
                    .filter_map(|b| {
                        let c = b.confirmation.as_mut()?;
                        if *height >= c.height {
                            c.depth = c.depth.max(height - c.height + 1);
                        }
                        (c.depth >= final_depth).then(|| b.tx.txid())
                    })
                    .collect();
                ready
                    .into_iter()
                    .flat_map(|txid| self.finalize_batch(txid, *height))
                    .collect()
            }
            ChainEvent::SpendDetected { .. } => Vec::new(),
        }
    }

    /// Sweep every mature record, batching by maturity height. Returns the
    /// records abandoned because sweeping them was uneconomic; sweeps to
    /// publish are read back through [`Incubator::pending_txs`].
    pub fn on_block(
        &mut self,
        height: Height,
        signer: &dyn Signer,
        fees: &FeeConfig,
        span: &Span,
    ) -> Result<Vec<Graduation>> {
        let mut finished = Vec::new();

        let mut ready: BTreeMap<Height, Vec<usize>> = BTreeMap::new();
        for (i, r) in self.records.iter().enumerate() {
            if r.is_ready(height) {
                if let Some(m) = r.maturity_height() {
                    ready.entry(m).or_default().push(i);
                }
            }
        }

        let mut abandoned = Vec::new();
        for (maturity, members) in ready {
            let inputs: Vec<SpendDescriptor> =
                members.iter().map(|&i| self.records[i].descriptor()).collect();
            let attempts = members
                .iter()
                .map(|&i| self.records[i].attempts)
                .max()
                .unwrap_or_default();
            match build_sweep(signer, &inputs, fees.rate_for_attempt(attempts), 0)? {
                Some(tx) => {
                    let txid = tx.txid();
                    tracing::info!(
                        parent: span,
                        sweep = %txid.short(),
                        inputs = members.len(),
                        maturity,
                        "incubated outputs swept"
                    );
                    for &i in &members {
                        self.records[i].sweep = Some(txid);
                        self.records[i].retry_at = None;
                    }
                    self.batches.push(SweepBatch {
                        tx,
                        confirmation: None,
                    });
                }
                None => {
                    tracing::warn!(
                        parent: span,
                        inputs = members.len(),
                        maturity,
                        "incubated outputs not worth sweeping, abandoning"
                    );
                    abandoned.extend(members.iter().map(|&i| self.records[i].origin));
                }
            }
        }

        for origin in abandoned {
            if self.cancel(&origin).is_some() {
                finished.push(Graduation {
                    origin,
                    kind: OutcomeKind::Abandoned {
                        reason: "sweep fee exceeds output value".to_string(),
                    },
                    height,
                });
            }
        }

        Ok(finished)
    }

    /// The network rejected `txid`. Its members are re-swept one block later
    /// at the next fee attempt.
    pub fn broadcast_failed(&mut self, txid: &Txid, height: Height) -> bool {
        let Some(batch) = self.batches.iter().find(|b| b.tx.txid() == *txid) else {
            return false;
        };
        if batch.confirmation.is_some() {
            return false;
        }
        let members: Vec<OutPoint> = self
            .records
            .iter()
            .filter(|r| r.sweep == Some(*txid))
            .map(|r| r.origin)
            .collect();
        self.drop_batch(txid);
        for r in self.records.iter_mut().filter(|r| members.contains(&r.origin)) {
            r.attempts += 1;
            r.retry_at = Some(height.saturating_add(1));
        }
        true
    }

    /// Unconfirmed sweeps.
    #[must_use]
    pub fn pending_txs(&self) -> Vec<SignedTx> {
        self.batches
            .iter()
            .filter(|b| b.confirmation.is_none())
            .map(|b| b.tx.clone())
            .collect()
    }

    /// Every transaction whose chain position the incubator depends on.
    #[must_use]
    pub fn tracked_txids(&self) -> Vec<Txid> {
        let mut txids: Vec<Txid> = self.records.iter().map(|r| r.parent_txid).collect();
        txids.extend(self.batches.iter().map(|b| b.tx.txid()));
        txids.sort();
        txids.dedup();
        txids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contractcourt_types::testkit::MockSigner;
    use contractcourt_types::{Script, Transaction, TxIn, TxOut};

    fn request(index: u32, amount: Satoshis, csv: u32, confirmed_at: Option<Height>) -> IncubationRequest {
        let outpoint = OutPoint::new(Txid::dummy(0xaa), index);
        IncubationRequest {
            origin: outpoint,
            outpoint,
            amount,
            path: SpendPath::ToLocalDelayed,
            csv_delay: csv,
            parent_txid: outpoint.txid,
            confirmed_at,
        }
    }

    /// Run one block and return what would be published.
    fn step(inc: &mut Incubator, signer: &MockSigner, height: Height) -> Vec<SignedTx> {
        inc.on_block(height, signer, &FeeConfig::default(), &Span::none())
            .unwrap();
        inc.pending_txs()
    }

    #[test]
    fn identical_maturity_is_swept_in_one_transaction() {
        let signer = MockSigner::new();
        let mut inc = Incubator::new();
        inc.incubate(request(0, 100_000, 144, Some(1_000)));
        inc.incubate(request(1, 60_000, 144, Some(1_000)));

        assert!(step(&mut inc, &signer, 1_142).is_empty());
        let out = step(&mut inc, &signer, 1_143);
        assert_eq!(out.len(), 1);
        let sweep = &out[0];
        assert_eq!(sweep.tx.inputs.len(), 2);
        assert!(sweep.tx.inputs.iter().all(|i| i.sequence == 144));

        // Republished while unconfirmed, never duplicated.
        let again = step(&mut inc, &signer, 1_144);
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].txid(), sweep.txid());
    }

    #[test]
    fn different_maturity_is_swept_separately() {
        let signer = MockSigner::new();
        let mut inc = Incubator::new();
        inc.incubate(request(0, 100_000, 144, Some(1_000)));
        inc.incubate(request(1, 60_000, 10, Some(1_000)));
        let out = step(&mut inc, &signer, 1_200);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn graduates_at_final_depth_and_survives_sweep_reorg() {
        let signer = MockSigner::new();
        let mut inc = Incubator::new();
        let origin = request(0, 100_000, 10, Some(500)).origin;
        inc.incubate(request(0, 100_000, 10, Some(500)));
        let sweep = step(&mut inc, &signer, 509).remove(0);
        let txid = sweep.txid();

        let none = inc.observe(
            &ChainEvent::TxConfirmed {
                txid,
                height: 510,
                depth: 1,
            },
            6,
        );
        assert!(none.is_empty());
        assert_eq!(inc.record(&origin).unwrap().stage(), IncubationStage::Graduated);

        inc.observe(&ChainEvent::TxReorged { txid }, 6);
        let rec = inc.record(&origin).unwrap();
        assert_eq!(rec.stage(), IncubationStage::Kindergarten);
        assert_eq!(rec.sweep_txid(), Some(txid));
        assert_eq!(inc.pending_txs().len(), 1);

        inc.observe(
            &ChainEvent::TxConfirmed {
                txid,
                height: 511,
                depth: 1,
            },
            6,
        );
        assert!(inc.observe(&ChainEvent::BlockConnected { height: 515 }, 6).is_empty());
        let done = inc.observe(&ChainEvent::BlockConnected { height: 516 }, 6);
        assert_eq!(
            done,
            vec![Graduation {
                origin,
                kind: OutcomeKind::Swept { txid },
                height: 516
            }]
        );
        assert!(inc.is_empty());
    }

    #[test]
    fn second_level_output_waits_for_parent() {
        let signer = MockSigner::new();
        let mut inc = Incubator::new();
        let parent = SignedTx {
            tx: Transaction {
                version: 2,
                inputs: vec![TxIn {
                    previous_output: OutPoint::new(Txid::dummy(1), 2),
                    sequence: 0,
                }],
                outputs: vec![TxOut {
                    value: 49_000,
                    script: Script(vec![1]),
                }],
                lock_time: 0,
            },
            witnesses: vec![vec![]],
        };
        inc.incubate(IncubationRequest {
            origin: OutPoint::new(Txid::dummy(1), 2),
            outpoint: parent.outpoint(0),
            amount: 49_000,
            path: SpendPath::ToLocalDelayed,
            csv_delay: 5,
            parent_txid: parent.txid(),
            confirmed_at: None,
        });
        assert_eq!(inc.records()[0].stage(), IncubationStage::PreMaturity);
        assert!(step(&mut inc, &signer, 10_000).is_empty());

        inc.observe(
            &ChainEvent::TxConfirmed {
                txid: parent.txid(),
                height: 100,
                depth: 1,
            },
            6,
        );
        assert_eq!(inc.records()[0].maturity_height(), Some(104));
        assert!(step(&mut inc, &signer, 103).is_empty());
        assert_eq!(step(&mut inc, &signer, 104).len(), 1);

        // Parent reorged: back to PreMaturity, the sweep is void.
        inc.observe(&ChainEvent::TxReorged { txid: parent.txid() }, 6);
        assert_eq!(inc.records()[0].stage(), IncubationStage::PreMaturity);
        assert!(inc.pending_txs().is_empty());
    }

    #[test]
    fn rejected_sweep_is_retried_next_block_at_higher_fee() {
        let signer = MockSigner::new();
        let mut inc = Incubator::new();
        inc.incubate(request(0, 100_000, 1, Some(10)));
        let first = step(&mut inc, &signer, 10).remove(0);
        assert!(inc.broadcast_failed(&first.txid(), 10));
        assert!(step(&mut inc, &signer, 10).is_empty());
        let second = step(&mut inc, &signer, 11).remove(0);
        assert!(second.tx.output_value() < first.tx.output_value());
    }

    #[test]
    fn uneconomic_batch_is_abandoned() {
        let signer = MockSigner::new();
        let mut inc = Incubator::new();
        inc.incubate(request(0, 200, 1, Some(10)));
        let finished = inc
            .on_block(10, &signer, &FeeConfig::default(), &Span::none())
            .unwrap();
        assert!(inc.pending_txs().is_empty());
        assert_eq!(finished.len(), 1);
        assert!(matches!(finished[0].kind, OutcomeKind::Abandoned { .. }));
        assert!(inc.is_empty());
    }

    #[test]
    fn incubate_is_idempotent() {
        let mut inc = Incubator::new();
        assert!(inc.incubate(request(0, 1_000, 5, Some(1))));
        assert!(!inc.incubate(request(0, 1_000, 5, Some(1))));
        assert_eq!(inc.len(), 1);
    }
}
