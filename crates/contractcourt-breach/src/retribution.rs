//! Persistent state of one breach response.
//!
//! A [`Retribution`] lists every output of the revoked commitment we intend
//! to take, the justice transactions built for them so far, and which
//! outputs the counterparty managed to sweep first. It is stored inside the
//! channel's log record and survives restarts.

use std::collections::BTreeSet;

use contractcourt_types::{
    ChainEvent, DisputedOutput, Height, OutPoint, OutcomeKind, ResolverOutcome, SignedTx,
    SpendDescriptor, SpendPath, TxConfirmation, Txid,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStatus {
    /// Still ours to take.
    Pending,
    /// Swept by the counterparty's own transaction before justice confirmed.
    Lost { txid: Txid, height: Height },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunishableOutput {
    pub output: DisputedOutput,
    pub status: OutputStatus,
}

impl PunishableOutput {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == OutputStatus::Pending
    }

    #[must_use]
    pub fn descriptor(&self) -> SpendDescriptor {
        let path = if self.output.kind.is_punishable() {
            SpendPath::Revocation
        } else {
            SpendPath::ToRemote
        };
        SpendDescriptor {
            outpoint: self.output.outpoint,
            amount: self.output.amount,
            path,
            csv_delay: None,
        }
    }

    /// Height from which the counterparty can spend this output without the
    /// revocation key.
    fn counterparty_unlock(&self, breach_height: Height) -> Option<Height> {
        if let Some(htlc) = &self.output.htlc {
            return Some(htlc.expiry);
        }
        self.output
            .csv_delay
            .map(|csv| breach_height.saturating_add(csv))
    }
}

/// One justice transaction we built. Earlier versions stay listed: any of
/// them may still be the one that confirms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JusticeVersion {
    pub tx: SignedTx,
    pub outpoints: Vec<OutPoint>,
    pub built_at: Height,
    pub confirmation: Option<TxConfirmation>,
}

impl JusticeVersion {
    #[must_use]
    pub fn txid(&self) -> Txid {
        self.tx.txid()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retribution {
    breach_txid: Txid,
    breach_height: Height,
    outputs: Vec<PunishableOutput>,
    versions: Vec<JusticeVersion>,
    outcomes: Vec<ResolverOutcome>,
}

impl Retribution {
    pub(crate) fn new(breach_txid: Txid, breach_height: Height, outputs: Vec<DisputedOutput>) -> Self {
        Self {
            breach_txid,
            breach_height,
            outputs: outputs
                .into_iter()
                .map(|output| PunishableOutput {
                    output,
                    status: OutputStatus::Pending,
                })
                .collect(),
            versions: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    #[must_use]
    pub fn breach_txid(&self) -> Txid {
        self.breach_txid
    }

    #[must_use]
    pub fn breach_height(&self) -> Height {
        self.breach_height
    }

    #[must_use]
    pub fn outputs(&self) -> &[PunishableOutput] {
        &self.outputs
    }

    #[must_use]
    pub fn disputed(&self) -> Vec<DisputedOutput> {
        self.outputs.iter().map(|o| o.output.clone()).collect()
    }

    pub(crate) fn pending(&self) -> impl Iterator<Item = &PunishableOutput> {
        self.outputs.iter().filter(|o| o.is_pending())
    }

    #[must_use]
    pub fn pending_outpoints(&self) -> Vec<OutPoint> {
        let mut outpoints: Vec<OutPoint> = self.pending().map(|o| o.output.outpoint).collect();
        outpoints.sort();
        outpoints
    }

    #[must_use]
    pub fn lost(&self) -> Vec<OutPoint> {
        self.outputs
            .iter()
            .filter(|o| !o.is_pending())
            .map(|o| o.output.outpoint)
            .collect()
    }

    #[must_use]
    pub fn versions(&self) -> &[JusticeVersion] {
        &self.versions
    }

    #[must_use]
    pub fn current(&self) -> Option<&JusticeVersion> {
        self.versions.last()
    }

    /// The justice version that made it into the chain, if any.
    #[must_use]
    pub fn confirmed(&self) -> Option<&JusticeVersion> {
        self.versions.iter().find(|v| v.confirmation.is_some())
    }

    /// Justice transactions built so far; the fee attempt of the next one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        u32::try_from(self.versions.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.outcomes.is_empty()
    }

    #[must_use]
    pub fn outcomes(&self) -> &[ResolverOutcome] {
        &self.outcomes
    }

    /// The justice transaction to (re)publish while we are still racing.
    #[must_use]
    pub fn pending_tx(&self) -> Option<&SignedTx> {
        if self.is_settled() || self.confirmed().is_some() {
            return None;
        }
        self.current().map(|v| &v.tx)
    }

    /// Every transaction whose chain position matters to this breach.
    #[must_use]
    pub fn tracked_txids(&self) -> Vec<Txid> {
        let mut txids = vec![self.breach_txid];
        txids.extend(self.versions.iter().map(JusticeVersion::txid));
        txids.extend(self.outputs.iter().filter_map(|o| match o.status {
            OutputStatus::Lost { txid, .. } => Some(txid),
            OutputStatus::Pending => None,
        }));
        txids.sort();
        txids.dedup();
        txids
    }

    /// Earliest height at which the counterparty can sweep a pending output
    /// on their own.
    #[must_use]
    pub fn deadline(&self) -> Option<Height> {
        self.pending()
            .filter_map(|o| o.counterparty_unlock(self.breach_height))
            .min()
    }

    pub(crate) fn push_version(&mut self, tx: SignedTx, outpoints: Vec<OutPoint>, height: Height) {
        self.versions.push(JusticeVersion {
            tx,
            outpoints,
            built_at: height,
            confirmation: None,
        });
    }

    pub(crate) fn touch_current(&mut self, height: Height) {
        if let Some(current) = self.versions.last_mut() {
            current.built_at = height;
        }
    }

    fn is_justice(&self, txid: &Txid) -> bool {
        self.versions.iter().any(|v| v.txid() == *txid)
    }

    /// Apply a chain event. Returns the outcomes once the breach is settled,
    /// exactly once.
    pub fn observe(&mut self, event: &ChainEvent, final_depth: u32) -> Option<Vec<ResolverOutcome>> {
        if self.is_settled() {
            return None;
        }
        match event {
            ChainEvent::TxConfirmed {
                txid,
                height,
                depth,
            } => {
                if let Some(v) = self.versions.iter_mut().find(|v| v.txid() == *txid) {
                    v.confirmation = Some(TxConfirmation {
                        height: *height,
                        depth: *depth,
                    });
                }
            }
            ChainEvent::TxReorged { txid } => {
                if let Some(v) = self.versions.iter_mut().find(|v| v.txid() == *txid) {
                    v.confirmation = None;
                }
                for o in &mut self.outputs {
                    if matches!(o.status, OutputStatus::Lost { txid: lost, .. } if lost == *txid) {
                        o.status = OutputStatus::Pending;
                    }
                }
            }
            ChainEvent::BlockConnected { height } => {
                for v in &mut self.versions {
                    if let Some(c) = v.confirmation.as_mut() {
                        if *height >= c.height {
                            c.depth = c.depth.max(height - c.height + 1);
                        }
                    }
                }
            }
            ChainEvent::SpendDetected {
                outpoint,
                spender,
                height,
                ..
            } => {
                if !self.is_justice(spender) {
                    if let Some(o) = self
                        .outputs
                        .iter_mut()
                        .find(|o| o.output.outpoint == *outpoint && o.is_pending())
                    {
                        o.status = OutputStatus::Lost {
                            txid: *spender,
                            height: *height,
                        };
                    }
                }
            }
        }
        self.try_settle(final_depth)
    }

    fn try_settle(&mut self, final_depth: u32) -> Option<Vec<ResolverOutcome>> {
        if let Some(v) = self.confirmed() {
            let conf = v.confirmation?;
            if conf.depth < final_depth {
                return None;
            }
            let txid = v.txid();
            let covered: BTreeSet<OutPoint> = v.outpoints.iter().copied().collect();
            let height = conf.height + conf.depth - 1;
            let outcomes = self
                .outputs
                .iter()
                .map(|o| {
                    let kind = if covered.contains(&o.output.outpoint) {
                        OutcomeKind::Swept { txid }
                    } else if let OutputStatus::Lost { txid, .. } = o.status {
                        OutcomeKind::Lost { txid }
                    } else {
                        OutcomeKind::Abandoned {
                            reason: "not spent by the confirmed justice transaction".to_string(),
                        }
                    };
                    outcome(o, kind, height)
                })
                .collect();
            return Some(self.settle(outcomes));
        }
        if self.pending().next().is_none() {
            return Some(self.settle_without_justice(None));
        }
        None
    }

    /// Close out without a confirmed justice transaction: every pending
    /// output is abandoned with `reason` and every lost one recorded.
    pub(crate) fn settle_without_justice(&mut self, abandon: Option<(&str, Height)>) -> Vec<ResolverOutcome> {
        let outcomes = self
            .outputs
            .iter()
            .map(|o| match (o.status, abandon) {
                (OutputStatus::Lost { txid, height }, _) => {
                    outcome(o, OutcomeKind::Lost { txid }, height)
                }
                (OutputStatus::Pending, Some((reason, height))) => outcome(
                    o,
                    OutcomeKind::Abandoned {
                        reason: reason.to_string(),
                    },
                    height,
                ),
                (OutputStatus::Pending, None) => outcome(
                    o,
                    OutcomeKind::Abandoned {
                        reason: "no justice transaction confirmed".to_string(),
                    },
                    self.breach_height,
                ),
            })
            .collect();
        self.settle(outcomes)
    }

    fn settle(&mut self, outcomes: Vec<ResolverOutcome>) -> Vec<ResolverOutcome> {
        self.outcomes.clone_from(&outcomes);
        outcomes
    }
}

fn outcome(o: &PunishableOutput, kind: OutcomeKind, height: Height) -> ResolverOutcome {
    ResolverOutcome {
        outpoint: o.output.outpoint,
        amount: o.output.amount,
        kind,
        height,
    }
}
