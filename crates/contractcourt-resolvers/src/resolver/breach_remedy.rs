use std::collections::BTreeSet;

use contractcourt_types::{CourtError, DisputedOutput, OutPoint, Result, ResolverOutcome, Txid};
use serde::{Deserialize, Serialize};

use super::{ResolveAction, WaitReason};

/// Stands for every output of a breached commitment that the justice
/// transaction sweeps. Settled in one step by the breach arbitrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreachRemedyResolver {
    breach_txid: Txid,
    outputs: Vec<DisputedOutput>,
    outcomes: Vec<ResolverOutcome>,
}

impl BreachRemedyResolver {
    pub fn new(breach_txid: Txid, outputs: Vec<DisputedOutput>) -> Result<Self> {
        if outputs.is_empty() {
            return Err(CourtError::EmptySweep);
        }
        Ok(Self {
            breach_txid,
            outputs,
            outcomes: Vec::new(),
        })
    }

    #[must_use]
    pub fn breach_txid(&self) -> Txid {
        self.breach_txid
    }

    #[must_use]
    pub fn outputs(&self) -> &[DisputedOutput] {
        &self.outputs
    }

    #[must_use]
    pub fn outpoints(&self) -> Vec<OutPoint> {
        self.outputs.iter().map(|o| o.outpoint).collect()
    }

    #[must_use]
    pub fn outcomes(&self) -> &[ResolverOutcome] {
        &self.outcomes
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.outcomes.is_empty()
    }

    pub(super) fn resolve(&self) -> ResolveAction {
        if self.is_settled() {
            ResolveAction::Resolved
        } else {
            ResolveAction::Wait(WaitReason::Justice)
        }
    }

    /// Settle atomically. `outcomes` must name each output exactly once.
    pub fn settle(&mut self, outcomes: Vec<ResolverOutcome>) -> Result<()> {
        if self.is_settled() {
            return Ok(());
        }
        let expected: BTreeSet<OutPoint> = self.outputs.iter().map(|o| o.outpoint).collect();
        let named: BTreeSet<OutPoint> = outcomes.iter().map(|o| o.outpoint).collect();
        if named != expected || named.len() != outcomes.len() {
            return Err(CourtError::Internal(format!(
                "justice outcomes for breach {} do not match its {} outputs",
                self.breach_txid,
                self.outputs.len()
            )));
        }
        self.outcomes = outcomes;
        Ok(())
    }
}
