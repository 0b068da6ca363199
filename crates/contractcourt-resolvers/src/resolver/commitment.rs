use contractcourt_types::{
    ChainEvent, CourtError, DisputedOutput, Height, OutcomeKind, OutputKind, Result,
    ResolverOutcome, SpendDescriptor, SpendPath,
};
use serde::{Deserialize, Serialize};

use super::{ResolveAction, ResolveContext, WaitReason, await_claim, build_claim, finish};
use crate::incubator::IncubationRequest;
use crate::sweep::build_sweep;
use crate::tracker::ClaimTracker;

/// Sweeps our own balance output. A CSV-delayed balance is handed to the
/// incubator; an unencumbered one is swept directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentSweepResolver {
    output: DisputedOutput,
    confirmed_at: Height,
    claim: ClaimTracker,
    incubating: bool,
    outcome: Option<ResolverOutcome>,
}

impl CommitmentSweepResolver {
    pub fn new(output: DisputedOutput, confirmed_at: Height) -> Result<Self> {
        let valid = match output.kind {
            OutputKind::ToLocal => output.csv_delay.is_some(),
            OutputKind::ToRemote => true,
            _ => false,
        };
        if !valid {
            return Err(CourtError::InvalidResolverInput {
                outpoint: output.outpoint,
                reason: format!("{} output with csv {:?} is not a balance", output.kind, output.csv_delay),
            });
        }
        Ok(Self {
            output,
            confirmed_at,
            claim: ClaimTracker::new(),
            incubating: false,
            outcome: None,
        })
    }

    #[must_use]
    pub fn output(&self) -> &DisputedOutput {
        &self.output
    }

    #[must_use]
    pub fn outcome(&self) -> Option<&ResolverOutcome> {
        self.outcome.as_ref()
    }

    #[must_use]
    pub fn is_incubating(&self) -> bool {
        self.incubating
    }

    pub(super) fn claim(&self) -> &ClaimTracker {
        &self.claim
    }

    pub(super) fn claim_mut(&mut self) -> &mut ClaimTracker {
        &mut self.claim
    }

    fn path(&self) -> SpendPath {
        match self.output.kind {
            OutputKind::ToLocal => SpendPath::ToLocalDelayed,
            _ => SpendPath::ToRemote,
        }
    }

    pub(super) fn resolve(&mut self, ctx: &ResolveContext<'_>) -> Result<ResolveAction> {
        if self.outcome.is_some() {
            return Ok(ResolveAction::Resolved);
        }
        if self.incubating {
            return Ok(ResolveAction::Wait(WaitReason::Incubation));
        }
        if let Some(csv_delay) = self.output.csv_delay {
            self.incubating = true;
            return Ok(ResolveAction::Incubate(IncubationRequest {
                origin: self.output.outpoint,
                outpoint: self.output.outpoint,
                amount: self.output.amount,
                path: self.path(),
                csv_delay,
                parent_txid: self.output.outpoint.txid,
                confirmed_at: Some(self.confirmed_at),
            }));
        }
        if self.claim.txid().is_some() {
            return Ok(await_claim(&self.claim, &self.output, &mut self.outcome, ctx));
        }
        let input = SpendDescriptor {
            outpoint: self.output.outpoint,
            amount: self.output.amount,
            path: self.path(),
            csv_delay: None,
        };
        build_claim(&mut self.claim, &self.output, &mut self.outcome, ctx, |rate| {
            build_sweep(ctx.signer, std::slice::from_ref(&input), rate, 0)
        })
    }

    pub(super) fn observe(&mut self, event: &ChainEvent) -> bool {
        self.claim.observe(event)
    }

    pub(super) fn complete_incubation(&mut self, kind: OutcomeKind, height: Height) {
        if self.incubating && self.outcome.is_none() {
            self.outcome = Some(finish(&self.output, kind, height));
        }
    }
}
