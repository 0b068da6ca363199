use contractcourt_types::{
    ChainEvent, CourtError, DisputedOutput, OutcomeKind, OutputKind, Result, ResolverOutcome,
    SpendDescriptor, SpendPath,
};
use serde::{Deserialize, Serialize};

use super::{ResolveAction, ResolveContext, await_claim, build_claim, finish, foreign_spend};
use crate::sweep::build_sweep;
use crate::tracker::ClaimTracker;

/// Sweeps a fee-bump anchor when its value exceeds the sweep fee, and
/// abandons it otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorResolver {
    output: DisputedOutput,
    claim: ClaimTracker,
    outcome: Option<ResolverOutcome>,
}

impl AnchorResolver {
    pub fn new(output: DisputedOutput) -> Result<Self> {
        if output.kind != OutputKind::Anchor {
            return Err(CourtError::InvalidResolverInput {
                outpoint: output.outpoint,
                reason: format!("{} output is not an anchor", output.kind),
            });
        }
        Ok(Self {
            output,
            claim: ClaimTracker::new(),
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

    pub(super) fn claim(&self) -> &ClaimTracker {
        &self.claim
    }

    pub(super) fn claim_mut(&mut self) -> &mut ClaimTracker {
        &mut self.claim
    }

    pub(super) fn resolve(&mut self, ctx: &ResolveContext<'_>) -> Result<ResolveAction> {
        if self.outcome.is_some() {
            return Ok(ResolveAction::Resolved);
        }
        if self.claim.txid().is_some() {
            return Ok(await_claim(&self.claim, &self.output, &mut self.outcome, ctx));
        }
        let input = SpendDescriptor {
            outpoint: self.output.outpoint,
            amount: self.output.amount,
            path: SpendPath::Anchor,
            csv_delay: None,
        };
        build_claim(&mut self.claim, &self.output, &mut self.outcome, ctx, |rate| {
            build_sweep(ctx.signer, std::slice::from_ref(&input), rate, 0)
        })
    }

    pub(super) fn observe(&mut self, event: &ChainEvent) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        // Anchors become spendable by anyone after a while.
        if let Some((_, height, _)) = foreign_spend(event, &self.output, &self.claim) {
            self.claim.abandon();
            self.outcome = Some(finish(
                &self.output,
                OutcomeKind::Abandoned {
                    reason: "anchor swept by a third party".to_string(),
                },
                height,
            ));
            return true;
        }
        self.claim.observe(event)
    }
}

#[cfg(test)]
mod tests {
    use super::super::Resolver;
    use super::super::fixtures::*;
    use super::*;
    use contractcourt_types::{CommitmentOwner, Txid};
    use rust_decimal::Decimal;

    fn anchor() -> Resolver {
        let out = output(9, 330, OutputKind::Anchor, None, None);
        Resolver::for_output(&out, CommitmentOwner::Local, 100).unwrap()
    }

    #[test]
    fn uneconomic_anchor_is_abandoned_not_an_error() {
        let mut harness = Harness::new();
        harness.fees.sweep_fee_rate = Decimal::from(10);
        let mut r = anchor();
        assert_eq!(r.resolve(&harness.ctx(106)).unwrap(), ResolveAction::Resolved);
        let outcome = &r.outcomes()[0];
        assert!(matches!(outcome.kind, OutcomeKind::Abandoned { .. }));
        assert_eq!(outcome.amount, 330);
    }

    #[test]
    fn cheap_fees_sweep_the_anchor() {
        let harness = Harness::new();
        let mut r = anchor();
        assert!(matches!(
            r.resolve(&harness.ctx(106)).unwrap(),
            ResolveAction::Broadcast(_)
        ));
    }

    #[test]
    fn third_party_sweep_abandons() {
        let mut r = anchor();
        let outpoint = r.outpoints()[0];
        assert!(r.observe(&ChainEvent::SpendDetected {
            outpoint,
            spender: Txid::dummy(12),
            height: 120,
            preimage: None,
        }));
        assert!(matches!(
            r.outcomes()[0].kind,
            OutcomeKind::Abandoned { .. }
        ));
    }
}
