use contractcourt_types::{
    ChainEvent, CommitmentOwner, DisputedOutput, Height, HtlcDescriptor, OutcomeKind, Preimage,
    Result, ResolverOutcome, Txid,
};
use serde::{Deserialize, Serialize};

use super::incoming::claim_with_preimage;
use super::{
    ResolveAction, ResolveContext, WaitReason, await_claim, build_claim, finish, foreign_spend,
    incubate_second_level,
};
use crate::tracker::ClaimTracker;

/// An HTLC whose success and timeout paths are both spendable.
///
/// We publish the success path and let the chain decide: if our claim
/// confirms we keep the funds, if the counterparty's timeout spend confirms
/// first our attempt is dropped and the output conceded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestedHtlcResolver {
    output: DisputedOutput,
    owner: CommitmentOwner,
    htlc: HtlcDescriptor,
    preimage: Preimage,
    claim: ClaimTracker,
    incubated: Option<Txid>,
    outcome: Option<ResolverOutcome>,
}

impl ContestedHtlcResolver {
    pub fn new(
        output: DisputedOutput,
        owner: CommitmentOwner,
        htlc: HtlcDescriptor,
        preimage: Preimage,
    ) -> Result<Self> {
        if !preimage.matches(&htlc.payment_hash) {
            return Err(contractcourt_types::CourtError::InvalidResolverInput {
                outpoint: output.outpoint,
                reason: "preimage does not match payment hash".to_string(),
            });
        }
        Ok(Self {
            output,
            owner,
            htlc,
            preimage,
            claim: ClaimTracker::new(),
            incubated: None,
            outcome: None,
        })
    }

    #[must_use]
    pub fn output(&self) -> &DisputedOutput {
        &self.output
    }

    #[must_use]
    pub fn htlc(&self) -> &HtlcDescriptor {
        &self.htlc
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
        if let Some(txid) = self.claim.txid() {
            return Ok(match self.owner {
                CommitmentOwner::Remote => {
                    await_claim(&self.claim, &self.output, &mut self.outcome, ctx)
                }
                // The delayed output is only ours once our claim won the race.
                CommitmentOwner::Local => match self.claim.confirmation() {
                    Some(conf) => incubate_second_level(
                        &self.claim,
                        &self.output,
                        &mut self.incubated,
                        self.output.csv_delay.unwrap_or_default(),
                        Some(conf.height),
                    ),
                    None => ResolveAction::Wait(WaitReason::Confirmation { txid }),
                },
            });
        }
        let (output, owner, preimage) = (&self.output, self.owner, self.preimage);
        build_claim(&mut self.claim, output, &mut self.outcome, ctx, |rate| {
            claim_with_preimage(ctx, output, owner, preimage, rate)
        })
    }

    pub(super) fn observe(&mut self, event: &ChainEvent) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        if let Some((spender, height, _)) = foreign_spend(event, &self.output, &self.claim) {
            self.claim.abandon();
            self.outcome = Some(finish(
                &self.output,
                OutcomeKind::Conceded {
                    txid: Some(spender),
                },
                height,
            ));
            return true;
        }
        self.claim.observe(event)
    }

    pub(super) fn complete_incubation(&mut self, kind: OutcomeKind, height: Height) {
        if self.incubated.is_some() && self.outcome.is_none() {
            self.outcome = Some(finish(&self.output, kind, height));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::super::{Resolver, ResolveAction};
    use super::*;
    use contractcourt_types::OutputKind;
    use contractcourt_types::testkit::preimage;

    fn contested(owner: CommitmentOwner) -> Resolver {
        let p = preimage(4);
        let htlc = incoming(p.payment_hash(), 40_000, 800_000);
        let out = output(5, 40_000, OutputKind::Htlc, Some(144), Some(htlc.clone()));
        Resolver::ContestedHtlc(ContestedHtlcResolver::new(out, owner, htlc, p).unwrap())
    }

    #[test]
    fn our_claim_wins_the_race() {
        let harness = Harness::new();
        let mut r = contested(CommitmentOwner::Remote);
        let ResolveAction::Broadcast(tx) = r.resolve(&harness.ctx(800_001)).unwrap() else {
            panic!("expected success claim");
        };
        r.observe(&ChainEvent::SpendDetected {
            outpoint: r.outpoints()[0],
            spender: tx.txid(),
            height: 800_002,
            preimage: Some(preimage(4)),
        });
        r.observe(&confirm(&tx, 800_002, 6));
        assert_eq!(r.resolve(&harness.ctx(800_007)).unwrap(), ResolveAction::Resolved);
        assert_eq!(r.outcomes()[0].kind, OutcomeKind::Swept { txid: tx.txid() });
    }

    #[test]
    fn their_timeout_wins_and_our_attempt_is_dropped() {
        let harness = Harness::new();
        let mut r = contested(CommitmentOwner::Remote);
        let _ = r.resolve(&harness.ctx(800_001)).unwrap();
        assert!(r.pending_tx().is_some());

        r.observe(&ChainEvent::SpendDetected {
            outpoint: r.outpoints()[0],
            spender: Txid::dummy(66),
            height: 800_002,
            preimage: None,
        });
        assert!(r.is_resolved());
        assert!(r.pending_tx().is_none());
        assert_eq!(
            r.outcomes()[0].kind,
            OutcomeKind::Conceded {
                txid: Some(Txid::dummy(66))
            }
        );
    }

    #[test]
    fn local_claim_incubates_only_after_confirming() {
        let harness = Harness::new();
        let mut r = contested(CommitmentOwner::Local);
        let ResolveAction::Broadcast(second) = r.resolve(&harness.ctx(800_001)).unwrap() else {
            panic!("expected second-level success");
        };
        assert_eq!(
            r.resolve(&harness.ctx(800_001)).unwrap(),
            ResolveAction::Wait(WaitReason::Confirmation {
                txid: second.txid()
            })
        );
        r.observe(&confirm(&second, 800_002, 1));
        let ResolveAction::Incubate(req) = r.resolve(&harness.ctx(800_002)).unwrap() else {
            panic!("expected incubation");
        };
        assert_eq!(req.confirmed_at, Some(800_002));
    }

    #[test]
    fn mismatched_preimage_is_rejected() {
        let htlc = incoming(preimage(1).payment_hash(), 1_000, 10);
        let out = output(0, 1_000, OutputKind::Htlc, None, Some(htlc.clone()));
        assert!(
            ContestedHtlcResolver::new(out, CommitmentOwner::Remote, htlc, preimage(2)).is_err()
        );
    }
}
