use contractcourt_types::{
    ChainEvent, CommitmentOwner, DisputedOutput, Height, HtlcDescriptor, HtlcDirection,
    OutcomeKind, Result, ResolverOutcome, SpendDescriptor, SpendPath, Txid,
};
use serde::{Deserialize, Serialize};

use super::{
    ResolveAction, ResolveContext, WaitReason, await_claim, build_claim, finish, foreign_spend,
    htlc_of, incubate_second_level, require_csv,
};
use crate::sweep::{build_second_level, build_sweep};
use crate::tracker::ClaimTracker;

/// Reclaims an HTLC we offered once its timeout height is reached.
///
/// The claim is built at exactly the expiry height, never later. If the
/// counterparty spends the output with the preimage first, the payment is
/// credited as settled off-chain instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingHtlcResolver {
    output: DisputedOutput,
    owner: CommitmentOwner,
    htlc: HtlcDescriptor,
    claim: ClaimTracker,
    incubated: Option<Txid>,
    outcome: Option<ResolverOutcome>,
}

impl OutgoingHtlcResolver {
    pub fn new(output: DisputedOutput, owner: CommitmentOwner) -> Result<Self> {
        let htlc = htlc_of(&output, HtlcDirection::Outgoing)?;
        if owner == CommitmentOwner::Local {
            require_csv(&output)?;
        }
        Ok(Self {
            output,
            owner,
            htlc,
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
        if self.claim.txid().is_some() {
            return Ok(match self.owner {
                CommitmentOwner::Remote => {
                    await_claim(&self.claim, &self.output, &mut self.outcome, ctx)
                }
                CommitmentOwner::Local => incubate_second_level(
                    &self.claim,
                    &self.output,
                    &mut self.incubated,
                    self.output.csv_delay.unwrap_or_default(),
                    None,
                ),
            });
        }
        if !self.htlc.is_expired_at(ctx.height) {
            return Ok(ResolveAction::Wait(WaitReason::Timelock {
                height: self.htlc.expiry,
            }));
        }

        let (output, owner, expiry) = (&self.output, self.owner, self.htlc.expiry);
        build_claim(&mut self.claim, output, &mut self.outcome, ctx, |rate| {
            match owner {
                CommitmentOwner::Remote => {
                    let input = SpendDescriptor {
                        outpoint: output.outpoint,
                        amount: output.amount,
                        path: SpendPath::HtlcTimeout,
                        csv_delay: None,
                    };
                    build_sweep(ctx.signer, std::slice::from_ref(&input), rate, expiry)
                }
                CommitmentOwner::Local => {
                    let input = SpendDescriptor {
                        outpoint: output.outpoint,
                        amount: output.amount,
                        path: SpendPath::SecondLevelTimeout,
                        csv_delay: None,
                    };
                    build_second_level(ctx.signer, &input, rate, expiry)
                }
            }
        })
    }

    pub(super) fn observe(&mut self, event: &ChainEvent) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        if let Some((spender, height, preimage)) = foreign_spend(event, &self.output, &self.claim)
        {
            let kind = match preimage.filter(|p| p.matches(&self.htlc.payment_hash)) {
                Some(preimage) => {
                    self.htlc.preimage = Some(preimage);
                    OutcomeKind::SettledOffChain {
                        txid: spender,
                        preimage,
                    }
                }
                None => OutcomeKind::Conceded {
                    txid: Some(spender),
                },
            };
            self.claim.abandon();
            self.outcome = Some(finish(&self.output, kind, height));
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
