use contractcourt_types::{
    ChainEvent, CommitmentOwner, DisputedOutput, Height, HtlcDescriptor, HtlcDirection,
    OutcomeKind, Preimage, PreimageStatus, Result, ResolverOutcome, SignedTx, SpendDescriptor,
    SpendPath, Txid,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    ContestedHtlcResolver, ResolveAction, ResolveContext, Resolver, WaitReason, await_claim,
    build_claim, finish, foreign_spend, htlc_of, incubate_second_level, require_csv,
    revealed_preimage,
};
use crate::sweep::{build_second_level, build_sweep};
use crate::tracker::ClaimTracker;

/// Claims an HTLC paid to us, once the preimage is known.
///
/// Without the preimage nothing can be done before expiry, after which the
/// output is conceded. A preimage learned only after expiry races the
/// counterparty's timeout path and is handed to a [`ContestedHtlcResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingHtlcResolver {
    output: DisputedOutput,
    owner: CommitmentOwner,
    htlc: HtlcDescriptor,
    claim: ClaimTracker,
    incubated: Option<Txid>,
    outcome: Option<ResolverOutcome>,
}

impl IncomingHtlcResolver {
    pub fn new(output: DisputedOutput, owner: CommitmentOwner) -> Result<Self> {
        let htlc = htlc_of(&output, HtlcDirection::Incoming)?;
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

    fn concede(&mut self, txid: Option<Txid>, height: Height) -> ResolveAction {
        self.claim.abandon();
        self.outcome = Some(finish(&self.output, OutcomeKind::Conceded { txid }, height));
        ResolveAction::Resolved
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

        if self.htlc.preimage.is_none() {
            match ctx.registry.lookup(&self.htlc.payment_hash) {
                PreimageStatus::Known(p) => {
                    self.htlc.learn_preimage(p);
                }
                PreimageStatus::Failed => return Ok(self.concede(None, ctx.height)),
                PreimageStatus::Unknown => {}
            }
        }
        let Some(preimage) = self.htlc.preimage else {
            if self.htlc.is_expired_at(ctx.height) {
                return Ok(self.concede(None, ctx.height));
            }
            return Ok(ResolveAction::Wait(WaitReason::Preimage));
        };

        if self.htlc.is_expired_at(ctx.height) {
            let successor = ContestedHtlcResolver::new(
                self.output.clone(),
                self.owner,
                self.htlc.clone(),
                preimage,
            )?;
            return Ok(ResolveAction::Handoff(Box::new(Resolver::ContestedHtlc(
                successor,
            ))));
        }

        let (output, owner) = (&self.output, self.owner);
        build_claim(&mut self.claim, output, &mut self.outcome, ctx, |rate| {
            claim_with_preimage(ctx, output, owner, preimage, rate)
        })
    }

    pub(super) fn observe(&mut self, event: &ChainEvent) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        let mut changed = false;
        if self.htlc.preimage.is_none() {
            if let Some(p) = revealed_preimage(event, &self.htlc) {
                changed |= self.htlc.learn_preimage(p);
            }
        }
        if let Some((spender, height, _)) = foreign_spend(event, &self.output, &self.claim) {
            // The counterparty took the timeout path.
            self.concede(Some(spender), height);
            return true;
        }
        changed | self.claim.observe(event)
    }

    pub(super) fn complete_incubation(&mut self, kind: OutcomeKind, height: Height) {
        if self.incubated.is_some() && self.outcome.is_none() {
            self.outcome = Some(finish(&self.output, kind, height));
        }
    }
}

/// Success-path claim of an incoming HTLC: a direct sweep on the remote
/// commitment, a second-level transaction on our own.
pub(super) fn claim_with_preimage(
    ctx: &ResolveContext<'_>,
    output: &DisputedOutput,
    owner: CommitmentOwner,
    preimage: Preimage,
    rate: Decimal,
) -> Result<Option<SignedTx>> {
    match owner {
        CommitmentOwner::Remote => {
            let input = SpendDescriptor {
                outpoint: output.outpoint,
                amount: output.amount,
                path: SpendPath::HtlcSuccess { preimage },
                csv_delay: None,
            };
            build_sweep(ctx.signer, std::slice::from_ref(&input), rate, 0)
        }
        CommitmentOwner::Local => {
            let input = SpendDescriptor {
                outpoint: output.outpoint,
                amount: output.amount,
                path: SpendPath::SecondLevelSuccess { preimage },
                csv_delay: None,
            };
            build_second_level(ctx.signer, &input, rate, 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use contractcourt_types::OutputKind;
    use contractcourt_types::testkit::preimage;

    fn resolver(owner: CommitmentOwner, expiry: Height) -> (Resolver, Preimage) {
        let p = preimage(7);
        let out = output(
            2,
            50_000,
            OutputKind::Htlc,
            Some(144),
            Some(incoming(p.payment_hash(), 50_000, expiry)),
        );
        (Resolver::for_output(&out, owner, 780_000).unwrap(), p)
    }

    #[test]
    fn waits_for_preimage_then_concedes_at_expiry() {
        let harness = Harness::new();
        let (mut r, _) = resolver(CommitmentOwner::Remote, 800_000);
        assert_eq!(
            r.resolve(&harness.ctx(780_006)).unwrap(),
            ResolveAction::Wait(WaitReason::Preimage)
        );
        assert_eq!(
            r.resolve(&harness.ctx(799_999)).unwrap(),
            ResolveAction::Wait(WaitReason::Preimage)
        );
        assert_eq!(r.resolve(&harness.ctx(800_000)).unwrap(), ResolveAction::Resolved);
        assert_eq!(r.outcomes()[0].kind, OutcomeKind::Conceded { txid: None });
    }

    #[test]
    fn registry_preimage_sweeps_remote_output() {
        let harness = Harness::new();
        let (mut r, p) = resolver(CommitmentOwner::Remote, 800_000);
        harness.registry.settle(p);
        let ResolveAction::Broadcast(tx) = r.resolve(&harness.ctx(780_010)).unwrap() else {
            panic!("expected success sweep");
        };
        assert!(tx.tx.spends(&r.outpoints()[0]));
        r.observe(&confirm(&tx, 780_011, 6));
        assert_eq!(r.resolve(&harness.ctx(780_016)).unwrap(), ResolveAction::Resolved);
        assert_eq!(r.outcomes()[0].kind, OutcomeKind::Swept { txid: tx.txid() });
    }

    #[test]
    fn failed_invoice_concedes_immediately() {
        let harness = Harness::new();
        let (mut r, p) = resolver(CommitmentOwner::Remote, 800_000);
        harness.registry.fail(p.payment_hash());
        assert_eq!(r.resolve(&harness.ctx(780_010)).unwrap(), ResolveAction::Resolved);
        assert_eq!(r.outcomes()[0].kind, OutcomeKind::Conceded { txid: None });
    }

    #[test]
    fn on_chain_preimage_is_learned() {
        let harness = Harness::new();
        let (mut r, p) = resolver(CommitmentOwner::Remote, 800_000);
        // Revealed by a spend elsewhere, e.g. the downstream channel.
        assert!(r.observe(&ChainEvent::SpendDetected {
            outpoint: contractcourt_types::OutPoint::new(Txid::dummy(77), 0),
            spender: Txid::dummy(78),
            height: 780_020,
            preimage: Some(p),
        }));
        assert!(matches!(
            r.resolve(&harness.ctx(780_021)).unwrap(),
            ResolveAction::Broadcast(_)
        ));
    }

    #[test]
    fn late_preimage_hands_off_to_contested() {
        let harness = Harness::new();
        let (mut r, p) = resolver(CommitmentOwner::Remote, 800_000);
        harness.registry.settle(p);
        let ResolveAction::Handoff(next) = r.resolve(&harness.ctx(800_001)).unwrap() else {
            panic!("expected hand-off");
        };
        assert_eq!(next.label(), "CONTESTED_HTLC");
        assert_eq!(next.outpoints(), r.outpoints());
    }

    #[test]
    fn local_commitment_uses_second_level_and_incubates() {
        let harness = Harness::new();
        let (mut r, p) = resolver(CommitmentOwner::Local, 800_000);
        harness.registry.settle(p);

        let ResolveAction::Broadcast(second) = r.resolve(&harness.ctx(780_010)).unwrap() else {
            panic!("expected second-level broadcast");
        };
        let ResolveAction::Incubate(req) = r.resolve(&harness.ctx(780_010)).unwrap() else {
            panic!("expected incubation");
        };
        assert_eq!(req.parent_txid, second.txid());
        assert_eq!(req.outpoint, second.outpoint(0));
        assert_eq!(req.csv_delay, 144);
        assert_eq!(req.confirmed_at, None);
        assert_eq!(
            r.resolve(&harness.ctx(780_011)).unwrap(),
            ResolveAction::Wait(WaitReason::Incubation)
        );

        let sweep = Txid::dummy(9);
        r.complete_incubation(OutcomeKind::Swept { txid: sweep }, 780_200);
        assert!(r.is_resolved());
        // Accounted at the HTLC's own amount.
        assert_eq!(r.outcomes()[0].amount, 50_000);
    }

    #[test]
    fn counterparty_timeout_spend_concedes() {
        let harness = Harness::new();
        let (mut r, _) = resolver(CommitmentOwner::Remote, 800_000);
        let _ = r.resolve(&harness.ctx(780_010)).unwrap();
        let outpoint = r.outpoints()[0];
        assert!(r.observe(&ChainEvent::SpendDetected {
            outpoint,
            spender: Txid::dummy(44),
            height: 800_001,
            preimage: None,
        }));
        assert_eq!(
            r.outcomes()[0].kind,
            OutcomeKind::Conceded {
                txid: Some(Txid::dummy(44))
            }
        );
    }
}
