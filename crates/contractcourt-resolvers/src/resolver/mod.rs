//! Contract resolvers: one per disputed output.
//!
//! [`Resolver`] is a closed set of variants; every call site matches it
//! exhaustively. A resolver advances one step per [`Resolver::resolve`]
//! call and reports what the channel arbitrator must do next as a
//! [`ResolveAction`]. The arbitrator keeps calling until the resolver
//! waits or is resolved.

mod anchor;
mod breach_remedy;
mod commitment;
mod contested;
mod incoming;
mod outgoing;

use std::fmt;

use contractcourt_types::{
    ChainEvent, CommitmentOwner, CourtError, DisputedOutput, FeeConfig, Height, HtlcDescriptor,
    HtlcDirection, InvoiceRegistry, OutPoint, OutcomeKind, OutputKind, Preimage, Result,
    ResolverOutcome, SignedTx, Signer, SpendPath, Txid,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::incubator::IncubationRequest;
use crate::tracker::ClaimTracker;

pub use anchor::AnchorResolver;
pub use breach_remedy::BreachRemedyResolver;
pub use commitment::CommitmentSweepResolver;
pub use contested::ContestedHtlcResolver;
pub use incoming::IncomingHtlcResolver;
pub use outgoing::OutgoingHtlcResolver;

/// Collaborators and chain position handed to [`Resolver::resolve`].
pub struct ResolveContext<'a> {
    pub height: Height,
    pub signer: &'a dyn Signer,
    pub registry: &'a dyn InvoiceRegistry,
    pub fees: &'a FeeConfig,
    /// Depth at which a claim is final.
    pub sweep_conf_depth: u32,
}

/// Why a resolver cannot make progress yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// An absolute timelock opens at `height`.
    Timelock { height: Height },
    /// The preimage is not known.
    Preimage,
    /// Our claim `txid` is not yet final.
    Confirmation { txid: Txid },
    /// A rejected broadcast is rebuilt at `height`.
    Retry { height: Height },
    /// The incubator owns the time-locked output.
    Incubation,
    /// The breach arbitrator settles this resolver.
    Justice,
}

impl fmt::Display for WaitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timelock { height } => write!(f, "TIMELOCK({height})"),
            Self::Preimage => write!(f, "PREIMAGE"),
            Self::Confirmation { txid } => write!(f, "CONFIRMATION({})", txid.short()),
            Self::Retry { height } => write!(f, "RETRY({height})"),
            Self::Incubation => write!(f, "INCUBATION"),
            Self::Justice => write!(f, "JUSTICE"),
        }
    }
}

/// The next thing the arbitrator must do for a resolver.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveAction {
    Wait(WaitReason),
    /// Persist, then publish this transaction.
    Broadcast(SignedTx),
    /// Register a time-locked output with the incubator.
    Incubate(IncubationRequest),
    /// Replace this resolver with a successor owning the same outputs.
    Handoff(Box<Resolver>),
    /// Every output of this resolver has an outcome.
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolver {
    CommitmentSweep(CommitmentSweepResolver),
    IncomingHtlcSuccess(IncomingHtlcResolver),
    OutgoingHtlcTimeout(OutgoingHtlcResolver),
    ContestedHtlc(ContestedHtlcResolver),
    AnchorSweep(AnchorResolver),
    BreachRemedy(BreachRemedyResolver),
}

impl Resolver {
    /// Pick the resolver for one output of a confirmed, non-breach close.
    ///
    /// # Errors
    /// [`CourtError::InvalidResolverInput`] for revoked outputs (those belong
    /// to the breach path) and for outputs missing the data their claim needs.
    pub fn for_output(
        output: &DisputedOutput,
        owner: CommitmentOwner,
        confirmation_height: Height,
    ) -> Result<Self> {
        let resolver = match (output.kind, output.htlc.as_ref().map(|h| h.direction)) {
            (OutputKind::ToLocal | OutputKind::ToRemote, _) => Self::CommitmentSweep(
                CommitmentSweepResolver::new(output.clone(), confirmation_height)?,
            ),
            (OutputKind::Htlc, Some(HtlcDirection::Incoming)) => {
                Self::IncomingHtlcSuccess(IncomingHtlcResolver::new(output.clone(), owner)?)
            }
            (OutputKind::Htlc, Some(HtlcDirection::Outgoing)) => {
                Self::OutgoingHtlcTimeout(OutgoingHtlcResolver::new(output.clone(), owner)?)
            }
            (OutputKind::Anchor, _) => Self::AnchorSweep(AnchorResolver::new(output.clone())?),
            (OutputKind::Htlc, None) | (OutputKind::RevokedToLocal | OutputKind::RevokedHtlc, _) => {
                return Err(CourtError::InvalidResolverInput {
                    outpoint: output.outpoint,
                    reason: format!("no resolver for {} output", output.kind),
                });
            }
        };
        Ok(resolver)
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::CommitmentSweep(_) => "COMMITMENT_SWEEP",
            Self::IncomingHtlcSuccess(_) => "INCOMING_HTLC_SUCCESS",
            Self::OutgoingHtlcTimeout(_) => "OUTGOING_HTLC_TIMEOUT",
            Self::ContestedHtlc(_) => "CONTESTED_HTLC",
            Self::AnchorSweep(_) => "ANCHOR_SWEEP",
            Self::BreachRemedy(_) => "BREACH_REMEDY",
        }
    }

    /// Outputs this resolver is accountable for.
    #[must_use]
    pub fn outpoints(&self) -> Vec<OutPoint> {
        match self {
            Self::CommitmentSweep(r) => vec![r.output().outpoint],
            Self::IncomingHtlcSuccess(r) => vec![r.output().outpoint],
            Self::OutgoingHtlcTimeout(r) => vec![r.output().outpoint],
            Self::ContestedHtlc(r) => vec![r.output().outpoint],
            Self::AnchorSweep(r) => vec![r.output().outpoint],
            Self::BreachRemedy(r) => r.outpoints(),
        }
    }

    /// Advance one step.
    pub fn resolve(&mut self, ctx: &ResolveContext<'_>) -> Result<ResolveAction> {
        match self {
            Self::CommitmentSweep(r) => r.resolve(ctx),
            Self::IncomingHtlcSuccess(r) => r.resolve(ctx),
            Self::OutgoingHtlcTimeout(r) => r.resolve(ctx),
            Self::ContestedHtlc(r) => r.resolve(ctx),
            Self::AnchorSweep(r) => r.resolve(ctx),
            Self::BreachRemedy(r) => Ok(r.resolve()),
        }
    }

    /// Apply a chain event. Returns `true` if the resolver changed.
    pub fn observe(&mut self, event: &ChainEvent) -> bool {
        match self {
            Self::CommitmentSweep(r) => r.observe(event),
            Self::IncomingHtlcSuccess(r) => r.observe(event),
            Self::OutgoingHtlcTimeout(r) => r.observe(event),
            Self::ContestedHtlc(r) => r.observe(event),
            Self::AnchorSweep(r) => r.observe(event),
            Self::BreachRemedy(_) => false,
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        match self {
            Self::CommitmentSweep(r) => r.outcome().is_some(),
            Self::IncomingHtlcSuccess(r) => r.outcome().is_some(),
            Self::OutgoingHtlcTimeout(r) => r.outcome().is_some(),
            Self::ContestedHtlc(r) => r.outcome().is_some(),
            Self::AnchorSweep(r) => r.outcome().is_some(),
            Self::BreachRemedy(r) => r.is_settled(),
        }
    }

    /// Final outcomes, empty until resolved.
    #[must_use]
    pub fn outcomes(&self) -> Vec<ResolverOutcome> {
        match self {
            Self::CommitmentSweep(r) => r.outcome().cloned().into_iter().collect(),
            Self::IncomingHtlcSuccess(r) => r.outcome().cloned().into_iter().collect(),
            Self::OutgoingHtlcTimeout(r) => r.outcome().cloned().into_iter().collect(),
            Self::ContestedHtlc(r) => r.outcome().cloned().into_iter().collect(),
            Self::AnchorSweep(r) => r.outcome().cloned().into_iter().collect(),
            Self::BreachRemedy(r) => r.outcomes().to_vec(),
        }
    }

    fn claim(&self) -> Option<&ClaimTracker> {
        match self {
            Self::CommitmentSweep(r) => Some(r.claim()),
            Self::IncomingHtlcSuccess(r) => Some(r.claim()),
            Self::OutgoingHtlcTimeout(r) => Some(r.claim()),
            Self::ContestedHtlc(r) => Some(r.claim()),
            Self::AnchorSweep(r) => Some(r.claim()),
            Self::BreachRemedy(_) => None,
        }
    }

    fn claim_mut(&mut self) -> Option<&mut ClaimTracker> {
        match self {
            Self::CommitmentSweep(r) => Some(r.claim_mut()),
            Self::IncomingHtlcSuccess(r) => Some(r.claim_mut()),
            Self::OutgoingHtlcTimeout(r) => Some(r.claim_mut()),
            Self::ContestedHtlc(r) => Some(r.claim_mut()),
            Self::AnchorSweep(r) => Some(r.claim_mut()),
            Self::BreachRemedy(_) => None,
        }
    }

    /// The claim transaction to (re)publish, if one is in flight.
    #[must_use]
    pub fn pending_tx(&self) -> Option<&SignedTx> {
        if self.is_resolved() {
            return None;
        }
        self.claim().and_then(ClaimTracker::tx)
    }

    /// Transactions whose chain position this resolver depends on.
    #[must_use]
    pub fn tracked_txids(&self) -> Vec<Txid> {
        self.claim()
            .and_then(ClaimTracker::txid)
            .into_iter()
            .collect()
    }

    /// The network rejected `txid`. Returns `true` if it was this
    /// resolver's claim; a bumped claim is built on the next block.
    pub fn broadcast_failed(&mut self, txid: &Txid, height: Height) -> bool {
        self.claim_mut()
            .is_some_and(|claim| claim.broadcast_failed(txid, height))
    }

    /// The incubator finished the time-locked output this resolver handed
    /// it. Ignored by variants that never incubate.
    pub fn complete_incubation(&mut self, kind: OutcomeKind, height: Height) {
        match self {
            Self::CommitmentSweep(r) => r.complete_incubation(kind, height),
            Self::IncomingHtlcSuccess(r) => r.complete_incubation(kind, height),
            Self::OutgoingHtlcTimeout(r) => r.complete_incubation(kind, height),
            Self::ContestedHtlc(r) => r.complete_incubation(kind, height),
            Self::AnchorSweep(_) | Self::BreachRemedy(_) => {}
        }
    }

    #[must_use]
    pub fn as_breach_remedy_mut(&mut self) -> Option<&mut BreachRemedyResolver> {
        match self {
            Self::BreachRemedy(r) => Some(r),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared claim lifecycle
// ---------------------------------------------------------------------------

fn finish(output: &DisputedOutput, kind: OutcomeKind, height: Height) -> ResolverOutcome {
    ResolverOutcome {
        outpoint: output.outpoint,
        amount: output.amount,
        kind,
        height,
    }
}

fn htlc_of(output: &DisputedOutput, direction: HtlcDirection) -> Result<HtlcDescriptor> {
    match &output.htlc {
        Some(htlc) if output.kind == OutputKind::Htlc && htlc.direction == direction => {
            Ok(htlc.clone())
        }
        _ => Err(CourtError::InvalidResolverInput {
            outpoint: output.outpoint,
            reason: format!("expected an {direction} HTLC output"),
        }),
    }
}

fn require_csv(output: &DisputedOutput) -> Result<u32> {
    output
        .csv_delay
        .ok_or_else(|| CourtError::InvalidResolverInput {
            outpoint: output.outpoint,
            reason: "time-locked output without a CSV delay".to_string(),
        })
}

/// Build a fresh claim at the tracker's current fee attempt, or abandon the
/// output if it is not worth claiming.
fn build_claim(
    claim: &mut ClaimTracker,
    output: &DisputedOutput,
    outcome: &mut Option<ResolverOutcome>,
    ctx: &ResolveContext<'_>,
    build: impl FnOnce(Decimal) -> Result<Option<SignedTx>>,
) -> Result<ResolveAction> {
    if !claim.ready_to_build(ctx.height) {
        return Ok(ResolveAction::Wait(WaitReason::Retry {
            height: claim.retry_at().unwrap_or(ctx.height),
        }));
    }
    match build(ctx.fees.rate_for_attempt(claim.attempts()))? {
        Some(tx) => {
            claim.record(tx.clone());
            Ok(ResolveAction::Broadcast(tx))
        }
        None => {
            *outcome = Some(finish(
                output,
                OutcomeKind::Abandoned {
                    reason: "sweep fee exceeds output value".to_string(),
                },
                ctx.height,
            ));
            Ok(ResolveAction::Resolved)
        }
    }
}

/// Wait for an in-flight claim to reach final depth.
fn await_claim(
    claim: &ClaimTracker,
    output: &DisputedOutput,
    outcome: &mut Option<ResolverOutcome>,
    ctx: &ResolveContext<'_>,
) -> ResolveAction {
    let Some(txid) = claim.txid() else {
        return ResolveAction::Wait(WaitReason::Retry { height: ctx.height });
    };
    if claim.is_final(ctx.sweep_conf_depth) {
        *outcome = Some(finish(output, OutcomeKind::Swept { txid }, ctx.height));
        return ResolveAction::Resolved;
    }
    ResolveAction::Wait(WaitReason::Confirmation { txid })
}

/// Hand the CSV-delayed output of a second-level claim to the incubator,
/// once per claim transaction. A fee-bumped claim has a new txid and is
/// registered again.
fn incubate_second_level(
    claim: &ClaimTracker,
    output: &DisputedOutput,
    incubated: &mut Option<Txid>,
    csv_delay: u32,
    confirmed_at: Option<Height>,
) -> ResolveAction {
    let Some(tx) = claim.tx() else {
        return ResolveAction::Wait(WaitReason::Incubation);
    };
    let parent_txid = tx.txid();
    if *incubated == Some(parent_txid) {
        return ResolveAction::Wait(WaitReason::Incubation);
    }
    *incubated = Some(parent_txid);
    ResolveAction::Incubate(IncubationRequest {
        origin: output.outpoint,
        outpoint: tx.outpoint(0),
        amount: tx.tx.output_value(),
        path: SpendPath::ToLocalDelayed,
        csv_delay,
        parent_txid,
        confirmed_at,
    })
}

/// A spend of `output` by a transaction other than our claim.
fn foreign_spend(
    event: &ChainEvent,
    output: &DisputedOutput,
    claim: &ClaimTracker,
) -> Option<(Txid, Height, Option<Preimage>)> {
    match event {
        ChainEvent::SpendDetected {
            outpoint,
            spender,
            height,
            preimage,
        } if *outpoint == output.outpoint && claim.txid() != Some(*spender) => {
            Some((*spender, *height, *preimage))
        }
        _ => None,
    }
}

/// A preimage revealed by any spend, if it unlocks `htlc`.
fn revealed_preimage(event: &ChainEvent, htlc: &HtlcDescriptor) -> Option<Preimage> {
    match event {
        ChainEvent::SpendDetected {
            preimage: Some(p), ..
        } if p.matches(&htlc.payment_hash) => Some(*p),
        _ => None,
    }
}
