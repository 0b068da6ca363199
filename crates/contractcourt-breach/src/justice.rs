//! The breach arbitrator.
//!
//! Answers a revoked commitment with one justice transaction spending every
//! punishable output plus our own balance. While the justice transaction is
//! unconfirmed it is rebuilt once per block at an escalating fee, and
//! whenever the counterparty sweeps one of the outputs first, the lost
//! output is dropped from the next version instead of being retried.

use std::sync::Arc;

use contractcourt_resolvers::build_sweep;
use contractcourt_types::{
    BreachConfig, ChainEvent, ChannelId, Commitment, CourtError, DisputedOutput, FeeConfig,
    Height, OutputKind, Result, ResolverOutcome, SignedTx, Signer, SpendDescriptor,
};
use tracing::Span;

use crate::policy::{FeeBumpPolicy, GeometricFeeBump, bump_context};
use crate::retribution::{JusticeVersion, PunishableOutput, Retribution};

/// What the channel arbitrator must do after a justice step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JusticeAction {
    Wait,
    /// Persist, then publish.
    Publish(SignedTx),
    /// The breach is closed out with these outcomes.
    Settled(Vec<ResolverOutcome>),
}

pub struct BreachArbitrator {
    channel_id: ChannelId,
    config: BreachConfig,
    fees: FeeConfig,
    policy: Arc<dyn FeeBumpPolicy>,
    span: Span,
}

impl BreachArbitrator {
    #[must_use]
    pub fn new(channel_id: ChannelId, config: BreachConfig, fees: FeeConfig, span: Span) -> Self {
        let policy = Arc::new(GeometricFeeBump::from_config(&config));
        Self {
            channel_id,
            config,
            fees,
            policy,
            span,
        }
    }

    /// Replace the default fee-bump policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn FeeBumpPolicy>) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    #[must_use]
    pub fn justice_conf_depth(&self) -> u32 {
        self.config.justice_conf_depth
    }

    /// Start a breach response for `commitment`, confirmed at `height`.
    ///
    /// Anchors are left out; the caller sweeps them separately.
    ///
    /// # Errors
    /// [`CourtError::NothingToPunish`] if no output is revocable, and
    /// [`CourtError::InvalidClosure`] for outputs a revoked commitment cannot
    /// carry.
    pub fn begin(&self, commitment: &Commitment, height: Height) -> Result<Retribution> {
        let mut outputs: Vec<DisputedOutput> = Vec::new();
        for output in &commitment.outputs {
            match output.kind {
                OutputKind::Anchor => {}
                OutputKind::RevokedToLocal | OutputKind::RevokedHtlc | OutputKind::ToRemote => {
                    outputs.push(output.clone());
                }
                OutputKind::ToLocal | OutputKind::Htlc => {
                    return Err(CourtError::InvalidClosure {
                        reason: format!(
                            "revoked commitment {} carries a {} output",
                            commitment.txid(),
                            output.kind
                        ),
                    });
                }
            }
        }
        if !outputs.iter().any(|o| o.kind.is_punishable()) {
            return Err(CourtError::NothingToPunish(self.channel_id));
        }
        let value: u64 = outputs.iter().map(|o| o.amount).sum();
        tracing::warn!(
            parent: &self.span,
            channel = %self.channel_id.short(),
            breach = %commitment.txid().short(),
            state = commitment.state_number,
            outputs = outputs.len(),
            value,
            "revoked commitment confirmed, starting retribution"
        );
        Ok(Retribution::new(commitment.txid(), height, outputs))
    }

    /// Build the justice transaction for `height` if the current one is
    /// missing, stale, or built in an earlier block.
    pub fn step(
        &self,
        retribution: &mut Retribution,
        height: Height,
        signer: &dyn Signer,
    ) -> Result<JusticeAction> {
        if retribution.is_settled() || retribution.confirmed().is_some() {
            return Ok(JusticeAction::Wait);
        }
        let outpoints = retribution.pending_outpoints();
        if outpoints.is_empty() {
            return Ok(JusticeAction::Wait);
        }
        if let Some(current) = retribution.current() {
            if current.outpoints == outpoints && current.built_at >= height {
                return Ok(JusticeAction::Wait);
            }
        }

        let inputs: Vec<SpendDescriptor> = retribution
            .pending()
            .map(PunishableOutput::descriptor)
            .collect();
        let blocks_to_deadline = retribution.deadline().map(|d| d.saturating_sub(height));
        let ctx = bump_context(&self.fees, retribution.attempts(), blocks_to_deadline);
        let fee_rate = self.policy.fee_rate(&ctx);

        let Some(tx) = build_sweep(signer, &inputs, fee_rate, 0)? else {
            tracing::warn!(
                parent: &self.span,
                channel = %self.channel_id.short(),
                %fee_rate,
                "justice transaction not worth its fee, abandoning remaining outputs"
            );
            let outcomes = retribution
                .settle_without_justice(Some(("justice fee exceeds output value", height)));
            return Ok(JusticeAction::Settled(outcomes));
        };

        // At the fee ceiling a rebuild reproduces the published transaction.
        if retribution.current().map(JusticeVersion::txid) == Some(tx.txid()) {
            retribution.touch_current(height);
            return Ok(JusticeAction::Wait);
        }

        tracing::info!(
            parent: &self.span,
            channel = %self.channel_id.short(),
            justice = %tx.txid().short(),
            attempt = retribution.attempts(),
            inputs = inputs.len(),
            %fee_rate,
            blocks_to_deadline,
            "justice transaction built"
        );
        retribution.push_version(tx.clone(), outpoints, height);
        Ok(JusticeAction::Publish(tx))
    }

    /// Apply a chain event to `retribution`. Returns the outcomes once the
    /// justice transaction is final or nothing is left to take.
    pub fn observe(
        &self,
        retribution: &mut Retribution,
        event: &ChainEvent,
    ) -> Option<Vec<ResolverOutcome>> {
        let lost_before = retribution.lost().len();
        let settled = retribution.observe(event, self.config.justice_conf_depth);
        let lost_after = retribution.lost().len();
        if lost_after > lost_before {
            tracing::warn!(
                parent: &self.span,
                channel = %self.channel_id.short(),
                spender = ?event.txid().map(|t| t.short()),
                lost = lost_after,
                "counterparty swept a revoked output first, dropping it from justice"
            );
        }
        if let Some(outcomes) = &settled {
            let swept = outcomes.iter().filter(|o| o.kind.is_recovered()).count();
            tracing::info!(
                parent: &self.span,
                channel = %self.channel_id.short(),
                swept,
                lost = lost_after,
                "breach settled"
            );
        }
        settled
    }
}
