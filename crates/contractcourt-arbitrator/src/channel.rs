//! The channel arbitrator: one channel's on-chain dispute, start to finish.
//!
//! ```text
//!  Default ──▶ BroadcastCommit ──▶ CommitmentConfirmed ──▶ ContractAcknowledged ──▶ FullyResolved
//!                    ▲                       │                      │
//!                    └──── closing tx reorged out ──────────────────┘
//!  (any live phase) ──▶ BreachDetected ──▶ FullyResolved
//! ```
//!
//! Every event runs the same pass: apply it to the persisted record, advance
//! the phase as far as chain state allows, write the record, and only then
//! publish whatever transactions the record says are outstanding. Each phase
//! transition is written on its own before the pass continues. A pass that
//! fails part way leaves the arbitrator on the last record the log accepted.

use chrono::Utc;
use contractcourt_breach::{BreachArbitrator, JusticeAction};
use contractcourt_log::ArbitrationLog;
use contractcourt_resolvers::{
    AnchorResolver, BreachRemedyResolver, Graduation, Incubator, ResolveAction, ResolveContext,
    Resolver, verify_coverage,
};
use contractcourt_types::{
    ArbitratorConfig, ArbitratorState, ChainEvent, ChannelId, CloseObservation, CloseType,
    ClosureSummary, Commitment, CommitmentOwner, CourtError, Height, HtlcDirection, OutputKind,
    PreimageStatus, ResolutionReport, ResolverOutcome, Result, SignedTx, TxConfirmation, Txid, constants,
};
use tracing::Span;

use crate::event::{ChannelEvent, ChannelStatus, Collaborators};
use crate::guard::PublishGuard;
use crate::record::{ChannelRecord, TrackedClose};

/// Failures that clear up on a later block: logged, never returned.
fn is_retryable(err: &CourtError) -> bool {
    err.is_transient()
        || matches!(
            err,
            CourtError::SigningFailed { .. } | CourtError::BroadcastRejected { .. }
        )
}

pub struct ChannelArbitrator {
    record: ChannelRecord,
    /// Last record the log accepted.
    durable: ChannelRecord,
    config: ArbitratorConfig,
    log: ArbitrationLog,
    deps: Collaborators,
    breach: BreachArbitrator,
    guard: PublishGuard,
    span: Span,
    incubator_span: Span,
}

impl ChannelArbitrator {
    fn build(
        record: ChannelRecord,
        config: ArbitratorConfig,
        log: ArbitrationLog,
        deps: Collaborators,
        parent: &Span,
    ) -> Self {
        let channel_id = record.channel_id;
        let span = tracing::info_span!(parent: parent, "CNCT", channel = %channel_id.short());
        let incubator_span = tracing::info_span!(parent: &span, "UTXN");
        let mut breach = BreachArbitrator::new(
            channel_id,
            config.breach.clone(),
            config.fees.clone(),
            tracing::info_span!(parent: &span, "BRAR"),
        );
        if let Some(policy) = &deps.fee_policy {
            breach = breach.with_policy(policy.clone());
        }
        Self {
            durable: record.clone(),
            record,
            config,
            log,
            deps,
            breach,
            guard: PublishGuard::new(constants::PUBLISH_GUARD_CAPACITY),
            span,
            incubator_span,
        }
    }

    /// Start arbitrating a newly opened channel.
    ///
    /// # Errors
    /// Transient chain errors if the best height cannot be read; storage
    /// errors if the initial record cannot be written.
    pub fn open(
        channel_id: ChannelId,
        config: ArbitratorConfig,
        log: ArbitrationLog,
        deps: Collaborators,
        parent: &Span,
    ) -> Result<Self> {
        let best = deps.chain.best_height()?;
        let mut arb = Self::build(ChannelRecord::new(channel_id, best), config, log, deps, parent);
        arb.persist()?;
        tracing::debug!(parent: &arb.span, best, "arbitrator opened");
        Ok(arb)
    }

    /// Rebuild an arbitrator from its log record.
    ///
    /// Chain state is re-read for every transaction the record depends on and
    /// fed back in as events, so the resumed arbitrator trusts nothing but
    /// the log and the chain. Outstanding transactions are republished.
    ///
    /// # Errors
    /// [`CourtError::MissingClosureSummary`] if the record claims a
    /// confirmed close without its summary (fatal); transient chain errors
    /// leave nothing changed and may be retried.
    pub fn recover(
        record: ChannelRecord,
        config: ArbitratorConfig,
        log: ArbitrationLog,
        deps: Collaborators,
        parent: &Span,
    ) -> Result<Self> {
        let phase = record.phase;
        let needs_summary = matches!(
            phase,
            ArbitratorState::ContractAcknowledged
                | ArbitratorState::BreachDetected
                | ArbitratorState::FullyResolved
        );
        if needs_summary && record.closure.is_none() {
            return Err(CourtError::MissingClosureSummary(record.channel_id));
        }
        if phase != ArbitratorState::Default && record.close.is_none() {
            return Err(CourtError::Internal(format!(
                "channel {} is {phase} without a closing transaction",
                record.channel_id
            )));
        }

        let mut arb = Self::build(record, config, log, deps, parent);
        if phase.is_terminal() {
            tracing::debug!(parent: &arb.span, "channel already resolved");
            return Ok(arb);
        }

        // Query everything before touching state.
        let best = arb.deps.chain.best_height()?;
        let mut events = Vec::new();
        for txid in arb.record.tracked_txids() {
            events.push(match arb.deps.chain.confirmation(&txid)? {
                Some(c) => ChainEvent::TxConfirmed {
                    txid,
                    height: c.height,
                    depth: c.depth,
                },
                None => ChainEvent::TxReorged { txid },
            });
        }
        events.push(ChainEvent::BlockConnected { height: best });

        tracing::info!(
            parent: &arb.span,
            %phase,
            tracked = events.len() - 1,
            resolvers = arb.record.resolvers.len(),
            incubating = arb.record.incubator.len(),
            best,
            "recovering channel from arbitration log"
        );
        for event in &events {
            arb.on_chain_event(event)?;
        }
        arb.advance()?;
        arb.persist()?;
        arb.publish_pending()?;
        Ok(arb)
    }

    #[must_use]
    pub fn channel_id(&self) -> ChannelId {
        self.record.channel_id
    }

    #[must_use]
    pub fn phase(&self) -> ArbitratorState {
        self.record.phase
    }

    /// The `CNCT` span every log line of this channel is emitted under.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    #[must_use]
    pub fn record(&self) -> &ChannelRecord {
        &self.record
    }

    #[must_use]
    pub fn report(&self) -> Option<&ResolutionReport> {
        self.record.report.as_ref()
    }

    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        match &self.record.report {
            Some(report) if self.record.phase.is_terminal() => {
                ChannelStatus::Resolved(report.clone())
            }
            _ => ChannelStatus::Active(self.record.phase),
        }
    }

    /// Process one event.
    ///
    /// On any error the arbitrator is reset to the last record written to
    /// the log, so nothing half-applied survives and the same event may be
    /// delivered again.
    ///
    /// # Errors
    /// Fatal errors ([`CourtError::is_fatal`]) mean the channel must stop.
    /// Storage errors ([`CourtError::is_storage`]) mean the event was not
    /// recorded. Signing and broadcast failures are never returned; they are
    /// retried on a later block.
    pub fn handle(&mut self, event: ChannelEvent) -> Result<()> {
        if self.record.phase.is_terminal() {
            tracing::trace!(parent: &self.span, ?event, "channel resolved, ignoring event");
            return Ok(());
        }
        let result = self.apply(event);
        if let Err(e) = &result {
            tracing::warn!(
                parent: &self.span,
                phase = %self.durable.phase,
                error = %e,
                "event not applied, back to last persisted record"
            );
            self.record = self.durable.clone();
        }
        result
    }

    fn apply(&mut self, event: ChannelEvent) -> Result<()> {
        match event {
            ChannelEvent::ForceClose => self.on_force_close(),
            ChannelEvent::CloseObserved {
                observation,
                height,
            } => self.on_close_observed(observation, height)?,
            ChannelEvent::Chain(event) => self.on_chain_event(&event)?,
            ChannelEvent::UpdateHtlcs(htlcs) => {
                tracing::debug!(parent: &self.span, htlcs = htlcs.len(), "off-chain HTLC set updated");
                self.record.htlcs = htlcs;
            }
        }
        self.advance()?;
        self.persist()?;
        self.publish_pending()
    }

    // -----------------------------------------------------------------
    // Event application
    // -----------------------------------------------------------------

    fn on_force_close(&mut self) {
        if self.record.phase != ArbitratorState::Default || self.record.force_close_requested {
            tracing::debug!(parent: &self.span, phase = %self.record.phase, "force close already under way");
            return;
        }
        tracing::info!(parent: &self.span, "force close requested");
        self.record.force_close_requested = true;
    }

    fn confirmation_at(&self, height: Height) -> TxConfirmation {
        TxConfirmation {
            height,
            depth: self.record.best_height.saturating_sub(height) + 1,
        }
    }

    fn on_close_observed(&mut self, observation: CloseObservation, height: Height) -> Result<()> {
        if let CloseObservation::Breach(commitment) = observation {
            return self.enter_breach(commitment, height);
        }
        if self.record.phase == ArbitratorState::BreachDetected {
            tracing::debug!(parent: &self.span, txid = %observation.txid().short(), "ignoring close after breach");
            return Ok(());
        }

        let txid = observation.txid();
        let confirmation = self.confirmation_at(height);
        let phase = self.record.phase;
        let span = &self.span;
        if let Some(close) = self.record.close.as_mut() {
            if close.txid() == txid {
                // Re-delivery, possibly after a reorg moved it.
                if close.confirmation.is_none_or(|c| c.height != height) {
                    close.confirmation = Some(confirmation);
                }
                return Ok(());
            }
            if phase.is_confirmed() {
                tracing::warn!(
                    parent: span,
                    tracked = %close.txid().short(),
                    observed = %txid.short(),
                    "conflicting close while another is confirmed, ignoring"
                );
                return Ok(());
            }
        }

        tracing::info!(
            parent: &self.span,
            close_type = %observation.close_type(),
            txid = %txid.short(),
            height,
            "closing transaction observed"
        );
        self.record.close = Some(TrackedClose {
            observation,
            initiated_locally: false,
            confirmation: Some(confirmation),
        });
        self.record.force_close_requested = false;
        if phase == ArbitratorState::Default {
            self.transition(ArbitratorState::BroadcastCommit)?;
        }
        Ok(())
    }

    fn on_chain_event(&mut self, event: &ChainEvent) -> Result<()> {
        match event {
            ChainEvent::BlockConnected { height } => {
                self.record.best_height = self.record.best_height.max(*height);
            }
            ChainEvent::TxReorged { txid } => {
                self.guard.forget(txid);
            }
            ChainEvent::TxConfirmed { .. } | ChainEvent::SpendDetected { .. } => {}
        }

        let best = self.record.best_height;
        let mut close_reorged = false;
        if let Some(close) = self.record.close.as_mut() {
            let close_txid = close.txid();
            match event {
                ChainEvent::TxConfirmed {
                    txid,
                    height,
                    depth,
                } if *txid == close_txid => {
                    // A stale redelivery must not make the close shallower.
                    let seen = if best >= *height { best - height + 1 } else { 0 };
                    close.confirmation = Some(TxConfirmation {
                        height: *height,
                        depth: (*depth).max(seen),
                    });
                }
                ChainEvent::TxReorged { txid } if *txid == close_txid => {
                    close_reorged = close.confirmation.is_some();
                    close.confirmation = None;
                }
                ChainEvent::BlockConnected { height } => {
                    if let Some(c) = close.confirmation.as_mut() {
                        if *height >= c.height {
                            c.depth = c.depth.max(height - c.height + 1);
                        }
                    }
                }
                _ => {}
            }
        }
        if close_reorged {
            self.roll_back()?;
        }

        for resolver in &mut self.record.resolvers {
            resolver.observe(event);
        }
        let graduated = self
            .record
            .incubator
            .observe(event, self.config.sweep_conf_depth);
        self.apply_graduations(graduated);

        let settled = match self.record.retribution.as_mut() {
            Some(retribution) => self.breach.observe(retribution, event),
            None => None,
        };
        if let Some(outcomes) = settled {
            self.settle_breach(outcomes)?;
        }
        Ok(())
    }

    /// The closing transaction left the chain: forget everything derived
    /// from it.
    fn roll_back(&mut self) -> Result<()> {
        match self.record.phase {
            ArbitratorState::CommitmentConfirmed | ArbitratorState::ContractAcknowledged => {
                tracing::warn!(
                    parent: &self.span,
                    phase = %self.record.phase,
                    dropped = self.record.resolvers.len(),
                    "closing transaction reorged out, rolling back"
                );
                for txid in self
                    .record
                    .resolvers
                    .iter()
                    .flat_map(Resolver::tracked_txids)
                    .chain(self.record.incubator.tracked_txids())
                {
                    self.guard.forget(&txid);
                }
                self.record.closure = None;
                self.record.resolvers.clear();
                self.record.outcomes.clear();
                self.record.incubator = Incubator::new();
                self.transition(ArbitratorState::BroadcastCommit)
            }
            ArbitratorState::BreachDetected => {
                tracing::warn!(
                    parent: &self.span,
                    "revoked commitment reorged out, justice continues once it is mined again"
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn enter_breach(&mut self, commitment: Commitment, height: Height) -> Result<()> {
        let phase = self.record.phase;
        if !phase.can_transition_to(ArbitratorState::BreachDetected) {
            tracing::debug!(parent: &self.span, %phase, "breach already handled");
            return Ok(());
        }
        let retribution = match self.breach.begin(&commitment, height) {
            Ok(r) => r,
            Err(CourtError::NothingToPunish(_)) => {
                tracing::warn!(
                    parent: &self.span,
                    txid = %commitment.txid().short(),
                    "revoked commitment has nothing to punish, resolving as a remote close"
                );
                return self.on_close_observed(CloseObservation::RemoteUnilateral(commitment), height);
            }
            Err(e) => return Err(e),
        };

        let txid = commitment.txid();
        let summary = ClosureSummary::new(
            self.record.channel_id,
            CloseType::Breach,
            txid,
            height,
            commitment.outputs.clone(),
        )?;
        let mut resolvers = vec![Resolver::BreachRemedy(BreachRemedyResolver::new(
            txid,
            retribution.disputed(),
        )?)];
        for anchor in commitment.outputs.iter().filter(|o| o.kind == OutputKind::Anchor) {
            resolvers.push(Resolver::AnchorSweep(AnchorResolver::new(anchor.clone())?));
        }

        tracing::warn!(
            parent: &self.span,
            %phase,
            superseded = self.record.resolvers.len(),
            "breach detected, justice path takes over"
        );
        self.record.close = Some(TrackedClose {
            observation: CloseObservation::Breach(commitment),
            initiated_locally: false,
            confirmation: Some(self.confirmation_at(height)),
        });
        self.record.force_close_requested = false;
        self.record.closure = Some(summary);
        self.record.resolvers = resolvers;
        self.record.outcomes.clear();
        self.record.incubator = Incubator::new();
        self.record.retribution = Some(retribution);
        self.transition(ArbitratorState::BreachDetected)
    }

    // -----------------------------------------------------------------
    // Phase progression
    // -----------------------------------------------------------------

    fn advance(&mut self) -> Result<()> {
        loop {
            let before = self.record.phase;
            match before {
                ArbitratorState::Default => self.maybe_go_to_chain()?,
                ArbitratorState::BroadcastCommit => {
                    let depth = self.record.close.as_ref().map_or(0, TrackedClose::depth);
                    if depth >= self.config.commitment_conf_depth {
                        self.transition(ArbitratorState::CommitmentConfirmed)?;
                    }
                }
                ArbitratorState::CommitmentConfirmed => self.acknowledge_contracts()?,
                ArbitratorState::ContractAcknowledged => self.step_contracts()?,
                ArbitratorState::BreachDetected => self.step_breach()?,
                ArbitratorState::FullyResolved => {}
            }
            if self.record.phase == before {
                return Ok(());
            }
        }
    }

    fn transition(&mut self, to: ArbitratorState) -> Result<()> {
        let from = self.record.phase;
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(CourtError::InvalidTransition { from, to });
        }
        self.record.phase = to;
        if let Err(e) = self.persist() {
            self.record.phase = from;
            return Err(e);
        }
        tracing::info!(parent: &self.span, %from, %to, height = self.record.best_height, "phase transition");
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        self.record.updated_at = Utc::now();
        self.log.put(&self.record)?;
        self.durable = self.record.clone();
        Ok(())
    }

    /// Why an off-chain HTLC forces us on chain at the current height.
    fn htlc_deadline(&self) -> Option<String> {
        let height = self.record.best_height;
        self.record.htlcs.iter().find_map(|htlc| {
            let left = htlc.blocks_until_expiry(height);
            match htlc.direction {
                HtlcDirection::Outgoing if left <= self.config.outgoing_broadcast_delta => Some(
                    format!("outgoing HTLC expires at {} ({left} blocks)", htlc.expiry),
                ),
                HtlcDirection::Incoming if left <= self.config.incoming_broadcast_delta => {
                    let known = htlc.preimage.is_some()
                        || matches!(
                            self.deps.registry.lookup(&htlc.payment_hash),
                            PreimageStatus::Known(_)
                        );
                    known.then(|| {
                        format!("settled incoming HTLC expires at {} ({left} blocks)", htlc.expiry)
                    })
                }
                _ => None,
            }
        })
    }

    fn maybe_go_to_chain(&mut self) -> Result<()> {
        if !self.record.force_close_requested {
            let Some(reason) = self.htlc_deadline() else {
                return Ok(());
            };
            tracing::info!(parent: &self.span, %reason, "going to chain");
            self.record.force_close_requested = true;
        }
        match self.deps.signer.sign_local_commitment(self.record.channel_id) {
            Ok(commitment) => {
                tracing::info!(
                    parent: &self.span,
                    txid = %commitment.txid().short(),
                    state = commitment.state_number,
                    "local commitment signed"
                );
                self.record.close = Some(TrackedClose {
                    observation: CloseObservation::LocalUnilateral(commitment),
                    initiated_locally: true,
                    confirmation: None,
                });
                self.record.force_close_requested = false;
                self.transition(ArbitratorState::BroadcastCommit)
            }
            Err(e) if is_retryable(&e) => {
                tracing::warn!(parent: &self.span, error = %e, "could not sign local commitment, retrying next block");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn acknowledge_contracts(&mut self) -> Result<()> {
        let channel_id = self.record.channel_id;
        let close = self
            .record
            .close
            .as_ref()
            .ok_or(CourtError::MissingClosureSummary(channel_id))?;
        let conf = close.confirmation.ok_or_else(|| {
            CourtError::Internal(format!("close of {channel_id} confirmed without a height"))
        })?;
        let owner = match &close.observation {
            CloseObservation::LocalUnilateral(_) => CommitmentOwner::Local,
            CloseObservation::RemoteUnilateral(_) | CloseObservation::Cooperative { .. } => {
                CommitmentOwner::Remote
            }
            CloseObservation::Breach(_) => {
                return Err(CourtError::Internal(
                    "breach close on the normal resolution path".to_string(),
                ));
            }
        };
        let summary = ClosureSummary::new(
            channel_id,
            close.observation.close_type(),
            close.txid(),
            conf.height,
            close.observation.outputs().to_vec(),
        )?;
        let resolvers = summary
            .outputs()
            .iter()
            .map(|output| Resolver::for_output(output, owner, conf.height))
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            parent: &self.span,
            close_type = %summary.close_type(),
            txid = %summary.closing_txid().short(),
            outputs = summary.outputs().len(),
            value = summary.total_value(),
            "closure summary frozen, spawning resolvers"
        );
        verify_coverage(&summary, &[], &resolvers.iter().flat_map(Resolver::outpoints).collect::<Vec<_>>())?;
        self.record.closure = Some(summary);
        self.record.resolvers = resolvers;
        self.record.outcomes.clear();
        self.transition(ArbitratorState::ContractAcknowledged)
    }

    fn step_contracts(&mut self) -> Result<()> {
        self.run_resolvers()?;
        self.run_incubator()?;
        self.collect_resolved();
        self.check_coverage()?;
        if self.record.resolvers.is_empty() && self.record.incubator.is_empty() {
            self.finish()?;
        }
        Ok(())
    }

    fn step_breach(&mut self) -> Result<()> {
        let height = self.record.best_height;
        let action = match self.record.retribution.as_mut() {
            Some(retribution) => self.breach.step(retribution, height, self.deps.signer.as_ref()),
            None => Ok(JusticeAction::Wait),
        };
        match action {
            Ok(JusticeAction::Wait | JusticeAction::Publish(_)) => {}
            Ok(JusticeAction::Settled(outcomes)) => self.settle_breach(outcomes)?,
            Err(e) if is_retryable(&e) => {
                tracing::warn!(parent: &self.span, error = %e, "justice step failed, retrying next block");
            }
            Err(e) => return Err(e),
        }
        self.run_resolvers()?;
        self.collect_resolved();
        self.check_coverage()?;
        if self.record.resolvers.is_empty() {
            self.finish()?;
        }
        Ok(())
    }

    fn settle_breach(&mut self, outcomes: Vec<ResolverOutcome>) -> Result<()> {
        let remedy = self
            .record
            .resolvers
            .iter_mut()
            .find_map(Resolver::as_breach_remedy_mut)
            .ok_or_else(|| CourtError::Internal("breach settled without a remedy resolver".to_string()))?;
        remedy.settle(outcomes)
    }

    fn run_resolvers(&mut self) -> Result<()> {
        let ctx = ResolveContext {
            height: self.record.best_height,
            signer: self.deps.signer.as_ref(),
            registry: self.deps.registry.as_ref(),
            fees: &self.config.fees,
            sweep_conf_depth: self.config.sweep_conf_depth,
        };
        for resolver in &mut self.record.resolvers {
            drive(resolver, &ctx, &mut self.record.incubator, &self.span)?;
        }
        Ok(())
    }

    fn run_incubator(&mut self) -> Result<()> {
        let finished = self.record.incubator.on_block(
            self.record.best_height,
            self.deps.signer.as_ref(),
            &self.config.fees,
            &self.incubator_span,
        );
        match finished {
            Ok(finished) => {
                self.apply_graduations(finished);
                Ok(())
            }
            Err(e) if is_retryable(&e) => {
                tracing::warn!(parent: &self.incubator_span, error = %e, "incubator sweep failed, retrying next block");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn apply_graduations(&mut self, graduations: Vec<Graduation>) {
        let span = &self.incubator_span;
        for g in graduations {
            match self
                .record
                .resolvers
                .iter_mut()
                .find(|r| r.outpoints().contains(&g.origin))
            {
                Some(resolver) => {
                    tracing::debug!(parent: span, origin = %g.origin, kind = %g.kind, "incubation finished");
                    resolver.complete_incubation(g.kind, g.height);
                }
                None => {
                    tracing::warn!(parent: span, origin = %g.origin, "incubated output has no resolver");
                }
            }
        }
    }

    fn collect_resolved(&mut self) {
        let (done, live): (Vec<Resolver>, Vec<Resolver>) = std::mem::take(&mut self.record.resolvers)
            .into_iter()
            .partition(Resolver::is_resolved);
        self.record.resolvers = live;
        for resolver in done {
            for outcome in resolver.outcomes() {
                tracing::info!(
                    parent: &self.span,
                    resolver = resolver.label(),
                    outpoint = %outcome.outpoint,
                    amount = outcome.amount,
                    outcome = %outcome.kind,
                    "output resolved"
                );
                self.record.outcomes.push(outcome);
            }
        }
    }

    fn check_coverage(&self) -> Result<()> {
        let summary = self
            .record
            .closure
            .as_ref()
            .ok_or(CourtError::MissingClosureSummary(self.record.channel_id))?;
        verify_coverage(summary, &self.record.outcomes, &self.record.pending_outpoints())
    }

    fn finish(&mut self) -> Result<()> {
        let report = ResolutionReport::from_outcomes(&self.record.outcomes);
        tracing::info!(
            parent: &self.span,
            swept = report.swept,
            conceded = report.conceded,
            settled_off_chain = report.settled_off_chain,
            abandoned = report.abandoned,
            lost = report.lost,
            outputs = report.outputs,
            "channel fully resolved"
        );
        self.record.report = Some(report);
        self.transition(ArbitratorState::FullyResolved)
    }

    // -----------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------

    fn pending_txs(&self) -> Vec<SignedTx> {
        let mut txs = Vec::new();
        if self.record.phase == ArbitratorState::BroadcastCommit {
            if let Some(TrackedClose {
                observation: CloseObservation::LocalUnilateral(commitment),
                initiated_locally: true,
                confirmation: None,
            }) = &self.record.close
            {
                txs.push(commitment.tx.clone());
            }
        }
        txs.extend(self.record.resolvers.iter().filter_map(Resolver::pending_tx).cloned());
        txs.extend(self.record.incubator.pending_txs());
        if let Some(retribution) = &self.record.retribution {
            txs.extend(retribution.pending_tx().cloned());
        }
        txs
    }

    /// Publish every outstanding transaction not yet published by this
    /// process. Must only run after the record is persisted.
    fn publish_pending(&mut self) -> Result<()> {
        let mut rejected: Vec<Txid> = Vec::new();
        for tx in self.pending_txs() {
            let txid = tx.txid();
            if self.guard.is_published(&txid) {
                continue;
            }
            match self.deps.broadcaster.publish(&tx) {
                Ok(()) => {
                    self.guard.mark_published(txid);
                    tracing::info!(parent: &self.span, txid = %txid.short(), inputs = tx.tx.inputs.len(), "transaction published");
                }
                Err(e) => {
                    tracing::warn!(parent: &self.span, txid = %txid.short(), error = %e, "publish failed, rebuilding with a higher fee next block");
                    rejected.push(txid);
                }
            }
        }
        if rejected.is_empty() {
            return Ok(());
        }
        let height = self.record.best_height;
        for txid in &rejected {
            for resolver in &mut self.record.resolvers {
                resolver.broadcast_failed(txid, height);
            }
            self.record.incubator.broadcast_failed(txid, height);
        }
        self.persist()
    }
}

/// Step one resolver until it waits or settles.
fn drive(
    resolver: &mut Resolver,
    ctx: &ResolveContext<'_>,
    incubator: &mut Incubator,
    span: &Span,
) -> Result<()> {
    for _ in 0..constants::MAX_RESOLVE_STEPS {
        let action = match resolver.resolve(ctx) {
            Ok(action) => action,
            Err(e) if is_retryable(&e) => {
                tracing::warn!(parent: span, resolver = resolver.label(), error = %e, "resolver step failed, retrying next block");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        match action {
            ResolveAction::Wait(reason) => {
                tracing::trace!(parent: span, resolver = resolver.label(), %reason, "resolver waiting");
                return Ok(());
            }
            ResolveAction::Broadcast(tx) => {
                tracing::debug!(parent: span, resolver = resolver.label(), txid = %tx.txid().short(), "claim built");
            }
            ResolveAction::Incubate(request) => {
                let origin = request.origin;
                if incubator.incubate(request) {
                    tracing::debug!(parent: span, resolver = resolver.label(), %origin, "output handed to incubator");
                }
            }
            ResolveAction::Handoff(next) => {
                tracing::info!(parent: span, from = resolver.label(), to = next.label(), "resolver handed off");
                for outpoint in resolver.outpoints() {
                    incubator.cancel(&outpoint);
                }
                *resolver = *next;
            }
            ResolveAction::Resolved => {
                for outpoint in resolver.outpoints() {
                    incubator.cancel(&outpoint);
                }
                return Ok(());
            }
        }
    }
    Err(CourtError::Internal(format!(
        "{} resolver for {:?} made no progress in {} steps",
        resolver.label(),
        resolver.outpoints(),
        constants::MAX_RESOLVE_STEPS
    )))
}
