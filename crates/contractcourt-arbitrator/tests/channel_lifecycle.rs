//! Integration tests: one channel from close to full resolution.
//!
//! CLOSE → CONFIRM → RESOLVE → REPORT
//!
//! Each test drives a `ChannelArbitrator` directly with the events a chain
//! watcher would deliver and checks what reaches the broadcaster and the
//! arbitration log.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use contractcourt_arbitrator::{ChannelArbitrator, ChannelEvent, ChannelRecord, ChannelStatus, Collaborators};
use contractcourt_breach::{BumpContext, FeeBumpPolicy};
use contractcourt_log::{ArbitrationLog, MemoryKvStore};
use contractcourt_resolvers::sweep_fee;
use contractcourt_types::testkit::{
    CommitmentBuilder, MockBroadcaster, MockChain, MockRegistry, MockSigner, preimage,
};
use contractcourt_types::*;
use rust_decimal::Decimal;
use tracing::Span;

struct Harness {
    signer: Arc<MockSigner>,
    broadcaster: Arc<MockBroadcaster>,
    registry: Arc<MockRegistry>,
    chain: Arc<MockChain>,
    log: ArbitrationLog,
    config: ArbitratorConfig,
}

impl Harness {
    fn new(height: Height) -> Self {
        Self {
            signer: Arc::new(MockSigner::new()),
            broadcaster: Arc::new(MockBroadcaster::new()),
            registry: Arc::new(MockRegistry::new()),
            chain: Arc::new(MockChain::new(height)),
            log: ArbitrationLog::new(Arc::new(MemoryKvStore::new())),
            config: ArbitratorConfig::default(),
        }
    }

    fn deps(&self) -> Collaborators {
        Collaborators {
            signer: self.signer.clone(),
            broadcaster: self.broadcaster.clone(),
            registry: self.registry.clone(),
            chain: self.chain.clone(),
            fee_policy: None,
        }
    }

    fn open(&self, channel_id: ChannelId) -> ChannelArbitrator {
        ChannelArbitrator::open(
            channel_id,
            self.config.clone(),
            self.log.clone(),
            self.deps(),
            &Span::none(),
        )
        .unwrap()
    }

    fn recover(&self, channel_id: ChannelId) -> Result<ChannelArbitrator> {
        let record: ChannelRecord = self.log.get(&channel_id).unwrap().expect("record persisted");
        ChannelArbitrator::recover(
            record,
            self.config.clone(),
            self.log.clone(),
            self.deps(),
            &Span::none(),
        )
    }

    /// The most recent published transaction spending `outpoint`.
    fn claim_of(&self, outpoint: &OutPoint) -> SignedTx {
        self.broadcaster
            .last_spending(outpoint)
            .unwrap_or_else(|| panic!("nothing published for {outpoint}"))
    }
}

fn block(arb: &mut ChannelArbitrator, height: Height) {
    arb.handle(ChainEvent::BlockConnected { height }.into()).unwrap();
}

fn confirm(arb: &mut ChannelArbitrator, txid: Txid, height: Height) {
    arb.handle(
        ChainEvent::TxConfirmed {
            txid,
            height,
            depth: 1,
        }
        .into(),
    )
    .unwrap();
}

fn labels(arb: &ChannelArbitrator) -> Vec<&'static str> {
    arb.record().resolvers.iter().map(|r| r.label()).collect()
}

/// Remote commitment paying our balance plus one HTLC each way.
fn remote_commitment() -> Commitment {
    CommitmentBuilder::new(CommitmentOwner::Remote, 40)
        .output(100_000, OutputKind::ToRemote, None)
        .htlc(
            OutputKind::Htlc,
            HtlcDescriptor::incoming(preimage(1).payment_hash(), 50_000, 800_000),
            None,
        )
        .htlc(
            OutputKind::Htlc,
            HtlcDescriptor::outgoing(preimage(2).payment_hash(), 30_000, 790_000),
            None,
        )
        .build()
}

fn remote_close(arb: &mut ChannelArbitrator, commitment: &Commitment, height: Height) {
    arb.handle(ChannelEvent::CloseObserved {
        observation: CloseObservation::RemoteUnilateral(commitment.clone()),
        height,
    })
    .unwrap();
}

#[test]
fn local_force_close_spawns_resolvers_and_times_out_at_expiry() {
    let h = Harness::new(779_990);
    let id = ChannelId::random();
    let commitment = CommitmentBuilder::new(CommitmentOwner::Local, 12)
        .output(200_000, OutputKind::ToLocal, Some(144))
        .htlc(
            OutputKind::Htlc,
            HtlcDescriptor::incoming(preimage(7).payment_hash(), 50_000, 800_000),
            Some(144),
        )
        .htlc(
            OutputKind::Htlc,
            HtlcDescriptor::outgoing(preimage(8).payment_hash(), 30_000, 790_000),
            Some(144),
        )
        .build();
    let [to_local, incoming, outgoing] = [0, 1, 2].map(|i| commitment.outputs[i].outpoint);
    h.signer.set_local_commitment(id, commitment.clone());
    let mut arb = h.open(id);

    // =====================================================================
    // CLOSE: our commitment goes out once
    // =====================================================================
    arb.handle(ChannelEvent::ForceClose).unwrap();
    assert_eq!(arb.phase(), ArbitratorState::BroadcastCommit);
    assert_eq!(h.broadcaster.count(&commitment.txid()), 1);

    // =====================================================================
    // CONFIRM: resolvers only once the close is six deep
    // =====================================================================
    confirm(&mut arb, commitment.txid(), 780_000);
    block(&mut arb, 780_004);
    assert_eq!(arb.phase(), ArbitratorState::BroadcastCommit);
    assert!(arb.record().resolvers.is_empty());

    block(&mut arb, 780_005);
    assert_eq!(arb.phase(), ArbitratorState::ContractAcknowledged);
    assert_eq!(
        labels(&arb),
        ["COMMITMENT_SWEEP", "INCOMING_HTLC_SUCCESS", "OUTGOING_HTLC_TIMEOUT"]
    );
    let summary = arb.record().closure.clone().expect("closure summary frozen");
    assert_eq!(summary.total_value(), 280_000);
    // The delayed balance is incubating; nothing else is claimable yet.
    assert_eq!(arb.record().incubator.len(), 1);
    assert_eq!(
        arb.record().incubator.record(&to_local).and_then(|r| r.maturity_height()),
        Some(780_143)
    );
    assert_eq!(h.broadcaster.published().len(), 1);

    // =====================================================================
    // RESOLVE: the delayed balance matures, the outgoing HTLC times out
    // =====================================================================
    block(&mut arb, 780_143);
    let balance_sweep = h.claim_of(&to_local);
    assert_eq!(balance_sweep.tx.inputs[0].sequence, 144);

    block(&mut arb, 789_999);
    assert!(h.broadcaster.last_spending(&outgoing).is_none(), "no timeout claim before expiry");

    block(&mut arb, 790_000);
    let timeout = h.claim_of(&outgoing);
    assert_eq!(timeout.tx.lock_time, 790_000);
    assert_eq!(arb.record().incubator.len(), 2, "second-level output is incubating too");

    // Without the preimage the incoming HTLC is still waiting.
    assert!(h.broadcaster.last_spending(&incoming).is_none());
    assert!(labels(&arb).contains(&"INCOMING_HTLC_SUCCESS"));
    assert_eq!(arb.phase(), ArbitratorState::ContractAcknowledged);
}

#[test]
fn remote_close_resolves_every_output_and_reports() {
    let h = Harness::new(780_000);
    h.registry.settle(preimage(1));
    let id = ChannelId::random();
    let commitment = remote_commitment();
    let [balance, incoming, outgoing] = [0, 1, 2].map(|i| commitment.outputs[i].outpoint);
    let mut arb = h.open(id);

    remote_close(&mut arb, &commitment, 780_000);
    assert_eq!(arb.phase(), ArbitratorState::BroadcastCommit);
    assert!(h.broadcaster.published().is_empty(), "their commitment is not ours to publish");

    block(&mut arb, 780_005);
    assert_eq!(arb.phase(), ArbitratorState::ContractAcknowledged);
    let balance_sweep = h.claim_of(&balance);
    let success = h.claim_of(&incoming);
    assert_eq!(h.broadcaster.published().len(), 2);

    confirm(&mut arb, balance_sweep.txid(), 780_006);
    confirm(&mut arb, success.txid(), 780_006);
    block(&mut arb, 780_011);
    assert_eq!(labels(&arb), ["OUTGOING_HTLC_TIMEOUT"]);
    assert_eq!(arb.record().outcomes.len(), 2);

    block(&mut arb, 790_000);
    let timeout = h.claim_of(&outgoing);
    confirm(&mut arb, timeout.txid(), 790_001);
    block(&mut arb, 790_006);

    assert_eq!(arb.phase(), ArbitratorState::FullyResolved);
    let report = arb.report().cloned().expect("report on resolution");
    assert_eq!(report.swept, 180_000);
    assert_eq!(report.outputs, 3);
    assert_eq!(arb.status(), ChannelStatus::Resolved(report));

    let stored: ChannelRecord = h.log.get(&id).unwrap().unwrap();
    assert_eq!(stored.phase, ArbitratorState::FullyResolved);

    // Stale broadcasts after resolution change nothing.
    block(&mut arb, 790_100);
    assert_eq!(h.broadcaster.published().len(), 3);
}

#[test]
fn redelivered_events_publish_each_claim_once() {
    let h = Harness::new(780_000);
    h.registry.settle(preimage(1));
    let commitment = remote_commitment();
    let balance = commitment.outputs[0].outpoint;
    let mut arb = h.open(ChannelId::random());

    remote_close(&mut arb, &commitment, 780_000);
    remote_close(&mut arb, &commitment, 780_000);
    block(&mut arb, 780_005);
    block(&mut arb, 780_005);
    block(&mut arb, 780_003);
    remote_close(&mut arb, &commitment, 780_000);

    let sweep = h.claim_of(&balance);
    assert_eq!(h.broadcaster.count(&sweep.txid()), 1);
    assert_eq!(h.broadcaster.published().len(), 2);
    assert_eq!(arb.record().best_height, 780_005);
    assert_eq!(arb.record().resolvers.len(), 3);
}

#[test]
fn reorg_of_the_close_rolls_back_and_rebuilds() {
    let h = Harness::new(780_000);
    let commitment = remote_commitment();
    let balance = commitment.outputs[0].outpoint;
    let mut arb = h.open(ChannelId::random());

    remote_close(&mut arb, &commitment, 780_000);
    block(&mut arb, 780_005);
    assert_eq!(arb.phase(), ArbitratorState::ContractAcknowledged);
    let sweep = h.claim_of(&balance);

    arb.handle(ChainEvent::TxReorged { txid: commitment.txid() }.into())
        .unwrap();
    assert_eq!(arb.phase(), ArbitratorState::BroadcastCommit);
    assert!(arb.record().closure.is_none());
    assert!(arb.record().resolvers.is_empty());
    assert!(arb.record().incubator.is_empty());

    // Mined again two blocks later.
    block(&mut arb, 780_007);
    confirm(&mut arb, commitment.txid(), 780_007);
    block(&mut arb, 780_011);
    assert_eq!(arb.phase(), ArbitratorState::BroadcastCommit);
    block(&mut arb, 780_012);
    assert_eq!(arb.phase(), ArbitratorState::ContractAcknowledged);
    assert_eq!(arb.record().closure.as_ref().map(ClosureSummary::confirmation_height), Some(780_007));
    assert_eq!(h.broadcaster.count(&sweep.txid()), 2, "claim republished after the reorg");
}

#[test]
fn breach_supersedes_a_pending_local_close() {
    let h = Harness::new(900_000);
    let id = ChannelId::random();
    let ours = CommitmentBuilder::new(CommitmentOwner::Local, 30)
        .output(150_000, OutputKind::ToLocal, Some(144))
        .build();
    h.signer.set_local_commitment(id, ours.clone());
    let mut arb = h.open(id);
    arb.handle(ChannelEvent::ForceClose).unwrap();
    assert_eq!(arb.phase(), ArbitratorState::BroadcastCommit);

    // =====================================================================
    // BREACH: an old state confirms instead of ours
    // =====================================================================
    let revoked = CommitmentBuilder::new(CommitmentOwner::Remote, 3)
        .output(100_000, OutputKind::RevokedToLocal, Some(144))
        .output(50_000, OutputKind::ToRemote, None)
        .htlc(
            OutputKind::RevokedHtlc,
            HtlcDescriptor::outgoing(preimage(4).payment_hash(), 25_000, 900_040),
            None,
        )
        .anchor()
        .build();
    let anchor = revoked.outputs[3].outpoint;
    arb.handle(ChannelEvent::CloseObserved {
        observation: CloseObservation::Breach(revoked.clone()),
        height: 900_001,
    })
    .unwrap();
    assert_eq!(arb.phase(), ArbitratorState::BreachDetected);
    assert_eq!(labels(&arb), ["BREACH_REMEDY", "ANCHOR_SWEEP"]);
    assert_eq!(arb.record().closure.as_ref().map(ClosureSummary::close_type), Some(CloseType::Breach));

    let justice = h.claim_of(&revoked.outputs[0].outpoint);
    assert_eq!(justice.tx.inputs.len(), 3);
    let anchor_sweep = h.claim_of(&anchor);

    // A late confirmation of ours is ignored.
    remote_close(&mut arb, &ours, 900_001);
    assert_eq!(arb.phase(), ArbitratorState::BreachDetected);

    // =====================================================================
    // SETTLE: justice and anchor sweep reach final depth
    // =====================================================================
    confirm(&mut arb, justice.txid(), 900_002);
    confirm(&mut arb, anchor_sweep.txid(), 900_002);
    block(&mut arb, 900_006);
    assert_eq!(arb.phase(), ArbitratorState::BreachDetected);
    block(&mut arb, 900_007);

    assert_eq!(arb.phase(), ArbitratorState::FullyResolved);
    let report = arb.report().expect("report");
    assert_eq!(report.swept, 175_000 + constants::ANCHOR_OUTPUT_VALUE);
    assert_eq!(report.lost, 0);
    assert_eq!(h.broadcaster.count(&ours.txid()), 1, "our commitment is not republished");
}

/// Bids a flat rate and counts how often it was asked.
struct FlatRate {
    rate: Decimal,
    calls: AtomicU32,
}

impl FeeBumpPolicy for FlatRate {
    fn fee_rate(&self, ctx: &BumpContext) -> Decimal {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.rate.clamp(ctx.base_rate, ctx.max_rate)
    }
}

#[test]
fn justice_fee_follows_an_injected_policy() {
    let revoked = CommitmentBuilder::new(CommitmentOwner::Remote, 3)
        .output(100_000, OutputKind::RevokedToLocal, Some(144))
        .output(50_000, OutputKind::ToRemote, None)
        .htlc(
            OutputKind::RevokedHtlc,
            HtlcDescriptor::outgoing(preimage(4).payment_hash(), 25_000, 900_040),
            None,
        )
        .build();
    let justice_fee = |policy: Option<Arc<dyn FeeBumpPolicy>>| {
        let h = Harness::new(900_000);
        let deps = Collaborators {
            fee_policy: policy,
            ..h.deps()
        };
        let mut arb = ChannelArbitrator::open(
            ChannelId::random(),
            h.config.clone(),
            h.log.clone(),
            deps,
            &Span::none(),
        )
        .unwrap();
        arb.handle(ChannelEvent::CloseObserved {
            observation: CloseObservation::Breach(revoked.clone()),
            height: 900_001,
        })
        .unwrap();
        let justice = h.claim_of(&revoked.outputs[0].outpoint);
        175_000 - justice.tx.output_value()
    };

    let flat = Arc::new(FlatRate {
        rate: Decimal::from(25),
        calls: AtomicU32::new(0),
    });
    let default_fee = justice_fee(None);
    let flat_fee = justice_fee(Some(flat.clone() as Arc<dyn FeeBumpPolicy>));
    assert!(flat.calls.load(Ordering::SeqCst) >= 1);
    assert!(flat_fee > default_fee, "{flat_fee} <= {default_fee}");
}

#[test]
fn cooperative_close_resolves_with_nothing_to_sweep() {
    let h = Harness::new(500_000);
    let mut arb = h.open(ChannelId::random());
    let txid = Txid::dummy(0xc0);

    arb.handle(ChannelEvent::CloseObserved {
        observation: CloseObservation::Cooperative { txid },
        height: 500_001,
    })
    .unwrap();
    assert_eq!(arb.phase(), ArbitratorState::BroadcastCommit);

    block(&mut arb, 500_006);
    assert_eq!(arb.phase(), ArbitratorState::FullyResolved);
    let report = arb.report().expect("report");
    assert_eq!(report.outputs, 0);
    assert_eq!(report.total(), 0);
    assert!(h.broadcaster.published().is_empty());
}

#[test]
fn goes_to_chain_before_an_outgoing_htlc_expires() {
    let h = Harness::new(789_980);
    let id = ChannelId::random();
    let commitment = CommitmentBuilder::new(CommitmentOwner::Local, 5)
        .output(10_000, OutputKind::ToLocal, Some(144))
        .build();
    h.signer.set_local_commitment(id, commitment.clone());
    let mut arb = h.open(id);

    arb.handle(ChannelEvent::UpdateHtlcs(vec![
        HtlcDescriptor::outgoing(preimage(1).payment_hash(), 30_000, 790_000),
        // Unknown preimage: no reason to go to chain for this one.
        HtlcDescriptor::incoming(preimage(2).payment_hash(), 40_000, 789_995),
    ]))
    .unwrap();

    block(&mut arb, 789_989);
    assert_eq!(arb.phase(), ArbitratorState::Default);
    assert!(h.broadcaster.published().is_empty());

    block(&mut arb, 789_990);
    assert_eq!(arb.phase(), ArbitratorState::BroadcastCommit);
    assert_eq!(h.broadcaster.published_txids(), vec![commitment.txid()]);
}

#[test]
fn goes_to_chain_for_a_settled_incoming_htlc() {
    let h = Harness::new(700_000);
    let id = ChannelId::random();
    let commitment = CommitmentBuilder::new(CommitmentOwner::Local, 9)
        .output(10_000, OutputKind::ToLocal, Some(144))
        .build();
    h.signer.set_local_commitment(id, commitment.clone());
    let mut arb = h.open(id);

    arb.handle(ChannelEvent::UpdateHtlcs(vec![HtlcDescriptor::incoming(
        preimage(3).payment_hash(),
        40_000,
        700_008,
    )]))
    .unwrap();
    assert_eq!(arb.phase(), ArbitratorState::Default);

    h.registry.settle(preimage(3));
    block(&mut arb, 700_001);
    assert_eq!(arb.phase(), ArbitratorState::BroadcastCommit);
}

#[test]
fn force_close_survives_an_offline_signer() {
    let h = Harness::new(600_000);
    let id = ChannelId::random();
    let commitment = CommitmentBuilder::new(CommitmentOwner::Local, 2)
        .output(10_000, OutputKind::ToLocal, Some(144))
        .build();
    h.signer.set_local_commitment(id, commitment.clone());
    h.signer.set_failing(true);
    let mut arb = h.open(id);

    arb.handle(ChannelEvent::ForceClose).unwrap();
    assert_eq!(arb.phase(), ArbitratorState::Default);
    assert!(arb.record().force_close_requested);

    // The request is persisted, so it outlives a restart too.
    let mut arb = h.recover(id).unwrap();
    assert!(arb.record().force_close_requested);

    h.signer.set_failing(false);
    block(&mut arb, 600_001);
    assert_eq!(arb.phase(), ArbitratorState::BroadcastCommit);
    assert!(!arb.record().force_close_requested);
    assert_eq!(h.broadcaster.count(&commitment.txid()), 1);
}

#[test]
fn rejected_sweep_is_rebuilt_next_block_with_a_higher_fee() {
    let h = Harness::new(780_000);
    let commitment = CommitmentBuilder::new(CommitmentOwner::Remote, 11)
        .output(100_000, OutputKind::ToRemote, None)
        .build();
    let balance = commitment.outputs[0].outpoint;
    let mut arb = h.open(ChannelId::random());
    remote_close(&mut arb, &commitment, 780_000);

    h.broadcaster.reject_next(1);
    block(&mut arb, 780_005);
    assert!(h.broadcaster.published().is_empty());
    assert_eq!(arb.phase(), ArbitratorState::ContractAcknowledged);

    block(&mut arb, 780_006);
    let sweep = h.claim_of(&balance);
    let base_fee = sweep_fee(
        &[SpendDescriptor {
            outpoint: balance,
            amount: 100_000,
            path: SpendPath::ToRemote,
            csv_delay: None,
        }],
        h.config.fees.sweep_fee_rate,
    );
    assert!(sweep.tx.output_value() < 100_000 - base_fee, "retry pays more than the base fee");
}

#[test]
fn restart_republishes_unconfirmed_claims_only() {
    let h = Harness::new(780_000);
    let id = ChannelId::random();
    let commitment = CommitmentBuilder::new(CommitmentOwner::Remote, 11)
        .output(100_000, OutputKind::ToRemote, None)
        .build();
    let balance = commitment.outputs[0].outpoint;
    let mut arb = h.open(id);
    remote_close(&mut arb, &commitment, 780_000);
    h.chain.confirm(commitment.txid(), 780_000);
    block(&mut arb, 780_005);
    let sweep = h.claim_of(&balance);
    drop(arb);

    // =====================================================================
    // RESTART: the sweep never made it into a block
    // =====================================================================
    h.chain.set_height(780_009);
    let arb = h.recover(id).unwrap();
    assert_eq!(arb.phase(), ArbitratorState::ContractAcknowledged);
    assert_eq!(arb.record().best_height, 780_009);
    assert_eq!(h.broadcaster.count(&sweep.txid()), 2);
    drop(arb);

    // =====================================================================
    // RESTART: now it confirmed while we were down
    // =====================================================================
    h.chain.confirm(sweep.txid(), 780_010);
    h.chain.set_height(780_015);
    let arb = h.recover(id).unwrap();
    assert_eq!(arb.phase(), ArbitratorState::FullyResolved);
    assert_eq!(h.broadcaster.count(&sweep.txid()), 2);
    assert_eq!(arb.report().map(|r| r.swept), Some(100_000));
}

#[test]
fn restart_with_the_close_gone_rolls_back() {
    let h = Harness::new(780_000);
    let id = ChannelId::random();
    let commitment = remote_commitment();
    let mut arb = h.open(id);
    remote_close(&mut arb, &commitment, 780_000);
    block(&mut arb, 780_005);
    assert_eq!(arb.phase(), ArbitratorState::ContractAcknowledged);
    drop(arb);

    // The chain backend never saw the close confirm.
    let arb = h.recover(id).unwrap();
    assert_eq!(arb.phase(), ArbitratorState::BroadcastCommit);
    assert!(arb.record().resolvers.is_empty());
}

#[test]
fn restart_does_not_touch_state_when_the_chain_is_down() {
    let h = Harness::new(780_000);
    let id = ChannelId::random();
    let mut arb = h.open(id);
    remote_close(&mut arb, &remote_commitment(), 780_000);
    drop(arb);
    let before: ChannelRecord = h.log.get(&id).unwrap().unwrap();

    h.chain.fail_next(1);
    let err = h.recover(id).err().expect("transient failure");
    assert!(err.is_transient());
    let after: ChannelRecord = h.log.get(&id).unwrap().unwrap();
    assert_eq!(before, after);

    assert!(h.recover(id).is_ok());
}

#[test]
fn record_claiming_a_confirmed_close_without_summary_is_fatal() {
    let h = Harness::new(780_000);
    let id = ChannelId::random();
    let mut record = ChannelRecord::new(id, 780_000);
    record.phase = ArbitratorState::ContractAcknowledged;
    h.log.put(&record).unwrap();

    let err = h.recover(id).err().expect("must refuse");
    assert!(matches!(err, CourtError::MissingClosureSummary(_)));
    assert!(err.is_fatal());
}

#[test]
fn lifecycle_logs_through_a_scoped_subscriber() {
    let subscriber = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .finish();
    tracing::subscriber::with_default(subscriber, || {
        let h = Harness::new(780_000);
        let parent = tracing::info_span!("node");
        let commitment = remote_commitment();
        let mut arb = ChannelArbitrator::open(
            ChannelId::random(),
            h.config.clone(),
            h.log.clone(),
            h.deps(),
            &parent,
        )
        .unwrap();
        remote_close(&mut arb, &commitment, 780_000);
        block(&mut arb, 780_005);
        assert_eq!(arb.phase(), ArbitratorState::ContractAcknowledged);
    });
}
