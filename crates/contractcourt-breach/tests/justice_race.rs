//! Racing the counterparty for the outputs of a revoked commitment.

use contractcourt_breach::{BreachArbitrator, JusticeAction, OutputStatus};
use contractcourt_types::testkit::{CommitmentBuilder, MockSigner};
use contractcourt_types::*;
use tracing::Span;

fn revoked_with_three_htlcs() -> Commitment {
    let mut builder = CommitmentBuilder::new(CommitmentOwner::Remote, 7);
    for (seed, expiry) in [(1u8, 1_040), (2, 1_060), (3, 1_080)] {
        builder = builder.htlc(
            OutputKind::RevokedHtlc,
            HtlcDescriptor::outgoing(PaymentHash([seed; 32]), 25_000, expiry),
            None,
        );
    }
    builder.build()
}

fn justice_of(action: JusticeAction) -> SignedTx {
    match action {
        JusticeAction::Publish(tx) => tx,
        other => panic!("expected a justice transaction, got {other:?}"),
    }
}

#[test]
fn lost_output_is_not_retried_and_breach_settles_on_the_rest() {
    let signer = MockSigner::new();
    let brar = BreachArbitrator::new(
        ChannelId::random(),
        BreachConfig::default(),
        FeeConfig::default(),
        Span::none(),
    );
    let commitment = revoked_with_three_htlcs();
    let mut r = brar.begin(&commitment, 1_000).unwrap();

    let first = justice_of(brar.step(&mut r, 1_000, &signer).unwrap());
    assert_eq!(first.tx.inputs.len(), 3);

    // Their timeout transaction takes HTLC #1 one block before justice confirms.
    let stolen = commitment.outputs[0].outpoint;
    let theirs = Txid::dummy(0x7e);
    assert!(
        brar.observe(
            &mut r,
            &ChainEvent::SpendDetected {
                outpoint: stolen,
                spender: theirs,
                height: 1_001,
                preimage: None,
            },
        )
        .is_none()
    );
    assert_eq!(
        r.outputs()[0].status,
        OutputStatus::Lost {
            txid: theirs,
            height: 1_001
        }
    );

    let second = justice_of(brar.step(&mut r, 1_001, &signer).unwrap());
    assert_eq!(second.tx.inputs.len(), 2);
    assert!(!second.tx.spends(&stolen));

    brar.observe(
        &mut r,
        &ChainEvent::TxConfirmed {
            txid: second.txid(),
            height: 1_002,
            depth: 1,
        },
    );
    // Confirmed justice is never rebuilt.
    assert_eq!(brar.step(&mut r, 1_003, &signer).unwrap(), JusticeAction::Wait);

    for height in 1_003..1_007 {
        assert!(
            brar.observe(&mut r, &ChainEvent::BlockConnected { height })
                .is_none()
        );
    }
    let outcomes = brar
        .observe(&mut r, &ChainEvent::BlockConnected { height: 1_007 })
        .expect("justice final at depth 6");

    let report = ResolutionReport::from_outcomes(&outcomes);
    assert_eq!(report.swept, 50_000);
    assert_eq!(report.lost, 25_000);
    assert_eq!(report.outputs, 3);
    assert_eq!(
        outcomes[0].kind,
        OutcomeKind::Lost { txid: theirs },
        "lost output is recorded, not retried"
    );

    // Later stale broadcasts change nothing.
    assert!(
        brar.observe(
            &mut r,
            &ChainEvent::SpendDetected {
                outpoint: commitment.outputs[1].outpoint,
                spender: Txid::dummy(0x7f),
                height: 1_010,
                preimage: None,
            },
        )
        .is_none()
    );
    assert_eq!(brar.step(&mut r, 1_010, &signer).unwrap(), JusticeAction::Wait);
}

#[test]
fn fee_escalates_faster_near_the_counterparty_timelock() {
    let signer = MockSigner::new();
    let brar = BreachArbitrator::new(
        ChannelId::random(),
        BreachConfig::default(),
        FeeConfig::default(),
        Span::none(),
    );
    let commitment = revoked_with_three_htlcs();

    let mut calm = brar.begin(&commitment, 1_000).unwrap();
    let mut urgent = brar.begin(&commitment, 1_000).unwrap();
    justice_of(brar.step(&mut calm, 1_001, &signer).unwrap());
    justice_of(brar.step(&mut urgent, 1_036, &signer).unwrap());

    let calm_bumped = justice_of(brar.step(&mut calm, 1_002, &signer).unwrap());
    let urgent_bumped = justice_of(brar.step(&mut urgent, 1_037, &signer).unwrap());
    assert!(urgent_bumped.tx.output_value() < calm_bumped.tx.output_value());
}
