//! Fund-coverage invariant checker.
//!
//! Enforced after every change to a channel's resolver set:
//! ```text
//! outpoints(outcomes) ⊎ outpoints(pending) == outpoints(closure summary)
//! ```
//!
//! Every disputed output is either resolved exactly once or owned by exactly
//! one active resolver. A violation means an output was silently dropped or
//! double-claimed, and the channel halts.

use std::collections::BTreeSet;

use contractcourt_types::{ClosureSummary, CourtError, OutPoint, Result, ResolverOutcome};

/// Verify that `outcomes` and `pending` partition the disputed outputs of
/// `summary`.
///
/// # Errors
/// Returns [`CourtError::FundCoverageViolation`] naming the first offending
/// outpoint.
pub fn verify_coverage(
    summary: &ClosureSummary,
    outcomes: &[ResolverOutcome],
    pending: &[OutPoint],
) -> Result<()> {
    let violation = |reason: String| CourtError::FundCoverageViolation {
        channel_id: summary.channel_id(),
        reason,
    };

    let mut resolved = BTreeSet::new();
    for outcome in outcomes {
        if !resolved.insert(outcome.outpoint) {
            return Err(violation(format!("{} resolved twice", outcome.outpoint)));
        }
        let Some(output) = summary.output(&outcome.outpoint) else {
            return Err(violation(format!(
                "{} resolved but not disputed",
                outcome.outpoint
            )));
        };
        if output.amount != outcome.amount {
            return Err(violation(format!(
                "{} resolved for {} sat, disputed {} sat",
                outcome.outpoint, outcome.amount, output.amount
            )));
        }
    }

    let mut active = BTreeSet::new();
    for outpoint in pending {
        if resolved.contains(outpoint) {
            return Err(violation(format!("{outpoint} resolved but still pending")));
        }
        if !active.insert(*outpoint) {
            return Err(violation(format!("{outpoint} owned by two resolvers")));
        }
    }

    let covered: BTreeSet<OutPoint> = resolved.union(&active).copied().collect();
    let disputed = summary.outpoints();
    if let Some(missing) = disputed.difference(&covered).next() {
        return Err(violation(format!("{missing} has no resolver")));
    }
    if let Some(extra) = covered.difference(&disputed).next() {
        return Err(violation(format!("{extra} is not a disputed output")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contractcourt_types::{
        ChannelId, CloseType, DisputedOutput, OutcomeKind, OutputKind, Txid,
    };

    fn summary() -> ClosureSummary {
        let txid = Txid::dummy(1);
        let outputs = (0..3)
            .map(|i| DisputedOutput {
                outpoint: OutPoint::new(txid, i),
                amount: 10_000 * u64::from(i + 1),
                kind: OutputKind::ToRemote,
                csv_delay: None,
                htlc: None,
            })
            .collect();
        ClosureSummary::new(ChannelId::random(), CloseType::RemoteForce, txid, 100, outputs)
            .unwrap()
    }

    fn swept(summary: &ClosureSummary, index: usize) -> ResolverOutcome {
        let output = &summary.outputs()[index];
        ResolverOutcome {
            outpoint: output.outpoint,
            amount: output.amount,
            kind: OutcomeKind::Swept {
                txid: Txid::dummy(9),
            },
            height: 110,
        }
    }

    #[test]
    fn partition_holds() {
        let s = summary();
        let ops: Vec<OutPoint> = s.outputs().iter().map(|o| o.outpoint).collect();
        verify_coverage(&s, &[], &ops).unwrap();
        verify_coverage(&s, &[swept(&s, 0)], &ops[1..]).unwrap();
        verify_coverage(&s, &[swept(&s, 0), swept(&s, 1), swept(&s, 2)], &[]).unwrap();
    }

    #[test]
    fn dropped_output_is_violation() {
        let s = summary();
        let ops: Vec<OutPoint> = s.outputs().iter().map(|o| o.outpoint).collect();
        let err = verify_coverage(&s, &[swept(&s, 0)], &ops[2..]).unwrap_err();
        assert!(matches!(err, CourtError::FundCoverageViolation { .. }));
        assert!(err.to_string().contains("has no resolver"));
    }

    #[test]
    fn double_claim_is_violation() {
        let s = summary();
        let ops: Vec<OutPoint> = s.outputs().iter().map(|o| o.outpoint).collect();
        assert!(verify_coverage(&s, &[swept(&s, 0)], &ops).is_err());
        assert!(verify_coverage(&s, &[swept(&s, 0), swept(&s, 0)], &ops[1..]).is_err());
        assert!(verify_coverage(&s, &[], &[ops[0], ops[0], ops[1], ops[2]]).is_err());
    }

    #[test]
    fn amount_mismatch_is_violation() {
        let s = summary();
        let ops: Vec<OutPoint> = s.outputs().iter().map(|o| o.outpoint).collect();
        let mut bad = swept(&s, 0);
        bad.amount -= 1;
        assert!(verify_coverage(&s, &[bad], &ops[1..]).is_err());
    }

    #[test]
    fn foreign_outpoint_is_violation() {
        let s = summary();
        let mut ops: Vec<OutPoint> = s.outputs().iter().map(|o| o.outpoint).collect();
        ops.push(OutPoint::new(Txid::dummy(2), 0));
        assert!(verify_coverage(&s, &[], &ops).is_err());
    }
}
