//! Terminal outcomes of resolved outputs.
//!
//! Every disputed output ends in exactly one [`ResolverOutcome`]. Outcomes
//! are append-only in the arbitration log and together form the
//! channel's [`ResolutionReport`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Height, OutPoint, Preimage, Satoshis, Txid};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeKind {
    /// Swept into our wallet by `txid`.
    Swept { txid: Txid },
    /// Left to the counterparty (e.g. an incoming HTLC we never learned the
    /// preimage for). `txid` is their claim, once seen.
    Conceded { txid: Option<Txid> },
    /// The counterparty claimed an outgoing HTLC with its preimage; the
    /// payment is settled off-chain upstream.
    SettledOffChain { txid: Txid, preimage: Preimage },
    /// Not worth claiming: sweeping would cost more than it returns.
    Abandoned { reason: String },
    /// A punishable output the counterparty swept before justice confirmed.
    Lost { txid: Txid },
}

impl OutcomeKind {
    /// Whether the value of the output ended up with us.
    #[must_use]
    pub fn is_recovered(&self) -> bool {
        matches!(self, Self::Swept { .. })
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Swept { .. } => write!(f, "SWEPT"),
            Self::Conceded { .. } => write!(f, "CONCEDED"),
            Self::SettledOffChain { .. } => write!(f, "SETTLED_OFF_CHAIN"),
            Self::Abandoned { .. } => write!(f, "ABANDONED"),
            Self::Lost { .. } => write!(f, "LOST"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverOutcome {
    pub outpoint: OutPoint,
    pub amount: Satoshis,
    pub kind: OutcomeKind,
    /// Height at which the outcome became final.
    pub height: Height,
}

/// Operator-facing summary of how a closed channel's funds ended up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub swept: Satoshis,
    pub conceded: Satoshis,
    pub settled_off_chain: Satoshis,
    pub abandoned: Satoshis,
    pub lost: Satoshis,
    pub outputs: usize,
}

impl ResolutionReport {
    #[must_use]
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a ResolverOutcome>) -> Self {
        let mut report = Self::default();
        for outcome in outcomes {
            report.outputs += 1;
            let bucket = match outcome.kind {
                OutcomeKind::Swept { .. } => &mut report.swept,
                OutcomeKind::Conceded { .. } => &mut report.conceded,
                OutcomeKind::SettledOffChain { .. } => &mut report.settled_off_chain,
                OutcomeKind::Abandoned { .. } => &mut report.abandoned,
                OutcomeKind::Lost { .. } => &mut report.lost,
            };
            *bucket += outcome.amount;
        }
        report
    }

    /// Sum of every bucket; equals the closure's total value once resolved.
    #[must_use]
    pub fn total(&self) -> Satoshis {
        self.swept + self.conceded + self.settled_off_chain + self.abandoned + self.lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_buckets_by_kind() {
        let txid = Txid::dummy(9);
        let outcomes = vec![
            ResolverOutcome {
                outpoint: OutPoint::new(txid, 0),
                amount: 100_000,
                kind: OutcomeKind::Swept { txid },
                height: 10,
            },
            ResolverOutcome {
                outpoint: OutPoint::new(txid, 1),
                amount: 330,
                kind: OutcomeKind::Abandoned {
                    reason: "uneconomic".into(),
                },
                height: 10,
            },
            ResolverOutcome {
                outpoint: OutPoint::new(txid, 2),
                amount: 30_000,
                kind: OutcomeKind::Lost { txid },
                height: 11,
            },
        ];
        let report = ResolutionReport::from_outcomes(&outcomes);
        assert_eq!(report.swept, 100_000);
        assert_eq!(report.abandoned, 330);
        assert_eq!(report.lost, 30_000);
        assert_eq!(report.outputs, 3);
        assert_eq!(report.total(), 130_330);
    }
}
