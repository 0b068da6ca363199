//! Arbitration phases.
//!
//! ```text
//!  Default ──▶ BroadcastCommit ──▶ CommitmentConfirmed ──▶ ContractAcknowledged ──▶ FullyResolved
//!     │              ▲    │                  │                      │                    ▲
//!     │              └────┼──── reorg ───────┴──────────────────────┘                    │
//!     └──────────────────┴────────────────▶ BreachDetected ─────────────────────────────┘
//! ```
//!
//! Forward transitions are monotonic. The only backward edge is a reorg of
//! the closing transaction, which returns to `BroadcastCommit`. A breach
//! can be entered from any non-terminal phase and supersedes the rest.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArbitratorState {
    /// Channel open; nothing on chain.
    Default,
    /// A closing transaction is published or observed, not yet deep enough.
    BroadcastCommit,
    /// The closing transaction reached the configured depth.
    CommitmentConfirmed,
    /// Resolvers for every disputed output are spawned.
    ContractAcknowledged,
    /// A revoked commitment was seen; the justice path owns the channel.
    BreachDetected,
    /// Every output is accounted for. Terminal.
    FullyResolved,
}

impl ArbitratorState {
    /// Position along the normal path. Breach handling sits off it.
    fn rank(self) -> u8 {
        match self {
            Self::Default => 0,
            Self::BroadcastCommit => 1,
            Self::CommitmentConfirmed => 2,
            Self::ContractAcknowledged => 3,
            Self::FullyResolved => 4,
            Self::BreachDetected => u8::MAX,
        }
    }

    /// Whether moving to `target` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        match (self, target) {
            (Self::FullyResolved, _) => false,
            (_, Self::BreachDetected) => self != Self::BreachDetected,
            (Self::BreachDetected, Self::FullyResolved) => true,
            (Self::BreachDetected, _) => false,
            // Reorg of the closing transaction.
            (Self::CommitmentConfirmed | Self::ContractAcknowledged, Self::BroadcastCommit) => true,
            (from, to) => to.rank() == from.rank() + 1,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::FullyResolved
    }

    /// Whether the closing transaction is confirmed in this phase.
    #[must_use]
    pub fn is_confirmed(self) -> bool {
        matches!(self, Self::CommitmentConfirmed | Self::ContractAcknowledged)
    }
}

impl fmt::Display for ArbitratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "DEFAULT"),
            Self::BroadcastCommit => write!(f, "BROADCAST_COMMIT"),
            Self::CommitmentConfirmed => write!(f, "COMMITMENT_CONFIRMED"),
            Self::ContractAcknowledged => write!(f, "CONTRACT_ACKNOWLEDGED"),
            Self::BreachDetected => write!(f, "BREACH_DETECTED"),
            Self::FullyResolved => write!(f, "FULLY_RESOLVED"),
        }
    }
}
