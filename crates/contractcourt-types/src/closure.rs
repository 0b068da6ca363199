//! Closing transactions and the closure summary derived from them.
//!
//! The chain watcher classifies every spend of a channel's funding output
//! into a [`CloseObservation`]. Once the closing transaction is confirmed,
//! the arbitrator freezes its outputs into a [`ClosureSummary`], the
//! authoritative list of disputed outputs every resolver is accounted
//! against.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    ChannelId, CourtError, Height, HtlcDescriptor, OutPoint, Result, Satoshis, SignedTx, Txid,
};

/// How the channel was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseType {
    Cooperative,
    LocalForce,
    RemoteForce,
    Breach,
}

impl fmt::Display for CloseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cooperative => write!(f, "COOPERATIVE"),
            Self::LocalForce => write!(f, "LOCAL_FORCE"),
            Self::RemoteForce => write!(f, "REMOTE_FORCE"),
            Self::Breach => write!(f, "BREACH"),
        }
    }
}

/// Script type of a disputed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputKind {
    /// Our CSV-delayed balance on our own commitment.
    ToLocal,
    /// Our balance on the counterparty's commitment.
    ToRemote,
    /// An HTLC output; details live in [`DisputedOutput::htlc`].
    Htlc,
    /// A fee-bump anchor.
    Anchor,
    /// The counterparty's balance on a revoked commitment.
    RevokedToLocal,
    /// An HTLC output on a revoked commitment.
    RevokedHtlc,
}

impl OutputKind {
    /// Whether the revocation secret lets us take this output.
    #[must_use]
    pub fn is_punishable(&self) -> bool {
        matches!(self, Self::RevokedToLocal | Self::RevokedHtlc)
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToLocal => write!(f, "TO_LOCAL"),
            Self::ToRemote => write!(f, "TO_REMOTE"),
            Self::Htlc => write!(f, "HTLC"),
            Self::Anchor => write!(f, "ANCHOR"),
            Self::RevokedToLocal => write!(f, "REVOKED_TO_LOCAL"),
            Self::RevokedHtlc => write!(f, "REVOKED_HTLC"),
        }
    }
}

/// One output of a closing transaction that some resolver must account for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputedOutput {
    pub outpoint: OutPoint,
    pub amount: Satoshis,
    pub kind: OutputKind,
    /// Relative delay guarding our claim. For HTLCs on our own commitment
    /// this is the delay on the second-level output.
    pub csv_delay: Option<u32>,
    pub htlc: Option<HtlcDescriptor>,
}

impl DisputedOutput {
    /// Absolute lock, if this output is an HTLC.
    #[must_use]
    pub fn cltv_expiry(&self) -> Option<Height> {
        self.htlc.as_ref().map(|h| h.expiry)
    }
}

/// Who broadcast a commitment transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommitmentOwner {
    Local,
    Remote,
}

/// A commitment transaction together with our view of its outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub tx: SignedTx,
    pub owner: CommitmentOwner,
    /// Commitment state number.
    pub state_number: u64,
    pub outputs: Vec<DisputedOutput>,
}

impl Commitment {
    #[must_use]
    pub fn txid(&self) -> Txid {
        self.tx.txid()
    }
}

/// A classified spend of the funding output, as reported by the chain watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseObservation {
    Cooperative { txid: Txid },
    LocalUnilateral(Commitment),
    RemoteUnilateral(Commitment),
    /// A revoked counterparty commitment.
    Breach(Commitment),
}

impl CloseObservation {
    #[must_use]
    pub fn close_type(&self) -> CloseType {
        match self {
            Self::Cooperative { .. } => CloseType::Cooperative,
            Self::LocalUnilateral(_) => CloseType::LocalForce,
            Self::RemoteUnilateral(_) => CloseType::RemoteForce,
            Self::Breach(_) => CloseType::Breach,
        }
    }

    #[must_use]
    pub fn txid(&self) -> Txid {
        match self {
            Self::Cooperative { txid } => *txid,
            Self::LocalUnilateral(c) | Self::RemoteUnilateral(c) | Self::Breach(c) => c.txid(),
        }
    }

    #[must_use]
    pub fn outputs(&self) -> &[DisputedOutput] {
        match self {
            Self::Cooperative { .. } => &[],
            Self::LocalUnilateral(c) | Self::RemoteUnilateral(c) | Self::Breach(c) => &c.outputs,
        }
    }
}

/// Immutable record of a confirmed close and every output in dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureSummary {
    channel_id: ChannelId,
    close_type: CloseType,
    closing_txid: Txid,
    confirmation_height: Height,
    outputs: Vec<DisputedOutput>,
}

impl ClosureSummary {
    /// Build a summary, checking that every output belongs to the closing
    /// transaction, appears once, and that HTLC outputs carry their details.
    ///
    /// # Errors
    /// Returns [`CourtError::InvalidClosure`] on any inconsistency.
    pub fn new(
        channel_id: ChannelId,
        close_type: CloseType,
        closing_txid: Txid,
        confirmation_height: Height,
        outputs: Vec<DisputedOutput>,
    ) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for output in &outputs {
            if output.outpoint.txid != closing_txid {
                return Err(CourtError::InvalidClosure {
                    reason: format!("output {} is not on closing tx {closing_txid}", output.outpoint),
                });
            }
            if !seen.insert(output.outpoint) {
                return Err(CourtError::InvalidClosure {
                    reason: format!("output {} listed twice", output.outpoint),
                });
            }
            let is_htlc = matches!(output.kind, OutputKind::Htlc | OutputKind::RevokedHtlc);
            if is_htlc != output.htlc.is_some() {
                return Err(CourtError::InvalidClosure {
                    reason: format!("output {} has mismatched HTLC details", output.outpoint),
                });
            }
        }
        if close_type == CloseType::Cooperative && !outputs.is_empty() {
            return Err(CourtError::InvalidClosure {
                reason: "cooperative close cannot carry disputed outputs".to_string(),
            });
        }
        Ok(Self {
            channel_id,
            close_type,
            closing_txid,
            confirmation_height,
            outputs,
        })
    }

    #[must_use]
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    #[must_use]
    pub fn close_type(&self) -> CloseType {
        self.close_type
    }

    #[must_use]
    pub fn closing_txid(&self) -> Txid {
        self.closing_txid
    }

    #[must_use]
    pub fn confirmation_height(&self) -> Height {
        self.confirmation_height
    }

    #[must_use]
    pub fn outputs(&self) -> &[DisputedOutput] {
        &self.outputs
    }

    #[must_use]
    pub fn outpoints(&self) -> BTreeSet<OutPoint> {
        self.outputs.iter().map(|o| o.outpoint).collect()
    }

    #[must_use]
    pub fn total_value(&self) -> Satoshis {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    #[must_use]
    pub fn output(&self, outpoint: &OutPoint) -> Option<&DisputedOutput> {
        self.outputs.iter().find(|o| o.outpoint == *outpoint)
    }
}
