//! Inputs to a channel arbitrator and the status it reports.

use std::fmt;
use std::sync::Arc;

use contractcourt_breach::FeeBumpPolicy;
use contractcourt_types::{
    ArbitratorState, Broadcaster, ChainEvent, ChainView, CloseObservation, Height,
    HtlcDescriptor, InvoiceRegistry, ResolutionReport, Signer,
};

/// Everything that can happen to one channel, serialized through its
/// event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Operator request to close unilaterally.
    ForceClose,
    /// The chain watcher classified a spend of the funding output, mined at
    /// `height`.
    CloseObserved {
        observation: CloseObservation,
        height: Height,
    },
    Chain(ChainEvent),
    /// The live off-chain HTLC set changed.
    UpdateHtlcs(Vec<HtlcDescriptor>),
}

impl From<ChainEvent> for ChannelEvent {
    fn from(event: ChainEvent) -> Self {
        Self::Chain(event)
    }
}

/// What an operator sees for a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Active(ArbitratorState),
    Resolved(ResolutionReport),
    /// Halted on a fatal error; needs the operator.
    Failed(String),
}

impl ChannelStatus {
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Resolved(_) | Self::Failed(_))
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active(phase) => write!(f, "ACTIVE({phase})"),
            Self::Resolved(report) => write!(f, "RESOLVED({} outputs)", report.outputs),
            Self::Failed(reason) => write!(f, "FAILED({reason})"),
        }
    }
}

/// External systems an arbitrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub signer: Arc<dyn Signer>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub registry: Arc<dyn InvoiceRegistry>,
    pub chain: Arc<dyn ChainView>,
    /// How justice transactions outbid the counterparty. `None` uses
    /// [`contractcourt_breach::GeometricFeeBump`] built from the breach config.
    pub fee_policy: Option<Arc<dyn FeeBumpPolicy>>,
}
