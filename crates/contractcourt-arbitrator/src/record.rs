//! The per-channel arbitration log record.
//!
//! One [`ChannelRecord`] holds everything the arbitrator needs to resume a
//! channel after a restart: the phase, the close being tracked, the live
//! resolvers and incubator, the breach response, and every outcome so far.
//! Nothing outside this record is trusted across a restart.

use chrono::{DateTime, Utc};
use contractcourt_breach::Retribution;
use contractcourt_log::LogRecord;
use contractcourt_resolvers::{Incubator, Resolver};
use contractcourt_types::{
    ArbitratorState, ChannelId, CloseObservation, ClosureSummary, Height, HtlcDescriptor,
    OutPoint, ResolutionReport, ResolverOutcome, TxConfirmation, Txid,
};
use serde::{Deserialize, Serialize};

/// A closing transaction we published or saw, and where it sits in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedClose {
    pub observation: CloseObservation,
    pub initiated_locally: bool,
    pub confirmation: Option<TxConfirmation>,
}

impl TrackedClose {
    #[must_use]
    pub fn txid(&self) -> Txid {
        self.observation.txid()
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.confirmation.map_or(0, |c| c.depth)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub channel_id: ChannelId,
    pub phase: ArbitratorState,
    pub close: Option<TrackedClose>,
    /// Set by a force-close request and kept until our commitment is signed.
    pub force_close_requested: bool,
    pub closure: Option<ClosureSummary>,
    pub resolvers: Vec<Resolver>,
    pub outcomes: Vec<ResolverOutcome>,
    pub incubator: Incubator,
    pub retribution: Option<Retribution>,
    /// Live off-chain HTLCs, watched for go-to-chain deadlines.
    pub htlcs: Vec<HtlcDescriptor>,
    pub best_height: Height,
    pub report: Option<ResolutionReport>,
    pub updated_at: DateTime<Utc>,
}

impl ChannelRecord {
    #[must_use]
    pub fn new(channel_id: ChannelId, best_height: Height) -> Self {
        Self {
            channel_id,
            phase: ArbitratorState::Default,
            close: None,
            force_close_requested: false,
            closure: None,
            resolvers: Vec::new(),
            outcomes: Vec::new(),
            incubator: Incubator::new(),
            retribution: None,
            htlcs: Vec::new(),
            best_height,
            report: None,
            updated_at: Utc::now(),
        }
    }

    /// Outputs owned by an active resolver.
    #[must_use]
    pub fn pending_outpoints(&self) -> Vec<OutPoint> {
        self.resolvers.iter().flat_map(Resolver::outpoints).collect()
    }

    /// Every transaction whose chain position this channel depends on.
    #[must_use]
    pub fn tracked_txids(&self) -> Vec<Txid> {
        let mut txids: Vec<Txid> = self.close.iter().map(TrackedClose::txid).collect();
        txids.extend(self.resolvers.iter().flat_map(Resolver::tracked_txids));
        txids.extend(self.incubator.tracked_txids());
        if let Some(r) = &self.retribution {
            txids.extend(r.tracked_txids());
        }
        txids.sort();
        txids.dedup();
        txids
    }
}

impl LogRecord for ChannelRecord {
    const BUCKET: &'static str = "channel";

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contractcourt_log::{ArbitrationLog, MemoryKvStore};
    use std::sync::Arc;

    #[test]
    fn record_roundtrips_through_the_log() {
        let log = ArbitrationLog::new(Arc::new(MemoryKvStore::new()));
        let mut record = ChannelRecord::new(ChannelId::random(), 700_000);
        record.force_close_requested = true;
        log.put(&record).unwrap();
        let back: ChannelRecord = log.get(&record.channel_id).unwrap().unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn fresh_record_tracks_nothing() {
        let record = ChannelRecord::new(ChannelId::random(), 1);
        assert!(record.tracked_txids().is_empty());
        assert!(record.pending_outpoints().is_empty());
        assert_eq!(record.phase, ArbitratorState::Default);
    }
}
