//! Chain-watcher notifications.
//!
//! Events may be delivered out of order and may be re-delivered after a
//! reorg. Every consumer must treat them as idempotent observations of
//! chain state, never as commands.

use serde::{Deserialize, Serialize};

use crate::{Height, OutPoint, Preimage, Txid};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainEvent {
    /// A new best block.
    BlockConnected { height: Height },
    /// `txid` is mined at `height` and currently has `depth` confirmations.
    TxConfirmed { txid: Txid, height: Height, depth: u32 },
    /// `txid` was removed from the best chain.
    TxReorged { txid: Txid },
    /// `outpoint` was spent by `spender`, mined at `height`. `preimage` is
    /// set when the spending witness revealed one.
    SpendDetected {
        outpoint: OutPoint,
        spender: Txid,
        height: Height,
        preimage: Option<Preimage>,
    },
}

impl ChainEvent {
    /// The transaction this event is about, if any.
    #[must_use]
    pub fn txid(&self) -> Option<Txid> {
        match self {
            Self::BlockConnected { .. } => None,
            Self::TxConfirmed { txid, .. } | Self::TxReorged { txid } => Some(*txid),
            Self::SpendDetected { spender, .. } => Some(*spender),
        }
    }
}

/// Where a transaction currently sits in the best chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxConfirmation {
    pub height: Height,
    pub depth: u32,
}
