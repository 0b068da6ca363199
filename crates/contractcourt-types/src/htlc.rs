//! HTLC contract descriptors.
//!
//! An [`HtlcDescriptor`] links an on-chain HTLC output back to the
//! off-chain commitment that created it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Height, PaymentHash, Preimage, Satoshis};

/// Which way the HTLC pays, from our point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HtlcDirection {
    /// Offered to us: we claim it with the preimage.
    Incoming,
    /// Offered by us: we reclaim it after the timeout.
    Outgoing,
}

impl fmt::Display for HtlcDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incoming => write!(f, "INCOMING"),
            Self::Outgoing => write!(f, "OUTGOING"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcDescriptor {
    pub payment_hash: PaymentHash,
    pub amount: Satoshis,
    /// Absolute (CLTV) expiry height.
    pub expiry: Height,
    pub direction: HtlcDirection,
    /// Present only once we have learned it.
    pub preimage: Option<Preimage>,
}

impl HtlcDescriptor {
    #[must_use]
    pub fn incoming(payment_hash: PaymentHash, amount: Satoshis, expiry: Height) -> Self {
        Self {
            payment_hash,
            amount,
            expiry,
            direction: HtlcDirection::Incoming,
            preimage: None,
        }
    }

    #[must_use]
    pub fn outgoing(payment_hash: PaymentHash, amount: Satoshis, expiry: Height) -> Self {
        Self {
            payment_hash,
            amount,
            expiry,
            direction: HtlcDirection::Outgoing,
            preimage: None,
        }
    }

    /// Record a preimage. Returns `false` (and records nothing) if it does
    /// not unlock this HTLC.
    pub fn learn_preimage(&mut self, preimage: Preimage) -> bool {
        if !preimage.matches(&self.payment_hash) {
            return false;
        }
        self.preimage = Some(preimage);
        true
    }

    /// Whether the timeout path is spendable in the block after `height`.
    #[must_use]
    pub fn is_expired_at(&self, height: Height) -> bool {
        height >= self.expiry
    }

    /// Blocks left until the timeout path opens (zero once open).
    #[must_use]
    pub fn blocks_until_expiry(&self, height: Height) -> u32 {
        self.expiry.saturating_sub(height)
    }
}
