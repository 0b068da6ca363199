//! Identifiers used throughout the contract court.
//!
//! Channel identifiers, transaction ids and payment hashes are all raw
//! 32-byte values rendered as lowercase hex. An [`OutPoint`] names a single
//! transaction output and is the unit every resolver is keyed by.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Block height on the chain the channel is anchored to.
pub type Height = u32;

/// On-chain amount in satoshis.
pub type Satoshis = u64;

// ---------------------------------------------------------------------------
// ChannelId
// ---------------------------------------------------------------------------

/// Unique identifier for a payment channel (derived from its funding outpoint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ChannelId(pub [u8; 32]);

impl ChannelId {
    /// Derive the channel id from the funding outpoint: the funding txid
    /// with the output index XOR-ed into its last two bytes.
    #[must_use]
    pub fn from_funding(funding: &OutPoint) -> Self {
        let mut bytes = funding.txid.0;
        let index = funding.index.to_be_bytes();
        bytes[30] ^= index[2];
        bytes[31] ^= index[3];
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short form for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// Txid
// ---------------------------------------------------------------------------

/// Transaction identifier: double SHA-256 over the transaction's
/// witness-free serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Txid(pub [u8; 32]);

impl Txid {
    /// Hash arbitrary bytes the way transactions are identified.
    #[must_use]
    pub fn hash(data: &[u8]) -> Self {
        let first = Sha256::digest(data);
        let second = Sha256::digest(first);
        Self(second.into())
    }

    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// OutPoint
// ---------------------------------------------------------------------------

/// Reference to a single transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Txid,
    pub index: u32,
}

impl OutPoint {
    #[must_use]
    pub fn new(txid: Txid, index: u32) -> Self {
        Self { txid, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

// ---------------------------------------------------------------------------
// PaymentHash / Preimage
// ---------------------------------------------------------------------------

/// SHA-256 hash locking an HTLC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PaymentHash(pub [u8; 32]);

impl fmt::Display for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// The secret that unlocks an HTLC's success path.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Preimage(pub [u8; 32]);

impl Preimage {
    /// The payment hash this preimage unlocks.
    #[must_use]
    pub fn payment_hash(&self) -> PaymentHash {
        PaymentHash(Sha256::digest(self.0).into())
    }

    /// Whether this preimage unlocks `hash`.
    #[must_use]
    pub fn matches(&self, hash: &PaymentHash) -> bool {
        self.payment_hash() == *hash
    }
}

// Preimages are secrets until revealed on-chain; never print them in full.
impl fmt::Debug for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Preimage({}..)", hex::encode(&self.0[..2]))
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl ChannelId {
    /// Random channel id for tests.
    pub fn random() -> Self {
        Self(rand::random())
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Txid {
    /// Deterministic txid for tests, distinct per `seed`.
    pub fn dummy(seed: u64) -> Self {
        let mut data = b"contractcourt:dummy-txid:".to_vec();
        data.extend_from_slice(&seed.to_le_bytes());
        Self::hash(&data)
    }
}
