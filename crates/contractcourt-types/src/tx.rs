//! Transaction model.
//!
//! The court never parses raw chain data: it builds [`Transaction`]s from
//! the outputs it resolves, hands them to the signer together with a
//! [`SpendDescriptor`] per input, and publishes the returned [`SignedTx`].

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Height, OutPoint, Preimage, Satoshis, Txid, constants};

/// An output script. Opaque to the court.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Script(pub Vec<u8>);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub previous_output: OutPoint,
    /// Encodes the relative (CSV) lock of the input, if any.
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: Satoshis,
    pub script: Script,
}

/// An unsigned transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    /// Absolute (CLTV) lock; `0` when unlocked.
    pub lock_time: Height,
}

impl Transaction {
    /// Witness-free serialization the txid commits to.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + self.inputs.len() * 40 + self.outputs.len() * 48);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&(self.inputs.len() as u64).to_le_bytes());
        for input in &self.inputs {
            buf.extend_from_slice(&input.previous_output.txid.0);
            buf.extend_from_slice(&input.previous_output.index.to_le_bytes());
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }
        buf.extend_from_slice(&(self.outputs.len() as u64).to_le_bytes());
        for output in &self.outputs {
            buf.extend_from_slice(&output.value.to_le_bytes());
            buf.extend_from_slice(&(output.script.0.len() as u64).to_le_bytes());
            buf.extend_from_slice(&output.script.0);
        }
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        buf
    }

    #[must_use]
    pub fn txid(&self) -> Txid {
        Txid::hash(&self.serialize())
    }

    /// Digest a signer commits to for input `index`.
    #[must_use]
    pub fn sighash(&self, index: usize) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"contractcourt:sighash:v1:");
        hasher.update(self.txid().0);
        hasher.update((index as u64).to_le_bytes());
        hasher.finalize().into()
    }

    /// Whether this transaction consumes `outpoint`.
    #[must_use]
    pub fn spends(&self, outpoint: &OutPoint) -> bool {
        self.inputs.iter().any(|i| i.previous_output == *outpoint)
    }

    #[must_use]
    pub fn output_value(&self) -> Satoshis {
        self.outputs.iter().map(|o| o.value).sum()
    }
}

/// A transaction together with one witness per input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    pub tx: Transaction,
    pub witnesses: Vec<Vec<u8>>,
}

impl SignedTx {
    #[must_use]
    pub fn txid(&self) -> Txid {
        self.tx.txid()
    }

    /// Outpoint of output `index` of this transaction.
    #[must_use]
    pub fn outpoint(&self, index: u32) -> OutPoint {
        OutPoint::new(self.txid(), index)
    }
}

/// Which script branch an input is spent through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpendPath {
    /// Our CSV-delayed output (commitment balance or second-level output).
    ToLocalDelayed,
    /// Our immediately spendable balance on the counterparty's commitment.
    ToRemote,
    /// Direct success claim of an incoming HTLC on the remote commitment.
    HtlcSuccess { preimage: Preimage },
    /// Direct timeout claim of an outgoing HTLC on the remote commitment.
    HtlcTimeout,
    /// Pre-signed second-level success transaction on the local commitment.
    SecondLevelSuccess { preimage: Preimage },
    /// Pre-signed second-level timeout transaction on the local commitment.
    SecondLevelTimeout,
    /// Fee-bump anchor.
    Anchor,
    /// Revocation branch of a breached output.
    Revocation,
}

impl SpendPath {
    /// Estimated virtual size this input adds to a sweep.
    #[must_use]
    pub fn input_vbytes(&self) -> u64 {
        match self {
            Self::ToLocalDelayed => constants::TO_LOCAL_INPUT_VBYTES,
            Self::ToRemote => constants::TO_REMOTE_INPUT_VBYTES,
            Self::HtlcSuccess { .. } => constants::HTLC_SUCCESS_INPUT_VBYTES,
            Self::HtlcTimeout => constants::HTLC_TIMEOUT_INPUT_VBYTES,
            Self::SecondLevelSuccess { .. } => constants::SECOND_LEVEL_SUCCESS_VBYTES,
            Self::SecondLevelTimeout => constants::SECOND_LEVEL_TIMEOUT_VBYTES,
            Self::Anchor => constants::ANCHOR_INPUT_VBYTES,
            Self::Revocation => constants::REVOCATION_INPUT_VBYTES,
        }
    }

    #[must_use]
    pub fn is_second_level(&self) -> bool {
        matches!(self, Self::SecondLevelSuccess { .. } | Self::SecondLevelTimeout)
    }
}

/// Everything the signer needs to produce the witness for one input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendDescriptor {
    pub outpoint: OutPoint,
    pub amount: Satoshis,
    pub path: SpendPath,
    /// Relative delay the input must carry in its sequence field.
    pub csv_delay: Option<u32>,
}

impl SpendDescriptor {
    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.csv_delay.unwrap_or(constants::FINAL_SEQUENCE)
    }
}

/// Fee for `vbytes` at `fee_rate` sat/vbyte, rounded up.
#[must_use]
pub fn fee_for(fee_rate: Decimal, vbytes: u64) -> Satoshis {
    (fee_rate * Decimal::from(vbytes))
        .ceil()
        .to_u64()
        .unwrap_or(Satoshis::MAX)
}
