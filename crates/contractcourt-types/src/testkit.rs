//! In-memory collaborators and fixtures for tests. **Never use in production.**

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ed25519_dalek::{Signer as _, SigningKey};

use crate::{
    Broadcaster, ChainView, ChannelId, Commitment, CommitmentOwner, CourtError, DisputedOutput,
    Height, HtlcDescriptor, InvoiceRegistry, OutPoint, OutputKind, PaymentHash, Preimage,
    PreimageStatus, Result, Satoshis, Script, SignedTx, SpendDescriptor, Transaction, TxConfirmation,
    TxIn, TxOut, Txid, constants,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Signs with a throwaway ed25519 key.
pub struct MockSigner {
    key: SigningKey,
    commitments: Mutex<HashMap<ChannelId, Commitment>>,
    failing: Mutex<bool>,
}

impl MockSigner {
    pub fn new() -> Self {
        Self {
            key: SigningKey::from_bytes(&rand::random()),
            commitments: Mutex::new(HashMap::new()),
            failing: Mutex::new(false),
        }
    }

    /// The commitment `sign_local_commitment` returns for `channel_id`.
    pub fn set_local_commitment(&self, channel_id: ChannelId, commitment: Commitment) {
        lock(&self.commitments).insert(channel_id, commitment);
    }

    /// Make every subsequent signing request fail.
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    fn check(&self) -> Result<()> {
        if *lock(&self.failing) {
            return Err(CourtError::SigningFailed {
                reason: "signer offline".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for MockSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl crate::Signer for MockSigner {
    fn sign_local_commitment(&self, channel_id: ChannelId) -> Result<Commitment> {
        self.check()?;
        lock(&self.commitments)
            .get(&channel_id)
            .cloned()
            .ok_or_else(|| CourtError::SigningFailed {
                reason: format!("no commitment for {channel_id}"),
            })
    }

    fn sign_sweep(&self, tx: &Transaction, inputs: &[SpendDescriptor]) -> Result<SignedTx> {
        self.check()?;
        if tx.inputs.len() != inputs.len() {
            return Err(CourtError::SigningFailed {
                reason: "descriptor count does not match inputs".to_string(),
            });
        }
        let witnesses = (0..inputs.len())
            .map(|i| self.key.sign(&tx.sighash(i)).to_bytes().to_vec())
            .collect();
        Ok(SignedTx {
            tx: tx.clone(),
            witnesses,
        })
    }

    fn sweep_script(&self) -> Result<Script> {
        self.check()?;
        let mut script = vec![0x51, 0x20];
        script.extend_from_slice(self.key.verifying_key().as_bytes());
        Ok(Script(script))
    }
}

/// Records every published transaction; can be told to reject.
#[derive(Default)]
pub struct MockBroadcaster {
    published: Mutex<Vec<SignedTx>>,
    reject_next: Mutex<u32>,
}

impl MockBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` publish calls.
    pub fn reject_next(&self, n: u32) {
        *lock(&self.reject_next) = n;
    }

    pub fn published(&self) -> Vec<SignedTx> {
        lock(&self.published).clone()
    }

    pub fn published_txids(&self) -> Vec<Txid> {
        lock(&self.published).iter().map(SignedTx::txid).collect()
    }

    /// Number of times `txid` was handed to the network.
    pub fn count(&self, txid: &Txid) -> usize {
        lock(&self.published)
            .iter()
            .filter(|tx| tx.txid() == *txid)
            .count()
    }

    /// Most recent published transaction spending `outpoint`.
    pub fn last_spending(&self, outpoint: &OutPoint) -> Option<SignedTx> {
        lock(&self.published)
            .iter()
            .rev()
            .find(|tx| tx.tx.spends(outpoint))
            .cloned()
    }
}

impl Broadcaster for MockBroadcaster {
    fn publish(&self, tx: &SignedTx) -> Result<()> {
        let mut reject = lock(&self.reject_next);
        if *reject > 0 {
            *reject -= 1;
            return Err(CourtError::BroadcastRejected {
                txid: tx.txid(),
                reason: "min relay fee not met".to_string(),
            });
        }
        drop(reject);
        lock(&self.published).push(tx.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockRegistry {
    entries: Mutex<HashMap<PaymentHash, PreimageStatus>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settle(&self, preimage: Preimage) {
        lock(&self.entries).insert(preimage.payment_hash(), PreimageStatus::Known(preimage));
    }

    pub fn fail(&self, hash: PaymentHash) {
        lock(&self.entries).insert(hash, PreimageStatus::Failed);
    }
}

impl InvoiceRegistry for MockRegistry {
    fn lookup(&self, hash: &PaymentHash) -> PreimageStatus {
        lock(&self.entries)
            .get(hash)
            .copied()
            .unwrap_or(PreimageStatus::Unknown)
    }
}

/// Scripted chain backend.
#[derive(Default)]
pub struct MockChain {
    best_height: Mutex<Height>,
    confirmations: Mutex<HashMap<Txid, TxConfirmation>>,
    unavailable_for: Mutex<u32>,
}

impl MockChain {
    pub fn new(best_height: Height) -> Self {
        Self {
            best_height: Mutex::new(best_height),
            ..Self::default()
        }
    }

    pub fn set_height(&self, height: Height) {
        *lock(&self.best_height) = height;
    }

    pub fn confirm(&self, txid: Txid, height: Height) {
        let best = *lock(&self.best_height);
        let depth = best.saturating_sub(height) + 1;
        lock(&self.confirmations).insert(txid, TxConfirmation { height, depth });
    }

    pub fn unconfirm(&self, txid: &Txid) {
        lock(&self.confirmations).remove(txid);
    }

    /// Fail the next `n` queries.
    pub fn fail_next(&self, n: u32) {
        *lock(&self.unavailable_for) = n;
    }

    fn check(&self) -> Result<()> {
        let mut remaining = lock(&self.unavailable_for);
        if *remaining > 0 {
            *remaining -= 1;
            return Err(CourtError::ChainUnavailable {
                reason: "backend not synced".to_string(),
            });
        }
        Ok(())
    }
}

impl ChainView for MockChain {
    fn best_height(&self) -> Result<Height> {
        self.check()?;
        Ok(*lock(&self.best_height))
    }

    fn confirmation(&self, txid: &Txid) -> Result<Option<TxConfirmation>> {
        self.check()?;
        let best = *lock(&self.best_height);
        Ok(lock(&self.confirmations).get(txid).map(|c| TxConfirmation {
            height: c.height,
            depth: best.saturating_sub(c.height) + 1,
        }))
    }
}

/// Builds commitment transactions output by output.
pub struct CommitmentBuilder {
    owner: CommitmentOwner,
    state_number: u64,
    funding: OutPoint,
    outputs: Vec<(Satoshis, OutputKind, Option<u32>, Option<HtlcDescriptor>)>,
}

impl CommitmentBuilder {
    pub fn new(owner: CommitmentOwner, state_number: u64) -> Self {
        Self {
            owner,
            state_number,
            funding: OutPoint::new(Txid::dummy(state_number ^ 0xf00d), 0),
            outputs: Vec::new(),
        }
    }

    pub fn output(mut self, amount: Satoshis, kind: OutputKind, csv_delay: Option<u32>) -> Self {
        self.outputs.push((amount, kind, csv_delay, None));
        self
    }

    pub fn htlc(mut self, kind: OutputKind, htlc: HtlcDescriptor, csv_delay: Option<u32>) -> Self {
        self.outputs.push((htlc.amount, kind, csv_delay, Some(htlc)));
        self
    }

    pub fn anchor(self) -> Self {
        self.output(constants::ANCHOR_OUTPUT_VALUE, OutputKind::Anchor, None)
    }

    pub fn build(self) -> Commitment {
        let tx = Transaction {
            version: constants::SWEEP_TX_VERSION,
            inputs: vec![TxIn {
                previous_output: self.funding,
                sequence: constants::FINAL_SEQUENCE,
            }],
            outputs: self
                .outputs
                .iter()
                .enumerate()
                .map(|(i, (amount, ..))| TxOut {
                    value: *amount,
                    script: Script(vec![0x00, u8::try_from(i).unwrap_or(u8::MAX)]),
                })
                .collect(),
            lock_time: 0,
        };
        let signed = SignedTx {
            tx,
            witnesses: vec![vec![0u8; 64]],
        };
        let txid = signed.txid();
        let outputs = self
            .outputs
            .into_iter()
            .enumerate()
            .map(|(i, (amount, kind, csv_delay, htlc))| DisputedOutput {
                outpoint: OutPoint::new(txid, u32::try_from(i).unwrap_or(u32::MAX)),
                amount,
                kind,
                csv_delay,
                htlc,
            })
            .collect();
        Commitment {
            tx: signed,
            owner: self.owner,
            state_number: self.state_number,
            outputs,
        }
    }
}

/// A preimage/hash pair distinct per `seed`.
pub fn preimage(seed: u8) -> Preimage {
    Preimage([seed; 32])
}
