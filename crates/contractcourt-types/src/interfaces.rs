//! Collaborator interfaces.
//!
//! The chain backend, the signer/wallet and the invoice registry live
//! outside this workspace. Components receive them as trait objects at
//! construction and never reach for global state.

use crate::{
    ChannelId, Commitment, Height, PaymentHash, Preimage, Result, Script, SignedTx,
    SpendDescriptor, Transaction, TxConfirmation, Txid,
};

/// Produces signatures and wallet addresses.
pub trait Signer: Send + Sync {
    /// Our latest commitment, fully signed and ready to publish.
    fn sign_local_commitment(&self, channel_id: ChannelId) -> Result<Commitment>;

    /// Sign `tx`, whose inputs are described one-to-one by `inputs`.
    fn sign_sweep(&self, tx: &Transaction, inputs: &[SpendDescriptor]) -> Result<SignedTx>;

    /// Fresh wallet script to sweep funds into.
    fn sweep_script(&self) -> Result<Script>;
}

/// Publishes transactions to the network.
///
/// Publishing a transaction that is already in the mempool or confirmed
/// must succeed.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, tx: &SignedTx) -> Result<()>;
}

/// What the invoice registry knows about a payment hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreimageStatus {
    Known(Preimage),
    Unknown,
    /// The invoice was cancelled; the preimage will never be released.
    Failed,
}

/// The receiving edge: settles HTLCs we are the final hop for, and
/// surfaces preimages learned on other channels.
pub trait InvoiceRegistry: Send + Sync {
    fn lookup(&self, hash: &PaymentHash) -> PreimageStatus;
}

/// Point-in-time queries against the chain backend, used at startup to
/// re-derive state. Failures are transient.
pub trait ChainView: Send + Sync {
    fn best_height(&self) -> Result<Height>;

    /// Current confirmation of `txid`, or `None` if it is not in the best chain.
    fn confirmation(&self, txid: &Txid) -> Result<Option<TxConfirmation>>;
}
