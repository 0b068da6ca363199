//! Sweep transaction construction.
//!
//! Every claim the court makes is one of two shapes: a sweep of one or more
//! inputs into a single wallet output, or a second-level HTLC transaction
//! moving an HTLC on our own commitment into a CSV-delayed output. Both
//! refuse to build when the fee would eat the whole value; the caller
//! records that as an abandoned output rather than an error.

use contractcourt_types::{
    CourtError, Height, Result, Satoshis, SignedTx, Signer, SpendDescriptor, Transaction, TxIn,
    TxOut, constants, fee_for,
};
use rust_decimal::Decimal;

/// Estimated size of a sweep spending `inputs` into one output.
#[must_use]
pub fn sweep_vbytes(inputs: &[SpendDescriptor]) -> u64 {
    constants::TX_OVERHEAD_VBYTES
        + inputs.iter().map(|d| d.path.input_vbytes()).sum::<u64>()
        + constants::SWEEP_OUTPUT_VBYTES
}

/// Fee a sweep of `inputs` pays at `fee_rate`.
#[must_use]
pub fn sweep_fee(inputs: &[SpendDescriptor], fee_rate: Decimal) -> Satoshis {
    fee_for(fee_rate, sweep_vbytes(inputs))
}

/// Build and sign a transaction sweeping `inputs` to a fresh wallet script.
///
/// Returns `Ok(None)` when the fee is at least the total input value.
///
/// # Errors
/// [`CourtError::EmptySweep`] with no inputs; signer errors are passed through.
pub fn build_sweep(
    signer: &dyn Signer,
    inputs: &[SpendDescriptor],
    fee_rate: Decimal,
    lock_time: Height,
) -> Result<Option<SignedTx>> {
    if inputs.is_empty() {
        return Err(CourtError::EmptySweep);
    }
    let value: Satoshis = inputs.iter().map(|d| d.amount).sum();
    let fee = sweep_fee(inputs, fee_rate);
    if fee >= value {
        return Ok(None);
    }
    let tx = Transaction {
        version: constants::SWEEP_TX_VERSION,
        inputs: inputs
            .iter()
            .map(|d| TxIn {
                previous_output: d.outpoint,
                sequence: d.sequence(),
            })
            .collect(),
        outputs: vec![TxOut {
            value: value - fee,
            script: signer.sweep_script()?,
        }],
        lock_time,
    };
    signer.sign_sweep(&tx, inputs).map(Some)
}

/// Build and sign the second-level transaction for an HTLC on our own
/// commitment. Output 0 is the CSV-delayed output handed to the incubator.
///
/// # Errors
/// [`CourtError::InvalidResolverInput`] if `input` is not a second-level path.
pub fn build_second_level(
    signer: &dyn Signer,
    input: &SpendDescriptor,
    fee_rate: Decimal,
    lock_time: Height,
) -> Result<Option<SignedTx>> {
    if !input.path.is_second_level() {
        return Err(CourtError::InvalidResolverInput {
            outpoint: input.outpoint,
            reason: format!("{:?} is not a second-level path", input.path),
        });
    }
    let fee = fee_for(fee_rate, input.path.input_vbytes());
    if fee >= input.amount {
        return Ok(None);
    }
    let tx = Transaction {
        version: constants::SWEEP_TX_VERSION,
        inputs: vec![TxIn {
            previous_output: input.outpoint,
            sequence: input.sequence(),
        }],
        outputs: vec![TxOut {
            value: input.amount - fee,
            script: signer.sweep_script()?,
        }],
        lock_time,
    };
    signer
        .sign_sweep(&tx, std::slice::from_ref(input))
        .map(Some)
}
