//! # contractcourt-types
//!
//! Shared types, errors, and configuration for the **contract court**: the
//! on-chain enforcement layer of a payment-channel node.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`ChannelId`], [`Txid`], [`OutPoint`], [`PaymentHash`], [`Preimage`]
//! - **Transactions**: [`Transaction`], [`SignedTx`], [`SpendPath`], [`SpendDescriptor`]
//! - **Closing model**: [`Commitment`], [`CloseObservation`], [`ClosureSummary`], [`DisputedOutput`]
//! - **HTLCs**: [`HtlcDescriptor`], [`HtlcDirection`]
//! - **Chain events**: [`ChainEvent`], [`TxConfirmation`]
//! - **Arbitration phases**: [`ArbitratorState`]
//! - **Outcomes**: [`ResolverOutcome`], [`OutcomeKind`], [`ResolutionReport`]
//! - **Collaborators**: [`Signer`], [`Broadcaster`], [`InvoiceRegistry`], [`ChainView`]
//! - **Configuration**: [`ArbitratorConfig`], [`FeeConfig`], [`RetryConfig`], [`BreachConfig`]
//! - **Errors**: [`CourtError`] with `CC_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod chain;
pub mod closure;
pub mod config;
pub mod constants;
pub mod error;
pub mod htlc;
pub mod ids;
pub mod interfaces;
pub mod outcome;
pub mod phase;
pub mod tx;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testkit;

pub use chain::*;
pub use closure::*;
pub use config::*;
pub use error::*;
pub use htlc::*;
pub use ids::*;
pub use interfaces::*;
pub use outcome::*;
pub use phase::*;
pub use tx::*;

// Constants are accessed via `contractcourt_types::constants::FOO`
// (not re-exported to avoid name collisions).
