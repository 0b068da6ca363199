//! System-wide constants for the contract court.

/// Confirmations a closing transaction needs before resolvers are spawned.
pub const DEFAULT_COMMITMENT_CONF_DEPTH: u32 = 6;

/// Confirmations a sweep needs before its output is considered final.
pub const DEFAULT_SWEEP_CONF_DEPTH: u32 = 6;

/// Confirmations the justice transaction needs before a breach is closed out.
pub const DEFAULT_JUSTICE_CONF_DEPTH: u32 = 6;

/// Blocks before an outgoing HTLC's expiry at which we go to chain.
pub const DEFAULT_OUTGOING_BROADCAST_DELTA: u32 = 10;

/// Blocks before an incoming HTLC's expiry at which we go to chain
/// when we hold its preimage.
pub const DEFAULT_INCOMING_BROADCAST_DELTA: u32 = 10;

/// Default sweep fee rate, sat/vbyte (numerator, scale 0).
pub const DEFAULT_SWEEP_FEE_RATE: i64 = 2;

/// Default fee-bump multiplier, expressed as (mantissa, scale) = 1.25.
pub const DEFAULT_BUMP_MULTIPLIER: (i64, u32) = (125, 2);

/// Ceiling on any fee rate we will pay, sat/vbyte.
pub const DEFAULT_MAX_FEE_RATE: i64 = 500;

/// Blocks before the earliest counterparty timelock at which justice
/// fee bumping turns aggressive.
pub const DEFAULT_JUSTICE_URGENCY_WINDOW: u32 = 6;

/// Initial backoff when the chain backend is unreachable.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;

/// Backoff ceiling when the chain backend is unreachable.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

/// Attempts before a transient chain error is surfaced to the operator.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 8;

/// Transactions each channel's publish guard remembers.
pub const PUBLISH_GUARD_CAPACITY: usize = 1024;

/// Queue depth of a channel arbitrator's event loop.
pub const CHANNEL_EVENT_QUEUE: usize = 256;

/// Steps a resolver may take within one arbitrator pass before it is
/// considered stuck.
pub const MAX_RESOLVE_STEPS: usize = 8;

/// Sequence value for inputs without a relative lock.
pub const FINAL_SEQUENCE: u32 = 0xffff_fffe;

/// Transaction version used for every sweep.
pub const SWEEP_TX_VERSION: u32 = 2;

/// Fixed per-transaction overhead, vbytes.
pub const TX_OVERHEAD_VBYTES: u64 = 11;

/// One P2TR wallet output, vbytes.
pub const SWEEP_OUTPUT_VBYTES: u64 = 43;

pub const TO_LOCAL_INPUT_VBYTES: u64 = 80;
pub const TO_REMOTE_INPUT_VBYTES: u64 = 68;
pub const HTLC_SUCCESS_INPUT_VBYTES: u64 = 122;
pub const HTLC_TIMEOUT_INPUT_VBYTES: u64 = 112;
pub const ANCHOR_INPUT_VBYTES: u64 = 70;
pub const REVOCATION_INPUT_VBYTES: u64 = 122;

/// Whole second-level transactions (one HTLC input, one delayed output).
pub const SECOND_LEVEL_SUCCESS_VBYTES: u64 = 176;
pub const SECOND_LEVEL_TIMEOUT_VBYTES: u64 = 166;

/// Anchor outputs carry this fixed value.
pub const ANCHOR_OUTPUT_VALUE: u64 = 330;

/// Version tag of the persisted log envelope.
pub const LOG_SCHEMA_VERSION: u16 = 1;

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
