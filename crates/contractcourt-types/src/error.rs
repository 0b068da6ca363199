//! Error types for the contract court.
//!
//! All errors use the `CC_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Chain observation errors (transient)
//! - 2xx: Signing / broadcast errors
//! - 3xx: Resolver errors
//! - 4xx: Arbitration state errors
//! - 5xx: Breach errors
//! - 6xx: Arbitration log errors
//! - 7xx: Invariant violations (fatal)
//! - 9xx: General / internal errors

use thiserror::Error;

use crate::{ArbitratorState, ChannelId, OutPoint, Txid};

/// Central error enum for all contract court operations.
#[derive(Debug, Error)]
pub enum CourtError {
    // =================================================================
    // Chain Observation Errors (1xx)
    // =================================================================
    /// The chain backend could not be queried. Retried with backoff.
    #[error("CC_ERR_100: Chain backend unavailable: {reason}")]
    ChainUnavailable { reason: String },

    // =================================================================
    // Signing / Broadcast Errors (2xx)
    // =================================================================
    /// The signer refused or failed to produce a signature.
    #[error("CC_ERR_200: Signing failed: {reason}")]
    SigningFailed { reason: String },

    /// The network rejected a transaction (fee too low, policy, conflict).
    #[error("CC_ERR_201: Broadcast of {txid} rejected: {reason}")]
    BroadcastRejected { txid: Txid, reason: String },

    // =================================================================
    // Resolver Errors (3xx)
    // =================================================================
    /// A resolver was handed an output it cannot spend.
    #[error("CC_ERR_300: Invalid resolver input {outpoint}: {reason}")]
    InvalidResolverInput { outpoint: OutPoint, reason: String },

    /// A sweep was requested with no inputs.
    #[error("CC_ERR_301: Empty sweep")]
    EmptySweep,

    // =================================================================
    // Arbitration State Errors (4xx)
    // =================================================================
    /// A phase transition that the state machine does not allow.
    #[error("CC_ERR_400: Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ArbitratorState,
        to: ArbitratorState,
    },

    /// No arbitrator is tracking this channel.
    #[error("CC_ERR_401: Channel not found: {0}")]
    ChannelNotFound(ChannelId),

    /// A closing transaction failed validation.
    #[error("CC_ERR_402: Invalid closure: {reason}")]
    InvalidClosure { reason: String },

    /// The channel's event loop has shut down.
    #[error("CC_ERR_403: Arbitrator for {0} has stopped")]
    ArbitratorStopped(ChannelId),

    // =================================================================
    // Breach Errors (5xx)
    // =================================================================
    /// A breach was reported with nothing we could punish.
    #[error("CC_ERR_500: Breach of {0} has no punishable outputs")]
    NothingToPunish(ChannelId),

    // =================================================================
    // Arbitration Log Errors (6xx)
    // =================================================================
    /// A persisted value failed its integrity check. Fatal.
    #[error("CC_ERR_600: Arbitration log corrupted at {key}: {reason}")]
    LogCorruption { key: String, reason: String },

    /// The storage backend failed to read or write.
    #[error("CC_ERR_601: Storage error: {0}")]
    Storage(String),

    // =================================================================
    // Invariant Violations (7xx)
    // =================================================================
    /// Resolved plus pending outputs no longer equal the disputed set. Fatal.
    #[error("CC_ERR_700: Fund coverage violation on {channel_id}: {reason}")]
    FundCoverageViolation { channel_id: ChannelId, reason: String },

    /// A confirmed close has no persisted closure summary. Fatal.
    #[error("CC_ERR_701: Missing closure summary for confirmed close of {0}")]
    MissingClosureSummary(ChannelId),

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("CC_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("CC_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, out-of-range values, etc.).
    #[error("CC_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (disk).
    #[error("CC_ERR_903: I/O error: {0}")]
    Io(String),
}

impl CourtError {
    /// Errors that clear on their own; retry with backoff, change no state.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ChainUnavailable { .. })
    }

    /// The arbitration log could not be read or written. The event that hit
    /// it may be delivered again once storage is back.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Io(_))
    }

    /// Errors after which the channel must not proceed on partial state.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LogCorruption { .. }
                | Self::FundCoverageViolation { .. }
                | Self::MissingClosureSummary(_)
                | Self::Internal(_)
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, CourtError>;

impl From<std::io::Error> for CourtError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CourtError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = CourtError::ChannelNotFound(ChannelId([0u8; 32]));
        let msg = format!("{err}");
        assert!(msg.starts_with("CC_ERR_401"), "Got: {msg}");
    }

    #[test]
    fn invalid_transition_display() {
        let err = CourtError::InvalidTransition {
            from: ArbitratorState::Default,
            to: ArbitratorState::FullyResolved,
        };
        let msg = format!("{err}");
        assert!(msg.contains("CC_ERR_400"));
        assert!(msg.contains("DEFAULT"));
        assert!(msg.contains("FULLY_RESOLVED"));
    }

    #[test]
    fn taxonomy_classification() {
        assert!(
            CourtError::ChainUnavailable {
                reason: "timeout".into()
            }
            .is_transient()
        );
        assert!(CourtError::MissingClosureSummary(ChannelId([1u8; 32])).is_fatal());
        assert!(
            CourtError::LogCorruption {
                key: "k".into(),
                reason: "checksum".into()
            }
            .is_fatal()
        );
        let rejected = CourtError::BroadcastRejected {
            txid: Txid([0u8; 32]),
            reason: "min relay fee not met".into(),
        };
        assert!(!rejected.is_transient());
        assert!(!rejected.is_fatal());
        assert!(CourtError::Storage("disk full".into()).is_storage());
        assert!(CourtError::Io("EIO".into()).is_storage());
        assert!(!rejected.is_storage());
    }

    #[test]
    fn all_errors_have_cc_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(CourtError::EmptySweep),
            Box::new(CourtError::NothingToPunish(ChannelId([0u8; 32]))),
            Box::new(CourtError::Storage("disk full".into())),
            Box::new(CourtError::Internal("test".into())),
            Box::new(CourtError::FundCoverageViolation {
                channel_id: ChannelId([0u8; 32]),
                reason: "missing".into(),
            }),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("CC_ERR_"),
                "Error missing CC_ERR_ prefix: {msg}"
            );
        }
    }
}
