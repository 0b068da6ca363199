//! Configuration for arbitrators, sweepers and the breach path.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{CourtError, Result, constants};

/// Per-channel arbitration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitratorConfig {
    /// Confirmations before a closing transaction is acted upon.
    pub commitment_conf_depth: u32,
    /// Confirmations before a sweep is final.
    pub sweep_conf_depth: u32,
    /// Go to chain this many blocks before an outgoing HTLC expires.
    pub outgoing_broadcast_delta: u32,
    /// Go to chain this many blocks before an incoming HTLC we can settle expires.
    pub incoming_broadcast_delta: u32,
    pub fees: FeeConfig,
    pub retry: RetryConfig,
    pub breach: BreachConfig,
}

impl Default for ArbitratorConfig {
    fn default() -> Self {
        Self {
            commitment_conf_depth: constants::DEFAULT_COMMITMENT_CONF_DEPTH,
            sweep_conf_depth: constants::DEFAULT_SWEEP_CONF_DEPTH,
            outgoing_broadcast_delta: constants::DEFAULT_OUTGOING_BROADCAST_DELTA,
            incoming_broadcast_delta: constants::DEFAULT_INCOMING_BROADCAST_DELTA,
            fees: FeeConfig::default(),
            retry: RetryConfig::default(),
            breach: BreachConfig::default(),
        }
    }
}

impl ArbitratorConfig {
    /// Parse a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns [`CourtError::Configuration`] if the document is malformed or
    /// fails [`Self::validate`].
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self =
            serde_json::from_str(json).map_err(|e| CourtError::Configuration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.commitment_conf_depth == 0 || self.sweep_conf_depth == 0 {
            return Err(CourtError::Configuration(
                "confirmation depths must be at least 1".to_string(),
            ));
        }
        if self.breach.justice_conf_depth == 0 {
            return Err(CourtError::Configuration(
                "justice_conf_depth must be at least 1".to_string(),
            ));
        }
        self.fees.validate()?;
        self.retry.validate()
    }
}

/// Sweep fee settings, in sat/vbyte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    pub sweep_fee_rate: Decimal,
    /// Applied once per failed attempt.
    pub bump_multiplier: Decimal,
    pub max_fee_rate: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        let (mantissa, scale) = constants::DEFAULT_BUMP_MULTIPLIER;
        Self {
            sweep_fee_rate: Decimal::from(constants::DEFAULT_SWEEP_FEE_RATE),
            bump_multiplier: Decimal::new(mantissa, scale),
            max_fee_rate: Decimal::from(constants::DEFAULT_MAX_FEE_RATE),
        }
    }
}

impl FeeConfig {
    /// Fee rate for the `attempt`-th try (0-based), capped at `max_fee_rate`.
    #[must_use]
    pub fn rate_for_attempt(&self, attempt: u32) -> Decimal {
        let mut rate = self.sweep_fee_rate;
        for _ in 0..attempt {
            rate *= self.bump_multiplier;
            if rate >= self.max_fee_rate {
                return self.max_fee_rate;
            }
        }
        rate.min(self.max_fee_rate)
    }

    fn validate(&self) -> Result<()> {
        if self.sweep_fee_rate <= Decimal::ZERO {
            return Err(CourtError::Configuration(
                "sweep_fee_rate must be positive".to_string(),
            ));
        }
        if self.bump_multiplier < Decimal::ONE {
            return Err(CourtError::Configuration(
                "bump_multiplier must be >= 1".to_string(),
            ));
        }
        if self.max_fee_rate < self.sweep_fee_rate {
            return Err(CourtError::Configuration(
                "max_fee_rate must be >= sweep_fee_rate".to_string(),
            ));
        }
        Ok(())
    }
}

/// Backoff for transient chain-backend failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: constants::DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: constants::DEFAULT_MAX_BACKOFF_MS,
            max_attempts: constants::DEFAULT_MAX_RETRY_ATTEMPTS,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based): doubling, capped.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(CourtError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(CourtError::Configuration(
                "retry.initial_backoff_ms exceeds max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Breach retribution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreachConfig {
    /// Confirmations before the justice transaction is final.
    pub justice_conf_depth: u32,
    /// Multiplier applied each block the justice transaction is unconfirmed.
    pub bump_multiplier: Decimal,
    /// Multiplier once the earliest counterparty timelock is near.
    pub urgent_bump_multiplier: Decimal,
    /// Blocks before the earliest counterparty timelock that count as near.
    pub urgency_window: u32,
}

impl Default for BreachConfig {
    fn default() -> Self {
        let (mantissa, scale) = constants::DEFAULT_BUMP_MULTIPLIER;
        Self {
            justice_conf_depth: constants::DEFAULT_JUSTICE_CONF_DEPTH,
            bump_multiplier: Decimal::new(mantissa, scale),
            urgent_bump_multiplier: Decimal::from(2),
            urgency_window: constants::DEFAULT_JUSTICE_URGENCY_WINDOW,
        }
    }
}
