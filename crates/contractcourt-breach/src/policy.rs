//! Fee-bump policy for racing the counterparty in the justice path.
//!
//! How aggressively to outbid a thief is an economic choice, not a
//! correctness property, so the breach arbitrator takes it as a trait
//! object.

use contractcourt_types::{BreachConfig, FeeConfig};
use rust_decimal::Decimal;

/// Inputs to a fee decision for one justice transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BumpContext {
    /// Justice transactions already built for this breach.
    pub attempt: u32,
    /// Blocks until the earliest counterparty timelock on an output we still
    /// hope to claim. `None` when no such timelock exists.
    pub blocks_to_deadline: Option<u32>,
    pub base_rate: Decimal,
    pub max_rate: Decimal,
}

pub trait FeeBumpPolicy: Send + Sync {
    /// Fee rate in sat/vbyte. Implementations must stay within
    /// `[base_rate, max_rate]`.
    fn fee_rate(&self, ctx: &BumpContext) -> Decimal;
}

/// Multiplies the rate once per attempt, by a larger factor for attempts
/// made inside the urgency window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometricFeeBump {
    multiplier: Decimal,
    urgent_multiplier: Decimal,
    urgency_window: u32,
}

impl GeometricFeeBump {
    #[must_use]
    pub fn new(multiplier: Decimal, urgent_multiplier: Decimal, urgency_window: u32) -> Self {
        Self {
            multiplier: multiplier.max(Decimal::ONE),
            urgent_multiplier: urgent_multiplier.max(Decimal::ONE),
            urgency_window,
        }
    }

    #[must_use]
    pub fn from_config(config: &BreachConfig) -> Self {
        Self::new(
            config.bump_multiplier,
            config.urgent_bump_multiplier,
            config.urgency_window,
        )
    }
}

impl Default for GeometricFeeBump {
    fn default() -> Self {
        Self::from_config(&BreachConfig::default())
    }
}

impl FeeBumpPolicy for GeometricFeeBump {
    fn fee_rate(&self, ctx: &BumpContext) -> Decimal {
        let urgent = ctx
            .blocks_to_deadline
            .is_some_and(|blocks| blocks <= self.urgency_window);
        let step = if urgent {
            self.urgent_multiplier
        } else {
            self.multiplier
        };
        let mut rate = ctx.base_rate;
        for _ in 0..ctx.attempt {
            rate *= step;
            if rate >= ctx.max_rate {
                return ctx.max_rate;
            }
        }
        rate.min(ctx.max_rate)
    }
}

/// The context for a justice transaction under `fees`.
#[must_use]
pub fn bump_context(fees: &FeeConfig, attempt: u32, blocks_to_deadline: Option<u32>) -> BumpContext {
    BumpContext {
        attempt,
        blocks_to_deadline,
        base_rate: fees.sweep_fee_rate,
        max_rate: fees.max_fee_rate,
    }
}
