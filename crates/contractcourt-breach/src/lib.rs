//! # contractcourt-breach
//!
//! The justice path for revoked commitments.
//!
//! A channel arbitrator that sees a revoked commitment confirm hands the
//! channel to [`BreachArbitrator`]. It keeps a persistent [`Retribution`]
//! per breach and publishes a single justice transaction, re-bumped every
//! block through an injectable [`FeeBumpPolicy`] until one version is final.

pub mod justice;
pub mod policy;
pub mod retribution;

pub use justice::{BreachArbitrator, JusticeAction};
pub use policy::{BumpContext, FeeBumpPolicy, GeometricFeeBump};
pub use retribution::{JusticeVersion, OutputStatus, PunishableOutput, Retribution};
