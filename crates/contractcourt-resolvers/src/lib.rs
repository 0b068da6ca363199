//! # contractcourt-resolvers
//!
//! Per-output contract resolution for closed channels.
//!
//! - [`resolver`]: the closed [`Resolver`] enum, one variant per kind of
//!   disputed output, stepped by the channel arbitrator
//! - [`incubator`]: two-stage maturing and batched sweeping of CSV-delayed outputs
//! - [`sweep`]: sweep and second-level transaction construction
//! - [`tracker`]: confirmation tracking for a single claim
//! - [`coverage`]: the fund-coverage invariant
//!
//! Nothing in this crate touches the network or storage. Resolvers return
//! [`ResolveAction`]s and the arbitrator performs them.

pub mod coverage;
pub mod incubator;
pub mod resolver;
pub mod sweep;
pub mod tracker;

pub use coverage::verify_coverage;
pub use incubator::{Graduation, IncubationRecord, IncubationRequest, IncubationStage, Incubator};
pub use resolver::{
    AnchorResolver, BreachRemedyResolver, CommitmentSweepResolver, ContestedHtlcResolver,
    IncomingHtlcResolver, OutgoingHtlcResolver, ResolveAction, ResolveContext, Resolver,
    WaitReason,
};
pub use sweep::{build_second_level, build_sweep, sweep_fee, sweep_vbytes};
pub use tracker::ClaimTracker;
