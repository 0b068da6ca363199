//! # contractcourt-arbitrator
//!
//! Drives a payment channel from a closing transaction to a full accounting
//! of its funds.
//!
//! - [`ChannelArbitrator`]: the per-channel phase machine. It spawns
//!   resolvers once the close confirms, hands time-locked outputs to the
//!   incubator, switches to the justice path on a breach, and rolls back if
//!   the close is reorged out. Every step is persisted before anything is
//!   published.
//! - [`ChainArbitrator`]: runs one task per channel, fans chain events out,
//!   and resumes every channel from the arbitration log at startup.

pub mod channel;
pub mod driver;
pub mod event;
pub mod guard;
pub mod record;

pub use channel::ChannelArbitrator;
pub use driver::ChainArbitrator;
pub use event::{ChannelEvent, ChannelStatus, Collaborators};
pub use guard::PublishGuard;
pub use record::{ChannelRecord, TrackedClose};
