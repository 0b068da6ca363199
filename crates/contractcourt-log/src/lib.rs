//! # contractcourt-log
//!
//! **Arbitration Log**: the durable, per-channel record of arbitration
//! state. It is the sole source of truth on restart; nothing held in
//! process memory is trusted across one.
//!
//! - [`KvStore`]: the storage contract (`put`/`get`/`delete`/`for_each`),
//!   with [`MemoryKvStore`] and the crash-atomic [`FileKvStore`]
//! - [`ArbitrationLog`]: typed, checksummed records keyed by channel

pub mod log;
pub mod store;

pub use log::{ArbitrationLog, LogRecord};
pub use store::{FileKvStore, KvStore, MemoryKvStore};
