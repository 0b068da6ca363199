//! Typed arbitration log over a [`KvStore`].
//!
//! Each record is wrapped in an envelope carrying a schema version and a
//! SHA-256 checksum of the payload. A record that fails either check is
//! reported as [`CourtError::LogCorruption`], which callers treat as fatal:
//! the log is the only state trusted across a restart.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use contractcourt_types::{ChannelId, CourtError, Result, constants};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::store::KvStore;

/// A value persisted once per channel.
pub trait LogRecord: Serialize + DeserializeOwned {
    /// Key namespace for this record type.
    const BUCKET: &'static str;

    fn channel_id(&self) -> ChannelId;
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u16,
    checksum: String,
    written_at: DateTime<Utc>,
    payload: String,
}

fn checksum(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// Durable per-channel record store. Cheap to clone; clones share the store.
#[derive(Clone)]
pub struct ArbitrationLog {
    store: Arc<dyn KvStore>,
}

impl ArbitrationLog {
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn key<R: LogRecord>(channel_id: &ChannelId) -> String {
        format!("{}/{}", R::BUCKET, channel_id)
    }

    /// Persist `record`, replacing any previous value for its channel.
    pub fn put<R: LogRecord>(&self, record: &R) -> Result<()> {
        let channel_id = record.channel_id();
        let payload = serde_json::to_string(record)?;
        let envelope = Envelope {
            version: constants::LOG_SCHEMA_VERSION,
            checksum: checksum(&payload),
            written_at: Utc::now(),
            payload,
        };
        let bytes = serde_json::to_vec(&envelope)?;
        self.store.put(&Self::key::<R>(&channel_id), &bytes)?;
        tracing::trace!(
            bucket = R::BUCKET,
            channel = %channel_id.short(),
            bytes = bytes.len(),
            "log record written"
        );
        Ok(())
    }

    pub fn get<R: LogRecord>(&self, channel_id: &ChannelId) -> Result<Option<R>> {
        let key = Self::key::<R>(channel_id);
        match self.store.get(&key)? {
            Some(bytes) => decode(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn remove<R: LogRecord>(&self, channel_id: &ChannelId) -> Result<()> {
        self.store.delete(&Self::key::<R>(channel_id))
    }

    /// Visit every record of type `R`. Stops at the first error, including
    /// the first corrupted record.
    pub fn for_each<R: LogRecord>(&self, mut visit: impl FnMut(R) -> Result<()>) -> Result<()> {
        self.store
            .for_each(R::BUCKET, &mut |key, bytes| visit(decode(key, bytes)?))
    }
}

fn decode<R: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<R> {
    let corrupt = |reason: String| CourtError::LogCorruption {
        key: key.to_string(),
        reason,
    };
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|e| corrupt(format!("bad envelope: {e}")))?;
    if envelope.version != constants::LOG_SCHEMA_VERSION {
        return Err(corrupt(format!(
            "unsupported schema version {}",
            envelope.version
        )));
    }
    let actual = checksum(&envelope.payload);
    if actual != envelope.checksum {
        return Err(corrupt(format!(
            "checksum mismatch: stored {}, computed {actual}",
            envelope.checksum
        )));
    }
    serde_json::from_str(&envelope.payload).map_err(|e| corrupt(format!("bad payload: {e}")))
}
