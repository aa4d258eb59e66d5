//! Content-hash checkpoint sink for Strata nodes.
//!
//! Each checkpoint serializes a node's observable record to JSON and hashes it
//! with SHA-256. Tokens are reproducible across identical runs unless the sink
//! is built with [`Sha256Checkpoint::timestamped`], in which case the hashed
//! payload carries a UTC wall-clock stamp.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use strata_core::{CheckpointRecord, CheckpointSink, CheckpointToken};
use thiserror::Error;
use tracing::{trace, warn};

/// Errors raised while producing a checkpoint digest.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to serialize checkpoint record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Source of the timestamp embedded in stamped payloads.
pub type Clock = fn() -> DateTime<Utc>;

#[derive(Serialize)]
struct Payload<'a> {
    #[serde(flatten)]
    record: &'a CheckpointRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
}

/// Checkpoint sink returning the hex SHA-256 of the serialized record.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Checkpoint {
    clock: Option<Clock>,
}

impl Sha256Checkpoint {
    /// Sink whose tokens depend only on the record.
    #[must_use]
    pub const fn new() -> Self {
        Self { clock: None }
    }

    /// Sink that stamps each payload with the current UTC time. Tokens are no
    /// longer reproducible between runs.
    #[must_use]
    pub fn timestamped() -> Self {
        Self::with_clock(Utc::now)
    }

    #[must_use]
    pub const fn with_clock(clock: Clock) -> Self {
        Self { clock: Some(clock) }
    }

    #[must_use]
    pub const fn is_timestamped(&self) -> bool {
        self.clock.is_some()
    }

    /// Serialize and hash `record`, returning the lowercase hex digest.
    pub fn digest(&self, record: &CheckpointRecord) -> Result<CheckpointToken, AuditError> {
        let payload = Payload {
            record,
            timestamp: self.clock.map(|clock| clock()),
        };
        let bytes = serde_json::to_vec(&payload)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(CheckpointToken(hex::encode(hasher.finalize())))
    }
}

impl CheckpointSink for Sha256Checkpoint {
    fn checkpoint(&self, record: &CheckpointRecord) -> Option<CheckpointToken> {
        match self.digest(record) {
            Ok(token) => {
                trace!(node = ?record.id, tick = record.tick.0, %token, "checkpoint");
                Some(token)
            }
            Err(err) => {
                warn!(node = ?record.id, %err, "checkpoint digest failed");
                None
            }
        }
    }
}
