//! Audit checkpoint seam: nodes hand their observable state to a sink that
//! returns an opaque token.

use crate::{NodeId, RegionId, Tick, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Observable fields of a node handed to checkpoint sinks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CheckpointRecord {
    pub id: NodeId,
    pub tick: Tick,
    pub hue: f64,
    pub rotation: f64,
    pub coherence: f64,
    pub entropy: f64,
    pub sandbox: f64,
    pub region: Option<RegionId>,
    pub position: Vec3,
    pub incubating: bool,
}

/// Opaque audit artifact produced by a [`CheckpointSink`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointToken(pub String);

impl CheckpointToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CheckpointToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sink invoked at node construction and, probabilistically, after evolution steps.
///
/// Sinks are shared across the parallel per-node step and must be `Sync`.
pub trait CheckpointSink: Send + Sync {
    /// Returns `None` when the sink declines to produce a token.
    fn checkpoint(&self, record: &CheckpointRecord) -> Option<CheckpointToken>;
}

/// Sink that never produces tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCheckpoint;

impl CheckpointSink for NullCheckpoint {
    fn checkpoint(&self, _record: &CheckpointRecord) -> Option<CheckpointToken> {
        None
    }
}

impl<T: CheckpointSink + ?Sized> CheckpointSink for Box<T> {
    fn checkpoint(&self, record: &CheckpointRecord) -> Option<CheckpointToken> {
        (**self).checkpoint(record)
    }
}
