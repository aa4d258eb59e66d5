//! Core types for the Strata simulation: a region tree that blends parameters
//! down its ancestor chain, and nodes whose state is recomputed once per tick
//! from that tree, their neighbors and exogenous contribution signals.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::f64::consts::{PI, TAU};
use thiserror::Error;

pub mod checkpoint;
pub mod evolve;
pub mod node;
pub mod region;
pub mod vector;
pub mod world;

pub use checkpoint::{CheckpointRecord, CheckpointSink, CheckpointToken, NullCheckpoint};
pub use evolve::{Evolved, StepContext, evolve};
pub use node::{Awareness, INCUBATION_HISTORY_CAPACITY, Node, NodeConfig};
pub use region::{HueBand, ROOT_KAPPA, ROOT_NOISE, Region, RegionConfig, RegionError, RegionTree};
pub use vector::Vec3;
pub use world::{Simulation, SimulationConfig, SimulationError, TickEvents, TickSummary};

new_key_type! {
    /// Stable handle for regions backed by a generational slot map.
    pub struct RegionId;
    /// Stable handle for nodes backed by a generational slot map.
    pub struct NodeId;
}

/// Nodes farther than this from the origin are pulled back inside.
pub const WORLD_RADIUS: f64 = 500.0;
/// Magnitude a position is rescaled to after crossing [`WORLD_RADIUS`].
pub const WORLD_RECLAMP_RADIUS: f64 = 475.0;

/// High level simulation clock (ticks processed since boot).
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Errors raised while validating construction-time configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Wraps a value into `[0, 1)`. NaN maps to zero.
pub(crate) fn wrap_unit(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let wrapped = value.rem_euclid(1.0);
    // rem_euclid rounds tiny negatives up to exactly 1.0
    if wrapped >= 1.0 { 0.0 } else { wrapped }
}

/// Shortest signed distance from `from` to `to` on the unit hue circle, in `[-0.5, 0.5)`.
pub(crate) fn hue_difference(to: f64, from: f64) -> f64 {
    (to - from + 1.5).rem_euclid(1.0) - 0.5
}

/// Wraps an angle into `(-π, π]`.
pub(crate) fn wrap_signed_angle(angle: f64) -> f64 {
    if !angle.is_finite() {
        return 0.0;
    }
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

pub(crate) fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Replaces NaN and infinities with zero.
pub(crate) fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// Clamps into `[min, max]`, saturating infinities at the bounds. NaN maps to `min`.
pub(crate) fn saturate(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

pub(crate) fn mean(values: impl ExactSizeIterator<Item = f64>) -> Option<f64> {
    let len = values.len();
    if len == 0 {
        return None;
    }
    Some(values.sum::<f64>() / len as f64)
}
