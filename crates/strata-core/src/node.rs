//! Node entity: geometry, orientation and colour, dynamical scalars and the
//! incubation lifecycle.

use crate::{
    CheckpointRecord, CheckpointSink, CheckpointToken, ConfigError, NodeId, RegionId, Tick, Vec3,
    wrap_unit,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f64::consts::{PI, TAU};

/// Number of recent health scores retained for the incubation average.
pub const INCUBATION_HISTORY_CAPACITY: usize = 40;

pub const COHERENCE_MAX: f64 = 100.0;
pub const ENTROPY_MIN: f64 = 0.1;
pub const ENTROPY_MAX: f64 = 1000.0;
pub const SANDBOX_MIN: f64 = 0.3;
pub const SANDBOX_MAX: f64 = 10.0;

pub const DEFAULT_COHERENCE: f64 = 50.0;
pub const DEFAULT_ENTROPY: f64 = 1.0;
pub const DEFAULT_SANDBOX: f64 = 1.0;
pub const DEFAULT_MASS: f64 = 1.0;
pub const DEFAULT_RANGE: f64 = 30.0;
pub const DEFAULT_FOV: f64 = 0.9 * PI;

/// Optional overrides applied when constructing a node. Omitted fields take
/// the documented default.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// Hue in `[0, 1)`; wrapped when outside. Defaults to a uniform draw.
    pub hue: Option<f64>,
    /// Orientation in radians. Defaults to a uniform draw over a full turn.
    pub rotation: Option<f64>,
    /// Defaults to 50; clamped to `[0, 100]`.
    pub coherence: Option<f64>,
    /// Defaults to 1; clamped to `[0.1, 1000]`.
    pub entropy: Option<f64>,
    /// Defaults to 1; clamped to `[0.3, 10]`.
    pub sandbox: Option<f64>,
    pub pos: Option<Vec3>,
    pub vel: Option<Vec3>,
    pub acc: Option<Vec3>,
    /// Defaults to 1; must be positive.
    pub mass: Option<f64>,
    /// Sensing radius. Defaults to 30; must be positive.
    pub range: Option<f64>,
    /// Full sensing cone angle. Defaults to 0.9π; must lie in `(0, π]`.
    pub fov: Option<f64>,
    pub region: Option<RegionId>,
}

impl NodeConfig {
    /// Reject overrides and geometry that would produce non-finite dynamics.
    pub fn validate(&self, angles: &[f64]) -> Result<(), ConfigError> {
        if angles.is_empty() {
            return Err(ConfigError::InvalidConfig("angles must not be empty"));
        }
        if angles.iter().any(|a| !a.is_finite()) {
            return Err(ConfigError::InvalidConfig("angles must be finite"));
        }
        let scalars = [
            self.hue,
            self.rotation,
            self.coherence,
            self.entropy,
            self.sandbox,
        ];
        if scalars.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ConfigError::InvalidConfig(
                "hue, rotation, coherence, entropy and sandbox must be finite",
            ));
        }
        if [self.pos, self.vel, self.acc]
            .iter()
            .flatten()
            .any(|v| !v.is_finite())
        {
            return Err(ConfigError::InvalidConfig(
                "pos, vel and acc must be finite",
            ));
        }
        if let Some(mass) = self.mass
            && !(mass.is_finite() && mass > 0.0)
        {
            return Err(ConfigError::InvalidConfig("mass must be positive"));
        }
        if let Some(range) = self.range
            && !(range.is_finite() && range > 0.0)
        {
            return Err(ConfigError::InvalidConfig("range must be positive"));
        }
        if let Some(fov) = self.fov
            && !(fov > 0.0 && fov <= PI)
        {
            return Err(ConfigError::InvalidConfig("fov must lie in (0, π]"));
        }
        Ok(())
    }
}

/// Per-step derived view of how a node is doing. Recomputed every step.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Awareness {
    pub velocity: f64,
    pub alignment_score: f64,
    pub hue_convergence: f64,
    pub gaze_intensity: f64,
    pub thriving: bool,
}

/// A spatial agent evolved once per tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Category label.
    pub kind: String,
    pub angles: Vec<f64>,
    pub sides: usize,

    pub hue: f64,
    pub rotation: f64,

    pub coherence: f64,
    pub entropy: f64,
    pub sandbox: f64,
    pub stagnation: f64,
    pub learning_rate: f64,
    pub growth_potential: f64,

    pub pos: Vec3,
    pub vel: Vec3,
    pub acc: Vec3,
    pub mass: f64,
    pub range: f64,
    pub fov: f64,

    pub incubating: bool,
    pub incubation_history: VecDeque<f64>,
    pub incubation_score: f64,

    pub region: Option<RegionId>,
    pub children: Vec<NodeId>,
    pub observer: bool,

    pub awareness: Awareness,
    pub checkpoints: Vec<CheckpointToken>,

    /// State vector recorded when the previous step began.
    pub(crate) last_state: Vec<f64>,
}

impl Node {
    /// Build a node from geometry and overrides, drawing unspecified hue and
    /// rotation from `rng`, and record one construction checkpoint.
    pub fn new<R: Rng + ?Sized>(
        id: NodeId,
        kind: impl Into<String>,
        angles: Vec<f64>,
        config: &NodeConfig,
        rng: &mut R,
        sink: &dyn CheckpointSink,
        tick: Tick,
    ) -> Result<Self, ConfigError> {
        config.validate(&angles)?;
        let hue = match config.hue {
            Some(hue) => wrap_unit(hue),
            None => rng.random::<f64>(),
        };
        let rotation = match config.rotation {
            Some(rotation) => rotation,
            None => rng.random_range(0.0..TAU),
        };
        let mut node = Self {
            id,
            kind: kind.into(),
            sides: angles.len(),
            angles,
            hue,
            rotation,
            coherence: config
                .coherence
                .unwrap_or(DEFAULT_COHERENCE)
                .clamp(0.0, COHERENCE_MAX),
            entropy: config
                .entropy
                .unwrap_or(DEFAULT_ENTROPY)
                .clamp(ENTROPY_MIN, ENTROPY_MAX),
            sandbox: config
                .sandbox
                .unwrap_or(DEFAULT_SANDBOX)
                .clamp(SANDBOX_MIN, SANDBOX_MAX),
            stagnation: 0.0,
            learning_rate: 0.0,
            growth_potential: 0.0,
            pos: config.pos.unwrap_or_default(),
            vel: config.vel.unwrap_or_default(),
            acc: config.acc.unwrap_or_default(),
            mass: config.mass.unwrap_or(DEFAULT_MASS),
            range: config.range.unwrap_or(DEFAULT_RANGE),
            fov: config.fov.unwrap_or(DEFAULT_FOV),
            incubating: true,
            incubation_history: VecDeque::with_capacity(INCUBATION_HISTORY_CAPACITY),
            incubation_score: 0.0,
            region: config.region,
            children: Vec::new(),
            observer: false,
            awareness: Awareness::default(),
            checkpoints: Vec::new(),
            last_state: Vec::new(),
        };
        node.last_state = node.state_vector();
        node.checkpoint(sink, tick);
        Ok(node)
    }

    /// `{hue, rotation, angles…, pos.x, pos.y}`: the vector whose step-to-step
    /// distance defines a node's velocity.
    #[must_use]
    pub fn state_vector(&self) -> Vec<f64> {
        let mut state = Vec::with_capacity(self.angles.len() + 4);
        state.push(self.hue);
        state.push(self.rotation);
        state.extend_from_slice(&self.angles);
        state.push(self.pos.x);
        state.push(self.pos.y);
        state
    }

    /// Distance between the current state vector and the one recorded at the
    /// start of the previous step. Zero when nothing has been recorded or the
    /// geometry changed shape.
    #[must_use]
    pub fn state_velocity(&self) -> f64 {
        let current = self.state_vector();
        if current.len() != self.last_state.len() {
            return 0.0;
        }
        current
            .iter()
            .zip(&self.last_state)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }

    /// Observable fields forwarded to checkpoint sinks.
    #[must_use]
    pub fn observable(&self, tick: Tick) -> CheckpointRecord {
        CheckpointRecord {
            id: self.id,
            tick,
            hue: self.hue,
            rotation: self.rotation,
            coherence: self.coherence,
            entropy: self.entropy,
            sandbox: self.sandbox,
            region: self.region,
            position: self.pos,
            incubating: self.incubating,
        }
    }

    /// Ask `sink` for a token and append it to the audit trail.
    pub fn checkpoint(&mut self, sink: &dyn CheckpointSink, tick: Tick) -> bool {
        match sink.checkpoint(&self.observable(tick)) {
            Some(token) => {
                self.checkpoints.push(token);
                true
            }
            None => false,
        }
    }

    /// Push a health score into the rolling window and refresh the score.
    pub fn record_health(&mut self, health: f64) -> f64 {
        while self.incubation_history.len() >= INCUBATION_HISTORY_CAPACITY {
            self.incubation_history.pop_front();
        }
        self.incubation_history.push_back(health);
        self.incubation_score =
            self.incubation_history.iter().sum::<f64>() / self.incubation_history.len() as f64;
        self.incubation_score
    }

    /// Record `child` as a node this one anchors.
    pub fn adopt(&mut self, child: NodeId) -> bool {
        if child == self.id || self.children.contains(&child) {
            return false;
        }
        self.children.push(child);
        true
    }
}
