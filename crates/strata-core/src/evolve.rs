//! The per-node evolution step: a pure map from a node, its neighbors and its
//! region to the node's next state.

use crate::node::{COHERENCE_MAX, ENTROPY_MAX, ENTROPY_MIN, SANDBOX_MAX, SANDBOX_MIN};
use crate::region::ROOT_NOISE;
use crate::{
    Awareness, CheckpointSink, HueBand, Node, NodeId, NullCheckpoint, Region, RegionId, RegionTree,
    Tick, Vec3, WORLD_RADIUS, WORLD_RECLAMP_RADIUS, clamp01, finite_or_zero, hue_difference, mean,
    saturate, wrap_signed_angle, wrap_unit,
};
use rand::Rng;
use slotmap::SlotMap;

/// Chance that a step emits a checkpoint when no override is configured.
pub const DEFAULT_CHECKPOINT_PROBABILITY: f64 = 0.02;

const STAGNATION_VELOCITY: f64 = 0.001;
const STAGNATION_RISE: f64 = 0.05;
const STAGNATION_FALL: f64 = 0.04;
const IDLE_LEARNING_DRIVE: f64 = 0.3;
const CONTRIBUTION_SCALE: f64 = 10.0;
const GROWTH_STAGNATION_OFFSET: f64 = 0.1;

const ALIGNMENT_RATE: f64 = 0.04;
const HUE_BAND_RATE: f64 = 0.018;

const COHESION_GAIN: f64 = 0.002;
const REPULSION_RADIUS: f64 = 6.0;
const REPULSION_GAIN: f64 = 0.02;

const HORIZON_COHERENCE: f64 = 75.0;
const HORIZON_GROWTH: f64 = 1.2;
const HORIZON_ROTATION_RATE: f64 = 0.008;
const HORIZON_HUE_RATE: f64 = 0.006;

const BREAKTHROUGH_COHERENCE: f64 = 92.0;
const BREAKTHROUGH_STAGNATION: f64 = 0.8;
const BREAKTHROUGH_ROTATION: f64 = 0.1;
const BREAKTHROUGH_ENTROPY: f64 = 0.1;

const JITTER_DISORDER_GAIN: f64 = 1.5;
const VELOCITY_DAMPING: f64 = 0.98;
const MASS_EPSILON: f64 = 1e-9;

const GAZE_MIN_COHERENCE: f64 = 80.0;
const GROWTH_COHERENCE_GAIN: f64 = 0.01;

const SANDBOX_COHERENCE: f64 = 80.0;
const SANDBOX_GROWTH: f64 = 1.006;
const SANDBOX_SHRINK: f64 = 0.994;

const OBSERVER_COHERENCE: f64 = 85.0;
const OBSERVER_MIN_CHILDREN: usize = 3;

const HEALTH_ENTROPY_SCALE: f64 = 10.0;
const INCUBATION_SCORE_THRESHOLD: f64 = 0.85;
const INCUBATION_GROWTH_THRESHOLD: f64 = 1.0;
const INCUBATION_SANDBOX_CAP: f64 = 1.2;

const THRIVING_COHERENCE: f64 = 65.0;
const THRIVING_GROWTH: f64 = 1.0;
const THRIVING_STAGNATION: f64 = 0.6;
const THRIVING_SELF_COHERENCE: f64 = 80.0;

/// Everything a node's step reads besides the node itself. All references
/// point into the frozen pre-step snapshot.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    /// Other nodes in the same region.
    pub neighbors: &'a [&'a Node],
    /// Nodes within the spatial radius; falls back to `neighbors` when absent.
    pub spatial_neighbors: Option<&'a [&'a Node]>,
    pub regions: &'a RegionTree,
    /// Owning region, if any.
    pub region: Option<RegionId>,
    /// Exogenous reinforcement signals. Non-finite entries count as zero.
    pub contributions: &'a [f64],
    /// Lookup used to resolve region observers.
    pub all_nodes: &'a SlotMap<NodeId, Node>,
    pub sink: &'a dyn CheckpointSink,
    pub checkpoint_probability: f64,
    pub tick: Tick,
}

impl<'a> StepContext<'a> {
    /// Context with no neighbors, region, contributions or checkpoint sink.
    #[must_use]
    pub fn new(regions: &'a RegionTree, all_nodes: &'a SlotMap<NodeId, Node>) -> Self {
        Self {
            neighbors: &[],
            spatial_neighbors: None,
            regions,
            region: None,
            contributions: &[],
            all_nodes,
            sink: &NullCheckpoint,
            checkpoint_probability: DEFAULT_CHECKPOINT_PROBABILITY,
            tick: Tick::zero(),
        }
    }

    #[must_use]
    pub fn with_neighbors(mut self, neighbors: &'a [&'a Node]) -> Self {
        self.neighbors = neighbors;
        self
    }

    #[must_use]
    pub fn with_spatial_neighbors(mut self, spatial: &'a [&'a Node]) -> Self {
        self.spatial_neighbors = Some(spatial);
        self
    }

    #[must_use]
    pub fn with_region(mut self, region: Option<RegionId>) -> Self {
        self.region = region;
        self
    }

    #[must_use]
    pub fn with_contributions(mut self, contributions: &'a [f64]) -> Self {
        self.contributions = contributions;
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: &'a dyn CheckpointSink, probability: f64) -> Self {
        self.sink = sink;
        self.checkpoint_probability = probability;
        self
    }

    #[must_use]
    pub fn at_tick(mut self, tick: Tick) -> Self {
        self.tick = tick;
        self
    }
}

/// Result of one evolution step.
#[derive(Debug, Clone)]
pub struct Evolved {
    pub node: Node,
    /// Band computed against the owning region; its `mean_theta` is what the
    /// driver may commit back onto the region.
    pub hue_band: Option<HueBand>,
    /// The node left incubation during this step.
    pub graduated: bool,
    /// A checkpoint token was appended during this step.
    pub checkpointed: bool,
}

/// Advance `node` by one step. The input is never mutated; randomness is drawn
/// only from `rng`.
pub fn evolve<R: Rng + ?Sized>(node: &Node, ctx: &StepContext<'_>, rng: &mut R) -> Evolved {
    let mut next = node.clone();
    let region: Option<(RegionId, &Region)> = ctx
        .region
        .and_then(|id| ctx.regions.get(id).map(|r| (id, r)));
    let contributions: Vec<f64> = ctx.contributions.iter().copied().map(finite_or_zero).collect();
    let alignment = clamp01(node.coherence / COHERENCE_MAX);

    let velocity = node.state_velocity();
    next.last_state = node.state_vector();
    let stagnation_delta = if velocity < STAGNATION_VELOCITY {
        STAGNATION_RISE
    } else {
        -STAGNATION_FALL
    };
    next.stagnation = clamp01(finite_or_zero(node.stagnation) + stagnation_delta);

    let drive = mean(contributions.iter().copied())
        .map_or(IDLE_LEARNING_DRIVE, |m| m / CONTRIBUTION_SCALE);
    next.learning_rate = (velocity * drive).max(0.0);

    next.entropy = saturate(
        (1.0 - alignment) * (1.0 + 2.0 * next.stagnation) * (1.0 - next.learning_rate),
        ENTROPY_MIN,
        ENTROPY_MAX,
    );

    next.growth_potential =
        next.entropy * next.learning_rate / (next.stagnation + GROWTH_STAGNATION_OFFSET);

    if let Some(mean_rotation) = mean(ctx.neighbors.iter().map(|n| n.rotation)) {
        next.rotation += ALIGNMENT_RATE * (mean_rotation - next.rotation);
    }

    let mut rotation_samples: Vec<f64> = ctx.neighbors.iter().map(|n| n.rotation).collect();
    rotation_samples.push(next.rotation);
    let mut coherences: Vec<f64> = ctx.neighbors.iter().map(|n| n.coherence).collect();
    coherences.push(node.coherence);
    let coherence_estimate = mean(coherences.into_iter()).unwrap_or(node.coherence);

    let band = region.and_then(|(id, _)| {
        ctx.regions
            .allowed_hue_band(id, &rotation_samples, coherence_estimate)
    });
    if let Some(band) = band {
        next.hue = wrap_unit(next.hue + HUE_BAND_RATE * hue_difference(band.center, next.hue));
    }

    let mut force = Vec3::ZERO;
    let spatial: Vec<&Node> = ctx
        .spatial_neighbors
        .unwrap_or(ctx.neighbors)
        .iter()
        .copied()
        .filter(|other| other.id != node.id)
        .collect();

    if !spatial.is_empty() {
        let sum = spatial.iter().fold(Vec3::ZERO, |acc, other| acc + other.pos);
        let centroid = sum * (1.0 / spatial.len() as f64);
        force += (centroid - node.pos).normalize() * (COHESION_GAIN * alignment);
    }

    for other in &spatial {
        let separation = node.pos - other.pos;
        let distance = separation.length();
        if distance < REPULSION_RADIUS {
            force += separation.normalize() * (REPULSION_GAIN * (REPULSION_RADIUS - distance));
        }
    }

    if let Some((id, _)) = region {
        force += ctx.regions.field_at(id, node.pos);
    }

    let mut horizon_pull = 0.0;
    if node.coherence > HORIZON_COHERENCE
        && next.growth_potential > HORIZON_GROWTH
        && let Some(parent_id) = region.and_then(|(_, r)| r.parent())
        && let Some(parent) = ctx.regions.get(parent_id)
    {
        let rotation_shift = HORIZON_ROTATION_RATE
            * wrap_signed_angle(parent.mean_theta().unwrap_or(0.0) - next.rotation);
        let hue_shift = ctx
            .regions
            .allowed_hue_band(parent_id, &rotation_samples, coherence_estimate)
            .map_or(0.0, |b| HORIZON_HUE_RATE * hue_difference(b.center, next.hue));
        next.rotation += rotation_shift;
        next.hue = wrap_unit(next.hue + hue_shift);
        horizon_pull = rotation_shift.abs() + hue_shift.abs();
    }

    if node.coherence > BREAKTHROUGH_COHERENCE && next.stagnation > BREAKTHROUGH_STAGNATION {
        next.rotation += rng.random_range(-BREAKTHROUGH_ROTATION..=BREAKTHROUGH_ROTATION);
        next.entropy = (next.entropy + BREAKTHROUGH_ENTROPY).min(ENTROPY_MAX);
    }

    let noise = region.map_or(ROOT_NOISE, |(_, r)| r.noise());
    let jitter = noise * (1.0 + JITTER_DISORDER_GAIN * (1.0 - alignment));
    force.x += rng.random_range(-1.0..1.0) * jitter;
    force.y += rng.random_range(-1.0..1.0) * jitter;

    next.acc = force * (1.0 / node.mass.max(MASS_EPSILON));
    next.vel = node.vel * VELOCITY_DAMPING + next.acc;
    next.pos = node.pos + next.vel;
    let radius = next.pos.length();
    if radius.is_nan() || radius > WORLD_RADIUS {
        next.pos = next.pos.normalize() * WORLD_RECLAMP_RADIUS;
    }

    let gaze_intensity = region.map_or(0.0, |(_, r)| observer_gaze(&next, r, ctx.all_nodes));

    let total: f64 = contributions.iter().sum();
    next.coherence = saturate(
        CONTRIBUTION_SCALE * total / (next.entropy + 1.0)
            * (1.0 + GROWTH_COHERENCE_GAIN * next.growth_potential),
        0.0,
        COHERENCE_MAX,
    );

    let sandbox = if next.coherence > SANDBOX_COHERENCE {
        node.sandbox * SANDBOX_GROWTH
    } else {
        node.sandbox * SANDBOX_SHRINK
    };
    next.sandbox = saturate(sandbox, SANDBOX_MIN, SANDBOX_MAX);

    next.observer =
        next.coherence > OBSERVER_COHERENCE && next.children.len() >= OBSERVER_MIN_CHILDREN;

    let health = clamp01(
        next.coherence / COHERENCE_MAX
            * (1.0 - next.entropy / HEALTH_ENTROPY_SCALE)
            * (1.0 - next.stagnation),
    );
    let score = next.record_health(health);
    let graduated = next.incubating
        && score > INCUBATION_SCORE_THRESHOLD
        && next.growth_potential > INCUBATION_GROWTH_THRESHOLD;
    if graduated {
        next.incubating = false;
    }
    if next.incubating {
        next.sandbox = next.sandbox.min(INCUBATION_SANDBOX_CAP);
    }

    next.hue = wrap_unit(next.hue);
    let hue_convergence = band.map_or(0.0, |b| {
        if b.half_width > 0.0 {
            1.0 - (next.hue - b.center).abs() / b.half_width
        } else {
            0.0
        }
    });
    next.awareness = Awareness {
        velocity,
        alignment_score: next.coherence / COHERENCE_MAX,
        hue_convergence,
        gaze_intensity,
        thriving: next.coherence > THRIVING_COHERENCE
            && next.growth_potential > THRIVING_GROWTH
            && next.stagnation < THRIVING_STAGNATION
            && (horizon_pull != 0.0 || next.coherence > THRIVING_SELF_COHERENCE),
    };

    let roll: f64 = rng.random();
    let checkpointed = roll < ctx.checkpoint_probability && next.checkpoint(ctx.sink, ctx.tick);

    Evolved {
        node: next,
        hue_band: band,
        graduated,
        checkpointed,
    }
}

/// Sum of gaze from the region's qualifying observers onto `target`.
fn observer_gaze(target: &Node, region: &Region, all_nodes: &SlotMap<NodeId, Node>) -> f64 {
    region
        .observers()
        .filter(|id| *id != target.id)
        .filter_map(|id| all_nodes.get(id))
        .filter_map(|observer| gaze_contribution(observer, target.pos))
        .sum()
}

fn gaze_contribution(observer: &Node, target: Vec3) -> Option<f64> {
    if observer.coherence <= GAZE_MIN_COHERENCE {
        return None;
    }
    let offset = target - observer.pos;
    let distance = offset.length();
    if distance > observer.range {
        return None;
    }
    let forward = Vec3::new(observer.rotation.cos(), observer.rotation.sin(), 0.0);
    let direction = Vec3::new(offset.x, offset.y, 0.0).normalize();
    let angle = if direction == Vec3::ZERO {
        0.0
    } else {
        forward.dot(direction).clamp(-1.0, 1.0).acos()
    };
    (angle <= observer.fov / 2.0)
        .then(|| observer.coherence / COHERENCE_MAX * (1.0 - distance / observer.range))
}
