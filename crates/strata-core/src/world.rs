//! Generation-at-a-time driver owning the region tree and node population.

use crate::evolve::DEFAULT_CHECKPOINT_PROBABILITY;
use crate::{
    CheckpointSink, ConfigError, Evolved, Node, NodeConfig, NodeId, NullCheckpoint, Region,
    RegionConfig, RegionError, RegionId, RegionTree, StepContext, Tick, evolve,
};
use rand::{RngCore, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use slotmap::{Key, SecondaryMap, SlotMap};
use std::collections::VecDeque;
use std::fmt;
use strata_index::{NeighborhoodIndex, UniformGridIndex};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

const NODE_SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Errors raised by simulation mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Region(#[from] RegionError),
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error("region {0:?} still governs {1} node(s)")]
    RegionInUse(RegionId, usize),
}

/// Static configuration for a simulation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationConfig {
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
    /// Radius used to build each node's spatial neighbor subset.
    pub spatial_radius: f64,
    /// Per-step chance that a node emits a checkpoint.
    pub checkpoint_probability: f64,
    /// Maximum number of recent tick summaries retained in-memory.
    pub history_capacity: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            rng_seed: None,
            spatial_radius: 30.0,
            checkpoint_probability: DEFAULT_CHECKPOINT_PROBABILITY,
            history_capacity: 256,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.spatial_radius.is_finite() && self.spatial_radius > 0.0) {
            return Err(ConfigError::InvalidConfig("spatial_radius must be positive"));
        }
        if !(0.0..=1.0).contains(&self.checkpoint_probability) {
            return Err(ConfigError::InvalidConfig(
                "checkpoint_probability must lie in [0, 1]",
            ));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Population statistics recorded after each step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub tick: Tick,
    pub node_count: usize,
    pub incubating: usize,
    pub thriving: usize,
    pub observers: usize,
    pub mean_coherence: f64,
    pub mean_entropy: f64,
    pub checkpoints: usize,
}

/// Events emitted by a single step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TickEvents {
    pub tick: Tick,
    /// Nodes that left incubation during this step.
    pub graduated: Vec<NodeId>,
    pub checkpoints: usize,
}

/// Aggregate simulation state: regions, nodes and the machinery to advance them.
pub struct Simulation {
    config: SimulationConfig,
    tick: Tick,
    rng: SmallRng,
    regions: RegionTree,
    nodes: SlotMap<NodeId, Node>,
    contributions: SecondaryMap<NodeId, Vec<f64>>,
    index: UniformGridIndex,
    sink: Box<dyn CheckpointSink>,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("region_count", &self.regions.len())
            .field("node_count", &self.nodes.len())
            .finish()
    }
}

impl Simulation {
    /// Instantiate a simulation that discards checkpoints.
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        Self::with_checkpoint_sink(config, Box::new(NullCheckpoint))
    }

    /// Instantiate a simulation forwarding checkpoints to `sink`.
    pub fn with_checkpoint_sink(
        config: SimulationConfig,
        sink: Box<dyn CheckpointSink>,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        let rng = config.seeded_rng();
        let index = UniformGridIndex::new(config.spatial_radius);
        let history = VecDeque::with_capacity(config.history_capacity);
        Ok(Self {
            config,
            tick: Tick::zero(),
            rng,
            regions: RegionTree::new(),
            nodes: SlotMap::with_key(),
            contributions: SecondaryMap::new(),
            index,
            sink,
            history,
        })
    }

    /// Replace the checkpoint sink.
    pub fn set_checkpoint_sink(&mut self, sink: Box<dyn CheckpointSink>) {
        self.sink = sink;
    }

    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub fn regions(&self) -> &RegionTree {
        &self.regions
    }

    /// Read-only view of the node population.
    #[must_use]
    pub fn nodes(&self) -> &SlotMap<NodeId, Node> {
        &self.nodes
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Iterate over retained tick summaries.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    /// Borrow the simulation RNG mutably for deterministic sampling.
    #[must_use]
    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    /// Add a region, optionally under an existing parent.
    pub fn add_region(
        &mut self,
        parent: Option<RegionId>,
        config: RegionConfig,
    ) -> Result<RegionId, SimulationError> {
        Ok(self.regions.insert(parent, config)?)
    }

    /// Remove a leaf region that no node references.
    pub fn remove_region(&mut self, id: RegionId) -> Result<Region, SimulationError> {
        let governed = self
            .nodes
            .values()
            .filter(|node| node.region == Some(id))
            .count();
        if governed > 0 {
            warn!(?id, governed, "refusing to remove region with assigned nodes");
            return Err(SimulationError::RegionInUse(id, governed));
        }
        Ok(self.regions.remove(id)?)
    }

    /// Allow `node` to act as a visibility anchor for `region`.
    pub fn register_observer(
        &mut self,
        region: RegionId,
        node: NodeId,
    ) -> Result<bool, SimulationError> {
        if !self.nodes.contains_key(node) {
            return Err(SimulationError::UnknownNode(node));
        }
        if !self.regions.contains(region) {
            return Err(RegionError::UnknownRegion(region).into());
        }
        Ok(self.regions.register_observer(region, node))
    }

    /// Construct a node and add it to the population.
    pub fn spawn_node(
        &mut self,
        kind: impl Into<String>,
        angles: Vec<f64>,
        config: NodeConfig,
    ) -> Result<NodeId, SimulationError> {
        if let Some(region) = config.region
            && !self.regions.contains(region)
        {
            return Err(RegionError::UnknownRegion(region).into());
        }
        let tick = self.tick;
        let rng = &mut self.rng;
        let sink = self.sink.as_ref();
        let id = self.nodes.try_insert_with_key(|id| {
            Node::new(id, kind, angles, &config, rng, sink, tick)
        })?;
        Ok(id)
    }

    /// Remove a node together with every reference other state holds to it.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(id)?;
        self.contributions.remove(id);
        self.regions.forget_observer(id);
        for other in self.nodes.values_mut() {
            other.children.retain(|child| *child != id);
        }
        Some(node)
    }

    /// Record `child` under `parent` for observer eligibility.
    pub fn adopt(&mut self, parent: NodeId, child: NodeId) -> Result<bool, SimulationError> {
        if !self.nodes.contains_key(child) {
            return Err(SimulationError::UnknownNode(child));
        }
        let node = self
            .nodes
            .get_mut(parent)
            .ok_or(SimulationError::UnknownNode(parent))?;
        Ok(node.adopt(child))
    }

    /// Set the exogenous signals fed to `id` on every subsequent step.
    pub fn set_contributions(
        &mut self,
        id: NodeId,
        values: Vec<f64>,
    ) -> Result<(), SimulationError> {
        if !self.nodes.contains_key(id) {
            return Err(SimulationError::UnknownNode(id));
        }
        self.contributions.insert(id, values);
        Ok(())
    }

    pub fn clear_contributions(&mut self, id: NodeId) -> Option<Vec<f64>> {
        self.contributions.remove(id)
    }

    fn stage_spatial_neighbors(&mut self, handles: &[NodeId]) -> Option<Vec<Vec<usize>>> {
        let positions: Vec<[f64; 3]> = handles
            .iter()
            .map(|id| self.nodes[*id].pos.to_array())
            .collect();
        if let Err(err) = self.index.rebuild(&positions) {
            warn!(%err, "spatial index rebuild failed; using region neighbors only");
            return None;
        }
        let radius_sq = self.config.spatial_radius * self.config.spatial_radius;
        let index = &self.index;
        Some(
            (0..handles.len())
                .into_par_iter()
                .map(|idx| {
                    let mut found = Vec::new();
                    index.neighbors_within(idx, radius_sq, &mut |other, _| found.push(other));
                    found.sort_unstable();
                    found
                })
                .collect(),
        )
    }

    fn stage_region_members(&self, handles: &[NodeId]) -> SecondaryMap<RegionId, Vec<usize>> {
        let mut members: SecondaryMap<RegionId, Vec<usize>> = SecondaryMap::new();
        for (idx, id) in handles.iter().enumerate() {
            if let Some(region) = self.nodes[*id].region
                && self.regions.contains(region)
            {
                match members.get_mut(region) {
                    Some(list) => list.push(idx),
                    None => {
                        members.insert(region, vec![idx]);
                    }
                }
            }
        }
        members
    }

    fn stage_evolve(
        &self,
        handles: &[NodeId],
        members: &SecondaryMap<RegionId, Vec<usize>>,
        spatial: Option<&[Vec<usize>]>,
        step_seed: u64,
        tick: Tick,
    ) -> Vec<Evolved> {
        let nodes = &self.nodes;
        let resolve = |indices: &[usize], skip: usize| -> Vec<&Node> {
            indices
                .iter()
                .filter(|&&other| other != skip)
                .map(|&other| &nodes[handles[other]])
                .collect()
        };

        handles
            .par_iter()
            .enumerate()
            .map(|(idx, id)| {
                let node = &nodes[*id];
                let neighbors = node
                    .region
                    .and_then(|region| members.get(region))
                    .map(|list| resolve(list.as_slice(), idx))
                    .unwrap_or_default();
                let spatial_neighbors = spatial.map(|lists| resolve(lists[idx].as_slice(), idx));
                let contributions = self.contributions.get(*id).map_or(&[][..], Vec::as_slice);

                let mut ctx = StepContext::new(&self.regions, nodes)
                    .with_neighbors(&neighbors)
                    .with_region(node.region)
                    .with_contributions(contributions)
                    .with_sink(self.sink.as_ref(), self.config.checkpoint_probability)
                    .at_tick(tick);
                if let Some(spatial) = spatial_neighbors.as_deref() {
                    ctx = ctx.with_spatial_neighbors(spatial);
                }
                let mut rng = node_rng(step_seed, *id);
                evolve(node, &ctx, &mut rng)
            })
            .collect()
    }

    fn stage_commit(&mut self, handles: &[NodeId], results: Vec<Evolved>) -> TickEvents {
        let mut events = TickEvents::default();
        let mut mean_thetas: SecondaryMap<RegionId, f64> = SecondaryMap::new();
        for (id, evolved) in handles.iter().zip(results) {
            if let (Some(region), Some(band)) = (evolved.node.region, evolved.hue_band) {
                // last node of each region in iteration order is the writer
                mean_thetas.insert(region, band.mean_theta);
            }
            if evolved.graduated {
                info!(node = ?id, score = evolved.node.incubation_score, "node left incubation");
                events.graduated.push(*id);
            }
            if evolved.checkpointed {
                events.checkpoints += 1;
            }
            let was_observer = self.nodes[*id].observer;
            let node = evolved.node;
            if node.observer != was_observer
                && let Some(region) = node.region
            {
                if node.observer {
                    trace!(node = ?id, ?region, "registering observer");
                    self.regions.register_observer(region, *id);
                } else {
                    trace!(node = ?id, ?region, "unregistering observer");
                    self.regions.unregister_observer(region, *id);
                }
            }
            self.nodes[*id] = node;
        }
        for (region, theta) in mean_thetas {
            self.regions.commit_mean_theta(region, theta);
        }
        events
    }

    fn stage_history(&mut self, tick: Tick, checkpoints: usize) {
        let node_count = self.nodes.len();
        let (mut incubating, mut thriving, mut observers) = (0, 0, 0);
        let (mut coherence, mut entropy) = (0.0, 0.0);
        for node in self.nodes.values() {
            incubating += usize::from(node.incubating);
            thriving += usize::from(node.awareness.thriving);
            observers += usize::from(node.observer);
            coherence += node.coherence;
            entropy += node.entropy;
        }
        let denom = node_count.max(1) as f64;
        let summary = TickSummary {
            tick,
            node_count,
            incubating,
            thriving,
            observers,
            mean_coherence: coherence / denom,
            mean_entropy: entropy / denom,
            checkpoints,
        };
        debug!(
            tick = tick.0,
            nodes = node_count,
            incubating,
            thriving,
            mean_coherence = summary.mean_coherence,
            "step complete"
        );
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
    }

    /// Advance every node by one step against the frozen current population.
    pub fn step(&mut self) -> TickEvents {
        let next_tick = self.tick.next();
        let handles: Vec<NodeId> = self.nodes.keys().collect();
        let step_seed = self.rng.next_u64();

        let spatial = self.stage_spatial_neighbors(&handles);
        let members = self.stage_region_members(&handles);
        let results = self.stage_evolve(&handles, &members, spatial.as_deref(), step_seed, next_tick);
        let mut events = self.stage_commit(&handles, results);
        self.stage_history(next_tick, events.checkpoints);

        self.tick = next_tick;
        events.tick = next_tick;
        events
    }

    /// Run `steps` consecutive steps, returning the events of each.
    pub fn run(&mut self, steps: usize) -> Vec<TickEvents> {
        (0..steps).map(|_| self.step()).collect()
    }
}

/// Per-node RNG for one step, independent of evaluation order.
fn node_rng(step_seed: u64, id: NodeId) -> SmallRng {
    SmallRng::seed_from_u64(step_seed ^ id.data().as_ffi().wrapping_mul(NODE_SEED_MIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CheckpointRecord, CheckpointToken, Vec3};
    use std::f64::consts::FRAC_PI_3;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn seeded(seed: u64) -> Simulation {
        Simulation::new(SimulationConfig {
            rng_seed: Some(seed),
            ..SimulationConfig::default()
        })
        .expect("simulation")
    }

    fn triangle() -> Vec<f64> {
        vec![FRAC_PI_3; 3]
    }

    #[test]
    fn config_validation() {
        assert!(SimulationConfig::default().validate().is_ok());
        for config in [
            SimulationConfig {
                spatial_radius: 0.0,
                ..SimulationConfig::default()
            },
            SimulationConfig {
                checkpoint_probability: 1.5,
                ..SimulationConfig::default()
            },
            SimulationConfig {
                history_capacity: 0,
                ..SimulationConfig::default()
            },
        ] {
            assert!(matches!(
                Simulation::new(config),
                Err(SimulationError::Config(ConfigError::InvalidConfig(_)))
            ));
        }
    }

    #[test]
    fn config_loads_from_json() {
        let config: SimulationConfig = serde_json::from_str(
            r#"{"rng_seed":7,"spatial_radius":12.5,"checkpoint_probability":0.0,"history_capacity":8}"#,
        )
        .expect("json");
        assert_eq!(config.rng_seed, Some(7));
        assert_eq!(config.spatial_radius, 12.5);
        assert!(config.validate().is_ok());

        let node: NodeConfig =
            serde_json::from_str(r#"{"hue":0.4,"mass":2.0}"#).expect("node json");
        assert_eq!(node.hue, Some(0.4));
        assert_eq!(node.mass, Some(2.0));
        assert!(node.region.is_none());
    }

    #[test]
    fn spawn_rejects_unknown_region_and_bad_config() {
        let mut sim = seeded(1);
        let region = sim.add_region(None, RegionConfig::default()).expect("region");
        sim.remove_region(region).expect("remove");
        let err = sim
            .spawn_node(
                "tri",
                triangle(),
                NodeConfig {
                    region: Some(region),
                    ..NodeConfig::default()
                },
            )
            .unwrap_err();
        assert_eq!(err, SimulationError::Region(RegionError::UnknownRegion(region)));

        let err = sim
            .spawn_node(
                "tri",
                triangle(),
                NodeConfig {
                    mass: Some(-1.0),
                    ..NodeConfig::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, SimulationError::Config(_)));
        assert_eq!(sim.node_count(), 0);
    }

    #[test]
    fn spawned_node_id_matches_key() {
        let mut sim = seeded(2);
        let id = sim
            .spawn_node("tri", triangle(), NodeConfig::default())
            .expect("node");
        assert_eq!(sim.node(id).expect("node").id, id);
    }

    #[test]
    fn region_removal_refused_while_governing_nodes() {
        let mut sim = seeded(3);
        let region = sim.add_region(None, RegionConfig::default()).expect("region");
        let node = sim
            .spawn_node(
                "tri",
                triangle(),
                NodeConfig {
                    region: Some(region),
                    ..NodeConfig::default()
                },
            )
            .expect("node");
        assert_eq!(
            sim.remove_region(region).unwrap_err(),
            SimulationError::RegionInUse(region, 1)
        );
        sim.remove_node(node).expect("removed");
        sim.remove_region(region).expect("region removed");
    }

    #[test]
    fn step_advances_tick_and_records_history() {
        let mut sim = Simulation::new(SimulationConfig {
            rng_seed: Some(4),
            history_capacity: 3,
            ..SimulationConfig::default()
        })
        .expect("simulation");
        let region = sim.add_region(None, RegionConfig::default()).expect("region");
        for i in 0..4 {
            sim.spawn_node(
                "tri",
                triangle(),
                NodeConfig {
                    region: Some(region),
                    pos: Some(Vec3::new(i as f64 * 2.0, 0.0, 0.0)),
                    ..NodeConfig::default()
                },
            )
            .expect("node");
        }
        let events = sim.run(5);
        assert_eq!(events.len(), 5);
        assert_eq!(events[4].tick, Tick(5));
        assert_eq!(sim.tick(), Tick(5));
        let history: Vec<_> = sim.history().collect();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].tick, Tick(5));
        assert_eq!(history[2].node_count, 4);
        assert!(sim.regions().get(region).and_then(Region::mean_theta).is_some());
    }

    #[test]
    fn step_commits_mean_theta_from_last_region_member() {
        let mut sim = seeded(5);
        let region = sim.add_region(None, RegionConfig::default()).expect("region");
        let ids: Vec<NodeId> = [0.2, 1.4]
            .into_iter()
            .map(|rotation| {
                sim.spawn_node(
                    "tri",
                    triangle(),
                    NodeConfig {
                        region: Some(region),
                        rotation: Some(rotation),
                        pos: Some(Vec3::new(rotation * 100.0, 0.0, 0.0)),
                        ..NodeConfig::default()
                    },
                )
                .expect("node")
            })
            .collect();
        let before = sim.regions().clone();
        let expected = {
            let last = &sim.nodes()[ids[1]];
            let first = &sim.nodes()[ids[0]];
            let nudged = last.rotation + 0.04 * (first.rotation - last.rotation);
            before
                .allowed_hue_band(region, &[first.rotation, nudged], 50.0)
                .expect("band")
                .mean_theta
        };
        sim.step();
        let committed = sim
            .regions()
            .get(region)
            .and_then(Region::mean_theta)
            .expect("mean");
        assert!((committed - expected).abs() < 1e-12);
    }

    #[test]
    fn contributions_feed_coherence() {
        let mut sim = seeded(6);
        let fed = sim
            .spawn_node("tri", triangle(), NodeConfig::default())
            .expect("node");
        let starved = sim
            .spawn_node(
                "tri",
                triangle(),
                NodeConfig {
                    pos: Some(Vec3::new(200.0, 0.0, 0.0)),
                    ..NodeConfig::default()
                },
            )
            .expect("node");
        sim.set_contributions(fed, vec![4.0, 6.0]).expect("contributions");
        sim.step();
        assert!(sim.node(fed).expect("fed").coherence > 0.0);
        assert_eq!(sim.node(starved).expect("starved").coherence, 0.0);
        assert_eq!(sim.clear_contributions(fed), Some(vec![4.0, 6.0]));
    }

    #[test]
    fn observer_flag_syncs_region_registry() {
        let mut sim = seeded(7);
        let region = sim.add_region(None, RegionConfig::default()).expect("region");
        let anchor = sim
            .spawn_node(
                "tri",
                triangle(),
                NodeConfig {
                    region: Some(region),
                    coherence: Some(90.0),
                    ..NodeConfig::default()
                },
            )
            .expect("anchor");
        for i in 0..3 {
            let child = sim
                .spawn_node(
                    "tri",
                    triangle(),
                    NodeConfig {
                        pos: Some(Vec3::new(100.0 + i as f64 * 50.0, 0.0, 0.0)),
                        ..NodeConfig::default()
                    },
                )
                .expect("child");
            assert!(sim.adopt(anchor, child).expect("adopt"));
        }
        sim.set_contributions(anchor, vec![50.0]).expect("contributions");
        sim.step();
        assert!(sim.node(anchor).expect("anchor").observer);
        let registered: Vec<_> = sim.regions().get(region).expect("region").observers().collect();
        assert_eq!(registered, vec![anchor]);

        sim.clear_contributions(anchor);
        sim.step();
        assert!(!sim.node(anchor).expect("anchor").observer);
        assert_eq!(sim.regions().get(region).expect("region").observers().count(), 0);
    }

    #[test]
    fn removing_node_clears_references() {
        let mut sim = seeded(8);
        let region = sim.add_region(None, RegionConfig::default()).expect("region");
        let parent = sim
            .spawn_node("tri", triangle(), NodeConfig::default())
            .expect("parent");
        let child = sim
            .spawn_node("tri", triangle(), NodeConfig::default())
            .expect("child");
        sim.adopt(parent, child).expect("adopt");
        sim.register_observer(region, child).expect("observer");
        sim.set_contributions(child, vec![1.0]).expect("contributions");

        sim.remove_node(child).expect("removed");
        assert!(sim.node(parent).expect("parent").children.is_empty());
        assert_eq!(sim.regions().get(region).expect("region").observers().count(), 0);
        assert!(sim.clear_contributions(child).is_none());
        assert_eq!(
            sim.adopt(parent, child).unwrap_err(),
            SimulationError::UnknownNode(child)
        );
    }

    #[derive(Default)]
    struct CountingSink(Arc<AtomicUsize>);

    impl CheckpointSink for CountingSink {
        fn checkpoint(&self, record: &CheckpointRecord) -> Option<CheckpointToken> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            Some(CheckpointToken(format!("{}:{}", record.tick.0, n)))
        }
    }

    #[test]
    fn checkpoints_flow_through_sink() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut sim = Simulation::with_checkpoint_sink(
            SimulationConfig {
                rng_seed: Some(9),
                checkpoint_probability: 1.0,
                ..SimulationConfig::default()
            },
            Box::new(CountingSink(Arc::clone(&counter))),
        )
        .expect("simulation");
        let id = sim
            .spawn_node("tri", triangle(), NodeConfig::default())
            .expect("node");
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let events = sim.step();
        assert_eq!(events.checkpoints, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(sim.node(id).expect("node").checkpoints.len(), 2);
        assert_eq!(sim.history().last().expect("summary").checkpoints, 1);
    }
}
