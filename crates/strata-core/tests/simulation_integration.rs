use rand::Rng;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_3};
use strata_core::{
    INCUBATION_HISTORY_CAPACITY, NodeConfig, NodeId, RegionConfig, RegionError, Simulation,
    SimulationConfig, SimulationError, Tick, Vec3, WORLD_RADIUS,
};

const MOVER_STRIDE: usize = 6;

/// Every `MOVER_STRIDE`-th node starts fully coherent, drifting and strongly fed, so it
/// leaves incubation within a few steps.
fn is_mover(i: usize) -> bool {
    i % MOVER_STRIDE == MOVER_STRIDE - 1
}

fn populated(seed: u64, nodes: usize) -> (Simulation, Vec<NodeId>) {
    let mut sim = Simulation::new(SimulationConfig {
        rng_seed: Some(seed),
        checkpoint_probability: 0.1,
        ..SimulationConfig::default()
    })
    .expect("simulation");
    let root = sim
        .add_region(
            None,
            RegionConfig {
                field_center: Some(Vec3::ZERO),
                field_strength: Some(0.05),
                ..RegionConfig::default()
            },
        )
        .expect("root");
    let inner = sim.add_region(Some(root), RegionConfig::default()).expect("inner");
    let leaf = sim.add_region(Some(inner), RegionConfig::default()).expect("leaf");
    let regions = [Some(root), Some(inner), Some(leaf), None];

    let mut ids = Vec::with_capacity(nodes);
    for i in 0..nodes {
        let (x, y, z) = {
            let rng = sim.rng();
            (
                rng.random_range(-120.0..120.0),
                rng.random_range(-120.0..120.0),
                rng.random_range(-10.0..10.0),
            )
        };
        let angles = if i % 2 == 0 {
            vec![FRAC_PI_3; 3]
        } else {
            vec![FRAC_PI_2; 4]
        };
        let mover = is_mover(i);
        let id = sim
            .spawn_node(
                "shape",
                angles,
                NodeConfig {
                    pos: Some(Vec3::new(x, y, z)),
                    vel: mover.then(|| Vec3::new(2.0, 0.0, 0.0)),
                    coherence: Some(if mover { 100.0 } else { (i * 13 % 100) as f64 }),
                    region: regions[i % regions.len()],
                    ..NodeConfig::default()
                },
            )
            .expect("node");
        ids.push(id);
    }
    for (i, id) in ids.iter().enumerate() {
        let values = if is_mover(i) {
            vec![50.0, 50.0]
        } else {
            let signal = (i % 7) as f64 * 1.5;
            vec![signal, signal * 0.5]
        };
        sim.set_contributions(*id, values).expect("contributions");
    }
    (sim, ids)
}

#[test]
fn bounded_state_holds_across_many_steps() {
    for seed in [0x5EED, 7, 0xC0FFEE] {
        check_bounded_run(seed);
    }
}

fn check_bounded_run(seed: u64) {
    let (mut sim, ids) = populated(seed, 48);
    let mut graduated = vec![false; ids.len()];

    for _ in 0..120 {
        let events = sim.step();
        for id in &events.graduated {
            let idx = ids.iter().position(|candidate| candidate == id).expect("known");
            assert!(!graduated[idx], "a node graduates at most once");
            graduated[idx] = true;
        }

        for (idx, id) in ids.iter().enumerate() {
            let node = sim.node(*id).expect("node");
            assert!((0.0..1.0).contains(&node.hue), "hue {}", node.hue);
            assert!((0.0..=100.0).contains(&node.coherence));
            assert!((0.1..=1000.0).contains(&node.entropy));
            assert!((0.3..=10.0).contains(&node.sandbox));
            assert!((0.0..=1.0).contains(&node.stagnation));
            assert!(node.pos.length() <= WORLD_RADIUS + 1e-9);
            assert!(node.incubation_history.len() <= INCUBATION_HISTORY_CAPACITY);
            if node.incubating {
                assert!(node.sandbox <= 1.2 + 1e-12);
                assert!(!graduated[idx], "incubation never resumes");
            }
        }
    }

    assert_eq!(sim.tick(), Tick(120));
    let graduates = graduated.iter().filter(|g| **g).count();
    assert!(
        graduates >= 48 / MOVER_STRIDE,
        "seed {seed}: only {graduates} node(s) left incubation"
    );
    for (idx, id) in ids.iter().enumerate() {
        let node = sim.node(*id).expect("node");
        assert_eq!(node.incubating, !graduated[idx]);
    }
    for id in &ids {
        assert_eq!(
            sim.node(*id).expect("node").incubation_history.len(),
            INCUBATION_HISTORY_CAPACITY
        );
    }
}

#[test]
fn seeded_runs_are_reproducible() {
    let (mut first, first_ids) = populated(42, 32);
    let (mut second, second_ids) = populated(42, 32);
    first.run(60);
    second.run(60);

    let first_history: Vec<_> = first.history().cloned().collect();
    let second_history: Vec<_> = second.history().cloned().collect();
    assert_eq!(first_history, second_history);

    for (a, b) in first_ids.iter().zip(&second_ids) {
        let a = first.node(*a).expect("node");
        let b = second.node(*b).expect("node");
        assert_eq!(a.pos, b.pos);
        assert_eq!(a.hue.to_bits(), b.hue.to_bits());
        assert_eq!(a.rotation.to_bits(), b.rotation.to_bits());
        assert_eq!(a.coherence.to_bits(), b.coherence.to_bits());
        assert_eq!(a.incubating, b.incubating);
    }
}

#[test]
fn different_seeds_diverge() {
    let (mut first, first_ids) = populated(1, 16);
    let (mut second, second_ids) = populated(2, 16);
    first.run(10);
    second.run(10);
    let differs = first_ids
        .iter()
        .zip(&second_ids)
        .any(|(a, b)| first.node(*a).map(|n| n.pos) != second.node(*b).map(|n| n.pos));
    assert!(differs);
}

#[test]
fn close_pair_pushes_apart() {
    let mut sim = Simulation::new(SimulationConfig {
        rng_seed: Some(7),
        ..SimulationConfig::default()
    })
    .expect("simulation");
    let left = sim
        .spawn_node(
            "tri",
            vec![FRAC_PI_3; 3],
            NodeConfig {
                pos: Some(Vec3::new(-1.0, 0.0, 0.0)),
                ..NodeConfig::default()
            },
        )
        .expect("left");
    let right = sim
        .spawn_node(
            "tri",
            vec![FRAC_PI_3; 3],
            NodeConfig {
                pos: Some(Vec3::new(1.0, 0.0, 0.0)),
                ..NodeConfig::default()
            },
        )
        .expect("right");

    sim.step();
    let left = sim.node(left).expect("left");
    let right = sim.node(right).expect("right");
    assert!(left.pos.x < -1.0);
    assert!(right.pos.x > 1.0);
    assert!(left.pos.distance(right.pos) > 2.0);
}

#[test]
fn region_tree_removal_rules() {
    let mut sim = Simulation::new(SimulationConfig::default()).expect("simulation");
    let root = sim.add_region(None, RegionConfig::default()).expect("root");
    let child = sim.add_region(Some(root), RegionConfig::default()).expect("child");
    assert_eq!(
        sim.remove_region(root).unwrap_err(),
        SimulationError::Region(RegionError::HasChildren(root, 1))
    );

    let node = sim
        .spawn_node(
            "tri",
            vec![FRAC_PI_3; 3],
            NodeConfig {
                region: Some(child),
                ..NodeConfig::default()
            },
        )
        .expect("node");
    assert_eq!(
        sim.remove_region(child).unwrap_err(),
        SimulationError::RegionInUse(child, 1)
    );

    sim.remove_node(node).expect("node removed");
    sim.remove_region(child).expect("child removed");
    sim.remove_region(root).expect("root removed");
    assert!(sim.regions().is_empty());
}

#[test]
fn empty_simulation_steps() {
    let mut sim = Simulation::new(SimulationConfig {
        rng_seed: Some(3),
        ..SimulationConfig::default()
    })
    .expect("simulation");
    let events = sim.step();
    assert_eq!(events.tick, Tick(1));
    assert!(events.graduated.is_empty());
    let summary = sim.history().last().expect("summary");
    assert_eq!(summary.node_count, 0);
    assert_eq!(summary.mean_coherence, 0.0);
}
