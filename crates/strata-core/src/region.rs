//! Region tree: parameter inheritance, composed attraction fields and hue banding.

use crate::{ConfigError, NodeId, RegionId, Vec3, clamp01, finite_or_zero, wrap_unit};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::BTreeSet;
use std::f64::consts::TAU;
use thiserror::Error;

/// Compliance coefficient given to a root region without an explicit kappa.
pub const ROOT_KAPPA: f64 = 1.0;
/// Noise level given to a root region without an explicit noise.
pub const ROOT_NOISE: f64 = 0.01;
/// Fraction of the parent's kappa a child inherits when none is configured.
pub const KAPPA_INHERITANCE: f64 = 0.92;
/// Per-generation decay applied to ancestor weights in [`RegionTree::effective_kappa_at`].
pub const KAPPA_GENERATION_DECAY: f64 = 0.88;

const FIELD_FALLOFF: f64 = 0.01;
const FIELD_EPSILON: f64 = 1e-9;
const CIRCULAR_EPSILON: f64 = 1e-12;
const SPREAD_BASE: f64 = 0.2;
const SPREAD_GAIN: f64 = 0.8;
const SPREAD_MIN: f64 = 0.05;
const SPREAD_MAX: f64 = 1.5;
const KAPPA_COMPRESSION: f64 = 8.0;

/// Errors raised by region tree mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegionError {
    #[error("unknown region {0:?}")]
    UnknownRegion(RegionId),
    #[error("unknown parent region {0:?}")]
    UnknownParent(RegionId),
    #[error("region {0:?} still has {1} child region(s)")]
    HasChildren(RegionId, usize),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Optional overrides applied when creating a region.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RegionConfig {
    /// Compliance coefficient. Defaults to `0.92 × parent.kappa`, or [`ROOT_KAPPA`] at the root.
    pub kappa: Option<f64>,
    /// Motion noise. Defaults to the parent's noise, or [`ROOT_NOISE`] at the root.
    pub noise: Option<f64>,
    /// Centre of this region's attraction basin. Defaults to the origin.
    pub field_center: Option<Vec3>,
    /// Peak attraction strength. Defaults to zero.
    pub field_strength: Option<f64>,
}

impl RegionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(kappa) = self.kappa
            && !(kappa.is_finite() && kappa >= 0.0)
        {
            return Err(ConfigError::InvalidConfig(
                "kappa must be finite and non-negative",
            ));
        }
        if let Some(noise) = self.noise
            && !(noise.is_finite() && noise >= 0.0)
        {
            return Err(ConfigError::InvalidConfig(
                "noise must be finite and non-negative",
            ));
        }
        if let Some(center) = self.field_center
            && !center.is_finite()
        {
            return Err(ConfigError::InvalidConfig("field_center must be finite"));
        }
        if let Some(strength) = self.field_strength
            && !(strength.is_finite() && strength >= 0.0)
        {
            return Err(ConfigError::InvalidConfig(
                "field_strength must be finite and non-negative",
            ));
        }
        Ok(())
    }
}

/// A node in the parameter-inheritance tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    id: RegionId,
    parent: Option<RegionId>,
    children: Vec<RegionId>,
    generation: u32,
    kappa: f64,
    noise: f64,
    field_center: Vec3,
    field_strength: f64,
    observers: BTreeSet<NodeId>,
    mean_theta: Option<f64>,
}

impl Region {
    #[must_use]
    pub fn id(&self) -> RegionId {
        self.id
    }

    #[must_use]
    pub fn parent(&self) -> Option<RegionId> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[RegionId] {
        &self.children
    }

    /// Depth in the tree; roots are generation zero.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    #[must_use]
    pub fn kappa(&self) -> f64 {
        self.kappa
    }

    #[must_use]
    pub fn noise(&self) -> f64 {
        self.noise
    }

    #[must_use]
    pub fn field_center(&self) -> Vec3 {
        self.field_center
    }

    #[must_use]
    pub fn field_strength(&self) -> f64 {
        self.field_strength
    }

    /// Nodes allowed to act as visibility anchors for this region.
    pub fn observers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.observers.iter().copied()
    }

    /// Last committed circular mean of orientation samples, if any.
    #[must_use]
    pub fn mean_theta(&self) -> Option<f64> {
        self.mean_theta
    }

    /// This region's own radial pull at `position`, ignoring ancestors.
    #[must_use]
    pub fn local_field(&self, position: Vec3) -> Vec3 {
        let offset = self.field_center - position;
        let distance = offset.length();
        let magnitude = self.field_strength / (1.0 + FIELD_FALLOFF * distance * distance);
        offset * (magnitude / (distance + FIELD_EPSILON))
    }
}

/// Permissible hue interval derived from orientation samples.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HueBand {
    /// Lower bound, clamped to `[0, 1]`.
    pub lower: f64,
    /// Upper bound, clamped to `[0, 1]`.
    pub upper: f64,
    /// Band centre in `[0, 1)`.
    pub center: f64,
    /// Unclamped half-width.
    pub half_width: f64,
    /// Circular mean (radians) the centre was derived from.
    pub mean_theta: f64,
}

/// Arena of regions linked by id references.
#[derive(Debug, Clone, Default)]
pub struct RegionTree {
    regions: SlotMap<RegionId, Region>,
}

impl RegionTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: RegionId) -> bool {
        self.regions.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> + '_ {
        self.regions.values()
    }

    /// Create a region, registering it as a child of `parent` when given.
    pub fn insert(
        &mut self,
        parent: Option<RegionId>,
        config: RegionConfig,
    ) -> Result<RegionId, RegionError> {
        config.validate()?;
        let parent_region = match parent {
            Some(pid) => Some(self.regions.get(pid).ok_or(RegionError::UnknownParent(pid))?),
            None => None,
        };
        let generation = parent_region.map_or(0, |p| p.generation + 1);
        let kappa = config.kappa.unwrap_or_else(|| {
            parent_region.map_or(ROOT_KAPPA, |p| p.kappa * KAPPA_INHERITANCE)
        });
        let noise = config
            .noise
            .unwrap_or_else(|| parent_region.map_or(ROOT_NOISE, |p| p.noise));

        let id = self.regions.insert_with_key(|id| Region {
            id,
            parent,
            children: Vec::new(),
            generation,
            kappa,
            noise,
            field_center: config.field_center.unwrap_or_default(),
            field_strength: config.field_strength.unwrap_or(0.0),
            observers: BTreeSet::new(),
            mean_theta: None,
        });
        if let Some(pid) = parent
            && let Some(p) = self.regions.get_mut(pid)
        {
            p.children.push(id);
        }
        Ok(id)
    }

    /// Remove a leaf region, detaching it from its parent.
    pub fn remove(&mut self, id: RegionId) -> Result<Region, RegionError> {
        let region = self.regions.get(id).ok_or(RegionError::UnknownRegion(id))?;
        if !region.children.is_empty() {
            return Err(RegionError::HasChildren(id, region.children.len()));
        }
        let region = self
            .regions
            .remove(id)
            .ok_or(RegionError::UnknownRegion(id))?;
        if let Some(pid) = region.parent
            && let Some(parent) = self.regions.get_mut(pid)
        {
            parent.children.retain(|child| *child != id);
        }
        Ok(region)
    }

    /// Walk from `id` to the root, yielding `id` itself first.
    pub fn ancestors(&self, id: RegionId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: Some(id),
        }
    }

    /// Blended kappa evaluated at the region's own generation.
    #[must_use]
    pub fn effective_kappa(&self, id: RegionId) -> Option<f64> {
        let generation = self.regions.get(id)?.generation;
        self.effective_kappa_at(id, generation)
    }

    /// Weighted mean of kappa along the ancestor chain; each ancestor is
    /// weighted by `0.88^(at_generation - ancestor.generation)`.
    #[must_use]
    pub fn effective_kappa_at(&self, id: RegionId, at_generation: u32) -> Option<f64> {
        let own = self.regions.get(id)?.kappa;
        let mut weighted = 0.0;
        let mut total = 0.0;
        for ancestor in self.ancestors(id) {
            let lag = at_generation.saturating_sub(ancestor.generation);
            let weight = KAPPA_GENERATION_DECAY.powi(lag.min(i32::MAX as u32) as i32);
            weighted += ancestor.kappa * weight;
            total += weight;
        }
        if total > 0.0 {
            Some(weighted / total)
        } else {
            Some(own)
        }
    }

    /// Superposition of every ancestor's attraction field at `position`.
    ///
    /// Unknown regions contribute nothing.
    #[must_use]
    pub fn field_at(&self, id: RegionId, position: Vec3) -> Vec3 {
        self.ancestors(id)
            .fold(Vec3::ZERO, |acc, region| acc + region.local_field(position))
    }

    /// Compute the permissible hue interval for `id` without caching the mean.
    ///
    /// Lower `coherence_estimate` (0..100) widens the band, higher effective
    /// kappa narrows it. With no usable samples the band is centred on the
    /// region's last committed mean, or zero.
    #[must_use]
    pub fn allowed_hue_band(
        &self,
        id: RegionId,
        angle_samples: &[f64],
        coherence_estimate: f64,
    ) -> Option<HueBand> {
        let region = self.regions.get(id)?;
        let kappa = self.effective_kappa(id)?;
        let mean_theta = circular_mean(angle_samples)
            .or(region.mean_theta)
            .unwrap_or(0.0);
        let alignment = clamp01(finite_or_zero(coherence_estimate) / 100.0);
        let spread = (SPREAD_BASE + (1.0 - alignment) * SPREAD_GAIN).clamp(SPREAD_MIN, SPREAD_MAX);
        let center = wrap_unit(mean_theta.rem_euclid(TAU) / TAU);
        let half_width = spread / (1.0 + KAPPA_COMPRESSION * kappa);
        Some(HueBand {
            lower: (center - half_width).max(0.0),
            upper: (center + half_width).min(1.0),
            center,
            half_width,
            mean_theta,
        })
    }

    /// Compute the hue band and cache its mean on the region.
    pub fn refresh_hue_band(
        &mut self,
        id: RegionId,
        angle_samples: &[f64],
        coherence_estimate: f64,
    ) -> Option<HueBand> {
        let band = self.allowed_hue_band(id, angle_samples, coherence_estimate)?;
        self.commit_mean_theta(id, band.mean_theta);
        Some(band)
    }

    /// Cache `theta` as the region's mean orientation for descendants to read.
    pub fn commit_mean_theta(&mut self, id: RegionId, theta: f64) -> bool {
        match self.regions.get_mut(id) {
            Some(region) if theta.is_finite() => {
                region.mean_theta = Some(theta);
                true
            }
            _ => false,
        }
    }

    /// Allow `node` to act as a visibility anchor for `id`.
    pub fn register_observer(&mut self, id: RegionId, node: NodeId) -> bool {
        self.regions
            .get_mut(id)
            .is_some_and(|region| region.observers.insert(node))
    }

    pub fn unregister_observer(&mut self, id: RegionId, node: NodeId) -> bool {
        self.regions
            .get_mut(id)
            .is_some_and(|region| region.observers.remove(&node))
    }

    /// Drop `node` from every observer registry.
    pub fn forget_observer(&mut self, node: NodeId) {
        for region in self.regions.values_mut() {
            region.observers.remove(&node);
        }
    }
}

/// Iterator over a region and its ancestors, nearest first.
pub struct Ancestors<'a> {
    tree: &'a RegionTree,
    next: Option<RegionId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Region;

    fn next(&mut self) -> Option<Self::Item> {
        let region = self.tree.regions.get(self.next?)?;
        self.next = region.parent;
        Some(region)
    }
}

/// Circular mean of angles in radians; `None` when empty or the samples cancel out.
#[must_use]
pub fn circular_mean(angles: &[f64]) -> Option<f64> {
    let (sin_sum, cos_sum) = angles
        .iter()
        .filter(|a| a.is_finite())
        .fold((0.0, 0.0), |(s, c), a| (s + a.sin(), c + a.cos()));
    if sin_sum.hypot(cos_sum) < CIRCULAR_EPSILON {
        return None;
    }
    Some(sin_sum.atan2(cos_sum))
}
