//! Spatial indexing abstractions for node neighborhood queries.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., non-positive cell size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// A position handed to `rebuild` had a NaN or infinite component.
    #[error("position at index {0} is not finite")]
    NonFinitePosition(usize),
}

/// Common behaviour exposed by neighborhood indices.
pub trait NeighborhoodIndex {
    /// Rebuild internal structures from node positions.
    fn rebuild(&mut self, positions: &[[f64; 3]]) -> Result<(), IndexError>;

    /// Visit neighbors of `idx` within the provided squared radius.
    ///
    /// The entry at `idx` itself is never visited.
    fn neighbors_within(
        &self,
        idx: usize,
        radius_sq: f64,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f64>),
    );
}

type CellKey = (i64, i64, i64);

/// Uniform grid bucketing positions into cubic cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniformGridIndex {
    /// Edge length of each grid cell used for bucketing nodes.
    pub cell_size: f64,
    #[serde(skip)]
    positions: Vec<[f64; 3]>,
    #[serde(skip)]
    cells: HashMap<CellKey, Vec<usize>>,
}

impl UniformGridIndex {
    /// Create a new uniform grid with the provided cell size.
    #[must_use]
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size,
            positions: Vec::new(),
            cells: HashMap::new(),
        }
    }

    /// Number of positions indexed by the last rebuild.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true when the last rebuild indexed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn cell_of(&self, position: &[f64; 3]) -> CellKey {
        (
            (position[0] / self.cell_size).floor() as i64,
            (position[1] / self.cell_size).floor() as i64,
            (position[2] / self.cell_size).floor() as i64,
        )
    }
}

impl Default for UniformGridIndex {
    fn default() -> Self {
        Self::new(30.0)
    }
}

impl NeighborhoodIndex for UniformGridIndex {
    fn rebuild(&mut self, positions: &[[f64; 3]]) -> Result<(), IndexError> {
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(IndexError::InvalidConfig("cell_size must be positive"));
        }
        if let Some(bad) = positions
            .iter()
            .position(|p| p.iter().any(|c| !c.is_finite()))
        {
            return Err(IndexError::NonFinitePosition(bad));
        }
        self.cells.clear();
        self.positions.clear();
        self.positions.extend_from_slice(positions);
        for (idx, position) in positions.iter().enumerate() {
            let key = self.cell_of(position);
            self.cells.entry(key).or_default().push(idx);
        }
        Ok(())
    }

    fn neighbors_within(
        &self,
        idx: usize,
        radius_sq: f64,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f64>),
    ) {
        let Some(origin) = self.positions.get(idx) else {
            return;
        };
        if radius_sq.is_nan() || radius_sq < 0.0 {
            return;
        }
        let span = (radius_sq.sqrt() / self.cell_size).ceil() as i64;
        let (cx, cy, cz) = self.cell_of(origin);
        for dx in -span..=span {
            for dy in -span..=span {
                for dz in -span..=span {
                    let Some(bucket) = self.cells.get(&(cx + dx, cy + dy, cz + dz)) else {
                        continue;
                    };
                    for &other in bucket {
                        if other == idx {
                            continue;
                        }
                        let p = &self.positions[other];
                        let dist_sq = (p[0] - origin[0]).powi(2)
                            + (p[1] - origin[1]).powi(2)
                            + (p[2] - origin[2]).powi(2);
                        if dist_sq <= radius_sq {
                            visitor(other, OrderedFloat(dist_sq));
                        }
                    }
                }
            }
        }
    }
}
