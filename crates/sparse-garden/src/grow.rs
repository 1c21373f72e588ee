//! Grow requests and random free-coordinate sampling.

use crate::coo::CooStructure;
use crate::error::{GardenError, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Initial weights for newly activated connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GrowValues {
    /// Broadcast to every new connection.
    Scalar(f32),
    /// One value per new connection, positionally matched to `row`/`col`.
    PerConnection(Vec<f32>),
}

impl Default for GrowValues {
    fn default() -> Self {
        Self::Scalar(0.0)
    }
}

impl From<f32> for GrowValues {
    fn from(value: f32) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<f32>> for GrowValues {
    fn from(values: Vec<f32>) -> Self {
        Self::PerConnection(values)
    }
}

fn default_discard_unused() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowRequest {
    pub row: Vec<i64>,
    pub col: Vec<i64>,
    #[serde(default)]
    pub value: GrowValues,
    /// Truncate to the available capacity instead of failing.
    #[serde(default = "default_discard_unused")]
    pub discard_unused: bool,
}

impl GrowRequest {
    pub fn new(row: Vec<i64>, col: Vec<i64>) -> Self {
        Self {
            row,
            col,
            value: GrowValues::default(),
            discard_unused: true,
        }
    }

    /// Broadcast one initial weight to every new connection.
    #[must_use]
    pub fn with_value(mut self, value: f32) -> Self {
        self.value = GrowValues::Scalar(value);
        self
    }

    #[must_use]
    pub fn with_values(mut self, values: Vec<f32>) -> Self {
        self.value = GrowValues::PerConnection(values);
        self
    }

    #[must_use]
    pub fn discard_unused(mut self, discard: bool) -> Self {
        self.discard_unused = discard;
        self
    }

    pub fn len(&self) -> usize {
        self.row.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row.is_empty()
    }

    /// Check shapes and coordinates, producing the triples to commit.
    /// No truncation happens here; that depends on the parameter's free capacity.
    pub(crate) fn validate(&self, shape: Option<(u64, u64)>) -> Result<CooStructure> {
        if self.row.len() != self.col.len() {
            return Err(GardenError::Validation(format!(
                "row and col must have the same length ({} vs {})",
                self.row.len(),
                self.col.len()
            )));
        }

        let values = match &self.value {
            GrowValues::Scalar(v) => vec![*v; self.row.len()],
            GrowValues::PerConnection(values) => {
                if values.len() != self.row.len() {
                    return Err(GardenError::Validation(format!(
                        "row and value lengths do not match ({} vs {})",
                        self.row.len(),
                        values.len()
                    )));
                }
                values.clone()
            }
        };

        let rows = checked_coordinates("row", &self.row, shape.map(|(r, _)| r))?;
        let cols = checked_coordinates("col", &self.col, shape.map(|(_, c)| c))?;
        CooStructure::from_triples(rows, cols, values)
    }
}

fn checked_coordinates(axis: &str, coords: &[i64], bound: Option<u64>) -> Result<Vec<u64>> {
    coords
        .iter()
        .map(|&c| {
            let c = u64::try_from(c).map_err(|_| {
                GardenError::Validation(format!("negative {} coordinate {}", axis, c))
            })?;
            match bound {
                Some(bound) if c >= bound => Err(GardenError::Validation(format!(
                    "{} coordinate {} outside bound {}",
                    axis, c, bound
                ))),
                _ => Ok(c),
            }
        })
        .collect()
}

/// Sample up to `n` distinct coordinates inside `shape` not already present in `occupied`.
///
/// Returns fewer than `n` when the free space is smaller than the request.
pub fn random_coordinates<R: Rng + ?Sized>(
    rng: &mut R,
    occupied: &CooStructure,
    shape: (u64, u64),
    n: usize,
) -> (Vec<i64>, Vec<i64>) {
    let (rows, cols) = shape;
    let taken: HashSet<(u64, u64)> = occupied
        .row()
        .iter()
        .copied()
        .zip(occupied.col().iter().copied())
        .collect();
    let total = rows.saturating_mul(cols);
    let free = total.saturating_sub(taken.len() as u64);
    let n = (n as u64).min(free) as usize;

    if n == 0 {
        return (Vec::new(), Vec::new());
    }

    let picked: Vec<(u64, u64)> = if (n as u64).saturating_mul(2) >= free {
        // Dense request: enumerate the free cells and shuffle.
        let mut candidates: Vec<(u64, u64)> = (0..rows)
            .flat_map(|r| (0..cols).map(move |c| (r, c)))
            .filter(|cell| !taken.contains(cell))
            .collect();
        candidates.shuffle(rng);
        candidates.truncate(n);
        candidates
    } else {
        let mut seen = taken;
        let mut picked = Vec::with_capacity(n);
        while picked.len() < n {
            let cell = (rng.random_range(0..rows), rng.random_range(0..cols));
            if seen.insert(cell) {
                picked.push(cell);
            }
        }
        picked
    };

    picked
        .into_iter()
        .map(|(r, c)| (r as i64, c as i64))
        .unzip()
}
