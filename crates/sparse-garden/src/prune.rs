//! Prune policies: which active connections get deactivated.
//!
//! A [`PruneRequest`] carries three optional, mutually exclusive selection
//! modes plus a [`SortOrder`]. [`PruneRequest::mode`] resolves it into exactly
//! one [`PruneMode`] or fails with a configuration error.

use crate::error::{GardenError, Result};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maps a weight to a ranking score. Lower scores are pruned first.
#[derive(Clone, Copy)]
pub struct ScoreFn(pub fn(f32) -> f32);

impl fmt::Debug for ScoreFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ScoreFn(..)")
    }
}

/// Ranking applied to active connections before cutting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Smallest magnitude first.
    #[default]
    AscendingAbs,
    DescendingAbs,
    Ascending,
    Descending,
    #[serde(skip)]
    Custom(ScoreFn),
}

impl SortOrder {
    fn score(&self, value: f32) -> f32 {
        match self {
            Self::AscendingAbs => value.abs(),
            Self::DescendingAbs => -value.abs(),
            Self::Ascending => value,
            Self::Descending => -value,
            Self::Custom(f) => (f.0)(value),
        }
    }

    /// Positions of `values` ordered by ascending score.
    /// The sort is stable, so ties keep their existing positional order.
    pub fn rank(&self, values: &[f32]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by_key(|&i| OrderedFloat(self.score(values[i])));
        order
    }
}

/// A resolved, validated selection mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PruneMode {
    /// Deactivate every connection with magnitude strictly below the threshold.
    Threshold(f32),
    /// Deactivate the bottom X% of the currently active connections.
    Relative(f32),
    /// Deactivate enough connections that X% of total capacity is inactive.
    Absolute(f32),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneRequest {
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub relative_percentage: Option<f32>,
    #[serde(default)]
    pub absolute_percentage: Option<f32>,
    #[serde(default)]
    pub sort: SortOrder,
}

impl PruneRequest {
    pub fn threshold(threshold: f32) -> Self {
        Self {
            threshold: Some(threshold),
            ..Self::default()
        }
    }

    pub fn relative(percentage: f32) -> Self {
        Self {
            relative_percentage: Some(percentage),
            ..Self::default()
        }
    }

    pub fn absolute(percentage: f32) -> Self {
        Self {
            absolute_percentage: Some(percentage),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn sorted_by(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    /// Resolve to exactly one mode.
    pub fn mode(&self) -> Result<PruneMode> {
        let mode = match (self.threshold, self.relative_percentage, self.absolute_percentage) {
            (Some(t), None, None) => PruneMode::Threshold(t),
            (None, Some(p), None) => PruneMode::Relative(p),
            (None, None, Some(p)) => PruneMode::Absolute(p),
            (None, None, None) => {
                return Err(GardenError::Configuration(
                    "one of threshold, relative_percentage or absolute_percentage is required"
                        .to_string(),
                ))
            }
            _ => {
                return Err(GardenError::Configuration(
                    "threshold, relative_percentage and absolute_percentage are mutually exclusive"
                        .to_string(),
                ))
            }
        };

        match mode {
            PruneMode::Threshold(t) if t.is_nan() || t < 0.0 => Err(GardenError::Configuration(
                format!("threshold must be non-negative, got {}", t),
            )),
            PruneMode::Relative(p) | PruneMode::Absolute(p) if !(0.0..=100.0).contains(&p) => {
                Err(GardenError::Configuration(format!(
                    "percentage must be between 0 and 100, got {}",
                    p
                )))
            }
            mode => Ok(mode),
        }
    }
}

impl PruneMode {
    /// Positions (into the active sequence) that fail, in ranking order.
    pub(crate) fn select_failing(
        &self,
        values: &[f32],
        sort: &SortOrder,
        total_inactive: usize,
        capacity: usize,
    ) -> Vec<usize> {
        let ranking = sort.rank(values);
        match *self {
            PruneMode::Threshold(t) => ranking
                .into_iter()
                .filter(|&i| values[i].abs() < t)
                .collect(),
            PruneMode::Relative(p) => {
                let k = percent_of(p, values.len()).min(values.len());
                ranking.into_iter().take(k).collect()
            }
            PruneMode::Absolute(p) => {
                let required_inactive = percent_of(p, capacity);
                let k = required_inactive
                    .saturating_sub(total_inactive)
                    .min(values.len());
                ranking.into_iter().take(k).collect()
            }
        }
    }
}

/// `round(p% of n)`, rounding halves away from zero.
fn percent_of(percentage: f32, n: usize) -> usize {
    (f64::from(percentage) / 100.0 * n as f64).round() as usize
}
