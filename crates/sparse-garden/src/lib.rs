pub mod coo {
    use crate::error::{GardenError, Result};
    use ndarray::Array2;
    use serde::{Deserialize, Serialize};

    /// Coordinate-format sparse structure.
    /// Three parallel sequences; position `i` of each describes one connection.
    /// The correspondence is positional, so every mutation touches all three.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct CooStructure {
        row: Vec<u64>,
        col: Vec<u64>,
        value: Vec<f32>,
    }

    impl CooStructure {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn from_triples(row: Vec<u64>, col: Vec<u64>, value: Vec<f32>) -> Result<Self> {
            if row.len() != col.len() || row.len() != value.len() {
                return Err(GardenError::Validation(format!(
                    "row, col and value lengths differ ({}, {}, {})",
                    row.len(),
                    col.len(),
                    value.len()
                )));
            }
            Ok(Self { row, col, value })
        }

        pub fn len(&self) -> usize {
            self.value.len()
        }

        pub fn is_empty(&self) -> bool {
            self.value.is_empty()
        }

        pub fn row(&self) -> &[u64] {
            &self.row
        }

        pub fn col(&self) -> &[u64] {
            &self.col
        }

        pub fn value(&self) -> &[f32] {
            &self.value
        }

        pub fn triples(&self) -> impl Iterator<Item = (u64, u64, f32)> + '_ {
            self.row
                .iter()
                .zip(&self.col)
                .zip(&self.value)
                .map(|((&r, &c), &v)| (r, c, v))
        }

        /// Rebuild from a subset (or reordering) of positions.
        /// Positions must be in range; callers only pass positions they derived from `len()`.
        pub fn gather(&self, positions: &[usize]) -> Self {
            Self {
                row: positions.iter().map(|&p| self.row[p]).collect(),
                col: positions.iter().map(|&p| self.col[p]).collect(),
                value: positions.iter().map(|&p| self.value[p]).collect(),
            }
        }

        /// Append another structure's triples after this one's.
        pub fn concat(&mut self, other: CooStructure) {
            self.row.extend(other.row);
            self.col.extend(other.col);
            self.value.extend(other.value);
        }

        pub(crate) fn value_mut(&mut self) -> &mut [f32] {
            &mut self.value
        }

        /// Smallest (rows, cols) that contains every coordinate.
        pub fn extent(&self) -> (u64, u64) {
            let rows = self.row.iter().max().map_or(0, |r| r + 1);
            let cols = self.col.iter().max().map_or(0, |c| c + 1);
            (rows, cols)
        }

        /// Dense reconstruction. Duplicate coordinates accumulate; out-of-bounds ones are rejected.
        pub fn to_dense(&self, rows: usize, cols: usize) -> Result<Array2<f32>> {
            let mut dense = Array2::<f32>::zeros((rows, cols));
            for (r, c, v) in self.triples() {
                let (r, c) = (r as usize, c as usize);
                if r >= rows || c >= cols {
                    return Err(GardenError::Validation(format!(
                        "coordinate ({}, {}) outside {}x{}",
                        r, c, rows, cols
                    )));
                }
                dense[[r, c]] += v;
            }
            Ok(dense)
        }
    }

}

pub mod config;
pub mod error;
pub mod gardener;
pub mod grow;
pub mod module;
pub mod parameter;
pub mod persistence;
pub mod prune;

pub use coo::CooStructure;
pub use error::{GardenError, Result};
pub use gardener::{Gardener, Outcome};
pub use grow::{GrowRequest, GrowValues};
pub use module::{DenseParameter, Module, NamedParam, ParamMut, Sequential, SparseLinear};
pub use parameter::SparseParameter;
pub use prune::{PruneMode, PruneRequest, ScoreFn, SortOrder};
