use crate::coo::CooStructure;
use crate::error::{GardenError, Result};
use crate::grow::{random_coordinates, GrowRequest};
use crate::prune::PruneRequest;
use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// A fixed-capacity pool of scalar weight slots backing a sparse connection graph.
///
/// Slots are partitioned into an ordered active sequence, positionally matched
/// to the coordinate structure, and an inactive free list. Pruning moves slots
/// to the tail of the free list without touching their stored value; growing
/// takes slots from its head and always writes a fresh value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseParameter {
    backend: Array1<f32>,
    active_index: Vec<usize>,
    inactive_index: VecDeque<usize>,
    /// Per-slot membership of `active_index`
    is_active: Vec<bool>,
    structure: CooStructure,
    /// Optional (rows, cols) bound for coordinates
    shape: Option<(u64, u64)>,
    /// Set after the first truncating grow so the warning is emitted once
    #[serde(default)]
    suppressing_grow_warning: bool,
}

impl SparseParameter {
    /// All slots start inactive, granted in ascending slot order.
    pub fn new(capacity: usize) -> Self {
        Self {
            backend: Array1::zeros(capacity),
            active_index: Vec::with_capacity(capacity),
            inactive_index: (0..capacity).collect(),
            is_active: vec![false; capacity],
            structure: CooStructure::new(),
            shape: None,
            suppressing_grow_warning: false,
        }
    }

    pub fn with_shape(capacity: usize, rows: u64, cols: u64) -> Self {
        Self {
            shape: Some((rows, cols)),
            ..Self::new(capacity)
        }
    }

    pub fn capacity(&self) -> usize {
        self.backend.len()
    }

    pub fn total_active(&self) -> usize {
        self.active_index.len()
    }

    pub fn total_inactive(&self) -> usize {
        self.inactive_index.len()
    }

    /// Fraction of capacity currently active.
    pub fn density(&self) -> f32 {
        if self.capacity() == 0 {
            return 0.0;
        }
        self.total_active() as f32 / self.capacity() as f32
    }

    pub fn shape(&self) -> Option<(u64, u64)> {
        self.shape
    }

    pub fn active_index(&self) -> &[usize] {
        &self.active_index
    }

    pub fn inactive_index(&self) -> Vec<usize> {
        self.inactive_index.iter().copied().collect()
    }

    pub fn structure(&self) -> &CooStructure {
        &self.structure
    }

    /// Active weights in structure order.
    pub fn values(&self) -> &[f32] {
        self.structure.value()
    }

    /// Weight stored at `slot`, or `None` if the slot is inactive or out of range.
    pub fn weight(&self, slot: usize) -> Option<f32> {
        if self.is_active.get(slot).copied().unwrap_or(false) {
            self.backend.get(slot).copied()
        } else {
            None
        }
    }

    /// Overwrite every active weight, in structure order.
    pub fn set_values(&mut self, values: &[f32]) -> Result<()> {
        if values.len() != self.active_index.len() {
            return Err(GardenError::Validation(format!(
                "expected {} values, got {}",
                self.active_index.len(),
                values.len()
            )));
        }
        for ((&slot, stored), &v) in self
            .active_index
            .iter()
            .zip(self.structure.value_mut())
            .zip(values)
        {
            self.backend[slot] = v;
            *stored = v;
        }
        Ok(())
    }

    /// Apply `f` to every active weight in place.
    pub fn map_values<F: FnMut(f32) -> f32>(&mut self, mut f: F) {
        for (&slot, stored) in self.active_index.iter().zip(self.structure.value_mut()) {
            let v = f(self.backend[slot]);
            self.backend[slot] = v;
            *stored = v;
        }
    }

    /// Deactivate the connections selected by `request`. Returns how many were pruned.
    pub fn prune(&mut self, request: &PruneRequest) -> Result<usize> {
        let mode = request.mode()?;
        let failing = mode.select_failing(
            self.structure.value(),
            &request.sort,
            self.total_inactive(),
            self.capacity(),
        );
        if failing.is_empty() {
            return Ok(0);
        }

        let mut failed = vec![false; self.active_index.len()];
        for &pos in &failing {
            failed[pos] = true;
        }
        let passing: Vec<usize> = (0..self.active_index.len())
            .filter(|&pos| !failed[pos])
            .collect();

        for &pos in &failing {
            let slot = self.active_index[pos];
            self.is_active[slot] = false;
            self.inactive_index.push_back(slot);
        }
        self.active_index = passing.iter().map(|&pos| self.active_index[pos]).collect();
        self.structure = self.structure.gather(&passing);

        debug!(
            pruned = failing.len(),
            active = self.total_active(),
            inactive = self.total_inactive(),
            "pruned sparse parameter"
        );
        Ok(failing.len())
    }

    /// Activate new connections.
    ///
    /// Returns `Ok(true)` when every requested connection was placed and
    /// `Ok(false)` when the request was truncated to the free capacity.
    /// Errors leave the parameter untouched.
    pub fn grow(&mut self, request: &GrowRequest) -> Result<bool> {
        let mut incoming = request.validate(self.shape)?;
        let requested = incoming.len();
        let available = self.total_inactive();

        let complete = if requested > available {
            if !request.discard_unused {
                return Err(GardenError::Capacity {
                    requested,
                    available,
                });
            }
            if !self.suppressing_grow_warning {
                warn!(
                    requested,
                    available,
                    "grow request exceeds remaining slots, discarding the excess; further warnings suppressed"
                );
                self.suppressing_grow_warning = true;
            }
            incoming = incoming.gather(&(0..available).collect::<Vec<_>>());
            false
        } else {
            true
        };

        let granted: Vec<usize> = self.inactive_index.drain(..incoming.len()).collect();
        for (&slot, &v) in granted.iter().zip(incoming.value()) {
            self.backend[slot] = v;
            self.is_active[slot] = true;
        }
        self.active_index.extend(granted);
        self.structure.concat(incoming);

        debug!(
            requested,
            active = self.total_active(),
            inactive = self.total_inactive(),
            "grew sparse parameter"
        );
        Ok(complete)
    }

    /// Grow `n` connections at random free coordinates inside the parameter's shape.
    pub fn grow_random<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        n: usize,
        value: f32,
    ) -> Result<bool> {
        let shape = self.shape.ok_or_else(|| {
            GardenError::Validation("random growth requires a parameter shape".to_string())
        })?;
        let (row, col) = random_coordinates(rng, &self.structure, shape, n);
        let sampled = row.len();
        let request = GrowRequest::new(row, col)
            .with_value(value)
            .discard_unused(true);
        let placed = self.grow(&request)?;
        Ok(placed && sampled == n)
    }

    /// Verify the partition and structure invariants.
    pub fn check_invariants(&self) -> Result<()> {
        let capacity = self.capacity();
        if self.active_index.len() + self.inactive_index.len() != capacity {
            return Err(GardenError::Invariant(format!(
                "active ({}) + inactive ({}) != capacity ({})",
                self.active_index.len(),
                self.inactive_index.len(),
                capacity
            )));
        }

        let mut seen = vec![false; capacity];
        for &slot in self.active_index.iter().chain(&self.inactive_index) {
            if slot >= capacity || seen[slot] {
                return Err(GardenError::Invariant(format!(
                    "slot {} is out of range or listed twice",
                    slot
                )));
            }
            seen[slot] = true;
        }

        if self.is_active.len() != capacity {
            return Err(GardenError::Invariant(format!(
                "activity mask covers {} slots for capacity {}",
                self.is_active.len(),
                capacity
            )));
        }
        let mut expected = vec![false; capacity];
        for &slot in &self.active_index {
            expected[slot] = true;
        }
        if let Some(slot) = (0..capacity).find(|&slot| self.is_active[slot] != expected[slot]) {
            return Err(GardenError::Invariant(format!(
                "activity mask disagrees with the active index at slot {}",
                slot
            )));
        }

        if self.structure.len() != self.active_index.len() {
            return Err(GardenError::Invariant(format!(
                "structure holds {} connections for {} active slots",
                self.structure.len(),
                self.active_index.len()
            )));
        }

        for (&slot, &v) in self.active_index.iter().zip(self.structure.value()) {
            if self.backend[slot].to_bits() != v.to_bits() {
                return Err(GardenError::Invariant(format!(
                    "structure value {} differs from slot {} ({})",
                    v, slot, self.backend[slot]
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prune::SortOrder;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    fn grown(capacity: usize, values: Vec<f32>) -> SparseParameter {
        let mut param = SparseParameter::new(capacity);
        let n = values.len() as i64;
        let request = GrowRequest::new((0..n).collect(), (0..n).collect()).with_values(values);
        assert!(param.grow(&request).unwrap());
        param
    }

    #[test]
    fn test_new_parameter_is_fully_inactive() {
        let param = SparseParameter::new(4);
        assert_eq!(param.capacity(), 4);
        assert_eq!(param.total_active(), 0);
        assert_eq!(param.inactive_index(), vec![0, 1, 2, 3]);
        assert!(param.structure().is_empty());
        param.check_invariants().unwrap();
    }

    #[test]
    fn test_grow_takes_slots_from_head() {
        let param = grown(5, vec![0.5, -0.25]);
        assert_eq!(param.active_index(), &[0, 1]);
        assert_eq!(param.inactive_index(), vec![2, 3, 4]);
        assert_eq!(param.values(), &[0.5, -0.25]);
        assert_eq!(param.weight(1), Some(-0.25));
        assert_eq!(param.weight(2), None);
        param.check_invariants().unwrap();
    }

    #[test]
    fn test_prune_appends_to_inactive_tail_and_keeps_order() {
        let mut param = grown(6, vec![0.9, 0.05, -0.7, 0.01]);
        let pruned = param.prune(&PruneRequest::threshold(0.1)).unwrap();
        assert_eq!(pruned, 2);
        // Survivors keep their relative order
        assert_eq!(param.active_index(), &[0, 2]);
        assert_eq!(param.values(), &[0.9, -0.7]);
        assert_eq!(param.structure().row(), &[0, 2]);
        // Pruned slots queue behind the untouched ones, weakest first
        assert_eq!(param.inactive_index(), vec![4, 5, 3, 1]);
        param.check_invariants().unwrap();
    }

    #[test]
    fn test_pruned_slot_is_reused_last_and_overwritten() {
        let mut param = grown(3, vec![0.01, 0.9]);
        param.prune(&PruneRequest::threshold(0.1)).unwrap();
        assert_eq!(param.inactive_index(), vec![2, 0]);

        let request = GrowRequest::new(vec![5, 6], vec![5, 6]).with_values(vec![3.0, 4.0]);
        assert!(param.grow(&request).unwrap());
        assert_eq!(param.active_index(), &[1, 2, 0]);
        assert_eq!(param.weight(0), Some(4.0));
        param.check_invariants().unwrap();
    }

    #[test]
    fn test_threshold_prune_ignores_sort_for_selection() {
        let mut param = grown(4, vec![0.2, 0.05, 3.0]);
        let request = PruneRequest::threshold(0.1).sorted_by(SortOrder::Descending);
        assert_eq!(param.prune(&request).unwrap(), 1);
        assert_eq!(param.values(), &[0.2, 3.0]);
    }

    #[test]
    fn test_relative_prune_with_descending_sort() {
        let mut param = grown(4, vec![0.2, -5.0, 3.0]);
        let request = PruneRequest::relative(34.0).sorted_by(SortOrder::DescendingAbs);
        assert_eq!(param.prune(&request).unwrap(), 1);
        assert_eq!(param.values(), &[0.2, 3.0]);
    }

    #[test]
    fn test_absolute_prune_never_reactivates() {
        let mut param = grown(10, vec![0.1, 0.2, 0.3, 0.4]);
        // 6 of 10 inactive already, asking for 50% is a no-op
        assert_eq!(param.prune(&PruneRequest::absolute(50.0)).unwrap(), 0);
        assert_eq!(param.total_active(), 4);

        assert_eq!(param.prune(&PruneRequest::absolute(80.0)).unwrap(), 2);
        assert_eq!(param.total_inactive(), 8);
        assert_eq!(param.values(), &[0.3, 0.4]);
    }

    #[test]
    fn test_prune_configuration_error_leaves_state() {
        let mut param = grown(4, vec![0.1, 0.2]);
        let before = param.clone();
        let err = param.prune(&PruneRequest::default()).unwrap_err();
        assert!(matches!(err, GardenError::Configuration(_)));
        assert_eq!(param.active_index(), before.active_index());
        assert_eq!(param.structure(), before.structure());
    }

    #[test]
    fn test_grow_truncates_and_warns_once() {
        let mut param = grown(3, vec![1.0]);
        let request = GrowRequest::new(vec![1, 2, 3], vec![1, 2, 3]).with_value(2.0);
        assert!(!param.grow(&request).unwrap());
        assert!(param.suppressing_grow_warning);
        assert_eq!(param.total_active(), 3);
        assert_eq!(param.structure().row(), &[0, 1, 2]);

        // Nothing left; still partial success, flag stays set
        assert!(!param.grow(&request).unwrap());
        assert_eq!(param.total_active(), 3);
        param.check_invariants().unwrap();
    }

    #[test]
    fn test_grow_capacity_error_is_atomic() {
        let mut param = grown(2, vec![1.0]);
        let before = param.clone();
        let request = GrowRequest::new(vec![1, 2], vec![1, 2]).discard_unused(false);
        let err = param.grow(&request).unwrap_err();
        assert_eq!(
            err,
            GardenError::Capacity {
                requested: 2,
                available: 1
            }
        );
        assert_eq!(param.active_index(), before.active_index());
        assert_eq!(param.inactive_index(), before.inactive_index());
        assert_eq!(param.structure(), before.structure());
        assert!(!param.suppressing_grow_warning);
    }

    #[test]
    fn test_grow_validation_error_is_atomic() {
        let mut param = SparseParameter::with_shape(4, 2, 2);
        let err = param
            .grow(&GrowRequest::new(vec![0, 2], vec![0, 0]))
            .unwrap_err();
        assert!(matches!(err, GardenError::Validation(_)));
        assert_eq!(param.total_active(), 0);
        assert_eq!(param.total_inactive(), 4);
    }

    #[test]
    fn test_weight_follows_prune_and_regrow() {
        let mut param = grown(4, vec![0.01, 0.9, 0.02]);
        param.prune(&PruneRequest::threshold(0.1)).unwrap();
        assert_eq!(param.weight(0), None);
        assert_eq!(param.weight(1), Some(0.9));
        assert_eq!(param.weight(2), None);
        assert_eq!(param.weight(3), None);
        assert_eq!(param.weight(99), None);

        // Slot 3 is at the head of the free list, then 0
        let request = GrowRequest::new(vec![4, 5], vec![4, 5]).with_values(vec![0.3, 0.4]);
        assert!(param.grow(&request).unwrap());
        assert_eq!(param.weight(3), Some(0.3));
        assert_eq!(param.weight(0), Some(0.4));
        assert_eq!(param.weight(2), None);
        param.check_invariants().unwrap();
    }

    #[test]
    fn test_set_and_map_values_stay_in_sync() {
        let mut param = grown(4, vec![1.0, 2.0]);
        param.set_values(&[3.0, 4.0]).unwrap();
        assert_eq!(param.values(), &[3.0, 4.0]);
        param.map_values(|v| v * 0.5);
        assert_eq!(param.values(), &[1.5, 2.0]);
        assert_eq!(param.weight(0), Some(1.5));
        assert!(param.set_values(&[1.0]).is_err());
        param.check_invariants().unwrap();
    }

    #[test]
    fn test_grow_random_needs_shape() {
        let mut rng = Pcg64::seed_from_u64(3);
        let mut unshaped = SparseParameter::new(4);
        assert!(matches!(
            unshaped.grow_random(&mut rng, 2, 0.0),
            Err(GardenError::Validation(_))
        ));

        let mut shaped = SparseParameter::with_shape(8, 2, 2);
        // Only 4 cells exist
        assert!(!shaped.grow_random(&mut rng, 6, 0.5).unwrap());
        assert_eq!(shaped.total_active(), 4);
        assert_eq!(shaped.total_inactive(), 4);
        shaped.check_invariants().unwrap();
    }

    #[test]
    fn test_zero_capacity_parameter() {
        let mut param = SparseParameter::new(0);
        assert_eq!(param.density(), 0.0);
        assert_eq!(param.prune(&PruneRequest::absolute(100.0)).unwrap(), 0);
        assert!(!param.grow(&GrowRequest::new(vec![0], vec![0])).unwrap());
        param.check_invariants().unwrap();
    }
}
