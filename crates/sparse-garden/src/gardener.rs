//! Discovery and broadcast of prune/grow over every sparse parameter in a model.

use crate::error::{GardenError, Result};
use crate::grow::GrowRequest;
use crate::module::{DenseParameter, Module, ParamMut};
use crate::parameter::SparseParameter;
use crate::prune::PruneRequest;
use rand::Rng;
use tracing::{info, warn};

/// Result of one instance's share of a broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub index: usize,
    pub name: String,
    pub result: Result<T>,
}

/// Manages the sparse parameters of a model.
///
/// Discovery is a snapshot taken in [`Gardener::new`]; parameters added to the
/// model afterwards are not seen. The gardener borrows the model for its whole
/// lifetime, so the structure cannot change underneath it.
pub struct Gardener<'a> {
    sparse: Vec<(String, &'a mut SparseParameter)>,
    dense: Vec<(String, &'a DenseParameter)>,
}

impl<'a> Gardener<'a> {
    pub fn new<M: Module + ?Sized>(model: &'a mut M) -> Self {
        let mut sparse = Vec::new();
        let mut dense = Vec::new();
        for named in model.parameters_mut() {
            match named.param {
                ParamMut::Sparse(param) => sparse.push((named.name, param)),
                ParamMut::Dense(param) => dense.push((named.name, &*param)),
            }
        }
        info!(
            sparse = sparse.len(),
            dense = dense.len(),
            "gardener discovered parameters"
        );
        Self { sparse, dense }
    }

    pub fn len(&self) -> usize {
        self.sparse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sparse.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.sparse.iter().map(|(name, _)| name.as_str())
    }

    pub fn sparse_parameters(&self) -> impl Iterator<Item = (&str, &SparseParameter)> + '_ {
        self.sparse
            .iter()
            .map(|(name, param)| (name.as_str(), &**param))
    }

    pub fn sparse_parameters_mut(
        &mut self,
    ) -> impl Iterator<Item = (&str, &mut SparseParameter)> + use<'_, 'a> {
        self.sparse
            .iter_mut()
            .map(|(name, param)| (name.as_str(), &mut **param))
    }

    pub fn dense_parameters(&self) -> impl Iterator<Item = (&str, &DenseParameter)> + '_ {
        self.dense.iter().map(|(name, param)| (name.as_str(), *param))
    }

    pub fn get(&self, index: usize) -> Option<&SparseParameter> {
        self.sparse.get(index).map(|(_, param)| &**param)
    }

    pub fn total_capacity(&self) -> usize {
        self.sparse.iter().map(|(_, p)| p.capacity()).sum()
    }

    pub fn total_active(&self) -> usize {
        self.sparse.iter().map(|(_, p)| p.total_active()).sum()
    }

    pub fn total_inactive(&self) -> usize {
        self.sparse.iter().map(|(_, p)| p.total_inactive()).sum()
    }

    pub fn dense_element_count(&self) -> usize {
        self.dense.iter().map(|(_, p)| p.len()).sum()
    }

    fn instance(&mut self, index: usize) -> Result<&mut SparseParameter> {
        let len = self.sparse.len();
        self.sparse
            .get_mut(index)
            .map(|(_, param)| &mut **param)
            .ok_or_else(|| {
                GardenError::Configuration(format!(
                    "no sparse parameter at index {} ({} discovered)",
                    index, len
                ))
            })
    }

    /// Prune a single instance.
    pub fn prune(&mut self, index: usize, request: &PruneRequest) -> Result<usize> {
        self.instance(index)?.prune(request)
    }

    /// Grow a single instance.
    pub fn grow(&mut self, index: usize, request: &GrowRequest) -> Result<bool> {
        self.instance(index)?.grow(request)
    }

    /// Prune every instance. Per-instance failures are reported in the outcome list.
    ///
    /// An invalid policy is rejected before any instance is visited, even when
    /// the gardener is empty.
    pub fn prune_all(&mut self, request: &PruneRequest) -> Result<Vec<Outcome<usize>>> {
        request.mode()?;
        let outcomes = self.broadcast("prune", |param| param.prune(request));
        let outcomes = settle(outcomes)?;
        let pruned: usize = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .sum();
        info!(
            pruned,
            active = self.total_active(),
            inactive = self.total_inactive(),
            "prune broadcast complete"
        );
        Ok(outcomes)
    }

    /// Grow the same request on every instance.
    pub fn grow_all(&mut self, request: &GrowRequest) -> Result<Vec<Outcome<bool>>> {
        let outcomes = self.broadcast("grow", |param| param.grow(request));
        settle(outcomes)
    }

    /// Regrow `counts[i]` random connections on instance `i`, initialised to `value`.
    pub fn regrow_random_all<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        counts: &[usize],
        value: f32,
    ) -> Result<Vec<Outcome<bool>>> {
        if counts.len() != self.sparse.len() {
            return Err(GardenError::Configuration(format!(
                "expected {} regrowth counts, got {}",
                self.sparse.len(),
                counts.len()
            )));
        }
        let mut counts = counts.iter();
        let outcomes = self.broadcast("regrow", |param| {
            let n = counts.next().copied().unwrap_or(0);
            param.grow_random(rng, n, value)
        });
        let outcomes = settle(outcomes)?;
        info!(
            active = self.total_active(),
            inactive = self.total_inactive(),
            "regrow broadcast complete"
        );
        Ok(outcomes)
    }

    fn broadcast<T, F>(&mut self, op: &str, mut f: F) -> Vec<Outcome<T>>
    where
        F: FnMut(&mut SparseParameter) -> Result<T>,
    {
        self.sparse
            .iter_mut()
            .enumerate()
            .map(|(index, (name, param))| {
                let result = f(param);
                if let Err(ref e) = result {
                    warn!(index, name = %name, op, error = %e, "sparse parameter operation failed");
                }
                Outcome {
                    index,
                    name: name.clone(),
                    result,
                }
            })
            .collect()
    }
}

/// Collapse a broadcast into a single error when every instance failed with the
/// same configuration or validation error; that is a caller mistake, not a
/// per-instance condition.
///
/// The collapsed error keeps its variant: an identical `Validation` failure is
/// returned as `Validation`, not rewrapped as `Configuration`, so callers can
/// still tell a bad grow request from a bad prune policy. `Capacity` failures
/// are never collapsed.
fn settle<T>(outcomes: Vec<Outcome<T>>) -> Result<Vec<Outcome<T>>> {
    let first = match outcomes.first() {
        Some(Outcome { result: Err(e), .. }) => e.clone(),
        _ => return Ok(outcomes),
    };
    let caller_mistake = matches!(
        first,
        GardenError::Configuration(_) | GardenError::Validation(_)
    );
    let identical = outcomes
        .iter()
        .all(|o| matches!(&o.result, Err(e) if *e == first));
    if caller_mistake && identical {
        return Err(first);
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Sequential, SparseLinear};
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    fn model() -> Sequential {
        let mut first = SparseLinear::new(4, 4, 10, true);
        first
            .weight
            .grow(&GrowRequest::new(vec![0, 1, 2], vec![0, 1, 2]).with_values(vec![0.1, 0.5, 0.9]))
            .unwrap();
        let mut second = SparseLinear::new(4, 2, 4, false);
        second
            .weight
            .grow(&GrowRequest::new(vec![0, 1, 1, 0], vec![0, 1, 2, 3]).with_value(1.0))
            .unwrap();
        Sequential::new().with(first).with(second)
    }

    #[test]
    fn test_discovery_snapshot() {
        let mut model = model();
        let gardener = Gardener::new(&mut model);
        assert_eq!(gardener.len(), 2);
        assert_eq!(gardener.names().collect::<Vec<_>>(), vec!["0.weight", "1.weight"]);
        assert_eq!(gardener.dense_parameters().count(), 1);
        assert_eq!(gardener.dense_element_count(), 4);
        assert_eq!(gardener.total_capacity(), 14);
        assert_eq!(gardener.total_active(), 7);
        assert_eq!(gardener.total_inactive(), 7);
    }

    #[test]
    fn test_prune_all_reports_per_instance() {
        let mut model = model();
        let mut gardener = Gardener::new(&mut model);
        let outcomes = gardener.prune_all(&PruneRequest::threshold(0.6)).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].result, Ok(2));
        assert_eq!(outcomes[1].result, Ok(0));
        assert_eq!(gardener.total_active(), 5);
    }

    #[test]
    fn test_identical_configuration_errors_propagate() {
        let mut model = model();
        let mut gardener = Gardener::new(&mut model);
        let err = gardener.prune_all(&PruneRequest::relative(150.0)).unwrap_err();
        assert!(matches!(err, GardenError::Configuration(_)));
        assert_eq!(gardener.total_active(), 7);
    }

    #[test]
    fn test_partial_failures_do_not_halt_broadcast() {
        let mut model = model();
        let mut gardener = Gardener::new(&mut model);
        // Row 3 is valid for the 4x4 layer but outside the 2x4 one
        let request = GrowRequest::new(vec![3], vec![3]).with_value(0.2);
        let outcomes = gardener.grow_all(&request).unwrap();
        assert_eq!(outcomes[0].result, Ok(true));
        assert!(matches!(outcomes[1].result, Err(GardenError::Validation(_))));
        assert_eq!(gardener.get(0).unwrap().total_active(), 4);
    }

    #[test]
    fn test_mixed_capacity_outcomes() {
        let mut model = model();
        let mut gardener = Gardener::new(&mut model);
        let request = GrowRequest::new(vec![0, 1], vec![3, 3]).discard_unused(false);
        let outcomes = gardener.grow_all(&request).unwrap();
        assert_eq!(outcomes[0].result, Ok(true));
        assert_eq!(
            outcomes[1].result,
            Err(GardenError::Capacity {
                requested: 2,
                available: 0
            })
        );
    }

    #[test]
    fn test_capacity_errors_everywhere_are_still_outcomes() {
        let mut model = model();
        let mut gardener = Gardener::new(&mut model);
        let request =
            GrowRequest::new((0..2).collect(), vec![0; 2]).discard_unused(false);
        gardener.grow(0, &GrowRequest::new(vec![3; 7], (0..7).map(|c| c % 4).collect())).unwrap();
        let outcomes = gardener.grow_all(&request).unwrap();
        assert!(outcomes
            .iter()
            .all(|o| matches!(o.result, Err(GardenError::Capacity { .. }))));
    }

    #[test]
    fn test_single_instance_dispatch() {
        let mut model = model();
        let mut gardener = Gardener::new(&mut model);
        assert_eq!(gardener.prune(0, &PruneRequest::relative(34.0)).unwrap(), 1);
        assert!(matches!(
            gardener.prune(5, &PruneRequest::relative(10.0)),
            Err(GardenError::Configuration(_))
        ));
    }

    #[test]
    fn test_regrow_random_all() {
        let mut rng = Pcg64::seed_from_u64(5);
        let mut model = model();
        let mut gardener = Gardener::new(&mut model);
        assert!(gardener.regrow_random_all(&mut rng, &[1], 0.0).is_err());

        let outcomes = gardener.regrow_random_all(&mut rng, &[3, 0], 0.01).unwrap();
        assert_eq!(outcomes[0].result, Ok(true));
        assert_eq!(outcomes[1].result, Ok(true));
        assert_eq!(gardener.get(0).unwrap().total_active(), 6);
        for (_, param) in gardener.sparse_parameters() {
            param.check_invariants().unwrap();
        }
    }

    #[test]
    fn test_empty_model() {
        let mut model = Sequential::new();
        let mut gardener = Gardener::new(&mut model);
        assert!(gardener.is_empty());
        assert!(gardener.prune_all(&PruneRequest::relative(20.0)).unwrap().is_empty());
        assert!(gardener.grow_all(&GrowRequest::new(vec![0], vec![0])).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_policy_rejected_on_empty_model() {
        let mut model = Sequential::new();
        let mut gardener = Gardener::new(&mut model);
        assert!(matches!(
            gardener.prune_all(&PruneRequest::relative(250.0)),
            Err(GardenError::Configuration(_))
        ));
        assert!(matches!(
            gardener.prune_all(&PruneRequest::default()),
            Err(GardenError::Configuration(_))
        ));
    }

    #[test]
    fn test_identical_validation_errors_keep_their_kind() {
        let mut model = model();
        let mut gardener = Gardener::new(&mut model);
        let err = gardener
            .grow_all(&GrowRequest::new(vec![0, 1], vec![0]))
            .unwrap_err();
        assert!(matches!(err, GardenError::Validation(_)));
    }

    #[test]
    fn test_sparse_parameters_mut_edits_model() {
        let mut model = model();
        {
            let mut gardener = Gardener::new(&mut model);
            for (_, param) in gardener.sparse_parameters_mut() {
                param.map_values(|w| w * 2.0);
            }
        }
        let gardener = Gardener::new(&mut model);
        assert_eq!(gardener.get(0).unwrap().values(), &[0.2, 1.0, 1.8]);
        assert_eq!(gardener.get(1).unwrap().values(), &[2.0; 4]);
    }
}
