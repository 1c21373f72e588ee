//! Model composition: anything that can enumerate its parameters.
//!
//! The gardener only relies on [`Module::parameters_mut`], a lazy sequence of
//! every parameter reachable from a root, so any tree shape works as long as
//! containers chain their children's sequences.

use crate::error::Result;
use crate::grow::{random_coordinates, GrowRequest};
use crate::parameter::SparseParameter;
use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// An ordinary dense parameter (bias vectors and the like).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseParameter {
    pub data: Array1<f32>,
}

impl DenseParameter {
    pub fn zeros(len: usize) -> Self {
        Self {
            data: Array1::zeros(len),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub enum ParamMut<'a> {
    Sparse(&'a mut SparseParameter),
    Dense(&'a mut DenseParameter),
}

/// A parameter together with its dotted path from the root module.
pub struct NamedParam<'a> {
    pub name: String,
    pub param: ParamMut<'a>,
}

impl<'a> NamedParam<'a> {
    pub fn sparse(name: &str, param: &'a mut SparseParameter) -> Self {
        Self {
            name: name.to_string(),
            param: ParamMut::Sparse(param),
        }
    }

    pub fn dense(name: &str, param: &'a mut DenseParameter) -> Self {
        Self {
            name: name.to_string(),
            param: ParamMut::Dense(param),
        }
    }

    #[must_use]
    pub fn prefixed(mut self, prefix: &str) -> Self {
        self.name = format!("{}.{}", prefix, self.name);
        self
    }
}

pub trait Module {
    /// Every parameter reachable from this module, depth first.
    fn parameters_mut(&mut self) -> Box<dyn Iterator<Item = NamedParam<'_>> + '_>;
}

/// A linear layer whose weight matrix is a [`SparseParameter`] of shape `out x in`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseLinear {
    pub in_features: usize,
    pub out_features: usize,
    pub weight: SparseParameter,
    pub bias: Option<DenseParameter>,
}

impl SparseLinear {
    pub fn new(in_features: usize, out_features: usize, capacity: usize, bias: bool) -> Self {
        Self {
            in_features,
            out_features,
            weight: SparseParameter::with_shape(
                capacity,
                out_features as u64,
                in_features as u64,
            ),
            bias: bias.then(|| DenseParameter::zeros(out_features)),
        }
    }

    /// Wire up `n` random connections with weights drawn uniformly from `[-scale, scale)`.
    pub fn seed_connections<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        n: usize,
        scale: f32,
    ) -> Result<bool> {
        let shape = (self.out_features as u64, self.in_features as u64);
        let (row, col) = random_coordinates(rng, self.weight.structure(), shape, n);
        let sampled = row.len();
        let values = (0..sampled)
            .map(|_| {
                if scale > 0.0 {
                    rng.random_range(-scale..scale)
                } else {
                    0.0
                }
            })
            .collect();
        let placed = self
            .weight
            .grow(&GrowRequest::new(row, col).with_values(values))?;
        Ok(placed && sampled == n)
    }
}

impl Module for SparseLinear {
    fn parameters_mut(&mut self) -> Box<dyn Iterator<Item = NamedParam<'_>> + '_> {
        let weight = std::iter::once(NamedParam::sparse("weight", &mut self.weight));
        let bias = self
            .bias
            .as_mut()
            .map(|bias| NamedParam::dense("bias", bias));
        Box::new(weight.chain(bias))
    }
}

/// Ordered container; child parameters are prefixed with the child's position.
#[derive(Default)]
pub struct Sequential {
    layers: Vec<Box<dyn Module>>,
}

impl Sequential {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, layer: impl Module + 'static) {
        self.layers.push(Box::new(layer));
    }

    #[must_use]
    pub fn with(mut self, layer: impl Module + 'static) -> Self {
        self.push(layer);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Module for Sequential {
    fn parameters_mut(&mut self) -> Box<dyn Iterator<Item = NamedParam<'_>> + '_> {
        Box::new(self.layers.iter_mut().enumerate().flat_map(|(i, layer)| {
            let prefix = i.to_string();
            layer
                .parameters_mut()
                .map(move |param| param.prefixed(&prefix))
        }))
    }
}
