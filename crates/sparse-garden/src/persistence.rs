use crate::error::{GardenError, Result};
use crate::gardener::Gardener;
use crate::parameter::SparseParameter;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

pub fn save_bincode<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = bincode::serialize(value)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, data)?;
    Ok(())
}

pub fn load_bincode<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read(path)?;
    Ok(bincode::deserialize(&data)?)
}

/// Every sparse parameter of a model, keyed by its path name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GardenSnapshot {
    pub saved_at: DateTime<Utc>,
    pub parameters: Vec<(String, SparseParameter)>,
}

impl GardenSnapshot {
    pub fn capture(gardener: &Gardener<'_>) -> Self {
        Self {
            saved_at: Utc::now(),
            parameters: gardener
                .sparse_parameters()
                .map(|(name, param)| (name.to_string(), param.clone()))
                .collect(),
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        save_bincode(path, self)?;
        info!(path = %path.display(), parameters = self.parameters.len(), "garden snapshot saved");
        Ok(())
    }

    /// A missing file yields an empty snapshot.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                saved_at: Utc::now(),
                parameters: Vec::new(),
            });
        }
        let snapshot: Self = load_bincode(path)?;
        info!(path = %path.display(), parameters = snapshot.parameters.len(), "garden snapshot loaded");
        Ok(snapshot)
    }

    /// Replace the gardener's parameters with the snapshot's, matched by name.
    ///
    /// Every entry is checked before anything is written, so a bad snapshot
    /// leaves the model untouched. Returns how many parameters were restored.
    pub fn restore(&self, gardener: &mut Gardener<'_>) -> Result<usize> {
        let mut matched = Vec::with_capacity(self.parameters.len());
        for (name, saved) in &self.parameters {
            saved.check_invariants()?;
            let (index, current) = gardener
                .sparse_parameters()
                .enumerate()
                .find(|(_, (n, _))| *n == name.as_str())
                .map(|(i, (_, p))| (i, p))
                .ok_or_else(|| {
                    GardenError::Persistence(format!("model has no sparse parameter '{}'", name))
                })?;
            if current.capacity() != saved.capacity() {
                return Err(GardenError::Persistence(format!(
                    "capacity mismatch for '{}': model {}, snapshot {}",
                    name,
                    current.capacity(),
                    saved.capacity()
                )));
            }
            if current.shape() != saved.shape() {
                return Err(GardenError::Persistence(format!(
                    "shape mismatch for '{}': model {:?}, snapshot {:?}",
                    name,
                    current.shape(),
                    saved.shape()
                )));
            }
            matched.push((index, saved));
        }

        let mut targets: Vec<&mut SparseParameter> =
            gardener.sparse_parameters_mut().map(|(_, p)| p).collect();
        for (index, saved) in &matched {
            *targets[*index] = (*saved).clone();
        }
        Ok(matched.len())
    }
}
