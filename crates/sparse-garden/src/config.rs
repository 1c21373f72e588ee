//! Runtime configuration for the `garden` binary.

use crate::error::{GardenError, Result};
use crate::module::{Sequential, SparseLinear};
use crate::prune::PruneRequest;
use rand::Rng;
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_LAYERS: [usize; 3] = [64, 32, 10];
const DEFAULT_DENSITY: f32 = 0.1;
const DEFAULT_CAPACITY_FACTOR: f32 = 1.5;
const DEFAULT_CYCLES: usize = 5;
const DEFAULT_PRUNE_PERCENTAGE: f32 = 20.0;
const DEFAULT_INIT_SCALE: f32 = 0.1;
const DEFAULT_SEED: u64 = 0x5eed;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GardenConfig {
    /// Feature widths; each consecutive pair becomes one sparse layer.
    pub layers: Vec<usize>,
    /// Fraction of each layer's dense size wired at start.
    pub density: f32,
    /// Slot capacity as a multiple of the initial connection count.
    pub capacity_factor: f32,
    pub cycles: usize,
    pub prune: PruneRequest,
    pub init_scale: f32,
    pub seed: u64,
    pub snapshot_path: Option<PathBuf>,
}

impl Default for GardenConfig {
    fn default() -> Self {
        Self {
            layers: DEFAULT_LAYERS.to_vec(),
            density: DEFAULT_DENSITY,
            capacity_factor: DEFAULT_CAPACITY_FACTOR,
            cycles: DEFAULT_CYCLES,
            prune: PruneRequest::relative(DEFAULT_PRUNE_PERCENTAGE),
            init_scale: DEFAULT_INIT_SCALE,
            seed: DEFAULT_SEED,
            snapshot_path: None,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| GardenError::Configuration(format!("invalid value for {}: {:?}", key, raw))),
        Err(_) => Ok(None),
    }
}

impl GardenConfig {
    /// Load from the JSON file named by `GARDEN_CONFIG`, or from defaults
    /// overridden by individual `GARDEN_*` variables.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = std::env::var("GARDEN_CONFIG") {
            let content = std::fs::read_to_string(&path)?;
            let config = Self::from_json(&content)?;
            return Ok(config);
        }

        let mut config = Self::default();
        if let Ok(raw) = std::env::var("GARDEN_LAYERS") {
            config.layers = raw
                .split(',')
                .map(|w| w.trim().parse::<usize>())
                .collect::<std::result::Result<_, _>>()
                .map_err(|_| {
                    GardenError::Configuration(format!("invalid value for GARDEN_LAYERS: {:?}", raw))
                })?;
        }
        if let Some(density) = env_parse("GARDEN_DENSITY")? {
            config.density = density;
        }
        if let Some(factor) = env_parse("GARDEN_CAPACITY_FACTOR")? {
            config.capacity_factor = factor;
        }
        if let Some(cycles) = env_parse("GARDEN_CYCLES")? {
            config.cycles = cycles;
        }
        if let Some(percentage) = env_parse("GARDEN_PRUNE_PERCENTAGE")? {
            config.prune = PruneRequest::relative(percentage);
        }
        if let Some(scale) = env_parse("GARDEN_INIT_SCALE")? {
            config.init_scale = scale;
        }
        if let Some(seed) = env_parse("GARDEN_SEED")? {
            config.seed = seed;
        }
        config.snapshot_path = std::env::var("GARDEN_SNAPSHOT_PATH").ok().map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.layers.len() < 2 {
            return Err(GardenError::Configuration(
                "at least two layer widths are required".to_string(),
            ));
        }
        if self.layers.contains(&0) {
            return Err(GardenError::Configuration(
                "layer widths must be non-zero".to_string(),
            ));
        }
        if !(self.density > 0.0 && self.density <= 1.0) {
            return Err(GardenError::Configuration(format!(
                "density must be in (0, 1], got {}",
                self.density
            )));
        }
        if !self.capacity_factor.is_finite() || self.capacity_factor < 1.0 {
            return Err(GardenError::Configuration(format!(
                "capacity_factor must be finite and at least 1, got {}",
                self.capacity_factor
            )));
        }
        if !self.init_scale.is_finite() || self.init_scale < 0.0 {
            return Err(GardenError::Configuration(format!(
                "init_scale must be finite and non-negative, got {}",
                self.init_scale
            )));
        }
        self.prune.mode()?;
        Ok(())
    }

    /// Number of connections initially wired in a `fan_in x fan_out` layer.
    pub fn initial_connections(&self, fan_in: usize, fan_out: usize) -> usize {
        ((fan_in * fan_out) as f32 * self.density).ceil() as usize
    }

    /// Build the sparse model described by this config, with random initial wiring.
    pub fn build_model<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Sequential> {
        let mut model = Sequential::new();
        for pair in self.layers.windows(2) {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            let initial = self.initial_connections(fan_in, fan_out);
            let capacity = (initial as f32 * self.capacity_factor).ceil() as usize;
            let mut layer = SparseLinear::new(fan_in, fan_out, capacity, true);
            layer.seed_connections(rng, initial, self.init_scale)?;
            model.push(layer);
        }
        Ok(model)
    }
}
