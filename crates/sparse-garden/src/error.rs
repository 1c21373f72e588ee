//! Error taxonomy for sparse parameter management.

use thiserror::Error;

/// Errors raised by prune/grow requests, gardener dispatch and snapshots.
///
/// `Clone + PartialEq` so a broadcast can tell whether every instance failed
/// for the same reason.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GardenError {
    /// Invalid or ambiguous selection policy (prune modes, percentages, thresholds).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed grow request (length mismatch, negative or out-of-shape coordinates).
    #[error("validation error: {0}")]
    Validation(String),

    /// Grow request larger than the inactive pool with discarding disabled.
    #[error("insufficient capacity: requested {requested} connections, {available} inactive slots remain")]
    Capacity { requested: usize, available: usize },

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<std::io::Error> for GardenError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<bincode::Error> for GardenError {
    fn from(err: bincode::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for GardenError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GardenError>;
