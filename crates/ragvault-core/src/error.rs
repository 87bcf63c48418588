//! Error taxonomy for the engine.
//!
//! Validation failures ([`EngineError::InvalidArgument`],
//! [`EngineError::DimensionMismatch`]) are raised before any side effect.
//! Storage failures travel through [`EngineError::Storage`] unchanged.
//! [`EngineError::DuplicateContent`] is produced by stores when the
//! `(dataset_id, row_hash)` constraint rejects a write; the ingest pipeline
//! resolves it to the existing row and never hands it to callers.

use thiserror::Error;

use crate::ivf::kmeans::ClusteringError;

/// Convenience alias used throughout the core crate.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("duplicate content in dataset '{dataset_id}' (row_hash {row_hash})")]
    DuplicateContent { dataset_id: String, row_hash: String },

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("clustering failed: {0}")]
    Clustering(#[from] ClusteringError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidArgument(msg.into())
    }

    /// True for errors raised by input validation rather than by a backend.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidArgument(_) | EngineError::DimensionMismatch { .. }
        )
    }
}
