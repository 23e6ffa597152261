//! Error types for the policy store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// A policy spec that violates its declared invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("namespace and name must be non-empty")]
    MissingIdentity,

    #[error("deployment name must be non-empty")]
    MissingDeployment,

    #[error("capacity must be greater than zero")]
    ZeroCapacity,

    #[error("minReplicas ({min}) exceeds maxReplicas ({max})")]
    InvertedBounds { min: u32, max: u32 },

    #[error("buffer threshold {0} is outside 0..=100")]
    ThresholdOutOfRange(u32),
}
