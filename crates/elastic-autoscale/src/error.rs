//! Reconcile error types.

use thiserror::Error;

/// Errors that abort a reconciliation cycle. All of them are treated as
/// transient: the key is requeued with backoff.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("state store error: {0}")]
    State(#[from] elastic_state::StateError),

    #[error("rate source failed: {0}")]
    Rate(#[source] anyhow::Error),

    #[error("rate source returned an unusable value: {0}")]
    InvalidRate(f64),

    #[error("reading scale of {deployment} failed: {source}")]
    ScaleRead {
        deployment: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("updating scale of {deployment} failed: {source}")]
    ScaleWrite {
        deployment: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("persisting status failed: {0}")]
    StatusWrite(#[source] anyhow::Error),

    #[error("reconcile task panicked: {0}")]
    Panicked(String),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
