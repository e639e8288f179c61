//! OpsFlow error abstractions.

use thiserror::Error;

/// Application error variants.
#[derive(Debug, Error)]
pub enum AppError {
    /// The named object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),
    /// The named object was created by a concurrent writer.
    #[error("object already exists: {0}")]
    AlreadyExists(String),
    /// The object was written with a stale resource version.
    #[error("conflicting write to object: {0}")]
    Conflict(String),
    /// A query against the cluster API or the record store failed.
    #[error("query error: {0:#}")]
    Query(anyhow::Error),
    /// A call to the fleet service failed.
    #[error("fleet rpc error: {0:#}")]
    Rpc(anyhow::Error),
    /// A queued task declared a type with no registered handler.
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),
    /// A queued task carried a payload which does not match its type.
    #[error("malformed task payload: {0}")]
    PayloadShape(String),
}

impl AppError {
    /// Check if the given error is an `AppError::NotFound`.
    pub fn is_not_found(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<Self>(), Some(Self::NotFound(_)))
    }

    /// Check if the given error is an `AppError::AlreadyExists`.
    pub fn is_already_exists(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<Self>(), Some(Self::AlreadyExists(_)))
    }

    /// Check if the given error is an `AppError::Conflict`.
    pub fn is_conflict(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<Self>(), Some(Self::Conflict(_)))
    }
}
