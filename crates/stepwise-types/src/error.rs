use thiserror::Error;

use crate::workflow::ExecutionStatus;

/// Errors from repository operations (used by trait definitions in stepwise-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors related to template operations.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("invalid template: {0}")]
    Invalid(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<RepositoryError> for TemplateError {
    fn from(err: RepositoryError) -> Self {
        TemplateError::Storage(err.to_string())
    }
}

/// Rejected move in the run state machine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("illegal status transition: {from} -> {to}")]
pub struct StatusTransitionError {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
}
