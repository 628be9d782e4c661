use thiserror::Error;

use stockloan_core::DomainError;
use stockloan_infra::command_dispatcher::DispatchError;
use stockloan_infra::reservations::ReservationError;

use crate::gateway::{LookupFailure, RelocationFailure};

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Everything a workflow operation can report to its caller. None of these
/// leave persisted state changed.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Required setting missing or unresolvable.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid state (current: {current}): {reason}")]
    InvalidState { current: String, reason: String },

    /// Concurrent modification; the whole operation may be retried.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("relocation failed: {0}")]
    Relocation(#[from] RelocationFailure),

    /// The inventory item is already open on another loan.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(String),
}

impl WorkflowError {
    /// Stable machine-readable kind, used in API error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::Configuration(_) => "configuration_error",
            WorkflowError::InvalidState { .. } => "invalid_state",
            WorkflowError::Conflict(_) => "conflict",
            WorkflowError::Relocation(_) => "relocation_failure",
            WorkflowError::ConstraintViolation(_) => "constraint_violation",
            WorkflowError::NotFound(_) => "not_found",
            WorkflowError::Validation(_) => "validation_error",
            WorkflowError::Store(_) => "store_error",
        }
    }
}

impl From<DomainError> for WorkflowError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                WorkflowError::Validation(msg)
            }
            DomainError::InvalidState { current, reason } => {
                WorkflowError::InvalidState { current, reason }
            }
            DomainError::ConstraintViolation(msg) => WorkflowError::ConstraintViolation(msg),
            DomainError::NotFound(what) => WorkflowError::NotFound(what),
            DomainError::Conflict(msg) => WorkflowError::Conflict(msg),
        }
    }
}

impl From<DispatchError> for WorkflowError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Domain(err) => err.into(),
            DispatchError::Concurrency(msg) => WorkflowError::Conflict(msg),
            other => WorkflowError::Store(other.to_string()),
        }
    }
}

impl From<ReservationError> for WorkflowError {
    fn from(value: ReservationError) -> Self {
        match value {
            held @ ReservationError::Held { .. } => {
                WorkflowError::ConstraintViolation(held.to_string())
            }
            ReservationError::Poisoned => WorkflowError::Store(value.to_string()),
        }
    }
}

impl From<LookupFailure> for WorkflowError {
    fn from(value: LookupFailure) -> Self {
        WorkflowError::Store(value.to_string())
    }
}
