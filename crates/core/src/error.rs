//! Domain error model.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic business failures raised by aggregates.
///
/// Infrastructure concerns (storage, relocation transport) have their own
/// error types and are mapped at the workflow boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input (e.g. a due date before the loan date).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested transition is not allowed from the current status.
    #[error("invalid state (current: {current}): {reason}")]
    InvalidState { current: String, reason: String },

    /// A cross-entity invariant would be broken (e.g. double-booking an item).
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Stale version / optimistic concurrency.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(current: impl core::fmt::Display, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            current: current.to_string(),
            reason: reason.into(),
        }
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::ConstraintViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
