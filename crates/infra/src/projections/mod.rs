//! Projections (read model builders).
//!
//! Every projection is rebuildable from the event store and idempotent under
//! at-least-once delivery.

pub mod loans;

pub use loans::{
    LoanDirectoryError, LoanDirectoryProjection, LoanLineSummary, LoanQuery, LoanSortKey,
    LoanSummary,
};
