//! Process-wide logging setup shared by the binaries.

/// Tracing subscriber configuration (filters, JSON output).
pub mod tracing;

pub use self::tracing::{DEFAULT_FILTER, init, init_with_filter};
