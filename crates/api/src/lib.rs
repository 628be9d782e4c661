//! HTTP API: server, routing, and request/response mapping.

pub mod app;
pub mod context;
pub mod middleware;

/// Address the binary listens on.
pub const ENV_BIND_ADDR: &str = "STOCKLOAN_BIND_ADDR";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
