//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: event store, dispatcher, loan directory and coordinator
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use stockloan_workflow::LoanSettings;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(settings: LoanSettings) -> anyhow::Result<Router> {
    let services = Arc::new(services::build_services(settings)?);
    Ok(router_for(services))
}

/// Router over already-built services.
pub fn router_for(services: Arc<services::AppServices>) -> Router {
    // Everything except health needs an acting user.
    let protected = routes::router()
        .layer(axum::middleware::from_fn(middleware::acting_user_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
