use axum::Router;

pub mod loans;
pub mod stock;
pub mod system;

/// Router for all endpoints that act on behalf of a user.
pub fn router() -> Router {
    Router::new()
        .nest("/loans", loans::router())
        .nest("/stock", stock::router())
}
