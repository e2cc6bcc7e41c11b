//! Assembles the REST + WebSocket surface: public (unauthenticated)
//! routes, read routes gated by `require_read`, flight routes gated by
//! `require_flight_control`, and admin routes gated by `require_admin`.

mod auth;
mod request_id;
mod routes;
mod ws;

pub use auth::RateLimiter;
pub use routes::ApiError;

use crate::services::Services;
use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Builds the full router, with per-tier auth middleware layered onto
/// each route group before they're merged. `rate_limit` wraps the whole
/// surface so an unauthenticated flood never reaches the JWT decode path.
pub fn build(services: Arc<Services>, rate_limiter: RateLimiter) -> Router {
    let public = routes::public_router();

    let read = routes::read_router().layer(middleware::from_fn_with_state(services.clone(), auth::require_read));

    let flight = routes::flight_router()
        .layer(middleware::from_fn_with_state(services.clone(), auth::require_flight_control));

    let admin = routes::admin_router().layer(middleware::from_fn_with_state(services.clone(), auth::require_admin));

    let login = Router::new().route("/auth/login", axum::routing::post(auth::login));

    Router::new()
        .merge(public)
        .merge(login)
        .merge(read)
        .merge(flight)
        .merge(admin)
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(rate_limiter, auth::rate_limit))
        .layer(middleware::from_fn(request_id::ensure_request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(services)
}
