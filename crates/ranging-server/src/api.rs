//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `ranging` - Ranging requests, session status, and stop
//! - `radio` - Simulated radio control
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod error;
pub mod health;
pub mod openapi;
pub mod radio;
pub mod ranging;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /ranging           - Request, inspect, and stop ranging
/// ├── /radio             - Simulated radio events and command log
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .nest("/ranging", ranging::router())
                .nest("/radio", radio::router())
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
