//! HTTP surface of the backend.
//!
//! - `POST /api/process` - [`handler::process`]
//! - `GET /health` - [`handler::health`]

pub mod handler;

use crate::server::store::ClaimStore;
use axum::{
    Router,
    routing::{get, post},
};
use handler::BackendService;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Builds the backend router. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_router<S: ClaimStore>(service: BackendService<S>) -> Router {
    Router::new()
        .route("/api/process", post(handler::process::<S>))
        .route("/health", get(handler::health::<S>))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(service)
}
