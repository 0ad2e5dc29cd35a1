//! HTTP surface of the gateway.
//!
//! ## Structure
//!
//! - [`handler`] - [`GatewayService`](handler::GatewayService) and the route
//!   handlers.
//!
//! ## Routes
//!
//! | Method | Path               | Handler                    |
//! |--------|--------------------|----------------------------|
//! | POST   | `/api/process`     | [`handler::process`]       |
//! | GET    | `/health`          | [`handler::health`]        |
//! | GET    | `/api/queue/stats` | [`handler::queue_stats`]   |

pub mod handler;

use axum::{
    Router,
    routing::{get, post},
};
use handler::GatewayService;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Builds the gateway router. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()` so handlers can see
/// the peer address.
pub fn create_router(service: GatewayService) -> Router {
    Router::new()
        .route("/api/process", post(handler::process))
        .route("/health", get(handler::health))
        .route("/api/queue/stats", get(handler::queue_stats))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(service)
}
