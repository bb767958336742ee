mod health;
mod lead;
mod metrics;

pub use health::health_handler;
pub use lead::lead_handler;
pub use metrics::metrics_handler;

use axum::{
    Router,
    http::{HeaderValue, header},
    routing::{any, get},
};
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::state::AppState;

pub const LEAD_PATH: &str = "/api/lead";

// Every response, errors and 404s included, carries the same CORS headers so the
// marketing site can always read the result.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route(LEAD_PATH, any(lead_handler))
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("POST, OPTIONS"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, Authorization"),
        ))
}
