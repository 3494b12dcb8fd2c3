pub mod handler;

use axum::{Router, routing::get};

use crate::state::AppState;

/// 健康检查路由
pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(handler::health))
        .route("/health/live", get(handler::liveness))
        .route("/health/ready", get(handler::readiness))
        .route("/health/modules", get(handler::modules))
        .route("/health/services/:name", get(handler::service))
        .route("/health/metrics", get(handler::live_metrics))
}
