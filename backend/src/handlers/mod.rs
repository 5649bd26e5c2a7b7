use axum::{extract::State, http::StatusCode, response::Json};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use crate::AppState;

pub mod triggers;

pub use triggers::trigger_routes;

/// Healthy only when both the registry and the engine report healthy
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let registry = state.triggers.registry.health_check();
    let engine = state.triggers.engine.health_check();
    let healthy = registry.healthy && engine.healthy;

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "service": "ssm-triggers",
            "registry": registry,
            "engine": engine,
            "timestamp": Utc::now(),
        })),
    )
}
