use axum::{http::Method, routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod error;
pub mod handlers;
pub mod triggers;

pub use error::{ApiResult, AppError};

use triggers::TriggerSystem;

pub struct AppState {
    pub triggers: TriggerSystem,
}

/// The HTTP application: health check plus the trigger admin surface
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "SSM Trigger Service API v0.1.0" }))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1/triggers", handlers::trigger_routes())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}
