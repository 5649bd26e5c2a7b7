use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap},
    response::Json,
    routing::{get, post},
    Router,
};
use ssm_shared::{
    AdminResponse, CacheClearOutcome, EngineStats, EngineToggleOutcome, EngineToggleRequest, ExportedConfig,
    ManualExecutionOutcome, ManualExecutionRequest, RegistryStatus, ToggleOutcome, ToggleRequest, TriggerDetails,
    TriggerList, TriggerListFilters,
};
use std::convert::Infallible;
use std::net::IpAddr;
use std::sync::Arc;

use crate::error::ApiResult;
use crate::triggers::{Actor, RequestMeta, RequestScope};
use crate::AppState;

pub fn trigger_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_triggers))
        .route("/status", get(registry_status))
        .route("/engine", get(engine_stats))
        .route("/engine/toggle", post(toggle_engine))
        .route("/export", get(export_config))
        .route("/cache/clear", post(clear_cache))
        .route("/:name", get(get_trigger))
        .route("/:name/toggle", post(toggle_trigger))
        .route("/:name/execute", post(execute_trigger))
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Build the request scope from the caller's headers
pub fn scope_from_headers(headers: &HeaderMap, path: &str) -> RequestScope {
    let actor = header(headers, "x-actor-id").map(|id| {
        let mut actor = Actor::new(id);
        actor.role = header(headers, "x-actor-role");
        actor.display_name = header(headers, "x-actor-name");
        actor
    });

    let ip_address = header(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(str::trim).map(str::to_string))
        .and_then(|ip| ip.parse::<IpAddr>().ok());

    RequestScope {
        actor,
        request: Some(RequestMeta {
            request_id: header(headers, "x-request-id"),
            ip_address,
            user_agent: header(headers, "user-agent"),
            path: Some(path.to_string()),
        }),
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestScope
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(scope_from_headers(&parts.headers, parts.uri.path()))
    }
}

async fn list_triggers(
    State(state): State<Arc<AppState>>,
    Query(filters): Query<TriggerListFilters>,
) -> ApiResult<Json<AdminResponse<TriggerList>>> {
    Ok(Json(AdminResponse::ok(state.triggers.admin.list_triggers(&filters)?)))
}

async fn get_trigger(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<AdminResponse<TriggerDetails>>> {
    Ok(Json(AdminResponse::ok(state.triggers.admin.get_trigger(&name)?)))
}

async fn toggle_trigger(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Option<Json<ToggleRequest>>,
) -> ApiResult<Json<AdminResponse<ToggleOutcome>>> {
    let enable = body.and_then(|Json(request)| request.enable);
    Ok(Json(AdminResponse::ok(state.triggers.admin.toggle(&name, enable)?)))
}

async fn execute_trigger(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    scope: RequestScope,
    Json(request): Json<ManualExecutionRequest>,
) -> ApiResult<Json<AdminResponse<ManualExecutionOutcome>>> {
    let outcome = state.triggers.admin.execute_manually(&name, &request, &scope).await?;
    Ok(Json(AdminResponse::ok(outcome)))
}

async fn toggle_engine(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EngineToggleRequest>,
) -> ApiResult<Json<AdminResponse<EngineToggleOutcome>>> {
    Ok(Json(AdminResponse::ok(state.triggers.admin.toggle_engine(request.enable)?)))
}

async fn export_config(
    State(state): State<Arc<AppState>>,
    scope: RequestScope,
) -> ApiResult<Json<AdminResponse<ExportedConfig>>> {
    Ok(Json(AdminResponse::ok(state.triggers.admin.export_config(&scope)?)))
}

async fn clear_cache(State(state): State<Arc<AppState>>) -> ApiResult<Json<AdminResponse<CacheClearOutcome>>> {
    Ok(Json(AdminResponse::ok(state.triggers.admin.clear_cache()?)))
}

async fn registry_status(State(state): State<Arc<AppState>>) -> ApiResult<Json<AdminResponse<RegistryStatus>>> {
    Ok(Json(AdminResponse::ok(state.triggers.admin.registry_status()?)))
}

async fn engine_stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<AdminResponse<EngineStats>>> {
    Ok(Json(AdminResponse::ok(state.triggers.admin.engine_stats()?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_scope_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-actor-id", HeaderValue::from_static("u-1"));
        headers.insert("x-actor-role", HeaderValue::from_static("admin"));
        headers.insert("x-request-id", HeaderValue::from_static("req-9"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.7, 192.168.1.1"));

        let scope = scope_from_headers(&headers, "/api/v1/triggers/export");
        let actor = scope.actor.unwrap();
        assert_eq!(actor.id, "u-1");
        assert!(actor.has_role("ADMIN"));

        let request = scope.request.unwrap();
        assert_eq!(request.request_id.as_deref(), Some("req-9"));
        assert_eq!(request.ip_address, Some("10.0.0.7".parse().unwrap()));
        assert_eq!(request.path.as_deref(), Some("/api/v1/triggers/export"));
    }

    #[test]
    fn test_anonymous_scope() {
        let scope = scope_from_headers(&HeaderMap::new(), "/");
        assert!(scope.actor.is_none());
        assert!(scope.request.unwrap().user_agent.is_none());
    }
}
