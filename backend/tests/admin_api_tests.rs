mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use common::{bootstrap, fail, succeed, widget};
use ssm_backend::triggers::{InMemoryStore, TriggerDefinition, TriggerEvent, TriggerPriority, TriggerSystem};
use ssm_backend::{app, AppState};

async fn setup() -> (Router, TriggerSystem, InMemoryStore) {
    let (system, store) = bootstrap(vec![
        TriggerDefinition::new("greet", TriggerEvent::PostSave, "Widget")
            .with_priority(TriggerPriority::High)
            .with_action(succeed("greeted")),
        TriggerDefinition::new("broken", TriggerEvent::Custom, "Widget")
            .with_max_retries(0)
            .with_action(fail("broken")),
    ]);
    store.insert(widget("w1", "active")).await.unwrap();

    let router = app(Arc::new(AppState {
        triggers: system.clone(),
    }));
    (router, system, store)
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-actor-id", "admin-1")
        .header("x-actor-role", "admin");
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = router.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_list_triggers() {
    let (router, _, _) = setup().await;

    let (status, body) = send(&router, Method::GET, "/api/v1/triggers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["total_count"], 2);
    assert_eq!(body["data"]["triggers"][0]["name"], "greet");

    let (_, body) = send(&router, Method::GET, "/api/v1/triggers?event=custom", None).await;
    assert_eq!(body["data"]["total_count"], 1);
    assert_eq!(body["data"]["triggers"][0]["name"], "broken");
}

#[tokio::test]
async fn test_unknown_trigger_is_not_found() {
    let (router, _, _) = setup().await;

    let (status, body) = send(&router, Method::GET, "/api/v1/triggers/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "NOT_FOUND");
    assert_eq!(body["error"], "Trigger 'unknown' not found");
}

#[tokio::test]
async fn test_trigger_details() {
    let (router, _, _) = setup().await;

    let (status, body) = send(&router, Method::GET, "/api/v1/triggers/greet", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "greet");
    assert_eq!(body["data"]["priority"], "HIGH");
    assert_eq!(body["data"]["actions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_toggle_trigger() {
    let (router, system, _) = setup().await;

    let (status, body) = send(&router, Method::POST, "/api/v1/triggers/greet/toggle", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["enabled"], false);
    assert!(!system.registry.get("greet").unwrap().is_enabled());

    let (_, body) = send(
        &router,
        Method::POST,
        "/api/v1/triggers/greet/toggle",
        Some(json!({ "enable": true })),
    )
    .await;
    assert_eq!(body["data"]["enabled"], true);
    assert!(system.registry.get("greet").unwrap().is_enabled());
}

#[tokio::test]
async fn test_manual_execution_requires_instance() {
    let (router, _, _) = setup().await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/v1/triggers/greet/execute",
        Some(json!({ "entity_type": "Widget" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/v1/triggers/greet/execute",
        Some(json!({ "entity_type": "Widget", "instance_id": "missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Widget with id missing not found");
}

#[tokio::test]
async fn test_manual_execution_runs_trigger() {
    let (router, _, _) = setup().await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/v1/triggers/greet/execute",
        Some(json!({ "entity_type": "Widget", "instance_id": "w1", "event": "post_save" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["event"], "post_save");
    assert_eq!(body["data"]["executed_by"], "admin-1");
    let results = body["data"]["execution_results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[0]["message"], "greeted");

    // action failures are reported inside a successful response
    let (status, body) = send(
        &router,
        Method::POST,
        "/api/v1/triggers/broken/execute",
        Some(json!({ "entity_type": "Widget", "instance_id": "w1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["execution_results"][0]["success"], false);
}

#[tokio::test]
async fn test_engine_toggle_and_stats() {
    let (router, system, _) = setup().await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/v1/triggers/engine/toggle",
        Some(json!({ "enable": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["enabled"], false);
    assert!(!system.engine.is_enabled());

    let (status, _) = send(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    send(
        &router,
        Method::POST,
        "/api/v1/triggers/engine/toggle",
        Some(json!({ "enable": true })),
    )
    .await;
    let (status, body) = send(&router, Method::GET, "/api/v1/triggers/engine", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["enabled"], true);
}

#[tokio::test]
async fn test_health_and_status() {
    let (router, _, _) = setup().await;

    let (status, body) = send(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "ssm-triggers");

    let (status, body) = send(&router, Method::GET, "/api/v1/triggers/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn test_export_and_cache_clear() {
    let (router, _, _) = setup().await;

    let (status, body) = send(&router, Method::GET, "/api/v1/triggers/export", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["metadata"]["total_count"], 2);
    assert_eq!(body["data"]["metadata"]["exported_by"], "admin-1");

    let (status, body) = send(&router, Method::POST, "/api/v1/triggers/cache/clear", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["snapshots_cleared"], 0);
}
