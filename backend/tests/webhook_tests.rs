mod common;

use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{bootstrap, widget};
use ssm_backend::triggers::{
    Actor, ExecutionContext, ExecutionMode, RequestScope, TriggerDefinition, TriggerEvent, WebhookAction,
};

fn ctx() -> ExecutionContext {
    ExecutionContext::new(TriggerEvent::PostSave, "Widget")
        .with_instance(widget("w1", "active"))
        .with_scope(&RequestScope::for_actor(Actor::new("u-7").with_display_name("Dana")))
}

#[tokio::test]
async fn test_webhook_posts_event_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/widgets"))
        .and(header("x-signature", "secret"))
        .and(body_partial_json(json!({
            "event": "post_save",
            "entity_type": "Widget",
            "instance": { "id": "w1" },
            "user": { "id": "u-7", "name": "Dana" },
            "status": "active",
        })))
        .respond_with(ResponseTemplate::new(202).set_body_string("queued"))
        .expect(1)
        .mount(&server)
        .await;

    let (system, _) = bootstrap(vec![
        TriggerDefinition::new("notify_hook", TriggerEvent::PostSave, "Widget").with_action(
            WebhookAction::post(&format!("{}/hooks/widgets", server.uri()))
                .with_header("x-signature", "secret")
                .with_payload("status", "{{status}}"),
        ),
    ]);

    let results = system
        .engine
        .execute_triggers(TriggerEvent::PostSave, &ctx(), ExecutionMode::Sequential)
        .await;

    assert_eq!(results.len(), 1);
    assert!(results[0].success, "{:?}", results[0].message);
    assert_eq!(results[0].data["status_code"], 202);
    assert_eq!(results[0].data["response_text"], "queued");

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(body["timestamp"].is_string());
    assert!(body["execution_id"].is_string());
}

#[tokio::test]
async fn test_webhook_error_status_fails_action() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let (system, _) = bootstrap(vec![
        TriggerDefinition::new("notify_hook", TriggerEvent::PostSave, "Widget")
            .with_max_retries(0)
            .with_action(WebhookAction::post(&server.uri())),
    ]);

    let results = system
        .engine
        .execute_triggers(TriggerEvent::PostSave, &ctx(), ExecutionMode::Sequential)
        .await;

    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert!(results[0].error.is_some());
}

#[tokio::test]
async fn test_unreachable_webhook_fails_action() {
    let (system, _) = bootstrap(vec![
        TriggerDefinition::new("notify_hook", TriggerEvent::PostSave, "Widget")
            .with_max_retries(0)
            .with_action(WebhookAction::post("http://127.0.0.1:9/unreachable")),
    ]);

    let results = system
        .engine
        .execute_triggers(TriggerEvent::PostSave, &ctx(), ExecutionMode::Sequential)
        .await;

    assert!(!results[0].success);
}
