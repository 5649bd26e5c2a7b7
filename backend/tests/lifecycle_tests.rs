mod common;

use serde::{Deserialize, Serialize};

use common::{bootstrap, bootstrap_with, succeed, test_settings, widget};
use ssm_backend::config::TriggerSettings;
use ssm_backend::triggers::actions::presets::{audit_log, update_field};
use ssm_backend::triggers::conditions::presets::{on_create, status_changed_to};
use ssm_backend::triggers::{
    Actor, Entity, EntitySchema, EntitySnapshot, FieldType, PredicateCondition, RequestScope, SchemaRegistry,
    TriggerDefinition, TriggerEvent, TriggerPriority,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Widget {
    id: String,
    status: String,
    approved: bool,
}

impl Entity for Widget {
    const ENTITY_TYPE: &'static str = "Widget";

    fn entity_id(&self) -> Option<String> {
        Some(self.id.clone())
    }
}

fn widget_schema() -> SchemaRegistry {
    SchemaRegistry::new().with(
        EntitySchema::new("Widget")
            .field("id", FieldType::String)
            .field("status", FieldType::String)
            .field("approved", FieldType::Boolean),
    )
}

#[tokio::test]
async fn test_status_activation_approves_widget() {
    let (system, store) = bootstrap_with(
        test_settings(),
        widget_schema(),
        vec![
            TriggerDefinition::new("approve_on_activation", TriggerEvent::PostSave, "Widget")
                .with_priority(TriggerPriority::Critical)
                .with_condition(status_changed_to("active"))
                .with_action(update_field("approved", true)),
        ],
    );

    let draft = Widget {
        id: "w1".to_string(),
        status: "draft".to_string(),
        approved: false,
    };
    store.insert(EntitySnapshot::capture(&draft).unwrap()).await.unwrap();

    let scope = RequestScope::for_actor(Actor::new("u-1"));
    let active = EntitySnapshot::capture(&Widget {
        status: "active".to_string(),
        ..draft
    })
    .unwrap();

    let pre = system.capture.notify_pre_mutation(&active, &scope).await;
    assert!(pre.is_empty());
    assert_eq!(system.capture.cache_size(), 1);

    store.insert(active.clone()).await.unwrap();
    let results = system.capture.notify_post_mutation(&active, false, None, &scope).await;

    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].modified_fields, vec!["approved".to_string()]);
    assert_eq!(system.capture.cache_size(), 0);

    let saved: Widget = store.get("Widget", "w1").await.unwrap().restore().unwrap();
    assert!(saved.approved);
}

#[tokio::test]
async fn test_unchanged_status_does_not_fire() {
    let (system, store) = bootstrap(vec![
        TriggerDefinition::new("approve_on_activation", TriggerEvent::PostSave, "Widget")
            .with_condition(status_changed_to("active"))
            .with_action(update_field("approved", true)),
    ]);
    store.insert(widget("w1", "active")).await.unwrap();

    let scope = RequestScope::system();
    let same = widget("w1", "active").with_field("quantity", 3);
    system.capture.notify_pre_mutation(&same, &scope).await;
    let results = system.capture.notify_post_mutation(&same, false, Some(vec!["quantity".into()]), &scope).await;

    assert!(results[0].is_skipped());
    assert_eq!(store.get("Widget", "w1").await.unwrap().get_bool("approved"), Some(false));
}

#[tokio::test]
async fn test_creation_has_no_previous_snapshot() {
    let (system, _) = bootstrap(vec![
        TriggerDefinition::new("welcome", TriggerEvent::PostSave, "Widget")
            .with_condition(on_create())
            .with_condition(PredicateCondition::new("no previous state", |ctx| ctx.previous.is_none()))
            .with_action(succeed("welcomed")),
    ]);

    let scope = RequestScope::system();
    let created = widget("w9", "draft");
    let results = system.capture.notify_post_mutation(&created, true, None, &scope).await;
    assert_eq!(results[0].message.as_deref(), Some("welcomed"));

    let updated = system.capture.notify_post_mutation(&created, false, None, &scope).await;
    assert!(updated[0].is_skipped());
}

#[tokio::test]
async fn test_delete_events_carry_only_current_state() {
    let only_instance = |ctx: &ssm_backend::triggers::ExecutionContext| ctx.previous.is_none() && ctx.instance.is_some();
    let (system, store) = bootstrap(vec![
        TriggerDefinition::new("before_delete", TriggerEvent::PreDelete, "Widget")
            .with_condition(PredicateCondition::new("current only", only_instance))
            .with_action(succeed("pre")),
        TriggerDefinition::new("after_delete", TriggerEvent::PostDelete, "Widget")
            .with_condition(PredicateCondition::new("current only", only_instance))
            .with_action(audit_log("widget_deleted")),
    ]);

    let scope = RequestScope::for_actor(Actor::new("u-2"));
    let doomed = widget("w3", "retired");

    let pre = system.capture.notify_pre_delete(&doomed, &scope).await;
    assert_eq!(pre[0].message.as_deref(), Some("pre"));

    let post = system.capture.notify_post_delete(&doomed, &scope).await;
    assert!(post[0].success);

    let logs = store.records_of("activity_log").await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].get_str("user_id"), Some("u-2"));
    assert_eq!(logs[0].get_str("action_type"), Some("widget_deleted"));
}

#[tokio::test]
async fn test_bulk_and_custom_metadata() {
    let (system, _) = bootstrap(vec![
        TriggerDefinition::new("bulk", TriggerEvent::PostBulkUpdate, "Widget")
            .with_condition(PredicateCondition::new("three ids", |ctx| {
                ctx.metadata.get("bulk_count").and_then(|v| v.as_u64()) == Some(3)
            }))
            .with_action(succeed("bulk")),
        TriggerDefinition::new("recount", TriggerEvent::Custom, "Widget")
            .with_condition(PredicateCondition::new("recount event", |ctx| {
                ctx.metadata.get("custom_event").and_then(|v| v.as_str()) == Some("recount")
            }))
            .with_action(succeed("custom")),
    ]);
    let scope = RequestScope::system();

    let batch = vec![widget("a", "x"), widget("b", "x"), widget("c", "x")];
    let results = system
        .capture
        .notify_bulk(TriggerEvent::PostBulkUpdate, "Widget", &batch, &scope)
        .await;
    assert_eq!(results[0].message.as_deref(), Some("bulk"));

    let ignored = system.capture.notify_bulk(TriggerEvent::PostSave, "Widget", &batch, &scope).await;
    assert!(ignored.is_empty());

    let results = system
        .capture
        .notify_custom("recount", &widget("a", "x"), Default::default(), &scope)
        .await;
    assert_eq!(results[0].message.as_deref(), Some("custom"));
}

#[tokio::test]
async fn test_snapshot_cache_is_bounded() {
    let settings = TriggerSettings {
        snapshot_cache_capacity: 2,
        ..test_settings()
    };
    let (system, store) = bootstrap_with(settings, SchemaRegistry::new(), Vec::new());
    let scope = RequestScope::system();

    for id in ["1", "2", "3"] {
        store.insert(widget(id, "draft")).await.unwrap();
        system.capture.notify_pre_mutation(&widget(id, "active"), &scope).await;
    }

    let status = system.capture.status();
    assert_eq!(status.cache_size, 2);
    assert_eq!(status.cache_capacity, Some(2));
    assert_eq!(system.capture.clear_cache(), 2);
}

#[tokio::test]
async fn test_disabled_capture_is_silent() {
    let (system, store) = bootstrap(vec![
        TriggerDefinition::new("any", TriggerEvent::PostSave, "Widget").with_action(succeed("ran")),
    ]);
    store.insert(widget("w1", "draft")).await.unwrap();
    let scope = RequestScope::system();

    system.capture.disable();
    assert!(system.capture.notify_pre_mutation(&widget("w1", "active"), &scope).await.is_empty());
    assert!(system.capture.notify_post_mutation(&widget("w1", "active"), false, None, &scope).await.is_empty());
    assert_eq!(system.capture.cache_size(), 0);

    system.capture.enable();
    let results = system.capture.notify_post_mutation(&widget("w1", "active"), false, None, &scope).await;
    assert_eq!(results.len(), 1);
}
