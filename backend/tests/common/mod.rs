// Common test utilities that are shared across integration tests
#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use ssm_backend::config::TriggerSettings;
use ssm_backend::triggers::{
    EntitySnapshot, ExecutionResult, FunctionAction, InMemoryStore, SchemaRegistry, TriggerDefinition, TriggerError,
    TriggerSystem,
};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("ssm_backend=debug")
            .try_init()
            .ok();
    });
}

/// Settings without the built-in system triggers
pub fn test_settings() -> TriggerSettings {
    TriggerSettings {
        install_system_triggers: false,
        ..Default::default()
    }
}

pub fn bootstrap(definitions: Vec<TriggerDefinition>) -> (TriggerSystem, InMemoryStore) {
    bootstrap_with(test_settings(), SchemaRegistry::new(), definitions)
}

pub fn bootstrap_with(
    settings: TriggerSettings,
    schemas: SchemaRegistry,
    definitions: Vec<TriggerDefinition>,
) -> (TriggerSystem, InMemoryStore) {
    init_test_logging();
    let store = InMemoryStore::new();
    let (system, _report) = TriggerSystem::bootstrap(&settings, Arc::new(store.clone()), schemas, definitions)
        .expect("bootstrap should succeed");
    (system, store)
}

pub fn widget(id: &str, status: &str) -> EntitySnapshot {
    EntitySnapshot::new("Widget", id)
        .with_field("status", status)
        .with_field("approved", false)
        .with_field("quantity", 1)
}

pub fn succeed(label: &'static str) -> FunctionAction {
    FunctionAction::new(label, move |_ctx| async move { Ok(ExecutionResult::success(label)) })
}

pub fn fail(label: &'static str) -> FunctionAction {
    FunctionAction::new(label, move |_ctx| async move { Err(TriggerError::action(format!("{} failed", label))) })
        .with_retry_delay(Duration::from_millis(5))
}
