// Explicit startup wiring: registry, engine, lifecycle capture and admin surface

use serde::Serialize;
use ssm_shared::{HealthReport, RegistryStats, TriggerEvent, TriggerPriority};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::actions::presets::audit_log;
use super::actions::NotificationAction;
use super::admin::TriggerAdmin;
use super::conditions::presets::user_has_role;
use super::definition::TriggerDefinition;
use super::engine::TriggerEngine;
use super::entity::SchemaRegistry;
use super::error::{TriggerError, TriggerResult};
use super::lifecycle::LifecycleCapture;
use super::registry::TriggerRegistry;
use super::store::EntityStore;
use crate::config::TriggerSettings;

#[derive(Debug, Clone, Serialize)]
pub struct InitializationReport {
    pub success: bool,
    pub components_initialized: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub registry_stats: RegistryStats,
    pub registry_health: HealthReport,
    pub engine_health: HealthReport,
}

/// Built-in triggers installed alongside application definitions
pub fn system_triggers() -> Vec<TriggerDefinition> {
    vec![
        TriggerDefinition::new("critical_data_change_audit", TriggerEvent::PostSave, "user")
            .with_description("Audit all changes made by admin users")
            .with_priority(TriggerPriority::Critical)
            .with_condition(user_has_role(&["admin"]))
            .with_action(audit_log("admin_data_change")),
        TriggerDefinition::new("system_notification_handler", TriggerEvent::Custom, "config")
            .with_description("Handle system-wide notifications")
            .with_priority(TriggerPriority::High)
            .with_action(NotificationAction::new(
                "System Update",
                "System configuration has been updated",
            )),
    ]
}

#[derive(Clone)]
pub struct TriggerSystem {
    pub registry: Arc<TriggerRegistry>,
    pub engine: Arc<TriggerEngine>,
    pub capture: Arc<LifecycleCapture>,
    pub admin: TriggerAdmin,
}

impl TriggerSystem {
    /// Wire every component and register `definitions` in order, followed by
    /// the system triggers when enabled. Any rejected definition fails the
    /// whole bootstrap.
    pub fn bootstrap(
        settings: &TriggerSettings,
        store: Arc<dyn EntityStore>,
        schemas: SchemaRegistry,
        definitions: Vec<TriggerDefinition>,
    ) -> TriggerResult<(Self, InitializationReport)> {
        let mut components = Vec::new();

        let registry = Arc::new(TriggerRegistry::with_schemas(schemas));
        components.push("registry".to_string());

        let engine = Arc::new(TriggerEngine::new(registry.clone(), store, settings.engine_config()));
        if !settings.engine_enabled {
            engine.disable();
        }
        components.push("engine".to_string());

        let capture = Arc::new(LifecycleCapture::new(
            engine.clone(),
            settings.execution_mode,
            settings.snapshot_cache_capacity,
        ));
        components.push("lifecycle_capture".to_string());

        let system = if settings.install_system_triggers {
            system_triggers()
        } else {
            Vec::new()
        };

        let mut errors = Vec::new();
        for definition in definitions.into_iter().chain(system) {
            match registry.try_register(definition) {
                Ok(()) => {}
                Err(TriggerError::Registration(problems)) => errors.extend(problems),
                Err(e) => errors.push(e.to_string()),
            }
        }
        if !errors.is_empty() {
            error!("Trigger system initialization failed: {}", errors.join("; "));
            return Err(TriggerError::Registration(errors));
        }
        components.push("triggers_registered".to_string());

        let admin = TriggerAdmin::new(registry.clone(), engine.clone(), capture.clone());
        components.push("admin".to_string());

        let registry_health = registry.health_check();
        let engine_health = engine.health_check();
        let warnings: Vec<String> = registry_health
            .issues
            .iter()
            .chain(&engine_health.issues)
            .cloned()
            .collect();
        for warning in &warnings {
            warn!("Trigger system: {}", warning);
        }

        let registry_stats = registry.get_registry_stats();
        info!(
            "Trigger system initialized: {} triggers ({} enabled)",
            registry_stats.total_triggers, registry_stats.enabled_triggers
        );

        let report = InitializationReport {
            success: true,
            components_initialized: components,
            errors,
            warnings,
            registry_stats,
            registry_health,
            engine_health,
        };

        Ok((
            Self {
                registry,
                engine,
                capture,
                admin,
            },
            report,
        ))
    }

    /// Drop pending snapshots and close the worker pool
    pub fn shutdown(&self) {
        let dropped = self.capture.clear_cache();
        if dropped > 0 {
            warn!("Discarded {} unmatched pre-save snapshots at shutdown", dropped);
        }
        self.engine.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::conditions::presets::field_changed;
    use crate::triggers::entity::{EntitySchema, FieldType};
    use crate::triggers::store::NullStore;

    fn settings(install_system_triggers: bool) -> TriggerSettings {
        TriggerSettings {
            install_system_triggers,
            ..Default::default()
        }
    }

    #[test]
    fn test_bootstrap_installs_system_triggers() {
        let definitions = vec![TriggerDefinition::new("app", TriggerEvent::PostSave, "Widget")];
        let (system, report) =
            TriggerSystem::bootstrap(&settings(true), Arc::new(NullStore), SchemaRegistry::new(), definitions).unwrap();

        assert!(report.success);
        assert_eq!(report.registry_stats.total_triggers, 3);
        assert!(report.components_initialized.contains(&"engine".to_string()));
        assert!(system.registry.get("critical_data_change_audit").is_some());
        assert_eq!(
            system.registry.get("system_notification_handler").unwrap().priority(),
            TriggerPriority::High
        );
    }

    #[test]
    fn test_bootstrap_rejects_schema_violations() {
        let schemas = SchemaRegistry::new().with(EntitySchema::new("Widget").field("status", FieldType::String));
        let definitions = vec![
            TriggerDefinition::new("typo", TriggerEvent::PostSave, "Widget").with_condition(field_changed("statsu")),
        ];

        match TriggerSystem::bootstrap(&settings(false), Arc::new(NullStore), schemas, definitions) {
            Err(TriggerError::Registration(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("statsu"));
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("bootstrap should fail"),
        }
    }

    #[test]
    fn test_disabled_engine_is_reported() {
        let settings = TriggerSettings {
            engine_enabled: false,
            install_system_triggers: false,
            ..Default::default()
        };
        let (system, report) = TriggerSystem::bootstrap(&settings, Arc::new(NullStore), SchemaRegistry::new(), Vec::new()).unwrap();

        assert!(!system.engine.is_enabled());
        assert!(report.warnings.contains(&"Engine is disabled".to_string()));
    }
}
