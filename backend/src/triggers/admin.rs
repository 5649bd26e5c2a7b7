// Administrative control surface over the registry, engine and capture layer

use chrono::Utc;
use ssm_shared::{
    CacheClearOutcome, EngineStats, EngineToggleOutcome, ExportedConfig, ManualExecutionOutcome,
    ManualExecutionRequest, RegistryStatus, ToggleOutcome, TriggerDetails, TriggerEvent, TriggerList,
    TriggerListFilters, TriggerPriority,
};
use std::sync::Arc;
use tracing::{info, warn};

use super::context::{ExecutionContext, RequestScope};
use super::engine::TriggerEngine;
use super::entity::entity_key;
use super::error::{TriggerError, TriggerResult};
use super::lifecycle::LifecycleCapture;
use super::registry::TriggerRegistry;

#[derive(Clone)]
pub struct TriggerAdmin {
    registry: Arc<TriggerRegistry>,
    engine: Arc<TriggerEngine>,
    capture: Arc<LifecycleCapture>,
}

fn not_found(name: &str) -> TriggerError {
    TriggerError::NotFound(format!("Trigger '{}' not found", name))
}

impl TriggerAdmin {
    pub fn new(registry: Arc<TriggerRegistry>, engine: Arc<TriggerEngine>, capture: Arc<LifecycleCapture>) -> Self {
        Self {
            registry,
            engine,
            capture,
        }
    }

    /// Unknown event or priority filter values are ignored
    pub fn list_triggers(&self, filters: &TriggerListFilters) -> TriggerResult<TriggerList> {
        let event = filters.event.as_deref().and_then(|e| e.parse::<TriggerEvent>().ok());
        let priority = filters
            .priority
            .as_deref()
            .and_then(|p| p.parse::<TriggerPriority>().ok());
        let entity = filters.entity_type.as_deref().map(entity_key);

        let triggers: Vec<_> = self
            .registry
            .get_all_triggers(filters.enabled_only)
            .iter()
            .filter(|t| event.is_none_or(|e| t.event() == e))
            .filter(|t| priority.is_none_or(|p| t.priority() == p))
            .filter(|t| entity.as_deref().is_none_or(|e| entity_key(t.entity_type()) == e))
            .map(|t| t.summary())
            .collect();

        Ok(TriggerList {
            total_count: triggers.len(),
            triggers,
            filters_applied: filters.clone(),
        })
    }

    pub fn get_trigger(&self, name: &str) -> TriggerResult<TriggerDetails> {
        self.registry
            .get(name)
            .map(|t| t.details())
            .ok_or_else(|| not_found(name))
    }

    /// Without an explicit `enable` the current state is flipped
    pub fn toggle(&self, name: &str, enable: Option<bool>) -> TriggerResult<ToggleOutcome> {
        let trigger = self.registry.get(name).ok_or_else(|| not_found(name))?;
        let enable = enable.unwrap_or(!trigger.is_enabled());

        if enable {
            self.registry.enable_trigger(name);
        } else {
            self.registry.disable_trigger(name);
        }

        Ok(ToggleOutcome {
            trigger_name: name.to_string(),
            action: if enable { "enabled" } else { "disabled" }.to_string(),
            enabled: enable,
            timestamp: Utc::now(),
        })
    }

    /// Load the instance from the store and run one trigger against it.
    /// Trigger failures are reported in the results, not as errors.
    pub async fn execute_manually(
        &self,
        name: &str,
        request: &ManualExecutionRequest,
        scope: &RequestScope,
    ) -> TriggerResult<ManualExecutionOutcome> {
        if request.entity_type.trim().is_empty() || request.instance_id.trim().is_empty() {
            return Err(TriggerError::InvalidRequest(
                "entity_type and instance_id are required".to_string(),
            ));
        }
        if self.registry.get(name).is_none() {
            return Err(not_found(name));
        }

        let event = match request.event.as_deref() {
            None => TriggerEvent::Custom,
            Some(raw) => raw.parse::<TriggerEvent>().unwrap_or_else(|e| {
                warn!("{}, running '{}' as custom", e, name);
                TriggerEvent::Custom
            }),
        };

        let instance = self
            .engine
            .store()
            .fetch(&request.entity_type, &request.instance_id)
            .await?
            .ok_or_else(|| {
                TriggerError::NotFound(format!(
                    "{} with id {} not found",
                    request.entity_type, request.instance_id
                ))
            })?;

        let executed_by = scope.actor.as_ref().map(|a| a.id.clone());
        let mut ctx = ExecutionContext::new(event, request.entity_type.clone())
            .with_instance(instance)
            .with_scope(scope);
        ctx.metadata = request.metadata.clone();
        let ctx = ctx
            .with_metadata("manual_execution", true)
            .with_metadata("executed_by", executed_by.clone());

        info!(
            "Manually executing trigger '{}' on {} {}",
            name, request.entity_type, request.instance_id
        );
        let results = self.engine.execute_custom_trigger(name, &ctx).await;

        Ok(ManualExecutionOutcome {
            trigger_name: name.to_string(),
            event,
            entity_type: entity_key(&request.entity_type),
            instance_id: request.instance_id.clone(),
            executed_by,
            execution_results: results.iter().map(|r| r.to_view()).collect(),
            timestamp: Utc::now(),
        })
    }

    pub fn toggle_engine(&self, enable: bool) -> TriggerResult<EngineToggleOutcome> {
        if enable {
            self.engine.enable();
        } else {
            self.engine.disable();
        }
        Ok(EngineToggleOutcome {
            enabled: self.engine.is_enabled(),
            timestamp: Utc::now(),
        })
    }

    pub fn export_config(&self, scope: &RequestScope) -> TriggerResult<ExportedConfig> {
        let mut config = self.registry.export_config();
        config.metadata.export_timestamp = Some(Utc::now());
        config.metadata.exported_by = scope.actor.as_ref().map(|a| a.id.clone());
        Ok(config)
    }

    /// Drop pending lifecycle snapshots and the registry lookup cache
    pub fn clear_cache(&self) -> TriggerResult<CacheClearOutcome> {
        let snapshots_cleared = self.capture.clear_cache();
        self.registry.clear_cache();
        info!("Trigger caches cleared ({} snapshots)", snapshots_cleared);

        Ok(CacheClearOutcome {
            message: "Trigger caches cleared".to_string(),
            snapshots_cleared,
            timestamp: Utc::now(),
        })
    }

    pub fn registry_status(&self) -> TriggerResult<RegistryStatus> {
        Ok(RegistryStatus {
            registry_stats: self.registry.get_registry_stats(),
            engine_stats: self.engine.stats(),
            capture: self.capture.status(),
            registry_health: self.registry.health_check(),
            engine_health: self.engine.health_check(),
            timestamp: Utc::now(),
        })
    }

    pub fn engine_stats(&self) -> TriggerResult<EngineStats> {
        Ok(self.engine.stats())
    }
}
