// Trigger definitions - binding of an event and entity type to conditions and actions

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value;
use ssm_shared::{ComponentInfo, ExecutionStats, TriggerConfig, TriggerDetails, TriggerEvent, TriggerPriority, TriggerSummary};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use super::actions::Action;
use super::conditions::{Condition, ConditionOutcome};
use super::context::{ExecutionContext, ExecutionResult};
use super::entity::{entity_key, FieldMap};
use super::error::TriggerError;
use super::store::StoreTransaction;

pub const DEFAULT_MAX_RETRIES: i32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct ExecutionCounters {
    executions: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

pub struct TriggerDefinition {
    pub id: Uuid,
    name: String,
    event: TriggerEvent,
    entity_type: String,
    description: String,
    conditions: Vec<Box<dyn Condition>>,
    actions: Vec<Box<dyn Action>>,
    priority: TriggerPriority,
    enabled: AtomicBool,
    max_retries: i32,
    timeout: Duration,
    metadata: FieldMap,
    counters: ExecutionCounters,
    created_at: DateTime<Utc>,
    updated_at: RwLock<DateTime<Utc>>,
}

impl TriggerDefinition {
    pub fn new(name: &str, event: TriggerEvent, entity_type: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            event,
            entity_type: entity_type.to_string(),
            description: String::new(),
            conditions: Vec::new(),
            actions: Vec::new(),
            priority: TriggerPriority::Normal,
            enabled: AtomicBool::new(true),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            metadata: FieldMap::new(),
            counters: ExecutionCounters::default(),
            created_at: now,
            updated_at: RwLock::new(now),
        }
    }

    /// Policy-only definition rebuilt from an exported config
    pub fn from_config(config: &TriggerConfig) -> Self {
        let definition = Self::new(&config.name, config.event, &config.entity_type)
            .with_description(&config.description)
            .with_priority(config.priority)
            .with_max_retries(config.max_retries)
            .with_timeout(Duration::try_from_secs_f64(config.timeout_seconds).unwrap_or(Duration::ZERO));

        let mut definition = if config.enabled { definition } else { definition.disabled() };
        definition.metadata = config.metadata.clone();
        definition.counters.executions.store(config.stats.total_executions, Ordering::Relaxed);
        definition.counters.successes.store(config.stats.success_count, Ordering::Relaxed);
        definition.counters.failures.store(config.stats.failure_count, Ordering::Relaxed);
        definition
    }

    // ===== Builders =====

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_priority(mut self, priority: TriggerPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_condition(mut self, condition: impl Condition + 'static) -> Self {
        self.conditions.push(Box::new(condition));
        self
    }

    pub fn with_action(mut self, action: impl Action + 'static) -> Self {
        self.actions.push(Box::new(action));
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn disabled(self) -> Self {
        self.enabled.store(false, Ordering::Relaxed);
        self
    }

    // ===== Accessors =====

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn event(&self) -> TriggerEvent {
        self.event
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn priority(&self) -> TriggerPriority {
        self.priority
    }

    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn metadata(&self) -> &FieldMap {
        &self.metadata
    }

    pub fn conditions(&self) -> &[Box<dyn Condition>] {
        &self.conditions
    }

    pub fn actions(&self) -> &[Box<dyn Action>] {
        &self.actions
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        *self.updated_at.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        self.touch();
    }

    fn touch(&self) {
        *self.updated_at.write().unwrap_or_else(|e| e.into_inner()) = Utc::now();
    }

    /// All entity fields referenced by conditions and actions
    pub fn referenced_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self
            .conditions
            .iter()
            .flat_map(|c| c.referenced_fields())
            .chain(self.actions.iter().flat_map(|a| a.referenced_fields()))
            .collect();
        fields.sort();
        fields.dedup();
        fields
    }

    pub fn field_assignments(&self) -> Vec<(String, Value)> {
        self.actions.iter().flat_map(|a| a.field_assignments()).collect()
    }

    // ===== Evaluation =====

    /// Enabled, same entity type (case-insensitive) and same event
    pub fn matches(&self, ctx: &ExecutionContext) -> bool {
        self.is_enabled() && self.event == ctx.event && entity_key(&self.entity_type) == entity_key(&ctx.entity_type)
    }

    /// AND over all conditions. The first non-satisfied outcome wins.
    pub fn evaluate_conditions(&self, ctx: &ExecutionContext) -> ConditionOutcome {
        for condition in &self.conditions {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| condition.evaluate(ctx)))
                .unwrap_or_else(|panic| ConditionOutcome::Error(TriggerError::from_panic(panic).to_string()));

            match outcome {
                ConditionOutcome::Satisfied => continue,
                ConditionOutcome::NotSatisfied => {
                    debug!("Trigger '{}' condition not met: {}", self.name, condition.description());
                    return ConditionOutcome::NotSatisfied;
                }
                ConditionOutcome::Error(e) => {
                    return ConditionOutcome::Error(format!("{}: {}", condition.description(), e));
                }
            }
        }
        ConditionOutcome::Satisfied
    }

    pub fn should_execute(&self, ctx: &ExecutionContext) -> bool {
        if !self.matches(ctx) {
            return false;
        }
        match self.evaluate_conditions(ctx) {
            ConditionOutcome::Satisfied => true,
            ConditionOutcome::NotSatisfied => false,
            ConditionOutcome::Error(e) => {
                warn!("Error evaluating conditions for trigger '{}': {}", self.name, e);
                false
            }
        }
    }

    /// Gate on `should_execute`, then run the actions
    pub async fn execute(&self, ctx: &ExecutionContext, store: &dyn StoreTransaction) -> Vec<ExecutionResult> {
        if !self.should_execute(ctx) {
            return vec![ExecutionResult::skipped("Trigger conditions not met").with_trigger(&self.name)];
        }
        self.run_actions(ctx, store).await
    }

    /// Run actions in declaration order. A failed action stops the remaining
    /// ones only for CRITICAL triggers.
    pub async fn run_actions(&self, ctx: &ExecutionContext, store: &dyn StoreTransaction) -> Vec<ExecutionResult> {
        self.counters.executions.fetch_add(1, Ordering::Relaxed);
        let mut results = Vec::with_capacity(self.actions.len());

        for action in &self.actions {
            if ctx.is_cancelled() {
                results.push(ExecutionResult::from_error(TriggerError::Cancelled).with_trigger(&self.name));
                break;
            }

            let started = Instant::now();
            let result = match AssertUnwindSafe(action.execute(ctx, store)).catch_unwind().await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => ExecutionResult::from_error(e),
                Err(panic) => ExecutionResult::from_error(TriggerError::from_panic(panic)),
            }
            .with_trigger(&self.name)
            .with_execution_time(started.elapsed());

            if result.success {
                self.counters.successes.fetch_add(1, Ordering::Relaxed);
            } else {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Action '{}' of trigger '{}' failed: {}",
                    action.description(),
                    self.name,
                    result.message.as_deref().unwrap_or("no message")
                );
            }

            let stop = !result.success && self.priority == TriggerPriority::Critical;
            results.push(result);
            if stop {
                warn!("Critical trigger '{}' stopped after a failed action", self.name);
                break;
            }
        }

        self.touch();
        results
    }

    /// Retry is allowed when any action allows it
    pub fn can_retry(&self) -> bool {
        self.actions.iter().any(|a| a.can_retry())
    }

    /// Longest delay requested by a retryable action
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.actions
            .iter()
            .filter(|a| a.can_retry())
            .map(|a| a.retry_delay(attempt))
            .max()
            .unwrap_or_default()
    }

    // ===== Views =====

    pub fn stats(&self) -> ExecutionStats {
        let success_count = self.counters.successes.load(Ordering::Relaxed);
        let failure_count = self.counters.failures.load(Ordering::Relaxed);
        let finished = success_count + failure_count;
        ExecutionStats {
            total_executions: self.counters.executions.load(Ordering::Relaxed),
            success_count,
            failure_count,
            success_rate: if finished > 0 {
                success_count as f64 / finished as f64 * 100.0
            } else {
                0.0
            },
        }
    }

    pub fn summary(&self) -> TriggerSummary {
        TriggerSummary {
            id: self.id,
            name: self.name.clone(),
            event: self.event,
            entity_type: entity_key(&self.entity_type),
            priority: self.priority,
            enabled: self.is_enabled(),
            description: self.description.clone(),
            conditions_count: self.conditions.len(),
            actions_count: self.actions.len(),
            execution_stats: self.stats(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at(),
        }
    }

    pub fn details(&self) -> TriggerDetails {
        TriggerDetails {
            summary: self.summary(),
            max_retries: self.max_retries,
            timeout_seconds: self.timeout.as_secs_f64(),
            conditions: self
                .conditions
                .iter()
                .map(|c| ComponentInfo {
                    kind: c.kind().to_string(),
                    description: c.description(),
                    can_retry: None,
                })
                .collect(),
            actions: self
                .actions
                .iter()
                .map(|a| ComponentInfo {
                    kind: a.kind().to_string(),
                    description: a.description(),
                    can_retry: Some(a.can_retry()),
                })
                .collect(),
        }
    }

    pub fn to_config(&self) -> TriggerConfig {
        TriggerConfig {
            name: self.name.clone(),
            event: self.event,
            entity_type: entity_key(&self.entity_type),
            priority: self.priority,
            enabled: self.is_enabled(),
            max_retries: self.max_retries,
            timeout_seconds: self.timeout.as_secs_f64(),
            description: self.description.clone(),
            metadata: self.metadata.clone(),
            stats: self.stats(),
        }
    }
}

impl fmt::Debug for TriggerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerDefinition")
            .field("name", &self.name)
            .field("event", &self.event)
            .field("entity_type", &self.entity_type)
            .field("priority", &self.priority)
            .field("enabled", &self.is_enabled())
            .field("conditions", &self.conditions.len())
            .field("actions", &self.actions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::actions::FunctionAction;
    use crate::triggers::conditions::{presets, PredicateCondition};
    use crate::triggers::entity::EntitySnapshot;
    use crate::triggers::error::TriggerResult;
    use crate::triggers::store::{EntityStore, InMemoryStore};

    fn ok_action(label: &'static str) -> FunctionAction {
        FunctionAction::new(label, move |_ctx| async move { Ok(ExecutionResult::success(label)) })
    }

    fn failing_action() -> FunctionAction {
        FunctionAction::new("explode", |_ctx| async { Err(TriggerError::action("boom")) })
    }

    fn widget_ctx() -> ExecutionContext {
        ExecutionContext::new(TriggerEvent::PostSave, "widget")
            .with_previous(EntitySnapshot::new("Widget", "1").with_field("status", "draft"))
            .with_instance(EntitySnapshot::new("Widget", "1").with_field("status", "active"))
    }

    #[test]
    fn test_should_execute_requires_match_and_conditions() {
        let trigger = TriggerDefinition::new("activate", TriggerEvent::PostSave, "Widget")
            .with_condition(presets::status_changed_to("active"));
        assert!(trigger.should_execute(&widget_ctx()));

        let other_event = ExecutionContext::new(TriggerEvent::PreSave, "Widget");
        assert!(!trigger.should_execute(&other_event));

        let other_entity = ExecutionContext::new(TriggerEvent::PostSave, "Gadget");
        assert!(!trigger.should_execute(&other_entity));

        trigger.set_enabled(false);
        assert!(!trigger.should_execute(&widget_ctx()));
    }

    #[test]
    fn test_condition_errors_and_panics_are_reported() {
        let trigger = TriggerDefinition::new("broken", TriggerEvent::PostSave, "Widget")
            .with_condition(PredicateCondition::new("panics", |_| panic!("bad predicate")));

        match trigger.evaluate_conditions(&widget_ctx()) {
            ConditionOutcome::Error(message) => assert!(message.contains("bad predicate")),
            other => panic!("expected error, got {:?}", other),
        }
        assert!(!trigger.should_execute(&widget_ctx()));
    }

    #[tokio::test]
    async fn test_failed_action_does_not_stop_siblings() {
        let trigger = TriggerDefinition::new("normal", TriggerEvent::PostSave, "Widget")
            .with_action(failing_action())
            .with_action(ok_action("second"));
        let tx = InMemoryStore::new().begin().await.unwrap();

        let results = trigger.execute(&widget_ctx(), tx.as_ref()).await;
        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert!(results[0].error.is_some());
        assert!(results[1].success);
        assert!(results.iter().all(|r| r.execution_time.is_some()));

        let stats = trigger.stats();
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.success_rate, 50.0);
    }

    #[tokio::test]
    async fn test_critical_trigger_stops_after_failed_action() {
        let trigger = TriggerDefinition::new("critical", TriggerEvent::PostSave, "Widget")
            .with_priority(TriggerPriority::Critical)
            .with_action(failing_action())
            .with_action(ok_action("never"));
        let tx = InMemoryStore::new().begin().await.unwrap();

        let results = trigger.execute(&widget_ctx(), tx.as_ref()).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
    }

    #[tokio::test]
    async fn test_unmet_conditions_yield_skipped_result() {
        let trigger = TriggerDefinition::new("archive", TriggerEvent::PostSave, "Widget")
            .with_condition(presets::status_changed_to("archived"))
            .with_action(ok_action("never"));
        let tx = InMemoryStore::new().begin().await.unwrap();

        let results = trigger.execute(&widget_ctx(), tx.as_ref()).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success && results[0].is_skipped());
        assert_eq!(trigger.stats().total_executions, 0);
    }

    #[tokio::test]
    async fn test_action_panic_becomes_failed_result() {
        async fn explode() -> TriggerResult<ExecutionResult> {
            panic!("action blew up")
        }

        let trigger = TriggerDefinition::new("panicky", TriggerEvent::PostSave, "Widget")
            .with_action(FunctionAction::new("panics", |_ctx| explode()));
        let tx = InMemoryStore::new().begin().await.unwrap();

        let results = trigger.run_actions(&widget_ctx(), tx.as_ref()).await;
        assert!(!results[0].success);
        assert!(results[0].message.as_deref().unwrap().contains("action blew up"));
    }

    #[test]
    fn test_retry_policy_follows_retryable_actions() {
        let trigger = TriggerDefinition::new("t", TriggerEvent::PostSave, "Widget")
            .with_action(ok_action("a").no_retry())
            .with_action(ok_action("b").with_retry_delay(Duration::from_millis(20)));
        assert!(trigger.can_retry());
        assert_eq!(trigger.retry_delay(5), Duration::from_millis(20));

        let no_retry = TriggerDefinition::new("t", TriggerEvent::PostSave, "Widget").with_action(ok_action("a").no_retry());
        assert!(!no_retry.can_retry());
    }

    #[test]
    fn test_config_round_trip_keeps_policy() {
        let trigger = TriggerDefinition::new("audit", TriggerEvent::PreDelete, "Widget")
            .with_priority(TriggerPriority::High)
            .with_max_retries(1)
            .with_timeout(Duration::from_secs(5))
            .with_description("Audit deletions")
            .with_metadata("owner", "ops")
            .disabled();

        let config = trigger.to_config();
        assert_eq!(config.entity_type, "widget");
        assert_eq!(config.timeout_seconds, 5.0);

        let restored = TriggerDefinition::from_config(&config);
        assert_eq!(restored.to_config(), config);
        assert!(!restored.is_enabled());
    }
}
