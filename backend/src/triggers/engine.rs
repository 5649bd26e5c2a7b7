// Trigger Engine - priority-ordered dispatch over a bounded worker pool

use chrono::Utc;
use futures::future::join_all;
use ssm_shared::{EngineMetrics, EngineStats, HealthReport, TriggerEvent, TriggerPriority};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::actions::MAX_RETRY_DELAY;
use super::conditions::ConditionOutcome;
use super::context::{ExecutionContext, ExecutionResult};
use super::definition::TriggerDefinition;
use super::error::TriggerError;
use super::registry::TriggerRegistry;
use super::store::EntityStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One trigger at a time in priority order; a failed CRITICAL trigger stops the rest
    #[default]
    Sequential,
    /// All triggers submitted at once, every result collected
    Concurrent,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" | "sync" => Ok(ExecutionMode::Sequential),
            "concurrent" | "async" => Ok(ExecutionMode::Concurrent),
            other => Err(format!("Unknown execution mode: {}", other)),
        }
    }
}

/// What happens to a trigger whose conditions fail to evaluate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConditionErrorPolicy {
    #[default]
    Skip,
    Fail,
}

impl FromStr for ConditionErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(ConditionErrorPolicy::Skip),
            "fail" => Ok(ConditionErrorPolicy::Fail),
            other => Err(format!("Unknown condition error policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_workers: usize,
    pub slow_execution_threshold: Duration,
    pub max_retry_delay: Duration,
    pub condition_error_policy: ConditionErrorPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            slow_execution_threshold: Duration::from_secs(5),
            max_retry_delay: MAX_RETRY_DELAY,
            condition_error_policy: ConditionErrorPolicy::Skip,
        }
    }
}

/// Stand-in deadline for timeouts too large to represent
const UNBOUNDED_DEADLINE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A trigger running on the pool, awaited until its deadline
struct Submission {
    trigger: Arc<TriggerDefinition>,
    handle: JoinHandle<Vec<ExecutionResult>>,
    deadline: Instant,
    token: CancellationToken,
}

pub struct TriggerEngine {
    registry: Arc<TriggerRegistry>,
    store: Arc<dyn EntityStore>,
    workers: Arc<Semaphore>,
    config: EngineConfig,
    metrics: Mutex<EngineMetrics>,
    enabled: AtomicBool,
}

impl TriggerEngine {
    pub fn new(registry: Arc<TriggerRegistry>, store: Arc<dyn EntityStore>, config: EngineConfig) -> Self {
        let max_workers = config.max_workers.max(1);
        info!("Trigger engine started with {} workers", max_workers);

        Self {
            registry,
            store,
            workers: Arc::new(Semaphore::new(max_workers)),
            config: EngineConfig { max_workers, ..config },
            metrics: Mutex::new(EngineMetrics::default()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn registry(&self) -> &Arc<TriggerRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run every enabled trigger registered for `event` and the context's
    /// entity type. Returns once each trigger has finished, failed, exhausted
    /// its retries or timed out.
    pub async fn execute_triggers(
        &self,
        event: TriggerEvent,
        ctx: &ExecutionContext,
        mode: ExecutionMode,
    ) -> Vec<ExecutionResult> {
        if !self.is_enabled() {
            return Vec::new();
        }

        let triggers = self.registry.get_triggers_for_event(event, Some(&ctx.entity_type));
        if triggers.is_empty() {
            return Vec::new();
        }

        debug!(
            "Executing {} triggers for {} on {} ({:?})",
            triggers.len(),
            event,
            ctx.entity_type,
            mode
        );

        let started = Instant::now();
        let results = match mode {
            ExecutionMode::Sequential => self.execute_sequential(triggers, ctx).await,
            ExecutionMode::Concurrent => self.execute_concurrent(triggers, ctx).await,
        };

        self.record_dispatch(results.iter().all(|r| r.success), started.elapsed());
        results
    }

    async fn execute_sequential(&self, triggers: Vec<Arc<TriggerDefinition>>, ctx: &ExecutionContext) -> Vec<ExecutionResult> {
        let mut all_results = Vec::new();

        for trigger in triggers {
            let critical = trigger.priority() == TriggerPriority::Critical;
            let name = trigger.name().to_string();

            let results = Self::await_submission(self.submit(trigger, ctx)).await;
            let failed = results.iter().any(|r| !r.success);
            all_results.extend(results);

            if critical && failed {
                warn!("Critical trigger '{}' failed, stopping execution of remaining triggers", name);
                break;
            }
        }

        all_results
    }

    async fn execute_concurrent(&self, triggers: Vec<Arc<TriggerDefinition>>, ctx: &ExecutionContext) -> Vec<ExecutionResult> {
        let submissions: Vec<Submission> = triggers.into_iter().map(|t| self.submit(t, ctx)).collect();

        join_all(submissions.into_iter().map(Self::await_submission))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Run one named trigger directly, skipping event, entity and enabled
    /// matching. Conditions are still evaluated.
    pub async fn execute_custom_trigger(&self, name: &str, ctx: &ExecutionContext) -> Vec<ExecutionResult> {
        let Some(trigger) = self.registry.get(name) else {
            return vec![
                ExecutionResult::from_error(TriggerError::NotFound(format!("Trigger '{}' not found", name)))
                    .with_trigger(name),
            ];
        };

        let started = Instant::now();
        let results = Self::await_submission(self.submit(trigger, ctx)).await;
        self.record_dispatch(results.iter().all(|r| r.success), started.elapsed());
        results
    }

    fn submit(&self, trigger: Arc<TriggerDefinition>, ctx: &ExecutionContext) -> Submission {
        let token = ctx.cancellation().child_token();
        let task_ctx = ctx.with_cancellation(token.clone());
        let now = Instant::now();
        let deadline = now.checked_add(trigger.timeout()).unwrap_or(now + UNBOUNDED_DEADLINE);

        let workers = self.workers.clone();
        let store = self.store.clone();
        let config = self.config.clone();
        let task_trigger = trigger.clone();

        let handle = tokio::spawn(async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                return vec![ExecutionResult::from_error(TriggerError::Shutdown).with_trigger(task_trigger.name())];
            };
            run_with_retries(&task_trigger, &task_ctx, store.as_ref(), &config, deadline).await
        });

        Submission {
            trigger,
            handle,
            deadline,
            token,
        }
    }

    /// Wait for a submission until its deadline. A timed-out task is told to
    /// stop through its cancellation token but is left to wind down on its own.
    async fn await_submission(submission: Submission) -> Vec<ExecutionResult> {
        let Submission {
            trigger,
            handle,
            deadline,
            token,
        } = submission;

        match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                error!("Error executing trigger '{}': {}", trigger.name(), e);
                vec![ExecutionResult::from_error(TriggerError::Panicked(e.to_string())).with_trigger(trigger.name())]
            }
            Err(_) => {
                token.cancel();
                error!(
                    "Trigger '{}' timed out after {:.3}s",
                    trigger.name(),
                    trigger.timeout().as_secs_f64()
                );
                vec![ExecutionResult::timed_out(trigger.name(), trigger.timeout())]
            }
        }
    }

    fn record_dispatch(&self, success: bool, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if elapsed > self.config.slow_execution_threshold {
            warn!("Slow trigger dispatch: {:.3}s", secs);
        }

        let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        metrics.total_executions += 1;
        if success {
            metrics.successful_executions += 1;
        } else {
            metrics.failed_executions += 1;
        }

        let total = metrics.total_executions as f64;
        metrics.average_execution_time += (secs - metrics.average_execution_time) / total;
        metrics.peak_execution_time = metrics.peak_execution_time.max(secs);
        metrics.success_rate = metrics.successful_executions as f64 / total * 100.0;
        metrics.last_execution = Some(Utc::now());
    }

    // ===== Control =====

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
        info!("Trigger engine enabled");
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
        info!("Trigger engine disabled");
    }

    /// Close the worker pool. Later submissions yield failed results.
    pub fn shutdown(&self) {
        self.workers.close();
        info!("Trigger engine shut down");
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            enabled: self.is_enabled(),
            max_workers: self.config.max_workers,
            total_triggers: self.registry.len(),
            enabled_triggers: self.registry.get_all_triggers(true).len(),
            metrics: self.metrics(),
        }
    }

    pub fn health_check(&self) -> HealthReport {
        let metrics = self.metrics();
        let mut issues = Vec::new();

        if !self.is_enabled() {
            issues.push("Engine is disabled".to_string());
        }
        if metrics.total_executions > 10 && metrics.success_rate < 90.0 {
            issues.push(format!("Low success rate: {:.2}%", metrics.success_rate));
        }
        if metrics.average_execution_time > self.config.slow_execution_threshold.as_secs_f64() {
            issues.push(format!(
                "High average execution time: {:.3}s",
                metrics.average_execution_time
            ));
        }

        HealthReport::from_issues(issues)
    }
}

/// Conditions gate every attempt. `None` means the actions should run.
fn gate(trigger: &TriggerDefinition, ctx: &ExecutionContext, config: &EngineConfig) -> Option<Vec<ExecutionResult>> {
    let name = trigger.name();
    match trigger.evaluate_conditions(ctx) {
        ConditionOutcome::Satisfied => None,
        ConditionOutcome::NotSatisfied => {
            Some(vec![ExecutionResult::skipped("Trigger conditions not met").with_trigger(name)])
        }
        ConditionOutcome::Error(e) => match config.condition_error_policy {
            ConditionErrorPolicy::Skip => {
                warn!("Error evaluating conditions for trigger '{}', skipping: {}", name, e);
                Some(vec![ExecutionResult::skipped("Trigger conditions not met").with_trigger(name)])
            }
            ConditionErrorPolicy::Fail => {
                warn!("Error evaluating conditions for trigger '{}': {}", name, e);
                Some(vec![ExecutionResult::from_error(TriggerError::Condition(e)).with_trigger(name)])
            }
        },
    }
}

/// Run the actions inside one unit of work per attempt until an attempt
/// succeeds, retries are exhausted or the deadline passes. Conditions are
/// re-checked before every attempt.
async fn run_with_retries(
    trigger: &TriggerDefinition,
    ctx: &ExecutionContext,
    store: &dyn EntityStore,
    config: &EngineConfig,
    deadline: Instant,
) -> Vec<ExecutionResult> {
    let name = trigger.name();
    let attempts = u32::try_from(trigger.max_retries()).unwrap_or(0) + 1;
    let mut attempt = 0;

    loop {
        if let Some(results) = gate(trigger, ctx, config) {
            return results;
        }

        debug!("Executing trigger '{}' (attempt {})", name, attempt + 1);
        let results = run_attempt(trigger, ctx, store, deadline).await;

        if results.iter().all(|r| r.success) {
            if attempt > 0 {
                info!("Trigger '{}' succeeded on attempt {}", name, attempt + 1);
            }
            return results;
        }

        let exhausted = attempt + 1 >= attempts;
        if exhausted || !trigger.can_retry() || ctx.is_cancelled() || Instant::now() >= deadline {
            if exhausted && attempts > 1 {
                error!("Trigger '{}' failed after {} attempts", name, attempt + 1);
            }
            return results
                .into_iter()
                .map(|r| r.with_data("attempts", attempt + 1))
                .collect();
        }

        let delay = trigger.retry_delay(attempt).min(config.max_retry_delay);
        warn!(
            "Trigger '{}' failed on attempt {}, retrying in {:.3}s",
            name,
            attempt + 1,
            delay.as_secs_f64()
        );

        tokio::select! {
            _ = ctx.cancellation().cancelled() => {
                return results
                    .into_iter()
                    .map(|r| r.with_data("attempts", attempt + 1))
                    .collect();
            }
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

/// One attempt: commit when every action succeeded and the trigger is still
/// within its deadline, roll back otherwise. Once the dispatcher has reported
/// a timeout the attempt's writes must not land.
async fn run_attempt(
    trigger: &TriggerDefinition,
    ctx: &ExecutionContext,
    store: &dyn EntityStore,
    deadline: Instant,
) -> Vec<ExecutionResult> {
    let tx = match store.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            error!("Could not open a unit of work for trigger '{}': {}", trigger.name(), e);
            return vec![ExecutionResult::from_error(e.into()).with_trigger(trigger.name())];
        }
    };

    let results = trigger.run_actions(ctx, tx.as_ref()).await;
    let expired = ctx.is_cancelled() || Instant::now() >= deadline;

    if expired {
        warn!("Trigger '{}' ran past its deadline, rolling back", trigger.name());
        if let Err(e) = tx.rollback().await {
            warn!("Rollback failed for trigger '{}': {}", trigger.name(), e);
        }
        return vec![ExecutionResult::timed_out(trigger.name(), trigger.timeout())];
    }

    if results.iter().all(|r| r.success) {
        if let Err(e) = tx.commit().await {
            error!("Commit failed for trigger '{}': {}", trigger.name(), e);
            return vec![ExecutionResult::from_error(e.into()).with_trigger(trigger.name())];
        }
    } else if let Err(e) = tx.rollback().await {
        warn!("Rollback failed for trigger '{}': {}", trigger.name(), e);
    }

    results
}
