// Lifecycle capture - turns persistence notifications into trigger dispatches

use serde_json::Value;
use ssm_shared::{CaptureStatus, TriggerEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::context::{ExecutionContext, ExecutionResult, RequestScope};
use super::engine::{ExecutionMode, TriggerEngine};
use super::entity::{EntitySnapshot, FieldMap, SnapshotKey};

/// Stored state captured before a save, waiting for the matching post-save.
/// Oldest entries are evicted once `capacity` is reached. `order` may hold
/// stale keys (taken or re-inserted since); they are skipped by sequence
/// number and compacted away once they outnumber live entries.
struct SnapshotCache {
    entries: HashMap<SnapshotKey, (u64, EntitySnapshot)>,
    order: VecDeque<(u64, SnapshotKey)>,
    next_seq: u64,
    capacity: Option<usize>,
}

impl SnapshotCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            next_seq: 0,
            capacity: (capacity > 0).then_some(capacity),
        }
    }

    fn insert(&mut self, key: SnapshotKey, snapshot: EntitySnapshot) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(key.clone(), (seq, snapshot));
        self.order.push_back((seq, key));

        if let Some(capacity) = self.capacity {
            while self.entries.len() > capacity {
                let Some((seq, oldest)) = self.order.pop_front() else {
                    break;
                };
                if self.entries.get(&oldest).is_some_and(|(live, _)| *live == seq) {
                    self.entries.remove(&oldest);
                    warn!(
                        "Snapshot cache full, evicted unmatched snapshot for {}/{}",
                        oldest.entity_type, oldest.id
                    );
                }
            }
        }
        self.compact();
    }

    fn take(&mut self, key: &SnapshotKey) -> Option<EntitySnapshot> {
        let (_, snapshot) = self.entries.remove(key)?;
        self.compact();
        Some(snapshot)
    }

    /// Drop stale order keys once they dominate, keeping take amortized O(1)
    fn compact(&mut self) {
        if self.order.len() > 2 * self.entries.len() + 32 {
            let entries = &self.entries;
            self.order
                .retain(|(seq, key)| entries.get(key).is_some_and(|(live, _)| live == seq));
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) -> usize {
        let cleared = self.entries.len();
        self.entries.clear();
        self.order.clear();
        cleared
    }
}

pub struct LifecycleCapture {
    engine: Arc<TriggerEngine>,
    enabled: AtomicBool,
    mode: ExecutionMode,
    snapshots: Mutex<SnapshotCache>,
}

impl LifecycleCapture {
    /// `capacity` bounds pending pre-save snapshots; `0` leaves it unbounded.
    pub fn new(engine: Arc<TriggerEngine>, mode: ExecutionMode, capacity: usize) -> Self {
        Self {
            engine,
            enabled: AtomicBool::new(true),
            mode,
            snapshots: Mutex::new(SnapshotCache::new(capacity)),
        }
    }

    fn cache(&self) -> MutexGuard<'_, SnapshotCache> {
        self.snapshots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn engine(&self) -> &Arc<TriggerEngine> {
        &self.engine
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Before an insert or update. Persisted instances have their stored
    /// state captured for the following post-save.
    pub async fn notify_pre_mutation(&self, instance: &EntitySnapshot, scope: &RequestScope) -> Vec<ExecutionResult> {
        if !self.is_enabled() {
            return Vec::new();
        }

        let mut ctx = ExecutionContext::new(TriggerEvent::PreSave, instance.entity_type.clone())
            .with_instance(instance.clone())
            .with_scope(scope);

        if let Some(key) = instance.key() {
            let stored = self.engine.store().fetch(&instance.entity_type, &key.id).await;
            match stored {
                Ok(Some(stored)) => {
                    self.cache().insert(key, stored.clone());
                    ctx = ctx.with_previous(stored);
                }
                Ok(None) => debug!("No stored {} {} to capture before save", instance.entity_type, key.id),
                Err(e) => warn!(
                    "Could not load stored {} {} before save: {}",
                    instance.entity_type, key.id, e
                ),
            }
        }

        self.engine.execute_triggers(TriggerEvent::PreSave, &ctx, self.mode).await
    }

    /// After an insert or update. Creations never carry a previous snapshot.
    pub async fn notify_post_mutation(
        &self,
        instance: &EntitySnapshot,
        created: bool,
        update_fields: Option<Vec<String>>,
        scope: &RequestScope,
    ) -> Vec<ExecutionResult> {
        if !self.is_enabled() {
            return Vec::new();
        }

        let previous = instance.key().and_then(|key| self.cache().take(&key));

        let mut ctx = ExecutionContext::new(TriggerEvent::PostSave, instance.entity_type.clone())
            .with_instance(instance.clone())
            .with_created(created)
            .with_scope(scope);
        if let Some(fields) = update_fields {
            ctx = ctx.with_update_fields(fields);
        }
        if let Some(previous) = previous.filter(|_| !created) {
            ctx = ctx.with_previous(previous);
        }

        self.engine.execute_triggers(TriggerEvent::PostSave, &ctx, self.mode).await
    }

    pub async fn notify_pre_delete(&self, instance: &EntitySnapshot, scope: &RequestScope) -> Vec<ExecutionResult> {
        self.notify_delete(TriggerEvent::PreDelete, instance, scope).await
    }

    pub async fn notify_post_delete(&self, instance: &EntitySnapshot, scope: &RequestScope) -> Vec<ExecutionResult> {
        self.notify_delete(TriggerEvent::PostDelete, instance, scope).await
    }

    async fn notify_delete(&self, event: TriggerEvent, instance: &EntitySnapshot, scope: &RequestScope) -> Vec<ExecutionResult> {
        if !self.is_enabled() {
            return Vec::new();
        }

        let ctx = ExecutionContext::new(event, instance.entity_type.clone())
            .with_instance(instance.clone())
            .with_scope(scope);
        self.engine.execute_triggers(event, &ctx, self.mode).await
    }

    /// One dispatch for a whole batch, described by `bulk_count` and `bulk_ids`
    pub async fn notify_bulk(
        &self,
        event: TriggerEvent,
        entity_type: &str,
        instances: &[EntitySnapshot],
        scope: &RequestScope,
    ) -> Vec<ExecutionResult> {
        if !self.is_enabled() {
            return Vec::new();
        }
        if !event.is_bulk() {
            warn!("Ignoring bulk notification for non-bulk event {}", event);
            return Vec::new();
        }

        let ids: Vec<Value> = instances
            .iter()
            .filter_map(|i| i.id.clone())
            .map(Value::String)
            .collect();

        let ctx = ExecutionContext::new(event, entity_type)
            .with_scope(scope)
            .with_metadata("bulk_count", instances.len())
            .with_metadata("bulk_ids", ids);
        self.engine.execute_triggers(event, &ctx, self.mode).await
    }

    /// Dispatch CUSTOM for `instance`, tagged with `custom_event`
    pub async fn notify_custom(
        &self,
        event_name: &str,
        instance: &EntitySnapshot,
        metadata: FieldMap,
        scope: &RequestScope,
    ) -> Vec<ExecutionResult> {
        if !self.is_enabled() {
            return Vec::new();
        }

        let mut ctx = ExecutionContext::new(TriggerEvent::Custom, instance.entity_type.clone())
            .with_instance(instance.clone())
            .with_scope(scope);
        ctx.metadata = metadata;
        let ctx = ctx.with_metadata("custom_event", event_name);

        self.engine.execute_triggers(TriggerEvent::Custom, &ctx, self.mode).await
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
        info!("Lifecycle capture enabled");
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
        info!("Lifecycle capture disabled");
    }

    /// Drop pending snapshots, returning how many were held
    pub fn clear_cache(&self) -> usize {
        let cleared = self.cache().clear();
        debug!("Cleared {} pending snapshots", cleared);
        cleared
    }

    pub fn cache_size(&self) -> usize {
        self.cache().len()
    }

    pub fn status(&self) -> CaptureStatus {
        let cache = self.cache();
        CaptureStatus {
            enabled: self.is_enabled(),
            cache_size: cache.len(),
            cache_capacity: cache.capacity,
        }
    }
}
