// Trigger registry - owns every trigger definition and the indices derived from them

use chrono::Utc;
use ssm_shared::{ExportMetadata, ExportedConfig, HealthReport, RegistryStats, TriggerEvent};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info, warn};

use super::definition::TriggerDefinition;
use super::entity::{entity_key, EntitySchema, SchemaRegistry};
use super::error::{TriggerError, TriggerResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LookupKey {
    Event(TriggerEvent, Option<String>),
    Entity(String),
}

/// Definitions plus derived indices. Indices and the lookup cache hold names
/// only and are rebuilt from `triggers` on every register/unregister.
#[derive(Default)]
struct RegistryIndex {
    triggers: HashMap<String, Arc<TriggerDefinition>>,
    by_event: HashMap<TriggerEvent, Vec<String>>,
    by_entity: HashMap<String, Vec<String>>,
    lookup_cache: HashMap<LookupKey, Vec<String>>,
}

impl RegistryIndex {
    fn remove_from_indexes(&mut self, name: &str) {
        self.by_event.retain(|_, names| {
            names.retain(|n| n != name);
            !names.is_empty()
        });
        self.by_entity.retain(|_, names| {
            names.retain(|n| n != name);
            !names.is_empty()
        });
        self.lookup_cache.clear();
    }

    /// Stable sort by priority so equal priorities keep registration order
    fn sorted_by_priority(&self, names: impl Iterator<Item = String>) -> Vec<String> {
        let mut names: Vec<String> = names.filter(|n| self.triggers.contains_key(n)).collect();
        names.sort_by_key(|n| self.triggers[n].priority());
        names
    }

    fn compute(&self, key: &LookupKey) -> Vec<String> {
        match key {
            LookupKey::Event(event, entity) => {
                let names = self.by_event.get(event).into_iter().flatten().filter(|n| match entity {
                    Some(entity) => entity_key(self.triggers[*n].entity_type()) == *entity,
                    None => true,
                });
                self.sorted_by_priority(names.cloned())
            }
            LookupKey::Entity(entity) => {
                self.sorted_by_priority(self.by_entity.get(entity).into_iter().flatten().cloned())
            }
        }
    }

    fn resolve_enabled(&self, names: &[String]) -> Vec<Arc<TriggerDefinition>> {
        names
            .iter()
            .filter_map(|n| self.triggers.get(n))
            .filter(|t| t.is_enabled())
            .cloned()
            .collect()
    }
}

#[derive(Default)]
pub struct TriggerRegistry {
    index: RwLock<RegistryIndex>,
    schemas: RwLock<SchemaRegistry>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schemas(schemas: SchemaRegistry) -> Self {
        Self {
            index: RwLock::new(RegistryIndex::default()),
            schemas: RwLock::new(schemas),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryIndex> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryIndex> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register_schema(&self, schema: EntitySchema) {
        self.schemas.write().unwrap_or_else(|e| e.into_inner()).register(schema);
    }

    pub fn schema_for(&self, entity_type: &str) -> Option<EntitySchema> {
        self.schemas
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(entity_type)
            .cloned()
    }

    /// Field references and assigned values checked against the entity schema.
    /// Entity types without a schema pass unchecked.
    fn schema_errors(&self, definition: &TriggerDefinition) -> Vec<String> {
        let schemas = self.schemas.read().unwrap_or_else(|e| e.into_inner());
        let Some(schema) = schemas.get(definition.entity_type()) else {
            return Vec::new();
        };

        let mut errors: Vec<String> = definition
            .referenced_fields()
            .iter()
            .filter_map(|field| schema.check_field(field).err())
            .map(|e| format!("Trigger '{}': {}", definition.name(), e))
            .collect();

        for (field, value) in definition.field_assignments() {
            if !schema.has_field(&field) {
                continue;
            }
            if let Err(e) = schema.check_value(&field, &value) {
                errors.push(format!("Trigger '{}': {}", definition.name(), e));
            }
        }
        errors
    }

    fn structural_errors(definition: &TriggerDefinition) -> Vec<String> {
        let mut errors = Vec::new();
        if definition.name().trim().is_empty() {
            errors.push("Trigger name is required".to_string());
        }
        if definition.entity_type().trim().is_empty() {
            errors.push("Trigger entity type is required".to_string());
        }
        errors
    }

    /// Register a definition, replacing any definition with the same name.
    pub fn try_register(&self, definition: TriggerDefinition) -> TriggerResult<()> {
        let mut errors = Self::structural_errors(&definition);
        errors.extend(self.schema_errors(&definition));
        if !errors.is_empty() {
            return Err(TriggerError::Registration(errors));
        }

        let name = definition.name().to_string();
        let event = definition.event();
        let entity = entity_key(definition.entity_type());

        let mut index = self.write();
        if index.triggers.remove(&name).is_some() {
            warn!("Trigger '{}' is already registered, replacing it", name);
            index.remove_from_indexes(&name);
        }
        index.by_event.entry(event).or_default().push(name.clone());
        index.by_entity.entry(entity.clone()).or_default().push(name.clone());
        index.triggers.insert(name.clone(), Arc::new(definition));
        index.lookup_cache.clear();

        info!("Registered trigger '{}' for {}.{}", name, entity, event);
        Ok(())
    }

    pub fn register(&self, definition: TriggerDefinition) -> bool {
        match self.try_register(definition) {
            Ok(()) => true,
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut index = self.write();
        if index.triggers.remove(name).is_none() {
            return false;
        }
        index.remove_from_indexes(name);
        info!("Unregistered trigger '{}'", name);
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<TriggerDefinition>> {
        self.read().triggers.get(name).cloned()
    }

    fn lookup(&self, key: LookupKey) -> Vec<Arc<TriggerDefinition>> {
        {
            let index = self.read();
            if let Some(names) = index.lookup_cache.get(&key) {
                return index.resolve_enabled(names);
            }
        }

        let mut index = self.write();
        if !index.lookup_cache.contains_key(&key) {
            let names = index.compute(&key);
            index.lookup_cache.insert(key.clone(), names);
        }
        index.resolve_enabled(&index.lookup_cache[&key])
    }

    /// Enabled triggers for `event` (and `entity_type` when given), ascending by priority.
    pub fn get_triggers_for_event(&self, event: TriggerEvent, entity_type: Option<&str>) -> Vec<Arc<TriggerDefinition>> {
        self.lookup(LookupKey::Event(event, entity_type.map(entity_key)))
    }

    /// Enabled triggers for an entity type across all events, ascending by priority.
    pub fn get_triggers_for_model(&self, entity_type: &str) -> Vec<Arc<TriggerDefinition>> {
        self.lookup(LookupKey::Entity(entity_key(entity_type)))
    }

    /// Sorted by priority, then name
    pub fn get_all_triggers(&self, enabled_only: bool) -> Vec<Arc<TriggerDefinition>> {
        let mut triggers: Vec<Arc<TriggerDefinition>> = self
            .read()
            .triggers
            .values()
            .filter(|t| !enabled_only || t.is_enabled())
            .cloned()
            .collect();
        triggers.sort_by(|a, b| a.priority().cmp(&b.priority()).then_with(|| a.name().cmp(b.name())));
        triggers
    }

    pub fn len(&self) -> usize {
        self.read().triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().triggers.is_empty()
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let Some(trigger) = self.get(name) else {
            return false;
        };
        trigger.set_enabled(enabled);
        info!("{} trigger '{}'", if enabled { "Enabled" } else { "Disabled" }, name);
        true
    }

    pub fn enable_trigger(&self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    pub fn disable_trigger(&self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    fn set_all_enabled(&self, enabled: bool) -> usize {
        let triggers = self.get_all_triggers(false);
        for trigger in &triggers {
            trigger.set_enabled(enabled);
        }
        info!("{} all {} triggers", if enabled { "Enabled" } else { "Disabled" }, triggers.len());
        triggers.len()
    }

    pub fn enable_all(&self) -> usize {
        self.set_all_enabled(true)
    }

    pub fn disable_all(&self) -> usize {
        self.set_all_enabled(false)
    }

    /// Remove every definition
    pub fn clear(&self) {
        *self.write() = RegistryIndex::default();
        info!("Cleared trigger registry");
    }

    pub fn clear_cache(&self) {
        self.write().lookup_cache.clear();
    }

    pub fn get_registry_stats(&self) -> RegistryStats {
        let index = self.read();
        let mut stats = RegistryStats {
            total_triggers: index.triggers.len(),
            ..Default::default()
        };

        for trigger in index.triggers.values() {
            if trigger.is_enabled() {
                stats.enabled_triggers += 1;
            }
            *stats.events.entry(trigger.event().to_string()).or_default() += 1;
            *stats.entity_types.entry(entity_key(trigger.entity_type())).or_default() += 1;
            *stats.priorities.entry(trigger.priority().to_string()).or_default() += 1;
        }
        stats.disabled_triggers = stats.total_triggers - stats.enabled_triggers;
        stats
    }

    /// Serializable snapshot of every definition's policy, sorted by name
    pub fn export_config(&self) -> ExportedConfig {
        let mut triggers: Vec<_> = self.read().triggers.values().map(|t| t.to_config()).collect();
        triggers.sort_by(|a, b| a.name.cmp(&b.name));

        ExportedConfig {
            metadata: ExportMetadata {
                total_count: triggers.len(),
                export_timestamp: Some(Utc::now()),
                exported_by: None,
            },
            triggers,
        }
    }

    /// Register policy-only definitions from an export. Invalid entries are
    /// skipped and reported.
    pub fn import_config(&self, config: &ExportedConfig) -> Vec<String> {
        let mut errors = Vec::new();
        let mut imported = 0;
        for entry in &config.triggers {
            let definition = TriggerDefinition::from_config(entry);
            let problems = self.validate(&definition);
            if !problems.is_empty() {
                errors.extend(problems);
                continue;
            }
            match self.try_register(definition) {
                Ok(()) => imported += 1,
                Err(e) => errors.push(e.to_string()),
            }
        }
        info!("Imported {} of {} triggers", imported, config.triggers.len());
        errors
    }

    /// Validation problems of a definition that is about to be registered
    pub fn validate(&self, definition: &TriggerDefinition) -> Vec<String> {
        let mut errors = Self::structural_errors(definition);

        if let Some(existing) = self.get(definition.name()) {
            if existing.id != definition.id {
                errors.push(format!("Trigger with name '{}' already exists", definition.name()));
            }
        }
        if definition.timeout().is_zero() {
            errors.push("Timeout must be positive".to_string());
        }
        if definition.max_retries() < 0 {
            errors.push("Max retries cannot be negative".to_string());
        }

        errors.extend(self.schema_errors(definition));
        errors
    }

    pub fn health_check(&self) -> HealthReport {
        let index = self.read();
        let mut healthy = true;
        let mut issues = Vec::new();

        let mut seen = HashSet::new();
        let mut duplicates: Vec<&str> = index
            .by_event
            .values()
            .flatten()
            .filter(|n| !seen.insert(n.as_str()))
            .map(String::as_str)
            .collect();
        if !duplicates.is_empty() {
            duplicates.sort();
            duplicates.dedup();
            healthy = false;
            issues.push(format!("Duplicate trigger names detected: {:?}", duplicates));
        }

        let mut orphans: Vec<&str> = index
            .by_event
            .values()
            .chain(index.by_entity.values())
            .flatten()
            .filter(|n| !index.triggers.contains_key(*n))
            .map(String::as_str)
            .collect();
        if !orphans.is_empty() {
            orphans.sort();
            orphans.dedup();
            healthy = false;
            issues.push(format!("Orphaned triggers in indexes: {:?}", orphans));
        }

        let mut failing: Vec<&str> = index
            .triggers
            .values()
            .filter(|t| {
                let stats = t.stats();
                stats.failure_count > stats.success_count
            })
            .map(|t| t.name())
            .collect();
        if !failing.is_empty() {
            failing.sort();
            issues.push(format!("Triggers with high failure rate: {:?}", failing));
        }

        HealthReport { healthy, issues }
    }

    /// Registered names per event, for diagnostics
    pub fn event_index(&self) -> BTreeMap<String, Vec<String>> {
        self.read()
            .by_event
            .iter()
            .map(|(event, names)| (event.to_string(), names.clone()))
            .collect()
    }
}
