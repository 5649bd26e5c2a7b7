use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Lifecycle phase a trigger listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    PreSave,
    PostSave,
    PreDelete,
    PostDelete,
    PreBulkCreate,
    PostBulkCreate,
    PreBulkUpdate,
    PostBulkUpdate,
    PreBulkDelete,
    PostBulkDelete,
    Custom,
}

impl TriggerEvent {
    pub const ALL: [TriggerEvent; 11] = [
        TriggerEvent::PreSave,
        TriggerEvent::PostSave,
        TriggerEvent::PreDelete,
        TriggerEvent::PostDelete,
        TriggerEvent::PreBulkCreate,
        TriggerEvent::PostBulkCreate,
        TriggerEvent::PreBulkUpdate,
        TriggerEvent::PostBulkUpdate,
        TriggerEvent::PreBulkDelete,
        TriggerEvent::PostBulkDelete,
        TriggerEvent::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerEvent::PreSave => "pre_save",
            TriggerEvent::PostSave => "post_save",
            TriggerEvent::PreDelete => "pre_delete",
            TriggerEvent::PostDelete => "post_delete",
            TriggerEvent::PreBulkCreate => "pre_bulk_create",
            TriggerEvent::PostBulkCreate => "post_bulk_create",
            TriggerEvent::PreBulkUpdate => "pre_bulk_update",
            TriggerEvent::PostBulkUpdate => "post_bulk_update",
            TriggerEvent::PreBulkDelete => "pre_bulk_delete",
            TriggerEvent::PostBulkDelete => "post_bulk_delete",
            TriggerEvent::Custom => "custom",
        }
    }

    pub fn is_bulk(&self) -> bool {
        matches!(
            self,
            TriggerEvent::PreBulkCreate
                | TriggerEvent::PostBulkCreate
                | TriggerEvent::PreBulkUpdate
                | TriggerEvent::PostBulkUpdate
                | TriggerEvent::PreBulkDelete
                | TriggerEvent::PostBulkDelete
        )
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        TriggerEvent::ALL
            .into_iter()
            .find(|event| event.as_str() == normalized)
            .ok_or_else(|| format!("Unknown trigger event: {}", s))
    }
}

/// Ordering and short-circuit class. Lower ordinal runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerPriority {
    Critical = 1,
    High = 2,
    #[default]
    Normal = 3,
    Low = 4,
    Background = 5,
}

impl TriggerPriority {
    pub const ALL: [TriggerPriority; 5] = [
        TriggerPriority::Critical,
        TriggerPriority::High,
        TriggerPriority::Normal,
        TriggerPriority::Low,
        TriggerPriority::Background,
    ];

    pub fn ordinal(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerPriority::Critical => "CRITICAL",
            TriggerPriority::High => "HIGH",
            TriggerPriority::Normal => "NORMAL",
            TriggerPriority::Low => "LOW",
            TriggerPriority::Background => "BACKGROUND",
        }
    }
}

impl fmt::Display for TriggerPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        TriggerPriority::ALL
            .into_iter()
            .find(|priority| priority.as_str() == normalized)
            .ok_or_else(|| format!("Unknown trigger priority: {}", s))
    }
}

// ===== Trigger views =====

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_executions: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSummary {
    pub id: Uuid,
    pub name: String,
    pub event: TriggerEvent,
    pub entity_type: String,
    pub priority: TriggerPriority,
    pub enabled: bool,
    pub description: String,
    pub conditions_count: usize,
    pub actions_count: usize,
    pub execution_stats: ExecutionStats,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kind and description of a condition or action attached to a trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub kind: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_retry: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDetails {
    #[serde(flatten)]
    pub summary: TriggerSummary,
    pub max_retries: i32,
    pub timeout_seconds: f64,
    pub conditions: Vec<ComponentInfo>,
    pub actions: Vec<ComponentInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerListFilters {
    pub enabled_only: bool,
    pub entity_type: Option<String>,
    pub event: Option<String>,
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerList {
    pub triggers: Vec<TriggerSummary>,
    pub total_count: usize,
    pub filters_applied: TriggerListFilters,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToggleRequest {
    #[serde(default)]
    pub enable: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleOutcome {
    pub trigger_name: String,
    pub action: String,
    pub enabled: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualExecutionRequest {
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResultView {
    pub trigger_name: Option<String>,
    pub success: bool,
    pub message: Option<String>,
    pub data: Metadata,
    pub execution_time_ms: Option<f64>,
    pub error: Option<String>,
    pub modified_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualExecutionOutcome {
    pub trigger_name: String,
    pub event: TriggerEvent,
    pub entity_type: String,
    pub instance_id: String,
    pub executed_by: Option<String>,
    pub execution_results: Vec<ExecutionResultView>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineToggleRequest {
    pub enable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineToggleOutcome {
    pub enabled: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheClearOutcome {
    pub message: String,
    pub snapshots_cleared: usize,
    pub timestamp: DateTime<Utc>,
}

// ===== Registry and engine status =====

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_triggers: usize,
    pub enabled_triggers: usize,
    pub disabled_triggers: usize,
    pub events: BTreeMap<String, usize>,
    pub entity_types: BTreeMap<String, usize>,
    pub priorities: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub issues: Vec<String>,
}

impl HealthReport {
    pub fn from_issues(issues: Vec<String>) -> Self {
        Self {
            healthy: issues.is_empty(),
            issues,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub success_rate: f64,
    /// Seconds
    pub average_execution_time: f64,
    /// Seconds
    pub peak_execution_time: f64,
    pub last_execution: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub enabled: bool,
    pub max_workers: usize,
    pub total_triggers: usize,
    pub enabled_triggers: usize,
    pub metrics: EngineMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureStatus {
    pub enabled: bool,
    pub cache_size: usize,
    pub cache_capacity: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStatus {
    pub registry_stats: RegistryStats,
    pub engine_stats: EngineStats,
    pub capture: CaptureStatus,
    pub registry_health: HealthReport,
    pub engine_health: HealthReport,
    pub timestamp: DateTime<Utc>,
}

// ===== Export =====

/// Serializable policy of one trigger. Conditions and actions are code and are not exported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub name: String,
    pub event: TriggerEvent,
    pub entity_type: String,
    pub priority: TriggerPriority,
    pub enabled: bool,
    pub max_retries: i32,
    pub timeout_seconds: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub stats: ExecutionStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub total_count: usize,
    pub export_timestamp: Option<DateTime<Utc>>,
    pub exported_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportedConfig {
    pub triggers: Vec<TriggerConfig>,
    pub metadata: ExportMetadata,
}

// ===== Envelope =====

/// Response envelope of every administrative operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> AdminResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn failure(code: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            code: Some(code.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        let mut priorities = vec![
            TriggerPriority::Background,
            TriggerPriority::Normal,
            TriggerPriority::Critical,
            TriggerPriority::High,
        ];
        priorities.sort();

        assert_eq!(priorities[0], TriggerPriority::Critical);
        assert_eq!(priorities[3], TriggerPriority::Background);
        assert_eq!(TriggerPriority::Critical.ordinal(), 1);
    }

    #[test]
    fn test_event_parsing() {
        assert_eq!("post_save".parse::<TriggerEvent>(), Ok(TriggerEvent::PostSave));
        assert_eq!("PRE_BULK_DELETE".parse::<TriggerEvent>(), Ok(TriggerEvent::PreBulkDelete));
        assert!("saved".parse::<TriggerEvent>().is_err());
        assert_eq!("high".parse::<TriggerPriority>(), Ok(TriggerPriority::High));
    }

    #[test]
    fn test_event_serde_matches_display() {
        let json = serde_json::to_value(TriggerEvent::PostBulkUpdate).unwrap();
        assert_eq!(json, serde_json::json!("post_bulk_update"));
        let json = serde_json::to_value(TriggerPriority::Background).unwrap();
        assert_eq!(json, serde_json::json!("BACKGROUND"));
    }
}
