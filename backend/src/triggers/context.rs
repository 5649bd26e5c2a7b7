// Execution context and results passed through conditions and actions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ssm_shared::{ExecutionResultView, TriggerEvent};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::entity::{EntitySnapshot, FieldChange, FieldMap};
use super::error::TriggerError;

/// The identity a mutation is attributed to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub display_name: Option<String>,
    pub role: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            role: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case(role))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub request_id: Option<String>,
    pub ip_address: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub path: Option<String>,
}

/// Identity and request metadata for one unit of caller work.
///
/// Built once by the request-handling layer and passed into every lifecycle
/// notification made while serving that request.
#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    pub actor: Option<Actor>,
    pub request: Option<RequestMeta>,
}

impl RequestScope {
    /// Scope with no actor, for background and system work
    pub fn system() -> Self {
        Self::default()
    }

    pub fn for_actor(actor: Actor) -> Self {
        Self {
            actor: Some(actor),
            request: None,
        }
    }

    pub fn with_request(mut self, request: RequestMeta) -> Self {
        self.request = Some(request);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub event: TriggerEvent,
    pub entity_type: String,
    pub instance: Option<Arc<EntitySnapshot>>,
    pub previous: Option<Arc<EntitySnapshot>>,
    pub actor: Option<Actor>,
    pub request: Option<RequestMeta>,
    pub created: Option<bool>,
    pub update_fields: Option<Vec<String>>,
    pub metadata: FieldMap,
    pub execution_id: Uuid,
    pub timestamp: DateTime<Utc>,
    changes: OnceLock<BTreeMap<String, FieldChange>>,
    cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn new(event: TriggerEvent, entity_type: impl Into<String>) -> Self {
        Self {
            event,
            entity_type: entity_type.into(),
            instance: None,
            previous: None,
            actor: None,
            request: None,
            created: None,
            update_fields: None,
            metadata: FieldMap::new(),
            execution_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            changes: OnceLock::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_instance(mut self, instance: EntitySnapshot) -> Self {
        self.instance = Some(Arc::new(instance));
        self.changes = OnceLock::new();
        self
    }

    pub fn with_previous(mut self, previous: EntitySnapshot) -> Self {
        self.previous = Some(Arc::new(previous));
        self.changes = OnceLock::new();
        self
    }

    pub fn with_scope(mut self, scope: &RequestScope) -> Self {
        self.actor = scope.actor.clone();
        self.request = scope.request.clone();
        self
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_created(mut self, created: bool) -> Self {
        self.created = Some(created);
        self
    }

    pub fn with_update_fields(mut self, fields: Vec<String>) -> Self {
        self.update_fields = Some(fields);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Copy of this context observing `token` for cancellation
    pub(crate) fn with_cancellation(&self, token: CancellationToken) -> Self {
        let mut ctx = self.clone();
        ctx.cancellation = token;
        ctx
    }

    /// Per-field changes between the previous and current snapshot.
    /// Empty unless both snapshots are present. Computed once.
    pub fn field_changes(&self) -> &BTreeMap<String, FieldChange> {
        self.changes.get_or_init(|| match (&self.previous, &self.instance) {
            (Some(before), Some(after)) => before.diff(after),
            _ => BTreeMap::new(),
        })
    }

    pub fn changed_fields(&self) -> Vec<&str> {
        self.field_changes().keys().map(String::as_str).collect()
    }

    pub fn field_changed(&self, field: &str) -> bool {
        self.field_changes().contains_key(field)
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance.as_ref().and_then(|i| i.id.as_deref())
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor.as_ref().map(|a| a.id.as_str())
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Outcome of one action (or of a trigger that never reached its actions)
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub trigger_name: Option<String>,
    pub success: bool,
    pub message: Option<String>,
    pub data: FieldMap,
    pub execution_time: Option<Duration>,
    pub error: Option<Arc<TriggerError>>,
    pub modified_fields: Vec<String>,
}

impl ExecutionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn from_error(error: TriggerError) -> Self {
        Self {
            success: false,
            message: Some(error.to_string()),
            error: Some(Arc::new(error)),
            ..Default::default()
        }
    }

    /// Successful result for a trigger whose conditions did not hold
    pub fn skipped(message: impl Into<String>) -> Self {
        Self::success(message).with_data("skipped", true)
    }

    pub fn timed_out(name: &str, timeout: Duration) -> Self {
        Self::from_error(TriggerError::Timeout {
            name: name.to_string(),
            timeout,
        })
        .with_trigger(name)
    }

    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn with_modified_field(mut self, field: impl Into<String>) -> Self {
        self.modified_fields.push(field.into());
        self
    }

    pub fn with_trigger(mut self, name: &str) -> Self {
        self.trigger_name = Some(name.to_string());
        self
    }

    pub fn with_execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time = Some(elapsed);
        self
    }

    pub fn is_skipped(&self) -> bool {
        self.data.get("skipped").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.error.as_deref(), Some(TriggerError::Timeout { .. }))
    }

    pub fn to_view(&self) -> ExecutionResultView {
        ExecutionResultView {
            trigger_name: self.trigger_name.clone(),
            success: self.success,
            message: self.message.clone(),
            data: self.data.clone(),
            execution_time_ms: self.execution_time.map(|d| d.as_secs_f64() * 1000.0),
            error: self.error.as_ref().map(|e| e.to_string()),
            modified_fields: self.modified_fields.clone(),
        }
    }
}
