// Trigger actions - units of side-effecting work executed when a trigger fires

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::conditions::short_type_name;
use super::context::{ExecutionContext, ExecutionResult};
use super::entity::{EntitySnapshot, FieldMap};
use super::error::TriggerResult;
use super::store::StoreTransaction;

/// Upper bound of the default exponential backoff
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// `min(2^attempt, 300)` seconds
pub fn default_retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt)).min(MAX_RETRY_DELAY)
}

#[async_trait]
pub trait Action: Send + Sync {
    /// Run the action. Writes go through `store`, which is committed only if
    /// every action of the trigger attempt succeeds.
    async fn execute(&self, ctx: &ExecutionContext, store: &dyn StoreTransaction) -> TriggerResult<ExecutionResult>;

    fn description(&self) -> String;

    fn kind(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }

    fn can_retry(&self) -> bool {
        true
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        default_retry_delay(attempt)
    }

    /// Entity fields read or written on the triggering entity
    fn referenced_fields(&self) -> Vec<String> {
        Vec::new()
    }

    /// Constant values written to fields of the triggering entity
    fn field_assignments(&self) -> Vec<(String, Value)> {
        Vec::new()
    }
}

// ===== Templates =====

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").expect("placeholder pattern is valid"))
}

fn placeholder_value(ctx: &ExecutionContext, name: &str) -> Option<String> {
    let value = match name {
        "event" => ctx.event.to_string(),
        "entity_type" | "model" => ctx.entity_type.clone(),
        "timestamp" => ctx.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        "execution_id" => ctx.execution_id.to_string(),
        "user" => ctx
            .actor
            .as_ref()
            .map(|a| a.display_name.clone().unwrap_or_else(|| a.id.clone()))
            .unwrap_or_else(|| "System".to_string()),
        "instance_id" => ctx.instance_id()?.to_string(),
        path => match ctx.instance.as_ref()?.lookup(path)? {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        },
    };
    Some(value)
}

/// Replace `{{name}}` placeholders with context values. Unknown names are left in place.
pub fn render_template(template: &str, ctx: &ExecutionContext) -> String {
    placeholder_pattern()
        .replace_all(template, |caps: &regex::Captures| {
            placeholder_value(ctx, &caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn render_value(value: &Value, ctx: &ExecutionContext) -> Value {
    match value {
        Value::String(s) => Value::String(render_template(s, ctx)),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), render_value(v, ctx))).collect()),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, ctx)).collect()),
        _ => value.clone(),
    }
}

// ===== Logging =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogAction {
    pub message: String,
    pub level: LogLevel,
    pub include_context: bool,
}

impl LogAction {
    pub fn new(message: &str, level: LogLevel) -> Self {
        Self {
            message: message.to_string(),
            level,
            include_context: true,
        }
    }

    pub fn without_context(mut self) -> Self {
        self.include_context = false;
        self
    }
}

#[async_trait]
impl Action for LogAction {
    async fn execute(&self, ctx: &ExecutionContext, _store: &dyn StoreTransaction) -> TriggerResult<ExecutionResult> {
        let mut line = render_template(&self.message, ctx);
        if self.include_context {
            let context_info = json!({
                "event": ctx.event,
                "entity_type": ctx.entity_type,
                "instance_id": ctx.instance_id(),
                "user": ctx.actor_id(),
                "timestamp": ctx.timestamp.to_rfc3339(),
            });
            line.push_str(&format!(" | Context: {}", context_info));
        }

        match self.level {
            LogLevel::Debug => debug!("{}", line),
            LogLevel::Info => info!("{}", line),
            LogLevel::Warning => warn!("{}", line),
            LogLevel::Error => error!("{}", line),
        }

        Ok(ExecutionResult::success("Log entry created"))
    }

    fn description(&self) -> String {
        format!("Log message: {} (level: {:?})", self.message, self.level)
    }

    fn can_retry(&self) -> bool {
        false
    }
}

// ===== Record actions =====

/// Sets a field on the stored copy of the triggering instance
#[derive(Debug, Clone)]
pub struct UpdateFieldAction {
    pub field: String,
    pub value: Value,
    guard: Option<(String, Value)>,
}

impl UpdateFieldAction {
    pub fn new(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            value: value.into(),
            guard: None,
        }
    }

    /// Only update when `field` currently equals `value` on the instance
    pub fn only_if(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.guard = Some((field.to_string(), value.into()));
        self
    }
}

#[async_trait]
impl Action for UpdateFieldAction {
    async fn execute(&self, ctx: &ExecutionContext, store: &dyn StoreTransaction) -> TriggerResult<ExecutionResult> {
        let Some(instance) = ctx.instance.as_ref() else {
            return Ok(ExecutionResult::failure("No instance to update"));
        };
        let Some(id) = instance.id.as_deref() else {
            return Ok(ExecutionResult::failure("Instance has not been saved yet"));
        };

        if let Some((guard_field, expected)) = &self.guard {
            let current = instance.lookup(guard_field).cloned().unwrap_or(Value::Null);
            if current != *expected {
                return Ok(ExecutionResult::success(format!(
                    "Condition not met: {}={}",
                    guard_field, current
                )));
            }
        }

        let mut record = store
            .fetch(&instance.entity_type, id)
            .await?
            .unwrap_or_else(|| (**instance).clone());
        let old_value = record.set_path(&self.field, self.value.clone())?.unwrap_or(Value::Null);
        store.save(record).await?;

        Ok(ExecutionResult::success(format!(
            "Updated {} from {} to {}",
            self.field, old_value, self.value
        ))
        .with_data("field_name", self.field.clone())
        .with_data("old_value", old_value)
        .with_data("new_value", self.value.clone())
        .with_modified_field(self.field.clone()))
    }

    fn description(&self) -> String {
        let mut desc = format!("Update field '{}' to {}", self.field, self.value);
        if let Some((field, value)) = &self.guard {
            desc.push_str(&format!(" if {}={}", field, value));
        }
        desc
    }

    fn referenced_fields(&self) -> Vec<String> {
        let mut fields = vec![self.field.clone()];
        if let Some((field, _)) = &self.guard {
            fields.push(field.clone());
        }
        fields
    }

    fn field_assignments(&self) -> Vec<(String, Value)> {
        vec![(self.field.clone(), self.value.clone())]
    }
}

/// Inserts a new record, optionally linked to the triggering instance
#[derive(Debug, Clone)]
pub struct CreateRecordAction {
    pub entity_type: String,
    pub fields: FieldMap,
    related_field: Option<String>,
    created_by_field: Option<String>,
}

impl CreateRecordAction {
    pub fn new(entity_type: &str, fields: FieldMap) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            fields,
            related_field: None,
            created_by_field: None,
        }
    }

    /// Store the triggering instance id in `field`
    pub fn related_by(mut self, field: &str) -> Self {
        self.related_field = Some(field.to_string());
        self
    }

    /// Store the acting user id in `field`
    pub fn stamp_actor(mut self, field: &str) -> Self {
        self.created_by_field = Some(field.to_string());
        self
    }
}

#[async_trait]
impl Action for CreateRecordAction {
    async fn execute(&self, ctx: &ExecutionContext, store: &dyn StoreTransaction) -> TriggerResult<ExecutionResult> {
        let id = Uuid::new_v4().to_string();
        let mut record = EntitySnapshot::new(self.entity_type.clone(), id.clone());
        record.fields = self.fields.clone();

        if let (Some(field), Some(instance_id)) = (&self.related_field, ctx.instance_id()) {
            record.set(field, Value::String(instance_id.to_string()));
        }
        if let (Some(field), Some(actor_id)) = (&self.created_by_field, ctx.actor_id()) {
            record.set(field, Value::String(actor_id.to_string()));
        }

        store.save(record).await?;

        Ok(ExecutionResult::success(format!("Created {} record", self.entity_type))
            .with_data("created_record_id", id)
            .with_data("entity_type", self.entity_type.clone()))
    }

    fn description(&self) -> String {
        format!("Create {} record", self.entity_type)
    }
}

/// Writes `notification` records for the target users, or for the acting user
#[derive(Debug, Clone)]
pub struct NotificationAction {
    pub title: String,
    pub message: String,
    pub notification_type: String,
    pub target_users: Vec<String>,
}

impl NotificationAction {
    pub fn new(title: &str, message: &str) -> Self {
        Self {
            title: title.to_string(),
            message: message.to_string(),
            notification_type: "info".to_string(),
            target_users: Vec::new(),
        }
    }

    pub fn of_type(mut self, notification_type: &str) -> Self {
        self.notification_type = notification_type.to_string();
        self
    }

    pub fn to_users(mut self, users: &[&str]) -> Self {
        self.target_users = users.iter().map(|u| u.to_string()).collect();
        self
    }
}

#[async_trait]
impl Action for NotificationAction {
    async fn execute(&self, ctx: &ExecutionContext, store: &dyn StoreTransaction) -> TriggerResult<ExecutionResult> {
        let title = render_template(&self.title, ctx);
        let message = render_template(&self.message, ctx);

        let mut recipients = self.target_users.clone();
        if recipients.is_empty() {
            recipients.extend(ctx.actor_id().map(str::to_string));
        }

        for user_id in &recipients {
            let notification = EntitySnapshot::new("notification", Uuid::new_v4().to_string())
                .with_field("user_id", user_id.clone())
                .with_field("title", title.clone())
                .with_field("message", message.clone())
                .with_field("type", self.notification_type.clone())
                .with_field("read", false)
                .with_field("created_at", ctx.timestamp.to_rfc3339())
                .with_field(
                    "metadata",
                    json!({
                        "trigger_event": ctx.event,
                        "source_entity": ctx.entity_type,
                        "source_id": ctx.instance_id(),
                    }),
                );
            store.save(notification).await?;
        }

        Ok(ExecutionResult::success(format!("Created {} notifications", recipients.len()))
            .with_data("notifications_created", recipients.len())
            .with_data("title", title))
    }

    fn description(&self) -> String {
        format!("Create notification: {}", self.title)
    }
}

/// Writes an `activity_log` record describing the event
#[derive(Debug, Clone)]
pub struct AuditLogAction {
    pub action_type: String,
    pub note: Option<String>,
    pub include_changes: bool,
}

impl AuditLogAction {
    pub fn new(action_type: &str) -> Self {
        Self {
            action_type: action_type.to_string(),
            note: None,
            include_changes: true,
        }
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }

    pub fn without_changes(mut self) -> Self {
        self.include_changes = false;
        self
    }
}

#[async_trait]
impl Action for AuditLogAction {
    async fn execute(&self, ctx: &ExecutionContext, store: &dyn StoreTransaction) -> TriggerResult<ExecutionResult> {
        let mut details = FieldMap::new();
        details.insert("trigger_event".into(), json!(ctx.event));
        details.insert("entity_type".into(), json!(ctx.entity_type));
        details.insert("instance_id".into(), json!(ctx.instance_id()));
        details.insert("action_type".into(), json!(self.action_type));
        details.insert("timestamp".into(), json!(ctx.timestamp.to_rfc3339()));
        if self.include_changes && ctx.previous.is_some() && ctx.instance.is_some() {
            details.insert("changes".into(), serde_json::to_value(ctx.field_changes())?);
        }
        if !ctx.metadata.is_empty() {
            details.insert("metadata".into(), Value::Object(ctx.metadata.clone()));
        }

        let ip_address = ctx
            .request
            .as_ref()
            .and_then(|r| r.ip_address)
            .map(|ip| ip.to_string());

        let entry = EntitySnapshot::new("activity_log", Uuid::new_v4().to_string())
            .with_field("user_id", json!(ctx.actor_id()))
            .with_field("action_type", self.action_type.clone())
            .with_field("description", json!(self.note.as_ref().map(|n| render_template(n, ctx))))
            .with_field("details", Value::Object(details))
            .with_field("ip_address", json!(ip_address));
        store.save(entry).await?;

        Ok(ExecutionResult::success("Audit log entry created").with_data("action_type", self.action_type.clone()))
    }

    fn description(&self) -> String {
        format!("Create audit log: {}", self.action_type)
    }
}

// ===== Outbound actions =====

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Email delivery collaborator
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> TriggerResult<()>;
}

pub struct SendEmailAction {
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
    pub from: String,
    mailer: Arc<dyn Mailer>,
}

impl SendEmailAction {
    pub fn new(mailer: Arc<dyn Mailer>, subject: &str, body: &str, recipients: &[&str]) -> Self {
        Self {
            subject: subject.to_string(),
            body: body.to_string(),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            from: "noreply@example.com".to_string(),
            mailer,
        }
    }

    pub fn from_address(mut self, from: &str) -> Self {
        self.from = from.to_string();
        self
    }
}

impl fmt::Debug for SendEmailAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendEmailAction")
            .field("subject", &self.subject)
            .field("recipients", &self.recipients)
            .finish()
    }
}

#[async_trait]
impl Action for SendEmailAction {
    async fn execute(&self, ctx: &ExecutionContext, _store: &dyn StoreTransaction) -> TriggerResult<ExecutionResult> {
        let subject = render_template(&self.subject, ctx);
        let email = OutgoingEmail {
            from: self.from.clone(),
            to: self.recipients.clone(),
            subject: subject.clone(),
            body: render_template(&self.body, ctx),
        };
        self.mailer.send(email).await?;

        Ok(
            ExecutionResult::success(format!("Email sent to {} recipients", self.recipients.len()))
                .with_data("recipients", self.recipients.clone())
                .with_data("subject", subject),
        )
    }

    fn description(&self) -> String {
        format!("Send email to {} recipients: {}", self.recipients.len(), self.subject)
    }
}

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);
const RESPONSE_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct WebhookAction {
    pub url: String,
    pub method: reqwest::Method,
    pub headers: Vec<(String, String)>,
    pub payload_template: FieldMap,
    client: reqwest::Client,
}

impl WebhookAction {
    pub fn post(url: &str) -> Self {
        Self::new(reqwest::Method::POST, url)
    }

    pub fn new(method: reqwest::Method, url: &str) -> Self {
        Self {
            url: url.to_string(),
            method,
            headers: Vec::new(),
            payload_template: FieldMap::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_payload(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload_template.insert(key.to_string(), value.into());
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn build_payload(&self, ctx: &ExecutionContext) -> Value {
        let mut payload = FieldMap::new();
        payload.insert("event".into(), json!(ctx.event));
        payload.insert("entity_type".into(), json!(ctx.entity_type));
        payload.insert("timestamp".into(), json!(ctx.timestamp.to_rfc3339()));
        payload.insert("execution_id".into(), json!(ctx.execution_id));
        if let Some(id) = ctx.instance_id() {
            payload.insert("instance".into(), json!({ "id": id, "entity_type": ctx.entity_type }));
        }
        if let Some(actor) = &ctx.actor {
            payload.insert("user".into(), json!({ "id": actor.id, "name": actor.display_name }));
        }
        for (key, value) in &self.payload_template {
            payload.insert(key.clone(), render_value(value, ctx));
        }
        Value::Object(payload)
    }
}

#[async_trait]
impl Action for WebhookAction {
    async fn execute(&self, ctx: &ExecutionContext, _store: &dyn StoreTransaction) -> TriggerResult<ExecutionResult> {
        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(&self.build_payload(ctx));
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?.error_for_status()?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        let preview: String = body.chars().take(RESPONSE_PREVIEW_CHARS).collect();

        Ok(ExecutionResult::success(format!("Webhook sent successfully (status: {})", status))
            .with_data("status_code", status)
            .with_data("response_text", preview))
    }

    fn description(&self) -> String {
        format!("Send {} webhook to {}", self.method, self.url)
    }
}

// ===== Closure actions =====

type ActionFn = Arc<dyn Fn(ExecutionContext) -> BoxFuture<'static, TriggerResult<ExecutionResult>> + Send + Sync>;

/// Action backed by an async closure
#[derive(Clone)]
pub struct FunctionAction {
    description: String,
    retryable: bool,
    fixed_delay: Option<Duration>,
    f: ActionFn,
}

impl FunctionAction {
    pub fn new<F, Fut>(description: &str, f: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TriggerResult<ExecutionResult>> + Send + 'static,
    {
        Self {
            description: description.to_string(),
            retryable: true,
            fixed_delay: None,
            f: Arc::new(move |ctx| f(ctx).boxed()),
        }
    }

    pub fn no_retry(mut self) -> Self {
        self.retryable = false;
        self
    }

    /// Use a constant delay between attempts instead of exponential backoff
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.fixed_delay = Some(delay);
        self
    }
}

impl fmt::Debug for FunctionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionAction")
            .field("description", &self.description)
            .field("retryable", &self.retryable)
            .finish()
    }
}

#[async_trait]
impl Action for FunctionAction {
    async fn execute(&self, ctx: &ExecutionContext, _store: &dyn StoreTransaction) -> TriggerResult<ExecutionResult> {
        (self.f)(ctx.clone()).await
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn can_retry(&self) -> bool {
        self.retryable
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        self.fixed_delay.unwrap_or_else(|| default_retry_delay(attempt))
    }
}

/// Shorthand constructors for common actions
pub mod presets {
    use super::*;

    pub fn log_info(message: &str) -> LogAction {
        LogAction::new(message, LogLevel::Info)
    }

    pub fn log_warning(message: &str) -> LogAction {
        LogAction::new(message, LogLevel::Warning)
    }

    pub fn log_error(message: &str) -> LogAction {
        LogAction::new(message, LogLevel::Error)
    }

    pub fn update_field(field: &str, value: impl Into<Value>) -> UpdateFieldAction {
        UpdateFieldAction::new(field, value)
    }

    pub fn send_notification(title: &str, message: &str, users: &[&str]) -> NotificationAction {
        NotificationAction::new(title, message).to_users(users)
    }

    pub fn audit_log(action_type: &str) -> AuditLogAction {
        AuditLogAction::new(action_type)
    }
}
