// Trigger Framework
//
// Declarative in-process dispatch of entity lifecycle events.
// Triggers bind an event and entity type to conditions and actions; the
// engine runs them by priority on a bounded worker pool.

pub mod actions;
pub mod admin;
pub mod bootstrap;
pub mod conditions;
pub mod context;
pub mod definition;
pub mod engine;
pub mod entity;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod store;

pub use actions::{
    Action, AuditLogAction, CreateRecordAction, FunctionAction, LogAction, LogLevel, Mailer, NotificationAction,
    OutgoingEmail, SendEmailAction, UpdateFieldAction, WebhookAction,
};
pub use admin::TriggerAdmin;
pub use bootstrap::{system_triggers, InitializationReport, TriggerSystem};
pub use conditions::{
    AllOf, AnyOf, ComparisonOperator, Condition, ConditionOutcome, CreatedCondition, FieldChangedCondition,
    FieldValueCondition, MultipleFieldsChangedCondition, Not, PredicateCondition, StatusTransitionCondition,
    TimeWindow, TimeWindowCondition, UserRoleCondition,
};
pub use context::{Actor, ExecutionContext, ExecutionResult, RequestMeta, RequestScope};
pub use definition::TriggerDefinition;
pub use engine::{ConditionErrorPolicy, EngineConfig, ExecutionMode, TriggerEngine};
pub use entity::{Entity, EntitySchema, EntitySnapshot, FieldType, SchemaError, SchemaRegistry};
pub use error::{TriggerError, TriggerResult};
pub use lifecycle::LifecycleCapture;
pub use registry::TriggerRegistry;
pub use store::{EntityStore, InMemoryStore, NullStore, StoreError, StoreTransaction};
pub use ssm_shared::{TriggerEvent, TriggerPriority};
