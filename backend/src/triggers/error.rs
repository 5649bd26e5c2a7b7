use std::time::Duration;
use thiserror::Error;

use super::entity::SchemaError;
use super::store::StoreError;

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Action failed: {0}")]
    ActionFailed(String),
    #[error("Condition evaluation failed: {0}")]
    Condition(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Trigger '{name}' timed out after {}s", .timeout.as_secs_f64())]
    Timeout { name: String, timeout: Duration },
    #[error("{0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Trigger registration rejected: {}", .0.join("; "))]
    Registration(Vec<String>),
    #[error("Execution panicked: {0}")]
    Panicked(String),
    #[error("Execution cancelled")]
    Cancelled,
    #[error("Trigger engine is shut down")]
    Shutdown,
}

pub type TriggerResult<T> = Result<T, TriggerError>;

impl TriggerError {
    pub fn action(message: impl Into<String>) -> Self {
        TriggerError::ActionFailed(message.into())
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        TriggerError::Panicked(message)
    }
}
