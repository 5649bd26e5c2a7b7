//! Error handling for the administrative HTTP surface
//!
//! Every failure is rendered as an `AdminResponse` with `success: false`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ssm_shared::AdminResponse;

use crate::triggers::TriggerError;

/// Application error type that can be converted to HTTP responses
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    ValidationError(Vec<String>),
    ServiceUnavailable(String),
    InternalError(String),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(msg) | Self::BadRequest(msg) | Self::ServiceUnavailable(msg) => msg.clone(),
            Self::ValidationError(errors) => format!("Validation failed: {}", errors.join("; ")),
            Self::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body: AdminResponse<()> = AdminResponse::failure(self.error_code(), self.message());
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<TriggerError> for AppError {
    fn from(err: TriggerError) -> Self {
        match err {
            TriggerError::NotFound(msg) => Self::NotFound(msg),
            TriggerError::InvalidRequest(msg) => Self::BadRequest(msg),
            TriggerError::Registration(errors) => Self::ValidationError(errors),
            TriggerError::Shutdown => Self::ServiceUnavailable(err.to_string()),
            other => Self::InternalError(other.to_string()),
        }
    }
}

/// Result type alias for handlers
pub type ApiResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::StoreError;

    #[test]
    fn test_trigger_errors_map_to_status() {
        let not_found: AppError = TriggerError::NotFound("Trigger 'x' not found".to_string()).into();
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.message(), "Trigger 'x' not found");

        let invalid: AppError = TriggerError::InvalidRequest("entity_type is required".to_string()).into();
        assert_eq!(invalid.error_code(), "BAD_REQUEST");

        let internal: AppError = TriggerError::Store(StoreError::Closed).into();
        assert_eq!(internal.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.message(), "An internal error occurred");
    }
}
