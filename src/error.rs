//! Structured error types for API responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (422)
    MissingRequiredField,
    InvalidFieldValue,
    InvalidState,

    // Auth errors
    Unauthorized,
    Forbidden,

    // Not found errors
    NotFound,

    // Conflict errors (409)
    AlreadyExists,
    Conflict,

    // Upstream errors (502)
    UpstreamGateway,

    // Internal errors (500)
    DatabaseError,
    InternalError,
}

/// A single field-level validation failure.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Structured error returned by handlers and services.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_fields(mut self, fields: Vec<FieldError>) -> Self {
        self.fields = fields;
        self
    }

    // Convenience constructors

    pub fn validation(fields: Vec<FieldError>) -> Self {
        let message = fields
            .iter()
            .map(|f| format!("{}: {}", f.field, f.message))
            .collect::<Vec<_>>()
            .join("; ");
        Self::new(ErrorCode::InvalidFieldValue, message).with_fields(fields)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("{} is required", field),
        )
        .with_fields(vec![FieldError::new(field, "is required")])
    }

    pub fn invalid_value(field: &str, reason: &str) -> Self {
        Self::new(ErrorCode::InvalidFieldValue, reason)
            .with_fields(vec![FieldError::new(field, reason)])
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorCode::Unauthorized, "Not authenticated")
    }

    pub fn forbidden(reason: &str) -> Self {
        Self::new(ErrorCode::Forbidden, reason)
    }

    pub fn not_found(entity: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("{} not found", entity))
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, reason)
    }

    pub fn already_exists(entity: &str) -> Self {
        Self::new(ErrorCode::AlreadyExists, format!("{} already exists", entity))
    }

    pub fn upstream_gateway(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::UpstreamGateway, err.to_string())
    }

    pub fn database(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::DatabaseError, err.to_string())
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }

    /// HTTP status code this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self.code {
            ErrorCode::MissingRequiredField
            | ErrorCode::InvalidFieldValue
            | ErrorCode::InvalidState => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::AlreadyExists | ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::UpstreamGateway => StatusCode::BAD_GATEWAY,
            ErrorCode::DatabaseError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

// Allow using ? with anyhow errors by converting them
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        // Try to downcast to ApiError first
        match err.downcast::<ApiError>() {
            Ok(api_err) => api_err,
            Err(err) => ApiError::internal(err),
        }
    }
}

/// JSON body for error responses.
#[derive(Serialize)]
struct ErrorBody {
    code: ErrorCode,
    detail: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<FieldError>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Never leak internals to the caller; the tracing layer logs the
        // original message with the request id.
        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(code = ?self.code, error = %self.message, "internal error");
            "Internal Server Error".to_string()
        } else {
            self.message
        };
        let body = ErrorBody {
            code: self.code,
            detail,
            fields: self.fields,
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::missing_field("objective").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::not_found("Board").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::forbidden("owner role required").status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::conflict("duplicate").status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::upstream_gateway("gateway timed out").status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn validation_error_carries_all_fields() {
        let err = ApiError::validation(vec![
            FieldError::new("objective", "is required"),
            FieldError::new("success_metrics", "is required"),
        ]);
        assert_eq!(err.fields.len(), 2);
        assert!(err.message.contains("objective"));
        assert!(err.message.contains("success_metrics"));
    }

    #[test]
    fn anyhow_downcast_preserves_api_error() {
        let err: anyhow::Error = ApiError::not_found("Task").into();
        let back: ApiError = err.into();
        assert_eq!(back.code, ErrorCode::NotFound);
    }
}
