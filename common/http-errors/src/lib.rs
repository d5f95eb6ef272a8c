use std::fmt;

use axum::{http::{HeaderValue, StatusCode}, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use uuid::Uuid;

/// Stable machine-readable rejection codes shared by every route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthenticated,
    OperatorContextRequired,
    OperatorContextConflict,
    OperatorNotFound,
    PermissionDenied,
    RateLimited,
    InvalidCredentials,
    InvalidTotp,
    MalformedCredential,
    CredentialExpired,
    ValidationFailed,
    MaintenanceMode,
    DependencyUnavailable,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::OperatorContextRequired => "OPERATOR_CONTEXT_REQUIRED",
            ErrorCode::OperatorContextConflict => "OPERATOR_CONTEXT_CONFLICT",
            ErrorCode::OperatorNotFound => "OPERATOR_NOT_FOUND",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorCode::InvalidTotp => "INVALID_TOTP",
            ErrorCode::MalformedCredential => "MALFORMED_CREDENTIAL",
            ErrorCode::CredentialExpired => "CREDENTIAL_EXPIRED",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::MaintenanceMode => "MAINTENANCE_MODE",
            ErrorCode::DependencyUnavailable => "DEPENDENCY_UNAVAILABLE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthenticated
            | ErrorCode::MalformedCredential
            | ErrorCode::CredentialExpired
            | ErrorCode::InvalidCredentials
            | ErrorCode::InvalidTotp => StatusCode::UNAUTHORIZED,
            ErrorCode::OperatorContextRequired
            | ErrorCode::OperatorContextConflict
            | ErrorCode::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorCode::OperatorNotFound => StatusCode::NOT_FOUND,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::ValidationFailed => StatusCode::BAD_REQUEST,
            ErrorCode::MaintenanceMode | ErrorCode::DependencyUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub request_id: Uuid,
}

#[derive(Serialize, Debug)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

/// Typed rejection carried to the HTTP boundary. `request_id` is the audit correlation key.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: Uuid,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>, request_id: Uuid) -> Self {
        Self { code, message: message.into(), request_id }
    }

    pub fn internal<E: fmt::Display>(e: E, request_id: Uuid) -> Self {
        Self::new(ErrorCode::InternalError, e.to_string(), request_id)
    }

    pub fn validation(message: impl Into<String>, request_id: Uuid) -> Self {
        Self::new(ErrorCode::ValidationFailed, message, request_id)
    }

    pub fn status(&self) -> StatusCode { self.code.status() }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status();
        let code = self.code.as_str();
        let request_id = self.request_id;
        let body = ErrorEnvelope { error: ErrorBody { code, message: self.message, request_id } };
        let mut resp = (status, Json(body)).into_response();
        resp.headers_mut().insert("X-Error-Code", HeaderValue::from_static(code));
        if let Ok(val) = HeaderValue::from_str(&request_id.to_string()) {
            resp.headers_mut().insert("X-Request-ID", val);
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
