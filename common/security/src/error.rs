use common_auth::AuthError;
use common_http_errors::{ApiError, ErrorCode};
use thiserror::Error;
use uuid::Uuid;

use crate::roles::AccessLevel;

/// Rejections produced while establishing or checking an operator context.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error(transparent)]
    Authentication(#[from] AuthError),
    #[error("credential is bound to operator '{bound}' but the request targets '{hinted}'")]
    ContextConflict { bound: String, hinted: String },
    #[error("an operator must be selected for this request")]
    ContextRequired,
    #[error("operator '{0}' not found or inactive")]
    OperatorNotFound(String),
    #[error("operator directory unavailable: {0}")]
    DirectoryUnavailable(String),
    #[error("{required} access required")]
    PermissionDenied { required: AccessLevel },
    #[error("emergency sessions are read-only")]
    ReadOnlySession,
}

impl SecurityError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SecurityError::Authentication(err) => err.code(),
            SecurityError::ContextConflict { .. } => ErrorCode::OperatorContextConflict,
            SecurityError::ContextRequired => ErrorCode::OperatorContextRequired,
            SecurityError::OperatorNotFound(_) => ErrorCode::OperatorNotFound,
            SecurityError::DirectoryUnavailable(_) => ErrorCode::DependencyUnavailable,
            SecurityError::PermissionDenied { .. } | SecurityError::ReadOnlySession => {
                ErrorCode::PermissionDenied
            }
        }
    }

    /// Client-facing message; dependency details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            SecurityError::Authentication(AuthError::MissingAuthorization) => {
                "authentication required".to_string()
            }
            SecurityError::Authentication(AuthError::Expired(_)) => {
                "credential has expired".to_string()
            }
            SecurityError::Authentication(err) if err.code() == ErrorCode::MalformedCredential => {
                "credential is malformed".to_string()
            }
            SecurityError::Authentication(_) => "credential could not be verified".to_string(),
            SecurityError::DirectoryUnavailable(_) => {
                "operator directory temporarily unavailable".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn to_api_error(&self, request_id: Uuid) -> ApiError {
        ApiError::new(self.code(), self.public_message(), request_id)
    }
}
