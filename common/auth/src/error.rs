use chrono::{DateTime, Utc};
use common_http_errors::ErrorCode;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authorization header missing")]
    MissingAuthorization,
    #[error("authorization header malformed")]
    InvalidAuthorization,
    #[error("credential is not a well-formed token: {0}")]
    Malformed(String),
    #[error("credential missing required claim '{0}'")]
    MissingClaim(&'static str),
    #[error("credential expired at {0}")]
    Expired(DateTime<Utc>),
    #[error("token header missing key id (kid)")]
    MissingKeyId,
    #[error("no decoding key registered for kid '{0}'")]
    UnknownKeyId(String),
    #[error("unsupported token algorithm '{0}'")]
    UnsupportedAlgorithm(String),
    #[error("invalid token header: {0}")]
    InvalidHeader(String),
    #[error("signature verification failed: {0}")]
    Verification(String),
    #[error("failed to parse decoding key for kid '{0}': {1}")]
    KeyParse(String, String),
    #[error("failed to fetch JWKS: {0}")]
    JwksFetch(String),
    #[error("failed to parse JWKS response: {0}")]
    JwksDecode(String),
}

impl AuthError {
    /// Stable wire code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::Malformed(_) | AuthError::MissingClaim(_) => ErrorCode::MalformedCredential,
            AuthError::Expired(_) => ErrorCode::CredentialExpired,
            AuthError::MissingAuthorization
            | AuthError::InvalidAuthorization
            | AuthError::MissingKeyId
            | AuthError::UnknownKeyId(_)
            | AuthError::UnsupportedAlgorithm(_)
            | AuthError::InvalidHeader(_)
            | AuthError::Verification(_) => ErrorCode::Unauthenticated,
            AuthError::KeyParse(_, _) | AuthError::JwksFetch(_) | AuthError::JwksDecode(_) => {
                ErrorCode::InternalError
            }
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        Self::Verification(value.to_string())
    }
}
