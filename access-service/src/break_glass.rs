use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common_audit::{AuditActor, AuditTrail, RequestInfo};
use common_http_errors::{ApiError, ErrorCode};
use common_observability::CoreMetrics;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::credentials::{
    normalize_email, verify_against_dummy, verify_password, EmergencyCredential,
    EmergencyCredentialStore,
};
use crate::mfa::verify_totp_code;
use crate::notifications::{EmergencyAccessAlert, SecurityNotifier};
use crate::rate_limiter::RateLimiterEngine;
use crate::tokens::{EmergencySession, SessionSigner};

pub const SESSION_MESSAGE: &str =
    "Emergency access granted for 30 minutes. This session is read-only by default.";
pub const SESSION_WARNING: &str =
    "You are using emergency authentication. Normal OAuth login will be restored as soon as possible.";

const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum BreakGlassError {
    #[error("too many emergency login attempts")]
    RateLimited,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid one-time code")]
    InvalidTotp,
    #[error("dependency unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl BreakGlassError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BreakGlassError::RateLimited => ErrorCode::RateLimited,
            BreakGlassError::Validation(_) => ErrorCode::ValidationFailed,
            BreakGlassError::InvalidCredentials => ErrorCode::InvalidCredentials,
            BreakGlassError::InvalidTotp => ErrorCode::InvalidTotp,
            BreakGlassError::Unavailable(_) => ErrorCode::DependencyUnavailable,
            BreakGlassError::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn public_message(&self) -> String {
        match self {
            BreakGlassError::RateLimited => {
                "Too many emergency login attempts. Try again in 1 hour.".to_string()
            }
            BreakGlassError::Validation(message) => message.clone(),
            BreakGlassError::InvalidCredentials => "Invalid credentials".to_string(),
            BreakGlassError::InvalidTotp => "Invalid authentication code".to_string(),
            BreakGlassError::Unavailable(_) => {
                "Emergency login is temporarily unavailable".to_string()
            }
            BreakGlassError::Internal(_) => "Internal server error".to_string(),
        }
    }

    pub fn to_api_error(&self, request_id: Uuid) -> ApiError {
        ApiError::new(self.code(), self.public_message(), request_id)
    }

    fn outcome(&self) -> &'static str {
        match self {
            BreakGlassError::RateLimited => "rate_limited",
            BreakGlassError::Validation(_) => "invalid_request",
            BreakGlassError::InvalidCredentials => "invalid_credentials",
            BreakGlassError::InvalidTotp => "invalid_totp",
            BreakGlassError::Unavailable(_) => "unavailable",
            BreakGlassError::Internal(_) => "error",
        }
    }
}

/// Body of `POST /api/auth/emergency-login`, read leniently so a rejection can still record
/// whatever justification and email the caller sent.
#[derive(Debug, Default, Deserialize)]
struct RawLoginBody {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default, alias = "totpCode")]
    totp_code: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

struct LoginInput {
    email: String,
    password: String,
    totp_code: String,
    reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionUser {
    pub user_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub tenant_id: Option<String>,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakGlassResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub user: SessionUser,
    pub message: &'static str,
    pub warning: &'static str,
}

impl BreakGlassResponse {
    fn new(session: &EmergencySession, credential: &EmergencyCredential) -> Self {
        Self {
            token: session.token.clone(),
            token_type: "Bearer",
            expires_at: session.expires_at,
            user: SessionUser {
                user_id: credential.account_id.clone(),
                email: credential.email.clone(),
                display_name: credential.display_name.clone(),
                tenant_id: credential.tenant_id.clone(),
                roles: credential.roles.clone(),
            },
            message: SESSION_MESSAGE,
            warning: SESSION_WARNING,
        }
    }
}

/// Details of one rejection, recorded before the error reaches the caller.
struct Rejection<'a> {
    stage: &'static str,
    failure_reason: &'a str,
    actor: AuditActor,
    tenant_id: Option<&'a str>,
}

impl<'a> Rejection<'a> {
    fn anonymous(stage: &'static str, failure_reason: &'a str) -> Self {
        Self { stage, failure_reason, actor: AuditActor::anonymous(), tenant_id: None }
    }
}

/// Emergency login: rate limit, credential lookup, password, TOTP, then a signed session.
///
/// Each attempt produces exactly one audit event: `AUTH_SUCCESS` for an issued session,
/// `AUTH_DENIED` carrying the rejection code otherwise.
#[derive(Clone)]
pub struct BreakGlassAuthenticator {
    limiter: Arc<dyn RateLimiterEngine>,
    credentials: Arc<dyn EmergencyCredentialStore>,
    signer: SessionSigner,
    audit: AuditTrail,
    notifier: SecurityNotifier,
    lookup_timeout: Duration,
    metrics: Option<CoreMetrics>,
}

impl BreakGlassAuthenticator {
    pub fn new(
        limiter: Arc<dyn RateLimiterEngine>,
        credentials: Arc<dyn EmergencyCredentialStore>,
        signer: SessionSigner,
        audit: AuditTrail,
    ) -> Self {
        Self {
            limiter,
            credentials,
            signer,
            audit,
            notifier: SecurityNotifier::disabled(),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            metrics: None,
        }
    }

    pub fn with_notifier(mut self, notifier: SecurityNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: CoreMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn authenticate(
        &self,
        body: &[u8],
        request: &RequestInfo,
        now: DateTime<Utc>,
    ) -> Result<BreakGlassResponse, BreakGlassError> {
        let raw: Option<RawLoginBody> = serde_json::from_slice(body).ok();
        let attempted_email = raw.as_ref().and_then(|b| trimmed(b.email.as_deref()));
        let reason = raw.as_ref().and_then(|b| trimmed(b.reason.as_deref()));
        let source = request.source_key();

        match self.limiter.check(source).await {
            Ok(decision) if decision.allowed => {}
            Ok(decision) => {
                let detail = format!("attempt {} exceeded limit", decision.current);
                let rejection = Rejection::anonymous("rate_limit", &detail);
                return Err(self
                    .reject(request, attempted_email, reason, rejection, BreakGlassError::RateLimited)
                    .await);
            }
            Err(err) => {
                let detail = err.to_string();
                let rejection = Rejection::anonymous("rate_limit", &detail);
                let err = BreakGlassError::Unavailable(detail.clone());
                return Err(self.reject(request, attempted_email, reason, rejection, err).await);
            }
        }

        let input = match validate(raw.as_ref()) {
            Ok(input) => input,
            Err(message) => {
                let rejection = Rejection::anonymous("validation", message);
                let err = BreakGlassError::Validation(message.to_string());
                return Err(self.reject(request, attempted_email, reason, rejection, err).await);
            }
        };
        let email = normalize_email(&input.email);
        let reason = Some(input.reason.as_str());
        let attempted = Some(input.email.as_str());

        let lookup = timeout(self.lookup_timeout, self.credentials.get_emergency_credential(&email));
        let credential = match lookup.await {
            Ok(Ok(found)) => found.filter(EmergencyCredential::is_eligible),
            Ok(Err(err)) => {
                let detail = err.to_string();
                let rejection = Rejection::anonymous("credential_lookup", &detail);
                let err = BreakGlassError::Unavailable(detail.clone());
                return Err(self.reject(request, attempted, reason, rejection, err).await);
            }
            Err(_) => {
                let err = BreakGlassError::Unavailable("credential lookup timed out".into());
                let rejection = Rejection::anonymous("credential_lookup", "credential lookup timed out");
                return Err(self.reject(request, attempted, reason, rejection, err).await);
            }
        };

        let Some(credential) = credential else {
            verify_against_dummy(&input.password);
            let rejection =
                Rejection::anonymous("credential_lookup", "user not found or not emergency admin");
            return Err(self
                .reject(request, attempted, reason, rejection, BreakGlassError::InvalidCredentials)
                .await);
        };

        let actor = AuditActor::new(credential.account_id.clone(), credential.roles.iter().cloned());
        let tenant_id = credential.tenant_id.as_deref();

        if !verify_password(&input.password, &credential.password_hash) {
            let rejection = Rejection {
                stage: "password",
                failure_reason: "invalid password",
                actor,
                tenant_id,
            };
            return Err(self
                .reject(request, attempted, reason, rejection, BreakGlassError::InvalidCredentials)
                .await);
        }

        let unix_secs = u64::try_from(now.timestamp()).unwrap_or_default();
        if !verify_totp_code(&credential.totp_secret, &input.totp_code, unix_secs) {
            let rejection = Rejection {
                stage: "totp",
                failure_reason: "invalid totp code",
                actor,
                tenant_id,
            };
            return Err(self
                .reject(request, attempted, reason, rejection, BreakGlassError::InvalidTotp)
                .await);
        }

        let session = match self.signer.issue(&credential, now) {
            Ok(session) => session,
            Err(err) => {
                let detail = err.to_string();
                let rejection = Rejection {
                    stage: "session",
                    failure_reason: &detail,
                    actor,
                    tenant_id,
                };
                let err = BreakGlassError::Internal(detail.clone());
                return Err(self.reject(request, attempted, reason, rejection, err).await);
            }
        };

        self.audit
            .record_auth_success(
                request,
                &actor,
                tenant_id,
                json!({
                    "method": "break_glass",
                    "stage": "session_issued",
                    "reason": input.reason,
                    "attempted_email": input.email,
                    "source_ip": source,
                    "user_agent": request.user_agent,
                    "token_jti": session.token_id,
                    "expires_at": session.expires_at,
                }),
            )
            .await;
        if let Some(metrics) = &self.metrics {
            metrics.break_glass("success");
            metrics.auth_decision("break_glass", "SESSION_ISSUED");
        }
        warn!(
            request_id = %request.request_id,
            actor_id = %credential.account_id,
            tenant_id = tenant_id.unwrap_or_default(),
            source_ip = source,
            token_jti = %session.token_id,
            "emergency session issued"
        );

        self.notifier
            .emergency_access(&EmergencyAccessAlert {
                text: EmergencyAccessAlert::summary(&credential.email, source, &input.reason),
                account_id: credential.account_id.clone(),
                email: credential.email.clone(),
                tenant_id: credential.tenant_id.clone(),
                source_ip: source.to_string(),
                user_agent: request.user_agent.clone(),
                reason: input.reason.clone(),
                token_jti: session.token_id.clone(),
                expires_at: session.expires_at,
            })
            .await;

        Ok(BreakGlassResponse::new(&session, &credential))
    }

    async fn reject(
        &self,
        request: &RequestInfo,
        attempted_email: Option<&str>,
        reason: Option<&str>,
        rejection: Rejection<'_>,
        err: BreakGlassError,
    ) -> BreakGlassError {
        let code = err.code();
        if let Some(metrics) = &self.metrics {
            metrics.break_glass(err.outcome());
            metrics.auth_decision("break_glass", code.as_str());
        }
        info!(
            request_id = %request.request_id,
            code = code.as_str(),
            stage = rejection.stage,
            source_ip = request.source_key(),
            "emergency login rejected"
        );
        let metadata: Value = json!({
            "method": "break_glass",
            "stage": rejection.stage,
            "failure_reason": rejection.failure_reason,
            "reason": reason,
            "attempted_email": attempted_email,
            "source_ip": request.source_key(),
            "user_agent": request.user_agent,
        });
        self.audit
            .record_auth_denied(
                request,
                &rejection.actor,
                rejection.tenant_id,
                code.as_str(),
                Some(metadata),
            )
            .await;
        err
    }
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn validate(raw: Option<&RawLoginBody>) -> Result<LoginInput, &'static str> {
    let raw = raw.ok_or("request body must be a JSON object")?;
    match (
        trimmed(raw.email.as_deref()),
        raw.password.as_deref().filter(|p| !p.trim().is_empty()),
        trimmed(raw.totp_code.as_deref()),
        trimmed(raw.reason.as_deref()),
    ) {
        (Some(email), Some(password), Some(totp_code), Some(reason)) => Ok(LoginInput {
            email: email.to_string(),
            password: password.to_string(),
            totp_code: totp_code.to_string(),
            reason: reason.to_string(),
        }),
        _ => Err("email, password, totp_code, and reason are required"),
    }
}
