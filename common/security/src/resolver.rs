use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use common_audit::{AuditActor, AuditTrail, RequestInfo};
use common_auth::{bearer_token, Claims, TokenAuthenticator};
use common_observability::CoreMetrics;
use serde_json::json;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::context::OperatorContext;
use crate::directory::TenantDirectory;
use crate::error::SecurityError;
use crate::roles::has_platform_role;

/// Header through which a caller names the tenant it wants to act on.
pub const TENANT_HINT_HEADER: &str = "X-Operator-Id";

const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Trimmed tenant hint; a blank header counts as absent.
pub fn tenant_hint(headers: &HeaderMap) -> Option<String> {
    headers
        .get(TENANT_HINT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Turns a bearer credential plus tenant hint into exactly one [`OperatorContext`].
///
/// Every rejection is written to the audit trail before it is returned.
#[derive(Clone)]
pub struct OperatorContextResolver {
    authenticator: TokenAuthenticator,
    directory: Arc<dyn TenantDirectory>,
    audit: AuditTrail,
    lookup_timeout: Duration,
    metrics: Option<CoreMetrics>,
}

impl OperatorContextResolver {
    pub fn new(
        authenticator: TokenAuthenticator,
        directory: Arc<dyn TenantDirectory>,
        audit: AuditTrail,
    ) -> Self {
        Self {
            authenticator,
            directory,
            audit,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            metrics: None,
        }
    }

    pub fn with_lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: CoreMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Authenticates the request's bearer token and resolves its context.
    pub async fn resolve_request(
        &self,
        headers: &HeaderMap,
        request: &RequestInfo,
        now: DateTime<Utc>,
    ) -> Result<OperatorContext, SecurityError> {
        let hint = tenant_hint(headers);
        let claims = match bearer_token(headers)
            .and_then(|token| self.authenticator.authenticate(&token, now))
        {
            Ok(claims) => claims,
            Err(err) => {
                let err = SecurityError::from(err);
                return Err(self
                    .reject(request, &AuditActor::anonymous(), None, hint.as_deref(), err)
                    .await);
            }
        };
        self.resolve(&claims, hint.as_deref(), request).await
    }

    /// Applies the tenant decision table to already-authenticated claims.
    pub async fn resolve(
        &self,
        claims: &Claims,
        hint: Option<&str>,
        request: &RequestInfo,
    ) -> Result<OperatorContext, SecurityError> {
        let actor = AuditActor::new(claims.subject.clone(), claims.roles.iter().cloned());
        let hint = hint.map(str::trim).filter(|h| !h.is_empty());

        if let Some(bound) = claims.tenant_id.as_deref() {
            if let Some(hinted) = hint.filter(|h| *h != bound) {
                let err = SecurityError::ContextConflict {
                    bound: bound.to_string(),
                    hinted: hinted.to_string(),
                };
                return Err(self.reject(request, &actor, Some(bound), Some(hinted), err).await);
            }
            debug!(actor_id = %claims.subject, tenant_id = bound, "resolved bound operator context");
            return Ok(OperatorContext::from_claims(claims, bound.to_string(), false));
        }

        if !has_platform_role(claims.roles.iter().map(String::as_str)) {
            return Err(self
                .reject(request, &actor, None, hint, SecurityError::ContextRequired)
                .await);
        }

        let Some(hinted) = hint else {
            return Err(self
                .reject(request, &actor, None, None, SecurityError::ContextRequired)
                .await);
        };

        match timeout(self.lookup_timeout, self.directory.get_tenant(hinted)).await {
            Ok(Ok(Some(tenant))) if tenant.active => {}
            Ok(Ok(_)) => {
                let err = SecurityError::OperatorNotFound(hinted.to_string());
                return Err(self.reject(request, &actor, Some(hinted), Some(hinted), err).await);
            }
            Ok(Err(err)) => {
                let err = SecurityError::DirectoryUnavailable(err.to_string());
                return Err(self.reject(request, &actor, None, Some(hinted), err).await);
            }
            Err(_) => {
                let err = SecurityError::DirectoryUnavailable(format!(
                    "lookup exceeded {} ms",
                    self.lookup_timeout.as_millis()
                ));
                return Err(self.reject(request, &actor, None, Some(hinted), err).await);
            }
        }

        self.audit
            .record_platform_operator_access(request, &actor, hinted)
            .await;
        if let Some(metrics) = &self.metrics {
            metrics.auth_decision("resolver", "PLATFORM_OPERATOR_ACCESS");
        }
        debug!(actor_id = %claims.subject, tenant_id = hinted, "platform operator selected tenant");
        Ok(OperatorContext::from_claims(claims, hinted.to_string(), true))
    }

    async fn reject(
        &self,
        request: &RequestInfo,
        actor: &AuditActor,
        tenant_id: Option<&str>,
        hint: Option<&str>,
        err: SecurityError,
    ) -> SecurityError {
        let code = err.code();
        if let Some(metrics) = &self.metrics {
            metrics.auth_decision("resolver", code.as_str());
        }
        warn!(
            request_id = %request.request_id,
            actor_id = actor.id.as_deref().unwrap_or(common_audit::ANONYMOUS_ACTOR),
            code = code.as_str(),
            error = %err,
            "operator context rejected"
        );
        let metadata = json!({ "reason": err.to_string(), "tenant_hint": hint });
        self.audit
            .record_auth_denied(request, actor, tenant_id, code.as_str(), Some(metadata))
            .await;
        err
    }
}
