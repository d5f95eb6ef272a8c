use std::collections::BTreeSet;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common_audit::{AuditActor, RequestInfo};
use common_auth::Claims;
use common_http_errors::{ApiError, ErrorCode};
use serde::Serialize;

use crate::roles::AccessLevel;

/// Canonical per-request identity and effective tenant.
///
/// Only the resolver constructs one, and nothing mutates it afterwards, so the effective
/// tenant cannot be redirected later in the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatorContext {
    actor_id: String,
    email: String,
    roles: BTreeSet<String>,
    tenant_id: String,
    location_ids: Option<BTreeSet<String>>,
    platform_operator: bool,
    emergency: bool,
    token_id: Option<String>,
}

impl OperatorContext {
    pub(crate) fn from_claims(claims: &Claims, tenant_id: String, platform_operator: bool) -> Self {
        Self {
            actor_id: claims.subject.clone(),
            email: claims.email.clone(),
            roles: claims.roles.clone(),
            tenant_id,
            location_ids: claims.location_ids.clone(),
            platform_operator,
            emergency: claims.emergency,
            token_id: claims.token_id.clone(),
        }
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn location_ids(&self) -> Option<&BTreeSet<String>> {
        self.location_ids.as_ref()
    }

    /// True when the tenant was selected by an unscoped platform operator.
    pub fn is_platform_operator(&self) -> bool {
        self.platform_operator
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency
    }

    pub fn token_id(&self) -> Option<&str> {
        self.token_id.as_deref()
    }

    pub fn access_level(&self) -> AccessLevel {
        AccessLevel::classify(self.roles.iter().map(String::as_str))
    }

    pub fn audit_actor(&self) -> AuditActor {
        AuditActor::new(self.actor_id.clone(), self.roles.iter().cloned())
    }
}

/// The resolved context placed in request extensions by the access pipeline.
pub struct OperatorCtxExtractor(pub OperatorContext);

#[async_trait]
impl<S> FromRequestParts<S> for OperatorCtxExtractor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<OperatorContext>() {
            Some(ctx) => Ok(Self(ctx.clone())),
            None => {
                let request_id = request_info(parts).request_id;
                Err(ApiError::new(
                    ErrorCode::Unauthenticated,
                    "authentication required",
                    request_id,
                ))
            }
        }
    }
}

/// Request metadata shared with audit rows and error envelopes.
pub struct RequestMeta(pub RequestInfo);

#[async_trait]
impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(request_info(parts)))
    }
}

fn request_info(parts: &Parts) -> RequestInfo {
    parts
        .extensions
        .get::<RequestInfo>()
        .cloned()
        .unwrap_or_else(|| RequestInfo::from_parts(&parts.method, &parts.uri, &parts.headers))
}
