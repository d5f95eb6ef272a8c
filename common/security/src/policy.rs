use common_audit::{AuditTrail, RequestInfo};
use common_observability::CoreMetrics;
use tracing::warn;

use crate::context::OperatorContext;
use crate::error::SecurityError;
use crate::roles::AccessLevel;

/// Pure level check; the same inputs always give the same answer.
pub fn permits(ctx: &OperatorContext, required: AccessLevel) -> bool {
    ctx.access_level() >= required
}

/// Level check plus the per-resource location restriction for location-scoped staff.
pub fn permits_location(ctx: &OperatorContext, required: AccessLevel, location_id: &str) -> bool {
    if !permits(ctx, required) {
        return false;
    }
    match ctx.access_level() {
        AccessLevel::LocationStaff => ctx
            .location_ids()
            .is_some_and(|ids| ids.contains(location_id)),
        _ => true,
    }
}

/// Resource named in a `PERMISSION_DENIED` audit row.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resource<'a> {
    pub kind: Option<&'a str>,
    pub id: Option<&'a str>,
}

impl<'a> Resource<'a> {
    pub fn new(kind: &'a str, id: Option<&'a str>) -> Self {
        Self { kind: Some(kind), id }
    }
}

/// Audited wrapper around [`permits`]: a denial is recorded before it is returned.
#[derive(Clone)]
pub struct RoleAuthorizer {
    audit: AuditTrail,
    metrics: Option<CoreMetrics>,
}

impl RoleAuthorizer {
    pub fn new(audit: AuditTrail) -> Self {
        Self { audit, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: CoreMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn authorize(
        &self,
        ctx: &OperatorContext,
        request: &RequestInfo,
        required: AccessLevel,
        resource: Resource<'_>,
    ) -> Result<(), SecurityError> {
        if permits(ctx, required) {
            return Ok(());
        }
        let err = SecurityError::PermissionDenied { required };
        Err(self.deny(ctx, request, resource, err).await)
    }

    /// [`authorize`](Self::authorize) for state-changing operations. Emergency sessions are
    /// read-only whatever roles they carry.
    pub async fn authorize_mutation(
        &self,
        ctx: &OperatorContext,
        request: &RequestInfo,
        required: AccessLevel,
        resource: Resource<'_>,
    ) -> Result<(), SecurityError> {
        if ctx.is_emergency() {
            return Err(self.deny(ctx, request, resource, SecurityError::ReadOnlySession).await);
        }
        self.authorize(ctx, request, required, resource).await
    }

    pub async fn authorize_location(
        &self,
        ctx: &OperatorContext,
        request: &RequestInfo,
        required: AccessLevel,
        location_id: &str,
        resource: Resource<'_>,
    ) -> Result<(), SecurityError> {
        if permits_location(ctx, required, location_id) {
            return Ok(());
        }
        let resource = if resource.kind.is_none() {
            Resource::new("location", Some(location_id))
        } else {
            resource
        };
        let err = SecurityError::PermissionDenied { required };
        Err(self.deny(ctx, request, resource, err).await)
    }

    async fn deny(
        &self,
        ctx: &OperatorContext,
        request: &RequestInfo,
        resource: Resource<'_>,
        err: SecurityError,
    ) -> SecurityError {
        if let Some(metrics) = &self.metrics {
            metrics.auth_decision("authorizer", "PERMISSION_DENIED");
        }
        warn!(
            request_id = %request.request_id,
            tenant_id = ctx.tenant_id(),
            actor_id = ctx.actor_id(),
            actual = %ctx.access_level(),
            emergency = ctx.is_emergency(),
            error = %err,
            "permission denied"
        );
        self.audit
            .record_permission_denied(
                request,
                &ctx.audit_actor(),
                ctx.tenant_id(),
                resource.kind,
                resource.id,
            )
            .await;
        err
    }
}
