use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common_observability::CoreMetrics;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{error, info};

use crate::model::{
    AuditActor, AuditError, AuditEvent, AuditEventKind, AuditOutcome, AuditResult, MutationKind,
};
use crate::request::RequestInfo;
use crate::store::{AuditPage, AuditQuery, AuditStats, AuditStore, DEFAULT_STATS_WINDOW_DAYS};

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Best-effort, synchronous audit writer plus the compliance read API.
///
/// `record` awaits the store (bounded by the write timeout) and never returns an error;
/// failures go to the `audit.fallback` tracing target with the full serialized event.
#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
    write_timeout: Duration,
    metrics: Option<CoreMetrics>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store, write_timeout: DEFAULT_WRITE_TIMEOUT, metrics: None }
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: CoreMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn record(&self, event: AuditEvent) {
        match timeout(self.write_timeout, self.store.insert(&event)).await {
            Ok(Ok(())) => {
                info!(
                    target: "audit",
                    event_id = %event.event_id,
                    request_id = %event.request_id,
                    kind = event.kind.as_str(),
                    outcome = event.outcome.as_str(),
                    actor_id = %event.actor_id,
                    tenant_id = %event.tenant_id,
                    endpoint = %event.endpoint,
                    "audit event recorded"
                );
            }
            Ok(Err(err)) => self.fallback(&event, &err),
            Err(_) => self.fallback(&event, &AuditError::Timeout),
        }
    }

    fn fallback(&self, event: &AuditEvent, err: &AuditError) {
        if let Some(metrics) = &self.metrics {
            metrics.audit_write_failures.inc();
        }
        let payload = serde_json::to_string(event)
            .unwrap_or_else(|e| format!("<unserializable audit event {}: {e}>", event.event_id));
        error!(
            target: "audit.fallback",
            error = %err,
            event_id = %event.event_id,
            kind = event.kind.as_str(),
            event = %payload,
            "failed to persist audit event"
        );
    }

    pub async fn record_auth_success(
        &self,
        request: &RequestInfo,
        actor: &AuditActor,
        tenant_id: Option<&str>,
        metadata: Value,
    ) {
        let event = AuditEvent::new(AuditEventKind::AuthSuccess, AuditOutcome::Success, request)
            .actor(actor)
            .tenant(tenant_id)
            .metadata(metadata);
        self.record(event).await;
    }

    /// Records an authentication-layer denial; the kind follows from `error_code`.
    pub async fn record_auth_denied(
        &self,
        request: &RequestInfo,
        actor: &AuditActor,
        tenant_id: Option<&str>,
        error_code: &str,
        metadata: Option<Value>,
    ) {
        let mut event = AuditEvent::new(AuditEventKind::for_denial(error_code), AuditOutcome::Denied, request)
            .actor(actor)
            .tenant(tenant_id)
            .error_code(error_code);
        if let Some(metadata) = metadata {
            event = event.metadata(metadata);
        }
        self.record(event).await;
    }

    pub async fn record_platform_operator_access(
        &self,
        request: &RequestInfo,
        actor: &AuditActor,
        tenant_id: &str,
    ) {
        let event = AuditEvent::new(AuditEventKind::PlatformOperatorAccess, AuditOutcome::Success, request)
            .actor(actor)
            .tenant(Some(tenant_id));
        self.record(event).await;
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record_mutation(
        &self,
        request: &RequestInfo,
        actor: &AuditActor,
        tenant_id: &str,
        kind: MutationKind,
        resource_type: &str,
        resource_id: Option<&str>,
        previous: Option<Value>,
        new: Option<Value>,
    ) {
        let event = AuditEvent::new(kind.into(), AuditOutcome::Success, request)
            .actor(actor)
            .tenant(Some(tenant_id))
            .resource(Some(resource_type), resource_id)
            .states(previous, new);
        self.record(event).await;
    }

    pub async fn record_permission_denied(
        &self,
        request: &RequestInfo,
        actor: &AuditActor,
        tenant_id: &str,
        resource_type: Option<&str>,
        resource_id: Option<&str>,
    ) {
        let event = AuditEvent::new(AuditEventKind::PermissionDenied, AuditOutcome::Denied, request)
            .actor(actor)
            .tenant(Some(tenant_id))
            .error_code("PERMISSION_DENIED")
            .resource(resource_type, resource_id);
        self.record(event).await;
    }

    pub async fn query(&self, query: &AuditQuery) -> AuditResult<AuditPage> {
        timeout(self.write_timeout, self.store.select(query))
            .await
            .map_err(|_| AuditError::Timeout)?
    }

    /// Aggregates over the trailing `window_days` (30 when `None`).
    pub async fn stats(&self, tenant_id: Option<&str>, window_days: Option<i64>) -> AuditResult<AuditStats> {
        let days = window_days.unwrap_or(DEFAULT_STATS_WINDOW_DAYS).max(1);
        let since = Utc::now() - chrono::Duration::days(days);
        timeout(self.write_timeout, self.store.stats(tenant_id, since, days))
            .await
            .map_err(|_| AuditError::Timeout)?
    }
}
