use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_audit::{
    AuditActor, AuditError, AuditEvent, AuditEventKind, AuditOutcome, AuditPage, AuditQuery,
    AuditResult, AuditStats, AuditStore, AuditTrail, InMemoryAuditStore, MutationKind,
    RequestInfo,
};
use common_observability::CoreMetrics;
use serde_json::json;

struct FailingStore;

#[async_trait]
impl AuditStore for FailingStore {
    async fn insert(&self, _event: &AuditEvent) -> AuditResult<()> {
        Err(AuditError::Store("connection refused".into()))
    }
    async fn select(&self, _query: &AuditQuery) -> AuditResult<AuditPage> {
        Err(AuditError::Store("connection refused".into()))
    }
    async fn stats(&self, _t: Option<&str>, _s: DateTime<Utc>, _w: i64) -> AuditResult<AuditStats> {
        Err(AuditError::Store("connection refused".into()))
    }
}

struct StalledStore;

#[async_trait]
impl AuditStore for StalledStore {
    async fn insert(&self, _event: &AuditEvent) -> AuditResult<()> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
    async fn select(&self, _query: &AuditQuery) -> AuditResult<AuditPage> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(AuditPage { events: vec![], total: 0 })
    }
    async fn stats(&self, _t: Option<&str>, _s: DateTime<Utc>, w: i64) -> AuditResult<AuditStats> {
        Ok(common_audit::summarize(std::iter::empty(), w))
    }
}

fn request() -> RequestInfo {
    RequestInfo::new("POST", "/api/admin/maintenance-mode").with_ip("10.0.0.8")
}

#[tokio::test]
async fn failed_write_is_swallowed_and_counted() {
    let metrics = CoreMetrics::new();
    let trail = AuditTrail::new(Arc::new(FailingStore)).with_metrics(metrics.clone());
    trail
        .record_auth_denied(&request(), &AuditActor::anonymous(), None, "UNAUTHENTICATED", None)
        .await;
    assert_eq!(metrics.audit_write_failures.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_write_times_out_without_error() {
    let metrics = CoreMetrics::new();
    let trail = AuditTrail::new(Arc::new(StalledStore))
        .with_write_timeout(Duration::from_millis(50))
        .with_metrics(metrics.clone());
    trail
        .record_platform_operator_access(&request(), &AuditActor::new("u2", ["platform_admin"]), "t1")
        .await;
    assert_eq!(metrics.audit_write_failures.get(), 1);
    let err = trail.query(&AuditQuery::default()).await.expect_err("query should time out");
    assert!(matches!(err, AuditError::Timeout));
}

#[tokio::test]
async fn denial_helper_maps_code_to_kind() {
    let store = InMemoryAuditStore::new();
    let trail = AuditTrail::new(Arc::new(store.clone()));
    let actor = AuditActor::new("u1", ["operator_admin"]);
    trail.record_auth_denied(&request(), &actor, Some("t1"), "OPERATOR_CONTEXT_CONFLICT", None).await;
    trail.record_auth_denied(&request(), &actor, None, "OPERATOR_NOT_FOUND", None).await;

    let events = store.events().await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, AuditEventKind::OperatorContextConflict);
    assert_eq!(events[0].outcome, AuditOutcome::Denied);
    assert_eq!(events[0].error_code.as_deref(), Some("OPERATOR_CONTEXT_CONFLICT"));
    assert_eq!(events[1].kind, AuditEventKind::AuthDenied);
    assert_eq!(events[1].tenant_id, "none");
    assert_eq!(events[1].ip_address.as_deref(), Some("10.0.0.8"));
}

#[tokio::test]
async fn mutation_keeps_before_and_after_snapshots() {
    let store = InMemoryAuditStore::new();
    let trail = AuditTrail::new(Arc::new(store.clone()));
    trail
        .record_mutation(
            &request(),
            &AuditActor::new("u1", ["operator_admin"]),
            "t1",
            MutationKind::Update,
            "system_setting",
            Some("maintenance_mode"),
            Some(json!({"is_enabled": false})),
            Some(json!({"is_enabled": true})),
        )
        .await;

    let events = store.events().await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.kind, AuditEventKind::ResourceUpdate);
    assert_eq!(event.previous_state, Some(json!({"is_enabled": false})));
    assert_eq!(event.new_state, Some(json!({"is_enabled": true})));
    assert_eq!(event.resource_id.as_deref(), Some("maintenance_mode"));
}

#[tokio::test]
async fn stats_default_window_counts_recent_events() {
    let store = InMemoryAuditStore::new();
    let trail = AuditTrail::new(Arc::new(store.clone()));
    let actor = AuditActor::new("u1", ["operator_admin"]);
    for _ in 0..3 {
        trail.record_auth_success(&request(), &actor, Some("t1"), json!({"auth_provider": "break_glass"})).await;
    }
    trail.record_permission_denied(&request(), &actor, "t1", Some("mailbox"), Some("mb-1")).await;

    let stats = trail.stats(Some("t1"), None).await.unwrap();
    assert_eq!(stats.window_days, 30);
    assert_eq!(stats.total_events, 4);
    assert_eq!(stats.events_by_kind["AUTH_SUCCESS"], 3);
    assert_eq!(stats.events_by_kind["PERMISSION_DENIED"], 1);
    assert_eq!(stats.top_actors[0].actor_id, "u1");
    assert_eq!(stats.top_actors[0].count, 4);
}
