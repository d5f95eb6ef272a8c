use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};
use chrono::{Duration as ChronoDuration, Utc};
use common_audit::{AuditEventKind, AuditTrail, InMemoryAuditStore, RequestInfo};
use common_auth::{Claims, HmacVerifier, JwtConfig, TokenAuthenticator, BREAK_GLASS_KID};
use common_http_errors::ErrorCode;
use common_security::{
    DirectoryError, InMemoryTenantDirectory, OperatorContextResolver, SecurityError, Tenant,
    TenantDirectory,
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;

const SECRET: &[u8] = b"resolver-test-secret-0123456789abcdef";

fn claims(sub: &str, roles: &[&str], tenant: Option<&str>) -> Claims {
    Claims {
        subject: sub.into(),
        email: format!("{sub}@example.com"),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        tenant_id: tenant.map(str::to_string),
        location_ids: None,
        issued_at: Some(Utc::now()),
        expires_at: Utc::now() + ChronoDuration::minutes(15),
        token_id: None,
        emergency: false,
    }
}

struct Harness {
    resolver: OperatorContextResolver,
    store: InMemoryAuditStore,
    directory: InMemoryTenantDirectory,
}

fn harness() -> Harness {
    let directory = InMemoryTenantDirectory::new();
    harness_with(Arc::new(directory.clone()), directory)
}

fn harness_with(dir: Arc<dyn TenantDirectory>, directory: InMemoryTenantDirectory) -> Harness {
    let store = InMemoryAuditStore::new();
    let authenticator = TokenAuthenticator::new()
        .with_verifier(HmacVerifier::new(JwtConfig::new("access-core", "access-core"), SECRET));
    let resolver = OperatorContextResolver::new(
        authenticator,
        dir,
        AuditTrail::new(Arc::new(store.clone())),
    )
    .with_lookup_timeout(Duration::from_millis(100));
    Harness { resolver, store, directory }
}

fn request() -> RequestInfo {
    RequestInfo::new("GET", "/api/context").with_ip("10.1.1.1")
}

fn token(body: serde_json::Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(BREAK_GLASS_KID.into());
    encode(&header, &body, &EncodingKey::from_secret(SECRET)).unwrap()
}

#[tokio::test]
async fn bound_tenant_without_hint_resolves() {
    let h = harness();
    let ctx = h
        .resolver
        .resolve(&claims("u1", &["operator_admin"], Some("t1")), None, &request())
        .await
        .expect("context");
    assert_eq!(ctx.actor_id(), "u1");
    assert_eq!(ctx.tenant_id(), "t1");
    assert!(ctx.roles().contains("operator_admin"));
    assert!(!ctx.is_platform_operator());
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn matching_hint_is_not_a_conflict() {
    let h = harness();
    let ctx = h
        .resolver
        .resolve(&claims("u1", &["operator_staff"], Some("t1")), Some("t1"), &request())
        .await
        .expect("context");
    assert_eq!(ctx.tenant_id(), "t1");
}

#[tokio::test]
async fn conflicting_hint_always_rejects_whatever_the_roles() {
    let role_sets: [&[&str]; 4] = [&[], &["operator_admin"], &["platform_admin"], &["renter", "location_staff"]];
    for roles in role_sets {
        let h = harness();
        h.directory.upsert("t2", true).await;
        let err = h
            .resolver
            .resolve(&claims("u1", roles, Some("t1")), Some("t2"), &request())
            .await
            .expect_err("conflict");
        assert_eq!(err.code(), ErrorCode::OperatorContextConflict, "{roles:?}");

        let events = h.store.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AuditEventKind::OperatorContextConflict);
        assert_eq!(events[0].error_code.as_deref(), Some("OPERATOR_CONTEXT_CONFLICT"));
        assert_eq!(events[0].actor_id, "u1");
        assert_eq!(events[0].tenant_id, "t1");
    }
}

#[tokio::test]
async fn unscoped_non_platform_actor_always_needs_context() {
    let role_sets: [&[&str]; 4] = [&[], &["operator_admin"], &["location_staff"], &["customer"]];
    for roles in role_sets {
        for hint in [None, Some("t1")] {
            let h = harness();
            h.directory.upsert("t1", true).await;
            let err = h
                .resolver
                .resolve(&claims("u3", roles, None), hint, &request())
                .await
                .expect_err("required");
            assert_eq!(err.code(), ErrorCode::OperatorContextRequired, "{roles:?} {hint:?}");
            let events = h.store.events().await;
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].kind, AuditEventKind::OperatorContextRequired);
            assert_eq!(events[0].tenant_id, "none");
        }
    }
}

#[tokio::test]
async fn platform_operator_without_hint_needs_context() {
    let h = harness();
    let err = h
        .resolver
        .resolve(&claims("u2", &["platform_admin"], None), None, &request())
        .await
        .expect_err("required");
    assert!(matches!(err, SecurityError::ContextRequired));
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test]
async fn platform_operator_cannot_select_inactive_or_unknown_tenant() {
    let h = harness();
    h.directory.upsert("t9", false).await;
    for hint in ["t9", "t-unknown"] {
        let err = h
            .resolver
            .resolve(&claims("u2", &["platform_admin"], None), Some(hint), &request())
            .await
            .expect_err("not found");
        assert_eq!(err.code(), ErrorCode::OperatorNotFound);
    }
    let events = h.store.events().await;
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.kind == AuditEventKind::AuthDenied));
    assert!(events.iter().all(|e| e.error_code.as_deref() == Some("OPERATOR_NOT_FOUND")));
}

#[tokio::test]
async fn platform_operator_access_is_recorded() {
    let h = harness();
    h.directory.upsert("t5", true).await;
    let ctx = h
        .resolver
        .resolve(&claims("u2", &["platform_admin"], None), Some(" t5 "), &request())
        .await
        .expect("context");
    assert_eq!(ctx.tenant_id(), "t5");
    assert!(ctx.is_platform_operator());

    let events = h.store.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, AuditEventKind::PlatformOperatorAccess);
    assert_eq!(events[0].tenant_id, "t5");
    assert_eq!(events[0].actor_roles, vec!["platform_admin".to_string()]);
    assert_eq!(events[0].ip_address.as_deref(), Some("10.1.1.1"));
}

struct BrokenDirectory;

#[async_trait]
impl TenantDirectory for BrokenDirectory {
    async fn get_tenant(&self, _tenant_id: &str) -> Result<Option<Tenant>, DirectoryError> {
        Err(DirectoryError::Query("connection refused".into()))
    }
}

struct StalledDirectory;

#[async_trait]
impl TenantDirectory for StalledDirectory {
    async fn get_tenant(&self, _tenant_id: &str) -> Result<Option<Tenant>, DirectoryError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn directory_failure_fails_closed() {
    let h = harness_with(Arc::new(BrokenDirectory), InMemoryTenantDirectory::new());
    let err = h
        .resolver
        .resolve(&claims("u2", &["platform_admin"], None), Some("t5"), &request())
        .await
        .expect_err("closed");
    assert_eq!(err.code(), ErrorCode::DependencyUnavailable);
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_directory_times_out_and_rejects() {
    let h = harness_with(Arc::new(StalledDirectory), InMemoryTenantDirectory::new());
    let err = h
        .resolver
        .resolve(&claims("u2", &["platform_admin"], None), Some("t5"), &request())
        .await
        .expect_err("timed out");
    assert!(matches!(err, SecurityError::DirectoryUnavailable(_)));
    let events = h.store.events().await;
    assert_eq!(events[0].error_code.as_deref(), Some("DEPENDENCY_UNAVAILABLE"));
}

#[tokio::test]
async fn missing_bearer_is_audited_as_anonymous() {
    let h = harness();
    let err = h
        .resolver
        .resolve_request(&HeaderMap::new(), &request(), Utc::now())
        .await
        .expect_err("unauthenticated");
    assert_eq!(err.code(), ErrorCode::Unauthenticated);
    let events = h.store.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].actor_id, "anonymous");
    assert_eq!(events[0].kind, AuditEventKind::AuthDenied);
    assert_eq!(events[0].error_code.as_deref(), Some("UNAUTHENTICATED"));
}

#[tokio::test]
async fn expired_and_malformed_tokens_carry_their_codes() {
    let h = harness();
    let expired = token(json!({
        "sub": "u1", "email": "u1@example.com", "roles": ["operator_admin"], "tid": "t1",
        "iss": "access-core", "aud": "access-core",
        "exp": (Utc::now() - ChronoDuration::minutes(1)).timestamp(),
    }));
    let mut headers = HeaderMap::new();
    headers.insert("authorization", HeaderValue::from_str(&format!("Bearer {expired}")).unwrap());
    let err = h.resolver.resolve_request(&headers, &request(), Utc::now()).await.expect_err("expired");
    assert_eq!(err.code(), ErrorCode::CredentialExpired);

    headers.insert("authorization", HeaderValue::from_static("Bearer not-a-token"));
    let err = h.resolver.resolve_request(&headers, &request(), Utc::now()).await.expect_err("malformed");
    assert_eq!(err.code(), ErrorCode::MalformedCredential);

    let codes: Vec<_> = h.store.events().await.into_iter().filter_map(|e| e.error_code).collect();
    assert_eq!(codes, vec!["CREDENTIAL_EXPIRED".to_string(), "MALFORMED_CREDENTIAL".to_string()]);
}

#[tokio::test]
async fn blank_hint_header_counts_as_absent() {
    let h = harness();
    let bearer = token(json!({
        "sub": "u1", "email": "u1@example.com", "roles": "operator_admin", "tid": "t1",
        "iss": "access-core", "aud": "access-core",
        "exp": (Utc::now() + ChronoDuration::minutes(5)).timestamp(),
    }));
    let mut headers = HeaderMap::new();
    headers.insert("authorization", HeaderValue::from_str(&format!("Bearer {bearer}")).unwrap());
    headers.insert("x-operator-id", HeaderValue::from_static("   "));
    let ctx = h.resolver.resolve_request(&headers, &request(), Utc::now()).await.expect("context");
    assert_eq!(ctx.tenant_id(), "t1");
    assert!(h.store.is_empty().await);
}
