mod support;

use access_service::maintenance::DEFAULT_MAINTENANCE_MESSAGE;
use access_service::mfa::totp_code_at;
use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use chrono::Utc;
use common_audit::{AuditEventKind, AuditOutcome};
use common_security::test_request_headers;
use serde_json::{json, Value};
use support::{json_body, send, text_body, Harness, EMERGENCY_EMAIL, PASSWORD, TOTP_SECRET};

fn get(uri: &str, bearer: Option<&str>, operator: Option<&str>) -> Request<Body> {
    let mut request = Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap();
    match (bearer, operator) {
        (Some(token), Some(operator)) => test_request_headers!(request, bearer=token, operator=operator),
        (Some(token), None) => test_request_headers!(request, bearer=token),
        (None, _) => {}
    }
    request
}

fn post_json(uri: &str, bearer: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Forwarded-For", "1.2.3.4, 10.0.0.1");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn toggle_maintenance(bearer: &str, operator: Option<&str>, body: Value) -> Request<Body> {
    let mut request = post_json("/api/admin/maintenance-mode", Some(bearer), body);
    if let Some(operator) = operator {
        request
            .headers_mut()
            .insert("x-operator-id", HeaderValue::from_str(operator).unwrap());
    }
    request
}

#[tokio::test]
async fn health_and_metrics_are_public() {
    let harness = Harness::new().await;
    let router = harness.router();

    let response = send(&router, get("/healthz", None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(text_body(response).await, "ok");

    harness.metrics.break_glass("rate_limited");
    let response = send(&router, get("/internal/metrics", None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = text_body(response).await;
    assert!(text.contains("break_glass_attempts_total"));
}

#[tokio::test]
async fn emergency_login_over_http() {
    let harness = Harness::new().await;
    let router = harness.router();

    let response = send(
        &router,
        post_json(
            "/api/auth/emergency-login",
            None,
            json!({"email": EMERGENCY_EMAIL, "password": "nope", "totp_code": "123456", "reason": "IdP outage"}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-error-code"], "INVALID_CREDENTIALS");
    let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "INVALID_CREDENTIALS");
    assert_eq!(body["error"]["request_id"], request_id.as_str());

    let denied = harness.events_of(AuditEventKind::AuthDenied).await;
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].request_id.to_string(), request_id);
    assert_eq!(denied[0].ip_address.as_deref(), Some("1.2.3.4"));

    let code = totp_code_at(TOTP_SECRET, Utc::now().timestamp() as u64).unwrap();
    let response = send(
        &router,
        post_json(
            "/api/auth/emergency-login",
            None,
            json!({"email": EMERGENCY_EMAIL, "password": PASSWORD, "totpCode": code, "reason": "IdP outage"}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["user"]["email"], EMERGENCY_EMAIL);
    let token = body["token"].as_str().unwrap().to_string();

    // the issued session resolves to the credential's own tenant
    let response = send(&router, get("/api/context", Some(&token), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let context = json_body(response).await;
    assert_eq!(context["tenant_id"], "t1");
    assert_eq!(context["is_emergency"], true);
    assert_eq!(context["access_level"], "tenant_admin");
}

#[tokio::test]
async fn emergency_login_rate_limits_per_forwarded_ip() {
    let harness = Harness::new().await;
    let router = harness.router();
    let attempt = json!({"email": EMERGENCY_EMAIL, "password": "nope", "totp_code": "123456", "reason": "IdP outage"});

    for _ in 0..3 {
        let response = send(&router, post_json("/api/auth/emergency-login", None, attempt.clone())).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    let response = send(&router, post_json("/api/auth/emergency-login", None, attempt)).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-error-code"], "RATE_LIMITED");
    assert_eq!(harness.credentials.lookups(), 3);
}

#[tokio::test]
async fn context_route_applies_decision_table() {
    let harness = Harness::new().await;
    let router = harness.router();

    let response = send(&router, get("/api/context", None, None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-error-code"], "UNAUTHENTICATED");

    let bound = harness.token("u1", &["operator_admin"], Some("t1"));
    let response = send(&router, get("/api/context", Some(&bound), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["actor_id"], "u1");
    assert_eq!(body["tenant_id"], "t1");
    assert_eq!(body["roles"], json!(["operator_admin"]));

    let response = send(&router, get("/api/context", Some(&bound), Some("t2"))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.headers()["x-error-code"], "OPERATOR_CONTEXT_CONFLICT");

    let platform = harness.token("u2", &["platform_admin"], None);
    let response = send(&router, get("/api/context", Some(&platform), None)).await;
    assert_eq!(response.headers()["x-error-code"], "OPERATOR_CONTEXT_REQUIRED");

    let response = send(&router, get("/api/context", Some(&platform), Some("t9"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["x-error-code"], "OPERATOR_NOT_FOUND");

    let response = send(&router, get("/api/context", Some(&platform), Some("t2"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["tenant_id"], "t2");
    assert_eq!(body["is_platform_operator"], true);

    assert_eq!(harness.events_of(AuditEventKind::PlatformOperatorAccess).await.len(), 1);
    assert_eq!(harness.events_of(AuditEventKind::OperatorContextConflict).await.len(), 1);
    assert_eq!(harness.events_of(AuditEventKind::OperatorContextRequired).await.len(), 1);
}

#[tokio::test]
async fn maintenance_suspends_only_tenant_routes() {
    let harness = Harness::new().await;
    let router = harness.router();
    let admin = harness.token("admin-1", &["operator_admin"], Some("t1"));
    let staff = harness.token("staff-1", &["operator_staff"], Some("t1"));
    let root = harness.token("root", &["platform_admin"], None);

    let response = send(
        &router,
        toggle_maintenance(&staff, None, json!({"is_enabled": true})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.headers()["x-error-code"], "PERMISSION_DENIED");
    let denied = harness.events_of(AuditEventKind::PermissionDenied).await;
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].resource_id.as_deref(), Some("maintenance_mode"));

    // the flag is global, so a tenant admin may read it but not flip it
    let response = send(&router, toggle_maintenance(&admin, None, json!({"is_enabled": true}))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.headers()["x-error-code"], "PERMISSION_DENIED");
    assert_eq!(harness.events_of(AuditEventKind::PermissionDenied).await.len(), 2);

    let response = send(
        &router,
        toggle_maintenance(&root, Some("t1"), json!({"message": "no flag"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &router,
        toggle_maintenance(&root, Some("t1"), json!({"is_enabled": true})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], DEFAULT_MAINTENANCE_MESSAGE);

    let updates = harness.events_of(AuditEventKind::ResourceUpdate).await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].previous_state.as_ref().unwrap()["is_enabled"], false);
    assert_eq!(updates[0].new_state.as_ref().unwrap()["is_enabled"], true);
    assert_eq!(updates[0].actor_id, "root");
    assert_eq!(updates[0].tenant_id, "t1");

    let response = send(&router, get("/api/context", Some(&admin), None)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()["x-error-code"], "MAINTENANCE_MODE");
    let blocked_request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();
    let body = json_body(response).await;
    assert_eq!(body["error"]["message"], DEFAULT_MAINTENANCE_MESSAGE);

    let blocked = harness.events_of(AuditEventKind::AuthDenied).await;
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].error_code.as_deref(), Some("MAINTENANCE_MODE"));
    assert_eq!(blocked[0].outcome, AuditOutcome::Denied);
    assert_eq!(blocked[0].actor_id, "anonymous");
    assert_eq!(blocked[0].tenant_id, "none");
    assert_eq!(blocked[0].endpoint, "/api/context");
    assert_eq!(blocked[0].request_id.to_string(), blocked_request_id);

    let response = send(&router, get("/api/maintenance", None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["is_enabled"], true);
    assert_eq!(send(&router, get("/healthz", None, None)).await.status(), StatusCode::OK);
    let response = send(&router, get("/api/admin/maintenance-mode", Some(&admin), None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &router,
        toggle_maintenance(&root, Some("t1"), json!({"is_enabled": false})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = send(&router, get("/api/context", Some(&admin), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn emergency_sessions_cannot_toggle_maintenance() {
    let harness = Harness::new().await;
    let router = harness.router();
    let emergency = harness.emergency_token("acct-emergency", &["platform_admin"], None);

    let response = send(&router, get("/api/admin/maintenance-mode", Some(&emergency), Some("t1"))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &router,
        toggle_maintenance(&emergency, Some("t1"), json!({"is_enabled": true})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.headers()["x-error-code"], "PERMISSION_DENIED");
    assert_eq!(json_body(response).await["error"]["message"], "emergency sessions are read-only");

    let denied = harness.events_of(AuditEventKind::PermissionDenied).await;
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].actor_id, "acct-emergency");
    assert!(harness.events_of(AuditEventKind::ResourceUpdate).await.is_empty());

    let response = send(&router, get("/api/maintenance", None, None)).await;
    assert_eq!(json_body(response).await["is_enabled"], false);
}

#[tokio::test]
async fn audit_logs_are_scoped_to_the_effective_tenant() {
    let harness = Harness::new().await;
    let router = harness.router();
    let admin_t1 = harness.token("admin-1", &["operator_admin"], Some("t1"));
    let admin_t2 = harness.token("admin-2", &["operator_admin"], Some("t2"));

    // produce one denial in each tenant
    send(&router, get("/api/context", Some(&admin_t1), Some("t2"))).await;
    send(&router, get("/api/context", Some(&admin_t2), Some("t1"))).await;

    let response = send(&router, get("/api/admin/audit-logs", Some(&admin_t1), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["limit"], 50);
    assert_eq!(body["events"][0]["tenant_id"], "t1");
    assert_eq!(body["events"][0]["kind"], "OPERATOR_CONTEXT_CONFLICT");

    let response = send(
        &router,
        get("/api/admin/audit-logs?scope=all", Some(&admin_t1), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(
        &router,
        get("/api/admin/audit-logs?event_type=bogus", Some(&admin_t1), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let views = harness.events_of(AuditEventKind::ResourceView).await;
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].resource_type.as_deref(), Some("audit_logs"));
}

#[tokio::test]
async fn platform_operator_reads_every_tenant_with_scope_all() {
    let harness = Harness::new().await;
    let router = harness.router();
    let admin_t1 = harness.token("admin-1", &["operator_admin"], Some("t1"));
    let admin_t2 = harness.token("admin-2", &["operator_admin"], Some("t2"));
    send(&router, get("/api/context", Some(&admin_t1), Some("t2"))).await;
    send(&router, get("/api/context", Some(&admin_t2), Some("t1"))).await;

    let platform = harness.token("root", &["platform_admin"], None);
    let response = send(
        &router,
        get(
            "/api/admin/audit-logs?scope=all&event_type=operator_context_conflict",
            Some(&platform),
            Some("t1"),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["total"], 2);

    let response = send(
        &router,
        get("/api/admin/audit-logs/stats?scope=all&window_days=7", Some(&platform), Some("t1")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let stats = json_body(response).await;
    assert_eq!(stats["window_days"], 7);
    assert_eq!(stats["events_by_kind"]["OPERATOR_CONTEXT_CONFLICT"], 2);
    assert!(stats["top_actors"].as_array().unwrap().len() >= 2);
}
