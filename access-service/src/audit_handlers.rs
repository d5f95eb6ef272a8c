use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use common_audit::{
    AuditError, AuditEvent, AuditEventKind, AuditOutcome, AuditQuery, AuditStats, RequestInfo,
};
use common_http_errors::{ApiError, ErrorCode};
use common_security::{AccessLevel, OperatorContext, OperatorCtxExtractor, RequestMeta, Resource};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::app::AppState;

const AUDIT_RESOURCE: &str = "audit_logs";
const SCOPE_ALL: &str = "all";

#[derive(Debug, Default, Deserialize)]
pub struct AuditLogParams {
    pub actor_id: Option<String>,
    pub event_type: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub scope: Option<String>,
    pub tenant_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditStatsParams {
    pub window_days: Option<i64>,
    pub scope: Option<String>,
    pub tenant_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuditLogResponse {
    pub events: Vec<AuditEvent>,
    pub total: u64,
    pub limit: i64,
    pub offset: i64,
}

/// Tenant filter for a read: the effective tenant, or (for `scope=all`, platform operators
/// only) the optional `tenant_id` parameter.
async fn tenant_scope(
    state: &AppState,
    ctx: &OperatorContext,
    request: &RequestInfo,
    scope: Option<&str>,
    tenant_param: Option<String>,
) -> Result<Option<String>, ApiError> {
    let resource = Resource::new(AUDIT_RESOURCE, None);
    state
        .authorizer
        .authorize(ctx, request, AccessLevel::TenantAdmin, resource)
        .await
        .map_err(|err| err.to_api_error(request.request_id))?;

    match scope.map(str::trim) {
        None | Some("") | Some("tenant") => Ok(Some(ctx.tenant_id().to_string())),
        Some(SCOPE_ALL) => {
            state
                .authorizer
                .authorize(ctx, request, AccessLevel::PlatformOperator, resource)
                .await
                .map_err(|err| err.to_api_error(request.request_id))?;
            Ok(tenant_param.filter(|t| !t.trim().is_empty()))
        }
        Some(other) => Err(ApiError::validation(
            format!("unsupported scope '{other}'"),
            request.request_id,
        )),
    }
}

fn read_failure(err: AuditError, request: &RequestInfo) -> ApiError {
    error!(error = %err, request_id = %request.request_id, "audit read failed");
    ApiError::new(
        ErrorCode::DependencyUnavailable,
        "audit log temporarily unavailable",
        request.request_id,
    )
}

async fn record_view(
    state: &AppState,
    ctx: &OperatorContext,
    request: &RequestInfo,
    metadata: serde_json::Value,
) {
    let event = AuditEvent::new(AuditEventKind::ResourceView, AuditOutcome::Success, request)
        .actor(&ctx.audit_actor())
        .tenant(Some(ctx.tenant_id()))
        .resource(Some(AUDIT_RESOURCE), None)
        .metadata(metadata);
    state.audit.record(event).await;
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    OperatorCtxExtractor(ctx): OperatorCtxExtractor,
    RequestMeta(request): RequestMeta,
    params: Result<Query<AuditLogParams>, QueryRejection>,
) -> Result<Json<AuditLogResponse>, ApiError> {
    let Query(params) = params
        .map_err(|err| ApiError::validation(err.body_text(), request.request_id))?;
    let tenant_id = tenant_scope(
        &state,
        &ctx,
        &request,
        params.scope.as_deref(),
        params.tenant_id.clone(),
    )
    .await?;

    let kind = params
        .event_type
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| k.to_ascii_uppercase().parse::<AuditEventKind>())
        .transpose()
        .map_err(|err| ApiError::validation(err.to_string(), request.request_id))?;

    let query = AuditQuery {
        actor_id: params.actor_id.filter(|a| !a.trim().is_empty()),
        tenant_id,
        kind,
        start: params.start,
        end: params.end,
        limit: params.limit,
        offset: params.offset,
    };
    let page = state
        .audit
        .query(&query)
        .await
        .map_err(|err| read_failure(err, &request))?;

    record_view(
        &state,
        &ctx,
        &request,
        json!({ "filters": query, "returned": page.events.len() }),
    )
    .await;

    Ok(Json(AuditLogResponse {
        events: page.events,
        total: page.total,
        limit: query.effective_limit(),
        offset: query.effective_offset(),
    }))
}

pub async fn audit_log_stats(
    State(state): State<AppState>,
    OperatorCtxExtractor(ctx): OperatorCtxExtractor,
    RequestMeta(request): RequestMeta,
    params: Result<Query<AuditStatsParams>, QueryRejection>,
) -> Result<Json<AuditStats>, ApiError> {
    let Query(params) = params
        .map_err(|err| ApiError::validation(err.body_text(), request.request_id))?;
    let tenant_id =
        tenant_scope(&state, &ctx, &request, params.scope.as_deref(), params.tenant_id).await?;

    let stats = state
        .audit
        .stats(tenant_id.as_deref(), params.window_days)
        .await
        .map_err(|err| read_failure(err, &request))?;

    record_view(
        &state,
        &ctx,
        &request,
        json!({ "stats": true, "tenant_id": tenant_id, "window_days": stats.window_days }),
    )
    .await;

    Ok(Json(stats))
}
