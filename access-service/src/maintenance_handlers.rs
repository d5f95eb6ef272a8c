use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use common_audit::MutationKind;
use common_http_errors::{ApiError, ErrorCode};
use common_security::{AccessLevel, OperatorCtxExtractor, RequestMeta, Resource};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::app::AppState;
use crate::maintenance::{MaintenanceStatus, MAINTENANCE_SETTING_KEY};

const SETTING_RESOURCE: &str = "system_setting";

#[derive(Debug, Serialize)]
pub struct PublicMaintenanceStatus {
    pub is_enabled: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    is_enabled: Option<bool>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub success: bool,
    #[serde(flatten)]
    pub status: MaintenanceStatus,
}

/// `GET /api/maintenance`: cached flag for clients deciding whether to show the notice.
pub async fn public_maintenance_status(State(state): State<AppState>) -> Json<PublicMaintenanceStatus> {
    let (is_enabled, message) = state.maintenance.is_suspended().await;
    Json(PublicMaintenanceStatus { is_enabled, message })
}

pub async fn get_maintenance_mode(
    State(state): State<AppState>,
    OperatorCtxExtractor(ctx): OperatorCtxExtractor,
    RequestMeta(request): RequestMeta,
) -> Result<Json<MaintenanceStatus>, ApiError> {
    state
        .authorizer
        .authorize(
            &ctx,
            &request,
            AccessLevel::TenantAdmin,
            Resource::new(SETTING_RESOURCE, Some(MAINTENANCE_SETTING_KEY)),
        )
        .await
        .map_err(|err| err.to_api_error(request.request_id))?;
    Ok(Json(state.maintenance.status().await))
}

/// `POST /api/admin/maintenance-mode`. The flag suspends every tenant, so only platform
/// operators outside an emergency session may toggle it.
pub async fn set_maintenance_mode(
    State(state): State<AppState>,
    OperatorCtxExtractor(ctx): OperatorCtxExtractor,
    RequestMeta(request): RequestMeta,
    body: Bytes,
) -> Result<Json<ToggleResponse>, ApiError> {
    state
        .authorizer
        .authorize_mutation(
            &ctx,
            &request,
            AccessLevel::PlatformOperator,
            Resource::new(SETTING_RESOURCE, Some(MAINTENANCE_SETTING_KEY)),
        )
        .await
        .map_err(|err| err.to_api_error(request.request_id))?;

    let toggle: ToggleRequest = serde_json::from_slice(&body).map_err(|_| {
        ApiError::validation("is_enabled (boolean) is required", request.request_id)
    })?;
    let Some(enabled) = toggle.is_enabled else {
        return Err(ApiError::validation(
            "is_enabled (boolean) is required",
            request.request_id,
        ));
    };

    let (previous, next) = state
        .maintenance
        .set(enabled, toggle.message.as_deref(), ctx.actor_id())
        .await
        .map_err(|err| {
            error!(error = %err, request_id = %request.request_id, "failed to update maintenance mode");
            ApiError::new(
                ErrorCode::DependencyUnavailable,
                "Failed to update maintenance mode",
                request.request_id,
            )
        })?;

    state
        .audit
        .record_mutation(
            &request,
            &ctx.audit_actor(),
            ctx.tenant_id(),
            MutationKind::Update,
            SETTING_RESOURCE,
            Some(MAINTENANCE_SETTING_KEY),
            serde_json::to_value(&previous).ok(),
            serde_json::to_value(&next).ok(),
        )
        .await;

    Ok(Json(ToggleResponse { success: true, status: next }))
}
