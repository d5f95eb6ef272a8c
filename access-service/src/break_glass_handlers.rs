use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use common_http_errors::ApiError;
use common_security::RequestMeta;

use crate::app::AppState;
use crate::break_glass::BreakGlassResponse;

/// `POST /api/auth/emergency-login`. The body is read raw so malformed input still reaches
/// the rate limiter and the audit trail.
pub async fn emergency_login(
    State(state): State<AppState>,
    RequestMeta(request): RequestMeta,
    body: Bytes,
) -> Result<Json<BreakGlassResponse>, ApiError> {
    state
        .break_glass
        .authenticate(&body, &request, Utc::now())
        .await
        .map(Json)
        .map_err(|err| err.to_api_error(request.request_id))
}
