use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use common_audit::{AuditActor, RequestInfo};
use common_http_errors::{ApiError, ErrorCode};
use common_security::OperatorContext;
use serde_json::json;
use tracing::debug;

use crate::app::AppState;
use crate::maintenance::is_exempt;

const REQUEST_ID_HEADER: &str = "x-request-id";

fn request_info(request: &Request<Body>) -> RequestInfo {
    request
        .extensions()
        .get::<RequestInfo>()
        .cloned()
        .unwrap_or_else(|| {
            RequestInfo::from_parts(request.method(), request.uri(), request.headers())
        })
}

/// Stamps every request with its [`RequestInfo`] and echoes the correlation id.
pub async fn request_context(mut request: Request<Body>, next: Next) -> Response {
    let info = request_info(&request);
    let request_id = info.request_id;
    request.extensions_mut().insert(info);

    let mut response = next.run(request).await;
    if !response.headers().contains_key(REQUEST_ID_HEADER) {
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
    }
    response
}

/// Suspends tenant-facing routes while maintenance mode is on. Each blocked request is
/// audited before the 503 goes out.
pub async fn maintenance_guard(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if is_exempt(request.uri().path()) {
        return next.run(request).await;
    }
    let (suspended, message) = state.maintenance.is_suspended().await;
    if suspended {
        let info = request_info(&request);
        debug!(request_id = %info.request_id, path = request.uri().path(), "request blocked by maintenance mode");
        let code = ErrorCode::MaintenanceMode;
        state
            .audit
            .record_auth_denied(
                &info,
                &AuditActor::anonymous(),
                None,
                code.as_str(),
                Some(json!({ "reason": "maintenance mode enabled" })),
            )
            .await;
        return ApiError::new(code, message, info.request_id).into_response();
    }
    next.run(request).await
}

/// Resolves the operator context once per request and stores it in extensions.
pub async fn require_operator_context(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if request.extensions().get::<OperatorContext>().is_some() {
        return next.run(request).await;
    }
    let info = request_info(&request);
    match state
        .resolver
        .resolve_request(request.headers(), &info, Utc::now())
        .await
    {
        Ok(ctx) => {
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        Err(err) => err.to_api_error(info.request_id).into_response(),
    }
}
