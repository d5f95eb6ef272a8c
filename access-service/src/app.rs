use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use common_audit::AuditTrail;
use common_observability::CoreMetrics;
use common_security::{OperatorContextResolver, RoleAuthorizer};

use crate::audit_handlers::{list_audit_logs, audit_log_stats};
use crate::break_glass::BreakGlassAuthenticator;
use crate::break_glass_handlers::emergency_login;
use crate::context_handlers::context_summary;
use crate::maintenance::MaintenanceGate;
use crate::maintenance_handlers::{get_maintenance_mode, public_maintenance_status, set_maintenance_mode};
use crate::metrics::metrics_endpoint;
use crate::pipeline::{maintenance_guard, request_context, require_operator_context};

#[derive(Clone)]
pub struct AppState {
    pub resolver: OperatorContextResolver,
    pub authorizer: RoleAuthorizer,
    pub audit: AuditTrail,
    pub maintenance: MaintenanceGate,
    pub break_glass: BreakGlassAuthenticator,
    pub metrics: CoreMetrics,
}

async fn health() -> &'static str {
    "ok"
}

/// Full route table. Layers run outermost first: request metadata, then the maintenance
/// gate, then context resolution on the routes that need an operator.
pub fn build_router(state: AppState) -> Router {
    let admin = Router::new()
        .route(
            "/api/admin/maintenance-mode",
            get(get_maintenance_mode).post(set_maintenance_mode),
        )
        .route("/api/admin/audit-logs", get(list_audit_logs))
        .route("/api/admin/audit-logs/stats", get(audit_log_stats))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_operator_context,
        ));

    let tenant_facing = Router::new()
        .route("/api/context", get(context_summary))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_operator_context,
        ));

    Router::new()
        .route("/healthz", get(health))
        .route("/internal/metrics", get(metrics_endpoint))
        .route("/api/auth/emergency-login", post(emergency_login))
        .route("/api/maintenance", get(public_maintenance_status))
        .merge(admin)
        .merge(tenant_facing)
        .layer(middleware::from_fn_with_state(state.clone(), maintenance_guard))
        .layer(middleware::from_fn(request_context))
        .with_state(state)
}
