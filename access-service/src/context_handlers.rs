use std::collections::BTreeSet;

use axum::Json;
use common_security::{AccessLevel, OperatorCtxExtractor};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ContextSummary {
    pub actor_id: String,
    pub email: String,
    pub tenant_id: String,
    pub roles: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_ids: Option<BTreeSet<String>>,
    pub access_level: AccessLevel,
    pub is_platform_operator: bool,
    pub is_emergency: bool,
}

pub async fn context_summary(OperatorCtxExtractor(ctx): OperatorCtxExtractor) -> Json<ContextSummary> {
    Json(ContextSummary {
        actor_id: ctx.actor_id().to_string(),
        email: ctx.email().to_string(),
        tenant_id: ctx.tenant_id().to_string(),
        roles: ctx.roles().clone(),
        location_ids: ctx.location_ids().cloned(),
        access_level: ctx.access_level(),
        is_platform_operator: ctx.is_platform_operator(),
        is_emergency: ctx.is_emergency(),
    })
}
